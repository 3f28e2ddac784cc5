use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "syncbox")]
#[command(about = "SyncBox CLI", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the sync engine until interrupted
    Serve(ServeArgs),
}

#[derive(clap::Args, Debug)]
pub struct ServeArgs {
    /// Path to the configuration file
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Directory holding the record store and fetched content,
    /// overriding the configured locations
    #[arg(long)]
    pub data_dir: Option<PathBuf>,
}
