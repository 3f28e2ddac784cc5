//! Preview engine
//!
//! Renders converted content into per-document previews under
//! `{tenant}/previews/`. Rendering is a [`Renderer`] seam; the built-in
//! [`HtmlRenderer`] wraps content in a minimal HTML shell.

use std::any::Any;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tracing::{info, warn};

use crate::engine::{Container, EngineHandle};
use crate::jobs::{HandlerContext, JobHandler, JobKind};
use crate::ledger::RecordStore;
use crate::storage::{self, ContentStore, StorageError};
use crate::transform::{self, ContentNode};
use crate::AnyError;

/// Renders one converted document into its preview form
#[async_trait]
pub trait Renderer: Send + Sync {
    async fn render(&self, node: &ContentNode, body: Bytes) -> Result<Bytes, AnyError>;
}

/// Minimal HTML shell around the converted content
pub struct HtmlRenderer;

fn escape_html(raw: &str) -> String {
    raw.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

#[async_trait]
impl Renderer for HtmlRenderer {
    async fn render(&self, node: &ContentNode, body: Bytes) -> Result<Bytes, AnyError> {
        let title = escape_html(&node.title);
        let content = String::from_utf8_lossy(&body);
        let page = format!(
            "<!doctype html>\n<html>\n<head><meta charset=\"utf-8\"><title>{title}</title></head>\n<body>\n<article>\n{content}\n</article>\n</body>\n</html>\n"
        );
        Ok(Bytes::from(page))
    }
}

/// Container and handler for the `render_preview` kind
pub struct PreviewEngine {
    store: Arc<RecordStore>,
    content: Arc<ContentStore>,
    renderer: Arc<dyn Renderer>,
}

impl PreviewEngine {
    pub const NAME: &'static str = "preview";

    pub fn new(
        store: Arc<RecordStore>,
        content: Arc<ContentStore>,
        renderer: Arc<dyn Renderer>,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            content,
            renderer,
        })
    }

    /// Renders every document in the content tree; returns how many
    /// previews were written
    pub async fn render_all<F>(&self, tenant: &str, progress: F) -> Result<usize, AnyError>
    where
        F: Fn(usize, usize) + Send + Sync,
    {
        let tree = transform::content_tree(&self.store, tenant)?;
        let total = tree.len();
        let mut rendered = 0;
        progress(0, total);

        for (done, node) in tree.into_iter().enumerate() {
            let body = match self.content.download(&node.key).await {
                Ok(body) => body,
                Err(StorageError::NotFound(_)) => {
                    warn!(tenant, file = %node.id, "Converted content missing, skipping preview");
                    progress(done + 1, total);
                    continue;
                }
                Err(err) => return Err(err.into()),
            };

            let page = self.renderer.render(&node, body).await?;
            self.content
                .upload(&storage::preview_key(tenant, &node.id), page)
                .await?;
            rendered += 1;
            progress(done + 1, total);
        }

        info!(tenant, rendered, "Previews rendered");
        Ok(rendered)
    }
}

#[async_trait]
impl Container for PreviewEngine {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn init(&self, _engine: EngineHandle) -> Result<(), AnyError> {
        Ok(())
    }

    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

#[async_trait]
impl JobHandler for PreviewEngine {
    async fn perform(&self, ctx: HandlerContext) -> Result<(), AnyError> {
        if ctx.job().kind != JobKind::RenderPreview {
            return Err(format!("preview engine cannot handle kind: {}", ctx.job().kind).into());
        }
        let forward_ctx = ctx.clone();
        self.render_all(ctx.tenant(), move |completed, total| {
            let ctx = forward_ctx.clone();
            tokio::spawn(async move {
                ctx.progress(completed, total).await;
            });
        })
        .await?;
        Ok(())
    }
}
