//! Process-wide container registry
//!
//! Long-lived service modules ("containers") register themselves under a
//! unique name and find each other through lookups on the registry. The
//! registry owns every container for the process lifetime; registration
//! and unregistration are the only mutation points.

use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{error, info, warn};

use crate::AnyError;

#[derive(Debug, Error)]
pub enum ContainerError {
    #[error("Container already exists: {0}")]
    DuplicateName(String),

    #[error("No such container: {0}")]
    NotFound(String),

    #[error("Container has unexpected type: {0}")]
    WrongType(String),

    #[error("Engine is shut down")]
    Terminated,
}

/// A named, long-lived service module
///
/// Containers must not hold strong references to the engine; the
/// `EngineHandle` given to `init` is the supported way to reach other
/// containers later.
#[async_trait]
pub trait Container: Send + Sync + 'static {
    fn name(&self) -> &str;

    /// Called once at registration, before the container is stored
    async fn init(&self, engine: EngineHandle) -> Result<(), AnyError>;

    /// Best-effort persistence hook, called at shutdown
    async fn flush_data(&self) -> Result<(), AnyError> {
        Ok(())
    }

    /// Called on unregister
    async fn destroy(&self) -> Result<(), AnyError> {
        Ok(())
    }

    /// Downcast support for typed lookups
    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

/// Registry of containers, keyed by name
pub struct ContainerEngine {
    containers: RwLock<HashMap<String, Arc<dyn Container>>>,
}

impl ContainerEngine {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            containers: RwLock::new(HashMap::new()),
        })
    }

    /// A weak handle suitable for handing to containers
    pub fn handle(self: &Arc<Self>) -> EngineHandle {
        EngineHandle {
            inner: Arc::downgrade(self),
        }
    }

    /// Register and initialize a container
    ///
    /// A name collision is an error. An initialization failure is logged
    /// and the container is dropped, but the registry stays usable and
    /// the call still succeeds.
    pub async fn register(
        self: &Arc<Self>,
        container: Arc<dyn Container>,
    ) -> Result<(), ContainerError> {
        let name = container.name().to_string();

        if self.containers.read().await.contains_key(&name) {
            return Err(ContainerError::DuplicateName(name));
        }

        match container.init(self.handle()).await {
            Ok(()) => {
                let mut containers = self.containers.write().await;
                if containers.contains_key(&name) {
                    return Err(ContainerError::DuplicateName(name));
                }
                info!(container = %name, "Container registered");
                containers.insert(name, container);
            }
            Err(err) => {
                error!(container = %name, error = %err, "Error starting container");
            }
        }

        Ok(())
    }

    /// Destroy and remove a container
    pub async fn unregister(&self, name: &str) -> Result<(), ContainerError> {
        let container = self
            .containers
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| ContainerError::NotFound(name.to_string()))?;

        if let Err(err) = container.destroy().await {
            warn!(container = name, error = %err, "Error destroying container");
        }

        self.containers.write().await.remove(name);
        info!(container = name, "Container unregistered");
        Ok(())
    }

    pub async fn get(&self, name: &str) -> Result<Arc<dyn Container>, ContainerError> {
        self.containers
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| ContainerError::NotFound(name.to_string()))
    }

    /// Typed lookup via downcast
    pub async fn get_as<T: Container>(&self, name: &str) -> Result<Arc<T>, ContainerError> {
        let container = self.get(name).await?;
        container
            .as_any()
            .downcast::<T>()
            .map_err(|_| ContainerError::WrongType(name.to_string()))
    }

    pub async fn names(&self) -> Vec<String> {
        self.containers.read().await.keys().cloned().collect()
    }

    /// Invoke every container's persistence hook, tolerating individual
    /// failures so one bad container cannot block the rest
    pub async fn flush_all(&self) {
        let containers: Vec<Arc<dyn Container>> =
            self.containers.read().await.values().cloned().collect();

        for container in containers {
            if let Err(err) = container.flush_data().await {
                warn!(container = container.name(), error = %err, "Flush failed");
            }
        }
    }
}

/// Weak reference to the engine for inter-container lookups
#[derive(Clone)]
pub struct EngineHandle {
    inner: Weak<ContainerEngine>,
}

impl EngineHandle {
    fn upgrade(&self) -> Result<Arc<ContainerEngine>, ContainerError> {
        self.inner.upgrade().ok_or(ContainerError::Terminated)
    }

    pub async fn get(&self, name: &str) -> Result<Arc<dyn Container>, ContainerError> {
        self.upgrade()?.get(name).await
    }

    pub async fn get_as<T: Container>(&self, name: &str) -> Result<Arc<T>, ContainerError> {
        self.upgrade()?.get_as::<T>(name).await
    }
}
