//! Top-level client handle.
//!
//! Wires one backend, one store, one synchronizer and one action surface
//! together. Build it once per process and clone it where needed.

use std::sync::Arc;

use crate::actions::AnalyzerActions;
use crate::config::ClientConfig;
use crate::error::Result;
use crate::store::{AnalyzerStore, SharedStore, StoreSnapshot};
use crate::sync::Synchronizer;
use crate::transport::{Backend, HttpBackend};

#[derive(Debug, Clone)]
pub struct ShapeflowClient {
    store: SharedStore,
    sync: Synchronizer,
    actions: AnalyzerActions,
}

impl ShapeflowClient {
    /// Connect over HTTP using `config`.
    pub fn connect(config: &ClientConfig) -> Result<Self> {
        config.validate()?;
        let backend = HttpBackend::new(&config.backend)?;
        Ok(Self::with_backend(Arc::new(backend), config))
    }

    /// Build a client over any [`Backend`] implementation.
    #[must_use]
    pub fn with_backend(backend: Arc<dyn Backend>, config: &ClientConfig) -> Self {
        let store = AnalyzerStore::shared(&config.sync);
        let sync = Synchronizer::new(Arc::clone(&backend), Arc::clone(&store), config.sync.clone());
        let actions = AnalyzerActions::new(backend, Arc::clone(&store));
        Self {
            store,
            sync,
            actions,
        }
    }

    #[must_use]
    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    #[must_use]
    pub fn sync(&self) -> &Synchronizer {
        &self.sync
    }

    #[must_use]
    pub fn actions(&self) -> &AnalyzerActions {
        &self.actions
    }

    pub async fn snapshot(&self) -> StoreSnapshot {
        self.store.read().await.snapshot()
    }

    pub async fn is_connected(&self) -> bool {
        self.store.read().await.is_connected()
    }
}
