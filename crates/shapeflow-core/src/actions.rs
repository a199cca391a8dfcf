//! User-initiated analyzer lifecycle commands.
//!
//! Every backend call goes through [`tracked`] so its outcome feeds the
//! connectivity signal. Local state is only changed after the backend has
//! confirmed; the queue-runner state in particular is never set
//! optimistically.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::model::{AnalyzerConfig, AnalyzerId, AnalyzerStatus, QueueState};
use crate::notices::Notice;
use crate::store::{SharedStore, tracked};
use crate::transport::{Backend, QueueResponse};

/// Lifecycle command surface over a [`Backend`] and the shared store.
#[derive(Clone)]
pub struct AnalyzerActions {
    backend: Arc<dyn Backend>,
    store: SharedStore,
}

impl std::fmt::Debug for AnalyzerActions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnalyzerActions").finish_non_exhaustive()
    }
}

impl AnalyzerActions {
    #[must_use]
    pub fn new(backend: Arc<dyn Backend>, store: SharedStore) -> Self {
        Self { backend, store }
    }

    /// Create, configure and launch a new analyzer.
    ///
    /// Any failure after the backend has allocated the id closes it again
    /// (best effort) and removes it locally, so no half-initialized analyzer
    /// is left behind.
    pub async fn init(&self, config: AnalyzerConfig) -> Result<AnalyzerId> {
        let id = tracked(&self.store, self.backend.init()).await?;
        self.store.write().await.queue_analyzer(&id);
        info!(analyzer_id = %id, "Analyzer initialized");

        match self.configure_and_launch(&id, &config).await {
            Ok(()) => Ok(id),
            Err(err) => {
                warn!(analyzer_id = %id, error = %err, "Launch sequence failed, unwinding");
                if let Err(close_err) = tracked(&self.store, self.backend.close(&id)).await {
                    debug!(analyzer_id = %id, error = %close_err, "Best-effort close failed");
                }
                let mut store = self.store.write().await;
                store.unqueue_analyzer(&id);
                store.push_notice(Notice::new(format!(
                    "Could not launch {}: {err}",
                    config.display_name()
                )));
                Err(err)
            }
        }
    }

    async fn configure_and_launch(&self, id: &AnalyzerId, config: &AnalyzerConfig) -> Result<()> {
        let echoed = tracked(&self.store, self.backend.set_config(id, config)).await?;
        self.store.write().await.set_config(id, echoed);
        self.launch(id).await
    }

    /// Ask the backend whether `id` can launch, then launch it.
    pub async fn launch(&self, id: &AnalyzerId) -> Result<()> {
        let can_launch = tracked(&self.store, self.backend.can_launch(id)).await?;
        if !can_launch {
            return Err(Error::LaunchRefused(id.clone()));
        }
        if !tracked(&self.store, self.backend.launch(id)).await? {
            return Err(Error::LaunchRefused(id.clone()));
        }
        info!(analyzer_id = %id, "Analyzer launched");
        Ok(())
    }

    /// Close an analyzer. Local state is only dropped when the backend
    /// confirms; on `false` or error it is kept for the next sync to settle.
    pub async fn close(&self, id: &AnalyzerId) -> Result<bool> {
        match tracked(&self.store, self.backend.close(id)).await {
            Ok(true) => {
                self.store.write().await.unqueue_analyzer(id);
                info!(analyzer_id = %id, "Analyzer closed");
                Ok(true)
            }
            Ok(false) => {
                self.store
                    .write()
                    .await
                    .notify_analyzer(id, "Backend refused to close analyzer");
                Ok(false)
            }
            Err(err) => {
                self.store
                    .write()
                    .await
                    .notify_analyzer(id, format!("Could not close analyzer: {err}"));
                Err(err.into())
            }
        }
    }

    /// Start the queue runner with the current local order.
    pub async fn start_queue(&self) -> Result<QueueState> {
        let order = self.store.read().await.queue().ids().to_vec();
        let response = tracked(&self.store, self.backend.start(&order)).await?;
        Ok(self.adopt(response).await)
    }

    /// Stop the queue runner.
    pub async fn stop_queue(&self) -> Result<QueueState> {
        let response = tracked(&self.store, self.backend.stop()).await?;
        Ok(self.adopt(response).await)
    }

    /// Adopt the backend's queue answer. Ids the registry has never seen are
    /// registered first so every queued id has a record.
    async fn adopt(&self, response: QueueResponse) -> QueueState {
        let mut store = self.store.write().await;
        store.set_queue_state(response.q_state);
        if !response.ids.is_empty() {
            for id in &response.ids {
                if id.is_valid() && !store.registry().contains(id) {
                    store.queue_analyzer(id);
                }
            }
            let order = response
                .ids
                .into_iter()
                .filter(|id| store.registry().contains(id))
                .collect();
            store.replace_queue(order);
        }
        response.q_state
    }

    /// Push an edited config and merge the backend's normalized echo.
    pub async fn commit_config(
        &self,
        id: &AnalyzerId,
        draft: AnalyzerConfig,
    ) -> Result<AnalyzerConfig> {
        self.ensure_queued(id).await?;
        let echoed = tracked(&self.store, self.backend.set_config(id, &draft)).await?;
        let mut store = self.store.write().await;
        store.set_config(id, echoed);
        Ok(store.registry().config_copy(id).unwrap_or_default())
    }

    /// Run one analyzer outside the queue.
    pub async fn analyze(&self, id: &AnalyzerId) -> Result<bool> {
        let started = tracked(&self.store, self.backend.analyze(id)).await?;
        if !started {
            self.store
                .write()
                .await
                .notify_analyzer(id, "Backend refused to start analysis");
        }
        Ok(started)
    }

    pub async fn cancel(&self, id: &AnalyzerId) -> Result<bool> {
        let canceled = tracked(&self.store, self.backend.cancel(id)).await?;
        if canceled {
            info!(analyzer_id = %id, "Analysis canceled");
        }
        Ok(canceled)
    }

    /// Re-fetch status and config for one queued analyzer.
    pub async fn refresh(&self, id: &AnalyzerId) -> Result<()> {
        self.ensure_queued(id).await?;
        let (status, config) = futures::future::join(
            tracked(&self.store, self.backend.get_status(id)),
            tracked(&self.store, self.backend.get_config(id)),
        )
        .await;
        let status: AnalyzerStatus = status?;
        let config = config?;
        let mut store = self.store.write().await;
        store.set_status(id, status);
        store.set_config(id, config);
        Ok(())
    }

    /// Apply a user reordering. `order` must be a permutation of the queue.
    pub async fn reorder(&self, order: Vec<AnalyzerId>) -> Result<()> {
        let mut store = self.store.write().await;
        let current: HashSet<&AnalyzerId> = store.queue().ids().iter().collect();
        let requested: HashSet<&AnalyzerId> = order.iter().collect();
        if order.len() != current.len() || requested != current {
            return Err(Error::InvalidOrder(format!(
                "expected a permutation of {} queued analyzers, got {} ids",
                current.len(),
                order.len()
            )));
        }
        store.replace_queue(order);
        Ok(())
    }

    /// Liveness check against `GET /ping`.
    pub async fn ping(&self) -> Result<bool> {
        Ok(tracked(&self.store, self.backend.ping()).await?)
    }

    async fn ensure_queued(&self, id: &AnalyzerId) -> Result<()> {
        if self.store.read().await.registry().contains(id) {
            Ok(())
        } else {
            Err(Error::NotQueued(id.clone()))
        }
    }
}
