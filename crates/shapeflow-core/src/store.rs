//! Process-wide analyzer store.
//!
//! [`AnalyzerStore`] owns the registry, the execution queue, the notice
//! ledger, the queue-runner state and the connectivity tracker. It is built
//! once per client and shared as [`SharedStore`]. Write guards are held for
//! in-memory mutation only, never across a backend call.

use std::future::Future;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::SyncConfig;
use crate::connectivity::{ConnectionStatus, ConnectionTracker, Transition};
use crate::error::TransportError;
use crate::model::{AnalyzerConfig, AnalyzerId, AnalyzerState, AnalyzerStatus, QueueState};
use crate::notices::{Notice, NoticeLedger};
use crate::queue::ExecutionQueue;
use crate::registry::AnalyzerRegistry;
use crate::sse::ServerEvent;

/// Message recorded when connectivity drops past the grace window.
pub const LOST_CONNECTION_NOTICE: &str = "Lost connection to the shapeflow backend";

/// Shared handle to the store.
pub type SharedStore = Arc<RwLock<AnalyzerStore>>;

/// Client-side mirror of backend analyzer state.
#[derive(Debug)]
pub struct AnalyzerStore {
    registry: AnalyzerRegistry,
    queue: ExecutionQueue,
    notices: NoticeLedger,
    queue_state: QueueState,
    connection: ConnectionTracker,
}

impl AnalyzerStore {
    #[must_use]
    pub fn new(config: &SyncConfig) -> Self {
        Self {
            registry: AnalyzerRegistry::new(),
            queue: ExecutionQueue::new(config.load_interval()),
            notices: NoticeLedger::new(config.notice_limit),
            queue_state: QueueState::default(),
            connection: ConnectionTracker::new(config.max_time_without_contact()),
        }
    }

    #[must_use]
    pub fn shared(config: &SyncConfig) -> SharedStore {
        Arc::new(RwLock::new(Self::new(config)))
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    #[must_use]
    pub fn registry(&self) -> &AnalyzerRegistry {
        &self.registry
    }

    /// Mutable registry access for live edits through `status_mut`/`config_mut`.
    pub fn registry_mut(&mut self) -> &mut AnalyzerRegistry {
        &mut self.registry
    }

    #[must_use]
    pub fn queue(&self) -> &ExecutionQueue {
        &self.queue
    }

    #[must_use]
    pub fn notices(&self) -> &NoticeLedger {
        &self.notices
    }

    #[must_use]
    pub fn queue_state(&self) -> QueueState {
        self.queue_state
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    #[must_use]
    pub fn connection(&self) -> &ConnectionTracker {
        &self.connection
    }

    // =========================================================================
    // Queue membership
    // =========================================================================

    /// Register and enqueue an analyzer. Returns `true` if it was new.
    pub fn queue_analyzer(&mut self, id: &AnalyzerId) -> bool {
        if !id.is_valid() {
            warn!("Refusing to queue analyzer with blank id");
            return false;
        }
        let added = self.registry.add(id);
        let enqueued = self.queue.enqueue(id);
        if added || enqueued {
            debug!(analyzer_id = %id, "Analyzer queued");
        }
        added || enqueued
    }

    /// Dequeue an analyzer and drop its record in one step.
    pub fn unqueue_analyzer(&mut self, id: &AnalyzerId) -> bool {
        let dequeued = self.queue.dequeue(id);
        let dropped = self.registry.drop_analyzer(id).is_some();
        if dequeued || dropped {
            debug!(analyzer_id = %id, "Analyzer unqueued");
        }
        dequeued || dropped
    }

    /// Replace the queue order wholesale.
    pub fn replace_queue(&mut self, order: Vec<AnalyzerId>) {
        self.queue.replace(order);
    }

    pub fn set_queue_state(&mut self, state: QueueState) {
        if self.queue_state != state {
            info!(q_state = %state, previous = %self.queue_state, "Queue state changed");
            self.queue_state = state;
        }
    }

    // =========================================================================
    // Records
    // =========================================================================

    pub fn set_status(&mut self, id: &AnalyzerId, patch: AnalyzerStatus) -> bool {
        self.registry.set_status(id, patch)
    }

    pub fn set_config(&mut self, id: &AnalyzerId, patch: AnalyzerConfig) -> bool {
        self.registry.set_config(id, patch)
    }

    /// Display name of a known analyzer.
    #[must_use]
    pub fn analyzer_name(&self, id: &AnalyzerId) -> Option<String> {
        self.registry
            .config(id)
            .filter(|c| !c.is_empty())
            .map(|c| c.display_name().to_string())
    }

    // =========================================================================
    // Notices
    // =========================================================================

    pub fn push_notice(&mut self, notice: Notice) -> bool {
        self.notices.push(notice)
    }

    /// Record a notice about one analyzer, tagged with its current name.
    pub fn notify_analyzer(&mut self, id: &AnalyzerId, message: impl Into<String>) -> bool {
        let name = self.analyzer_name(id);
        self.notices
            .push(Notice::new(message).for_analyzer(id.clone(), name))
    }

    pub fn dismiss_notice(&mut self, notice: &Notice) -> bool {
        self.notices.dismiss(notice)
    }

    pub fn clear_notices(&mut self) {
        self.notices.clear();
    }

    // =========================================================================
    // Connectivity
    // =========================================================================

    pub fn record_success(&mut self, now: Instant) -> Transition {
        self.connection.record_success(now)
    }

    /// Record a failed call; a disconnect edge also records a notice.
    pub fn record_failure(&mut self, now: Instant) -> Transition {
        let transition = self.connection.record_failure(now);
        if transition == Transition::Disconnected {
            self.notices.push(Notice::new(LOST_CONNECTION_NOTICE));
        }
        transition
    }

    // =========================================================================
    // Server events
    // =========================================================================

    /// Apply one pushed event. Returns whether the store changed.
    pub fn apply_event(&mut self, event: ServerEvent) -> bool {
        match event {
            ServerEvent::Status { id, status } => self.registry.set_status(&id, status),
            ServerEvent::Config { id, config } => self.registry.set_config(&id, config),
            ServerEvent::Notice { id, message, uuid } => {
                let mut notice = Notice::new(message);
                if let Some(id) = id {
                    let name = self.analyzer_name(&id);
                    notice = notice.for_analyzer(id, name);
                }
                if let Some(uuid) = uuid {
                    notice = notice.with_uuid(uuid);
                }
                self.notices.push(notice)
            }
            ServerEvent::Close { id } => self.unqueue_analyzer(&id),
        }
    }

    // =========================================================================
    // Projections
    // =========================================================================

    /// Owned, serializable view of the store at `now`.
    #[must_use]
    pub fn snapshot_at(&self, now: Instant) -> StoreSnapshot {
        let analyzers = self
            .queue
            .ids()
            .iter()
            .filter_map(|id| {
                let record = self.registry.get(id)?;
                Some(AnalyzerSnapshot {
                    id: id.clone(),
                    name: record.config.display_name().to_string(),
                    state: record.status.state,
                    progress: record.status.progress,
                    status: record.status.clone(),
                    config: record.config.clone(),
                })
            })
            .collect();

        StoreSnapshot {
            queue_state: self.queue_state,
            connection: self.connection.status_at(now),
            analyzers,
            notices: self.notices.iter().cloned().collect(),
        }
    }

    #[must_use]
    pub fn snapshot(&self) -> StoreSnapshot {
        self.snapshot_at(Instant::now())
    }
}

/// One queued analyzer as seen by consumers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyzerSnapshot {
    pub id: AnalyzerId,
    pub name: String,
    pub state: Option<AnalyzerState>,
    pub progress: Option<f64>,
    pub status: AnalyzerStatus,
    pub config: AnalyzerConfig,
}

/// Read-only projection of [`AnalyzerStore`], in queue order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreSnapshot {
    pub queue_state: QueueState,
    pub connection: ConnectionStatus,
    pub analyzers: Vec<AnalyzerSnapshot>,
    pub notices: Vec<Notice>,
}

/// Await a backend call and fold its outcome into connectivity.
pub async fn tracked<T, F>(store: &SharedStore, call: F) -> Result<T, TransportError>
where
    F: Future<Output = Result<T, TransportError>>,
{
    let result = call.await;
    let now = Instant::now();
    let mut guard = store.write().await;
    match &result {
        Ok(_) => {
            guard.record_success(now);
        }
        Err(err) => {
            debug!(error = %err, "Backend call failed");
            guard.record_failure(now);
        }
    }
    result
}
