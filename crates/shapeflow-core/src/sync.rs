//! Reconciliation loop and event stream ownership.
//!
//! The [`Synchronizer`] polls `GET /api/va/state` on a fixed interval and
//! converges the local store onto the backend's view:
//!
//! 1. adopt the queue-runner state
//! 2. unqueue local analyzers the backend no longer knows
//! 3. queue analyzers the backend knows but we do not
//! 4. merge the positional status list
//! 5. backfill every config that is still empty, concurrently
//!
//! While the loop runs it also keeps one push-event stream open. Stream
//! failures close it; the next successful pass reopens it.
//!
//! Starting the loop twice replaces the running task, so there is never more
//! than one timer. Stopping it signals the task, aborts it and closes the
//! event stream; no new tick starts afterwards.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use futures::StreamExt;
use futures::future::join_all;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::config::SyncConfig;
use crate::error::Result;
use crate::model::AnalyzerId;
use crate::sse::ServerEvent;
use crate::store::{AnalyzerStore, SharedStore, tracked};
use crate::transport::{Backend, EventStream, StateResponse};

/// Outcome of one reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Ids newly queued from the backend.
    pub queued: Vec<AnalyzerId>,
    /// Ids dropped because the backend no longer lists them.
    pub unqueued: Vec<AnalyzerId>,
    /// Ids whose config was empty at the end of the merge.
    pub missing_config: Vec<AnalyzerId>,
    pub configs_fetched: usize,
    pub config_failures: usize,
    /// Whether this pass opened a new event stream.
    pub events_opened: bool,
}

/// Merge one state response into the store.
///
/// Does not touch the network; config backfill is left to the caller via
/// [`SyncReport::missing_config`].
pub fn reconcile(store: &mut AnalyzerStore, state: StateResponse) -> SyncReport {
    let mut report = SyncReport::default();
    store.set_queue_state(state.q_state);

    let remote: HashSet<&AnalyzerId> = state.ids.iter().collect();
    let mut stale: Vec<AnalyzerId> = store
        .queue()
        .ids()
        .iter()
        .chain(store.registry().ids())
        .filter(|id| !remote.contains(id))
        .cloned()
        .collect();
    stale.sort();
    stale.dedup();
    for id in stale {
        store.unqueue_analyzer(&id);
        report.unqueued.push(id);
    }

    for id in &state.ids {
        if !id.is_valid() {
            warn!("Backend state lists a blank analyzer id");
            continue;
        }
        let missing = !store.registry().contains(id) || !store.queue().contains(id);
        if missing && store.queue_analyzer(id) {
            report.queued.push(id.clone());
        }
    }

    if state.status.len() != state.ids.len() {
        warn!(
            ids = state.ids.len(),
            statuses = state.status.len(),
            "Status list does not line up with id list"
        );
    }
    for (id, status) in state.ids.iter().zip(state.status) {
        store.set_status(id, status);
    }

    report.missing_config = state
        .ids
        .iter()
        .filter(|id| store.registry().config_is_empty(id))
        .cloned()
        .collect();

    if !report.queued.is_empty() || !report.unqueued.is_empty() {
        info!(
            queued = report.queued.len(),
            unqueued = report.unqueued.len(),
            "Queue reconciled with backend"
        );
    }
    report
}

struct LoopTask {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl LoopTask {
    fn cancel(self) {
        let _ = self.shutdown.send(true);
        self.handle.abort();
    }
}

struct Inner {
    backend: Arc<dyn Backend>,
    store: SharedStore,
    config: SyncConfig,
    looping: AtomicBool,
    loop_task: Mutex<Option<LoopTask>>,
    events: Mutex<Option<JoinHandle<()>>>,
}

/// Owner of the polling loop and the push-event stream.
///
/// Cheap to clone; all clones drive the same loop.
#[derive(Clone)]
pub struct Synchronizer {
    inner: Arc<Inner>,
}

impl Synchronizer {
    #[must_use]
    pub fn new(backend: Arc<dyn Backend>, store: SharedStore, config: SyncConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                backend,
                store,
                config,
                looping: AtomicBool::new(false),
                loop_task: Mutex::new(None),
                events: Mutex::new(None),
            }),
        }
    }

    #[must_use]
    pub fn store(&self) -> &SharedStore {
        &self.inner.store
    }

    #[must_use]
    pub fn is_looping(&self) -> bool {
        self.inner.looping.load(Ordering::SeqCst)
    }

    /// Whether a push-event stream is currently being consumed.
    #[must_use]
    pub fn events_open(&self) -> bool {
        let slot = self.inner.events.lock().unwrap_or_else(|e| e.into_inner());
        slot.as_ref().is_some_and(|handle| !handle.is_finished())
    }

    // =========================================================================
    // Loop control
    // =========================================================================

    /// Start polling. A loop that is already running is replaced.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start_loop(&self) {
        let mut slot = self.inner.loop_task.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(previous) = slot.take() {
            debug!("Replacing running sync loop");
            previous.cancel();
        }

        self.inner.looping.store(true, Ordering::SeqCst);
        let (shutdown, rx) = watch::channel(false);
        let this = self.clone();
        let handle = tokio::spawn(async move { this.run(rx).await });
        *slot = Some(LoopTask { shutdown, handle });

        info!(
            interval_ms = self.inner.config.interval_ms,
            "Sync loop started"
        );
    }

    /// Stop polling and close the event stream. No new tick starts after
    /// this returns; a pass already in flight is dropped at its next await.
    /// Idempotent.
    pub fn stop_loop(&self) {
        self.inner.looping.store(false, Ordering::SeqCst);
        let task = self
            .inner
            .loop_task
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(task) = task {
            task.cancel();
            info!("Sync loop stopped");
        }
        self.close_events();
    }

    /// Stop the loop and tell the backend to detach the event stream.
    pub async fn shutdown(&self) {
        self.stop_loop();
        if let Err(err) = self.inner.backend.stop_events().await {
            debug!(error = %err, "stop_events during shutdown failed");
        }
    }

    async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.inner.config.interval());
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.changed() => {
                    debug!("Sync loop received shutdown");
                    break;
                }
                _ = interval.tick() => {
                    if let Err(err) = self.sync_once().await {
                        debug!(error = %err, "Sync pass failed");
                    }
                }
            }
        }
    }

    // =========================================================================
    // Reconciliation
    // =========================================================================

    /// Run one reconciliation pass.
    pub async fn sync_once(&self) -> Result<SyncReport> {
        let inner = &self.inner;
        let state = match inner.backend.state().await {
            Ok(state) => state,
            Err(err) => {
                debug!(error = %err, "State poll failed");
                inner.store.write().await.record_failure(Instant::now());
                self.close_events();
                return Err(err.into());
            }
        };

        let mut report = {
            let mut store = inner.store.write().await;
            store.record_success(Instant::now());
            reconcile(&mut store, state)
        };

        let (fetched, failed) = self.backfill_configs(&report.missing_config).await;
        report.configs_fetched = fetched;
        report.config_failures = failed;

        if self.is_looping() {
            report.events_opened = self.ensure_events().await;
        }
        Ok(report)
    }

    /// Fetch configs for `ids` concurrently. Returns (merged, failed).
    async fn backfill_configs(&self, ids: &[AnalyzerId]) -> (usize, usize) {
        if ids.is_empty() {
            return (0, 0);
        }
        let backend = self.inner.backend.as_ref();
        let results = join_all(
            ids.iter()
                .map(|id| async move { (id, backend.get_config(id).await) }),
        )
        .await;

        let now = Instant::now();
        let mut store = self.inner.store.write().await;
        let mut fetched = 0;
        let mut failed = 0;
        for (id, result) in results {
            match result {
                Ok(config) => {
                    store.record_success(now);
                    // Ids dropped meanwhile are rejected by the registry.
                    if store.set_config(id, config) {
                        fetched += 1;
                    }
                }
                Err(err) => {
                    debug!(analyzer_id = %id, error = %err, "Config backfill failed");
                    store.record_failure(now);
                    failed += 1;
                }
            }
        }
        (fetched, failed)
    }

    // =========================================================================
    // Event stream
    // =========================================================================

    /// Open the push stream unless one is already live.
    async fn ensure_events(&self) -> bool {
        if self.events_open() {
            return false;
        }
        let inner = &self.inner;

        if let Err(err) = tracked(&inner.store, inner.backend.stop_events()).await {
            debug!(error = %err, "Could not detach previous event stream");
            return false;
        }
        let stream = match tracked(&inner.store, inner.backend.events()).await {
            Ok(stream) => stream,
            Err(err) => {
                debug!(error = %err, "Could not open event stream");
                return false;
            }
        };

        let mut slot = inner.events.lock().unwrap_or_else(|e| e.into_inner());
        // The loop may have been stopped while the stream was opening.
        if !inner.looping.load(Ordering::SeqCst) {
            return false;
        }
        if slot.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return false;
        }
        *slot = Some(tokio::spawn(pump_events(stream, inner.store.clone())));
        true
    }

    fn close_events(&self) {
        let handle = self
            .inner
            .events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(handle) = handle {
            if !handle.is_finished() {
                info!("Closing event stream");
            }
            handle.abort();
        }
    }
}

impl std::fmt::Debug for Synchronizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Synchronizer")
            .field("looping", &self.is_looping())
            .field("events_open", &self.events_open())
            .finish_non_exhaustive()
    }
}

/// Apply every decodable frame to the store until the stream ends or fails.
async fn pump_events(mut stream: EventStream, store: SharedStore) {
    while let Some(item) = stream.next().await {
        match item {
            Ok(frame) => match ServerEvent::from_frame(&frame) {
                Ok(event) => {
                    debug!(
                        category = event.category(),
                        analyzer_id = ?event.analyzer_id(),
                        "Server event"
                    );
                    let mut guard = store.write().await;
                    guard.record_success(Instant::now());
                    guard.apply_event(event);
                }
                Err(err) => warn!(error = %err, "Dropping malformed server event"),
            },
            Err(err) => {
                warn!(error = %err, "Event stream failed");
                store.write().await.record_failure(Instant::now());
                break;
            }
        }
    }
    info!("Event stream ended");
}
