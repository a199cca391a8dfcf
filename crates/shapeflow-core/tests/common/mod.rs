//! Shared test infrastructure for shapeflow-core integration tests.
//!
//! Import from integration test files with:
//! ```ignore
//! mod common;
//! use common::FakeBackend;
//! ```
//!
//! [`FakeBackend`] is a scripted in-memory backend. Every call is logged by
//! name, answers are computed synchronously from [`FakeState`], and the push
//! stream is fed by hand through [`FakeBackend::push_event`].

#![allow(dead_code)]

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};

use futures::channel::mpsc;

use shapeflow_core::config::{ClientConfig, SyncConfig};
use shapeflow_core::error::TransportError;
use shapeflow_core::model::{
    AnalyzerConfig, AnalyzerId, AnalyzerState, AnalyzerStatus, QueueState,
};
use shapeflow_core::sse::SseFrame;
use shapeflow_core::transport::{
    Backend, BackendFuture, EventStream, QueueResponse, StateResponse,
};
use shapeflow_core::ShapeflowClient;

/// One analyzer as the fake backend sees it.
#[derive(Debug, Clone)]
pub struct RemoteAnalyzer {
    pub id: AnalyzerId,
    pub status: AnalyzerStatus,
    pub config: AnalyzerConfig,
}

/// Scripted backend state and failure toggles.
#[derive(Debug)]
pub struct FakeState {
    pub q_state: QueueState,
    pub analyzers: Vec<RemoteAnalyzer>,
    /// Every call fails with a request error.
    pub offline: bool,
    pub can_launch: bool,
    pub launch_ok: bool,
    pub close_ok: bool,
    pub analyze_ok: bool,
    /// `get_config` fails for these ids.
    pub failing_configs: HashSet<AnalyzerId>,
    /// Ids handed out by `init`, in order; random when empty.
    pub next_ids: VecDeque<AnalyzerId>,
    /// `start` answers with every remote id instead of the requested order.
    pub start_lists_all: bool,
}

impl Default for FakeState {
    fn default() -> Self {
        Self {
            q_state: QueueState::Stopped,
            analyzers: Vec::new(),
            offline: false,
            can_launch: true,
            launch_ok: true,
            close_ok: true,
            analyze_ok: true,
            failing_configs: HashSet::new(),
            next_ids: VecDeque::new(),
            start_lists_all: false,
        }
    }
}

impl FakeState {
    fn find_mut(&mut self, id: &AnalyzerId) -> Option<&mut RemoteAnalyzer> {
        self.analyzers.iter_mut().find(|a| &a.id == id)
    }
}

type EventSender = mpsc::UnboundedSender<Result<SseFrame, TransportError>>;

#[derive(Debug, Default)]
pub struct FakeBackend {
    state: Mutex<FakeState>,
    calls: Mutex<Vec<String>>,
    events: Mutex<Option<EventSender>>,
}

fn not_found(path: String) -> TransportError {
    TransportError::Status { path, status: 404 }
}

impl FakeBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Backend that already knows `ids`, each with a name equal to its id.
    pub fn with_analyzers(ids: &[&str]) -> Arc<Self> {
        let backend = Self::new();
        for id in ids {
            backend.add_remote(id, Some(*id));
        }
        backend
    }

    pub fn add_remote(&self, id: &str, name: Option<&str>) {
        let config = name.map(|n| AnalyzerConfig::named(n)).unwrap_or_default();
        self.script().analyzers.push(RemoteAnalyzer {
            id: AnalyzerId::from(id),
            status: AnalyzerStatus::with_state(AnalyzerState::CanLaunch),
            config,
        });
    }

    pub fn remove_remote(&self, id: &str) {
        self.script().analyzers.retain(|a| a.id.as_str() != id);
    }

    pub fn script(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    pub fn set_offline(&self, offline: bool) {
        self.script().offline = offline;
    }

    pub fn remote_ids(&self) -> Vec<AnalyzerId> {
        self.script().analyzers.iter().map(|a| a.id.clone()).collect()
    }

    // -------------------------------------------------------------------------
    // Call log
    // -------------------------------------------------------------------------

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self, name: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| *c == name).count()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    // -------------------------------------------------------------------------
    // Push stream
    // -------------------------------------------------------------------------

    pub fn stream_attached(&self) -> bool {
        self.events
            .lock()
            .unwrap()
            .as_ref()
            .is_some_and(|tx| !tx.is_closed())
    }

    /// Send one raw event payload. Returns false if no stream is attached.
    pub fn push_event(&self, data: &str) -> bool {
        let frame = SseFrame {
            data: data.to_string(),
            ..SseFrame::default()
        };
        self.send(Ok(frame))
    }

    /// Break the attached stream with a read error.
    pub fn break_stream(&self) -> bool {
        self.send(Err(TransportError::Stream("connection reset".into())))
    }

    fn send(&self, item: Result<SseFrame, TransportError>) -> bool {
        self.events
            .lock()
            .unwrap()
            .as_ref()
            .is_some_and(|tx| tx.unbounded_send(item).is_ok())
    }

    fn respond<T, F>(&self, call: &str, path: &str, answer: F) -> BackendFuture<'_, T>
    where
        T: Send + 'static,
        F: FnOnce(&mut FakeState) -> Result<T, TransportError>,
    {
        self.calls.lock().unwrap().push(call.to_string());
        let result = {
            let mut state = self.script();
            if state.offline {
                Err(TransportError::Request {
                    path: path.to_string(),
                    message: "connection refused".to_string(),
                })
            } else {
                answer(&mut state)
            }
        };
        Box::pin(async move { result })
    }
}

impl Backend for FakeBackend {
    fn ping(&self) -> BackendFuture<'_, bool> {
        self.respond("ping", "/ping", |_| Ok(true))
    }

    fn init(&self) -> BackendFuture<'_, AnalyzerId> {
        self.respond("init", "/api/va/init", |state| {
            let id = state.next_ids.pop_front().unwrap_or_else(AnalyzerId::generate);
            state.analyzers.push(RemoteAnalyzer {
                id: id.clone(),
                status: AnalyzerStatus::with_state(AnalyzerState::Incomplete),
                config: AnalyzerConfig::default(),
            });
            Ok(id)
        })
    }

    fn set_config<'a>(
        &'a self,
        id: &'a AnalyzerId,
        config: &'a AnalyzerConfig,
    ) -> BackendFuture<'a, AnalyzerConfig> {
        let path = format!("/api/va/{id}/set_config");
        self.respond("set_config", &path.clone(), move |state| {
            let remote = state.find_mut(id).ok_or_else(|| not_found(path))?;
            remote.config.merge(config.clone());
            remote.config.fill_default_name();
            remote.status = AnalyzerStatus::with_state(AnalyzerState::CanLaunch);
            Ok(remote.config.clone())
        })
    }

    fn can_launch<'a>(&'a self, id: &'a AnalyzerId) -> BackendFuture<'a, bool> {
        let path = format!("/api/va/{id}/can_launch");
        self.respond("can_launch", &path.clone(), move |state| {
            state.find_mut(id).ok_or_else(|| not_found(path))?;
            Ok(state.can_launch)
        })
    }

    fn launch<'a>(&'a self, id: &'a AnalyzerId) -> BackendFuture<'a, bool> {
        let path = format!("/api/va/{id}/launch");
        self.respond("launch", &path.clone(), move |state| {
            let ok = state.launch_ok;
            let remote = state.find_mut(id).ok_or_else(|| not_found(path))?;
            if ok {
                remote.status = AnalyzerStatus::with_state(AnalyzerState::CanAnalyze);
            }
            Ok(ok)
        })
    }

    fn analyze<'a>(&'a self, id: &'a AnalyzerId) -> BackendFuture<'a, bool> {
        let path = format!("/api/va/{id}/analyze");
        self.respond("analyze", &path.clone(), move |state| {
            let ok = state.analyze_ok;
            let remote = state.find_mut(id).ok_or_else(|| not_found(path))?;
            if ok {
                remote.status = AnalyzerStatus::with_state(AnalyzerState::Analyzing);
            }
            Ok(ok)
        })
    }

    fn cancel<'a>(&'a self, id: &'a AnalyzerId) -> BackendFuture<'a, bool> {
        let path = format!("/api/va/{id}/cancel");
        self.respond("cancel", &path.clone(), move |state| {
            let remote = state.find_mut(id).ok_or_else(|| not_found(path))?;
            let busy = remote.status.state == Some(AnalyzerState::Analyzing);
            if busy {
                remote.status = AnalyzerStatus::with_state(AnalyzerState::Canceled);
            }
            Ok(busy)
        })
    }

    fn close<'a>(&'a self, id: &'a AnalyzerId) -> BackendFuture<'a, bool> {
        self.respond("close", "/api/va/close", move |state| {
            if !state.close_ok {
                return Ok(false);
            }
            let before = state.analyzers.len();
            state.analyzers.retain(|a| &a.id != id);
            Ok(state.analyzers.len() != before)
        })
    }

    fn state(&self) -> BackendFuture<'_, StateResponse> {
        self.respond("state", "/api/va/state", |state| {
            Ok(StateResponse {
                q_state: state.q_state,
                ids: state.analyzers.iter().map(|a| a.id.clone()).collect(),
                status: state.analyzers.iter().map(|a| a.status.clone()).collect(),
            })
        })
    }

    fn start<'a>(&'a self, queue: &'a [AnalyzerId]) -> BackendFuture<'a, QueueResponse> {
        self.respond("start", "/api/va/start", move |state| {
            state.q_state = QueueState::Running;
            let ids = if state.start_lists_all {
                state.analyzers.iter().map(|a| a.id.clone()).collect()
            } else {
                queue
                    .iter()
                    .filter(|id| state.analyzers.iter().any(|a| &a.id == *id))
                    .cloned()
                    .collect()
            };
            Ok(QueueResponse {
                q_state: state.q_state,
                ids,
            })
        })
    }

    fn stop(&self) -> BackendFuture<'_, QueueResponse> {
        self.respond("stop", "/api/va/stop", |state| {
            state.q_state = QueueState::Stopped;
            Ok(QueueResponse {
                q_state: state.q_state,
                ids: Vec::new(),
            })
        })
    }

    fn get_config<'a>(&'a self, id: &'a AnalyzerId) -> BackendFuture<'a, AnalyzerConfig> {
        let path = format!("/api/va/{id}/get_config");
        self.respond("get_config", &path.clone(), move |state| {
            if state.failing_configs.contains(id) {
                return Err(TransportError::Status { path, status: 500 });
            }
            let remote = state.find_mut(id).ok_or_else(|| not_found(path))?;
            Ok(remote.config.clone())
        })
    }

    fn get_status<'a>(&'a self, id: &'a AnalyzerId) -> BackendFuture<'a, AnalyzerStatus> {
        let path = format!("/api/va/{id}/status");
        self.respond("get_status", &path.clone(), move |state| {
            let remote = state.find_mut(id).ok_or_else(|| not_found(path))?;
            Ok(remote.status.clone())
        })
    }

    fn events(&self) -> BackendFuture<'_, EventStream> {
        let result = self.respond("events", "/api/events", |_| Ok(()));
        Box::pin(async move {
            result.await?;
            let (tx, rx) = mpsc::unbounded();
            *self.events.lock().unwrap() = Some(tx);
            Ok(Box::pin(rx) as EventStream)
        })
    }

    fn stop_events(&self) -> BackendFuture<'_, ()> {
        let result = self.respond("stop_events", "/api/stop_events", |_| Ok(()));
        Box::pin(async move {
            result.await?;
            // Dropping the sender ends any attached stream.
            self.events.lock().unwrap().take();
            Ok(())
        })
    }
}

/// Sync settings with the stock intervals.
pub fn sync_config() -> SyncConfig {
    SyncConfig::default()
}

/// Client over `backend` with the stock intervals.
pub fn client(backend: &Arc<FakeBackend>) -> ShapeflowClient {
    let backend: Arc<dyn Backend> = backend.clone();
    ShapeflowClient::with_backend(backend, &ClientConfig::default())
}

/// Status event payload in the backend's envelope.
pub fn status_event(id: &str, state: AnalyzerState) -> String {
    format!(
        r#"{{"category":"status","id":"{id}","data":{{"state":{}}}}}"#,
        u8::from(state)
    )
}
