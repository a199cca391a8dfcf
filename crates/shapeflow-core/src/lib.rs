//! shapeflow-core: client-side state for the shapeflow video analysis backend
//!
//! This crate mirrors the backend's analyzer queue locally, keeps it in sync
//! by polling plus a server-sent event stream, and exposes the lifecycle
//! commands (init, launch, close, start/stop queue) used by the `sf` CLI.
//!
//! # Architecture
//!
//! ```text
//!            ┌──────── poll (GET /api/va/state) ────────┐
//! Backend ───┤                                          ├──► Synchronizer ──► AnalyzerStore
//!            └──────── push (GET /api/events, SSE) ─────┘                     │  registry
//!                                                                            │  queue
//! AnalyzerActions ──► Backend, then merge confirmed results ─────────────────►│  notices
//!                                                                            │  connectivity
//! ```
//!
//! # Modules
//!
//! - `model`: Analyzer ids, lifecycle enums and typed partial records
//! - `registry`: Id to status/config map with shallow-merge updates
//! - `queue`: Ordered execution queue
//! - `notices`: Bounded, deduplicated notice ledger
//! - `connectivity`: Debounced connected/disconnected tracking
//! - `store`: The shared store composing the above
//! - `sse`: Server-sent event framing and typed server events
//! - `transport`: `Backend` trait and its HTTP implementation
//! - `sync`: Reconciliation loop and event stream ownership
//! - `actions`: User-initiated lifecycle commands
//! - `client`: One-stop handle wiring everything together
//! - `config`: TOML configuration
//! - `logging`: `tracing` subscriber setup
//! - `error`: Error types with remediation hints
//!
//! # Safety
//!
//! This crate forbids unsafe code.

#![forbid(unsafe_code)]

pub mod actions;
pub mod client;
pub mod config;
pub mod connectivity;
pub mod error;
pub mod logging;
pub mod model;
pub mod notices;
pub mod queue;
pub mod registry;
pub mod sse;
pub mod store;
pub mod sync;
pub mod transport;

pub use actions::AnalyzerActions;
pub use client::ShapeflowClient;
pub use config::ClientConfig;
pub use error::{ConfigError, Error, Result, TransportError};
pub use model::{AnalyzerConfig, AnalyzerId, AnalyzerState, AnalyzerStatus, QueueState, UNNAMED};
pub use store::{AnalyzerStore, SharedStore, StoreSnapshot};
pub use sync::{SyncReport, Synchronizer};
pub use transport::{Backend, BackendFuture, EventStream, HttpBackend};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
