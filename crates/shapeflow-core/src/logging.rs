//! Structured logging for the shapeflow client
//!
//! Installs one global `tracing` subscriber: an `EnvFilter`, a stderr layer
//! in the configured format, and optionally a second layer appending to a
//! log file in the same format.
//!
//! ```ignore
//! use shapeflow_core::logging::{init_logging, LogConfig};
//!
//! init_logging(&LogConfig::default())?;
//! ```
//!
//! # Correlation Fields
//!
//! - `analyzer_id`: Analyzer identifier
//! - `category`: Server event category
//! - `q_state`: Queue runner state
//! - `path`: Backend request path

use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};
use tracing_subscriber::fmt::time::SystemTime;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt};

pub use crate::config::LogFormat;

static INSTALLED: AtomicBool = AtomicBool::new(false);

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync + 'static>;

/// `[logging]` section of `shapeflow.toml`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// `EnvFilter` directive, e.g. `info` or `shapeflow_core=debug`.
    /// `RUST_LOG` wins when set.
    pub level: String,
    pub format: LogFormat,
    /// Mirror output to this file (appended, parent dirs created).
    pub file: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
            file: None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LogError {
    #[error("logging already initialized")]
    AlreadyInitialized,

    #[error("invalid log filter {0:?}")]
    InvalidLevel(String),

    #[error("cannot open log file: {0}")]
    FileCreate(#[from] io::Error),

    #[error("cannot install subscriber: {0}")]
    SetSubscriber(#[from] tracing::subscriber::SetGlobalDefaultError),
}

/// Install the global subscriber described by `config`.
///
/// Only the first successful call installs anything; later calls return
/// [`LogError::AlreadyInitialized`].
pub fn init_logging(config: &LogConfig) -> Result<(), LogError> {
    if INSTALLED.load(Ordering::SeqCst) {
        return Err(LogError::AlreadyInitialized);
    }
    let filter = build_filter(&config.level)?;

    let mut layers = vec![stderr_layer(config.format)];
    if let Some(path) = &config.file {
        layers.push(file_layer(config.format, open_log_file(path)?));
    }

    tracing::subscriber::set_global_default(
        tracing_subscriber::registry().with(layers).with(filter),
    )?;
    INSTALLED.store(true, Ordering::SeqCst);

    tracing::info!(
        log_level = %config.level,
        log_format = %config.format,
        log_file = ?config.file,
        "Logging initialized"
    );
    Ok(())
}

#[must_use]
pub fn is_logging_initialized() -> bool {
    INSTALLED.load(Ordering::SeqCst)
}

fn build_filter(level: &str) -> Result<EnvFilter, LogError> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(level).map_err(|_| LogError::InvalidLevel(level.to_string())),
    }
}

fn stderr_layer(format: LogFormat) -> BoxedLayer {
    match format {
        LogFormat::Pretty => fmt::layer()
            .with_writer(io::stderr)
            .with_target(true)
            .with_ansi(true)
            .boxed(),
        LogFormat::Json => fmt::layer()
            .json()
            .with_timer(SystemTime)
            .with_writer(io::stderr)
            .with_current_span(true)
            .with_span_list(false)
            .flatten_event(true)
            .boxed(),
    }
}

fn file_layer(format: LogFormat, file: File) -> BoxedLayer {
    match format {
        LogFormat::Pretty => fmt::layer()
            .with_writer(file)
            .with_target(true)
            .with_ansi(false)
            .boxed(),
        LogFormat::Json => fmt::layer()
            .json()
            .with_timer(SystemTime)
            .with_writer(file)
            .with_current_span(true)
            .flatten_event(true)
            .boxed(),
    }
}

fn open_log_file(path: &Path) -> io::Result<File> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::OpenOptions::new().create(true).append(true).open(path)
}
