//! Error types for shapeflow-core

use std::fmt;

use thiserror::Error;

use crate::logging::LogError;
use crate::model::AnalyzerId;

/// A suggested shell command, printed as `label: command`.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Hint {
    pub label: String,
    pub command: String,
}

/// What the user can do about an error. The CLI prints it under `To fix:`.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Remediation {
    pub summary: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub commands: Vec<Hint>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub alternatives: Vec<String>,
}

impl Remediation {
    #[must_use]
    pub fn new(summary: impl Into<String>) -> Self {
        Self {
            summary: summary.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn command(mut self, label: impl Into<String>, command: impl Into<String>) -> Self {
        self.commands.push(Hint {
            label: label.into(),
            command: command.into(),
        });
        self
    }

    #[must_use]
    pub fn alternative(mut self, alternative: impl Into<String>) -> Self {
        self.alternatives.push(alternative.into());
        self
    }

    /// Multi-line plain text, newline terminated.
    #[must_use]
    pub fn render_plain(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Remediation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "To fix:")?;
        writeln!(f, "  {}", self.summary)?;
        if !self.commands.is_empty() {
            writeln!(f, "  Commands:")?;
            for hint in &self.commands {
                writeln!(f, "    - {}: {}", hint.label, hint.command)?;
            }
        }
        if !self.alternatives.is_empty() {
            writeln!(f, "  Alternatives:")?;
            for alt in &self.alternatives {
                writeln!(f, "    - {alt}")?;
            }
        }
        Ok(())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the client library.
#[derive(Error, Debug)]
pub enum Error {
    /// Backend request or event stream failures
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Logging error: {0}")]
    Logging(#[from] LogError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The backend refused to launch a freshly initialized analyzer
    #[error("Backend refused to launch analyzer {0}")]
    LaunchRefused(AnalyzerId),

    /// The analyzer is not part of the local queue
    #[error("Analyzer {0} is not queued")]
    NotQueued(AnalyzerId),

    /// A requested queue order is not a permutation of the current queue
    #[error("Invalid queue order: {0}")]
    InvalidOrder(String),
}

impl Error {
    /// Return remediation guidance when available.
    #[must_use]
    pub fn remediation(&self) -> Option<Remediation> {
        match self {
            Self::Transport(err) => Some(err.remediation()),
            Self::Config(err) => Some(err.remediation()),
            Self::Logging(_) => None,
            Self::Io(_) => Some(Remediation::new(
                "A local file could not be read or written; check the path and its permissions.",
            )),
            Self::Json(_) => Some(
                Remediation::new("The analyzer config must be a JSON object.")
                    .command("Check the file", "python -m json.tool < analyzer.json"),
            ),
            Self::LaunchRefused(_) => Some(
                Remediation::new(
                    "The analyzer configuration is incomplete. Check the video and design paths.",
                )
                .alternative("The half-initialized analyzer was closed; fix the config and retry."),
            ),
            Self::NotQueued(_) => Some(
                Remediation::new("List the queue and use a valid analyzer id.")
                    .command("List analyzers", "sf status"),
            ),
            Self::InvalidOrder(_) => Some(
                Remediation::new("Reorder using exactly the ids currently in the queue.")
                    .command("List analyzers", "sf status"),
            ),
        }
    }

    /// Whether this error came from talking to the backend.
    #[must_use]
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}

/// Backend transport errors.
///
/// Every variant is recoverable: callers fold them into the connectivity
/// signal and retry on the next sync tick.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Network failure, timeout or refused connection
    #[error("request to {path} failed: {message}")]
    Request { path: String, message: String },

    /// Non-2xx HTTP response
    #[error("backend answered {path} with HTTP {status}")]
    Status { path: String, status: u16 },

    /// Response body did not match the expected shape
    #[error("could not decode response from {path}: {message}")]
    Decode { path: String, message: String },

    /// Event stream broke off mid-read
    #[error("event stream interrupted: {0}")]
    Stream(String),
}

impl TransportError {
    /// Request path the error refers to, if any.
    #[must_use]
    pub fn path(&self) -> Option<&str> {
        match self {
            Self::Request { path, .. } | Self::Status { path, .. } | Self::Decode { path, .. } => {
                Some(path)
            }
            Self::Stream(_) => None,
        }
    }

    #[must_use]
    pub fn remediation(&self) -> Remediation {
        match self {
            Self::Request { .. } => Remediation::new(
                "The shapeflow backend is unreachable. Start it or point the client at it.",
            )
            .command("Start backend", "python sf.py serve")
            .command("Use another backend", "sf --url http://127.0.0.1:7951 status")
            .alternative("Set SHAPEFLOW_URL or [backend].url in shapeflow.toml."),
            Self::Status { status, .. } => Remediation::new(format!(
                "The backend rejected the request (HTTP {status}). Check the backend log."
            ))
            .alternative("Ensure the client and backend versions match."),
            Self::Decode { .. } => {
                Remediation::new("The backend returned an unexpected payload; verify its version.")
                    .alternative("Upgrade the backend if the API changed.")
            }
            Self::Stream(_) => Remediation::new(
                "The event stream dropped. It is reopened after the next successful sync.",
            )
            .command("Check backend", "sf status"),
        }
    }
}

/// Problems with `shapeflow.toml` or its overrides.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    FileNotFound(String),

    #[error("Failed to read config file {path}: {source}")]
    ReadFailed {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid TOML in config: {0}")]
    ParseError(String),

    #[error("Invalid config value: {0}")]
    ValidationError(String),
}

impl ConfigError {
    #[must_use]
    pub fn remediation(&self) -> Remediation {
        match self {
            Self::FileNotFound(path) => {
                Remediation::new(format!("Create the config file or fix the path: {path}"))
                    .alternative("Omit --config to use ./shapeflow.toml or built-in defaults.")
            }
            Self::ReadFailed { path, .. } => {
                Remediation::new(format!("Check read permissions on {path}."))
            }
            Self::ParseError(_) => Remediation::new("Fix the TOML syntax in the config file.")
                .alternative("Compare against the sections documented in README.md."),
            Self::ValidationError(_) => {
                Remediation::new("Intervals and the notice limit must be greater than zero.")
            }
        }
    }
}
