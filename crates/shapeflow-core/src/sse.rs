//! Server-sent event framing and typed server events.
//!
//! [`SseDecoder`] turns the raw byte stream of `GET /api/events` into
//! [`SseFrame`]s. [`ServerEvent::from_frame`] then parses the JSON envelope
//! `{"category", "id", "data"}` carried in each frame's data.

use serde::Deserialize;
use serde_json::Value;

use crate::model::{AnalyzerConfig, AnalyzerId, AnalyzerStatus};

// =============================================================================
// Framing
// =============================================================================

/// One dispatched server-sent event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SseFrame {
    pub event: Option<String>,
    pub id: Option<String>,
    pub data: String,
}

/// Incremental `text/event-stream` decoder.
///
/// Bytes may be fed in arbitrary chunks; lines split across chunks are
/// buffered until their terminator arrives.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    event: Option<String>,
    id: Option<String>,
    data: Vec<String>,
}

impl SseDecoder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and return every frame completed by it.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<SseFrame> {
        self.buffer.extend_from_slice(chunk);
        let mut frames = Vec::new();

        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let mut line: Vec<u8> = self.buffer.drain(..=pos).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            let line = String::from_utf8_lossy(&line);
            if let Some(frame) = self.process_line(&line) {
                frames.push(frame);
            }
        }

        frames
    }

    fn process_line(&mut self, line: &str) -> Option<SseFrame> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        match field {
            "data" => self.data.push(value.to_string()),
            "event" => self.event = Some(value.to_string()),
            "id" => self.id = Some(value.to_string()),
            _ => {}
        }
        None
    }

    fn dispatch(&mut self) -> Option<SseFrame> {
        let event = self.event.take();
        if self.data.is_empty() {
            return None;
        }
        let data = std::mem::take(&mut self.data).join("\n");
        Some(SseFrame {
            event,
            id: self.id.clone(),
            data,
        })
    }
}

// =============================================================================
// Typed events
// =============================================================================

/// Push notification from the backend.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    Status {
        id: AnalyzerId,
        status: AnalyzerStatus,
    },
    Config {
        id: AnalyzerId,
        config: AnalyzerConfig,
    },
    Notice {
        /// `None` for global notices.
        id: Option<AnalyzerId>,
        message: String,
        uuid: Option<String>,
    },
    Close {
        id: AnalyzerId,
    },
}

/// Why a frame could not be turned into a [`ServerEvent`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EventDecodeError {
    #[error("event payload is not JSON: {0}")]
    Json(String),
    #[error("event has no category")]
    MissingCategory,
    #[error("{0} event has no analyzer id")]
    MissingId(String),
    #[error("{0} event has no data")]
    MissingData(String),
    #[error("unknown event category {0:?}")]
    UnknownCategory(String),
    #[error("invalid {category} payload: {message}")]
    InvalidData { category: String, message: String },
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    id: Option<AnalyzerId>,
    #[serde(default)]
    data: Option<Value>,
}

#[derive(Deserialize)]
struct NoticeData {
    message: String,
    #[serde(default)]
    uuid: Option<String>,
}

impl ServerEvent {
    /// Decode the JSON envelope carried by `frame`.
    pub fn from_frame(frame: &SseFrame) -> Result<Self, EventDecodeError> {
        Self::from_json(&frame.data)
    }

    pub fn from_json(raw: &str) -> Result<Self, EventDecodeError> {
        let envelope: Envelope =
            serde_json::from_str(raw).map_err(|e| EventDecodeError::Json(e.to_string()))?;
        let category = envelope
            .category
            .filter(|c| !c.is_empty())
            .ok_or(EventDecodeError::MissingCategory)?;
        let id = envelope.id.filter(AnalyzerId::is_valid);

        let require_id = |id: Option<AnalyzerId>| {
            id.ok_or_else(|| EventDecodeError::MissingId(category.clone()))
        };
        let require_data = |data: Option<Value>| match data {
            Some(Value::Null) | None => Err(EventDecodeError::MissingData(category.clone())),
            Some(value) => Ok(value),
        };
        let invalid = |e: serde_json::Error| EventDecodeError::InvalidData {
            category: category.clone(),
            message: e.to_string(),
        };

        match category.as_str() {
            "status" => {
                let id = require_id(id)?;
                let status = serde_json::from_value(require_data(envelope.data)?).map_err(invalid)?;
                Ok(Self::Status { id, status })
            }
            "config" => {
                let id = require_id(id)?;
                let config = serde_json::from_value(require_data(envelope.data)?).map_err(invalid)?;
                Ok(Self::Config { id, config })
            }
            "notice" => {
                let data: NoticeData =
                    serde_json::from_value(require_data(envelope.data)?).map_err(invalid)?;
                Ok(Self::Notice {
                    id,
                    message: data.message,
                    uuid: data.uuid.filter(|u| !u.is_empty()),
                })
            }
            "close" => Ok(Self::Close {
                id: require_id(id)?,
            }),
            _ => Err(EventDecodeError::UnknownCategory(category.clone())),
        }
    }

    #[must_use]
    pub fn category(&self) -> &'static str {
        match self {
            Self::Status { .. } => "status",
            Self::Config { .. } => "config",
            Self::Notice { .. } => "notice",
            Self::Close { .. } => "close",
        }
    }

    #[must_use]
    pub fn analyzer_id(&self) -> Option<&AnalyzerId> {
        match self {
            Self::Status { id, .. } | Self::Config { id, .. } | Self::Close { id } => Some(id),
            Self::Notice { id, .. } => id.as_ref(),
        }
    }
}
