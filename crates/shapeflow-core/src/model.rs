//! Analyzer identity, lifecycle enumerations and typed partial records.
//!
//! The backend treats analyzer status and config as open-ended JSON objects.
//! Here they are typed records whose interpreted keys are named `Option`
//! fields; everything else is kept verbatim in a flattened `extra` map.
//! Updates are applied with shallow-merge semantics: a patch only overwrites
//! the keys it carries.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

/// Name substituted when an analyzer config carries no usable name.
pub const UNNAMED: &str = "!! unnamed !!";

// =============================================================================
// Analyzer identity
// =============================================================================

/// Unique identifier of a backend analyzer (UUID-v4 shaped).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AnalyzerId(pub String);

impl AnalyzerId {
    /// Generate a fresh random id.
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// An id is usable only if it is non-blank.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        !self.0.trim().is_empty()
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for AnalyzerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AnalyzerId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for AnalyzerId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

// =============================================================================
// Wire enumerations
// =============================================================================

/// Backend enums arrive as integer codes; older builds send the names.
#[derive(Deserialize)]
#[serde(untagged)]
enum WireEnum {
    Code(i64),
    Name(String),
    Other(serde::de::IgnoredAny),
}

/// Lifecycle stage of a single analyzer, as reported by the backend.
///
/// Codes or names this client does not know decode as [`Self::Unknown`], so
/// a newer backend cannot break a whole state poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "WireEnum", into = "u8")]
pub enum AnalyzerState {
    Unknown,
    Incomplete,
    CanLaunch,
    Launched,
    CanFilter,
    CanAnalyze,
    Analyzing,
    Done,
    Canceled,
    Error,
}

impl AnalyzerState {
    const ALL: [Self; 10] = [
        Self::Unknown,
        Self::Incomplete,
        Self::CanLaunch,
        Self::Launched,
        Self::CanFilter,
        Self::CanAnalyze,
        Self::Analyzing,
        Self::Done,
        Self::Canceled,
        Self::Error,
    ];

    /// Human-readable label.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Incomplete => "incomplete",
            Self::CanLaunch => "can_launch",
            Self::Launched => "launched",
            Self::CanFilter => "can_filter",
            Self::CanAnalyze => "can_analyze",
            Self::Analyzing => "analyzing",
            Self::Done => "done",
            Self::Canceled => "canceled",
            Self::Error => "error",
        }
    }

    /// Whether the analyzer has been launched on the backend.
    #[must_use]
    pub const fn is_launched(&self) -> bool {
        !matches!(self, Self::Unknown | Self::Incomplete | Self::CanLaunch)
    }

    /// Whether the analyzer is currently doing work.
    #[must_use]
    pub const fn is_busy(&self) -> bool {
        matches!(self, Self::Analyzing)
    }

    /// Whether the analyzer has reached a terminal state.
    #[must_use]
    pub const fn is_finished(&self) -> bool {
        matches!(self, Self::Done | Self::Canceled | Self::Error)
    }
}

impl std::fmt::Display for AnalyzerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<AnalyzerState> for u8 {
    fn from(value: AnalyzerState) -> Self {
        value as u8
    }
}

impl From<WireEnum> for AnalyzerState {
    fn from(value: WireEnum) -> Self {
        let known = match &value {
            WireEnum::Code(code) => usize::try_from(*code)
                .ok()
                .and_then(|idx| Self::ALL.get(idx).copied()),
            WireEnum::Name(name) => Self::ALL
                .into_iter()
                .find(|s| s.as_str().eq_ignore_ascii_case(name)),
            WireEnum::Other(_) => None,
        };
        known.unwrap_or_else(|| {
            match value {
                WireEnum::Code(code) => warn!(code, "Unrecognized analyzer state code"),
                WireEnum::Name(name) => warn!(name = %name, "Unrecognized analyzer state name"),
                WireEnum::Other(_) => warn!("Analyzer state is neither a code nor a name"),
            }
            Self::Unknown
        })
    }
}

/// Global execution state of the backend's queue runner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "WireEnum", into = "u8")]
pub enum QueueState {
    #[default]
    Stopped,
    Running,
    Paused,
}

impl QueueState {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Stopped => "stopped",
            Self::Running => "running",
            Self::Paused => "paused",
        }
    }
}

impl std::fmt::Display for QueueState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<QueueState> for u8 {
    fn from(value: QueueState) -> Self {
        value as u8
    }
}

impl TryFrom<WireEnum> for QueueState {
    type Error = String;

    fn try_from(value: WireEnum) -> Result<Self, Self::Error> {
        match value {
            WireEnum::Code(0) => Ok(Self::Stopped),
            WireEnum::Code(1) => Ok(Self::Running),
            WireEnum::Code(2) => Ok(Self::Paused),
            WireEnum::Code(code) => Err(format!("unknown queue state code {code}")),
            WireEnum::Other(_) => Err("queue state must be a code or a name".to_string()),
            WireEnum::Name(name) => match name.to_ascii_lowercase().as_str() {
                "stopped" => Ok(Self::Stopped),
                "running" => Ok(Self::Running),
                "paused" => Ok(Self::Paused),
                _ => Err(format!("unknown queue state {name:?}")),
            },
        }
    }
}

// =============================================================================
// Partial records
// =============================================================================

fn merge_field<T>(into: &mut Option<T>, from: Option<T>) {
    if from.is_some() {
        *into = from;
    }
}

/// Status of one analyzer. Every field is optional so the same type serves
/// as both the stored record and a partial update.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalyzerStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<AnalyzerState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub busy: Option<bool>,
    /// Current position in the video, in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<f64>,
    /// Analysis progress in `0.0..=1.0`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub results: Option<Value>,
    /// Backend keys this client does not interpret.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl AnalyzerStatus {
    /// Status patch that only sets the lifecycle state.
    #[must_use]
    pub fn with_state(state: AnalyzerState) -> Self {
        Self {
            state: Some(state),
            ..Self::default()
        }
    }

    /// Shallow-merge `patch` into `self`.
    pub fn merge(&mut self, patch: Self) {
        merge_field(&mut self.state, patch.state);
        merge_field(&mut self.busy, patch.busy);
        merge_field(&mut self.position, patch.position);
        merge_field(&mut self.progress, patch.progress);
        merge_field(&mut self.results, patch.results);
        self.extra.extend(patch.extra);
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state.is_none()
            && self.busy.is_none()
            && self.position.is_none()
            && self.progress.is_none()
            && self.results.is_none()
            && self.extra.is_empty()
    }
}

/// Configuration of one analyzer; same partial-record shape as
/// [`AnalyzerStatus`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalyzerConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub design_path: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl AnalyzerConfig {
    /// Config patch that only sets the name.
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    /// Shallow-merge `patch` into `self`.
    pub fn merge(&mut self, patch: Self) {
        merge_field(&mut self.name, patch.name);
        merge_field(&mut self.description, patch.description);
        merge_field(&mut self.video_path, patch.video_path);
        merge_field(&mut self.design_path, patch.design_path);
        self.extra.extend(patch.extra);
    }

    /// Replace a missing or blank name with [`UNNAMED`].
    pub fn fill_default_name(&mut self) {
        if self.name.as_deref().is_none_or(|n| n.trim().is_empty()) {
            self.name = Some(UNNAMED.to_string());
        }
    }

    /// Display name, falling back to [`UNNAMED`].
    #[must_use]
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(UNNAMED)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.description.is_none()
            && self.video_path.is_none()
            && self.design_path.is_none()
            && self.extra.is_empty()
    }
}

/// Status and config of one analyzer, keyed by [`AnalyzerId`] in the registry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalyzerRecord {
    pub status: AnalyzerStatus,
    pub config: AnalyzerConfig,
}
