//! Debounced backend connectivity tracking.
//!
//! Every backend call reports its outcome here. A success marks the client
//! connected and refreshes the last-contact timestamp. A failure only flips
//! the client to disconnected once the grace window since the last success
//! has run out, so a single dropped request does not make the UI flap.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{info, warn};

/// Edge reported by [`ConnectionTracker`] when the connected flag changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Unchanged,
    Connected,
    Disconnected,
}

/// Serializable view of the connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionStatus {
    pub connected: bool,
    /// Milliseconds since the last successful call, `None` if never.
    pub ms_since_contact: Option<u64>,
}

/// Connected/disconnected state machine with a grace window.
#[derive(Debug, Clone)]
pub struct ConnectionTracker {
    grace: Duration,
    last_heard: Option<Instant>,
    connected: bool,
}

impl ConnectionTracker {
    /// Start disconnected with nothing heard yet.
    #[must_use]
    pub fn new(grace: Duration) -> Self {
        Self {
            grace,
            last_heard: None,
            connected: false,
        }
    }

    /// Record a successful backend call at `now`.
    pub fn record_success(&mut self, now: Instant) -> Transition {
        self.last_heard = Some(self.last_heard.map_or(now, |prev| prev.max(now)));
        if self.connected {
            return Transition::Unchanged;
        }
        self.connected = true;
        info!("Backend connection established");
        Transition::Connected
    }

    /// Record a failed backend call at `now`.
    pub fn record_failure(&mut self, now: Instant) -> Transition {
        let within_grace = self
            .last_heard
            .is_some_and(|last| now.saturating_duration_since(last) <= self.grace);
        if within_grace || !self.connected {
            return Transition::Unchanged;
        }
        self.connected = false;
        warn!(
            grace_ms = self.grace.as_millis() as u64,
            "Backend unreachable beyond grace window"
        );
        Transition::Disconnected
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connected
    }

    #[must_use]
    pub fn last_heard(&self) -> Option<Instant> {
        self.last_heard
    }

    #[must_use]
    pub fn grace(&self) -> Duration {
        self.grace
    }

    #[must_use]
    pub fn status_at(&self, now: Instant) -> ConnectionStatus {
        ConnectionStatus {
            connected: self.connected,
            ms_since_contact: self
                .last_heard
                .map(|last| now.saturating_duration_since(last).as_millis() as u64),
        }
    }
}
