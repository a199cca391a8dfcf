//! Execution queue: the ordered list of analyzer ids.
//!
//! Order is insertion order unless a user reorders the queue or the
//! reconciliation loop replaces it wholesale. The queue performs no
//! validation against the registry; keeping the two consistent is the job of
//! [`AnalyzerStore`](crate::store::AnalyzerStore).

use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, warn};

use crate::model::AnalyzerId;

/// Ordered, duplicate-free sequence of analyzer ids.
#[derive(Debug, Clone)]
pub struct ExecutionQueue {
    order: Vec<AnalyzerId>,
    created_at: Instant,
    load_interval: Duration,
}

impl ExecutionQueue {
    /// Create an empty queue whose membership answers are withheld for
    /// `load_interval` after construction.
    #[must_use]
    pub fn new(load_interval: Duration) -> Self {
        Self::with_start(load_interval, Instant::now())
    }

    #[must_use]
    pub fn with_start(load_interval: Duration, created_at: Instant) -> Self {
        Self {
            order: Vec::new(),
            created_at,
            load_interval,
        }
    }

    /// Append `id` unless it is blank or already queued.
    pub fn enqueue(&mut self, id: &AnalyzerId) -> bool {
        if !id.is_valid() {
            warn!("Refusing to enqueue blank analyzer id");
            return false;
        }
        if self.contains(id) {
            return false;
        }
        self.order.push(id.clone());
        true
    }

    /// Remove `id` if present.
    pub fn dequeue(&mut self, id: &AnalyzerId) -> bool {
        match self.index_of(id) {
            Some(idx) => {
                self.order.remove(idx);
                true
            }
            None => false,
        }
    }

    /// Replace the whole order. Blank and repeated ids are skipped, keeping
    /// the first occurrence.
    pub fn replace(&mut self, order: Vec<AnalyzerId>) {
        let mut deduped: Vec<AnalyzerId> = Vec::with_capacity(order.len());
        for id in order {
            if id.is_valid() && !deduped.contains(&id) {
                deduped.push(id);
            } else {
                debug!(analyzer_id = %id, "Skipping blank or repeated id in queue order");
            }
        }
        self.order = deduped;
    }

    #[must_use]
    pub fn index_of(&self, id: &AnalyzerId) -> Option<usize> {
        self.order.iter().position(|queued| queued == id)
    }

    #[must_use]
    pub fn contains(&self, id: &AnalyzerId) -> bool {
        self.order.contains(id)
    }

    /// Whether `id` is queued, or `None` while still inside the warm-up
    /// window (the first sync may not have completed yet).
    #[must_use]
    pub fn is_known(&self, id: &AnalyzerId) -> Option<bool> {
        self.is_known_at(id, Instant::now())
    }

    #[must_use]
    pub fn is_known_at(&self, id: &AnalyzerId, now: Instant) -> Option<bool> {
        if now.saturating_duration_since(self.created_at) < self.load_interval {
            return None;
        }
        Some(self.contains(id))
    }

    #[must_use]
    pub fn ids(&self) -> &[AnalyzerId] {
        &self.order
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}
