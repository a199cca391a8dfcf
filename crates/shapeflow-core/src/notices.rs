//! Bounded, deduplicated ledger of user-facing notices.
//!
//! Notices come from backend `notice` events or from local failures (lost
//! connection, refused launch). Each notice is identified by its `uuid`:
//! backend-supplied uuids make re-delivery idempotent, local notices get a
//! fresh one. The ledger keeps at most `limit` entries and evicts the oldest
//! first.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::model::AnalyzerId;

/// A single user-facing notice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notice {
    pub message: String,
    /// Analyzer the notice refers to; `None` for global notices.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analyzer: Option<AnalyzerId>,
    /// Analyzer name at the time the notice was recorded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analyzer_name: Option<String>,
    /// Identity used for deduplication and dismissal. Empty until pushed.
    #[serde(default)]
    pub uuid: String,
    /// When the notice was created (epoch ms).
    #[serde(default)]
    pub created_at_ms: i64,
}

impl Notice {
    /// A global notice without a uuid; the ledger assigns one on push.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            analyzer: None,
            analyzer_name: None,
            uuid: String::new(),
            created_at_ms: chrono::Utc::now().timestamp_millis(),
        }
    }

    /// Attach the analyzer this notice refers to.
    #[must_use]
    pub fn for_analyzer(mut self, id: AnalyzerId, name: Option<String>) -> Self {
        self.analyzer = Some(id);
        self.analyzer_name = name;
        self
    }

    /// Use a backend-supplied uuid.
    #[must_use]
    pub fn with_uuid(mut self, uuid: impl Into<String>) -> Self {
        self.uuid = uuid.into();
        self
    }
}

/// FIFO-bounded notice list with uuid deduplication.
#[derive(Debug, Clone)]
pub struct NoticeLedger {
    limit: usize,
    entries: VecDeque<Notice>,
}

impl NoticeLedger {
    /// Create an empty ledger holding at most `limit` notices (minimum 1).
    #[must_use]
    pub fn new(limit: usize) -> Self {
        let limit = limit.max(1);
        Self {
            limit,
            entries: VecDeque::with_capacity(limit),
        }
    }

    /// Record a notice. Returns `false` if a notice with the same uuid is
    /// already present.
    pub fn push(&mut self, mut notice: Notice) -> bool {
        if notice.uuid.is_empty() {
            notice.uuid = uuid::Uuid::new_v4().to_string();
        } else if self.entries.iter().any(|n| n.uuid == notice.uuid) {
            debug!(uuid = %notice.uuid, "Duplicate notice ignored");
            return false;
        }

        self.entries.push_back(notice);
        while self.entries.len() > self.limit {
            self.entries.pop_front();
        }
        true
    }

    /// Remove the stored notice matching `notice` exactly.
    ///
    /// A copy whose uuid matches but whose content differs from the stored
    /// entry is stale and removes nothing.
    pub fn dismiss(&mut self, notice: &Notice) -> bool {
        match self
            .entries
            .iter()
            .position(|n| n.uuid == notice.uuid && n == notice)
        {
            Some(idx) => {
                self.entries.remove(idx);
                true
            }
            None => false,
        }
    }

    /// Remove the notice with the given uuid.
    pub fn dismiss_uuid(&mut self, uuid: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|n| n.uuid != uuid);
        self.entries.len() != before
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Notices oldest-first.
    pub fn iter(&self) -> impl Iterator<Item = &Notice> {
        self.entries.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn limit(&self) -> usize {
        self.limit
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_assigns_uuid() {
        let mut ledger = NoticeLedger::new(5);
        assert!(ledger.push(Notice::new("hello")));
        let stored = ledger.iter().next().unwrap();
        assert!(!stored.uuid.is_empty());
    }

    #[test]
    fn same_uuid_pushed_twice_is_stored_once() {
        let mut ledger = NoticeLedger::new(5);
        let notice = Notice::new("disk full").with_uuid("n-1");
        assert!(ledger.push(notice.clone()));
        assert!(!ledger.push(notice));
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn local_notices_with_same_message_are_distinct() {
        let mut ledger = NoticeLedger::new(5);
        ledger.push(Notice::new("lost connection"));
        ledger.push(Notice::new("lost connection"));
        assert_eq!(ledger.len(), 2);
    }

    #[test]
    fn overflow_evicts_oldest() {
        let mut ledger = NoticeLedger::new(3);
        for i in 0..5 {
            ledger.push(Notice::new(format!("n{i}")).with_uuid(format!("u{i}")));
        }
        let messages: Vec<_> = ledger.iter().map(|n| n.message.as_str()).collect();
        assert_eq!(messages, vec!["n2", "n3", "n4"]);
    }

    #[test]
    fn dismiss_removes_stored_instance() {
        let mut ledger = NoticeLedger::new(5);
        ledger.push(Notice::new("a").with_uuid("u-a"));
        ledger.push(Notice::new("b").with_uuid("u-b"));
        let stored = ledger.iter().next().unwrap().clone();

        assert!(ledger.dismiss(&stored));
        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger.iter().next().unwrap().message, "b");
    }

    #[test]
    fn dismiss_equal_content_without_identity_removes_nothing() {
        let mut ledger = NoticeLedger::new(5);
        ledger.push(Notice::new("same"));
        // Same content, but no uuid: not the stored instance.
        let lookalike = Notice::new("same");
        assert!(!ledger.dismiss(&lookalike));
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn dismiss_stale_copy_removes_nothing() {
        let mut ledger = NoticeLedger::new(5);
        ledger.push(Notice::new("current").with_uuid("u-1"));
        let mut stale = ledger.iter().next().unwrap().clone();
        stale.message = "edited".to_string();
        assert!(!ledger.dismiss(&stale));
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn dismiss_uuid_and_clear() {
        let mut ledger = NoticeLedger::new(5);
        ledger.push(Notice::new("a").with_uuid("u-a"));
        ledger.push(Notice::new("b").with_uuid("u-b"));
        assert!(ledger.dismiss_uuid("u-a"));
        assert!(!ledger.dismiss_uuid("u-a"));
        ledger.clear();
        assert!(ledger.is_empty());
    }

    #[test]
    fn zero_limit_is_clamped() {
        let mut ledger = NoticeLedger::new(0);
        assert_eq!(ledger.limit(), 1);
        ledger.push(Notice::new("a"));
        ledger.push(Notice::new("b"));
        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger.iter().next().unwrap().message, "b");
    }

    #[test]
    fn notice_for_analyzer_carries_name() {
        let notice =
            Notice::new("done").for_analyzer(AnalyzerId::from("a-1"), Some("run1".to_string()));
        assert_eq!(notice.analyzer, Some(AnalyzerId::from("a-1")));
        assert_eq!(notice.analyzer_name.as_deref(), Some("run1"));
    }
}
