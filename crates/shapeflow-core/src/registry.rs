//! Analyzer registry: the local map of analyzer id to status and config.
//!
//! The registry encodes content only; ordering lives in
//! [`ExecutionQueue`](crate::queue::ExecutionQueue). Records are created
//! empty, shallow-merged on every update and removed when the analyzer is
//! unqueued or closed.
//!
//! Invalid calls (blank id, duplicate add, update for an unknown id) log a
//! warning and leave the registry untouched so that one bad call site cannot
//! abort a reconciliation pass.

use std::collections::HashMap;

use tracing::{debug, warn};

use crate::model::{AnalyzerConfig, AnalyzerId, AnalyzerRecord, AnalyzerStatus};

/// Local map of analyzer id to [`AnalyzerRecord`].
#[derive(Debug, Clone, Default)]
pub struct AnalyzerRegistry {
    records: HashMap<AnalyzerId, AnalyzerRecord>,
}

impl AnalyzerRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an empty record. Returns `false` for blank or known ids.
    pub fn add(&mut self, id: &AnalyzerId) -> bool {
        if !id.is_valid() {
            warn!("Refusing to add analyzer with blank id");
            return false;
        }
        if self.records.contains_key(id) {
            debug!(analyzer_id = %id, "Analyzer already registered");
            return false;
        }
        self.records.insert(id.clone(), AnalyzerRecord::default());
        true
    }

    /// Shallow-merge a status patch into an existing record.
    pub fn set_status(&mut self, id: &AnalyzerId, patch: AnalyzerStatus) -> bool {
        if !id.is_valid() {
            warn!("Ignoring status update with blank analyzer id");
            return false;
        }
        match self.records.get_mut(id) {
            Some(record) => {
                record.status.merge(patch);
                true
            }
            None => {
                warn!(analyzer_id = %id, "Dropping status update for unknown analyzer");
                false
            }
        }
    }

    /// Shallow-merge a config patch into an existing record.
    ///
    /// The stored config always ends up with a non-blank name.
    pub fn set_config(&mut self, id: &AnalyzerId, patch: AnalyzerConfig) -> bool {
        if !id.is_valid() {
            warn!("Ignoring config update with blank analyzer id");
            return false;
        }
        match self.records.get_mut(id) {
            Some(record) => {
                record.config.merge(patch);
                record.config.fill_default_name();
                true
            }
            None => {
                warn!(analyzer_id = %id, "Dropping config update for unknown analyzer");
                false
            }
        }
    }

    /// Remove a record, returning it if it existed.
    pub fn drop_analyzer(&mut self, id: &AnalyzerId) -> Option<AnalyzerRecord> {
        self.records.remove(id)
    }

    #[must_use]
    pub fn contains(&self, id: &AnalyzerId) -> bool {
        self.records.contains_key(id)
    }

    #[must_use]
    pub fn get(&self, id: &AnalyzerId) -> Option<&AnalyzerRecord> {
        self.records.get(id)
    }

    #[must_use]
    pub fn status(&self, id: &AnalyzerId) -> Option<&AnalyzerStatus> {
        self.records.get(id).map(|r| &r.status)
    }

    #[must_use]
    pub fn config(&self, id: &AnalyzerId) -> Option<&AnalyzerConfig> {
        self.records.get(id).map(|r| &r.config)
    }

    /// Live mutable status. Writes through to the registry.
    pub fn status_mut(&mut self, id: &AnalyzerId) -> Option<&mut AnalyzerStatus> {
        self.records.get_mut(id).map(|r| &mut r.status)
    }

    /// Live mutable config. Writes through to the registry.
    pub fn config_mut(&mut self, id: &AnalyzerId) -> Option<&mut AnalyzerConfig> {
        self.records.get_mut(id).map(|r| &mut r.config)
    }

    /// Detached copy of the status for draft editing.
    #[must_use]
    pub fn status_copy(&self, id: &AnalyzerId) -> Option<AnalyzerStatus> {
        self.status(id).cloned()
    }

    /// Detached copy of the config for draft editing.
    #[must_use]
    pub fn config_copy(&self, id: &AnalyzerId) -> Option<AnalyzerConfig> {
        self.config(id).cloned()
    }

    /// Whether the config of a known analyzer has never been filled in.
    #[must_use]
    pub fn config_is_empty(&self, id: &AnalyzerId) -> bool {
        self.config(id).is_some_and(AnalyzerConfig::is_empty)
    }

    pub fn ids(&self) -> impl Iterator<Item = &AnalyzerId> {
        self.records.keys()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
