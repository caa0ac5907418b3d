//! Cached outcomes of previous operation runs.
//!
//! The evaluator consults these to decide whether an operation can be
//! skipped; the observed file lists are what the run actually touched,
//! which may be a superset of what was declared (discovered header
//! includes and the like).

use crate::fs_state::FileId;
use crate::graph::OperationId;
use camino::Utf8PathBuf;
use chrono::{DateTime, Utc};
use rustc_hash::FxHashMap;

/// The recorded outcome of one operation run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationResult {
    pub was_successful_run: bool,
    pub evaluate_time: DateTime<Utc>,
    pub observed_input: Vec<FileId>,
    pub observed_output: Vec<FileId>,
}

/// All known results, keyed by operation id. Persisted alongside the
/// graph and remapped through the identity table on load, the same way
/// the graph is.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct OperationResults {
    referenced_files: Vec<(FileId, Utf8PathBuf)>,
    results: FxHashMap<OperationId, OperationResult>,
}

impl OperationResults {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn referenced_files(&self) -> &[(FileId, Utf8PathBuf)] {
        &self.referenced_files
    }

    pub fn set_referenced_files(&mut self, files: Vec<(FileId, Utf8PathBuf)>) {
        self.referenced_files = files;
    }

    pub fn results(&self) -> &FxHashMap<OperationId, OperationResult> {
        &self.results
    }

    pub(crate) fn results_mut(&mut self) -> &mut FxHashMap<OperationId, OperationResult> {
        &mut self.results
    }

    pub fn try_find_result(&self, id: OperationId) -> Option<&OperationResult> {
        self.results.get(&id)
    }

    /// Record the latest result for an operation, replacing any
    /// previous one.
    pub fn set_result(&mut self, id: OperationId, result: OperationResult) {
        self.results.insert(id, result);
    }

    pub fn sorted_operation_ids(&self) -> Vec<OperationId> {
        let mut ids: Vec<OperationId> = self.results.keys().copied().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn set_replaces() {
        let when = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let mut results = OperationResults::new();
        results.set_result(
            OperationId(1),
            OperationResult {
                was_successful_run: false,
                evaluate_time: when,
                observed_input: vec![FileId(0)],
                observed_output: vec![FileId(1)],
            },
        );
        results.set_result(
            OperationId(1),
            OperationResult {
                was_successful_run: true,
                evaluate_time: when,
                observed_input: vec![FileId(0)],
                observed_output: vec![FileId(1), FileId(2)],
            },
        );
        assert_eq!(results.len(), 1);
        let result = results.try_find_result(OperationId(1)).unwrap();
        assert!(result.was_successful_run);
        assert_eq!(result.observed_output, vec![FileId(1), FileId(2)]);
        assert!(results.try_find_result(OperationId(2)).is_none());
    }
}
