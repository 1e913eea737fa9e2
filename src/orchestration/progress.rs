// Progress tracking for batch runs.
//
// Two pieces: `ProgressTracker` turns confirmed and estimated completion
// counts into one monotonic figure for display, and `OutcomeLedger` is the
// single source of truth for per-image outcomes. Displayed progress may be
// optimistic between polls; the ledger never is.

use std::collections::BTreeMap;
use tracing::debug;

use crate::client::wire::BatchProgress;
use crate::core::types::{BatchSummary, ImageStatus};

/// Monotonic batch progress. `position()` never decreases and never exceeds
/// the total; estimated ticks stop at `total - 1` so only confirmed
/// completion can show a finished batch.
#[derive(Debug, Clone)]
pub struct ProgressTracker {
    total: usize,
    confirmed: usize,
    estimated: usize,
    status_text: String,
    /// Bumped on every reset. Deferred resets capture the generation they
    /// belong to and become no-ops once a newer batch owns the tracker.
    generation: u64,
}

impl ProgressTracker {
    pub fn new(total: usize) -> Self {
        Self {
            total,
            confirmed: 0,
            estimated: 0,
            status_text: String::new(),
            generation: 0,
        }
    }

    pub fn total(&self) -> usize {
        self.total
    }

    /// Record a confirmed completion count from the service. Stale snapshots
    /// (lower than what we already showed) are ignored.
    pub fn confirm(&mut self, completed: usize) {
        let completed = completed.min(self.total);
        if completed > self.confirmed {
            self.confirmed = completed;
        }
        // Confirmed truth supersedes any optimistic estimate below it.
        if self.estimated < self.confirmed {
            self.estimated = self.confirmed;
        }
    }

    /// Advance the optimistic estimate by one tick, saturating at
    /// `total - 1`. Used when no fresh confirmation is available.
    pub fn tick_estimate(&mut self) {
        let cap = self.total.saturating_sub(1);
        if self.estimated < cap {
            self.estimated += 1;
        }
    }

    /// The figure to display: the larger of confirmed and estimated.
    pub fn position(&self) -> usize {
        self.confirmed.max(self.estimated)
    }

    pub fn is_complete(&self) -> bool {
        self.total > 0 && self.confirmed >= self.total
    }

    /// Coarse phase description shown alongside the position.
    pub fn status_text(&self) -> &str {
        &self.status_text
    }

    pub fn set_status(&mut self, text: impl Into<String>) {
        self.status_text = text.into();
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn reset(&mut self, total: usize) {
        let generation = self.generation.wrapping_add(1);
        *self = Self::new(total);
        self.generation = generation;
    }
}

/// Per-image outcome ledger for one batch. Counts and statuses derive from
/// recorded outcomes only, never from displayed progress.
#[derive(Debug, Clone)]
pub struct OutcomeLedger {
    statuses: BTreeMap<usize, ImageStatus>,
    /// Indices already reported as newly terminal, so repeated poll
    /// snapshots do not re-announce the same completion.
    announced: std::collections::BTreeSet<usize>,
}

impl OutcomeLedger {
    pub fn new<I: IntoIterator<Item = usize>>(indices: I) -> Self {
        Self {
            statuses: indices
                .into_iter()
                .map(|index| (index, ImageStatus::Pending))
                .collect(),
            announced: Default::default(),
        }
    }

    pub fn len(&self) -> usize {
        self.statuses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.statuses.is_empty()
    }

    pub fn record(&mut self, index: usize, status: ImageStatus) {
        debug!(index, ?status, "ledger outcome recorded");
        self.statuses.insert(index, status);
    }

    pub fn status(&self, index: usize) -> Option<&ImageStatus> {
        self.statuses.get(&index)
    }

    pub fn statuses(&self) -> &BTreeMap<usize, ImageStatus> {
        &self.statuses
    }

    /// Fold a poll snapshot into the ledger. Returns the indices that became
    /// terminal for the first time in this snapshot, for one-shot logging.
    pub fn absorb(&mut self, progress: &BatchProgress) -> Vec<usize> {
        let mut newly_terminal = Vec::new();
        for entry in &progress.per_image {
            let status = match entry.status.as_str() {
                "completed" => ImageStatus::Completed,
                "failed" => ImageStatus::Failed(
                    entry
                        .error
                        .clone()
                        .unwrap_or_else(|| "unknown failure".to_string()),
                ),
                "skipped" => ImageStatus::Skipped,
                "processing" => ImageStatus::Running,
                _ => ImageStatus::Pending,
            };
            let terminal = status.is_terminal();
            self.statuses.insert(entry.image_index, status);
            if terminal && self.announced.insert(entry.image_index) {
                newly_terminal.push(entry.image_index);
            }
        }
        newly_terminal
    }

    pub fn all_terminal(&self) -> bool {
        self.statuses.values().all(ImageStatus::is_terminal)
    }

    /// Force every image still non-terminal to `Failed(detail)`. Returns the
    /// affected indices. Used when a remote job reports overall completion
    /// while individual entries never reached a terminal status.
    pub fn finalize_unresolved(&mut self, detail: &str) -> Vec<usize> {
        let unresolved: Vec<usize> = self
            .statuses
            .iter()
            .filter(|(_, status)| !status.is_terminal())
            .map(|(index, _)| *index)
            .collect();
        for &index in &unresolved {
            self.statuses
                .insert(index, ImageStatus::Failed(detail.to_string()));
            self.announced.insert(index);
        }
        unresolved
    }

    pub fn summary(&self) -> BatchSummary {
        let mut summary = BatchSummary {
            total: self.statuses.len(),
            succeeded: 0,
            failed: 0,
            skipped: 0,
        };
        for status in self.statuses.values() {
            match status {
                ImageStatus::Completed => summary.succeeded += 1,
                ImageStatus::Failed(_) => summary.failed += 1,
                ImageStatus::Skipped => summary.skipped += 1,
                ImageStatus::Pending | ImageStatus::Running => {}
            }
        }
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::testing::ScriptedClient;

    #[test]
    fn position_is_monotonic_under_stale_confirms() {
        let mut tracker = ProgressTracker::new(10);
        tracker.confirm(4);
        assert_eq!(tracker.position(), 4);
        tracker.confirm(2);
        assert_eq!(tracker.position(), 4);
        tracker.confirm(10);
        assert!(tracker.is_complete());
    }

    #[test]
    fn estimate_never_reaches_total() {
        let mut tracker = ProgressTracker::new(3);
        for _ in 0..20 {
            tracker.tick_estimate();
        }
        assert_eq!(tracker.position(), 2);
        assert!(!tracker.is_complete());
        tracker.confirm(3);
        assert_eq!(tracker.position(), 3);
        assert!(tracker.is_complete());
    }

    #[test]
    fn confirm_lifts_lagging_estimate() {
        let mut tracker = ProgressTracker::new(10);
        tracker.tick_estimate();
        tracker.confirm(5);
        tracker.tick_estimate();
        assert_eq!(tracker.position(), 6);
    }

    #[test]
    fn reset_clears_state_and_advances_generation() {
        let mut tracker = ProgressTracker::new(5);
        tracker.confirm(3);
        tracker.set_status("polling batch progress");
        let generation = tracker.generation();

        tracker.reset(2);
        assert_eq!(tracker.position(), 0);
        assert_eq!(tracker.total(), 2);
        assert!(tracker.status_text().is_empty());
        assert_eq!(tracker.generation(), generation + 1);
    }

    #[test]
    fn finalize_marks_only_unresolved_as_failed() {
        let mut ledger = OutcomeLedger::new(0..3);
        ledger.record(0, ImageStatus::Completed);
        ledger.record(1, ImageStatus::Running);

        let unresolved = ledger.finalize_unresolved("no terminal status reported");
        assert_eq!(unresolved, vec![1, 2]);
        assert!(ledger.all_terminal());
        let summary = ledger.summary();
        assert_eq!(summary.succeeded, 1);
        assert_eq!(summary.failed, 2);
        assert!(summary.accounted());
    }

    #[test]
    fn absorb_reports_each_completion_once() {
        let mut ledger = OutcomeLedger::new(0..3);
        let first = ScriptedClient::progress(true, 3, 1, 0, vec![(0, "completed"), (1, "processing")]);
        assert_eq!(ledger.absorb(&first), vec![0]);

        // Same snapshot again: nothing newly terminal.
        assert!(ledger.absorb(&first).is_empty());

        let second = ScriptedClient::progress(
            false,
            3,
            2,
            1,
            vec![(0, "completed"), (1, "failed"), (2, "completed")],
        );
        assert_eq!(ledger.absorb(&second), vec![1, 2]);
        assert!(ledger.all_terminal());
    }

    #[test]
    fn summary_counts_derive_from_outcomes() {
        let mut ledger = OutcomeLedger::new(0..4);
        ledger.record(0, ImageStatus::Completed);
        ledger.record(1, ImageStatus::Failed("no chart data".to_string()));
        ledger.record(2, ImageStatus::Skipped);

        let summary = ledger.summary();
        assert_eq!(summary.total, 4);
        assert_eq!(summary.succeeded, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.skipped, 1);
        assert!(!summary.accounted());
        assert!(!ledger.all_terminal());

        ledger.record(3, ImageStatus::Completed);
        assert!(ledger.summary().accounted());
    }
}
