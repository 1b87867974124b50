//! Progress tracking for an ingestion run.
//!
//! The `SyncProgressTracker` holds the run-local view of the resume checkpoint: the last height
//! whose records are fully persisted and the cumulative counts, seeded from the progress record
//! left by earlier runs. The pipeline asks it for the checkpoint to write after a height and only
//! commits the new state once that checkpoint has been persisted.

use crate::ingest::gaps::GapRange;
use crate::ingest::types::{ChainInfo, IngestReport};
use crate::store::ScanProgress;

use chrono::Utc;
use tracing::info;

/// Heights between two periodic progress log lines.
pub const DEFAULT_LOG_INTERVAL: u64 = 1000;

/// Service for tracking ingestion progress
#[derive(Debug, Clone)]
pub struct SyncProgressTracker {
    chain: ChainInfo,
    start_height: u64,
    end_height: u64,
    /// Highest height confirmed persisted, across runs
    last_indexed_block: Option<u64>,
    total_blocks: u64,
    total_transactions: u64,
    total_events: u64,
    /// Heights persisted by this run
    heights_indexed: u64,
    /// Heights skipped by this run because their state was pruned
    skipped_heights: Vec<u64>,
    log_interval: u64,
    /// Last height at which we logged progress
    last_logged_height: u64,
    /// Last height handled, indexed or skipped
    current_height: Option<u64>,
}

impl SyncProgressTracker {
    /// Create a tracker for the run over `start_height..=end_height`, continuing the counts of
    /// `prior` if a progress record exists.
    pub fn new(
        chain: ChainInfo,
        prior: Option<&ScanProgress>,
        start_height: u64,
        end_height: u64,
        log_interval: u64,
    ) -> Self {
        Self {
            chain,
            start_height,
            end_height,
            last_indexed_block: prior.and_then(|p| p.last_indexed_block),
            total_blocks: prior.map_or(0, |p| p.total_blocks),
            total_transactions: prior.map_or(0, |p| p.total_transactions),
            total_events: prior.map_or(0, |p| p.total_events),
            heights_indexed: 0,
            skipped_heights: Vec::new(),
            log_interval: log_interval.max(1),
            last_logged_height: start_height,
            current_height: None,
        }
    }

    /// The checkpoint claiming `height` as indexed with the given record counts.
    ///
    /// Nothing is committed until [`record_block`](Self::record_block) is called.
    pub fn checkpoint_for(&self, height: u64, transactions: u64, events: u64) -> ScanProgress {
        ScanProgress {
            last_indexed_block: Some(height),
            total_blocks: self.total_blocks + 1,
            total_transactions: self.total_transactions + transactions,
            total_events: self.total_events + events,
            is_complete: height == self.end_height,
            ..self.checkpoint()
        }
    }

    /// The checkpoint after skipping `height`: nothing advances except the completion flag.
    pub fn skip_checkpoint(&self, height: u64) -> ScanProgress {
        ScanProgress {
            is_complete: height == self.end_height,
            ..self.checkpoint()
        }
    }

    /// The checkpoint written when the run fails: pinned at the last confirmed height.
    pub fn failure_checkpoint(&self) -> ScanProgress {
        self.checkpoint()
    }

    fn checkpoint(&self) -> ScanProgress {
        ScanProgress {
            chain_id: self.chain.chain_id.clone(),
            chain_name: self.chain.chain_name.clone(),
            last_indexed_block: self.last_indexed_block,
            total_blocks: self.total_blocks,
            total_transactions: self.total_transactions,
            total_events: self.total_events,
            updated_at: Utc::now(),
            is_complete: false,
            target_end_block: Some(self.end_height),
        }
    }

    /// Record that the records of `height` and its checkpoint are persisted
    pub fn record_block(&mut self, height: u64, transactions: u64, events: u64) {
        self.last_indexed_block = Some(height);
        self.total_blocks += 1;
        self.total_transactions += transactions;
        self.total_events += events;
        self.heights_indexed += 1;
        self.current_height = Some(height);
    }

    /// Record a height skipped because the node pruned its state
    pub fn record_skipped(&mut self, height: u64) {
        self.skipped_heights.push(height);
        self.current_height = Some(height);
    }

    pub fn last_indexed_block(&self) -> Option<u64> {
        self.last_indexed_block
    }

    pub fn totals(&self) -> (u64, u64, u64) {
        (self.total_blocks, self.total_transactions, self.total_events)
    }

    /// Log progress at regular intervals or when forced
    pub fn log_progress(&mut self, force: bool) {
        let Some(current) = self.current_height else {
            return;
        };

        let heights_since_last_log = current.saturating_sub(self.last_logged_height);
        if force || heights_since_last_log >= self.log_interval {
            info!(
                "Ingest progress for {}: height {}/{}, {} blocks, {} transactions, {} events indexed, {} skipped",
                self.chain.chain_id,
                current,
                self.end_height,
                self.total_blocks,
                self.total_transactions,
                self.total_events,
                self.skipped_heights.len()
            );
            self.last_logged_height = current;
        }
    }

    /// Summary of the run so far
    pub fn report(&self, gaps: Vec<GapRange>) -> IngestReport {
        IngestReport {
            start_height: self.start_height,
            end_height: self.end_height,
            heights_indexed: self.heights_indexed,
            skipped_heights: self.skipped_heights.clone(),
            last_indexed_block: self.last_indexed_block,
            total_blocks: self.total_blocks,
            total_transactions: self.total_transactions,
            total_events: self.total_events,
            gaps,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prior(last: Option<u64>) -> ScanProgress {
        ScanProgress {
            chain_id: "test".to_string(),
            chain_name: "Test".to_string(),
            last_indexed_block: last,
            total_blocks: 10,
            total_transactions: 20,
            total_events: 30,
            updated_at: Utc::now(),
            is_complete: false,
            target_end_block: Some(9),
        }
    }

    fn tracker(prior: Option<&ScanProgress>, start: u64, end: u64) -> SyncProgressTracker {
        SyncProgressTracker::new(
            ChainInfo::new("test", "Test"),
            prior,
            start,
            end,
            DEFAULT_LOG_INTERVAL,
        )
    }

    #[test]
    fn counts_continue_from_the_prior_record() {
        let prior = prior(Some(9));
        let mut tracker = tracker(Some(&prior), 10, 11);

        let checkpoint = tracker.checkpoint_for(10, 2, 3);
        assert_eq!(checkpoint.last_indexed_block, Some(10));
        assert_eq!(
            (checkpoint.total_blocks, checkpoint.total_transactions, checkpoint.total_events),
            (11, 22, 33)
        );
        assert!(!checkpoint.is_complete);
        // not committed yet
        assert_eq!(tracker.last_indexed_block(), Some(9));

        tracker.record_block(10, 2, 3);
        let last = tracker.checkpoint_for(11, 0, 1);
        assert!(last.is_complete);
        assert_eq!(last.target_end_block, Some(11));
        assert_eq!(last.total_blocks, 12);
    }

    #[test]
    fn skipped_heights_advance_nothing() {
        let mut tracker = tracker(None, 0, 1);
        tracker.record_block(0, 1, 1);

        let skipped = tracker.skip_checkpoint(1);
        assert_eq!(skipped.last_indexed_block, Some(0));
        assert_eq!(skipped.total_blocks, 1);
        assert!(skipped.is_complete);

        tracker.record_skipped(1);
        let report = tracker.report(Vec::new());
        assert_eq!(report.heights_indexed, 1);
        assert_eq!(report.skipped_heights, vec![1]);
    }

    #[test]
    fn failure_is_pinned_at_the_last_confirmed_height() {
        let mut tracker = tracker(None, 0, 10);
        assert_eq!(tracker.failure_checkpoint().last_indexed_block, None);

        tracker.record_block(0, 0, 0);
        tracker.record_block(1, 0, 0);
        tracker.record_skipped(2);

        let failed = tracker.failure_checkpoint();
        assert_eq!(failed.last_indexed_block, Some(1));
        assert!(!failed.is_complete);
    }
}
