//! Ordered work-lists with per-item result sinks
//!
//! Artifact generation and correction walk the candidate list in scan
//! order; a failure is recorded against its item and the loop moves on.
//! Sequential and rayon runs report in the same order.

use crate::model::{CandidateItem, ItemKey};
use crate::Error;
use rayon::prelude::*;
use std::collections::VecDeque;
use tracing::{error, info, warn};

/// Anything a work-list can carry
pub trait WorkItem {
    fn key(&self) -> &ItemKey;
}

impl WorkItem for CandidateItem {
    fn key(&self) -> &ItemKey {
        &self.key
    }
}

/// Per-item outcome that may have been a no-op
pub trait ItemOutcome {
    /// True when the item was already up to date and nothing was written
    fn was_skipped(&self) -> bool {
        false
    }
}

/// Result recorded for one item
#[derive(Debug)]
pub struct ItemReport<R> {
    pub key: ItemKey,
    pub outcome: Result<R, Error>,
}

/// Counts printed at the end of every batch command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BatchSummary {
    pub processed: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl BatchSummary {
    /// Process exit code: number of failed items, capped at 255
    pub fn exit_code(&self) -> u8 {
        self.failed.min(u8::MAX as usize) as u8
    }
}

/// All item results of one batch, in work-list order
#[derive(Debug)]
pub struct BatchReport<R> {
    pub label: String,
    pub items: Vec<ItemReport<R>>,
}

fn log_failure(label: &str, key: &ItemKey, err: &Error) {
    if err.is_per_item() {
        warn!("[{}] {} failed: {}", label, key, err);
    } else {
        error!("[{}] {} failed: {}", label, key, err);
    }
}

impl<R> BatchReport<R> {
    pub fn failures(&self) -> impl Iterator<Item = (&ItemKey, &Error)> {
        self.items
            .iter()
            .filter_map(|r| r.outcome.as_ref().err().map(|e| (&r.key, e)))
    }
}

impl<R: ItemOutcome> BatchReport<R> {
    pub fn summary(&self) -> BatchSummary {
        let mut summary = BatchSummary {
            processed: self.items.len(),
            ..BatchSummary::default()
        };
        for item in &self.items {
            match &item.outcome {
                Ok(outcome) => {
                    summary.succeeded += 1;
                    if outcome.was_skipped() {
                        summary.skipped += 1;
                    }
                }
                Err(_) => summary.failed += 1,
            }
        }
        summary
    }

    /// Log the summary line and each failed item
    pub fn log_summary(&self) -> BatchSummary {
        let summary = self.summary();
        for (key, err) in self.failures() {
            warn!("[{}] FAILED {}: {}", self.label, key, err);
        }
        info!(
            "[{}] {} processed, {} succeeded, {} failed ({} already up to date)",
            self.label, summary.processed, summary.succeeded, summary.failed, summary.skipped
        );
        summary
    }
}

/// Ordered queue of items awaiting a batch pass
#[derive(Debug)]
pub struct WorkList<T> {
    items: VecDeque<T>,
}

impl<T: WorkItem> WorkList<T> {
    pub fn new(items: impl IntoIterator<Item = T>) -> Self {
        Self {
            items: items.into_iter().collect(),
        }
    }

    /// Run `work` on each item in order, collecting every outcome
    pub fn run<R, F>(mut self, label: &str, mut work: F) -> BatchReport<R>
    where
        F: FnMut(&T) -> Result<R, Error>,
    {
        let total = self.items.len();
        let mut reports = Vec::with_capacity(total);
        let mut position = 0;
        while let Some(item) = self.items.pop_front() {
            position += 1;
            info!("[{}] ({}/{}) {}", label, position, total, item.key());
            let outcome = work(&item);
            if let Err(e) = &outcome {
                log_failure(label, item.key(), e);
            }
            reports.push(ItemReport {
                key: item.key().clone(),
                outcome,
            });
        }
        BatchReport {
            label: label.to_string(),
            items: reports,
        }
    }

    /// Same contract as `run`, items processed on rayon's pool
    ///
    /// Reports come back in work-list order regardless of completion order.
    pub fn run_parallel<R, F>(self, label: &str, work: F) -> BatchReport<R>
    where
        T: Sync,
        R: Send,
        F: Fn(&T) -> Result<R, Error> + Sync,
    {
        let items: Vec<T> = self.items.into_iter().collect();
        let reports: Vec<ItemReport<R>> = items
            .par_iter()
            .map(|item| {
                let outcome = work(item);
                if let Err(e) = &outcome {
                    log_failure(label, item.key(), e);
                }
                ItemReport {
                    key: item.key().clone(),
                    outcome,
                }
            })
            .collect();
        BatchReport {
            label: label.to_string(),
            items: reports,
        }
    }
}
