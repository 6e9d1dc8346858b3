/// One pass over every pair: `run_once()`.
///
/// Each aggregate group runs on the tokio blocking pool, since the merge
/// protocol is plain synchronous file I/O. The groups are all spawned before
/// any of them is awaited, so they overlap freely; awaiting the handles in
/// order only fixes the order results are collected in.
use config::format_size;
use merge::{Appender, MergeExecutor, MergeJob, SizeProbe};
use std::path::Path;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::{AggregateGroup, MergeSet, PairOutcome, PairReport, TickReport};

impl<A: Appender + 'static> MergeSet<A> {
    /// Probes every pair and merges the ones at or above the threshold.
    ///
    /// Never fails: a pair whose merge fails (or whose task panics) is
    /// reported in the returned [`TickReport`] and the other pairs carry on.
    pub async fn run_once(&self) -> TickReport {
        let tick = self.ticks.fetch_add(1, Ordering::Relaxed) + 1;
        info!(
            tick,
            pairs = self.pair_count(),
            aggregates = self.groups.len(),
            "merge tick started"
        );

        let handles: Vec<_> = self
            .groups
            .iter()
            .cloned()
            .map(|group| {
                let executor = Arc::clone(&self.executor);
                let threshold = self.threshold;
                let caches = group.caches.clone();
                let aggregate = group.aggregate.clone();
                let handle =
                    tokio::task::spawn_blocking(move || run_group(&executor, &group, threshold));
                (caches, aggregate, handle)
            })
            .collect();

        let mut pairs = Vec::with_capacity(self.pair_count());
        for (caches, aggregate, handle) in handles {
            match handle.await {
                Ok(reports) => pairs.extend(reports),
                Err(e) => {
                    error!(aggregate = %aggregate.display(), error = %e, "merge task panicked");
                    pairs.extend(caches.into_iter().map(|cache| PairReport {
                        cache,
                        aggregate: aggregate.clone(),
                        reconciled_bytes: 0,
                        outcome: PairOutcome::Aborted(e.to_string()),
                    }));
                }
            }
        }
        pairs.sort_by(|a, b| a.cache.cmp(&b.cache));

        let report = TickReport { tick, pairs };
        info!(
            tick,
            merged = report.merged(),
            skipped = report.skipped(),
            failed = report.failed(),
            moved = %format_size(report.bytes_moved()),
            "merge tick finished"
        );
        report
    }
}

/// Runs the pairs of one aggregate group in order.
fn run_group<A: Appender>(
    executor: &MergeExecutor<A>,
    group: &AggregateGroup,
    threshold: u64,
) -> Vec<PairReport> {
    group
        .caches
        .iter()
        .map(|cache| run_pair(executor, cache, &group.aggregate, threshold))
        .collect()
}

/// Reconcile, probe, and merge a single pair.
fn run_pair<A: Appender>(
    executor: &MergeExecutor<A>,
    cache: &Path,
    aggregate: &Path,
    threshold: u64,
) -> PairReport {
    let report = |reconciled_bytes, outcome| PairReport {
        cache: cache.to_path_buf(),
        aggregate: aggregate.to_path_buf(),
        reconciled_bytes,
        outcome,
    };

    let reconciled = match executor.reconcile(cache, aggregate) {
        Ok(Some(bytes)) => {
            info!(
                cache = %cache.display(),
                aggregate = %aggregate.display(),
                bytes,
                "reconciled staging file from an interrupted merge"
            );
            bytes
        }
        Ok(None) => 0,
        Err(e) => {
            warn!(cache = %cache.display(), error = %e, "reconciliation failed, merge postponed");
            return report(0, PairOutcome::Failed(e));
        }
    };

    let size = match SizeProbe::size(cache) {
        Ok(size) => size,
        Err(e) if e.is_not_found() => {
            debug!(cache = %cache.display(), "cache file missing, skipped");
            return report(reconciled, PairOutcome::Missing);
        }
        Err(e) => {
            warn!(cache = %cache.display(), error = %e, "size probe failed");
            return report(reconciled, PairOutcome::Failed(e));
        }
    };

    if size < threshold {
        debug!(cache = %cache.display(), size, threshold, "below threshold, skipped");
        return report(reconciled, PairOutcome::Skipped { size, threshold });
    }

    let job = MergeJob::new(cache, aggregate, threshold);
    info!(
        cache = %cache.display(),
        aggregate = %aggregate.display(),
        size,
        threshold,
        "merge started"
    );

    match executor.merge(&job) {
        Ok(merged) => {
            info!(
                cache = %cache.display(),
                aggregate = %aggregate.display(),
                bytes_moved = merged.bytes_moved,
                aggregate_size = merged.aggregate_size,
                "appended {} to aggregate",
                format_size(merged.bytes_moved)
            );
            report(
                reconciled + merged.reconciled_bytes,
                PairOutcome::Merged {
                    bytes_moved: merged.bytes_moved,
                    aggregate_size: merged.aggregate_size,
                },
            )
        }
        Err(e) => {
            warn!(
                cache = %cache.display(),
                aggregate = %aggregate.display(),
                error = %e,
                "merge failed, will retry next tick"
            );
            report(reconciled, PairOutcome::Failed(e))
        }
    }
}
