//! # Engine - Coalesce merge orchestration
//!
//! Ties the [`config`] and [`merge`] crates together: a [`MergeSet`] runs the
//! merge protocol over every configured pair, and a [`Scheduler`] runs the
//! merge set on a timer until it is told to stop.
//!
//! ## Architecture
//!
//! ```text
//! Scheduler (tokio interval, overlapping ticks skipped)
//!   |
//!   v
//! ┌───────────────────────────────────────────────────┐
//! │                   MERGE SET                       │
//! │                                                   │
//! │ run_once() ── one blocking task per aggregate ──┐ │
//! │                                                 │ │
//! │   per cache file in the group, in order:        │ │
//! │     reconcile leftover staging                  │ │
//! │     SizeProbe ── below threshold? ── skip       │ │
//! │     MergeExecutor::merge                        │ │
//! │                                                 │ │
//! │ ◄──────────── TickReport (one entry per pair) ──┘ │
//! └───────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Responsibilities
//!
//! | Module        | Purpose                                                |
//! |---------------|--------------------------------------------------------|
//! | [`lib.rs`]    | `MergeSet` struct, constructors, accessors, `Debug`    |
//! | [`tick`]      | `run_once()`: fan-out, per-pair decision, reporting    |
//! | [`recovery`]  | `recover()`: startup sweep for leftover staging files  |
//! | [`report`]    | `TickReport`, `PairReport`, `PairOutcome`              |
//! | [`scheduler`] | `Scheduler`, `Shutdown`                                |
//!
//! ## Concurrency
//!
//! Pairs that write to different aggregates never wait on each other. Pairs
//! that share an aggregate are merged one after the other inside their
//! group, so two cache files never interleave chunks in one archive. There
//! is no lock: the mapping is read-only and each job only touches its own
//! files.
mod recovery;
mod report;
mod scheduler;
mod tick;

pub use report::{PairOutcome, PairReport, TickReport};
pub use scheduler::{Scheduler, Shutdown};

use config::{Config, FilePairMapping};
use merge::{Appender, MergeExecutor, StreamAppender};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::AtomicU64;
use std::sync::Arc;

/// Cache files that feed one aggregate.
#[derive(Debug, Clone)]
pub(crate) struct AggregateGroup {
    pub(crate) aggregate: PathBuf,
    pub(crate) caches: Vec<PathBuf>,
}

/// The fixed set of pairs plus everything needed to merge them.
///
/// Cheap to share: the groups and the executor sit behind `Arc`s and are
/// never mutated after construction.
pub struct MergeSet<A: Appender = StreamAppender> {
    pub(crate) groups: Arc<Vec<AggregateGroup>>,
    pub(crate) executor: Arc<MergeExecutor<A>>,
    /// A cache file at or above this many bytes is merged.
    pub(crate) threshold: u64,
    /// Number of `run_once` calls started so far.
    pub(crate) ticks: AtomicU64,
}

impl<A: Appender> std::fmt::Debug for MergeSet<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MergeSet")
            .field("pairs", &self.pair_count())
            .field("aggregates", &self.groups.len())
            .field("threshold", &self.threshold)
            .field("ticks", &self.ticks())
            .finish()
    }
}

impl MergeSet<StreamAppender> {
    /// Creates a merge set using the default streaming append.
    ///
    /// * `pairs` - validated cache -> aggregate mapping.
    /// * `threshold` - cache size (bytes) at which a pair is merged.
    /// * `sync` - if `true`, every append is `fsync`ed.
    pub fn new(pairs: &FilePairMapping, threshold: u64, sync: bool) -> Self {
        Self::with_executor(pairs, threshold, MergeExecutor::new(sync))
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(&config.pairs, config.threshold, config.sync)
    }
}

impl<A: Appender> MergeSet<A> {
    /// Creates a merge set around a custom executor.
    pub fn with_executor(pairs: &FilePairMapping, threshold: u64, executor: MergeExecutor<A>) -> Self {
        let mut by_aggregate: BTreeMap<PathBuf, Vec<PathBuf>> = BTreeMap::new();
        for (cache, aggregate) in pairs.iter() {
            by_aggregate
                .entry(aggregate.to_path_buf())
                .or_default()
                .push(cache.to_path_buf());
        }
        let groups = by_aggregate
            .into_iter()
            .map(|(aggregate, caches)| AggregateGroup { aggregate, caches })
            .collect();

        Self {
            groups: Arc::new(groups),
            executor: Arc::new(executor),
            threshold,
            ticks: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn threshold(&self) -> u64 {
        self.threshold
    }

    /// Total number of cache -> aggregate pairs.
    #[must_use]
    pub fn pair_count(&self) -> usize {
        self.groups.iter().map(|g| g.caches.len()).sum()
    }

    /// Number of distinct aggregate files, i.e. the maximum number of merges
    /// that run at the same time.
    #[must_use]
    pub fn aggregate_count(&self) -> usize {
        self.groups.len()
    }

    /// Number of ticks started so far.
    #[must_use]
    pub fn ticks(&self) -> u64 {
        self.ticks.load(std::sync::atomic::Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests;
