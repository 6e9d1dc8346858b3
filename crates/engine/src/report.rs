/// Per-tick results handed back to the caller of `run_once`.
///
/// A tick never fails as a whole. Every configured pair gets exactly one
/// [`PairReport`], whatever happened to it.
use merge::MergeError;
use std::path::PathBuf;

/// What a tick did with one pair.
#[derive(Debug)]
pub enum PairOutcome {
    /// The cache file was at or above the threshold and was merged.
    Merged {
        bytes_moved: u64,
        aggregate_size: u64,
    },
    /// The cache file was below the threshold and left untouched.
    Skipped { size: u64, threshold: u64 },
    /// The cache file does not exist; nothing to do this tick.
    Missing,
    /// The merge attempt failed. The data is still on disk (see the error)
    /// and the next tick retries.
    Failed(MergeError),
    /// The task running this pair's group panicked.
    Aborted(String),
}

/// One pair's entry in a [`TickReport`].
#[derive(Debug)]
pub struct PairReport {
    pub cache: PathBuf,
    pub aggregate: PathBuf,
    /// Bytes of a leftover staging file folded into the aggregate before the
    /// pair was probed.
    pub reconciled_bytes: u64,
    pub outcome: PairOutcome,
}

impl PairReport {
    #[must_use]
    pub fn is_merged(&self) -> bool {
        matches!(self.outcome, PairOutcome::Merged { .. })
    }

    #[must_use]
    pub fn is_failure(&self) -> bool {
        matches!(
            self.outcome,
            PairOutcome::Failed(_) | PairOutcome::Aborted(_)
        )
    }
}

/// Result of one `run_once` call, sorted by cache path.
#[derive(Debug)]
pub struct TickReport {
    /// 1-based tick number.
    pub tick: u64,
    pub pairs: Vec<PairReport>,
}

impl TickReport {
    /// Looks up the report for `cache`.
    pub fn pair(&self, cache: impl AsRef<std::path::Path>) -> Option<&PairReport> {
        let cache = cache.as_ref();
        self.pairs.iter().find(|p| p.cache == cache)
    }

    #[must_use]
    pub fn merged(&self) -> usize {
        self.pairs.iter().filter(|p| p.is_merged()).count()
    }

    /// Pairs below threshold or without a cache file.
    #[must_use]
    pub fn skipped(&self) -> usize {
        self.pairs
            .iter()
            .filter(|p| matches!(p.outcome, PairOutcome::Skipped { .. } | PairOutcome::Missing))
            .count()
    }

    #[must_use]
    pub fn failed(&self) -> usize {
        self.pairs.iter().filter(|p| p.is_failure()).count()
    }

    /// Total bytes moved into aggregates, reconciled staging files included.
    #[must_use]
    pub fn bytes_moved(&self) -> u64 {
        self.pairs
            .iter()
            .map(|p| {
                let merged = match p.outcome {
                    PairOutcome::Merged { bytes_moved, .. } => bytes_moved,
                    _ => 0,
                };
                merged + p.reconciled_bytes
            })
            .sum()
    }
}
