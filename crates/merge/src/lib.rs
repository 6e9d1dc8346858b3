//! # Merge - crash-safe cache -> aggregate merge protocol
//!
//! Moves every byte currently buffered in a cache file onto the end of its
//! aggregate file such that an interruption at any point (crash, full disk,
//! revoked permission) never loses data.
//!
//! ## Protocol
//!
//! ```text
//!  cache (a.log)           staging (a.log.tmp)        aggregate (a.big)
//!       |                          |                          |
//!  0.   |  leftover staging? ------+-- append ---------------->|  reconcile
//!  1.   |---- rename ------------->|                          |  detach
//!  2.   |  (recreate empty)        |                          |  writers resume
//!  3.   |                          |---- append -------------->|  stream copy
//!  4.   |<--- rename (restore) ----|  only if step 3 failed    |
//!  5.   |                          x  delete on success        |
//! ```
//!
//! - The only destructive step (5) runs after the aggregate holds a copy.
//! - A failed append folds the staging bytes back in front of whatever
//!   producers wrote since step 2. Bytes that already reached the aggregate
//!   stay there: a failed merge may duplicate a prefix, it never drops one.
//! - A staging file found at the start of a job is the footprint of an
//!   interrupted job. It is appended to the aggregate before anything else
//!   happens to that cache path, so at most one staging file exists per
//!   cache path.
//!
//! ## Example
//!
//! ```rust,no_run
//! use merge::{MergeExecutor, MergeJob, SizeProbe};
//!
//! let threshold = 1024;
//! if SizeProbe::at_or_above("a.log", threshold).unwrap() {
//!     let job = MergeJob::new("a.log", "a.big", threshold);
//!     let report = MergeExecutor::new(true).merge(&job).unwrap();
//!     println!("moved {} bytes", report.bytes_moved);
//! }
//! ```

mod append;
mod error;
mod executor;
mod guard;
mod probe;

pub use append::{AppendFailure, Appender, StreamAppender};
pub use error::MergeError;
pub use executor::MergeExecutor;
pub use probe::SizeProbe;

use config::staging_path;
use std::path::{Path, PathBuf};

/// One merge attempt for one pair, built fresh on every tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeJob {
    /// File producers append to.
    pub cache_path: PathBuf,
    /// Archive the cache contents are appended to.
    pub aggregate_path: PathBuf,
    /// `cache_path` + `.tmp`; owned by the merger.
    pub staging_path: PathBuf,
    /// Size that made this cache file eligible.
    pub threshold: u64,
}

impl MergeJob {
    pub fn new<C: AsRef<Path>, A: AsRef<Path>>(cache: C, aggregate: A, threshold: u64) -> Self {
        let cache_path = cache.as_ref().to_path_buf();
        Self {
            staging_path: staging_path(&cache_path),
            aggregate_path: aggregate.as_ref().to_path_buf(),
            cache_path,
            threshold,
        }
    }
}

/// Outcome of a successful [`MergeExecutor::merge`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeReport {
    pub cache_path: PathBuf,
    pub aggregate_path: PathBuf,
    /// Bytes moved from the cache file by this job.
    pub bytes_moved: u64,
    /// Size of the aggregate file after the append.
    pub aggregate_size: u64,
    /// Bytes of a leftover staging file appended before the job started.
    pub reconciled_bytes: u64,
}

#[cfg(test)]
mod tests;
