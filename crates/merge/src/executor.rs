/// The merge executor: one crash-safe merge of one cache file into one
/// aggregate file.
///
/// Jobs for different pairs share nothing but the executor itself, which is
/// immutable, so any number of them may run at once.
use config::staging_path;
use std::fs::{self, OpenOptions};
use std::path::Path;
use tracing::{debug, warn};

use crate::guard::StagingGuard;
use crate::{AppendFailure, Appender, MergeError, MergeJob, MergeReport, SizeProbe, StreamAppender};

/// Runs the merge protocol described in the crate docs.
#[derive(Debug, Clone)]
pub struct MergeExecutor<A: Appender = StreamAppender> {
    appender: A,
    /// If `true`, restores are `fsync`ed and every rename, create and delete
    /// is followed by an `fsync` of the parent directory.
    sync: bool,
}

impl MergeExecutor<StreamAppender> {
    /// Creates an executor using [`StreamAppender`].
    ///
    /// * `sync` - if true, aggregate appends and restores are `fsync`ed.
    pub fn new(sync: bool) -> Self {
        Self {
            appender: StreamAppender::new(sync),
            sync,
        }
    }
}

impl<A: Appender> MergeExecutor<A> {
    /// Creates an executor with a custom append step.
    pub fn with_appender(appender: A, sync: bool) -> Self {
        Self { appender, sync }
    }

    /// Folds a staging file left behind by an interrupted job into the
    /// aggregate.
    ///
    /// Returns `Ok(None)` when there is no staging file, or the number of
    /// bytes appended. A missing cache file (the job died between detach and
    /// recreate) is recreated empty.
    ///
    /// # Errors
    ///
    /// [`MergeError::Reconcile`] if the append fails; the staging file is
    /// left untouched so the next attempt can retry it.
    pub fn reconcile(&self, cache: &Path, aggregate: &Path) -> Result<Option<u64>, MergeError> {
        let staging = staging_path(cache);
        match fs::symlink_metadata(&staging) {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(MergeError::io(&staging, e)),
        }

        warn!(
            cache = %cache.display(),
            staging = %staging.display(),
            "found staging file from an interrupted merge, reconciling"
        );

        create_empty(cache).map_err(|e| MergeError::io(cache, e))?;

        let appended = self
            .appender
            .append(&staging, aggregate)
            .map_err(|AppendFailure { error, .. }| MergeError::Reconcile {
                staging: staging.clone(),
                source: error,
            })?;

        fs::remove_file(&staging).map_err(|e| MergeError::io(&staging, e))?;
        if self.sync {
            sync_parent_dir(cache);
        }
        Ok(Some(appended))
    }

    /// Moves every byte of `job.cache_path` onto the end of
    /// `job.aggregate_path`.
    ///
    /// # Steps
    ///
    /// 1. Reconcile a leftover staging file, then rename the cache file to
    ///    its staging path.
    /// 2. Recreate the cache file empty so producers can resume.
    /// 3. Append the staging file to the aggregate.
    /// 4. On append failure, fold the staging file back into the cache.
    /// 5. On success, delete the staging file.
    ///
    /// # Errors
    ///
    /// [`MergeError::NotFound`] if the cache file is gone,
    /// [`MergeError::PartialAppend`] if step 3 failed and step 4 succeeded,
    /// [`MergeError::Restore`] if both failed, [`MergeError::Reconcile`] if a
    /// leftover staging file could not be folded, and
    /// [`MergeError::Access`] / [`MergeError::Io`] for the remaining steps.
    pub fn merge(&self, job: &MergeJob) -> Result<MergeReport, MergeError> {
        let reconciled_bytes = self
            .reconcile(&job.cache_path, &job.aggregate_path)?
            .unwrap_or(0);

        // 1. detach from producers
        fs::rename(&job.cache_path, &job.staging_path)
            .map_err(|e| MergeError::io(&job.cache_path, e))?;
        let guard = StagingGuard::arm(&job.staging_path, &job.cache_path, self.sync);
        debug!(
            cache = %job.cache_path.display(),
            threshold = job.threshold,
            "detached cache file"
        );

        // 2. producers resume into a fresh file (dropping the guard on error restores)
        create_empty(&job.cache_path).map_err(|e| MergeError::io(&job.cache_path, e))?;
        if self.sync {
            sync_parent_dir(&job.cache_path);
        }

        // 3. append
        match self.appender.append(&job.staging_path, &job.aggregate_path) {
            Ok(bytes_moved) => {
                guard.release();
                // 5. cleanup
                fs::remove_file(&job.staging_path)
                    .map_err(|e| MergeError::io(&job.staging_path, e))?;
                if self.sync {
                    sync_parent_dir(&job.staging_path);
                }
                let aggregate_size = SizeProbe::size(&job.aggregate_path)?;
                Ok(MergeReport {
                    cache_path: job.cache_path.clone(),
                    aggregate_path: job.aggregate_path.clone(),
                    bytes_moved,
                    aggregate_size,
                    reconciled_bytes,
                })
            }
            // 4. restore
            Err(AppendFailure { written, error }) => match guard.restore() {
                Ok(()) => Err(MergeError::PartialAppend {
                    aggregate: job.aggregate_path.clone(),
                    bytes_written: written,
                    source: error,
                }),
                Err(restore) => Err(MergeError::Restore {
                    staging: job.staging_path.clone(),
                    append: error,
                    restore,
                }),
            },
        }
    }
}

/// Creates `path` if it does not exist. Never truncates: a file a producer
/// created in the meantime keeps its bytes.
fn create_empty(path: &Path) -> std::io::Result<()> {
    OpenOptions::new().create(true).append(true).open(path).map(drop)
}

/// Fsyncs the directory holding `path` so a rename, create or delete in it
/// survives power loss. A no-op where metadata is journaled (NTFS). Errors are
/// ignored.
pub(crate) fn sync_parent_dir(path: &Path) {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    if let Ok(dir) = std::fs::File::open(parent) {
        let _ = dir.sync_all();
    }
}
