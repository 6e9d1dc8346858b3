use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Errors that can occur while probing or merging one pair.
///
/// None of these mean data was lost. Each variant says where the bytes are.
#[derive(Debug, Error)]
pub enum MergeError {
    /// The path did not exist.
    #[error("{} does not exist", path.display())]
    NotFound { path: PathBuf },

    /// Permission denied on one of the protocol steps.
    #[error("permission denied on {}: {source}", path.display())]
    Access {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The append to the aggregate failed and the staging bytes were folded
    /// back into the cache file. Up to `bytes_written` bytes may now appear
    /// twice in the aggregate once the next merge succeeds.
    #[error(
        "append to {} failed after {bytes_written} bytes, cache restored: {source}",
        aggregate.display()
    )]
    PartialAppend {
        aggregate: PathBuf,
        bytes_written: u64,
        #[source]
        source: io::Error,
    },

    /// The append failed and so did the restore. The data is intact in the
    /// staging file and is picked up by the next reconciliation.
    #[error(
        "append failed ({append}) and restore failed ({restore}); data kept in {}",
        staging.display()
    )]
    Restore {
        staging: PathBuf,
        append: io::Error,
        restore: io::Error,
    },

    /// A staging file left by an interrupted job could not be appended to the
    /// aggregate, so no new job was started for this cache path.
    #[error("could not reconcile leftover {}: {source}", staging.display())]
    Reconcile {
        staging: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Any other I/O failure.
    #[error("io error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl MergeError {
    /// Classifies an I/O error raised while operating on `path`.
    pub fn io<P: AsRef<Path>>(path: P, source: io::Error) -> Self {
        let path = path.as_ref().to_path_buf();
        match source.kind() {
            io::ErrorKind::NotFound => MergeError::NotFound { path },
            io::ErrorKind::PermissionDenied => MergeError::Access { path, source },
            _ => MergeError::Io { path, source },
        }
    }

    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, MergeError::NotFound { .. })
    }
}
