/// Per-job recovery state for the window between detach and cleanup.
///
/// While a [`StagingGuard`] is armed, the staging file holds bytes that are
/// not yet safely in the aggregate. Dropping an armed guard (an early return
/// or a panic unwinding through the job) folds the staging file back into
/// the cache. This is a fast path only: a process that dies without
/// unwinding leaves the staging file behind, and the next reconciliation
/// appends it to the aggregate.
use std::fs::{File, OpenOptions};
use std::io;
use std::path::Path;
use tracing::{debug, error, warn};

use crate::executor::sync_parent_dir;

pub(crate) struct StagingGuard<'a> {
    staging: &'a Path,
    cache: &'a Path,
    sync: bool,
    armed: bool,
}

impl<'a> StagingGuard<'a> {
    pub(crate) fn arm(staging: &'a Path, cache: &'a Path, sync: bool) -> Self {
        Self {
            staging,
            cache,
            sync,
            armed: true,
        }
    }

    /// The staging bytes are safe elsewhere; nothing to undo.
    pub(crate) fn release(mut self) {
        self.armed = false;
    }

    /// Folds the staging file back into the cache now and reports the result.
    pub(crate) fn restore(mut self) -> io::Result<()> {
        self.armed = false;
        restore_staging(self.staging, self.cache, self.sync)
    }
}

impl Drop for StagingGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        match restore_staging(self.staging, self.cache, self.sync) {
            Ok(()) => warn!(
                cache = %self.cache.display(),
                "merge interrupted, staging file restored into cache"
            ),
            Err(e) => error!(
                cache = %self.cache.display(),
                staging = %self.staging.display(),
                error = %e,
                "merge interrupted and restore failed, staging file left for reconciliation"
            ),
        }
    }
}

/// Puts the staging bytes back in front of the current cache contents.
///
/// The current cache bytes (whatever producers wrote since the detach) are
/// appended to the staging file, then the staging file is renamed over the
/// cache. The old cache stays open across the rename, and anything
/// producers added to it after the copy is drained onto the restored file.
///
/// An interruption at any point can duplicate bytes but not lose them. A
/// concurrent producer can still lose a write that lands on the old cache
/// after the final drain.
pub(crate) fn restore_staging(staging: &Path, cache: &Path, sync: bool) -> io::Result<()> {
    restore_staging_with(staging, cache, sync, || {})
}

/// [`restore_staging`] with a callback run just before the rename.
pub(crate) fn restore_staging_with<F: FnOnce()>(
    staging: &Path,
    cache: &Path,
    sync: bool,
    before_rename: F,
) -> io::Result<()> {
    let mut out = OpenOptions::new().append(true).open(staging)?;
    let mut current = match File::open(cache) {
        Ok(file) => Some(file),
        Err(e) if e.kind() == io::ErrorKind::NotFound => None,
        Err(e) => return Err(e),
    };
    if let Some(file) = current.as_mut() {
        io::copy(file, &mut out)?;
    }
    if sync {
        out.sync_all()?;
    }
    drop(out);

    before_rename();
    std::fs::rename(staging, cache)?;

    // the read position of `current` sits at the end of what was copied
    if let Some(mut old) = current {
        let mut restored = OpenOptions::new().append(true).open(cache)?;
        let tail = io::copy(&mut old, &mut restored)?;
        if tail > 0 {
            debug!(cache = %cache.display(), bytes = tail, "drained late cache writes after restore");
        }
        if sync {
            restored.sync_all()?;
        }
    }
    if sync {
        sync_parent_dir(cache);
    }
    Ok(())
}
