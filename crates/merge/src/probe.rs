use std::path::Path;

use crate::MergeError;

/// Reads file sizes. Has no side effects; used only to decide whether a
/// cache file is due for a merge.
#[derive(Debug, Clone, Copy, Default)]
pub struct SizeProbe;

impl SizeProbe {
    /// Returns the current size of `path` in bytes.
    ///
    /// # Errors
    ///
    /// [`MergeError::NotFound`] if the path does not exist,
    /// [`MergeError::Access`] on permission failure, [`MergeError::Io`]
    /// otherwise.
    pub fn size<P: AsRef<Path>>(path: P) -> Result<u64, MergeError> {
        let path = path.as_ref();
        std::fs::metadata(path)
            .map(|m| m.len())
            .map_err(|e| MergeError::io(path, e))
    }

    /// `true` when the file holds at least `threshold` bytes. A file exactly
    /// at the threshold is due.
    pub fn at_or_above<P: AsRef<Path>>(path: P, threshold: u64) -> Result<bool, MergeError> {
        Ok(Self::size(path)? >= threshold)
    }
}
