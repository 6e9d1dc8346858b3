/// The append step of the protocol, behind a trait so the merge executor
/// can be driven with injected faults.
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::Path;

use crate::executor::sync_parent_dir;

/// Chunk size used when streaming a staging file into an aggregate.
const COPY_CHUNK: usize = 64 * 1024;

/// A failed append. `written` counts the bytes that reached the destination
/// before the failure; they are not rolled back.
#[derive(Debug)]
pub struct AppendFailure {
    pub written: u64,
    pub error: io::Error,
}

impl AppendFailure {
    fn before_write(error: io::Error) -> Self {
        Self { written: 0, error }
    }
}

/// Appends the whole of one file to the end of another.
///
/// Implementations must open `dest` in append mode (creating it if absent)
/// and must never truncate it.
pub trait Appender: Send + Sync {
    /// Streams all of `source` onto the end of `dest` and returns the number
    /// of bytes appended.
    fn append(&self, source: &Path, dest: &Path) -> Result<u64, AppendFailure>;
}

/// Default [`Appender`]: a chunked copy with optional `fsync`.
#[derive(Debug, Clone, Copy)]
pub struct StreamAppender {
    sync: bool,
}

impl StreamAppender {
    /// * `sync` - if true, the destination is `fsync`ed before `append`
    ///   returns.
    pub fn new(sync: bool) -> Self {
        Self { sync }
    }
}

impl Appender for StreamAppender {
    fn append(&self, source: &Path, dest: &Path) -> Result<u64, AppendFailure> {
        let mut src = File::open(source).map_err(AppendFailure::before_write)?;
        let mut out = OpenOptions::new()
            .create(true)
            .append(true)
            .open(dest)
            .map_err(AppendFailure::before_write)?;

        let mut buf = vec![0u8; COPY_CHUNK];
        let mut written = 0u64;
        loop {
            let n = match src.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(error) => return Err(AppendFailure { written, error }),
            };
            out.write_all(&buf[..n])
                .map_err(|error| AppendFailure { written, error })?;
            written += n as u64;
        }

        out.flush().map_err(|error| AppendFailure { written, error })?;
        if self.sync {
            out.sync_all()
                .map_err(|error| AppendFailure { written, error })?;
            // the aggregate may have just been created
            sync_parent_dir(dest);
        }
        Ok(written)
    }
}
