use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while building a [`crate::Config`].
///
/// Every variant is a startup error: the process reports it and exits.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The mapping file could not be read.
    #[error("failed to read config file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The mapping document is not a JSON object of string to string.
    #[error("invalid mapping in {origin}: {source}")]
    Parse {
        /// File path, or `<inline>` for mappings parsed from a string.
        origin: String,
        #[source]
        source: serde_json::Error,
    },

    /// The mapping has no pairs.
    #[error("no files configured, the mapping must contain at least one pair")]
    EmptyMapping,

    /// A pair violates one of the mapping rules.
    #[error("invalid pair for cache file {}: {reason}", cache.display())]
    InvalidPair { cache: PathBuf, reason: String },

    /// A human-readable size could not be parsed.
    #[error("invalid size {input:?}: {reason}")]
    InvalidSize { input: String, reason: String },

    #[error("interval must be greater than zero")]
    InvalidInterval,

    #[error("threshold must be greater than zero")]
    InvalidThreshold,
}
