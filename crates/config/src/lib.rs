//! # Config - Coalesce runtime settings
//!
//! Everything the merger needs to know before it starts: which cache file
//! feeds which aggregate file, how large a cache file may grow before it is
//! rolled, and how often the roll check runs.
//!
//! All validation happens here, once, at startup. A [`Config`] that was
//! successfully constructed is always usable by the engine; every error in
//! this crate is fatal to the process and never seen at runtime.
//!
//! ## Mapping file
//!
//! The file pair mapping is a flat JSON object from cache path to aggregate
//! path:
//!
//! ```json
//! {
//!   "/var/log/app/shard-0.log": "/var/archive/app.log",
//!   "/var/log/app/shard-1.log": "/var/archive/app.log"
//! }
//! ```
//!
//! Several cache files may feed the same aggregate. See [`FilePairMapping`]
//! for the rules a mapping must satisfy.
//!
//! ## Example
//!
//! ```rust,no_run
//! use config::{Config, FilePairMapping, parse_size, DEFAULT_INTERVAL_SECS};
//!
//! let pairs = FilePairMapping::load("pairs.json").unwrap();
//! let threshold = parse_size("512mb").unwrap();
//! let cfg = Config::new(pairs, threshold, DEFAULT_INTERVAL_SECS, false).unwrap();
//! assert_eq!(cfg.threshold, 512 * 1024 * 1024);
//! ```

mod error;
mod mapping;
mod size;

pub use error::ConfigError;
pub use mapping::{staging_path, FilePairMapping, STAGING_SUFFIX};
pub use size::{format_size, parse_size};

use std::time::Duration;

/// Default roll-check interval: once a day.
pub const DEFAULT_INTERVAL_SECS: u64 = 60 * 60 * 24;

/// Default threshold, in the same notation accepted by [`parse_size`].
pub const DEFAULT_MAX_SIZE: &str = "1gb";

/// [`DEFAULT_MAX_SIZE`] in bytes.
pub const DEFAULT_THRESHOLD: u64 = 1024 * 1024 * 1024;

/// Fully validated runtime configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Cache file -> aggregate file pairs.
    pub pairs: FilePairMapping,
    /// A cache file at or above this many bytes is merged.
    pub threshold: u64,
    /// Time between two roll checks.
    pub interval: Duration,
    /// If `true`, every append to an aggregate is followed by `fsync`.
    pub sync: bool,
}

impl Config {
    /// Builds a configuration, rejecting a zero threshold or interval.
    ///
    /// # Errors
    ///
    /// [`ConfigError::InvalidThreshold`] if `threshold == 0`,
    /// [`ConfigError::InvalidInterval`] if `interval_secs == 0`.
    pub fn new(
        pairs: FilePairMapping,
        threshold: u64,
        interval_secs: u64,
        sync: bool,
    ) -> Result<Self, ConfigError> {
        if threshold == 0 {
            return Err(ConfigError::InvalidThreshold);
        }
        if interval_secs == 0 {
            return Err(ConfigError::InvalidInterval);
        }
        Ok(Self {
            pairs,
            threshold,
            interval: Duration::from_secs(interval_secs),
            sync,
        })
    }
}
