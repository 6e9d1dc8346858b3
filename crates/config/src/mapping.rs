/// # File pair mapping
///
/// The fixed cache -> aggregate table the merger works through on every
/// tick. Built once at startup and read-only afterwards.
///
/// ## Rules
///
/// - at least one pair;
/// - a cache path appears once (duplicate JSON keys are rejected rather than
///   silently resolved last-wins);
/// - a cache path is never its own aggregate and never another pair's
///   aggregate;
/// - no configured path collides with a staging path (`<cache>.tmp`), which
///   the merger owns exclusively.
///
/// Paths are compared as written. The files do not need to exist yet.
use serde::de::{Deserializer, MapAccess, Visitor};
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::ConfigError;

/// Suffix appended to a cache path to form its staging path.
pub const STAGING_SUFFIX: &str = ".tmp";

/// Returns the staging path for `cache`: the same path with
/// [`STAGING_SUFFIX`] appended (`a.log` -> `a.log.tmp`).
#[must_use]
pub fn staging_path(cache: &Path) -> PathBuf {
    let mut name: OsString = cache.as_os_str().to_owned();
    name.push(STAGING_SUFFIX);
    PathBuf::from(name)
}

/// Immutable cache path -> aggregate path mapping.
///
/// Iteration order is the sorted order of cache paths, which keeps logs and
/// reports deterministic. Nothing in the merge protocol depends on it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilePairMapping {
    pairs: BTreeMap<PathBuf, PathBuf>,
}

impl FilePairMapping {
    /// Builds and validates a mapping from `(cache, aggregate)` pairs.
    ///
    /// # Errors
    ///
    /// [`ConfigError::EmptyMapping`] when `pairs` is empty,
    /// [`ConfigError::InvalidPair`] when any rule in the module docs is
    /// violated.
    pub fn new<I, C, A>(pairs: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (C, A)>,
        C: Into<PathBuf>,
        A: Into<PathBuf>,
    {
        let mut map = BTreeMap::new();
        for (cache, aggregate) in pairs {
            let cache = cache.into();
            let aggregate = aggregate.into();
            if map.contains_key(&cache) {
                return Err(invalid(&cache, "cache file is listed more than once"));
            }
            map.insert(cache, aggregate);
        }

        if map.is_empty() {
            return Err(ConfigError::EmptyMapping);
        }

        let aggregates: BTreeSet<&PathBuf> = map.values().collect();
        for (cache, aggregate) in &map {
            if cache.as_os_str().is_empty() {
                return Err(invalid(cache, "cache path is empty"));
            }
            if aggregate.as_os_str().is_empty() {
                return Err(invalid(cache, "aggregate path is empty"));
            }
            if cache == aggregate {
                return Err(invalid(cache, "cache file cannot be its own aggregate"));
            }
            if aggregates.contains(cache) {
                return Err(invalid(cache, "cache file is also used as an aggregate"));
            }
            let staging = staging_path(cache);
            if map.contains_key(&staging) || aggregates.contains(&staging) {
                return Err(invalid(
                    cache,
                    &format!("staging path {} is already configured", staging.display()),
                ));
            }
        }

        Ok(Self { pairs: map })
    }

    /// Reads and validates a JSON mapping file.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Read`] if the file cannot be read,
    /// [`ConfigError::Parse`] if it is not a JSON object of strings, plus
    /// everything [`FilePairMapping::new`] rejects.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text, &path.display().to_string())
    }

    /// Parses and validates a JSON mapping held in memory.
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        Self::parse(text, "<inline>")
    }

    fn parse(text: &str, origin: &str) -> Result<Self, ConfigError> {
        let PairList(pairs) =
            serde_json::from_str(text).map_err(|source| ConfigError::Parse {
                origin: origin.to_string(),
                source,
            })?;
        Self::new(pairs)
    }

    /// Number of pairs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    /// Always `false` for a validated mapping; provided for API symmetry.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Looks up the aggregate configured for `cache`.
    #[must_use]
    pub fn aggregate_for(&self, cache: &Path) -> Option<&Path> {
        self.pairs.get(cache).map(PathBuf::as_path)
    }

    /// Iterates `(cache, aggregate)` pairs in cache path order.
    pub fn iter(&self) -> impl Iterator<Item = (&Path, &Path)> {
        self.pairs.iter().map(|(c, a)| (c.as_path(), a.as_path()))
    }
}

fn invalid(cache: &Path, reason: &str) -> ConfigError {
    ConfigError::InvalidPair {
        cache: cache.to_path_buf(),
        reason: reason.to_string(),
    }
}

/// JSON object decoded in document order, keeping duplicate keys so that
/// [`FilePairMapping::new`] can reject them.
struct PairList(Vec<(String, String)>);

impl<'de> Deserialize<'de> for PairList {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct PairVisitor;

        impl<'de> Visitor<'de> for PairVisitor {
            type Value = PairList;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("an object mapping cache file paths to aggregate file paths")
            }

            fn visit_map<M: MapAccess<'de>>(self, mut access: M) -> Result<PairList, M::Error> {
                let mut pairs = Vec::with_capacity(access.size_hint().unwrap_or(0));
                while let Some((cache, aggregate)) = access.next_entry::<String, String>()? {
                    pairs.push((cache, aggregate));
                }
                Ok(PairList(pairs))
            }
        }

        deserializer.deserialize_map(PairVisitor)
    }
}
