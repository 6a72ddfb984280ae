//! File-based cache for analysis results.
//!
//! Results are keyed by the archive's SHA-256 plus prefixes of the pattern
//! catalog fingerprint and the scan settings fingerprint, so changing the
//! rules or the limits invalidates old entries.
//!
//! # Cache Location
//!
//! - Linux: `~/.cache/apkscan/`
//! - macOS: `~/Library/Caches/apkscan/`
//! - Windows: `%LOCALAPPDATA%\apkscan\`
//!
//! # Example
//!
//! ```no_run
//! use apkscan::Cache;
//!
//! let cache = Cache::new();
//! let key = Cache::analysis_key("9f86d081884c7d65", "2c26b46b68ffc68f", "fcde2b2edba56bf4");
//! cache.set(&key, &"cached value".to_string()).unwrap();
//!
//! let value: Option<String> = cache.get(&key);
//! assert_eq!(value, Some("cached value".to_string()));
//! ```

use anyhow::Result;
use serde::{de::DeserializeOwned, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::{Duration, SystemTime};

use crate::platform::cache_dir;

/// Default cache TTL in hours.
const CACHE_TTL_HOURS: u64 = 24;

/// Fingerprint characters kept in the key.
const FINGERPRINT_PREFIX: usize = 16;

fn prefix(fingerprint: &str) -> &str {
    fingerprint
        .char_indices()
        .nth(FINGERPRINT_PREFIX)
        .map_or(fingerprint, |(end, _)| &fingerprint[..end])
}

/// A file-based cache with TTL support.
///
/// Values are stored as JSON files in the cache directory. Each entry
/// expires after the configured TTL period.
pub struct Cache {
    dir: PathBuf,
    ttl: Duration,
}

impl Cache {
    /// Creates a new cache with the default 24-hour TTL.
    pub fn new() -> Self {
        Self::with_ttl_hours(CACHE_TTL_HOURS)
    }

    pub fn with_ttl_hours(hours: u64) -> Self {
        Self::in_dir(cache_dir(), Duration::from_secs(hours * 3600))
    }

    pub fn in_dir(dir: impl Into<PathBuf>, ttl: Duration) -> Self {
        Self {
            dir: dir.into(),
            ttl,
        }
    }

    /// `analysis_<sha256>_<catalog prefix>_<settings prefix>`
    pub fn analysis_key(sha256: &str, catalog_fingerprint: &str, settings_fingerprint: &str) -> String {
        format!(
            "analysis_{}_{}_{}",
            sha256,
            prefix(catalog_fingerprint),
            prefix(settings_fingerprint)
        )
    }

    fn ensure_dir(&self) -> Result<()> {
        if !self.dir.exists() {
            fs::create_dir_all(&self.dir)?;
        }
        Ok(())
    }

    /// Converts a cache key to a safe filename.
    fn cache_path(&self, key: &str) -> PathBuf {
        let safe_key: String = key
            .chars()
            .map(|c| {
                if c.is_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.dir.join(format!("{}.json", safe_key))
    }

    /// Retrieves a value from the cache.
    ///
    /// Returns `None` if the key doesn't exist, has expired, or no longer
    /// deserializes into `T`.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let path = self.cache_path(key);

        if !path.exists() {
            return None;
        }

        if let Ok(modified) = fs::metadata(&path).and_then(|m| m.modified()) {
            if let Ok(elapsed) = SystemTime::now().duration_since(modified) {
                if elapsed > self.ttl {
                    let _ = fs::remove_file(&path);
                    return None;
                }
            }
        }

        let content = fs::read_to_string(&path).ok()?;
        serde_json::from_str(&content).ok()
    }

    pub fn set<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        self.ensure_dir()?;
        let path = self.cache_path(key);
        let content = serde_json::to_string(value)?;
        fs::write(&path, content)?;
        Ok(())
    }

    /// Removes every cached entry. Returns how many were removed.
    pub fn clear(&self) -> Result<usize> {
        let mut removed = 0;
        if self.dir.exists() {
            for entry in fs::read_dir(&self.dir)?.flatten() {
                let path = entry.path();
                if path.extension().is_some_and(|e| e == "json") && fs::remove_file(&path).is_ok() {
                    removed += 1;
                }
            }
        }
        Ok(removed)
    }
}

impl Default for Cache {
    fn default() -> Self {
        Self::new()
    }
}
