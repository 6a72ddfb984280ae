//! Configuration file handling.
//!
//! This module provides loading and saving of apkscan configuration
//! from a TOML file.
//!
//! # Configuration Location
//!
//! The configuration file is stored at:
//! - Linux: `~/.config/apkscan/config.toml`
//! - macOS: `~/Library/Application Support/apkscan/config.toml`
//! - Windows: `%APPDATA%\apkscan\config.toml`
//!
//! # Example Configuration
//!
//! ```toml
//! max_archive_size_mb = 500
//! timeout_seconds = 300
//! workers = 0
//! default_format = "table"
//! rules_file = "/etc/apkscan/rules.toml"
//!
//! [ignore]
//! patterns = ["INSECURE_HTTP"]
//! paths = ["assets/vendor/*"]
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use crate::archive::{ArchiveLimits, ExtractOptions};

const MIB: u64 = 1024 * 1024;

/// Application configuration.
///
/// # Example
///
/// ```no_run
/// use apkscan::Config;
///
/// // Load from file (or use defaults if file doesn't exist)
/// let config = Config::load().unwrap();
///
/// println!("Timeout: {}s", config.timeout_seconds);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Archives larger than this are rejected before extraction.
    ///
    /// Default: 500 MiB
    pub max_archive_size_mb: u64,

    /// Limit on the declared uncompressed size of all entries combined.
    ///
    /// Default: 2048 MiB
    pub max_uncompressed_size_mb: u64,

    /// Entries larger than this are skipped with an informational finding.
    ///
    /// Default: 64 MiB
    pub max_entry_size_mb: u64,

    /// Scan deadline. Partial results are returned when it expires.
    ///
    /// Default: 300
    pub timeout_seconds: u64,

    /// Content-scan worker count. 0 uses the available parallelism.
    pub workers: usize,

    /// Upper bound on the score bonus earned from protections, clamped to [30, 50].
    pub protection_bonus_cap: f64,

    /// Longest `matched_text` excerpt kept per finding, in characters.
    pub max_match_length: usize,

    /// Write scannable entries to a temporary directory instead of holding them in memory.
    pub extract_to_disk: bool,

    /// How long cached results stay valid, in hours.
    ///
    /// Default: 24 hours
    pub cache_ttl_hours: u64,

    /// Default output format when no `--format` flag is provided.
    ///
    /// Valid values: "table", "json", "sarif"
    /// Default: "table"
    pub default_format: String,

    /// Optional TOML file of extra `[[pattern]]` rules merged over the built-ins.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rules_file: Option<PathBuf>,

    /// Ignore list configuration for suppressing known noise.
    #[serde(default)]
    pub ignore: IgnoreConfig,
}

/// Patterns and archive paths to leave out of every scan.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IgnoreConfig {
    /// Pattern IDs to disable (e.g., "INSECURE_HTTP").
    pub patterns: Vec<String>,

    /// Entry paths inside the archive to skip. Supports `*` wildcards
    /// (e.g., "assets/vendor/*", "*.min.js").
    pub paths: Vec<String>,
}

/// Simple glob matching (supports * as wildcard).
pub fn glob_match(pattern: &str, text: &str) -> bool {
    let parts: Vec<&str> = pattern.split('*').collect();

    if parts.len() == 1 {
        return pattern == text;
    }

    let mut remaining = text;

    if !parts[0].is_empty() {
        if !remaining.starts_with(parts[0]) {
            return false;
        }
        remaining = &remaining[parts[0].len()..];
    }

    let last_part = parts[parts.len() - 1];
    if !last_part.is_empty() {
        if !remaining.ends_with(last_part) {
            return false;
        }
        remaining = &remaining[..remaining.len() - last_part.len()];
    }

    for part in &parts[1..parts.len() - 1] {
        if part.is_empty() {
            continue;
        }
        if let Some(pos) = remaining.find(part) {
            remaining = &remaining[pos + part.len()..];
        } else {
            return false;
        }
    }

    true
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_archive_size_mb: 500,
            max_uncompressed_size_mb: 2048,
            max_entry_size_mb: 64,
            timeout_seconds: 300,
            workers: 0,
            protection_bonus_cap: 30.0,
            max_match_length: 200,
            extract_to_disk: true,
            cache_ttl_hours: 24,
            default_format: "table".to_string(),
            rules_file: None,
            ignore: IgnoreConfig::default(),
        }
    }
}

impl Config {
    /// Loads configuration from the config file.
    ///
    /// If the config file doesn't exist, returns default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be read or parsed.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path())
    }

    pub fn load_from(path: &std::path::Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config {}", path.display()))?;
        Ok(config)
    }

    /// Saves the configuration to the config file.
    ///
    /// Creates the parent directory if it doesn't exist.
    pub fn save(&self) -> Result<()> {
        let path = Self::config_path();

        if let Some(parent) = path.parent() {
            if !parent.exists() {
                fs::create_dir_all(parent)?;
            }
        }

        let content = toml::to_string_pretty(self)?;
        fs::write(&path, content)?;
        Ok(())
    }

    /// Returns the path to the configuration file.
    ///
    /// # Example
    ///
    /// ```
    /// use apkscan::Config;
    ///
    /// let path = Config::config_path();
    /// println!("Config file: {}", path.display());
    /// ```
    pub fn config_path() -> PathBuf {
        crate::platform::config_dir().join("config.toml")
    }

    /// Generates a string containing the default configuration.
    pub fn generate_default_config() -> String {
        let config = Config::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

/// The engine's view of the configuration.
#[derive(Debug, Clone)]
pub struct ScanSettings {
    pub extract: ExtractOptions,
    pub timeout: Duration,
    pub workers: usize,
    pub protection_bonus_cap: f64,
    pub max_match_length: usize,
}

impl ScanSettings {
    pub fn effective_workers(&self) -> usize {
        if self.workers > 0 {
            self.workers
        } else {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4)
        }
    }

    /// Hex SHA-256 over every setting that can change a finished result:
    /// the archive limits, skipped paths, bonus cap and excerpt length.
    pub fn fingerprint(&self) -> String {
        let limits = &self.extract.limits;
        let mut hasher = Sha256::new();
        hasher.update(limits.max_archive_bytes.to_le_bytes());
        hasher.update(limits.max_uncompressed_bytes.to_le_bytes());
        hasher.update(limits.max_entry_bytes.to_le_bytes());
        for path in &self.extract.skip_paths {
            hasher.update(path.as_bytes());
            hasher.update([0]);
        }
        hasher.update([0xff]);
        hasher.update(self.protection_bonus_cap.to_bits().to_le_bytes());
        hasher.update((self.max_match_length as u64).to_le_bytes());
        format!("{:x}", hasher.finalize())
    }
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for ScanSettings {
    fn from(config: &Config) -> Self {
        Self {
            extract: ExtractOptions {
                limits: ArchiveLimits {
                    max_archive_bytes: config.max_archive_size_mb.saturating_mul(MIB),
                    max_uncompressed_bytes: config.max_uncompressed_size_mb.saturating_mul(MIB),
                    max_entry_bytes: config.max_entry_size_mb.saturating_mul(MIB),
                },
                extract_to_disk: config.extract_to_disk,
                skip_paths: config.ignore.paths.clone(),
            },
            timeout: Duration::from_secs(config.timeout_seconds.max(1)),
            workers: config.workers,
            protection_bonus_cap: config.protection_bonus_cap.clamp(30.0, 50.0),
            max_match_length: config.max_match_length.max(16),
        }
    }
}
