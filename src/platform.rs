//! Cross-platform path resolution.
//!
//! Every location falls back to a fixed path when the platform directory
//! cannot be determined, so callers never have to handle `None`.

use std::path::PathBuf;

/// Returns the path to the apkscan cache directory.
///
/// - Linux: `~/.cache/apkscan/`
/// - macOS: `~/Library/Caches/apkscan/`
/// - Windows: `%LOCALAPPDATA%\apkscan\`
pub fn cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("apkscan")
}

/// Returns the directory holding `config.toml`.
pub fn config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("apkscan")
}

/// Default destination for `--report-dir` when none is given explicitly.
pub fn reports_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("apkscan")
        .join("reports")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dirs_are_namespaced() {
        assert!(cache_dir().ends_with("apkscan"));
        assert!(config_dir().ends_with("apkscan"));
        assert!(reports_dir().ends_with("apkscan/reports"));
    }
}
