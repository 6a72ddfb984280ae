//! Error types for the analysis engine.
//!
//! Only the variants of [`ScanError`] terminate a scan. Everything else that
//! can go wrong while scanning (an unreadable entry, a malformed rule, an
//! expired deadline) is recovered where it happens and shows up in the result
//! as an informational finding or a flag.

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Shared `Result` alias for engine operations.
pub type Result<T> = std::result::Result<T, ScanError>;

/// Fatal scan failures. Each variant carries a stable reason code.
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("[APK-1001] not a valid archive: {reason}")]
    InvalidFormat { reason: String },

    #[error("[APK-1002] archive entry escapes the extraction root: {entry}")]
    UnsafePath { entry: String },

    #[error("[APK-1003] archive too large: {size} bytes (max: {max})")]
    FileTooLarge { size: u64, max: u64 },

    #[error("[APK-1004] cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("[APK-1900] internal failure: {details}")]
    Internal { details: String },
}

impl ScanError {
    /// Stable machine-parseable reason code.
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidFormat { .. } => "APK-1001",
            Self::UnsafePath { .. } => "APK-1002",
            Self::FileTooLarge { .. } => "APK-1003",
            Self::Io { .. } => "APK-1004",
            Self::Internal { .. } => "APK-1900",
        }
    }

    /// Whether the archive itself was rejected (as opposed to an environment failure).
    pub const fn is_fatal_archive(&self) -> bool {
        matches!(
            self,
            Self::InvalidFormat { .. } | Self::UnsafePath { .. } | Self::FileTooLarge { .. }
        )
    }

    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    pub fn invalid_format(reason: impl Into<String>) -> Self {
        Self::InvalidFormat {
            reason: reason.into(),
        }
    }
}

impl From<zip::result::ZipError> for ScanError {
    fn from(value: zip::result::ZipError) -> Self {
        Self::InvalidFormat {
            reason: value.to_string(),
        }
    }
}

/// Catalog lookup and rules-file failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CatalogError {
    #[error("pattern not found: {0}")]
    NotFound(String),

    #[error("cannot load rules file {path}: {reason}")]
    Rules { path: PathBuf, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_stable() {
        assert_eq!(ScanError::invalid_format("x").code(), "APK-1001");
        assert_eq!(
            ScanError::UnsafePath {
                entry: "../evil".to_string()
            }
            .code(),
            "APK-1002"
        );
        assert_eq!(ScanError::FileTooLarge { size: 2, max: 1 }.code(), "APK-1003");
    }

    #[test]
    fn test_message_carries_code() {
        let err = ScanError::FileTooLarge { size: 10, max: 5 };
        assert!(err.to_string().starts_with("[APK-1003]"));
        assert!(err.is_fatal_archive());

        let err = ScanError::Internal {
            details: "worker panicked".to_string(),
        };
        assert!(!err.is_fatal_archive());
    }
}
