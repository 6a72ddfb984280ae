use serde::{Deserialize, Serialize};

/// How the manifest was stored in the archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ManifestFormat {
    Text,
    Binary,
    #[default]
    Missing,
}

impl std::fmt::Display for ManifestFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ManifestFormat::Text => "text",
            ManifestFormat::Binary => "binary",
            ManifestFormat::Missing => "missing",
        };
        write!(f, "{}", s)
    }
}

/// Security-relevant flags declared by the manifest.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestFlags {
    pub debuggable: bool,
    pub allow_backup: bool,
    pub uses_cleartext_traffic: bool,
    /// Components declared with `android:exported="true"`.
    pub exported_components: Vec<String>,
}

/// A signature block found under `META-INF/`. The certificate itself is
/// not parsed; the digest identifies it across builds.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SigningBlock {
    pub path: String,
    /// `RSA`, `DSA` or `EC`, taken from the file extension.
    pub algorithm: String,
    pub size: u64,
    pub sha256: String,
}

/// Archive and manifest metadata, serialized as `apk_info`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PackageInfo {
    pub file_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub package_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_sdk: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_sdk: Option<u32>,
    pub permissions: Vec<String>,
    pub activities: Vec<String>,
    pub services: Vec<String>,
    pub receivers: Vec<String>,
    pub providers: Vec<String>,
    pub native_architectures: Vec<String>,
    pub native_libraries: Vec<String>,
    pub bytecode_files: Vec<String>,
    pub asset_count: usize,
    pub resource_count: usize,
    pub entry_count: usize,
    pub file_size: u64,
    pub uncompressed_size: u64,
    /// Sum of compressed entry sizes from the central directory.
    pub compressed_size: u64,
    /// `compressed_size / uncompressed_size`, three decimals. 0 for an empty archive.
    pub compression_ratio: f64,
    /// Uncompressed size of every `.dex` entry.
    pub total_dex_size: u64,
    /// Uncompressed size of every `.so` entry.
    pub native_code_size: u64,
    pub md5: String,
    pub sha1: String,
    pub sha256: String,
    pub signing_blocks: Vec<SigningBlock>,
    pub manifest_format: ManifestFormat,
    pub flags: ManifestFlags,
}

impl PackageInfo {
    /// Display name: the declared package id, falling back to the file name.
    pub fn display_name(&self) -> &str {
        self.package_name.as_deref().unwrap_or(&self.file_name)
    }

    pub fn short_hash(&self) -> &str {
        let end = self.sha256.len().min(12);
        &self.sha256[..end]
    }

    /// Bytecode plus native code, uncompressed.
    pub fn code_size(&self) -> u64 {
        self.total_dex_size + self.native_code_size
    }

    pub fn is_signed(&self) -> bool {
        !self.signing_blocks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_name_fallback() {
        let mut info = PackageInfo {
            file_name: "app.apk".to_string(),
            ..Default::default()
        };
        assert_eq!(info.display_name(), "app.apk");

        info.package_name = Some("com.example.app".to_string());
        assert_eq!(info.display_name(), "com.example.app");
    }

    #[test]
    fn test_code_size_and_signing() {
        let info = PackageInfo {
            total_dex_size: 4096,
            native_code_size: 1024,
            signing_blocks: vec![SigningBlock {
                path: "META-INF/CERT.RSA".to_string(),
                algorithm: "RSA".to_string(),
                ..Default::default()
            }],
            ..Default::default()
        };
        assert_eq!(info.code_size(), 5120);
        assert!(info.is_signed());
        assert!(!PackageInfo::default().is_signed());
    }

    #[test]
    fn test_manifest_format_serializes_lowercase() {
        let json = serde_json::to_string(&ManifestFormat::Binary).unwrap();
        assert_eq!(json, "\"binary\"");
        assert_eq!(ManifestFormat::default(), ManifestFormat::Missing);
    }
}
