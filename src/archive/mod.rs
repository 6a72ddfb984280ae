//! Archive validation, enumeration and extraction.
//!
//! [`extract`] is blocking and does all of its checks before a single entry
//! body is read: size from file metadata, the `PK` signature, the central
//! directory, the declared uncompressed total, and every entry name. Only then
//! are the manifest decoded and the scannable entries materialized.
//!
//! [`extract_cancellable`] checks a shared flag between hash blocks, manifest
//! chunks and entries, and hands back whatever it had when the flag was set.

pub mod axml;
pub mod manifest;

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use md5::Md5;
use sha1::Sha1;
use sha2::{Digest, Sha256};
use tempfile::TempDir;
use tracing::{debug, info, warn};

use crate::config::glob_match;
use crate::error::{Result, ScanError};
use crate::model::{notice, Finding, ManifestFormat, PackageInfo, SigningBlock};

pub const MANIFEST_PATH: &str = "AndroidManifest.xml";

const MIB: u64 = 1024 * 1024;

const HASH_BLOCK: usize = 64 * 1024;

/// Signature block extensions under `META-INF/`, with the key algorithm they imply.
const SIGNATURE_BLOCKS: &[(&str, &str)] = &[(".rsa", "RSA"), (".dsa", "DSA"), (".ec", "EC")];

/// Extensions whose content is scanned as text.
const TEXTUAL_EXTENSIONS: &[&str] = &[
    "xml",
    "json",
    "txt",
    "js",
    "html",
    "htm",
    "css",
    "properties",
    "cfg",
    "conf",
    "ini",
    "yml",
    "yaml",
    "smali",
    "java",
    "kt",
    "py",
    "c",
    "cpp",
    "h",
    "go",
    "rs",
    "mf",
    "sf",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArchiveLimits {
    pub max_archive_bytes: u64,
    pub max_uncompressed_bytes: u64,
    pub max_entry_bytes: u64,
}

impl Default for ArchiveLimits {
    fn default() -> Self {
        Self {
            max_archive_bytes: 500 * MIB,
            max_uncompressed_bytes: 2048 * MIB,
            max_entry_bytes: 64 * MIB,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryKind {
    Manifest,
    NativeLibrary,
    Bytecode,
    Asset,
    Resource,
    Other,
}

impl EntryKind {
    pub fn classify(path: &str) -> Self {
        let lower = path.to_ascii_lowercase();
        if path == MANIFEST_PATH {
            EntryKind::Manifest
        } else if lower.ends_with(".so") {
            EntryKind::NativeLibrary
        } else if lower.ends_with(".dex") || lower.ends_with(".smali") || lower.ends_with(".class")
        {
            EntryKind::Bytecode
        } else if lower.starts_with("assets/") {
            EntryKind::Asset
        } else if lower.starts_with("res/") || lower == "resources.arsc" {
            EntryKind::Resource
        } else {
            EntryKind::Other
        }
    }
}

/// One central-directory record. Not retained after extraction.
#[derive(Debug, Clone)]
pub struct ArchiveEntry {
    pub path: String,
    pub size_uncompressed: u64,
    pub size_compressed: u64,
    pub is_directory: bool,
    pub kind: EntryKind,
}

fn extension(path: &str) -> Option<String> {
    let name = path.rsplit('/').next()?;
    let (_, ext) = name.rsplit_once('.')?;
    Some(ext.to_ascii_lowercase())
}

pub fn is_textual(path: &str) -> bool {
    extension(path).is_some_and(|ext| TEXTUAL_EXTENSIONS.contains(&ext.as_str()))
}

/// Whether the content scanner looks at this entry at all.
fn is_scannable(entry: &ArchiveEntry) -> bool {
    match entry.kind {
        EntryKind::Manifest | EntryKind::NativeLibrary => false,
        EntryKind::Bytecode => true,
        EntryKind::Asset | EntryKind::Resource | EntryKind::Other => is_textual(&entry.path),
    }
}

/// Map an entry name to a path below `root`, or `None` if it would escape.
///
/// Backslashes are treated as separators so Windows-style names are checked
/// the same way on every platform.
pub fn sanitize_entry_path(name: &str, root: &Path) -> Option<PathBuf> {
    let normalized = name.replace('\\', "/");
    let bytes = normalized.as_bytes();
    if bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':' {
        return None;
    }

    let path = Path::new(&normalized);
    if path.is_absolute() {
        return None;
    }

    let mut result = root.to_path_buf();
    for component in path.components() {
        match component {
            Component::Normal(c) => result.push(c),
            Component::CurDir => {}
            Component::ParentDir | Component::Prefix(_) | Component::RootDir => return None,
        }
    }

    if !result.starts_with(root) {
        return None;
    }
    Some(result)
}

/// Where the scanner reads an entry's bytes from.
#[derive(Debug)]
pub enum EntrySource {
    Disk(PathBuf),
    Memory(Vec<u8>),
    /// Already-decoded text, e.g. the rendered binary manifest.
    Text(String),
}

/// An entry handed to the content scanner. Owns everything it needs.
#[derive(Debug)]
pub struct ScanTarget {
    pub path: String,
    pub kind: EntryKind,
    pub source: EntrySource,
}

impl ScanTarget {
    /// `.dex` and `.class` are binary containers; line numbers are meaningless there.
    pub fn line_oriented(&self) -> bool {
        let lower = self.path.to_ascii_lowercase();
        !(lower.ends_with(".dex") || lower.ends_with(".class"))
    }
}

#[derive(Debug, Clone)]
pub struct ExtractOptions {
    pub limits: ArchiveLimits,
    pub extract_to_disk: bool,
    /// Glob patterns of entry paths that are never scanned.
    pub skip_paths: Vec<String>,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            limits: ArchiveLimits::default(),
            extract_to_disk: true,
            skip_paths: Vec::new(),
        }
    }
}

/// Everything the rest of the pipeline needs from the archive.
///
/// The temporary directory, if any, lives exactly as long as this value.
#[derive(Debug)]
pub struct Extraction {
    pub info: PackageInfo,
    pub targets: Vec<ScanTarget>,
    pub notices: Vec<Finding>,
    /// Set when cancellation stopped extraction early; `targets` is then incomplete.
    pub cancelled: bool,
    workdir: Option<TempDir>,
}

impl Extraction {
    pub fn workdir(&self) -> Option<&Path> {
        self.workdir.as_ref().map(TempDir::path)
    }

    fn stopped(info: PackageInfo, targets: Vec<ScanTarget>, notices: Vec<Finding>) -> Self {
        Self {
            info,
            targets,
            notices,
            cancelled: true,
            workdir: None,
        }
    }

    /// Stand-in for an extraction that never reported back: file name and
    /// size only, no targets.
    pub fn unfinished(path: &Path) -> Self {
        Self {
            info: PackageInfo {
                file_name: file_name(path),
                file_size: std::fs::metadata(path).map(|m| m.len()).unwrap_or(0),
                ..Default::default()
            },
            targets: Vec::new(),
            notices: Vec::new(),
            cancelled: true,
            workdir: None,
        }
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn check_signature(path: &Path) -> Result<()> {
    let mut file = File::open(path).map_err(|e| ScanError::io(path, e))?;
    let mut magic = [0u8; 2];
    match file.read_exact(&mut magic) {
        Ok(()) if &magic == b"PK" => Ok(()),
        Ok(()) => Err(ScanError::invalid_format("missing PK signature")),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            Err(ScanError::invalid_format("file shorter than a ZIP header"))
        }
        Err(e) => Err(ScanError::io(path, e)),
    }
}

/// Size and signature checks that need no more than the first two bytes.
/// Returns the file size.
pub fn precheck(path: &Path, limits: &ArchiveLimits) -> Result<u64> {
    let size = std::fs::metadata(path).map_err(|e| ScanError::io(path, e))?.len();
    if size > limits.max_archive_bytes {
        return Err(ScanError::FileTooLarge {
            size,
            max: limits.max_archive_bytes,
        });
    }
    check_signature(path)?;
    Ok(size)
}

/// Hex SHA-256 of the whole file.
pub fn content_hash(path: &Path) -> Result<String> {
    let mut file = File::open(path).map_err(|e| ScanError::io(path, e))?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; HASH_BLOCK];
    loop {
        let n = file.read(&mut buf).map_err(|e| ScanError::io(path, e))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileDigests {
    pub md5: String,
    pub sha1: String,
    pub sha256: String,
}

/// MD5, SHA-1 and SHA-256 in one pass. `None` if cancelled part way.
pub fn file_digests(path: &Path, cancel: &AtomicBool) -> Result<Option<FileDigests>> {
    let mut file = File::open(path).map_err(|e| ScanError::io(path, e))?;
    let mut md5 = Md5::new();
    let mut sha1 = Sha1::new();
    let mut sha256 = Sha256::new();
    let mut buf = vec![0u8; HASH_BLOCK];
    loop {
        if cancel.load(Ordering::Relaxed) {
            return Ok(None);
        }
        let n = file.read(&mut buf).map_err(|e| ScanError::io(path, e))?;
        if n == 0 {
            break;
        }
        md5.update(&buf[..n]);
        sha1.update(&buf[..n]);
        sha256.update(&buf[..n]);
    }
    Ok(Some(FileDigests {
        md5: format!("{:x}", md5.finalize()),
        sha1: format!("{:x}", sha1.finalize()),
        sha256: format!("{:x}", sha256.finalize()),
    }))
}

/// Read an entry body, refusing to inflate past `limit` bytes.
fn read_entry<R: Read + std::io::Seek>(
    archive: &mut zip::ZipArchive<R>,
    index: usize,
    limit: u64,
) -> std::result::Result<Vec<u8>, String> {
    let file = archive.by_index(index).map_err(|e| e.to_string())?;
    let mut buf = Vec::with_capacity(file.size().min(limit) as usize);
    file.take(limit + 1)
        .read_to_end(&mut buf)
        .map_err(|e| e.to_string())?;
    if buf.len() as u64 > limit {
        return Err(format!("entry inflates past {} bytes", limit));
    }
    Ok(buf)
}

/// Central directory records, without reading any entry body.
fn enumerate<R: Read + std::io::Seek>(archive: &mut zip::ZipArchive<R>) -> Result<Vec<ArchiveEntry>> {
    let mut entries = Vec::with_capacity(archive.len());
    for i in 0..archive.len() {
        let file = archive.by_index_raw(i)?;
        let path = file.name().to_string();
        entries.push(ArchiveEntry {
            kind: EntryKind::classify(&path),
            size_uncompressed: file.size(),
            size_compressed: file.compressed_size(),
            is_directory: file.is_dir(),
            path,
        });
    }
    Ok(entries)
}

fn native_architecture(path: &str) -> Option<&str> {
    let mut parts = path.split('/');
    match (parts.next(), parts.next(), parts.next()) {
        (Some("lib"), Some(arch), Some(_)) if !arch.is_empty() => Some(arch),
        _ => None,
    }
}

fn signature_algorithm(path: &str) -> Option<&'static str> {
    let lower = path.to_ascii_lowercase();
    let name = lower.strip_prefix("meta-inf/")?;
    if name.contains('/') {
        return None;
    }
    SIGNATURE_BLOCKS
        .iter()
        .find(|(ext, _)| name.ends_with(ext))
        .map(|(_, algorithm)| *algorithm)
}

fn record_entry(info: &mut PackageInfo, entry: &ArchiveEntry) {
    if entry.is_directory {
        return;
    }
    info.entry_count += 1;
    info.compressed_size += entry.size_compressed;
    match entry.kind {
        EntryKind::NativeLibrary => {
            info.native_code_size += entry.size_uncompressed;
            info.native_libraries.push(entry.path.clone());
            if let Some(arch) = native_architecture(&entry.path) {
                if !info.native_architectures.iter().any(|a| a == arch) {
                    info.native_architectures.push(arch.to_string());
                }
            }
        }
        EntryKind::Bytecode => {
            if entry.path.to_ascii_lowercase().ends_with(".dex") {
                info.total_dex_size += entry.size_uncompressed;
            }
            info.bytecode_files.push(entry.path.clone());
        }
        EntryKind::Asset => info.asset_count += 1,
        EntryKind::Resource => info.resource_count += 1,
        EntryKind::Manifest | EntryKind::Other => {}
    }
}

/// Summarize every signature block under `META-INF/`.
fn load_signing_blocks<R: Read + std::io::Seek>(
    archive: &mut zip::ZipArchive<R>,
    entries: &[ArchiveEntry],
    limits: &ArchiveLimits,
    info: &mut PackageInfo,
    notices: &mut Vec<Finding>,
) {
    for (index, entry) in entries.iter().enumerate() {
        if entry.is_directory {
            continue;
        }
        let Some(algorithm) = signature_algorithm(&entry.path) else {
            continue;
        };
        match read_entry(archive, index, limits.max_entry_bytes) {
            Ok(bytes) => info.signing_blocks.push(SigningBlock {
                path: entry.path.clone(),
                algorithm: algorithm.to_string(),
                size: bytes.len() as u64,
                sha256: format!("{:x}", Sha256::digest(&bytes)),
            }),
            Err(reason) => {
                debug!(entry = %entry.path, %reason, "Signature block unreadable");
                notices.push(Finding::notice(notice::ENTRY_UNREADABLE, &entry.path, reason));
            }
        }
    }
}

/// Decode the manifest, fill `info`, and return its text for scanning.
fn load_manifest<R: Read + std::io::Seek>(
    archive: &mut zip::ZipArchive<R>,
    entries: &[ArchiveEntry],
    limits: &ArchiveLimits,
    info: &mut PackageInfo,
    notices: &mut Vec<Finding>,
    cancel: &AtomicBool,
) -> Option<String> {
    let Some(index) = entries.iter().position(|e| e.kind == EntryKind::Manifest) else {
        info.manifest_format = ManifestFormat::Missing;
        notices.push(Finding::notice(
            notice::MANIFEST_MISSING,
            MANIFEST_PATH,
            "no manifest entry",
        ));
        return None;
    };

    let bytes = match read_entry(archive, index, limits.max_entry_bytes) {
        Ok(bytes) => bytes,
        Err(reason) => {
            warn!(%reason, "Manifest unreadable");
            notices.push(Finding::notice(notice::MANIFEST_UNREADABLE, MANIFEST_PATH, reason));
            return None;
        }
    };

    let text = if axml::is_binary_xml(&bytes) {
        info.manifest_format = ManifestFormat::Binary;
        match axml::decode_cancellable(&bytes, cancel) {
            Ok(text) => text,
            Err(axml::AxmlError::Cancelled) => return None,
            Err(e) => {
                warn!(error = %e, "Binary manifest could not be decoded");
                notices.push(Finding::notice(
                    notice::MANIFEST_UNREADABLE,
                    MANIFEST_PATH,
                    e.to_string(),
                ));
                return None;
            }
        }
    } else {
        info.manifest_format = ManifestFormat::Text;
        String::from_utf8_lossy(&bytes).into_owned()
    };

    if let Err(e) = manifest::apply(&text, info) {
        warn!(error = %e, "Manifest is not well-formed XML");
        notices.push(Finding::notice(
            notice::MANIFEST_UNREADABLE,
            MANIFEST_PATH,
            e.to_string(),
        ));
    }

    Some(text)
}

/// Validate and open the archive at `path`, decode its manifest, and prepare
/// every scannable entry. Blocking.
pub fn extract(path: &Path, options: &ExtractOptions) -> Result<Extraction> {
    extract_cancellable(path, options, &AtomicBool::new(false))
}

/// [`extract`], stopping early once `cancel` is set.
///
/// Validation always completes, so a rejected archive is still an error.
/// Past that point a cancelled extraction returns what it had, with
/// [`Extraction::cancelled`] set.
pub fn extract_cancellable(
    path: &Path,
    options: &ExtractOptions,
    cancel: &AtomicBool,
) -> Result<Extraction> {
    let limits = &options.limits;
    let file_size = precheck(path, limits)?;

    let file = File::open(path).map_err(|e| ScanError::io(path, e))?;
    let mut archive = zip::ZipArchive::new(BufReader::new(file))?;
    let entries = enumerate(&mut archive)?;

    // Nothing below may touch the disk until every name has been vetted.
    let root = Path::new("/apkscan-root");
    if let Some(bad) = entries
        .iter()
        .find(|e| sanitize_entry_path(&e.path, root).is_none())
    {
        warn!(entry = %bad.path, "Archive entry escapes extraction root");
        return Err(ScanError::UnsafePath {
            entry: bad.path.clone(),
        });
    }

    let declared: u64 = entries.iter().map(|e| e.size_uncompressed).sum();
    if declared > limits.max_uncompressed_bytes {
        return Err(ScanError::FileTooLarge {
            size: declared,
            max: limits.max_uncompressed_bytes,
        });
    }

    let mut info = PackageInfo {
        file_name: file_name(path),
        file_size,
        uncompressed_size: declared,
        ..Default::default()
    };
    for entry in &entries {
        record_entry(&mut info, entry);
    }
    if declared > 0 {
        info.compression_ratio =
            (info.compressed_size as f64 / declared as f64 * 1000.0).round() / 1000.0;
    }

    let mut notices = Vec::new();
    let mut targets = Vec::new();

    match file_digests(path, cancel)? {
        Some(digests) => {
            info.md5 = digests.md5;
            info.sha1 = digests.sha1;
            info.sha256 = digests.sha256;
        }
        None => {
            warn!(file = %info.file_name, "Extraction cancelled while hashing");
            return Ok(Extraction::stopped(info, targets, notices));
        }
    }

    load_signing_blocks(&mut archive, &entries, limits, &mut info, &mut notices);

    if let Some(text) = load_manifest(&mut archive, &entries, limits, &mut info, &mut notices, cancel) {
        targets.push(ScanTarget {
            path: MANIFEST_PATH.to_string(),
            kind: EntryKind::Manifest,
            source: EntrySource::Text(text),
        });
    }
    if cancel.load(Ordering::Relaxed) {
        warn!(file = %info.file_name, "Extraction cancelled after the manifest");
        return Ok(Extraction::stopped(info, targets, notices));
    }

    let workdir = if options.extract_to_disk {
        Some(TempDir::with_prefix("apkscan-").map_err(|e| ScanError::io(std::env::temp_dir(), e))?)
    } else {
        None
    };

    let mut cancelled = false;
    for (index, entry) in entries.iter().enumerate() {
        if cancel.load(Ordering::Relaxed) {
            warn!(file = %info.file_name, materialized = targets.len(), "Extraction cancelled");
            cancelled = true;
            break;
        }
        if entry.is_directory || !is_scannable(entry) {
            continue;
        }
        if options.skip_paths.iter().any(|p| glob_match(p, &entry.path)) {
            debug!(entry = %entry.path, "Skipped by ignore list");
            continue;
        }
        if entry.size_uncompressed > limits.max_entry_bytes {
            notices.push(Finding::notice(
                notice::ENTRY_UNREADABLE,
                &entry.path,
                format!("entry exceeds {} bytes", limits.max_entry_bytes),
            ));
            continue;
        }

        let bytes = match read_entry(&mut archive, index, limits.max_entry_bytes) {
            Ok(bytes) => bytes,
            Err(reason) => {
                debug!(entry = %entry.path, %reason, "Entry unreadable");
                notices.push(Finding::notice(notice::ENTRY_UNREADABLE, &entry.path, reason));
                continue;
            }
        };

        let source = match &workdir {
            Some(dir) => {
                let Some(dest) = sanitize_entry_path(&entry.path, dir.path()) else {
                    continue;
                };
                if let Some(parent) = dest.parent() {
                    std::fs::create_dir_all(parent).map_err(|e| ScanError::io(parent, e))?;
                }
                std::fs::write(&dest, &bytes).map_err(|e| ScanError::io(&dest, e))?;
                EntrySource::Disk(dest)
            }
            None => EntrySource::Memory(bytes),
        };

        targets.push(ScanTarget {
            path: entry.path.clone(),
            kind: entry.kind,
            source,
        });
    }

    info!(
        file = %info.file_name,
        entries = info.entry_count,
        targets = targets.len(),
        manifest = %info.manifest_format,
        "Archive extracted"
    );

    Ok(Extraction {
        info,
        targets,
        notices,
        cancelled,
        workdir,
    })
}
