//! Applies catalog patterns to the text of one archive entry.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::debug;

use crate::archive::{axml, EntrySource, ScanTarget};
use crate::catalog::{DetectionPattern, PatternCatalog};
use crate::model::{notice, Finding, Location};

/// Words that usually mean a credential-looking match is UI text, not a secret.
const COMMON_CREDENTIAL_CONTEXT: &[&str] = &["reset", "change", "forgot", "hint"];

const CREDENTIAL_TAG: &str = "credential";

/// Which enabled patterns a scan runs.
#[derive(Debug, Clone, Default)]
pub struct Selection {
    include: HashSet<String>,
}

impl Selection {
    pub fn new(include_pattern_ids: &[String]) -> Self {
        Self {
            include: include_pattern_ids.iter().cloned().collect(),
        }
    }

    pub fn allows(&self, pattern: &DetectionPattern) -> bool {
        self.include.is_empty() || self.include.contains(&pattern.id)
    }
}

/// Byte offsets where each line starts, for 1-based line lookup.
struct LineIndex {
    starts: Vec<usize>,
}

impl LineIndex {
    fn new(text: &str) -> Self {
        let mut starts = vec![0];
        starts.extend(text.match_indices('\n').map(|(i, _)| i + 1));
        Self { starts }
    }

    fn line_of(&self, offset: usize) -> usize {
        match self.starts.binary_search(&offset) {
            Ok(i) => i + 1,
            Err(i) => i,
        }
    }
}

/// First `max_chars` characters of `text`.
pub fn excerpt(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((end, _)) => &text[..end],
        None => text,
    }
}

fn has_common_credential_context(text: &str) -> bool {
    let lower = text.to_lowercase();
    COMMON_CREDENTIAL_CONTEXT.iter().any(|w| lower.contains(w))
}

/// Run every selected pattern over `text`.
pub fn scan_text(
    path: &str,
    text: &str,
    line_oriented: bool,
    catalog: &PatternCatalog,
    selection: &Selection,
    max_match_length: usize,
    cancel: &AtomicBool,
) -> Vec<Finding> {
    let lines = line_oriented.then(|| LineIndex::new(text));
    let mut common_context: Option<bool> = None;
    let mut findings = Vec::new();

    for pattern in catalog.enabled().filter(|p| selection.allows(p)) {
        if cancel.load(Ordering::Relaxed) {
            break;
        }

        let mut confidence = pattern.base_confidence;
        if pattern.has_tag(CREDENTIAL_TAG)
            && *common_context.get_or_insert_with(|| has_common_credential_context(text))
        {
            confidence *= 0.5;
        }

        for m in pattern.matcher.find_iter(text) {
            let matched = m.as_str();
            if pattern
                .exclude
                .as_ref()
                .is_some_and(|exclude| exclude.is_match(matched))
            {
                continue;
            }

            let line = lines.as_ref().map(|idx| idx.line_of(m.start()));
            findings.push(
                Finding::new(
                    &pattern.id,
                    pattern.category(),
                    Location::new(path, line),
                    excerpt(matched, max_match_length),
                    confidence,
                    pattern.severity(),
                )
                .at_offset(m.start()),
            );
        }
    }

    findings
}

fn is_xml(path: &str) -> bool {
    path.to_ascii_lowercase().ends_with(".xml")
}

/// Load one target's text (decoding binary XML where needed) and scan it.
/// Read or decode failures become an `ENTRY_UNREADABLE` notice.
pub fn scan_target(
    target: ScanTarget,
    catalog: &PatternCatalog,
    selection: &Selection,
    max_match_length: usize,
    cancel: &AtomicBool,
) -> Vec<Finding> {
    let line_oriented = target.line_oriented();
    let path = target.path;

    let bytes = match target.source {
        EntrySource::Text(text) => {
            return scan_text(&path, &text, line_oriented, catalog, selection, max_match_length, cancel)
        }
        EntrySource::Memory(bytes) => bytes,
        EntrySource::Disk(file) => match std::fs::read(&file) {
            Ok(bytes) => bytes,
            Err(e) => {
                debug!(entry = %path, error = %e, "Entry unreadable");
                return vec![Finding::notice(notice::ENTRY_UNREADABLE, path, e.to_string())];
            }
        },
    };

    if is_xml(&path) && axml::is_binary_xml(&bytes) {
        return match axml::decode_cancellable(&bytes, cancel) {
            Ok(text) => scan_text(&path, &text, true, catalog, selection, max_match_length, cancel),
            Err(axml::AxmlError::Cancelled) => Vec::new(),
            Err(e) => {
                debug!(entry = %path, error = %e, "Binary XML could not be decoded");
                vec![Finding::notice(notice::ENTRY_UNREADABLE, path, e.to_string())]
            }
        };
    }

    let text = String::from_utf8_lossy(&bytes);
    scan_text(&path, &text, line_oriented, catalog, selection, max_match_length, cancel)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::EntryKind;
    use crate::model::{Category, Severity};

    fn scan(path: &str, text: &str) -> Vec<Finding> {
        scan_text(
            path,
            text,
            true,
            &PatternCatalog::builtin(),
            &Selection::default(),
            200,
            &AtomicBool::new(false),
        )
    }

    #[test]
    fn test_line_numbers_are_one_based() {
        let text = "<manifest>\n  <application\n    android:debuggable=\"true\"/>\n</manifest>";
        let findings = scan("AndroidManifest.xml", text);
        let debug = findings.iter().find(|f| f.pattern_id == "DEBUG_ENABLED").unwrap();
        assert_eq!(debug.location.line, Some(3));
        assert_eq!(debug.severity, Some(Severity::High));
        assert_eq!(debug.category, Category::Vulnerability);
    }

    #[test]
    fn test_matching_is_case_insensitive() {
        let findings = scan("a.smali", "invoke-static {}, Lx;->ISROOTED()Z");
        assert!(findings.iter().any(|f| f.pattern_id == "ROOT_DETECTION"));
    }

    #[test]
    fn test_credential_confidence_halved_by_common_words() {
        let secret = r#"api_key = "sk_live_0123456789abcdef""#;
        let plain = scan("assets/a.properties", secret);
        let hinted = scan(
            "assets/a.properties",
            &format!("{}\nforgot_label = \"Forgot your password?\"", secret),
        );

        let conf = |fs: &[Finding]| {
            fs.iter()
                .find(|f| f.pattern_id == "HARDCODED_CREDENTIAL")
                .map(|f| f.confidence)
                .unwrap()
        };
        assert!((conf(&plain) - 0.9).abs() < 1e-9);
        assert!((conf(&hinted) - 0.45).abs() < 1e-9);
    }

    #[test]
    fn test_excerpt_is_bounded_on_char_boundary() {
        assert_eq!(excerpt("héllo", 2), "hé");
        assert_eq!(excerpt("abc", 10), "abc");

        let url = format!("http://api.example.com/{}", "é".repeat(300));
        let findings = scan_text(
            "assets/a.json",
            &url,
            true,
            &PatternCatalog::builtin(),
            &Selection::default(),
            50,
            &AtomicBool::new(false),
        );
        let http = findings.iter().find(|f| f.pattern_id == "INSECURE_HTTP").unwrap();
        assert_eq!(http.matched_text.chars().count(), 50);
    }

    #[test]
    fn test_namespace_urls_are_excluded() {
        let findings = scan(
            "AndroidManifest.xml",
            r#"<manifest xmlns:android="http://schemas.android.com/apk/res/android"/>"#,
        );
        assert!(findings.iter().all(|f| f.pattern_id != "INSECURE_HTTP"));
    }

    #[test]
    fn test_selection_limits_patterns() {
        let findings = scan_text(
            "a.smali",
            "isRooted isDebuggerConnected",
            true,
            &PatternCatalog::builtin(),
            &Selection::new(&["ANTI_DEBUG".to_string()]),
            200,
            &AtomicBool::new(false),
        );
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].pattern_id, "ANTI_DEBUG");
    }

    #[test]
    fn test_dex_has_no_line_numbers() {
        let target = ScanTarget {
            path: "classes.dex".to_string(),
            kind: EntryKind::Bytecode,
            source: EntrySource::Memory(b"dex\n035\0\xff\xfe isDebuggerConnected".to_vec()),
        };
        let findings = scan_target(
            target,
            &PatternCatalog::builtin(),
            &Selection::default(),
            200,
            &AtomicBool::new(false),
        );
        let f = findings.iter().find(|f| f.pattern_id == "ANTI_DEBUG").unwrap();
        assert_eq!(f.location.line, None);
    }

    #[test]
    fn test_unreadable_disk_entry_is_a_notice() {
        let target = ScanTarget {
            path: "assets/gone.txt".to_string(),
            kind: EntryKind::Asset,
            source: EntrySource::Disk("/nonexistent/apkscan/gone.txt".into()),
        };
        let findings = scan_target(
            target,
            &PatternCatalog::builtin(),
            &Selection::default(),
            200,
            &AtomicBool::new(false),
        );
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].pattern_id, notice::ENTRY_UNREADABLE);
        assert_eq!(findings[0].severity, Some(Severity::Info));
    }

    #[test]
    fn test_cancel_stops_matching() {
        let findings = scan_text(
            "a.smali",
            "isRooted",
            true,
            &PatternCatalog::builtin(),
            &Selection::default(),
            200,
            &AtomicBool::new(true),
        );
        assert!(findings.is_empty());
    }
}
