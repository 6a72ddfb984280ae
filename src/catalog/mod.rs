//! Compiled detection rules.
//!
//! A [`PatternCatalog`] is built once from [`PatternSpec`]s (the built-in table
//! plus an optional user rules file) and never changes afterwards. Scans take
//! an `Arc` snapshot from a [`CatalogHandle`], so a reload swaps the pointer
//! without disturbing scans already in flight.

mod builtin;

use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::Arc;

use parking_lot::RwLock;
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::error::CatalogError;
use crate::model::{Category, Severity};

const REGEX_SIZE_LIMIT: usize = 1 << 20;

fn default_confidence() -> f64 {
    0.9
}

fn default_true() -> bool {
    true
}

/// Uncompiled rule, as written in the built-in table or a TOML rules file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternSpec {
    pub id: String,
    pub category: Category,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "type", default)]
    pub pattern_type: String,
    pub pattern: String,
    /// Matches whose text also matches this expression are dropped.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exclude: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<Severity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fix: Option<String>,
    /// CWE identifier for vulnerabilities, e.g. `CWE-798`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwe: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bypass_technique: Option<String>,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

/// Category-specific payload of a pattern.
#[derive(Debug, Clone, PartialEq)]
pub enum PatternKind {
    Vulnerability {
        severity: Severity,
        fix: Option<String>,
        cwe: Option<String>,
    },
    Protection {
        severity: Severity,
        bypass_technique: Option<String>,
    },
    Feature,
}

impl PatternKind {
    pub fn category(&self) -> Category {
        match self {
            PatternKind::Vulnerability { .. } => Category::Vulnerability,
            PatternKind::Protection { .. } => Category::Protection,
            PatternKind::Feature => Category::Feature,
        }
    }

    pub fn severity(&self) -> Option<Severity> {
        match self {
            PatternKind::Vulnerability { severity, .. } => Some(*severity),
            PatternKind::Protection { severity, .. } => Some(*severity),
            PatternKind::Feature => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DetectionPattern {
    pub id: String,
    pub name: String,
    pub description: String,
    pub pattern_type: String,
    pub kind: PatternKind,
    pub matcher: Regex,
    pub exclude: Option<Regex>,
    pub base_confidence: f64,
    pub tags: BTreeSet<String>,
    pub enabled: bool,
}

impl DetectionPattern {
    pub fn category(&self) -> Category {
        self.kind.category()
    }

    pub fn severity(&self) -> Option<Severity> {
        self.kind.severity()
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }

    fn compile(spec: &PatternSpec) -> Result<Self, String> {
        if spec.id.trim().is_empty() {
            return Err("empty id".to_string());
        }
        if !(spec.confidence > 0.0 && spec.confidence <= 1.0) {
            return Err(format!("confidence {} outside (0, 1]", spec.confidence));
        }

        let kind = match spec.category {
            Category::Vulnerability => PatternKind::Vulnerability {
                severity: spec.severity.ok_or("vulnerability without severity")?,
                fix: spec.fix.clone(),
                cwe: spec.cwe.clone(),
            },
            Category::Protection => PatternKind::Protection {
                severity: spec.severity.ok_or("protection without severity")?,
                bypass_technique: spec.bypass_technique.clone(),
            },
            Category::Feature => PatternKind::Feature,
        };

        let matcher = build_regex(&spec.pattern)?;
        let exclude = spec.exclude.as_deref().map(build_regex).transpose()?;

        Ok(Self {
            id: spec.id.clone(),
            name: spec.name.clone(),
            description: spec.description.clone(),
            pattern_type: spec.pattern_type.clone(),
            kind,
            matcher,
            exclude,
            base_confidence: spec.confidence,
            tags: spec.tags.iter().cloned().collect(),
            enabled: spec.enabled,
        })
    }
}

fn build_regex(expr: &str) -> Result<Regex, String> {
    RegexBuilder::new(expr)
        .case_insensitive(true)
        .size_limit(REGEX_SIZE_LIMIT)
        .build()
        .map_err(|e| e.to_string())
}

/// A rule that was excluded from the catalog while loading.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PatternCompileFailure {
    pub id: String,
    pub reason: String,
}

#[derive(Debug, Deserialize)]
struct RulesFile {
    #[serde(default)]
    pattern: Vec<PatternSpec>,
}

/// Immutable set of compiled detection patterns.
#[derive(Debug, Clone)]
pub struct PatternCatalog {
    patterns: Vec<DetectionPattern>,
    index: HashMap<String, usize>,
    rejected: Vec<PatternCompileFailure>,
    fingerprint: String,
}

impl PatternCatalog {
    pub fn builtin() -> Self {
        Self::from_specs(builtin::specs())
    }

    /// Compile `specs` in order. A later spec with an id already seen
    /// replaces the earlier one in place.
    pub fn from_specs(specs: impl IntoIterator<Item = PatternSpec>) -> Self {
        let mut patterns: Vec<DetectionPattern> = Vec::new();
        let mut index: HashMap<String, usize> = HashMap::new();
        let mut rejected = Vec::new();

        for spec in specs {
            let pattern = match DetectionPattern::compile(&spec) {
                Ok(pattern) => pattern,
                Err(reason) => {
                    warn!(id = %spec.id, %reason, "Pattern rejected");
                    rejected.push(PatternCompileFailure {
                        id: spec.id.clone(),
                        reason,
                    });
                    continue;
                }
            };

            match index.get(&pattern.id) {
                Some(&slot) => {
                    debug!(id = %pattern.id, "Pattern overridden");
                    patterns[slot] = pattern;
                }
                None => {
                    index.insert(pattern.id.clone(), patterns.len());
                    patterns.push(pattern);
                }
            }
        }

        let fingerprint = fingerprint_of(&patterns);

        Self {
            patterns,
            index,
            rejected,
            fingerprint,
        }
    }

    /// Built-in rules merged with an optional TOML rules file, then with the
    /// `disabled` ids switched off.
    pub fn load(rules_file: Option<&Path>, disabled: &[String]) -> Result<Self, CatalogError> {
        let mut specs = builtin::specs();
        if let Some(path) = rules_file {
            specs.extend(read_rules_file(path)?);
        }
        for spec in specs.iter_mut() {
            if disabled.iter().any(|id| id.eq_ignore_ascii_case(&spec.id)) {
                spec.enabled = false;
            }
        }
        Ok(Self::from_specs(specs))
    }

    /// Enabled patterns of one category, in load order.
    pub fn patterns(&self, category: Category) -> Vec<&DetectionPattern> {
        self.patterns
            .iter()
            .filter(|p| p.enabled && p.category() == category)
            .collect()
    }

    /// Every enabled pattern, in load order.
    pub fn enabled(&self) -> impl Iterator<Item = &DetectionPattern> {
        self.patterns.iter().filter(|p| p.enabled)
    }

    pub fn get(&self, id: &str) -> Result<&DetectionPattern, CatalogError> {
        self.index
            .get(id)
            .map(|&slot| &self.patterns[slot])
            .ok_or_else(|| CatalogError::NotFound(id.to_string()))
    }

    pub fn rejected(&self) -> &[PatternCompileFailure] {
        &self.rejected
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// Hex SHA-256 over every field of every pattern, in load order.
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }
}

impl PartialEq for PatternCatalog {
    fn eq(&self, other: &Self) -> bool {
        self.fingerprint == other.fingerprint
    }
}

fn fingerprint_of(patterns: &[DetectionPattern]) -> String {
    fn field(hasher: &mut Sha256, value: Option<&str>) {
        match value {
            Some(v) => {
                hasher.update([1u8]);
                hasher.update(v.as_bytes());
            }
            None => hasher.update([2u8]),
        }
        hasher.update([0u8]);
    }

    let mut hasher = Sha256::new();
    for p in patterns {
        let (fix, cwe, bypass) = match &p.kind {
            PatternKind::Vulnerability { fix, cwe, .. } => (fix.as_deref(), cwe.as_deref(), None),
            PatternKind::Protection {
                bypass_technique, ..
            } => (None, None, bypass_technique.as_deref()),
            PatternKind::Feature => (None, None, None),
        };

        field(&mut hasher, Some(&p.id));
        field(&mut hasher, Some(p.category().as_str()));
        field(&mut hasher, Some(&p.name));
        field(&mut hasher, Some(&p.description));
        field(&mut hasher, Some(&p.pattern_type));
        field(&mut hasher, Some(p.matcher.as_str()));
        field(&mut hasher, p.exclude.as_ref().map(Regex::as_str));
        field(&mut hasher, p.severity().map(|s| s.as_str()));
        field(&mut hasher, fix);
        field(&mut hasher, cwe);
        field(&mut hasher, bypass);
        hasher.update(p.base_confidence.to_bits().to_le_bytes());
        hasher.update((p.tags.len() as u64).to_le_bytes());
        for tag in &p.tags {
            field(&mut hasher, Some(tag));
        }
        hasher.update([p.enabled as u8]);
    }
    format!("{:x}", hasher.finalize())
}

fn read_rules_file(path: &Path) -> Result<Vec<PatternSpec>, CatalogError> {
    let content = std::fs::read_to_string(path).map_err(|e| CatalogError::Rules {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    let file: RulesFile = toml::from_str(&content).map_err(|e| CatalogError::Rules {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    debug!(path = %path.display(), count = file.pattern.len(), "Loaded rules file");
    Ok(file.pattern)
}

/// Shared, swappable reference to the current catalog.
#[derive(Debug)]
pub struct CatalogHandle {
    inner: RwLock<Arc<PatternCatalog>>,
}

impl CatalogHandle {
    pub fn new(catalog: PatternCatalog) -> Self {
        Self {
            inner: RwLock::new(Arc::new(catalog)),
        }
    }

    /// Snapshot used for the whole duration of one scan.
    pub fn current(&self) -> Arc<PatternCatalog> {
        Arc::clone(&self.inner.read())
    }

    pub fn replace(&self, catalog: PatternCatalog) {
        let fresh = Arc::new(catalog);
        *self.inner.write() = fresh;
    }

    /// Build a fresh catalog from the built-ins plus `rules_file` and swap it in.
    /// On failure the current catalog stays in place.
    pub fn reload_from(&self, rules_file: &Path, disabled: &[String]) -> Result<(), CatalogError> {
        let catalog = PatternCatalog::load(Some(rules_file), disabled)?;
        self.replace(catalog);
        Ok(())
    }
}

impl Default for CatalogHandle {
    fn default() -> Self {
        Self::new(PatternCatalog::builtin())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn spec(id: &str, category: Category, pattern: &str) -> PatternSpec {
        PatternSpec {
            id: id.to_string(),
            category,
            name: id.to_string(),
            description: String::new(),
            pattern_type: String::new(),
            pattern: pattern.to_string(),
            exclude: None,
            severity: Some(Severity::Low),
            fix: None,
            cwe: None,
            bypass_technique: None,
            confidence: 0.9,
            tags: vec![],
            enabled: true,
        }
    }

    #[test]
    fn test_builtin_compiles_cleanly() {
        let catalog = PatternCatalog::builtin();
        assert!(catalog.rejected().is_empty(), "{:?}", catalog.rejected());
        assert!(!catalog.patterns(Category::Vulnerability).is_empty());
        assert!(!catalog.patterns(Category::Protection).is_empty());
        assert!(!catalog.patterns(Category::Feature).is_empty());
    }

    #[test]
    fn test_matchers_are_case_insensitive() {
        let catalog = PatternCatalog::builtin();
        let pattern = catalog.get("DEBUG_ENABLED").unwrap();
        assert!(pattern.matcher.is_match(r#"ANDROID:DEBUGGABLE="TRUE""#));
    }

    #[test]
    fn test_bad_expression_is_rejected_not_fatal() {
        let catalog = PatternCatalog::from_specs(vec![
            spec("GOOD", Category::Vulnerability, "abc"),
            spec("BAD", Category::Vulnerability, "(unclosed"),
        ]);

        assert_eq!(catalog.len(), 1);
        assert_eq!(catalog.rejected().len(), 1);
        assert_eq!(catalog.rejected()[0].id, "BAD");
        assert_eq!(
            catalog.get("BAD").unwrap_err(),
            CatalogError::NotFound("BAD".to_string())
        );
    }

    #[test]
    fn test_missing_severity_is_rejected() {
        let mut s = spec("NOSEV", Category::Protection, "x");
        s.severity = None;
        let catalog = PatternCatalog::from_specs(vec![s]);
        assert!(catalog.is_empty());
        assert_eq!(catalog.rejected().len(), 1);
    }

    #[test]
    fn test_invalid_confidence_is_rejected() {
        let mut s = spec("ZERO", Category::Feature, "x");
        s.confidence = 0.0;
        let catalog = PatternCatalog::from_specs(vec![s]);
        assert!(catalog.is_empty());
    }

    #[test]
    fn test_later_duplicate_overrides_in_place() {
        let mut second = spec("A", Category::Vulnerability, "second");
        second.severity = Some(Severity::Critical);

        let catalog = PatternCatalog::from_specs(vec![
            spec("A", Category::Vulnerability, "first"),
            spec("B", Category::Vulnerability, "b"),
            second,
        ]);

        let ids: Vec<_> = catalog
            .patterns(Category::Vulnerability)
            .iter()
            .map(|p| p.id.as_str())
            .collect();
        assert_eq!(ids, vec!["A", "B"]);
        assert_eq!(catalog.get("A").unwrap().matcher.as_str(), "second");
        assert_eq!(catalog.get("A").unwrap().severity(), Some(Severity::Critical));
    }

    #[test]
    fn test_disabled_patterns_are_hidden_from_category_lists() {
        let catalog = PatternCatalog::load(None, &["debug_enabled".to_string()]).unwrap();
        let ids: Vec<_> = catalog
            .patterns(Category::Vulnerability)
            .iter()
            .map(|p| p.id.clone())
            .collect();
        assert!(!ids.contains(&"DEBUG_ENABLED".to_string()));
        assert!(!catalog.get("DEBUG_ENABLED").unwrap().enabled);
    }

    #[test]
    fn test_load_is_idempotent() {
        let a = PatternCatalog::builtin();
        let b = PatternCatalog::builtin();
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_eq!(a.fingerprint().len(), 64);

        let c = PatternCatalog::load(None, &["ROOT_DETECTION".to_string()]).unwrap();
        assert_ne!(a.fingerprint(), c.fingerprint());
    }

    #[test]
    fn test_fingerprint_covers_descriptive_fields() {
        let base = spec("A", Category::Protection, "x");
        let fingerprint = |s: &PatternSpec| {
            PatternCatalog::from_specs(vec![s.clone()])
                .fingerprint()
                .to_string()
        };
        let original = fingerprint(&base);

        let mut renamed = base.clone();
        renamed.name = "Other".to_string();
        let mut bypass = base.clone();
        bypass.bypass_technique = Some("Hooking".to_string());
        let mut retyped = base.clone();
        retyped.pattern_type = "root_detection".to_string();
        let mut tagged = base.clone();
        tagged.tags = vec!["root_detection".to_string()];
        let mut described = base.clone();
        described.description = "changed".to_string();

        for changed in [&renamed, &bypass, &retyped, &tagged, &described] {
            assert_ne!(original, fingerprint(changed));
        }

        let mut vuln = spec("V", Category::Vulnerability, "x");
        let before = fingerprint(&vuln);
        vuln.fix = Some("Remove it".to_string());
        let with_fix = fingerprint(&vuln);
        vuln.cwe = Some("CWE-798".to_string());
        assert_ne!(before, with_fix);
        assert_ne!(with_fix, fingerprint(&vuln));
    }

    #[test]
    fn test_builtin_vulnerabilities_carry_cwe() {
        let catalog = PatternCatalog::builtin();
        for pattern in catalog.patterns(Category::Vulnerability) {
            match &pattern.kind {
                PatternKind::Vulnerability { cwe, .. } => {
                    assert!(
                        cwe.as_deref().is_some_and(|c| c.starts_with("CWE-")),
                        "{} has no CWE",
                        pattern.id
                    );
                }
                other => panic!("unexpected kind {:?}", other),
            }
        }
    }

    #[test]
    fn test_rules_file_merges_over_builtin() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("rules.toml");
        std::fs::write(
            &path,
            r#"
[[pattern]]
id = "CUSTOM_TOKEN"
category = "vulnerability"
name = "Custom Token"
type = "hardcoded_credential"
pattern = "x-internal-token"
severity = "HIGH"
tags = ["credential"]

[[pattern]]
id = "CODE_OBFUSCATION"
category = "protection"
name = "Code Obfuscation"
pattern = "proguard"
severity = "LOW"
enabled = false
"#,
        )
        .unwrap();

        let catalog = PatternCatalog::load(Some(&path), &[]).unwrap();
        let custom = catalog.get("CUSTOM_TOKEN").unwrap();
        assert_eq!(custom.severity(), Some(Severity::High));
        assert!(custom.has_tag("credential"));
        assert!(!catalog.get("CODE_OBFUSCATION").unwrap().enabled);
    }

    #[test]
    fn test_unreadable_rules_file_is_an_error() {
        let err = PatternCatalog::load(Some(Path::new("/nonexistent/rules.toml")), &[]).unwrap_err();
        assert!(matches!(err, CatalogError::Rules { .. }));
    }

    #[test]
    fn test_handle_swaps_without_touching_snapshots() {
        let handle = CatalogHandle::default();
        let before = handle.current();

        handle.replace(PatternCatalog::from_specs(vec![spec(
            "ONLY",
            Category::Feature,
            "x",
        )]));

        assert!(before.get("DEBUG_ENABLED").is_ok());
        assert_eq!(handle.current().len(), 1);
        assert!(handle.current().get("DEBUG_ENABLED").is_err());
    }

    #[test]
    fn test_reload_from_rules_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("rules.toml");
        std::fs::write(
            &path,
            r#"
[[pattern]]
id = "LEGACY_SDK"
category = "vulnerability"
name = "Legacy SDK"
pattern = "com\\.legacy\\.sdk"
severity = "MEDIUM"
cwe = "CWE-1104"
"#,
        )
        .unwrap();

        let handle = CatalogHandle::default();
        let before = handle.current();
        handle.reload_from(&path, &["DEBUG_ENABLED".to_string()]).unwrap();

        let after = handle.current();
        assert_ne!(before.fingerprint(), after.fingerprint());
        assert!(matches!(
            &after.get("LEGACY_SDK").unwrap().kind,
            PatternKind::Vulnerability { cwe: Some(c), .. } if c == "CWE-1104"
        ));
        assert!(!after.get("DEBUG_ENABLED").unwrap().enabled);
        assert!(before.get("LEGACY_SDK").is_err());

        std::fs::write(&path, "[[pattern]]\nid = ").unwrap();
        let err = handle.reload_from(&path, &[]).unwrap_err();
        assert!(matches!(err, CatalogError::Rules { .. }));
        assert_eq!(handle.current().fingerprint(), after.fingerprint());
    }
}
