//! Turns raw scanner findings into deduplicated, enriched report entries.

use std::collections::hash_map::Entry;
use std::collections::{BTreeSet, HashMap};

use crate::catalog::{DetectionPattern, PatternCatalog, PatternKind};
use crate::model::{notice, Category, Feature, Finding, Location, Protection, Vulnerability};

/// Fixed tag → related-mechanism table.
const RELATED: &[(&str, &[&str])] = &[
    (
        "root_detection",
        &["ANTI_DEBUG", "INTEGRITY_CHECK", "EMULATOR_DETECTION"],
    ),
    (
        "certificate_pinning",
        &["SSL_VALIDATION", "TRUST_MANAGER", "HOSTNAME_VERIFIER"],
    ),
    (
        "authentication",
        &["SESSION_MANAGEMENT", "TOKEN_VALIDATION", "CREDENTIAL_STORAGE"],
    ),
    ("payment", &["RECEIPT_VALIDATION", "BILLING_SECURITY"]),
    ("credential", &["INSECURE_STORAGE"]),
    ("debug", &["ANTI_DEBUG", "ROOT_DETECTION"]),
];

#[derive(Debug, Clone, Default)]
pub struct Aggregated {
    pub vulnerabilities: Vec<Vulnerability>,
    pub protections: Vec<Protection>,
    pub features: Vec<Feature>,
}

/// Descriptive fields for a finding, from the catalog or the notice table.
struct Meta<'a> {
    name: String,
    kind: String,
    description: String,
    fix: Option<String>,
    cwe: Option<String>,
    pattern: Option<&'a DetectionPattern>,
}

fn meta<'a>(catalog: &'a PatternCatalog, id: &str) -> Meta<'a> {
    if let Ok(pattern) = catalog.get(id) {
        let (fix, cwe) = match &pattern.kind {
            PatternKind::Vulnerability { fix, cwe, .. } => (fix.clone(), cwe.clone()),
            _ => (None, None),
        };
        return Meta {
            name: pattern.name.clone(),
            kind: pattern.pattern_type.clone(),
            description: pattern.description.clone(),
            fix,
            cwe,
            pattern: Some(pattern),
        };
    }
    match notice::describe(id) {
        Some((name, kind, description)) => Meta {
            name: name.to_string(),
            kind: kind.to_string(),
            description: description.to_string(),
            fix: None,
            cwe: None,
            pattern: None,
        },
        None => Meta {
            name: id.to_string(),
            kind: String::new(),
            description: String::new(),
            fix: None,
            cwe: None,
            pattern: None,
        },
    }
}

/// Related mechanism ids for a pattern, by tag, never including `own_id`.
pub fn related_findings(pattern: Option<&DetectionPattern>, own_id: &str) -> Vec<String> {
    let Some(pattern) = pattern else {
        return Vec::new();
    };
    let mut related = BTreeSet::new();
    for (tag, ids) in RELATED {
        if pattern.has_tag(tag) {
            related.extend(ids.iter().filter(|id| **id != own_id).map(|id| id.to_string()));
        }
    }
    related.into_iter().collect()
}

/// Keep one finding per `(pattern_id, location)`: the most confident, or the
/// first seen on a tie. Input order is preserved otherwise.
pub fn dedup(findings: Vec<Finding>) -> Vec<Finding> {
    let mut kept: Vec<Finding> = Vec::with_capacity(findings.len());
    let mut slots: HashMap<(String, Location), usize> = HashMap::new();

    for finding in findings {
        match slots.entry((finding.pattern_id.clone(), finding.location.clone())) {
            Entry::Occupied(slot) => {
                let existing = &mut kept[*slot.get()];
                if finding.confidence > existing.confidence {
                    *existing = finding;
                }
            }
            Entry::Vacant(slot) => {
                slot.insert(kept.len());
                kept.push(finding);
            }
        }
    }

    kept
}

fn matches_hint(pattern: Option<&DetectionPattern>, hint: &str) -> bool {
    pattern.is_some_and(|p| {
        p.tags.iter().any(|t| t.eq_ignore_ascii_case(hint)) || p.pattern_type.eq_ignore_ascii_case(hint)
    })
}

/// Partition, dedup and enrich sorted scanner findings.
pub fn aggregate(
    findings: Vec<Finding>,
    catalog: &PatternCatalog,
    category_hint: Option<&str>,
) -> Aggregated {
    let mut out = Aggregated::default();
    let mut hinted: Vec<bool> = Vec::new();

    for finding in dedup(findings) {
        let id = finding.pattern_id.clone();
        let m = meta(catalog, &id);

        match finding.category {
            Category::Vulnerability => {
                let severity = finding.severity.unwrap_or(crate::model::Severity::Info);
                out.vulnerabilities.push(Vulnerability {
                    risk_factor: severity.weight() * finding.confidence,
                    related_findings: related_findings(m.pattern, &id),
                    finding,
                    name: m.name,
                    vuln_type: m.kind,
                    description: m.description,
                    fix_suggestion: m.fix,
                    cwe: m.cwe,
                });
            }
            Category::Protection => out.protections.push(Protection {
                related_findings: related_findings(m.pattern, &id),
                finding,
                name: m.name,
                protection_type: m.kind,
                description: m.description,
            }),
            Category::Feature => {
                hinted.push(category_hint.is_some_and(|h| matches_hint(m.pattern, h)));
                out.features.push(Feature {
                    finding,
                    name: m.name,
                    feature_type: m.kind,
                    description: m.description,
                });
            }
        }
    }

    out.vulnerabilities.sort_by(|a, b| {
        (a.severity().rank(), &a.finding.location, &a.finding.pattern_id).cmp(&(
            b.severity().rank(),
            &b.finding.location,
            &b.finding.pattern_id,
        ))
    });
    out.protections.sort_by(|a, b| {
        (a.severity().rank(), &a.finding.location, &a.finding.pattern_id).cmp(&(
            b.severity().rank(),
            &b.finding.location,
            &b.finding.pattern_id,
        ))
    });

    let mut features: Vec<(bool, Feature)> = hinted.into_iter().zip(out.features).collect();
    features.sort_by(|(ha, a), (hb, b)| {
        (!ha, &a.finding.location, &a.finding.pattern_id).cmp(&(
            !hb,
            &b.finding.location,
            &b.finding.pattern_id,
        ))
    });
    out.features = features.into_iter().map(|(_, f)| f).collect();

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Severity;

    fn finding(id: &str, category: Category, path: &str, line: usize, confidence: f64) -> Finding {
        let severity = PatternCatalog::builtin()
            .get(id)
            .ok()
            .and_then(|p| p.severity());
        Finding::new(id, category, Location::new(path, Some(line)), "x", confidence, severity)
    }

    #[test]
    fn test_dedup_keeps_highest_confidence() {
        let findings = vec![
            finding("HARDCODED_CREDENTIAL", Category::Vulnerability, "a.xml", 1, 0.45),
            finding("HARDCODED_CREDENTIAL", Category::Vulnerability, "a.xml", 1, 0.9),
            finding("HARDCODED_CREDENTIAL", Category::Vulnerability, "a.xml", 2, 0.45),
        ];
        let kept = dedup(findings);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].confidence, 0.9);
        assert_eq!(kept[1].location.line, Some(2));
    }

    #[test]
    fn test_dedup_tie_keeps_first() {
        let mut a = finding("ROOT_DETECTION", Category::Protection, "a.smali", 3, 0.9);
        a.matched_text = "first".to_string();
        let mut b = a.clone();
        b.matched_text = "second".to_string();

        let kept = dedup(vec![a, b]);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].matched_text, "first");
    }

    #[test]
    fn test_related_findings_exclude_own_id() {
        let catalog = PatternCatalog::builtin();
        let root = catalog.get("ROOT_DETECTION").unwrap();
        assert_eq!(
            related_findings(Some(root), "ROOT_DETECTION"),
            vec!["ANTI_DEBUG", "EMULATOR_DETECTION", "INTEGRITY_CHECK"]
        );

        let anti_debug = catalog.get("ANTI_DEBUG").unwrap();
        assert_eq!(related_findings(Some(anti_debug), "ANTI_DEBUG"), vec!["ROOT_DETECTION"]);
    }

    #[test]
    fn test_aggregate_partitions_and_orders() {
        let catalog = PatternCatalog::builtin();
        let findings = vec![
            finding("BACKUP_ALLOWED", Category::Vulnerability, "AndroidManifest.xml", 2, 0.9),
            finding("DEBUG_ENABLED", Category::Vulnerability, "AndroidManifest.xml", 3, 0.9),
            finding("ROOT_DETECTION", Category::Protection, "a.smali", 1, 0.9),
            finding("HTTP_CLIENT", Category::Feature, "a.smali", 1, 0.8),
            finding("IN_APP_BILLING", Category::Feature, "b.smali", 9, 0.8),
            Finding::notice(notice::ENTRY_UNREADABLE, "assets/x.txt", "gone"),
        ];

        let agg = aggregate(findings, &catalog, Some("payment"));

        let vulns: Vec<_> = agg
            .vulnerabilities
            .iter()
            .map(|v| v.finding.pattern_id.as_str())
            .collect();
        assert_eq!(vulns, vec!["DEBUG_ENABLED", "BACKUP_ALLOWED", "ENTRY_UNREADABLE"]);
        assert_eq!(agg.vulnerabilities[0].name, "Debug Enabled");
        assert!((agg.vulnerabilities[0].risk_factor - 7.2).abs() < 1e-9);
        assert_eq!(agg.vulnerabilities[2].severity(), Severity::Info);
        assert_eq!(agg.vulnerabilities[2].name, "Entry Unreadable");

        assert_eq!(agg.protections.len(), 1);
        assert_eq!(agg.features[0].finding.pattern_id, "IN_APP_BILLING");
        assert_eq!(agg.features[1].finding.pattern_id, "HTTP_CLIENT");
    }
}
