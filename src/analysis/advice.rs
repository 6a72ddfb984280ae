//! Bypass suggestions and recommendations.

use tracing::warn;

use crate::catalog::{PatternCatalog, PatternKind};
use crate::model::{BypassSuggestion, Location, Protection, Severity, Vulnerability};

pub const GENERIC_TECHNIQUE: &str = "manual_analysis";
const GENERIC_SUCCESS_RATE: f64 = 0.25;

/// `(id, description, estimated success rate)`
const TECHNIQUES: &[(&str, &str, f64)] = &[
    (
        "hook_method_return_false",
        "Instrument the detection method at runtime so it reports a clean device",
        0.85,
    ),
    (
        "trust_all_certificates",
        "Run the test build with a trust configuration that accepts the interception proxy's certificate",
        0.80,
    ),
    (
        "hook_debug_check_false",
        "Instrument debugger checks so they report no debugger attached",
        0.90,
    ),
    (
        "spoof_signature",
        "Return the original signing certificate from package signature queries",
        0.70,
    ),
    (
        "spoof_integrity_verdict",
        "Exercise the app against a test attestation configuration; verdicts are verified server-side",
        0.40,
    ),
    (
        "spoof_device_properties",
        "Present physical-device build properties to emulator checks",
        0.80,
    ),
    (
        "hide_instrumentation",
        "Rename or relocate the instrumentation agent so artifact checks do not see it",
        0.60,
    ),
    (
        "deobfuscation",
        "Recover readable names with mapping files or static renaming before analysis",
        0.50,
    ),
];

/// `(label, type keywords, guidance)`; a vulnerability joins the first group
/// whose keyword occurs in its type.
const MITIGATION_GROUPS: &[(&str, &[&str], &str)] = &[
    (
        "authentication",
        &["auth"],
        "Implement proper authentication validation on the server",
    ),
    (
        "payment",
        &["payment", "billing", "purchase"],
        "Use server-side validation for payments",
    ),
    (
        "storage",
        &["storage", "backup", "credential"],
        "Implement encrypted storage mechanisms and keep secrets out of the package",
    ),
    (
        "network",
        &["network", "certificate", "http", "cleartext"],
        "Require TLS and validate certificates and host names",
    ),
    (
        "cryptography",
        &["crypto"],
        "Replace weak algorithms and keep keys in the platform keystore",
    ),
];

const CLOSING_RECOMMENDATION: &str =
    "Re-test on multiple devices and Android versions after every fix";

pub fn technique(id: &str) -> Option<(&'static str, f64)> {
    TECHNIQUES
        .iter()
        .find(|(t, _, _)| *t == id)
        .map(|(_, description, rate)| (*description, *rate))
}

#[derive(Debug, Clone, Default)]
pub struct Advice {
    pub bypass_suggestions: Vec<BypassSuggestion>,
    pub catalog_gaps: Vec<String>,
}

/// One suggestion per distinct protection pattern id, covering all of its locations.
pub fn bypass_suggestions(protections: &[Protection], catalog: &PatternCatalog) -> Advice {
    let mut grouped: Vec<(&Protection, Vec<Location>)> = Vec::new();
    for p in protections {
        match grouped
            .iter_mut()
            .find(|(first, _)| first.finding.pattern_id == p.finding.pattern_id)
        {
            Some((_, locations)) => locations.push(p.finding.location.clone()),
            None => grouped.push((p, vec![p.finding.location.clone()])),
        }
    }

    let mut advice = Advice::default();
    for (protection, locations) in grouped {
        let id = &protection.finding.pattern_id;
        let registered = match catalog.get(id).map(|p| &p.kind) {
            Ok(PatternKind::Protection {
                bypass_technique: Some(t),
                ..
            }) => Some(t.as_str()),
            _ => None,
        };
        let curated = registered.and_then(|t| technique(t).map(|(d, r)| (t, d, r)));

        let suggestion = match curated {
            Some((technique, description, success_rate)) => BypassSuggestion {
                protection_id: id.clone(),
                target: protection.name.clone(),
                technique: technique.to_string(),
                description: description.to_string(),
                success_rate,
                generic: false,
                locations,
            },
            None => {
                warn!(
                    protection = %id,
                    technique = registered.unwrap_or("<none>"),
                    "No curated bypass technique; using generic placeholder"
                );
                advice.catalog_gaps.push(id.clone());
                BypassSuggestion {
                    protection_id: id.clone(),
                    target: protection.name.clone(),
                    technique: GENERIC_TECHNIQUE.to_string(),
                    description: format!(
                        "Trace how {} is enforced and evaluate it manually",
                        protection.name
                    ),
                    success_rate: GENERIC_SUCCESS_RATE,
                    generic: true,
                    locations,
                }
            }
        };
        advice.bypass_suggestions.push(suggestion);
    }

    advice
}

fn hint_recommendation(hint: &str) -> Option<&'static str> {
    match hint.to_ascii_lowercase().as_str() {
        "payment" | "iap" | "billing" => Some("Validate purchases on the server, not in the client"),
        "login" | "authentication" | "auth" => {
            Some("Enforce authentication server-side and keep session tokens out of plain storage")
        }
        "root_detection" | "root" => Some("Layer several independent root detection methods"),
        _ => None,
    }
}

/// Human-readable recommendations. The testing reminder is always last.
pub fn recommendations(
    vulnerabilities: &[Vulnerability],
    protection_count: usize,
    security_score: f64,
    category_hint: Option<&str>,
) -> Vec<String> {
    let mut out = Vec::new();
    let mut seen: Vec<&str> = Vec::new();

    for v in vulnerabilities {
        let id = v.finding.pattern_id.as_str();
        if seen.contains(&id) {
            continue;
        }
        match v.severity() {
            Severity::Critical => out.push(format!("CRITICAL: Fix {} vulnerability immediately", v.name)),
            Severity::High => out.push(format!("HIGH: Address {} vulnerability", v.name)),
            _ => continue,
        }
        seen.push(id);
    }

    out.push(
        match protection_count {
            0 => "No protections detected; the app offers no resistance to runtime tampering",
            n if n < 5 => "Consider adding more protection mechanisms",
            _ => "Good protection coverage detected",
        }
        .to_string(),
    );

    out.push(
        if security_score < 30.0 {
            "Security score extremely low; a comprehensive audit is recommended"
        } else if security_score < 50.0 {
            "Security score low; significant improvements needed"
        } else if security_score <= 80.0 {
            "Security score moderate; address the reported findings"
        } else {
            "Security score good; maintain current practices"
        }
        .to_string(),
    );

    if let Some(text) = category_hint.and_then(hint_recommendation) {
        out.push(text.to_string());
    }

    out.push(CLOSING_RECOMMENDATION.to_string());
    out
}

/// Steps grouped by vulnerability type: a count line per group, followed
/// by that group's guidance when it has one. Engine notices are left out.
pub fn mitigation_steps(vulnerabilities: &[Vulnerability]) -> Vec<String> {
    let mut grouped = vec![0usize; MITIGATION_GROUPS.len()];
    let mut other: Vec<(String, usize)> = Vec::new();

    for v in vulnerabilities.iter().filter(|v| !v.finding.is_notice()) {
        let kind = v.vuln_type.to_ascii_lowercase();
        let group = MITIGATION_GROUPS
            .iter()
            .position(|(_, keywords, _)| keywords.iter().any(|k| kind.contains(k)));
        match group {
            Some(i) => grouped[i] += 1,
            None => {
                let label = if kind.is_empty() {
                    "uncategorized".to_string()
                } else {
                    kind.replace('_', " ")
                };
                match other.iter_mut().find(|(l, _)| *l == label) {
                    Some((_, n)) => *n += 1,
                    None => other.push((label, 1)),
                }
            }
        }
    }

    let count_line = |n: usize, label: &str| {
        let noun = if n == 1 { "vulnerability" } else { "vulnerabilities" };
        format!("Address {} {} {}", n, label, noun)
    };

    let mut steps = Vec::new();
    for ((label, _, guidance), n) in MITIGATION_GROUPS.iter().zip(grouped) {
        if n > 0 {
            steps.push(count_line(n, label));
            steps.push(guidance.to_string());
        }
    }
    for (label, n) in other {
        steps.push(count_line(n, &label));
    }
    steps
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::PatternSpec;
    use crate::model::{Category, Finding};

    fn protection(id: &str, name: &str, path: &str) -> Protection {
        Protection {
            finding: Finding::new(
                id,
                Category::Protection,
                Location::new(path, Some(1)),
                "x",
                0.9,
                Some(Severity::High),
            ),
            name: name.to_string(),
            protection_type: String::new(),
            description: String::new(),
            related_findings: vec![],
        }
    }

    fn vuln(id: &str, name: &str, severity: Severity) -> Vulnerability {
        Vulnerability {
            finding: Finding::new(
                id,
                Category::Vulnerability,
                Location::new("a", None),
                "x",
                0.9,
                Some(severity),
            ),
            name: name.to_string(),
            vuln_type: String::new(),
            description: String::new(),
            fix_suggestion: None,
            cwe: None,
            risk_factor: 0.0,
            related_findings: vec![],
        }
    }

    #[test]
    fn test_one_suggestion_per_protection_id() {
        let catalog = PatternCatalog::builtin();
        let protections = vec![
            protection("ROOT_DETECTION", "Root Detection", "a.smali"),
            protection("ROOT_DETECTION", "Root Detection", "b.smali"),
            protection("ANTI_DEBUG", "Anti-Debugging", "c.smali"),
        ];

        let advice = bypass_suggestions(&protections, &catalog);
        assert_eq!(advice.bypass_suggestions.len(), 2);
        assert!(advice.catalog_gaps.is_empty());

        let root = &advice.bypass_suggestions[0];
        assert_eq!(root.technique, "hook_method_return_false");
        assert_eq!(root.success_rate, 0.85);
        assert_eq!(root.locations.len(), 2);
        assert!(!root.generic);
    }

    #[test]
    fn test_missing_technique_is_generic_and_reported() {
        let catalog = PatternCatalog::from_specs(vec![
            PatternSpec {
                id: "CUSTOM_GUARD".to_string(),
                category: Category::Protection,
                name: "Custom Guard".to_string(),
                description: String::new(),
                pattern_type: String::new(),
                pattern: "guard".to_string(),
                exclude: None,
                severity: Some(Severity::Medium),
                fix: None,
                cwe: None,
                bypass_technique: None,
                confidence: 0.9,
                tags: vec![],
                enabled: true,
            },
            PatternSpec {
                id: "ODD_GUARD".to_string(),
                category: Category::Protection,
                name: "Odd Guard".to_string(),
                description: String::new(),
                pattern_type: String::new(),
                pattern: "odd".to_string(),
                exclude: None,
                severity: Some(Severity::Low),
                fix: None,
                cwe: None,
                bypass_technique: Some("unregistered_trick".to_string()),
                confidence: 0.9,
                tags: vec![],
                enabled: true,
            },
        ]);
        let protections = vec![
            protection("CUSTOM_GUARD", "Custom Guard", "a"),
            protection("ODD_GUARD", "Odd Guard", "b"),
        ];

        let advice = bypass_suggestions(&protections, &catalog);
        assert_eq!(advice.catalog_gaps, vec!["CUSTOM_GUARD", "ODD_GUARD"]);
        for s in &advice.bypass_suggestions {
            assert!(s.generic);
            assert_eq!(s.technique, GENERIC_TECHNIQUE);
            assert_eq!(s.success_rate, 0.25);
        }
    }

    #[test]
    fn test_recommendations_order() {
        let vulns = vec![
            vuln("HARDCODED_CREDENTIAL", "Hardcoded Credential", Severity::Critical),
            vuln("HARDCODED_CREDENTIAL", "Hardcoded Credential", Severity::Critical),
            vuln("DEBUG_ENABLED", "Debug Enabled", Severity::High),
            vuln("BACKUP_ALLOWED", "Backup Allowed", Severity::Medium),
        ];
        let recs = recommendations(&vulns, 0, 25.0, Some("payment"));

        assert_eq!(recs[0], "CRITICAL: Fix Hardcoded Credential vulnerability immediately");
        assert_eq!(recs[1], "HIGH: Address Debug Enabled vulnerability");
        assert!(recs[2].starts_with("No protections detected"));
        assert!(recs[3].starts_with("Security score extremely low"));
        assert!(recs[4].contains("purchases"));
        assert_eq!(recs.last().unwrap(), CLOSING_RECOMMENDATION);
        assert_eq!(recs.len(), 6);
    }

    #[test]
    fn test_coverage_and_score_bands() {
        let recs = recommendations(&[], 3, 80.0, None);
        assert_eq!(recs[0], "Consider adding more protection mechanisms");
        assert!(recs[1].starts_with("Security score moderate"));

        let recs = recommendations(&[], 7, 100.0, None);
        assert_eq!(recs[0], "Good protection coverage detected");
        assert!(recs[1].starts_with("Security score good"));
        assert_eq!(recs.len(), 3);
    }

    #[test]
    fn test_mitigation_steps_group_by_type() {
        let mut vulns = vec![
            vuln("HARDCODED_CREDENTIAL", "Hardcoded Credential", Severity::Critical),
            vuln("INSECURE_STORAGE", "Insecure Storage", Severity::Medium),
            vuln("CLIENT_SIDE_AUTH_CHECK", "Client Auth", Severity::High),
            vuln("RAW_SQL_QUERY", "Raw SQL", Severity::Medium),
            vuln("MANIFEST_MISSING", "Manifest Missing", Severity::Info),
        ];
        let types = [
            "hardcoded_credential",
            "insecure_storage",
            "auth_logic",
            "sql_injection",
            "archive_structure",
        ];
        for (v, t) in vulns.iter_mut().zip(types) {
            v.vuln_type = t.to_string();
        }

        let steps = mitigation_steps(&vulns);
        assert_eq!(
            steps,
            vec![
                "Address 1 authentication vulnerability".to_string(),
                "Implement proper authentication validation on the server".to_string(),
                "Address 2 storage vulnerabilities".to_string(),
                "Implement encrypted storage mechanisms and keep secrets out of the package"
                    .to_string(),
                "Address 1 sql injection vulnerability".to_string(),
            ]
        );
        assert!(mitigation_steps(&[]).is_empty());
    }
}
