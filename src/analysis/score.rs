//! Security score, complexity level and risk assessment.

use std::collections::BTreeSet;

use crate::model::{
    Accessibility, AttackSurface, AttackVector, ComplexityLevel, ExploitationDifficulty,
    ExploitationLikelihood, Protection, RiskAssessment, RiskFactors, RiskLevel, Severity,
    Vulnerability,
};

/// Score points earned per distinct protection, before the cap.
const PROTECTION_BONUS: f64 = 2.0;

/// Keys are substrings of the lower-cased `type name` text. Within each
/// tier (primary or secondary) the first matching rule wins.
const VECTOR_RULES: &[(&[&str], AttackVector)] = &[
    (&["login", "auth", "credential"], AttackVector::AuthenticationBypass),
    (&["payment", "purchase", "iap", "billing"], AttackVector::PaymentBypass),
    (&["root", "jailbreak"], AttackVector::RootDetectionBypass),
    (&["certificate", "pinning"], AttackVector::CertificatePinningBypass),
    (&["debug"], AttackVector::DebugDetectionBypass),
    (&["network", "http", "cleartext"], AttackVector::NetworkSecurityBypass),
    (&["crypto", "encrypt", "cipher"], AttackVector::WeakCryptography),
    (&["permission", "privilege"], AttackVector::PermissionBypass),
    (&["input", "validation"], AttackVector::InputValidation),
    (&["sql", "inject", "xss", "script"], AttackVector::Injection),
    (&["intent", "broadcast"], AttackVector::IntentSecurity),
];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SeverityCounts {
    pub critical: usize,
    pub high: usize,
    pub medium: usize,
    pub low: usize,
}

impl SeverityCounts {
    pub fn of(vulnerabilities: &[Vulnerability]) -> Self {
        let mut counts = Self::default();
        for v in vulnerabilities {
            match v.severity() {
                Severity::Critical => counts.critical += 1,
                Severity::High => counts.high += 1,
                Severity::Medium => counts.medium += 1,
                Severity::Low => counts.low += 1,
                Severity::Info => {}
            }
        }
        counts
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// `100 − Σ weight × multiplier × confidence + min(2 × P, cap)`, clamped to [0, 100].
pub fn security_score(vulnerabilities: &[Vulnerability], protections: &[Protection], cap: f64) -> f64 {
    let deductions: f64 = vulnerabilities
        .iter()
        .map(|v| {
            let severity = v.severity();
            severity.weight() * severity.score_multiplier() * v.finding.confidence
        })
        .sum();
    let bonus = (PROTECTION_BONUS * protections.len() as f64).min(cap);

    round2((100.0 - deductions + bonus).clamp(0.0, 100.0))
}

pub fn complexity_level(protections: usize, vulnerabilities: usize) -> ComplexityLevel {
    if protections == 0 {
        return ComplexityLevel::Trivial;
    }
    let ratio = protections as f64 / vulnerabilities.max(1) as f64;
    if ratio > 5.0 {
        ComplexityLevel::Extreme
    } else if ratio > 3.0 {
        ComplexityLevel::High
    } else if ratio > 1.5 {
        ComplexityLevel::Medium
    } else if ratio > 0.5 {
        ComplexityLevel::Low
    } else {
        ComplexityLevel::Trivial
    }
}

pub fn risk_factors(counts: SeverityCounts, protections: usize) -> RiskFactors {
    let critical = counts.critical as f64 * 2.5;
    let high = counts.high as f64 * 1.5;
    let medium = counts.medium as f64;
    let low = counts.low as f64 * 0.5;
    let protection_discount = -0.2 * protections as f64;

    RiskFactors {
        critical,
        high,
        medium,
        low,
        protection_discount: round2(protection_discount),
        total: round2(critical + high + medium + low + protection_discount),
    }
}

pub fn risk_level(total: f64) -> RiskLevel {
    if total > 20.0 {
        RiskLevel::Critical
    } else if total > 15.0 {
        RiskLevel::High
    } else if total > 10.0 {
        RiskLevel::Medium
    } else if total > 5.0 {
        RiskLevel::Low
    } else {
        RiskLevel::Minimal
    }
}

fn classify(text: &str, primary: bool) -> Option<AttackVector> {
    VECTOR_RULES
        .iter()
        .filter(|(_, vector)| vector.is_primary() == primary)
        .find(|(keys, _)| keys.iter().any(|k| text.contains(k)))
        .map(|(_, vector)| *vector)
}

/// Primary and secondary vector for one vulnerability, if any.
pub fn classify_vulnerability(v: &Vulnerability) -> (Option<AttackVector>, Option<AttackVector>) {
    let text = format!("{} {}", v.vuln_type, v.name).to_lowercase();
    (classify(&text, true), classify(&text, false))
}

pub fn attack_surface(vulnerabilities: &[Vulnerability]) -> AttackSurface {
    let mut primary_vectors = BTreeSet::new();
    let mut secondary_vectors = BTreeSet::new();

    for v in vulnerabilities
        .iter()
        .filter(|v| !v.finding.is_notice() && v.severity() != Severity::Info)
    {
        let (primary, secondary) = classify_vulnerability(v);
        primary_vectors.extend(primary);
        secondary_vectors.extend(secondary);
    }

    let surface_score = (primary_vectors.len() * 3 + secondary_vectors.len()) as u32;
    let (accessibility, exploitation_difficulty) = match surface_score {
        s if s > 15 => (Accessibility::VeryEasy, ExploitationDifficulty::Trivial),
        s if s > 10 => (Accessibility::Easy, ExploitationDifficulty::Easy),
        s if s > 5 => (Accessibility::Moderate, ExploitationDifficulty::Moderate),
        s if s > 0 => (Accessibility::Hard, ExploitationDifficulty::Difficult),
        _ => (Accessibility::None, ExploitationDifficulty::Impossible),
    };

    AttackSurface {
        primary_vectors,
        secondary_vectors,
        surface_score,
        accessibility,
        exploitation_difficulty,
    }
}

pub fn exploitation_likelihood(counts: SeverityCounts, protections: usize) -> ExploitationLikelihood {
    if counts.critical > 0 || counts.high > 2 {
        ExploitationLikelihood::VeryHigh
    } else if counts.high > 0 || counts.medium > 5 {
        ExploitationLikelihood::High
    } else if counts.medium > 0 || counts.low > 10 {
        ExploitationLikelihood::Medium
    } else if protections > 5 {
        ExploitationLikelihood::Low
    } else {
        ExploitationLikelihood::Moderate
    }
}

pub fn assess(vulnerabilities: &[Vulnerability], protections: &[Protection]) -> RiskAssessment {
    let counts = SeverityCounts::of(vulnerabilities);
    let factors = risk_factors(counts, protections.len());

    RiskAssessment {
        overall_risk: risk_level(factors.total),
        risk_factors: factors,
        attack_surface: attack_surface(vulnerabilities),
        exploitation_likelihood: exploitation_likelihood(counts, protections.len()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Category, Finding, Location};

    fn vuln(kind: &str, name: &str, severity: Severity, confidence: f64) -> Vulnerability {
        Vulnerability {
            finding: Finding::new(
                name.to_uppercase(),
                Category::Vulnerability,
                Location::new("a", None),
                "x",
                confidence,
                Some(severity),
            ),
            name: name.to_string(),
            vuln_type: kind.to_string(),
            description: String::new(),
            fix_suggestion: None,
            cwe: None,
            risk_factor: severity.weight() * confidence,
            related_findings: vec![],
        }
    }

    fn protection(id: &str) -> Protection {
        Protection {
            finding: Finding::new(
                id,
                Category::Protection,
                Location::new("a", None),
                "x",
                0.9,
                Some(Severity::High),
            ),
            name: id.to_string(),
            protection_type: String::new(),
            description: String::new(),
            related_findings: vec![],
        }
    }

    #[test]
    fn test_score_stays_in_range() {
        let many: Vec<_> = (0..500)
            .map(|_| vuln("hardcoded_credential", "Secret", Severity::Critical, 1.0))
            .collect();
        assert_eq!(security_score(&many, &[], 30.0), 0.0);

        let shields: Vec<_> = (0..500).map(|i| protection(&format!("P{}", i))).collect();
        assert_eq!(security_score(&[], &shields, 50.0), 100.0);
        assert_eq!(security_score(&[], &[], 30.0), 100.0);
    }

    #[test]
    fn test_score_formula() {
        let vulns = vec![
            vuln("debug_configuration", "Debug Enabled", Severity::High, 0.9),
            vuln("data_backup", "Backup Allowed", Severity::Medium, 0.9),
        ];
        // 100 - 8*1.2*0.9 - 5*0.8*0.9 = 87.76
        assert_eq!(security_score(&vulns, &[], 30.0), 87.76);

        let protections: Vec<_> = (0..3).map(|i| protection(&format!("P{}", i))).collect();
        assert_eq!(security_score(&vulns, &protections, 30.0), 93.76);
    }

    #[test]
    fn test_info_findings_carry_no_weight() {
        let vulns = vec![vuln("archive_structure", "Entry Unreadable", Severity::Info, 1.0)];
        assert_eq!(security_score(&vulns, &[], 30.0), 100.0);
    }

    #[test]
    fn test_bonus_cap() {
        let shields: Vec<_> = (0..40).map(|i| protection(&format!("P{}", i))).collect();
        let vulns = vec![vuln("x", "X", Severity::Critical, 1.0); 5];
        // 100 - 5*15 + min(80, cap)
        assert_eq!(security_score(&vulns, &shields, 30.0), 55.0);
        assert_eq!(security_score(&vulns, &shields, 50.0), 75.0);
    }

    #[test]
    fn test_complexity_levels() {
        assert_eq!(complexity_level(0, 0), ComplexityLevel::Trivial);
        assert_eq!(complexity_level(0, 10), ComplexityLevel::Trivial);
        assert_eq!(complexity_level(5, 0), ComplexityLevel::High);
        assert_eq!(complexity_level(6, 0), ComplexityLevel::Extreme);
        assert_eq!(complexity_level(4, 2), ComplexityLevel::Medium);
        assert_eq!(complexity_level(1, 1), ComplexityLevel::Low);
        assert_eq!(complexity_level(1, 2), ComplexityLevel::Trivial);
    }

    #[test]
    fn test_risk_factors_and_level() {
        let counts = SeverityCounts {
            critical: 4,
            high: 6,
            medium: 2,
            low: 1,
        };
        let factors = risk_factors(counts, 5);
        assert_eq!(factors.critical, 10.0);
        assert_eq!(factors.high, 9.0);
        assert_eq!(factors.protection_discount, -1.0);
        assert_eq!(factors.total, 20.5);
        assert_eq!(risk_level(factors.total), RiskLevel::Critical);

        assert_eq!(risk_level(15.5), RiskLevel::High);
        assert_eq!(risk_level(10.1), RiskLevel::Medium);
        assert_eq!(risk_level(5.0), RiskLevel::Minimal);
        assert_eq!(risk_level(-3.0), RiskLevel::Minimal);
    }

    #[test]
    fn test_attack_surface() {
        let vulns = vec![
            vuln("debug_configuration", "Debug Enabled", Severity::High, 0.9),
            vuln("weak_crypto", "Weak Cryptography", Severity::High, 0.9),
            vuln("certificate_validation", "Permissive Hostname Verifier", Severity::High, 0.9),
            vuln("archive_structure", "Manifest Missing", Severity::Info, 1.0),
        ];
        let surface = attack_surface(&vulns);

        assert_eq!(
            surface.primary_vectors.iter().copied().collect::<Vec<_>>(),
            vec![
                AttackVector::CertificatePinningBypass,
                AttackVector::DebugDetectionBypass
            ]
        );
        assert_eq!(
            surface.secondary_vectors.iter().copied().collect::<Vec<_>>(),
            vec![AttackVector::WeakCryptography, AttackVector::InputValidation]
        );
        assert_eq!(surface.surface_score, 8);
        assert_eq!(surface.accessibility, Accessibility::Moderate);

        let empty = attack_surface(&[]);
        assert_eq!(empty.surface_score, 0);
        assert_eq!(empty.exploitation_difficulty, ExploitationDifficulty::Impossible);
    }

    #[test]
    fn test_vector_tiers_are_independent() {
        let v = vuln("weak_crypto", "Debug Key Cipher", Severity::High, 0.9);
        let (primary, secondary) = classify_vulnerability(&v);
        assert_eq!(primary, Some(AttackVector::DebugDetectionBypass));
        assert_eq!(secondary, Some(AttackVector::WeakCryptography));
        assert!(primary.unwrap().is_primary());
        assert!(!secondary.unwrap().is_primary());
    }

    #[test]
    fn test_exploitation_likelihood() {
        let none = SeverityCounts::default();
        assert_eq!(exploitation_likelihood(none, 0), ExploitationLikelihood::Moderate);
        assert_eq!(exploitation_likelihood(none, 6), ExploitationLikelihood::Low);
        assert_eq!(
            exploitation_likelihood(SeverityCounts { critical: 1, ..none }, 10),
            ExploitationLikelihood::VeryHigh
        );
        assert_eq!(
            exploitation_likelihood(SeverityCounts { high: 3, ..none }, 0),
            ExploitationLikelihood::VeryHigh
        );
        assert_eq!(
            exploitation_likelihood(SeverityCounts { high: 1, ..none }, 0),
            ExploitationLikelihood::High
        );
        assert_eq!(
            exploitation_likelihood(SeverityCounts { medium: 6, ..none }, 0),
            ExploitationLikelihood::High
        );
        assert_eq!(
            exploitation_likelihood(SeverityCounts { low: 11, ..none }, 0),
            ExploitationLikelihood::Medium
        );
    }
}
