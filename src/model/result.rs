use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Feature, Location, PackageInfo, Protection, Severity, Vulnerability};

/// Estimated effort needed to defeat the app's defenses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ComplexityLevel {
    Trivial,
    Low,
    Medium,
    High,
    Extreme,
}

impl std::fmt::Display for ComplexityLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ComplexityLevel::Trivial => "TRIVIAL",
            ComplexityLevel::Low => "LOW",
            ComplexityLevel::Medium => "MEDIUM",
            ComplexityLevel::High => "HIGH",
            ComplexityLevel::Extreme => "EXTREME",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RiskLevel {
    Minimal,
    Low,
    Medium,
    High,
    Critical,
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RiskLevel::Minimal => "MINIMAL",
            RiskLevel::Low => "LOW",
            RiskLevel::Medium => "MEDIUM",
            RiskLevel::High => "HIGH",
            RiskLevel::Critical => "CRITICAL",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExploitationLikelihood {
    VeryHigh,
    High,
    Medium,
    Moderate,
    Low,
}

impl std::fmt::Display for ExploitationLikelihood {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ExploitationLikelihood::VeryHigh => "VERY_HIGH",
            ExploitationLikelihood::High => "HIGH",
            ExploitationLikelihood::Medium => "MEDIUM",
            ExploitationLikelihood::Moderate => "MODERATE",
            ExploitationLikelihood::Low => "LOW",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Accessibility {
    VeryEasy,
    Easy,
    Moderate,
    Hard,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ExploitationDifficulty {
    Trivial,
    Easy,
    Moderate,
    Difficult,
    Impossible,
}

/// Exploitation vectors. Declaration order is the sort order in reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttackVector {
    AuthenticationBypass,
    PaymentBypass,
    RootDetectionBypass,
    CertificatePinningBypass,
    DebugDetectionBypass,
    NetworkSecurityBypass,
    WeakCryptography,
    PermissionBypass,
    InputValidation,
    Injection,
    IntentSecurity,
}

impl AttackVector {
    pub fn is_primary(&self) -> bool {
        matches!(
            self,
            AttackVector::AuthenticationBypass
                | AttackVector::PaymentBypass
                | AttackVector::RootDetectionBypass
                | AttackVector::CertificatePinningBypass
                | AttackVector::DebugDetectionBypass
                | AttackVector::NetworkSecurityBypass
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RiskFactors {
    pub critical: f64,
    pub high: f64,
    pub medium: f64,
    pub low: f64,
    pub protection_discount: f64,
    pub total: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttackSurface {
    pub primary_vectors: BTreeSet<AttackVector>,
    pub secondary_vectors: BTreeSet<AttackVector>,
    pub surface_score: u32,
    pub accessibility: Accessibility,
    pub exploitation_difficulty: ExploitationDifficulty,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub risk_factors: RiskFactors,
    pub overall_risk: RiskLevel,
    pub attack_surface: AttackSurface,
    pub exploitation_likelihood: ExploitationLikelihood,
}

/// Suggested countermeasure technique for one fired protection pattern.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BypassSuggestion {
    pub protection_id: String,
    pub target: String,
    pub technique: String,
    pub description: String,
    pub success_rate: f64,
    pub generic: bool,
    pub locations: Vec<Location>,
}

/// Per-scan options supplied by the caller.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisOptions {
    /// Feature patterns tagged with this hint are listed first. Nothing is excluded.
    pub category_hint: Option<String>,
    /// Allow-list of pattern ids; empty runs every enabled pattern.
    pub include_pattern_ids: Vec<String>,
    /// Bypass any result cache the caller maintains.
    pub deep_analysis: bool,
    pub timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub apk_info: PackageInfo,
    pub vulnerabilities: Vec<Vulnerability>,
    pub protections: Vec<Protection>,
    pub features: Vec<Feature>,
    pub security_score: f64,
    pub complexity_level: ComplexityLevel,
    pub risk_assessment: RiskAssessment,
    pub bypass_suggestions: Vec<BypassSuggestion>,
    pub recommendations: Vec<String>,
    /// One summary line per vulnerability group, each followed by its guidance.
    pub mitigation_steps: Vec<String>,
    pub processing_time: f64,
    pub timed_out: bool,
    pub scanned_at: DateTime<Utc>,
    pub catalog_gaps: Vec<String>,
}

impl AnalysisResult {
    /// Highest severity among vulnerabilities, ignoring engine notices and
    /// informational patterns.
    pub fn max_severity(&self) -> Option<Severity> {
        self.vulnerabilities
            .iter()
            .filter(|v| !v.finding.is_notice())
            .map(|v| v.severity())
            .filter(|s| *s != Severity::Info)
            .min_by_key(|s| s.rank())
    }

    pub fn count_by_severity(&self, severity: Severity) -> usize {
        self.vulnerabilities
            .iter()
            .filter(|v| v.severity() == severity)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enum_wire_names() {
        assert_eq!(
            serde_json::to_string(&ExploitationLikelihood::VeryHigh).unwrap(),
            "\"VERY_HIGH\""
        );
        assert_eq!(
            serde_json::to_string(&Accessibility::VeryEasy).unwrap(),
            "\"VERY_EASY\""
        );
        assert_eq!(
            serde_json::to_string(&AttackVector::CertificatePinningBypass).unwrap(),
            "\"certificate_pinning_bypass\""
        );
        assert_eq!(
            serde_json::to_string(&ComplexityLevel::Extreme).unwrap(),
            "\"EXTREME\""
        );
    }

    #[test]
    fn test_primary_vectors() {
        assert!(AttackVector::PaymentBypass.is_primary());
        assert!(!AttackVector::WeakCryptography.is_primary());
    }

    #[test]
    fn test_options_default_from_empty_json() {
        let options: AnalysisOptions = serde_json::from_str("{}").unwrap();
        assert_eq!(options, AnalysisOptions::default());
    }
}
