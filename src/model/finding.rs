use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
    Info,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Critical => "CRITICAL",
            Severity::High => "HIGH",
            Severity::Medium => "MEDIUM",
            Severity::Low => "LOW",
            Severity::Info => "INFO",
        }
    }

    /// Fixed weight used for risk factors and score deductions.
    pub fn weight(&self) -> f64 {
        match self {
            Severity::Critical => 10.0,
            Severity::High => 8.0,
            Severity::Medium => 5.0,
            Severity::Low => 2.0,
            Severity::Info => 1.0,
        }
    }

    /// Multiplier applied on top of [`weight`](Self::weight) when scoring.
    pub fn score_multiplier(&self) -> f64 {
        match self {
            Severity::Critical => 1.5,
            Severity::High => 1.2,
            Severity::Medium => 0.8,
            Severity::Low => 0.5,
            Severity::Info => 0.0,
        }
    }

    /// Sort key, most severe first.
    pub fn rank(&self) -> u8 {
        match self {
            Severity::Critical => 0,
            Severity::High => 1,
            Severity::Medium => 2,
            Severity::Low => 3,
            Severity::Info => 4,
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "CRITICAL" => Ok(Severity::Critical),
            "HIGH" => Ok(Severity::High),
            "MEDIUM" => Ok(Severity::Medium),
            "LOW" => Ok(Severity::Low),
            "INFO" => Ok(Severity::Info),
            _ => Err(format!("Unknown severity: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Vulnerability,
    Protection,
    Feature,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Vulnerability => "vulnerability",
            Category::Protection => "protection",
            Category::Feature => "feature",
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "vulnerability" | "vuln" => Ok(Category::Vulnerability),
            "protection" => Ok(Category::Protection),
            "feature" => Ok(Category::Feature),
            _ => Err(format!(
                "Unknown category: {}. Use 'vulnerability', 'protection', or 'feature'",
                s
            )),
        }
    }
}

/// Where a finding was observed: an entry path inside the archive and,
/// for line-oriented sources, the 1-based line.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Location {
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<usize>,
}

impl Location {
    pub fn new(path: impl Into<String>, line: Option<usize>) -> Self {
        Self {
            path: path.into(),
            line,
        }
    }
}

impl std::fmt::Display for Location {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.line {
            Some(line) => write!(f, "{}:{}", self.path, line),
            None => write!(f, "{}", self.path),
        }
    }
}

/// One pattern match. Created by the content scanner and never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    pub pattern_id: String,
    pub category: Category,
    pub location: Location,
    pub matched_text: String,
    pub confidence: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub severity: Option<Severity>,
    /// Byte offset of the match within the scanned text. Only used for ordering.
    #[serde(skip)]
    pub offset: usize,
}

impl Finding {
    pub fn new(
        pattern_id: impl Into<String>,
        category: Category,
        location: Location,
        matched_text: impl Into<String>,
        confidence: f64,
        severity: Option<Severity>,
    ) -> Self {
        Self {
            pattern_id: pattern_id.into(),
            category,
            location,
            matched_text: matched_text.into(),
            confidence: confidence.clamp(0.0, 1.0),
            severity,
            offset: 0,
        }
    }

    pub fn at_offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    /// Informational finding for a recovered problem (see [`notice`]).
    pub fn notice(id: &str, path: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::new(
            id,
            Category::Vulnerability,
            Location::new(path, None),
            detail,
            1.0,
            Some(Severity::Info),
        )
    }

    pub fn is_notice(&self) -> bool {
        notice::ALL.contains(&self.pattern_id.as_str())
    }
}

/// Ids of informational findings produced by the engine itself rather than the catalog.
pub mod notice {
    pub const MANIFEST_MISSING: &str = "MANIFEST_MISSING";
    pub const MANIFEST_UNREADABLE: &str = "MANIFEST_UNREADABLE";
    pub const ENTRY_UNREADABLE: &str = "ENTRY_UNREADABLE";
    pub const SCAN_TIMEOUT: &str = "SCAN_TIMEOUT";

    pub const ALL: &[&str] = &[MANIFEST_MISSING, MANIFEST_UNREADABLE, ENTRY_UNREADABLE, SCAN_TIMEOUT];

    /// `(name, type, description)` for a notice id.
    pub fn describe(id: &str) -> Option<(&'static str, &'static str, &'static str)> {
        match id {
            MANIFEST_MISSING => Some((
                "Manifest Missing",
                "archive_structure",
                "The archive has no AndroidManifest.xml; package metadata is unavailable",
            )),
            MANIFEST_UNREADABLE => Some((
                "Manifest Unreadable",
                "archive_structure",
                "AndroidManifest.xml could not be decoded; package metadata is unavailable",
            )),
            ENTRY_UNREADABLE => Some((
                "Entry Unreadable",
                "archive_structure",
                "An archive entry could not be read or decoded and was skipped",
            )),
            SCAN_TIMEOUT => Some((
                "Scan Timeout",
                "scan_incomplete",
                "The scan deadline expired; results are partial",
            )),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vulnerability {
    #[serde(flatten)]
    pub finding: Finding,
    pub name: String,
    #[serde(rename = "type")]
    pub vuln_type: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fix_suggestion: Option<String>,
    /// CWE identifier, e.g. `CWE-798`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwe: Option<String>,
    pub risk_factor: f64,
    pub related_findings: Vec<String>,
}

impl Vulnerability {
    pub fn severity(&self) -> Severity {
        self.finding.severity.unwrap_or(Severity::Info)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Protection {
    #[serde(flatten)]
    pub finding: Finding,
    pub name: String,
    #[serde(rename = "type")]
    pub protection_type: String,
    pub description: String,
    pub related_findings: Vec<String>,
}

impl Protection {
    pub fn severity(&self) -> Severity {
        self.finding.severity.unwrap_or(Severity::Info)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feature {
    #[serde(flatten)]
    pub finding: Finding,
    pub name: String,
    #[serde(rename = "type")]
    pub feature_type: String,
    pub description: String,
}
