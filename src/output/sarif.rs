//! SARIF (Static Analysis Results Interchange Format) output.
//!
//! Each analyzed archive becomes one run. Vulnerabilities and protections
//! are reported as results pointing at the archive entry and line where
//! they were found, so the output can be uploaded to code scanning
//! dashboards.

use std::collections::BTreeMap;

use crate::model::{AnalysisResult, Finding, Severity, Vulnerability};
use anyhow::Result;
use serde::Serialize;

/// SARIF v2.1.0 schema root
#[derive(Serialize)]
struct SarifReport {
    #[serde(rename = "$schema")]
    schema: &'static str,
    version: &'static str,
    runs: Vec<SarifRun>,
}

#[derive(Serialize)]
struct SarifRun {
    tool: SarifTool,
    #[serde(rename = "originalUriBaseIds")]
    original_uri_base_ids: BTreeMap<&'static str, SarifArtifactLocation>,
    results: Vec<SarifResult>,
}

#[derive(Serialize)]
struct SarifTool {
    driver: SarifDriver,
}

#[derive(Serialize)]
struct SarifDriver {
    name: &'static str,
    version: &'static str,
    rules: Vec<SarifRule>,
}

#[derive(Serialize)]
struct SarifRule {
    id: String,
    name: String,
    #[serde(rename = "shortDescription")]
    short_description: SarifMessage,
    #[serde(rename = "fullDescription", skip_serializing_if = "Option::is_none")]
    full_description: Option<SarifMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    help: Option<SarifMessage>,
    #[serde(rename = "defaultConfiguration")]
    default_configuration: SarifRuleConfiguration,
}

#[derive(Serialize)]
struct SarifRuleConfiguration {
    level: &'static str,
}

#[derive(Serialize)]
struct SarifResult {
    #[serde(rename = "ruleId")]
    rule_id: String,
    level: &'static str,
    message: SarifMessage,
    locations: Vec<SarifLocation>,
    properties: SarifProperties,
}

#[derive(Serialize)]
struct SarifProperties {
    category: &'static str,
    confidence: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    cwe: Option<String>,
}

#[derive(Serialize)]
struct SarifMessage {
    text: String,
}

#[derive(Serialize)]
struct SarifLocation {
    #[serde(rename = "physicalLocation")]
    physical_location: SarifPhysicalLocation,
}

#[derive(Serialize)]
struct SarifPhysicalLocation {
    #[serde(rename = "artifactLocation")]
    artifact_location: SarifArtifactLocation,
    #[serde(skip_serializing_if = "Option::is_none")]
    region: Option<SarifRegion>,
}

#[derive(Serialize)]
struct SarifArtifactLocation {
    uri: String,
    #[serde(rename = "uriBaseId", skip_serializing_if = "Option::is_none")]
    uri_base_id: Option<&'static str>,
}

#[derive(Serialize)]
struct SarifRegion {
    #[serde(rename = "startLine")]
    start_line: usize,
}

const ARCHIVE_BASE: &str = "ARCHIVE";

fn severity_to_sarif_level(severity: Severity) -> &'static str {
    match severity {
        Severity::Critical | Severity::High => "error",
        Severity::Medium => "warning",
        Severity::Low | Severity::Info => "note",
    }
}

/// Engine notices describe the scan itself, not the archive.
fn vulnerability_level(vuln: &Vulnerability) -> &'static str {
    if vuln.finding.is_notice() {
        "none"
    } else {
        severity_to_sarif_level(vuln.severity())
    }
}

fn location(finding: &Finding) -> SarifLocation {
    SarifLocation {
        physical_location: SarifPhysicalLocation {
            artifact_location: SarifArtifactLocation {
                uri: finding.location.path.clone(),
                uri_base_id: Some(ARCHIVE_BASE),
            },
            region: finding
                .location
                .line
                .map(|start_line| SarifRegion { start_line }),
        },
    }
}

fn build_run(result: &AnalysisResult) -> SarifRun {
    let mut rules: BTreeMap<String, SarifRule> = BTreeMap::new();
    let mut results = Vec::new();

    for vuln in &result.vulnerabilities {
        let level = vulnerability_level(vuln);
        rules
            .entry(vuln.finding.pattern_id.clone())
            .or_insert_with(|| SarifRule {
                id: vuln.finding.pattern_id.clone(),
                name: vuln.name.clone(),
                short_description: SarifMessage {
                    text: vuln.name.clone(),
                },
                full_description: (!vuln.description.is_empty()).then(|| SarifMessage {
                    text: vuln.description.clone(),
                }),
                help: vuln
                    .fix_suggestion
                    .as_ref()
                    .map(|fix| SarifMessage { text: fix.clone() }),
                default_configuration: SarifRuleConfiguration { level },
            });

        results.push(SarifResult {
            rule_id: vuln.finding.pattern_id.clone(),
            level,
            message: SarifMessage {
                text: format!(
                    "{} {} in {}: {}",
                    vuln.severity(),
                    vuln.name,
                    vuln.finding.location,
                    vuln.finding.matched_text
                ),
            },
            locations: vec![location(&vuln.finding)],
            properties: SarifProperties {
                category: vuln.finding.category.as_str(),
                confidence: vuln.finding.confidence,
                cwe: vuln.cwe.clone(),
            },
        });
    }

    for protection in &result.protections {
        rules
            .entry(protection.finding.pattern_id.clone())
            .or_insert_with(|| SarifRule {
                id: protection.finding.pattern_id.clone(),
                name: protection.name.clone(),
                short_description: SarifMessage {
                    text: protection.name.clone(),
                },
                full_description: (!protection.description.is_empty()).then(|| SarifMessage {
                    text: protection.description.clone(),
                }),
                help: None,
                default_configuration: SarifRuleConfiguration { level: "note" },
            });

        results.push(SarifResult {
            rule_id: protection.finding.pattern_id.clone(),
            level: "note",
            message: SarifMessage {
                text: format!(
                    "Protection {} detected in {}",
                    protection.name, protection.finding.location
                ),
            },
            locations: vec![location(&protection.finding)],
            properties: SarifProperties {
                category: protection.finding.category.as_str(),
                confidence: protection.finding.confidence,
                cwe: None,
            },
        });
    }

    let mut base = BTreeMap::new();
    base.insert(
        ARCHIVE_BASE,
        SarifArtifactLocation {
            uri: format!("{}/", result.apk_info.file_name),
            uri_base_id: None,
        },
    );

    SarifRun {
        tool: SarifTool {
            driver: SarifDriver {
                name: "apkscan",
                version: env!("CARGO_PKG_VERSION"),
                rules: rules.into_values().collect(),
            },
        },
        original_uri_base_ids: base,
        results,
    }
}

/// Generate SARIF as a string (for file output)
pub fn generate_sarif_string(results: &[AnalysisResult]) -> Result<String> {
    let report = SarifReport {
        schema: "https://raw.githubusercontent.com/oasis-tcs/sarif-spec/master/Schemata/sarif-schema-2.1.0.json",
        version: "2.1.0",
        runs: results.iter().map(build_run).collect(),
    };

    Ok(serde_json::to_string_pretty(&report)?)
}

/// Generate and print SARIF output
pub fn print_sarif(results: &[AnalysisResult]) -> Result<()> {
    println!("{}", generate_sarif_string(results)?);
    Ok(())
}
