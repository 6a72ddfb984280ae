use crate::model::{AnalysisResult, ComplexityLevel, RiskLevel, Severity};
use anyhow::Result;
use tabled::{settings::Style, Table, Tabled};

#[derive(Tabled)]
struct VulnRow {
    #[tabled(rename = "Severity")]
    severity: String,
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Location")]
    location: String,
    #[tabled(rename = "Confidence")]
    confidence: String,
}

#[derive(Tabled)]
struct ProtectionRow {
    #[tabled(rename = "Strength")]
    severity: String,
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Location")]
    location: String,
}

#[derive(Tabled)]
struct FeatureRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Location")]
    location: String,
}

#[derive(Tabled)]
struct BypassRow {
    #[tabled(rename = "Protection")]
    target: String,
    #[tabled(rename = "Technique")]
    technique: String,
    #[tabled(rename = "Success")]
    success_rate: String,
    #[tabled(rename = "Sites")]
    sites: usize,
}

pub fn print_cli_table(result: &AnalysisResult) -> Result<()> {
    let info = &result.apk_info;

    println!();
    println!(
        "{} {}",
        info.display_name(),
        info.version_name.as_deref().unwrap_or("")
    );
    println!(
        "  File: {} ({} bytes, sha256 {})",
        info.file_name,
        info.file_size,
        info.short_hash()
    );
    if let (Some(min), Some(target)) = (info.min_sdk, info.target_sdk) {
        println!("  SDK: min {}, target {}", min, target);
    }
    println!(
        "  Entries: {} ({} bytecode, {} native libraries), manifest {}",
        info.entry_count,
        info.bytecode_files.len(),
        info.native_libraries.len(),
        info.manifest_format
    );
    println!(
        "  Code: {} bytes dex, {} bytes native, compression ratio {:.3}",
        info.total_dex_size, info.native_code_size, info.compression_ratio
    );
    if info.is_signed() {
        let blocks: Vec<String> = info
            .signing_blocks
            .iter()
            .map(|b| format!("{} ({})", b.path, b.algorithm))
            .collect();
        println!("  Signed: {}", blocks.join(", "));
    } else {
        println!("  Signed: no signature block found");
    }
    println!(
        "  Analyzed at: {} in {:.2}s",
        result.scanned_at.format("%Y-%m-%d %H:%M:%S UTC"),
        result.processing_time
    );

    if result.timed_out {
        println!();
        println!("\x1b[33mScan deadline expired; the results below are partial.\x1b[0m");
    }

    if !result.vulnerabilities.is_empty() {
        println!();
        println!("Found {} vulnerabilities:", result.vulnerabilities.len());
        println!();

        let rows: Vec<VulnRow> = result
            .vulnerabilities
            .iter()
            .map(|v| VulnRow {
                severity: format_severity(&v.severity()),
                id: v.finding.pattern_id.clone(),
                name: truncate(&v.name, 30),
                location: truncate(&v.finding.location.to_string(), 50),
                confidence: format!("{:.0}%", v.finding.confidence * 100.0),
            })
            .collect();

        let table = Table::new(rows).with(Style::rounded()).to_string();
        println!("{}", table);
    }

    if !result.protections.is_empty() {
        println!();
        println!("Found {} protections:", result.protections.len());
        println!();

        let rows: Vec<ProtectionRow> = result
            .protections
            .iter()
            .map(|p| ProtectionRow {
                severity: p.severity().to_string(),
                id: p.finding.pattern_id.clone(),
                name: truncate(&p.name, 30),
                location: truncate(&p.finding.location.to_string(), 50),
            })
            .collect();

        let table = Table::new(rows).with(Style::rounded()).to_string();
        println!("{}", table);
    }

    if !result.features.is_empty() {
        println!();
        println!("Found {} features:", result.features.len());
        println!();

        let rows: Vec<FeatureRow> = result
            .features
            .iter()
            .map(|f| FeatureRow {
                id: f.finding.pattern_id.clone(),
                name: truncate(&f.name, 30),
                location: truncate(&f.finding.location.to_string(), 50),
            })
            .collect();

        let table = Table::new(rows).with(Style::rounded()).to_string();
        println!("{}", table);
    }

    if !result.bypass_suggestions.is_empty() {
        println!();
        println!("Testing notes for detected protections:");
        println!();

        let rows: Vec<BypassRow> = result
            .bypass_suggestions
            .iter()
            .map(|s| BypassRow {
                target: truncate(&s.target, 30),
                technique: s.technique.clone(),
                success_rate: format!("{:.0}%", s.success_rate * 100.0),
                sites: s.locations.len(),
            })
            .collect();

        let table = Table::new(rows).with(Style::rounded()).to_string();
        println!("{}", table);
    }

    println!();
    print_summary(result);

    Ok(())
}

fn print_summary(result: &AnalysisResult) {
    let risk = &result.risk_assessment;

    println!("Summary:");
    println!(
        "  Vulnerabilities: {} critical, {} high, {} medium, {} low",
        result.count_by_severity(Severity::Critical),
        result.count_by_severity(Severity::High),
        result.count_by_severity(Severity::Medium),
        result.count_by_severity(Severity::Low)
    );
    println!("  Protections: {}", result.protections.len());
    println!("  Complexity: {}", format_complexity(result.complexity_level));
    println!(
        "  Overall risk: {} (exploitation likelihood {})",
        format_risk_level(risk.overall_risk),
        risk.exploitation_likelihood
    );
    if !result.catalog_gaps.is_empty() {
        println!("  No curated technique for: {}", result.catalog_gaps.join(", "));
    }

    println!();
    println!("Recommendations:");
    for (i, rec) in result.recommendations.iter().enumerate() {
        println!("  {}. {}", i + 1, rec);
    }

    println!();
    println!(
        "Security Score: {:.2}/100 {}",
        result.security_score,
        score_indicator(result.security_score)
    );
}

fn format_severity(severity: &Severity) -> String {
    match severity {
        Severity::Critical => "\x1b[31mCRITICAL\x1b[0m".to_string(),
        Severity::High => "\x1b[91mHIGH\x1b[0m".to_string(),
        Severity::Medium => "\x1b[33mMEDIUM\x1b[0m".to_string(),
        Severity::Low => "\x1b[32mLOW\x1b[0m".to_string(),
        Severity::Info => "INFO".to_string(),
    }
}

fn format_risk_level(level: RiskLevel) -> String {
    match level {
        RiskLevel::Critical => "\x1b[31mCRITICAL\x1b[0m".to_string(),
        RiskLevel::High => "\x1b[91mHIGH\x1b[0m".to_string(),
        RiskLevel::Medium => "\x1b[33mMEDIUM\x1b[0m".to_string(),
        other => other.to_string(),
    }
}

fn format_complexity(level: ComplexityLevel) -> String {
    match level {
        ComplexityLevel::Trivial => "\x1b[31mTRIVIAL\x1b[0m".to_string(),
        ComplexityLevel::Low => "\x1b[33mLOW\x1b[0m".to_string(),
        other => other.to_string(),
    }
}

fn score_indicator(score: f64) -> &'static str {
    if score > 80.0 {
        "[Good]"
    } else if score >= 50.0 {
        "[Fair]"
    } else if score >= 30.0 {
        "[Poor]"
    } else {
        "[Critical]"
    }
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}
