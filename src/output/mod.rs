mod cli;
mod json;
mod sarif;

pub use cli::print_cli_table;
pub use json::{generate_json_string, print_json};
pub use sarif::{generate_sarif_string, print_sarif};

use crate::model::AnalysisResult;
use anyhow::Result;

/// Output format for analysis results
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable table format
    Table,
    /// JSON format for programmatic use
    Json,
    /// SARIF format for code scanning dashboards
    Sarif,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "table" => Ok(OutputFormat::Table),
            "json" => Ok(OutputFormat::Json),
            "sarif" => Ok(OutputFormat::Sarif),
            _ => Err(format!(
                "Unknown format: {}. Use 'table', 'json', or 'sarif'",
                s
            )),
        }
    }
}

pub fn print_results(results: &[AnalysisResult], format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Table => {
            for result in results {
                print_cli_table(result)?;
            }
            Ok(())
        }
        OutputFormat::Json => print_json(results),
        OutputFormat::Sarif => print_sarif(results),
    }
}

/// Format results to string for file output
pub fn format_results_to_string(results: &[AnalysisResult], format: OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Sarif => generate_sarif_string(results),
        // Tables don't survive being written to a file; use JSON instead.
        OutputFormat::Json | OutputFormat::Table => generate_json_string(results),
    }
}
