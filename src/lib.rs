//! # apkscan
//!
//! Pattern-based static security assessment for Android application
//! archives (APK and other ZIP-based containers).
//!
//! An archive is validated and unpacked into a scoped temporary directory,
//! its manifest decoded (text or binary XML), and every textual entry
//! matched against a catalog of detection patterns. Matches are grouped
//! into vulnerabilities, protections and features, then scored.
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::path::Path;
//! use apkscan::{AnalysisOptions, Analyzer, Config};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let analyzer = Analyzer::from_config(&Config::load()?)?;
//!     let result = analyzer
//!         .analyze(Path::new("app.apk"), &AnalysisOptions::default())
//!         .await?;
//!
//!     for vuln in &result.vulnerabilities {
//!         println!("{} {} at {}", vuln.severity(), vuln.name, vuln.finding.location);
//!     }
//!     println!("Security score: {}", result.security_score);
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`catalog`]: Compiled detection patterns and the swappable catalog handle
//! - [`archive`]: Archive validation, zip-slip guard, manifest decoding
//! - [`scanner`]: Bounded worker pool applying the catalog to entries
//! - [`analysis`]: Aggregation, scoring, risk assessment and advice
//! - [`engine`]: The [`Analyzer`] tying the pipeline together
//! - [`output`]: Table, JSON and SARIF renderers
//! - [`cache`]: File-based result cache with TTL
//! - [`sink`]: Background delivery of finished results
//! - [`config`]: Configuration file handling

pub mod analysis;
pub mod archive;
pub mod cache;
pub mod catalog;
pub mod config;
pub mod engine;
pub mod error;
pub mod model;
pub mod output;
pub mod platform;
pub mod scanner;
pub mod sink;

pub use cache::Cache;
pub use catalog::{CatalogHandle, PatternCatalog};
pub use config::{Config, ScanSettings};
pub use engine::Analyzer;
pub use error::{CatalogError, ScanError};
pub use model::{AnalysisOptions, AnalysisResult, Severity};
pub use sink::{DirectorySink, ResultSink};
