//! Core data types for findings, package metadata, and analysis results.
//!
//! - [`Finding`] - One located, confidence-scored pattern match
//! - [`Vulnerability`], [`Protection`], [`Feature`] - Aggregated findings per category
//! - [`PackageInfo`] - Metadata extracted from the archive and its manifest
//! - [`AnalysisResult`] - Complete assessment for one archive
//!
//! # Example
//!
//! ```
//! use apkscan::model::{Category, Finding, Location, Severity};
//!
//! let finding = Finding::new(
//!     "DEBUG_ENABLED",
//!     Category::Vulnerability,
//!     Location::new("AndroidManifest.xml", Some(3)),
//!     "android:debuggable=\"true\"",
//!     0.95,
//!     Some(Severity::High),
//! );
//!
//! assert_eq!(finding.location.to_string(), "AndroidManifest.xml:3");
//! ```

mod finding;
mod package;
mod result;

pub use finding::*;
pub use package::*;
pub use result::*;
