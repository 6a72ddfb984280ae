//! End-to-end analysis of one archive.
//!
//! [`Analyzer`] ties the pipeline together: extraction on a blocking
//! thread and the content scanner, both under one deadline, then
//! aggregation, scoring and advice. Finished results are handed to any registered
//! [`ResultSink`]s in the background.
//!
//! # Example
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
//!     println!("{}: score {}", result.apk_info.display_name(), result.security_score);
//!     Ok(())
//! }
//! ```

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::Utc;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::analysis::{
    aggregate, assess, bypass_suggestions, complexity_level, mitigation_steps, recommendations,
    security_score,
};
use crate::archive::{content_hash, extract_cancellable, precheck, Extraction};
use crate::cache::Cache;
use crate::catalog::{CatalogHandle, PatternCatalog};
use crate::config::{Config, ScanSettings};
use crate::error::{Result, ScanError};
use crate::model::{notice, AnalysisOptions, AnalysisResult, Finding};
use crate::scanner::{ContentScanner, ScanOutcome, Selection};
use crate::sink::ResultSink;

/// How long a cancelled extraction gets to hand back what it has.
const EXTRACTION_GRACE: Duration = Duration::from_secs(2);

pub struct Analyzer {
    catalog: Arc<CatalogHandle>,
    settings: ScanSettings,
    sinks: Vec<Arc<dyn ResultSink>>,
    pending: Mutex<Vec<JoinHandle<()>>>,
}

impl Analyzer {
    pub fn new(catalog: Arc<CatalogHandle>, settings: ScanSettings) -> Self {
        Self {
            catalog,
            settings,
            sinks: Vec::new(),
            pending: Mutex::new(Vec::new()),
        }
    }

    /// Builds the catalog from the built-ins, the configured rules file and
    /// the ignore list, then wraps it with the configured limits.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let catalog = PatternCatalog::load(config.rules_file.as_deref(), &config.ignore.patterns)
            .context("Failed to load pattern catalog")?;
        Ok(Self::new(
            Arc::new(CatalogHandle::new(catalog)),
            ScanSettings::from(config),
        ))
    }

    pub fn with_sink(mut self, sink: Arc<dyn ResultSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// The live catalog. Reloading it affects scans started afterwards only.
    pub fn catalog(&self) -> &Arc<CatalogHandle> {
        &self.catalog
    }

    pub fn settings(&self) -> &ScanSettings {
        &self.settings
    }

    /// Cache key for `path` under the current catalog and these settings.
    ///
    /// The size and signature checks run first, so a file that analysis
    /// would reject is never read in full.
    pub async fn cache_key(&self, path: &Path) -> Result<String> {
        let limits = self.settings.extract.limits;
        let owned = path.to_path_buf();
        let hash = tokio::task::spawn_blocking(move || {
            precheck(&owned, &limits)?;
            content_hash(&owned)
        })
        .await
        .map_err(|e| ScanError::Internal {
            details: format!("hash task failed: {}", e),
        })??;

        Ok(Cache::analysis_key(
            &hash,
            self.catalog.current().fingerprint(),
            &self.settings.fingerprint(),
        ))
    }

    /// Analyze the archive at `path`.
    ///
    /// Recovered problems (unreadable entries, a missing manifest, an
    /// expired deadline) show up as informational vulnerabilities in the
    /// result. Only a rejected or unreadable archive is an error.
    pub async fn analyze(&self, path: &Path, options: &AnalysisOptions) -> Result<AnalysisResult> {
        let started = std::time::Instant::now();
        let timeout = options
            .timeout_seconds
            .map(Duration::from_secs)
            .unwrap_or(self.settings.timeout);
        let deadline = Instant::now() + timeout;
        let catalog = self.catalog.current();

        info!(path = %path.display(), patterns = catalog.len(), "Starting analysis");

        let mut extraction = self.extract_until(path, deadline).await?;

        let targets = std::mem::take(&mut extraction.targets);
        let outcome = if extraction.cancelled {
            ScanOutcome {
                findings: Vec::new(),
                timed_out: true,
            }
        } else {
            debug!(entries = targets.len(), "Archive extracted");
            let scanner = ContentScanner::new(
                Arc::clone(&catalog),
                Selection::new(&options.include_pattern_ids),
                self.settings.effective_workers(),
                self.settings.max_match_length,
            );
            scanner.scan(targets, deadline).await?
        };

        let mut findings = std::mem::take(&mut extraction.notices);
        findings.extend(outcome.findings);
        if outcome.timed_out {
            findings.push(Finding::notice(
                notice::SCAN_TIMEOUT,
                &extraction.info.file_name,
                format!("deadline of {}s expired", timeout.as_secs()),
            ));
        }
        findings.sort_by(|a, b| {
            (&a.location, &a.pattern_id, a.offset).cmp(&(&b.location, &b.pattern_id, b.offset))
        });

        let hint = options.category_hint.as_deref();
        let aggregated = aggregate(findings, &catalog, hint);
        let score = security_score(
            &aggregated.vulnerabilities,
            &aggregated.protections,
            self.settings.protection_bonus_cap,
        );
        let advice = bypass_suggestions(&aggregated.protections, &catalog);

        let result = AnalysisResult {
            apk_info: std::mem::take(&mut extraction.info),
            complexity_level: complexity_level(
                aggregated.protections.len(),
                aggregated.vulnerabilities.len(),
            ),
            risk_assessment: assess(&aggregated.vulnerabilities, &aggregated.protections),
            recommendations: recommendations(
                &aggregated.vulnerabilities,
                aggregated.protections.len(),
                score,
                hint,
            ),
            mitigation_steps: mitigation_steps(&aggregated.vulnerabilities),
            vulnerabilities: aggregated.vulnerabilities,
            protections: aggregated.protections,
            features: aggregated.features,
            security_score: score,
            bypass_suggestions: advice.bypass_suggestions,
            processing_time: (started.elapsed().as_secs_f64() * 1000.0).round() / 1000.0,
            timed_out: outcome.timed_out,
            scanned_at: Utc::now(),
            catalog_gaps: advice.catalog_gaps,
        };
        drop(extraction);

        info!(
            package = result.apk_info.display_name(),
            score = result.security_score,
            vulnerabilities = result.vulnerabilities.len(),
            protections = result.protections.len(),
            timed_out = result.timed_out,
            "Analysis complete"
        );

        self.dispatch(&result);
        Ok(result)
    }

    /// Run extraction on a blocking thread, racing it against `deadline`.
    ///
    /// Past the deadline the extraction is told to stop and given a short
    /// grace period to return what it has. If it still has not returned, it
    /// is detached and a placeholder carrying only the file name stands in.
    async fn extract_until(&self, path: &Path, deadline: Instant) -> Result<Extraction> {
        let cancel = Arc::new(AtomicBool::new(false));
        let mut handle = {
            let cancel = Arc::clone(&cancel);
            let extract_options = self.settings.extract.clone();
            let archive_path = path.to_path_buf();
            tokio::task::spawn_blocking(move || {
                extract_cancellable(&archive_path, &extract_options, &cancel)
            })
        };

        let joined = match tokio::time::timeout_at(deadline, &mut handle).await {
            Ok(joined) => Some(joined),
            Err(_) => {
                warn!(path = %path.display(), "Deadline expired during extraction");
                cancel.store(true, Ordering::Relaxed);
                tokio::time::timeout(EXTRACTION_GRACE, &mut handle).await.ok()
            }
        };

        match joined {
            Some(joined) => joined.map_err(|e| ScanError::Internal {
                details: format!("extraction task failed: {}", e),
            })?,
            None => {
                warn!(path = %path.display(), "Extraction did not stop in time; detaching it");
                Ok(Extraction::unfinished(path))
            }
        }
    }

    fn dispatch(&self, result: &AnalysisResult) {
        if self.sinks.is_empty() {
            return;
        }

        let shared = Arc::new(result.clone());
        let mut pending = self.pending.lock();
        pending.retain(|handle| !handle.is_finished());
        for sink in &self.sinks {
            let sink = Arc::clone(sink);
            let result = Arc::clone(&shared);
            pending.push(tokio::spawn(async move {
                if let Err(e) = sink.deliver(result).await {
                    warn!(sink = sink.name(), error = %format!("{:#}", e), "Result delivery failed");
                }
            }));
        }
    }

    /// Wait for every in-flight sink delivery. Call before shutdown.
    pub async fn drain_sinks(&self) {
        let handles = std::mem::take(&mut *self.pending.lock());
        for joined in futures::future::join_all(handles).await {
            if let Err(e) = joined {
                warn!(error = %e, "Sink task failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::axml::tests::sample_manifest;
    use crate::archive::tests::write_zip;
    use crate::model::{Category, Severity};
    use crate::sink::DirectorySink;
    use tempfile::TempDir;

    fn analyzer() -> Analyzer {
        Analyzer::new(Arc::new(CatalogHandle::default()), ScanSettings::default())
    }

    #[tokio::test]
    async fn test_missing_manifest_is_reported() {
        let dir = TempDir::new().unwrap();
        let apk = dir.path().join("bare.apk");
        write_zip(&apk, &[("assets/readme.txt", b"nothing here".as_slice())]);

        let result = analyzer()
            .analyze(&apk, &AnalysisOptions::default())
            .await
            .unwrap();

        assert!(result
            .vulnerabilities
            .iter()
            .any(|v| v.finding.pattern_id == notice::MANIFEST_MISSING));
        assert_eq!(result.apk_info.file_name, "bare.apk");
        assert!(!result.timed_out);
    }

    #[tokio::test]
    async fn test_zero_timeout_yields_partial_result() {
        let dir = TempDir::new().unwrap();
        let apk = dir.path().join("app.apk");
        let manifest = sample_manifest("com.example.slow", true, false);
        write_zip(&apk, &[("AndroidManifest.xml", manifest.as_slice())]);

        let options = AnalysisOptions {
            timeout_seconds: Some(0),
            ..Default::default()
        };
        let result = analyzer().analyze(&apk, &options).await.unwrap();

        assert!(result.timed_out);
        let timeout = result
            .vulnerabilities
            .iter()
            .find(|v| v.finding.pattern_id == notice::SCAN_TIMEOUT)
            .unwrap();
        assert_eq!(timeout.severity(), Severity::Info);
        assert_eq!(timeout.finding.location.path, "app.apk");
    }

    #[tokio::test]
    async fn test_deadline_covers_extraction() {
        let dir = TempDir::new().unwrap();
        let apk = dir.path().join("app.apk");
        let entries: Vec<(String, Vec<u8>)> = (0..2000)
            .map(|i| {
                let body = format!("endpoint = http://api{}.example.com/v1\n", i).repeat(64);
                (format!("assets/config{}.txt", i), body.into_bytes())
            })
            .collect();
        let refs: Vec<(&str, &[u8])> = entries
            .iter()
            .map(|(name, data)| (name.as_str(), data.as_slice()))
            .collect();
        write_zip(&apk, &refs);

        let options = AnalysisOptions {
            timeout_seconds: Some(0),
            ..Default::default()
        };
        let started = std::time::Instant::now();
        let result = analyzer().analyze(&apk, &options).await.unwrap();

        assert!(started.elapsed() < EXTRACTION_GRACE + Duration::from_secs(5));
        assert!(result.timed_out);
        assert_eq!(result.apk_info.file_name, "app.apk");
        assert!(result
            .vulnerabilities
            .iter()
            .any(|v| v.finding.pattern_id == notice::SCAN_TIMEOUT));
        let http = result
            .vulnerabilities
            .iter()
            .filter(|v| v.finding.pattern_id == "INSECURE_HTTP")
            .count();
        assert!(http < entries.len());
    }

    #[tokio::test]
    async fn test_cache_key_checks_before_hashing() {
        let dir = TempDir::new().unwrap();
        let apk = dir.path().join("app.apk");
        write_zip(&apk, &[("assets/a.txt", b"hello".as_slice())]);

        let key = analyzer().cache_key(&apk).await.unwrap();
        assert!(key.starts_with(&format!("analysis_{}_", content_hash(&apk).unwrap())));
        assert_eq!(key, analyzer().cache_key(&apk).await.unwrap());

        let text = dir.path().join("notes.txt");
        std::fs::write(&text, b"plain text").unwrap();
        let err = analyzer().cache_key(&text).await.unwrap_err();
        assert_eq!(err.code(), "APK-1001");

        let mut settings = ScanSettings::default();
        settings.extract.limits.max_archive_bytes = 16;
        let tight = Analyzer::new(Arc::new(CatalogHandle::default()), settings);
        assert!(matches!(
            tight.cache_key(&apk).await,
            Err(ScanError::FileTooLarge { .. })
        ));
    }

    #[tokio::test]
    async fn test_cache_key_tracks_settings() {
        let dir = TempDir::new().unwrap();
        let apk = dir.path().join("app.apk");
        write_zip(&apk, &[("assets/a.txt", b"hello".as_slice())]);

        let mut settings = ScanSettings::default();
        settings.extract.skip_paths = vec!["assets/*".to_string()];
        let skipping = Analyzer::new(Arc::new(CatalogHandle::default()), settings);

        assert_ne!(
            analyzer().cache_key(&apk).await.unwrap(),
            skipping.cache_key(&apk).await.unwrap()
        );
    }

    #[tokio::test]
    async fn test_mitigation_steps_are_reported() {
        let dir = TempDir::new().unwrap();
        let apk = dir.path().join("app.apk");
        let manifest = sample_manifest("com.example.app", true, true);
        write_zip(&apk, &[("AndroidManifest.xml", manifest.as_slice())]);

        let result = analyzer()
            .analyze(&apk, &AnalysisOptions::default())
            .await
            .unwrap();
        assert!(!result.mitigation_steps.is_empty());
        let backup = result
            .vulnerabilities
            .iter()
            .find(|v| v.finding.pattern_id == "BACKUP_ALLOWED")
            .unwrap();
        assert!(backup.cwe.is_some());
    }

    #[tokio::test]
    async fn test_include_filter_limits_patterns() {
        let dir = TempDir::new().unwrap();
        let apk = dir.path().join("app.apk");
        let manifest = sample_manifest("com.example.app", true, true);
        write_zip(&apk, &[("AndroidManifest.xml", manifest.as_slice())]);

        let options = AnalysisOptions {
            include_pattern_ids: vec!["BACKUP_ALLOWED".to_string()],
            ..Default::default()
        };
        let result = analyzer().analyze(&apk, &options).await.unwrap();

        let ids: Vec<&str> = result
            .vulnerabilities
            .iter()
            .map(|v| v.finding.pattern_id.as_str())
            .collect();
        assert_eq!(ids, vec!["BACKUP_ALLOWED"]);
        assert_eq!(result.vulnerabilities[0].finding.category, Category::Vulnerability);
    }

    #[tokio::test]
    async fn test_rejected_archive_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("notes.txt");
        std::fs::write(&path, b"plain text").unwrap();

        let err = analyzer()
            .analyze(&path, &AnalysisOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "APK-1001");
    }

    #[tokio::test]
    async fn test_sinks_receive_result() {
        let dir = TempDir::new().unwrap();
        let apk = dir.path().join("app.apk");
        let manifest = sample_manifest("com.example.sink", false, false);
        write_zip(&apk, &[("AndroidManifest.xml", manifest.as_slice())]);

        let reports = dir.path().join("reports");
        let sink = Arc::new(DirectorySink::new(&reports));
        let analyzer = analyzer().with_sink(sink.clone());

        let result = analyzer
            .analyze(&apk, &AnalysisOptions::default())
            .await
            .unwrap();
        analyzer.drain_sinks().await;

        assert!(sink.report_path(&result).exists());
    }

    #[tokio::test]
    async fn test_catalog_reload_applies_to_next_scan() {
        let dir = TempDir::new().unwrap();
        let apk = dir.path().join("app.apk");
        let manifest = sample_manifest("com.example.app", true, false);
        write_zip(&apk, &[("AndroidManifest.xml", manifest.as_slice())]);

        let analyzer = analyzer();
        let before = analyzer
            .analyze(&apk, &AnalysisOptions::default())
            .await
            .unwrap();
        assert!(before
            .vulnerabilities
            .iter()
            .any(|v| v.finding.pattern_id == "DEBUG_ENABLED"));

        analyzer.catalog().replace(
            PatternCatalog::load(None, &["DEBUG_ENABLED".to_string()]).unwrap(),
        );
        let after = analyzer
            .analyze(&apk, &AnalysisOptions::default())
            .await
            .unwrap();
        assert!(after
            .vulnerabilities
            .iter()
            .all(|v| v.finding.pattern_id != "DEBUG_ENABLED"));
    }
}
