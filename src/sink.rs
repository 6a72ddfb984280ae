//! Destinations that receive finished analysis results.
//!
//! Sinks are fire-and-forget: [`Analyzer`](crate::Analyzer) spawns each
//! delivery and never waits for it while scanning. A failed delivery is
//! logged and otherwise ignored.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::debug;

use crate::model::AnalysisResult;

/// Something that accepts a completed [`AnalysisResult`].
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use apkscan::sink::{DirectorySink, ResultSink};
///
/// let sink: Arc<dyn ResultSink> = Arc::new(DirectorySink::new("reports"));
/// assert_eq!(sink.name(), "directory");
/// ```
#[async_trait]
pub trait ResultSink: Send + Sync {
    fn name(&self) -> &'static str;

    async fn deliver(&self, result: Arc<AnalysisResult>) -> Result<()>;
}

/// Writes each result as pretty JSON to `<dir>/<package>-<hash>.json`.
#[derive(Debug, Clone)]
pub struct DirectorySink {
    dir: PathBuf,
}

impl DirectorySink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn report_path(&self, result: &AnalysisResult) -> PathBuf {
        let info = &result.apk_info;
        let stem: String = info
            .display_name()
            .chars()
            .map(|c| if c.is_alphanumeric() || c == '.' || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.dir.join(format!("{}-{}.json", stem, info.short_hash()))
    }
}

#[async_trait]
impl ResultSink for DirectorySink {
    fn name(&self) -> &'static str {
        "directory"
    }

    async fn deliver(&self, result: Arc<AnalysisResult>) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("Failed to create report directory {}", self.dir.display()))?;

        let path = self.report_path(&result);
        let content = serde_json::to_string_pretty(result.as_ref())?;
        tokio::fs::write(&path, content)
            .await
            .with_context(|| format!("Failed to write report {}", path.display()))?;

        debug!(path = %path.display(), "Report written");
        Ok(())
    }
}
