//! Content scanner.
//!
//! Entries are scanned on a bounded pool of blocking workers. Each worker
//! sends its findings over a channel to a single collector, which stops at
//! the scan deadline and keeps whatever arrived in time.
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//! use std::sync::Arc;
//! use apkscan::archive::{extract, ExtractOptions};
//! use apkscan::catalog::PatternCatalog;
//! use apkscan::scanner::{ContentScanner, Selection};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let extraction = extract(Path::new("app.apk"), &ExtractOptions::default())?;
//!     let scanner = ContentScanner::new(Arc::new(PatternCatalog::builtin()), Selection::default(), 4, 200);
//!     let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(60);
//!     let outcome = scanner.scan(extraction.targets, deadline).await?;
//!     println!("{} findings", outcome.findings.len());
//!     Ok(())
//! }
//! ```

mod matcher;

pub use matcher::{excerpt, scan_target, scan_text, Selection};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, Semaphore};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::archive::ScanTarget;
use crate::catalog::PatternCatalog;
use crate::error::{Result, ScanError};
use crate::model::Finding;

/// Findings collected before the scan finished or the deadline expired.
#[derive(Debug, Default)]
pub struct ScanOutcome {
    /// Sorted by path, line, pattern id and byte offset.
    pub findings: Vec<Finding>,
    pub timed_out: bool,
}

pub struct ContentScanner {
    catalog: Arc<PatternCatalog>,
    selection: Arc<Selection>,
    workers: usize,
    max_match_length: usize,
}

impl ContentScanner {
    pub fn new(
        catalog: Arc<PatternCatalog>,
        selection: Selection,
        workers: usize,
        max_match_length: usize,
    ) -> Self {
        Self {
            catalog,
            selection: Arc::new(selection),
            workers: workers.max(1),
            max_match_length,
        }
    }

    pub async fn scan(&self, targets: Vec<ScanTarget>, deadline: Instant) -> Result<ScanOutcome> {
        let total = targets.len();
        let (tx, mut rx) = mpsc::channel::<Vec<Finding>>(self.workers * 2);
        let semaphore = Arc::new(Semaphore::new(self.workers));
        let cancel = Arc::new(AtomicBool::new(false));

        let producer = {
            let catalog = Arc::clone(&self.catalog);
            let selection = Arc::clone(&self.selection);
            let cancel = Arc::clone(&cancel);
            let max_match_length = self.max_match_length;

            tokio::spawn(async move {
                let mut handles = Vec::with_capacity(total);
                for target in targets {
                    let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
                        break;
                    };
                    if cancel.load(Ordering::Relaxed) {
                        break;
                    }

                    let tx = tx.clone();
                    let catalog = Arc::clone(&catalog);
                    let selection = Arc::clone(&selection);
                    let cancel = Arc::clone(&cancel);
                    handles.push(tokio::task::spawn_blocking(move || {
                        let _permit = permit;
                        if cancel.load(Ordering::Relaxed) {
                            return;
                        }
                        debug!(entry = %target.path, "Scanning entry");
                        let findings =
                            scan_target(target, &catalog, &selection, max_match_length, &cancel);
                        let _ = tx.blocking_send(findings);
                    }));
                }
                drop(tx);

                for handle in handles {
                    handle.await?;
                }
                Ok::<(), tokio::task::JoinError>(())
            })
        };

        let (mut findings, timed_out) = collect(&mut rx, deadline).await;

        if timed_out {
            warn!(entries = total, "Scan deadline expired; keeping partial results");
            cancel.store(true, Ordering::Relaxed);
            producer.abort();
        } else {
            match producer.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) | Err(e) => {
                    return Err(ScanError::Internal {
                        details: format!("scan worker failed: {}", e),
                    })
                }
            }
        }

        findings.sort_by(|a, b| {
            (&a.location.path, a.location.line, &a.pattern_id, a.offset).cmp(&(
                &b.location.path,
                b.location.line,
                &b.pattern_id,
                b.offset,
            ))
        });

        Ok(ScanOutcome {
            findings,
            timed_out,
        })
    }
}

/// Drain batches until every sender is gone or `deadline` passes.
/// Returns what arrived in time and whether the deadline cut it short.
async fn collect(rx: &mut mpsc::Receiver<Vec<Finding>>, deadline: Instant) -> (Vec<Finding>, bool) {
    let mut findings = Vec::new();
    loop {
        if Instant::now() >= deadline {
            return (findings, true);
        }
        match tokio::time::timeout_at(deadline, rx.recv()).await {
            Ok(Some(batch)) => findings.extend(batch),
            Ok(None) => return (findings, false),
            Err(_) => return (findings, true),
        }
    }
}
