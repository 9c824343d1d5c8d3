//! Bulk blob copy with bounded concurrency and multi-pass reconciliation.
//!
//! The target's `listMissingBlobs` is the source of truth: every pass copies
//! what it reports, then asks again. Nothing about individual blobs is
//! persisted; a resumed migration just rediscovers.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::migration::progress::{BlobProgress, MigrationEvent, MigrationStep, ProgressReporter};
use crate::services::client::transport::PdsTransport;
use crate::services::client::types::ClientSessionCredentials;
use crate::services::config::{BlobConfig, MAX_BLOB_CONCURRENCY, MAX_BLOB_PASSES};
use crate::services::errors::MigrationError;

/// Counts finished transfers across concurrent tasks and derives progress
pub(crate) struct ProgressTracker {
    pass: u32,
    total: u32,
    processed: AtomicU32,
    bytes: AtomicU64,
    started: Instant,
}

impl ProgressTracker {
    pub(crate) fn new(pass: u32, total: u32) -> Self {
        Self {
            pass,
            total,
            processed: AtomicU32::new(0),
            bytes: AtomicU64::new(0),
            started: Instant::now(),
        }
    }

    /// Failed transfers count as processed too.
    pub(crate) fn record_completion(&self, bytes: u64) -> BlobProgress {
        self.bytes.fetch_add(bytes, Ordering::SeqCst);
        let processed = self.processed.fetch_add(1, Ordering::SeqCst) + 1;
        self.progress_at(processed, self.started.elapsed().as_secs_f64())
    }

    pub(crate) fn progress_at(&self, processed: u32, elapsed_secs: f64) -> BlobProgress {
        let total = self.total.max(1);
        let percent = ((processed as f64 / total as f64) * 100.0).round().min(100.0) as u8;
        let remaining = self.total.saturating_sub(processed);
        let eta_seconds = if processed == 0 {
            0
        } else {
            ((elapsed_secs / processed as f64) * remaining as f64).round() as u64
        };

        BlobProgress {
            pass: self.pass,
            processed,
            total: self.total,
            percent,
            eta_seconds,
        }
    }

    pub(crate) fn bytes(&self) -> u64 {
        self.bytes.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BlobFailure {
    pub cid: String,
    pub operation: &'static str,
    pub error: String,
}

#[derive(Debug, Clone, Default)]
pub struct BlobPassOutcome {
    pub transferred: u32,
    pub bytes: u64,
    pub failures: Vec<BlobFailure>,
}

#[derive(Debug, Clone, Default)]
pub struct BlobTransferReport {
    pub passes: u32,
    pub transferred: u32,
    pub bytes: u64,
    /// Every per-blob failure across all passes
    pub failures: Vec<BlobFailure>,
    /// Still missing on the target after the last pass
    pub remaining: Vec<String>,
}

impl BlobTransferReport {
    pub fn is_complete(&self) -> bool {
        self.remaining.is_empty()
    }

    /// Degraded-success marker, when blobs are left over
    pub fn partial_failure(&self) -> Option<MigrationError> {
        (!self.remaining.is_empty()).then(|| MigrationError::PartialFailure {
            remaining: self.remaining.len(),
            passes: self.passes,
        })
    }
}

pub struct BlobTransferEngine<'a> {
    transport: &'a dyn PdsTransport,
    config: &'a BlobConfig,
    reporter: &'a dyn ProgressReporter,
}

impl<'a> BlobTransferEngine<'a> {
    pub fn new(
        transport: &'a dyn PdsTransport,
        config: &'a BlobConfig,
        reporter: &'a dyn ProgressReporter,
    ) -> Self {
        Self {
            transport,
            config,
            reporter,
        }
    }

    fn concurrency(&self) -> usize {
        self.config.concurrency.clamp(1, MAX_BLOB_CONCURRENCY)
    }

    fn max_passes(&self) -> u32 {
        self.config.max_passes.clamp(1, MAX_BLOB_PASSES)
    }

    /// Pages through the target's missing blobs until a short page or an
    /// absent cursor.
    #[instrument(skip(self, target), err)]
    pub async fn discover(
        &self,
        target: &ClientSessionCredentials,
    ) -> Result<Vec<String>, MigrationError> {
        self.reporter.report(&MigrationEvent::StepBegun {
            step: MigrationStep::BlobDiscovery,
        });

        let page_size = self.config.page_size;
        let mut seen = HashSet::new();
        let mut missing = Vec::new();
        let mut cursor: Option<String> = None;
        let mut pages = 0u32;

        loop {
            let page = self
                .transport
                .list_missing_blobs(target, cursor.as_deref(), page_size)
                .await?;
            pages += 1;

            let page_len = page.cids.len();
            let before = missing.len();
            for cid in page.cids {
                if seen.insert(cid.clone()) {
                    missing.push(cid);
                }
            }

            if page_len < page_size {
                break;
            }
            if missing.len() == before {
                warn!("[Migration] listMissingBlobs returned a full page of repeats, stopping");
                break;
            }
            match page.cursor {
                Some(next) if !next.is_empty() => cursor = Some(next),
                _ => break,
            }
        }

        debug!("[Migration] Discovered {} missing blobs in {} pages", missing.len(), pages);
        Ok(missing)
    }

    async fn transfer_one(
        &self,
        cid: &str,
        source: &ClientSessionCredentials,
        target: &ClientSessionCredentials,
    ) -> Result<u64, BlobFailure> {
        let blob = self
            .transport
            .get_blob(source, &source.did, cid)
            .await
            .map_err(|e| BlobFailure {
                cid: cid.to_string(),
                operation: "download",
                error: e.to_string(),
            })?;
        let size = blob.data.len() as u64;

        self.transport
            .upload_blob(target, blob)
            .await
            .map_err(|e| BlobFailure {
                cid: cid.to_string(),
                operation: "upload",
                error: e.to_string(),
            })?;
        Ok(size)
    }

    /// Copies `cids` with at most five transfers in flight. Single
    /// failures are recorded and never abort the pass.
    pub async fn transfer_pass(
        &self,
        pass: u32,
        cids: &[String],
        source: &ClientSessionCredentials,
        target: &ClientSessionCredentials,
    ) -> BlobPassOutcome {
        self.reporter.report(&MigrationEvent::StepBegun {
            step: MigrationStep::BlobMigration,
        });
        self.reporter.report(&MigrationEvent::BlobPassStarted {
            pass,
            missing: cids.len(),
        });

        let tracker = Arc::new(ProgressTracker::new(pass, cids.len() as u32));
        let results: Vec<Result<u64, BlobFailure>> = stream::iter(cids.iter())
            .map(|cid| {
                let tracker = Arc::clone(&tracker);
                async move {
                    let result = self.transfer_one(cid, source, target).await;
                    let progress = tracker.record_completion(*result.as_ref().unwrap_or(&0));
                    if let Err(failure) = &result {
                        warn!(
                            "[Migration] Blob {} failed during {}: {}",
                            failure.cid, failure.operation, failure.error
                        );
                        self.reporter.report(&MigrationEvent::BlobFailed {
                            cid: failure.cid.clone(),
                            error: failure.error.clone(),
                        });
                    }
                    self.reporter.report(&MigrationEvent::BlobProgress(progress));
                    result
                }
            })
            .buffer_unordered(self.concurrency())
            .collect()
            .await;

        let mut outcome = BlobPassOutcome {
            bytes: tracker.bytes(),
            ..Default::default()
        };
        for result in results {
            match result {
                Ok(_) => outcome.transferred += 1,
                Err(failure) => outcome.failures.push(failure),
            }
        }

        info!(
            "[Migration] Blob pass {}: {}/{} transferred, {} failed",
            pass,
            outcome.transferred,
            cids.len(),
            outcome.failures.len()
        );
        outcome
    }

    /// Discover, copy, rediscover; stops when nothing is missing or after
    /// `max_passes` passes.
    #[instrument(skip_all, err)]
    pub async fn run(
        &self,
        source: &ClientSessionCredentials,
        target: &ClientSessionCredentials,
    ) -> Result<BlobTransferReport, MigrationError> {
        let mut report = BlobTransferReport::default();
        let mut missing = self.discover(target).await?;

        if missing.is_empty() {
            info!("[Migration] No blobs to migrate, skipping blob phase");
        }

        while !missing.is_empty() && report.passes < self.max_passes() {
            report.passes += 1;
            let outcome = self
                .transfer_pass(report.passes, &missing, source, target)
                .await;
            report.transferred += outcome.transferred;
            report.bytes += outcome.bytes;
            report.failures.extend(outcome.failures);

            missing = self.discover(target).await?;
        }

        if !missing.is_empty() {
            warn!(
                "[Migration] {} blobs still missing after {} passes",
                missing.len(),
                report.passes
            );
        }
        report.remaining = missing;
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migration::progress::LoggingReporter;
    use crate::migration::test_support::*;
    use std::sync::Mutex;

    fn engine<'a>(
        transport: &'a FakeTransport,
        config: &'a BlobConfig,
        reporter: &'a dyn ProgressReporter,
    ) -> BlobTransferEngine<'a> {
        BlobTransferEngine::new(transport, config, reporter)
    }

    #[tokio::test]
    async fn short_page_ends_discovery() {
        let config = BlobConfig::default();
        let transport = FakeTransport::with_state(|s| s.missing = blob_cids(999));
        let found = engine(&transport, &config, &LoggingReporter)
            .discover(&session(TARGET))
            .await
            .unwrap();
        assert_eq!(found.len(), 999);
        assert_eq!(transport.calls("list_missing_blobs"), 1);
    }

    #[tokio::test]
    async fn full_page_requests_another() {
        let config = BlobConfig::default();
        let transport = FakeTransport::with_state(|s| s.missing = blob_cids(1000));
        let found = engine(&transport, &config, &LoggingReporter)
            .discover(&session(TARGET))
            .await
            .unwrap();
        assert_eq!(found.len(), 1000);
        assert_eq!(transport.calls("list_missing_blobs"), 2);
    }

    #[tokio::test]
    async fn never_more_than_configured_in_flight() {
        let config = BlobConfig::default();
        let transport = FakeTransport::with_state(|s| s.missing = blob_cids(23));
        let report = engine(&transport, &config, &LoggingReporter)
            .run(&session(SOURCE), &session(TARGET))
            .await
            .unwrap();
        assert!(report.is_complete());
        assert!(transport.max_in_flight() <= 5);
        assert!(transport.max_in_flight() > 1);
    }

    #[tokio::test]
    async fn oversized_config_still_caps_in_flight_and_passes() {
        let config = BlobConfig {
            concurrency: 12,
            max_passes: 10,
            ..BlobConfig::default()
        };
        let cids = blob_cids(40);
        let transport = FakeTransport::with_state(|s| {
            s.missing = cids.clone();
            s.stubborn = cids[..2].iter().cloned().collect();
        });
        let report = engine(&transport, &config, &LoggingReporter)
            .run(&session(SOURCE), &session(TARGET))
            .await
            .unwrap();

        assert!(transport.max_in_flight() <= 5);
        assert_eq!(report.passes, 3);
        assert_eq!(report.remaining.len(), 2);
    }

    #[tokio::test]
    async fn nothing_missing_transfers_nothing() {
        let config = BlobConfig::default();
        let transport = FakeTransport::new();
        let report = engine(&transport, &config, &LoggingReporter)
            .run(&session(SOURCE), &session(TARGET))
            .await
            .unwrap();

        assert_eq!(report.passes, 0);
        assert_eq!(report.transferred, 0);
        assert!(report.is_complete());
        assert_eq!(transport.calls("get_blob"), 0);
        assert_eq!(transport.calls("list_missing_blobs"), 1);
        assert_eq!(transport.max_in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn large_account_completes_in_one_pass() {
        let config = BlobConfig::default();
        let transport = FakeTransport::with_state(|s| s.missing = blob_cids(2500));
        let report = engine(&transport, &config, &LoggingReporter)
            .run(&session(SOURCE), &session(TARGET))
            .await
            .unwrap();

        assert_eq!(report.passes, 1);
        assert_eq!(report.transferred, 2500);
        assert!(report.remaining.is_empty());
        assert!(report.partial_failure().is_none());
        // 3 pages to discover, 1 to confirm nothing is left
        assert_eq!(transport.calls("list_missing_blobs"), 4);
    }

    #[tokio::test]
    async fn stubborn_blobs_stop_after_three_passes() {
        let config = BlobConfig::default();
        let cids = blob_cids(10);
        let stubborn: Vec<String> = cids[..3].to_vec();
        let transport = FakeTransport::with_state(|s| {
            s.missing = cids.clone();
            s.stubborn = stubborn.iter().cloned().collect();
        });

        let report = engine(&transport, &config, &LoggingReporter)
            .run(&session(SOURCE), &session(TARGET))
            .await
            .unwrap();

        assert_eq!(report.passes, 3);
        assert_eq!(report.remaining.len(), 3);
        assert_eq!(transport.calls("get_blob"), 10 + 3 + 3);
        assert!(matches!(
            report.partial_failure(),
            Some(MigrationError::PartialFailure {
                remaining: 3,
                passes: 3
            })
        ));
    }

    #[tokio::test]
    async fn single_failure_does_not_abort_pass() {
        let config = BlobConfig::default();
        let cids = blob_cids(10);
        let broken = cids[4].clone();
        let transport = FakeTransport::with_state(|s| {
            s.missing = cids.clone();
            s.broken_downloads.insert(broken.clone());
        });

        let events = Mutex::new(Vec::new());
        let reporter = |event: &MigrationEvent| events.lock().unwrap().push(event.clone());
        let outcome = engine(&transport, &config, &reporter)
            .transfer_pass(1, &cids, &session(SOURCE), &session(TARGET))
            .await;

        assert_eq!(outcome.transferred, 9);
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].cid, broken);
        assert_eq!(outcome.failures[0].operation, "download");

        let events = events.into_inner().unwrap();
        assert!(events
            .iter()
            .any(|e| matches!(e, MigrationEvent::BlobFailed { cid, .. } if *cid == broken)));
        let last_progress = events
            .iter()
            .filter_map(|e| match e {
                MigrationEvent::BlobProgress(p) => Some(*p),
                _ => None,
            })
            .max_by_key(|p| p.processed)
            .unwrap();
        assert_eq!(last_progress.processed, 10);
        assert_eq!(last_progress.percent, 100);
        assert_eq!(last_progress.eta_seconds, 0);
    }

    #[tokio::test]
    async fn content_type_comes_from_download() {
        let config = BlobConfig::default();
        let transport = FakeTransport::with_state(|s| s.missing = blob_cids(4));
        engine(&transport, &config, &LoggingReporter)
            .run(&session(SOURCE), &session(TARGET))
            .await
            .unwrap();
        let state = transport.state();
        assert_eq!(state.uploaded_content_types.len(), 4);
        assert!(state
            .uploaded_content_types
            .iter()
            .all(|ct| ct.as_deref() == Some("image/jpeg")));
    }

    #[test]
    fn eta_uses_running_average() {
        let tracker = ProgressTracker::new(1, 10);
        let progress = tracker.progress_at(4, 8.0);
        assert_eq!(progress.percent, 40);
        // 2s per blob, 6 left
        assert_eq!(progress.eta_seconds, 12);
    }
}
