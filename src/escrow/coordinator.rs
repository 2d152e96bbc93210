//! Release Coordinator
//!
//! Command side of the escrow core. Owns the entry state machine
//! `held -> pending_release -> released | held` and `held -> voided`, and
//! guarantees a single in-flight release per entry through the store's
//! atomic `create_release`.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use chrono::Utc;
use rust_decimal::Decimal;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use super::audit::{AuditAction, AuditRecord, AuditSink};
use super::error::{EscrowError, ErrorKind};
use super::executor::TransferExecutor;
use super::pacer::Pacer;
use super::state::ReleaseType;
use super::store::EscrowStore;
use super::types::{
    AutoReleaseReport, BatchItemResult, BatchReleaseResult, EntryId, LedgerEntry, ReleaseId,
    ReleaseOutcome, ReleaseRequest, parse_entry_id,
};
use crate::batch_file::{Artifact, ArtifactLink, ArtifactStore, BatchFileEncoder, BatchFileOptions};
use crate::rails::MANUAL;

/// Default and maximum entries per batch release
pub const MAX_BATCH_SIZE: usize = 100;
/// Maximum entries per auto-release sweep
pub const MAX_SWEEP_LIMIT: usize = 500;
/// Maximum void reason length (characters)
pub const MAX_REASON_LEN: usize = 500;
/// Actor recorded on auto releases
pub const AUTO_RELEASE_ACTOR: &str = "system:auto_release";

/// Manual-rail settlement: encoder and download links. Queued payouts live
/// in the escrow store.
pub struct BatchSettlement {
    encoder: BatchFileEncoder,
    artifacts: Arc<ArtifactStore>,
    files_generated: AtomicU32,
    /// One file at a time per process
    generating: Mutex<()>,
}

impl BatchSettlement {
    pub fn new(encoder: BatchFileEncoder, artifacts: Arc<ArtifactStore>) -> Self {
        Self {
            encoder,
            artifacts,
            files_generated: AtomicU32::new(0),
            generating: Mutex::new(()),
        }
    }

    pub fn artifacts(&self) -> &Arc<ArtifactStore> {
        &self.artifacts
    }

    /// File id modifiers cycle `A..=Z` so files generated the same day differ
    fn next_file_id_modifier(&self) -> char {
        let n = self.files_generated.fetch_add(1, Ordering::Relaxed);
        char::from(b'A' + (n % 26) as u8)
    }
}

pub struct ReleaseCoordinator {
    store: Arc<dyn EscrowStore>,
    executor: Arc<TransferExecutor>,
    audit: Arc<dyn AuditSink>,
    pacer: Pacer,
    max_batch_size: usize,
    batch: Option<BatchSettlement>,
}

impl ReleaseCoordinator {
    pub fn new(
        store: Arc<dyn EscrowStore>,
        executor: Arc<TransferExecutor>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            store,
            executor,
            audit,
            pacer: Pacer::unlimited(),
            max_batch_size: MAX_BATCH_SIZE,
            batch: None,
        }
    }

    pub fn with_pacer(mut self, pacer: Pacer) -> Self {
        self.pacer = pacer;
        self
    }

    pub fn with_max_batch_size(mut self, max: usize) -> Self {
        self.max_batch_size = max.clamp(1, MAX_BATCH_SIZE);
        self
    }

    pub fn with_batch_settlement(mut self, batch: BatchSettlement) -> Self {
        self.batch = Some(batch);
        self
    }

    pub fn executor(&self) -> &Arc<TransferExecutor> {
        &self.executor
    }

    /// Entry of `ledger_id`; entries of other ledgers are reported as not found
    async fn ledger_entry(&self, ledger_id: &str, entry_id: EntryId) -> Result<LedgerEntry, EscrowError> {
        match self.store.get_entry(entry_id).await? {
            Some(entry) if entry.ledger_id == ledger_id => Ok(entry),
            _ => Err(EscrowError::EntryNotFound(entry_id.to_string())),
        }
    }

    fn validate_rail(&self, ledger_id: &str, rail: Option<&str>) -> Result<Option<String>, EscrowError> {
        match rail.map(str::trim).filter(|r| !r.is_empty()) {
            Some(rail) => {
                self.executor.registry().select(ledger_id, Some(rail), None)?;
                Ok(Some(rail.to_string()))
            }
            None => Ok(None),
        }
    }

    async fn audit(&self, record: AuditRecord) {
        let action = record.action;
        if let Err(e) = self.audit.record(record).await {
            error!(action = action.as_str(), error = %e, "Failed to write audit record");
        }
    }

    /// Create a pending release for a held entry.
    ///
    /// # Errors
    /// - `EntryNotFound` if the entry is not in `ledger_id`
    /// - `ReleaseInFlight` / `NotHeld` (conflicts, nothing changed)
    /// - `UnknownRail` / `RailDisabled` for a bad explicit rail
    pub async fn request_release(
        &self,
        ledger_id: &str,
        entry_id: EntryId,
        release_type: ReleaseType,
        requested_by: Option<String>,
        rail: Option<&str>,
    ) -> Result<ReleaseId, EscrowError> {
        let requested_rail = self.validate_rail(ledger_id, rail)?;
        let entry = self.ledger_entry(ledger_id, entry_id).await?;

        let release = ReleaseRequest::new(&entry, release_type, requested_by, requested_rail);
        self.store.create_release(&release).await?;

        info!(
            release_id = %release.id,
            entry_id = %entry_id,
            release_type = %release_type,
            amount = %release.amount,
            "Release requested"
        );
        self.audit(
            AuditRecord::new(AuditAction::ReleaseRequested, ledger_id)
                .entry(entry_id)
                .release(release.id)
                .actor(release.requested_by.clone())
                .amount(release.amount, &release.currency)
                .rail(release.requested_rail.clone())
                .scored(Some(release_type)),
        )
        .await;

        Ok(release.id)
    }

    /// Request and execute a manual release.
    ///
    /// If execution errors out after the request was created, the request
    /// stays `pending` and is picked up by [`Self::recover_stale`].
    pub async fn release(
        &self,
        ledger_id: &str,
        entry_id: EntryId,
        rail: Option<&str>,
        requested_by: Option<String>,
    ) -> Result<ReleaseOutcome, EscrowError> {
        let release_id = self
            .request_release(ledger_id, entry_id, ReleaseType::Manual, requested_by, rail)
            .await?;
        self.executor.execute(release_id).await
    }

    /// Release up to `max_batch_size` entries, one at a time.
    ///
    /// Item failures are isolated; the result lists every item.
    pub async fn batch_release(
        &self,
        ledger_id: &str,
        entry_ids: &[String],
        rail: Option<&str>,
        requested_by: Option<String>,
    ) -> Result<BatchReleaseResult, EscrowError> {
        if entry_ids.is_empty() || entry_ids.len() > self.max_batch_size {
            return Err(EscrowError::InvalidBatchSize {
                got: entry_ids.len(),
                max: self.max_batch_size,
            });
        }
        let mut seen = HashSet::with_capacity(entry_ids.len());
        for raw in entry_ids {
            if !seen.insert(raw.trim()) {
                return Err(EscrowError::DuplicateBatchEntry(raw.clone()));
            }
        }
        self.validate_rail(ledger_id, rail)?;

        let mut results = Vec::with_capacity(entry_ids.len());
        for raw in entry_ids {
            self.pacer.acquire().await;
            let item = match parse_entry_id(raw) {
                Ok(entry_id) => match self.release(ledger_id, entry_id, rail, requested_by.clone()).await {
                    Ok(outcome) => BatchItemResult::from_outcome(&outcome),
                    Err(e) => BatchItemResult::rejected(raw.trim(), &e),
                },
                Err(e) => BatchItemResult::rejected(raw.trim(), &e),
            };
            results.push(item);
        }

        let result = BatchReleaseResult::from_results(results);
        info!(
            ledger_id,
            total = result.total,
            succeeded = result.succeeded,
            failed = result.failed,
            "Batch release finished"
        );
        Ok(result)
    }

    /// Void a held entry. Irreversible; no transfer is attempted.
    pub async fn void_release(
        &self,
        ledger_id: &str,
        entry_id: EntryId,
        reason: &str,
        actor: Option<String>,
    ) -> Result<LedgerEntry, EscrowError> {
        let reason = reason.trim();
        if reason.is_empty() || reason.chars().count() > MAX_REASON_LEN {
            return Err(EscrowError::InvalidReason(MAX_REASON_LEN));
        }
        self.ledger_entry(ledger_id, entry_id).await?;

        let voided = self.store.void_entry(entry_id, reason, Utc::now()).await?;
        info!(entry_id = %entry_id, reason, "Entry voided");

        self.audit(
            AuditRecord::new(AuditAction::EntryVoided, ledger_id)
                .entry(entry_id)
                .actor(actor)
                .amount(voided.amount, &voided.currency)
                .detail(serde_json::json!({ "reason": reason }))
                .scored(None),
        )
        .await;

        Ok(voided)
    }

    /// Queue auto releases for every held entry of the ledger whose hold date
    /// has passed, up to `limit`, and optionally execute them right away.
    pub async fn auto_release_sweep(
        &self,
        ledger_id: &str,
        limit: usize,
        execute_immediately: bool,
    ) -> Result<AutoReleaseReport, EscrowError> {
        if !(1..=MAX_SWEEP_LIMIT).contains(&limit) {
            return Err(EscrowError::InvalidLimit(MAX_SWEEP_LIMIT));
        }
        let eligible = self
            .store
            .list_expired_holds(ledger_id, Utc::now(), limit)
            .await?;

        let mut report = AutoReleaseReport {
            eligible: eligible.len(),
            ..Default::default()
        };
        let mut queued: Vec<(ReleaseId, EntryId)> = Vec::with_capacity(eligible.len());
        for entry in &eligible {
            match self
                .request_release(
                    ledger_id,
                    entry.id,
                    ReleaseType::Auto,
                    Some(AUTO_RELEASE_ACTOR.to_string()),
                    None,
                )
                .await
            {
                Ok(release_id) => queued.push((release_id, entry.id)),
                Err(e) if e.kind() == ErrorKind::Conflict => {
                    debug!(entry_id = %entry.id, error = %e, "Entry changed under sweep, skipped");
                    report.skipped += 1;
                }
                Err(e) => {
                    warn!(entry_id = %entry.id, error = %e, "Auto release request failed");
                    report.skipped += 1;
                }
            }
        }
        report.queued = queued.iter().map(|(id, _)| *id).collect();

        if execute_immediately && !queued.is_empty() {
            let mut results = Vec::with_capacity(queued.len());
            for (release_id, entry_id) in &queued {
                self.pacer.acquire().await;
                results.push(match self.executor.execute(*release_id).await {
                    Ok(outcome) => BatchItemResult::from_outcome(&outcome),
                    Err(e) => BatchItemResult::rejected(entry_id.to_string(), &e),
                });
            }
            report.executed = Some(BatchReleaseResult::from_results(results));
        }

        info!(
            ledger_id,
            eligible = report.eligible,
            queued = report.queued.len(),
            skipped = report.skipped,
            executed = report.executed.is_some(),
            "Auto release sweep finished"
        );
        Ok(report)
    }

    /// Execute a release that is still `pending`
    pub async fn execute_release(&self, release_id: ReleaseId) -> Result<ReleaseOutcome, EscrowError> {
        let outcome = self.executor.execute(release_id).await?;
        info!(release_id = %release_id, status = %outcome.status, "Release executed on request");
        Ok(outcome)
    }

    /// Execute pending releases of the ledger older than `stale_threshold`:
    /// requests queued by a sweep without immediate execution, or left behind
    /// when execution errored out after the request was created.
    pub async fn recover_stale(
        &self,
        ledger_id: &str,
        stale_threshold: Duration,
        limit: usize,
    ) -> Result<BatchReleaseResult, EscrowError> {
        let created_before = chrono::Duration::from_std(stale_threshold)
            .ok()
            .and_then(|threshold| Utc::now().checked_sub_signed(threshold))
            .ok_or_else(|| {
                EscrowError::SystemError(format!("stale threshold out of range: {:?}", stale_threshold))
            })?;
        let stale = self
            .store
            .find_stale_releases(ledger_id, created_before, limit)
            .await?;
        if stale.is_empty() {
            debug!(ledger_id, "No stale releases found");
            return Ok(BatchReleaseResult::from_results(Vec::new()));
        }
        info!(ledger_id, count = stale.len(), "Found stale releases to recover");

        let mut results = Vec::with_capacity(stale.len());
        for release in &stale {
            self.pacer.acquire().await;
            results.push(match self.executor.execute(release.id).await {
                Ok(outcome) => BatchItemResult::from_outcome(&outcome),
                Err(e) => {
                    error!(release_id = %release.id, error = %e, "Failed to recover release");
                    BatchItemResult::rejected(release.entry_id.to_string(), &e)
                }
            });
        }

        let result = BatchReleaseResult::from_results(results);
        info!(
            ledger_id,
            succeeded = result.succeeded,
            failed = result.failed,
            "Stale releases recovered"
        );
        Ok(result)
    }

    pub async fn get_release(&self, release_id: ReleaseId) -> Result<ReleaseRequest, EscrowError> {
        self.store
            .get_release(release_id)
            .await?
            .ok_or_else(|| EscrowError::ReleaseNotFound(release_id.to_string()))
    }

    pub async fn reconcile(&self, release_id: ReleaseId) -> Result<ReleaseOutcome, EscrowError> {
        self.executor.reconcile(release_id).await
    }

    fn batch(&self) -> Result<&BatchSettlement, EscrowError> {
        self.batch
            .as_ref()
            .ok_or_else(|| EscrowError::SystemError("batch file settlement is not configured".to_string()))
    }

    /// Encode every payout queued on the manual rail for `ledger_id` into a
    /// batch file and return a short-lived download link.
    ///
    /// Payouts are stamped with the file name before the link is handed out.
    /// A queued payout that cannot be encoded is left out of the file and
    /// stays queued; it never blocks the others.
    pub async fn generate_batch_file(
        &self,
        ledger_id: &str,
        actor: Option<String>,
    ) -> Result<ArtifactLink, EscrowError> {
        let batch = self.batch()?;
        let _generating = batch.generating.lock().await;

        let queued = self.store.list_unsettled_payouts(ledger_id).await?;
        if queued.is_empty() {
            return Err(EscrowError::NothingToSettle(ledger_id.to_string()));
        }

        let (ready, quarantined): (Vec<_>, Vec<_>) =
            queued.into_iter().partition(|q| q.payout.validate().is_ok());
        for q in &quarantined {
            warn!(
                ledger_id,
                release_id = %q.release_id,
                recipient_id = %q.payout.recipient_id,
                "Queued payout cannot be encoded, left out of batch file"
            );
        }
        if ready.is_empty() {
            return Err(EscrowError::BatchFile(format!(
                "none of the {} queued payouts for ledger {} can be encoded",
                quarantined.len(),
                ledger_id
            )));
        }

        let options = BatchFileOptions {
            file_id_modifier: batch.next_file_id_modifier(),
            ..BatchFileOptions::now()
        };
        let payouts: Vec<_> = ready.iter().map(|q| q.payout.clone()).collect();
        let file = batch.encoder.encode(&payouts, &options).inspect_err(|e| {
            warn!(ledger_id, error = %e, "Batch file encoding failed, payouts stay queued");
        })?;

        let file_name = format!(
            "{}_{}{}.ach",
            ledger_id,
            options.created_at.format("%Y%m%d%H%M"),
            options.file_id_modifier
        );
        let release_ids: Vec<ReleaseId> = ready.iter().map(|q| q.release_id).collect();
        self.store
            .settle_payouts(ledger_id, &release_ids, &file_name, options.created_at)
            .await?;

        let link = batch.artifacts.put(
            ledger_id,
            file_name,
            file.contents(),
            file.entry_count,
            options.created_at,
        );
        info!(
            ledger_id,
            entries = file.entry_count,
            left_out = quarantined.len(),
            total_credit = file.total_credit,
            expires_at = %link.expires_at,
            "Batch file generated"
        );

        let release_ids: Vec<String> = release_ids.iter().map(ReleaseId::to_string).collect();
        let left_out: Vec<String> = quarantined.iter().map(|q| q.release_id.to_string()).collect();
        self.audit(
            AuditRecord::new(AuditAction::BatchFileGenerated, ledger_id)
                .actor(actor)
                .amount(Decimal::new(file.total_credit as i64, 2), "USD")
                .rail(Some(MANUAL.to_string()))
                .detail(serde_json::json!({
                    "file_name": link.file_name,
                    "entry_count": file.entry_count,
                    "entry_hash": file.entry_hash,
                    "release_ids": release_ids,
                    "left_out": left_out,
                }))
                .scored(None),
        )
        .await;

        Ok(link)
    }

    /// Resolve a download token for the ledger that generated it
    pub fn fetch_batch_file(&self, token: &str, ledger_id: &str) -> Result<Artifact, EscrowError> {
        self.batch()?.artifacts.fetch(token, ledger_id, Utc::now())
    }
}
