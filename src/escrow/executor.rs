//! Transfer Executor
//!
//! Drives one queued release to a terminal state:
//!
//! ```text
//! pending ──precondition failed──────────────────────▶ failed   (entry -> held)
//!    │
//!    └─▶ processing ──rail ok──▶ completed (entry -> released)
//!                   └─rail error / timeout──▶ failed (entry -> held)
//! ```
//!
//! The release is marked `processing` before the rail is called, and a rail
//! call is made at most once per release. A timed-out call is recorded as a
//! failure and never retried here; whether money moved is settled by
//! reconciliation.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, error, info, warn};

use super::audit::{AuditAction, AuditRecord, AuditSink};
use super::error::{EscrowError, FailureCode};
use super::events::{EventPublisher, ReleaseEvent};
use super::state::{ReleaseRequestStatus, ReleaseStatus};
use super::store::EscrowStore;
use super::types::{Finalization, ReleaseId, ReleaseOutcome, ReleaseRequest, RECIPIENT_ENTITY_TYPE};
use crate::rails::{Payout, RailRegistry, TransferResult, TransferStatus};

/// Default bound for a single rail call
pub const DEFAULT_RAIL_TIMEOUT: Duration = Duration::from_secs(15);

pub struct TransferExecutor {
    store: Arc<dyn EscrowStore>,
    registry: Arc<RailRegistry>,
    events: Arc<dyn EventPublisher>,
    audit: Arc<dyn AuditSink>,
    rail_timeout: Duration,
}

impl TransferExecutor {
    pub fn new(
        store: Arc<dyn EscrowStore>,
        registry: Arc<RailRegistry>,
        events: Arc<dyn EventPublisher>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            store,
            registry,
            events,
            audit,
            rail_timeout: DEFAULT_RAIL_TIMEOUT,
        }
    }

    pub fn with_rail_timeout(mut self, timeout: Duration) -> Self {
        self.rail_timeout = timeout;
        self
    }

    pub fn registry(&self) -> &Arc<RailRegistry> {
        &self.registry
    }

    /// Execute a pending release.
    ///
    /// Terminal releases are returned as they are. Rail and precondition
    /// failures are part of the returned outcome, not errors.
    pub async fn execute(&self, release_id: ReleaseId) -> Result<ReleaseOutcome, EscrowError> {
        let release = self
            .store
            .get_release(release_id)
            .await?
            .ok_or_else(|| EscrowError::ReleaseNotFound(release_id.to_string()))?;

        match release.status {
            ReleaseRequestStatus::Pending => {}
            ReleaseRequestStatus::Processing => {
                return Err(EscrowError::ReleaseInFlight(release.entry_id.to_string()));
            }
            ReleaseRequestStatus::Completed | ReleaseRequestStatus::Failed => {
                debug!(release_id = %release_id, status = %release.status, "Release already terminal");
                return Ok(ReleaseOutcome::from(&release));
            }
        }

        let entry = self
            .store
            .get_entry(release.entry_id)
            .await?
            .ok_or_else(|| EscrowError::EntryNotFound(release.entry_id.to_string()))?;
        if entry.release_status != ReleaseStatus::PendingRelease {
            return Err(EscrowError::InvalidStateTransition(format!(
                "entry {} is {}, expected pending_release",
                entry.id, entry.release_status
            )));
        }

        // Recipient; inactive accounts are treated as absent
        let account = match entry.creator_id.as_deref() {
            Some(creator_id) => self
                .store
                .find_connected_account(RECIPIENT_ENTITY_TYPE, creator_id)
                .await?
                .filter(|a| a.active),
            None => None,
        };

        let selected = match self.registry.select(
            &release.ledger_id,
            release.requested_rail.as_deref(),
            account.as_ref(),
        ) {
            Ok(selected) => selected,
            Err(e) => {
                return self
                    .fail(&release, FailureCode::RailUnavailable, e.to_string())
                    .await;
            }
        };
        let rail = selected.name();

        let Some(destination) = account.as_ref().and_then(|a| a.destination_for(rail)) else {
            return self
                .fail(
                    &release,
                    FailureCode::MissingDestination,
                    format!("recipient has no {} destination", rail),
                )
                .await;
        };
        if release.amount <= rust_decimal::Decimal::ZERO {
            return self
                .fail(
                    &release,
                    FailureCode::InvalidAmount,
                    format!("amount must be positive, got {}", release.amount),
                )
                .await;
        }
        if !account.as_ref().is_some_and(|a| a.can_receive_transfers) {
            return self
                .fail(
                    &release,
                    FailureCode::AccountNotVerified,
                    "recipient cannot receive transfers".to_string(),
                )
                .await;
        }

        // Persist before call
        if !self.store.mark_processing(release_id, rail).await? {
            return Err(EscrowError::ReleaseInFlight(release.entry_id.to_string()));
        }

        let payout = Payout {
            release_id,
            ledger_id: release.ledger_id.clone(),
            recipient_id: entry.creator_id.clone().unwrap_or_default(),
            amount: release.amount,
            currency: release.currency.clone(),
            destination,
        };

        info!(
            release_id = %release_id,
            entry_id = %release.entry_id,
            rail,
            source = ?selected.source,
            amount = %release.amount,
            "Executing release"
        );

        let result = match tokio::time::timeout(
            self.rail_timeout,
            selected.adapter.execute(&payout, &selected.config),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    release_id = %release_id,
                    rail,
                    timeout_ms = self.rail_timeout.as_millis() as u64,
                    "Rail call timed out, outcome unknown"
                );
                TransferResult::failed(
                    FailureCode::RailTimeout.as_str(),
                    format!("no answer from {} within {:?}", rail, self.rail_timeout),
                )
            }
        };

        let finalization = if result.success {
            Finalization::Completed {
                external_transfer_id: result.external_id.clone(),
                rail_status: result.status.as_str().to_string(),
                batch_payout: result.batch_payout,
            }
        } else {
            let (code, message) = match result.error {
                Some(err) => (err.code, err.message),
                None => ("unknown".to_string(), "rail reported failure".to_string()),
            };
            Finalization::Failed {
                code: FailureCode::parse(&code),
                message,
            }
        };

        let finalized = self.finalize(&release, &finalization).await?;
        Ok(ReleaseOutcome::from(&finalized))
    }

    /// Fail a release before any rail call
    async fn fail(
        &self,
        release: &ReleaseRequest,
        code: FailureCode,
        message: String,
    ) -> Result<ReleaseOutcome, EscrowError> {
        warn!(
            release_id = %release.id,
            entry_id = %release.entry_id,
            code = %code,
            "Release precondition failed"
        );
        let finalized = self
            .finalize(release, &Finalization::Failed { code, message })
            .await?;
        Ok(ReleaseOutcome::from(&finalized))
    }

    async fn finalize(
        &self,
        release: &ReleaseRequest,
        finalization: &Finalization,
    ) -> Result<ReleaseRequest, EscrowError> {
        let finalized = self
            .store
            .finalize_release(release.id, finalization, Utc::now())
            .await
            .inspect_err(|e| {
                error!(release_id = %release.id, error = %e, "CRITICAL: release finalization failed");
            })?;

        let action = match finalized.status {
            ReleaseRequestStatus::Completed => {
                info!(
                    release_id = %finalized.id,
                    entry_id = %finalized.entry_id,
                    external_transfer_id = finalized.external_transfer_id.as_deref().unwrap_or("-"),
                    rail_status = finalized.rail_status.as_deref().unwrap_or("-"),
                    "Release completed"
                );
                AuditAction::ReleaseCompleted
            }
            _ => {
                info!(
                    release_id = %finalized.id,
                    entry_id = %finalized.entry_id,
                    error_code = finalized.error_code.as_deref().unwrap_or("-"),
                    "Release failed, entry back on hold"
                );
                AuditAction::ReleaseFailed
            }
        };

        let record = AuditRecord::new(action, &finalized.ledger_id)
            .entry(finalized.entry_id)
            .release(finalized.id)
            .actor(finalized.requested_by.clone())
            .amount(finalized.amount, &finalized.currency)
            .rail(finalized.rail.clone())
            .detail(serde_json::json!({
                "external_transfer_id": finalized.external_transfer_id,
                "rail_status": finalized.rail_status,
                "error_code": finalized.error_code,
                "error_message": finalized.error_message,
            }))
            .scored(Some(finalized.release_type));
        if let Err(e) = self.audit.record(record).await {
            error!(release_id = %finalized.id, error = %e, "Failed to write audit record");
        }

        if let Some(event) = ReleaseEvent::from_release(&finalized)
            && let Err(e) = self.events.publish(event).await
        {
            warn!(release_id = %finalized.id, error = %e, "Failed to publish release event");
        }

        Ok(finalized)
    }

    /// Ask the rail for the current state of a completed release and record it.
    ///
    /// Never re-issues a transfer. A rail reporting the transfer as failed
    /// (e.g. reversed) is recorded as `rail_status = failed` for manual review;
    /// the entry stays released.
    pub async fn reconcile(&self, release_id: ReleaseId) -> Result<ReleaseOutcome, EscrowError> {
        let release = self
            .store
            .get_release(release_id)
            .await?
            .ok_or_else(|| EscrowError::ReleaseNotFound(release_id.to_string()))?;
        if release.status != ReleaseRequestStatus::Completed {
            return Err(EscrowError::InvalidStateTransition(format!(
                "release {} is {}, only completed releases can be reconciled",
                release_id, release.status
            )));
        }
        let (Some(rail), Some(external_id)) = (release.rail.as_deref(), release.external_transfer_id.as_deref())
        else {
            return Err(EscrowError::InvalidStateTransition(format!(
                "release {} has no rail transfer to reconcile",
                release_id
            )));
        };
        let adapter = self
            .registry
            .get(rail)
            .ok_or_else(|| EscrowError::UnknownRail(rail.to_string()))?;
        let config = self.registry.config_for(&release.ledger_id, rail);

        let result = match tokio::time::timeout(self.rail_timeout, adapter.get_status(external_id, &config)).await {
            Ok(result) => result,
            Err(_) => TransferResult::failed(FailureCode::RailTimeout.as_str(), "status query timed out"),
        };

        // A failed query (as opposed to a failed transfer) leaves the record untouched
        if result.status == TransferStatus::Failed && result.external_id.is_none() {
            let message = result.error.map(|e| e.message).unwrap_or_default();
            return Err(EscrowError::SystemError(format!(
                "status query for release {} failed: {}",
                release_id, message
            )));
        }

        if result.status == TransferStatus::Failed {
            warn!(
                release_id = %release_id,
                rail,
                external_id,
                "Rail reports completed release as failed"
            );
        }
        self.store
            .record_rail_status(release_id, result.status.as_str())
            .await?;

        let updated = self
            .store
            .get_release(release_id)
            .await?
            .ok_or_else(|| EscrowError::ReleaseNotFound(release_id.to_string()))?;
        Ok(ReleaseOutcome::from(&updated))
    }
}
