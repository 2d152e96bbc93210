//! Escrow Core Types
//!
//! Records read from and written to the escrow store, plus the result types
//! returned by the command surface.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error::{EscrowError, FailureCode};
use super::state::{ReleaseRequestStatus, ReleaseStatus, ReleaseType};
use crate::batch_file::BatchPayout;
use crate::rails::{self, BankAccount, Destination};

/// Ledger entry id (assigned by the ledger service)
pub type EntryId = Uuid;

/// Ledger id (tenant of the ledger service)
pub type LedgerId = String;

/// Entity type used for recipient lookups of connected accounts
pub const RECIPIENT_ENTITY_TYPE: &str = "creator";

/// Parse an entry id from user input
pub fn parse_entry_id(raw: &str) -> Result<EntryId, EscrowError> {
    Uuid::parse_str(raw.trim()).map_err(|_| EscrowError::InvalidEntryId(raw.to_string()))
}

/// Release request id - ULID-based, sortable by creation time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReleaseId(ulid::Ulid);

impl ReleaseId {
    pub fn new() -> Self {
        Self(ulid::Ulid::new())
    }

    pub fn inner(&self) -> ulid::Ulid {
        self.0
    }
}

impl Default for ReleaseId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ReleaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ReleaseId {
    type Err = EscrowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ulid::Ulid::from_string(s.trim())
            .map(Self)
            .map_err(|_| EscrowError::InvalidReleaseId(s.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryType {
    Debit,
    Credit,
}

impl EntryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryType::Debit => "debit",
            EntryType::Credit => "credit",
        }
    }
}

impl FromStr for EntryType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "debit" => Ok(EntryType::Debit),
            "credit" => Ok(EntryType::Credit),
            other => Err(format!("unknown entry type: {}", other)),
        }
    }
}

/// Ledger entry as seen by the escrow core.
///
/// Financial fields are owned by the ledger service; only `release_status`
/// and the hold metadata (`void_reason`, `status_changed_at`) are written here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: EntryId,
    pub ledger_id: LedgerId,
    pub account_id: String,
    /// Sub-entity the entry is booked under (summaries group by it)
    pub venture_id: Option<String>,
    /// Payout recipient
    pub creator_id: Option<String>,
    pub amount: Decimal,
    pub currency: String,
    pub entry_type: EntryType,
    pub release_status: ReleaseStatus,
    pub hold_reason: Option<String>,
    pub hold_until: Option<DateTime<Utc>>,
    pub void_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub status_changed_at: Option<DateTime<Utc>>,
}

impl LedgerEntry {
    /// A held entry is ready once its hold date (if any) has passed
    pub fn is_ready(&self, now: DateTime<Utc>) -> bool {
        self.release_status == ReleaseStatus::Held
            && self.hold_until.is_none_or(|until| until <= now)
    }

    /// Held with a hold date that has passed (eligible for auto release)
    pub fn is_hold_expired(&self, now: DateTime<Utc>) -> bool {
        self.release_status == ReleaseStatus::Held
            && self.hold_until.is_some_and(|until| until <= now)
    }
}

/// A recipient's registration with the payment rails
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectedAccount {
    pub entity_type: String,
    pub entity_id: String,
    pub processor_account_id: Option<String>,
    /// Vaulted banking-network token id and linked account (never the token itself)
    pub banking_token_id: Option<String>,
    pub banking_account_id: Option<String>,
    /// Bank details used by the manual batch rail
    pub bank_account: Option<BankAccount>,
    pub legal_name: Option<String>,
    pub preferred_rail: Option<String>,
    pub can_receive_transfers: bool,
    pub active: bool,
}

impl ConnectedAccount {
    /// Resolve the transfer destination this account offers on `rail`
    pub fn destination_for(&self, rail: &str) -> Option<Destination> {
        match rail {
            rails::PROCESSOR => self
                .processor_account_id
                .as_ref()
                .filter(|id| !id.trim().is_empty())
                .map(|id| Destination::ProcessorAccount {
                    account_id: id.clone(),
                }),
            rails::BANKING_NETWORK => match (&self.banking_token_id, &self.banking_account_id) {
                (Some(token_id), Some(account_id)) => Some(Destination::BankingNetwork {
                    token_id: token_id.clone(),
                    account_id: account_id.clone(),
                    legal_name: self.legal_name.clone().unwrap_or_default(),
                }),
                _ => None,
            },
            rails::MANUAL => self.bank_account.clone().map(Destination::BankAccount),
            _ => None,
        }
    }
}

/// A release attempt for one held entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReleaseRequest {
    pub id: ReleaseId,
    pub entry_id: EntryId,
    pub ledger_id: LedgerId,
    pub status: ReleaseRequestStatus,
    pub release_type: ReleaseType,
    pub requested_by: Option<String>,
    /// Rail explicitly asked for by the caller
    pub requested_rail: Option<String>,
    /// Rail actually used
    pub rail: Option<String>,
    /// Last status reported by the rail (e.g. `pending` for batch payouts)
    pub rail_status: Option<String>,
    pub amount: Decimal,
    pub currency: String,
    pub external_transfer_id: Option<String>,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl ReleaseRequest {
    /// New pending request for `entry`
    pub fn new(
        entry: &LedgerEntry,
        release_type: ReleaseType,
        requested_by: Option<String>,
        requested_rail: Option<String>,
    ) -> Self {
        Self {
            id: ReleaseId::new(),
            entry_id: entry.id,
            ledger_id: entry.ledger_id.clone(),
            status: ReleaseRequestStatus::Pending,
            release_type,
            requested_by,
            requested_rail,
            rail: None,
            rail_status: None,
            amount: entry.amount,
            currency: entry.currency.clone(),
            external_transfer_id: None,
            error_code: None,
            error_message: None,
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    pub fn failure_code(&self) -> Option<FailureCode> {
        self.error_code.as_deref().map(FailureCode::parse)
    }
}

/// Terminal update applied to a release and its entry in one unit
#[derive(Debug, Clone)]
pub enum Finalization {
    Completed {
        external_transfer_id: Option<String>,
        rail_status: String,
        /// Manual-rail payout to queue for the next batch file, in the same unit
        batch_payout: Option<BatchPayout>,
    },
    Failed {
        code: FailureCode,
        message: String,
    },
}

/// Manual-rail payout recorded with its completed release
#[derive(Debug, Clone, Serialize)]
pub struct QueuedPayout {
    pub release_id: ReleaseId,
    pub ledger_id: LedgerId,
    pub payout: BatchPayout,
    pub queued_at: DateTime<Utc>,
    /// Name of the batch file that carries the payout, once written
    pub batch_file: Option<String>,
}

/// Filter for [`crate::escrow::HoldRegistry::list_held`]
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HoldFilter {
    pub ledger_id: LedgerId,
    pub venture_id: Option<String>,
    pub creator_id: Option<String>,
    #[serde(default)]
    pub ready_only: bool,
    pub limit: Option<usize>,
}

/// Held entry enriched with recipient and rail-readiness information
#[derive(Debug, Clone, Serialize)]
pub struct HeldEntryRow {
    pub entry_id: EntryId,
    pub ledger_id: LedgerId,
    pub account_id: String,
    pub venture_id: Option<String>,
    pub creator_id: Option<String>,
    pub amount: Decimal,
    pub currency: String,
    pub hold_reason: Option<String>,
    pub hold_until: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub is_ready: bool,
    pub has_connected_account: bool,
    pub can_receive_transfers: bool,
    pub processor_account_id: Option<String>,
    pub preferred_rail: Option<String>,
}

/// Per-venture, per-currency hold totals
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HoldSummary {
    pub venture_id: Option<String>,
    pub currency: String,
    pub total_held: Decimal,
    pub ready_for_release: Decimal,
    pub pending_release: Decimal,
    /// Held plus pending-release entries
    pub entry_count: usize,
}

/// Observable result of one release attempt
#[derive(Debug, Clone, Serialize)]
pub struct ReleaseOutcome {
    pub release_id: ReleaseId,
    pub entry_id: EntryId,
    pub status: ReleaseRequestStatus,
    pub rail: Option<String>,
    pub rail_status: Option<String>,
    pub external_transfer_id: Option<String>,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
}

impl ReleaseOutcome {
    pub fn is_success(&self) -> bool {
        self.status == ReleaseRequestStatus::Completed
    }

    /// Surface a failed outcome as an [`EscrowError::ReleaseFailed`]
    pub fn into_result(self) -> Result<Self, EscrowError> {
        if self.status != ReleaseRequestStatus::Failed {
            return Ok(self);
        }
        Err(EscrowError::ReleaseFailed {
            release_id: self.release_id.to_string(),
            code: FailureCode::parse(self.error_code.as_deref().unwrap_or("unknown")),
            message: self.error_message.unwrap_or_default(),
        })
    }
}

impl From<&ReleaseRequest> for ReleaseOutcome {
    fn from(release: &ReleaseRequest) -> Self {
        Self {
            release_id: release.id,
            entry_id: release.entry_id,
            status: release.status,
            rail: release.rail.clone(),
            rail_status: release.rail_status.clone(),
            external_transfer_id: release.external_transfer_id.clone(),
            error_code: release.error_code.clone(),
            error_message: release.error_message.clone(),
        }
    }
}

/// One row of a batch release result
#[derive(Debug, Clone, Serialize)]
pub struct BatchItemResult {
    pub entry_id: String,
    pub success: bool,
    pub release_id: Option<ReleaseId>,
    pub status: Option<ReleaseRequestStatus>,
    pub external_transfer_id: Option<String>,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
}

impl BatchItemResult {
    pub fn from_outcome(outcome: &ReleaseOutcome) -> Self {
        Self {
            entry_id: outcome.entry_id.to_string(),
            success: outcome.is_success(),
            release_id: Some(outcome.release_id),
            status: Some(outcome.status),
            external_transfer_id: outcome.external_transfer_id.clone(),
            error_code: outcome.error_code.clone(),
            error_message: outcome.error_message.clone(),
        }
    }

    /// Rejected before any release request was created
    pub fn rejected(entry_id: impl Into<String>, err: &EscrowError) -> Self {
        Self {
            entry_id: entry_id.into(),
            success: false,
            release_id: None,
            status: None,
            external_transfer_id: None,
            error_code: Some(err.code().to_string()),
            error_message: Some(err.to_string()),
        }
    }
}

/// Multi-status result of a batch release
#[derive(Debug, Clone, Serialize)]
pub struct BatchReleaseResult {
    /// `true` only when every item succeeded
    pub success: bool,
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub results: Vec<BatchItemResult>,
}

impl BatchReleaseResult {
    pub fn from_results(results: Vec<BatchItemResult>) -> Self {
        let succeeded = results.iter().filter(|r| r.success).count();
        let failed = results.len() - succeeded;
        Self {
            success: failed == 0,
            total: results.len(),
            succeeded,
            failed,
            results,
        }
    }
}

/// Result of an auto-release sweep
#[derive(Debug, Clone, Default, Serialize)]
pub struct AutoReleaseReport {
    /// Entries found past their hold date
    pub eligible: usize,
    pub queued: Vec<ReleaseId>,
    /// Entries skipped because they changed state under the sweep
    pub skipped: usize,
    /// Present when the sweep executed the queued releases
    pub executed: Option<BatchReleaseResult>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn entry(hold_until: Option<DateTime<Utc>>) -> LedgerEntry {
        LedgerEntry {
            id: Uuid::new_v4(),
            ledger_id: "ledger-1".into(),
            account_id: "acct-1".into(),
            venture_id: Some("v1".into()),
            creator_id: Some("c1".into()),
            amount: Decimal::new(5000, 2),
            currency: "USD".into(),
            entry_type: EntryType::Credit,
            release_status: ReleaseStatus::Held,
            hold_reason: Some("chargeback window".into()),
            hold_until,
            void_reason: None,
            created_at: Utc::now(),
            status_changed_at: None,
        }
    }

    #[test]
    fn test_readiness() {
        let now = Utc::now();
        assert!(entry(None).is_ready(now));
        assert!(entry(Some(now - Duration::hours(1))).is_ready(now));
        assert!(entry(Some(now)).is_ready(now));
        assert!(!entry(Some(now + Duration::hours(1))).is_ready(now));

        assert!(!entry(None).is_hold_expired(now));
        assert!(entry(Some(now - Duration::seconds(1))).is_hold_expired(now));

        let mut pending = entry(None);
        pending.release_status = ReleaseStatus::PendingRelease;
        assert!(!pending.is_ready(now));
    }

    #[test]
    fn test_release_id_parse() {
        let id = ReleaseId::new();
        assert_eq!(id.to_string().parse::<ReleaseId>().unwrap(), id);
        assert!(matches!(
            "not-a-ulid".parse::<ReleaseId>(),
            Err(EscrowError::InvalidReleaseId(_))
        ));
        assert!(parse_entry_id("nope").is_err());
    }

    #[test]
    fn test_destination_for() {
        let account = ConnectedAccount {
            entity_type: RECIPIENT_ENTITY_TYPE.into(),
            entity_id: "c1".into(),
            processor_account_id: Some("acct_123".into()),
            banking_token_id: Some("tok-1".into()),
            banking_account_id: None,
            bank_account: None,
            legal_name: None,
            preferred_rail: None,
            can_receive_transfers: true,
            active: true,
        };
        assert!(matches!(
            account.destination_for(rails::PROCESSOR),
            Some(Destination::ProcessorAccount { .. })
        ));
        // Token without linked account is not a usable destination
        assert!(account.destination_for(rails::BANKING_NETWORK).is_none());
        assert!(account.destination_for(rails::MANUAL).is_none());
        assert!(account.destination_for("carrier_pigeon").is_none());
    }

    #[test]
    fn test_batch_result_counts() {
        let ok = BatchItemResult {
            entry_id: "a".into(),
            success: true,
            release_id: Some(ReleaseId::new()),
            status: Some(ReleaseRequestStatus::Completed),
            external_transfer_id: Some("tr_1".into()),
            error_code: None,
            error_message: None,
        };
        let bad = BatchItemResult::rejected("b", &EscrowError::ReleaseInFlight("b".into()));
        let result = BatchReleaseResult::from_results(vec![ok, bad]);
        assert!(!result.success);
        assert_eq!(result.total, 2);
        assert_eq!(result.succeeded, 1);
        assert_eq!(result.failed, 1);
        assert_eq!(
            result.results[1].error_code.as_deref(),
            Some("RELEASE_IN_FLIGHT")
        );
    }
}
