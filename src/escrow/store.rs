//! Escrow Store
//!
//! Persistence seam of the escrow core. All state changes go through the
//! conditional operations below; none of them is a blind write.
//!
//! | Operation          | Guard                                             |
//! |--------------------|---------------------------------------------------|
//! | `create_release`   | entry `held`, no pending/processing request       |
//! | `mark_processing`  | request `pending`                                 |
//! | `finalize_release` | request non-terminal, entry `pending_release`     |
//! | `void_entry`       | entry `held`                                      |
//! | `settle_payouts`   | every payout queued and not yet in a batch file   |

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::error::EscrowError;
use super::state::{ReleaseRequestStatus, ReleaseStatus};
use super::types::{
    ConnectedAccount, EntryId, Finalization, LedgerEntry, QueuedPayout, ReleaseId, ReleaseRequest,
};

#[async_trait]
pub trait EscrowStore: Send + Sync {
    async fn get_entry(&self, entry_id: EntryId) -> Result<Option<LedgerEntry>, EscrowError>;

    /// Entries of a ledger in any of `statuses`, oldest first
    async fn list_entries(
        &self,
        ledger_id: &str,
        statuses: &[ReleaseStatus],
    ) -> Result<Vec<LedgerEntry>, EscrowError>;

    /// Held entries whose `hold_until` is set and has passed, oldest hold first
    async fn list_expired_holds(
        &self,
        ledger_id: &str,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<LedgerEntry>, EscrowError>;

    async fn find_connected_account(
        &self,
        entity_type: &str,
        entity_id: &str,
    ) -> Result<Option<ConnectedAccount>, EscrowError>;

    /// Bulk lookup used for enrichment; unknown ids are simply absent
    async fn find_connected_accounts(
        &self,
        entity_type: &str,
        entity_ids: &[String],
    ) -> Result<Vec<ConnectedAccount>, EscrowError>;

    /// Insert a pending request and flip its entry to `pending_release`,
    /// atomically.
    ///
    /// # Errors
    /// - `EntryNotFound` if the entry does not exist
    /// - `ReleaseInFlight` if a pending/processing request exists for the entry
    /// - `NotHeld` if the entry is not `held`
    async fn create_release(&self, release: &ReleaseRequest) -> Result<(), EscrowError>;

    async fn get_release(&self, release_id: ReleaseId) -> Result<Option<ReleaseRequest>, EscrowError>;

    /// CAS `pending -> processing`, recording the rail.
    /// Returns `false` if the request was not pending.
    async fn mark_processing(&self, release_id: ReleaseId, rail: &str) -> Result<bool, EscrowError>;

    /// Pending requests of a ledger created before `created_before`, oldest
    /// first. These were queued but never executed.
    async fn find_stale_releases(
        &self,
        ledger_id: &str,
        created_before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<ReleaseRequest>, EscrowError>;

    /// Make the request terminal and move its entry to `released` (completed)
    /// or back to `held` (failed), as one unit. A completed finalization that
    /// carries a batch payout queues it in the same unit.
    async fn finalize_release(
        &self,
        release_id: ReleaseId,
        finalization: &Finalization,
        now: DateTime<Utc>,
    ) -> Result<ReleaseRequest, EscrowError>;

    /// Record the latest rail-reported status of a completed request
    async fn record_rail_status(
        &self,
        release_id: ReleaseId,
        rail_status: &str,
    ) -> Result<bool, EscrowError>;

    /// CAS `held -> voided`
    async fn void_entry(
        &self,
        entry_id: EntryId,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<LedgerEntry, EscrowError>;

    /// Queued payouts of a ledger not yet written to a batch file, oldest first
    async fn list_unsettled_payouts(&self, ledger_id: &str) -> Result<Vec<QueuedPayout>, EscrowError>;

    /// Stamp `file_name` on every listed payout, all or none.
    ///
    /// # Errors
    /// - `InvalidStateTransition` if any payout is unknown, belongs to another
    ///   ledger or is already in a batch file
    async fn settle_payouts(
        &self,
        ledger_id: &str,
        release_ids: &[ReleaseId],
        file_name: &str,
        now: DateTime<Utc>,
    ) -> Result<(), EscrowError>;
}

#[derive(Default)]
struct Inner {
    entries: HashMap<EntryId, LedgerEntry>,
    releases: HashMap<ReleaseId, ReleaseRequest>,
    accounts: HashMap<(String, String), ConnectedAccount>,
    payouts: HashMap<ReleaseId, QueuedPayout>,
}

/// In-memory store
///
/// A single mutex serializes every operation, which gives the same
/// check-then-create atomicity the database gets from row locks.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Seed an entry (entries are posted by the ledger service)
    pub fn insert_entry(&self, entry: LedgerEntry) {
        self.lock().entries.insert(entry.id, entry);
    }

    pub fn upsert_account(&self, account: ConnectedAccount) {
        let key = (account.entity_type.clone(), account.entity_id.clone());
        self.lock().accounts.insert(key, account);
    }

    pub fn releases_for_entry(&self, entry_id: EntryId) -> Vec<ReleaseRequest> {
        let mut releases: Vec<ReleaseRequest> = self
            .lock()
            .releases
            .values()
            .filter(|r| r.entry_id == entry_id)
            .cloned()
            .collect();
        releases.sort_by_key(|r| r.id);
        releases
    }
}

#[async_trait]
impl EscrowStore for MemoryStore {
    async fn get_entry(&self, entry_id: EntryId) -> Result<Option<LedgerEntry>, EscrowError> {
        Ok(self.lock().entries.get(&entry_id).cloned())
    }

    async fn list_entries(
        &self,
        ledger_id: &str,
        statuses: &[ReleaseStatus],
    ) -> Result<Vec<LedgerEntry>, EscrowError> {
        let mut entries: Vec<LedgerEntry> = self
            .lock()
            .entries
            .values()
            .filter(|e| e.ledger_id == ledger_id && statuses.contains(&e.release_status))
            .cloned()
            .collect();
        entries.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(entries)
    }

    async fn list_expired_holds(
        &self,
        ledger_id: &str,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<LedgerEntry>, EscrowError> {
        let mut entries: Vec<LedgerEntry> = self
            .lock()
            .entries
            .values()
            .filter(|e| e.ledger_id == ledger_id && e.is_hold_expired(now))
            .cloned()
            .collect();
        entries.sort_by(|a, b| a.hold_until.cmp(&b.hold_until).then(a.id.cmp(&b.id)));
        entries.truncate(limit);
        Ok(entries)
    }

    async fn find_connected_account(
        &self,
        entity_type: &str,
        entity_id: &str,
    ) -> Result<Option<ConnectedAccount>, EscrowError> {
        Ok(self
            .lock()
            .accounts
            .get(&(entity_type.to_string(), entity_id.to_string()))
            .cloned())
    }

    async fn find_connected_accounts(
        &self,
        entity_type: &str,
        entity_ids: &[String],
    ) -> Result<Vec<ConnectedAccount>, EscrowError> {
        let inner = self.lock();
        Ok(entity_ids
            .iter()
            .filter_map(|id| inner.accounts.get(&(entity_type.to_string(), id.clone())))
            .cloned()
            .collect())
    }

    async fn create_release(&self, release: &ReleaseRequest) -> Result<(), EscrowError> {
        let mut inner = self.lock();
        let entry_key = release.entry_id.to_string();

        let in_flight = inner
            .releases
            .values()
            .any(|r| r.entry_id == release.entry_id && r.status.is_active());
        let entry = inner
            .entries
            .get_mut(&release.entry_id)
            .ok_or_else(|| EscrowError::EntryNotFound(entry_key.clone()))?;
        if in_flight {
            return Err(EscrowError::ReleaseInFlight(entry_key));
        }
        if entry.release_status != ReleaseStatus::Held {
            return Err(EscrowError::NotHeld {
                entry_id: entry_key,
                status: entry.release_status,
            });
        }

        entry.release_status = ReleaseStatus::PendingRelease;
        entry.status_changed_at = Some(release.created_at);
        inner.releases.insert(release.id, release.clone());
        Ok(())
    }

    async fn get_release(&self, release_id: ReleaseId) -> Result<Option<ReleaseRequest>, EscrowError> {
        Ok(self.lock().releases.get(&release_id).cloned())
    }

    async fn mark_processing(&self, release_id: ReleaseId, rail: &str) -> Result<bool, EscrowError> {
        let mut inner = self.lock();
        match inner.releases.get_mut(&release_id) {
            Some(release) if release.status == ReleaseRequestStatus::Pending => {
                release.status = ReleaseRequestStatus::Processing;
                release.rail = Some(rail.to_string());
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(EscrowError::ReleaseNotFound(release_id.to_string())),
        }
    }

    async fn find_stale_releases(
        &self,
        ledger_id: &str,
        created_before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<ReleaseRequest>, EscrowError> {
        let mut stale: Vec<ReleaseRequest> = self
            .lock()
            .releases
            .values()
            .filter(|r| {
                r.ledger_id == ledger_id
                    && r.status == ReleaseRequestStatus::Pending
                    && r.created_at < created_before
            })
            .cloned()
            .collect();
        stale.sort_by_key(|r| (r.created_at, r.id));
        stale.truncate(limit);
        Ok(stale)
    }

    async fn finalize_release(
        &self,
        release_id: ReleaseId,
        finalization: &Finalization,
        now: DateTime<Utc>,
    ) -> Result<ReleaseRequest, EscrowError> {
        let mut inner = self.lock();
        let Inner {
            entries,
            releases,
            payouts,
            ..
        } = &mut *inner;

        let release = releases
            .get_mut(&release_id)
            .ok_or_else(|| EscrowError::ReleaseNotFound(release_id.to_string()))?;
        let (next_status, next_entry) = match finalization {
            Finalization::Completed { .. } => (ReleaseRequestStatus::Completed, ReleaseStatus::Released),
            Finalization::Failed { .. } => (ReleaseRequestStatus::Failed, ReleaseStatus::Held),
        };
        if !release.status.can_transition_to(next_status) {
            return Err(EscrowError::InvalidStateTransition(format!(
                "release {} {} -> {}",
                release_id, release.status, next_status
            )));
        }
        let entry = entries
            .get_mut(&release.entry_id)
            .ok_or_else(|| EscrowError::EntryNotFound(release.entry_id.to_string()))?;
        if entry.release_status != ReleaseStatus::PendingRelease {
            return Err(EscrowError::InvalidStateTransition(format!(
                "entry {} {} -> {}",
                entry.id, entry.release_status, next_entry
            )));
        }

        release.status = next_status;
        release.completed_at = Some(now);
        match finalization {
            Finalization::Completed {
                external_transfer_id,
                rail_status,
                batch_payout,
            } => {
                release.external_transfer_id = external_transfer_id.clone();
                release.rail_status = Some(rail_status.clone());
                if let Some(payout) = batch_payout {
                    payouts.entry(release_id).or_insert_with(|| QueuedPayout {
                        release_id,
                        ledger_id: release.ledger_id.clone(),
                        payout: payout.clone(),
                        queued_at: now,
                        batch_file: None,
                    });
                }
            }
            Finalization::Failed { code, message } => {
                release.error_code = Some(code.as_str().to_string());
                release.error_message = Some(message.clone());
            }
        }
        entry.release_status = next_entry;
        entry.status_changed_at = Some(now);

        Ok(release.clone())
    }

    async fn record_rail_status(
        &self,
        release_id: ReleaseId,
        rail_status: &str,
    ) -> Result<bool, EscrowError> {
        let mut inner = self.lock();
        match inner.releases.get_mut(&release_id) {
            Some(release) if release.status == ReleaseRequestStatus::Completed => {
                release.rail_status = Some(rail_status.to_string());
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(EscrowError::ReleaseNotFound(release_id.to_string())),
        }
    }

    async fn void_entry(
        &self,
        entry_id: EntryId,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<LedgerEntry, EscrowError> {
        let mut inner = self.lock();
        let entry = inner
            .entries
            .get_mut(&entry_id)
            .ok_or_else(|| EscrowError::EntryNotFound(entry_id.to_string()))?;
        if entry.release_status != ReleaseStatus::Held {
            return Err(EscrowError::NotHeld {
                entry_id: entry_id.to_string(),
                status: entry.release_status,
            });
        }
        entry.release_status = ReleaseStatus::Voided;
        entry.void_reason = Some(reason.to_string());
        entry.status_changed_at = Some(now);
        Ok(entry.clone())
    }

    async fn list_unsettled_payouts(&self, ledger_id: &str) -> Result<Vec<QueuedPayout>, EscrowError> {
        let mut queued: Vec<QueuedPayout> = self
            .lock()
            .payouts
            .values()
            .filter(|p| p.ledger_id == ledger_id && p.batch_file.is_none())
            .cloned()
            .collect();
        queued.sort_by(|a, b| a.queued_at.cmp(&b.queued_at).then(a.release_id.cmp(&b.release_id)));
        Ok(queued)
    }

    async fn settle_payouts(
        &self,
        ledger_id: &str,
        release_ids: &[ReleaseId],
        file_name: &str,
        _now: DateTime<Utc>,
    ) -> Result<(), EscrowError> {
        let mut inner = self.lock();
        for release_id in release_ids {
            let unsettled = inner
                .payouts
                .get(release_id)
                .is_some_and(|p| p.ledger_id == ledger_id && p.batch_file.is_none());
            if !unsettled {
                return Err(EscrowError::InvalidStateTransition(format!(
                    "payout {} is not queued for ledger {}",
                    release_id, ledger_id
                )));
            }
        }
        for release_id in release_ids {
            if let Some(payout) = inner.payouts.get_mut(release_id) {
                payout.batch_file = Some(file_name.to_string());
            }
        }
        Ok(())
    }
}

/// Fixtures shared by the escrow unit tests
#[cfg(test)]
pub mod fixtures {
    use super::*;
    use crate::escrow::types::{EntryType, RECIPIENT_ENTITY_TYPE};
    use crate::rails::{BankAccount, BankAccountType};
    use rust_decimal::Decimal;
    use uuid::Uuid;

    pub fn held_entry(ledger_id: &str, creator_id: &str, cents: i64) -> LedgerEntry {
        LedgerEntry {
            id: Uuid::new_v4(),
            ledger_id: ledger_id.into(),
            account_id: "escrow-liability".into(),
            venture_id: Some("venture-1".into()),
            creator_id: Some(creator_id.into()),
            amount: Decimal::new(cents, 2),
            currency: "USD".into(),
            entry_type: EntryType::Credit,
            release_status: ReleaseStatus::Held,
            hold_reason: Some("refund window".into()),
            hold_until: None,
            void_reason: None,
            created_at: Utc::now(),
            status_changed_at: None,
        }
    }

    pub fn verified_account(creator_id: &str) -> ConnectedAccount {
        ConnectedAccount {
            entity_type: RECIPIENT_ENTITY_TYPE.into(),
            entity_id: creator_id.into(),
            processor_account_id: Some(format!("acct_{}", creator_id)),
            banking_token_id: None,
            banking_account_id: None,
            bank_account: Some(BankAccount {
                routing_number: "021000021".into(),
                account_number: "1234567890".into(),
                holder_name: "Ada Lovelace".into(),
                account_type: BankAccountType::Checking,
            }),
            legal_name: Some("Ada Lovelace".into()),
            preferred_rail: None,
            can_receive_transfers: true,
            active: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;
    use crate::escrow::error::FailureCode;
    use crate::batch_file::BatchPayout;
    use crate::escrow::state::ReleaseType;
    use chrono::Duration;

    #[tokio::test]
    async fn test_create_release_guards() {
        let store = MemoryStore::new();
        let entry = held_entry("ledger-1", "c1", 10_000);
        store.insert_entry(entry.clone());

        let first = ReleaseRequest::new(&entry, ReleaseType::Manual, None, None);
        store.create_release(&first).await.unwrap();
        assert_eq!(
            store.get_entry(entry.id).await.unwrap().unwrap().release_status,
            ReleaseStatus::PendingRelease
        );

        let second = ReleaseRequest::new(&entry, ReleaseType::Manual, None, None);
        assert!(matches!(
            store.create_release(&second).await,
            Err(EscrowError::ReleaseInFlight(_))
        ));
        assert_eq!(store.releases_for_entry(entry.id).len(), 1);

        let missing = held_entry("ledger-1", "c1", 1);
        let orphan = ReleaseRequest::new(&missing, ReleaseType::Manual, None, None);
        assert!(matches!(
            store.create_release(&orphan).await,
            Err(EscrowError::EntryNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_finalize_failed_reverts_to_held() {
        let store = MemoryStore::new();
        let entry = held_entry("ledger-1", "c1", 10_000);
        store.insert_entry(entry.clone());
        let release = ReleaseRequest::new(&entry, ReleaseType::Manual, None, None);
        store.create_release(&release).await.unwrap();

        assert!(store.mark_processing(release.id, "processor").await.unwrap());
        assert!(!store.mark_processing(release.id, "processor").await.unwrap());

        let failed = store
            .finalize_release(
                release.id,
                &Finalization::Failed {
                    code: FailureCode::Provider("account_closed".into()),
                    message: "closed".into(),
                },
                Utc::now(),
            )
            .await
            .unwrap();
        assert_eq!(failed.status, ReleaseRequestStatus::Failed);
        assert_eq!(failed.error_code.as_deref(), Some("account_closed"));
        assert_eq!(failed.rail.as_deref(), Some("processor"));
        assert_eq!(
            store.get_entry(entry.id).await.unwrap().unwrap().release_status,
            ReleaseStatus::Held
        );

        // Terminal: cannot finalize again
        assert!(matches!(
            store
                .finalize_release(
                    release.id,
                    &Finalization::Completed {
                        external_transfer_id: None,
                        rail_status: "completed".into(),
                        batch_payout: None,
                    },
                    Utc::now()
                )
                .await,
            Err(EscrowError::InvalidStateTransition(_))
        ));

        // Retry is possible once back in held
        let retry = ReleaseRequest::new(&entry, ReleaseType::Manual, None, None);
        store.create_release(&retry).await.unwrap();
    }

    #[tokio::test]
    async fn test_complete_requires_processing() {
        let store = MemoryStore::new();
        let entry = held_entry("ledger-1", "c1", 10_000);
        store.insert_entry(entry.clone());
        let release = ReleaseRequest::new(&entry, ReleaseType::Auto, None, None);
        store.create_release(&release).await.unwrap();

        let completed = Finalization::Completed {
            external_transfer_id: Some("tr_1".into()),
            rail_status: "completed".into(),
            batch_payout: None,
        };
        assert!(store.finalize_release(release.id, &completed, Utc::now()).await.is_err());

        store.mark_processing(release.id, "processor").await.unwrap();
        let done = store.finalize_release(release.id, &completed, Utc::now()).await.unwrap();
        assert_eq!(done.external_transfer_id.as_deref(), Some("tr_1"));
        assert!(done.completed_at.is_some());
        assert_eq!(
            store.get_entry(entry.id).await.unwrap().unwrap().release_status,
            ReleaseStatus::Released
        );
        assert!(store.record_rail_status(release.id, "pending").await.unwrap());
    }

    #[tokio::test]
    async fn test_void_only_from_held() {
        let store = MemoryStore::new();
        let entry = held_entry("ledger-1", "c1", 10_000);
        store.insert_entry(entry.clone());

        let voided = store.void_entry(entry.id, "fraud", Utc::now()).await.unwrap();
        assert_eq!(voided.release_status, ReleaseStatus::Voided);
        assert_eq!(voided.void_reason.as_deref(), Some("fraud"));

        assert!(matches!(
            store.void_entry(entry.id, "again", Utc::now()).await,
            Err(EscrowError::NotHeld { status: ReleaseStatus::Voided, .. })
        ));
        let release = ReleaseRequest::new(&entry, ReleaseType::Manual, None, None);
        assert!(matches!(
            store.create_release(&release).await,
            Err(EscrowError::NotHeld { .. })
        ));
    }

    #[tokio::test]
    async fn test_list_expired_holds() {
        let store = MemoryStore::new();
        let now = Utc::now();

        let mut old = held_entry("ledger-1", "c1", 100);
        old.hold_until = Some(now - Duration::days(2));
        let mut recent = held_entry("ledger-1", "c1", 200);
        recent.hold_until = Some(now - Duration::hours(1));
        let mut future = held_entry("ledger-1", "c1", 300);
        future.hold_until = Some(now + Duration::hours(1));
        let no_date = held_entry("ledger-1", "c1", 400);
        let mut other_ledger = held_entry("ledger-2", "c1", 500);
        other_ledger.hold_until = Some(now - Duration::hours(1));

        for e in [&old, &recent, &future, &no_date, &other_ledger] {
            store.insert_entry(e.clone());
        }

        let expired = store.list_expired_holds("ledger-1", now, 10).await.unwrap();
        let ids: Vec<EntryId> = expired.iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![old.id, recent.id]);

        let limited = store.list_expired_holds("ledger-1", now, 1).await.unwrap();
        assert_eq!(limited.len(), 1);
        assert_eq!(limited[0].id, old.id);
    }

    #[tokio::test]
    async fn test_find_stale_releases_only_pending() {
        let store = MemoryStore::new();
        let queued = held_entry("ledger-1", "c1", 100);
        let running = held_entry("ledger-1", "c1", 200);
        let elsewhere = held_entry("ledger-2", "c1", 300);
        for e in [&queued, &running, &elsewhere] {
            store.insert_entry(e.clone());
        }

        let stale = ReleaseRequest::new(&queued, ReleaseType::Auto, None, None);
        store.create_release(&stale).await.unwrap();
        let processing = ReleaseRequest::new(&running, ReleaseType::Auto, None, None);
        store.create_release(&processing).await.unwrap();
        store.mark_processing(processing.id, "processor").await.unwrap();
        let other = ReleaseRequest::new(&elsewhere, ReleaseType::Auto, None, None);
        store.create_release(&other).await.unwrap();

        let later = Utc::now() + Duration::seconds(1);
        let found = store.find_stale_releases("ledger-1", later, 10).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, stale.id);

        // Too young
        let earlier = stale.created_at - Duration::seconds(1);
        assert!(store.find_stale_releases("ledger-1", earlier, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_batch_payout_queued_with_completion() {
        let store = MemoryStore::new();
        let entry = held_entry("ledger-1", "c1", 10_000);
        store.insert_entry(entry.clone());
        let release = ReleaseRequest::new(&entry, ReleaseType::Manual, None, None);
        store.create_release(&release).await.unwrap();
        store.mark_processing(release.id, "manual").await.unwrap();

        let account = verified_account("c1");
        let payout = BatchPayout {
            recipient_id: "c1".into(),
            bank_account: account.bank_account.unwrap(),
            amount: 10_000,
        };
        store
            .finalize_release(
                release.id,
                &Finalization::Completed {
                    external_transfer_id: Some(format!("batch_{}", release.id)),
                    rail_status: "pending".into(),
                    batch_payout: Some(payout.clone()),
                },
                Utc::now(),
            )
            .await
            .unwrap();

        let queued = store.list_unsettled_payouts("ledger-1").await.unwrap();
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].release_id, release.id);
        assert_eq!(queued[0].payout, payout);
        assert!(store.list_unsettled_payouts("ledger-2").await.unwrap().is_empty());

        // Wrong ledger or unknown id settles nothing
        assert!(
            store
                .settle_payouts("ledger-1", &[release.id, ReleaseId::new()], "f.ach", Utc::now())
                .await
                .is_err()
        );
        assert!(
            store
                .settle_payouts("ledger-2", &[release.id], "f.ach", Utc::now())
                .await
                .is_err()
        );
        assert_eq!(store.list_unsettled_payouts("ledger-1").await.unwrap().len(), 1);

        store
            .settle_payouts("ledger-1", &[release.id], "f.ach", Utc::now())
            .await
            .unwrap();
        assert!(store.list_unsettled_payouts("ledger-1").await.unwrap().is_empty());
        assert!(matches!(
            store.settle_payouts("ledger-1", &[release.id], "g.ach", Utc::now()).await,
            Err(EscrowError::InvalidStateTransition(_))
        ));
    }
}
