//! Hold Registry
//!
//! Read side of the escrow core: which held entries exist, which are ready
//! for release and how much is held per venture.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use super::error::EscrowError;
use super::state::ReleaseStatus;
use super::store::EscrowStore;
use super::types::{ConnectedAccount, HeldEntryRow, HoldFilter, HoldSummary, LedgerEntry, RECIPIENT_ENTITY_TYPE};

/// Upper bound for `HoldFilter::limit`
pub const MAX_LIST_LIMIT: usize = 1_000;

pub struct HoldRegistry {
    store: Arc<dyn EscrowStore>,
}

impl HoldRegistry {
    pub fn new(store: Arc<dyn EscrowStore>) -> Self {
        Self { store }
    }

    /// Held entries of a ledger, oldest first, enriched with recipient data.
    ///
    /// Entries whose recipient has no connected account are still listed,
    /// with `has_connected_account = false`.
    pub async fn list_held(
        &self,
        filter: &HoldFilter,
        now: DateTime<Utc>,
    ) -> Result<Vec<HeldEntryRow>, EscrowError> {
        if filter.ledger_id.trim().is_empty() {
            return Err(EscrowError::MissingField("ledger_id"));
        }
        if let Some(limit) = filter.limit
            && !(1..=MAX_LIST_LIMIT).contains(&limit)
        {
            return Err(EscrowError::InvalidLimit(MAX_LIST_LIMIT));
        }

        let mut entries: Vec<LedgerEntry> = self
            .store
            .list_entries(&filter.ledger_id, &[ReleaseStatus::Held])
            .await?
            .into_iter()
            .filter(|e| filter.venture_id.is_none() || e.venture_id == filter.venture_id)
            .filter(|e| filter.creator_id.is_none() || e.creator_id == filter.creator_id)
            .filter(|e| !filter.ready_only || e.is_ready(now))
            .collect();
        if let Some(limit) = filter.limit {
            entries.truncate(limit);
        }

        let accounts = self.recipients(&entries).await?;
        Ok(entries
            .into_iter()
            .map(|entry| {
                let account = entry.creator_id.as_ref().and_then(|id| accounts.get(id));
                held_row(entry, account, now)
            })
            .collect())
    }

    /// Per-venture, per-currency totals of held and pending-release entries
    pub async fn summarize(
        &self,
        ledger_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<HoldSummary>, EscrowError> {
        if ledger_id.trim().is_empty() {
            return Err(EscrowError::MissingField("ledger_id"));
        }
        let entries = self
            .store
            .list_entries(ledger_id, &[ReleaseStatus::Held, ReleaseStatus::PendingRelease])
            .await?;

        let mut groups: BTreeMap<(Option<String>, String), HoldSummary> = BTreeMap::new();
        for entry in entries {
            let key = (entry.venture_id.clone(), entry.currency.clone());
            let summary = groups.entry(key).or_insert_with(|| HoldSummary {
                venture_id: entry.venture_id.clone(),
                currency: entry.currency.clone(),
                total_held: Decimal::ZERO,
                ready_for_release: Decimal::ZERO,
                pending_release: Decimal::ZERO,
                entry_count: 0,
            });
            match entry.release_status {
                ReleaseStatus::Held => {
                    summary.total_held += entry.amount;
                    if entry.is_ready(now) {
                        summary.ready_for_release += entry.amount;
                    }
                }
                ReleaseStatus::PendingRelease => summary.pending_release += entry.amount,
                _ => continue,
            }
            summary.entry_count += 1;
        }

        Ok(groups.into_values().collect())
    }

    async fn recipients(
        &self,
        entries: &[LedgerEntry],
    ) -> Result<HashMap<String, ConnectedAccount>, EscrowError> {
        let mut ids: Vec<String> = entries.iter().filter_map(|e| e.creator_id.clone()).collect();
        ids.sort();
        ids.dedup();
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        Ok(self
            .store
            .find_connected_accounts(RECIPIENT_ENTITY_TYPE, &ids)
            .await?
            .into_iter()
            .map(|a| (a.entity_id.clone(), a))
            .collect())
    }
}

fn held_row(entry: LedgerEntry, account: Option<&ConnectedAccount>, now: DateTime<Utc>) -> HeldEntryRow {
    HeldEntryRow {
        is_ready: entry.is_ready(now),
        entry_id: entry.id,
        ledger_id: entry.ledger_id,
        account_id: entry.account_id,
        venture_id: entry.venture_id,
        creator_id: entry.creator_id,
        amount: entry.amount,
        currency: entry.currency,
        hold_reason: entry.hold_reason,
        hold_until: entry.hold_until,
        created_at: entry.created_at,
        has_connected_account: account.is_some(),
        can_receive_transfers: account.is_some_and(|a| a.active && a.can_receive_transfers),
        processor_account_id: account.and_then(|a| a.processor_account_id.clone()),
        preferred_rail: account.and_then(|a| a.preferred_rail.clone()),
    }
}
