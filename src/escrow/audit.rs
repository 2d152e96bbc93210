//! Audit Trail
//!
//! Every money-moving action is written as an append-only [`AuditRecord`]
//! carrying a 0-100 risk score for later review.

use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

use super::error::EscrowError;
use super::state::ReleaseType;
use super::types::{EntryId, ReleaseId};
use crate::rails::MANUAL;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    ReleaseRequested,
    ReleaseCompleted,
    ReleaseFailed,
    EntryVoided,
    BatchFileGenerated,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::ReleaseRequested => "release_requested",
            AuditAction::ReleaseCompleted => "release_completed",
            AuditAction::ReleaseFailed => "release_failed",
            AuditAction::EntryVoided => "entry_voided",
            AuditAction::BatchFileGenerated => "batch_file_generated",
        }
    }

    fn base_risk(&self) -> u8 {
        match self {
            AuditAction::ReleaseRequested => 10,
            AuditAction::ReleaseCompleted => 20,
            AuditAction::EntryVoided => 25,
            AuditAction::ReleaseFailed => 30,
            AuditAction::BatchFileGenerated => 40,
        }
    }
}

/// Risk score in `0..=100`
///
/// Action base + amount band + 10 for a manual (human-initiated) release
/// + 15 when the money leaves through the manual batch rail.
pub fn risk_score(
    action: AuditAction,
    amount: Option<Decimal>,
    release_type: Option<ReleaseType>,
    rail: Option<&str>,
) -> u8 {
    let amount_band = match amount.map(|a| a.abs()) {
        None => 0,
        Some(a) if a < Decimal::from(100) => 0,
        Some(a) if a < Decimal::from(1_000) => 10,
        Some(a) if a < Decimal::from(10_000) => 25,
        Some(_) => 40,
    };
    let initiator = match release_type {
        Some(ReleaseType::Manual) => 10,
        _ => 0,
    };
    let channel = if rail == Some(MANUAL) { 15 } else { 0 };

    (action.base_risk() + amount_band + initiator + channel).min(100)
}

#[derive(Debug, Clone, Serialize)]
pub struct AuditRecord {
    pub id: Uuid,
    pub action: AuditAction,
    pub ledger_id: String,
    pub entry_id: Option<EntryId>,
    pub release_id: Option<ReleaseId>,
    pub actor: Option<String>,
    pub amount: Option<Decimal>,
    pub currency: Option<String>,
    pub rail: Option<String>,
    pub risk_score: u8,
    pub detail: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl AuditRecord {
    pub fn new(action: AuditAction, ledger_id: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            action,
            ledger_id: ledger_id.into(),
            entry_id: None,
            release_id: None,
            actor: None,
            amount: None,
            currency: None,
            rail: None,
            risk_score: 0,
            detail: serde_json::Value::Null,
            created_at: Utc::now(),
        }
    }

    pub fn entry(mut self, entry_id: EntryId) -> Self {
        self.entry_id = Some(entry_id);
        self
    }

    pub fn release(mut self, release_id: ReleaseId) -> Self {
        self.release_id = Some(release_id);
        self
    }

    pub fn actor(mut self, actor: Option<String>) -> Self {
        self.actor = actor;
        self
    }

    pub fn amount(mut self, amount: Decimal, currency: &str) -> Self {
        self.amount = Some(amount);
        self.currency = Some(currency.to_string());
        self
    }

    pub fn rail(mut self, rail: Option<String>) -> Self {
        self.rail = rail;
        self
    }

    pub fn detail(mut self, detail: serde_json::Value) -> Self {
        self.detail = detail;
        self
    }

    /// Compute the risk score from the fields set so far
    pub fn scored(mut self, release_type: Option<ReleaseType>) -> Self {
        self.risk_score = risk_score(self.action, self.amount, release_type, self.rail.as_deref());
        self
    }
}

/// Append-only audit destination
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, record: AuditRecord) -> Result<(), EscrowError>;
}

#[derive(Default)]
pub struct MemoryAuditLog {
    records: Mutex<Vec<AuditRecord>>,
}

impl MemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<AuditRecord> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl AuditSink for MemoryAuditLog {
    async fn record(&self, record: AuditRecord) -> Result<(), EscrowError> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(record);
        Ok(())
    }
}
