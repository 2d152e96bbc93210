//! Release Events
//!
//! Terminal-state notifications handed to the delivery layer. Publishing is
//! fire-and-forget from the executor's point of view: a failed publish is
//! logged and never changes the outcome of a release.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{info, warn};

use super::error::EscrowError;
use super::state::ReleaseRequestStatus;
use super::types::{EntryId, ReleaseId, ReleaseRequest};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ReleaseEventKind {
    #[serde(rename = "release.completed")]
    Completed,
    #[serde(rename = "release.failed")]
    Failed,
}

impl ReleaseEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReleaseEventKind::Completed => "release.completed",
            ReleaseEventKind::Failed => "release.failed",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ReleaseEvent {
    pub event: ReleaseEventKind,
    pub release_id: ReleaseId,
    pub entry_id: EntryId,
    pub ledger_id: String,
    pub amount: Decimal,
    pub currency: String,
    pub rail: Option<String>,
    pub rail_status: Option<String>,
    pub external_transfer_id: Option<String>,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

impl ReleaseEvent {
    /// Event for a terminal release; `None` while it is still in flight
    pub fn from_release(release: &ReleaseRequest) -> Option<Self> {
        let event = match release.status {
            ReleaseRequestStatus::Completed => ReleaseEventKind::Completed,
            ReleaseRequestStatus::Failed => ReleaseEventKind::Failed,
            _ => return None,
        };
        Some(Self {
            event,
            release_id: release.id,
            entry_id: release.entry_id,
            ledger_id: release.ledger_id.clone(),
            amount: release.amount,
            currency: release.currency.clone(),
            rail: release.rail.clone(),
            rail_status: release.rail_status.clone(),
            external_transfer_id: release.external_transfer_id.clone(),
            error_code: release.error_code.clone(),
            error_message: release.error_message.clone(),
            occurred_at: release.completed_at.unwrap_or_else(Utc::now),
        })
    }
}

#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: ReleaseEvent) -> Result<(), EscrowError>;
}

/// Writes events to the log only
pub struct LogPublisher;

#[async_trait]
impl EventPublisher for LogPublisher {
    async fn publish(&self, event: ReleaseEvent) -> Result<(), EscrowError> {
        info!(
            event = event.event.as_str(),
            release_id = %event.release_id,
            entry_id = %event.entry_id,
            rail = event.rail.as_deref().unwrap_or("-"),
            error_code = event.error_code.as_deref().unwrap_or("-"),
            "Release event"
        );
        Ok(())
    }
}

/// Forwards events to an in-process consumer (e.g. the webhook dispatcher).
///
/// Never waits on a slow consumer: when the channel is full the event is
/// dropped and the publish fails.
#[derive(Clone)]
pub struct ChannelPublisher {
    tx: mpsc::Sender<ReleaseEvent>,
}

impl ChannelPublisher {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<ReleaseEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }
}

#[async_trait]
impl EventPublisher for ChannelPublisher {
    async fn publish(&self, event: ReleaseEvent) -> Result<(), EscrowError> {
        match self.tx.try_send(event) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(event)) => {
                warn!(
                    event = event.event.as_str(),
                    release_id = %event.release_id,
                    capacity = self.tx.max_capacity(),
                    "Release event channel full, event dropped"
                );
                Err(EscrowError::SystemError("Release event channel full".to_string()))
            }
            Err(TrySendError::Closed(_)) => {
                Err(EscrowError::SystemError("Release event channel closed".to_string()))
            }
        }
    }
}
