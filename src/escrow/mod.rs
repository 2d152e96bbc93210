//! Escrow Release Core
//!
//! Holds funds owed to recipients until they are explicitly released, voided
//! or auto-released once their hold date passes, and drives each release to
//! a terminal state through a payout rail.
//!
//! # Entry State Machine
//!
//! ```text
//! HELD ──request──▶ PENDING_RELEASE ──transfer ok──▶ RELEASED
//!   │                      │
//!   │                      └──transfer failed──▶ HELD (retry allowed)
//!   └──void──▶ VOIDED
//! ```
//!
//! # Safety Invariants
//!
//! 1. **Single In-Flight Release**: at most one `pending`/`processing`
//!    release per entry, enforced atomically by the store
//! 2. **Persist-Before-Call**: a release is marked `processing` before the
//!    rail is called
//! 3. **Terminal Means Terminal**: `released` and `voided` entries never
//!    change again

pub mod audit;
pub mod coordinator;
pub mod db;
pub mod error;
pub mod events;
pub mod executor;
pub mod holds;
pub mod pacer;
pub mod state;
pub mod store;
pub mod types;
pub mod worker;

pub use audit::{AuditAction, AuditRecord, AuditSink, MemoryAuditLog};
pub use coordinator::{BatchSettlement, ReleaseCoordinator};
pub use db::{PgAuditLog, PgEscrowStore, PgTokenVault};
pub use error::{EscrowError, FailureCode};
pub use events::{ChannelPublisher, EventPublisher, LogPublisher, ReleaseEvent};
pub use executor::TransferExecutor;
pub use holds::HoldRegistry;
pub use pacer::Pacer;
pub use state::{ReleaseRequestStatus, ReleaseStatus, ReleaseType};
pub use store::{EscrowStore, MemoryStore};
pub use types::{
    AutoReleaseReport, BatchReleaseResult, ConnectedAccount, EntryId, HoldFilter, LedgerEntry,
    ReleaseId, ReleaseOutcome, ReleaseRequest,
};
pub use worker::{AutoReleaseWorker, LedgerCycle, WorkerConfig};
