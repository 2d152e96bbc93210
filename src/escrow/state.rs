//! Escrow State Definitions
//!
//! Two state machines live here:
//!
//! ```text
//! Entry release_status:
//!   HELD ──▶ PENDING_RELEASE ──▶ RELEASED
//!    │  ▲          │
//!    │  └──────────┘ (release failed, back to hold)
//!    ▼
//!  VOIDED
//!
//! IMMEDIATE entries never enter the machine.
//!
//! ReleaseRequest status:
//!   PENDING ──▶ PROCESSING ──▶ COMPLETED | FAILED
//!      └──────────────────────▶ FAILED (precondition)
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Release status of a ledger entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReleaseStatus {
    /// Funds held in escrow
    Held,
    /// A release request is in flight
    PendingRelease,
    /// Terminal: paid out
    Released,
    /// Terminal: hold cancelled, no payout
    Voided,
    /// Never held
    Immediate,
}

impl ReleaseStatus {
    /// Check whether the entry may move from `self` to `next`
    pub fn can_transition_to(&self, next: ReleaseStatus) -> bool {
        matches!(
            (self, next),
            (ReleaseStatus::Held, ReleaseStatus::PendingRelease)
                | (ReleaseStatus::Held, ReleaseStatus::Voided)
                | (ReleaseStatus::PendingRelease, ReleaseStatus::Released)
                | (ReleaseStatus::PendingRelease, ReleaseStatus::Held)
        )
    }

    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self, ReleaseStatus::Released | ReleaseStatus::Voided)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ReleaseStatus::Held => "held",
            ReleaseStatus::PendingRelease => "pending_release",
            ReleaseStatus::Released => "released",
            ReleaseStatus::Voided => "voided",
            ReleaseStatus::Immediate => "immediate",
        }
    }
}

impl fmt::Display for ReleaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReleaseStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "held" => Ok(ReleaseStatus::Held),
            "pending_release" => Ok(ReleaseStatus::PendingRelease),
            "released" => Ok(ReleaseStatus::Released),
            "voided" => Ok(ReleaseStatus::Voided),
            "immediate" => Ok(ReleaseStatus::Immediate),
            other => Err(format!("unknown release_status: {}", other)),
        }
    }
}

/// Status of a release request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReleaseRequestStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl ReleaseRequestStatus {
    /// Terminal states: no more transitions possible
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ReleaseRequestStatus::Completed | ReleaseRequestStatus::Failed
        )
    }

    /// Pending and processing requests block another request for the same entry
    #[inline]
    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }

    pub fn can_transition_to(&self, next: ReleaseRequestStatus) -> bool {
        matches!(
            (self, next),
            (ReleaseRequestStatus::Pending, ReleaseRequestStatus::Processing)
                | (ReleaseRequestStatus::Pending, ReleaseRequestStatus::Failed)
                | (ReleaseRequestStatus::Processing, ReleaseRequestStatus::Completed)
                | (ReleaseRequestStatus::Processing, ReleaseRequestStatus::Failed)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ReleaseRequestStatus::Pending => "pending",
            ReleaseRequestStatus::Processing => "processing",
            ReleaseRequestStatus::Completed => "completed",
            ReleaseRequestStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for ReleaseRequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReleaseRequestStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ReleaseRequestStatus::Pending),
            "processing" => Ok(ReleaseRequestStatus::Processing),
            "completed" => Ok(ReleaseRequestStatus::Completed),
            "failed" => Ok(ReleaseRequestStatus::Failed),
            other => Err(format!("unknown release request status: {}", other)),
        }
    }
}

/// Who initiated a release
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReleaseType {
    Manual,
    Auto,
}

impl ReleaseType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReleaseType::Manual => "manual",
            ReleaseType::Auto => "auto",
        }
    }
}

impl fmt::Display for ReleaseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReleaseType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "manual" => Ok(ReleaseType::Manual),
            "auto" => Ok(ReleaseType::Auto),
            other => Err(format!("unknown release type: {}", other)),
        }
    }
}
