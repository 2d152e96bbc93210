//! Escrow Error Types
//!
//! Command errors carry a stable code for API responses. Release failures
//! that happen after a request was created are not errors of the command;
//! they are recorded on the release as a [`FailureCode`].

use std::fmt;

use thiserror::Error;

use super::state::ReleaseStatus;
use crate::batch_file::BatchFileError;
use crate::money::MoneyError;

/// Broad category of an [`EscrowError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed input, rejected before any state change
    Validation,
    NotFound,
    /// Illegal in the current state, rejected with no side effects
    Conflict,
    /// Local precondition of a transfer not met
    Precondition,
    /// Payment provider or network failure
    External,
    System,
}

#[derive(Error, Debug, Clone)]
pub enum EscrowError {
    // === Validation Errors ===
    #[error("Invalid entry id: {0}")]
    InvalidEntryId(String),

    #[error("Invalid release id: {0}")]
    InvalidReleaseId(String),

    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error("Batch must contain between 1 and {max} entries, got {got}")]
    InvalidBatchSize { got: usize, max: usize },

    #[error("Duplicate entry in batch: {0}")]
    DuplicateBatchEntry(String),

    #[error("Void reason must be 1..={0} characters")]
    InvalidReason(usize),

    #[error("Limit must be between 1 and {0}")]
    InvalidLimit(usize),

    #[error("Unknown rail: {0}")]
    UnknownRail(String),

    #[error("Rail is not enabled for this ledger: {0}")]
    RailDisabled(String),

    #[error("Invalid amount: {0}")]
    Money(#[from] MoneyError),

    // === Not Found ===
    #[error("Entry not found: {0}")]
    EntryNotFound(String),

    #[error("Release not found: {0}")]
    ReleaseNotFound(String),

    #[error("Batch file not found or expired")]
    ArtifactNotFound,

    #[error("No queued payouts for ledger {0}")]
    NothingToSettle(String),

    // === Conflict Errors ===
    #[error("Entry {entry_id} is {status}, expected held")]
    NotHeld {
        entry_id: String,
        status: ReleaseStatus,
    },

    #[error("A release is already in flight for entry {0}")]
    ReleaseInFlight(String),

    #[error("Invalid state transition: {0}")]
    InvalidStateTransition(String),

    // === Precondition / External (used when a release outcome is surfaced as an error) ===
    #[error("Release {release_id} failed: {code}: {message}")]
    ReleaseFailed {
        release_id: String,
        code: FailureCode,
        message: String,
    },

    // === System Errors ===
    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Batch file error: {0}")]
    BatchFile(String),

    #[error("Internal system error: {0}")]
    SystemError(String),
}

impl EscrowError {
    /// Get the error code for API responses
    pub fn code(&self) -> &'static str {
        match self {
            EscrowError::InvalidEntryId(_) => "INVALID_ENTRY_ID",
            EscrowError::InvalidReleaseId(_) => "INVALID_RELEASE_ID",
            EscrowError::MissingField(_) => "MISSING_FIELD",
            EscrowError::InvalidBatchSize { .. } => "INVALID_BATCH_SIZE",
            EscrowError::DuplicateBatchEntry(_) => "DUPLICATE_BATCH_ENTRY",
            EscrowError::InvalidReason(_) => "INVALID_REASON",
            EscrowError::InvalidLimit(_) => "INVALID_LIMIT",
            EscrowError::UnknownRail(_) => "UNKNOWN_RAIL",
            EscrowError::RailDisabled(_) => "RAIL_DISABLED",
            EscrowError::Money(_) => "INVALID_AMOUNT",
            EscrowError::EntryNotFound(_) => "ENTRY_NOT_FOUND",
            EscrowError::ReleaseNotFound(_) => "RELEASE_NOT_FOUND",
            EscrowError::ArtifactNotFound => "ARTIFACT_NOT_FOUND",
            EscrowError::NothingToSettle(_) => "NOTHING_TO_SETTLE",
            EscrowError::NotHeld { .. } => "NOT_HELD",
            EscrowError::ReleaseInFlight(_) => "RELEASE_IN_FLIGHT",
            EscrowError::InvalidStateTransition(_) => "INVALID_STATE_TRANSITION",
            EscrowError::ReleaseFailed { code, .. } => {
                if code.is_external() {
                    "RELEASE_FAILED_EXTERNAL"
                } else {
                    "RELEASE_FAILED_PRECONDITION"
                }
            }
            EscrowError::DatabaseError(_) => "DATABASE_ERROR",
            EscrowError::BatchFile(_) => "BATCH_FILE_ERROR",
            EscrowError::SystemError(_) => "SYSTEM_ERROR",
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            EscrowError::InvalidEntryId(_)
            | EscrowError::InvalidReleaseId(_)
            | EscrowError::MissingField(_)
            | EscrowError::InvalidBatchSize { .. }
            | EscrowError::DuplicateBatchEntry(_)
            | EscrowError::InvalidReason(_)
            | EscrowError::InvalidLimit(_)
            | EscrowError::UnknownRail(_)
            | EscrowError::RailDisabled(_)
            | EscrowError::Money(_) => ErrorKind::Validation,
            EscrowError::EntryNotFound(_)
            | EscrowError::ReleaseNotFound(_)
            | EscrowError::ArtifactNotFound
            | EscrowError::NothingToSettle(_) => ErrorKind::NotFound,
            EscrowError::NotHeld { .. }
            | EscrowError::ReleaseInFlight(_)
            | EscrowError::InvalidStateTransition(_) => ErrorKind::Conflict,
            EscrowError::ReleaseFailed { code, .. } => {
                if code.is_external() {
                    ErrorKind::External
                } else {
                    ErrorKind::Precondition
                }
            }
            EscrowError::DatabaseError(_)
            | EscrowError::BatchFile(_)
            | EscrowError::SystemError(_) => ErrorKind::System,
        }
    }

    /// Get HTTP status code suggestion
    pub fn http_status(&self) -> u16 {
        match self.kind() {
            ErrorKind::Validation => 400,
            ErrorKind::NotFound => 404,
            ErrorKind::Conflict => 409,
            ErrorKind::Precondition => 422,
            ErrorKind::External => 502,
            ErrorKind::System => 500,
        }
    }
}

impl From<sqlx::Error> for EscrowError {
    fn from(e: sqlx::Error) -> Self {
        EscrowError::DatabaseError(e.to_string())
    }
}

impl From<anyhow::Error> for EscrowError {
    fn from(e: anyhow::Error) -> Self {
        EscrowError::SystemError(e.to_string())
    }
}

impl From<BatchFileError> for EscrowError {
    fn from(e: BatchFileError) -> Self {
        EscrowError::BatchFile(e.to_string())
    }
}

/// Why a release request ended up `failed`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureCode {
    MissingDestination,
    InvalidAmount,
    AccountNotVerified,
    /// No adapter could be resolved for the selected rail
    RailUnavailable,
    // Raised by an adapter before it calls out
    /// Destination shape does not match the rail
    InvalidDestination,
    /// Ledger rail config lacks credentials or settings
    RailMisconfigured,
    /// Amount has no exact minor-unit form in the currency
    AmountConversionFailed,
    UnsupportedCurrency,
    /// Bank details unusable in a batch file
    InvalidBankDetails,
    /// No vaulted access token for the recipient
    MissingAccessToken,
    VaultError,
    /// The rail did not answer within the configured timeout
    RailTimeout,
    /// Transport-level failure talking to the provider
    NetworkError,
    /// Code reported by the payment provider
    Provider(String),
}

impl FailureCode {
    pub fn as_str(&self) -> &str {
        match self {
            FailureCode::MissingDestination => "missing_destination",
            FailureCode::InvalidAmount => "invalid_amount",
            FailureCode::AccountNotVerified => "account_not_verified",
            FailureCode::RailUnavailable => "rail_unavailable",
            FailureCode::InvalidDestination => "invalid_destination",
            FailureCode::RailMisconfigured => "rail_misconfigured",
            FailureCode::AmountConversionFailed => "amount_conversion_failed",
            FailureCode::UnsupportedCurrency => "unsupported_currency",
            FailureCode::InvalidBankDetails => "invalid_bank_details",
            FailureCode::MissingAccessToken => "missing_access_token",
            FailureCode::VaultError => "vault_error",
            FailureCode::RailTimeout => "rail_timeout",
            FailureCode::NetworkError => "network_error",
            FailureCode::Provider(code) => code,
        }
    }

    /// Local failures never reached a payment provider
    pub fn is_local(&self) -> bool {
        matches!(
            self,
            FailureCode::MissingDestination
                | FailureCode::InvalidAmount
                | FailureCode::AccountNotVerified
                | FailureCode::RailUnavailable
                | FailureCode::InvalidDestination
                | FailureCode::RailMisconfigured
                | FailureCode::AmountConversionFailed
                | FailureCode::UnsupportedCurrency
                | FailureCode::InvalidBankDetails
                | FailureCode::MissingAccessToken
                | FailureCode::VaultError
        )
    }

    /// External failures came from a provider, or from not hearing back from one
    pub fn is_external(&self) -> bool {
        !self.is_local()
    }

    /// Rebuild from the stored `error_code` column
    pub fn parse(code: &str) -> Self {
        match code {
            "missing_destination" => FailureCode::MissingDestination,
            "invalid_amount" => FailureCode::InvalidAmount,
            "account_not_verified" => FailureCode::AccountNotVerified,
            "rail_unavailable" => FailureCode::RailUnavailable,
            "invalid_destination" => FailureCode::InvalidDestination,
            "rail_misconfigured" => FailureCode::RailMisconfigured,
            "amount_conversion_failed" => FailureCode::AmountConversionFailed,
            "unsupported_currency" => FailureCode::UnsupportedCurrency,
            "invalid_bank_details" => FailureCode::InvalidBankDetails,
            "missing_access_token" => FailureCode::MissingAccessToken,
            "vault_error" => FailureCode::VaultError,
            "rail_timeout" => FailureCode::RailTimeout,
            "network_error" => FailureCode::NetworkError,
            other => FailureCode::Provider(other.to_string()),
        }
    }
}

impl fmt::Display for FailureCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
