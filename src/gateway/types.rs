//! API request/response types
//!
//! - `ApiResponse<T>`: unified `{code, msg, data}` envelope
//! - `ApiError`: escrow errors rendered into the envelope
//! - request bodies and query strings

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};

use crate::escrow::error::{ErrorKind, EscrowError};
use crate::escrow::types::HoldFilter;

/// Unified API response wrapper
///
/// - code: 0 = success, non-zero = error code
/// - msg: short message description
/// - data: payload on success, `{ "error": CODE }` on failure
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub code: i32,
    pub msg: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            code: 0,
            msg: "ok".to_string(),
            data: Some(data),
        }
    }
}

/// Standard API error codes
pub mod error_codes {
    pub const SUCCESS: i32 = 0;

    // Client errors (1xxx)
    pub const INVALID_PARAMETER: i32 = 1001;

    // Resource errors (4xxx)
    pub const NOT_FOUND: i32 = 4004;
    pub const CONFLICT: i32 = 4009;
    pub const PRECONDITION_FAILED: i32 = 4022;

    // Server errors (5xxx)
    pub const INTERNAL_ERROR: i32 = 5000;
    pub const PROVIDER_ERROR: i32 = 5002;
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorData {
    pub error: String,
}

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: i32,
    pub error: &'static str,
    pub msg: String,
}

impl ApiError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            code: error_codes::INVALID_PARAMETER,
            error: "INVALID_PARAMETER",
            msg: msg.into(),
        }
    }
}

impl From<EscrowError> for ApiError {
    fn from(e: EscrowError) -> Self {
        let code = match e.kind() {
            ErrorKind::Validation => error_codes::INVALID_PARAMETER,
            ErrorKind::NotFound => error_codes::NOT_FOUND,
            ErrorKind::Conflict => error_codes::CONFLICT,
            ErrorKind::Precondition => error_codes::PRECONDITION_FAILED,
            ErrorKind::External => error_codes::PROVIDER_ERROR,
            ErrorKind::System => error_codes::INTERNAL_ERROR,
        };
        if e.kind() == ErrorKind::System {
            tracing::error!(error = %e, "Request failed");
        }
        Self {
            status: StatusCode::from_u16(e.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            code,
            error: e.code(),
            msg: e.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ApiResponse {
            code: self.code,
            msg: self.msg,
            data: Some(ErrorData {
                error: self.error.to_string(),
            }),
        };
        (self.status, Json(body)).into_response()
    }
}

pub type ApiResult<T> = Result<(StatusCode, Json<ApiResponse<T>>), ApiError>;

pub fn ok<T>(data: T) -> ApiResult<T> {
    Ok((StatusCode::OK, Json(ApiResponse::success(data))))
}

// ============================================================================
// Requests
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ReleaseBody {
    pub entry_id: String,
    #[serde(default)]
    pub rail: Option<String>,
    #[serde(default)]
    pub requested_by: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct BatchReleaseBody {
    pub entry_ids: Vec<String>,
    #[serde(default)]
    pub rail: Option<String>,
    #[serde(default)]
    pub requested_by: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct VoidBody {
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub voided_by: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct AutoReleaseBody {
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub execute_immediately: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
pub struct BatchFileBody {
    #[serde(default)]
    pub requested_by: Option<String>,
}

/// Query string of `GET .../holds`
#[derive(Debug, Default, Deserialize)]
pub struct HoldQuery {
    pub venture_id: Option<String>,
    pub creator_id: Option<String>,
    #[serde(default)]
    pub ready_only: bool,
    pub limit: Option<usize>,
}

impl HoldQuery {
    pub fn into_filter(self, ledger_id: String) -> HoldFilter {
        HoldFilter {
            ledger_id,
            venture_id: self.venture_id,
            creator_id: self.creator_id,
            ready_only: self.ready_only,
            limit: self.limit,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub timestamp_ms: i64,
}
