//! HTTP handlers for the escrow command surface

use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
};
use chrono::Utc;

use super::state::AppState;
use super::types::{
    ApiError, ApiResponse, ApiResult, AutoReleaseBody, BatchFileBody, BatchReleaseBody,
    HealthResponse, HoldQuery, ReleaseBody, VoidBody, ok,
};
use crate::batch_file::ArtifactLink;
use crate::escrow::error::EscrowError;
use crate::escrow::types::{
    AutoReleaseReport, BatchReleaseResult, HeldEntryRow, HoldSummary, LedgerEntry, ReleaseId,
    ReleaseOutcome, ReleaseRequest, parse_entry_id,
};
use crate::escrow::worker::WorkerConfig;

/// Header naming the ledger a batch file is downloaded for
pub const LEDGER_HEADER: &str = "x-ledger-id";

/// GET /api/v1/health
pub async fn health_check(
    State(state): State<Arc<AppState>>,
) -> Result<(StatusCode, Json<ApiResponse<HealthResponse>>), ApiError> {
    if let Some(store) = &state.pg_store
        && let Err(e) = store.health_check().await
    {
        tracing::error!(error = %e, "Database ping failed");
        return Err(ApiError {
            status: StatusCode::SERVICE_UNAVAILABLE,
            code: 503,
            error: "SERVICE_UNAVAILABLE",
            msg: "unavailable".to_string(),
        });
    }
    ok(HealthResponse {
        timestamp_ms: Utc::now().timestamp_millis(),
    })
}

/// GET /api/v1/ledgers/{ledger}/holds/summary
pub async fn get_summary(
    State(state): State<Arc<AppState>>,
    Path(ledger_id): Path<String>,
) -> ApiResult<Vec<HoldSummary>> {
    ok(state.holds.summarize(&ledger_id, Utc::now()).await?)
}

/// GET /api/v1/ledgers/{ledger}/holds
pub async fn get_held(
    State(state): State<Arc<AppState>>,
    Path(ledger_id): Path<String>,
    Query(query): Query<HoldQuery>,
) -> ApiResult<Vec<HeldEntryRow>> {
    let filter = query.into_filter(ledger_id);
    ok(state.holds.list_held(&filter, Utc::now()).await?)
}

/// POST /api/v1/ledgers/{ledger}/releases
///
/// A failed release is reported as an error carrying its failure code.
pub async fn release(
    State(state): State<Arc<AppState>>,
    Path(ledger_id): Path<String>,
    Json(body): Json<ReleaseBody>,
) -> ApiResult<ReleaseOutcome> {
    let entry_id = parse_entry_id(&body.entry_id)?;
    let outcome = state
        .coordinator
        .release(&ledger_id, entry_id, body.rail.as_deref(), body.requested_by)
        .await?;
    ok(outcome.into_result()?)
}

/// POST /api/v1/ledgers/{ledger}/releases/batch
///
/// 200 when every item succeeded, 207 otherwise. The body always lists
/// every item.
pub async fn batch_release(
    State(state): State<Arc<AppState>>,
    Path(ledger_id): Path<String>,
    Json(body): Json<BatchReleaseBody>,
) -> ApiResult<BatchReleaseResult> {
    let result = state
        .coordinator
        .batch_release(&ledger_id, &body.entry_ids, body.rail.as_deref(), body.requested_by)
        .await?;
    let status = if result.failed == 0 {
        StatusCode::OK
    } else {
        StatusCode::MULTI_STATUS
    };
    Ok((status, Json(ApiResponse::success(result))))
}

/// POST /api/v1/ledgers/{ledger}/releases/auto
pub async fn auto_release(
    State(state): State<Arc<AppState>>,
    Path(ledger_id): Path<String>,
    body: Option<Json<AutoReleaseBody>>,
) -> ApiResult<AutoReleaseReport> {
    let body = body.map(|Json(b)| b).unwrap_or_default();
    let defaults = WorkerConfig::default();
    let report = state
        .coordinator
        .auto_release_sweep(
            &ledger_id,
            body.limit.unwrap_or(defaults.limit),
            body.execute_immediately.unwrap_or(defaults.execute_immediately),
        )
        .await?;
    ok(report)
}

/// POST /api/v1/ledgers/{ledger}/entries/{entry_id}/void
pub async fn void_release(
    State(state): State<Arc<AppState>>,
    Path((ledger_id, entry_id)): Path<(String, String)>,
    Json(body): Json<VoidBody>,
) -> ApiResult<LedgerEntry> {
    let entry_id = parse_entry_id(&entry_id)?;
    let entry = state
        .coordinator
        .void_release(&ledger_id, entry_id, &body.reason, body.voided_by)
        .await?;
    ok(entry)
}

/// GET /api/v1/releases/{release_id}
pub async fn get_release(
    State(state): State<Arc<AppState>>,
    Path(release_id): Path<String>,
) -> ApiResult<ReleaseRequest> {
    let release_id: ReleaseId = release_id.parse()?;
    ok(state.coordinator.get_release(release_id).await?)
}

/// POST /api/v1/releases/{release_id}/execute
///
/// Runs a release that is still pending, e.g. one queued by an auto-release
/// sweep without immediate execution.
pub async fn execute_release(
    State(state): State<Arc<AppState>>,
    Path(release_id): Path<String>,
) -> ApiResult<ReleaseOutcome> {
    let release_id: ReleaseId = release_id.parse()?;
    let outcome = state.coordinator.execute_release(release_id).await?;
    ok(outcome.into_result()?)
}

/// POST /api/v1/releases/{release_id}/reconcile
pub async fn reconcile_release(
    State(state): State<Arc<AppState>>,
    Path(release_id): Path<String>,
) -> ApiResult<ReleaseOutcome> {
    let release_id: ReleaseId = release_id.parse()?;
    ok(state.coordinator.reconcile(release_id).await?)
}

/// POST /api/v1/ledgers/{ledger}/batch-files
pub async fn generate_batch_file(
    State(state): State<Arc<AppState>>,
    Path(ledger_id): Path<String>,
    body: Option<Json<BatchFileBody>>,
) -> ApiResult<ArtifactLink> {
    let requested_by = body.and_then(|Json(b)| b.requested_by);
    let link = state
        .coordinator
        .generate_batch_file(&ledger_id, requested_by)
        .await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(link))))
}

/// GET /api/v1/batch-files/{token}
///
/// Requires the `X-Ledger-Id` header of the ledger that generated the file.
pub async fn download_batch_file(
    State(state): State<Arc<AppState>>,
    Path(token): Path<String>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let ledger_id = headers
        .get(LEDGER_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or(EscrowError::MissingField("X-Ledger-Id"))?;

    let artifact = state.coordinator.fetch_batch_file(&token, ledger_id)?;
    let disposition = format!("attachment; filename=\"{}\"", artifact.file_name);
    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "text/plain; charset=utf-8".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        artifact.contents,
    )
        .into_response())
}
