//! Deal folder endpoints: mirror inspection, sync, conflicts and history.

use axum::Json;
use axum::extract::{Path, Query, State};
use serde::{Deserialize, Serialize};

use super::{ApiError, AppState};
use crate::error::EngineError;
use crate::history::ProcessingHistoryRecord;
use crate::mirror::{DealFolderMirror, SyncReport};
use crate::queue::{DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncResponse {
    pub mirror: DealFolderMirror,
    pub report: SyncReport,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct HistoryParams {
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolveRequest {
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolveResponse {
    pub resolved: usize,
}

/// `GET /api/v1/deals/{deal}/mirror`
///
/// 404 until the deal has been synced at least once.
pub async fn mirror_handler(
    State(app_state): State<AppState>,
    Path(deal): Path<String>,
) -> Result<Json<DealFolderMirror>, ApiError> {
    app_state
        .manager()
        .get_mirror(&deal)
        .await
        .map(Json)
        .ok_or_else(|| EngineError::NotFound(format!("mirror for deal {deal}")).into())
}

/// `POST /api/v1/deals/{deal}/sync`
pub async fn sync_handler(
    State(app_state): State<AppState>,
    Path(deal): Path<String>,
) -> Result<Json<SyncResponse>, ApiError> {
    let (mirror, report) = app_state.manager().sync_deal(&deal).await?;
    Ok(Json(SyncResponse { mirror, report }))
}

/// `POST /api/v1/deals/{deal}/conflicts/resolve`
pub async fn resolve_handler(
    State(app_state): State<AppState>,
    Path(deal): Path<String>,
    Json(request): Json<ResolveRequest>,
) -> Result<Json<ResolveResponse>, ApiError> {
    let resolved = app_state
        .manager()
        .resolve_conflict(&deal, &request.path)
        .await?;
    Ok(Json(ResolveResponse { resolved }))
}

/// `GET /api/v1/deals/{deal}/history?limit=`
///
/// Newest first. `limit` defaults to 100 and is capped at 1000.
pub async fn history_handler(
    State(app_state): State<AppState>,
    Path(deal): Path<String>,
    Query(params): Query<HistoryParams>,
) -> Json<Vec<ProcessingHistoryRecord>> {
    let limit = params
        .limit
        .unwrap_or(DEFAULT_PAGE_SIZE)
        .min(MAX_PAGE_SIZE);
    Json(app_state.manager().get_history(&deal, limit).await)
}
