//! Queue endpoints: admission, inspection and removal.

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{ApiError, AppState};
use crate::error::EngineError;
use crate::queue::{QueryPage, QueueFilter, QueueStats};
use crate::types::{ItemId, Metadata, Priority, QueueItem};

/// Body of `POST /api/v1/queue/items`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnqueueRequest {
    pub deal_name: String,
    pub document_path: String,
    /// Defaults to the file name of `document_path`.
    #[serde(default)]
    pub document_name: String,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub metadata: Metadata,
}

/// `GET /api/v1/queue/status`
pub async fn status_handler(State(app_state): State<AppState>) -> Json<QueueStats> {
    Json(app_state.manager().get_queue_status().await)
}

/// `GET /api/v1/queue/items`
///
/// Every [`QueueFilter`] field is accepted as a query parameter, e.g.
/// `?status=pending&deal=Acme&sort=priority&order=desc&limit=20`.
pub async fn list_handler(
    State(app_state): State<AppState>,
    Query(filter): Query<QueueFilter>,
) -> Result<Json<QueryPage>, ApiError> {
    let page = app_state.manager().query_queue(&filter).await?;
    Ok(Json(page))
}

/// `GET /api/v1/queue/items/{id}`
pub async fn get_handler(
    State(app_state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<QueueItem>, ApiError> {
    let id = ItemId::new(id);
    app_state
        .manager()
        .get_item(&id)
        .await
        .map(Json)
        .ok_or_else(|| EngineError::NotFound(format!("queue item {id}")).into())
}

/// `POST /api/v1/queue/items`
///
/// - 201 Created with the new item
/// - 409 Conflict if the document already has a live item
/// - 400 Bad Request for an invalid deal name or document path
pub async fn enqueue_handler(
    State(app_state): State<AppState>,
    Json(request): Json<EnqueueRequest>,
) -> Result<(StatusCode, Json<QueueItem>), ApiError> {
    let item = app_state
        .manager()
        .enqueue(
            &request.deal_name,
            &request.document_path,
            &request.document_name,
            request.priority,
            request.metadata,
        )
        .await?;
    Ok((StatusCode::CREATED, Json(item)))
}

/// `DELETE /api/v1/queue/items/{id}`
pub async fn remove_handler(
    State(app_state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let removed = app_state.manager().remove_item(&ItemId::new(id)).await?;
    debug!(item_id = %removed.id, "Removed via API");
    Ok(StatusCode::NO_CONTENT)
}
