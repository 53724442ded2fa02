//! Workflow callback endpoint.
//!
//! The workflow service reports job progress here. When a callback secret is
//! configured, the body must carry a valid `X-Signature-256` and is verified
//! before it is parsed.

use axum::Json;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::signature::verify_signature;
use super::{ApiError, AppState};
use crate::sync::{ExternalStatus, SyncOutcome};
use crate::types::{JobId, Metadata};

/// Header carrying the callback signature.
pub const HEADER_SIGNATURE: &str = "x-signature-256";

/// Body of `POST /api/v1/workflow/callback`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallbackRequest {
    pub job_id: JobId,
    pub status: ExternalStatus,
    #[serde(default)]
    pub metadata: Metadata,
}

/// `POST /api/v1/workflow/callback`
///
/// - 200 OK with the [`SyncOutcome`]; stale and duplicate callbacks are
///   successful no-ops
/// - 202 Accepted when the job's trigger call has not returned yet; the
///   callback is applied once it does
/// - 400 Bad Request for malformed JSON or a missing signature header
/// - 401 Unauthorized for a bad signature
/// - 404 Not Found for an unknown job
pub async fn callback_handler(
    State(app_state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<SyncOutcome>), ApiError> {
    if let Some(secret) = app_state.callback_secret() {
        let signature = headers
            .get(HEADER_SIGNATURE)
            .and_then(|v| v.to_str().ok())
            .ok_or(ApiError::MissingHeader(HEADER_SIGNATURE))?;
        if !verify_signature(&body, signature, secret) {
            warn!("Invalid workflow callback signature");
            return Err(ApiError::InvalidSignature);
        }
    }

    let request: CallbackRequest = serde_json::from_slice(&body)?;
    debug!(job_id = %request.job_id, status = %request.status, "Received workflow callback");

    let outcome = app_state
        .synchronizer()
        .synchronize_workflow_state(&request.job_id, request.status, request.metadata)
        .await?;
    let status = match outcome {
        SyncOutcome::Deferred { .. } => StatusCode::ACCEPTED,
        _ => StatusCode::OK,
    };
    Ok((status, Json(outcome)))
}
