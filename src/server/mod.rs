//! HTTP server for the deal queue.
//!
//! This module exposes the queue manager over HTTP:
//! - Admission, inspection and removal of queue items
//! - Deal folder mirrors, on-demand sync and conflict resolution
//! - Processing history per deal
//! - Workflow service callbacks, optionally HMAC-signed
//! - Health checks for liveness monitoring
//!
//! # Endpoints
//!
//! - `GET /health`
//! - `GET /api/v1/queue/status`
//! - `GET /api/v1/queue/items` and `POST /api/v1/queue/items`
//! - `GET /api/v1/queue/items/{id}` and `DELETE /api/v1/queue/items/{id}`
//! - `GET /api/v1/deals/{deal}/mirror`
//! - `POST /api/v1/deals/{deal}/sync`
//! - `POST /api/v1/deals/{deal}/conflicts/resolve`
//! - `GET /api/v1/deals/{deal}/history`
//! - `POST /api/v1/workflow/callback`

use std::sync::Arc;

pub mod callback;
pub mod deals;
pub mod error;
pub mod health;
pub mod queue;
pub mod signature;

pub use callback::callback_handler;
pub use error::ApiError;
pub use health::health_handler;
pub use signature::{compute_signature, format_signature_header, verify_signature};

use crate::manager::QueueManager;
use crate::sync::StateSynchronizer;

/// Shared application state.
///
/// This is passed to all handlers via Axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    manager: Arc<QueueManager>,
    synchronizer: StateSynchronizer,

    /// Secret for verifying callback signatures. `None` accepts unsigned
    /// callbacks.
    callback_secret: Option<Vec<u8>>,
}

impl AppState {
    pub fn new(manager: Arc<QueueManager>, callback_secret: Option<Vec<u8>>) -> Self {
        AppState {
            inner: Arc::new(AppStateInner {
                synchronizer: StateSynchronizer::new(Arc::clone(&manager)),
                manager,
                callback_secret,
            }),
        }
    }

    pub fn manager(&self) -> &Arc<QueueManager> {
        &self.inner.manager
    }

    pub fn synchronizer(&self) -> &StateSynchronizer {
        &self.inner.synchronizer
    }

    pub fn callback_secret(&self) -> Option<&[u8]> {
        self.inner.callback_secret.as_deref()
    }
}

/// Builds the axum Router with all endpoints.
pub fn build_router(app_state: AppState) -> axum::Router {
    use axum::routing::{get, post};

    axum::Router::new()
        .route("/health", get(health_handler))
        .route("/api/v1/queue/status", get(queue::status_handler))
        .route(
            "/api/v1/queue/items",
            get(queue::list_handler).post(queue::enqueue_handler),
        )
        .route(
            "/api/v1/queue/items/{id}",
            get(queue::get_handler).delete(queue::remove_handler),
        )
        .route("/api/v1/deals/{deal}/mirror", get(deals::mirror_handler))
        .route("/api/v1/deals/{deal}/sync", post(deals::sync_handler))
        .route(
            "/api/v1/deals/{deal}/conflicts/resolve",
            post(deals::resolve_handler),
        )
        .route("/api/v1/deals/{deal}/history", get(deals::history_handler))
        .route("/api/v1/workflow/callback", post(callback_handler))
        .with_state(app_state)
}
