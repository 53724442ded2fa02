//! Liveness check.

use axum::http::StatusCode;

/// `GET /health`
///
/// Answers 200 with `OK` whenever the listener is up. It does not touch the
/// queue lock, so a stuck manager still reports live.
pub async fn health_handler() -> (StatusCode, &'static str) {
    (StatusCode::OK, "OK")
}
