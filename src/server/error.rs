//! Maps engine errors onto HTTP responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use crate::error::EngineError;

/// Errors any API handler can return.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// Missing required header.
    #[error("missing required header: {0}")]
    MissingHeader(&'static str),

    #[error("invalid signature")]
    InvalidSignature,

    #[error("invalid JSON body: {0}")]
    InvalidJson(#[from] serde_json::Error),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Engine(EngineError::DuplicateActiveJob { .. }) => StatusCode::CONFLICT,
            ApiError::Engine(EngineError::NotFound(_)) => StatusCode::NOT_FOUND,
            ApiError::Engine(EngineError::Validation(_))
            | ApiError::Engine(EngineError::InvalidTransition { .. }) => StatusCode::BAD_REQUEST,
            ApiError::Engine(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::MissingHeader(_) | ApiError::InvalidJson(_) => StatusCode::BAD_REQUEST,
            ApiError::InvalidSignature => StatusCode::UNAUTHORIZED,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status(), self.to_string()).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ItemId, ItemStatus};

    #[test]
    fn engine_errors_map_to_status_codes() {
        let cases = [
            (
                EngineError::DuplicateActiveJob {
                    deal: "Acme".into(),
                    path: "A.pdf".into(),
                    existing: ItemId::new("x"),
                },
                StatusCode::CONFLICT,
            ),
            (EngineError::NotFound("x".into()), StatusCode::NOT_FOUND),
            (EngineError::Validation("x".into()), StatusCode::BAD_REQUEST),
            (
                EngineError::InvalidTransition {
                    id: ItemId::new("x"),
                    from: ItemStatus::Pending,
                    to: ItemStatus::Completed,
                },
                StatusCode::BAD_REQUEST,
            ),
            (
                EngineError::Persistence("disk full".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, expected) in cases {
            assert_eq!(ApiError::from(err).status(), expected);
        }
    }

    #[test]
    fn signature_failures_are_unauthorized() {
        assert_eq!(ApiError::InvalidSignature.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            ApiError::MissingHeader("x-signature-256").status(),
            StatusCode::BAD_REQUEST
        );
    }
}
