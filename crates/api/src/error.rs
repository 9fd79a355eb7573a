//! Mapping of engine errors onto HTTP responses.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use engine::EngineError;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("{0}")]
    BadRequest(String),
}

/// JSON error body.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: &'static str,
    pub message: String,
}

impl ApiError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            Self::BadRequest(_) => (StatusCode::BAD_REQUEST, "bad_request"),
            Self::Engine(err) => match err {
                EngineError::InstanceNotFound(_)
                | EngineError::GraphNotFound(_)
                | EngineError::PlanNotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
                EngineError::NotCancellable { .. } | EngineError::StoreConflict(_) => {
                    (StatusCode::CONFLICT, "conflict")
                }
                EngineError::Compile(_) => (StatusCode::UNPROCESSABLE_ENTITY, "invalid_graph"),
                EngineError::GraphDisabled(_) | EngineError::TriggerMismatch { .. } => {
                    (StatusCode::UNPROCESSABLE_ENTITY, "event_rejected")
                }
                _ => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        let message = if status.is_server_error() {
            tracing::error!("request failed: {self}");
            "an internal error occurred".to_owned()
        } else {
            self.to_string()
        };

        (
            status,
            Json(ErrorBody {
                error: code,
                message,
            }),
        )
            .into_response()
    }
}
