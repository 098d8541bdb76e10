//! Takeoff pipeline error taxonomy and HTTP mapping.
//!
//! Every stage-local failure is converted into exactly one terminal signal:
//! a JSON error response on the synchronous path, or a single `error` event
//! on the streaming path (see `services::pipeline`).

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TakeoffError {
    /// Network failure, timeout, or non-2xx status retrieving the blueprint.
    #[error("failed to fetch blueprint: {0}")]
    Fetch(String),

    /// Payload is neither a valid PDF nor a recognized raster, or the PDF
    /// fails to open. Fatal for the request.
    #[error("failed to decode blueprint: {0}")]
    Decode(String),

    /// The vision model is unreachable, times out, or returns output that
    /// does not satisfy the expected schema.
    #[error("inference failed: {0}")]
    Inference(String),

    /// Request body fails schema constraints before any stage runs.
    #[error("invalid request: {0}")]
    Validation(String),
}

/// Error body shape expected by the frontend: `{"detail": "..."}`.
#[derive(Serialize)]
pub struct ErrorDetail {
    pub detail: String,
}

impl TakeoffError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::Fetch(_) | Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Decode(_) | Self::Inference(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Public messages stay generic; the underlying cause goes to the logs.
    fn public_detail(&self) -> String {
        match self {
            Self::Fetch(_) => "Failed to fetch blueprint".to_string(),
            Self::Validation(msg) => msg.clone(),
            Self::Decode(_) | Self::Inference(_) => {
                "Analysis failed. Please try again.".to_string()
            }
        }
    }
}

impl IntoResponse for TakeoffError {
    fn into_response(self) -> Response {
        match &self {
            Self::Fetch(e) => {
                tracing::warn!(error = %e, "Blueprint fetch failed");
            }
            Self::Validation(e) => {
                tracing::warn!(error = %e, "Request validation failed");
            }
            Self::Decode(e) => {
                tracing::error!(error = %e, "Blueprint decode failed");
            }
            Self::Inference(e) => {
                tracing::error!(error = %e, "Inference failed");
            }
        }

        let status = self.status_code();
        let body = ErrorDetail {
            detail: self.public_detail(),
        };

        (status, Json(body)).into_response()
    }
}
