//! HTTP error response mapping.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use telederive_app::reconcile_worker::TriggerError;

use crate::signature::SignatureError;

/// JSON error body returned by the webhook.
#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

/// Failures of the reconfiguration webhook.
#[derive(Debug, thiserror::Error)]
pub enum HookError {
    #[error("invalid signature")]
    Unauthorized(#[from] SignatureError),

    #[error("request body must be JSON")]
    InvalidBody(#[source] serde_json::Error),

    #[error("service is shutting down")]
    Unavailable(#[from] TriggerError),
}

impl IntoResponse for HookError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::Unauthorized(err) => {
                tracing::warn!(reason = %err, "rejected reconfiguration request");
                StatusCode::UNAUTHORIZED
            }
            Self::InvalidBody(err) => {
                tracing::debug!(error = %err, "reconfiguration body is not JSON");
                StatusCode::BAD_REQUEST
            }
            Self::Unavailable(err) => {
                tracing::warn!(error = %err, "cannot queue reconciliation");
                StatusCode::SERVICE_UNAVAILABLE
            }
        };

        (
            status,
            Json(ErrorBody {
                error: self.to_string(),
            }),
        )
            .into_response()
    }
}
