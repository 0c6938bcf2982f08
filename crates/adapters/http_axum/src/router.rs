//! Axum router assembly.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use tower_http::trace::TraceLayer;

use telederive_app::reconcile_worker::ReconcileReason;

use crate::error::HookError;
use crate::signature::{SIGNATURE_HEADER, Verification};
use crate::state::AppState;

/// Build the top-level axum [`Router`].
///
/// Includes a [`TraceLayer`] that logs each HTTP request/response at the
/// `DEBUG` level using the `tracing` ecosystem.
pub fn build(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/reconfigure", post(reconfigure))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_check() -> &'static str {
    "OK"
}

#[derive(Serialize)]
struct Accepted {
    status: &'static str,
}

/// Signal that rules may have changed.
///
/// The signature is checked before the body is parsed; reconciliation itself
/// runs later on the reconcile worker.
async fn reconfigure(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Accepted>, HookError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok());

    if state.verifier.verify(signature, &body)? == Verification::Unverified {
        tracing::warn!("accepting unsigned reconfiguration request, no secret configured");
    }

    let payload: serde_json::Value =
        serde_json::from_slice(&body).map_err(HookError::InvalidBody)?;

    state.trigger.request(ReconcileReason::Reconfigure)?;
    tracing::info!(
        event = payload.get("event").and_then(serde_json::Value::as_str).unwrap_or("unspecified"),
        "reconciliation triggered"
    );

    Ok(Json(Accepted {
        status: "reconciliation triggered",
    }))
}
