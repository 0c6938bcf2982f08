//! Shared application state for axum handlers.

use std::sync::Arc;

use telederive_app::reconcile_worker::ReconcileTrigger;

use crate::signature::SignatureVerifier;

/// Application state shared across all axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Checks webhook signatures.
    pub verifier: Arc<SignatureVerifier>,
    /// Queues reconciliations on the reconcile worker.
    pub trigger: ReconcileTrigger,
}

impl AppState {
    /// Create a new application state.
    ///
    /// Logs a warning when no secret is configured, since the webhook then
    /// accepts unsigned requests.
    #[must_use]
    pub fn new(verifier: SignatureVerifier, trigger: ReconcileTrigger) -> Self {
        if !verifier.is_enforced() {
            tracing::warn!("no reconfigure secret configured, webhook requests are not verified");
        }
        Self {
            verifier: Arc::new(verifier),
            trigger,
        }
    }
}
