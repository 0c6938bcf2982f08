//! Reconcile trigger and the worker that runs reconciliations off the HTTP and
//! message paths.
//!
//! Requests are queued on a small bounded channel. When the queue is full a
//! run is already pending, so the request is coalesced into it. A reconnect
//! additionally raises a shared flag so the pending run resubscribes
//! everything even if the `Reconnected` request itself was coalesced.
//!
//! A run that could not reach the store, or left topics unsubscribed, is
//! retried on its own with a capped exponential delay until it succeeds.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use telederive_domain::error::DeriveError;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;

use crate::ports::{BusClient, ConfigStore};
use crate::reconciler::SubscriptionReconciler;

/// Why a reconcile was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileReason {
    Startup,
    Reconfigure,
    Reconnected,
}

impl fmt::Display for ReconcileReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Startup => "startup",
            Self::Reconfigure => "reconfigure",
            Self::Reconnected => "reconnected",
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TriggerError {
    #[error("reconcile worker is not running")]
    Closed,
}

/// Cloneable handle used to request a reconcile.
#[derive(Clone)]
pub struct ReconcileTrigger {
    tx: mpsc::Sender<ReconcileReason>,
    resubscribe: Arc<AtomicBool>,
}

/// Receiving side consumed by [`run_reconcile_loop`].
pub struct ReconcileRequests {
    rx: mpsc::Receiver<ReconcileReason>,
    resubscribe: Arc<AtomicBool>,
}

impl ReconcileTrigger {
    #[must_use]
    pub fn channel(capacity: usize) -> (Self, ReconcileRequests) {
        let (tx, rx) = mpsc::channel(capacity);
        let resubscribe = Arc::new(AtomicBool::new(false));
        (
            Self {
                tx,
                resubscribe: Arc::clone(&resubscribe),
            },
            ReconcileRequests { rx, resubscribe },
        )
    }

    /// Queue a reconcile without waiting.
    ///
    /// # Errors
    ///
    /// Returns [`TriggerError::Closed`] once the worker has stopped.
    pub fn request(&self, reason: ReconcileReason) -> Result<(), TriggerError> {
        if reason == ReconcileReason::Reconnected {
            self.resubscribe.store(true, Ordering::SeqCst);
        }
        match self.tx.try_send(reason) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::debug!(%reason, "reconcile already pending, request coalesced");
                Ok(())
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(TriggerError::Closed),
        }
    }
}

impl ReconcileRequests {
    async fn next(&mut self) -> Option<ReconcileReason> {
        let mut reason = self.rx.recv().await?;
        // Fold whatever piled up meanwhile into this run.
        while let Ok(more) = self.rx.try_recv() {
            reason = more;
        }
        Some(reason)
    }

    /// Pop a queued request without waiting.
    pub fn try_next(&mut self) -> Option<ReconcileReason> {
        self.rx.try_recv().ok()
    }

    fn take_resubscribe(&self) -> bool {
        self.resubscribe.swap(false, Ordering::SeqCst)
    }
}

/// Delay between retries of a failed reconcile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryBackoff {
    pub initial: Duration,
    pub max: Duration,
}

impl Default for RetryBackoff {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(500),
            max: Duration::from_secs(30),
        }
    }
}

impl RetryBackoff {
    /// Delay before retry number `attempt` (starting at 1).
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 1_u32 << attempt.saturating_sub(1).min(16);
        self.initial.saturating_mul(factor).min(self.max)
    }
}

/// Run reconciliations as requests arrive until the trigger side is dropped
/// or `shutdown` flips to `true`.
pub async fn run_reconcile_loop<S, B>(
    reconciler: Arc<SubscriptionReconciler<S, B>>,
    mut requests: ReconcileRequests,
    backoff: RetryBackoff,
    mut shutdown: watch::Receiver<bool>,
) where
    S: ConfigStore,
    B: BusClient,
{
    let mut failures = 0_u32;
    let mut retry: Option<(ReconcileReason, Instant)> = None;

    loop {
        let deadline = retry.map_or_else(Instant::now, |(_, at)| at);
        let reason = tokio::select! {
            reason = requests.next() => {
                let Some(reason) = reason else { break };
                reason
            }
            () = tokio::time::sleep_until(deadline), if retry.is_some() => {
                let Some((reason, _)) = retry.take() else { continue };
                reason
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
                continue;
            }
        };

        if requests.take_resubscribe() {
            let restored = reconciler.resubscribe_active().await;
            tracing::info!(
                topics = restored.subscribed.len(),
                failed = restored.failed.len(),
                "bus reconnected, resubscribed active topics"
            );
        }

        let needs_retry = match reconciler.reconcile().await {
            Ok(outcome) if outcome.failed.is_empty() => {
                tracing::debug!(%reason, generation = outcome.generation, "reconcile finished");
                false
            }
            Ok(outcome) => {
                tracing::warn!(
                    %reason,
                    failed = outcome.failed.len(),
                    "reconcile left topics unsubscribed"
                );
                true
            }
            Err(err @ DeriveError::StoreUnavailable(_)) => {
                tracing::warn!(%reason, error = %err, "reconcile aborted, keeping previous rules");
                true
            }
            Err(err) => {
                tracing::warn!(
                    %reason,
                    error = %err,
                    "reconcile rejected, keeping previous rules until reconfigured"
                );
                false
            }
        };

        if needs_retry {
            failures = failures.saturating_add(1);
            let delay = backoff.delay(failures);
            tracing::info!(
                attempt = failures,
                retry_in_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                "scheduling reconcile retry"
            );
            retry = Some((reason, Instant::now() + delay));
        } else {
            failures = 0;
            retry = None;
        }
    }
    tracing::info!("reconcile worker stopped");
}
