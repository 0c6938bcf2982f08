//! Best-effort persistence of last known values.
//!
//! The telemetry path never waits on the store: snapshots are offered to a
//! bounded channel and a background worker writes them one at a time.

use std::time::Duration;

use telederive_domain::device::DeviceState;
use tokio::sync::mpsc;

use crate::deadline::store_call;
use crate::ports::ConfigStore;

/// Sending half handed to the telemetry pipeline.
#[derive(Clone)]
pub struct WriteThrough {
    tx: mpsc::Sender<DeviceState>,
}

impl WriteThrough {
    /// Create the handle and the receiver consumed by [`run_write_through`].
    #[must_use]
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<DeviceState>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }

    /// Queue `state` without waiting. Returns `false` when it was dropped.
    pub fn offer(&self, state: DeviceState) -> bool {
        match self.tx.try_send(state) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(state)) => {
                tracing::warn!(device = %state.device.id, "write-through queue full, dropping snapshot");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::debug!("write-through worker stopped");
                false
            }
        }
    }
}

/// Drain `rx` into the store until every sender is dropped.
pub async fn run_write_through<S: ConfigStore>(
    store: S,
    mut rx: mpsc::Receiver<DeviceState>,
    timeout: Duration,
) {
    while let Some(state) = rx.recv().await {
        if let Err(err) = store_call(timeout, store.write_last_known_value(&state)).await {
            tracing::warn!(
                device = %state.device.id,
                error = %err,
                "failed to persist last known value"
            );
        }
    }
    tracing::debug!("write-through worker finished");
}
