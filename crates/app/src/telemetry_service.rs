//! Telemetry pipeline: one inbound message from payload to derived publishes.
//!
//! A single worker drains the inbound channel so messages are processed in
//! delivery order. Per-message failures are logged and never stop the worker.

use std::sync::Arc;
use std::time::Duration;

use telederive_domain::error::DeriveError;
use telederive_domain::id::DeviceId;
use telederive_domain::payload::{ValueSource, normalize};
use tokio::sync::{mpsc, watch};

use crate::deadline::store_call;
use crate::derivation_engine::DerivationEngine;
use crate::ports::{BusClient, ConfigStore, InboundMessage};
use crate::publisher::ResultPublisher;
use crate::rule_set::RuleSetHandle;
use crate::state_cache::DeviceStateCache;
use crate::write_through::WriteThrough;

/// What happened to one processed message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MessageOutcome {
    pub published: usize,
    pub failed: usize,
}

pub struct TelemetryService<S, B> {
    store: S,
    cache: Arc<DeviceStateCache>,
    engine: DerivationEngine,
    publisher: ResultPublisher<B>,
    write_through: WriteThrough,
    store_timeout: Duration,
}

impl<S: ConfigStore, B: BusClient> TelemetryService<S, B> {
    pub fn new(
        store: S,
        bus: B,
        cache: Arc<DeviceStateCache>,
        rules: Arc<RuleSetHandle>,
        write_through: WriteThrough,
        store_timeout: Duration,
    ) -> Self {
        Self {
            store,
            engine: DerivationEngine::new(rules, Arc::clone(&cache)),
            cache,
            publisher: ResultPublisher::new(bus),
            write_through,
            store_timeout,
        }
    }

    /// Pre-populate the cache from persisted last known values.
    ///
    /// Returns the number of snapshots loaded. A store failure is logged and
    /// leaves the cache empty.
    pub async fn warm_up(&self) -> usize {
        match store_call(self.store_timeout, self.store.list_last_known_values()).await {
            Ok(states) => {
                let count = states.len();
                for state in states {
                    self.cache.preload(state);
                }
                tracing::info!(devices = count, "device cache warmed up");
                count
            }
            Err(err) => {
                tracing::warn!(error = %err, "could not load last known values, starting cold");
                0
            }
        }
    }

    /// Process one inbound message.
    ///
    /// # Errors
    ///
    /// Returns [`DeriveError::MalformedPayload`] or
    /// [`DeriveError::UnresolvedDevice`] when the message is dropped before
    /// reaching the cache, and [`DeriveError::StoreUnavailable`] when the
    /// device lookup fails. Publish failures are logged and counted in the
    /// outcome instead.
    pub async fn handle_message(
        &self,
        message: &InboundMessage,
    ) -> Result<MessageOutcome, DeriveError> {
        let normalized = normalize(&message.payload)?;
        if normalized.source == ValueSource::EnvelopeFallback {
            tracing::warn!(
                topic = %message.topic,
                "value field is not a JSON object, using the envelope itself"
            );
        }

        self.resolve(&message.topic).await?;
        let state = self.cache.update(&message.topic, normalized.values)?;
        let device = state.device.id.clone();
        self.write_through.offer(state);

        Ok(self.derive(&device).await)
    }

    async fn resolve(&self, topic: &str) -> Result<DeviceId, DeriveError> {
        if let Some(id) = self.cache.resolve_topic(topic) {
            return Ok(id);
        }

        let found = store_call(self.store_timeout, self.store.find_device_by_topic(topic)).await?;
        let identity = found.ok_or_else(|| DeriveError::UnresolvedDevice {
            topic: topic.to_string(),
        })?;
        identity.validate()?;
        tracing::debug!(topic, device = %identity.id, "bound topic from store lookup");
        self.cache.bind(&identity);
        Ok(identity.id)
    }

    async fn derive(&self, device: &DeviceId) -> MessageOutcome {
        let mut outcome = MessageOutcome::default();
        for intent in self.engine.evaluate(device) {
            match self.publisher.publish(&intent).await {
                Ok(()) => outcome.published += 1,
                Err(err) => {
                    outcome.failed += 1;
                    tracing::warn!(topic = %intent.topic, error = %err, "failed to publish derived value");
                }
            }
        }
        outcome
    }

    /// Drain `inbound` until it closes or `shutdown` flips to `true`.
    pub async fn run(
        &self,
        mut inbound: mpsc::Receiver<InboundMessage>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        tracing::info!("telemetry worker started");
        loop {
            tokio::select! {
                message = inbound.recv() => {
                    let Some(message) = message else { break };
                    match self.handle_message(&message).await {
                        Ok(outcome) => tracing::trace!(
                            topic = %message.topic,
                            published = outcome.published,
                            failed = outcome.failed,
                            "message processed"
                        ),
                        Err(err @ DeriveError::MalformedPayload(_)) => {
                            tracing::warn!(topic = %message.topic, error = %err, "dropping malformed message");
                        }
                        Err(err @ DeriveError::UnresolvedDevice { .. }) => {
                            tracing::debug!(error = %err, "dropping message from unknown device");
                        }
                        Err(err) => {
                            tracing::warn!(topic = %message.topic, error = %err, "dropping message");
                        }
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        tracing::info!("telemetry worker stopped");
    }
}
