//! # telederive-adapter-mqtt
//!
//! MQTT adapter: the message bus used by the derivation service, via rumqttc.
//!
//! ## Responsibilities
//! - Connect to the broker at startup, retrying with exponential backoff
//! - Implement the `BusClient` port (subscribe, unsubscribe, retained publish)
//! - Drive the rumqttc event loop, forwarding inbound publishes to the
//!   telemetry worker over a bounded channel
//! - Detect reconnects and request a resubscribing reconcile
//!
//! ## Dependency rule
//! Same as other adapters: depends on `telederive-app` and `telederive-domain`.

mod config;
mod error;

use std::future::Future;
use std::time::Duration;

use rumqttc::{AsyncClient, Event, EventLoop, Packet, QoS};
use telederive_app::ports::{BusClient, InboundMessage};
use telederive_app::reconcile_worker::{ReconcileReason, ReconcileTrigger};
use telederive_domain::error::DeriveError;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

pub use config::MqttConfig;
pub use error::MqttError;

/// [`BusClient`] backed by a rumqttc [`AsyncClient`].
#[derive(Clone)]
pub struct MqttBus {
    client: AsyncClient,
}

impl MqttBus {
    /// Ask the broker to close the session.
    ///
    /// # Errors
    ///
    /// Returns [`MqttError::Client`] when the request queue is closed.
    pub async fn disconnect(&self) -> Result<(), MqttError> {
        self.client.disconnect().await?;
        Ok(())
    }
}

impl BusClient for MqttBus {
    fn subscribe(&self, topic: &str) -> impl Future<Output = Result<(), DeriveError>> + Send {
        let client = self.client.clone();
        let topic = topic.to_string();
        async move {
            client
                .subscribe(topic, QoS::AtLeastOnce)
                .await
                .map_err(|err| MqttError::from(err).into_subscription())
        }
    }

    fn unsubscribe(&self, topic: &str) -> impl Future<Output = Result<(), DeriveError>> + Send {
        let client = self.client.clone();
        let topic = topic.to_string();
        async move {
            client
                .unsubscribe(topic)
                .await
                .map_err(|err| MqttError::from(err).into_subscription())
        }
    }

    fn publish_retained(
        &self,
        topic: &str,
        payload: Vec<u8>,
    ) -> impl Future<Output = Result<(), DeriveError>> + Send {
        let client = self.client.clone();
        let topic = topic.to_string();
        async move {
            client
                .publish(topic, QoS::AtLeastOnce, true, payload)
                .await
                .map_err(|err| MqttError::from(err).into_publish())
        }
    }
}

/// An established broker session: the bus handle plus the event loop that
/// must be polled for anything to happen.
pub struct MqttSession {
    pub bus: MqttBus,
    event_loop: EventLoop,
}

/// Connect to the broker, retrying with exponential backoff.
///
/// # Errors
///
/// Returns [`MqttError::ConnectExhausted`] once `connect_attempts` attempts
/// have failed.
pub async fn connect(config: &MqttConfig) -> Result<MqttSession, MqttError> {
    let (client, mut event_loop) = AsyncClient::new(config.options(), config.request_capacity);
    let attempts = config.connect_attempts.max(1);

    let mut attempt = 0;
    loop {
        attempt += 1;
        match wait_for_connack(&mut event_loop).await {
            Ok(()) => break,
            Err(source) if attempt >= attempts => {
                return Err(MqttError::ConnectExhausted { attempts, source });
            }
            Err(err) => {
                let delay = config.backoff(attempt);
                tracing::warn!(
                    host = %config.broker_host,
                    port = config.broker_port,
                    attempt,
                    retry_in_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    error = %err,
                    "MQTT connection failed"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }

    tracing::info!(
        host = %config.broker_host,
        port = config.broker_port,
        attempt,
        "connected to MQTT broker"
    );
    Ok(MqttSession {
        bus: MqttBus { client },
        event_loop,
    })
}

async fn wait_for_connack(event_loop: &mut EventLoop) -> Result<(), rumqttc::ConnectionError> {
    loop {
        if let Event::Incoming(Packet::ConnAck(_)) = event_loop.poll().await? {
            return Ok(());
        }
    }
}

/// What the event loop task does with one rumqttc event.
#[derive(Debug, PartialEq, Eq)]
enum Notification {
    Message(InboundMessage),
    Connected,
    Ignored,
}

fn classify(event: Event) -> Notification {
    match event {
        Event::Incoming(Packet::Publish(publish)) => {
            match std::str::from_utf8(publish.topic.as_ref()) {
                Ok(topic) => Notification::Message(InboundMessage::new(topic, publish.payload.to_vec())),
                Err(err) => {
                    tracing::warn!(error = %err, "ignoring publish with non UTF-8 topic");
                    Notification::Ignored
                }
            }
        }
        Event::Incoming(Packet::ConnAck(_)) => Notification::Connected,
        _ => Notification::Ignored,
    }
}

/// What happened to one publish handed to the telemetry channel.
#[derive(Debug, PartialEq, Eq)]
enum Forwarded {
    Queued,
    Dropped,
    Closed,
}

fn forward(inbound: &mpsc::Sender<InboundMessage>, message: InboundMessage) -> Forwarded {
    match inbound.try_send(message) {
        Ok(()) => Forwarded::Queued,
        Err(mpsc::error::TrySendError::Full(message)) => {
            tracing::warn!(topic = %message.topic, "telemetry queue full, dropping message");
            Forwarded::Dropped
        }
        Err(mpsc::error::TrySendError::Closed(_)) => Forwarded::Closed,
    }
}

/// Sleep for `delay`, cut short by shutdown. Returns `true` when shutting down.
async fn wait_or_shutdown(delay: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        () = tokio::time::sleep(delay) => false,
        changed = shutdown.changed() => changed.is_err() || *shutdown.borrow(),
    }
}

impl MqttSession {
    /// Spawn the task polling the event loop.
    ///
    /// Inbound publishes are forwarded to `inbound` without waiting; when the
    /// channel is full the message is dropped with a warning. The task also
    /// drains the client request queue that publishes go through, so it must
    /// never park on the telemetry worker. Every `ConnAck` seen here follows a
    /// reconnect and requests a [`ReconcileReason::Reconnected`] run.
    /// Connection errors are retried with the configured backoff until
    /// `shutdown` flips to `true`.
    pub fn spawn_event_loop(
        self,
        config: &MqttConfig,
        inbound: mpsc::Sender<InboundMessage>,
        trigger: ReconcileTrigger,
        mut shutdown: watch::Receiver<bool>,
    ) -> (MqttBus, JoinHandle<()>) {
        let Self { bus, mut event_loop } = self;
        let config = config.clone();

        let handle = tokio::spawn(async move {
            let mut failures = 0_u32;
            loop {
                let event = tokio::select! {
                    event = event_loop.poll() => event,
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                        continue;
                    }
                };

                match event {
                    Ok(event) => {
                        failures = 0;
                        match classify(event) {
                            Notification::Message(message) => {
                                if forward(&inbound, message) == Forwarded::Closed {
                                    tracing::debug!("telemetry worker gone, stopping event loop");
                                    break;
                                }
                            }
                            Notification::Connected => {
                                tracing::info!("reconnected to MQTT broker");
                                if let Err(err) = trigger.request(ReconcileReason::Reconnected) {
                                    tracing::warn!(error = %err, "could not request resubscription");
                                }
                            }
                            Notification::Ignored => {}
                        }
                    }
                    Err(err) => {
                        failures = failures.saturating_add(1);
                        let delay = config.backoff(failures);
                        tracing::warn!(
                            error = %err,
                            failures,
                            retry_in_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                            "MQTT connection lost"
                        );
                        if wait_or_shutdown(delay, &mut shutdown).await {
                            break;
                        }
                    }
                }
            }
            tracing::info!("MQTT event loop stopped");
        });

        (bus, handle)
    }
}
