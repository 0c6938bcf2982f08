//! Bus port: subscribe/unsubscribe and retained publish on the message bus.

use std::future::Future;

use telederive_domain::error::DeriveError;

/// A raw message delivered by the bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

impl InboundMessage {
    #[must_use]
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }
}

/// Client side of the publish/subscribe bus.
pub trait BusClient {
    /// Start receiving messages published on `topic`.
    fn subscribe(&self, topic: &str) -> impl Future<Output = Result<(), DeriveError>> + Send;

    /// Stop receiving messages published on `topic`.
    fn unsubscribe(&self, topic: &str) -> impl Future<Output = Result<(), DeriveError>> + Send;

    /// Publish `payload` on `topic` with the retain flag set, so the broker
    /// hands it to future subscribers immediately.
    fn publish_retained(
        &self,
        topic: &str,
        payload: Vec<u8>,
    ) -> impl Future<Output = Result<(), DeriveError>> + Send;
}

impl<T: BusClient + Send + Sync> BusClient for std::sync::Arc<T> {
    fn subscribe(&self, topic: &str) -> impl Future<Output = Result<(), DeriveError>> + Send {
        (**self).subscribe(topic)
    }

    fn unsubscribe(&self, topic: &str) -> impl Future<Output = Result<(), DeriveError>> + Send {
        (**self).unsubscribe(topic)
    }

    fn publish_retained(
        &self,
        topic: &str,
        payload: Vec<u8>,
    ) -> impl Future<Output = Result<(), DeriveError>> + Send {
        (**self).publish_retained(topic, payload)
    }
}
