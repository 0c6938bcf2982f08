//! Result publisher: serializes intents and hands them to the bus.

use telederive_domain::envelope::PublishIntent;
use telederive_domain::error::DeriveError;

use crate::ports::BusClient;

/// Publishes derived results as retained messages.
pub struct ResultPublisher<B> {
    bus: B,
}

impl<B: BusClient> ResultPublisher<B> {
    pub fn new(bus: B) -> Self {
        Self { bus }
    }

    /// Publish one intent.
    ///
    /// # Errors
    ///
    /// Returns [`DeriveError::PublishFailure`] when the envelope cannot be
    /// encoded or the bus rejects the publish. Nothing is retried.
    pub async fn publish(&self, intent: &PublishIntent) -> Result<(), DeriveError> {
        let payload = intent.envelope.to_wire().map_err(DeriveError::publish)?;
        self.bus.publish_retained(&intent.topic, payload).await?;
        tracing::debug!(
            topic = %intent.topic,
            label = %intent.envelope.label,
            "published derived value"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Map, Value, json};
    use std::sync::atomic::Ordering;
    use telederive_domain::envelope::Envelope;
    use telederive_domain::time::parse_iso8601;

    use crate::testing::RecordingBus;

    fn intent() -> PublishIntent {
        let mut value = Map::new();
        value.insert("cost_a".to_string(), json!(2200.5));
        PublishIntent {
            topic: "derived/rack/cost".to_string(),
            envelope: Envelope::new(
                parse_iso8601("2024-05-01T12:30:00Z").unwrap(),
                "Rack cost",
                Some("rack-1".to_string()),
                value,
            ),
        }
    }

    #[tokio::test]
    async fn should_publish_double_encoded_envelope() {
        let publisher = ResultPublisher::new(RecordingBus::default());

        publisher.publish(&intent()).await.unwrap();

        let published = publisher.bus.published();
        assert_eq!(published.len(), 1);
        let (topic, envelope) = &published[0];
        assert_eq!(topic, "derived/rack/cost");
        assert_eq!(envelope["timestamp"], "2024-05-01T12:30:00.000Z");
        assert_eq!(envelope["label"], "Rack cost");
        assert_eq!(envelope["address"], "rack-1");
        let inner: Value = serde_json::from_str(envelope["value"].as_str().unwrap()).unwrap();
        assert_eq!(inner["cost_a"], 2200.5);
    }

    #[tokio::test]
    async fn should_surface_bus_failure() {
        let bus = RecordingBus::default();
        bus.fail_publish.store(true, Ordering::SeqCst);
        let publisher = ResultPublisher::new(bus);

        let result = publisher.publish(&intent()).await;

        assert!(matches!(result, Err(DeriveError::PublishFailure(_))));
    }
}
