//! MQTT adapter error types.

use telederive_domain::error::DeriveError;

/// Errors specific to the MQTT adapter.
#[derive(Debug, thiserror::Error)]
pub enum MqttError {
    /// The rumqttc client rejected a request.
    #[error("MQTT client error")]
    Client(#[from] rumqttc::ClientError),

    /// The connection to the broker failed.
    #[error("MQTT connection error")]
    Connection(#[from] rumqttc::ConnectionError),

    /// Every startup connection attempt failed.
    #[error("could not connect to MQTT broker after {attempts} attempts")]
    ConnectExhausted {
        attempts: u32,
        #[source]
        source: rumqttc::ConnectionError,
    },
}

impl MqttError {
    pub(crate) fn into_publish(self) -> DeriveError {
        DeriveError::publish(self)
    }

    pub(crate) fn into_subscription(self) -> DeriveError {
        DeriveError::subscription(self)
    }
}
