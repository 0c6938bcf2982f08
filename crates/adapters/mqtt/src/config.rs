//! MQTT bus configuration.

use std::time::Duration;

use rumqttc::MqttOptions;
use serde::Deserialize;

/// Configuration for the MQTT bus connection.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    /// MQTT broker hostname or IP address.
    pub broker_host: String,
    /// MQTT broker port.
    pub broker_port: u16,
    /// MQTT client identifier.
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Keep-alive interval in seconds.
    pub keep_alive_secs: u16,
    /// Connection attempts at startup before giving up.
    pub connect_attempts: u32,
    /// Delay after the first failed attempt, doubled on each retry.
    pub initial_backoff_ms: u64,
    /// Upper bound for the retry delay.
    pub max_backoff_ms: u64,
    /// Capacity of the client request queue.
    pub request_capacity: usize,
    /// Capacity of the channel feeding the telemetry worker.
    pub inbound_capacity: usize,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            broker_host: "localhost".to_string(),
            broker_port: 1883,
            client_id: "telederive".to_string(),
            username: None,
            password: None,
            keep_alive_secs: 30,
            connect_attempts: 5,
            initial_backoff_ms: 500,
            max_backoff_ms: 30_000,
            request_capacity: 64,
            inbound_capacity: 1024,
        }
    }
}

impl MqttConfig {
    /// rumqttc options for this configuration.
    #[must_use]
    pub fn options(&self) -> MqttOptions {
        let mut options =
            MqttOptions::new(self.client_id.clone(), self.broker_host.clone(), self.broker_port);
        options.set_keep_alive(Duration::from_secs(u64::from(self.keep_alive_secs)));
        if let (Some(username), Some(password)) = (&self.username, &self.password) {
            options.set_credentials(username, password);
        }
        options
    }

    /// Delay before retry number `attempt` (1-based).
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1_u64 << attempt.saturating_sub(1).min(16);
        Duration::from_millis(
            self.initial_backoff_ms
                .saturating_mul(factor)
                .min(self.max_backoff_ms),
        )
    }
}
