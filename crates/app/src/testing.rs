//! In-memory port doubles shared by the use-case tests.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use serde_json::Value;
use telederive_domain::device::{DeviceIdentity, DeviceState};
use telederive_domain::error::DeriveError;
use telederive_domain::id::DeviceId;
use telederive_domain::rule::{CostRule, EfficiencyRule};

use crate::ports::{BusClient, ConfigStore};

#[derive(Debug)]
pub struct Rejected;

impl std::fmt::Display for Rejected {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("rejected by test double")
    }
}

impl std::error::Error for Rejected {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusCall {
    Subscribe(String),
    Unsubscribe(String),
    Publish(String, Vec<u8>),
}

/// Bus double recording every call in order.
#[derive(Default)]
pub struct RecordingBus {
    calls: Mutex<Vec<BusCall>>,
    pub fail_publish: AtomicBool,
    pub fail_subscribe: Mutex<Vec<String>>,
    pub fail_unsubscribe: Mutex<Vec<String>>,
}

impl RecordingBus {
    pub fn calls(&self) -> Vec<BusCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.calls.lock().unwrap().clear();
    }

    pub fn subscriptions(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                BusCall::Subscribe(topic) => Some(topic),
                _ => None,
            })
            .collect()
    }

    /// Decoded outbound envelopes with their topic.
    pub fn published(&self) -> Vec<(String, Value)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                BusCall::Publish(topic, payload) => {
                    Some((topic, serde_json::from_slice(&payload).unwrap()))
                }
                _ => None,
            })
            .collect()
    }

    /// Inner `value` of every envelope published on `topic`.
    pub fn published_values(&self, topic: &str) -> Vec<Value> {
        self.published()
            .into_iter()
            .filter(|(t, _)| t == topic)
            .map(|(_, envelope)| {
                serde_json::from_str(envelope["value"].as_str().unwrap()).unwrap()
            })
            .collect()
    }

    fn record(&self, call: BusCall) {
        self.calls.lock().unwrap().push(call);
    }

    fn fails(list: &Mutex<Vec<String>>, topic: &str) -> bool {
        list.lock().unwrap().iter().any(|t| t == topic)
    }
}

impl BusClient for RecordingBus {
    fn subscribe(&self, topic: &str) -> impl Future<Output = Result<(), DeriveError>> + Send {
        self.record(BusCall::Subscribe(topic.to_string()));
        let result = if Self::fails(&self.fail_subscribe, topic) {
            Err(DeriveError::subscription(Rejected))
        } else {
            Ok(())
        };
        async { result }
    }

    fn unsubscribe(&self, topic: &str) -> impl Future<Output = Result<(), DeriveError>> + Send {
        self.record(BusCall::Unsubscribe(topic.to_string()));
        let result = if Self::fails(&self.fail_unsubscribe, topic) {
            Err(DeriveError::subscription(Rejected))
        } else {
            Ok(())
        };
        async { result }
    }

    fn publish_retained(
        &self,
        topic: &str,
        payload: Vec<u8>,
    ) -> impl Future<Output = Result<(), DeriveError>> + Send {
        let result = if self.fail_publish.load(Ordering::SeqCst) {
            Err(DeriveError::publish(Rejected))
        } else {
            self.record(BusCall::Publish(topic.to_string(), payload));
            Ok(())
        };
        async { result }
    }
}

/// Configuration store double backed by plain vectors.
#[derive(Default)]
pub struct MemoryStore {
    pub cost_rules: Mutex<Vec<CostRule>>,
    pub efficiency_rules: Mutex<Vec<EfficiencyRule>>,
    pub devices: Mutex<Vec<DeviceIdentity>>,
    pub last_known: Mutex<HashMap<DeviceId, DeviceState>>,
    pub unavailable: AtomicBool,
    pub lookups: AtomicUsize,
}

impl MemoryStore {
    pub fn with_rules(cost_rules: Vec<CostRule>, efficiency_rules: Vec<EfficiencyRule>) -> Self {
        Self {
            cost_rules: Mutex::new(cost_rules),
            efficiency_rules: Mutex::new(efficiency_rules),
            ..Self::default()
        }
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), DeriveError> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(DeriveError::store(Rejected))
        } else {
            Ok(())
        }
    }
}

impl ConfigStore for MemoryStore {
    fn list_cost_rules(&self) -> impl Future<Output = Result<Vec<CostRule>, DeriveError>> + Send {
        let result = self
            .check()
            .map(|()| self.cost_rules.lock().unwrap().clone());
        async { result }
    }

    fn list_efficiency_rules(
        &self,
    ) -> impl Future<Output = Result<Vec<EfficiencyRule>, DeriveError>> + Send {
        let result = self
            .check()
            .map(|()| self.efficiency_rules.lock().unwrap().clone());
        async { result }
    }

    fn find_device_by_topic(
        &self,
        topic: &str,
    ) -> impl Future<Output = Result<Option<DeviceIdentity>, DeriveError>> + Send {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        let result = self.check().map(|()| {
            self.devices
                .lock()
                .unwrap()
                .iter()
                .find(|device| device.topic == topic)
                .cloned()
        });
        async { result }
    }

    fn write_last_known_value(
        &self,
        state: &DeviceState,
    ) -> impl Future<Output = Result<(), DeriveError>> + Send {
        let result = self.check().map(|()| {
            self.last_known
                .lock()
                .unwrap()
                .insert(state.device.id.clone(), state.clone());
        });
        async { result }
    }

    fn list_last_known_values(
        &self,
    ) -> impl Future<Output = Result<Vec<DeviceState>, DeriveError>> + Send {
        let result = self
            .check()
            .map(|()| self.last_known.lock().unwrap().values().cloned().collect());
        async { result }
    }
}
