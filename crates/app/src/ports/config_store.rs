//! Configuration store port: active rules, device lookup, last known values.

use std::future::Future;

use telederive_domain::device::{DeviceIdentity, DeviceState};
use telederive_domain::error::DeriveError;
use telederive_domain::rule::{CostRule, EfficiencyRule};

/// Read/write access to the external configuration store.
pub trait ConfigStore {
    /// All enabled cost rules.
    fn list_cost_rules(&self) -> impl Future<Output = Result<Vec<CostRule>, DeriveError>> + Send;

    /// All enabled efficiency rules.
    fn list_efficiency_rules(
        &self,
    ) -> impl Future<Output = Result<Vec<EfficiencyRule>, DeriveError>> + Send;

    /// Resolve the device publishing on `topic`, if any.
    fn find_device_by_topic(
        &self,
        topic: &str,
    ) -> impl Future<Output = Result<Option<DeviceIdentity>, DeriveError>> + Send;

    /// Persist `state` as the device's last known value.
    fn write_last_known_value(
        &self,
        state: &DeviceState,
    ) -> impl Future<Output = Result<(), DeriveError>> + Send;

    /// Every persisted last known value, used to warm the cache at startup.
    fn list_last_known_values(
        &self,
    ) -> impl Future<Output = Result<Vec<DeviceState>, DeriveError>> + Send;
}

impl<T: ConfigStore + Send + Sync> ConfigStore for std::sync::Arc<T> {
    fn list_cost_rules(&self) -> impl Future<Output = Result<Vec<CostRule>, DeriveError>> + Send {
        (**self).list_cost_rules()
    }

    fn list_efficiency_rules(
        &self,
    ) -> impl Future<Output = Result<Vec<EfficiencyRule>, DeriveError>> + Send {
        (**self).list_efficiency_rules()
    }

    fn find_device_by_topic(
        &self,
        topic: &str,
    ) -> impl Future<Output = Result<Option<DeviceIdentity>, DeriveError>> + Send {
        (**self).find_device_by_topic(topic)
    }

    fn write_last_known_value(
        &self,
        state: &DeviceState,
    ) -> impl Future<Output = Result<(), DeriveError>> + Send {
        (**self).write_last_known_value(state)
    }

    fn list_last_known_values(
        &self,
    ) -> impl Future<Output = Result<Vec<DeviceState>, DeriveError>> + Send {
        (**self).list_last_known_values()
    }
}
