//! Device state cache: the latest snapshot of every known device.
//!
//! One mutex guards both the topic index and the snapshots, so a reader never
//! observes a half-written value map and a topic never points at a stale id.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use telederive_domain::device::{DeviceIdentity, DeviceState};
use telederive_domain::error::DeriveError;
use telederive_domain::id::DeviceId;
use telederive_domain::telemetry::Values;
use telederive_domain::time::{Timestamp, now};

#[derive(Default)]
struct Inner {
    topics: HashMap<String, DeviceId>,
    states: HashMap<DeviceId, DeviceState>,
}

impl Inner {
    fn bind(&mut self, identity: &DeviceIdentity) {
        // One topic per device: drop whatever topic the id was bound to before.
        self.topics
            .retain(|topic, id| *id != identity.id || *topic == identity.topic);
        self.topics
            .insert(identity.topic.clone(), identity.id.clone());
    }
}

/// Process-wide map from device to its latest canonical values.
#[derive(Default)]
pub struct DeviceStateCache {
    inner: Mutex<Inner>,
}

impl DeviceStateCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Device currently bound to `topic`.
    #[must_use]
    pub fn resolve_topic(&self, topic: &str) -> Option<DeviceId> {
        self.lock().topics.get(topic).cloned()
    }

    /// Bind `identity.topic` to `identity.id`, replacing any earlier topic of
    /// the same device.
    pub fn bind(&self, identity: &DeviceIdentity) {
        self.lock().bind(identity);
    }

    /// Replace the whole topic index. Snapshots are kept.
    pub fn reindex<'a>(&self, identities: impl IntoIterator<Item = &'a DeviceIdentity>) {
        let mut inner = self.lock();
        inner.topics.clear();
        for identity in identities {
            inner.bind(identity);
        }
    }

    /// Replace the snapshot of the device owning `topic`.
    ///
    /// # Errors
    ///
    /// Returns [`DeriveError::UnresolvedDevice`] when no device is bound to
    /// `topic`; the cache is left untouched.
    pub fn update(&self, topic: &str, values: Values) -> Result<DeviceState, DeriveError> {
        self.update_at(topic, values, now())
    }

    /// [`update`](Self::update) with an explicit timestamp.
    ///
    /// # Errors
    ///
    /// Returns [`DeriveError::UnresolvedDevice`] when no device is bound to
    /// `topic`.
    pub fn update_at(
        &self,
        topic: &str,
        values: Values,
        at: Timestamp,
    ) -> Result<DeviceState, DeriveError> {
        let mut inner = self.lock();
        let id = inner
            .topics
            .get(topic)
            .cloned()
            .ok_or_else(|| DeriveError::UnresolvedDevice {
                topic: topic.to_string(),
            })?;
        let state = DeviceState::new(DeviceIdentity::new(id.clone(), topic), values, at);
        inner.states.insert(id, state.clone());
        Ok(state)
    }

    /// Seed a snapshot loaded from persistent storage.
    ///
    /// A snapshot already present in memory is newer by definition and wins.
    pub fn preload(&self, state: DeviceState) {
        let mut inner = self.lock();
        inner.bind(&state.device);
        inner.states.entry(state.device.id.clone()).or_insert(state);
    }

    /// Latest values of `device`.
    #[must_use]
    pub fn get(&self, device: &DeviceId) -> Option<Values> {
        self.lock()
            .states
            .get(device)
            .map(|state| state.values.clone())
    }

    /// Latest values of several devices, read under a single lock.
    #[must_use]
    pub fn snapshot<'a>(
        &self,
        devices: impl IntoIterator<Item = &'a DeviceId>,
    ) -> HashMap<DeviceId, Values> {
        let inner = self.lock();
        devices
            .into_iter()
            .filter_map(|id| {
                inner
                    .states
                    .get(id)
                    .map(|state| (id.clone(), state.values.clone()))
            })
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().states.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
