//! Subscription reconciler: keeps bus subscriptions and the active rule set
//! in line with the configuration store.
//!
//! A run loads every enabled rule, validates the resulting [`RuleSet`], diffs
//! the topics it needs against the topics already subscribed, issues only the
//! difference, re-indexes the cache topic map and finally swaps the rule set.
//! Any store or validation failure aborts the run before the bus is touched,
//! so the previous rules and subscriptions stay active.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use telederive_domain::error::DeriveError;
use telederive_domain::rule::RuleSet;
use tokio::sync::Mutex;

use crate::deadline::store_call;
use crate::ports::{BusClient, ConfigStore};
use crate::rule_set::RuleSetHandle;
use crate::state_cache::DeviceStateCache;

/// Summary of one reconcile run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileOutcome {
    /// Generation active after the run.
    pub generation: u64,
    /// Whether a new rule set was installed.
    pub swapped: bool,
    pub subscribed: Vec<String>,
    pub unsubscribed: Vec<String>,
    /// Topics whose subscribe call failed; retried on the next run.
    pub failed: Vec<String>,
}

impl ReconcileOutcome {
    /// Number of subscribe/unsubscribe calls issued.
    #[must_use]
    pub fn bus_calls(&self) -> usize {
        self.subscribed.len() + self.unsubscribed.len() + self.failed.len()
    }
}

pub struct SubscriptionReconciler<S, B> {
    store: S,
    bus: B,
    rules: Arc<RuleSetHandle>,
    cache: Arc<DeviceStateCache>,
    // Held for the whole run, which also serializes concurrent reconciles.
    subscribed: Mutex<BTreeSet<String>>,
    store_timeout: Duration,
}

impl<S: ConfigStore, B: BusClient> SubscriptionReconciler<S, B> {
    pub fn new(
        store: S,
        bus: B,
        rules: Arc<RuleSetHandle>,
        cache: Arc<DeviceStateCache>,
        store_timeout: Duration,
    ) -> Self {
        Self {
            store,
            bus,
            rules,
            cache,
            subscribed: Mutex::new(BTreeSet::new()),
            store_timeout,
        }
    }

    /// Bring subscriptions and rules in line with the store.
    ///
    /// # Errors
    ///
    /// Returns [`DeriveError::StoreUnavailable`] when the rules cannot be
    /// loaded in time and [`DeriveError::Validation`] when they are
    /// inconsistent. In both cases nothing changes.
    pub async fn reconcile(&self) -> Result<ReconcileOutcome, DeriveError> {
        let mut subscribed = self.subscribed.lock().await;

        let candidate = self.load().await?;
        let required = candidate.required_topics();
        let mut outcome = ReconcileOutcome::default();

        if *subscribed != required {
            let removed: Vec<String> = subscribed.difference(&required).cloned().collect();
            for topic in removed {
                if let Err(err) = self.bus.unsubscribe(&topic).await {
                    tracing::warn!(topic = %topic, error = %err, "unsubscribe failed, forgetting topic");
                }
                subscribed.remove(&topic);
                outcome.unsubscribed.push(topic);
            }

            let added: Vec<String> = required.difference(&subscribed).cloned().collect();
            self.subscribe_all(&mut subscribed, added, &mut outcome).await;
        }

        self.cache.reindex(candidate.devices());

        let current = self.rules.current();
        if current.same_rules(&candidate) {
            outcome.generation = current.generation;
        } else {
            outcome.generation = current.generation + 1;
            outcome.swapped = true;
            self.rules.swap(candidate.with_generation(outcome.generation));
        }

        tracing::info!(
            generation = outcome.generation,
            swapped = outcome.swapped,
            subscribed = outcome.subscribed.len(),
            unsubscribed = outcome.unsubscribed.len(),
            failed = outcome.failed.len(),
            topics = subscribed.len(),
            "reconciliation complete"
        );
        Ok(outcome)
    }

    async fn load(&self) -> Result<RuleSet, DeriveError> {
        let cost_rules = store_call(self.store_timeout, self.store.list_cost_rules()).await?;
        let efficiency_rules =
            store_call(self.store_timeout, self.store.list_efficiency_rules()).await?;
        let candidate = RuleSet::new(cost_rules, efficiency_rules);
        candidate.validate()?;
        Ok(candidate)
    }

    async fn subscribe_all(
        &self,
        subscribed: &mut BTreeSet<String>,
        topics: impl IntoIterator<Item = String>,
        outcome: &mut ReconcileOutcome,
    ) {
        for topic in topics {
            match self.bus.subscribe(&topic).await {
                Ok(()) => {
                    subscribed.insert(topic.clone());
                    outcome.subscribed.push(topic);
                }
                Err(err) => {
                    tracing::warn!(topic = %topic, error = %err, "subscribe failed, will retry on next reconcile");
                    outcome.failed.push(topic);
                }
            }
        }
    }

    /// Subscribe again to every topic the active rule set needs.
    ///
    /// Used after the bus reconnects, since the broker forgot the session's
    /// subscriptions. No store call is made, so telemetry resumes even while
    /// the store is down. Topics that fail stay out of the subscribed set and
    /// are picked up by the next reconcile.
    pub async fn resubscribe_active(&self) -> ReconcileOutcome {
        let mut subscribed = self.subscribed.lock().await;
        subscribed.clear();

        let current = self.rules.current();
        let mut outcome = ReconcileOutcome {
            generation: current.generation,
            ..ReconcileOutcome::default()
        };
        self.subscribe_all(&mut subscribed, current.required_topics(), &mut outcome)
            .await;
        outcome
    }

    /// Topics currently believed to be subscribed.
    pub async fn subscribed(&self) -> BTreeSet<String> {
        self.subscribed.lock().await.clone()
    }
}
