//! # telederive-app
//!
//! Application layer: use-cases and **port definitions** (traits).
//!
//! ## Responsibilities
//! - Define **port traits** that adapters must implement:
//!   - `ConfigStore`: active rules, device lookup, last known values
//!   - `BusClient`: subscribe, unsubscribe, retained publish
//! - Own the **shared runtime state**, injected as `Arc`s:
//!   - `DeviceStateCache`: latest values per device
//!   - `RuleSetHandle`: the active, atomically swapped rule set
//! - Orchestrate the use-cases:
//!   - `TelemetryService`: normalize, cache, derive, publish
//!   - `SubscriptionReconciler`: align subscriptions and rules with the store
//!   - `ReconcileTrigger` / `run_reconcile_loop`: run reconciles off the hot paths
//!   - `WriteThrough`: best-effort last known value persistence
//!
//! ## Dependency rule
//! Depends on `telederive-domain` only (plus `tokio::sync` for channels).
//! Never imports adapter crates. Adapters depend on *this* crate, not the reverse.

pub mod deadline;
pub mod derivation_engine;
pub mod ports;
pub mod publisher;
pub mod reconcile_worker;
pub mod reconciler;
pub mod rule_set;
pub mod state_cache;
pub mod telemetry_service;
pub mod write_through;

#[cfg(test)]
mod testing;
