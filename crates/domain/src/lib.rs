//! # telederive-domain
//!
//! Pure domain model for the telemetry derivation service.
//!
//! ## Responsibilities
//! - Foundational types: typed identifiers, error taxonomy, timestamps
//! - Define **devices** (identity + last known snapshot) and **telemetry values**
//! - Define **rules** (cost, efficiency) and the **rule set** that groups them
//! - Normalize inbound bus payloads and encode outbound envelopes
//! - Hold the derivation formulas (cost breakdown, PUE)
//!
//! ## Dependency rule
//! This crate has **no internal dependencies**.
//! It must never import anything from `app`, adapters, or external IO crates.
//! All IO boundaries are expressed as traits in the `app` crate (ports).

pub mod error;
pub mod id;
pub mod time;

pub mod derivation;
pub mod device;
pub mod envelope;
pub mod payload;
pub mod rule;
pub mod telemetry;
