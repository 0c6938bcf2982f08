//! # telederive-adapter-http-axum
//!
//! HTTP adapter built on [axum](https://docs.rs/axum).
//!
//! ## Responsibilities
//! - Serve `GET /health` for supervisors and load balancers
//! - Serve the reconfiguration webhook (`POST /api/reconfigure`), which
//!   verifies an HMAC-SHA256 signature and queues a reconciliation
//! - Map webhook failures into HTTP status codes with a JSON error body
//!
//! ## Dependency rule
//! Depends on `telederive-app` (for the reconcile trigger). Never leaks axum
//! types into the domain.

pub mod error;
pub mod router;
pub mod signature;
pub mod state;
