//! # telederive-adapter-storage-sqlite-sqlx
//!
//! `SQLite` configuration store adapter using [sqlx](https://docs.rs/sqlx).
//!
//! ## Responsibilities
//! - Implement the `ConfigStore` port defined in `telederive-app::ports`
//! - Manage `SQLite` connection pool lifecycle
//! - Run database migrations (using sqlx embedded migrations)
//! - Map between domain types and database rows
//!
//! ## Dependency rule
//! Depends on `telederive-app` (for port traits) and `telederive-domain` (for domain types).
//! The `app` and `domain` crates must never reference this adapter.

mod config_store;
mod error;
mod pool;

pub use config_store::SqliteConfigStore;
pub use error::StorageError;
pub use pool::{Config, Database};
