//! PostgreSQL persistence adapters using Diesel ORM.
//!
//! Repositories translate between Diesel rows (`models.rs`) and domain types;
//! rows and the schema never leave this module. Connections come from a
//! shared `bb8` pool through `diesel-async`.
//!
//! # Example
//!
//! ```ignore
//! use telematics_backend::outbound::persistence::{
//!     DbPool, DieselLinkRepository, PoolConfig,
//! };
//!
//! let pool = DbPool::new(PoolConfig::new("postgres://localhost/devices_api")).await?;
//! let links = DieselLinkRepository::new(pool);
//! ```

mod diesel_device_repository;
mod diesel_device_status_store;
mod diesel_integration_repository;
mod diesel_link_repository;
mod error_mapping;
mod migrations;
pub(crate) mod models;
mod pool;
pub(crate) mod schema;

pub use diesel_device_repository::DieselDeviceRepository;
pub use diesel_device_status_store::DieselDeviceStatusStore;
pub use diesel_integration_repository::DieselIntegrationRepository;
pub use diesel_link_repository::DieselLinkRepository;
pub(crate) use error_mapping::{map_diesel_error, map_pool_error};
pub use migrations::{MIGRATIONS, run_pending_migrations};
pub use pool::{DbPool, PoolConfig, PoolError};
