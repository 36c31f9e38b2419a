//! Outbound adapters implementing domain ports for external infrastructure.
//!
//! - **persistence**: PostgreSQL-backed repositories using Diesel
//! - **bus**: in-memory and PostgreSQL-log message buses
//! - **autopi**: reqwest client for the AutoPi REST API
//! - **cipher**: AES-GCM credential encryption
//!
//! Adapters translate between domain types and infrastructure
//! representations. They contain no business logic.

pub mod autopi;
pub mod bus;
pub mod cipher;
pub mod persistence;
