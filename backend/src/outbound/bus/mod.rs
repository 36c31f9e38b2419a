//! Message bus adapters.
//!
//! [`InMemoryMessageBus`] serves tests and single-process deployments;
//! [`PostgresMessageBus`] keeps the log in the service database.

mod in_memory;
mod postgres;

pub use in_memory::InMemoryMessageBus;
pub use postgres::{DEFAULT_BATCH_SIZE, DEFAULT_POLL_INTERVAL, PostgresMessageBus};
