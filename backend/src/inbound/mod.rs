//! Inbound adapters that translate bus traffic into domain service calls
//! while keeping transport details at the edge.
//!
//! The bus consumer loop lives under [`consumer`].

pub mod consumer;
