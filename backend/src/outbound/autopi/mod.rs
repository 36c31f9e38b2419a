//! AutoPi REST adapter.

mod dto;
mod http_client;

pub use http_client::AutoPiHttpClient;
