//! Handler contract for inbound envelopes.
//!
//! Handlers report every failure as an [`IngestError`] value. Whether the
//! message is acknowledged afterwards is decided by the consumer loop, not by
//! the handler.

use async_trait::async_trait;
use serde_json::Value;

use crate::domain::envelope::Envelope;

/// Why an inbound envelope was not applied.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IngestError {
    /// The envelope or its payload could not be decoded.
    #[error("malformed envelope: {message}")]
    Malformed { message: String },
    /// `source` does not name a known integration.
    #[error("no integration matches source {source_name}")]
    UnknownIntegration { source_name: String },
    /// A referenced device or link does not exist.
    #[error("not found: {message}")]
    NotFound { message: String },
    /// The envelope type or status value is not handled.
    #[error("unsupported envelope: {message}")]
    Unsupported { message: String },
    /// The relational store failed.
    #[error("store failure: {message}")]
    Store { message: String },
    /// Publishing a follow-up event failed.
    #[error("bus failure: {message}")]
    Bus { message: String },
}

impl IngestError {
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::Malformed {
            message: message.into(),
        }
    }

    pub fn unknown_integration(source_name: impl Into<String>) -> Self {
        Self::UnknownIntegration {
            source_name: source_name.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            message: message.into(),
        }
    }

    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::Unsupported {
            message: message.into(),
        }
    }

    pub fn store(message: impl Into<String>) -> Self {
        Self::Store {
            message: message.into(),
        }
    }

    pub fn bus(message: impl Into<String>) -> Self {
        Self::Bus {
            message: message.into(),
        }
    }

    /// Short label used as a log field.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Malformed { .. } => "malformed",
            Self::UnknownIntegration { .. } => "unknown_integration",
            Self::NotFound { .. } => "not_found",
            Self::Unsupported { .. } => "unsupported",
            Self::Store { .. } => "store",
            Self::Bus { .. } => "bus",
        }
    }
}

/// Applies one decoded envelope.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EnvelopeHandler: Send + Sync {
    async fn handle(&self, envelope: &Envelope<Value>) -> Result<(), IngestError>;
}
