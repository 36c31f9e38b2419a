//! Driven ports for publishing to and consuming from the message bus.
//!
//! Publishing is batch-atomic: either every message in a batch becomes
//! visible to consumers or none does. Consumers read one topic as a member of
//! a consumer group and acknowledge by offset.

use std::fmt;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use super::define_port_error;
use crate::domain::envelope::Envelope;

/// Well-known bus topics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Topic {
    /// Task definitions for pollers to start or refresh.
    TaskRunNow,
    /// Stop notices for running tasks.
    TaskStop,
    /// Transport-encrypted credentials for running tasks. Compacted.
    TaskCredential,
    /// Telemetry produced by pollers.
    DeviceStatus,
    /// Control-plane status reports produced by pollers.
    TaskStatusUpdate,
    /// Domain events for downstream consumers.
    DomainEvents,
    /// AutoPi unit registrations and VIN confirmation tasks.
    DeviceRegistration,
}

impl Topic {
    /// Every topic, in declaration order.
    pub const ALL: [Self; 7] = [
        Self::TaskRunNow,
        Self::TaskStop,
        Self::TaskCredential,
        Self::DeviceStatus,
        Self::TaskStatusUpdate,
        Self::DomainEvents,
        Self::DeviceRegistration,
    ];

    /// Name of the topic on the bus.
    pub fn name(self) -> &'static str {
        match self {
            Self::TaskRunNow => "topic.task.run.now",
            Self::TaskStop => "topic.task.stop",
            Self::TaskCredential => "topic.task.credential",
            Self::DeviceStatus => "topic.device.status",
            Self::TaskStatusUpdate => "topic.task.status",
            Self::DomainEvents => "topic.event",
            Self::DeviceRegistration => "topic.autopi.device.registration",
        }
    }

    /// Resolve a topic from its bus name.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|topic| topic.name() == name)
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One outbound record. A `None` payload is a tombstone for `key`.
#[derive(Debug, Clone, PartialEq)]
pub struct BusMessage {
    pub topic: Topic,
    pub key: Option<String>,
    pub payload: Option<Value>,
}

impl BusMessage {
    /// Encode an envelope as a keyed record.
    pub fn envelope<T: Serialize>(
        topic: Topic,
        key: impl Into<String>,
        envelope: &Envelope<T>,
    ) -> Result<Self, MessageBusError> {
        let payload = envelope
            .to_value()
            .map_err(|err| MessageBusError::encode(err.to_string()))?;
        Ok(Self {
            topic,
            key: Some(key.into()),
            payload: Some(payload),
        })
    }

    /// Null-valued record that lets a compacted topic drop `key`.
    pub fn tombstone(topic: Topic, key: impl Into<String>) -> Self {
        Self {
            topic,
            key: Some(key.into()),
            payload: None,
        }
    }

    /// Whether this record deletes its key.
    pub fn is_tombstone(&self) -> bool {
        self.payload.is_none()
    }
}

/// Record delivered to a consumer.
#[derive(Debug, Clone, PartialEq)]
pub struct ReceivedMessage {
    /// Position within the topic; acknowledged back to the subscription.
    pub offset: u64,
    pub topic: Topic,
    pub key: Option<String>,
    pub payload: Option<Value>,
}

define_port_error! {
    /// Errors surfaced by bus adapters.
    pub enum MessageBusError {
        /// Bus infrastructure is unavailable.
        Unavailable { message: String } => "message bus is unavailable: {message}",
        /// A record could not be encoded.
        Encode { message: String } => "bus record could not be encoded: {message}",
        /// The bus refused the batch or acknowledgement.
        Rejected { message: String } => "bus rejected the request: {message}",
        /// The subscription has been closed.
        Closed => "subscription closed",
    }
}

/// Port for publishing records.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Publish every record in `messages`, in order, atomically.
    async fn publish_batch(&self, messages: Vec<BusMessage>) -> Result<(), MessageBusError>;
}

/// A consumer-group member reading one topic.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BusSubscription: Send {
    /// Wait for the next record after the last acknowledged one.
    ///
    /// Returns `Ok(None)` once the bus has shut down.
    async fn next(&mut self) -> Result<Option<ReceivedMessage>, MessageBusError>;

    /// Commit `offset` for the consumer group.
    async fn ack(&mut self, offset: u64) -> Result<(), MessageBusError>;
}

/// Factory for subscriptions.
#[async_trait]
pub trait MessageBusSubscriber: Send + Sync {
    /// Join `group` on `topic`, resuming after its committed offset.
    async fn subscribe(
        &self,
        topic: Topic,
        group: &str,
    ) -> Result<Box<dyn BusSubscription>, MessageBusError>;
}

/// Fixture bus that accepts and discards every batch.
#[derive(Debug, Clone, Copy, Default)]
pub struct FixtureMessageBus;

#[async_trait]
impl MessageBus for FixtureMessageBus {
    async fn publish_batch(&self, _messages: Vec<BusMessage>) -> Result<(), MessageBusError> {
        Ok(())
    }
}
