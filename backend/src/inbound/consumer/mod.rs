//! Bus consumer loop.
//!
//! One loop drives one subscription into one [`EnvelopeHandler`]. Every
//! record is decoded, handled, logged, and then acknowledged according to the
//! loop's [`AckPolicy`]. Failed records are not retried: a poisoned record
//! must never stall the partition behind it.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::domain::envelope::Envelope;
use crate::domain::envelope_handler::{EnvelopeHandler, IngestError};
use crate::domain::ports::{BusSubscription, MessageBusError, ReceivedMessage, Topic};

/// Default pause after a failed poll before polling again.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);

/// When a processed record is acknowledged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckPolicy {
    /// Acknowledge regardless of the handler outcome.
    Always,
}

impl AckPolicy {
    /// Whether a record with `outcome` should be committed.
    pub fn should_ack(self, _outcome: &Delivery) -> bool {
        match self {
            Self::Always => true,
        }
    }
}

/// What happened to one record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// The handler applied the envelope.
    Handled,
    /// Decoding or handling failed.
    Rejected(IngestError),
    /// Tombstone; nothing to handle.
    Skipped,
}

/// Drives one subscription.
pub struct ConsumerLoop {
    topic: Topic,
    subscription: Box<dyn BusSubscription>,
    handler: Arc<dyn EnvelopeHandler>,
    policy: AckPolicy,
    retry_delay: Duration,
}

impl ConsumerLoop {
    pub fn new(
        topic: Topic,
        subscription: Box<dyn BusSubscription>,
        handler: Arc<dyn EnvelopeHandler>,
        policy: AckPolicy,
    ) -> Self {
        Self {
            topic,
            subscription,
            handler,
            policy,
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }

    /// Override the pause applied after a failed poll.
    #[must_use]
    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    /// Decode, handle, and acknowledge one record.
    pub async fn process_one(&mut self, message: ReceivedMessage) -> Delivery {
        let offset = message.offset;
        let delivery = match message.payload {
            None => {
                debug!(topic = %self.topic, offset, "skipping tombstone");
                Delivery::Skipped
            }
            Some(payload) => dispatch(self.topic, &self.handler, offset, payload).await,
        };

        if self.policy.should_ack(&delivery)
            && let Err(error) = self.subscription.ack(offset).await
        {
            warn!(topic = %self.topic, offset, %error, "failed to acknowledge record");
        }
        delivery
    }

    /// Pull one record and process it. `Ok(None)` means the subscription ended.
    ///
    /// # Errors
    ///
    /// Returns the subscription's poll error unchanged.
    pub async fn poll_once(&mut self) -> Result<Option<Delivery>, MessageBusError> {
        match self.subscription.next().await? {
            Some(message) => Ok(Some(self.process_one(message).await)),
            None => Ok(None),
        }
    }

    /// Consume until `shutdown` resolves or the subscription ends.
    pub async fn run<F>(mut self, shutdown: F)
    where
        F: Future<Output = ()> + Send,
    {
        tokio::pin!(shutdown);
        info!(topic = %self.topic, "consumer started");
        loop {
            let next = tokio::select! {
                biased;
                () = &mut shutdown => {
                    info!(topic = %self.topic, "consumer stopping");
                    return;
                }
                next = self.subscription.next() => next,
            };

            match next {
                Ok(Some(message)) => {
                    self.process_one(message).await;
                }
                Ok(None) | Err(MessageBusError::Closed) => {
                    info!(topic = %self.topic, "subscription closed");
                    return;
                }
                Err(error) => {
                    warn!(topic = %self.topic, %error, "poll failed; retrying");
                    tokio::time::sleep(self.retry_delay).await;
                }
            }
        }
    }
}

// Takes no `&ConsumerLoop`: subscriptions are `Send` but not `Sync`.
async fn dispatch(
    topic: Topic,
    handler: &Arc<dyn EnvelopeHandler>,
    offset: u64,
    payload: Value,
) -> Delivery {
    let envelope = match Envelope::from_value(payload) {
        Ok(envelope) => envelope,
        Err(error) => {
            let error = IngestError::malformed(error.to_string());
            warn!(
                topic = %topic,
                offset,
                kind = error.kind(),
                %error,
                "dropping undecodable record"
            );
            return Delivery::Rejected(error);
        }
    };

    match handler.handle(&envelope).await {
        Ok(()) => {
            debug!(
                topic = %topic,
                offset,
                envelope_id = %envelope.id,
                "record handled"
            );
            Delivery::Handled
        }
        Err(error) => {
            warn!(
                topic = %topic,
                offset,
                envelope_id = %envelope.id,
                event_type = %envelope.event_type,
                kind = error.kind(),
                %error,
                "record rejected"
            );
            Delivery::Rejected(error)
        }
    }
}
