//! In-process message bus.
//!
//! Keeps a retained log per topic with monotonically increasing offsets and
//! wakes subscribers through a `watch` channel whenever a batch lands.
//! Consumer-group offsets are shared across subscriptions of the same group,
//! so a resubscribe resumes after the last acknowledged record.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::debug;

use crate::domain::ports::{
    BusMessage, BusSubscription, MessageBus, MessageBusError, MessageBusSubscriber,
    ReceivedMessage, Topic,
};

#[derive(Debug, Default)]
struct BusState {
    next_offset: u64,
    logs: HashMap<Topic, Vec<ReceivedMessage>>,
    committed: HashMap<(Topic, String), u64>,
    closed: bool,
}

/// Retained, compactable bus living in process memory.
#[derive(Debug, Clone)]
pub struct InMemoryMessageBus {
    state: Arc<Mutex<BusState>>,
    changes: Arc<watch::Sender<u64>>,
}

impl Default for InMemoryMessageBus {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryMessageBus {
    pub fn new() -> Self {
        let (changes, _) = watch::channel(0);
        Self {
            state: Arc::new(Mutex::new(BusState::default())),
            changes: Arc::new(changes),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, BusState>, MessageBusError> {
        lock_state(&self.state)
    }

    /// Every retained record on `topic`, oldest first.
    pub fn records(&self, topic: Topic) -> Result<Vec<ReceivedMessage>, MessageBusError> {
        Ok(self.lock()?.logs.get(&topic).cloned().unwrap_or_default())
    }

    /// Drop superseded keyed records and keys whose latest value is a
    /// tombstone. Keyless records are kept. Returns the number removed.
    pub fn compact(&self, topic: Topic) -> Result<usize, MessageBusError> {
        let mut state = self.lock()?;
        let Some(log) = state.logs.get_mut(&topic) else {
            return Ok(0);
        };
        let before = log.len();
        let mut seen = HashSet::new();
        let mut kept: Vec<ReceivedMessage> = Vec::with_capacity(before);
        for record in log.drain(..).rev() {
            match record.key.as_deref() {
                None => kept.push(record),
                Some(key) => {
                    if seen.insert(key.to_owned()) && record.payload.is_some() {
                        kept.push(record);
                    }
                }
            }
        }
        kept.reverse();
        *log = kept;
        let removed = before - log.len();
        debug!(%topic, removed, "compacted in-memory topic");
        Ok(removed)
    }

    /// Stop accepting publishes and end every subscription once drained.
    pub fn close(&self) -> Result<(), MessageBusError> {
        self.lock()?.closed = true;
        self.changes.send_modify(|version| *version += 1);
        Ok(())
    }
}

fn lock_state(state: &Mutex<BusState>) -> Result<MutexGuard<'_, BusState>, MessageBusError> {
    state
        .lock()
        .map_err(|_| MessageBusError::unavailable("in-memory bus state poisoned"))
}

#[async_trait]
impl MessageBus for InMemoryMessageBus {
    async fn publish_batch(&self, messages: Vec<BusMessage>) -> Result<(), MessageBusError> {
        {
            let mut state = self.lock()?;
            if state.closed {
                return Err(MessageBusError::closed());
            }
            for message in messages {
                let offset = state.next_offset;
                state.next_offset += 1;
                state
                    .logs
                    .entry(message.topic)
                    .or_default()
                    .push(ReceivedMessage {
                        offset,
                        topic: message.topic,
                        key: message.key,
                        payload: message.payload,
                    });
            }
        }
        self.changes.send_modify(|version| *version += 1);
        Ok(())
    }
}

#[async_trait]
impl MessageBusSubscriber for InMemoryMessageBus {
    async fn subscribe(
        &self,
        topic: Topic,
        group: &str,
    ) -> Result<Box<dyn BusSubscription>, MessageBusError> {
        let cursor = self
            .lock()?
            .committed
            .get(&(topic, group.to_owned()))
            .copied()
            .unwrap_or(0);
        Ok(Box::new(InMemorySubscription {
            state: Arc::clone(&self.state),
            changes: self.changes.subscribe(),
            topic,
            group: group.to_owned(),
            cursor,
        }))
    }
}

struct InMemorySubscription {
    state: Arc<Mutex<BusState>>,
    changes: watch::Receiver<u64>,
    topic: Topic,
    group: String,
    cursor: u64,
}

impl InMemorySubscription {
    fn poll(&mut self) -> Result<Poll, MessageBusError> {
        let state = lock_state(&self.state)?;
        let next = state
            .logs
            .get(&self.topic)
            .and_then(|log| log.iter().find(|record| record.offset >= self.cursor))
            .cloned();
        Ok(match next {
            Some(record) => Poll::Ready(record),
            None if state.closed => Poll::Closed,
            None => Poll::Empty,
        })
    }
}

enum Poll {
    Ready(ReceivedMessage),
    Empty,
    Closed,
}

#[async_trait]
impl BusSubscription for InMemorySubscription {
    async fn next(&mut self) -> Result<Option<ReceivedMessage>, MessageBusError> {
        loop {
            self.changes.borrow_and_update();
            match self.poll()? {
                Poll::Ready(record) => {
                    self.cursor = record.offset + 1;
                    return Ok(Some(record));
                }
                Poll::Closed => return Ok(None),
                Poll::Empty => {
                    if self.changes.changed().await.is_err() {
                        return Ok(None);
                    }
                }
            }
        }
    }

    async fn ack(&mut self, offset: u64) -> Result<(), MessageBusError> {
        let mut state = lock_state(&self.state)?;
        let committed = state
            .committed
            .entry((self.topic, self.group.clone()))
            .or_insert(0);
        *committed = (*committed).max(offset + 1);
        Ok(())
    }
}
