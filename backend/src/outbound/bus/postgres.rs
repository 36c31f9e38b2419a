//! Message bus backed by an append-only PostgreSQL table.
//!
//! Records are rows of `bus_messages`; the `id` sequence is the offset.
//! A batch is inserted in one transaction that first takes a table lock, so
//! batches commit in id order and become visible atomically; pollers never
//! observe a gap that a slower writer fills in later.
//! Subscriptions poll for rows past their cursor and commit progress to
//! `bus_consumer_offsets`, never moving a group's offset backwards.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use diesel::prelude::*;
use diesel::sql_types::{BigInt, Text};
use diesel_async::scoped_futures::ScopedFutureExt;
use diesel_async::{AsyncConnection, RunQueryDsl};
use mockable::Clock;
use tracing::{debug, info, warn};

use crate::domain::ports::{
    BusMessage, BusSubscription, MessageBus, MessageBusError, MessageBusSubscriber,
    ReceivedMessage, Topic,
};
use crate::outbound::persistence::models::{BusMessageRow, NewBusMessageRow};
use crate::outbound::persistence::schema::{bus_consumer_offsets, bus_messages};
use crate::outbound::persistence::{DbPool, map_diesel_error, map_pool_error};

/// Default pause between empty polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Default number of rows fetched per poll.
pub const DEFAULT_BATCH_SIZE: i64 = 100;

const COMPACT_SQL: &str = "DELETE FROM bus_messages AS m \
     WHERE m.topic = $1 AND m.message_key IS NOT NULL AND ( \
         m.payload IS NULL OR EXISTS ( \
             SELECT 1 FROM bus_messages AS newer \
             WHERE newer.topic = m.topic \
               AND newer.message_key = m.message_key \
               AND newer.id > m.id))";

const LOCK_LOG_SQL: &str = "LOCK TABLE bus_messages IN SHARE ROW EXCLUSIVE MODE";

const COMMIT_OFFSET_SQL: &str = "INSERT INTO bus_consumer_offsets \
         (topic, consumer_group, next_offset, updated_at) \
     VALUES ($1, $2, $3, now()) \
     ON CONFLICT (topic, consumer_group) DO UPDATE SET \
         next_offset = GREATEST(bus_consumer_offsets.next_offset, EXCLUDED.next_offset), \
         updated_at = now()";

fn map_error(error: diesel::result::Error) -> MessageBusError {
    map_diesel_error(
        error,
        |message| MessageBusError::rejected(message),
        |message| MessageBusError::unavailable(message),
    )
}

fn checkout_error(error: crate::outbound::persistence::PoolError) -> MessageBusError {
    map_pool_error(error, MessageBusError::unavailable)
}

fn to_offset(id: i64) -> Result<u64, MessageBusError> {
    u64::try_from(id).map_err(|_| MessageBusError::rejected(format!("negative offset {id}")))
}

fn to_id(offset: u64) -> Result<i64, MessageBusError> {
    i64::try_from(offset).map_err(|_| MessageBusError::rejected(format!("offset {offset} overflows")))
}

fn row_to_message(row: BusMessageRow) -> Result<ReceivedMessage, MessageBusError> {
    let topic = Topic::from_name(&row.topic)
        .ok_or_else(|| MessageBusError::rejected(format!("unknown topic {}", row.topic)))?;
    Ok(ReceivedMessage {
        offset: to_offset(row.id)?,
        topic,
        key: row.message_key,
        payload: row.payload,
    })
}

/// Bus adapter over the shared database pool.
#[derive(Clone)]
pub struct PostgresMessageBus {
    pool: DbPool,
    clock: Arc<dyn Clock>,
    poll_interval: Duration,
    batch_size: i64,
}

impl PostgresMessageBus {
    pub fn new(pool: DbPool, clock: Arc<dyn Clock>) -> Self {
        Self {
            pool,
            clock,
            poll_interval: DEFAULT_POLL_INTERVAL,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    #[must_use]
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    #[must_use]
    pub fn with_batch_size(mut self, batch_size: i64) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Delete superseded keyed rows and keys whose latest row is a tombstone.
    ///
    /// # Errors
    ///
    /// Returns [`MessageBusError::Unavailable`] when the database cannot be
    /// reached.
    pub async fn compact(&self, topic: Topic) -> Result<usize, MessageBusError> {
        let mut conn = self.pool.get().await.map_err(checkout_error)?;
        let removed = diesel::sql_query(COMPACT_SQL)
            .bind::<Text, _>(topic.name())
            .execute(&mut conn)
            .await
            .map_err(map_error)?;
        info!(%topic, removed, "compacted bus topic");
        Ok(removed)
    }
}

#[async_trait]
impl MessageBus for PostgresMessageBus {
    async fn publish_batch(&self, messages: Vec<BusMessage>) -> Result<(), MessageBusError> {
        if messages.is_empty() {
            return Ok(());
        }
        let now = self.clock.utc();
        let rows: Vec<NewBusMessageRow> = messages
            .into_iter()
            .map(|message| NewBusMessageRow {
                topic: message.topic.name(),
                message_key: message.key,
                payload: message.payload,
                published_at: now,
            })
            .collect();
        let mut conn = self.pool.get().await.map_err(checkout_error)?;
        let inserted = conn
            .transaction(|conn| {
                async move {
                    diesel::sql_query(LOCK_LOG_SQL).execute(conn).await?;
                    diesel::insert_into(bus_messages::table)
                        .values(&rows)
                        .execute(conn)
                        .await
                }
                .scope_boxed()
            })
            .await
            .map_err(map_error)?;
        debug!(inserted, "published bus batch");
        Ok(())
    }
}

#[async_trait]
impl MessageBusSubscriber for PostgresMessageBus {
    async fn subscribe(
        &self,
        topic: Topic,
        group: &str,
    ) -> Result<Box<dyn BusSubscription>, MessageBusError> {
        let mut conn = self.pool.get().await.map_err(checkout_error)?;
        let committed: Option<i64> = bus_consumer_offsets::table
            .find((topic.name(), group))
            .select(bus_consumer_offsets::next_offset)
            .first(&mut conn)
            .await
            .optional()
            .map_err(map_error)?;
        Ok(Box::new(PostgresSubscription {
            pool: self.pool.clone(),
            topic,
            group: group.to_owned(),
            cursor: committed.unwrap_or(0),
            buffer: VecDeque::new(),
            poll_interval: self.poll_interval,
            batch_size: self.batch_size,
        }))
    }
}

struct PostgresSubscription {
    pool: DbPool,
    topic: Topic,
    group: String,
    /// Lowest row id not yet handed out.
    cursor: i64,
    buffer: VecDeque<ReceivedMessage>,
    poll_interval: Duration,
    batch_size: i64,
}

impl PostgresSubscription {
    async fn fetch(&mut self) -> Result<(), MessageBusError> {
        let mut conn = self.pool.get().await.map_err(checkout_error)?;
        let rows: Vec<BusMessageRow> = bus_messages::table
            .filter(bus_messages::topic.eq(self.topic.name()))
            .filter(bus_messages::id.ge(self.cursor))
            .order_by(bus_messages::id.asc())
            .limit(self.batch_size)
            .select(BusMessageRow::as_select())
            .load(&mut conn)
            .await
            .map_err(map_error)?;
        for row in rows {
            self.cursor = row.id + 1;
            match row_to_message(row) {
                Ok(message) => self.buffer.push_back(message),
                Err(error) => warn!(topic = %self.topic, %error, "skipping undecodable bus row"),
            }
        }
        Ok(())
    }
}

#[async_trait]
impl BusSubscription for PostgresSubscription {
    async fn next(&mut self) -> Result<Option<ReceivedMessage>, MessageBusError> {
        loop {
            if let Some(message) = self.buffer.pop_front() {
                return Ok(Some(message));
            }
            self.fetch().await?;
            if self.buffer.is_empty() {
                tokio::time::sleep(self.poll_interval).await;
            }
        }
    }

    async fn ack(&mut self, offset: u64) -> Result<(), MessageBusError> {
        let next_offset = to_id(offset)? + 1;
        let mut conn = self.pool.get().await.map_err(checkout_error)?;
        diesel::sql_query(COMMIT_OFFSET_SQL)
            .bind::<Text, _>(self.topic.name())
            .bind::<Text, _>(self.group.as_str())
            .bind::<BigInt, _>(next_offset)
            .execute(&mut conn)
            .await
            .map_err(map_error)?;
        Ok(())
    }
}
