//! PostgreSQL-backed `DeviceStatusStore`.
//!
//! One ingestion is one transaction: the device row is locked with
//! `SELECT ... FOR UPDATE`, the link and snapshot are read, the merge plan is
//! computed, and the snapshot upsert plus any link promotion are written
//! before commit. Concurrent envelopes for the same device therefore merge
//! one after the other instead of overwriting each other.

use async_trait::async_trait;
use chrono::{DateTime, SubsecRound, Utc};
use diesel::prelude::*;
use diesel::upsert::excluded;
use diesel_async::scoped_futures::ScopedFutureExt;
use diesel_async::{AsyncConnection, RunQueryDsl};

use crate::domain::ports::{
    DeviceStatusStore, DeviceStatusStoreError, IngestionContext, IngestionOutcome, SnapshotMerge,
};
use crate::domain::{DeviceId, DeviceStatusSnapshot, IntegrationId, IntegrationLink};

use super::diesel_device_repository::load_device;
use super::diesel_link_repository::{link_update, row_to_link};
use super::error_mapping::{map_diesel_error, map_pool_error};
use super::models::{LinkRow, SnapshotRow, SnapshotWrite};
use super::pool::DbPool;
use super::schema::{user_device_api_integrations as links, user_device_data, user_devices};

/// Diesel implementation of snapshot persistence.
#[derive(Clone)]
pub struct DieselDeviceStatusStore {
    pool: DbPool,
}

impl DieselDeviceStatusStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn map_error(error: diesel::result::Error) -> DeviceStatusStoreError {
    map_diesel_error(
        error,
        DeviceStatusStoreError::query,
        DeviceStatusStoreError::connection,
    )
}

fn row_to_snapshot(row: SnapshotRow) -> DeviceStatusSnapshot {
    DeviceStatusSnapshot {
        device_id: DeviceId::new(row.user_device_id),
        integration_id: IntegrationId::new(row.integration_id),
        data: row.data,
        error_data: row.error_data,
        last_odometer_event_at: row.last_odometer_event_at,
        updated_at: row.updated_at,
    }
}

fn snapshot_write(snapshot: &DeviceStatusSnapshot) -> SnapshotWrite<'_> {
    SnapshotWrite {
        user_device_id: snapshot.device_id.as_str(),
        integration_id: snapshot.integration_id.as_str(),
        data: snapshot.data.as_ref(),
        error_data: snapshot.error_data.as_ref(),
        last_odometer_event_at: snapshot.last_odometer_event_at,
        updated_at: snapshot.updated_at,
    }
}

/// Transaction result; `None` when the device row does not exist.
type Applied = Option<IngestionOutcome>;

/// Link rows that fail to decode abort the transaction as a query error.
#[derive(Debug)]
enum ApplyError {
    Diesel(diesel::result::Error),
    Link(String),
}

impl From<diesel::result::Error> for ApplyError {
    fn from(error: diesel::result::Error) -> Self {
        Self::Diesel(error)
    }
}

#[async_trait]
impl DeviceStatusStore for DieselDeviceStatusStore {
    async fn apply_ingestion(
        &self,
        device_id: &DeviceId,
        integration_id: &IntegrationId,
        merge: &dyn SnapshotMerge,
    ) -> Result<IngestionOutcome, DeviceStatusStoreError> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|err| map_pool_error(err, DeviceStatusStoreError::connection))?;

        let applied: Result<Applied, ApplyError> = conn
            .transaction(|conn| {
                async move {
                    let locked: Option<String> = user_devices::table
                        .find(device_id.as_str())
                        .select(user_devices::id)
                        .for_update()
                        .first(conn)
                        .await
                        .optional()?;
                    if locked.is_none() {
                        return Ok(None);
                    }
                    let Some(device) = load_device(conn, device_id.as_str()).await? else {
                        return Ok(None);
                    };

                    let link_row: Option<LinkRow> = links::table
                        .find((device_id.as_str(), integration_id.as_str()))
                        .select(LinkRow::as_select())
                        .for_update()
                        .first(conn)
                        .await
                        .optional()?;
                    let link: Option<IntegrationLink> = link_row
                        .map(row_to_link)
                        .transpose()
                        .map_err(|err| ApplyError::Link(err.to_string()))?;
                    let snapshot = user_device_data::table
                        .find((device_id.as_str(), integration_id.as_str()))
                        .select(SnapshotRow::as_select())
                        .first(conn)
                        .await
                        .optional()?
                        .map(row_to_snapshot);

                    let context = IngestionContext {
                        device,
                        link,
                        snapshot,
                    };
                    let plan = merge.plan(&context);

                    let write = snapshot_write(&plan.snapshot);
                    diesel::insert_into(user_device_data::table)
                        .values(&write)
                        .on_conflict((
                            user_device_data::user_device_id,
                            user_device_data::integration_id,
                        ))
                        .do_update()
                        .set((
                            user_device_data::data.eq(excluded(user_device_data::data)),
                            user_device_data::error_data
                                .eq(excluded(user_device_data::error_data)),
                            user_device_data::last_odometer_event_at
                                .eq(excluded(user_device_data::last_odometer_event_at)),
                            user_device_data::updated_at.eq(excluded(user_device_data::updated_at)),
                        ))
                        .execute(conn)
                        .await?;

                    if let Some(promoted) = plan.link.as_ref() {
                        diesel::update(links::table.find((
                            promoted.device_id.as_str(),
                            promoted.integration_id.as_str(),
                        )))
                        .set(&link_update(promoted))
                        .execute(conn)
                        .await?;
                    }

                    Ok(Some(IngestionOutcome {
                        device: context.device,
                        plan,
                    }))
                }
                .scope_boxed()
            })
            .await;

        match applied {
            Ok(Some(outcome)) => Ok(outcome),
            Ok(None) => Err(DeviceStatusStoreError::device_not_found(device_id.as_str())),
            Err(ApplyError::Diesel(err)) => Err(map_error(err)),
            Err(ApplyError::Link(message)) => Err(DeviceStatusStoreError::query(message)),
        }
    }

    async fn release_odometer_stamp(
        &self,
        device_id: &DeviceId,
        integration_id: &IntegrationId,
        stamped_at: DateTime<Utc>,
        previous: Option<DateTime<Utc>>,
    ) -> Result<bool, DeviceStatusStoreError> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|err| map_pool_error(err, DeviceStatusStoreError::connection))?;
        // Postgres keeps microseconds; the stored stamp was truncated on write.
        let stored = stamped_at.trunc_subsecs(6);
        let updated = diesel::update(
            user_device_data::table
                .find((device_id.as_str(), integration_id.as_str()))
                .filter(user_device_data::last_odometer_event_at.eq(stored)),
        )
        .set(user_device_data::last_odometer_event_at.eq(previous))
        .execute(&mut conn)
        .await
        .map_err(map_error)?;
        Ok(updated > 0)
    }

    async fn find_snapshot(
        &self,
        device_id: &DeviceId,
        integration_id: &IntegrationId,
    ) -> Result<Option<DeviceStatusSnapshot>, DeviceStatusStoreError> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|err| map_pool_error(err, DeviceStatusStoreError::connection))?;
        let row: Option<SnapshotRow> = user_device_data::table
            .find((device_id.as_str(), integration_id.as_str()))
            .select(SnapshotRow::as_select())
            .first(&mut conn)
            .await
            .optional()
            .map_err(map_error)?;
        Ok(row.map(row_to_snapshot))
    }
}
