//! PostgreSQL-backed `IntegrationLinkRepository`.
//!
//! Tokens are stored exactly as handed over: the domain encrypts them before
//! they reach this adapter. Link metadata is a JSONB document; the AutoPi
//! unit lookup filters on its `autoPiUnitId` member.

use async_trait::async_trait;
use diesel::dsl::sql;
use diesel::prelude::*;
use diesel::sql_types::{Bool, Text};
use diesel_async::pooled_connection::bb8::PooledConnection;
use diesel_async::{AsyncPgConnection, RunQueryDsl};

use crate::domain::ports::{IntegrationLinkRepository, LinkRepositoryError};
use crate::domain::{
    DeviceId, EncryptedToken, IntegrationId, IntegrationLink, LinkMetadata, LinkStatus, TaskId,
};

use super::error_mapping::{is_unique_violation, map_diesel_error, map_pool_error};
use super::models::{LinkRow, LinkUpdate, NewLinkRow};
use super::pool::DbPool;
use super::schema::user_device_api_integrations as links;

const TERMINAL_STATUSES: [&str; 2] = [
    LinkStatus::Failed.as_str(),
    LinkStatus::DuplicateIntegration.as_str(),
];

/// Diesel implementation of link persistence.
#[derive(Clone)]
pub struct DieselLinkRepository {
    pool: DbPool,
}

impl DieselLinkRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn map_error(error: diesel::result::Error) -> LinkRepositoryError {
    map_diesel_error(
        error,
        LinkRepositoryError::query,
        LinkRepositoryError::connection,
    )
}

pub(crate) fn row_to_link(row: LinkRow) -> Result<IntegrationLink, LinkRepositoryError> {
    let status: LinkStatus = row
        .status
        .parse()
        .map_err(|_| LinkRepositoryError::query(format!("unknown link status {}", row.status)))?;
    let metadata = LinkMetadata::from_value(row.metadata)
        .map_err(|err| LinkRepositoryError::query(format!("link metadata: {err}")))?;
    Ok(IntegrationLink {
        device_id: DeviceId::new(row.user_device_id),
        integration_id: IntegrationId::new(row.integration_id),
        external_id: row.external_id,
        status,
        task_id: row.task_id.map(TaskId::new),
        access_token: row.access_token.map(EncryptedToken::new),
        refresh_token: row.refresh_token.map(EncryptedToken::new),
        access_expires_at: row.access_expires_at,
        metadata,
        created_at: row.created_at,
        updated_at: row.updated_at,
    })
}

pub(crate) fn link_update(link: &IntegrationLink) -> LinkUpdate<'_> {
    LinkUpdate {
        external_id: link.external_id.as_deref(),
        status: link.status.as_str(),
        task_id: link.task_id.as_ref().map(TaskId::as_str),
        access_token: link.access_token.as_ref().map(EncryptedToken::as_str),
        refresh_token: link.refresh_token.as_ref().map(EncryptedToken::as_str),
        access_expires_at: link.access_expires_at,
        metadata: link.metadata.to_value(),
        updated_at: link.updated_at,
    }
}

impl DieselLinkRepository {
    async fn connection(
        &self,
    ) -> Result<PooledConnection<'_, AsyncPgConnection>, LinkRepositoryError> {
        self.pool
            .get()
            .await
            .map_err(|err| map_pool_error(err, LinkRepositoryError::connection))
    }
}

fn decode(row: Option<LinkRow>) -> Result<Option<IntegrationLink>, LinkRepositoryError> {
    row.map(row_to_link).transpose()
}

#[async_trait]
impl IntegrationLinkRepository for DieselLinkRepository {
    async fn find(
        &self,
        device_id: &DeviceId,
        integration_id: &IntegrationId,
    ) -> Result<Option<IntegrationLink>, LinkRepositoryError> {
        let mut conn = self.connection().await?;
        let row: Option<LinkRow> = links::table
            .find((device_id.as_str(), integration_id.as_str()))
            .select(LinkRow::as_select())
            .first(&mut conn)
            .await
            .optional()
            .map_err(map_error)?;
        decode(row)
    }

    async fn find_by_task_id(
        &self,
        task_id: &TaskId,
    ) -> Result<Option<IntegrationLink>, LinkRepositoryError> {
        let mut conn = self.connection().await?;
        let row: Option<LinkRow> = links::table
            .filter(links::task_id.eq(task_id.as_str()))
            .select(LinkRow::as_select())
            .first(&mut conn)
            .await
            .optional()
            .map_err(map_error)?;
        decode(row)
    }

    async fn find_by_autopi_unit(
        &self,
        integration_id: &IntegrationId,
        unit_id: &str,
    ) -> Result<Option<IntegrationLink>, LinkRepositoryError> {
        let mut conn = self.connection().await?;
        let row: Option<LinkRow> = links::table
            .filter(links::integration_id.eq(integration_id.as_str()))
            .filter(sql::<Bool>("metadata ->> 'autoPiUnitId' = ").bind::<Text, _>(unit_id))
            .filter(links::status.ne_all(TERMINAL_STATUSES))
            .order_by(links::updated_at.desc())
            .select(LinkRow::as_select())
            .first(&mut conn)
            .await
            .optional()
            .map_err(map_error)?;
        decode(row)
    }

    async fn insert(&self, link: &IntegrationLink) -> Result<(), LinkRepositoryError> {
        let mut conn = self.connection().await?;
        let row = NewLinkRow {
            user_device_id: link.device_id.as_str(),
            integration_id: link.integration_id.as_str(),
            external_id: link.external_id.as_deref(),
            status: link.status.as_str(),
            task_id: link.task_id.as_ref().map(TaskId::as_str),
            access_token: link.access_token.as_ref().map(EncryptedToken::as_str),
            refresh_token: link.refresh_token.as_ref().map(EncryptedToken::as_str),
            access_expires_at: link.access_expires_at,
            metadata: link.metadata.to_value(),
            created_at: link.created_at,
            updated_at: link.updated_at,
        };
        diesel::insert_into(links::table)
            .values(&row)
            .execute(&mut conn)
            .await
            .map(|_| ())
            .map_err(|err| {
                if is_unique_violation(&err) {
                    LinkRepositoryError::duplicate(
                        link.device_id.as_str(),
                        link.integration_id.as_str(),
                    )
                } else {
                    map_error(err)
                }
            })
    }

    async fn update(&self, link: &IntegrationLink) -> Result<(), LinkRepositoryError> {
        let mut conn = self.connection().await?;
        let updated = diesel::update(
            links::table.find((link.device_id.as_str(), link.integration_id.as_str())),
        )
        .set(&link_update(link))
        .execute(&mut conn)
        .await
        .map_err(map_error)?;
        if updated == 0 {
            return Err(LinkRepositoryError::missing(
                link.device_id.as_str(),
                link.integration_id.as_str(),
            ));
        }
        Ok(())
    }
}
