//! PostgreSQL-backed `IntegrationRepository`.

use async_trait::async_trait;
use diesel::prelude::*;
use diesel_async::RunQueryDsl;
use tracing::warn;

use crate::domain::ports::{IntegrationRepository, IntegrationRepositoryError};
use crate::domain::{Integration, IntegrationId, IntegrationStyle, IntegrationType, TemplateDefaults};

use super::error_mapping::{map_diesel_error, map_pool_error};
use super::models::IntegrationRow;
use super::pool::DbPool;
use super::schema::integrations;

/// Diesel implementation of the integration reference table.
#[derive(Clone)]
pub struct DieselIntegrationRepository {
    pool: DbPool,
}

impl DieselIntegrationRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn parse_type(raw: &str, id: &str) -> IntegrationType {
    match raw {
        "Hardware" => IntegrationType::Hardware,
        "API" => IntegrationType::Api,
        other => {
            warn!(integration_id = id, value = other, "unrecognised integration type, assuming API");
            IntegrationType::Api
        }
    }
}

fn parse_style(raw: &str, id: &str) -> IntegrationStyle {
    match raw {
        "Addon" => IntegrationStyle::Addon,
        "OEM" => IntegrationStyle::Oem,
        other => {
            warn!(integration_id = id, value = other, "unrecognised integration style, assuming OEM");
            IntegrationStyle::Oem
        }
    }
}

pub(crate) fn row_to_integration(row: IntegrationRow) -> Integration {
    let integration_type = parse_type(&row.integration_type, &row.id);
    let style = parse_style(&row.style, &row.id);
    let defaults = match serde_json::from_value::<TemplateDefaults>(row.metadata) {
        Ok(defaults) => defaults,
        Err(error) => {
            warn!(integration_id = %row.id, %error, "ignoring malformed integration metadata");
            TemplateDefaults::default()
        }
    };
    Integration::new(IntegrationId::new(row.id), row.vendor, integration_type, style)
        .with_template_defaults(defaults)
}

#[async_trait]
impl IntegrationRepository for DieselIntegrationRepository {
    async fn list_integrations(&self) -> Result<Vec<Integration>, IntegrationRepositoryError> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|err| map_pool_error(err, IntegrationRepositoryError::connection))?;

        let rows: Vec<IntegrationRow> = integrations::table
            .select(IntegrationRow::as_select())
            .order_by(integrations::id)
            .load(&mut conn)
            .await
            .map_err(|err| {
                map_diesel_error(
                    err,
                    IntegrationRepositoryError::query,
                    IntegrationRepositoryError::connection,
                )
            })?;

        Ok(rows.into_iter().map(row_to_integration).collect())
    }
}
