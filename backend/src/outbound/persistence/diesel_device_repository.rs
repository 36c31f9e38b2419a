//! PostgreSQL-backed `DeviceRepository`.
//!
//! Devices are always loaded together with their definition; the pairing
//! orchestrator needs both to build the vehicle profile and pick a template.

use std::collections::BTreeMap;

use async_trait::async_trait;
use diesel::prelude::*;
use diesel_async::RunQueryDsl;
use tracing::warn;

use crate::domain::ports::{DeviceRepository, DeviceRepositoryError};
use crate::domain::{DeviceDefinition, DeviceId, Powertrain, UserDevice, UserId, VehicleNft};

use super::error_mapping::{map_diesel_error, map_pool_error};
use super::models::{DeviceDefinitionRow, UserDeviceRow, VehicleNftRow};
use super::pool::DbPool;
use super::schema::{device_definitions, user_devices, vehicle_nfts};

/// Diesel implementation of device reads.
#[derive(Clone)]
pub struct DieselDeviceRepository {
    pool: DbPool,
}

impl DieselDeviceRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn map_error(error: diesel::result::Error) -> DeviceRepositoryError {
    map_diesel_error(
        error,
        DeviceRepositoryError::query,
        DeviceRepositoryError::connection,
    )
}

pub(crate) fn row_to_definition(row: DeviceDefinitionRow) -> DeviceDefinition {
    let style_template_ids = match serde_json::from_value::<BTreeMap<String, i64>>(
        row.style_template_ids,
    ) {
        Ok(styles) => styles,
        Err(error) => {
            warn!(definition_id = %row.id, %error, "ignoring malformed style templates");
            BTreeMap::new()
        }
    };
    DeviceDefinition {
        powertrain: Powertrain::parse_or_default(row.powertrain.as_deref()),
        id: row.id,
        make: row.make,
        model: row.model,
        year: row.year,
        template_id: row.template_id,
        make_template_id: row.make_template_id,
        style_template_ids,
    }
}

pub(crate) fn row_to_device(row: UserDeviceRow, definition: DeviceDefinitionRow) -> UserDevice {
    UserDevice {
        id: DeviceId::new(row.id),
        user_id: UserId::new(row.user_id),
        definition: row_to_definition(definition),
        vin: row.vin,
        vin_confirmed: row.vin_confirmed,
        name: row.name,
        style_id: row.device_style_id,
    }
}

/// Load a device and its definition over an existing connection.
pub(crate) async fn load_device<C>(
    conn: &mut C,
    id: &str,
) -> Result<Option<UserDevice>, diesel::result::Error>
where
    C: diesel_async::AsyncConnection<Backend = diesel::pg::Pg> + Send,
{
    let row: Option<(UserDeviceRow, DeviceDefinitionRow)> = user_devices::table
        .inner_join(device_definitions::table)
        .filter(user_devices::id.eq(id))
        .select((UserDeviceRow::as_select(), DeviceDefinitionRow::as_select()))
        .first(conn)
        .await
        .optional()?;
    Ok(row.map(|(device, definition)| row_to_device(device, definition)))
}

#[async_trait]
impl DeviceRepository for DieselDeviceRepository {
    async fn find_device(&self, id: &DeviceId) -> Result<Option<UserDevice>, DeviceRepositoryError> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|err| map_pool_error(err, DeviceRepositoryError::connection))?;
        load_device(&mut conn, id.as_str()).await.map_err(map_error)
    }

    async fn find_vehicle_by_token(
        &self,
        token_id: i64,
    ) -> Result<Option<VehicleNft>, DeviceRepositoryError> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|err| map_pool_error(err, DeviceRepositoryError::connection))?;
        let row: Option<VehicleNftRow> = vehicle_nfts::table
            .find(token_id)
            .select(VehicleNftRow::as_select())
            .first(&mut conn)
            .await
            .optional()
            .map_err(map_error)?;
        Ok(row.map(|row| VehicleNft {
            token_id: row.token_id,
            device_id: row.user_device_id.map(DeviceId::new),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    fn definition_row(style_template_ids: serde_json::Value) -> DeviceDefinitionRow {
        DeviceDefinitionRow {
            id: "def-1".to_owned(),
            make: "Ford".to_owned(),
            model: "Mustang Mach-E".to_owned(),
            year: 2022,
            powertrain: Some("BEV".to_owned()),
            template_id: None,
            make_template_id: Some(7),
            style_template_ids,
        }
    }

    #[rstest]
    fn definitions_decode_style_templates_and_powertrain() {
        let definition = row_to_definition(definition_row(json!({ "premium": 11 })));

        assert_eq!(definition.powertrain, Powertrain::Bev);
        assert_eq!(definition.style_template_ids.get("premium"), Some(&11));
        assert_eq!(definition.make_template_id, Some(7));
    }

    #[rstest]
    fn malformed_style_templates_are_ignored() {
        let definition = row_to_definition(definition_row(json!(["not", "a", "map"])));
        assert!(definition.style_template_ids.is_empty());
    }
}
