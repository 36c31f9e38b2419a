//! Internal Diesel row structs.
//!
//! These types never leave the persistence layer; repositories convert them
//! to domain values before returning.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde_json::Value;

use super::schema::{
    bus_messages, device_definitions, integrations, user_device_api_integrations,
    user_device_data, user_devices, vehicle_nfts,
};

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = integrations)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub(crate) struct IntegrationRow {
    pub id: String,
    pub vendor: String,
    pub integration_type: String,
    pub style: String,
    pub metadata: Value,
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = device_definitions)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub(crate) struct DeviceDefinitionRow {
    pub id: String,
    pub make: String,
    pub model: String,
    pub year: i32,
    pub powertrain: Option<String>,
    pub template_id: Option<i64>,
    pub make_template_id: Option<i64>,
    pub style_template_ids: Value,
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = user_devices)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub(crate) struct UserDeviceRow {
    pub id: String,
    pub user_id: String,
    pub vin: Option<String>,
    pub vin_confirmed: bool,
    pub name: Option<String>,
    pub device_style_id: Option<String>,
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = vehicle_nfts)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub(crate) struct VehicleNftRow {
    pub token_id: i64,
    pub user_device_id: Option<String>,
}

// ---------------------------------------------------------------------------
// Integration links
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = user_device_api_integrations)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub(crate) struct LinkRow {
    pub user_device_id: String,
    pub integration_id: String,
    pub external_id: Option<String>,
    pub status: String,
    pub task_id: Option<String>,
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub access_expires_at: Option<DateTime<Utc>>,
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = user_device_api_integrations)]
pub(crate) struct NewLinkRow<'a> {
    pub user_device_id: &'a str,
    pub integration_id: &'a str,
    pub external_id: Option<&'a str>,
    pub status: &'a str,
    pub task_id: Option<&'a str>,
    pub access_token: Option<&'a str>,
    pub refresh_token: Option<&'a str>,
    pub access_expires_at: Option<DateTime<Utc>>,
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Every mutable link column. `None` writes `NULL`.
#[derive(Debug, Clone, AsChangeset)]
#[diesel(table_name = user_device_api_integrations)]
#[diesel(treat_none_as_null = true)]
pub(crate) struct LinkUpdate<'a> {
    pub external_id: Option<&'a str>,
    pub status: &'a str,
    pub task_id: Option<&'a str>,
    pub access_token: Option<&'a str>,
    pub refresh_token: Option<&'a str>,
    pub access_expires_at: Option<DateTime<Utc>>,
    pub metadata: Value,
    pub updated_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Snapshots
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = user_device_data)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub(crate) struct SnapshotRow {
    pub user_device_id: String,
    pub integration_id: String,
    pub data: Option<Value>,
    pub error_data: Option<Value>,
    pub last_odometer_event_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = user_device_data)]
pub(crate) struct SnapshotWrite<'a> {
    pub user_device_id: &'a str,
    pub integration_id: &'a str,
    pub data: Option<&'a Value>,
    pub error_data: Option<&'a Value>,
    pub last_odometer_event_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Bus log
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = bus_messages)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub(crate) struct BusMessageRow {
    pub id: i64,
    pub topic: String,
    pub message_key: Option<String>,
    pub payload: Option<Value>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = bus_messages)]
pub(crate) struct NewBusMessageRow {
    pub topic: &'static str,
    pub message_key: Option<String>,
    pub payload: Option<Value>,
    pub published_at: DateTime<Utc>,
}
