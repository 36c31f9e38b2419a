//! Payloads carried in task-control envelopes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Transport-encrypted credentials for a running task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialData {
    pub task_id: String,
    pub user_device_id: String,
    pub integration_id: String,
    pub access_token: String,
    pub refresh_token: String,
    pub expiry: DateTime<Utc>,
}

/// Smartcar vehicle identifiers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SmartcarIdentifiers {
    pub id: String,
}

/// Smartcar task definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SmartcarTask {
    pub task_id: String,
    pub user_device_id: String,
    pub integration_id: String,
    pub identifiers: SmartcarIdentifiers,
    pub paths: Vec<String>,
}

/// Tesla vehicle identifiers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeslaIdentifiers {
    pub id: String,
    pub vehicle_id: i64,
}

/// Tesla task definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeslaTask {
    pub task_id: String,
    pub user_device_id: String,
    pub integration_id: String,
    pub identifiers: TeslaIdentifiers,
}

/// Stop notice for a running task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StopTask {
    pub task_id: String,
    pub user_device_id: String,
    pub integration_id: String,
}

/// Control-plane status report produced by a poller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskStatusData {
    pub task_id: String,
    pub user_device_id: String,
    pub integration_id: String,
    pub status: String,
}

/// Status value reporting rejected credentials.
pub const AUTHENTICATION_FAILURE_STATUS: &str = "AuthenticationFailure";
