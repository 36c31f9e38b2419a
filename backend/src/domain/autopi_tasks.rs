//! AutoPi registration and VIN-confirmation messages.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use mockable::Clock;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::domain::envelope::{Envelope, event_types};
use crate::domain::identifiers::{DeviceId, IntegrationId, TaskId};
use crate::domain::ports::{BusMessage, MessageBus, MessageBusError, Topic};

/// Binds an external unit to a device for downstream consumers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnitRegistration {
    pub unit_id: String,
    pub user_device_id: String,
    pub integration_id: String,
}

/// Asks a worker to read the VIN from the unit and confirm it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VinQueryTask {
    pub task_id: String,
    pub unit_id: String,
    pub user_device_id: String,
    pub integration_id: String,
}

/// Publishes AutoPi control messages.
#[derive(Clone)]
pub struct AutoPiTaskService {
    bus: Arc<dyn MessageBus>,
    clock: Arc<dyn Clock>,
}

impl AutoPiTaskService {
    pub fn new(bus: Arc<dyn MessageBus>, clock: Arc<dyn Clock>) -> Self {
        Self { bus, clock }
    }

    /// Publish the registration of `unit_id` against `device_id`.
    pub async fn register_unit(
        &self,
        integration_id: &IntegrationId,
        unit_id: &str,
        device_id: &DeviceId,
    ) -> Result<(), MessageBusError> {
        let now = self.clock.utc();
        let message = registration(integration_id, unit_id, device_id, now)?;
        self.bus.publish_batch(vec![message]).await
    }

    /// Start the background VIN confirmation, returning its task id.
    pub async fn start_query_and_update_vin(
        &self,
        integration_id: &IntegrationId,
        unit_id: &str,
        device_id: &DeviceId,
    ) -> Result<TaskId, MessageBusError> {
        let now = self.clock.utc();
        let task_id = TaskId::generate();
        let message = vin_query(integration_id, unit_id, device_id, &task_id, now)?;
        self.bus.publish_batch(vec![message]).await?;
        Ok(task_id)
    }

    /// Publish registration and VIN confirmation together.
    pub async fn announce_pairing(
        &self,
        integration_id: &IntegrationId,
        unit_id: &str,
        device_id: &DeviceId,
    ) -> Result<TaskId, MessageBusError> {
        let now = self.clock.utc();
        let task_id = TaskId::generate();
        let batch = vec![
            registration(integration_id, unit_id, device_id, now)?,
            vin_query(integration_id, unit_id, device_id, &task_id, now)?,
        ];
        self.bus.publish_batch(batch).await?;
        info!(
            device_id = %device_id,
            integration_id = %integration_id,
            unit_id,
            task_id = %task_id,
            "autopi unit registered"
        );
        Ok(task_id)
    }
}

fn registration(
    integration_id: &IntegrationId,
    unit_id: &str,
    device_id: &DeviceId,
    now: DateTime<Utc>,
) -> Result<BusMessage, MessageBusError> {
    let data = UnitRegistration {
        unit_id: unit_id.to_owned(),
        user_device_id: device_id.to_string(),
        integration_id: integration_id.to_string(),
    };
    let envelope = Envelope::new(
        integration_id,
        device_id.as_str(),
        event_types::AUTOPI_DEVICE_REGISTER,
        data,
        now,
    );
    BusMessage::envelope(Topic::DeviceRegistration, unit_id, &envelope)
}

fn vin_query(
    integration_id: &IntegrationId,
    unit_id: &str,
    device_id: &DeviceId,
    task_id: &TaskId,
    now: DateTime<Utc>,
) -> Result<BusMessage, MessageBusError> {
    let data = VinQueryTask {
        task_id: task_id.to_string(),
        unit_id: unit_id.to_owned(),
        user_device_id: device_id.to_string(),
        integration_id: integration_id.to_string(),
    };
    let envelope = Envelope::new(
        integration_id,
        device_id.as_str(),
        event_types::AUTOPI_VIN_QUERY,
        data,
        now,
    );
    BusMessage::envelope(Topic::TaskRunNow, task_id.as_str(), &envelope)
}
