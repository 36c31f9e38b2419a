//! Tesla task profile.

use serde_json::Value;

use super::VendorTaskProfile;
use super::messages::{TeslaIdentifiers, TeslaTask};
use crate::domain::envelope::event_types;
use crate::domain::error::Error;
use crate::domain::identifiers::TaskId;
use crate::domain::link::IntegrationLink;

/// Builds Tesla task definitions from the external id and vehicle id.
#[derive(Debug, Clone, Copy, Default)]
pub struct TeslaTaskProfile;

impl VendorTaskProfile for TeslaTaskProfile {
    const SCHEDULED: &'static str = event_types::TESLA_POLL_SCHEDULED;
    const REFRESH: &'static str = event_types::TESLA_POLL_REFRESH;
    const STOP: &'static str = event_types::TESLA_POLL_STOP;
    const CREDENTIAL: &'static str = event_types::TESLA_POLL_CREDENTIAL;

    fn task_definition(&self, link: &IntegrationLink, task_id: &TaskId) -> Result<Value, Error> {
        let (Some(external_id), Some(vehicle_id)) =
            (link.external_id.as_deref(), link.metadata.tesla_vehicle_id)
        else {
            return Err(Error::invalid_request(
                "tesla link needs both an external id and a vehicle id",
            ));
        };
        let task = TeslaTask {
            task_id: task_id.to_string(),
            user_device_id: link.device_id.to_string(),
            integration_id: link.integration_id.to_string(),
            identifiers: TeslaIdentifiers {
                id: external_id.to_owned(),
                vehicle_id,
            },
        };
        serde_json::to_value(task).map_err(|err| Error::internal(err.to_string()))
    }
}
