//! Smartcar task profile.

use serde_json::Value;

use super::VendorTaskProfile;
use super::messages::{SmartcarIdentifiers, SmartcarTask};
use crate::domain::envelope::event_types;
use crate::domain::error::Error;
use crate::domain::identifiers::TaskId;
use crate::domain::link::IntegrationLink;

/// Data paths polled when the link records none.
pub const DEFAULT_SMARTCAR_PATHS: [&str; 4] = ["/", "/charge", "/fuel", "/odometer"];

/// Builds Smartcar task definitions from the vehicle id and enabled paths.
#[derive(Debug, Clone, Copy, Default)]
pub struct SmartcarTaskProfile;

impl VendorTaskProfile for SmartcarTaskProfile {
    const SCHEDULED: &'static str = event_types::SMARTCAR_POLL_SCHEDULED;
    const REFRESH: &'static str = event_types::SMARTCAR_POLL_REFRESH;
    const STOP: &'static str = event_types::SMARTCAR_POLL_STOP;
    const CREDENTIAL: &'static str = event_types::SMARTCAR_POLL_CREDENTIAL;

    fn task_definition(&self, link: &IntegrationLink, task_id: &TaskId) -> Result<Value, Error> {
        let external_id = link
            .external_id
            .as_deref()
            .ok_or_else(|| Error::invalid_request("smartcar link has no vehicle id"))?;
        let paths = if link.metadata.smartcar_endpoints.is_empty() {
            DEFAULT_SMARTCAR_PATHS.iter().map(|p| (*p).to_owned()).collect()
        } else {
            link.metadata.smartcar_endpoints.clone()
        };
        let task = SmartcarTask {
            task_id: task_id.to_string(),
            user_device_id: link.device_id.to_string(),
            integration_id: link.integration_id.to_string(),
            identifiers: SmartcarIdentifiers {
                id: external_id.to_owned(),
            },
            paths,
        };
        serde_json::to_value(task).map_err(|err| Error::internal(err.to_string()))
    }
}
