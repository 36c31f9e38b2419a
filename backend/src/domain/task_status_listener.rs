//! Reacts to control-plane status reports from pollers.
//!
//! Only authentication failures are actionable. The link is moved to
//! `AuthenticationFailure`; its task id is cleared only when the report comes
//! from the task the link currently owns, so a late report from a replaced
//! task never detaches the running one.

use std::sync::Arc;

use async_trait::async_trait;
use mockable::Clock;
use serde_json::Value;
use tracing::info;

use crate::domain::envelope::{Envelope, event_types};
use crate::domain::envelope_handler::{EnvelopeHandler, IngestError};
use crate::domain::identifiers::{DeviceId, TaskId};
use crate::domain::integration_catalog::IntegrationCatalog;
use crate::domain::link::{LinkActor, LinkStatus};
use crate::domain::ports::IntegrationLinkRepository;
use crate::domain::task_emitter::{AUTHENTICATION_FAILURE_STATUS, TaskStatusData};

/// Task-status listener.
pub struct TaskStatusListener {
    catalog: Arc<IntegrationCatalog>,
    links: Arc<dyn IntegrationLinkRepository>,
    clock: Arc<dyn Clock>,
}

impl TaskStatusListener {
    pub fn new(
        catalog: Arc<IntegrationCatalog>,
        links: Arc<dyn IntegrationLinkRepository>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            catalog,
            links,
            clock,
        }
    }

    /// Apply one status report.
    pub async fn process(&self, envelope: &Envelope<Value>) -> Result<(), IngestError> {
        if !envelope
            .event_type
            .ends_with(event_types::POLL_STATUS_UPDATE_SUFFIX)
        {
            return Err(IngestError::unsupported(format!(
                "not a task status update: {}",
                envelope.event_type
            )));
        }
        let integration = self
            .catalog
            .by_source(&envelope.source)
            .await
            .map_err(|err| IngestError::store(err.to_string()))?
            .ok_or_else(|| IngestError::unknown_integration(envelope.source.as_str()))?;
        let data: TaskStatusData = envelope
            .decode_data()
            .map_err(|err| IngestError::malformed(err.to_string()))?;
        if data.status != AUTHENTICATION_FAILURE_STATUS {
            return Err(IngestError::unsupported(format!(
                "task status {} is not actionable",
                data.status
            )));
        }

        let device_id = if data.user_device_id.trim().is_empty() {
            DeviceId::new(envelope.subject.trim())
        } else {
            DeviceId::new(data.user_device_id.trim())
        };
        let mut link = self
            .links
            .find(&device_id, &integration.id)
            .await
            .map_err(|err| IngestError::store(err.to_string()))?
            .ok_or_else(|| {
                IngestError::not_found(format!(
                    "no link for device {device_id} and integration {}",
                    integration.id
                ))
            })?;

        let reporting_task = TaskId::new(data.task_id);
        let owned_task = link.task_id.as_ref() == Some(&reporting_task);
        if owned_task {
            link.task_id = None;
        }
        link.transition_to(
            LinkStatus::AuthenticationFailure,
            LinkActor::TaskStatusListener,
            self.clock.utc(),
        )
        .map_err(|err| IngestError::unsupported(err.message()))?;
        self.links
            .update(&link)
            .await
            .map_err(|err| IngestError::store(err.to_string()))?;

        info!(
            device_id = %device_id,
            integration_id = %integration.id,
            task_id = %reporting_task,
            task_cleared = owned_task,
            "credentials rejected by vendor"
        );
        Ok(())
    }
}

#[async_trait]
impl EnvelopeHandler for TaskStatusListener {
    async fn handle(&self, envelope: &Envelope<Value>) -> Result<(), IngestError> {
        self.process(envelope).await
    }
}
