//! Polling-task control for OAuth vendors.
//!
//! A [`PollTaskService`] turns a domain intent into envelopes on the task
//! topics. Every record is keyed by task id so compacted topics keep only the
//! latest definition and credential set per task. Each intent is published as
//! one atomic batch, and the link is written only after the batch has been
//! accepted.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::DateTime;
use chrono::Utc;
use mockable::Clock;
use serde_json::{Value, json};
use tracing::info;

use crate::domain::envelope::Envelope;
use crate::domain::error::Error;
use crate::domain::identifiers::TaskId;
use crate::domain::link::{IntegrationLink, LinkActor, LinkStatus};
use crate::domain::ports::{
    BusMessage, CredentialCipher, IntegrationLinkRepository, MessageBus, Topic,
};

mod messages;
mod smartcar;
mod tesla;

pub use messages::{
    AUTHENTICATION_FAILURE_STATUS, CredentialData, SmartcarIdentifiers, SmartcarTask, StopTask,
    TaskStatusData, TeslaIdentifiers, TeslaTask,
};
pub use smartcar::SmartcarTaskProfile;
pub use tesla::TeslaTaskProfile;

/// Event types and task shape for one vendor.
pub trait VendorTaskProfile: Send + Sync {
    /// Type of a new task definition.
    const SCHEDULED: &'static str;
    /// Type of a re-emitted task definition.
    const REFRESH: &'static str;
    /// Type of a stop notice.
    const STOP: &'static str;
    /// Type of a credential set.
    const CREDENTIAL: &'static str;

    /// Vendor-specific task definition for `link` under `task_id`.
    fn task_definition(&self, link: &IntegrationLink, task_id: &TaskId) -> Result<Value, Error>;
}

/// Intent contract shared by the vendor emitters.
#[async_trait]
pub trait PollTaskEmitter: Send + Sync {
    /// Start polling under a fresh task id, stopping any previous task first.
    ///
    /// Returns the link as persisted.
    async fn start_poll(&self, link: &IntegrationLink) -> Result<IntegrationLink, Error>;

    /// Stop the running task and clear the link's task id. No-op without one.
    async fn stop_poll(&self, link: &IntegrationLink) -> Result<IntegrationLink, Error>;

    /// Re-emit the task definition without touching credentials.
    async fn refresh(&self, link: &IntegrationLink) -> Result<(), Error>;

    /// Re-emit only the credential set for the running task.
    async fn rotate_credentials(&self, link: &IntegrationLink) -> Result<(), Error>;
}

/// Ports needed by a task emitter.
pub struct PollTaskPorts {
    pub bus: Arc<dyn MessageBus>,
    pub links: Arc<dyn IntegrationLinkRepository>,
    /// Cipher protecting tokens at rest.
    pub storage_cipher: Arc<dyn CredentialCipher>,
    /// Cipher protecting tokens sent to pollers.
    pub transport_cipher: Arc<dyn CredentialCipher>,
}

/// Generic emitter parameterised by a vendor profile.
pub struct PollTaskService<P> {
    profile: P,
    bus: Arc<dyn MessageBus>,
    links: Arc<dyn IntegrationLinkRepository>,
    storage_cipher: Arc<dyn CredentialCipher>,
    transport_cipher: Arc<dyn CredentialCipher>,
    clock: Arc<dyn Clock>,
}

/// Smartcar emitter.
pub type SmartcarTaskService = PollTaskService<SmartcarTaskProfile>;
/// Tesla emitter.
pub type TeslaTaskService = PollTaskService<TeslaTaskProfile>;

impl<P: VendorTaskProfile> PollTaskService<P> {
    pub fn new(profile: P, ports: PollTaskPorts, clock: Arc<dyn Clock>) -> Self {
        Self {
            profile,
            bus: ports.bus,
            links: ports.links,
            storage_cipher: ports.storage_cipher,
            transport_cipher: ports.transport_cipher,
            clock,
        }
    }

    fn credential_message(
        &self,
        link: &IntegrationLink,
        task_id: &TaskId,
        now: DateTime<Utc>,
    ) -> Result<BusMessage, Error> {
        let (Some(access), Some(refresh), Some(expiry)) = (
            link.access_token.as_ref(),
            link.refresh_token.as_ref(),
            link.access_expires_at,
        ) else {
            return Err(Error::invalid_request("link has no stored credentials").with_details(
                json!({ "deviceId": link.device_id, "integrationId": link.integration_id }),
            ));
        };
        let data = CredentialData {
            task_id: task_id.to_string(),
            user_device_id: link.device_id.to_string(),
            integration_id: link.integration_id.to_string(),
            access_token: self.reencrypt(access.as_str())?,
            refresh_token: self.reencrypt(refresh.as_str())?,
            expiry,
        };
        let envelope = Envelope::new(
            &link.integration_id,
            link.device_id.as_str(),
            P::CREDENTIAL,
            data,
            now,
        );
        BusMessage::envelope(Topic::TaskCredential, task_id.as_str(), &envelope)
            .map_err(|err| Error::internal(err.to_string()))
    }

    fn definition_message(
        &self,
        link: &IntegrationLink,
        task_id: &TaskId,
        event_type: &str,
        now: DateTime<Utc>,
    ) -> Result<BusMessage, Error> {
        let data = self.profile.task_definition(link, task_id)?;
        let envelope = Envelope::new(
            &link.integration_id,
            link.device_id.as_str(),
            event_type,
            data,
            now,
        );
        BusMessage::envelope(Topic::TaskRunNow, task_id.as_str(), &envelope)
            .map_err(|err| Error::internal(err.to_string()))
    }

    fn stop_messages(
        &self,
        link: &IntegrationLink,
        task_id: &TaskId,
        now: DateTime<Utc>,
    ) -> Result<[BusMessage; 2], Error> {
        let data = StopTask {
            task_id: task_id.to_string(),
            user_device_id: link.device_id.to_string(),
            integration_id: link.integration_id.to_string(),
        };
        let envelope = Envelope::new(
            &link.integration_id,
            link.device_id.as_str(),
            P::STOP,
            data,
            now,
        );
        let stop = BusMessage::envelope(Topic::TaskStop, task_id.as_str(), &envelope)
            .map_err(|err| Error::internal(err.to_string()))?;
        Ok([BusMessage::tombstone(Topic::TaskCredential, task_id.as_str()), stop])
    }

    fn reencrypt(&self, stored: &str) -> Result<String, Error> {
        let plaintext = self
            .storage_cipher
            .decrypt(stored)
            .map_err(|err| Error::internal(err.to_string()))?;
        self.transport_cipher
            .encrypt(&plaintext)
            .map_err(|err| Error::internal(err.to_string()))
    }

    async fn publish(&self, messages: Vec<BusMessage>) -> Result<(), Error> {
        self.bus
            .publish_batch(messages)
            .await
            .map_err(|err| Error::service_unavailable(err.to_string()))
    }

    async fn persist(&self, link: &IntegrationLink) -> Result<(), Error> {
        self.links
            .update(link)
            .await
            .map_err(|err| Error::service_unavailable(err.to_string()))
    }
}

fn running_task(link: &IntegrationLink) -> Result<&TaskId, Error> {
    link.task_id.as_ref().ok_or_else(|| {
        Error::conflict("link has no running task").with_details(json!({
            "deviceId": link.device_id,
            "integrationId": link.integration_id,
        }))
    })
}

#[async_trait]
impl<P: VendorTaskProfile> PollTaskEmitter for PollTaskService<P> {
    async fn start_poll(&self, link: &IntegrationLink) -> Result<IntegrationLink, Error> {
        let now = self.clock.utc();
        let task_id = TaskId::generate();

        let mut updated = link.clone();
        if updated.status != LinkStatus::Active {
            updated.transition_to(LinkStatus::PendingFirstData, LinkActor::TaskEmitter, now)?;
        }
        updated.task_id = Some(task_id.clone());
        updated.updated_at = now;

        let mut batch = Vec::with_capacity(4);
        if let Some(previous) = link.task_id.as_ref() {
            batch.extend(self.stop_messages(link, previous, now)?);
        }
        batch.push(self.credential_message(link, &task_id, now)?);
        batch.push(self.definition_message(link, &task_id, P::SCHEDULED, now)?);

        self.publish(batch).await?;
        self.persist(&updated).await?;
        info!(
            device_id = %link.device_id,
            integration_id = %link.integration_id,
            task_id = %task_id,
            previous_task_id = ?link.task_id.as_ref().map(TaskId::as_str),
            "polling task started"
        );
        Ok(updated)
    }

    async fn stop_poll(&self, link: &IntegrationLink) -> Result<IntegrationLink, Error> {
        let Some(task_id) = link.task_id.as_ref() else {
            return Ok(link.clone());
        };
        let now = self.clock.utc();
        self.publish(self.stop_messages(link, task_id, now)?.into())
            .await?;

        let mut updated = link.clone();
        updated.task_id = None;
        updated.updated_at = now;
        self.persist(&updated).await?;
        info!(
            device_id = %link.device_id,
            integration_id = %link.integration_id,
            task_id = %task_id,
            "polling task stopped"
        );
        Ok(updated)
    }

    async fn refresh(&self, link: &IntegrationLink) -> Result<(), Error> {
        let task_id = running_task(link)?;
        let message = self.definition_message(link, task_id, P::REFRESH, self.clock.utc())?;
        self.publish(vec![message]).await
    }

    async fn rotate_credentials(&self, link: &IntegrationLink) -> Result<(), Error> {
        let task_id = running_task(link)?;
        let message = self.credential_message(link, task_id, self.clock.utc())?;
        self.publish(vec![message]).await
    }
}
