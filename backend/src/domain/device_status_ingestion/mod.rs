//! Applies telemetry envelopes to device snapshots.
//!
//! The integration is resolved from the envelope `source`, the device from
//! its `subject`. The read-merge-write runs inside the store; the odometer
//! event, if any, is published after the store has committed. When that
//! publish fails the cooldown stamp is released again, so the next reading
//! retries the announcement.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mockable::Clock;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::domain::device_events::DeviceEventEmitter;
use crate::domain::envelope::{Envelope, event_types};
use crate::domain::envelope_handler::{EnvelopeHandler, IngestError};
use crate::domain::identifiers::{DeviceId, IntegrationId};
use crate::domain::integration_catalog::IntegrationCatalog;
use crate::domain::ports::{DeviceStatusStore, DeviceStatusStoreError, IngestionOutcome};
use crate::domain::telemetry::StatusPayload;

mod merge;

pub use merge::{ODOMETER_COOLDOWN, VendorMerge, should_notify_odometer};

/// Device-status ingestion engine.
pub struct DeviceStatusIngestionService {
    catalog: Arc<IntegrationCatalog>,
    store: Arc<dyn DeviceStatusStore>,
    events: DeviceEventEmitter,
    clock: Arc<dyn Clock>,
}

impl DeviceStatusIngestionService {
    pub fn new(
        catalog: Arc<IntegrationCatalog>,
        store: Arc<dyn DeviceStatusStore>,
        events: DeviceEventEmitter,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            catalog,
            store,
            events,
            clock,
        }
    }

    /// Merge one telemetry envelope.
    pub async fn ingest(&self, envelope: &Envelope<Value>) -> Result<(), IngestError> {
        if envelope.event_type != event_types::DEVICE_STATUS_UPDATE {
            return Err(IngestError::unsupported(format!(
                "expected {}, got {}",
                event_types::DEVICE_STATUS_UPDATE,
                envelope.event_type
            )));
        }
        let integration = self
            .catalog
            .by_source(&envelope.source)
            .await
            .map_err(|err| IngestError::store(err.to_string()))?
            .ok_or_else(|| IngestError::unknown_integration(envelope.source.as_str()))?;
        if envelope.subject.trim().is_empty() {
            return Err(IngestError::malformed("subject must name a device"));
        }
        let device_id = DeviceId::new(envelope.subject.trim());
        let payload = StatusPayload::decode(&integration.vendor, &envelope.data)
            .map_err(|err| IngestError::malformed(err.to_string()))?;

        let now = self.clock.utc();
        let merge = VendorMerge::new(integration.id.clone(), payload, now);
        let outcome = self
            .store
            .apply_ingestion(&device_id, &integration.id, &merge)
            .await
            .map_err(|err| match err {
                DeviceStatusStoreError::DeviceNotFound { .. } => {
                    IngestError::not_found(err.to_string())
                }
                other => IngestError::store(other.to_string()),
            })?;

        if let Some(link) = outcome.plan.link.as_ref() {
            info!(
                device_id = %device_id,
                integration_id = %integration.id,
                status = %link.status,
                "link promoted by first telemetry"
            );
        }
        if let Some(odometer) = outcome.plan.odometer_event
            && let Err(err) = self.events.odometer_updated(&outcome.device, odometer).await
        {
            self.release_stamp(&device_id, &integration.id, now, &outcome).await;
            return Err(IngestError::bus(err.to_string()));
        }
        debug!(
            device_id = %device_id,
            integration_id = %integration.id,
            envelope_id = %envelope.id,
            "telemetry merged"
        );
        Ok(())
    }

    async fn release_stamp(
        &self,
        device_id: &DeviceId,
        integration_id: &IntegrationId,
        stamped_at: DateTime<Utc>,
        outcome: &IngestionOutcome,
    ) {
        match self
            .store
            .release_odometer_stamp(
                device_id,
                integration_id,
                stamped_at,
                outcome.plan.previous_odometer_event_at,
            )
            .await
        {
            Ok(released) => debug!(
                device_id = %device_id,
                integration_id = %integration_id,
                released,
                "odometer cooldown released after failed publish"
            ),
            Err(error) => warn!(
                device_id = %device_id,
                integration_id = %integration_id,
                %error,
                "failed to release odometer cooldown"
            ),
        }
    }
}

#[async_trait]
impl EnvelopeHandler for DeviceStatusIngestionService {
    async fn handle(&self, envelope: &Envelope<Value>) -> Result<(), IngestError> {
        self.ingest(envelope).await
    }
}

#[cfg(test)]
mod tests;
