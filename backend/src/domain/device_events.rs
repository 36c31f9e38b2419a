//! Domain events published for downstream consumers.
//!
//! Every event carries a timestamp, the owning user and a compact device
//! block, and is keyed by device id on the domain-events topic.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use mockable::Clock;
use serde::Serialize;
use tracing::debug;

use crate::domain::device::UserDevice;
use crate::domain::envelope::{Envelope, event_types};
use crate::domain::integration::Integration;
use crate::domain::ports::{BusMessage, MessageBus, MessageBusError, Topic};

/// `source` stamped on domain events.
pub const DOMAIN_EVENT_SOURCE: &str = "devices-api";

/// Device block embedded in every event.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceSummary {
    pub id: String,
    pub make: String,
    pub model: String,
    pub year: i32,
}

impl From<&UserDevice> for DeviceSummary {
    fn from(device: &UserDevice) -> Self {
        Self {
            id: device.id.to_string(),
            make: device.definition.make.clone(),
            model: device.definition.model.clone(),
            year: device.definition.year,
        }
    }
}

/// Integration block embedded in integration events.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IntegrationSummary {
    pub id: String,
    #[serde(rename = "type")]
    pub integration_type: String,
    pub style: String,
    pub vendor: String,
}

impl From<&Integration> for IntegrationSummary {
    fn from(integration: &Integration) -> Self {
        Self {
            id: integration.id.to_string(),
            integration_type: format!("{:?}", integration.integration_type),
            style: format!("{:?}", integration.style),
            vendor: integration.vendor_name.clone(),
        }
    }
}

/// Payload shared by the device and integration events.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceEventData {
    pub timestamp: DateTime<Utc>,
    pub user_id: String,
    pub device: DeviceSummary,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub integration: Option<IntegrationSummary>,
}

/// Payload of the odometer-change event.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OdometerEventData {
    pub timestamp: DateTime<Utc>,
    pub user_id: String,
    pub device: DeviceSummary,
    pub odometer: f64,
}

/// Publishes domain events.
#[derive(Clone)]
pub struct DeviceEventEmitter {
    bus: Arc<dyn MessageBus>,
    clock: Arc<dyn Clock>,
}

impl DeviceEventEmitter {
    pub fn new(bus: Arc<dyn MessageBus>, clock: Arc<dyn Clock>) -> Self {
        Self { bus, clock }
    }

    /// Announce a newly registered device.
    pub async fn device_created(&self, device: &UserDevice) -> Result<(), MessageBusError> {
        self.publish_device_event(event_types::DEVICE_CREATED, device, None)
            .await
    }

    /// Announce a new link between `device` and `integration`.
    pub async fn integration_created(
        &self,
        device: &UserDevice,
        integration: &Integration,
    ) -> Result<(), MessageBusError> {
        self.publish_device_event(event_types::INTEGRATION_CREATED, device, Some(integration))
            .await
    }

    /// Announce removal of the link between `device` and `integration`.
    pub async fn integration_deleted(
        &self,
        device: &UserDevice,
        integration: &Integration,
    ) -> Result<(), MessageBusError> {
        self.publish_device_event(event_types::INTEGRATION_DELETED, device, Some(integration))
            .await
    }

    /// Announce a new odometer reading.
    pub async fn odometer_updated(
        &self,
        device: &UserDevice,
        odometer: f64,
    ) -> Result<(), MessageBusError> {
        let now = self.clock.utc();
        let data = OdometerEventData {
            timestamp: now,
            user_id: device.user_id.to_string(),
            device: DeviceSummary::from(device),
            odometer,
        };
        self.publish(event_types::ODOMETER_UPDATE, device, data, now)
            .await
    }

    async fn publish_device_event(
        &self,
        event_type: &str,
        device: &UserDevice,
        integration: Option<&Integration>,
    ) -> Result<(), MessageBusError> {
        let now = self.clock.utc();
        let data = DeviceEventData {
            timestamp: now,
            user_id: device.user_id.to_string(),
            device: DeviceSummary::from(device),
            integration: integration.map(IntegrationSummary::from),
        };
        self.publish(event_type, device, data, now).await
    }

    async fn publish<T: Serialize>(
        &self,
        event_type: &str,
        device: &UserDevice,
        data: T,
        now: DateTime<Utc>,
    ) -> Result<(), MessageBusError> {
        let envelope = Envelope::from_source(
            DOMAIN_EVENT_SOURCE,
            device.id.as_str(),
            event_type,
            data,
            now,
        );
        let message = BusMessage::envelope(Topic::DomainEvents, device.id.as_str(), &envelope)?;
        self.bus.publish_batch(vec![message]).await?;
        debug!(device_id = %device.id, event_type, "domain event published");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::MockMessageBus;
    use crate::test_support::{MutableClock, sample_device, sample_integration};
    use chrono::TimeZone;
    use rstest::rstest;
    use serde_json::json;
    use std::sync::Mutex;

    fn recording_bus(sink: Arc<Mutex<Vec<BusMessage>>>) -> MockMessageBus {
        let mut bus = MockMessageBus::new();
        bus.expect_publish_batch().returning(move |messages| {
            sink.lock().expect("sink lock").extend(messages);
            Ok(())
        });
        bus
    }

    fn clock() -> Arc<MutableClock> {
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).single().expect("valid time");
        Arc::new(MutableClock::new(now))
    }

    #[rstest]
    #[tokio::test]
    async fn odometer_event_carries_device_block_and_value() {
        let sink = Arc::new(Mutex::new(Vec::new()));
        let emitter = DeviceEventEmitter::new(Arc::new(recording_bus(Arc::clone(&sink))), clock());
        let device = sample_device("device-1");

        emitter.odometer_updated(&device, 1234.5).await.expect("publish");

        let sent = sink.lock().expect("sink lock");
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].topic, Topic::DomainEvents);
        assert_eq!(sent[0].key.as_deref(), Some("device-1"));
        let payload = sent[0].payload.as_ref().expect("payload");
        assert_eq!(payload["type"], json!(event_types::ODOMETER_UPDATE));
        assert_eq!(payload["source"], json!(DOMAIN_EVENT_SOURCE));
        assert_eq!(payload["data"]["odometer"], json!(1234.5));
        assert_eq!(payload["data"]["userId"], json!("user-1"));
        assert_eq!(
            payload["data"]["device"],
            json!({ "id": "device-1", "make": "Ford", "model": "Mustang Mach-E", "year": 2022 })
        );
    }

    #[rstest]
    #[tokio::test]
    async fn integration_events_embed_the_integration() {
        let sink = Arc::new(Mutex::new(Vec::new()));
        let emitter = DeviceEventEmitter::new(Arc::new(recording_bus(Arc::clone(&sink))), clock());
        let device = sample_device("device-1");
        let integration = sample_integration("i-autopi", "AutoPi");

        emitter
            .integration_created(&device, &integration)
            .await
            .expect("publish");
        emitter.device_created(&device).await.expect("publish");

        let sent = sink.lock().expect("sink lock");
        let created = sent[0].payload.as_ref().expect("payload");
        assert_eq!(created["type"], json!(event_types::INTEGRATION_CREATED));
        assert_eq!(created["data"]["integration"]["vendor"], json!("AutoPi"));
        let device_created = sent[1].payload.as_ref().expect("payload");
        assert!(device_created["data"].get("integration").is_none());
    }

    #[rstest]
    #[tokio::test]
    async fn bus_failures_propagate() {
        let mut bus = MockMessageBus::new();
        bus.expect_publish_batch()
            .returning(|_| Err(MessageBusError::unavailable("down")));
        let emitter = DeviceEventEmitter::new(Arc::new(bus), clock());

        let err = emitter
            .odometer_updated(&sample_device("device-1"), 1.0)
            .await
            .expect_err("bus down");
        assert_eq!(err, MessageBusError::unavailable("down"));
    }
}
