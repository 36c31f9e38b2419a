//! Ingestion engine tests over in-memory adapters.

use std::sync::Arc;
use std::time::Duration;

use chrono::TimeDelta;
use rstest::{fixture, rstest};
use serde_json::json;

use super::*;
use crate::domain::device_events::DeviceEventEmitter;
use crate::domain::identifiers::IntegrationId;
use crate::domain::link::{IntegrationLink, LinkStatus};
use crate::domain::ports::{
    FixtureIntegrationRepository, IntegrationLinkRepository, MessageBusError, Topic,
};
use crate::domain::snapshot::DeviceStatusSnapshot;
use crate::test_support::{
    InMemoryDeviceStore, InMemoryLinkRepository, MutableClock, RecordingBus, fixed_now,
    sample_device, sample_integration,
};

struct World {
    links: Arc<InMemoryLinkRepository>,
    store: Arc<InMemoryDeviceStore>,
    bus: Arc<RecordingBus>,
    clock: Arc<MutableClock>,
    service: DeviceStatusIngestionService,
}

#[fixture]
fn world() -> World {
    let clock = Arc::new(MutableClock::new(fixed_now()));
    let links = Arc::new(InMemoryLinkRepository::default());
    let store = Arc::new(InMemoryDeviceStore::new(Arc::clone(&links)));
    store.add_device(sample_device("device-1"));
    let bus = Arc::new(RecordingBus::default());
    let catalog = IntegrationCatalog::new(
        Arc::new(FixtureIntegrationRepository::new(vec![
            sample_integration("i-smartcar", "SmartCar"),
            sample_integration("i-autopi", "AutoPi"),
        ])),
        Arc::clone(&clock) as Arc<dyn Clock>,
        Duration::from_secs(300),
    );
    let service = DeviceStatusIngestionService::new(
        Arc::new(catalog),
        Arc::clone(&store) as Arc<dyn DeviceStatusStore>,
        DeviceEventEmitter::new(
            Arc::clone(&bus) as Arc<dyn crate::domain::ports::MessageBus>,
            Arc::clone(&clock) as Arc<dyn Clock>,
        ),
        Arc::clone(&clock) as Arc<dyn Clock>,
    );
    World {
        links,
        store,
        bus,
        clock,
        service,
    }
}

fn telemetry(integration: &str, device: &str, data: Value) -> Envelope<Value> {
    Envelope::new(
        &IntegrationId::new(integration),
        device,
        event_types::DEVICE_STATUS_UPDATE,
        data,
        fixed_now(),
    )
}

fn odometer_events(bus: &RecordingBus) -> Vec<Value> {
    bus.messages()
        .into_iter()
        .filter(|m| m.topic == Topic::DomainEvents)
        .filter_map(|m| m.payload)
        .filter(|p| p["type"] == event_types::ODOMETER_UPDATE)
        .collect()
}

fn seed_snapshot(world: &World, odometer: f64, minutes_since_event: i64) {
    let now = world.clock.utc();
    let mut snapshot = DeviceStatusSnapshot::empty("device-1".into(), "i-smartcar".into(), now);
    snapshot.data = Some(json!({ "odometer": odometer }));
    snapshot.last_odometer_event_at = Some(now - TimeDelta::minutes(minutes_since_event));
    world.store.put_snapshot(snapshot);
}

#[rstest]
#[tokio::test]
async fn first_reading_emits_exactly_one_odometer_event(world: World) {
    world
        .service
        .ingest(&telemetry("i-smartcar", "device-1", json!({ "odometer": 1500.2 })))
        .await
        .expect("ingest");

    let events = odometer_events(&world.bus);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0]["data"]["odometer"], json!(1500.2));
    let snapshot = world.store.snapshot("device-1", "i-smartcar").expect("snapshot");
    assert_eq!(snapshot.last_odometer_event_at, Some(fixed_now()));
}

#[rstest]
#[tokio::test]
async fn readings_within_the_cooldown_are_not_announced(world: World) {
    seed_snapshot(&world, 1000.0, 30);

    world
        .service
        .ingest(&telemetry("i-smartcar", "device-1", json!({ "odometer": 1200.0 })))
        .await
        .expect("ingest");

    assert!(odometer_events(&world.bus).is_empty());
    let snapshot = world.store.snapshot("device-1", "i-smartcar").expect("snapshot");
    assert_eq!(snapshot.data, Some(json!({ "odometer": 1200.0 })));
    assert_eq!(
        snapshot.last_odometer_event_at,
        Some(fixed_now() - TimeDelta::minutes(30))
    );
}

#[rstest]
#[tokio::test]
async fn progress_after_the_cooldown_is_announced_once(world: World) {
    seed_snapshot(&world, 1000.0, 90);

    world
        .service
        .ingest(&telemetry("i-smartcar", "device-1", json!({ "odometer": 1200.0 })))
        .await
        .expect("ingest");

    let events = odometer_events(&world.bus);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0]["data"]["odometer"], json!(1200.0));
}

#[rstest]
#[tokio::test]
async fn first_telemetry_promotes_the_link(world: World) {
    let mut link = IntegrationLink::pending("device-1".into(), "i-autopi".into(), fixed_now());
    link.status = LinkStatus::PendingFirstData;
    world.links.insert(&link).await.expect("seed link");

    world
        .service
        .ingest(&telemetry("i-autopi", "device-1", json!({ "speed": 0 })))
        .await
        .expect("ingest");

    assert_eq!(
        world.links.get("device-1", "i-autopi").map(|l| l.status),
        Some(LinkStatus::Active)
    );
}

#[rstest]
#[tokio::test]
async fn unknown_sources_are_reported(world: World) {
    let err = world
        .service
        .ingest(&telemetry("i-missing", "device-1", json!({ "odometer": 1.0 })))
        .await
        .expect_err("unknown integration");

    assert_eq!(err.kind(), "unknown_integration");
    assert!(world.store.snapshot("device-1", "i-missing").is_none());
}

#[rstest]
#[tokio::test]
async fn unknown_devices_are_not_found(world: World) {
    let err = world
        .service
        .ingest(&telemetry("i-smartcar", "device-404", json!({ "odometer": 1.0 })))
        .await
        .expect_err("unknown device");

    assert_eq!(err.kind(), "not_found");
}

#[rstest]
#[case::wrong_type("zone.dimo.device.odd", json!({}), "unsupported")]
#[case::scalar_payload(event_types::DEVICE_STATUS_UPDATE, json!(42), "malformed")]
#[tokio::test]
async fn malformed_or_foreign_envelopes_are_rejected(
    world: World,
    #[case] event_type: &str,
    #[case] data: Value,
    #[case] kind: &str,
) {
    let mut envelope = telemetry("i-smartcar", "device-1", data);
    envelope.event_type = event_type.to_owned();

    let err = world.service.ingest(&envelope).await.expect_err("rejected");

    assert_eq!(err.kind(), kind);
}

#[rstest]
#[tokio::test]
async fn blank_subjects_are_malformed(world: World) {
    let err = world
        .service
        .ingest(&telemetry("i-smartcar", "  ", json!({ "odometer": 1.0 })))
        .await
        .expect_err("no subject");

    assert_eq!(err.kind(), "malformed");
}

#[rstest]
#[tokio::test]
async fn bus_failures_surface_after_the_snapshot_commits(world: World) {
    world.bus.fail_with(MessageBusError::unavailable("broker down"));

    let err = world
        .service
        .ingest(&telemetry("i-smartcar", "device-1", json!({ "odometer": 5.0 })))
        .await
        .expect_err("bus down");

    assert_eq!(err.kind(), "bus");
    assert!(world.store.snapshot("device-1", "i-smartcar").is_some());
}

#[rstest]
#[tokio::test]
async fn failed_odometer_publishes_do_not_start_the_cooldown(world: World) {
    world.bus.fail_with(MessageBusError::unavailable("broker down"));
    world
        .service
        .ingest(&telemetry("i-smartcar", "device-1", json!({ "odometer": 5.0 })))
        .await
        .expect_err("bus down");

    let snapshot = world.store.snapshot("device-1", "i-smartcar").expect("snapshot");
    assert_eq!(snapshot.last_odometer_event_at, None);

    world.bus.recover();
    world.clock.advance_seconds(300);
    world
        .service
        .ingest(&telemetry("i-smartcar", "device-1", json!({ "odometer": 6.0 })))
        .await
        .expect("ingest");

    let events = odometer_events(&world.bus);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0]["data"]["odometer"], json!(6.0));
}

#[rstest]
#[tokio::test]
async fn failed_publishes_restore_an_expired_stamp(world: World) {
    seed_snapshot(&world, 100.0, 90);
    let before = world
        .store
        .snapshot("device-1", "i-smartcar")
        .and_then(|s| s.last_odometer_event_at);
    world.bus.fail_with(MessageBusError::unavailable("broker down"));

    world
        .service
        .ingest(&telemetry("i-smartcar", "device-1", json!({ "odometer": 120.0 })))
        .await
        .expect_err("bus down");

    let after = world
        .store
        .snapshot("device-1", "i-smartcar")
        .and_then(|s| s.last_odometer_event_at);
    assert_eq!(after, before);
}
