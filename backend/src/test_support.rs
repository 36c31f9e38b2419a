//! In-memory doubles and sample data shared by unit and behaviour tests.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Local, TimeDelta, TimeZone, Utc};
use mockable::Clock;

use crate::domain::ports::{
    BusMessage, DeviceRepository, DeviceRepositoryError, DeviceStatusStore,
    DeviceStatusStoreError, IngestionContext, IngestionOutcome, IntegrationLinkRepository,
    LinkRepositoryError, MessageBus, MessageBusError, SnapshotMerge,
};
use crate::domain::{
    DeviceDefinition, DeviceId, DeviceStatusSnapshot, EncryptedToken, Integration, IntegrationId,
    IntegrationLink, IntegrationStyle, IntegrationType, IntegrationVendor, LinkStatus, Powertrain,
    TaskId, UserDevice, UserId, VehicleNft,
};

pub struct MutableClock(Mutex<DateTime<Utc>>);

impl MutableClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self(Mutex::new(now))
    }

    pub fn advance(&self, delta: Duration) {
        let delta = match TimeDelta::from_std(delta) {
            Ok(delta) => delta,
            Err(error) => panic!("duration out of range: {error}; delta={delta:?}"),
        };
        *self.lock_clock() += delta;
    }

    pub fn advance_seconds(&self, seconds: i64) {
        *self.lock_clock() += TimeDelta::seconds(seconds);
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.lock_clock() = now;
    }

    fn lock_clock(&self) -> MutexGuard<'_, DateTime<Utc>> {
        match self.0.lock() {
            Ok(guard) => guard,
            Err(_) => panic!("clock mutex"),
        }
    }
}

impl Clock for MutableClock {
    fn local(&self) -> DateTime<Local> {
        self.utc().with_timezone(&Local)
    }

    fn utc(&self) -> DateTime<Utc> {
        *self.lock_clock()
    }
}

/// Noon on 1 May 2024, the default instant for tests.
pub fn fixed_now() -> DateTime<Utc> {
    match Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).single() {
        Some(now) => now,
        None => panic!("valid fixed time"),
    }
}

pub fn sample_device(id: &str) -> UserDevice {
    UserDevice {
        id: DeviceId::new(id),
        user_id: UserId::new("user-1"),
        definition: DeviceDefinition {
            id: "def-1".to_owned(),
            make: "Ford".to_owned(),
            model: "Mustang Mach-E".to_owned(),
            year: 2022,
            powertrain: Powertrain::Bev,
            template_id: None,
            make_template_id: None,
            style_template_ids: BTreeMap::new(),
        },
        vin: Some("3FMTK3SU5MMA00001".to_owned()),
        vin_confirmed: false,
        name: Some("Blue Mach-E".to_owned()),
        style_id: None,
    }
}

pub fn sample_integration(id: &str, vendor_name: &str) -> Integration {
    let (integration_type, style) = match IntegrationVendor::from_name(vendor_name) {
        IntegrationVendor::AutoPi => (IntegrationType::Hardware, IntegrationStyle::Addon),
        _ => (IntegrationType::Api, IntegrationStyle::Oem),
    };
    Integration::new(IntegrationId::new(id), vendor_name, integration_type, style)
}

/// An OAuth link with stored credentials and no running task.
pub fn oauth_link(device_id: &str, integration_id: &str) -> IntegrationLink {
    let now = fixed_now();
    let mut link = IntegrationLink::pending(
        DeviceId::new(device_id),
        IntegrationId::new(integration_id),
        now,
    );
    link.external_id = Some("vehicle-ext-1".to_owned());
    link.access_token = Some(EncryptedToken::new("access-token"));
    link.refresh_token = Some(EncryptedToken::new("refresh-token"));
    link.access_expires_at = Some(now + TimeDelta::hours(2));
    link
}

/// An OAuth link already polling under `task_id` with `status`.
pub fn running_link(
    device_id: &str,
    integration_id: &str,
    task_id: &str,
    status: LinkStatus,
) -> IntegrationLink {
    let mut link = oauth_link(device_id, integration_id);
    link.task_id = Some(TaskId::new(task_id));
    link.status = status;
    link
}

/// Bus double that keeps every accepted batch.
#[derive(Default)]
pub struct RecordingBus {
    batches: Mutex<Vec<Vec<BusMessage>>>,
    failure: Mutex<Option<MessageBusError>>,
}

impl RecordingBus {
    /// Reject every subsequent batch with `error`.
    pub fn fail_with(&self, error: MessageBusError) {
        *lock(&self.failure) = Some(error);
    }

    /// Accept batches again.
    pub fn recover(&self) {
        *lock(&self.failure) = None;
    }

    pub fn batches(&self) -> Vec<Vec<BusMessage>> {
        lock(&self.batches).clone()
    }

    pub fn messages(&self) -> Vec<BusMessage> {
        lock(&self.batches).iter().flatten().cloned().collect()
    }
}

#[async_trait]
impl MessageBus for RecordingBus {
    async fn publish_batch(&self, messages: Vec<BusMessage>) -> Result<(), MessageBusError> {
        if let Some(error) = lock(&self.failure).clone() {
            return Err(error);
        }
        lock(&self.batches).push(messages);
        Ok(())
    }
}

/// Link store keyed by (device, integration).
#[derive(Default)]
pub struct InMemoryLinkRepository {
    links: Mutex<HashMap<(DeviceId, IntegrationId), IntegrationLink>>,
    writes: Mutex<Vec<IntegrationLink>>,
}

impl InMemoryLinkRepository {
    pub fn with_links(links: impl IntoIterator<Item = IntegrationLink>) -> Self {
        let repo = Self::default();
        {
            let mut map = lock(&repo.links);
            for link in links {
                map.insert(
                    (link.device_id.clone(), link.integration_id.clone()),
                    link,
                );
            }
        }
        repo
    }

    pub fn get(&self, device_id: &str, integration_id: &str) -> Option<IntegrationLink> {
        lock(&self.links)
            .get(&(DeviceId::new(device_id), IntegrationId::new(integration_id)))
            .cloned()
    }

    /// Every link passed to `insert` or `update`, in call order.
    pub fn writes(&self) -> Vec<IntegrationLink> {
        lock(&self.writes).clone()
    }
}

#[async_trait]
impl IntegrationLinkRepository for InMemoryLinkRepository {
    async fn find(
        &self,
        device_id: &DeviceId,
        integration_id: &IntegrationId,
    ) -> Result<Option<IntegrationLink>, LinkRepositoryError> {
        Ok(lock(&self.links)
            .get(&(device_id.clone(), integration_id.clone()))
            .cloned())
    }

    async fn find_by_task_id(
        &self,
        task_id: &TaskId,
    ) -> Result<Option<IntegrationLink>, LinkRepositoryError> {
        Ok(lock(&self.links)
            .values()
            .find(|link| link.task_id.as_ref() == Some(task_id))
            .cloned())
    }

    async fn find_by_autopi_unit(
        &self,
        integration_id: &IntegrationId,
        unit_id: &str,
    ) -> Result<Option<IntegrationLink>, LinkRepositoryError> {
        Ok(lock(&self.links)
            .values()
            .find(|link| {
                &link.integration_id == integration_id
                    && link.metadata.autopi.unit_id.as_deref() == Some(unit_id)
                    && !link.status.is_terminal()
            })
            .cloned())
    }

    async fn insert(&self, link: &IntegrationLink) -> Result<(), LinkRepositoryError> {
        let key = (link.device_id.clone(), link.integration_id.clone());
        let mut links = lock(&self.links);
        if links.contains_key(&key) {
            return Err(LinkRepositoryError::duplicate(
                link.device_id.as_str(),
                link.integration_id.as_str(),
            ));
        }
        links.insert(key, link.clone());
        lock(&self.writes).push(link.clone());
        Ok(())
    }

    async fn update(&self, link: &IntegrationLink) -> Result<(), LinkRepositoryError> {
        let key = (link.device_id.clone(), link.integration_id.clone());
        let mut links = lock(&self.links);
        let Some(slot) = links.get_mut(&key) else {
            return Err(LinkRepositoryError::missing(
                link.device_id.as_str(),
                link.integration_id.as_str(),
            ));
        };
        *slot = link.clone();
        lock(&self.writes).push(link.clone());
        Ok(())
    }
}

/// Device and snapshot store sharing a link repository.
pub struct InMemoryDeviceStore {
    devices: Mutex<HashMap<DeviceId, UserDevice>>,
    vehicles: Mutex<HashMap<i64, VehicleNft>>,
    snapshots: Mutex<HashMap<(DeviceId, IntegrationId), DeviceStatusSnapshot>>,
    links: Arc<InMemoryLinkRepository>,
}

impl InMemoryDeviceStore {
    pub fn new(links: Arc<InMemoryLinkRepository>) -> Self {
        Self {
            devices: Mutex::new(HashMap::new()),
            vehicles: Mutex::new(HashMap::new()),
            snapshots: Mutex::new(HashMap::new()),
            links,
        }
    }

    pub fn add_device(&self, device: UserDevice) {
        lock(&self.devices).insert(device.id.clone(), device);
    }

    pub fn add_vehicle(&self, vehicle: VehicleNft) {
        lock(&self.vehicles).insert(vehicle.token_id, vehicle);
    }

    pub fn put_snapshot(&self, snapshot: DeviceStatusSnapshot) {
        lock(&self.snapshots).insert(
            (snapshot.device_id.clone(), snapshot.integration_id.clone()),
            snapshot,
        );
    }

    pub fn snapshot(&self, device_id: &str, integration_id: &str) -> Option<DeviceStatusSnapshot> {
        lock(&self.snapshots)
            .get(&(DeviceId::new(device_id), IntegrationId::new(integration_id)))
            .cloned()
    }
}

#[async_trait]
impl DeviceRepository for InMemoryDeviceStore {
    async fn find_device(&self, id: &DeviceId) -> Result<Option<UserDevice>, DeviceRepositoryError> {
        Ok(lock(&self.devices).get(id).cloned())
    }

    async fn find_vehicle_by_token(
        &self,
        token_id: i64,
    ) -> Result<Option<VehicleNft>, DeviceRepositoryError> {
        Ok(lock(&self.vehicles).get(&token_id).cloned())
    }
}

#[async_trait]
impl DeviceStatusStore for InMemoryDeviceStore {
    async fn apply_ingestion(
        &self,
        device_id: &DeviceId,
        integration_id: &IntegrationId,
        merge: &dyn SnapshotMerge,
    ) -> Result<IngestionOutcome, DeviceStatusStoreError> {
        let Some(device) = lock(&self.devices).get(device_id).cloned() else {
            return Err(DeviceStatusStoreError::device_not_found(device_id.as_str()));
        };
        let key = (device_id.clone(), integration_id.clone());
        let context = IngestionContext {
            device: device.clone(),
            link: lock(&self.links.links).get(&key).cloned(),
            snapshot: lock(&self.snapshots).get(&key).cloned(),
        };
        let plan = merge.plan(&context);
        lock(&self.snapshots).insert(key.clone(), plan.snapshot.clone());
        if let Some(link) = plan.link.as_ref() {
            lock(&self.links.links).insert(key, link.clone());
            lock(&self.links.writes).push(link.clone());
        }
        Ok(IngestionOutcome { device, plan })
    }

    async fn release_odometer_stamp(
        &self,
        device_id: &DeviceId,
        integration_id: &IntegrationId,
        stamped_at: DateTime<Utc>,
        previous: Option<DateTime<Utc>>,
    ) -> Result<bool, DeviceStatusStoreError> {
        let mut snapshots = lock(&self.snapshots);
        let Some(snapshot) = snapshots.get_mut(&(device_id.clone(), integration_id.clone())) else {
            return Ok(false);
        };
        if snapshot.last_odometer_event_at != Some(stamped_at) {
            return Ok(false);
        }
        snapshot.last_odometer_event_at = previous;
        Ok(true)
    }

    async fn find_snapshot(
        &self,
        device_id: &DeviceId,
        integration_id: &IntegrationId,
    ) -> Result<Option<DeviceStatusSnapshot>, DeviceStatusStoreError> {
        Ok(lock(&self.snapshots)
            .get(&(device_id.clone(), integration_id.clone()))
            .cloned())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
