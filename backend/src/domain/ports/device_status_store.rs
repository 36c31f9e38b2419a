//! Driven port owning the snapshot read-modify-write.
//!
//! The store loads the device, its link and the current snapshot, asks a
//! [`SnapshotMerge`] what to write, and writes the result, all within one
//! transaction. Merge decisions stay in the domain; locking stays here.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::define_port_error;
use crate::domain::device::UserDevice;
use crate::domain::identifiers::{DeviceId, IntegrationId};
use crate::domain::link::IntegrationLink;
use crate::domain::snapshot::DeviceStatusSnapshot;

/// State loaded for one ingestion.
#[derive(Debug, Clone, PartialEq)]
pub struct IngestionContext {
    pub device: UserDevice,
    pub link: Option<IntegrationLink>,
    pub snapshot: Option<DeviceStatusSnapshot>,
}

/// Writes decided by the merge.
#[derive(Debug, Clone, PartialEq)]
pub struct IngestionPlan {
    /// Snapshot to upsert.
    pub snapshot: DeviceStatusSnapshot,
    /// Link to write back when its status changed.
    pub link: Option<IntegrationLink>,
    /// Odometer value to announce once the transaction commits.
    pub odometer_event: Option<f64>,
    /// Cooldown stamp as it was before this merge.
    pub previous_odometer_event_at: Option<DateTime<Utc>>,
}

/// What an ingestion committed.
#[derive(Debug, Clone, PartialEq)]
pub struct IngestionOutcome {
    pub device: UserDevice,
    pub plan: IngestionPlan,
}

/// Pure merge decision evaluated inside the store transaction.
pub trait SnapshotMerge: Send + Sync {
    /// Decide the writes for `context`.
    fn plan(&self, context: &IngestionContext) -> IngestionPlan;
}

define_port_error! {
    /// Errors raised by the snapshot store.
    pub enum DeviceStatusStoreError {
        /// The device does not exist.
        DeviceNotFound { device_id: String } => "device {device_id} not found",
        /// Store connection could not be established.
        Connection { message: String } => "snapshot store connection failed: {message}",
        /// Query failed during execution.
        Query { message: String } => "snapshot store query failed: {message}",
    }
}

/// Port for merging telemetry into snapshots.
#[async_trait]
pub trait DeviceStatusStore: Send + Sync {
    /// Run one read-merge-write cycle for the pair.
    async fn apply_ingestion(
        &self,
        device_id: &DeviceId,
        integration_id: &IntegrationId,
        merge: &dyn SnapshotMerge,
    ) -> Result<IngestionOutcome, DeviceStatusStoreError>;

    /// Put the odometer cooldown stamp back to `previous` when no event went
    /// out for the stamp written at `stamped_at`.
    ///
    /// A stamp that has since moved on is left alone. Returns whether the
    /// stamp was restored.
    async fn release_odometer_stamp(
        &self,
        device_id: &DeviceId,
        integration_id: &IntegrationId,
        stamped_at: DateTime<Utc>,
        previous: Option<DateTime<Utc>>,
    ) -> Result<bool, DeviceStatusStoreError>;

    /// Read the stored snapshot for the pair.
    async fn find_snapshot(
        &self,
        device_id: &DeviceId,
        integration_id: &IntegrationId,
    ) -> Result<Option<DeviceStatusSnapshot>, DeviceStatusStoreError>;
}
