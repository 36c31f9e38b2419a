//! Domain primitives, services, and ports.
//!
//! Purpose: model integration links, telemetry snapshots, and the bus
//! envelopes exchanged with pollers, and host the services that move links
//! through their lifecycle. Adapters live under `outbound`; everything here
//! depends only on the traits in [`ports`].
//!
//! Public surface:
//! - Error / ErrorCode: service-level failure with a stable code.
//! - IntegrationLink / LinkStatus: the (device, integration) association and
//!   its guarded lifecycle.
//! - Envelope: the cloud-event shaped bus message.
//! - Services: task emitters, AutoPi pairing, device-status ingestion, and
//!   the task-status listener.

pub mod autopi_pairing;
pub mod autopi_tasks;
pub mod device;
pub mod device_events;
pub mod device_status_ingestion;
pub mod envelope;
pub mod envelope_handler;
pub mod error;
pub mod identifiers;
pub mod integration;
pub mod integration_catalog;
pub mod link;
pub mod ports;
pub mod snapshot;
pub mod task_emitter;
pub mod task_status_listener;
pub mod telemetry;

pub use self::autopi_pairing::{
    AutoPiPairingPorts, AutoPiPairingService, PairingOutcome, PairingRequest, PairingTarget,
};
pub use self::autopi_tasks::AutoPiTaskService;
pub use self::device::{DeviceDefinition, Powertrain, UserDevice, VehicleNft};
pub use self::device_events::DeviceEventEmitter;
pub use self::device_status_ingestion::{DeviceStatusIngestionService, should_notify_odometer};
pub use self::envelope::{Envelope, event_types, integration_source, source_suffix};
pub use self::envelope_handler::{EnvelopeHandler, IngestError};
pub use self::error::{Error, ErrorCode};
pub use self::identifiers::{DeviceId, IntegrationId, TaskId, UserId};
pub use self::integration::{
    Integration, IntegrationStyle, IntegrationType, IntegrationVendor, TemplateDefaults,
};
pub use self::integration_catalog::IntegrationCatalog;
pub use self::link::{
    AutoPiMetadata, EncryptedToken, IntegrationLink, LinkActor, LinkMetadata, LinkStatus,
    PairingSubStatus,
};
pub use self::snapshot::DeviceStatusSnapshot;
pub use self::task_emitter::{
    PollTaskEmitter, PollTaskPorts, PollTaskService, SmartcarTaskService, TeslaTaskService,
};
pub use self::task_status_listener::TaskStatusListener;
pub use self::telemetry::{StatusPayload, VehicleSignals, VendorReading};

/// Convenient service result alias.
///
/// # Examples
/// ```
/// use telematics_backend::domain::{DomainResult, Error};
///
/// fn lookup() -> DomainResult<()> {
///     Err(Error::not_found("no such device"))
/// }
/// assert!(lookup().is_err());
/// ```
pub type DomainResult<T> = Result<T, Error>;
