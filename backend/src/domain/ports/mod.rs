//! Driven ports for the hexagonal boundary.

mod macros;
pub(crate) use macros::define_port_error;

mod autopi_api;
mod credential_cipher;
mod device_repository;
mod device_status_store;
mod integration_repository;
mod link_repository;
mod message_bus;

#[cfg(test)]
pub use autopi_api::MockAutoPiApi;
pub use autopi_api::{AutoPiApi, AutoPiApiError, AutoPiUnit, VehicleProfilePatch};
#[cfg(test)]
pub use credential_cipher::MockCredentialCipher;
pub use credential_cipher::{CredentialCipher, CredentialCipherError, FixtureCredentialCipher};
#[cfg(test)]
pub use device_repository::MockDeviceRepository;
pub use device_repository::{DeviceRepository, DeviceRepositoryError, FixtureDeviceRepository};
pub use device_status_store::{
    DeviceStatusStore, DeviceStatusStoreError, IngestionContext, IngestionOutcome, IngestionPlan,
    SnapshotMerge,
};
#[cfg(test)]
pub use integration_repository::MockIntegrationRepository;
pub use integration_repository::{
    FixtureIntegrationRepository, IntegrationRepository, IntegrationRepositoryError,
};
#[cfg(test)]
pub use link_repository::MockIntegrationLinkRepository;
pub use link_repository::{
    FixtureIntegrationLinkRepository, IntegrationLinkRepository, LinkRepositoryError,
};
#[cfg(test)]
pub use message_bus::{MockBusSubscription, MockMessageBus};
pub use message_bus::{
    BusMessage, BusSubscription, FixtureMessageBus, MessageBus, MessageBusError,
    MessageBusSubscriber, ReceivedMessage, Topic,
};
