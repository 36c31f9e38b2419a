//! Driven port for device lookups owned by the REST layer's schema.

use async_trait::async_trait;

use super::define_port_error;
use crate::domain::device::{UserDevice, VehicleNft};
use crate::domain::identifiers::DeviceId;

define_port_error! {
    /// Errors raised while loading devices.
    pub enum DeviceRepositoryError {
        /// Store connection could not be established.
        Connection { message: String } => "device store connection failed: {message}",
        /// Query failed during execution.
        Query { message: String } => "device store query failed: {message}",
    }
}

/// Port resolving devices and their vehicle tokens.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DeviceRepository: Send + Sync {
    /// Load a device with its definition.
    async fn find_device(&self, id: &DeviceId) -> Result<Option<UserDevice>, DeviceRepositoryError>;

    /// Resolve a minted vehicle token.
    async fn find_vehicle_by_token(
        &self,
        token_id: i64,
    ) -> Result<Option<VehicleNft>, DeviceRepositoryError>;
}

/// Fixture repository that knows no devices.
#[derive(Debug, Clone, Copy, Default)]
pub struct FixtureDeviceRepository;

#[async_trait]
impl DeviceRepository for FixtureDeviceRepository {
    async fn find_device(&self, _id: &DeviceId) -> Result<Option<UserDevice>, DeviceRepositoryError> {
        Ok(None)
    }

    async fn find_vehicle_by_token(
        &self,
        _token_id: i64,
    ) -> Result<Option<VehicleNft>, DeviceRepositoryError> {
        Ok(None)
    }
}
