//! Driven port persisting integration links.
//!
//! One row exists per (device, integration) pair. `insert` fails with
//! `Duplicate` when the pair is already bound.

use async_trait::async_trait;

use super::define_port_error;
use crate::domain::identifiers::{DeviceId, IntegrationId, TaskId};
use crate::domain::link::IntegrationLink;

define_port_error! {
    /// Errors raised by link persistence.
    pub enum LinkRepositoryError {
        /// Store connection could not be established.
        Connection { message: String } => "link store connection failed: {message}",
        /// Query failed during execution.
        Query { message: String } => "link store query failed: {message}",
        /// A link already exists for the pair.
        Duplicate { device_id: String, integration_id: String } =>
            "link already exists for device {device_id} and integration {integration_id}",
        /// The link to update does not exist.
        Missing { device_id: String, integration_id: String } =>
            "no link for device {device_id} and integration {integration_id}",
    }
}

/// Port for reading and writing integration links.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait IntegrationLinkRepository: Send + Sync {
    /// Load the link for a pair.
    async fn find(
        &self,
        device_id: &DeviceId,
        integration_id: &IntegrationId,
    ) -> Result<Option<IntegrationLink>, LinkRepositoryError>;

    /// Load the link currently owning `task_id`.
    async fn find_by_task_id(
        &self,
        task_id: &TaskId,
    ) -> Result<Option<IntegrationLink>, LinkRepositoryError>;

    /// Load the live link whose metadata names AutoPi unit `unit_id`.
    ///
    /// `Failed` and `DuplicateIntegration` rows are ignored so a stale
    /// terminal row never hides the binding that still owns the unit.
    async fn find_by_autopi_unit(
        &self,
        integration_id: &IntegrationId,
        unit_id: &str,
    ) -> Result<Option<IntegrationLink>, LinkRepositoryError>;

    /// Insert a new link.
    async fn insert(&self, link: &IntegrationLink) -> Result<(), LinkRepositoryError>;

    /// Overwrite the mutable columns of an existing link.
    async fn update(&self, link: &IntegrationLink) -> Result<(), LinkRepositoryError>;
}

/// Fixture repository that stores nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct FixtureIntegrationLinkRepository;

#[async_trait]
impl IntegrationLinkRepository for FixtureIntegrationLinkRepository {
    async fn find(
        &self,
        _device_id: &DeviceId,
        _integration_id: &IntegrationId,
    ) -> Result<Option<IntegrationLink>, LinkRepositoryError> {
        Ok(None)
    }

    async fn find_by_task_id(
        &self,
        _task_id: &TaskId,
    ) -> Result<Option<IntegrationLink>, LinkRepositoryError> {
        Ok(None)
    }

    async fn find_by_autopi_unit(
        &self,
        _integration_id: &IntegrationId,
        _unit_id: &str,
    ) -> Result<Option<IntegrationLink>, LinkRepositoryError> {
        Ok(None)
    }

    async fn insert(&self, _link: &IntegrationLink) -> Result<(), LinkRepositoryError> {
        Ok(())
    }

    async fn update(&self, _link: &IntegrationLink) -> Result<(), LinkRepositoryError> {
        Ok(())
    }
}
