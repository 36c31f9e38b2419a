//! Driven port for integration reference data.

use async_trait::async_trait;

use super::define_port_error;
use crate::domain::integration::Integration;

define_port_error! {
    /// Errors raised while loading integrations.
    pub enum IntegrationRepositoryError {
        /// Store connection could not be established.
        Connection { message: String } => "integration store connection failed: {message}",
        /// Query failed during execution.
        Query { message: String } => "integration store query failed: {message}",
    }
}

/// Port listing every configured integration.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait IntegrationRepository: Send + Sync {
    /// Load all integrations.
    async fn list_integrations(&self) -> Result<Vec<Integration>, IntegrationRepositoryError>;
}

/// Fixture repository holding a fixed list.
#[derive(Debug, Clone, Default)]
pub struct FixtureIntegrationRepository {
    integrations: Vec<Integration>,
}

impl FixtureIntegrationRepository {
    /// Serve `integrations` from every call.
    pub fn new(integrations: Vec<Integration>) -> Self {
        Self { integrations }
    }
}

#[async_trait]
impl IntegrationRepository for FixtureIntegrationRepository {
    async fn list_integrations(&self) -> Result<Vec<Integration>, IntegrationRepositoryError> {
        Ok(self.integrations.clone())
    }
}
