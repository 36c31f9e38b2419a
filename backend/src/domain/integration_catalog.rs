//! Injectable, time-bounded cache of integration reference data.
//!
//! The catalog reloads from the store once its copy is older than the
//! configured TTL. A lookup that misses against a fresh copy forces one
//! reload before giving up, so an integration added at runtime becomes
//! visible on first use rather than after the TTL.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use mockable::Clock;
use tokio::sync::Mutex;
use tracing::debug;

use crate::domain::envelope::source_suffix;
use crate::domain::identifiers::IntegrationId;
use crate::domain::integration::{Integration, IntegrationVendor};
use crate::domain::ports::{IntegrationRepository, IntegrationRepositoryError};

struct CachedIntegrations {
    loaded_at: DateTime<Utc>,
    integrations: Arc<Vec<Integration>>,
}

/// Cached integration lookups.
pub struct IntegrationCatalog {
    repository: Arc<dyn IntegrationRepository>,
    clock: Arc<dyn Clock>,
    ttl: TimeDelta,
    cache: Mutex<Option<CachedIntegrations>>,
}

impl IntegrationCatalog {
    /// Build a catalog whose copy goes stale after `ttl`.
    pub fn new(
        repository: Arc<dyn IntegrationRepository>,
        clock: Arc<dyn Clock>,
        ttl: Duration,
    ) -> Self {
        Self {
            repository,
            clock,
            ttl: TimeDelta::from_std(ttl).unwrap_or(TimeDelta::MAX),
            cache: Mutex::new(None),
        }
    }

    /// Find an integration by identifier.
    pub async fn by_id(
        &self,
        id: &IntegrationId,
    ) -> Result<Option<Integration>, IntegrationRepositoryError> {
        self.find(|integration| &integration.id == id).await
    }

    /// Find the integration served by `vendor`.
    pub async fn by_vendor(
        &self,
        vendor: &IntegrationVendor,
    ) -> Result<Option<Integration>, IntegrationRepositoryError> {
        self.find(|integration| &integration.vendor == vendor).await
    }

    /// Find an integration by its stored vendor name, ignoring case.
    pub async fn by_name(
        &self,
        name: &str,
    ) -> Result<Option<Integration>, IntegrationRepositoryError> {
        self.find(|integration| integration.vendor_name.eq_ignore_ascii_case(name.trim()))
            .await
    }

    /// Find the integration named by an envelope `source`.
    ///
    /// The source's last path segment is compared against integration ids.
    pub async fn by_source(
        &self,
        source: &str,
    ) -> Result<Option<Integration>, IntegrationRepositoryError> {
        let Some(suffix) = source_suffix(source) else {
            return Ok(None);
        };
        self.find(|integration| integration.id.as_str() == suffix).await
    }

    async fn find<F>(&self, predicate: F) -> Result<Option<Integration>, IntegrationRepositoryError>
    where
        F: Fn(&Integration) -> bool,
    {
        let (integrations, reloaded) = self.current(false).await?;
        if let Some(found) = integrations.iter().find(|i| predicate(i)) {
            return Ok(Some(found.clone()));
        }
        if reloaded {
            return Ok(None);
        }
        let (integrations, _) = self.current(true).await?;
        Ok(integrations.iter().find(|i| predicate(i)).cloned())
    }

    async fn current(
        &self,
        force: bool,
    ) -> Result<(Arc<Vec<Integration>>, bool), IntegrationRepositoryError> {
        let now = self.clock.utc();
        let mut cache = self.cache.lock().await;
        if let Some(cached) = cache.as_ref()
            && !force
            && now.signed_duration_since(cached.loaded_at) < self.ttl
        {
            return Ok((Arc::clone(&cached.integrations), false));
        }
        let integrations = Arc::new(self.repository.list_integrations().await?);
        debug!(count = integrations.len(), forced = force, "integration catalog reloaded");
        *cache = Some(CachedIntegrations {
            loaded_at: now,
            integrations: Arc::clone(&integrations),
        });
        Ok((integrations, true))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::integration::{IntegrationStyle, IntegrationType};
    use crate::domain::ports::MockIntegrationRepository;
    use crate::test_support::MutableClock;
    use chrono::TimeZone;
    use rstest::{fixture, rstest};

    fn integration(id: &str, name: &str) -> Integration {
        Integration::new(
            IntegrationId::new(id),
            name,
            IntegrationType::Api,
            IntegrationStyle::Addon,
        )
    }

    #[fixture]
    fn clock() -> Arc<MutableClock> {
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).single().expect("valid time");
        Arc::new(MutableClock::new(now))
    }

    fn catalog(repo: MockIntegrationRepository, clock: Arc<MutableClock>) -> IntegrationCatalog {
        IntegrationCatalog::new(Arc::new(repo), clock, Duration::from_secs(300))
    }

    #[rstest]
    #[tokio::test]
    async fn hits_are_served_from_cache_within_ttl(clock: Arc<MutableClock>) {
        let mut repo = MockIntegrationRepository::new();
        repo.expect_list_integrations()
            .times(1)
            .returning(|| Ok(vec![integration("i-smartcar", "SmartCar")]));
        let catalog = catalog(repo, Arc::clone(&clock));

        for _ in 0..3 {
            let found = catalog
                .by_vendor(&IntegrationVendor::Smartcar)
                .await
                .expect("lookup");
            assert!(found.is_some());
        }
    }

    #[rstest]
    #[tokio::test]
    async fn stale_copies_reload(clock: Arc<MutableClock>) {
        let mut repo = MockIntegrationRepository::new();
        repo.expect_list_integrations()
            .times(2)
            .returning(|| Ok(vec![integration("i-tesla", "Tesla")]));
        let catalog = catalog(repo, Arc::clone(&clock));

        catalog.by_name("tesla").await.expect("first lookup");
        clock.advance_seconds(301);
        let found = catalog.by_name("TESLA").await.expect("second lookup");
        assert_eq!(found.map(|i| i.vendor), Some(IntegrationVendor::Tesla));
    }

    #[rstest]
    #[tokio::test]
    async fn a_miss_forces_one_reload(clock: Arc<MutableClock>) {
        let mut repo = MockIntegrationRepository::new();
        let mut seq = mockall::Sequence::new();
        repo.expect_list_integrations()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Ok(vec![integration("i-smartcar", "SmartCar")]));
        repo.expect_list_integrations()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| {
                Ok(vec![
                    integration("i-smartcar", "SmartCar"),
                    integration("i-autopi", "AutoPi"),
                ])
            });
        let catalog = catalog(repo, clock);

        catalog.by_id(&IntegrationId::new("i-smartcar")).await.expect("warm cache");
        let found = catalog
            .by_source("dimo/integration/i-autopi")
            .await
            .expect("lookup after reload");
        assert_eq!(found.map(|i| i.vendor), Some(IntegrationVendor::AutoPi));
    }

    #[rstest]
    #[tokio::test]
    async fn a_miss_on_a_fresh_load_does_not_reload_twice(clock: Arc<MutableClock>) {
        let mut repo = MockIntegrationRepository::new();
        repo.expect_list_integrations().times(1).returning(|| Ok(Vec::new()));
        let catalog = catalog(repo, clock);

        let found = catalog.by_id(&IntegrationId::new("nope")).await.expect("lookup");
        assert!(found.is_none());
    }

    #[rstest]
    #[tokio::test]
    async fn store_errors_propagate(clock: Arc<MutableClock>) {
        let mut repo = MockIntegrationRepository::new();
        repo.expect_list_integrations()
            .returning(|| Err(IntegrationRepositoryError::connection("refused")));
        let catalog = catalog(repo, clock);

        let err = catalog.by_name("SmartCar").await.expect_err("store down");
        assert_eq!(err, IntegrationRepositoryError::connection("refused"));
    }

    #[rstest]
    #[tokio::test]
    async fn sources_without_a_suffix_never_hit_the_store(clock: Arc<MutableClock>) {
        let mut repo = MockIntegrationRepository::new();
        repo.expect_list_integrations().times(0);
        let catalog = catalog(repo, clock);

        assert!(catalog.by_source("dimo/integration/").await.expect("lookup").is_none());
    }
}
