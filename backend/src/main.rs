//! Telematics worker: consumes device-status and task-status envelopes.

use std::sync::Arc;

use color_eyre::eyre::{Result, WrapErr, eyre};
use mockable::{Clock, DefaultClock};
use ortho_config::OrthoConfig;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt};

use telematics_backend::config::WorkerSettings;
use telematics_backend::domain::ports::{
    CredentialCipher, DeviceStatusStore, IntegrationLinkRepository, IntegrationRepository,
    MessageBus, MessageBusSubscriber, Topic,
};
use telematics_backend::domain::{
    DeviceEventEmitter, DeviceStatusIngestionService, EnvelopeHandler, IntegrationCatalog,
    TaskStatusListener,
};
use telematics_backend::inbound::consumer::{AckPolicy, ConsumerLoop};
use telematics_backend::outbound::bus::PostgresMessageBus;
use telematics_backend::outbound::cipher::AesGcmCipher;
use telematics_backend::outbound::persistence::{
    DbPool, DieselDeviceStatusStore, DieselIntegrationRepository, DieselLinkRepository,
    run_pending_migrations,
};

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    if let Err(e) = fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .json()
        .try_init()
    {
        warn!(error = %e, "tracing init failed");
    }

    let settings = WorkerSettings::load_from_iter(std::env::args_os())
        .map_err(|err| eyre!("failed to load settings: {err}"))?;
    run(settings).await
}

async fn run(settings: WorkerSettings) -> Result<()> {
    let database_url = settings.database_url()?;
    let applied = run_pending_migrations(database_url)
        .await
        .wrap_err("failed to run migrations")?;
    info!(applied, "migrations complete");

    // Bad keys fail the deploy rather than the first credential write.
    let _rest_cipher: Arc<dyn CredentialCipher> =
        Arc::new(AesGcmCipher::from_base64_key(settings.credential_key()?)?);
    let _task_cipher: Arc<dyn CredentialCipher> =
        Arc::new(AesGcmCipher::from_base64_key(settings.task_credential_key()?)?);

    let pool = DbPool::new(settings.pool_config()?)
        .await
        .wrap_err("failed to build database pool")?;
    let clock: Arc<dyn Clock> = Arc::new(DefaultClock);

    let integrations: Arc<dyn IntegrationRepository> =
        Arc::new(DieselIntegrationRepository::new(pool.clone()));
    let catalog = Arc::new(IntegrationCatalog::new(
        integrations,
        clock.clone(),
        settings.integration_cache_ttl(),
    ));
    for name in settings.vendor_names() {
        match catalog.by_name(name).await {
            Ok(Some(integration)) => {
                info!(vendor = name, integration_id = %integration.id, "integration resolved");
            }
            Ok(None) => warn!(vendor = name, "integration not configured"),
            Err(error) => warn!(vendor = name, %error, "integration lookup failed"),
        }
    }

    let bus = PostgresMessageBus::new(pool.clone(), clock.clone())
        .with_poll_interval(settings.bus_poll_interval())
        .with_batch_size(settings.bus_batch_size());
    let publisher: Arc<dyn MessageBus> = Arc::new(bus.clone());
    let events = DeviceEventEmitter::new(publisher, clock.clone());

    let store: Arc<dyn DeviceStatusStore> = Arc::new(DieselDeviceStatusStore::new(pool.clone()));
    let links: Arc<dyn IntegrationLinkRepository> = Arc::new(DieselLinkRepository::new(pool));

    let ingestion: Arc<dyn EnvelopeHandler> = Arc::new(DeviceStatusIngestionService::new(
        catalog.clone(),
        store,
        events,
        clock.clone(),
    ));
    let listener: Arc<dyn EnvelopeHandler> =
        Arc::new(TaskStatusListener::new(catalog, links, clock));

    let (stop_tx, stop_rx) = watch::channel(false);
    let mut consumers = JoinSet::new();
    for (topic, handler) in [
        (Topic::DeviceStatus, ingestion),
        (Topic::TaskStatusUpdate, listener),
    ] {
        let subscription = bus
            .subscribe(topic, settings.consumer_group())
            .await
            .wrap_err_with(|| format!("failed to subscribe to {topic}"))?;
        let consumer = ConsumerLoop::new(topic, subscription, handler, AckPolicy::Always);
        let mut stop = stop_rx.clone();
        consumers.spawn(consumer.run(async move {
            if stop.wait_for(|stopping| *stopping).await.is_err() {
                warn!("shutdown channel dropped");
            }
        }));
    }

    tokio::signal::ctrl_c()
        .await
        .wrap_err("failed to listen for ctrl-c")?;
    info!("shutdown requested");
    if stop_tx.send(true).is_err() {
        warn!("no consumers left to stop");
    }
    while let Some(joined) = consumers.join_next().await {
        if let Err(error) = joined {
            warn!(%error, "consumer task failed");
        }
    }
    info!("worker stopped");
    Ok(())
}
