//! Bind an AutoPi unit to a vehicle from the command line.
//!
//! Database, AutoPi API and bus settings come from the worker's `DEVICES_*`
//! environment and configuration file; the flags only name the unit and the
//! vehicle.

use std::ffi::OsString;
use std::sync::Arc;

use clap::{ArgGroup, Parser};
use color_eyre::eyre::{Result, WrapErr, eyre};
use mockable::{Clock, DefaultClock};
use ortho_config::OrthoConfig;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt};

use telematics_backend::config::WorkerSettings;
use telematics_backend::domain::ports::{
    DeviceRepository, IntegrationLinkRepository, IntegrationRepository, MessageBus,
};
use telematics_backend::domain::{
    AutoPiPairingPorts, AutoPiPairingService, AutoPiTaskService, DeviceId, IntegrationCatalog,
    PairingRequest, PairingTarget,
};
use telematics_backend::outbound::autopi::AutoPiHttpClient;
use telematics_backend::outbound::bus::PostgresMessageBus;
use telematics_backend::outbound::persistence::{
    DbPool, DieselDeviceRepository, DieselIntegrationRepository, DieselLinkRepository,
};

#[derive(Debug, Parser)]
#[command(name = "pair-autopi", about = "Pair an AutoPi unit with a vehicle")]
#[command(group(ArgGroup::new("target").required(true).args(["device_id", "vehicle_token"])))]
struct Cli {
    /// AutoPi unit identifier.
    #[arg(long)]
    unit_id: String,
    /// Device to pair the unit with.
    #[arg(long)]
    device_id: Option<String>,
    /// Minted vehicle token to pair the unit with.
    #[arg(long)]
    vehicle_token: Option<i64>,
}

impl Cli {
    fn request(&self) -> Result<PairingRequest> {
        let unit_id = self.unit_id.trim();
        if unit_id.is_empty() {
            return Err(eyre!("unit id must not be blank"));
        }
        let target = match (&self.device_id, self.vehicle_token) {
            (Some(device_id), None) => PairingTarget::Device(DeviceId::new(device_id.trim())),
            (None, Some(token)) => PairingTarget::VehicleToken(token),
            _ => return Err(eyre!("name exactly one of --device-id or --vehicle-token")),
        };
        Ok(PairingRequest {
            unit_id: unit_id.to_owned(),
            target,
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    if let Err(e) = fmt().with_env_filter(EnvFilter::from_default_env()).try_init() {
        warn!(error = %e, "tracing init failed");
    }

    let cli = Cli::parse();
    let request = cli.request()?;
    let settings = WorkerSettings::load_from_iter([OsString::from("pair-autopi")])
        .map_err(|err| eyre!("failed to load settings: {err}"))?;

    let api = AutoPiHttpClient::new(
        settings.autopi_api_url()?,
        settings.autopi_api_key()?,
        settings.autopi_timeout(),
    )
    .wrap_err("failed to build AutoPi client")?;
    let pool = DbPool::new(settings.pool_config()?.with_max_size(2))
        .await
        .wrap_err("failed to build database pool")?;
    let clock: Arc<dyn Clock> = Arc::new(DefaultClock);

    let integrations: Arc<dyn IntegrationRepository> =
        Arc::new(DieselIntegrationRepository::new(pool.clone()));
    let bus: Arc<dyn MessageBus> = Arc::new(PostgresMessageBus::new(pool.clone(), clock.clone()));
    let ports = AutoPiPairingPorts {
        api: Arc::new(api),
        devices: Arc::new(DieselDeviceRepository::new(pool.clone())) as Arc<dyn DeviceRepository>,
        links: Arc::new(DieselLinkRepository::new(pool)) as Arc<dyn IntegrationLinkRepository>,
        catalog: Arc::new(IntegrationCatalog::new(
            integrations,
            clock.clone(),
            settings.integration_cache_ttl(),
        )),
        tasks: AutoPiTaskService::new(bus, clock.clone()),
    };
    let service = AutoPiPairingService::new(ports, clock);

    let outcome = service
        .pair(&request)
        .await
        .wrap_err_with(|| format!("failed to pair unit {}", request.unit_id))?;
    info!(
        device_id = %outcome.link.device_id,
        unit_id = %request.unit_id,
        status = %outcome.link.status,
        registration_published = outcome.registration_published(),
        "unit paired"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    fn device_targets_are_trimmed() {
        let cli = Cli::try_parse_from(["pair-autopi", "--unit-id", " unit-1 ", "--device-id", "d1"])
            .expect("parse");

        let request = cli.request().expect("request");

        assert_eq!(request.unit_id, "unit-1");
        assert_eq!(request.target, PairingTarget::Device(DeviceId::new("d1")));
    }

    #[rstest]
    fn vehicle_tokens_are_accepted() {
        let cli = Cli::try_parse_from(["pair-autopi", "--unit-id", "u", "--vehicle-token", "42"])
            .expect("parse");

        assert_eq!(cli.request().expect("request").target, PairingTarget::VehicleToken(42));
    }

    #[rstest]
    #[case::no_target(&["pair-autopi", "--unit-id", "u"])]
    #[case::both_targets(&["pair-autopi", "--unit-id", "u", "--device-id", "d", "--vehicle-token", "1"])]
    fn exactly_one_target_is_required(#[case] args: &[&str]) {
        assert!(Cli::try_parse_from(args).is_err());
    }

    #[rstest]
    fn blank_units_are_rejected() {
        let cli = Cli::try_parse_from(["pair-autopi", "--unit-id", "  ", "--device-id", "d1"])
            .expect("parse");

        assert!(cli.request().is_err());
    }
}
