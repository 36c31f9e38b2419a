//! Pairs an AutoPi unit with a vehicle and a configuration template.
//!
//! Pairing runs as a saga. The link is inserted as `Pending` in its own
//! write, then each vendor step persists the sub-status it completed before
//! the next step starts. A failure marks the link `Failed` and keeps it for
//! diagnosis; pairing the same unit again resumes after the last persisted
//! step. Every conflict is detected before the first vendor call.

use std::sync::Arc;

use mockable::Clock;
use serde_json::json;
use tracing::{info, warn};

use crate::domain::autopi_tasks::AutoPiTaskService;
use crate::domain::device::UserDevice;
use crate::domain::error::Error;
use crate::domain::identifiers::{DeviceId, TaskId};
use crate::domain::integration::{Integration, IntegrationVendor};
use crate::domain::integration_catalog::IntegrationCatalog;
use crate::domain::link::{IntegrationLink, LinkActor, LinkStatus, PairingSubStatus};
use crate::domain::ports::{
    AutoPiApi, AutoPiApiError, AutoPiUnit, DeviceRepository, IntegrationLinkRepository,
    LinkRepositoryError, VehicleProfilePatch,
};

mod template;

pub use template::resolve_template;

/// Vehicle to pair the unit with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PairingTarget {
    /// A device by identifier.
    Device(DeviceId),
    /// A minted vehicle token, resolved to its device.
    VehicleToken(i64),
}

/// Request to bind `unit_id` to `target`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairingRequest {
    pub unit_id: String,
    pub target: PairingTarget,
}

/// Result of a successful pairing.
#[derive(Debug, Clone, PartialEq)]
pub struct PairingOutcome {
    /// Link as persisted, in `PendingFirstData`.
    pub link: IntegrationLink,
    /// VIN confirmation task, when the registration reached the bus.
    pub vin_task_id: Option<TaskId>,
}

impl PairingOutcome {
    /// Whether registration and VIN confirmation were published.
    pub fn registration_published(&self) -> bool {
        self.vin_task_id.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PairingStep {
    PatchProfile,
    AssociateTemplate,
    ApplyTemplate,
    SyncDevice,
}

impl PairingStep {
    const ALL: [Self; 4] = [
        Self::PatchProfile,
        Self::AssociateTemplate,
        Self::ApplyTemplate,
        Self::SyncDevice,
    ];

    fn completes(self) -> PairingSubStatus {
        match self {
            Self::PatchProfile => PairingSubStatus::PatchedVehicleProfile,
            Self::AssociateTemplate => PairingSubStatus::AssociatedDeviceToTemplate,
            Self::ApplyTemplate => PairingSubStatus::AppliedTemplate,
            Self::SyncDevice => PairingSubStatus::PendingTemplateConfirm,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::PatchProfile => "patch_vehicle_profile",
            Self::AssociateTemplate => "associate_device_to_template",
            Self::ApplyTemplate => "apply_template",
            Self::SyncDevice => "command_sync_device",
        }
    }
}

/// Ports needed by the pairing orchestrator.
pub struct AutoPiPairingPorts {
    pub api: Arc<dyn AutoPiApi>,
    pub devices: Arc<dyn DeviceRepository>,
    pub links: Arc<dyn IntegrationLinkRepository>,
    pub catalog: Arc<IntegrationCatalog>,
    pub tasks: AutoPiTaskService,
}

/// AutoPi pairing orchestrator.
pub struct AutoPiPairingService {
    api: Arc<dyn AutoPiApi>,
    devices: Arc<dyn DeviceRepository>,
    links: Arc<dyn IntegrationLinkRepository>,
    catalog: Arc<IntegrationCatalog>,
    tasks: AutoPiTaskService,
    clock: Arc<dyn Clock>,
}

impl AutoPiPairingService {
    pub fn new(ports: AutoPiPairingPorts, clock: Arc<dyn Clock>) -> Self {
        Self {
            api: ports.api,
            devices: ports.devices,
            links: ports.links,
            catalog: ports.catalog,
            tasks: ports.tasks,
            clock,
        }
    }

    /// Pair a unit with a vehicle.
    ///
    /// # Errors
    /// - `NotFound` when the device, vehicle token or unit does not exist,
    ///   or the vehicle has been deleted.
    /// - `Conflict` when the device is already paired or the unit is bound
    ///   to another device. No vendor call is made in either case.
    /// - `InternalError` when no template applies.
    /// - `ServiceUnavailable` when a store or vendor call fails; if the link
    ///   had been created it is left `Failed` with its sub-status.
    pub async fn pair(&self, request: &PairingRequest) -> Result<PairingOutcome, Error> {
        let device = self.resolve_device(&request.target).await?;
        let integration = self
            .catalog
            .by_vendor(&IntegrationVendor::AutoPi)
            .await
            .map_err(|err| Error::service_unavailable(err.to_string()))?
            .ok_or_else(|| Error::internal("autopi integration is not configured"))?;

        let existing = self
            .links
            .find(&device.id, &integration.id)
            .await
            .map_err(store_error)?;
        if let Some(link) = existing.as_ref()
            && link.status != LinkStatus::Failed
        {
            return Err(Error::conflict("device is already paired").with_details(json!({
                "deviceId": device.id,
                "integrationId": integration.id,
                "status": link.status.as_str(),
            })));
        }

        if let Some(bound) = self.bound_elsewhere(&integration, &request.unit_id, &device).await? {
            if let Some(mut failed) = existing {
                failed.transition_to(
                    LinkStatus::DuplicateIntegration,
                    LinkActor::PairingOrchestrator,
                    self.clock.utc(),
                )?;
                self.links.update(&failed).await.map_err(store_error)?;
                warn!(
                    device_id = %device.id,
                    unit_id = %request.unit_id,
                    "failed pairing superseded; unit now bound to another device"
                );
            }
            return Err(Error::conflict("unit is paired with another device").with_details(json!({
                "unitId": request.unit_id,
                "boundDeviceId": bound.device_id,
            })));
        }

        let unit = self
            .api
            .get_device_by_unit_id(&request.unit_id)
            .await
            .map_err(vendor_error)?
            .ok_or_else(|| Error::not_found(format!("autopi unit {} not found", request.unit_id)))?;
        let template_id = resolve_template(&device, &integration)?;

        let mut link = self
            .prepare_link(existing, &device, &integration, &unit, template_id)
            .await?;
        let resumed_from = link.metadata.autopi.sub_status;

        for step in PairingStep::ALL {
            if resumed_from >= Some(step.completes()) {
                continue;
            }
            let result = match self.run_step(step, &unit, &device, template_id).await {
                Ok(()) => {
                    link.metadata.autopi.sub_status = Some(step.completes());
                    link.updated_at = self.clock.utc();
                    self.links.update(&link).await.map_err(store_error)
                }
                Err(err) => Err(vendor_error(err)),
            };
            if let Err(err) = result {
                return Err(self.fail(link, step, err).await);
            }
        }

        link.metadata.autopi.registration_error = None;
        link.transition_to(
            LinkStatus::PendingFirstData,
            LinkActor::PairingOrchestrator,
            self.clock.utc(),
        )?;
        self.links.update(&link).await.map_err(store_error)?;
        info!(
            device_id = %device.id,
            integration_id = %integration.id,
            unit_id = %unit.unit_id,
            template_id,
            resumed = resumed_from.is_some(),
            "autopi unit paired"
        );

        let vin_task_id = match self
            .tasks
            .announce_pairing(&integration.id, &unit.unit_id, &device.id)
            .await
        {
            Ok(task_id) => Some(task_id),
            Err(err) => {
                warn!(
                    device_id = %device.id,
                    unit_id = %unit.unit_id,
                    error = %err,
                    "autopi registration could not be published"
                );
                None
            }
        };
        Ok(PairingOutcome { link, vin_task_id })
    }

    async fn resolve_device(&self, target: &PairingTarget) -> Result<UserDevice, Error> {
        let device_id = match target {
            PairingTarget::Device(id) => id.clone(),
            PairingTarget::VehicleToken(token_id) => {
                let vehicle = self
                    .devices
                    .find_vehicle_by_token(*token_id)
                    .await
                    .map_err(|err| Error::service_unavailable(err.to_string()))?
                    .ok_or_else(|| Error::not_found(format!("vehicle {token_id} not found")))?;
                vehicle.device_id.ok_or_else(|| {
                    Error::not_found(format!("vehicle {token_id} has been deleted"))
                        .with_details(json!({ "tokenId": token_id, "reason": "deleted" }))
                })?
            }
        };
        self.devices
            .find_device(&device_id)
            .await
            .map_err(|err| Error::service_unavailable(err.to_string()))?
            .ok_or_else(|| Error::not_found(format!("device {device_id} not found")))
    }

    async fn bound_elsewhere(
        &self,
        integration: &Integration,
        unit_id: &str,
        device: &UserDevice,
    ) -> Result<Option<IntegrationLink>, Error> {
        let bound = self
            .links
            .find_by_autopi_unit(&integration.id, unit_id)
            .await
            .map_err(store_error)?;
        Ok(bound.filter(|link| link.device_id != device.id && !link.status.is_terminal()))
    }

    async fn prepare_link(
        &self,
        existing: Option<IntegrationLink>,
        device: &UserDevice,
        integration: &Integration,
        unit: &AutoPiUnit,
        template_id: i64,
    ) -> Result<IntegrationLink, Error> {
        let now = self.clock.utc();
        match existing {
            Some(mut link) => {
                if link.metadata.autopi.unit_id.as_deref() != Some(unit.unit_id.as_str())
                    || link.metadata.autopi.template_id != Some(template_id)
                {
                    link.metadata.autopi.sub_status = None;
                }
                link.transition_to(LinkStatus::Pending, LinkActor::PairingOrchestrator, now)?;
                record_unit(&mut link, unit, template_id);
                self.links.update(&link).await.map_err(store_error)?;
                Ok(link)
            }
            None => {
                let mut link = IntegrationLink::pending(device.id.clone(), integration.id.clone(), now);
                record_unit(&mut link, unit, template_id);
                self.links.insert(&link).await.map_err(|err| match err {
                    LinkRepositoryError::Duplicate { .. } => {
                        Error::conflict("device is already paired")
                    }
                    other => store_error(other),
                })?;
                Ok(link)
            }
        }
    }

    async fn run_step(
        &self,
        step: PairingStep,
        unit: &AutoPiUnit,
        device: &UserDevice,
        template_id: i64,
    ) -> Result<(), AutoPiApiError> {
        match step {
            PairingStep::PatchProfile => {
                let profile = VehicleProfilePatch {
                    vin: device.vin.clone(),
                    display_name: device.name.clone().unwrap_or_else(|| {
                        format!("{} {}", device.definition.make, device.definition.model)
                    }),
                    year: device.definition.year,
                    make: device.definition.make.clone(),
                    model: device.definition.model.clone(),
                };
                self.api.patch_vehicle_profile(unit.vehicle_id, &profile).await
            }
            PairingStep::AssociateTemplate => {
                if unit.template_id == Some(template_id) {
                    return Ok(());
                }
                if let Some(previous) = unit.template_id {
                    self.api
                        .unassociate_device_template(&unit.device_id, previous)
                        .await?;
                }
                self.api
                    .associate_device_to_template(&unit.device_id, template_id)
                    .await
            }
            PairingStep::ApplyTemplate => self.api.apply_template(&unit.device_id, template_id).await,
            PairingStep::SyncDevice => self.api.command_sync_device(&unit.device_id).await,
        }
    }

    async fn fail(&self, mut link: IntegrationLink, step: PairingStep, cause: Error) -> Error {
        link.metadata.autopi.registration_error = Some(cause.message().to_owned());
        let details = json!({
            "step": step.name(),
            "subStatus": link.metadata.autopi.sub_status,
            "error": cause.message(),
        });
        match link.transition_to(LinkStatus::Failed, LinkActor::PairingOrchestrator, self.clock.utc()) {
            Ok(()) => {
                if let Err(err) = self.links.update(&link).await {
                    warn!(
                        device_id = %link.device_id,
                        error = %err,
                        "failed pairing could not be recorded"
                    );
                }
            }
            Err(err) => warn!(device_id = %link.device_id, error = %err, "pairing failure not recorded"),
        }
        warn!(
            device_id = %link.device_id,
            integration_id = %link.integration_id,
            step = step.name(),
            error = %cause,
            "autopi pairing failed"
        );
        Error::service_unavailable(format!("autopi pairing failed at {}", step.name()))
            .with_details(details)
    }
}

fn record_unit(link: &mut IntegrationLink, unit: &AutoPiUnit, template_id: i64) {
    link.external_id = Some(unit.device_id.clone());
    let autopi = &mut link.metadata.autopi;
    autopi.unit_id = Some(unit.unit_id.clone());
    autopi.imei = Some(unit.imei.clone());
    autopi.device_id = Some(unit.device_id.clone());
    autopi.vehicle_id = Some(unit.vehicle_id);
    autopi.template_id = Some(template_id);
}

fn store_error(err: LinkRepositoryError) -> Error {
    Error::service_unavailable(err.to_string())
}

fn vendor_error(err: AutoPiApiError) -> Error {
    Error::service_unavailable(err.to_string())
        .with_details(json!({ "transient": err.is_transient() }))
}
