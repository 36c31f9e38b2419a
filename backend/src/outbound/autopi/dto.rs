//! Wire shapes for the AutoPi REST API.
//!
//! Responses decode into these DTOs first and are then mapped into port
//! records in one pass.

use serde::{Deserialize, Serialize};

use crate::domain::ports::{AutoPiUnit, VehicleProfilePatch};

#[derive(Debug, Deserialize)]
pub(super) struct DongleDeviceDto {
    pub(super) id: String,
    pub(super) unit_id: String,
    #[serde(default)]
    pub(super) imei: String,
    pub(super) vehicle: DongleVehicleDto,
    #[serde(default)]
    pub(super) template: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub(super) struct DongleVehicleDto {
    pub(super) id: i64,
}

impl DongleDeviceDto {
    pub(super) fn into_unit(self) -> AutoPiUnit {
        AutoPiUnit {
            device_id: self.id,
            unit_id: self.unit_id,
            imei: self.imei,
            vehicle_id: self.vehicle.id,
            template_id: self.template,
        }
    }
}

#[derive(Debug, Serialize)]
pub(super) struct VehicleProfileDto<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(super) vin: Option<&'a str>,
    #[serde(rename = "callName")]
    pub(super) call_name: &'a str,
    pub(super) year: i32,
    pub(super) make: &'a str,
    pub(super) model: &'a str,
}

impl<'a> From<&'a VehicleProfilePatch> for VehicleProfileDto<'a> {
    fn from(patch: &'a VehicleProfilePatch) -> Self {
        Self {
            vin: patch.vin.as_deref(),
            call_name: patch.display_name.as_str(),
            year: patch.year,
            make: patch.make.as_str(),
            model: patch.model.as_str(),
        }
    }
}

#[derive(Debug, Serialize)]
pub(super) struct TemplateDevicesDto<'a> {
    pub(super) devices: [&'a str; 1],
    pub(super) drop_extras: bool,
    pub(super) add_missing: bool,
}

impl<'a> TemplateDevicesDto<'a> {
    pub(super) fn single(device_id: &'a str) -> Self {
        Self {
            devices: [device_id],
            drop_extras: false,
            add_missing: true,
        }
    }
}

#[derive(Debug, Serialize)]
pub(super) struct ApplyTemplateDto {
    pub(super) template: i64,
}

#[derive(Debug, Serialize)]
pub(super) struct RawCommandDto<'a> {
    pub(super) command: &'a str,
}
