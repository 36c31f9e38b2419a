//! Driven port for the AutoPi hardware-management API.
//!
//! Every call is keyed by vendor identifiers so repeating it is harmless;
//! the pairing orchestrator still reads the unit's state before repeating a
//! template change.

use async_trait::async_trait;

use super::define_port_error;

/// Unit record as reported by the vendor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AutoPiUnit {
    /// Vendor device identifier used by every other call.
    pub device_id: String,
    /// Serial printed on the unit.
    pub unit_id: String,
    /// Modem IMEI.
    pub imei: String,
    /// Vendor vehicle profile bound to the unit.
    pub vehicle_id: i64,
    /// Template currently associated, if any.
    pub template_id: Option<i64>,
}

/// Vehicle profile fields written during pairing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VehicleProfilePatch {
    pub vin: Option<String>,
    pub display_name: String,
    pub year: i32,
    pub make: String,
    pub model: String,
}

define_port_error! {
    /// Errors surfaced while calling AutoPi.
    pub enum AutoPiApiError {
        /// Network transport failed before receiving a response.
        Transport { message: String } => "autopi transport failed: {message}",
        /// The call exceeded its timeout.
        Timeout { message: String } => "autopi timeout: {message}",
        /// AutoPi rate-limited the request.
        RateLimited { message: String } => "autopi rate limited request: {message}",
        /// AutoPi rejected the request.
        Rejected { status: u16, message: String } => "autopi rejected request ({status}): {message}",
        /// Response body could not be decoded.
        Decode { message: String } => "autopi response decode failed: {message}",
    }
}

impl AutoPiApiError {
    /// Whether the failure is transient (5xx, timeout, throttling).
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport { .. } | Self::Timeout { .. } | Self::RateLimited { .. } => true,
            Self::Rejected { status, .. } => *status >= 500,
            Self::Decode { .. } => false,
        }
    }
}

/// Port for the AutoPi calls used by pairing.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AutoPiApi: Send + Sync {
    /// Look a unit up by its serial.
    async fn get_device_by_unit_id(&self, unit_id: &str)
    -> Result<Option<AutoPiUnit>, AutoPiApiError>;

    /// Write VIN, display name and year onto the vehicle profile.
    async fn patch_vehicle_profile(
        &self,
        vehicle_id: i64,
        profile: &VehicleProfilePatch,
    ) -> Result<(), AutoPiApiError>;

    /// Remove the unit from `template_id`.
    async fn unassociate_device_template(
        &self,
        device_id: &str,
        template_id: i64,
    ) -> Result<(), AutoPiApiError>;

    /// Bind the unit to `template_id`.
    async fn associate_device_to_template(
        &self,
        device_id: &str,
        template_id: i64,
    ) -> Result<(), AutoPiApiError>;

    /// Request template application on the unit's next wake.
    async fn apply_template(&self, device_id: &str, template_id: i64)
    -> Result<(), AutoPiApiError>;

    /// Ask the unit to apply pending state now.
    async fn command_sync_device(&self, device_id: &str) -> Result<(), AutoPiApiError>;
}
