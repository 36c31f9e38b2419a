//! User devices and the definitions they reference.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::identifiers::{DeviceId, UserId};

/// Vehicle powertrain as recorded on the device definition.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "UPPERCASE")]
pub enum Powertrain {
    /// Internal combustion engine. Assumed when the definition is silent.
    #[default]
    Ice,
    /// Hybrid electric.
    Hev,
    /// Plug-in hybrid electric.
    Phev,
    /// Battery electric.
    Bev,
    /// Fuel-cell electric.
    Fcev,
}

impl Powertrain {
    /// Parse a stored powertrain code, defaulting to [`Powertrain::Ice`].
    pub fn parse_or_default(raw: Option<&str>) -> Self {
        match raw.map(|value| value.trim().to_ascii_uppercase()).as_deref() {
            Some("HEV") => Self::Hev,
            Some("PHEV") => Self::Phev,
            Some("BEV") => Self::Bev,
            Some("FCEV") => Self::Fcev,
            _ => Self::Ice,
        }
    }
}

/// Make/model/year definition a device points at.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceDefinition {
    /// Definition identifier.
    pub id: String,
    /// Manufacturer name.
    pub make: String,
    /// Model name.
    pub model: String,
    /// Model year.
    pub year: i32,
    /// Powertrain; defaults to ICE when absent upstream.
    pub powertrain: Powertrain,
    /// Template configured directly on the definition.
    pub template_id: Option<i64>,
    /// Template configured on the make.
    pub make_template_id: Option<i64>,
    /// Templates configured per style identifier.
    pub style_template_ids: BTreeMap<String, i64>,
}

/// A vehicle owned by a user.
#[derive(Debug, Clone, PartialEq)]
pub struct UserDevice {
    /// Device identifier.
    pub id: DeviceId,
    /// Owning user.
    pub user_id: UserId,
    /// Definition the device was registered against.
    pub definition: DeviceDefinition,
    /// Vehicle identification number, if known.
    pub vin: Option<String>,
    /// Whether the VIN has been confirmed by a vendor.
    pub vin_confirmed: bool,
    /// User-facing display name.
    pub name: Option<String>,
    /// Selected style within the definition.
    pub style_id: Option<String>,
}

/// Minted vehicle token and the device it currently represents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VehicleNft {
    /// On-chain token identifier.
    pub token_id: i64,
    /// Linked device; `None` once the vehicle has been deleted.
    pub device_id: Option<DeviceId>,
}
