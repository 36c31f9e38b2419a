//! Integration (vendor) reference data.
//!
//! Integrations are created once per vendor and never mutated by the core.
//! The vendor decides which task emitter and which snapshot merge strategy
//! applies to a link.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::device::Powertrain;
use super::identifiers::IntegrationId;

/// Vendor behind an integration, resolved case-insensitively from its name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum IntegrationVendor {
    /// Smartcar OAuth connected-car platform.
    Smartcar,
    /// Tesla Fleet OAuth API.
    Tesla,
    /// AutoPi aftermarket hardware unit.
    AutoPi,
    /// Any vendor this core has no bespoke behaviour for.
    Other(String),
}

impl IntegrationVendor {
    /// Resolve a vendor from its display name.
    ///
    /// # Examples
    /// ```
    /// use telematics_backend::domain::IntegrationVendor;
    ///
    /// assert_eq!(IntegrationVendor::from_name("SmartCar"), IntegrationVendor::Smartcar);
    /// assert_eq!(IntegrationVendor::from_name("autopi"), IntegrationVendor::AutoPi);
    /// ```
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "smartcar" => Self::Smartcar,
            "tesla" => Self::Tesla,
            "autopi" => Self::AutoPi,
            _ => Self::Other(name.to_owned()),
        }
    }

    /// Whether the vendor authenticates through OAuth tokens.
    pub fn is_oauth(&self) -> bool {
        matches!(self, Self::Smartcar | Self::Tesla)
    }
}

impl fmt::Display for IntegrationVendor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Smartcar => f.write_str("SmartCar"),
            Self::Tesla => f.write_str("Tesla"),
            Self::AutoPi => f.write_str("AutoPi"),
            Self::Other(name) => f.write_str(name),
        }
    }
}

/// How the integration reaches the vehicle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IntegrationType {
    /// Cloud API reached over OAuth.
    #[serde(rename = "API")]
    Api,
    /// Physical unit installed in the vehicle.
    #[serde(rename = "Hardware")]
    Hardware,
}

/// Whether the integration is the manufacturer's own or an add-on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IntegrationStyle {
    /// Manufacturer-provided connectivity.
    #[serde(rename = "OEM")]
    Oem,
    /// Aftermarket connectivity.
    #[serde(rename = "Addon")]
    Addon,
}

/// Template defaults carried by hardware integrations.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateDefaults {
    /// Template applied when nothing more specific matches.
    #[serde(default)]
    pub default_template_id: Option<i64>,
    /// Templates keyed by powertrain.
    #[serde(default)]
    pub powertrain_templates: BTreeMap<Powertrain, i64>,
}

/// Immutable integration reference record.
#[derive(Debug, Clone, PartialEq)]
pub struct Integration {
    /// Store identifier.
    pub id: IntegrationId,
    /// Vendor display name as stored.
    pub vendor_name: String,
    /// Resolved vendor.
    pub vendor: IntegrationVendor,
    /// Integration type.
    pub integration_type: IntegrationType,
    /// Integration style.
    pub style: IntegrationStyle,
    /// Template defaults; empty for OAuth integrations.
    pub template_defaults: TemplateDefaults,
}

impl Integration {
    /// Build an integration, resolving the vendor from its name.
    pub fn new(
        id: IntegrationId,
        vendor_name: impl Into<String>,
        integration_type: IntegrationType,
        style: IntegrationStyle,
    ) -> Self {
        let vendor_name = vendor_name.into();
        Self {
            id,
            vendor: IntegrationVendor::from_name(&vendor_name),
            vendor_name,
            integration_type,
            style,
            template_defaults: TemplateDefaults::default(),
        }
    }

    /// Attach template defaults.
    pub fn with_template_defaults(mut self, defaults: TemplateDefaults) -> Self {
        self.template_defaults = defaults;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("SmartCar", IntegrationVendor::Smartcar)]
    #[case(" tesla ", IntegrationVendor::Tesla)]
    #[case("AUTOPI", IntegrationVendor::AutoPi)]
    #[case("Hurtle", IntegrationVendor::Other("Hurtle".to_owned()))]
    fn vendor_resolution_ignores_case(#[case] name: &str, #[case] expected: IntegrationVendor) {
        assert_eq!(IntegrationVendor::from_name(name), expected);
    }

    #[rstest]
    fn only_smartcar_and_tesla_are_oauth() {
        assert!(IntegrationVendor::Smartcar.is_oauth());
        assert!(IntegrationVendor::Tesla.is_oauth());
        assert!(!IntegrationVendor::AutoPi.is_oauth());
    }

    #[rstest]
    fn template_defaults_decode_powertrain_keys() {
        let defaults: TemplateDefaults = serde_json::from_str(
            r#"{"defaultTemplateId":10,"powertrainTemplates":{"BEV":12,"ICE":10}}"#,
        )
        .expect("decode defaults");
        assert_eq!(defaults.default_template_id, Some(10));
        assert_eq!(defaults.powertrain_templates.get(&Powertrain::Bev), Some(&12));
    }
}
