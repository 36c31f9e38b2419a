//! Configuration template resolution.

use serde_json::json;

use crate::domain::device::UserDevice;
use crate::domain::error::Error;
use crate::domain::integration::Integration;

/// Pick the template for `device` on `integration`.
///
/// Priority: the device's style, the definition, any style of the
/// definition, the make, the powertrain default, then the integration
/// default. The first match wins.
pub fn resolve_template(device: &UserDevice, integration: &Integration) -> Result<i64, Error> {
    let definition = &device.definition;
    let defaults = &integration.template_defaults;
    device
        .style_id
        .as_ref()
        .and_then(|style| definition.style_template_ids.get(style).copied())
        .or(definition.template_id)
        .or_else(|| definition.style_template_ids.values().next().copied())
        .or(definition.make_template_id)
        .or_else(|| defaults.powertrain_templates.get(&definition.powertrain).copied())
        .or(defaults.default_template_id)
        .ok_or_else(|| {
            Error::internal("integration lacks a default template").with_details(json!({
                "integrationId": integration.id,
                "definitionId": definition.id,
            }))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ErrorCode;
    use crate::domain::device::Powertrain;
    use crate::domain::integration::TemplateDefaults;
    use crate::test_support::{sample_device, sample_integration};
    use rstest::rstest;
    use std::collections::BTreeMap;

    fn integration(powertrain: Option<(Powertrain, i64)>, default: Option<i64>) -> Integration {
        sample_integration("i-autopi", "AutoPi").with_template_defaults(TemplateDefaults {
            default_template_id: default,
            powertrain_templates: powertrain.into_iter().collect::<BTreeMap<_, _>>(),
        })
    }

    fn device(
        style: Option<&str>,
        styles: &[(&str, i64)],
        definition: Option<i64>,
        make: Option<i64>,
    ) -> UserDevice {
        let mut device = sample_device("d1");
        device.style_id = style.map(str::to_owned);
        device.definition.style_template_ids =
            styles.iter().map(|(s, t)| ((*s).to_owned(), *t)).collect();
        device.definition.template_id = definition;
        device.definition.make_template_id = make;
        device
    }

    #[rstest]
    #[case::device_style(device(Some("s2"), &[("s1", 11), ("s2", 12)], Some(20), Some(30)), 12)]
    #[case::definition(device(Some("s9"), &[("s1", 11)], Some(20), Some(30)), 20)]
    #[case::any_style(device(None, &[("s1", 11)], None, Some(30)), 11)]
    #[case::make(device(None, &[], None, Some(30)), 30)]
    #[case::powertrain(device(None, &[], None, None), 40)]
    fn first_match_wins(#[case] device: UserDevice, #[case] expected: i64) {
        let integration = integration(Some((Powertrain::Bev, 40)), Some(50));
        assert_eq!(resolve_template(&device, &integration), Ok(expected));
    }

    #[rstest]
    fn falls_back_to_the_integration_default() {
        let integration = integration(Some((Powertrain::Ice, 40)), Some(50));
        assert_eq!(resolve_template(&device(None, &[], None, None), &integration), Ok(50));
    }

    #[rstest]
    fn missing_templates_are_an_internal_error() {
        let err = resolve_template(&device(None, &[], None, None), &integration(None, None))
            .expect_err("no template");
        assert_eq!(err.code(), ErrorCode::InternalError);
        assert_eq!(err.message(), "integration lacks a default template");
    }
}
