//! Typed view over vendor telemetry payloads.
//!
//! Pollers publish a flat JSON object per reading. The object is kept as-is
//! for storage while the known signals are decoded into [`VehicleSignals`]
//! and tagged with the vendor that produced them. Numeric signals decode
//! leniently: numeric strings parse, anything else reads as absent.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use super::integration::IntegrationVendor;

/// Signals the core understands, plus whatever else the vendor sent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VehicleSignals {
    #[serde(default, deserialize_with = "lenient_f64", skip_serializing_if = "Option::is_none")]
    pub odometer: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64", skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64", skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64", skip_serializing_if = "Option::is_none")]
    pub range: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64", skip_serializing_if = "Option::is_none")]
    pub fuel_percent_remaining: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64", skip_serializing_if = "Option::is_none")]
    pub speed: Option<f64>,
    #[serde(default, deserialize_with = "lenient_bool", skip_serializing_if = "Option::is_none")]
    pub charging: Option<bool>,
    /// Fields without a typed counterpart.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Vendor-tagged reading.
#[derive(Debug, Clone, PartialEq)]
pub enum VendorReading {
    Smartcar(VehicleSignals),
    Tesla(VehicleSignals),
    AutoPi(VehicleSignals),
    Unknown(VehicleSignals),
}

impl VendorReading {
    /// Borrow the decoded signals regardless of vendor.
    pub fn signals(&self) -> &VehicleSignals {
        match self {
            Self::Smartcar(signals)
            | Self::Tesla(signals)
            | Self::AutoPi(signals)
            | Self::Unknown(signals) => signals,
        }
    }
}

/// Inbound telemetry payload.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusPayload {
    reading: VendorReading,
    raw: Map<String, Value>,
}

/// Telemetry `data` was not a JSON object.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("telemetry payload must be a JSON object, got {kind}")]
pub struct PayloadShapeError {
    kind: &'static str,
}

impl StatusPayload {
    /// Decode the `data` member of a status envelope for `vendor`.
    ///
    /// # Examples
    /// ```
    /// use serde_json::json;
    /// use telematics_backend::domain::{IntegrationVendor, StatusPayload};
    ///
    /// let payload = StatusPayload::decode(
    ///     &IntegrationVendor::AutoPi,
    ///     &json!({ "odometer": "45.5", "signal": 3 }),
    /// )
    /// .expect("object payload");
    /// assert_eq!(payload.odometer(), Some(45.5));
    /// ```
    pub fn decode(vendor: &IntegrationVendor, data: &Value) -> Result<Self, PayloadShapeError> {
        let raw = match data {
            Value::Object(map) => map.clone(),
            other => {
                return Err(PayloadShapeError {
                    kind: json_kind(other),
                });
            }
        };
        let signals = VehicleSignals::deserialize(&Value::Object(raw.clone())).map_err(|_| {
            PayloadShapeError { kind: "object" }
        })?;
        let reading = match vendor {
            IntegrationVendor::Smartcar => VendorReading::Smartcar(signals),
            IntegrationVendor::Tesla => VendorReading::Tesla(signals),
            IntegrationVendor::AutoPi => VendorReading::AutoPi(signals),
            IntegrationVendor::Other(_) => VendorReading::Unknown(signals),
        };
        Ok(Self { reading, raw })
    }

    /// Vendor-tagged decoded reading.
    pub fn reading(&self) -> &VendorReading {
        &self.reading
    }

    /// Odometer reading, if one parsed.
    pub fn odometer(&self) -> Option<f64> {
        self.reading.signals().odometer
    }

    /// The payload exactly as received.
    pub fn raw(&self) -> &Map<String, Value> {
        &self.raw
    }

    /// Consume the payload, returning the object as received.
    pub fn into_raw(self) -> Map<String, Value> {
        self.raw
    }
}

/// Read an odometer out of a stored snapshot blob.
pub fn stored_odometer(data: &Value) -> Option<f64> {
    data.get("odometer").and_then(number_from_value)
}

fn number_from_value(value: &Value) -> Option<f64> {
    match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse::<f64>().ok().filter(|n| n.is_finite()),
        _ => None,
    }
}

fn lenient_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(number_from_value))
}

fn lenient_bool<'de, D>(deserializer: D) -> Result<Option<bool>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Bool(flag)) => Some(flag),
        Some(Value::String(text)) => text.trim().parse::<bool>().ok(),
        _ => None,
    })
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    #[rstest]
    #[case(json!({ "odometer": 1200.5 }), Some(1200.5))]
    #[case(json!({ "odometer": "88" }), Some(88.0))]
    #[case(json!({ "odometer": "n/a" }), None)]
    #[case(json!({ "odometer": null }), None)]
    #[case(json!({ "error": "vehicle asleep" }), None)]
    fn odometer_decodes_leniently(#[case] data: Value, #[case] expected: Option<f64>) {
        let payload = StatusPayload::decode(&IntegrationVendor::Smartcar, &data).expect("decode");
        assert_eq!(payload.odometer(), expected);
    }

    #[rstest]
    fn unknown_fields_land_in_extra_and_raw_is_untouched() {
        let data = json!({ "odometer": "88", "tirePressure": { "front": 32 } });
        let payload = StatusPayload::decode(&IntegrationVendor::Tesla, &data).expect("decode");
        let VendorReading::Tesla(signals) = payload.reading() else {
            panic!("expected tesla reading");
        };
        assert!(signals.extra.contains_key("tirePressure"));
        assert_eq!(Value::Object(payload.into_raw()), data);
    }

    #[rstest]
    #[case(json!([1, 2]), "array")]
    #[case(json!("text"), "string")]
    #[case(Value::Null, "null")]
    fn non_objects_are_rejected(#[case] data: Value, #[case] kind: &str) {
        let err = StatusPayload::decode(&IntegrationVendor::AutoPi, &data).expect_err("reject");
        assert!(err.to_string().ends_with(kind));
    }

    #[rstest]
    fn other_vendors_decode_as_unknown() {
        let payload = StatusPayload::decode(
            &IntegrationVendor::Other("Hurtle".to_owned()),
            &json!({ "speed": 12 }),
        )
        .expect("decode");
        assert!(matches!(payload.reading(), VendorReading::Unknown(s) if s.speed == Some(12.0)));
    }
}
