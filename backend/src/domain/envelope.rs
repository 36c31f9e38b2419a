//! Envelope wrapping every message that crosses the bus.
//!
//! The JSON form is a flat object `{id, source, specversion, subject, time,
//! type, data}`. The `id` is unique per envelope and is never used for
//! correlation; the task identifier inside `data` serves that purpose.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::identifiers::IntegrationId;

/// Version stamped on every envelope this core produces.
pub const SPEC_VERSION: &str = "1.0";

const SOURCE_PREFIX: &str = "dimo/integration/";

/// Event type discriminators.
pub mod event_types {
    pub const SMARTCAR_POLL_SCHEDULED: &str = "zone.dimo.task.smartcar.poll.scheduled";
    pub const SMARTCAR_POLL_REFRESH: &str = "zone.dimo.task.smartcar.poll.refresh";
    pub const SMARTCAR_POLL_STOP: &str = "zone.dimo.task.smartcar.poll.stop";
    pub const SMARTCAR_POLL_CREDENTIAL: &str = "zone.dimo.task.smartcar.poll.credential";
    pub const TESLA_POLL_SCHEDULED: &str = "zone.dimo.task.tesla.poll.scheduled";
    pub const TESLA_POLL_REFRESH: &str = "zone.dimo.task.tesla.poll.refresh";
    pub const TESLA_POLL_STOP: &str = "zone.dimo.task.tesla.poll.stop";
    pub const TESLA_POLL_CREDENTIAL: &str = "zone.dimo.task.tesla.poll.credential";
    /// Suffix shared by every vendor's task status update.
    pub const POLL_STATUS_UPDATE_SUFFIX: &str = ".poll.status.update";
    pub const DEVICE_STATUS_UPDATE: &str = "zone.dimo.device.status.update";
    pub const ODOMETER_UPDATE: &str = "com.dimo.zone.device.odometer.update";
    pub const DEVICE_CREATED: &str = "com.dimo.zone.device.create";
    pub const INTEGRATION_CREATED: &str = "com.dimo.zone.device.integration.create";
    pub const INTEGRATION_DELETED: &str = "com.dimo.zone.device.integration.delete";
    pub const AUTOPI_DEVICE_REGISTER: &str = "zone.dimo.autopi.device.register";
    pub const AUTOPI_VIN_QUERY: &str = "zone.dimo.autopi.vin.query";
}

/// Bus message wrapper.
///
/// # Examples
/// ```
/// use chrono::Utc;
/// use serde_json::json;
/// use telematics_backend::domain::{Envelope, IntegrationId};
///
/// let envelope = Envelope::new(
///     &IntegrationId::new("27qftVRWQYpVDcO5DltO5Ojbjxk"),
///     "2AbCdEf",
///     "zone.dimo.device.status.update",
///     json!({ "odometer": 10.0 }),
///     Utc::now(),
/// );
/// assert_eq!(envelope.source, "dimo/integration/27qftVRWQYpVDcO5DltO5Ojbjxk");
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope<T> {
    /// Generated on decode when the producer left it out.
    #[serde(default = "fresh_id")]
    pub id: String,
    #[serde(default)]
    pub source: String,
    #[serde(default = "default_spec_version")]
    pub specversion: String,
    #[serde(default)]
    pub subject: String,
    /// Decode time when the producer left it out.
    #[serde(default = "Utc::now")]
    pub time: DateTime<Utc>,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: T,
}

fn default_spec_version() -> String {
    SPEC_VERSION.to_owned()
}

fn fresh_id() -> String {
    Uuid::new_v4().to_string()
}

/// Envelope bytes could not be accepted.
#[derive(Debug, thiserror::Error)]
pub enum EnvelopeDecodeError {
    /// The JSON was not an envelope.
    #[error("envelope is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    /// `type` was present but blank.
    #[error("envelope type is empty")]
    EmptyType,
}

impl<T> Envelope<T> {
    /// Wrap `data` in a fresh envelope sourced from `integration_id`.
    pub fn new(
        integration_id: &IntegrationId,
        subject: impl Into<String>,
        event_type: impl Into<String>,
        data: T,
        now: DateTime<Utc>,
    ) -> Self {
        Self::from_source(integration_source(integration_id), subject, event_type, data, now)
    }

    /// Wrap `data` in a fresh envelope with an explicit `source`.
    pub fn from_source(
        source: impl Into<String>,
        subject: impl Into<String>,
        event_type: impl Into<String>,
        data: T,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: fresh_id(),
            source: source.into(),
            specversion: SPEC_VERSION.to_owned(),
            subject: subject.into(),
            time: now,
            event_type: event_type.into(),
            data,
        }
    }

    /// Integration identifier named by `source`, if the source carries one.
    pub fn source_integration(&self) -> Option<&str> {
        source_suffix(&self.source)
    }
}

impl Envelope<Value> {
    /// Decode an envelope whose payload is inspected later.
    pub fn from_value(value: Value) -> Result<Self, EnvelopeDecodeError> {
        let envelope: Self = serde_json::from_value(value)?;
        if envelope.event_type.trim().is_empty() {
            return Err(EnvelopeDecodeError::EmptyType);
        }
        Ok(envelope)
    }

    /// Decode the payload into a concrete type, tolerating unknown fields.
    pub fn decode_data<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        T::deserialize(&self.data)
    }
}

impl<T: Serialize> Envelope<T> {
    /// Encode for publishing.
    pub fn to_value(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(self)
    }
}

/// `source` string for envelopes originating from `integration_id`.
pub fn integration_source(integration_id: &IntegrationId) -> String {
    format!("{SOURCE_PREFIX}{integration_id}")
}

/// Last non-empty path segment of an envelope `source`.
///
/// # Examples
/// ```
/// use telematics_backend::domain::source_suffix;
///
/// assert_eq!(source_suffix("dimo/integration/abc"), Some("abc"));
/// assert_eq!(source_suffix("dimo/integration/"), None);
/// ```
pub fn source_suffix(source: &str) -> Option<&str> {
    let (_, suffix) = source.trim().rsplit_once('/')?;
    (!suffix.is_empty()).then_some(suffix)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    fn wire(extra: Value) -> Value {
        let mut base = json!({
            "id": "2bSaN0pl6Y9ZP7QmBmMBJzTZ0Bd",
            "source": "dimo/integration/27qftVRWQYpVDcO5DltO5Ojbjxk",
            "specversion": "1.0",
            "subject": "2AbCdEf",
            "time": "2024-05-01T12:00:00Z",
            "type": "zone.dimo.device.status.update",
            "data": { "odometer": 10.5, "futureField": { "nested": true } }
        });
        if let (Value::Object(base_map), Value::Object(extra_map)) = (&mut base, extra) {
            for (key, value) in extra_map {
                base_map.insert(key, value);
            }
        }
        base
    }

    #[rstest]
    fn decoding_tolerates_unknown_fields() {
        let envelope = Envelope::from_value(wire(json!({ "dataschema": "x" }))).expect("decode");
        assert_eq!(envelope.source_integration(), Some("27qftVRWQYpVDcO5DltO5Ojbjxk"));
        assert_eq!(envelope.data["futureField"]["nested"], json!(true));
    }

    #[rstest]
    fn decoding_rejects_missing_type() {
        let mut value = wire(json!({}));
        value.as_object_mut().map(|map| map.remove("type"));
        assert!(matches!(
            Envelope::from_value(value),
            Err(EnvelopeDecodeError::Json(_))
        ));
    }

    #[rstest]
    fn only_the_type_is_mandatory() {
        let envelope = Envelope::from_value(json!({
            "type": "zone.dimo.device.status.update",
            "subject": "2AbCdEf",
            "data": { "odometer": 3.0 }
        }))
        .expect("decode");

        assert!(!envelope.id.is_empty());
        assert!(envelope.time <= Utc::now());
        assert_eq!(envelope.source, "");
        assert_eq!(envelope.specversion, SPEC_VERSION);
        assert_eq!(envelope.source_integration(), None);
    }

    #[rstest]
    #[case::id("id")]
    #[case::time("time")]
    fn missing_identity_fields_are_filled_in(#[case] field: &str) {
        let mut value = wire(json!({}));
        value.as_object_mut().map(|map| map.remove(field));

        let envelope = Envelope::from_value(value).expect("decode");

        assert!(!envelope.id.is_empty());
        assert_eq!(envelope.subject, "2AbCdEf");
    }

    #[rstest]
    fn decoding_rejects_blank_type() {
        let value = wire(json!({ "type": "  " }));
        assert!(matches!(
            Envelope::from_value(value),
            Err(EnvelopeDecodeError::EmptyType)
        ));
    }

    #[rstest]
    fn fresh_envelopes_never_share_ids() {
        let integration = IntegrationId::new("i1");
        let now = Utc::now();
        let first = Envelope::new(&integration, "d1", "t", json!({}), now);
        let second = Envelope::new(&integration, "d1", "t", json!({}), now);
        assert_ne!(first.id, second.id);
        assert_eq!(first.specversion, SPEC_VERSION);
    }

    #[rstest]
    fn serialises_type_under_its_wire_name() {
        let envelope = Envelope::new(&IntegrationId::new("i1"), "d1", "t.x", json!(1), Utc::now());
        let value = envelope.to_value().expect("encode");
        assert_eq!(value["type"], json!("t.x"));
        assert!(value.get("event_type").is_none());
    }
}
