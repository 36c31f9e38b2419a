//! Latest merged telemetry for one (device, integration) pair.

use chrono::{DateTime, Utc};
use serde_json::Value;

use super::identifiers::{DeviceId, IntegrationId};
use super::telemetry::stored_odometer;

/// Stored snapshot row.
///
/// For OAuth vendors `data` and `error_data` are mutually exclusive: a
/// successful reading clears the error blob and a diagnostic payload leaves
/// the data blob untouched.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceStatusSnapshot {
    pub device_id: DeviceId,
    pub integration_id: IntegrationId,
    /// Last merged telemetry object.
    pub data: Option<Value>,
    /// Last diagnostic payload.
    pub error_data: Option<Value>,
    /// When the last odometer-change notification was emitted.
    pub last_odometer_event_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl DeviceStatusSnapshot {
    /// An empty snapshot for a pair that has never reported.
    pub fn empty(device_id: DeviceId, integration_id: IntegrationId, now: DateTime<Utc>) -> Self {
        Self {
            device_id,
            integration_id,
            data: None,
            error_data: None,
            last_odometer_event_at: None,
            updated_at: now,
        }
    }

    /// Odometer value in the stored data blob, if any.
    pub fn previous_odometer(&self) -> Option<f64> {
        self.data.as_ref().and_then(stored_odometer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rstest::rstest;
    use serde_json::json;

    #[rstest]
    fn previous_odometer_reads_the_data_blob_only() {
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).single().expect("valid time");
        let mut snapshot = DeviceStatusSnapshot::empty("d1".into(), "i1".into(), now);
        snapshot.error_data = Some(json!({ "odometer": 9.0 }));
        assert_eq!(snapshot.previous_odometer(), None);
        snapshot.data = Some(json!({ "odometer": 12.5 }));
        assert_eq!(snapshot.previous_odometer(), Some(12.5));
    }
}
