//! Snapshot merge strategies and the odometer cooldown.

use chrono::{DateTime, TimeDelta, Utc};
use serde_json::{Map, Value};
use tracing::debug;

use crate::domain::identifiers::IntegrationId;
use crate::domain::link::{LinkActor, LinkStatus};
use crate::domain::ports::{IngestionContext, IngestionPlan, SnapshotMerge};
use crate::domain::snapshot::DeviceStatusSnapshot;
use crate::domain::telemetry::{StatusPayload, VendorReading};

/// Minimum spacing between odometer-change notifications for one pair.
pub const ODOMETER_COOLDOWN: TimeDelta = TimeDelta::hours(1);

/// Whether a new odometer reading should be announced.
///
/// True when a reading is present, the cooldown has elapsed (or nothing was
/// ever announced), and the reading exceeds the stored one (or none exists).
///
/// # Examples
/// ```
/// use chrono::{TimeDelta, Utc};
/// use telematics_backend::domain::should_notify_odometer;
///
/// let now = Utc::now();
/// assert!(should_notify_odometer(Some(10.0), None, None, now));
/// assert!(!should_notify_odometer(Some(10.0), Some(12.0), None, now));
/// assert!(!should_notify_odometer(
///     Some(13.0),
///     Some(12.0),
///     Some(now - TimeDelta::minutes(30)),
///     now,
/// ));
/// ```
pub fn should_notify_odometer(
    new: Option<f64>,
    previous: Option<f64>,
    last_event_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> bool {
    let Some(new) = new else {
        return false;
    };
    let cooled_down = last_event_at.is_none_or(|last| now.signed_duration_since(last) > ODOMETER_COOLDOWN);
    let progressed = previous.is_none_or(|previous| new > previous);
    cooled_down && progressed
}

/// Merge of one decoded payload into the stored snapshot.
pub struct VendorMerge {
    integration_id: IntegrationId,
    payload: StatusPayload,
    now: DateTime<Utc>,
}

impl VendorMerge {
    pub fn new(integration_id: IntegrationId, payload: StatusPayload, now: DateTime<Utc>) -> Self {
        Self {
            integration_id,
            payload,
            now,
        }
    }

    fn merge_into(&self, snapshot: &mut DeviceStatusSnapshot) {
        let raw = Value::Object(self.payload.raw().clone());
        match self.payload.reading() {
            VendorReading::Smartcar(signals) | VendorReading::Tesla(signals) => {
                if signals.odometer.is_some() {
                    snapshot.data = Some(raw);
                    snapshot.error_data = None;
                } else {
                    snapshot.error_data = Some(raw);
                }
            }
            VendorReading::AutoPi(_) => {
                let mut merged = match snapshot.data.take() {
                    Some(Value::Object(stored)) => stored,
                    _ => Map::new(),
                };
                for (key, value) in self.payload.raw() {
                    merged.insert(key.clone(), value.clone());
                }
                snapshot.data = Some(Value::Object(merged));
            }
            VendorReading::Unknown(_) => {
                snapshot.data = Some(raw);
                snapshot.error_data = None;
            }
        }
    }
}

impl SnapshotMerge for VendorMerge {
    fn plan(&self, context: &IngestionContext) -> IngestionPlan {
        let mut snapshot = context.snapshot.clone().unwrap_or_else(|| {
            DeviceStatusSnapshot::empty(
                context.device.id.clone(),
                self.integration_id.clone(),
                self.now,
            )
        });

        let odometer = self.payload.odometer();
        let previous_odometer_event_at = snapshot.last_odometer_event_at;
        let notify = should_notify_odometer(
            odometer,
            snapshot.previous_odometer(),
            snapshot.last_odometer_event_at,
            self.now,
        );
        self.merge_into(&mut snapshot);
        if notify {
            snapshot.last_odometer_event_at = Some(self.now);
        }
        snapshot.updated_at = self.now;

        let link = context
            .link
            .as_ref()
            .filter(|link| link.status != LinkStatus::Active)
            .and_then(|link| {
                let mut promoted = link.clone();
                match promoted.transition_to(LinkStatus::Active, LinkActor::Ingestion, self.now) {
                    Ok(()) => Some(promoted),
                    Err(err) => {
                        debug!(
                            device_id = %link.device_id,
                            status = %link.status,
                            error = %err,
                            "link not promoted"
                        );
                        None
                    }
                }
            });

        IngestionPlan {
            snapshot,
            link,
            odometer_event: if notify { odometer } else { None },
            previous_odometer_event_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::integration::IntegrationVendor;
    use crate::domain::link::IntegrationLink;
    use crate::test_support::{fixed_now, sample_device};
    use rstest::rstest;
    use serde_json::json;

    fn context(snapshot: Option<DeviceStatusSnapshot>, link: Option<IntegrationLink>) -> IngestionContext {
        IngestionContext {
            device: sample_device("d1"),
            link,
            snapshot,
        }
    }

    fn merge(vendor: IntegrationVendor, data: Value) -> VendorMerge {
        let payload = StatusPayload::decode(&vendor, &data).expect("object payload");
        VendorMerge::new(IntegrationId::new("i1"), payload, fixed_now())
    }

    fn stored(data: Option<Value>, error: Option<Value>) -> DeviceStatusSnapshot {
        let mut snapshot = DeviceStatusSnapshot::empty("d1".into(), "i1".into(), fixed_now());
        snapshot.data = data;
        snapshot.error_data = error;
        snapshot
    }

    #[rstest]
    #[case::first_reading(Some(10.0), None, None, true)]
    #[case::no_reading(None, None, None, false)]
    #[case::within_cooldown(Some(20.0), Some(10.0), Some(30), false)]
    #[case::after_cooldown(Some(20.0), Some(10.0), Some(61), true)]
    #[case::exactly_one_hour(Some(20.0), Some(10.0), Some(60), false)]
    #[case::not_increasing(Some(10.0), Some(10.0), Some(120), false)]
    #[case::decreasing(Some(9.0), Some(10.0), None, false)]
    fn odometer_cooldown_rule(
        #[case] new: Option<f64>,
        #[case] previous: Option<f64>,
        #[case] minutes_since_last: Option<i64>,
        #[case] expected: bool,
    ) {
        let now = fixed_now();
        let last = minutes_since_last.map(|m| now - TimeDelta::minutes(m));
        assert_eq!(should_notify_odometer(new, previous, last, now), expected);
    }

    #[rstest]
    fn autopi_merge_accumulates_fields() {
        let first = merge(
            IntegrationVendor::AutoPi,
            json!({ "odometer": 45.22, "latitude": 11.0, "longitude": -7.0 }),
        )
        .plan(&context(None, None));
        let second = merge(IntegrationVendor::AutoPi, json!({ "latitude": 2.0, "longitude": 3.0 }))
            .plan(&context(Some(first.snapshot), None));

        assert_eq!(
            second.snapshot.data,
            Some(json!({ "odometer": 45.22, "latitude": 2.0, "longitude": 3.0 }))
        );
    }

    #[rstest]
    #[case::smartcar(IntegrationVendor::Smartcar)]
    #[case::tesla(IntegrationVendor::Tesla)]
    fn oauth_errors_do_not_touch_data(#[case] vendor: IntegrationVendor) {
        let prior = stored(Some(json!({ "odometer": 100.0 })), None);
        let plan = merge(vendor.clone(), json!({ "error": "VEHICLE_ASLEEP" }))
            .plan(&context(Some(prior), None));
        assert_eq!(plan.snapshot.data, Some(json!({ "odometer": 100.0 })));
        assert_eq!(plan.snapshot.error_data, Some(json!({ "error": "VEHICLE_ASLEEP" })));
        assert_eq!(plan.odometer_event, None);

        let recovered = merge(vendor, json!({ "odometer": 150.0, "range": 300 }))
            .plan(&context(Some(plan.snapshot), None));
        assert_eq!(
            recovered.snapshot.data,
            Some(json!({ "odometer": 150.0, "range": 300 }))
        );
        assert_eq!(recovered.snapshot.error_data, None);
    }

    #[rstest]
    fn unknown_vendors_overwrite_and_clear_errors() {
        let prior = stored(Some(json!({ "a": 1 })), Some(json!({ "error": "x" })));
        let plan = merge(IntegrationVendor::Other("Hurtle".to_owned()), json!({ "b": 2 }))
            .plan(&context(Some(prior), None));
        assert_eq!(plan.snapshot.data, Some(json!({ "b": 2 })));
        assert_eq!(plan.snapshot.error_data, None);
    }

    #[rstest]
    fn notifying_stamps_the_cooldown() {
        let plan = merge(IntegrationVendor::Smartcar, json!({ "odometer": 12.0 }))
            .plan(&context(None, None));
        assert_eq!(plan.odometer_event, Some(12.0));
        assert_eq!(plan.snapshot.last_odometer_event_at, Some(fixed_now()));
    }

    #[rstest]
    #[case(LinkStatus::Pending, true)]
    #[case(LinkStatus::PendingFirstData, true)]
    #[case(LinkStatus::AuthenticationFailure, true)]
    #[case(LinkStatus::Active, false)]
    #[case(LinkStatus::Failed, false)]
    fn first_telemetry_promotes_links(#[case] status: LinkStatus, #[case] promoted: bool) {
        let mut link = IntegrationLink::pending("d1".into(), "i1".into(), fixed_now());
        link.status = status;
        let plan = merge(IntegrationVendor::AutoPi, json!({ "speed": 0 }))
            .plan(&context(None, Some(link)));
        assert_eq!(plan.link.is_some(), promoted);
        if promoted {
            assert_eq!(plan.link.map(|l| l.status), Some(LinkStatus::Active));
        }
    }
}
