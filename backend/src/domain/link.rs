//! The per-(device, integration) binding and its lifecycle.
//!
//! Status changes go through [`LinkStatus::transition`], which checks both
//! the edge and the component making the change. Only ingestion promotes a
//! link to `Active`; only the task-status listener records an authentication
//! failure; only the pairing orchestrator fails or de-duplicates a link.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use super::error::Error;
use super::identifiers::{DeviceId, IntegrationId, TaskId};

/// Lifecycle status of an integration link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LinkStatus {
    /// Created, no task or pairing has completed yet.
    Pending,
    /// Task started or unit paired; waiting for the first telemetry.
    PendingFirstData,
    /// Telemetry has been received.
    Active,
    /// The vendor rejected the stored credentials.
    AuthenticationFailure,
    /// Pairing failed; the row is kept for diagnosis.
    Failed,
    /// The hardware unit belongs to another device.
    DuplicateIntegration,
}

/// Component requesting a status change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LinkActor {
    /// Smartcar/Tesla task emitters.
    TaskEmitter,
    /// Device-status ingestion engine.
    Ingestion,
    /// Control-plane task-status listener.
    TaskStatusListener,
    /// AutoPi pairing orchestrator.
    PairingOrchestrator,
}

impl LinkStatus {
    /// Stored representation.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::PendingFirstData => "PendingFirstData",
            Self::Active => "Active",
            Self::AuthenticationFailure => "AuthenticationFailure",
            Self::Failed => "Failed",
            Self::DuplicateIntegration => "DuplicateIntegration",
        }
    }

    /// States a link occupies before its first telemetry arrives.
    pub fn is_pre_active(self) -> bool {
        matches!(self, Self::Pending | Self::PendingFirstData)
    }

    /// States the core never moves a link out of on its own.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Failed | Self::DuplicateIntegration)
    }

    /// Validate a status change requested by `actor`.
    ///
    /// Staying in the same state is always permitted. A failed pairing may be
    /// resumed by the orchestrator, which walks the link back through
    /// `Pending` rather than skipping it.
    ///
    /// # Examples
    /// ```
    /// use telematics_backend::domain::{LinkActor, LinkStatus};
    ///
    /// assert!(LinkStatus::transition(
    ///     LinkStatus::PendingFirstData,
    ///     LinkStatus::Active,
    ///     LinkActor::Ingestion,
    /// )
    /// .is_ok());
    /// assert!(LinkStatus::transition(
    ///     LinkStatus::PendingFirstData,
    ///     LinkStatus::Active,
    ///     LinkActor::TaskEmitter,
    /// )
    /// .is_err());
    /// ```
    pub fn transition(from: Self, to: Self, actor: LinkActor) -> Result<Self, Error> {
        if from == to {
            return Ok(to);
        }
        let allowed = match (actor, to) {
            (LinkActor::Ingestion, Self::Active) => {
                matches!(from, Self::Pending | Self::PendingFirstData | Self::AuthenticationFailure)
            }
            (LinkActor::TaskStatusListener, Self::AuthenticationFailure) => !from.is_terminal(),
            (LinkActor::TaskEmitter, Self::PendingFirstData) => {
                matches!(from, Self::Pending | Self::AuthenticationFailure)
            }
            (LinkActor::PairingOrchestrator, Self::Pending) => from == Self::Failed,
            (LinkActor::PairingOrchestrator, Self::PendingFirstData) => from == Self::Pending,
            (LinkActor::PairingOrchestrator, Self::Failed) => from.is_pre_active(),
            (LinkActor::PairingOrchestrator, Self::DuplicateIntegration) => {
                from.is_pre_active() || from == Self::Failed
            }
            _ => false,
        };
        if allowed {
            Ok(to)
        } else {
            Err(Error::conflict(format!(
                "illegal link transition {from} -> {to}"
            ))
            .with_details(json!({
                "from": from.as_str(),
                "to": to.as_str(),
                "actor": actor,
            })))
        }
    }
}

impl fmt::Display for LinkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LinkStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Pending" => Ok(Self::Pending),
            "PendingFirstData" => Ok(Self::PendingFirstData),
            "Active" => Ok(Self::Active),
            "AuthenticationFailure" => Ok(Self::AuthenticationFailure),
            "Failed" => Ok(Self::Failed),
            "DuplicateIntegration" => Ok(Self::DuplicateIntegration),
            other => Err(Error::internal(format!("unknown link status {other}"))),
        }
    }
}

/// Last completed AutoPi pairing step.
///
/// Ordered so that `a < b` means `a` happens before `b`. Removing the unit
/// from a prior template belongs to the association step and is not recorded
/// on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PairingSubStatus {
    /// VIN, display name and year written to the vendor vehicle profile.
    PatchedVehicleProfile,
    /// Unit bound to the resolved template.
    AssociatedDeviceToTemplate,
    /// Template application requested.
    AppliedTemplate,
    /// Apply-pending-state command sent; awaiting unit confirmation.
    PendingTemplateConfirm,
}

/// AutoPi-specific metadata written by the pairing orchestrator.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AutoPiMetadata {
    /// Physical unit serial.
    #[serde(rename = "autoPiUnitId", default, skip_serializing_if = "Option::is_none")]
    pub unit_id: Option<String>,
    /// Unit modem IMEI.
    #[serde(rename = "autoPiIMEI", default, skip_serializing_if = "Option::is_none")]
    pub imei: Option<String>,
    /// Vendor's own device identifier for the unit.
    #[serde(rename = "autoPiDeviceId", default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    /// Vendor vehicle profile identifier.
    #[serde(rename = "autoPiVehicleId", default, skip_serializing_if = "Option::is_none")]
    pub vehicle_id: Option<i64>,
    /// Template the unit was bound to.
    #[serde(rename = "autoPiTemplateId", default, skip_serializing_if = "Option::is_none")]
    pub template_id: Option<i64>,
    /// Last completed pairing step.
    #[serde(rename = "autoPiSubStatus", default, skip_serializing_if = "Option::is_none")]
    pub sub_status: Option<PairingSubStatus>,
    /// Error text from the most recent failed pairing attempt.
    #[serde(
        rename = "autoPiRegistrationError",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub registration_error: Option<String>,
}

/// Free-form link metadata with typed access to the fields the core uses.
///
/// Unknown keys survive a decode/encode cycle through `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkMetadata {
    /// Smartcar data paths the poller should request.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub smartcar_endpoints: Vec<String>,
    /// Tesla vehicle identifier (distinct from the external id).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tesla_vehicle_id: Option<i64>,
    #[serde(flatten)]
    pub autopi: AutoPiMetadata,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl LinkMetadata {
    /// Decode metadata from its stored JSON form, tolerating `null`.
    pub fn from_value(value: Value) -> Result<Self, serde_json::Error> {
        if value.is_null() {
            return Ok(Self::default());
        }
        serde_json::from_value(value)
    }

    /// Encode metadata for storage.
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or_else(|_| Value::Object(Map::new()))
    }
}

/// Token ciphertext as persisted; never the plaintext.
#[derive(Clone, PartialEq, Eq)]
pub struct EncryptedToken(String);

impl EncryptedToken {
    /// Wrap stored ciphertext.
    pub fn new(ciphertext: impl Into<String>) -> Self {
        Self(ciphertext.into())
    }

    /// Borrow the stored ciphertext.
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl fmt::Debug for EncryptedToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("EncryptedToken(..)")
    }
}

/// Live binding between one user's device and one integration.
#[derive(Debug, Clone, PartialEq)]
pub struct IntegrationLink {
    pub device_id: DeviceId,
    pub integration_id: IntegrationId,
    /// Vendor-side identifier (Smartcar/Tesla vehicle id, AutoPi unit id).
    pub external_id: Option<String>,
    pub status: LinkStatus,
    /// Current polling task, if one has been started.
    pub task_id: Option<TaskId>,
    pub access_token: Option<EncryptedToken>,
    pub refresh_token: Option<EncryptedToken>,
    pub access_expires_at: Option<DateTime<Utc>>,
    pub metadata: LinkMetadata,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl IntegrationLink {
    /// Create a fresh `Pending` link.
    pub fn pending(
        device_id: DeviceId,
        integration_id: IntegrationId,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            device_id,
            integration_id,
            external_id: None,
            status: LinkStatus::Pending,
            task_id: None,
            access_token: None,
            refresh_token: None,
            access_expires_at: None,
            metadata: LinkMetadata::default(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Move the link to `to` on behalf of `actor`, stamping `updated_at`.
    pub fn transition_to(
        &mut self,
        to: LinkStatus,
        actor: LinkActor,
        now: DateTime<Utc>,
    ) -> Result<(), Error> {
        self.status = LinkStatus::transition(self.status, to, actor)?;
        self.updated_at = now;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ErrorCode;
    use rstest::rstest;
    use serde_json::json;

    #[rstest]
    #[case(LinkStatus::Pending, LinkStatus::Active, LinkActor::Ingestion)]
    #[case(LinkStatus::AuthenticationFailure, LinkStatus::Active, LinkActor::Ingestion)]
    #[case(LinkStatus::Active, LinkStatus::AuthenticationFailure, LinkActor::TaskStatusListener)]
    #[case(LinkStatus::Pending, LinkStatus::PendingFirstData, LinkActor::TaskEmitter)]
    #[case(LinkStatus::Pending, LinkStatus::Failed, LinkActor::PairingOrchestrator)]
    #[case(LinkStatus::Failed, LinkStatus::Pending, LinkActor::PairingOrchestrator)]
    #[case(LinkStatus::Failed, LinkStatus::DuplicateIntegration, LinkActor::PairingOrchestrator)]
    #[case(LinkStatus::Active, LinkStatus::Active, LinkActor::TaskEmitter)]
    fn permitted_transitions(
        #[case] from: LinkStatus,
        #[case] to: LinkStatus,
        #[case] actor: LinkActor,
    ) {
        assert_eq!(LinkStatus::transition(from, to, actor), Ok(to));
    }

    #[rstest]
    #[case(LinkStatus::PendingFirstData, LinkStatus::Active, LinkActor::TaskEmitter)]
    #[case(LinkStatus::Active, LinkStatus::AuthenticationFailure, LinkActor::Ingestion)]
    #[case(LinkStatus::Active, LinkStatus::Failed, LinkActor::PairingOrchestrator)]
    #[case(LinkStatus::Failed, LinkStatus::Active, LinkActor::Ingestion)]
    #[case(LinkStatus::Failed, LinkStatus::PendingFirstData, LinkActor::PairingOrchestrator)]
    #[case(LinkStatus::Pending, LinkStatus::Failed, LinkActor::TaskStatusListener)]
    fn rejected_transitions_are_conflicts(
        #[case] from: LinkStatus,
        #[case] to: LinkStatus,
        #[case] actor: LinkActor,
    ) {
        let err = LinkStatus::transition(from, to, actor).expect_err("transition rejected");
        assert_eq!(err.code(), ErrorCode::Conflict);
    }

    #[rstest]
    fn sub_statuses_follow_pairing_order() {
        assert!(PairingSubStatus::PatchedVehicleProfile < PairingSubStatus::AssociatedDeviceToTemplate);
        assert!(PairingSubStatus::AppliedTemplate < PairingSubStatus::PendingTemplateConfirm);
    }

    #[rstest]
    fn metadata_keeps_unknown_keys() {
        let stored = json!({
            "smartcarEndpoints": ["/odometer"],
            "autoPiUnitId": "unit-1",
            "autoPiSubStatus": "PatchedVehicleProfile",
            "elasticProfile": true
        });
        let metadata = LinkMetadata::from_value(stored.clone()).expect("decode metadata");
        assert_eq!(metadata.autopi.unit_id.as_deref(), Some("unit-1"));
        assert_eq!(
            metadata.autopi.sub_status,
            Some(PairingSubStatus::PatchedVehicleProfile)
        );
        assert_eq!(metadata.extra.get("elasticProfile"), Some(&json!(true)));
        assert_eq!(metadata.to_value(), stored);
    }

    #[rstest]
    fn encrypted_tokens_are_redacted_in_debug_output() {
        let token = EncryptedToken::new("c2VjcmV0");
        assert_eq!(format!("{token:?}"), "EncryptedToken(..)");
    }
}
