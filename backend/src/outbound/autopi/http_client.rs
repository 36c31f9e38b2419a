//! Reqwest-backed AutoPi adapter.
//!
//! Owns transport details only: authentication header, timeout, HTTP error
//! mapping and JSON decoding into port records.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, StatusCode, Url};
use serde::Serialize;
use tracing::debug;
use zeroize::Zeroizing;

use super::dto::{
    ApplyTemplateDto, DongleDeviceDto, RawCommandDto, TemplateDevicesDto, VehicleProfileDto,
};
use crate::domain::ports::{AutoPiApi, AutoPiApiError, AutoPiUnit, VehicleProfilePatch};

const SYNC_COMMAND: &str = "state.sls pending";

/// AutoPi adapter bound to one API root.
pub struct AutoPiHttpClient {
    client: Client,
    base_url: Url,
    api_key: Zeroizing<String>,
}

impl AutoPiHttpClient {
    /// Build a client with an explicit per-request timeout.
    ///
    /// # Errors
    ///
    /// Returns an error when the reqwest client cannot be constructed.
    pub fn new(
        base_url: Url,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: with_trailing_slash(base_url),
            api_key: Zeroizing::new(api_key.into()),
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, AutoPiApiError> {
        self.base_url
            .join(path)
            .map_err(|error| AutoPiApiError::transport(format!("invalid endpoint {path}: {error}")))
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        self.client
            .request(method, url)
            .header(
                reqwest::header::AUTHORIZATION,
                format!("APIToken {}", self.api_key.as_str()),
            )
            .header(reqwest::header::ACCEPT, "application/json")
    }

    async fn send_json<B: Serialize + Sync>(
        &self,
        method: Method,
        path: &str,
        body: &B,
    ) -> Result<(), AutoPiApiError> {
        let url = self.endpoint(path)?;
        let response = self
            .request(method, url)
            .json(body)
            .send()
            .await
            .map_err(map_transport_error)?;
        let status = response.status();
        let bytes = response.bytes().await.map_err(map_transport_error)?;
        if !status.is_success() {
            return Err(map_status_error(status, bytes.as_ref()));
        }
        debug!(path, status = status.as_u16(), "autopi call succeeded");
        Ok(())
    }
}

fn with_trailing_slash(mut url: Url) -> Url {
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url
}

#[async_trait]
impl AutoPiApi for AutoPiHttpClient {
    async fn get_device_by_unit_id(
        &self,
        unit_id: &str,
    ) -> Result<Option<AutoPiUnit>, AutoPiApiError> {
        let url = self.endpoint(&format!("dongle/devices/by_unit_id/{unit_id}/"))?;
        let response = self
            .request(Method::GET, url)
            .send()
            .await
            .map_err(map_transport_error)?;
        let status = response.status();
        let body = response.bytes().await.map_err(map_transport_error)?;
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(map_status_error(status, body.as_ref()));
        }
        parse_unit(body.as_ref()).map(Some)
    }

    async fn patch_vehicle_profile(
        &self,
        vehicle_id: i64,
        profile: &VehicleProfilePatch,
    ) -> Result<(), AutoPiApiError> {
        self.send_json(
            Method::PATCH,
            &format!("vehicle/profile/{vehicle_id}/"),
            &VehicleProfileDto::from(profile),
        )
        .await
    }

    async fn unassociate_device_template(
        &self,
        device_id: &str,
        template_id: i64,
    ) -> Result<(), AutoPiApiError> {
        self.send_json(
            Method::POST,
            &format!("dongle/templates/{template_id}/unassociate_devices/"),
            &TemplateDevicesDto::single(device_id),
        )
        .await
    }

    async fn associate_device_to_template(
        &self,
        device_id: &str,
        template_id: i64,
    ) -> Result<(), AutoPiApiError> {
        self.send_json(
            Method::POST,
            &format!("dongle/templates/{template_id}/associate_devices/"),
            &TemplateDevicesDto::single(device_id),
        )
        .await
    }

    async fn apply_template(
        &self,
        device_id: &str,
        template_id: i64,
    ) -> Result<(), AutoPiApiError> {
        self.send_json(
            Method::POST,
            &format!("dongle/devices/{device_id}/apply_template/"),
            &ApplyTemplateDto {
                template: template_id,
            },
        )
        .await
    }

    async fn command_sync_device(&self, device_id: &str) -> Result<(), AutoPiApiError> {
        self.send_json(
            Method::POST,
            &format!("dongle/devices/{device_id}/execute_raw/"),
            &RawCommandDto {
                command: SYNC_COMMAND,
            },
        )
        .await
    }
}

fn parse_unit(body: &[u8]) -> Result<AutoPiUnit, AutoPiApiError> {
    let decoded: DongleDeviceDto = serde_json::from_slice(body).map_err(|error| {
        AutoPiApiError::decode(format!("invalid AutoPi device payload: {error}"))
    })?;
    Ok(decoded.into_unit())
}

fn map_transport_error(error: reqwest::Error) -> AutoPiApiError {
    if error.is_timeout() {
        AutoPiApiError::timeout(error.to_string())
    } else {
        AutoPiApiError::transport(error.to_string())
    }
}

fn map_status_error(status: StatusCode, body: &[u8]) -> AutoPiApiError {
    let body_preview = body_preview(body);
    let message = if body_preview.is_empty() {
        format!("status {}", status.as_u16())
    } else {
        format!("status {}: {}", status.as_u16(), body_preview)
    };

    match status {
        StatusCode::TOO_MANY_REQUESTS => AutoPiApiError::rate_limited(message),
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => {
            AutoPiApiError::timeout(message)
        }
        _ => AutoPiApiError::rejected(status.as_u16(), message),
    }
}

fn body_preview(body: &[u8]) -> String {
    const PREVIEW_CHAR_LIMIT: usize = 160;

    let compact = String::from_utf8_lossy(body)
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");
    let preview = compact.chars().take(PREVIEW_CHAR_LIMIT).collect::<String>();
    if compact.chars().count() > PREVIEW_CHAR_LIMIT {
        format!("{preview}...")
    } else {
        preview
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::rate_limited(StatusCode::TOO_MANY_REQUESTS, true)]
    #[case::request_timeout(StatusCode::REQUEST_TIMEOUT, true)]
    #[case::gateway_timeout(StatusCode::GATEWAY_TIMEOUT, true)]
    #[case::server_error(StatusCode::BAD_GATEWAY, true)]
    #[case::bad_request(StatusCode::BAD_REQUEST, false)]
    #[case::forbidden(StatusCode::FORBIDDEN, false)]
    fn statuses_classify_as_transient_or_permanent(
        #[case] status: StatusCode,
        #[case] transient: bool,
    ) {
        let error = map_status_error(status, b"{\"detail\":\"nope\"}");
        assert_eq!(error.is_transient(), transient, "{status} -> {error}");
    }

    #[rstest]
    fn rejections_keep_the_status_code_and_body() {
        let error = map_status_error(StatusCode::CONFLICT, b"{\"detail\":\n  \"template locked\"}");
        match error {
            AutoPiApiError::Rejected { status, message } => {
                assert_eq!(status, 409);
                assert_eq!(message, "status 409: {\"detail\": \"template locked\"}");
            }
            other => panic!("expected Rejected, got {other:?}"),
        }
    }

    #[rstest]
    fn long_bodies_are_truncated() {
        let preview = body_preview("x".repeat(400).as_bytes());
        assert_eq!(preview.chars().count(), 163);
        assert!(preview.ends_with("..."));
    }

    #[rstest]
    fn device_payloads_decode_into_units() {
        let body = br#"{
            "id": "dev-9",
            "unit_id": "unit-1",
            "imei": "359000000000001",
            "vehicle": { "id": 77, "make": "Ford" },
            "template": 12
        }"#;

        let unit = parse_unit(body).expect("payload decodes");

        assert_eq!(unit.device_id, "dev-9");
        assert_eq!(unit.vehicle_id, 77);
        assert_eq!(unit.template_id, Some(12));
    }

    #[rstest]
    fn payloads_without_vehicle_are_decode_errors() {
        let error = parse_unit(br#"{ "id": "dev-9", "unit_id": "unit-1" }"#).expect_err("invalid");
        assert!(matches!(error, AutoPiApiError::Decode { .. }));
    }

    #[rstest]
    #[case("https://api.autopi.io", "https://api.autopi.io/dongle/devices/x/apply_template/")]
    #[case("https://proxy.test/autopi", "https://proxy.test/autopi/dongle/devices/x/apply_template/")]
    fn endpoints_join_below_the_base_path(#[case] base: &str, #[case] expected: &str) {
        let client = AutoPiHttpClient::new(
            Url::parse(base).expect("url"),
            "key",
            Duration::from_secs(1),
        )
        .expect("client");

        let url = client.endpoint("dongle/devices/x/apply_template/").expect("join");

        assert_eq!(url.as_str(), expected);
    }
}
