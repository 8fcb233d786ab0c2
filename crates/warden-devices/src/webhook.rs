//! Webhook ingestion and correlation.
//!
//! Devices push events to `POST /webhook/device-events[/:device_id]` with
//! whatever payload shape their firmware produces. This module turns those
//! free-form payloads into [`FleetEvent`]s:
//!
//! 1. **Device identity**: path parameter first, then nested serial/device
//!    fields in the body, then the request's source IP.
//! 2. **Host identity** (independent): the webhook registration id, used to
//!    update delivery statistics when present — processing continues
//!    without it.
//! 3. **Dispatch**: known `eventType` strings map to typed payloads and
//!    land on the event bus; unknown types are logged and dropped.
//!
//! Nothing in this path is allowed to fail the HTTP exchange: devices
//! retry aggressively on non-2xx, and a retry flood is worse than an
//! acknowledged-but-logged failure.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

use warden_core::{EventBus, FleetEvent};

use crate::model::DeviceStatus;
use crate::registry::DeviceRegistry;

/// Payload fields probed for a device identifier, in order.
const DEVICE_ID_FIELDS: &[&[&str]] = &[
    &["deviceId"],
    &["device_id"],
    &["deviceID"],
    &["serialNumber"],
    &["sn"],
    &["AccessControllerEvent", "deviceName"],
    &["device", "id"],
    &["device", "serialNumber"],
    &["params", "deviceID"],
];

/// Payload fields probed for a webhook host (registration) identifier.
const HOST_ID_FIELDS: &[&[&str]] = &[
    &["hostId"],
    &["host_id"],
    &["httpHost", "id"],
    &["eventHost", "id"],
    &["params", "hostId"],
];

/// How the device identity was established.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceIdentity {
    /// Explicit device id from the request path
    Path(String),
    /// Serial/device field found in the payload
    Payload(String),
    /// Fallback: the request's source IP address
    SourceIp(String),
}

impl DeviceIdentity {
    pub fn value(&self) -> &str {
        match self {
            Self::Path(v) | Self::Payload(v) | Self::SourceIp(v) => v,
        }
    }
}

/// Typed forms of the vendor payloads this engine understands.
///
/// The raw variant keeps unrecognized or malformed payloads flowing
/// through the pipeline instead of rejecting them.
#[derive(Debug, Clone)]
pub enum VendorPayload {
    AccessController(AccessControllerEvent),
    FaceMatch(FaceMatchEvent),
    CardReader(CardReaderEvent),
    DoorStatus(DoorStatusEvent),
    Alarm { alarm_type: String },
    Raw(Value),
}

impl VendorPayload {
    /// Classify a payload by its vendor event type: a chain of typed
    /// matchers with a raw fallback.
    pub fn classify(event_type: &str, payload: &Value) -> Self {
        fn parse<T: serde::de::DeserializeOwned>(payload: &Value) -> Option<T> {
            serde_json::from_value(payload.clone()).ok()
        }

        match event_type {
            "AccessControllerEvent" => parse(payload)
                .map(Self::AccessController)
                .unwrap_or_else(|| Self::Raw(payload.clone())),
            "faceMatch" => parse(payload)
                .map(Self::FaceMatch)
                .unwrap_or_else(|| Self::Raw(payload.clone())),
            "cardReader" => parse(payload)
                .map(Self::CardReader)
                .unwrap_or_else(|| Self::Raw(payload.clone())),
            "doorStatus" => parse(payload)
                .map(Self::DoorStatus)
                .unwrap_or_else(|| Self::Raw(payload.clone())),
            "alarm" => Self::Alarm {
                alarm_type: payload["alarmType"]
                    .as_str()
                    .unwrap_or("unspecified")
                    .to_string(),
            },
            _ => Self::Raw(payload.clone()),
        }
    }
}

/// Access-controller decision event (Hikvision-style).
#[derive(Debug, Clone, Deserialize)]
pub struct AccessControllerEvent {
    #[serde(rename = "AccessControllerEvent")]
    pub detail: AccessControllerDetail,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AccessControllerDetail {
    #[serde(default, rename = "employeeNoString")]
    pub employee_no: Option<String>,
    /// Vendor sub-code; 75 is "access granted by face" on most firmwares
    #[serde(default, rename = "subEventType")]
    pub sub_event_type: Option<i64>,
    #[serde(default, rename = "currentVerifyMode")]
    pub verify_mode: Option<String>,
}

/// Face-recognition match event.
#[derive(Debug, Clone, Deserialize)]
pub struct FaceMatchEvent {
    #[serde(rename = "faceMatch")]
    pub detail: FaceMatchDetail,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FaceMatchDetail {
    #[serde(default, rename = "employeeNo")]
    pub employee_no: Option<String>,
    #[serde(default)]
    pub similarity: Option<f64>,
}

/// Card swipe event.
#[derive(Debug, Clone, Deserialize)]
pub struct CardReaderEvent {
    #[serde(rename = "cardReader")]
    pub detail: CardReaderDetail,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CardReaderDetail {
    #[serde(default, rename = "cardNo")]
    pub card_no: Option<String>,
}

/// Door status event.
#[derive(Debug, Clone, Deserialize)]
pub struct DoorStatusEvent {
    #[serde(rename = "doorStatus")]
    pub detail: DoorStatusDetail,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DoorStatusDetail {
    #[serde(default)]
    pub open: Option<bool>,
    #[serde(default)]
    pub status: Option<String>,
}

/// Response body for the webhook endpoint. Always paired with HTTP 200.
#[derive(Debug, Clone, Serialize)]
pub struct IngestResponse {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub timestamp: i64,
}

impl IngestResponse {
    fn received() -> Self {
        Self {
            status: "received".to_string(),
            message: None,
            timestamp: Utc::now().timestamp(),
        }
    }

    fn error(message: impl Into<String>) -> Self {
        Self {
            status: "error".to_string(),
            message: Some(message.into()),
            timestamp: Utc::now().timestamp(),
        }
    }
}

/// Webhook ingestion pipeline.
pub struct WebhookIngest {
    registry: Arc<DeviceRegistry>,
    event_bus: EventBus,
}

impl WebhookIngest {
    pub fn new(registry: Arc<DeviceRegistry>, event_bus: EventBus) -> Self {
        Self {
            registry,
            event_bus,
        }
    }

    /// Process one inbound webhook delivery.
    ///
    /// Never returns an error: every failure is folded into an `error`
    /// response body with delivery statistics updated where possible.
    pub async fn process(
        &self,
        path_device_id: Option<String>,
        source_ip: String,
        payload: Value,
    ) -> IngestResponse {
        let host_id = extract_host_id(&payload);

        match self
            .process_inner(path_device_id, source_ip, &payload, host_id.as_deref())
            .await
        {
            Ok(()) => {
                if let Some(host_id) = host_id {
                    self.registry.record_webhook_trigger(&host_id, None).await;
                } else {
                    debug!("webhook payload carries no host id, statistics skipped");
                }
                IngestResponse::received()
            }
            Err(message) => {
                warn!(error = %message, "webhook processing failed");
                if let Some(host_id) = host_id {
                    self.registry
                        .record_webhook_trigger(&host_id, Some(message.clone()))
                        .await;
                }
                IngestResponse::error(message)
            }
        }
    }

    async fn process_inner(
        &self,
        path_device_id: Option<String>,
        source_ip: String,
        payload: &Value,
        host_id: Option<&str>,
    ) -> std::result::Result<(), String> {
        let identity = extract_device_identity(path_device_id, &source_ip, payload);

        // Correlate to a registered device where possible; an unmatched
        // identity still flows into events as-is
        let device = match &identity {
            DeviceIdentity::Path(id) | DeviceIdentity::Payload(id) => {
                self.registry.get_device(id).await
            }
            DeviceIdentity::SourceIp(ip) => self.registry.find_device_by_host(ip).await,
        };

        let device_id = match &device {
            Some(device) => device.device_id.clone(),
            None => {
                debug!(
                    identity = identity.value(),
                    "webhook from unregistered device"
                );
                identity.value().to_string()
            }
        };

        // Any push proves the device is alive
        if let Some(device) = &device {
            if let Err(e) = self
                .registry
                .set_device_status(&device.device_id, DeviceStatus::Online)
                .await
            {
                warn!(device_id = %device.device_id, error = %e, "failed to refresh device status");
            }
        }

        let event_type = extract_event_type(payload);
        info!(
            device_id = %device_id,
            event_type = %event_type,
            host_id = host_id.unwrap_or("-"),
            "device event received"
        );

        self.dispatch(&device_id, &event_type, payload).await;
        Ok(())
    }

    /// Route a payload by its vendor event type.
    async fn dispatch(&self, device_id: &str, event_type: &str, payload: &Value) {
        let timestamp = Utc::now().timestamp();
        let event = match VendorPayload::classify(event_type, payload) {
            VendorPayload::AccessController(event) => FleetEvent::AccessGranted {
                device_id: device_id.to_string(),
                employee_no: event.detail.employee_no,
                granted: event.detail.sub_event_type != Some(76),
                timestamp,
            },
            VendorPayload::FaceMatch(event) => FleetEvent::FaceMatch {
                device_id: device_id.to_string(),
                employee_no: event.detail.employee_no,
                similarity: event.detail.similarity,
                timestamp,
            },
            VendorPayload::CardReader(event) => FleetEvent::CardRead {
                device_id: device_id.to_string(),
                card_no: event.detail.card_no,
                timestamp,
            },
            VendorPayload::DoorStatus(event) => {
                let door_open = event
                    .detail
                    .open
                    .or_else(|| event.detail.status.as_deref().map(|s| s == "open"))
                    .unwrap_or(false);
                FleetEvent::DoorStatus {
                    device_id: device_id.to_string(),
                    door_open,
                    timestamp,
                }
            }
            VendorPayload::Alarm { alarm_type } => FleetEvent::AlarmRaised {
                device_id: device_id.to_string(),
                alarm_type,
                timestamp,
            },
            VendorPayload::Raw(_) => {
                // Forward-compatible: new vendor event types (and malformed
                // bodies for known ones) are expected and must not error
                debug!(device_id = %device_id, event_type = %event_type, "unrecognized payload dropped");
                return;
            }
        };

        self.event_bus
            .publish_with_source(event, "webhook-ingest")
            .await;
    }
}

/// Probe a payload for the first present field in a path list.
fn probe_fields(payload: &Value, paths: &[&[&str]]) -> Option<String> {
    for path in paths {
        let mut current = payload;
        for segment in *path {
            current = &current[*segment];
        }
        match current {
            Value::String(s) if !s.is_empty() => return Some(s.clone()),
            Value::Number(n) => return Some(n.to_string()),
            _ => continue,
        }
    }
    None
}

/// Extract the device identity with the ordered fallback chain:
/// explicit path parameter, payload serial/device fields, source IP.
pub fn extract_device_identity(
    path_device_id: Option<String>,
    source_ip: &str,
    payload: &Value,
) -> DeviceIdentity {
    if let Some(id) = path_device_id {
        if !id.is_empty() {
            return DeviceIdentity::Path(id);
        }
    }
    if let Some(id) = probe_fields(payload, DEVICE_ID_FIELDS) {
        return DeviceIdentity::Payload(id);
    }
    DeviceIdentity::SourceIp(source_ip.to_string())
}

/// Extract the webhook host (registration) id, independent of the device
/// identity.
pub fn extract_host_id(payload: &Value) -> Option<String> {
    probe_fields(payload, HOST_ID_FIELDS)
}

/// Extract the vendor event type string.
fn extract_event_type(payload: &Value) -> String {
    payload["eventType"]
        .as_str()
        .or_else(|| payload["event_type"].as_str())
        .or_else(|| payload["type"].as_str())
        .unwrap_or("unspecified")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_identity_prefers_path_parameter() {
        let payload = json!({ "deviceId": "payload-id" });
        let identity =
            extract_device_identity(Some("path-id".to_string()), "10.0.0.1", &payload);
        assert_eq!(identity, DeviceIdentity::Path("path-id".to_string()));
    }

    #[test]
    fn test_identity_falls_back_to_payload_fields() {
        let payload = json!({ "device": { "serialNumber": "SN-123" } });
        let identity = extract_device_identity(None, "10.0.0.1", &payload);
        assert_eq!(identity, DeviceIdentity::Payload("SN-123".to_string()));
    }

    #[test]
    fn test_identity_falls_back_to_source_ip() {
        // No identifier anywhere in the body: the source IP is the identity
        let payload = json!({ "eventType": "doorStatus", "doorStatus": { "open": true } });
        let identity = extract_device_identity(None, "192.168.1.77", &payload);
        assert_eq!(identity, DeviceIdentity::SourceIp("192.168.1.77".to_string()));
    }

    #[test]
    fn test_empty_path_parameter_is_skipped() {
        let payload = json!({ "sn": "SN-9" });
        let identity = extract_device_identity(Some(String::new()), "10.0.0.1", &payload);
        assert_eq!(identity, DeviceIdentity::Payload("SN-9".to_string()));
    }

    #[test]
    fn test_numeric_device_id_accepted() {
        let payload = json!({ "deviceId": 42 });
        let identity = extract_device_identity(None, "10.0.0.1", &payload);
        assert_eq!(identity, DeviceIdentity::Payload("42".to_string()));
    }

    #[test]
    fn test_host_id_extraction_is_independent() {
        let payload = json!({ "httpHost": { "id": "host-7" }, "deviceId": "dev-1" });
        assert_eq!(extract_host_id(&payload), Some("host-7".to_string()));

        let no_host = json!({ "deviceId": "dev-1" });
        assert_eq!(extract_host_id(&no_host), None);
    }

    #[tokio::test]
    async fn test_process_always_answers() {
        use warden_core::CryptoService;

        let registry = Arc::new(DeviceRegistry::new(CryptoService::generate_random()));
        let ingest = WebhookIngest::new(registry, EventBus::new());

        // Unknown event type from an unregistered device: still "received"
        let response = ingest
            .process(
                None,
                "10.1.1.1".to_string(),
                json!({ "eventType": "somethingNew", "x": 1 }),
            )
            .await;
        assert_eq!(response.status, "received");

        // Entirely malformed body: still answered
        let response = ingest
            .process(None, "10.1.1.1".to_string(), json!("not an object"))
            .await;
        assert_eq!(response.status, "received");
    }

    #[tokio::test]
    async fn test_process_dispatches_known_events() {
        use warden_core::CryptoService;

        let registry = Arc::new(DeviceRegistry::new(CryptoService::generate_random()));
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        let ingest = WebhookIngest::new(registry, bus);

        ingest
            .process(
                Some("dev-1".to_string()),
                "10.1.1.1".to_string(),
                json!({
                    "eventType": "AccessControllerEvent",
                    "AccessControllerEvent": {
                        "employeeNoString": "E-100",
                        "subEventType": 75
                    }
                }),
            )
            .await;

        let (event, meta) = rx.recv().await.unwrap();
        assert_eq!(meta.source, "webhook-ingest");
        match event {
            FleetEvent::AccessGranted {
                device_id,
                employee_no,
                granted,
                ..
            } => {
                assert_eq!(device_id, "dev-1");
                assert_eq!(employee_no.as_deref(), Some("E-100"));
                assert!(granted);
            }
            other => panic!("expected AccessGranted, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_process_updates_host_statistics() {
        use warden_core::CryptoService;
        use crate::model::{DeviceKind, DeviceSpec, Protocol};

        let registry = Arc::new(DeviceRegistry::new(CryptoService::generate_random()));
        let device = registry
            .register_device(DeviceSpec {
                organization_id: "org-1".to_string(),
                name: "Reader".to_string(),
                host: "10.0.0.9".to_string(),
                port: 80,
                protocol: Protocol::Http,
                username: String::new(),
                password: None,
                manufacturer: "Hikvision".to_string(),
                model: "M".to_string(),
                kind: DeviceKind::CardReader,
            })
            .await
            .unwrap();
        let webhook = registry
            .create_webhook(
                &device.device_id,
                None,
                "http://backend/webhook".to_string(),
                vec![],
                "HTTP".to_string(),
                "JSON".to_string(),
            )
            .await
            .unwrap();

        let ingest = WebhookIngest::new(registry.clone(), EventBus::new());
        ingest
            .process(
                Some(device.device_id.clone()),
                "10.0.0.9".to_string(),
                json!({
                    "hostId": webhook.host_id,
                    "eventType": "doorStatus",
                    "doorStatus": { "open": false }
                }),
            )
            .await;

        let updated = registry
            .find_webhook_by_host_id(&webhook.host_id)
            .await
            .unwrap();
        assert_eq!(updated.trigger_count, 1);
        assert!(updated.last_triggered.is_some());
        assert!(updated.last_error.is_none());
    }
}
