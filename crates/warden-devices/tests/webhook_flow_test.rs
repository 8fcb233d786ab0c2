//! Webhook registration and ingestion flow against a scripted adapter.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};

use warden_core::{CryptoService, EventBus, FleetEvent};
use warden_devices::adapter::{
    AdapterError, AdapterResult, AdapterTarget, CommandOutcome, CommandRequest, DeviceAdapter,
    DeviceHealth, DeviceInfo, EventHostSpec, HealthState,
};
use warden_devices::{
    AdapterKind, AdapterRegistry, DeviceKind, DeviceRegistry, DeviceService, DeviceSpec, Protocol,
    WebhookIngest, WebhookSpec,
};

/// Adapter that records event-host configuration calls.
#[derive(Default)]
struct RecordingAdapter {
    configured_hosts: Mutex<Vec<EventHostSpec>>,
    webhooks_supported: bool,
}

impl RecordingAdapter {
    fn with_webhooks() -> Self {
        Self {
            configured_hosts: Mutex::new(Vec::new()),
            webhooks_supported: true,
        }
    }
}

#[async_trait]
impl DeviceAdapter for RecordingAdapter {
    fn vendor(&self) -> &'static str {
        "recording"
    }

    async fn send_command(
        &self,
        _target: &AdapterTarget,
        _request: &CommandRequest,
    ) -> AdapterResult<CommandOutcome> {
        Ok(CommandOutcome::ok())
    }

    async fn test_connection(&self, _target: &AdapterTarget) -> bool {
        true
    }

    async fn device_info(&self, _target: &AdapterTarget) -> AdapterResult<DeviceInfo> {
        Ok(DeviceInfo::default())
    }

    async fn device_health(&self, _target: &AdapterTarget) -> AdapterResult<DeviceHealth> {
        Ok(DeviceHealth {
            state: HealthState::Healthy,
            uptime_secs: None,
            issues: Vec::new(),
        })
    }

    async fn get_configuration(&self, _target: &AdapterTarget) -> AdapterResult<Value> {
        Ok(Value::Null)
    }

    async fn update_configuration(
        &self,
        _target: &AdapterTarget,
        _configuration: &Value,
    ) -> AdapterResult<()> {
        Ok(())
    }

    async fn webhook_configurations(
        &self,
        _target: &AdapterTarget,
    ) -> AdapterResult<Vec<EventHostSpec>> {
        Ok(self.configured_hosts.lock().unwrap().clone())
    }

    async fn configure_event_host(
        &self,
        _target: &AdapterTarget,
        spec: &EventHostSpec,
    ) -> AdapterResult<()> {
        if !self.webhooks_supported {
            return Err(AdapterError::Unsupported("no webhook capability".into()));
        }
        self.configured_hosts.lock().unwrap().push(spec.clone());
        Ok(())
    }

    async fn delete_webhooks(&self, _target: &AdapterTarget) -> AdapterResult<()> {
        self.configured_hosts.lock().unwrap().clear();
        Ok(())
    }

    fn supports_webhooks(&self) -> bool {
        self.webhooks_supported
    }

    async fn discover_devices(&self) -> AdapterResult<Vec<DeviceInfo>> {
        Ok(Vec::new())
    }
}

async fn setup() -> (Arc<DeviceRegistry>, Arc<DeviceService>, Arc<RecordingAdapter>, String) {
    let adapter = Arc::new(RecordingAdapter::with_webhooks());
    let registry = Arc::new(DeviceRegistry::new(CryptoService::generate_random()));
    let mut adapters = AdapterRegistry::with_default_adapters(Duration::from_secs(1));
    adapters.register(AdapterKind::Hikvision, adapter.clone());

    let device = registry
        .register_device(DeviceSpec {
            organization_id: "org-1".to_string(),
            name: "Entrance Terminal".to_string(),
            host: "192.168.9.20".to_string(),
            port: 80,
            protocol: Protocol::Http,
            username: "admin".to_string(),
            password: Some("pw".to_string()),
            manufacturer: "Hikvision".to_string(),
            model: "DS-1".to_string(),
            kind: DeviceKind::FaceTerminal,
        })
        .await
        .unwrap();

    let service = Arc::new(DeviceService::new(
        registry.clone(),
        Arc::new(adapters),
        EventBus::new(),
    ));

    (registry, service, adapter, device.device_id)
}

#[tokio::test]
async fn test_configure_webhook_pushes_event_host_and_records_registration() {
    let (registry, service, adapter, device_id) = setup().await;

    let webhook = service
        .configure_webhook(
            &device_id,
            WebhookSpec {
                url: "http://backend/webhook/device-events".to_string(),
                event_types: vec!["AccessControllerEvent".to_string()],
                protocol: "HTTP".to_string(),
                format: "JSON".to_string(),
            },
        )
        .await
        .unwrap();

    // The device received the event host with the registration id
    let configured = adapter.configured_hosts.lock().unwrap().clone();
    assert_eq!(configured.len(), 1);
    assert_eq!(configured[0].host_id, webhook.host_id);
    assert_eq!(configured[0].url, "http://backend/webhook/device-events");

    // And the registration is active with zeroed statistics
    let stored = registry.list_webhooks(&device_id).await;
    assert_eq!(stored.len(), 1);
    assert!(stored[0].is_active);
    assert_eq!(stored[0].trigger_count, 0);
}

#[tokio::test]
async fn test_remove_webhook_deactivates_registration() {
    let (registry, service, adapter, device_id) = setup().await;

    let webhook = service
        .configure_webhook(
            &device_id,
            WebhookSpec {
                url: "http://backend/webhook".to_string(),
                event_types: vec![],
                protocol: "HTTP".to_string(),
                format: "JSON".to_string(),
            },
        )
        .await
        .unwrap();

    service
        .remove_webhook(&device_id, &webhook.host_id)
        .await
        .unwrap();

    // Device side cleared, registration kept but inactive
    assert!(adapter.configured_hosts.lock().unwrap().is_empty());
    let stored = registry
        .find_webhook_by_host_id(&webhook.host_id)
        .await
        .unwrap();
    assert!(!stored.is_active);
}

#[tokio::test]
async fn test_full_push_cycle_updates_statistics_and_dispatches() {
    let (registry, service, _adapter, device_id) = setup().await;

    let webhook = service
        .configure_webhook(
            &device_id,
            WebhookSpec {
                url: "http://backend/webhook".to_string(),
                event_types: vec![],
                protocol: "HTTP".to_string(),
                format: "JSON".to_string(),
            },
        )
        .await
        .unwrap();

    let bus = EventBus::new();
    let mut rx = bus.subscribe();
    let ingest = WebhookIngest::new(registry.clone(), bus);

    // The device pushes a face match referencing its registration
    let response = ingest
        .process(
            None,
            "192.168.9.20".to_string(),
            json!({
                "hostId": webhook.host_id,
                "eventType": "faceMatch",
                "faceMatch": { "employeeNo": "E-7", "similarity": 0.97 }
            }),
        )
        .await;
    assert_eq!(response.status, "received");

    // Correlated by source IP to the registered device
    let (event, _) = rx.recv().await.unwrap();
    match event {
        FleetEvent::FaceMatch {
            device_id: event_device,
            employee_no,
            similarity,
            ..
        } => {
            assert_eq!(event_device, device_id);
            assert_eq!(employee_no.as_deref(), Some("E-7"));
            assert_eq!(similarity, Some(0.97));
        }
        other => panic!("expected FaceMatch, got {:?}", other),
    }

    let stored = registry
        .find_webhook_by_host_id(&webhook.host_id)
        .await
        .unwrap();
    assert_eq!(stored.trigger_count, 1);
}
