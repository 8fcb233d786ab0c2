//! Stub adapter for unclassifiable devices.
//!
//! Devices whose manufacturer and protocol match no known vendor still
//! resolve to an adapter — this one. Every operation no-ops safely so an
//! unknown device can never take down a reconciliation pass or the
//! webhook pipeline.

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::warn;

use crate::adapter::{
    AdapterError, AdapterResult, AdapterTarget, CommandOutcome, CommandRequest, DeviceAdapter,
    DeviceHealth, DeviceInfo, EventHostSpec, HealthState,
};

#[derive(Default)]
pub struct StubAdapter;

impl StubAdapter {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl DeviceAdapter for StubAdapter {
    fn vendor(&self) -> &'static str {
        "stub"
    }

    async fn send_command(
        &self,
        target: &AdapterTarget,
        request: &CommandRequest,
    ) -> AdapterResult<CommandOutcome> {
        warn!(
            device_id = %target.device_id,
            command = %request.command,
            "no vendor adapter for device, command not executed"
        );
        Ok(CommandOutcome::failed(json!({
            "reason": "no vendor adapter available for this device"
        })))
    }

    async fn test_connection(&self, _target: &AdapterTarget) -> bool {
        false
    }

    async fn device_info(&self, target: &AdapterTarget) -> AdapterResult<DeviceInfo> {
        Ok(DeviceInfo {
            address: Some(target.host.clone()),
            ..Default::default()
        })
    }

    async fn device_health(&self, _target: &AdapterTarget) -> AdapterResult<DeviceHealth> {
        Ok(DeviceHealth {
            state: HealthState::Unreachable,
            uptime_secs: None,
            issues: vec!["no vendor adapter available".to_string()],
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
        Err(AdapterError::Unsupported(
            "stub adapter cannot write device configuration".into(),
        ))
    }

    async fn webhook_configurations(
        &self,
        _target: &AdapterTarget,
    ) -> AdapterResult<Vec<EventHostSpec>> {
        Ok(Vec::new())
    }

    async fn configure_event_host(
        &self,
        _target: &AdapterTarget,
        _spec: &EventHostSpec,
    ) -> AdapterResult<()> {
        Err(AdapterError::Unsupported(
            "stub adapter cannot configure event hosts".into(),
        ))
    }

    async fn delete_webhooks(&self, _target: &AdapterTarget) -> AdapterResult<()> {
        Ok(())
    }

    fn supports_webhooks(&self) -> bool {
        false
    }

    async fn discover_devices(&self) -> AdapterResult<Vec<DeviceInfo>> {
        Ok(Vec::new())
    }
}
