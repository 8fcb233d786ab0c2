//! ZKTeco adapter.
//!
//! Talks to the REST surface exposed by ZKTeco access controllers and
//! standalone terminals (BioSecurity-style endpoints under `/api`).

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Value, json};
use std::time::Duration;
use tracing::debug;

use crate::adapter::{
    AdapterError, AdapterResult, AdapterTarget, CommandOutcome, CommandRequest, DeviceAdapter,
    DeviceHealth, DeviceInfo, EventHostSpec, HealthState, commands,
};

pub struct ZktecoAdapter {
    client: Client,
}

impl ZktecoAdapter {
    pub fn new(default_timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(default_timeout)
            .build()
            .unwrap_or_default();
        Self { client }
    }

    async fn post(
        &self,
        target: &AdapterTarget,
        path: &str,
        body: Value,
    ) -> AdapterResult<Value> {
        let url = format!("{}{}", target.base_url(), path);
        let response = self
            .client
            .post(url)
            .timeout(target.timeout)
            .basic_auth(&target.username, target.password.as_deref())
            .json(&body)
            .send()
            .await
            .map_err(|e| AdapterError::from_reqwest(e, target.timeout))?;

        let status = response.status();
        let payload: Value = response.json().await.unwrap_or(Value::Null);

        if !status.is_success() {
            return Err(AdapterError::Communication(format!(
                "zkteco api returned {}: {}",
                status,
                payload["message"].as_str().unwrap_or("no detail")
            )));
        }

        Ok(payload)
    }

    async fn get(&self, target: &AdapterTarget, path: &str) -> AdapterResult<Value> {
        let url = format!("{}{}", target.base_url(), path);
        let response = self
            .client
            .get(url)
            .timeout(target.timeout)
            .basic_auth(&target.username, target.password.as_deref())
            .send()
            .await
            .map_err(|e| AdapterError::from_reqwest(e, target.timeout))?;

        let status = response.status();
        let payload: Value = response.json().await.unwrap_or(Value::Null);

        if !status.is_success() {
            return Err(AdapterError::Communication(format!(
                "zkteco api returned {}",
                status
            )));
        }

        Ok(payload)
    }

    /// ZKTeco wraps results as `{"code": 0, "message": "...", "data": ...}`.
    fn outcome_from(payload: Value) -> CommandOutcome {
        let success = payload
            .get("code")
            .and_then(Value::as_i64)
            .map(|code| code == 0)
            .unwrap_or(true);
        CommandOutcome {
            success,
            data: Some(payload),
        }
    }
}

#[async_trait]
impl DeviceAdapter for ZktecoAdapter {
    fn vendor(&self) -> &'static str {
        "zkteco"
    }

    async fn send_command(
        &self,
        target: &AdapterTarget,
        request: &CommandRequest,
    ) -> AdapterResult<CommandOutcome> {
        let payload = match request.command.as_str() {
            commands::PERSON_ADD => {
                self.post(target, "/api/person/add", request.parameters.clone())
                    .await?
            }
            commands::PERSON_UPDATE => {
                self.post(target, "/api/person/update", request.parameters.clone())
                    .await?
            }
            commands::PERSON_REMOVE => {
                let pin = request.parameters["employee_id"].clone();
                self.post(target, "/api/person/delete", json!({ "pin": pin }))
                    .await?
            }
            commands::DOOR_UNLOCK => {
                let door = request.parameters["door"].as_u64().unwrap_or(1);
                self.post(
                    target,
                    "/api/accDoor/remoteOpen",
                    json!({ "doorNo": door, "interval": 5 }),
                )
                .await?
            }
            commands::DEVICE_REBOOT => {
                self.post(target, "/api/device/reboot", json!({})).await?
            }
            other => {
                return Err(AdapterError::Unsupported(format!(
                    "command '{}' is not supported by the zkteco adapter",
                    other
                )));
            }
        };

        Ok(Self::outcome_from(payload))
    }

    async fn test_connection(&self, target: &AdapterTarget) -> bool {
        match self.get(target, "/api/device/info").await {
            Ok(_) => true,
            Err(e) => {
                debug!(device_id = %target.device_id, error = %e, "zkteco connection test failed");
                false
            }
        }
    }

    async fn device_info(&self, target: &AdapterTarget) -> AdapterResult<DeviceInfo> {
        let payload = self.get(target, "/api/device/info").await?;
        let data = &payload["data"];

        Ok(DeviceInfo {
            serial_number: data["sn"].as_str().map(String::from),
            manufacturer: Some("ZKTeco".to_string()),
            model: data["deviceName"].as_str().map(String::from),
            firmware_version: data["fwVersion"].as_str().map(String::from),
            address: Some(target.host.clone()),
        })
    }

    async fn device_health(&self, target: &AdapterTarget) -> AdapterResult<DeviceHealth> {
        let payload = self.get(target, "/api/device/status").await?;
        let data = &payload["data"];

        let mut issues = Vec::new();
        if data["doorAlarm"].as_bool() == Some(true) {
            issues.push("door alarm active".to_string());
        }
        if data["tamper"].as_bool() == Some(true) {
            issues.push("tamper switch triggered".to_string());
        }

        Ok(DeviceHealth {
            state: if issues.is_empty() {
                HealthState::Healthy
            } else {
                HealthState::Degraded
            },
            uptime_secs: data["uptime"].as_u64(),
            issues,
        })
    }

    async fn get_configuration(&self, target: &AdapterTarget) -> AdapterResult<Value> {
        self.get(target, "/api/device/options").await
    }

    async fn update_configuration(
        &self,
        target: &AdapterTarget,
        configuration: &Value,
    ) -> AdapterResult<()> {
        self.post(target, "/api/device/options", configuration.clone())
            .await?;
        Ok(())
    }

    async fn webhook_configurations(
        &self,
        target: &AdapterTarget,
    ) -> AdapterResult<Vec<EventHostSpec>> {
        let payload = self.get(target, "/api/push/servers").await?;
        let servers = payload["data"].as_array().cloned().unwrap_or_default();

        Ok(servers
            .into_iter()
            .map(|server| EventHostSpec {
                host_id: server["id"]
                    .as_str()
                    .map(String::from)
                    .unwrap_or_else(|| server["id"].to_string()),
                url: server["url"].as_str().unwrap_or_default().to_string(),
                event_types: server["eventTypes"]
                    .as_array()
                    .map(|types| {
                        types
                            .iter()
                            .filter_map(|t| t.as_str().map(String::from))
                            .collect()
                    })
                    .unwrap_or_default(),
                protocol: "HTTP".to_string(),
                format: "JSON".to_string(),
            })
            .collect())
    }

    async fn configure_event_host(
        &self,
        target: &AdapterTarget,
        spec: &EventHostSpec,
    ) -> AdapterResult<()> {
        self.post(
            target,
            "/api/push/servers",
            json!({
                "id": spec.host_id,
                "url": spec.url,
                "eventTypes": spec.event_types,
            }),
        )
        .await?;
        Ok(())
    }

    async fn delete_webhooks(&self, target: &AdapterTarget) -> AdapterResult<()> {
        self.post(target, "/api/push/servers/clear", json!({}))
            .await?;
        Ok(())
    }

    fn supports_webhooks(&self) -> bool {
        true
    }

    async fn discover_devices(&self) -> AdapterResult<Vec<DeviceInfo>> {
        Err(AdapterError::Unsupported(
            "zkteco discovery requires the UDP broadcast transport".into(),
        ))
    }
}
