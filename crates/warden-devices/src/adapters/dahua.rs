//! Dahua adapter.
//!
//! Dahua access controllers expose a CGI interface; operations are GET
//! requests with `action` query parameters and JSON bodies where needed.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Value, json};
use std::time::Duration;
use tracing::debug;

use crate::adapter::{
    AdapterError, AdapterResult, AdapterTarget, CommandOutcome, CommandRequest, DeviceAdapter,
    DeviceHealth, DeviceInfo, EventHostSpec, HealthState, commands,
};

pub struct DahuaAdapter {
    client: Client,
}

impl DahuaAdapter {
    pub fn new(default_timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(default_timeout)
            .build()
            .unwrap_or_default();
        Self { client }
    }

    async fn cgi(
        &self,
        target: &AdapterTarget,
        path_and_query: &str,
        body: Option<Value>,
    ) -> AdapterResult<Value> {
        let url = format!("{}{}", target.base_url(), path_and_query);
        let mut request = self
            .client
            .get(&url)
            .timeout(target.timeout)
            .basic_auth(&target.username, target.password.as_deref());
        if let Some(body) = body {
            request = self
                .client
                .post(&url)
                .timeout(target.timeout)
                .basic_auth(&target.username, target.password.as_deref())
                .json(&body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| AdapterError::from_reqwest(e, target.timeout))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AdapterError::Communication(format!(
                "dahua cgi returned {}",
                status
            )));
        }

        // CGI endpoints answer either JSON or `key=value` text; normalize
        // the text form into a flat JSON object
        let text = response
            .text()
            .await
            .map_err(|e| AdapterError::from_reqwest(e, target.timeout))?;
        if let Ok(value) = serde_json::from_str::<Value>(&text) {
            return Ok(value);
        }

        let mut object = serde_json::Map::new();
        for line in text.lines() {
            if let Some((key, value)) = line.split_once('=') {
                object.insert(key.trim().to_string(), Value::String(value.trim().to_string()));
            }
        }
        Ok(Value::Object(object))
    }
}

#[async_trait]
impl DeviceAdapter for DahuaAdapter {
    fn vendor(&self) -> &'static str {
        "dahua"
    }

    async fn send_command(
        &self,
        target: &AdapterTarget,
        request: &CommandRequest,
    ) -> AdapterResult<CommandOutcome> {
        let payload = match request.command.as_str() {
            commands::PERSON_ADD => {
                self.cgi(
                    target,
                    "/cgi-bin/AccessUser.cgi?action=insertMulti",
                    Some(json!({ "UserList": [request.parameters] })),
                )
                .await?
            }
            commands::PERSON_UPDATE => {
                self.cgi(
                    target,
                    "/cgi-bin/AccessUser.cgi?action=updateMulti",
                    Some(json!({ "UserList": [request.parameters] })),
                )
                .await?
            }
            commands::PERSON_REMOVE => {
                let user_id = request.parameters["employee_id"]
                    .as_str()
                    .unwrap_or_default()
                    .to_string();
                self.cgi(
                    target,
                    &format!(
                        "/cgi-bin/AccessUser.cgi?action=removeMulti&UserIDList[0]={}",
                        user_id
                    ),
                    None,
                )
                .await?
            }
            commands::DOOR_UNLOCK => {
                let door = request.parameters["door"].as_u64().unwrap_or(1);
                self.cgi(
                    target,
                    &format!(
                        "/cgi-bin/accessControl.cgi?action=openDoor&channel={}&Type=Remote",
                        door
                    ),
                    None,
                )
                .await?
            }
            commands::DEVICE_REBOOT => {
                self.cgi(target, "/cgi-bin/magicBox.cgi?action=reboot", None)
                    .await?
            }
            other => {
                return Err(AdapterError::Unsupported(format!(
                    "command '{}' is not supported by the dahua adapter",
                    other
                )));
            }
        };

        // CGI success responses answer "OK"; the key=value parse leaves
        // that as an object with an "OK" key or an empty object
        let success = payload
            .get("error")
            .map(|e| e.is_null())
            .unwrap_or(true);
        Ok(CommandOutcome {
            success,
            data: Some(payload),
        })
    }

    async fn test_connection(&self, target: &AdapterTarget) -> bool {
        match self
            .cgi(
                target,
                "/cgi-bin/magicBox.cgi?action=getDeviceType",
                None,
            )
            .await
        {
            Ok(_) => true,
            Err(e) => {
                debug!(device_id = %target.device_id, error = %e, "dahua connection test failed");
                false
            }
        }
    }

    async fn device_info(&self, target: &AdapterTarget) -> AdapterResult<DeviceInfo> {
        let device_type = self
            .cgi(target, "/cgi-bin/magicBox.cgi?action=getDeviceType", None)
            .await?;
        let serial = self
            .cgi(target, "/cgi-bin/magicBox.cgi?action=getSerialNo", None)
            .await?;
        let version = self
            .cgi(
                target,
                "/cgi-bin/magicBox.cgi?action=getSoftwareVersion",
                None,
            )
            .await?;

        Ok(DeviceInfo {
            serial_number: serial["sn"].as_str().map(String::from),
            manufacturer: Some("Dahua".to_string()),
            model: device_type["type"].as_str().map(String::from),
            firmware_version: version["version"].as_str().map(String::from),
            address: Some(target.host.clone()),
        })
    }

    async fn device_health(&self, target: &AdapterTarget) -> AdapterResult<DeviceHealth> {
        let payload = self
            .cgi(target, "/cgi-bin/magicBox.cgi?action=getUpTime", None)
            .await?;

        let uptime = payload["info.LastRebootTime"]
            .as_str()
            .and_then(|s| s.parse().ok())
            .or_else(|| payload["uptime"].as_str().and_then(|s| s.parse().ok()));

        Ok(DeviceHealth {
            state: HealthState::Healthy,
            uptime_secs: uptime,
            issues: Vec::new(),
        })
    }

    async fn get_configuration(&self, target: &AdapterTarget) -> AdapterResult<Value> {
        self.cgi(
            target,
            "/cgi-bin/configManager.cgi?action=getConfig&name=AccessControl",
            None,
        )
        .await
    }

    async fn update_configuration(
        &self,
        target: &AdapterTarget,
        configuration: &Value,
    ) -> AdapterResult<()> {
        self.cgi(
            target,
            "/cgi-bin/configManager.cgi?action=setConfig&name=AccessControl",
            Some(configuration.clone()),
        )
        .await?;
        Ok(())
    }

    async fn webhook_configurations(
        &self,
        target: &AdapterTarget,
    ) -> AdapterResult<Vec<EventHostSpec>> {
        let payload = self
            .cgi(
                target,
                "/cgi-bin/configManager.cgi?action=getConfig&name=PictureHttpUpload",
                None,
            )
            .await?;

        let address = payload["table.PictureHttpUpload.MainFormat[0].Address"]
            .as_str()
            .unwrap_or_default();
        if address.is_empty() {
            return Ok(Vec::new());
        }

        Ok(vec![EventHostSpec {
            host_id: "0".to_string(),
            url: address.to_string(),
            event_types: Vec::new(),
            protocol: "HTTP".to_string(),
            format: "JSON".to_string(),
        }])
    }

    async fn configure_event_host(
        &self,
        target: &AdapterTarget,
        spec: &EventHostSpec,
    ) -> AdapterResult<()> {
        self.cgi(
            target,
            &format!(
                "/cgi-bin/configManager.cgi?action=setConfig&PictureHttpUpload.Enable=true&PictureHttpUpload.MainFormat%5B0%5D.Address={}",
                spec.url
            ),
            None,
        )
        .await?;
        Ok(())
    }

    async fn delete_webhooks(&self, target: &AdapterTarget) -> AdapterResult<()> {
        self.cgi(
            target,
            "/cgi-bin/configManager.cgi?action=setConfig&PictureHttpUpload.Enable=false",
            None,
        )
        .await?;
        Ok(())
    }

    fn supports_webhooks(&self) -> bool {
        true
    }

    async fn discover_devices(&self) -> AdapterResult<Vec<DeviceInfo>> {
        Err(AdapterError::Unsupported(
            "dahua discovery requires the DHDiscover multicast transport".into(),
        ))
    }
}
