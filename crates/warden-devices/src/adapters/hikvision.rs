//! Hikvision adapter.
//!
//! Speaks the ISAPI JSON dialect used by Hikvision access-control
//! terminals. Person provisioning goes through
//! `/ISAPI/AccessControl/UserInfo/*`, event hosts through
//! `/ISAPI/Event/notification/httpHosts`.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Value, json};
use std::time::Duration;
use tracing::debug;

use crate::adapter::{
    AdapterError, AdapterResult, AdapterTarget, CommandOutcome, CommandRequest, DeviceAdapter,
    DeviceHealth, DeviceInfo, EventHostSpec, HealthState, commands,
};

pub struct HikvisionAdapter {
    client: Client,
}

impl HikvisionAdapter {
    pub fn new(default_timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(default_timeout)
            .build()
            .unwrap_or_default();
        Self { client }
    }

    fn request(
        &self,
        method: reqwest::Method,
        target: &AdapterTarget,
        path: &str,
    ) -> reqwest::RequestBuilder {
        let url = format!("{}{}", target.base_url(), path);
        self.client
            .request(method, url)
            .timeout(target.timeout)
            .basic_auth(&target.username, target.password.as_deref())
    }

    async fn exchange(
        &self,
        target: &AdapterTarget,
        method: reqwest::Method,
        path: &str,
        body: Option<Value>,
    ) -> AdapterResult<Value> {
        let mut request = self.request(method, target, path);
        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| AdapterError::from_reqwest(e, target.timeout))?;

        let status = response.status();
        let payload: Value = response.json().await.unwrap_or(Value::Null);

        if !status.is_success() {
            return Err(AdapterError::Communication(format!(
                "ISAPI returned {}: {}",
                status,
                payload["statusString"].as_str().unwrap_or("no detail")
            )));
        }

        Ok(payload)
    }

    /// ISAPI responses carry `statusCode: 1` on success.
    fn outcome_from(payload: Value) -> CommandOutcome {
        let success = payload
            .get("statusCode")
            .and_then(Value::as_i64)
            .map(|code| code == 1)
            .unwrap_or(true);
        CommandOutcome {
            success,
            data: Some(payload),
        }
    }
}

#[async_trait]
impl DeviceAdapter for HikvisionAdapter {
    fn vendor(&self) -> &'static str {
        "hikvision"
    }

    async fn send_command(
        &self,
        target: &AdapterTarget,
        request: &CommandRequest,
    ) -> AdapterResult<CommandOutcome> {
        let payload = match request.command.as_str() {
            commands::PERSON_ADD => {
                self.exchange(
                    target,
                    reqwest::Method::POST,
                    "/ISAPI/AccessControl/UserInfo/Record?format=json",
                    Some(json!({ "UserInfo": request.parameters })),
                )
                .await?
            }
            commands::PERSON_UPDATE => {
                self.exchange(
                    target,
                    reqwest::Method::PUT,
                    "/ISAPI/AccessControl/UserInfo/Modify?format=json",
                    Some(json!({ "UserInfo": request.parameters })),
                )
                .await?
            }
            commands::PERSON_REMOVE => {
                let employee_no = request.parameters["employee_id"].clone();
                self.exchange(
                    target,
                    reqwest::Method::PUT,
                    "/ISAPI/AccessControl/UserInfo/Delete?format=json",
                    Some(json!({
                        "UserInfoDelCond": {
                            "EmployeeNoList": [{ "employeeNo": employee_no }]
                        }
                    })),
                )
                .await?
            }
            commands::DOOR_UNLOCK => {
                let door = request.parameters["door"].as_u64().unwrap_or(1);
                self.exchange(
                    target,
                    reqwest::Method::PUT,
                    &format!("/ISAPI/AccessControl/RemoteControl/door/{}", door),
                    Some(json!({ "cmd": "open" })),
                )
                .await?
            }
            commands::DEVICE_REBOOT => {
                self.exchange(target, reqwest::Method::PUT, "/ISAPI/System/reboot", None)
                    .await?
            }
            other => {
                return Err(AdapterError::Unsupported(format!(
                    "command '{}' is not supported by the hikvision adapter",
                    other
                )));
            }
        };

        Ok(Self::outcome_from(payload))
    }

    async fn test_connection(&self, target: &AdapterTarget) -> bool {
        match self
            .exchange(
                target,
                reqwest::Method::GET,
                "/ISAPI/System/deviceInfo?format=json",
                None,
            )
            .await
        {
            Ok(_) => true,
            Err(e) => {
                debug!(device_id = %target.device_id, error = %e, "hikvision connection test failed");
                false
            }
        }
    }

    async fn device_info(&self, target: &AdapterTarget) -> AdapterResult<DeviceInfo> {
        let payload = self
            .exchange(
                target,
                reqwest::Method::GET,
                "/ISAPI/System/deviceInfo?format=json",
                None,
            )
            .await?;

        let info = &payload["DeviceInfo"];
        Ok(DeviceInfo {
            serial_number: info["serialNumber"].as_str().map(String::from),
            manufacturer: Some("Hikvision".to_string()),
            model: info["model"].as_str().map(String::from),
            firmware_version: info["firmwareVersion"].as_str().map(String::from),
            address: Some(target.host.clone()),
        })
    }

    async fn device_health(&self, target: &AdapterTarget) -> AdapterResult<DeviceHealth> {
        let payload = self
            .exchange(
                target,
                reqwest::Method::GET,
                "/ISAPI/System/status?format=json",
                None,
            )
            .await?;

        let status = &payload["DeviceStatus"];
        let uptime = status["deviceUpTime"].as_u64();
        let mut issues = Vec::new();
        if let Some(state) = status["currentDeviceStatus"].as_str() {
            if state != "normal" {
                issues.push(format!("device reports status '{}'", state));
            }
        }

        Ok(DeviceHealth {
            state: if issues.is_empty() {
                HealthState::Healthy
            } else {
                HealthState::Degraded
            },
            uptime_secs: uptime,
            issues,
        })
    }

    async fn get_configuration(&self, target: &AdapterTarget) -> AdapterResult<Value> {
        self.exchange(
            target,
            reqwest::Method::GET,
            "/ISAPI/AccessControl/AcsCfg?format=json",
            None,
        )
        .await
    }

    async fn update_configuration(
        &self,
        target: &AdapterTarget,
        configuration: &Value,
    ) -> AdapterResult<()> {
        self.exchange(
            target,
            reqwest::Method::PUT,
            "/ISAPI/AccessControl/AcsCfg?format=json",
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
            .exchange(
                target,
                reqwest::Method::GET,
                "/ISAPI/Event/notification/httpHosts?format=json",
                None,
            )
            .await?;

        let hosts = payload["HttpHostNotificationList"]["HttpHostNotification"]
            .as_array()
            .cloned()
            .unwrap_or_default();

        Ok(hosts
            .into_iter()
            .map(|host| EventHostSpec {
                host_id: host["id"]
                    .as_str()
                    .map(String::from)
                    .unwrap_or_else(|| host["id"].to_string()),
                url: host["url"].as_str().unwrap_or_default().to_string(),
                event_types: Vec::new(),
                protocol: host["protocolType"].as_str().unwrap_or("HTTP").to_string(),
                format: host["parameterFormatType"]
                    .as_str()
                    .unwrap_or("JSON")
                    .to_string(),
            })
            .collect())
    }

    async fn configure_event_host(
        &self,
        target: &AdapterTarget,
        spec: &EventHostSpec,
    ) -> AdapterResult<()> {
        self.exchange(
            target,
            reqwest::Method::PUT,
            "/ISAPI/Event/notification/httpHosts?format=json",
            Some(json!({
                "HttpHostNotificationList": {
                    "HttpHostNotification": [{
                        "id": spec.host_id,
                        "url": spec.url,
                        "protocolType": spec.protocol,
                        "parameterFormatType": spec.format,
                        "httpAuthenticationMethod": "none",
                    }]
                }
            })),
        )
        .await?;
        Ok(())
    }

    async fn delete_webhooks(&self, target: &AdapterTarget) -> AdapterResult<()> {
        self.exchange(
            target,
            reqwest::Method::DELETE,
            "/ISAPI/Event/notification/httpHosts?format=json",
            None,
        )
        .await?;
        Ok(())
    }

    fn supports_webhooks(&self) -> bool {
        true
    }

    async fn discover_devices(&self) -> AdapterResult<Vec<DeviceInfo>> {
        // SADP discovery rides on multicast, which this HTTP adapter
        // cannot reach
        Err(AdapterError::Unsupported(
            "hikvision discovery requires the SADP multicast transport".into(),
        ))
    }
}
