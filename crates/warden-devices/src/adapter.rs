//! Adapter capability interface.
//!
//! Every vendor integration implements [`DeviceAdapter`]; the rest of the
//! engine only ever talks to this trait. Adapters receive an
//! [`AdapterTarget`] with decrypted credentials built immediately before
//! the call, never a raw device record.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

use crate::model::Protocol;

/// Well-known command names issued by the engine.
///
/// Adapters translate these to vendor-specific exchanges; unknown names
/// yield [`AdapterError::Unsupported`].
pub mod commands {
    /// Provision a person (and their credentials) onto the device
    pub const PERSON_ADD: &str = "person.add";
    /// Update an already-provisioned person
    pub const PERSON_UPDATE: &str = "person.update";
    /// Remove a person from the device
    pub const PERSON_REMOVE: &str = "person.remove";
    /// Momentarily release a door
    pub const DOOR_UNLOCK: &str = "door.unlock";
    /// Reboot the device
    pub const DEVICE_REBOOT: &str = "device.reboot";
}

/// A command to execute against a device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandRequest {
    /// Command name (see [`commands`])
    pub command: String,
    /// Command parameters, shape depends on the command
    #[serde(default)]
    pub parameters: Value,
    /// Per-command timeout override; `None` uses the device/engine default
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl CommandRequest {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            parameters: Value::Null,
            timeout_secs: None,
        }
    }

    pub fn with_parameters(mut self, parameters: Value) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }
}

/// Result of a command execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandOutcome {
    pub success: bool,
    #[serde(default)]
    pub data: Option<Value>,
}

impl CommandOutcome {
    pub fn ok() -> Self {
        Self {
            success: true,
            data: None,
        }
    }

    pub fn ok_with(data: Value) -> Self {
        Self {
            success: true,
            data: Some(data),
        }
    }

    pub fn failed(data: Value) -> Self {
        Self {
            success: false,
            data: Some(data),
        }
    }
}

/// Connection coordinates handed to an adapter, credentials decrypted.
#[derive(Debug, Clone)]
pub struct AdapterTarget {
    pub device_id: String,
    pub host: String,
    pub port: u16,
    pub protocol: Protocol,
    pub username: String,
    /// Decrypted password; dropped with the target after the call
    pub password: Option<String>,
    /// Effective per-command timeout
    pub timeout: Duration,
}

impl AdapterTarget {
    /// Base URL for HTTP-style exchanges.
    pub fn base_url(&self) -> String {
        let scheme = if self.protocol == Protocol::Https {
            "https"
        } else {
            "http"
        };
        format!("{}://{}:{}", scheme, self.host, self.port)
    }
}

/// Basic identity a device reports about itself.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeviceInfo {
    #[serde(default)]
    pub serial_number: Option<String>,
    #[serde(default)]
    pub manufacturer: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub firmware_version: Option<String>,
    /// Address the device was discovered at, when applicable
    #[serde(default)]
    pub address: Option<String>,
}

/// Health state of a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    Healthy,
    Degraded,
    Unreachable,
}

/// Health snapshot returned by an adapter probe.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceHealth {
    pub state: HealthState,
    #[serde(default)]
    pub uptime_secs: Option<u64>,
    #[serde(default)]
    pub issues: Vec<String>,
}

impl DeviceHealth {
    pub fn unreachable(issue: impl Into<String>) -> Self {
        Self {
            state: HealthState::Unreachable,
            uptime_secs: None,
            issues: vec![issue.into()],
        }
    }
}

/// A remote event host as configured on the device itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventHostSpec {
    pub host_id: String,
    pub url: String,
    #[serde(default)]
    pub event_types: Vec<String>,
    #[serde(default)]
    pub protocol: String,
    #[serde(default)]
    pub format: String,
}

/// Adapter error types.
#[derive(Debug, Error)]
pub enum AdapterError {
    /// Device unreachable at the network level
    #[error("Connection error: {0}")]
    Connection(String),

    /// Command exceeded its timeout
    #[error("Operation timed out after {0}ms")]
    Timeout(u64),

    /// Device responded but the exchange failed
    #[error("Communication error: {0}")]
    Communication(String),

    /// Adapter or device configuration problem
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Capability or command not supported by this vendor
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// Response could not be parsed
    #[error("Protocol error: {0}")]
    Protocol(String),
}

impl AdapterError {
    /// Whether this is a connectivity (not business) failure.
    pub fn is_connectivity(&self) -> bool {
        matches!(self, Self::Connection(_) | Self::Timeout(_))
    }

    /// Map a reqwest error, distinguishing timeouts from other failures.
    pub fn from_reqwest(e: reqwest::Error, timeout: Duration) -> Self {
        if e.is_timeout() {
            Self::Timeout(timeout.as_millis() as u64)
        } else if e.is_connect() {
            Self::Connection(e.to_string())
        } else {
            Self::Communication(e.to_string())
        }
    }
}

impl From<AdapterError> for warden_core::Error {
    fn from(e: AdapterError) -> Self {
        match e {
            AdapterError::Connection(_) | AdapterError::Timeout(_) => {
                warden_core::Error::Connectivity(e.to_string())
            }
            other => warden_core::Error::Adapter(other.to_string()),
        }
    }
}

/// Result type for adapter operations.
pub type AdapterResult<T> = std::result::Result<T, AdapterError>;

/// Capability contract every vendor integration satisfies.
///
/// Connectivity failures surface as errors from every method except
/// `test_connection`, which folds them into `false`.
#[async_trait]
pub trait DeviceAdapter: Send + Sync {
    /// Stable vendor name ("hikvision", "zkteco", "dahua", "stub")
    fn vendor(&self) -> &'static str;

    /// Execute a command against the device.
    async fn send_command(
        &self,
        target: &AdapterTarget,
        request: &CommandRequest,
    ) -> AdapterResult<CommandOutcome>;

    /// Probe reachability. Never errors; connectivity failure is `false`.
    async fn test_connection(&self, target: &AdapterTarget) -> bool;

    /// Fetch the device's self-reported identity.
    async fn device_info(&self, target: &AdapterTarget) -> AdapterResult<DeviceInfo>;

    /// Fetch a health snapshot.
    async fn device_health(&self, target: &AdapterTarget) -> AdapterResult<DeviceHealth>;

    /// Read the device's on-board configuration.
    async fn get_configuration(&self, target: &AdapterTarget) -> AdapterResult<Value>;

    /// Write configuration to the device.
    async fn update_configuration(
        &self,
        target: &AdapterTarget,
        configuration: &Value,
    ) -> AdapterResult<()>;

    /// List event hosts currently configured on the device.
    async fn webhook_configurations(
        &self,
        target: &AdapterTarget,
    ) -> AdapterResult<Vec<EventHostSpec>>;

    /// Configure an event host the device should push events to.
    async fn configure_event_host(
        &self,
        target: &AdapterTarget,
        spec: &EventHostSpec,
    ) -> AdapterResult<()>;

    /// Clear event host configuration from the device.
    async fn delete_webhooks(&self, target: &AdapterTarget) -> AdapterResult<()>;

    /// Whether this vendor supports device-initiated event push.
    fn supports_webhooks(&self) -> bool;

    /// Scan for devices of this vendor on the local network.
    async fn discover_devices(&self) -> AdapterResult<Vec<DeviceInfo>>;
}
