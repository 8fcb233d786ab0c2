//! Device domain model.
//!
//! Devices are heterogeneous physical access-control endpoints (card
//! readers, face-recognition terminals, door controllers) identified by a
//! registry id and scoped to an organization. Connection credentials are
//! stored encrypted and only decrypted when an adapter needs them.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use warden_core::{Error, Result};
use warden_storage::{ConfigurationDefaults, ConfigurationRecord, DeviceRecord, TemplateRecord, WebhookRecord};

/// Transport protocol a device speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    #[default]
    Http,
    Https,
    Tcp,
    Udp,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Https => "https",
            Self::Tcp => "tcp",
            Self::Udp => "udp",
        }
    }

    /// Parse a stored protocol string, defaulting unknowns to HTTP.
    pub fn parse(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "https" => Self::Https,
            "tcp" => Self::Tcp,
            "udp" => Self::Udp,
            _ => Self::Http,
        }
    }

    /// Whether this protocol rides on HTTP semantics.
    pub fn is_http(&self) -> bool {
        matches!(self, Self::Http | Self::Https)
    }
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Device classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DeviceKind {
    CardReader,
    FaceTerminal,
    DoorController,
    #[default]
    Other,
}

impl DeviceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CardReader => "card_reader",
            Self::FaceTerminal => "face_terminal",
            Self::DoorController => "door_controller",
            Self::Other => "other",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "card_reader" => Self::CardReader,
            "face_terminal" => Self::FaceTerminal,
            "door_controller" => Self::DoorController,
            _ => Self::Other,
        }
    }
}

/// Device health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DeviceStatus {
    Online,
    Offline,
    #[default]
    Unknown,
}

impl DeviceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Online => "online",
            Self::Offline => "offline",
            Self::Unknown => "unknown",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "online" => Self::Online,
            "offline" => Self::Offline,
            _ => Self::Unknown,
        }
    }

    pub fn is_online(&self) -> bool {
        matches!(self, Self::Online)
    }
}

/// A registered access-control device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    /// Unique device identifier
    pub device_id: String,
    /// Organization this device belongs to
    pub organization_id: String,
    /// Human-readable name
    pub name: String,
    /// Network host (IP or DNS name)
    pub host: String,
    /// Network port
    pub port: u16,
    /// Transport protocol
    pub protocol: Protocol,
    /// Login username for the device's management interface
    #[serde(default)]
    pub username: String,
    /// Encrypted password; decrypted only when building an adapter target
    #[serde(skip_serializing, default)]
    pub encrypted_password: Option<String>,
    /// Manufacturer string as reported/configured ("Hikvision", "ZKTeco", ...)
    #[serde(default)]
    pub manufacturer: String,
    /// Model string
    #[serde(default)]
    pub model: String,
    /// Device classification
    #[serde(default)]
    pub kind: DeviceKind,
    /// Current health status
    #[serde(default)]
    pub status: DeviceStatus,
    /// Unix timestamp of the last successful contact
    #[serde(default)]
    pub last_seen: Option<i64>,
    /// Gates all command execution; inactive devices reject commands
    pub is_active: bool,
    /// Unix timestamp of registration
    pub created_at: i64,
}

impl Device {
    pub(crate) fn to_record(&self) -> DeviceRecord {
        DeviceRecord {
            device_id: self.device_id.clone(),
            organization_id: self.organization_id.clone(),
            name: self.name.clone(),
            host: self.host.clone(),
            port: self.port,
            protocol: self.protocol.as_str().to_string(),
            username: self.username.clone(),
            encrypted_password: self.encrypted_password.clone(),
            manufacturer: self.manufacturer.clone(),
            model: self.model.clone(),
            kind: self.kind.as_str().to_string(),
            status: self.status.as_str().to_string(),
            last_seen: self.last_seen,
            is_active: self.is_active,
            created_at: self.created_at,
        }
    }

    pub(crate) fn from_record(record: DeviceRecord) -> Self {
        Self {
            device_id: record.device_id,
            organization_id: record.organization_id,
            name: record.name,
            host: record.host,
            port: record.port,
            protocol: Protocol::parse(&record.protocol),
            username: record.username,
            encrypted_password: record.encrypted_password,
            manufacturer: record.manufacturer,
            model: record.model,
            kind: DeviceKind::parse(&record.kind),
            status: DeviceStatus::parse(&record.status),
            last_seen: record.last_seen,
            is_active: record.is_active,
            created_at: record.created_at,
        }
    }
}

/// Input for device registration. Carries the plaintext password exactly
/// once; the registry encrypts it before anything is persisted.
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceSpec {
    pub organization_id: String,
    pub name: String,
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub protocol: Protocol,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub manufacturer: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub kind: DeviceKind,
}

impl DeviceSpec {
    pub(crate) fn validate(&self) -> Result<()> {
        if self.organization_id.is_empty() {
            return Err(Error::Validation("organization_id cannot be empty".into()));
        }
        if self.name.is_empty() {
            return Err(Error::Validation("device name cannot be empty".into()));
        }
        if self.host.is_empty() {
            return Err(Error::Validation("device host cannot be empty".into()));
        }
        if self.port == 0 {
            return Err(Error::Validation("device port cannot be 0".into()));
        }
        Ok(())
    }
}

/// Partial update for a registered device. `None` fields are left as-is.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DeviceUpdate {
    pub name: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub protocol: Option<Protocol>,
    pub username: Option<String>,
    /// Plaintext; re-encrypted on write
    pub password: Option<String>,
    pub manufacturer: Option<String>,
    pub model: Option<String>,
    pub kind: Option<DeviceKind>,
    pub is_active: Option<bool>,
}

/// Configuration values shared between device configurations and templates.
///
/// Every field is optional so template application can fill only the gaps a
/// device has not explicitly overridden.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigurationValues {
    pub timezone: Option<String>,
    pub offline_mode: Option<bool>,
    pub event_buffer_size: Option<u32>,
    pub heartbeat_interval_secs: Option<u32>,
    pub door_open_timeout_secs: Option<u32>,
    pub command_timeout_secs: Option<u64>,
    pub retry_attempts: Option<u32>,
}

impl ConfigurationValues {
    /// Fill every unset field from the given defaults. Set fields are
    /// device-specific overrides and are never replaced.
    pub fn fill_missing_from(&mut self, defaults: &ConfigurationValues) {
        if self.timezone.is_none() {
            self.timezone = defaults.timezone.clone();
        }
        if self.offline_mode.is_none() {
            self.offline_mode = defaults.offline_mode;
        }
        if self.event_buffer_size.is_none() {
            self.event_buffer_size = defaults.event_buffer_size;
        }
        if self.heartbeat_interval_secs.is_none() {
            self.heartbeat_interval_secs = defaults.heartbeat_interval_secs;
        }
        if self.door_open_timeout_secs.is_none() {
            self.door_open_timeout_secs = defaults.door_open_timeout_secs;
        }
        if self.command_timeout_secs.is_none() {
            self.command_timeout_secs = defaults.command_timeout_secs;
        }
        if self.retry_attempts.is_none() {
            self.retry_attempts = defaults.retry_attempts;
        }
    }

    pub(crate) fn to_defaults(&self) -> ConfigurationDefaults {
        ConfigurationDefaults {
            timezone: self.timezone.clone(),
            offline_mode: self.offline_mode,
            event_buffer_size: self.event_buffer_size,
            heartbeat_interval_secs: self.heartbeat_interval_secs,
            door_open_timeout_secs: self.door_open_timeout_secs,
            command_timeout_secs: self.command_timeout_secs,
            retry_attempts: self.retry_attempts,
        }
    }

    pub(crate) fn from_defaults(defaults: ConfigurationDefaults) -> Self {
        Self {
            timezone: defaults.timezone,
            offline_mode: defaults.offline_mode,
            event_buffer_size: defaults.event_buffer_size,
            heartbeat_interval_secs: defaults.heartbeat_interval_secs,
            door_open_timeout_secs: defaults.door_open_timeout_secs,
            command_timeout_secs: defaults.command_timeout_secs,
            retry_attempts: defaults.retry_attempts,
        }
    }
}

/// Per-device configuration, one-to-one with a device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfiguration {
    pub device_id: String,
    #[serde(flatten)]
    pub values: ConfigurationValues,
    pub updated_at: i64,
}

impl DeviceConfiguration {
    pub fn new(device_id: impl Into<String>, values: ConfigurationValues) -> Self {
        Self {
            device_id: device_id.into(),
            values,
            updated_at: Utc::now().timestamp(),
        }
    }

    pub(crate) fn to_record(&self) -> ConfigurationRecord {
        ConfigurationRecord {
            device_id: self.device_id.clone(),
            timezone: self.values.timezone.clone(),
            offline_mode: self.values.offline_mode,
            event_buffer_size: self.values.event_buffer_size,
            heartbeat_interval_secs: self.values.heartbeat_interval_secs,
            door_open_timeout_secs: self.values.door_open_timeout_secs,
            command_timeout_secs: self.values.command_timeout_secs,
            retry_attempts: self.values.retry_attempts,
            updated_at: self.updated_at,
        }
    }

    pub(crate) fn from_record(record: ConfigurationRecord) -> Self {
        Self {
            device_id: record.device_id,
            values: ConfigurationValues {
                timezone: record.timezone,
                offline_mode: record.offline_mode,
                event_buffer_size: record.event_buffer_size,
                heartbeat_interval_secs: record.heartbeat_interval_secs,
                door_open_timeout_secs: record.door_open_timeout_secs,
                command_timeout_secs: record.command_timeout_secs,
                retry_attempts: record.retry_attempts,
            },
            updated_at: record.updated_at,
        }
    }
}

/// Manufacturer+model scoped bundle of default configuration values.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceTemplate {
    pub template_id: String,
    pub organization_id: String,
    /// Unique per organization
    pub name: String,
    pub manufacturer: String,
    pub model: String,
    /// Tie-break for auto-application; higher wins
    pub priority: i32,
    pub defaults: ConfigurationValues,
    pub created_at: i64,
}

impl DeviceTemplate {
    /// Whether this template targets the given device's hardware.
    pub fn matches(&self, device: &Device) -> bool {
        self.manufacturer.eq_ignore_ascii_case(&device.manufacturer)
            && self.model.eq_ignore_ascii_case(&device.model)
    }

    pub(crate) fn to_record(&self) -> TemplateRecord {
        TemplateRecord {
            template_id: self.template_id.clone(),
            organization_id: self.organization_id.clone(),
            name: self.name.clone(),
            manufacturer: self.manufacturer.clone(),
            model: self.model.clone(),
            priority: self.priority,
            defaults: self.defaults.to_defaults(),
            created_at: self.created_at,
        }
    }

    pub(crate) fn from_record(record: TemplateRecord) -> Self {
        Self {
            template_id: record.template_id,
            organization_id: record.organization_id,
            name: record.name,
            manufacturer: record.manufacturer,
            model: record.model,
            priority: record.priority,
            defaults: ConfigurationValues::from_defaults(record.defaults),
            created_at: record.created_at,
        }
    }
}

/// Input for template creation.
#[derive(Debug, Clone, Deserialize)]
pub struct TemplateSpec {
    pub organization_id: String,
    pub name: String,
    pub manufacturer: String,
    pub model: String,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub defaults: ConfigurationValues,
}

/// A webhook registration: a remote host a device pushes events to.
///
/// Deactivated rather than deleted on removal so delivery history stays
/// auditable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceWebhook {
    pub device_id: String,
    /// Registration identifier the device echoes back in payloads
    pub host_id: String,
    pub url: String,
    /// Event types the device should push; empty means all
    pub event_types: Vec<String>,
    pub protocol: String,
    pub format: String,
    pub is_active: bool,
    pub trigger_count: u64,
    pub last_triggered: Option<i64>,
    pub last_error: Option<String>,
    pub created_at: i64,
}

impl DeviceWebhook {
    pub(crate) fn to_record(&self) -> WebhookRecord {
        WebhookRecord {
            device_id: self.device_id.clone(),
            host_id: self.host_id.clone(),
            url: self.url.clone(),
            event_types: self.event_types.clone(),
            protocol: self.protocol.clone(),
            format: self.format.clone(),
            is_active: self.is_active,
            trigger_count: self.trigger_count,
            last_triggered: self.last_triggered,
            last_error: self.last_error.clone(),
            created_at: self.created_at,
        }
    }

    pub(crate) fn from_record(record: WebhookRecord) -> Self {
        Self {
            device_id: record.device_id,
            host_id: record.host_id,
            url: record.url,
            event_types: record.event_types,
            protocol: record.protocol,
            format: record.format,
            is_active: record.is_active,
            trigger_count: record.trigger_count,
            last_triggered: record.last_triggered,
            last_error: record.last_error,
            created_at: record.created_at,
        }
    }
}

/// Desired webhook registration, as supplied by the caller.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookSpec {
    pub url: String,
    #[serde(default)]
    pub event_types: Vec<String>,
    #[serde(default = "default_webhook_protocol")]
    pub protocol: String,
    #[serde(default = "default_webhook_format")]
    pub format: String,
}

fn default_webhook_protocol() -> String {
    "HTTP".to_string()
}

fn default_webhook_format() -> String {
    "JSON".to_string()
}

/// Generate a new device id.
pub(crate) fn new_device_id() -> String {
    format!("dev-{}", Uuid::new_v4())
}

/// Generate a new template id.
pub(crate) fn new_template_id() -> String {
    format!("tpl-{}", Uuid::new_v4())
}

/// Generate a new webhook host id.
pub(crate) fn new_host_id() -> String {
    format!("host-{}", Uuid::new_v4())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_parse_defaults_to_http() {
        assert_eq!(Protocol::parse("HTTPS"), Protocol::Https);
        assert_eq!(Protocol::parse("garbage"), Protocol::Http);
    }

    #[test]
    fn test_spec_validation() {
        let spec = DeviceSpec {
            organization_id: "org-1".to_string(),
            name: "Lobby Reader".to_string(),
            host: "10.0.0.5".to_string(),
            port: 80,
            protocol: Protocol::Http,
            username: String::new(),
            password: None,
            manufacturer: String::new(),
            model: String::new(),
            kind: DeviceKind::CardReader,
        };
        assert!(spec.validate().is_ok());

        let mut bad = spec.clone();
        bad.port = 0;
        assert!(bad.validate().is_err());

        let mut bad = spec;
        bad.host = String::new();
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_fill_missing_preserves_overrides() {
        let mut values = ConfigurationValues {
            timezone: Some("Europe/Zurich".to_string()),
            ..Default::default()
        };
        let defaults = ConfigurationValues {
            timezone: Some("UTC".to_string()),
            offline_mode: Some(true),
            event_buffer_size: Some(500),
            ..Default::default()
        };

        values.fill_missing_from(&defaults);

        assert_eq!(values.timezone.as_deref(), Some("Europe/Zurich"));
        assert_eq!(values.offline_mode, Some(true));
        assert_eq!(values.event_buffer_size, Some(500));
    }

    #[test]
    fn test_template_matches_case_insensitive() {
        let template = DeviceTemplate {
            template_id: "tpl-1".to_string(),
            organization_id: "org-1".to_string(),
            name: "hik defaults".to_string(),
            manufacturer: "Hikvision".to_string(),
            model: "DS-K1T341AM".to_string(),
            priority: 0,
            defaults: ConfigurationValues::default(),
            created_at: 0,
        };
        let mut device = Device::from_record(warden_storage::DeviceRecord {
            device_id: "dev-1".to_string(),
            organization_id: "org-1".to_string(),
            name: "d".to_string(),
            host: "h".to_string(),
            port: 80,
            protocol: "http".to_string(),
            username: String::new(),
            encrypted_password: None,
            manufacturer: "HIKVISION".to_string(),
            model: "ds-k1t341am".to_string(),
            kind: "face_terminal".to_string(),
            status: "unknown".to_string(),
            last_seen: None,
            is_active: true,
            created_at: 0,
        });
        assert!(template.matches(&device));

        device.model = "other".to_string();
        assert!(!template.matches(&device));
    }
}
