//! Device registry: persisted device records, configurations, templates
//! and webhook registrations.
//!
//! In-memory maps front an optional redb store; mutations write through.
//! Credentials are encrypted before anything touches storage and only
//! decrypted when building an adapter target.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::RwLock;
use tracing::{info, warn};

use warden_core::{CryptoService, Error, Result};
use warden_storage::FleetStore;

use crate::adapter::AdapterTarget;
use crate::model::{
    ConfigurationValues, Device, DeviceConfiguration, DeviceSpec, DeviceStatus, DeviceTemplate,
    DeviceUpdate, DeviceWebhook, TemplateSpec, new_device_id, new_host_id, new_template_id,
};

/// Default per-command timeout when neither the request nor the device
/// configuration overrides it.
const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 10;

/// Unified device registry with optional persistence.
pub struct DeviceRegistry {
    /// Device records indexed by device_id
    devices: Arc<RwLock<HashMap<String, Device>>>,
    /// Per-device configuration indexed by device_id (1:1 invariant)
    configurations: Arc<RwLock<HashMap<String, DeviceConfiguration>>>,
    /// Templates indexed by template_id
    templates: Arc<RwLock<HashMap<String, DeviceTemplate>>>,
    /// Webhook registrations indexed by (device_id, host_id)
    webhooks: Arc<RwLock<HashMap<(String, String), DeviceWebhook>>>,
    /// Optional persistent storage backend
    store: Option<Arc<FleetStore>>,
    /// Credential encryption
    crypto: CryptoService,
}

impl DeviceRegistry {
    /// Create a new in-memory registry (no persistence).
    pub fn new(crypto: CryptoService) -> Self {
        Self {
            devices: Arc::new(RwLock::new(HashMap::new())),
            configurations: Arc::new(RwLock::new(HashMap::new())),
            templates: Arc::new(RwLock::new(HashMap::new())),
            webhooks: Arc::new(RwLock::new(HashMap::new())),
            store: None,
            crypto,
        }
    }

    /// Create a registry with disk persistence, loading existing records.
    pub async fn with_persistence<P: AsRef<Path>>(
        path: P,
        crypto: CryptoService,
    ) -> Result<Self> {
        let store = FleetStore::open(path).map_err(warden_core::Error::from)?;
        Self::with_store(store, crypto).await
    }

    /// Create a registry over an already-open store.
    pub async fn with_store(store: Arc<FleetStore>, crypto: CryptoService) -> Result<Self> {
        let registry = Self {
            devices: Arc::new(RwLock::new(HashMap::new())),
            configurations: Arc::new(RwLock::new(HashMap::new())),
            templates: Arc::new(RwLock::new(HashMap::new())),
            webhooks: Arc::new(RwLock::new(HashMap::new())),
            store: Some(store),
            crypto,
        };
        registry.load_from_storage().await?;
        Ok(registry)
    }

    /// Load all records from storage into memory.
    async fn load_from_storage(&self) -> Result<()> {
        let Some(store) = &self.store else {
            return Ok(());
        };

        let records = store.list_devices().map_err(Error::from)?;
        let mut device_count = 0;
        {
            let mut devices = self.devices.write().await;
            for record in records {
                let device = Device::from_record(record);
                devices.insert(device.device_id.clone(), device);
                device_count += 1;
            }
        }

        {
            let mut configurations = self.configurations.write().await;
            let mut webhooks = self.webhooks.write().await;
            let devices = self.devices.read().await;
            for device_id in devices.keys() {
                if let Some(record) = store.load_configuration(device_id).map_err(Error::from)? {
                    configurations
                        .insert(device_id.clone(), DeviceConfiguration::from_record(record));
                }
                for record in store.list_webhooks(device_id).map_err(Error::from)? {
                    let webhook = DeviceWebhook::from_record(record);
                    webhooks.insert(
                        (webhook.device_id.clone(), webhook.host_id.clone()),
                        webhook,
                    );
                }
            }
        }

        let mut template_count = 0;
        {
            let mut templates = self.templates.write().await;
            for record in store.list_templates().map_err(Error::from)? {
                let template = DeviceTemplate::from_record(record);
                templates.insert(template.template_id.clone(), template);
                template_count += 1;
            }
        }

        info!(
            devices = device_count,
            templates = template_count,
            "loaded fleet registry from storage"
        );
        Ok(())
    }

    // ========== Device Management ==========

    /// Register a new device. The plaintext password in the spec is
    /// encrypted before the record exists anywhere.
    pub async fn register_device(&self, spec: DeviceSpec) -> Result<Device> {
        spec.validate()?;

        let encrypted_password = match &spec.password {
            Some(password) => Some(self.crypto.encrypt_str(password)?),
            None => None,
        };

        let device = Device {
            device_id: new_device_id(),
            organization_id: spec.organization_id,
            name: spec.name,
            host: spec.host,
            port: spec.port,
            protocol: spec.protocol,
            username: spec.username,
            encrypted_password,
            manufacturer: spec.manufacturer,
            model: spec.model,
            kind: spec.kind,
            status: DeviceStatus::Unknown,
            last_seen: None,
            is_active: true,
            created_at: Utc::now().timestamp(),
        };

        // Save to storage first so a storage failure leaves memory untouched
        if let Some(store) = &self.store {
            store.save_device(&device.to_record()).map_err(Error::from)?;
        }

        let mut devices = self.devices.write().await;
        devices.insert(device.device_id.clone(), device.clone());

        info!(device_id = %device.device_id, manufacturer = %device.manufacturer, "device registered");
        Ok(device)
    }

    /// Get a device by id.
    pub async fn get_device(&self, device_id: &str) -> Option<Device> {
        let devices = self.devices.read().await;
        devices.get(device_id).cloned()
    }

    /// Get a device by id, or a NotFound error.
    pub async fn require_device(&self, device_id: &str) -> Result<Device> {
        self.get_device(device_id)
            .await
            .ok_or_else(|| Error::NotFound(format!("device '{}'", device_id)))
    }

    /// List all devices.
    pub async fn list_devices(&self) -> Vec<Device> {
        let devices = self.devices.read().await;
        devices.values().cloned().collect()
    }

    /// List devices for one organization.
    pub async fn list_devices_by_organization(&self, organization_id: &str) -> Vec<Device> {
        let devices = self.devices.read().await;
        devices
            .values()
            .filter(|d| d.organization_id == organization_id)
            .cloned()
            .collect()
    }

    /// Find an active device whose host matches the given address.
    ///
    /// Used by webhook correlation when a payload carries no identifier
    /// and the source IP is all we have.
    pub async fn find_device_by_host(&self, host: &str) -> Option<Device> {
        let devices = self.devices.read().await;
        devices.values().find(|d| d.host == host).cloned()
    }

    /// Apply a partial update to a device. A new password is re-encrypted.
    pub async fn update_device(&self, device_id: &str, update: DeviceUpdate) -> Result<Device> {
        let mut device = self.require_device(device_id).await?;

        if let Some(name) = update.name {
            if name.is_empty() {
                return Err(Error::Validation("device name cannot be empty".into()));
            }
            device.name = name;
        }
        if let Some(host) = update.host {
            if host.is_empty() {
                return Err(Error::Validation("device host cannot be empty".into()));
            }
            device.host = host;
        }
        if let Some(port) = update.port {
            if port == 0 {
                return Err(Error::Validation("device port cannot be 0".into()));
            }
            device.port = port;
        }
        if let Some(protocol) = update.protocol {
            device.protocol = protocol;
        }
        if let Some(username) = update.username {
            device.username = username;
        }
        if let Some(password) = update.password {
            device.encrypted_password = Some(self.crypto.encrypt_str(&password)?);
        }
        if let Some(manufacturer) = update.manufacturer {
            device.manufacturer = manufacturer;
        }
        if let Some(model) = update.model {
            device.model = model;
        }
        if let Some(kind) = update.kind {
            device.kind = kind;
        }
        if let Some(is_active) = update.is_active {
            device.is_active = is_active;
        }

        if let Some(store) = &self.store {
            store.save_device(&device.to_record()).map_err(Error::from)?;
        }

        let mut devices = self.devices.write().await;
        devices.insert(device.device_id.clone(), device.clone());
        Ok(device)
    }

    /// Delete a device, cascading its configuration, ledger rows and
    /// webhook registrations.
    pub async fn delete_device(&self, device_id: &str) -> Result<()> {
        {
            let devices = self.devices.read().await;
            if !devices.contains_key(device_id) {
                return Err(Error::NotFound(format!("device '{}'", device_id)));
            }
        }

        if let Some(store) = &self.store {
            store.delete_device(device_id).map_err(Error::from)?;
        }

        {
            let mut devices = self.devices.write().await;
            devices.remove(device_id);
        }
        {
            let mut configurations = self.configurations.write().await;
            configurations.remove(device_id);
        }
        {
            let mut webhooks = self.webhooks.write().await;
            webhooks.retain(|(webhook_device, _), _| webhook_device != device_id);
        }

        info!(device_id = %device_id, "device deleted");
        Ok(())
    }

    /// Update a device's health status and last-seen timestamp.
    pub async fn set_device_status(&self, device_id: &str, status: DeviceStatus) -> Result<()> {
        let mut device = self.require_device(device_id).await?;
        device.status = status;
        if status.is_online() {
            device.last_seen = Some(Utc::now().timestamp());
        }

        // Status updates are frequent and advisory; log instead of
        // failing the probe when storage write-through misses
        if let Some(store) = &self.store {
            if let Err(e) = store.save_device(&device.to_record()) {
                warn!(device_id = %device_id, error = %e, "failed to persist device status");
            }
        }

        let mut devices = self.devices.write().await;
        devices.insert(device.device_id.clone(), device);
        Ok(())
    }

    /// Build an adapter target for a device, decrypting its credentials.
    ///
    /// This is the single decrypt point; the plaintext lives only inside
    /// the returned target.
    pub async fn connection_target(&self, device: &Device) -> Result<AdapterTarget> {
        let password = match &device.encrypted_password {
            Some(encrypted) => Some(self.crypto.decrypt_str(encrypted)?),
            None => None,
        };

        let timeout_secs = self
            .get_configuration(&device.device_id)
            .await
            .and_then(|c| c.values.command_timeout_secs)
            .unwrap_or(DEFAULT_COMMAND_TIMEOUT_SECS);

        Ok(AdapterTarget {
            device_id: device.device_id.clone(),
            host: device.host.clone(),
            port: device.port,
            protocol: device.protocol,
            username: device.username.clone(),
            password,
            timeout: Duration::from_secs(timeout_secs),
        })
    }

    // ========== Configuration Management ==========

    /// Create or update the configuration for a device (1:1 invariant:
    /// the device id is the key, so a second write replaces the first).
    pub async fn upsert_configuration(
        &self,
        device_id: &str,
        values: ConfigurationValues,
    ) -> Result<DeviceConfiguration> {
        self.require_device(device_id).await?;

        let configuration = DeviceConfiguration::new(device_id, values);

        if let Some(store) = &self.store {
            store
                .save_configuration(&configuration.to_record())
                .map_err(Error::from)?;
        }

        let mut configurations = self.configurations.write().await;
        configurations.insert(device_id.to_string(), configuration.clone());
        Ok(configuration)
    }

    /// Get the configuration for a device.
    pub async fn get_configuration(&self, device_id: &str) -> Option<DeviceConfiguration> {
        let configurations = self.configurations.read().await;
        configurations.get(device_id).cloned()
    }

    // ========== Template Management ==========

    /// Create a template. Name uniqueness is enforced per organization.
    pub async fn create_template(&self, spec: TemplateSpec) -> Result<DeviceTemplate> {
        if spec.name.is_empty() {
            return Err(Error::Validation("template name cannot be empty".into()));
        }

        {
            let templates = self.templates.read().await;
            let duplicate = templates.values().any(|t| {
                t.organization_id == spec.organization_id && t.name == spec.name
            });
            if duplicate {
                return Err(Error::Conflict(format!(
                    "template '{}' already exists in organization '{}'",
                    spec.name, spec.organization_id
                )));
            }
        }

        let template = DeviceTemplate {
            template_id: new_template_id(),
            organization_id: spec.organization_id,
            name: spec.name,
            manufacturer: spec.manufacturer,
            model: spec.model,
            priority: spec.priority,
            defaults: spec.defaults,
            created_at: Utc::now().timestamp(),
        };

        if let Some(store) = &self.store {
            store
                .save_template(&template.to_record())
                .map_err(Error::from)?;
        }

        let mut templates = self.templates.write().await;
        templates.insert(template.template_id.clone(), template.clone());
        Ok(template)
    }

    /// Get a template by id.
    pub async fn get_template(&self, template_id: &str) -> Option<DeviceTemplate> {
        let templates = self.templates.read().await;
        templates.get(template_id).cloned()
    }

    /// List templates for an organization.
    pub async fn list_templates(&self, organization_id: &str) -> Vec<DeviceTemplate> {
        let templates = self.templates.read().await;
        templates
            .values()
            .filter(|t| t.organization_id == organization_id)
            .cloned()
            .collect()
    }

    /// Delete a template.
    pub async fn delete_template(&self, template_id: &str) -> Result<()> {
        {
            let templates = self.templates.read().await;
            if !templates.contains_key(template_id) {
                return Err(Error::NotFound(format!("template '{}'", template_id)));
            }
        }

        if let Some(store) = &self.store {
            store.delete_template(template_id).map_err(Error::from)?;
        }

        let mut templates = self.templates.write().await;
        templates.remove(template_id);
        Ok(())
    }

    // ========== Webhook Registrations ==========

    /// Record a new webhook registration for a device.
    ///
    /// `host_id` is the registration identifier pushed to the device; pass
    /// `None` to have one generated.
    pub async fn create_webhook(
        &self,
        device_id: &str,
        host_id: Option<String>,
        url: String,
        event_types: Vec<String>,
        protocol: String,
        format: String,
    ) -> Result<DeviceWebhook> {
        self.require_device(device_id).await?;

        let webhook = DeviceWebhook {
            device_id: device_id.to_string(),
            host_id: host_id.unwrap_or_else(new_host_id),
            url,
            event_types,
            protocol,
            format,
            is_active: true,
            trigger_count: 0,
            last_triggered: None,
            last_error: None,
            created_at: Utc::now().timestamp(),
        };

        if let Some(store) = &self.store {
            store
                .save_webhook(&webhook.to_record())
                .map_err(Error::from)?;
        }

        let mut webhooks = self.webhooks.write().await;
        webhooks.insert(
            (webhook.device_id.clone(), webhook.host_id.clone()),
            webhook.clone(),
        );
        Ok(webhook)
    }

    /// List webhook registrations for a device.
    pub async fn list_webhooks(&self, device_id: &str) -> Vec<DeviceWebhook> {
        let webhooks = self.webhooks.read().await;
        webhooks
            .values()
            .filter(|w| w.device_id == device_id)
            .cloned()
            .collect()
    }

    /// Find a webhook registration by host id alone.
    pub async fn find_webhook_by_host_id(&self, host_id: &str) -> Option<DeviceWebhook> {
        let webhooks = self.webhooks.read().await;
        webhooks.values().find(|w| w.host_id == host_id).cloned()
    }

    /// Deactivate a webhook registration, preserving its delivery history.
    pub async fn deactivate_webhook(&self, device_id: &str, host_id: &str) -> Result<()> {
        let mut webhooks = self.webhooks.write().await;
        let webhook = webhooks
            .get_mut(&(device_id.to_string(), host_id.to_string()))
            .ok_or_else(|| {
                Error::NotFound(format!("webhook '{}' on device '{}'", host_id, device_id))
            })?;
        webhook.is_active = false;

        if let Some(store) = &self.store {
            store
                .save_webhook(&webhook.to_record())
                .map_err(Error::from)?;
        }
        Ok(())
    }

    /// Update delivery statistics for a webhook registration.
    ///
    /// `error` of `None` records a successful delivery.
    pub async fn record_webhook_trigger(&self, host_id: &str, error: Option<String>) {
        let mut webhooks = self.webhooks.write().await;
        let Some(webhook) = webhooks.values_mut().find(|w| w.host_id == host_id) else {
            return;
        };

        webhook.trigger_count += 1;
        webhook.last_triggered = Some(Utc::now().timestamp());
        if let Some(error) = error {
            webhook.last_error = Some(error);
        }

        // Delivery counters are best-effort bookkeeping
        if let Some(store) = &self.store {
            if let Err(e) = store.save_webhook(&webhook.to_record()) {
                warn!(host_id = %host_id, error = %e, "failed to persist webhook statistics");
            }
        }
    }
}
