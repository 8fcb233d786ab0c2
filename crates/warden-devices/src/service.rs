//! Device service: the command/query surface over the registry and the
//! vendor adapters.
//!
//! Adapter resolution happens here on every call, through the pure
//! classification function, so the same device always lands on the same
//! adapter. Adapter errors propagate unchanged; callers can tell
//! connectivity failures from business failures.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde_json::Value;
use tracing::{debug, info, warn};

use warden_core::{Error, EventBus, FleetEvent, Result};

use crate::adapter::{
    CommandOutcome, CommandRequest, DeviceHealth, DeviceInfo, EventHostSpec, HealthState,
};
use crate::adapters::{AdapterKind, AdapterRegistry};
use crate::model::{
    DeviceConfiguration, DeviceStatus, DeviceTemplate, DeviceWebhook, WebhookSpec, new_host_id,
};
use crate::registry::DeviceRegistry;

/// Outcome of automatic template application.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TemplateMatch {
    /// One best template was found and applied
    Applied {
        template_id: String,
        configuration: DeviceConfiguration,
    },
    /// No template targets this device's manufacturer+model
    NoMatch,
    /// Several templates tie at the highest priority; nothing was applied
    Ambiguous { template_ids: Vec<String> },
}

/// High-level device operations.
pub struct DeviceService {
    registry: Arc<DeviceRegistry>,
    adapters: Arc<AdapterRegistry>,
    event_bus: EventBus,
}

impl DeviceService {
    pub fn new(
        registry: Arc<DeviceRegistry>,
        adapters: Arc<AdapterRegistry>,
        event_bus: EventBus,
    ) -> Self {
        Self {
            registry,
            adapters,
            event_bus,
        }
    }

    pub fn registry(&self) -> &Arc<DeviceRegistry> {
        &self.registry
    }

    // ========== Command Execution ==========

    /// Execute a command against a device.
    ///
    /// Inactive devices reject commands outright. Latency and outcome are
    /// logged for every attempt; adapter errors are propagated, not
    /// swallowed.
    pub async fn execute_command(
        &self,
        device_id: &str,
        request: CommandRequest,
    ) -> Result<CommandOutcome> {
        let device = self.registry.require_device(device_id).await?;
        if !device.is_active {
            return Err(Error::Inactive(device_id.to_string()));
        }

        let adapter = self.adapters.select_for(&device);
        let mut target = self.registry.connection_target(&device).await?;
        if let Some(timeout_secs) = request.timeout_secs {
            target.timeout = Duration::from_secs(timeout_secs);
        }

        let started = Instant::now();
        let result = adapter.send_command(&target, &request).await;
        let latency_ms = started.elapsed().as_millis() as u64;

        match &result {
            Ok(outcome) => {
                info!(
                    device_id = %device_id,
                    command = %request.command,
                    adapter = %adapter.vendor(),
                    latency_ms,
                    success = outcome.success,
                    "device command executed"
                );
            }
            Err(e) => {
                warn!(
                    device_id = %device_id,
                    command = %request.command,
                    adapter = %adapter.vendor(),
                    latency_ms,
                    error = %e,
                    "device command failed"
                );
            }
        }

        result.map_err(Error::from)
    }

    /// Probe device reachability.
    ///
    /// Never fails for connectivity reasons: any failure on the way to the
    /// device is folded into `false`. Only an unknown device id errors.
    pub async fn test_connection(&self, device_id: &str) -> Result<bool> {
        let device = self.registry.require_device(device_id).await?;
        let adapter = self.adapters.select_for(&device);

        let reachable = match self.registry.connection_target(&device).await {
            Ok(target) => adapter.test_connection(&target).await,
            Err(e) => {
                warn!(device_id = %device_id, error = %e, "connection test could not build target");
                false
            }
        };

        let status = if reachable {
            DeviceStatus::Online
        } else {
            DeviceStatus::Offline
        };
        let status_changed = device.status != status;
        self.registry.set_device_status(device_id, status).await?;

        if status_changed {
            let event = if reachable {
                FleetEvent::DeviceOnline {
                    device_id: device_id.to_string(),
                    timestamp: Utc::now().timestamp(),
                }
            } else {
                FleetEvent::DeviceOffline {
                    device_id: device_id.to_string(),
                    timestamp: Utc::now().timestamp(),
                }
            };
            self.event_bus.publish_with_source(event, "device-service").await;
        }

        Ok(reachable)
    }

    /// Fetch a health snapshot and fold it into the device's status.
    ///
    /// Connectivity failures are a normal outcome and come back as an
    /// `Unreachable` snapshot, not an error.
    pub async fn probe_health(&self, device_id: &str) -> Result<DeviceHealth> {
        let device = self.registry.require_device(device_id).await?;
        let adapter = self.adapters.select_for(&device);
        let target = self.registry.connection_target(&device).await?;

        let health = match adapter.device_health(&target).await {
            Ok(health) => health,
            Err(e) if e.is_connectivity() => DeviceHealth::unreachable(e.to_string()),
            Err(e) => return Err(e.into()),
        };

        let status = match health.state {
            HealthState::Healthy | HealthState::Degraded => DeviceStatus::Online,
            HealthState::Unreachable => DeviceStatus::Offline,
        };
        self.registry.set_device_status(device_id, status).await?;

        Ok(health)
    }

    /// Fetch the device's self-reported identity.
    pub async fn device_info(&self, device_id: &str) -> Result<DeviceInfo> {
        let device = self.registry.require_device(device_id).await?;
        let adapter = self.adapters.select_for(&device);
        let target = self.registry.connection_target(&device).await?;
        adapter.device_info(&target).await.map_err(Error::from)
    }

    // ========== Template Application ==========

    /// Apply a template's defaults to a device's configuration.
    ///
    /// Values the device already overrides stay untouched; a device
    /// without configuration gets one created from the defaults.
    pub async fn apply_template(
        &self,
        device_id: &str,
        template_id: &str,
    ) -> Result<DeviceConfiguration> {
        let device = self.registry.require_device(device_id).await?;
        let template = self
            .registry
            .get_template(template_id)
            .await
            .ok_or_else(|| Error::NotFound(format!("template '{}'", template_id)))?;
        if template.organization_id != device.organization_id {
            return Err(Error::Validation(format!(
                "template '{}' belongs to a different organization",
                template_id
            )));
        }

        let mut values = self
            .registry
            .get_configuration(device_id)
            .await
            .map(|c| c.values)
            .unwrap_or_default();
        values.fill_missing_from(&template.defaults);

        let configuration = self.registry.upsert_configuration(device_id, values).await?;
        info!(device_id = %device_id, template_id = %template_id, "template applied");
        Ok(configuration)
    }

    /// Find and apply the best-matching template for a device.
    ///
    /// Candidates are the organization's templates whose manufacturer and
    /// model match the device exactly. The highest priority wins; a tie at
    /// the top is surfaced as [`TemplateMatch::Ambiguous`] instead of
    /// picking one arbitrarily.
    pub async fn auto_apply_matching_template(&self, device_id: &str) -> Result<TemplateMatch> {
        let device = self.registry.require_device(device_id).await?;

        let mut candidates: Vec<DeviceTemplate> = self
            .registry
            .list_templates(&device.organization_id)
            .await
            .into_iter()
            .filter(|t| t.matches(&device))
            .collect();

        if candidates.is_empty() {
            debug!(device_id = %device_id, "no template matches device");
            return Ok(TemplateMatch::NoMatch);
        }

        candidates.sort_by(|a, b| b.priority.cmp(&a.priority));
        let top_priority = candidates[0].priority;
        let top: Vec<&DeviceTemplate> = candidates
            .iter()
            .take_while(|t| t.priority == top_priority)
            .collect();

        if top.len() > 1 {
            let template_ids = top.iter().map(|t| t.template_id.clone()).collect();
            warn!(
                device_id = %device_id,
                ?template_ids,
                "multiple templates tie for device, none applied"
            );
            return Ok(TemplateMatch::Ambiguous { template_ids });
        }

        let template_id = top[0].template_id.clone();
        let configuration = self.apply_template(device_id, &template_id).await?;
        Ok(TemplateMatch::Applied {
            template_id,
            configuration,
        })
    }

    /// Push a device's stored configuration to the device itself.
    pub async fn push_configuration(&self, device_id: &str) -> Result<()> {
        let device = self.registry.require_device(device_id).await?;
        let configuration = self
            .registry
            .get_configuration(device_id)
            .await
            .ok_or_else(|| {
                Error::NotFound(format!("configuration for device '{}'", device_id))
            })?;

        let adapter = self.adapters.select_for(&device);
        let target = self.registry.connection_target(&device).await?;
        let payload = serde_json::to_value(&configuration.values)?;
        adapter
            .update_configuration(&target, &payload)
            .await
            .map_err(Error::from)
    }

    /// Read the configuration resident on the device.
    pub async fn read_device_configuration(&self, device_id: &str) -> Result<Value> {
        let device = self.registry.require_device(device_id).await?;
        let adapter = self.adapters.select_for(&device);
        let target = self.registry.connection_target(&device).await?;
        adapter.get_configuration(&target).await.map_err(Error::from)
    }

    // ========== Webhooks ==========

    /// Configure a webhook: push the event host to the device, then record
    /// the registration.
    pub async fn configure_webhook(
        &self,
        device_id: &str,
        spec: WebhookSpec,
    ) -> Result<DeviceWebhook> {
        let device = self.registry.require_device(device_id).await?;
        let adapter = self.adapters.select_for(&device);

        if !adapter.supports_webhooks() {
            return Err(Error::Validation(format!(
                "adapter '{}' does not support webhooks",
                adapter.vendor()
            )));
        }

        let host_id = new_host_id();
        let event_host = EventHostSpec {
            host_id: host_id.clone(),
            url: spec.url.clone(),
            event_types: spec.event_types.clone(),
            protocol: spec.protocol.clone(),
            format: spec.format.clone(),
        };

        let target = self.registry.connection_target(&device).await?;
        adapter
            .configure_event_host(&target, &event_host)
            .await
            .map_err(Error::from)?;

        self.registry
            .create_webhook(
                device_id,
                Some(host_id),
                spec.url,
                spec.event_types,
                spec.protocol,
                spec.format,
            )
            .await
    }

    /// Remove a webhook registration.
    ///
    /// The device-side cleanup is best-effort; the registration is always
    /// deactivated so a dead device cannot pin a stale registration alive.
    pub async fn remove_webhook(&self, device_id: &str, host_id: &str) -> Result<()> {
        let device = self.registry.require_device(device_id).await?;
        let adapter = self.adapters.select_for(&device);

        match self.registry.connection_target(&device).await {
            Ok(target) => {
                if let Err(e) = adapter.delete_webhooks(&target).await {
                    warn!(device_id = %device_id, error = %e, "device-side webhook cleanup failed");
                }
            }
            Err(e) => {
                warn!(device_id = %device_id, error = %e, "device-side webhook cleanup skipped");
            }
        }

        self.registry.deactivate_webhook(device_id, host_id).await
    }

    /// List event hosts as the device itself reports them.
    pub async fn webhook_configurations(&self, device_id: &str) -> Result<Vec<EventHostSpec>> {
        let device = self.registry.require_device(device_id).await?;
        let adapter = self.adapters.select_for(&device);
        let target = self.registry.connection_target(&device).await?;
        adapter
            .webhook_configurations(&target)
            .await
            .map_err(Error::from)
    }

    // ========== Discovery ==========

    /// Run discovery across every vendor adapter that supports it.
    pub async fn discover_devices(&self) -> Vec<(AdapterKind, DeviceInfo)> {
        let mut discovered = Vec::new();
        for kind in self.adapters.kinds() {
            let adapter = self.adapters.get(kind);
            match adapter.discover_devices().await {
                Ok(devices) => {
                    for info in devices {
                        discovered.push((kind, info));
                    }
                }
                Err(e) => {
                    debug!(adapter = %kind, error = %e, "discovery not available");
                }
            }
        }
        discovered
    }
}
