//! Device integration layer for the Warden fleet engine.
//!
//! ## Architecture
//!
//! - **DeviceRegistry**: persisted device records, per-device
//!   configuration, vendor templates and webhook registrations
//! - **DeviceAdapter**: the vendor capability interface
//! - **AdapterRegistry** + [`adapters::AdapterKind`]: pure, total adapter
//!   classification and resolution
//! - **DeviceService**: command execution, connection tests, health
//!   probes, template application, webhook management
//! - **WebhookIngest**: correlation of device-pushed events to devices
//!   and host registrations
//!
//! Credentials are encrypted at rest; the decrypt happens only inside
//! [`registry::DeviceRegistry::connection_target`], immediately before an
//! adapter call.

pub mod adapter;
pub mod adapters;
pub mod model;
pub mod registry;
pub mod service;
pub mod webhook;

// Re-exports for convenience
pub use adapter::{
    AdapterError, AdapterResult, AdapterTarget, CommandOutcome, CommandRequest, DeviceAdapter,
    DeviceHealth, DeviceInfo, EventHostSpec, HealthState, commands,
};
pub use adapters::{AdapterKind, AdapterRegistry};
pub use model::{
    ConfigurationValues, Device, DeviceConfiguration, DeviceKind, DeviceSpec, DeviceStatus,
    DeviceTemplate, DeviceUpdate, DeviceWebhook, Protocol, TemplateSpec, WebhookSpec,
};
pub use registry::DeviceRegistry;
pub use service::{DeviceService, TemplateMatch};
pub use webhook::{DeviceIdentity, IngestResponse, VendorPayload, WebhookIngest};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
