//! Persistent storage for the Warden fleet engine.
//!
//! Backed by a single redb database with one table per concern:
//! devices, device configurations, vendor templates, the employee sync
//! ledger, and webhook registrations.

pub mod error;
pub mod fleet;

pub use error::{Error, Result};
pub use fleet::{
    ConfigurationDefaults, ConfigurationRecord, DeviceRecord, FleetStore, SyncEntry,
    TemplateRecord, WebhookRecord,
};
