//! Core types for the Warden access-control fleet engine.
//!
//! This crate defines the foundational abstractions shared by every other
//! crate in the workspace:
//!
//! - **Error taxonomy** ([`Error`]): one enum covering connectivity,
//!   validation, partial-failure, and storage concerns.
//! - **EventBus**: broadcast channel distributing [`FleetEvent`]s pushed by
//!   devices (access grants, door status, alarms) and emitted by the
//!   reconciliation engine.
//! - **CryptoService**: AES-256-GCM encryption for device credentials at
//!   rest.
//! - **RuntimeConfig**: environment-driven process configuration.

pub mod config;
pub mod crypto;
pub mod error;
pub mod events;

pub use config::RuntimeConfig;
pub use crypto::{CryptoError, CryptoService};
pub use error::{Error, Result};
pub use events::{
    DEFAULT_CHANNEL_CAPACITY, EventBus, EventBusReceiver, EventMetadata, FilteredReceiver,
    FleetEvent,
};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
