//! HTTP surface for the Warden fleet engine.
//!
//! Two faces:
//! - the inbound command/query API consumed by the surrounding product
//!   (device CRUD, reconciliation, webhooks, templates)
//! - the device-facing webhook endpoint, which always answers 200

pub mod error;
pub mod handlers;
pub mod router;
pub mod state;

pub use error::{ApiError, ApiResult};
pub use router::create_router;
pub use state::AppState;

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
