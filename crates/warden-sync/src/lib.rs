//! Employee-to-device reconciliation for the Warden fleet engine.
//!
//! - **Employee/EmployeeDirectory**: the externally-owned population the
//!   engine provisions from
//! - **SyncLedger**: durable per-(device, employee) sync state
//! - **ReconciliationEngine**: desired-vs-current set reconciliation with
//!   partial-failure isolation and explicit, backoff-bounded retry

pub mod employee;
pub mod engine;
pub mod ledger;

pub use employee::{
    CredentialType, Employee, EmployeeCredential, EmployeeDirectory, InMemoryDirectory,
};
pub use engine::{
    BackoffPolicy, DesiredSet, EmployeePayload, ReconciliationEngine, RetryReport, SyncOptions,
    SyncReport, SyncStatusSummary,
};
pub use ledger::{SyncKind, SyncLedger, SyncRecord, SyncStatus};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
