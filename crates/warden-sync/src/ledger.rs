//! The reconciliation ledger.
//!
//! One row per (device, employee) pair — the only durable record of
//! "is employee X currently provisioned on device Y". Rows move between
//! SYNCED and FAILED; removal deletes the row, there is no removed
//! terminal state.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::warn;

use warden_core::{Error, Result};
use warden_storage::{FleetStore, SyncEntry};

/// Terminal state of a ledger row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    Synced,
    Failed,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Synced => "synced",
            Self::Failed => "failed",
        }
    }

    fn parse(s: &str) -> Self {
        match s {
            "synced" => Self::Synced,
            _ => Self::Failed,
        }
    }
}

/// Which intent produced the row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncKind {
    Add,
    Update,
}

impl SyncKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Update => "update",
        }
    }

    fn parse(s: &str) -> Self {
        match s {
            "update" => Self::Update,
            _ => Self::Add,
        }
    }
}

/// One ledger row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncRecord {
    pub device_id: String,
    pub employee_id: String,
    pub status: SyncStatus,
    pub kind: SyncKind,
    /// Unix timestamp of the most recent attempt
    pub sync_attempted: i64,
    /// Unix timestamp of the most recent success
    pub synced_at: Option<i64>,
    pub error_message: Option<String>,
}

impl SyncRecord {
    fn to_entry(&self) -> SyncEntry {
        SyncEntry {
            device_id: self.device_id.clone(),
            employee_id: self.employee_id.clone(),
            status: self.status.as_str().to_string(),
            kind: self.kind.as_str().to_string(),
            sync_attempted: self.sync_attempted,
            synced_at: self.synced_at,
            error_message: self.error_message.clone(),
        }
    }

    fn from_entry(entry: SyncEntry) -> Self {
        Self {
            device_id: entry.device_id,
            employee_id: entry.employee_id,
            status: SyncStatus::parse(&entry.status),
            kind: SyncKind::parse(&entry.kind),
            sync_attempted: entry.sync_attempted,
            synced_at: entry.synced_at,
            error_message: entry.error_message,
        }
    }
}

/// Ledger over an in-memory map with optional write-through persistence.
pub struct SyncLedger {
    records: Arc<RwLock<HashMap<(String, String), SyncRecord>>>,
    store: Option<Arc<FleetStore>>,
}

impl SyncLedger {
    /// Create an in-memory ledger (no persistence).
    pub fn new() -> Self {
        Self {
            records: Arc::new(RwLock::new(HashMap::new())),
            store: None,
        }
    }

    /// Create a ledger over a store, loading existing rows.
    pub async fn with_store(store: Arc<FleetStore>) -> Result<Self> {
        let ledger = Self {
            records: Arc::new(RwLock::new(HashMap::new())),
            store: Some(store.clone()),
        };

        let entries = store.list_all_sync_entries().map_err(Error::from)?;
        let mut records = ledger.records.write().await;
        for entry in entries {
            let record = SyncRecord::from_entry(entry);
            records.insert(
                (record.device_id.clone(), record.employee_id.clone()),
                record,
            );
        }
        drop(records);

        Ok(ledger)
    }

    /// Get one row.
    pub async fn get(&self, device_id: &str, employee_id: &str) -> Option<SyncRecord> {
        let records = self.records.read().await;
        records
            .get(&(device_id.to_string(), employee_id.to_string()))
            .cloned()
    }

    /// All rows for a device.
    pub async fn records_for_device(&self, device_id: &str) -> Vec<SyncRecord> {
        let records = self.records.read().await;
        records
            .values()
            .filter(|r| r.device_id == device_id)
            .cloned()
            .collect()
    }

    /// Employee ids with a SYNCED row on the device (the "current set").
    pub async fn synced_ids(&self, device_id: &str) -> HashSet<String> {
        let records = self.records.read().await;
        records
            .values()
            .filter(|r| r.device_id == device_id && r.status == SyncStatus::Synced)
            .map(|r| r.employee_id.clone())
            .collect()
    }

    /// Every employee id with any row on the device.
    pub async fn all_ids(&self, device_id: &str) -> HashSet<String> {
        let records = self.records.read().await;
        records
            .values()
            .filter(|r| r.device_id == device_id)
            .map(|r| r.employee_id.clone())
            .collect()
    }

    /// All FAILED rows for a device.
    pub async fn failed_records(&self, device_id: &str) -> Vec<SyncRecord> {
        let records = self.records.read().await;
        records
            .values()
            .filter(|r| r.device_id == device_id && r.status == SyncStatus::Failed)
            .cloned()
            .collect()
    }

    /// Record a successful add/update for a pair.
    pub async fn record_success(&self, device_id: &str, employee_id: &str, kind: SyncKind) {
        let now = Utc::now().timestamp();
        let record = SyncRecord {
            device_id: device_id.to_string(),
            employee_id: employee_id.to_string(),
            status: SyncStatus::Synced,
            kind,
            sync_attempted: now,
            synced_at: Some(now),
            error_message: None,
        };
        self.put(record).await;
    }

    /// Record a failed attempt for a pair, keeping its error visible for
    /// operators and later retry.
    pub async fn record_failure(
        &self,
        device_id: &str,
        employee_id: &str,
        kind: SyncKind,
        error_message: impl Into<String>,
    ) {
        let previous_synced_at = self
            .get(device_id, employee_id)
            .await
            .and_then(|r| r.synced_at);
        let record = SyncRecord {
            device_id: device_id.to_string(),
            employee_id: employee_id.to_string(),
            status: SyncStatus::Failed,
            kind,
            sync_attempted: Utc::now().timestamp(),
            synced_at: previous_synced_at,
            error_message: Some(error_message.into()),
        };
        self.put(record).await;
    }

    async fn put(&self, record: SyncRecord) {
        if let Some(store) = &self.store {
            if let Err(e) = store.save_sync_entry(&record.to_entry()) {
                warn!(
                    device_id = %record.device_id,
                    employee_id = %record.employee_id,
                    error = %e,
                    "failed to persist ledger row"
                );
            }
        }

        let mut records = self.records.write().await;
        records.insert(
            (record.device_id.clone(), record.employee_id.clone()),
            record,
        );
    }

    /// Delete a row. Only called when an employee is explicitly removed
    /// from the desired set with `remove_missing`.
    pub async fn remove(&self, device_id: &str, employee_id: &str) -> bool {
        if let Some(store) = &self.store {
            if let Err(e) = store.delete_sync_entry(device_id, employee_id) {
                warn!(
                    device_id = %device_id,
                    employee_id = %employee_id,
                    error = %e,
                    "failed to delete ledger row from storage"
                );
            }
        }

        let mut records = self.records.write().await;
        records
            .remove(&(device_id.to_string(), employee_id.to_string()))
            .is_some()
    }
}

impl Default for SyncLedger {
    fn default() -> Self {
        Self::new()
    }
}
