//! Fleet storage using redb.
//!
//! Persists device records, per-device configurations, vendor templates,
//! the employee sync ledger, and webhook registrations. All values are
//! JSON-encoded strings; the sync ledger and webhook tables use composite
//! `(device_id, secondary_id)` keys so per-device listings are range scans.

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};

use crate::Error;

// Devices table: key = device_id, value = DeviceRecord (JSON)
const DEVICES_TABLE: TableDefinition<&str, &str> = TableDefinition::new("devices");

// Configurations table: key = device_id, value = ConfigurationRecord (JSON).
// One row per device, enforcing the 1:1 invariant at the key level.
const CONFIGURATIONS_TABLE: TableDefinition<&str, &str> =
    TableDefinition::new("device_configurations");

// Templates table: key = template_id, value = TemplateRecord (JSON)
const TEMPLATES_TABLE: TableDefinition<&str, &str> = TableDefinition::new("device_templates");

// Sync ledger table: key = (device_id, employee_id), value = SyncEntry (JSON)
const SYNC_LEDGER_TABLE: TableDefinition<(&str, &str), &str> = TableDefinition::new("sync_ledger");

// Webhooks table: key = (device_id, host_id), value = WebhookRecord (JSON)
const WEBHOOKS_TABLE: TableDefinition<(&str, &str), &str> = TableDefinition::new("device_webhooks");

/// Persisted device record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceRecord {
    pub device_id: String,
    pub organization_id: String,
    pub name: String,
    pub host: String,
    pub port: u16,
    /// Transport protocol ("http", "https", "tcp", "udp")
    pub protocol: String,
    #[serde(default)]
    pub username: String,
    /// AES-GCM encrypted password, base64. Never stored in the clear.
    #[serde(default)]
    pub encrypted_password: Option<String>,
    #[serde(default)]
    pub manufacturer: String,
    #[serde(default)]
    pub model: String,
    /// Device classification ("card_reader", "face_terminal", "door_controller")
    #[serde(default)]
    pub kind: String,
    /// Health status ("online", "offline", "unknown")
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub last_seen: Option<i64>,
    pub is_active: bool,
    pub created_at: i64,
}

/// Persisted per-device configuration (1:1 with a device).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigurationRecord {
    pub device_id: String,
    #[serde(default)]
    pub timezone: Option<String>,
    #[serde(default)]
    pub offline_mode: Option<bool>,
    #[serde(default)]
    pub event_buffer_size: Option<u32>,
    #[serde(default)]
    pub heartbeat_interval_secs: Option<u32>,
    #[serde(default)]
    pub door_open_timeout_secs: Option<u32>,
    #[serde(default)]
    pub command_timeout_secs: Option<u64>,
    #[serde(default)]
    pub retry_attempts: Option<u32>,
    pub updated_at: i64,
}

/// Configuration values carried by a template.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigurationDefaults {
    #[serde(default)]
    pub timezone: Option<String>,
    #[serde(default)]
    pub offline_mode: Option<bool>,
    #[serde(default)]
    pub event_buffer_size: Option<u32>,
    #[serde(default)]
    pub heartbeat_interval_secs: Option<u32>,
    #[serde(default)]
    pub door_open_timeout_secs: Option<u32>,
    #[serde(default)]
    pub command_timeout_secs: Option<u64>,
    #[serde(default)]
    pub retry_attempts: Option<u32>,
}

/// Persisted vendor template.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateRecord {
    pub template_id: String,
    pub organization_id: String,
    pub name: String,
    pub manufacturer: String,
    pub model: String,
    /// Tie-break for auto-application; higher wins
    #[serde(default)]
    pub priority: i32,
    /// Default configuration values applied to matching devices
    pub defaults: ConfigurationDefaults,
    pub created_at: i64,
}

/// Persisted sync ledger entry for one (device, employee) pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncEntry {
    pub device_id: String,
    pub employee_id: String,
    /// "synced" or "failed"
    pub status: String,
    /// "add" or "update"
    pub kind: String,
    pub sync_attempted: i64,
    #[serde(default)]
    pub synced_at: Option<i64>,
    #[serde(default)]
    pub error_message: Option<String>,
}

/// Persisted webhook registration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookRecord {
    pub device_id: String,
    pub host_id: String,
    pub url: String,
    #[serde(default)]
    pub event_types: Vec<String>,
    #[serde(default)]
    pub protocol: String,
    #[serde(default)]
    pub format: String,
    pub is_active: bool,
    #[serde(default)]
    pub trigger_count: u64,
    #[serde(default)]
    pub last_triggered: Option<i64>,
    #[serde(default)]
    pub last_error: Option<String>,
    pub created_at: i64,
}

/// Fleet persistence backend.
pub struct FleetStore {
    db: Arc<Database>,
}

impl FleetStore {
    /// Open or create a fleet store at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Arc<Self>, Error> {
        let path_ref = path.as_ref();
        if let Some(parent) = path_ref.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let db = if path_ref.exists() {
            Database::open(path_ref)?
        } else {
            Database::create(path_ref)?
        };

        // Make sure all tables exist so later read transactions can open them
        let write_txn = db.begin_write()?;
        {
            let _devices = write_txn.open_table(DEVICES_TABLE)?;
            let _configurations = write_txn.open_table(CONFIGURATIONS_TABLE)?;
            let _templates = write_txn.open_table(TEMPLATES_TABLE)?;
            let _ledger = write_txn.open_table(SYNC_LEDGER_TABLE)?;
            let _webhooks = write_txn.open_table(WEBHOOKS_TABLE)?;
        }
        write_txn.commit()?;

        Ok(Arc::new(FleetStore { db: Arc::new(db) }))
    }

    // ========== Device Management ==========

    /// Save a device record.
    pub fn save_device(&self, record: &DeviceRecord) -> Result<(), Error> {
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(DEVICES_TABLE)?;
            let json = serde_json::to_string(record)?;
            table.insert(record.device_id.as_str(), json.as_str())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Load a device record.
    pub fn load_device(&self, device_id: &str) -> Result<Option<DeviceRecord>, Error> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(DEVICES_TABLE)?;

        match table.get(device_id)? {
            Some(value) => {
                let record: DeviceRecord = serde_json::from_str(value.value())?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    /// List all device records.
    pub fn list_devices(&self) -> Result<Vec<DeviceRecord>, Error> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(DEVICES_TABLE)?;

        let mut devices = Vec::new();
        for result in table.iter()? {
            let (_key, value) = result?;
            if let Ok(record) = serde_json::from_str::<DeviceRecord>(value.value()) {
                devices.push(record);
            }
        }
        Ok(devices)
    }

    /// Delete a device and cascade its configuration, sync ledger rows and
    /// webhook registrations in a single write transaction.
    ///
    /// Returns `false` if the device did not exist.
    pub fn delete_device(&self, device_id: &str) -> Result<bool, Error> {
        let write_txn = self.db.begin_write()?;
        let deleted = {
            let mut devices = write_txn.open_table(DEVICES_TABLE)?;
            let deleted = devices.remove(device_id)?.is_some();

            let mut configurations = write_txn.open_table(CONFIGURATIONS_TABLE)?;
            configurations.remove(device_id)?;

            let mut ledger = write_txn.open_table(SYNC_LEDGER_TABLE)?;
            Self::remove_device_range(&mut ledger, device_id)?;

            let mut webhooks = write_txn.open_table(WEBHOOKS_TABLE)?;
            Self::remove_device_range(&mut webhooks, device_id)?;

            deleted
        };
        write_txn.commit()?;
        Ok(deleted)
    }

    /// Remove every composite-key row belonging to a device.
    fn remove_device_range(
        table: &mut redb::Table<'_, (&'static str, &'static str), &'static str>,
        device_id: &str,
    ) -> Result<usize, Error> {
        let start_key = (device_id, "");
        let end_key = (device_id, "\x7F");

        // Collect secondary keys first; redb tables cannot be mutated
        // while a range iterator is open
        let mut secondary_ids = Vec::new();
        {
            let range = table.range(start_key..=end_key)?;
            for result in range {
                let (key, _) = result?;
                secondary_ids.push(key.value().1.to_string());
            }
        }

        let removed = secondary_ids.len();
        for id in secondary_ids {
            table.remove((device_id, id.as_str()))?;
        }
        Ok(removed)
    }

    // ========== Configuration Management ==========

    /// Save (create or replace) a device configuration.
    pub fn save_configuration(&self, record: &ConfigurationRecord) -> Result<(), Error> {
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(CONFIGURATIONS_TABLE)?;
            let json = serde_json::to_string(record)?;
            table.insert(record.device_id.as_str(), json.as_str())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Load a device configuration.
    pub fn load_configuration(&self, device_id: &str) -> Result<Option<ConfigurationRecord>, Error> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(CONFIGURATIONS_TABLE)?;

        match table.get(device_id)? {
            Some(value) => {
                let record: ConfigurationRecord = serde_json::from_str(value.value())?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    /// Delete a device configuration.
    pub fn delete_configuration(&self, device_id: &str) -> Result<bool, Error> {
        let write_txn = self.db.begin_write()?;
        let deleted = {
            let mut table = write_txn.open_table(CONFIGURATIONS_TABLE)?;
            let existed = table.remove(device_id)?.is_some();
            existed
        };
        write_txn.commit()?;
        Ok(deleted)
    }

    // ========== Template Management ==========

    /// Save a template record.
    pub fn save_template(&self, record: &TemplateRecord) -> Result<(), Error> {
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(TEMPLATES_TABLE)?;
            let json = serde_json::to_string(record)?;
            table.insert(record.template_id.as_str(), json.as_str())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Load a template record.
    pub fn load_template(&self, template_id: &str) -> Result<Option<TemplateRecord>, Error> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(TEMPLATES_TABLE)?;

        match table.get(template_id)? {
            Some(value) => {
                let record: TemplateRecord = serde_json::from_str(value.value())?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    /// List all template records.
    pub fn list_templates(&self) -> Result<Vec<TemplateRecord>, Error> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(TEMPLATES_TABLE)?;

        let mut templates = Vec::new();
        for result in table.iter()? {
            let (_key, value) = result?;
            if let Ok(record) = serde_json::from_str::<TemplateRecord>(value.value()) {
                templates.push(record);
            }
        }
        Ok(templates)
    }

    /// Delete a template record.
    pub fn delete_template(&self, template_id: &str) -> Result<bool, Error> {
        let write_txn = self.db.begin_write()?;
        let deleted = {
            let mut table = write_txn.open_table(TEMPLATES_TABLE)?;
            let existed = table.remove(template_id)?.is_some();
            existed
        };
        write_txn.commit()?;
        Ok(deleted)
    }

    // ========== Sync Ledger ==========

    /// Save (create or replace) a sync ledger entry.
    pub fn save_sync_entry(&self, entry: &SyncEntry) -> Result<(), Error> {
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(SYNC_LEDGER_TABLE)?;
            let json = serde_json::to_string(entry)?;
            table.insert(
                (entry.device_id.as_str(), entry.employee_id.as_str()),
                json.as_str(),
            )?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Load a single sync ledger entry.
    pub fn load_sync_entry(
        &self,
        device_id: &str,
        employee_id: &str,
    ) -> Result<Option<SyncEntry>, Error> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(SYNC_LEDGER_TABLE)?;

        match table.get((device_id, employee_id))? {
            Some(value) => {
                let entry: SyncEntry = serde_json::from_str(value.value())?;
                Ok(Some(entry))
            }
            None => Ok(None),
        }
    }

    /// List all sync ledger entries for a device.
    pub fn list_sync_entries(&self, device_id: &str) -> Result<Vec<SyncEntry>, Error> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(SYNC_LEDGER_TABLE)?;

        let mut entries = Vec::new();
        let start_key = (device_id, "");
        let end_key = (device_id, "\x7F");
        for result in table.range(start_key..=end_key)? {
            let (_key, value) = result?;
            if let Ok(entry) = serde_json::from_str::<SyncEntry>(value.value()) {
                entries.push(entry);
            }
        }
        Ok(entries)
    }

    /// List every sync ledger entry across all devices.
    pub fn list_all_sync_entries(&self) -> Result<Vec<SyncEntry>, Error> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(SYNC_LEDGER_TABLE)?;

        let mut entries = Vec::new();
        for result in table.iter()? {
            let (_key, value) = result?;
            if let Ok(entry) = serde_json::from_str::<SyncEntry>(value.value()) {
                entries.push(entry);
            }
        }
        Ok(entries)
    }

    /// Delete a sync ledger entry. Returns `false` if it did not exist.
    pub fn delete_sync_entry(&self, device_id: &str, employee_id: &str) -> Result<bool, Error> {
        let write_txn = self.db.begin_write()?;
        let deleted = {
            let mut table = write_txn.open_table(SYNC_LEDGER_TABLE)?;
            let existed = table.remove((device_id, employee_id))?.is_some();
            existed
        };
        write_txn.commit()?;
        Ok(deleted)
    }

    // ========== Webhook Registrations ==========

    /// Save (create or replace) a webhook registration.
    pub fn save_webhook(&self, record: &WebhookRecord) -> Result<(), Error> {
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(WEBHOOKS_TABLE)?;
            let json = serde_json::to_string(record)?;
            table.insert(
                (record.device_id.as_str(), record.host_id.as_str()),
                json.as_str(),
            )?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Load a webhook registration.
    pub fn load_webhook(
        &self,
        device_id: &str,
        host_id: &str,
    ) -> Result<Option<WebhookRecord>, Error> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(WEBHOOKS_TABLE)?;

        match table.get((device_id, host_id))? {
            Some(value) => {
                let record: WebhookRecord = serde_json::from_str(value.value())?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    /// List webhook registrations for a device.
    pub fn list_webhooks(&self, device_id: &str) -> Result<Vec<WebhookRecord>, Error> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(WEBHOOKS_TABLE)?;

        let mut webhooks = Vec::new();
        let start_key = (device_id, "");
        let end_key = (device_id, "\x7F");
        for result in table.range(start_key..=end_key)? {
            let (_key, value) = result?;
            if let Ok(record) = serde_json::from_str::<WebhookRecord>(value.value()) {
                webhooks.push(record);
            }
        }
        Ok(webhooks)
    }

    /// Find a webhook registration by host id alone.
    ///
    /// Webhook payloads often carry only the host registration id, not the
    /// device id, so this is a full-table scan.
    pub fn find_webhook_by_host_id(&self, host_id: &str) -> Result<Option<WebhookRecord>, Error> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(WEBHOOKS_TABLE)?;

        for result in table.iter()? {
            let (key, value) = result?;
            if key.value().1 == host_id {
                let record: WebhookRecord = serde_json::from_str(value.value())?;
                return Ok(Some(record));
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn test_device(device_id: &str) -> DeviceRecord {
        DeviceRecord {
            device_id: device_id.to_string(),
            organization_id: "org-1".to_string(),
            name: "Front Door Reader".to_string(),
            host: "192.168.1.50".to_string(),
            port: 80,
            protocol: "http".to_string(),
            username: "admin".to_string(),
            encrypted_password: Some("ZW5jcnlwdGVk".to_string()),
            manufacturer: "Hikvision".to_string(),
            model: "DS-K1T341AM".to_string(),
            kind: "face_terminal".to_string(),
            status: "unknown".to_string(),
            last_seen: None,
            is_active: true,
            created_at: 1,
        }
    }

    #[test]
    fn test_device_roundtrip() {
        let dir = tempdir().unwrap();
        let store = FleetStore::open(dir.path().join("fleet.redb")).unwrap();

        store.save_device(&test_device("dev-1")).unwrap();

        let loaded = store.load_device("dev-1").unwrap().unwrap();
        assert_eq!(loaded.manufacturer, "Hikvision");
        assert_eq!(loaded.port, 80);

        assert_eq!(store.list_devices().unwrap().len(), 1);
        assert!(store.load_device("dev-2").unwrap().is_none());
    }

    #[test]
    fn test_delete_device_cascades() {
        let dir = tempdir().unwrap();
        let store = FleetStore::open(dir.path().join("fleet.redb")).unwrap();

        store.save_device(&test_device("dev-1")).unwrap();
        store
            .save_configuration(&ConfigurationRecord {
                device_id: "dev-1".to_string(),
                timezone: Some("UTC".to_string()),
                offline_mode: None,
                event_buffer_size: None,
                heartbeat_interval_secs: None,
                door_open_timeout_secs: None,
                command_timeout_secs: None,
                retry_attempts: None,
                updated_at: 1,
            })
            .unwrap();
        for employee in ["emp-1", "emp-2"] {
            store
                .save_sync_entry(&SyncEntry {
                    device_id: "dev-1".to_string(),
                    employee_id: employee.to_string(),
                    status: "synced".to_string(),
                    kind: "add".to_string(),
                    sync_attempted: 1,
                    synced_at: Some(1),
                    error_message: None,
                })
                .unwrap();
        }
        store
            .save_webhook(&WebhookRecord {
                device_id: "dev-1".to_string(),
                host_id: "host-1".to_string(),
                url: "http://backend/webhook".to_string(),
                event_types: vec!["AccessControllerEvent".to_string()],
                protocol: "HTTP".to_string(),
                format: "JSON".to_string(),
                is_active: true,
                trigger_count: 0,
                last_triggered: None,
                last_error: None,
                created_at: 1,
            })
            .unwrap();

        assert!(store.delete_device("dev-1").unwrap());

        assert!(store.load_device("dev-1").unwrap().is_none());
        assert!(store.load_configuration("dev-1").unwrap().is_none());
        assert!(store.list_sync_entries("dev-1").unwrap().is_empty());
        assert!(store.list_webhooks("dev-1").unwrap().is_empty());
    }

    #[test]
    fn test_sync_ledger_per_device_isolation() {
        let dir = tempdir().unwrap();
        let store = FleetStore::open(dir.path().join("fleet.redb")).unwrap();

        for (device, employee) in [("dev-1", "emp-1"), ("dev-1", "emp-2"), ("dev-2", "emp-1")] {
            store
                .save_sync_entry(&SyncEntry {
                    device_id: device.to_string(),
                    employee_id: employee.to_string(),
                    status: "failed".to_string(),
                    kind: "add".to_string(),
                    sync_attempted: 1,
                    synced_at: None,
                    error_message: Some("timeout".to_string()),
                })
                .unwrap();
        }

        assert_eq!(store.list_sync_entries("dev-1").unwrap().len(), 2);
        assert_eq!(store.list_sync_entries("dev-2").unwrap().len(), 1);

        assert!(store.delete_sync_entry("dev-1", "emp-1").unwrap());
        assert_eq!(store.list_sync_entries("dev-1").unwrap().len(), 1);
        assert!(!store.delete_sync_entry("dev-1", "emp-1").unwrap());
    }

    #[test]
    fn test_find_webhook_by_host_id() {
        let dir = tempdir().unwrap();
        let store = FleetStore::open(dir.path().join("fleet.redb")).unwrap();

        store
            .save_webhook(&WebhookRecord {
                device_id: "dev-9".to_string(),
                host_id: "host-42".to_string(),
                url: "http://backend/webhook".to_string(),
                event_types: Vec::new(),
                protocol: "HTTP".to_string(),
                format: "JSON".to_string(),
                is_active: true,
                trigger_count: 3,
                last_triggered: None,
                last_error: None,
                created_at: 1,
            })
            .unwrap();

        let found = store.find_webhook_by_host_id("host-42").unwrap().unwrap();
        assert_eq!(found.device_id, "dev-9");
        assert!(store.find_webhook_by_host_id("host-0").unwrap().is_none());
    }
}
