//! The reconciliation engine.
//!
//! Computes the difference between a device's desired employee population
//! and the ledger's view of what is on the device, then applies the
//! minimal set of add/update/remove operations. Each employee is an
//! isolated unit of work: one failure is recorded in its own ledger row
//! and never aborts the rest of the batch.
//!
//! Reconciliation passes for the same device are serialized through a
//! per-device gate; different devices reconcile fully in parallel.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::sync::Mutex;
use tracing::{info, warn};

use warden_core::{Error, EventBus, FleetEvent, Result};
use warden_devices::{CommandRequest, DeviceService, commands};

use crate::employee::{CredentialType, Employee, EmployeeDirectory};
use crate::ledger::{SyncKind, SyncLedger, SyncRecord, SyncStatus};

/// The target population for a sync request.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "scope", rename_all = "snake_case")]
pub enum DesiredSet {
    /// Explicit employee ids
    Employees { ids: Vec<String> },
    /// Every active employee in a department
    Department { department_id: String },
    /// Every active employee in a branch
    Branch { branch_id: String },
    /// Every active employee in an organization
    Organization { organization_id: String },
}

/// Options controlling a reconciliation pass.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SyncOptions {
    /// Re-push employees that are already SYNCED. Off by default: repeated
    /// syncs of an unchanged population write nothing to the device.
    #[serde(default)]
    pub force_sync: bool,
    /// Deprovision employees present on the device but absent from the
    /// desired set. Off by default: silently removing access is a
    /// security-sensitive action that must be explicit.
    #[serde(default)]
    pub remove_missing: bool,
    /// Restrict the desired set (and the pushed credentials) to employees
    /// holding one specific active credential type, e.g. only FACE for a
    /// biometric terminal.
    #[serde(default)]
    pub credential_filter: Option<CredentialType>,
}

impl SyncOptions {
    /// Options for provisioning one credential type only.
    pub fn for_credential(credential_type: CredentialType) -> Self {
        Self {
            credential_filter: Some(credential_type),
            ..Default::default()
        }
    }
}

/// The employee+credential payload pushed (or attempted) to a device.
#[derive(Debug, Clone, Serialize)]
pub struct EmployeePayload {
    pub employee_id: String,
    pub name: String,
    pub credentials: Vec<Value>,
}

/// Aggregate result of a reconciliation pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncReport {
    pub added: usize,
    pub updated: usize,
    pub removed: usize,
    pub failed: usize,
    /// Everything that was pushed or attempted, for caller visibility
    pub pushed: Vec<EmployeePayload>,
}

/// Aggregate result of a retry pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RetryReport {
    pub retried: usize,
    pub recovered: usize,
    pub still_failed: usize,
}

/// Ledger summary for a device.
#[derive(Debug, Clone, Serialize)]
pub struct SyncStatusSummary {
    pub device_id: String,
    pub total: usize,
    pub synced: usize,
    pub failed: usize,
    pub records: Vec<SyncRecord>,
}

/// Bounded exponential backoff between retry attempts against one device.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub cap: Duration,
}

impl BackoffPolicy {
    pub fn new(base: Duration, cap: Duration) -> Self {
        Self { base, cap }
    }

    /// Delay before the next attempt after `consecutive_failures`.
    pub fn delay(&self, consecutive_failures: u32) -> Duration {
        let shift = consecutive_failures.min(16);
        let delay = self.base.saturating_mul(1u32 << shift);
        delay.min(self.cap)
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(250),
            cap: Duration::from_secs(5),
        }
    }
}

/// Outcome of one isolated unit of work.
enum ApplyResult {
    Success,
    Failed { connectivity: bool },
}

/// Employee-to-device reconciliation engine.
pub struct ReconciliationEngine {
    devices: Arc<DeviceService>,
    directory: Arc<dyn EmployeeDirectory>,
    ledger: Arc<SyncLedger>,
    event_bus: EventBus,
    /// One reconciliation pass in flight per device
    gates: DashMap<String, Arc<Mutex<()>>>,
    backoff: BackoffPolicy,
}

impl ReconciliationEngine {
    pub fn new(
        devices: Arc<DeviceService>,
        directory: Arc<dyn EmployeeDirectory>,
        ledger: Arc<SyncLedger>,
        event_bus: EventBus,
    ) -> Self {
        Self::with_backoff(devices, directory, ledger, event_bus, BackoffPolicy::default())
    }

    pub fn with_backoff(
        devices: Arc<DeviceService>,
        directory: Arc<dyn EmployeeDirectory>,
        ledger: Arc<SyncLedger>,
        event_bus: EventBus,
        backoff: BackoffPolicy,
    ) -> Self {
        Self {
            devices,
            directory,
            ledger,
            event_bus,
            gates: DashMap::new(),
            backoff,
        }
    }

    pub fn ledger(&self) -> &Arc<SyncLedger> {
        &self.ledger
    }

    fn gate(&self, device_id: &str) -> Arc<Mutex<()>> {
        self.gates
            .entry(device_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Reconcile a device against a desired set.
    ///
    /// Idempotent by default: employees already SYNCED are skipped unless
    /// `force_sync` is set, and nothing is ever removed unless
    /// `remove_missing` is set.
    pub async fn sync_employees(
        &self,
        device_id: &str,
        desired: DesiredSet,
        options: SyncOptions,
    ) -> Result<SyncReport> {
        let gate = self.gate(device_id);
        let _guard = gate.lock().await;

        let device = self.devices.registry().require_device(device_id).await?;
        if !device.is_active {
            return Err(Error::Inactive(device_id.to_string()));
        }

        // Desired population, with active credentials, optionally
        // restricted to one credential type
        let mut employees = self.load_desired(&desired).await?;
        if let Some(filter) = options.credential_filter {
            employees.retain(|e| e.has_active_credential(filter));
        }

        let desired_ids: HashSet<String> =
            employees.iter().map(|e| e.employee_id.clone()).collect();
        let synced_ids = self.ledger.synced_ids(device_id).await;
        let ledger_ids = self.ledger.all_ids(device_id).await;

        let mut report = SyncReport::default();

        // Additions: desired but not SYNCED (covers brand-new employees
        // and FAILED rows being re-attempted)
        for employee in employees.iter().filter(|e| !synced_ids.contains(&e.employee_id)) {
            let payload = employee_payload(employee, options.credential_filter);
            match self
                .apply_employee(device_id, employee, SyncKind::Add, options.credential_filter)
                .await
            {
                ApplyResult::Success => report.added += 1,
                ApplyResult::Failed { .. } => report.failed += 1,
            }
            report.pushed.push(payload);
        }

        // Updates: desired and already SYNCED, only when forced
        if options.force_sync {
            for employee in employees.iter().filter(|e| synced_ids.contains(&e.employee_id)) {
                let payload = employee_payload(employee, options.credential_filter);
                match self
                    .apply_employee(
                        device_id,
                        employee,
                        SyncKind::Update,
                        options.credential_filter,
                    )
                    .await
                {
                    ApplyResult::Success => report.updated += 1,
                    ApplyResult::Failed { .. } => report.failed += 1,
                }
                report.pushed.push(payload);
            }
        }

        // Removals: on the device (any ledger row) but not desired, only
        // when explicitly requested
        if options.remove_missing {
            let to_remove: Vec<String> = ledger_ids
                .difference(&desired_ids)
                .cloned()
                .collect();
            for employee_id in to_remove {
                match self.remove_employee(device_id, &employee_id).await {
                    ApplyResult::Success => report.removed += 1,
                    ApplyResult::Failed { .. } => report.failed += 1,
                }
            }
        }

        info!(
            device_id = %device_id,
            added = report.added,
            updated = report.updated,
            removed = report.removed,
            failed = report.failed,
            "reconciliation pass finished"
        );
        self.event_bus
            .publish_with_source(
                FleetEvent::SyncCompleted {
                    device_id: device_id.to_string(),
                    added: report.added,
                    updated: report.updated,
                    removed: report.removed,
                    failed: report.failed,
                    timestamp: Utc::now().timestamp(),
                },
                "reconciliation",
            )
            .await;

        Ok(report)
    }

    /// Re-attempt every FAILED ledger row for a device.
    ///
    /// Replays each row's last recorded intent without re-deriving the
    /// desired set. Consecutive connectivity failures back off
    /// exponentially (bounded) so an unreachable device is not hammered.
    pub async fn retry_failed(&self, device_id: &str) -> Result<RetryReport> {
        let gate = self.gate(device_id);
        let _guard = gate.lock().await;

        let device = self.devices.registry().require_device(device_id).await?;
        if !device.is_active {
            return Err(Error::Inactive(device_id.to_string()));
        }

        let failed = self.ledger.failed_records(device_id).await;
        let mut report = RetryReport {
            retried: failed.len(),
            ..Default::default()
        };

        let mut consecutive_connectivity_failures = 0u32;
        for record in failed {
            if consecutive_connectivity_failures > 0 {
                let delay = self.backoff.delay(consecutive_connectivity_failures - 1);
                tokio::time::sleep(delay).await;
            }

            let employees = self
                .directory
                .employees_by_ids(std::slice::from_ref(&record.employee_id))
                .await?;
            let Some(employee) = employees.into_iter().next() else {
                self.ledger
                    .record_failure(
                        device_id,
                        &record.employee_id,
                        record.kind,
                        "employee no longer present in directory",
                    )
                    .await;
                report.still_failed += 1;
                continue;
            };

            match self
                .apply_employee(device_id, &employee, record.kind, None)
                .await
            {
                ApplyResult::Success => {
                    report.recovered += 1;
                    consecutive_connectivity_failures = 0;
                }
                ApplyResult::Failed { connectivity } => {
                    report.still_failed += 1;
                    if connectivity {
                        consecutive_connectivity_failures += 1;
                    } else {
                        consecutive_connectivity_failures = 0;
                    }
                }
            }
        }

        info!(
            device_id = %device_id,
            retried = report.retried,
            recovered = report.recovered,
            still_failed = report.still_failed,
            "retry pass finished"
        );
        Ok(report)
    }

    /// Ledger summary for a device.
    pub async fn sync_status(&self, device_id: &str) -> Result<SyncStatusSummary> {
        self.devices.registry().require_device(device_id).await?;

        let records = self.ledger.records_for_device(device_id).await;
        let synced = records
            .iter()
            .filter(|r| r.status == SyncStatus::Synced)
            .count();
        let failed = records.len() - synced;

        Ok(SyncStatusSummary {
            device_id: device_id.to_string(),
            total: records.len(),
            synced,
            failed,
            records,
        })
    }

    async fn load_desired(&self, desired: &DesiredSet) -> Result<Vec<Employee>> {
        match desired {
            DesiredSet::Employees { ids } => self.directory.employees_by_ids(ids).await,
            DesiredSet::Department { department_id } => {
                self.directory.employees_in_department(department_id).await
            }
            DesiredSet::Branch { branch_id } => {
                self.directory.employees_in_branch(branch_id).await
            }
            DesiredSet::Organization { organization_id } => {
                self.directory
                    .employees_in_organization(organization_id)
                    .await
            }
        }
    }

    /// One isolated unit of work: push one employee, record the outcome in
    /// that employee's ledger row.
    async fn apply_employee(
        &self,
        device_id: &str,
        employee: &Employee,
        kind: SyncKind,
        credential_filter: Option<CredentialType>,
    ) -> ApplyResult {
        let command = match kind {
            SyncKind::Add => commands::PERSON_ADD,
            SyncKind::Update => commands::PERSON_UPDATE,
        };
        let payload = employee_payload(employee, credential_filter);
        let request = CommandRequest::new(command).with_parameters(json!({
            "employee_id": payload.employee_id,
            "name": payload.name,
            "credentials": payload.credentials,
        }));

        match self.devices.execute_command(device_id, request).await {
            Ok(outcome) if outcome.success => {
                self.ledger
                    .record_success(device_id, &employee.employee_id, kind)
                    .await;
                ApplyResult::Success
            }
            Ok(outcome) => {
                let message = outcome
                    .data
                    .as_ref()
                    .and_then(|d| d["reason"].as_str())
                    .unwrap_or("device rejected the operation")
                    .to_string();
                self.ledger
                    .record_failure(device_id, &employee.employee_id, kind, &message)
                    .await;
                ApplyResult::Failed {
                    connectivity: false,
                }
            }
            Err(e) => {
                let connectivity = e.is_connectivity();
                self.ledger
                    .record_failure(device_id, &employee.employee_id, kind, e.to_string())
                    .await;
                ApplyResult::Failed { connectivity }
            }
        }
    }

    /// Deprovision one employee and drop their ledger row on success.
    async fn remove_employee(&self, device_id: &str, employee_id: &str) -> ApplyResult {
        let request = CommandRequest::new(commands::PERSON_REMOVE)
            .with_parameters(json!({ "employee_id": employee_id }));

        match self.devices.execute_command(device_id, request).await {
            Ok(outcome) if outcome.success => {
                self.ledger.remove(device_id, employee_id).await;
                ApplyResult::Success
            }
            Ok(outcome) => {
                let message = outcome
                    .data
                    .as_ref()
                    .and_then(|d| d["reason"].as_str())
                    .unwrap_or("device rejected the removal")
                    .to_string();
                let kind = self
                    .ledger
                    .get(device_id, employee_id)
                    .await
                    .map(|r| r.kind)
                    .unwrap_or(SyncKind::Add);
                self.ledger
                    .record_failure(device_id, employee_id, kind, &message)
                    .await;
                ApplyResult::Failed {
                    connectivity: false,
                }
            }
            Err(e) => {
                warn!(device_id = %device_id, employee_id = %employee_id, error = %e, "removal failed");
                let kind = self
                    .ledger
                    .get(device_id, employee_id)
                    .await
                    .map(|r| r.kind)
                    .unwrap_or(SyncKind::Add);
                let connectivity = e.is_connectivity();
                self.ledger
                    .record_failure(device_id, employee_id, kind, e.to_string())
                    .await;
                ApplyResult::Failed { connectivity }
            }
        }
    }
}

/// Build the wire payload for one employee.
fn employee_payload(
    employee: &Employee,
    credential_filter: Option<CredentialType>,
) -> EmployeePayload {
    let credentials = employee
        .active_credentials()
        .into_iter()
        .filter(|c| credential_filter.map_or(true, |f| c.credential_type == f))
        .map(|c| {
            json!({
                "type": c.credential_type.as_str(),
                "value": c.value,
            })
        })
        .collect();

    EmployeePayload {
        employee_id: employee.employee_id.clone(),
        name: employee.name.clone(),
        credentials,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_is_bounded() {
        let backoff = BackoffPolicy::new(Duration::from_millis(100), Duration::from_secs(2));
        assert_eq!(backoff.delay(0), Duration::from_millis(100));
        assert_eq!(backoff.delay(1), Duration::from_millis(200));
        assert_eq!(backoff.delay(2), Duration::from_millis(400));
        // Capped
        assert_eq!(backoff.delay(10), Duration::from_secs(2));
        assert_eq!(backoff.delay(u32::MAX), Duration::from_secs(2));
    }

    #[test]
    fn test_payload_respects_credential_filter() {
        use crate::employee::EmployeeCredential;

        let employee = Employee {
            employee_id: "emp-1".to_string(),
            name: "Ada".to_string(),
            organization_id: "org-1".to_string(),
            department_id: None,
            branch_id: None,
            is_active: true,
            credentials: vec![
                EmployeeCredential {
                    credential_type: CredentialType::Face,
                    value: "face-1".to_string(),
                    is_active: true,
                },
                EmployeeCredential {
                    credential_type: CredentialType::Card,
                    value: "0042".to_string(),
                    is_active: true,
                },
                EmployeeCredential {
                    credential_type: CredentialType::Card,
                    value: "0043".to_string(),
                    is_active: false,
                },
            ],
        };

        let all = employee_payload(&employee, None);
        assert_eq!(all.credentials.len(), 2);

        let face_only = employee_payload(&employee, Some(CredentialType::Face));
        assert_eq!(face_only.credentials.len(), 1);
        assert_eq!(face_only.credentials[0]["type"], "face");
    }
}
