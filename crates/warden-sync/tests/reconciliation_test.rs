//! Reconciliation engine behavior against a scripted vendor adapter.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};

use warden_core::{CryptoService, EventBus};
use warden_devices::adapter::{
    AdapterError, AdapterResult, AdapterTarget, CommandOutcome, CommandRequest, DeviceAdapter,
    DeviceHealth, DeviceInfo, EventHostSpec, HealthState,
};
use warden_devices::{
    AdapterKind, AdapterRegistry, DeviceKind, DeviceRegistry, DeviceService, DeviceSpec, Protocol,
};
use warden_sync::{
    BackoffPolicy, CredentialType, DesiredSet, Employee, EmployeeCredential, InMemoryDirectory,
    ReconciliationEngine, SyncLedger, SyncOptions, SyncStatus,
};

/// Scripted adapter: fails chosen employees, can play unreachable, and
/// records every command it sees.
#[derive(Default)]
struct ScriptedAdapter {
    fail_employees: Mutex<HashSet<String>>,
    unreachable: Mutex<bool>,
    calls: Mutex<Vec<(String, String)>>,
}

impl ScriptedAdapter {
    fn fail_employee(&self, employee_id: &str) {
        self.fail_employees
            .lock()
            .unwrap()
            .insert(employee_id.to_string());
    }

    fn clear_failures(&self) {
        self.fail_employees.lock().unwrap().clear();
    }

    fn set_unreachable(&self, unreachable: bool) {
        *self.unreachable.lock().unwrap() = unreachable;
    }

    fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl DeviceAdapter for ScriptedAdapter {
    fn vendor(&self) -> &'static str {
        "scripted"
    }

    async fn send_command(
        &self,
        _target: &AdapterTarget,
        request: &CommandRequest,
    ) -> AdapterResult<CommandOutcome> {
        if *self.unreachable.lock().unwrap() {
            return Err(AdapterError::Connection("host unreachable".into()));
        }

        let employee_id = request.parameters["employee_id"]
            .as_str()
            .unwrap_or_default()
            .to_string();
        self.calls
            .lock()
            .unwrap()
            .push((request.command.clone(), employee_id.clone()));

        if self.fail_employees.lock().unwrap().contains(&employee_id) {
            return Ok(CommandOutcome::failed(
                json!({ "reason": "device rejected person record" }),
            ));
        }
        Ok(CommandOutcome::ok())
    }

    async fn test_connection(&self, _target: &AdapterTarget) -> bool {
        !*self.unreachable.lock().unwrap()
    }

    async fn device_info(&self, _target: &AdapterTarget) -> AdapterResult<DeviceInfo> {
        Ok(DeviceInfo::default())
    }

    async fn device_health(&self, _target: &AdapterTarget) -> AdapterResult<DeviceHealth> {
        Ok(DeviceHealth {
            state: HealthState::Healthy,
            uptime_secs: Some(1),
            issues: Vec::new(),
        })
    }

    async fn get_configuration(&self, _target: &AdapterTarget) -> AdapterResult<Value> {
        Ok(Value::Null)
    }

    async fn update_configuration(
        &self,
        _target: &AdapterTarget,
        _configuration: &Value,
    ) -> AdapterResult<()> {
        Ok(())
    }

    async fn webhook_configurations(
        &self,
        _target: &AdapterTarget,
    ) -> AdapterResult<Vec<EventHostSpec>> {
        Ok(Vec::new())
    }

    async fn configure_event_host(
        &self,
        _target: &AdapterTarget,
        _spec: &EventHostSpec,
    ) -> AdapterResult<()> {
        Ok(())
    }

    async fn delete_webhooks(&self, _target: &AdapterTarget) -> AdapterResult<()> {
        Ok(())
    }

    fn supports_webhooks(&self) -> bool {
        true
    }

    async fn discover_devices(&self) -> AdapterResult<Vec<DeviceInfo>> {
        Ok(Vec::new())
    }
}

struct Harness {
    engine: ReconciliationEngine,
    service: Arc<DeviceService>,
    directory: Arc<InMemoryDirectory>,
    adapter: Arc<ScriptedAdapter>,
    device_id: String,
}

async fn harness() -> Harness {
    let adapter = Arc::new(ScriptedAdapter::default());

    let registry = Arc::new(DeviceRegistry::new(CryptoService::generate_random()));
    let mut adapters = AdapterRegistry::with_default_adapters(Duration::from_secs(1));
    // The device below classifies as Hikvision; route that kind to the
    // scripted adapter
    adapters.register(AdapterKind::Hikvision, adapter.clone());

    let device = registry
        .register_device(DeviceSpec {
            organization_id: "org-1".to_string(),
            name: "Front Door".to_string(),
            host: "192.168.1.50".to_string(),
            port: 80,
            protocol: Protocol::Http,
            username: "admin".to_string(),
            password: Some("pass".to_string()),
            manufacturer: "Hikvision".to_string(),
            model: "DS-K1T341AM".to_string(),
            kind: DeviceKind::FaceTerminal,
        })
        .await
        .unwrap();

    let service = Arc::new(DeviceService::new(
        registry,
        Arc::new(adapters),
        EventBus::new(),
    ));
    let directory = Arc::new(InMemoryDirectory::new());
    let engine = ReconciliationEngine::with_backoff(
        service.clone(),
        directory.clone(),
        Arc::new(SyncLedger::new()),
        EventBus::new(),
        BackoffPolicy::new(Duration::from_millis(1), Duration::from_millis(4)),
    );

    Harness {
        engine,
        service,
        directory,
        adapter,
        device_id: device.device_id,
    }
}

fn employee(id: &str, credentials: Vec<EmployeeCredential>) -> Employee {
    Employee {
        employee_id: id.to_string(),
        name: format!("Employee {}", id),
        organization_id: "org-1".to_string(),
        department_id: Some("dep-1".to_string()),
        branch_id: None,
        is_active: true,
        credentials,
    }
}

fn card_employee(id: &str) -> Employee {
    employee(
        id,
        vec![EmployeeCredential {
            credential_type: CredentialType::Card,
            value: format!("card-{}", id),
            is_active: true,
        }],
    )
}

fn ids(ids: &[&str]) -> DesiredSet {
    DesiredSet::Employees {
        ids: ids.iter().map(|s| s.to_string()).collect(),
    }
}

#[tokio::test]
async fn test_sync_is_idempotent_by_default() {
    let h = harness().await;
    for id in ["e1", "e2"] {
        h.directory.insert(card_employee(id)).await;
    }

    let first = h
        .engine
        .sync_employees(&h.device_id, ids(&["e1", "e2"]), SyncOptions::default())
        .await
        .unwrap();
    assert_eq!(first.added, 2);
    assert_eq!(first.failed, 0);

    // Second pass with the same desired set: nothing to do
    let second = h
        .engine
        .sync_employees(&h.device_id, ids(&["e1", "e2"]), SyncOptions::default())
        .await
        .unwrap();
    assert_eq!(second.added, 0);
    assert_eq!(second.updated, 0);
    assert_eq!(second.removed, 0);
    assert_eq!(second.failed, 0);

    // Exactly two device writes happened in total
    assert_eq!(h.adapter.calls().len(), 2);
}

#[tokio::test]
async fn test_force_sync_updates_synced_employees() {
    let h = harness().await;
    for id in ["e1", "e2"] {
        h.directory.insert(card_employee(id)).await;
    }

    h.engine
        .sync_employees(&h.device_id, ids(&["e1", "e2"]), SyncOptions::default())
        .await
        .unwrap();

    let forced = h
        .engine
        .sync_employees(
            &h.device_id,
            ids(&["e1", "e2"]),
            SyncOptions {
                force_sync: true,
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(forced.added, 0);
    assert_eq!(forced.updated, 2);

    let update_calls = h
        .adapter
        .calls()
        .iter()
        .filter(|(command, _)| command == "person.update")
        .count();
    assert_eq!(update_calls, 2);
}

#[tokio::test]
async fn test_partial_failure_isolation() {
    let h = harness().await;
    for id in ["e1", "e2", "e3"] {
        h.directory.insert(card_employee(id)).await;
    }
    h.adapter.fail_employee("e2");

    let report = h
        .engine
        .sync_employees(&h.device_id, ids(&["e1", "e2", "e3"]), SyncOptions::default())
        .await
        .unwrap();

    // One failure never aborts the rest
    assert_eq!(report.added, 2);
    assert_eq!(report.failed, 1);
    assert_eq!(report.pushed.len(), 3);

    // Every employee reached a terminal state, and the aggregate failed
    // count equals the number of FAILED rows
    let status = h.engine.sync_status(&h.device_id).await.unwrap();
    assert_eq!(status.total, 3);
    assert_eq!(status.synced, 2);
    assert_eq!(status.failed, report.failed);

    let failed_row = h.engine.ledger().get(&h.device_id, "e2").await.unwrap();
    assert_eq!(failed_row.status, SyncStatus::Failed);
    assert!(failed_row.error_message.is_some());
}

#[tokio::test]
async fn test_retry_converges_once_cause_is_resolved() {
    let h = harness().await;
    for id in ["e1", "e2", "e3"] {
        h.directory.insert(card_employee(id)).await;
        h.adapter.fail_employee(id);
    }

    h.engine
        .sync_employees(&h.device_id, ids(&["e1", "e2", "e3"]), SyncOptions::default())
        .await
        .unwrap();
    assert_eq!(h.engine.ledger().failed_records(&h.device_id).await.len(), 3);

    // Cause resolved: every retry recovers
    h.adapter.clear_failures();
    let report = h.engine.retry_failed(&h.device_id).await.unwrap();
    assert_eq!(report.retried, 3);
    assert_eq!(report.recovered, 3);
    assert_eq!(report.still_failed, 0);

    assert!(h.engine.ledger().failed_records(&h.device_id).await.is_empty());
    let status = h.engine.sync_status(&h.device_id).await.unwrap();
    assert_eq!(status.synced, 3);
}

#[tokio::test]
async fn test_retry_refreshes_error_when_still_failing() {
    let h = harness().await;
    h.directory.insert(card_employee("e1")).await;
    h.adapter.fail_employee("e1");

    h.engine
        .sync_employees(&h.device_id, ids(&["e1"]), SyncOptions::default())
        .await
        .unwrap();
    let before = h.engine.ledger().get(&h.device_id, "e1").await.unwrap();

    // Device now unreachable: the retry fails differently but stays FAILED
    h.adapter.set_unreachable(true);
    let report = h.engine.retry_failed(&h.device_id).await.unwrap();
    assert_eq!(report.recovered, 0);
    assert_eq!(report.still_failed, 1);

    let after = h.engine.ledger().get(&h.device_id, "e1").await.unwrap();
    assert_eq!(after.status, SyncStatus::Failed);
    assert!(after.sync_attempted >= before.sync_attempted);
    assert!(after
        .error_message
        .as_deref()
        .unwrap()
        .contains("Connect"));
}

#[tokio::test]
async fn test_remove_missing_is_gated() {
    let h = harness().await;
    for id in ["e1", "e2"] {
        h.directory.insert(card_employee(id)).await;
    }

    h.engine
        .sync_employees(&h.device_id, ids(&["e1", "e2"]), SyncOptions::default())
        .await
        .unwrap();

    // However many passes run without remove_missing, e1 stays
    for _ in 0..3 {
        let report = h
            .engine
            .sync_employees(&h.device_id, ids(&["e2"]), SyncOptions::default())
            .await
            .unwrap();
        assert_eq!(report.removed, 0);
        assert!(h.engine.ledger().get(&h.device_id, "e1").await.is_some());
    }

    // Explicit opt-in removes it
    let report = h
        .engine
        .sync_employees(
            &h.device_id,
            ids(&["e2"]),
            SyncOptions {
                remove_missing: true,
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(report.removed, 1);
    assert!(h.engine.ledger().get(&h.device_id, "e1").await.is_none());
}

#[tokio::test]
async fn test_two_pass_scenario() {
    let h = harness().await;
    for id in ["e1", "e2", "e3"] {
        h.directory.insert(card_employee(id)).await;
    }

    // Pass 1: empty ledger, desired {e1, e2}
    let first = h
        .engine
        .sync_employees(&h.device_id, ids(&["e1", "e2"]), SyncOptions::default())
        .await
        .unwrap();
    assert_eq!(
        (first.added, first.updated, first.removed, first.failed),
        (2, 0, 0, 0)
    );
    let status = h.engine.sync_status(&h.device_id).await.unwrap();
    assert_eq!(status.synced, 2);

    // Pass 2: desired {e2, e3} with remove_missing; e2 is untouched
    // because force_sync is off
    let second = h
        .engine
        .sync_employees(
            &h.device_id,
            ids(&["e2", "e3"]),
            SyncOptions {
                remove_missing: true,
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(
        (second.added, second.updated, second.removed, second.failed),
        (1, 0, 1, 0)
    );

    let calls = h.adapter.calls();
    assert!(calls.contains(&("person.remove".to_string(), "e1".to_string())));
    // e2 was never re-pushed
    assert_eq!(
        calls
            .iter()
            .filter(|(_, employee)| employee == "e2")
            .count(),
        1
    );
}

#[tokio::test]
async fn test_credential_filter_restricts_population_and_payload() {
    let h = harness().await;
    h.directory
        .insert(employee(
            "face-1",
            vec![
                EmployeeCredential {
                    credential_type: CredentialType::Face,
                    value: "template-1".to_string(),
                    is_active: true,
                },
                EmployeeCredential {
                    credential_type: CredentialType::Card,
                    value: "0042".to_string(),
                    is_active: true,
                },
            ],
        ))
        .await;
    h.directory.insert(card_employee("card-1")).await;

    let report = h
        .engine
        .sync_employees(
            &h.device_id,
            ids(&["face-1", "card-1"]),
            SyncOptions::for_credential(CredentialType::Face),
        )
        .await
        .unwrap();

    // Card-only employee excluded entirely
    assert_eq!(report.added, 1);
    assert_eq!(report.pushed.len(), 1);
    assert_eq!(report.pushed[0].employee_id, "face-1");
    // Only the face credential went over the wire
    assert_eq!(report.pushed[0].credentials.len(), 1);
    assert_eq!(report.pushed[0].credentials[0]["type"], "face");

    assert!(h.engine.ledger().get(&h.device_id, "card-1").await.is_none());
}

#[tokio::test]
async fn test_inactive_device_rejects_sync_and_retry() {
    use warden_devices::DeviceUpdate;

    let h = harness().await;
    h.directory.insert(card_employee("e1")).await;

    h.service
        .registry()
        .update_device(
            &h.device_id,
            DeviceUpdate {
                is_active: Some(false),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let sync = h
        .engine
        .sync_employees(&h.device_id, ids(&["e1"]), SyncOptions::default())
        .await;
    assert!(matches!(sync, Err(warden_core::Error::Inactive(_))));

    let retry = h.engine.retry_failed(&h.device_id).await;
    assert!(matches!(retry, Err(warden_core::Error::Inactive(_))));

    // Nothing touched the adapter
    assert!(h.adapter.calls().is_empty());
}

#[tokio::test]
async fn test_parallel_syncs_on_same_device_serialize() {
    let h = harness().await;
    for id in ["e1", "e2", "e3", "e4"] {
        h.directory.insert(card_employee(id)).await;
    }

    let engine = Arc::new(h.engine);
    let device_id = h.device_id.clone();

    let (a, b) = tokio::join!(
        engine.sync_employees(&device_id, ids(&["e1", "e2"]), SyncOptions::default()),
        engine.sync_employees(&device_id, ids(&["e3", "e4"]), SyncOptions::default()),
    );
    a.unwrap();
    b.unwrap();

    // Both passes completed and every employee reached a terminal state
    let status = engine.sync_status(&device_id).await.unwrap();
    assert_eq!(status.total, 4);
    assert_eq!(status.synced, 4);
}
