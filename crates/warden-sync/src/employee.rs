//! Employee and credential records.
//!
//! These are consumed from the surrounding directory product, not owned
//! here: the engine never creates or mutates employees, it only reads the
//! desired population for a device through [`EmployeeDirectory`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;

use warden_core::Result;

/// Credential type carried by an employee.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CredentialType {
    Face,
    Card,
    Fingerprint,
    Pin,
    Qr,
}

impl CredentialType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Face => "face",
            Self::Card => "card",
            Self::Fingerprint => "fingerprint",
            Self::Pin => "pin",
            Self::Qr => "qr",
        }
    }
}

/// A typed credential, independently activatable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmployeeCredential {
    pub credential_type: CredentialType,
    /// Card number, face template reference, fingerprint template, ...
    pub value: String,
    pub is_active: bool,
}

/// An employee as supplied by the external directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Employee {
    pub employee_id: String,
    pub name: String,
    pub organization_id: String,
    #[serde(default)]
    pub department_id: Option<String>,
    #[serde(default)]
    pub branch_id: Option<String>,
    pub is_active: bool,
    #[serde(default)]
    pub credentials: Vec<EmployeeCredential>,
}

impl Employee {
    /// Active credentials only; inactive ones are never pushed to devices.
    pub fn active_credentials(&self) -> Vec<&EmployeeCredential> {
        self.credentials.iter().filter(|c| c.is_active).collect()
    }

    /// Whether the employee holds an active credential of the given type.
    pub fn has_active_credential(&self, credential_type: CredentialType) -> bool {
        self.credentials
            .iter()
            .any(|c| c.is_active && c.credential_type == credential_type)
    }
}

/// The external employee directory the engine reads desired populations
/// from.
#[async_trait]
pub trait EmployeeDirectory: Send + Sync {
    /// Fetch employees by explicit ids. Unknown ids are skipped.
    async fn employees_by_ids(&self, ids: &[String]) -> Result<Vec<Employee>>;

    /// All active employees in a department.
    async fn employees_in_department(&self, department_id: &str) -> Result<Vec<Employee>>;

    /// All active employees in a branch.
    async fn employees_in_branch(&self, branch_id: &str) -> Result<Vec<Employee>>;

    /// All active employees in an organization.
    async fn employees_in_organization(&self, organization_id: &str) -> Result<Vec<Employee>>;
}

/// In-memory directory, used by tests and as a seam for embedding.
#[derive(Default)]
pub struct InMemoryDirectory {
    employees: RwLock<HashMap<String, Employee>>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, employee: Employee) {
        let mut employees = self.employees.write().await;
        employees.insert(employee.employee_id.clone(), employee);
    }

    pub async fn remove(&self, employee_id: &str) {
        let mut employees = self.employees.write().await;
        employees.remove(employee_id);
    }
}

#[async_trait]
impl EmployeeDirectory for InMemoryDirectory {
    async fn employees_by_ids(&self, ids: &[String]) -> Result<Vec<Employee>> {
        let employees = self.employees.read().await;
        Ok(ids
            .iter()
            .filter_map(|id| employees.get(id).cloned())
            .collect())
    }

    async fn employees_in_department(&self, department_id: &str) -> Result<Vec<Employee>> {
        let employees = self.employees.read().await;
        Ok(employees
            .values()
            .filter(|e| e.is_active && e.department_id.as_deref() == Some(department_id))
            .cloned()
            .collect())
    }

    async fn employees_in_branch(&self, branch_id: &str) -> Result<Vec<Employee>> {
        let employees = self.employees.read().await;
        Ok(employees
            .values()
            .filter(|e| e.is_active && e.branch_id.as_deref() == Some(branch_id))
            .cloned()
            .collect())
    }

    async fn employees_in_organization(&self, organization_id: &str) -> Result<Vec<Employee>> {
        let employees = self.employees.read().await;
        Ok(employees
            .values()
            .filter(|e| e.is_active && e.organization_id == organization_id)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn employee_with_credentials(credentials: Vec<EmployeeCredential>) -> Employee {
        Employee {
            employee_id: "emp-1".to_string(),
            name: "Ada".to_string(),
            organization_id: "org-1".to_string(),
            department_id: Some("dep-1".to_string()),
            branch_id: None,
            is_active: true,
            credentials,
        }
    }

    #[test]
    fn test_active_credential_filtering() {
        let employee = employee_with_credentials(vec![
            EmployeeCredential {
                credential_type: CredentialType::Face,
                value: "face-template-1".to_string(),
                is_active: true,
            },
            EmployeeCredential {
                credential_type: CredentialType::Card,
                value: "0042".to_string(),
                is_active: false,
            },
        ]);

        assert_eq!(employee.active_credentials().len(), 1);
        assert!(employee.has_active_credential(CredentialType::Face));
        // Inactive card does not count
        assert!(!employee.has_active_credential(CredentialType::Card));
    }

    #[tokio::test]
    async fn test_directory_scopes() {
        let directory = InMemoryDirectory::new();
        directory
            .insert(employee_with_credentials(Vec::new()))
            .await;

        let by_ids = directory
            .employees_by_ids(&["emp-1".to_string(), "missing".to_string()])
            .await
            .unwrap();
        assert_eq!(by_ids.len(), 1);

        assert_eq!(
            directory
                .employees_in_department("dep-1")
                .await
                .unwrap()
                .len(),
            1
        );
        assert!(directory
            .employees_in_branch("branch-1")
            .await
            .unwrap()
            .is_empty());
        assert_eq!(
            directory
                .employees_in_organization("org-1")
                .await
                .unwrap()
                .len(),
            1
        );
    }
}
