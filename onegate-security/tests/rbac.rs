use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use onegate_core::{Error, Principal};
use onegate_data::{priority, DataScope, Predicate, SelectBuilder, SelfScope};
use onegate_security::{DataPermissionResolver, PermissionChecker, RolePermissionsLoader};

/// A department scope with priority 20, filtering on `dept_id`.
struct DepartmentScope;

impl DataScope for DepartmentScope {
    fn key(&self) -> &str {
        "department"
    }
    fn priority(&self) -> i32 {
        priority::DEPARTMENT
    }
    fn apply(&self, principal: &Principal, query: SelectBuilder) -> SelectBuilder {
        let dept = principal
            .details
            .get("deptId")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        query.and_where(Predicate::eq("dept_id", dept))
    }
}

struct FixedRoles;

#[async_trait]
impl RolePermissionsLoader for FixedRoles {
    async fn load_permissions(
        &self,
        role: &str,
    ) -> Result<HashMap<String, Arc<dyn DataScope>>, Error> {
        let mut permissions: HashMap<String, Arc<dyn DataScope>> = HashMap::new();
        match role {
            "staff" => {
                permissions.insert("order:view".to_string(), Arc::new(SelfScope::new()));
            }
            "manager" => {
                permissions.insert("order:view".to_string(), Arc::new(DepartmentScope));
                permissions.insert("order:update".to_string(), Arc::new(DepartmentScope));
            }
            _ => {}
        }
        Ok(permissions)
    }
}

fn staff_and_manager() -> Principal {
    Principal::user("u1", "Alice")
        .with_roles(["staff", "manager"])
        .with_details(serde_json::json!({"deptId": "d42"}))
}

#[tokio::test]
async fn permission_check_walks_roles() {
    let checker = PermissionChecker::new(Arc::new(FixedRoles));

    let principal = staff_and_manager();
    assert!(checker.has_permission(&principal, "order:view").await.unwrap());
    assert!(checker
        .has_permission(&principal, "order:update")
        .await
        .unwrap());
    assert!(!checker
        .has_permission(&principal, "order:delete")
        .await
        .unwrap());

    let no_roles = Principal::user("u2", "Bob");
    assert!(!checker.has_permission(&no_roles, "order:view").await.unwrap());
}

#[tokio::test]
async fn highest_priority_scope_wins() {
    let resolver = DataPermissionResolver::new(Arc::new(FixedRoles));
    let principal = staff_and_manager();

    let scope = resolver
        .resolve(&principal, "order:view")
        .await
        .unwrap()
        .expect("a scope must resolve");
    assert_eq!(scope.key(), "department");
    assert_eq!(scope.priority(), priority::DEPARTMENT);

    // Department (20) beats Self (10): the query filters on dept_id, not
    // created_by.
    let (sql, params) = scope
        .apply(&principal, SelectBuilder::new("orders"))
        .build_select();
    assert_eq!(sql, "SELECT * FROM orders WHERE dept_id = ?");
    assert_eq!(
        params,
        vec![onegate_data::SqlValue::Text("d42".to_string())]
    );
}

#[tokio::test]
async fn unmatched_token_resolves_to_none() {
    let resolver = DataPermissionResolver::new(Arc::new(FixedRoles));
    let principal = staff_and_manager();
    assert!(resolver
        .resolve(&principal, "invoice:view")
        .await
        .unwrap()
        .is_none());
}
