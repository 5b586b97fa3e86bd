use std::sync::Arc;

use onegate_core::{BoxFuture, Error, PermissionGate, Principal};
use onegate_data::{DataScope, ScopeSource};

use crate::loaders::RolePermissionsLoader;

/// Role-based permission check: walk the principal's roles (typically 1–3)
/// sequentially and answer true on the first role whose permission map
/// carries the token.
pub struct PermissionChecker {
    loader: Arc<dyn RolePermissionsLoader>,
}

impl PermissionChecker {
    pub fn new(loader: Arc<dyn RolePermissionsLoader>) -> Arc<Self> {
        Arc::new(Self { loader })
    }

    pub async fn has_permission(
        &self,
        principal: &Principal,
        token: &str,
    ) -> Result<bool, Error> {
        if principal.roles.is_empty() {
            return Ok(false);
        }
        for role in &principal.roles {
            let permissions = self.loader.load_permissions(role).await?;
            if permissions.contains_key(token) {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

impl PermissionGate for PermissionChecker {
    fn check<'a>(
        &'a self,
        principal: &'a Principal,
        token: &'a str,
    ) -> BoxFuture<'a, Result<bool, Error>> {
        Box::pin(self.has_permission(principal, token))
    }
}

/// Resolves the data scope to apply for `(principal, token)`: collect every
/// matching scope across the principal's roles and keep the one with the
/// highest priority. Among equal priorities the first role's scope wins.
///
/// `None` means the framework adds no row filtering of its own.
pub struct DataPermissionResolver {
    loader: Arc<dyn RolePermissionsLoader>,
}

impl DataPermissionResolver {
    pub fn new(loader: Arc<dyn RolePermissionsLoader>) -> Arc<Self> {
        Arc::new(Self { loader })
    }

    pub async fn resolve(
        &self,
        principal: &Principal,
        token: &str,
    ) -> Result<Option<Arc<dyn DataScope>>, Error> {
        let mut best: Option<Arc<dyn DataScope>> = None;
        for role in &principal.roles {
            let permissions = self.loader.load_permissions(role).await?;
            if let Some(scope) = permissions.get(token) {
                let wins = match &best {
                    None => true,
                    Some(current) => scope.priority() > current.priority(),
                };
                if wins {
                    best = Some(scope.clone());
                }
            }
        }
        Ok(best)
    }
}

impl ScopeSource for DataPermissionResolver {
    fn resolve_data_scope<'a>(
        &'a self,
        principal: &'a Principal,
        token: &'a str,
    ) -> BoxFuture<'a, Result<Option<Arc<dyn DataScope>>, Error>> {
        Box::pin(self.resolve(principal, token))
    }
}
