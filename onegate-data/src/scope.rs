use std::sync::Arc;

use onegate_core::{BoxFuture, Error, Principal};

use crate::condition::Predicate;
use crate::select::SelectBuilder;

/// Well-known data-scope priorities. The resolver picks the matching scope
/// with the highest priority across the principal's roles.
pub mod priority {
    pub const SELF: i32 = 10;
    pub const DEPARTMENT: i32 = 20;
    pub const DEPARTMENT_AND_SUB: i32 = 30;
    pub const ORGANIZATION: i32 = 40;
    pub const ORGANIZATION_AND_SUB: i32 = 50;
    pub const CUSTOM: i32 = 60;
    pub const ALL: i32 = 10_000;
}

/// Row-level visibility policy attached to a permission token.
///
/// Applied by the CRUD builders right before query execution. When
/// [`supports`](DataScope::supports) rejects the pair, application
/// fail-closes: a predicate excluding all rows is added instead.
pub trait DataScope: Send + Sync {
    fn key(&self) -> &str;

    fn priority(&self) -> i32;

    fn supports(&self, _principal: &Principal, _table: &str) -> bool {
        true
    }

    /// Add the scope's WHERE conjunct to the query.
    fn apply(&self, principal: &Principal, query: SelectBuilder) -> SelectBuilder;
}

/// No additional filtering.
pub struct AllScope;

impl DataScope for AllScope {
    fn key(&self) -> &str {
        "all"
    }

    fn priority(&self) -> i32 {
        priority::ALL
    }

    fn apply(&self, _principal: &Principal, query: SelectBuilder) -> SelectBuilder {
        query
    }
}

/// Rows created by the caller: `created_by = principal.id` on the audit
/// column, or a configured one.
pub struct SelfScope {
    column: String,
}

impl SelfScope {
    pub fn new() -> Self {
        Self {
            column: crate::entity::audit::CREATED_BY.to_string(),
        }
    }

    pub fn on_column(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
        }
    }
}

impl Default for SelfScope {
    fn default() -> Self {
        Self::new()
    }
}

impl DataScope for SelfScope {
    fn key(&self) -> &str {
        "self"
    }

    fn priority(&self) -> i32 {
        priority::SELF
    }

    fn apply(&self, principal: &Principal, query: SelectBuilder) -> SelectBuilder {
        query.and_where(Predicate::eq(self.column.clone(), principal.id.clone()))
    }
}

/// Resolution of the applicable scope for `(principal, permission token)`.
/// Implemented by the security crate over the role-permissions loader.
pub trait ScopeSource: Send + Sync {
    fn resolve_data_scope<'a>(
        &'a self,
        principal: &'a Principal,
        token: &'a str,
    ) -> BoxFuture<'a, Result<Option<Arc<dyn DataScope>>, Error>>;
}

/// Clonable injector handle to the configured [`ScopeSource`].
#[derive(Clone)]
pub struct ScopeHandle(pub Arc<dyn ScopeSource>);

/// Apply a resolved scope to a query, fail-closed on unsupported pairs.
pub fn apply_scope(
    scope: &dyn DataScope,
    principal: &Principal,
    table: &str,
    query: SelectBuilder,
) -> SelectBuilder {
    if !scope.supports(principal, table) {
        query.and_where(Predicate::none())
    } else {
        scope.apply(principal, query)
    }
}
