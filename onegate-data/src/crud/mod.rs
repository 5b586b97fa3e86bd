//! The generic CRUD operation family.
//!
//! Each builder is generic over a model and, where relevant, a search or
//! mutation parameter type. Builders implement
//! [`SpecProvider`](onegate_core::SpecProvider), so a resource registers
//! them directly; the action name and a default `<resource>:<verb>`
//! permission token are derived at registration.

mod options;
mod porting;
mod read;
mod tree;
mod write;

pub use options::{FindOptions, FindTreeOptions, OptionItem, OptionNode, OptionsMapping};
pub use porting::{Export, ExportFormat, Import};
pub use read::{FindAll, FindOne, FindPage};
pub use tree::{build_forest, FindTree, TreeNode};
pub use write::{Create, CreateMany, Delete, DeleteMany, Update, UpdateMany};

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;

use onegate_core::{BoxFuture, Error, IdGenerator, RpcContext};

use crate::condition::ConditionBuilder;
use crate::db::{Database, JsonRow};
use crate::entity::{audit, Entity};
use crate::query_config::{QueryConfig, QueryPart};
use crate::scope::{apply_scope, ScopeHandle};
use crate::search::{plan_for, SearchParams, SearchPlan};
use crate::select::SelectBuilder;
use crate::value::SqlValue;

/// Parts collected by non-tree builders; `Recursive` entries are ignored.
pub(crate) const FLAT_PARTS: &[QueryPart] = &[QueryPart::Root, QueryPart::Base, QueryPart::All];

/// Post-query row processor (default: identity).
pub(crate) type Processor<M> =
    Arc<dyn Fn(RpcContext, Vec<M>) -> BoxFuture<'static, Result<Vec<M>, Error>> + Send + Sync>;

pub(crate) fn make_processor<M, F, Fut>(f: F) -> Processor<M>
where
    F: Fn(RpcContext, Vec<M>) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Result<Vec<M>, Error>> + Send + 'static,
{
    Arc::new(move |ctx, models| Box::pin(f(ctx, models)))
}

pub(crate) async fn run_processor<M>(
    processor: &Option<Processor<M>>,
    ctx: &RpcContext,
    models: Vec<M>,
) -> Result<Vec<M>, Error> {
    match processor {
        Some(p) => p(ctx.clone(), models).await,
        None => Ok(models),
    }
}

/// Shared metadata every builder carries: action override, permission
/// override, public/audit flags.
#[derive(Clone, Default)]
pub(crate) struct BuilderMeta {
    pub action: Option<String>,
    pub permission: Option<String>,
    pub public: bool,
    pub audit: bool,
}

impl BuilderMeta {
    pub(crate) fn spec(
        &self,
        verb: &str,
        resource: &str,
        spec: onegate_core::Spec,
    ) -> onegate_core::Spec {
        let mut spec = spec;
        if self.public {
            spec = spec.public_access();
        } else {
            let token = self
                .permission
                .clone()
                .unwrap_or_else(|| format!("{resource}:{verb}"));
            spec = spec.permission(token);
        }
        if self.audit {
            spec = spec.audited();
        }
        spec
    }

    pub(crate) fn action<'a>(&'a self, default_action: &'a str) -> &'a str {
        self.action.as_deref().unwrap_or(default_action)
    }
}

/// Compile the search plan for `P` and fold it, together with configured
/// predicates, into a condition builder.
pub(crate) fn search_conditions(
    plan: &SearchPlan,
    config: &QueryConfig,
    parts: &[QueryPart],
    ctx: &RpcContext,
) -> ConditionBuilder {
    let mut builder = ConditionBuilder::new();
    plan.apply(ctx.params(), &mut builder);
    config.apply_predicates(parts, &mut builder);
    builder
}

pub(crate) fn compile_plan<P: SearchParams>() -> Result<Arc<SearchPlan>, Error> {
    plan_for::<P>()
}

/// Assemble the flat (non-tree) SELECT for a read operation.
pub(crate) fn flat_query<M: Entity>(
    config: &QueryConfig,
    conditions: ConditionBuilder,
    db: &Database,
) -> SelectBuilder {
    let mut query = SelectBuilder::new(M::table_name()).dialect(db.dialect());
    for column in config.columns_for(FLAT_PARTS) {
        query = query.column(column);
    }
    for join in config.relations_for(FLAT_PARTS) {
        query = query.join(join);
    }
    query = query.maybe_where(conditions.build());
    for sort in config.sorts_for(FLAT_PARTS) {
        query = query.sort(sort);
    }
    config.run_appliers(FLAT_PARTS, query)
}

/// Resolve and apply the caller's data scope for the current definition's
/// permission token. No principal, no token or no resolver means no
/// framework-added filtering.
pub(crate) async fn scoped(
    ctx: &RpcContext,
    table: &str,
    query: SelectBuilder,
) -> Result<SelectBuilder, Error> {
    let Some(principal) = ctx.principal() else {
        return Ok(query);
    };
    let Some(token) = ctx.definition().permission.clone() else {
        return Ok(query);
    };
    let Some(handle) = ctx.injector().try_get::<ScopeHandle>() else {
        return Ok(query);
    };
    match handle.0.resolve_data_scope(principal, &token).await? {
        Some(scope) => Ok(apply_scope(scope.as_ref(), principal, table, query)),
        None => Ok(query),
    }
}

pub(crate) fn decode_models<M: DeserializeOwned>(rows: Vec<JsonRow>) -> Result<Vec<M>, Error> {
    rows.into_iter()
        .map(|row| {
            serde_json::from_value(Value::Object(row))
                .map_err(|e| Error::internal("failed to decode row into model").with_cause(e))
        })
        .collect()
}

pub(crate) fn count_from_rows(rows: &[JsonRow]) -> u64 {
    let Some(row) = rows.first() else { return 0 };
    let value = row.get("count").or_else(|| row.values().next());
    match value {
        Some(Value::Number(n)) => n.as_u64().unwrap_or(0),
        Some(Value::String(s)) => s.parse().unwrap_or(0),
        _ => 0,
    }
}

// ── Write-path helpers ──────────────────────────────────────────────────────

pub(crate) fn object_of<P: serde::Serialize>(params: &P) -> Result<JsonRow, Error> {
    match serde_json::to_value(params)? {
        Value::Object(map) => Ok(map),
        _ => Err(Error::validation("mutation params must be an object")),
    }
}

fn has_column<M: Entity>(column: &str) -> bool {
    M::columns().contains(&column)
}

fn is_missing_id(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.is_empty(),
        Some(Value::Number(n)) => n.as_i64() == Some(0),
        _ => false,
    }
}

/// Stamp a fresh object for insert: strip scan-only columns, assign an id
/// when absent (through the injected [`IdGenerator`]), and write the
/// creation/update audit columns.
pub(crate) fn prepare_insert<M: Entity>(ctx: &RpcContext, mut obj: JsonRow) -> JsonRow {
    for column in M::scan_only_columns() {
        obj.remove(*column);
    }

    let id_column = M::id_column();
    if is_missing_id(obj.get(id_column)) {
        if let Some(generator) = ctx.injector().try_get::<IdGenerator>() {
            obj.insert(id_column.to_string(), Value::from(generator.next_id()));
        }
    }

    let now = chrono::Utc::now().to_rfc3339();
    let by = ctx.principal().map(|p| p.id.clone());
    if has_column::<M>(audit::CREATED_AT) {
        obj.insert(audit::CREATED_AT.to_string(), Value::from(now.clone()));
    }
    if has_column::<M>(audit::UPDATED_AT) {
        obj.insert(audit::UPDATED_AT.to_string(), Value::from(now));
    }
    if let Some(by) = by {
        if has_column::<M>(audit::CREATED_BY) {
            obj.insert(audit::CREATED_BY.to_string(), Value::from(by.clone()));
        }
        if has_column::<M>(audit::UPDATED_BY) {
            obj.insert(audit::UPDATED_BY.to_string(), Value::from(by));
        }
    }

    if let Some(version) = M::version_column() {
        obj.entry(version.to_string()).or_insert(Value::from(0));
    }

    obj
}

/// Merge update params over the loaded row: provided non-null keys
/// overwrite, except the primary key, creation audit and scan-only columns,
/// which stay immutable. Update audit columns are rewritten.
pub(crate) fn prepare_update<M: Entity>(
    ctx: &RpcContext,
    existing: &JsonRow,
    params: &JsonRow,
) -> JsonRow {
    let mut obj = existing.clone();
    for (key, value) in params {
        if value.is_null() {
            continue;
        }
        if key == M::id_column()
            || key == audit::CREATED_AT
            || key == audit::CREATED_BY
            || M::scan_only_columns().contains(&key.as_str())
            || Some(key.as_str()) == M::version_column()
        {
            continue;
        }
        obj.insert(key.clone(), value.clone());
    }
    for column in M::scan_only_columns() {
        obj.remove(*column);
    }

    if has_column::<M>(audit::UPDATED_AT) {
        obj.insert(
            audit::UPDATED_AT.to_string(),
            Value::from(chrono::Utc::now().to_rfc3339()),
        );
    }
    if let Some(principal) = ctx.principal() {
        if has_column::<M>(audit::UPDATED_BY) {
            obj.insert(audit::UPDATED_BY.to_string(), Value::from(principal.id.clone()));
        }
    }

    obj
}

pub(crate) fn decode_model<M: DeserializeOwned>(obj: &JsonRow) -> Result<M, Error> {
    serde_json::from_value(Value::Object(obj.clone()))
        .map_err(|e| Error::validation(format!("params do not map onto the model: {e}")))
}

pub(crate) fn insert_statement<M: Entity>(
    obj: &JsonRow,
    dialect: crate::select::Dialect,
) -> (String, Vec<SqlValue>) {
    let mut columns = Vec::new();
    let mut values = Vec::new();
    for column in M::columns() {
        if M::scan_only_columns().contains(column) {
            continue;
        }
        if let Some(value) = obj.get(*column) {
            if value.is_null() {
                continue;
            }
            columns.push(*column);
            values.push(SqlValue::from_json(value));
        }
    }

    let placeholders: Vec<String> = (1..=values.len())
        .map(|i| match dialect {
            crate::select::Dialect::Postgres => format!("${i}"),
            _ => "?".to_string(),
        })
        .collect();

    let sql = format!(
        "INSERT INTO {} ({}) VALUES ({})",
        M::table_name(),
        columns.join(", "),
        placeholders.join(", ")
    );
    (sql, values)
}

/// Load one row by primary key; absent rows are a 1404.
pub(crate) async fn load_by_id<M: Entity>(
    db: &Database,
    id: &Value,
) -> Result<JsonRow, Error> {
    let query = SelectBuilder::new(M::table_name())
        .dialect(db.dialect())
        .and_where(crate::condition::Predicate::Cmp {
            column: M::id_column().to_string(),
            op: crate::condition::CmpOp::Eq,
            value: SqlValue::from_json(id),
        })
        .limit(1);
    let (sql, params) = query.build_select();
    db.fetch_one(&sql, &params)
        .await?
        .ok_or_else(|| Error::record_not_found(M::table_name()))
}

/// Pull the primary key out of a params object. Looks for the entity's id
/// column under its declared and camelCase names.
pub(crate) fn id_from_params<M: Entity>(params: &JsonRow) -> Result<Value, Error> {
    let id_column = M::id_column();
    let value = params
        .get(id_column)
        .or_else(|| params.get(&crate::search::to_camel_case(id_column)));
    match value {
        Some(v) if !is_missing_id(Some(v)) => Ok(v.clone()),
        _ => Err(Error::validation(format!(
            "mutation params must carry the primary key '{id_column}'"
        ))),
    }
}
