use std::marker::PhantomData;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};

use onegate_core::{Error, Json, Params, RpcContext, Spec, SpecProvider};

use crate::db::{Database, DbTransaction, JsonRow};
use crate::entity::{CrudModel, Entity};
use crate::hooks::{CreateHooks, DeleteHooks, NoHooks, UpdateHooks};
use crate::value::SqlValue;

use super::{
    decode_model, id_from_params, insert_statement, load_by_id, object_of, prepare_insert,
    prepare_update, BuilderMeta,
};

/// Roll back and surface the original error.
async fn fail(tx: Box<dyn DbTransaction>, err: Error) -> Error {
    if let Err(rollback_err) = tx.rollback().await {
        tracing_rollback_failure(&rollback_err);
    }
    err
}

fn tracing_rollback_failure(err: &Error) {
    // The original failure is what callers see; the rollback failure only
    // reaches the logs.
    tracing::error!(code = err.code(), error = %err, "transaction rollback failed");
}

macro_rules! mutation_builder_common {
    () => {
        pub fn action(mut self, action: impl Into<String>) -> Self {
            self.meta.action = Some(action.into());
            self
        }

        pub fn permission(mut self, token: impl Into<String>) -> Self {
            self.meta.permission = Some(token.into());
            self
        }

        pub fn public_access(mut self) -> Self {
            self.meta.public = true;
            self
        }

        pub fn audited(mut self) -> Self {
            self.meta.audit = true;
            self
        }
    };
}

// ── create ──────────────────────────────────────────────────────────────────

/// `create`: map params into a fresh model, stamp id and audit columns,
/// insert inside a transaction with pre/post hooks.
pub struct Create<M, P> {
    meta: BuilderMeta,
    hooks: Arc<dyn CreateHooks<M, P>>,
    _marker: PhantomData<fn() -> (M, P)>,
}

impl<M, P> Create<M, P>
where
    M: CrudModel,
    P: DeserializeOwned + Serialize + garde::Validate + Send + Sync + 'static,
    <P as garde::Validate>::Context: Default,
{
    pub fn new() -> Self {
        Self {
            meta: BuilderMeta::default(),
            hooks: Arc::new(NoHooks),
            _marker: PhantomData,
        }
    }

    pub fn hooks(mut self, hooks: impl CreateHooks<M, P> + 'static) -> Self {
        self.hooks = Arc::new(hooks);
        self
    }

    mutation_builder_common!();
}

impl<M, P> Default for Create<M, P>
where
    M: CrudModel,
    P: DeserializeOwned + Serialize + garde::Validate + Send + Sync + 'static,
    <P as garde::Validate>::Context: Default,
{
    fn default() -> Self {
        Self::new()
    }
}

/// Serialize and insert one model row, returning its primary key. Shared by
/// `create`, `create_many` and the import builder's row loop.
pub(crate) async fn insert_model<M: CrudModel>(
    tx: &mut dyn DbTransaction,
    model: &M,
    dialect: crate::select::Dialect,
) -> Result<Value, Error> {
    let obj = match serde_json::to_value(model) {
        Ok(Value::Object(map)) => map,
        Ok(_) => return Err(Error::internal("model did not serialize to an object")),
        Err(e) => return Err(Error::internal("failed to serialize model").with_cause(e)),
    };
    let (sql, params) = insert_statement::<M>(&obj, dialect);
    tx.execute(&sql, &params).await?;
    Ok(obj.get(M::id_column()).cloned().unwrap_or(Value::Null))
}

impl<M, P> SpecProvider for Create<M, P>
where
    M: CrudModel,
    P: DeserializeOwned + Serialize + garde::Validate + Send + Sync + 'static,
    <P as garde::Validate>::Context: Default,
{
    fn provide(self: Box<Self>, resource: &str) -> Result<Spec, Error> {
        let hooks = self.hooks.clone();

        let handler = move |ctx: RpcContext, db: Database, params: Params<P>| {
            let hooks = hooks.clone();
            async move {
                let obj = prepare_insert::<M>(&ctx, object_of(&params.0)?);
                let mut model: M = decode_model(&obj)?;

                hooks.pre_create(&ctx, &mut model, &params.0).await?;

                let mut tx = db.begin().await?;
                let id = match insert_model(tx.as_mut(), &model, db.dialect()).await {
                    Ok(id) => id,
                    Err(err) => return Err(fail(tx, err).await),
                };
                if let Err(err) = hooks.post_create(&ctx, tx.as_mut(), &model, &params.0).await {
                    return Err(fail(tx, err).await);
                }
                tx.commit().await?;

                Ok(Json(json!({ "id": id })))
            }
        };

        let action = self.meta.action("create").to_string();
        Ok(self
            .meta
            .spec("create", resource, Spec::handler(action, handler)))
    }
}

// ── update ──────────────────────────────────────────────────────────────────

/// `update`: load the existing row by primary key (1404 when missing),
/// merge params, run hooks, update by PK with optional optimistic locking.
pub struct Update<M, P> {
    meta: BuilderMeta,
    hooks: Arc<dyn UpdateHooks<M, P>>,
    _marker: PhantomData<fn() -> (M, P)>,
}

impl<M, P> Update<M, P>
where
    M: CrudModel,
    P: DeserializeOwned + Serialize + garde::Validate + Send + Sync + 'static,
    <P as garde::Validate>::Context: Default,
{
    pub fn new() -> Self {
        Self {
            meta: BuilderMeta::default(),
            hooks: Arc::new(NoHooks),
            _marker: PhantomData,
        }
    }

    pub fn hooks(mut self, hooks: impl UpdateHooks<M, P> + 'static) -> Self {
        self.hooks = Arc::new(hooks);
        self
    }

    mutation_builder_common!();
}

impl<M, P> Default for Update<M, P>
where
    M: CrudModel,
    P: DeserializeOwned + Serialize + garde::Validate + Send + Sync + 'static,
    <P as garde::Validate>::Context: Default,
{
    fn default() -> Self {
        Self::new()
    }
}

fn update_statement<M: Entity>(
    obj: &JsonRow,
    existing_version: Option<i64>,
    id: &Value,
    dialect: crate::select::Dialect,
) -> (String, Vec<SqlValue>) {
    let placeholder = |i: usize| match dialect {
        crate::select::Dialect::Postgres => format!("${i}"),
        _ => "?".to_string(),
    };

    let mut sets = Vec::new();
    let mut params = Vec::new();
    let mut index = 1usize;

    for column in M::columns() {
        if *column == M::id_column()
            || *column == crate::entity::audit::CREATED_AT
            || *column == crate::entity::audit::CREATED_BY
            || M::scan_only_columns().contains(column)
            || Some(*column) == M::version_column()
        {
            continue;
        }
        if let Some(value) = obj.get(*column) {
            sets.push(format!("{column} = {}", placeholder(index)));
            index += 1;
            params.push(SqlValue::from_json(value));
        }
    }

    if let (Some(version_column), Some(version)) = (M::version_column(), existing_version) {
        sets.push(format!("{version_column} = {}", version + 1));
    }

    let mut sql = format!(
        "UPDATE {} SET {} WHERE {} = {}",
        M::table_name(),
        sets.join(", "),
        M::id_column(),
        placeholder(index),
    );
    index += 1;
    params.push(SqlValue::from_json(id));

    if let (Some(version_column), Some(version)) = (M::version_column(), existing_version) {
        sql.push_str(&format!(" AND {version_column} = {}", placeholder(index)));
        params.push(SqlValue::Int(version));
    }

    (sql, params)
}

/// Run one update cycle against a loaded row. Shared by `update` and
/// `update_many`.
pub(crate) async fn update_row<M: CrudModel>(
    tx: &mut dyn DbTransaction,
    new_obj: &JsonRow,
    existing: &JsonRow,
    id: &Value,
    dialect: crate::select::Dialect,
) -> Result<(), Error> {
    let existing_version = M::version_column()
        .and_then(|column| existing.get(column))
        .and_then(Value::as_i64);

    let (sql, params) = update_statement::<M>(new_obj, existing_version, id, dialect);
    let affected = tx.execute(&sql, &params).await?;
    if affected == 0 {
        if M::version_column().is_some() {
            return Err(Error::version_conflict());
        }
        return Err(Error::record_not_found(M::table_name()));
    }
    Ok(())
}

impl<M, P> SpecProvider for Update<M, P>
where
    M: CrudModel,
    P: DeserializeOwned + Serialize + garde::Validate + Send + Sync + 'static,
    <P as garde::Validate>::Context: Default,
{
    fn provide(self: Box<Self>, resource: &str) -> Result<Spec, Error> {
        let hooks = self.hooks.clone();

        let handler = move |ctx: RpcContext, db: Database, params: Params<P>| {
            let hooks = hooks.clone();
            async move {
                let params_obj = object_of(&params.0)?;
                let id = id_from_params::<M>(&params_obj)?;

                let existing = load_by_id::<M>(&db, &id).await?;
                let old: M = decode_model(&existing)?;

                let new_obj = prepare_update::<M>(&ctx, &existing, &params_obj);
                let mut new: M = decode_model(&new_obj)?;

                hooks.pre_update(&ctx, &old, &mut new, &params.0).await?;

                // Hooks may mutate the new model; reserialize before writing.
                let new_obj = match serde_json::to_value(&new) {
                    Ok(Value::Object(map)) => map,
                    _ => return Err(Error::internal("model did not serialize to an object")),
                };

                let mut tx = db.begin().await?;
                if let Err(err) =
                    update_row::<M>(tx.as_mut(), &new_obj, &existing, &id, db.dialect()).await
                {
                    return Err(fail(tx, err).await);
                }
                if let Err(err) = hooks
                    .post_update(&ctx, tx.as_mut(), &old, &new, &params.0)
                    .await
                {
                    return Err(fail(tx, err).await);
                }
                tx.commit().await?;

                Ok(Json(json!({ "id": id })))
            }
        };

        let action = self.meta.action("update").to_string();
        Ok(self
            .meta
            .spec("update", resource, Spec::handler(action, handler)))
    }
}

// ── delete ──────────────────────────────────────────────────────────────────

/// `delete`: load by primary key (1404 when missing), run hooks, delete
/// inside a transaction.
pub struct Delete<M> {
    meta: BuilderMeta,
    hooks: Arc<dyn DeleteHooks<M>>,
    _marker: PhantomData<fn() -> M>,
}

impl<M: CrudModel> Delete<M> {
    pub fn new() -> Self {
        Self {
            meta: BuilderMeta::default(),
            hooks: Arc::new(NoHooks),
            _marker: PhantomData,
        }
    }

    pub fn hooks(mut self, hooks: impl DeleteHooks<M> + 'static) -> Self {
        self.hooks = Arc::new(hooks);
        self
    }

    mutation_builder_common!();
}

impl<M: CrudModel> Default for Delete<M> {
    fn default() -> Self {
        Self::new()
    }
}

fn delete_statement<M: Entity>(id: &Value, dialect: crate::select::Dialect) -> (String, Vec<SqlValue>) {
    let placeholder = match dialect {
        crate::select::Dialect::Postgres => "$1".to_string(),
        _ => "?".to_string(),
    };
    (
        format!(
            "DELETE FROM {} WHERE {} = {placeholder}",
            M::table_name(),
            M::id_column()
        ),
        vec![SqlValue::from_json(id)],
    )
}

impl<M: CrudModel> SpecProvider for Delete<M> {
    fn provide(self: Box<Self>, resource: &str) -> Result<Spec, Error> {
        let hooks = self.hooks.clone();

        let handler = move |ctx: RpcContext, db: Database| {
            let hooks = hooks.clone();
            async move {
                let id = id_from_params::<M>(ctx.params())?;
                let existing = load_by_id::<M>(&db, &id).await?;
                let model: M = decode_model(&existing)?;

                hooks.pre_delete(&ctx, &model).await?;

                let mut tx = db.begin().await?;
                let (sql, params) = delete_statement::<M>(&id, db.dialect());
                if let Err(err) = tx.execute(&sql, &params).await {
                    return Err(fail(tx, err).await);
                }
                if let Err(err) = hooks.post_delete(&ctx, tx.as_mut(), &model).await {
                    return Err(fail(tx, err).await);
                }
                tx.commit().await?;

                Ok(Json(json!({ "id": id })))
            }
        };

        let action = self.meta.action("delete").to_string();
        Ok(self
            .meta
            .spec("delete", resource, Spec::handler(action, handler)))
    }
}

// ── batch variants ──────────────────────────────────────────────────────────

fn items_of(ctx: &RpcContext) -> Result<Vec<Value>, Error> {
    match ctx.params().get("items") {
        Some(Value::Array(items)) if !items.is_empty() => Ok(items.clone()),
        Some(Value::Array(_)) => Err(Error::validation("'items' must not be empty")),
        _ => Err(Error::validation("batch params must carry an 'items' array")),
    }
}

fn decode_item<P>(item: Value, index: usize) -> Result<P, Error>
where
    P: DeserializeOwned + garde::Validate,
    <P as garde::Validate>::Context: Default,
{
    let typed: P = serde_json::from_value(item)
        .map_err(|e| Error::validation(format!("items[{index}]: {e}")))?;
    typed
        .validate()
        .map_err(|report| Error::validation(format!("items[{index}]: {report}")))?;
    Ok(typed)
}

/// `create_many`: validate every element, then run the create sequence for
/// all of them inside one transaction.
pub struct CreateMany<M, P> {
    meta: BuilderMeta,
    hooks: Arc<dyn CreateHooks<M, P>>,
    _marker: PhantomData<fn() -> (M, P)>,
}

impl<M, P> CreateMany<M, P>
where
    M: CrudModel,
    P: DeserializeOwned + Serialize + garde::Validate + Send + Sync + 'static,
    <P as garde::Validate>::Context: Default,
{
    pub fn new() -> Self {
        Self {
            meta: BuilderMeta::default(),
            hooks: Arc::new(NoHooks),
            _marker: PhantomData,
        }
    }

    pub fn hooks(mut self, hooks: impl CreateHooks<M, P> + 'static) -> Self {
        self.hooks = Arc::new(hooks);
        self
    }

    mutation_builder_common!();
}

impl<M, P> SpecProvider for CreateMany<M, P>
where
    M: CrudModel,
    P: DeserializeOwned + Serialize + garde::Validate + Send + Sync + 'static,
    <P as garde::Validate>::Context: Default,
{
    fn provide(self: Box<Self>, resource: &str) -> Result<Spec, Error> {
        let hooks = self.hooks.clone();

        let handler = move |ctx: RpcContext, db: Database| {
            let hooks = hooks.clone();
            async move {
                let items = items_of(&ctx)?;

                // Decode, validate and pre-hook every element before any row
                // is written.
                let mut models: Vec<(M, P)> = Vec::with_capacity(items.len());
                for (index, item) in items.into_iter().enumerate() {
                    let params: P = decode_item(item, index)?;
                    let obj = prepare_insert::<M>(&ctx, object_of(&params)?);
                    let mut model: M = decode_model(&obj)?;
                    hooks.pre_create(&ctx, &mut model, &params).await?;
                    models.push((model, params));
                }

                let mut tx = db.begin().await?;
                let mut ids = Vec::with_capacity(models.len());
                for (model, params) in &models {
                    match insert_model(tx.as_mut(), model, db.dialect()).await {
                        Ok(id) => ids.push(id),
                        Err(err) => return Err(fail(tx, err).await),
                    }
                    if let Err(err) = hooks.post_create(&ctx, tx.as_mut(), model, params).await {
                        return Err(fail(tx, err).await);
                    }
                }
                tx.commit().await?;

                Ok(Json(json!({ "ids": ids })))
            }
        };

        let action = self.meta.action("create_many").to_string();
        Ok(self
            .meta
            .spec("create", resource, Spec::handler(action, handler)))
    }
}

/// `update_many`: the update sequence per element, one shared transaction.
pub struct UpdateMany<M, P> {
    meta: BuilderMeta,
    hooks: Arc<dyn UpdateHooks<M, P>>,
    _marker: PhantomData<fn() -> (M, P)>,
}

impl<M, P> UpdateMany<M, P>
where
    M: CrudModel,
    P: DeserializeOwned + Serialize + garde::Validate + Send + Sync + 'static,
    <P as garde::Validate>::Context: Default,
{
    pub fn new() -> Self {
        Self {
            meta: BuilderMeta::default(),
            hooks: Arc::new(NoHooks),
            _marker: PhantomData,
        }
    }

    pub fn hooks(mut self, hooks: impl UpdateHooks<M, P> + 'static) -> Self {
        self.hooks = Arc::new(hooks);
        self
    }

    mutation_builder_common!();
}

impl<M, P> SpecProvider for UpdateMany<M, P>
where
    M: CrudModel,
    P: DeserializeOwned + Serialize + garde::Validate + Send + Sync + 'static,
    <P as garde::Validate>::Context: Default,
{
    fn provide(self: Box<Self>, resource: &str) -> Result<Spec, Error> {
        let hooks = self.hooks.clone();

        let handler = move |ctx: RpcContext, db: Database| {
            let hooks = hooks.clone();
            async move {
                let items = items_of(&ctx)?;

                struct Pending<M, P> {
                    id: Value,
                    existing: JsonRow,
                    old: M,
                    new: M,
                    new_obj: JsonRow,
                    params: P,
                }

                let mut pending: Vec<Pending<M, P>> = Vec::with_capacity(items.len());
                for (index, item) in items.into_iter().enumerate() {
                    let params: P = decode_item(item, index)?;
                    let params_obj = object_of(&params)?;
                    let id = id_from_params::<M>(&params_obj)?;
                    let existing = load_by_id::<M>(&db, &id).await?;
                    let old: M = decode_model(&existing)?;
                    let new_obj = prepare_update::<M>(&ctx, &existing, &params_obj);
                    let mut new: M = decode_model(&new_obj)?;
                    hooks.pre_update(&ctx, &old, &mut new, &params).await?;
                    let new_obj = match serde_json::to_value(&new) {
                        Ok(Value::Object(map)) => map,
                        _ => return Err(Error::internal("model did not serialize to an object")),
                    };
                    pending.push(Pending {
                        id,
                        existing,
                        old,
                        new,
                        new_obj,
                        params,
                    });
                }

                let mut tx = db.begin().await?;
                for entry in &pending {
                    if let Err(err) = update_row::<M>(
                        tx.as_mut(),
                        &entry.new_obj,
                        &entry.existing,
                        &entry.id,
                        db.dialect(),
                    )
                    .await
                    {
                        return Err(fail(tx, err).await);
                    }
                    if let Err(err) = hooks
                        .post_update(&ctx, tx.as_mut(), &entry.old, &entry.new, &entry.params)
                        .await
                    {
                        return Err(fail(tx, err).await);
                    }
                }
                tx.commit().await?;

                let ids: Vec<&Value> = pending.iter().map(|e| &e.id).collect();
                Ok(Json(json!({ "ids": ids })))
            }
        };

        let action = self.meta.action("update_many").to_string();
        Ok(self
            .meta
            .spec("update", resource, Spec::handler(action, handler)))
    }
}

/// `delete_many`: delete every id in `params.ids` inside one transaction.
pub struct DeleteMany<M> {
    meta: BuilderMeta,
    hooks: Arc<dyn DeleteHooks<M>>,
    _marker: PhantomData<fn() -> M>,
}

impl<M: CrudModel> DeleteMany<M> {
    pub fn new() -> Self {
        Self {
            meta: BuilderMeta::default(),
            hooks: Arc::new(NoHooks),
            _marker: PhantomData,
        }
    }

    pub fn hooks(mut self, hooks: impl DeleteHooks<M> + 'static) -> Self {
        self.hooks = Arc::new(hooks);
        self
    }

    mutation_builder_common!();
}

impl<M: CrudModel> SpecProvider for DeleteMany<M> {
    fn provide(self: Box<Self>, resource: &str) -> Result<Spec, Error> {
        let hooks = self.hooks.clone();

        let handler = move |ctx: RpcContext, db: Database| {
            let hooks = hooks.clone();
            async move {
                let ids = match ctx.params().get("ids") {
                    Some(Value::Array(ids)) if !ids.is_empty() => ids.clone(),
                    _ => return Err(Error::validation("batch params must carry an 'ids' array")),
                };

                let mut models: Vec<(Value, M)> = Vec::with_capacity(ids.len());
                for id in ids {
                    let existing = load_by_id::<M>(&db, &id).await?;
                    let model: M = decode_model(&existing)?;
                    hooks.pre_delete(&ctx, &model).await?;
                    models.push((id, model));
                }

                let mut tx = db.begin().await?;
                for (id, model) in &models {
                    let (sql, params) = delete_statement::<M>(id, db.dialect());
                    if let Err(err) = tx.execute(&sql, &params).await {
                        return Err(fail(tx, err).await);
                    }
                    if let Err(err) = hooks.post_delete(&ctx, tx.as_mut(), model).await {
                        return Err(fail(tx, err).await);
                    }
                }
                tx.commit().await?;

                Ok(Json(json!({ "count": models.len() })))
            }
        };

        let action = self.meta.action("delete_many").to_string();
        Ok(self
            .meta
            .spec("delete", resource, Spec::handler(action, handler)))
    }
}
