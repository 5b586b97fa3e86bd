use std::collections::HashMap;
use std::marker::PhantomData;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use onegate_core::{Error, Json, RpcContext, Spec, SpecProvider};

use crate::condition::ConditionBuilder;
use crate::db::{Database, JsonRow};
use crate::entity::{CrudModel, Entity};
use crate::query_config::{QueryConfig, QueryPart};
use crate::search::{SearchParams, SearchPlan};
use crate::select::{RecursiveSelect, SelectBuilder};

use super::{
    compile_plan, decode_models, make_processor, run_processor, scoped, BuilderMeta, Processor,
};

/// One node of a materialized hierarchy: the decoded model plus children.
#[derive(Debug, Clone, Serialize)]
pub struct TreeNode<M> {
    #[serde(flatten)]
    pub item: M,
    pub children: Vec<TreeNode<M>>,
}

/// Build a forest from flat rows using the id / parent-id columns. Roots are
/// rows whose parent is null or absent from the fetched set.
pub fn build_forest<M: DeserializeOwned>(
    rows: Vec<JsonRow>,
    id_column: &str,
    parent_column: &str,
) -> Result<Vec<TreeNode<M>>, Error> {
    let id_key = |value: &Value| value.to_string();

    let ids: std::collections::HashSet<String> = rows
        .iter()
        .filter_map(|row| row.get(id_column).map(id_key))
        .collect();

    let mut children_of: HashMap<String, Vec<JsonRow>> = HashMap::new();
    let mut roots: Vec<JsonRow> = Vec::new();

    for row in rows {
        let parent = row.get(parent_column);
        match parent {
            Some(p) if !p.is_null() && ids.contains(&id_key(p)) => {
                children_of.entry(id_key(p)).or_default().push(row);
            }
            _ => roots.push(row),
        }
    }

    fn attach<M: DeserializeOwned>(
        row: JsonRow,
        id_column: &str,
        children_of: &mut HashMap<String, Vec<JsonRow>>,
    ) -> Result<TreeNode<M>, Error> {
        let key = row.get(id_column).map(|v| v.to_string()).unwrap_or_default();
        let item: M = serde_json::from_value(Value::Object(row))
            .map_err(|e| Error::internal("failed to decode tree row").with_cause(e))?;
        let mut children = Vec::new();
        if let Some(rows) = children_of.remove(&key) {
            for child in rows {
                children.push(attach(child, id_column, children_of)?);
            }
        }
        Ok(TreeNode { item, children })
    }

    let mut forest = Vec::new();
    for root in roots {
        forest.push(attach(root, id_column, &mut children_of)?);
    }
    Ok(forest)
}

/// Assemble the recursive-CTE walk for a tree read. Shared by `find_tree`
/// and `find_tree_options`.
pub(crate) async fn tree_rows<M: Entity>(
    ctx: &RpcContext,
    db: &Database,
    plan: &SearchPlan,
    config: &QueryConfig,
    id_column: &str,
    parent_column: &str,
) -> Result<Vec<JsonRow>, Error> {
    const BASE: &[QueryPart] = &[QueryPart::Base, QueryPart::All];
    const RECURSIVE: &[QueryPart] = &[QueryPart::Recursive, QueryPart::All];
    const ROOT: &[QueryPart] = &[QueryPart::Root, QueryPart::All];
    const ROOT_ONLY: &[QueryPart] = &[QueryPart::Root];

    // Columns tagged All propagate to both arms; their schemas must match
    // per UNION rules, so one shared list feeds both.
    let mut columns = config.columns_for(&[QueryPart::All, QueryPart::Base]);
    if columns.is_empty() {
        columns = M::columns().iter().map(|c| c.to_string()).collect();
    }

    let mut walk = RecursiveSelect::new(M::table_name())
        .dialect(db.dialect())
        .columns(columns)
        .id_column(id_column)
        .parent_column(parent_column);

    for join in config.relations_for(BASE) {
        walk = walk.base_join(join);
    }
    for join in config.relations_for(RECURSIVE) {
        walk = walk.recursive_join(join);
    }

    // Search params and All-tagged predicates filter the starting set.
    let mut base = ConditionBuilder::new();
    plan.apply(ctx.params(), &mut base);
    config.apply_predicates(BASE, &mut base);
    if let Some(predicate) = base.build() {
        walk = walk.base_where(predicate);
    }

    let mut recursive = ConditionBuilder::new();
    config.apply_predicates(&[QueryPart::Recursive], &mut recursive);
    if let Some(predicate) = recursive.build() {
        walk = walk.recursive_where(predicate);
    }

    // Root-tagged predicates and the data scope apply to the final UNION.
    let mut outer = ConditionBuilder::new();
    config.apply_predicates(ROOT_ONLY, &mut outer);
    let scope_probe = scoped(ctx, M::table_name(), SelectBuilder::new(M::table_name())).await?;
    let mut outer_predicate = outer.build();
    if let Some(scope_predicate) = scope_probe.into_predicate() {
        outer_predicate = Some(match outer_predicate {
            None => scope_predicate,
            Some(existing) => crate::condition::Predicate::And(vec![existing, scope_predicate]),
        });
    }
    if let Some(predicate) = outer_predicate {
        walk = walk.outer_where(predicate);
    }

    for sort in config.sorts_for(ROOT) {
        walk = walk.sort(sort);
    }

    let (sql, params) = walk.build();
    db.fetch_all(&sql, &params).await
}

/// `find_tree`: recursive-CTE walk materialized into a forest.
pub struct FindTree<M, P> {
    meta: BuilderMeta,
    config: QueryConfig,
    processor: Option<Processor<M>>,
    id_column: String,
    parent_column: String,
    _marker: PhantomData<fn() -> (M, P)>,
}

impl<M: CrudModel, P: SearchParams> FindTree<M, P> {
    pub fn new() -> Self {
        Self {
            meta: BuilderMeta::default(),
            config: QueryConfig::new(),
            processor: None,
            id_column: "id".to_string(),
            parent_column: "parent_id".to_string(),
            _marker: PhantomData,
        }
    }

    pub fn id_column(mut self, column: impl Into<String>) -> Self {
        self.id_column = column.into();
        self
    }

    pub fn parent_column(mut self, column: impl Into<String>) -> Self {
        self.parent_column = column.into();
        self
    }

    super::read::read_builder_common!();
}

impl<M: CrudModel, P: SearchParams> Default for FindTree<M, P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M: CrudModel, P: SearchParams> SpecProvider for FindTree<M, P> {
    fn provide(self: Box<Self>, resource: &str) -> Result<Spec, Error> {
        let plan = compile_plan::<P>()?;
        let config = std::sync::Arc::new(self.config);
        let processor = self.processor;
        let id_column = self.id_column.clone();
        let parent_column = self.parent_column.clone();

        let handler = {
            let config = config.clone();
            move |ctx: RpcContext, db: Database| {
                let plan = plan.clone();
                let config = config.clone();
                let processor = processor.clone();
                let id_column = id_column.clone();
                let parent_column = parent_column.clone();
                async move {
                    let rows =
                        tree_rows::<M>(&ctx, &db, &plan, &config, &id_column, &parent_column)
                            .await?;

                    // Processors see the flat set before the forest forms.
                    let models = decode_models::<M>(rows)?;
                    let models = run_processor(&processor, &ctx, models).await?;
                    let rows: Vec<JsonRow> = models
                        .into_iter()
                        .map(|m| match serde_json::to_value(m) {
                            Ok(Value::Object(map)) => Ok(map),
                            Ok(_) => Err(Error::internal("model did not serialize to an object")),
                            Err(e) => Err(Error::internal("failed to reserialize model").with_cause(e)),
                        })
                        .collect::<Result<_, _>>()?;

                    let forest = build_forest::<M>(rows, &id_column, &parent_column)?;
                    Ok(Json(forest))
                }
            }
        };

        let action = self.meta.action("find_tree").to_string();
        Ok(self
            .meta
            .spec("view", resource, Spec::handler(action, handler)))
    }
}
