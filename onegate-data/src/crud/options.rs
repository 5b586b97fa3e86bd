use std::marker::PhantomData;

use serde::Serialize;
use serde_json::Value;

use onegate_core::{Error, Json, RpcContext, Spec, SpecProvider};

use crate::db::{Database, JsonRow};
use crate::entity::CrudModel;
use crate::query_config::QueryConfig;
use crate::search::SearchParams;

use super::tree::tree_rows;
use super::{compile_plan, flat_query, scoped, search_conditions, BuilderMeta, FLAT_PARTS};

/// Column mapping for option lists: which columns feed label, value and the
/// optional description.
#[derive(Debug, Clone)]
pub struct OptionsMapping {
    pub label_column: String,
    pub value_column: String,
    pub description_column: Option<String>,
}

impl Default for OptionsMapping {
    fn default() -> Self {
        Self {
            label_column: "name".to_string(),
            value_column: "id".to_string(),
            description_column: None,
        }
    }
}

/// A flat select option.
#[derive(Debug, Clone, Serialize)]
pub struct OptionItem {
    pub label: Value,
    pub value: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<Value>,
}

/// A hierarchical select option.
#[derive(Debug, Clone, Serialize)]
pub struct OptionNode {
    pub label: Value,
    pub value: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<Value>,
    pub children: Vec<OptionNode>,
}

fn option_of(row: &JsonRow, mapping: &OptionsMapping) -> OptionItem {
    OptionItem {
        label: row.get(&mapping.label_column).cloned().unwrap_or(Value::Null),
        value: row.get(&mapping.value_column).cloned().unwrap_or(Value::Null),
        description: mapping
            .description_column
            .as_ref()
            .and_then(|c| row.get(c))
            .cloned(),
    }
}

macro_rules! options_builder_common {
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

        pub fn query(mut self, build: impl FnOnce(&mut QueryConfig)) -> Self {
            build(&mut self.config);
            self
        }

        pub fn label_column(mut self, column: impl Into<String>) -> Self {
            self.mapping.label_column = column.into();
            self
        }

        pub fn value_column(mut self, column: impl Into<String>) -> Self {
            self.mapping.value_column = column.into();
            self
        }

        pub fn description_column(mut self, column: impl Into<String>) -> Self {
            self.mapping.description_column = Some(column.into());
            self
        }
    };
}

/// `find_options`: flat option list from label/value/description columns.
pub struct FindOptions<M, P> {
    meta: BuilderMeta,
    config: QueryConfig,
    mapping: OptionsMapping,
    _marker: PhantomData<fn() -> (M, P)>,
}

impl<M: CrudModel, P: SearchParams> FindOptions<M, P> {
    pub fn new() -> Self {
        Self {
            meta: BuilderMeta::default(),
            config: QueryConfig::new(),
            mapping: OptionsMapping::default(),
            _marker: PhantomData,
        }
    }

    options_builder_common!();
}

impl<M: CrudModel, P: SearchParams> Default for FindOptions<M, P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M: CrudModel, P: SearchParams> SpecProvider for FindOptions<M, P> {
    fn provide(self: Box<Self>, resource: &str) -> Result<Spec, Error> {
        let plan = compile_plan::<P>()?;
        let config = std::sync::Arc::new(self.config);
        let mapping = std::sync::Arc::new(self.mapping);

        let handler = {
            let config = config.clone();
            let mapping = mapping.clone();
            move |ctx: RpcContext, db: Database| {
                let plan = plan.clone();
                let config = config.clone();
                let mapping = mapping.clone();
                async move {
                    let conditions = search_conditions(&plan, &config, FLAT_PARTS, &ctx);
                    let query = flat_query::<M>(&config, conditions, &db);
                    let query = scoped(&ctx, M::table_name(), query).await?;
                    let (sql, params) = query.build_select();
                    let rows = db.fetch_all(&sql, &params).await?;
                    let options: Vec<OptionItem> =
                        rows.iter().map(|row| option_of(row, &mapping)).collect();
                    Ok(Json(options))
                }
            }
        };

        let action = self.meta.action("find_options").to_string();
        Ok(self
            .meta
            .spec("view", resource, Spec::handler(action, handler)))
    }
}

/// `find_tree_options`: option forest from a recursive tree walk.
pub struct FindTreeOptions<M, P> {
    meta: BuilderMeta,
    config: QueryConfig,
    mapping: OptionsMapping,
    id_column: String,
    parent_column: String,
    _marker: PhantomData<fn() -> (M, P)>,
}

impl<M: CrudModel, P: SearchParams> FindTreeOptions<M, P> {
    pub fn new() -> Self {
        Self {
            meta: BuilderMeta::default(),
            config: QueryConfig::new(),
            mapping: OptionsMapping::default(),
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

    options_builder_common!();
}

impl<M: CrudModel, P: SearchParams> Default for FindTreeOptions<M, P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M: CrudModel, P: SearchParams> SpecProvider for FindTreeOptions<M, P> {
    fn provide(self: Box<Self>, resource: &str) -> Result<Spec, Error> {
        let plan = compile_plan::<P>()?;
        let config = std::sync::Arc::new(self.config);
        let mapping = std::sync::Arc::new(self.mapping);
        let id_column = self.id_column.clone();
        let parent_column = self.parent_column.clone();

        let handler = {
            let config = config.clone();
            let mapping = mapping.clone();
            move |ctx: RpcContext, db: Database| {
                let plan = plan.clone();
                let config = config.clone();
                let mapping = mapping.clone();
                let id_column = id_column.clone();
                let parent_column = parent_column.clone();
                async move {
                    let rows =
                        tree_rows::<M>(&ctx, &db, &plan, &config, &id_column, &parent_column)
                            .await?;
                    let forest = option_forest(rows, &mapping, &id_column, &parent_column);
                    Ok(Json(forest))
                }
            }
        };

        let action = self.meta.action("find_tree_options").to_string();
        Ok(self
            .meta
            .spec("view", resource, Spec::handler(action, handler)))
    }
}

fn option_forest(
    rows: Vec<JsonRow>,
    mapping: &OptionsMapping,
    id_column: &str,
    parent_column: &str,
) -> Vec<OptionNode> {
    use std::collections::{HashMap, HashSet};

    let key = |value: &Value| value.to_string();
    let ids: HashSet<String> = rows
        .iter()
        .filter_map(|row| row.get(id_column).map(key))
        .collect();

    let mut children_of: HashMap<String, Vec<JsonRow>> = HashMap::new();
    let mut roots = Vec::new();
    for row in rows {
        match row.get(parent_column) {
            Some(p) if !p.is_null() && ids.contains(&key(p)) => {
                children_of.entry(key(p)).or_default().push(row);
            }
            _ => roots.push(row),
        }
    }

    fn attach(
        row: JsonRow,
        mapping: &OptionsMapping,
        id_column: &str,
        children_of: &mut std::collections::HashMap<String, Vec<JsonRow>>,
    ) -> OptionNode {
        let id = row.get(id_column).map(|v| v.to_string()).unwrap_or_default();
        let item = option_of(&row, mapping);
        let children = children_of
            .remove(&id)
            .map(|rows| {
                rows.into_iter()
                    .map(|r| attach(r, mapping, id_column, children_of))
                    .collect()
            })
            .unwrap_or_default();
        OptionNode {
            label: item.label,
            value: item.value,
            description: item.description,
            children,
        }
    }

    roots
        .into_iter()
        .map(|row| attach(row, mapping, id_column, &mut children_of))
        .collect()
}
