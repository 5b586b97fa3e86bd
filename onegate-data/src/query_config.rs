use std::sync::Arc;

use crate::condition::ConditionBuilder;
use crate::select::{Join, SelectBuilder, Sort};

/// Which arm of a query an entry targets.
///
/// Non-tree builders collect `Root`, `Base` and `All` alike and ignore
/// `Recursive`. Tree builders route entries per UNION semantics: columns and
/// relations tagged `All` land in both arms, predicates tagged `All` filter
/// the starting set (`Base`), sorts tagged `All` order the final UNION
/// (`Root`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryPart {
    Root,
    Base,
    Recursive,
    All,
}

type PredicateFn = Arc<dyn Fn(&mut ConditionBuilder) + Send + Sync>;
type ApplierFn = Arc<dyn Fn(SelectBuilder) -> SelectBuilder + Send + Sync>;

/// Accumulated query shape shared by the query-bearing CRUD builders:
/// selected columns, joins, extra predicates, default sorts and custom
/// appliers, each tagged with a [`QueryPart`].
#[derive(Clone, Default)]
pub struct QueryConfig {
    columns: Vec<(QueryPart, String)>,
    relations: Vec<(QueryPart, Join)>,
    predicates: Vec<(QueryPart, PredicateFn)>,
    sorts: Vec<(QueryPart, Sort)>,
    appliers: Vec<(QueryPart, ApplierFn)>,
}

impl QueryConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn select(&mut self, column: impl Into<String>) -> &mut Self {
        self.select_in(QueryPart::All, column)
    }

    pub fn select_as(&mut self, column: impl Into<String>, alias: impl Into<String>) -> &mut Self {
        self.columns.push((
            QueryPart::All,
            format!("{} AS {}", column.into(), alias.into()),
        ));
        self
    }

    pub fn select_in(&mut self, part: QueryPart, column: impl Into<String>) -> &mut Self {
        self.columns.push((part, column.into()));
        self
    }

    pub fn join(&mut self, join: Join) -> &mut Self {
        self.join_in(QueryPart::All, join)
    }

    pub fn join_in(&mut self, part: QueryPart, join: Join) -> &mut Self {
        self.relations.push((part, join));
        self
    }

    /// Add a predicate builder. Defaults to `All`, which tree builders
    /// treat as a base (starting-set) filter.
    pub fn filter(&mut self, f: impl Fn(&mut ConditionBuilder) + Send + Sync + 'static) -> &mut Self {
        self.filter_in(QueryPart::All, f)
    }

    pub fn filter_in(
        &mut self,
        part: QueryPart,
        f: impl Fn(&mut ConditionBuilder) + Send + Sync + 'static,
    ) -> &mut Self {
        self.predicates.push((part, Arc::new(f)));
        self
    }

    /// Default sort. Defaults to `All`, which tree builders apply to the
    /// final UNION.
    pub fn sort(&mut self, sort: Sort) -> &mut Self {
        self.sort_in(QueryPart::All, sort)
    }

    pub fn sort_in(&mut self, part: QueryPart, sort: Sort) -> &mut Self {
        self.sorts.push((part, sort));
        self
    }

    /// Custom query applier, run after columns/joins/sorts are installed.
    pub fn apply(
        &mut self,
        f: impl Fn(SelectBuilder) -> SelectBuilder + Send + Sync + 'static,
    ) -> &mut Self {
        self.appliers.push((QueryPart::All, Arc::new(f)));
        self
    }

    pub fn apply_in(
        &mut self,
        part: QueryPart,
        f: impl Fn(SelectBuilder) -> SelectBuilder + Send + Sync + 'static,
    ) -> &mut Self {
        self.appliers.push((part, Arc::new(f)));
        self
    }

    // ── Collection ──────────────────────────────────────────────────────

    fn wants(entry: QueryPart, parts: &[QueryPart]) -> bool {
        parts.contains(&entry)
    }

    pub fn columns_for(&self, parts: &[QueryPart]) -> Vec<String> {
        self.columns
            .iter()
            .filter(|(p, _)| Self::wants(*p, parts))
            .map(|(_, c)| c.clone())
            .collect()
    }

    pub fn relations_for(&self, parts: &[QueryPart]) -> Vec<Join> {
        self.relations
            .iter()
            .filter(|(p, _)| Self::wants(*p, parts))
            .map(|(_, j)| j.clone())
            .collect()
    }

    pub fn apply_predicates(&self, parts: &[QueryPart], builder: &mut ConditionBuilder) {
        for (part, f) in &self.predicates {
            if Self::wants(*part, parts) {
                f(builder);
            }
        }
    }

    pub fn sorts_for(&self, parts: &[QueryPart]) -> Vec<Sort> {
        self.sorts
            .iter()
            .filter(|(p, _)| Self::wants(*p, parts))
            .map(|(_, s)| s.clone())
            .collect()
    }

    pub fn run_appliers(&self, parts: &[QueryPart], mut query: SelectBuilder) -> SelectBuilder {
        for (part, f) in &self.appliers {
            if Self::wants(*part, parts) {
                query = f(query);
            }
        }
        query
    }
}
