use crate::condition::{MatchKind, Predicate};
use crate::value::SqlValue;

/// SQL dialect, affecting placeholder style and case-insensitive matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Dialect {
    /// Generic SQL using `?` placeholders.
    #[default]
    Generic,
    Sqlite,
    MySql,
    /// Postgres-style `$1, $2, ...` placeholders and `ILIKE`.
    Postgres,
}

impl Dialect {
    fn placeholder(self, index: usize) -> String {
        match self {
            Dialect::Postgres => format!("${index}"),
            Dialect::Generic | Dialect::Sqlite | Dialect::MySql => "?".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    Inner,
    Left,
}

impl JoinKind {
    fn sql(self) -> &'static str {
        match self {
            JoinKind::Inner => "JOIN",
            JoinKind::Left => "LEFT JOIN",
        }
    }
}

/// A join clause added by query configuration.
#[derive(Debug, Clone)]
pub struct Join {
    pub kind: JoinKind,
    pub table: String,
    pub on: String,
}

impl Join {
    pub fn inner(table: impl Into<String>, on: impl Into<String>) -> Self {
        Self {
            kind: JoinKind::Inner,
            table: table.into(),
            on: on.into(),
        }
    }

    pub fn left(table: impl Into<String>, on: impl Into<String>) -> Self {
        Self {
            kind: JoinKind::Left,
            table: table.into(),
            on: on.into(),
        }
    }

    fn render(&self) -> String {
        format!(" {} {} ON {}", self.kind.sql(), self.table, self.on)
    }
}

/// One ORDER BY entry.
#[derive(Debug, Clone)]
pub struct Sort {
    pub column: String,
    pub ascending: bool,
}

impl Sort {
    pub fn asc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            ascending: true,
        }
    }

    pub fn desc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            ascending: false,
        }
    }

    fn render(&self) -> String {
        format!(
            "{} {}",
            self.column,
            if self.ascending { "ASC" } else { "DESC" }
        )
    }
}

/// A fluent SELECT builder producing `(sql, bind_values)` pairs.
///
/// Columns, joins and sorts come from query configuration; the predicate
/// tree comes from the search compiler, user predicates and data scopes.
#[derive(Debug, Clone)]
pub struct SelectBuilder {
    table: String,
    columns: Vec<String>,
    joins: Vec<Join>,
    predicate: Option<Predicate>,
    sorts: Vec<Sort>,
    limit: Option<u64>,
    offset: Option<u64>,
    dialect: Dialect,
}

impl SelectBuilder {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            columns: Vec::new(),
            joins: Vec::new(),
            predicate: None,
            sorts: Vec::new(),
            limit: None,
            offset: None,
            dialect: Dialect::Generic,
        }
    }

    pub fn dialect(mut self, dialect: Dialect) -> Self {
        self.dialect = dialect;
        self
    }

    pub fn column(mut self, column: impl Into<String>) -> Self {
        self.columns.push(column.into());
        self
    }

    pub fn column_as(mut self, column: impl Into<String>, alias: impl Into<String>) -> Self {
        self.columns
            .push(format!("{} AS {}", column.into(), alias.into()));
        self
    }

    pub fn join(mut self, join: Join) -> Self {
        self.joins.push(join);
        self
    }

    /// AND the given predicate onto the existing one.
    pub fn and_where(mut self, predicate: Predicate) -> Self {
        self.predicate = Some(match self.predicate.take() {
            None => predicate,
            Some(Predicate::And(mut existing)) => {
                existing.push(predicate);
                Predicate::And(existing)
            }
            Some(existing) => Predicate::And(vec![existing, predicate]),
        });
        self
    }

    pub fn maybe_where(self, predicate: Option<Predicate>) -> Self {
        match predicate {
            Some(p) => self.and_where(p),
            None => self,
        }
    }

    pub fn sort(mut self, sort: Sort) -> Self {
        self.sorts.push(sort);
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Consume the builder, keeping only its accumulated predicate. Used by
    /// the tree builders to graft scope predicates onto the CTE's outer
    /// select.
    pub fn into_predicate(self) -> Option<Predicate> {
        self.predicate
    }

    fn column_list(&self) -> String {
        if self.columns.is_empty() {
            "*".to_string()
        } else {
            self.columns.join(", ")
        }
    }

    /// Build the SELECT statement.
    pub fn build_select(&self) -> (String, Vec<SqlValue>) {
        let mut sql = format!("SELECT {} FROM {}", self.column_list(), self.table);
        let mut params = Vec::new();
        let mut index = 1usize;

        for join in &self.joins {
            sql.push_str(&join.render());
        }
        if let Some(predicate) = &self.predicate {
            sql.push_str(" WHERE ");
            render_predicate(predicate, self.dialect, &mut sql, &mut params, &mut index);
        }
        if !self.sorts.is_empty() {
            sql.push_str(" ORDER BY ");
            let clauses: Vec<_> = self.sorts.iter().map(Sort::render).collect();
            sql.push_str(&clauses.join(", "));
        }
        if let Some(limit) = self.limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }
        if let Some(offset) = self.offset {
            sql.push_str(&format!(" OFFSET {offset}"));
        }
        (sql, params)
    }

    /// Build the companion COUNT statement: identical WHERE, no
    /// ORDER/LIMIT/OFFSET.
    pub fn build_count(&self) -> (String, Vec<SqlValue>) {
        let mut sql = format!("SELECT COUNT(*) AS count FROM {}", self.table);
        let mut params = Vec::new();
        let mut index = 1usize;

        for join in &self.joins {
            sql.push_str(&join.render());
        }
        if let Some(predicate) = &self.predicate {
            sql.push_str(" WHERE ");
            render_predicate(predicate, self.dialect, &mut sql, &mut params, &mut index);
        }
        (sql, params)
    }
}

/// Render a predicate tree into SQL, appending bind values.
pub(crate) fn render_predicate(
    predicate: &Predicate,
    dialect: Dialect,
    sql: &mut String,
    params: &mut Vec<SqlValue>,
    index: &mut usize,
) {
    match predicate {
        Predicate::Cmp { column, op, value } => {
            let placeholder = dialect.placeholder(*index);
            *index += 1;
            sql.push_str(&format!("{column} {} {placeholder}", op.sql()));
            params.push(value.clone());
        }
        Predicate::Between {
            column,
            low,
            high,
            negated,
        } => {
            let p1 = dialect.placeholder(*index);
            *index += 1;
            let p2 = dialect.placeholder(*index);
            *index += 1;
            let keyword = if *negated { "NOT BETWEEN" } else { "BETWEEN" };
            sql.push_str(&format!("{column} {keyword} {p1} AND {p2}"));
            params.push(low.clone());
            params.push(high.clone());
        }
        Predicate::In {
            column,
            values,
            negated,
        } => {
            if values.is_empty() {
                // IN () is invalid SQL; an empty set matches nothing.
                sql.push_str(if *negated { "1 = 1" } else { "1 = 0" });
                return;
            }
            let placeholders: Vec<_> = values
                .iter()
                .map(|_| {
                    let p = dialect.placeholder(*index);
                    *index += 1;
                    p
                })
                .collect();
            let keyword = if *negated { "NOT IN" } else { "IN" };
            sql.push_str(&format!(
                "{column} {keyword} ({})",
                placeholders.join(", ")
            ));
            params.extend(values.iter().cloned());
        }
        Predicate::Null { column, negated } => {
            sql.push_str(&format!(
                "{column} IS {}NULL",
                if *negated { "NOT " } else { "" }
            ));
        }
        Predicate::Match {
            column,
            kind,
            value,
            case_insensitive,
            negated,
        } => {
            let placeholder = dialect.placeholder(*index);
            *index += 1;
            let not = if *negated { "NOT " } else { "" };
            if *case_insensitive && dialect == Dialect::Postgres {
                sql.push_str(&format!("{column} {not}ILIKE {placeholder}"));
            } else if *case_insensitive {
                sql.push_str(&format!("LOWER({column}) {not}LIKE LOWER({placeholder})"));
            } else {
                sql.push_str(&format!("{column} {not}LIKE {placeholder}"));
            }
            params.push(SqlValue::Text(kind.pattern(value)));
        }
        Predicate::And(children) => render_group(children, " AND ", dialect, sql, params, index),
        Predicate::Or(children) => render_group(children, " OR ", dialect, sql, params, index),
        Predicate::Raw(fragment, values) => {
            // Rewrite `?` placeholders for dialects with positional markers.
            let mut rendered = String::with_capacity(fragment.len());
            for ch in fragment.chars() {
                if ch == '?' {
                    rendered.push_str(&dialect.placeholder(*index));
                    *index += 1;
                } else {
                    rendered.push(ch);
                }
            }
            sql.push_str(&rendered);
            params.extend(values.iter().cloned());
        }
    }
}

fn render_group(
    children: &[Predicate],
    separator: &str,
    dialect: Dialect,
    sql: &mut String,
    params: &mut Vec<SqlValue>,
    index: &mut usize,
) {
    if children.is_empty() {
        sql.push_str("1 = 1");
        return;
    }
    sql.push('(');
    for (i, child) in children.iter().enumerate() {
        if i > 0 {
            sql.push_str(separator);
        }
        render_predicate(child, dialect, sql, params, index);
    }
    sql.push(')');
}

// ── Recursive CTE ───────────────────────────────────────────────────────────

/// Builder for a recursive-CTE tree walk.
///
/// The base select picks root rows; the recursive select joins the source
/// table back onto the CTE through `parent_column = cte.id_column`. Column
/// lists must match across both arms per UNION rules, so both come from one
/// shared column set.
#[derive(Debug, Clone)]
pub struct RecursiveSelect {
    cte: String,
    table: String,
    columns: Vec<String>,
    id_column: String,
    parent_column: String,
    base_joins: Vec<Join>,
    recursive_joins: Vec<Join>,
    base_predicate: Option<Predicate>,
    recursive_predicate: Option<Predicate>,
    outer_predicate: Option<Predicate>,
    sorts: Vec<Sort>,
    dialect: Dialect,
}

impl RecursiveSelect {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            cte: "tree_walk".to_string(),
            table: table.into(),
            columns: Vec::new(),
            id_column: "id".to_string(),
            parent_column: "parent_id".to_string(),
            base_joins: Vec::new(),
            recursive_joins: Vec::new(),
            base_predicate: None,
            recursive_predicate: None,
            outer_predicate: None,
            sorts: Vec::new(),
            dialect: Dialect::Generic,
        }
    }

    pub fn dialect(mut self, dialect: Dialect) -> Self {
        self.dialect = dialect;
        self
    }

    pub fn columns(mut self, columns: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.columns = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn id_column(mut self, column: impl Into<String>) -> Self {
        self.id_column = column.into();
        self
    }

    pub fn parent_column(mut self, column: impl Into<String>) -> Self {
        self.parent_column = column.into();
        self
    }

    pub fn base_join(mut self, join: Join) -> Self {
        self.base_joins.push(join);
        self
    }

    pub fn recursive_join(mut self, join: Join) -> Self {
        self.recursive_joins.push(join);
        self
    }

    /// Filter on the starting set. Defaults to `parent_column IS NULL`.
    pub fn base_where(mut self, predicate: Predicate) -> Self {
        self.base_predicate = Some(match self.base_predicate.take() {
            None => predicate,
            Some(Predicate::And(mut existing)) => {
                existing.push(predicate);
                Predicate::And(existing)
            }
            Some(existing) => Predicate::And(vec![existing, predicate]),
        });
        self
    }

    pub fn recursive_where(mut self, predicate: Predicate) -> Self {
        self.recursive_predicate = Some(predicate);
        self
    }

    /// Filter on the final UNION result.
    pub fn outer_where(mut self, predicate: Predicate) -> Self {
        self.outer_predicate = Some(predicate);
        self
    }

    /// Order the final UNION result.
    pub fn sort(mut self, sort: Sort) -> Self {
        self.sorts.push(sort);
        self
    }

    pub fn build(&self) -> (String, Vec<SqlValue>) {
        let columns = if self.columns.is_empty() {
            vec!["*".to_string()]
        } else {
            self.columns.clone()
        };
        let base_columns = columns.join(", ");
        let recursive_columns: Vec<String> = columns
            .iter()
            .map(|c| {
                if c == "*" {
                    format!("{}.*", self.table)
                } else {
                    format!("{}.{c}", self.table)
                }
            })
            .collect();
        let recursive_columns = recursive_columns.join(", ");

        let mut params = Vec::new();
        let mut index = 1usize;

        let mut sql = format!(
            "WITH RECURSIVE {} AS (SELECT {base_columns} FROM {}",
            self.cte, self.table
        );
        for join in &self.base_joins {
            sql.push_str(&join.render());
        }
        sql.push_str(" WHERE ");
        match &self.base_predicate {
            Some(predicate) => {
                render_predicate(predicate, self.dialect, &mut sql, &mut params, &mut index)
            }
            None => sql.push_str(&format!("{}.{} IS NULL", self.table, self.parent_column)),
        }

        sql.push_str(&format!(
            " UNION ALL SELECT {recursive_columns} FROM {}",
            self.table
        ));
        for join in &self.recursive_joins {
            sql.push_str(&join.render());
        }
        sql.push_str(&format!(
            " JOIN {cte} ON {table}.{parent} = {cte}.{id}",
            cte = self.cte,
            table = self.table,
            parent = self.parent_column,
            id = self.id_column,
        ));
        if let Some(predicate) = &self.recursive_predicate {
            sql.push_str(" AND ");
            render_predicate(predicate, self.dialect, &mut sql, &mut params, &mut index);
        }

        sql.push_str(&format!(") SELECT * FROM {}", self.cte));
        if let Some(predicate) = &self.outer_predicate {
            sql.push_str(" WHERE ");
            render_predicate(predicate, self.dialect, &mut sql, &mut params, &mut index);
        }
        if !self.sorts.is_empty() {
            sql.push_str(" ORDER BY ");
            let clauses: Vec<_> = self.sorts.iter().map(Sort::render).collect();
            sql.push_str(&clauses.join(", "));
        }

        (sql, params)
    }
}
