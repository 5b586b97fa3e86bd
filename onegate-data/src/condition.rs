use crate::value::SqlValue;

/// Comparison operators for scalar predicates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
}

impl CmpOp {
    pub(crate) fn sql(self) -> &'static str {
        match self {
            CmpOp::Eq => "=",
            CmpOp::Neq => "!=",
            CmpOp::Gt => ">",
            CmpOp::Gte => ">=",
            CmpOp::Lt => "<",
            CmpOp::Lte => "<=",
        }
    }
}

/// Substring match shapes for LIKE-family predicates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchKind {
    Contains,
    StartsWith,
    EndsWith,
}

impl MatchKind {
    pub(crate) fn pattern(self, value: &str) -> String {
        match self {
            MatchKind::Contains => format!("%{value}%"),
            MatchKind::StartsWith => format!("{value}%"),
            MatchKind::EndsWith => format!("%{value}"),
        }
    }
}

/// A predicate tree, rendered into a WHERE clause by the select builder.
#[derive(Debug, Clone)]
pub enum Predicate {
    Cmp {
        column: String,
        op: CmpOp,
        value: SqlValue,
    },
    Between {
        column: String,
        low: SqlValue,
        high: SqlValue,
        negated: bool,
    },
    In {
        column: String,
        values: Vec<SqlValue>,
        negated: bool,
    },
    Null {
        column: String,
        negated: bool,
    },
    Match {
        column: String,
        kind: MatchKind,
        value: String,
        case_insensitive: bool,
        negated: bool,
    },
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    /// Verbatim SQL fragment with `?` placeholders, one per value.
    Raw(String, Vec<SqlValue>),
}

impl Predicate {
    pub fn eq(column: impl Into<String>, value: impl Into<SqlValue>) -> Self {
        Predicate::Cmp {
            column: column.into(),
            op: CmpOp::Eq,
            value: value.into(),
        }
    }

    pub fn is_null(column: impl Into<String>) -> Self {
        Predicate::Null {
            column: column.into(),
            negated: false,
        }
    }

    /// A predicate that excludes every row. Used by the fail-closed branch
    /// of data-scope application.
    pub fn none() -> Self {
        Predicate::Raw("1 = 0".to_string(), Vec::new())
    }
}

/// Accumulates AND-combined predicates for one query.
#[derive(Debug, Clone, Default)]
pub struct ConditionBuilder {
    predicates: Vec<Predicate>,
}

impl ConditionBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, predicate: Predicate) -> &mut Self {
        self.predicates.push(predicate);
        self
    }

    pub fn eq(&mut self, column: impl Into<String>, value: impl Into<SqlValue>) -> &mut Self {
        self.push(Predicate::eq(column, value))
    }

    pub fn cmp(
        &mut self,
        column: impl Into<String>,
        op: CmpOp,
        value: impl Into<SqlValue>,
    ) -> &mut Self {
        self.push(Predicate::Cmp {
            column: column.into(),
            op,
            value: value.into(),
        })
    }

    pub fn contains(&mut self, column: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.push(Predicate::Match {
            column: column.into(),
            kind: MatchKind::Contains,
            value: value.into(),
            case_insensitive: false,
            negated: false,
        })
    }

    pub fn is_null(&mut self, column: impl Into<String>) -> &mut Self {
        self.push(Predicate::is_null(column))
    }

    pub fn in_values(
        &mut self,
        column: impl Into<String>,
        values: impl IntoIterator<Item = SqlValue>,
    ) -> &mut Self {
        self.push(Predicate::In {
            column: column.into(),
            values: values.into_iter().collect(),
            negated: false,
        })
    }

    /// Add an OR group built from the closure's conditions.
    pub fn or_group(&mut self, build: impl FnOnce(&mut ConditionBuilder)) -> &mut Self {
        let mut inner = ConditionBuilder::new();
        build(&mut inner);
        if !inner.predicates.is_empty() {
            self.push(Predicate::Or(inner.predicates));
        }
        self
    }

    pub fn raw(&mut self, sql: impl Into<String>, values: Vec<SqlValue>) -> &mut Self {
        self.push(Predicate::Raw(sql.into(), values))
    }

    pub fn is_empty(&self) -> bool {
        self.predicates.is_empty()
    }

    /// Collapse into a single predicate; `None` when nothing accumulated.
    pub fn build(self) -> Option<Predicate> {
        match self.predicates.len() {
            0 => None,
            1 => self.predicates.into_iter().next(),
            _ => Some(Predicate::And(self.predicates)),
        }
    }
}
