use std::any::TypeId;
use std::sync::Arc;

use dashmap::DashMap;
use serde_json::{Map, Value};

use onegate_core::Error;

use crate::condition::{CmpOp, ConditionBuilder, MatchKind, Predicate};
use crate::value::SqlValue;

/// Search operators, one per predicate kind. The `i*` variants match
/// case-insensitively.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchOp {
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
    Between,
    NotBetween,
    In,
    NotIn,
    IsNull,
    IsNotNull,
    Contains,
    NotContains,
    StartsWith,
    NotStartsWith,
    EndsWith,
    NotEndsWith,
    IContains,
    INotContains,
    IStartsWith,
    INotStartsWith,
    IEndsWith,
    INotEndsWith,
}

impl SearchOp {
    pub fn parse(op: &str) -> Option<Self> {
        Some(match op {
            "eq" => SearchOp::Eq,
            "neq" => SearchOp::Neq,
            "gt" => SearchOp::Gt,
            "gte" => SearchOp::Gte,
            "lt" => SearchOp::Lt,
            "lte" => SearchOp::Lte,
            "between" => SearchOp::Between,
            "notBetween" => SearchOp::NotBetween,
            "in" => SearchOp::In,
            "notIn" => SearchOp::NotIn,
            "isNull" => SearchOp::IsNull,
            "isNotNull" => SearchOp::IsNotNull,
            "contains" => SearchOp::Contains,
            "notContains" => SearchOp::NotContains,
            "startsWith" => SearchOp::StartsWith,
            "notStartsWith" => SearchOp::NotStartsWith,
            "endsWith" => SearchOp::EndsWith,
            "notEndsWith" => SearchOp::NotEndsWith,
            "iContains" => SearchOp::IContains,
            "iNotContains" => SearchOp::INotContains,
            "iStartsWith" => SearchOp::IStartsWith,
            "iNotStartsWith" => SearchOp::INotStartsWith,
            "iEndsWith" => SearchOp::IEndsWith,
            "iNotEndsWith" => SearchOp::INotEndsWith,
            _ => return None,
        })
    }
}

/// One compiled search field: source field name, operator, target columns.
#[derive(Debug, Clone)]
pub struct SearchFieldSpec {
    pub field: String,
    pub op: SearchOp,
    pub columns: Vec<String>,
}

/// Parse one field's search tag.
///
/// Grammar: `op ("," "column=" ident ("|" ident)*)?`. Omitting `column=`
/// derives a snake_case column from the field name; a multi-column spec
/// produces an OR across the listed columns.
pub fn parse_tag(field: &str, tag: &str) -> Result<SearchFieldSpec, Error> {
    let mut parts = tag.splitn(2, ',');
    let op_token = parts.next().unwrap_or("").trim();
    let op = SearchOp::parse(op_token).ok_or_else(|| {
        Error::validation(format!(
            "unknown search operator '{op_token}' on field '{field}'"
        ))
    })?;

    let columns = match parts.next() {
        None => vec![to_snake_case(field)],
        Some(rest) => {
            let rest = rest.trim();
            let spec = rest.strip_prefix("column=").ok_or_else(|| {
                Error::validation(format!(
                    "malformed search tag on field '{field}': expected 'column=...', got '{rest}'"
                ))
            })?;
            let columns: Vec<String> = spec
                .split('|')
                .map(|c| c.trim().to_string())
                .filter(|c| !c.is_empty())
                .collect();
            if columns.is_empty() {
                return Err(Error::validation(format!(
                    "empty column list in search tag on field '{field}'"
                )));
            }
            columns
        }
    };

    Ok(SearchFieldSpec {
        field: field.to_string(),
        op,
        columns,
    })
}

/// Declarative search metadata for a query-parameter type: `(field, tag)`
/// pairs in the tag grammar. Usually written through [`search_params!`].
pub trait SearchParams: Send + Sync + 'static {
    fn search_fields() -> Vec<(&'static str, &'static str)>;
}

/// Compiled, cached plan translating a params object into predicates.
pub struct SearchPlan {
    specs: Vec<SearchFieldSpec>,
}

static PLAN_CACHE: std::sync::LazyLock<DashMap<TypeId, Arc<SearchPlan>>> =
    std::sync::LazyLock::new(DashMap::new);

/// Compile (or fetch from cache) the plan for `P`. Malformed tags surface
/// here, which the CRUD builders call at registration time.
pub fn plan_for<P: SearchParams>() -> Result<Arc<SearchPlan>, Error> {
    let type_id = TypeId::of::<P>();
    if let Some(plan) = PLAN_CACHE.get(&type_id) {
        return Ok(plan.clone());
    }
    let specs = P::search_fields()
        .into_iter()
        .map(|(field, tag)| parse_tag(field, tag))
        .collect::<Result<Vec<_>, _>>()?;
    let plan = Arc::new(SearchPlan { specs });
    PLAN_CACHE.insert(type_id, plan.clone());
    Ok(plan)
}

impl SearchPlan {
    pub fn from_specs(specs: Vec<SearchFieldSpec>) -> Self {
        Self { specs }
    }

    /// Walk the params object and emit predicates for every populated
    /// field. Empty values (null, empty string, zero, empty array) are
    /// omitted entirely; multiple populated fields AND-combine.
    pub fn apply(&self, params: &Map<String, Value>, builder: &mut ConditionBuilder) {
        for spec in &self.specs {
            let value = lookup_field(params, &spec.field);
            let Some(value) = value else { continue };
            if is_empty_value(value) {
                continue;
            }

            let per_column: Vec<Predicate> = spec
                .columns
                .iter()
                .filter_map(|column| column_predicate(column, spec.op, value))
                .collect();

            match per_column.len() {
                0 => {}
                1 => {
                    builder.push(per_column.into_iter().next().expect("len checked"));
                }
                _ => {
                    builder.push(Predicate::Or(per_column));
                }
            }
        }
    }
}

/// Field lookup tolerates both the declared name and its camelCase form,
/// since envelope params usually arrive camelCased.
fn lookup_field<'a>(params: &'a Map<String, Value>, field: &str) -> Option<&'a Value> {
    params
        .get(field)
        .or_else(|| params.get(&to_camel_case(field)))
}

/// Empty-value rule: zero scalars, empty strings, nulls and empty arrays
/// never become predicates.
fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Number(n) => n.as_i64() == Some(0) || n.as_f64() == Some(0.0),
        Value::Array(items) => items.is_empty(),
        Value::Bool(_) | Value::Object(_) => false,
    }
}

fn column_predicate(column: &str, op: SearchOp, value: &Value) -> Option<Predicate> {
    let column = column.to_string();
    let predicate = match op {
        SearchOp::Eq => cmp(column, CmpOp::Eq, value),
        SearchOp::Neq => cmp(column, CmpOp::Neq, value),
        SearchOp::Gt => cmp(column, CmpOp::Gt, value),
        SearchOp::Gte => cmp(column, CmpOp::Gte, value),
        SearchOp::Lt => cmp(column, CmpOp::Lt, value),
        SearchOp::Lte => cmp(column, CmpOp::Lte, value),
        SearchOp::Between | SearchOp::NotBetween => {
            let items = value.as_array()?;
            if items.len() != 2 {
                return None;
            }
            Predicate::Between {
                column,
                low: SqlValue::from_json(&items[0]),
                high: SqlValue::from_json(&items[1]),
                negated: op == SearchOp::NotBetween,
            }
        }
        SearchOp::In | SearchOp::NotIn => {
            let items = value.as_array()?;
            Predicate::In {
                column,
                values: items.iter().map(SqlValue::from_json).collect(),
                negated: op == SearchOp::NotIn,
            }
        }
        SearchOp::IsNull => Predicate::Null {
            column,
            negated: false,
        },
        SearchOp::IsNotNull => Predicate::Null {
            column,
            negated: true,
        },
        SearchOp::Contains => matcher(column, MatchKind::Contains, value, false, false)?,
        SearchOp::NotContains => matcher(column, MatchKind::Contains, value, false, true)?,
        SearchOp::StartsWith => matcher(column, MatchKind::StartsWith, value, false, false)?,
        SearchOp::NotStartsWith => matcher(column, MatchKind::StartsWith, value, false, true)?,
        SearchOp::EndsWith => matcher(column, MatchKind::EndsWith, value, false, false)?,
        SearchOp::NotEndsWith => matcher(column, MatchKind::EndsWith, value, false, true)?,
        SearchOp::IContains => matcher(column, MatchKind::Contains, value, true, false)?,
        SearchOp::INotContains => matcher(column, MatchKind::Contains, value, true, true)?,
        SearchOp::IStartsWith => matcher(column, MatchKind::StartsWith, value, true, false)?,
        SearchOp::INotStartsWith => matcher(column, MatchKind::StartsWith, value, true, true)?,
        SearchOp::IEndsWith => matcher(column, MatchKind::EndsWith, value, true, false)?,
        SearchOp::INotEndsWith => matcher(column, MatchKind::EndsWith, value, true, true)?,
    };
    Some(predicate)
}

fn cmp(column: String, op: CmpOp, value: &Value) -> Predicate {
    Predicate::Cmp {
        column,
        op,
        value: SqlValue::from_json(value),
    }
}

fn matcher(
    column: String,
    kind: MatchKind,
    value: &Value,
    case_insensitive: bool,
    negated: bool,
) -> Option<Predicate> {
    let text = match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    Some(Predicate::Match {
        column,
        kind,
        value: text,
        case_insensitive,
        negated,
    })
}

pub(crate) fn to_snake_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    for (i, c) in name.chars().enumerate() {
        if c.is_ascii_uppercase() {
            if i > 0 {
                out.push('_');
            }
            out.push(c.to_ascii_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}

pub(crate) fn to_camel_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut upper_next = false;
    for c in name.chars() {
        if c == '_' {
            upper_next = true;
        } else if upper_next {
            out.push(c.to_ascii_uppercase());
            upper_next = false;
        } else {
            out.push(c);
        }
    }
    out
}

/// Implement [`SearchParams`] for a type by listing its fields and search
/// tags:
///
/// ```ignore
/// search_params! {
///     UserSearch {
///         keyword: "contains,column=username|email",
///         status: "eq",
///         created_range: "between,column=created_at",
///     }
/// }
/// ```
#[macro_export]
macro_rules! search_params {
    ( $ty:ty { $( $field:ident : $tag:literal ),* $(,)? } ) => {
        impl $crate::search::SearchParams for $ty {
            fn search_fields() -> Vec<(&'static str, &'static str)> {
                vec![ $( (stringify!($field), $tag) ),* ]
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn apply(specs: Vec<SearchFieldSpec>, params: Value) -> Option<Predicate> {
        let plan = SearchPlan::from_specs(specs);
        let mut builder = ConditionBuilder::new();
        let Value::Object(map) = params else {
            panic!("params must be an object")
        };
        plan.apply(&map, &mut builder);
        builder.build()
    }

    #[test]
    fn multi_column_contains_becomes_or() {
        let spec = parse_tag("keyword", "contains,column=username|email").unwrap();
        let predicate = apply(vec![spec], json!({"keyword": "john"})).unwrap();

        let (sql, params) = crate::select::SelectBuilder::new("users")
            .and_where(predicate)
            .build_select();
        assert_eq!(
            sql,
            "SELECT * FROM users WHERE (username LIKE ? OR email LIKE ?)"
        );
        assert_eq!(
            params,
            vec![
                SqlValue::Text("%john%".to_string()),
                SqlValue::Text("%john%".to_string())
            ]
        );
    }

    #[test]
    fn empty_value_emits_no_predicate() {
        let spec = parse_tag("keyword", "contains,column=username|email").unwrap();
        assert!(apply(vec![spec.clone()], json!({"keyword": ""})).is_none());
        assert!(apply(vec![spec.clone()], json!({})).is_none());
        assert!(apply(vec![spec], json!({"keyword": null})).is_none());
    }

    #[test]
    fn zero_scalar_is_omitted() {
        let spec = parse_tag("status", "eq").unwrap();
        assert!(apply(vec![spec.clone()], json!({"status": 0})).is_none());
        assert!(apply(vec![spec], json!({"status": 2})).is_some());
    }

    #[test]
    fn default_column_is_snake_case_of_field() {
        let spec = parse_tag("createdBy", "eq").unwrap();
        assert_eq!(spec.columns, vec!["created_by"]);
    }

    #[test]
    fn camel_case_params_key_matches_snake_field() {
        let spec = parse_tag("created_by", "eq").unwrap();
        let predicate = apply(vec![spec], json!({"createdBy": "u1"})).unwrap();
        let (sql, _) = crate::select::SelectBuilder::new("t")
            .and_where(predicate)
            .build_select();
        assert_eq!(sql, "SELECT * FROM t WHERE created_by = ?");
    }

    #[test]
    fn populated_fields_and_combine() {
        let specs = vec![
            parse_tag("status", "eq").unwrap(),
            parse_tag("name", "startsWith").unwrap(),
        ];
        let predicate = apply(specs, json!({"status": 1, "name": "jo"})).unwrap();
        let (sql, params) = crate::select::SelectBuilder::new("t")
            .and_where(predicate)
            .build_select();
        assert_eq!(sql, "SELECT * FROM t WHERE (status = ? AND name LIKE ?)");
        assert_eq!(params[1], SqlValue::Text("jo%".to_string()));
    }

    #[test]
    fn between_takes_two_element_array() {
        let spec = parse_tag("created_at", "between").unwrap();
        let predicate = apply(
            vec![spec.clone()],
            json!({"createdAt": ["2026-01-01", "2026-02-01"]}),
        )
        .unwrap();
        let (sql, _) = crate::select::SelectBuilder::new("t")
            .and_where(predicate)
            .build_select();
        assert_eq!(sql, "SELECT * FROM t WHERE created_at BETWEEN ? AND ?");

        // Wrong arity is omitted rather than generating invalid SQL.
        assert!(apply(vec![spec], json!({"createdAt": ["2026-01-01"]})).is_none());
    }

    #[test]
    fn is_null_triggers_on_flag() {
        let spec = parse_tag("deleted", "isNull,column=deleted_at").unwrap();
        let predicate = apply(vec![spec], json!({"deleted": true})).unwrap();
        let (sql, _) = crate::select::SelectBuilder::new("t")
            .and_where(predicate)
            .build_select();
        assert_eq!(sql, "SELECT * FROM t WHERE deleted_at IS NULL");
    }

    #[test]
    fn unknown_operator_is_startup_error() {
        let err = parse_tag("f", "likeish").unwrap_err();
        assert_eq!(err.code(), onegate_core::code::VALIDATION_FAILED);
    }

    #[test]
    fn case_insensitive_ops_mark_predicate() {
        let spec = parse_tag("name", "iContains").unwrap();
        let predicate = apply(vec![spec], json!({"name": "JoHn"})).unwrap();
        match predicate {
            Predicate::Match {
                case_insensitive, ..
            } => assert!(case_insensitive),
            other => panic!("expected match predicate, got {other:?}"),
        }
    }
}
