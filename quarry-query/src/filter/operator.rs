//! The closed operator table.
//!
//! Each operator turns `(query, quoted column, value)` into a new query with one
//! more `WHERE` conjunct. Dispatch inside an operator is on the value's runtime
//! [`Shape`]; a shape an operator has no rule for is an [`InvalidFilter`] error.
//!
//! [`InvalidFilter`]: crate::ErrorCode::InvalidFilter

use std::fmt;

use crate::dialect::{CaseInsensitiveLike, Dialect};
use crate::error::{QueryError, QueryResult};
use crate::query::Query;
use crate::sql::SqlFragment;
use crate::value::{Shape, Value};

/// A filter operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    /// `col < ?`
    Lt,
    /// `col <= ?`
    Lte,
    /// `col > ?`
    Gt,
    /// `col >= ?`
    Gte,
    /// Equality, membership or `IS NULL`.
    Eq,
    /// Inequality, non-membership or `IS NOT NULL`.
    Neq,
    /// `IS NULL` / `IS NOT NULL` depending on a truthiness token.
    Exists,
    /// Case-insensitive "starts with".
    Prefix,
    /// Case-insensitive "ends with".
    Suffix,
    /// Membership in a list or sub-query.
    In,
    /// Case-insensitive "contains substring".
    Match,
    /// Array overlap or JSON containment (PostgreSQL only).
    Contains,
}

const OPERATORS: [(&str, Operator); 12] = [
    ("lt", Operator::Lt),
    ("lte", Operator::Lte),
    ("gt", Operator::Gt),
    ("gte", Operator::Gte),
    ("eq", Operator::Eq),
    ("neq", Operator::Neq),
    ("exists", Operator::Exists),
    ("prefix", Operator::Prefix),
    ("suffix", Operator::Suffix),
    ("in", Operator::In),
    ("match", Operator::Match),
    ("contains", Operator::Contains),
];

/// Escape `\`, `%` and `_` so a literal can be embedded in a `LIKE` pattern.
///
/// ```rust
/// use quarry_query::filter::escape_like;
///
/// assert_eq!(escape_like("50%_off\\"), "50\\%\\_off\\\\");
/// ```
pub fn escape_like(literal: &str) -> String {
    let mut escaped = String::with_capacity(literal.len() + 4);
    for c in literal.chars() {
        if matches!(c, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

impl Operator {
    /// Every operator, in table order.
    pub fn all() -> impl Iterator<Item = Operator> {
        OPERATORS.iter().map(|(_, op)| *op)
    }

    /// The operator's name as used in filter keys.
    pub fn name(self) -> &'static str {
        match self {
            Self::Lt => "lt",
            Self::Lte => "lte",
            Self::Gt => "gt",
            Self::Gte => "gte",
            Self::Eq => "eq",
            Self::Neq => "neq",
            Self::Exists => "exists",
            Self::Prefix => "prefix",
            Self::Suffix => "suffix",
            Self::In => "in",
            Self::Match => "match",
            Self::Contains => "contains",
        }
    }

    /// Check if `dialect` has the SQL this operator needs.
    pub fn is_supported_by(self, dialect: &Dialect) -> bool {
        match self {
            Self::Contains => dialect.native_arrays || dialect.json_containment,
            _ => true,
        }
    }

    /// Resolve an operator name for a dialect.
    pub fn lookup(name: &str, dialect: &Dialect) -> QueryResult<Self> {
        OPERATORS
            .iter()
            .find(|(candidate, _)| *candidate == name)
            .map(|(_, op)| *op)
            .filter(|op| op.is_supported_by(dialect))
            .ok_or_else(|| QueryError::unknown_operator(name))
    }

    /// Operators that interpret a sequence as a set of candidate values.
    ///
    /// Encoders are applied to each element of such a sequence rather than to
    /// the sequence as a whole.
    pub fn expects_sequence(self) -> bool {
        matches!(self, Self::Eq | Self::In | Self::Contains)
    }

    /// Append this operator's predicate on `column` (already quoted) to `query`.
    pub fn apply(self, query: Query, column: &str, value: &Value) -> QueryResult<Query> {
        let dialect = query.dialect();
        let predicate = match self {
            Self::Lt => compare(self, column, "<", value)?,
            Self::Lte => compare(self, column, "<=", value)?,
            Self::Gt => compare(self, column, ">", value)?,
            Self::Gte => compare(self, column, ">=", value)?,
            Self::Eq => equal(self, column, value)?,
            Self::Neq => match not_equal(self, column, value)? {
                Some(predicate) => predicate,
                None => return Ok(query),
            },
            Self::Exists => exists(column, value),
            Self::Prefix => pattern(self, &dialect, column, value, |s| format!("{}%", s))?,
            Self::Suffix => pattern(self, &dialect, column, value, |s| format!("%{}", s))?,
            Self::Match => pattern(self, &dialect, column, value, |s| format!("%{}%", s))?,
            Self::In => member(self, column, value)?,
            Self::Contains => contains(self, &dialect, column, value)?,
        };
        Ok(query.where_fragment(predicate))
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

fn unsupported(op: Operator, column: &str, value: &Value) -> QueryError {
    QueryError::invalid_filter(
        column,
        format!("operator `{}` has no rule for a {} value ({})", op, value.shape(), value.kind()),
    )
}

fn always_false() -> SqlFragment {
    SqlFragment::raw("FALSE")
}

/// Bindable form of a scalar or record.
fn bound(value: &Value) -> QueryResult<Value> {
    match value {
        Value::Record(_) => Ok(Value::Json(value.to_json()?)),
        other => Ok(other.clone()),
    }
}

fn compare(op: Operator, column: &str, sql_op: &str, value: &Value) -> QueryResult<SqlFragment> {
    match value.shape() {
        Shape::Scalar => {
            let mut fragment = SqlFragment::raw(format!("{} {} ", column, sql_op));
            fragment.push_param(value.clone());
            Ok(fragment)
        }
        _ => Err(unsupported(op, column, value)),
    }
}

fn list_predicate(column: &str, keyword: &str, items: &[Value]) -> SqlFragment {
    let mut fragment = SqlFragment::raw(format!("{} {} (", column, keyword));
    fragment.push_param_list(items.iter().cloned()).push(")");
    fragment
}

fn query_predicate(column: &str, keyword: &str, query: &Query) -> SqlFragment {
    let mut fragment = SqlFragment::raw(format!("{} {} (", column, keyword));
    fragment.push_query(query.clone()).push(")");
    fragment
}

fn equal(op: Operator, column: &str, value: &Value) -> QueryResult<SqlFragment> {
    match value {
        Value::List(items) if items.is_empty() => Ok(always_false()),
        Value::List(items) => Ok(list_predicate(column, "IN", items)),
        Value::Query(query) => Ok(query_predicate(column, "IN", query)),
        Value::Null => Ok(SqlFragment::raw(format!("{} IS NULL", column))),
        other if matches!(other.shape(), Shape::Scalar | Shape::Record) => {
            let mut fragment = SqlFragment::raw(format!("{} = ", column));
            fragment.push_param(bound(other)?);
            Ok(fragment)
        }
        other => Err(unsupported(op, column, other)),
    }
}

/// `None` means the filter matches every row and adds no conjunct.
fn not_equal(op: Operator, column: &str, value: &Value) -> QueryResult<Option<SqlFragment>> {
    match value {
        Value::List(items) if items.is_empty() => Ok(None),
        Value::List(items) => Ok(Some(list_predicate(column, "NOT IN", items))),
        Value::Query(query) => Ok(Some(query_predicate(column, "NOT IN", query))),
        Value::Null => Ok(Some(SqlFragment::raw(format!("{} IS NOT NULL", column)))),
        other if matches!(other.shape(), Shape::Scalar | Shape::Record) => {
            let mut fragment = SqlFragment::raw(format!("{} != ", column));
            fragment.push_param(bound(other)?);
            Ok(Some(fragment))
        }
        other => Err(unsupported(op, column, other)),
    }
}

fn exists(column: &str, value: &Value) -> SqlFragment {
    if value.is_falsy_token() {
        SqlFragment::raw(format!("{} IS NULL", column))
    } else {
        SqlFragment::raw(format!("{} IS NOT NULL", column))
    }
}

fn pattern(
    op: Operator,
    dialect: &Dialect,
    column: &str,
    value: &Value,
    wrap: impl FnOnce(&str) -> String,
) -> QueryResult<SqlFragment> {
    let text = value.pattern_text().ok_or_else(|| unsupported(op, column, value))?;
    let pattern = wrap(&escape_like(&text));
    let mut fragment = match dialect.case_insensitive_like {
        CaseInsensitiveLike::ILike => {
            let mut fragment = SqlFragment::raw(format!("{} ILIKE ", column));
            fragment.push_param(pattern);
            fragment
        }
        CaseInsensitiveLike::LowerLike => {
            let mut fragment = SqlFragment::raw(format!("LOWER({}) LIKE LOWER(", column));
            fragment.push_param(pattern).push(")");
            fragment
        }
    };
    fragment.push(" ESCAPE '\\'");
    Ok(fragment)
}

fn member(op: Operator, column: &str, value: &Value) -> QueryResult<SqlFragment> {
    match value {
        Value::List(items) if items.is_empty() => Ok(always_false()),
        Value::List(items) => Ok(list_predicate(column, "IN", items)),
        Value::Query(query) => Ok(query_predicate(column, "IN", query)),
        other => Err(unsupported(op, column, other)),
    }
}

fn contains(op: Operator, dialect: &Dialect, column: &str, value: &Value) -> QueryResult<SqlFragment> {
    let overlap = |items: &[Value]| -> QueryResult<SqlFragment> {
        if !dialect.native_arrays {
            return Err(unsupported(op, column, value));
        }
        if items.is_empty() {
            return Ok(always_false());
        }
        let mut fragment = SqlFragment::raw(format!("{} && ", column));
        fragment.push_param(Value::Array(items.to_vec()));
        Ok(fragment)
    };

    match value {
        Value::List(items) | Value::Array(items) => overlap(items),
        Value::Record(_) | Value::Json(_) if dialect.json_containment => {
            let mut fragment = SqlFragment::raw(format!("{} @> ", column));
            fragment.push_param(Value::Json(value.to_json()?));
            Ok(fragment)
        }
        other if other.shape() == Shape::Scalar => overlap(std::slice::from_ref(other)),
        other => Err(unsupported(op, column, other)),
    }
}
