//! Filter expressions and the filter compiler.
//!
//! A filter expression is an ordered mapping from *filter key* to value. A key
//! is `column[.subcolumn]*` optionally followed by `__operator`; the operator
//! defaults to `eq`.
//!
//! ```rust
//! use quarry_query::filter::{FilterCompiler, FilterExpression, NoCustomFilters};
//! use quarry_query::{Dialect, Query, filters};
//!
//! let expression = filters! {
//!     "topic_id" => 1001,
//!     "questions.content__prefix" => "why",
//! };
//! let query = FilterCompiler::new(Dialect::POSTGRES)
//!     .filter_by(Query::table(Dialect::POSTGRES, "questions"), &expression, &NoCustomFilters)
//!     .unwrap();
//!
//! let (sql, _) = query.to_select_sql();
//! assert_eq!(
//!     sql,
//!     r#"SELECT * FROM "questions" WHERE ("topic_id" = $1) AND ("questions"."content" ILIKE $2 ESCAPE '\')"#
//! );
//! ```

mod operator;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::dialect::Dialect;
use crate::error::{QueryError, QueryResult};
use crate::query::Query;
use crate::value::Value;

pub use operator::{Operator, escape_like};

/// Separator between the column path and the operator in a filter key.
pub const OPERATOR_SEPARATOR: &str = "__";

/// An ordered mapping from filter key to value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FilterExpression(IndexMap<String, Value>);

impl FilterExpression {
    /// Create an empty expression.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an entry, builder style.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Add or replace an entry.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.0.insert(key.into(), value.into())
    }

    /// Look up an entry.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Iterate entries in insertion order.
    pub fn iter(&self) -> indexmap::map::Iter<'_, String, Value> {
        self.0.iter()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Check if there are no entries.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Build from a JSON object.
    pub fn from_json(json: serde_json::Value) -> QueryResult<Self> {
        match Value::from_json(json) {
            Value::Record(record) => Ok(Self(record)),
            Value::Null => Ok(Self::new()),
            other => Err(QueryError::invalid_filter(
                "<expression>",
                format!("expected an object, got {}", other.kind()),
            )),
        }
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for FilterExpression {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

impl IntoIterator for FilterExpression {
    type Item = (String, Value);
    type IntoIter = indexmap::map::IntoIter<String, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a FilterExpression {
    type Item = (&'a String, &'a Value);
    type IntoIter = indexmap::map::Iter<'a, String, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Build a [`FilterExpression`] from `key => value` pairs.
#[macro_export]
macro_rules! filters {
    () => {
        $crate::filter::FilterExpression::new()
    };
    ($($key:expr => $value:expr),+ $(,)?) => {{
        let mut expression = $crate::filter::FilterExpression::new();
        $(
            expression.insert($key, $value);
        )+
        expression
    }};
}

/// A parsed filter key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilterKey<'a> {
    /// The unquoted, possibly dotted column path.
    pub column: &'a str,
    /// The operator name.
    pub operator: &'a str,
}

impl<'a> FilterKey<'a> {
    /// Split on the first `__`; the operator defaults to `eq`.
    pub fn parse(key: &'a str) -> Self {
        match key.split_once(OPERATOR_SEPARATOR) {
            Some((column, operator)) => Self { column, operator },
            None => Self {
                column: key,
                operator: "eq",
            },
        }
    }

    /// The last segment of the column path (the field an encoder is keyed by).
    pub fn field(&self) -> &'a str {
        self.column.rsplit('.').next().unwrap_or(self.column)
    }
}

/// Signature of a custom filter.
pub type CustomFilterFn = dyn Fn(&dyn FilterSource, Query, &Value) -> QueryResult<Query> + Send + Sync;

/// A named override for one filter key.
#[derive(Clone)]
pub struct CustomFilter(Arc<CustomFilterFn>);

impl CustomFilter {
    /// Wrap a callback.
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&dyn FilterSource, Query, &Value) -> QueryResult<Query> + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    /// Invoke the callback.
    pub fn call(&self, source: &dyn FilterSource, query: Query, value: &Value) -> QueryResult<Query> {
        (self.0)(source, query, value)
    }
}

impl fmt::Debug for CustomFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CustomFilter(..)")
    }
}

/// Custom filters registered for one model, keyed by filter key.
#[derive(Debug, Clone, Default)]
pub struct CustomFilters {
    filters: HashMap<String, CustomFilter>,
}

impl CustomFilters {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a filter under `name`, replacing any previous one.
    pub fn register<F>(&mut self, name: impl Into<String>, f: F) -> &mut Self
    where
        F: Fn(&dyn FilterSource, Query, &Value) -> QueryResult<Query> + Send + Sync + 'static,
    {
        self.filters.insert(name.into(), CustomFilter::new(f));
        self
    }

    /// Look up a filter.
    pub fn get(&self, name: &str) -> Option<&CustomFilter> {
        self.filters.get(name)
    }

    /// Check if a filter is registered under `name`.
    pub fn contains(&self, name: &str) -> bool {
        self.filters.contains_key(name)
    }

    /// Number of registered filters.
    pub fn len(&self) -> usize {
        self.filters.len()
    }

    /// Check if no filters are registered.
    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }
}

/// What the compiler needs from the owning repository.
///
/// Custom filters receive the source too, so they can build on the
/// repository's table or compile nested expressions.
pub trait FilterSource: Send + Sync {
    /// The custom filter registered under `name`, if any.
    fn custom_filter(&self, name: &str) -> Option<&CustomFilter>;

    /// The base query over the owning table.
    ///
    /// Only read by custom filters, which build sub-queries from it.
    fn table(&self) -> Query;

    /// The owning table's primary key column.
    fn primary_key(&self) -> &str;
}

impl dyn FilterSource + '_ {
    /// Compile `filters` onto `query` with this source's custom filters.
    pub fn filter_by(&self, query: Query, filters: &FilterExpression) -> QueryResult<Query> {
        FilterCompiler::new(query.dialect()).filter_by(query, filters, self)
    }
}

/// A source without custom filters, for compiling ad-hoc expressions.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCustomFilters;

impl FilterSource for NoCustomFilters {
    fn custom_filter(&self, _name: &str) -> Option<&CustomFilter> {
        None
    }

    /// An unnamed generic-dialect table.
    ///
    /// Only custom filters consult the table, and none are registered here,
    /// so compiling through this source never reads it.
    fn table(&self) -> Query {
        Query::table(Dialect::default(), "")
    }

    fn primary_key(&self) -> &str {
        "id"
    }
}

/// Compiles filter expressions for one dialect.
#[derive(Debug, Clone, Copy)]
pub struct FilterCompiler {
    dialect: Dialect,
}

impl FilterCompiler {
    /// Create a compiler for `dialect`.
    pub fn new(dialect: Dialect) -> Self {
        Self { dialect }
    }

    /// The dialect this compiler targets.
    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// Refine `query` with every entry of `filters`, in order.
    pub fn filter_by(
        &self,
        mut query: Query,
        filters: &FilterExpression,
        source: &dyn FilterSource,
    ) -> QueryResult<Query> {
        for (key, value) in filters {
            if let Some(custom) = source.custom_filter(key) {
                trace!(key = %key, "Applying custom filter");
                query = custom.call(source, query, value)?;
                continue;
            }

            let parsed = FilterKey::parse(key);
            let column = self.dialect.quote_path(parsed.column)?;
            let operator = Operator::lookup(parsed.operator, &self.dialect)?;
            trace!(key = %key, operator = %operator, "Applying filter");
            query = operator
                .apply(query, &column, value)
                .map_err(|err| err.with_field(key.as_str()))?;
        }
        Ok(query)
    }
}

/// Compile `filters` onto `query` using the query's own dialect.
pub fn filter_by(query: Query, filters: &FilterExpression, source: &dyn FilterSource) -> QueryResult<Query> {
    FilterCompiler::new(query.dialect()).filter_by(query, filters, source)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use crate::sql::SqlFragment;
    use pretty_assertions::assert_eq;

    struct Questions {
        dialect: Dialect,
        custom: CustomFilters,
    }

    impl FilterSource for Questions {
        fn custom_filter(&self, name: &str) -> Option<&CustomFilter> {
            self.custom.get(name)
        }

        fn table(&self) -> Query {
            Query::table(self.dialect, "questions")
        }

        fn primary_key(&self) -> &str {
            "id"
        }
    }

    fn questions(dialect: Dialect) -> Questions {
        let mut custom = CustomFilters::new();
        custom.register("content.starts_with", |_source, query, value| {
            let mut fragment = SqlFragment::raw("\"content\" LIKE ");
            fragment.push_param(format!("{}%", value.pattern_text().unwrap_or_default()));
            Ok(query.where_fragment(fragment))
        });
        custom.register("topic", |source, query, value| {
            let nested = FilterExpression::new().with("topic_id", value.clone());
            source.filter_by(query, &nested)
        });
        Questions { dialect, custom }
    }

    fn compile(dialect: Dialect, filters: FilterExpression) -> QueryResult<(String, Vec<Value>)> {
        let source = questions(dialect);
        let query = filter_by(source.table(), &filters, &source)?;
        Ok(query.to_select_sql())
    }

    #[test]
    fn test_parse_key() {
        assert_eq!(FilterKey::parse("id"), FilterKey { column: "id", operator: "eq" });
        assert_eq!(
            FilterKey::parse("questions.custom__contains"),
            FilterKey { column: "questions.custom", operator: "contains" }
        );
        assert_eq!(FilterKey::parse("a__b__c").operator, "b__c");
        assert_eq!(FilterKey::parse("questions.custom__contains").field(), "custom");
    }

    #[test]
    fn test_entries_compile_in_order() {
        let (sql, params) = compile(
            Dialect::GENERIC,
            filters! { "id__gt" => 2001, "topic_id" => vec![1001, 1002] },
        )
        .unwrap();
        assert_eq!(
            sql,
            r#"SELECT * FROM "questions" WHERE ("id" > ?) AND ("topic_id" IN (?, ?))"#
        );
        assert_eq!(params, vec![Value::Int(2001), Value::Int(1001), Value::Int(1002)]);
    }

    #[test]
    fn test_identifiers_are_quoted_per_segment() {
        let (sql, _) = compile(Dialect::POSTGRES, filters! { "questions.id\"; DROP TABLE x; --" => 1 }).unwrap();
        assert_eq!(
            sql,
            r#"SELECT * FROM "questions" WHERE ("questions"."id""; DROP TABLE x; --" = $1)"#
        );
    }

    #[test]
    fn test_custom_filter_replaces_dispatch() {
        let (sql, params) =
            compile(Dialect::POSTGRES, filters! { "content.starts_with" => "Why" }).unwrap();
        assert_eq!(sql, r#"SELECT * FROM "questions" WHERE ("content" LIKE $1)"#);
        assert_eq!(params, vec![Value::from("Why%")]);
    }

    #[test]
    fn test_no_custom_filters_compiles_onto_the_given_query() {
        let query = filter_by(
            Query::table(Dialect::POSTGRES, "answers"),
            &filters! { "content.starts_with" => "Why" },
            &NoCustomFilters,
        )
        .unwrap();
        let (sql, params) = query.to_select_sql();
        assert_eq!(sql, r#"SELECT * FROM "answers" WHERE ("content"."starts_with" = $1)"#);
        assert_eq!(params, vec![Value::from("Why")]);
    }

    #[test]
    fn test_custom_filter_can_compile_nested_filters() {
        let (sql, _) = compile(Dialect::GENERIC, filters! { "topic" => 1001 }).unwrap();
        assert_eq!(sql, r#"SELECT * FROM "questions" WHERE ("topic_id" = ?)"#);
    }

    #[test]
    fn test_unknown_operator() {
        let err = compile(Dialect::POSTGRES, filters! { "id__between" => 1 }).unwrap_err();
        assert_eq!(err.code, ErrorCode::UnknownOperator);

        let err = compile(Dialect::GENERIC, filters! { "labels__contains" => vec!["a"] }).unwrap_err();
        assert_eq!(err.code, ErrorCode::UnknownOperator);
    }

    #[test]
    fn test_shape_errors_name_the_key() {
        let err = compile(Dialect::POSTGRES, filters! { "id__lt" => Value::Null }).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidFilter);
        assert_eq!(err.context.field.as_deref(), Some("id__lt"));
    }

    #[test]
    fn test_from_json() {
        let expression =
            FilterExpression::from_json(serde_json::json!({"id__eq": [2002, 2003], "labels__contains": []}))
                .unwrap();
        assert_eq!(expression.len(), 2);
        assert_eq!(expression.get("id__eq"), Some(&Value::from(vec![2002, 2003])));
        assert!(FilterExpression::from_json(serde_json::json!([1])).is_err());
    }
}
