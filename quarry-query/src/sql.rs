//! SQL fragments and statement rendering.
//!
//! Predicates are built as [`SqlFragment`]s: raw SQL text interleaved with
//! bound values and embedded sub-queries. A [`SqlBuilder`] renders fragments
//! for one dialect, numbering placeholders across the whole statement.

use crate::dialect::Dialect;
use crate::query::Query;
use crate::value::Value;

/// One piece of a fragment.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlPart {
    /// Literal SQL text (already quoted identifiers, keywords, operators).
    Text(String),
    /// A value passed as a bound parameter.
    Param(Value),
    /// A nested `SELECT`.
    SubQuery(Box<Query>),
}

/// A dialect-independent piece of SQL with bound values.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SqlFragment {
    parts: Vec<SqlPart>,
}

impl SqlFragment {
    /// Create an empty fragment.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a fragment holding literal SQL.
    pub fn raw(sql: impl Into<String>) -> Self {
        let mut fragment = Self::new();
        fragment.push(sql);
        fragment
    }

    /// Push literal SQL.
    pub fn push(&mut self, sql: impl Into<String>) -> &mut Self {
        let sql = sql.into();
        if let Some(SqlPart::Text(last)) = self.parts.last_mut() {
            last.push_str(&sql);
        } else {
            self.parts.push(SqlPart::Text(sql));
        }
        self
    }

    /// Push a bound parameter.
    pub fn push_param(&mut self, value: impl Into<Value>) -> &mut Self {
        self.parts.push(SqlPart::Param(value.into()));
        self
    }

    /// Push a comma separated list of bound parameters.
    pub fn push_param_list(&mut self, values: impl IntoIterator<Item = Value>) -> &mut Self {
        for (i, value) in values.into_iter().enumerate() {
            if i > 0 {
                self.push(", ");
            }
            self.push_param(value);
        }
        self
    }

    /// Push a sub-query.
    pub fn push_query(&mut self, query: Query) -> &mut Self {
        self.parts.push(SqlPart::SubQuery(Box::new(query)));
        self
    }

    /// Check if the fragment is empty.
    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    /// The fragment's parts.
    pub fn parts(&self) -> &[SqlPart] {
        &self.parts
    }

    /// Take the fragment by value (for chaining off `&mut` builders).
    pub fn build(&mut self) -> Self {
        std::mem::take(self)
    }
}

/// Renders SQL for one dialect.
#[derive(Debug, Clone)]
pub struct SqlBuilder {
    dialect: Dialect,
    sql: String,
    params: Vec<Value>,
}

impl SqlBuilder {
    /// Create a new SQL builder.
    pub fn new(dialect: Dialect) -> Self {
        Self {
            dialect,
            sql: String::with_capacity(128),
            params: Vec::new(),
        }
    }

    /// The dialect being rendered.
    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// Push a literal SQL string.
    pub fn push(&mut self, sql: impl AsRef<str>) -> &mut Self {
        self.sql.push_str(sql.as_ref());
        self
    }

    /// Push a quoted identifier.
    pub fn push_identifier(&mut self, name: &str) -> &mut Self {
        let quoted = self.dialect.quote_identifier(name);
        self.sql.push_str(&quoted);
        self
    }

    /// Push a bound parameter and its placeholder.
    ///
    /// An empty native array is inlined as the dialect's empty-array literal.
    pub fn push_param(&mut self, value: Value) -> &mut Self {
        if let Value::Array(items) = &value {
            if let (true, Some(literal)) = (items.is_empty(), self.dialect.empty_array_literal()) {
                self.sql.push_str(literal);
                return self;
            }
        }
        self.params.push(value);
        let placeholder = self.dialect.placeholder(self.params.len());
        self.sql.push_str(&placeholder);
        self
    }

    /// Render a fragment.
    pub fn push_fragment(&mut self, fragment: &SqlFragment) -> &mut Self {
        for part in fragment.parts() {
            match part {
                SqlPart::Text(text) => {
                    self.sql.push_str(text);
                }
                SqlPart::Param(value) => {
                    self.push_param(value.clone());
                }
                SqlPart::SubQuery(query) => {
                    query.write_select(self);
                }
            }
        }
        self
    }

    /// Get the current SQL string.
    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// Get the current parameters.
    pub fn params(&self) -> &[Value] {
        &self.params
    }

    /// Build the final SQL string and parameters.
    pub fn build(self) -> (String, Vec<Value>) {
        (self.sql, self.params)
    }
}
