//! The query (dataset) value that filters refine and statements render from.
//!
//! A [`Query`] is a plain value: every refinement consumes it and returns a new
//! one, so filter operators can be chained without shared state.
//!
//! ```rust
//! use quarry_query::{Dialect, OrderByField, Query};
//!
//! let query = Query::table(Dialect::POSTGRES, "questions")
//!     .where_eq("topic_id", 1001)
//!     .unwrap()
//!     .order_by(OrderByField::desc("id"))
//!     .unwrap()
//!     .limit(10);
//!
//! let (sql, params) = query.to_select_sql();
//! assert_eq!(
//!     sql,
//!     r#"SELECT * FROM "questions" WHERE ("topic_id" = $1) ORDER BY "id" DESC LIMIT 10"#
//! );
//! assert_eq!(params.len(), 1);
//! ```

use tracing::debug;

use crate::dialect::Dialect;
use crate::error::{QueryError, QueryResult};
use crate::pagination::Pagination;
use crate::sql::{SqlBuilder, SqlFragment};
use crate::types::{OrderByField, SortOrder};
use crate::value::{Record, Value};

/// A table query with conjunctive conditions, ordering and a row window.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    dialect: Dialect,
    table: String,
    select: Option<SqlFragment>,
    conditions: Vec<SqlFragment>,
    order: Vec<(String, SortOrder)>,
    limit: Option<u64>,
    offset: Option<u64>,
}

impl Query {
    /// Start a query over every row of `table`.
    pub fn table(dialect: Dialect, table: impl Into<String>) -> Self {
        Self {
            dialect,
            table: table.into(),
            select: None,
            conditions: Vec::new(),
            order: Vec::new(),
            limit: None,
            offset: None,
        }
    }

    /// The dialect this query renders for.
    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// The unquoted table name.
    pub fn table_name(&self) -> &str {
        &self.table
    }

    /// The `WHERE` conjuncts added so far.
    pub fn conditions(&self) -> &[SqlFragment] {
        &self.conditions
    }

    /// The current limit, if any.
    pub fn limit_value(&self) -> Option<u64> {
        self.limit
    }

    /// The current offset, if any.
    pub fn offset_value(&self) -> Option<u64> {
        self.offset
    }

    /// Check if any ordering term has been applied.
    pub fn is_ordered(&self) -> bool {
        !self.order.is_empty()
    }

    /// Project the given column paths instead of `*`.
    pub fn select(mut self, columns: &[&str]) -> QueryResult<Self> {
        let mut fragment = SqlFragment::new();
        for (i, column) in columns.iter().enumerate() {
            if i > 0 {
                fragment.push(", ");
            }
            fragment.push(self.dialect.quote_path(column)?);
        }
        self.select = Some(fragment);
        Ok(self)
    }

    /// Project a raw fragment instead of `*`.
    pub fn select_raw(mut self, fragment: SqlFragment) -> Self {
        self.select = Some(fragment);
        self
    }

    /// Add a conjunct.
    pub fn where_fragment(mut self, fragment: SqlFragment) -> Self {
        self.conditions.push(fragment);
        self
    }

    /// Add `column = value` (or `column IS NULL`).
    pub fn where_eq(self, column: &str, value: impl Into<Value>) -> QueryResult<Self> {
        let quoted = self.dialect.quote_path(column)?;
        let value = value.into();
        let mut fragment = SqlFragment::raw(quoted);
        if value.is_null() {
            fragment.push(" IS NULL");
        } else {
            fragment.push(" = ").push_param(value);
        }
        Ok(self.where_fragment(fragment))
    }

    /// Append an ordering term.
    pub fn order_by(mut self, field: OrderByField) -> QueryResult<Self> {
        let quoted = self.dialect.quote_path(&field.column)?;
        self.order.push((quoted, field.order));
        Ok(self)
    }

    /// Drop every ordering term.
    pub fn unordered(mut self) -> Self {
        self.order.clear();
        self
    }

    /// Limit the number of rows.
    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Skip rows.
    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Apply `LIMIT items_per_page OFFSET (page - 1) * items_per_page`.
    pub fn paginate(self, pagination: &Pagination) -> Self {
        self.limit(pagination.limit()).offset(pagination.offset())
    }

    /// Drop the row window.
    pub fn unpaginated(mut self) -> Self {
        self.limit = None;
        self.offset = None;
        self
    }

    fn write_from_where(&self, builder: &mut SqlBuilder) {
        builder.push(" FROM ").push_identifier(&self.table);
        for (i, condition) in self.conditions.iter().enumerate() {
            builder.push(if i == 0 { " WHERE (" } else { " AND (" });
            builder.push_fragment(condition).push(")");
        }
    }

    fn write_window(&self, builder: &mut SqlBuilder, limit: Option<u64>, offset: Option<u64>) {
        match (limit, offset) {
            (Some(limit), Some(offset)) => {
                builder.push(format!(" LIMIT {} OFFSET {}", limit, offset));
            }
            (Some(limit), None) => {
                builder.push(format!(" LIMIT {}", limit));
            }
            (None, Some(offset)) if self.dialect.is_postgres() => {
                builder.push(format!(" OFFSET {}", offset));
            }
            (None, Some(offset)) => {
                builder.push(format!(" LIMIT -1 OFFSET {}", offset));
            }
            (None, None) => {}
        }
    }

    /// Write this query as a `SELECT` into `builder`.
    ///
    /// Used directly when the query is embedded as a sub-query.
    pub fn write_select(&self, builder: &mut SqlBuilder) {
        builder.push("SELECT ");
        match &self.select {
            Some(fragment) => {
                builder.push_fragment(fragment);
            }
            None => {
                builder.push("*");
            }
        }
        self.write_from_where(builder);
        for (i, (column, order)) in self.order.iter().enumerate() {
            builder.push(if i == 0 { " ORDER BY " } else { ", " });
            builder.push(column).push(" ").push(order.as_sql());
        }
        self.write_window(builder, self.limit, self.offset);
    }

    fn finish(builder: SqlBuilder) -> (String, Vec<Value>) {
        let (sql, params) = builder.build();
        debug!(sql = %sql, params = params.len(), "Rendered SQL");
        (sql, params)
    }

    /// Render the `SELECT` statement.
    pub fn to_select_sql(&self) -> (String, Vec<Value>) {
        let mut builder = SqlBuilder::new(self.dialect);
        self.write_select(&mut builder);
        Self::finish(builder)
    }

    /// Render an exact `COUNT(*)` over the filtered rows.
    pub fn to_count_sql(&self) -> (String, Vec<Value>) {
        let mut builder = SqlBuilder::new(self.dialect);
        builder.push("SELECT COUNT(*) AS ").push_identifier("count");
        self.write_from_where(&mut builder);
        Self::finish(builder)
    }

    /// Render a count of at most `cap + 1` filtered rows after skipping `offset`.
    ///
    /// The extra row lets callers tell "exactly `cap`" from "more than `cap`".
    pub fn to_capped_count_sql(&self, offset: u64, cap: u64) -> (String, Vec<Value>) {
        let mut builder = SqlBuilder::new(self.dialect);
        builder
            .push("SELECT COUNT(*) AS ")
            .push_identifier("count")
            .push(" FROM (SELECT 1");
        self.write_from_where(&mut builder);
        self.write_window(&mut builder, Some(cap + 1), Some(offset));
        builder.push(") AS ").push_identifier("capped");
        Self::finish(builder)
    }

    /// Render an `INSERT` of `data` into the table.
    ///
    /// `returning` names the key column to return on dialects that support it.
    pub fn to_insert_sql(&self, data: &Record, returning: Option<&str>) -> QueryResult<(String, Vec<Value>)> {
        let mut builder = SqlBuilder::new(self.dialect);
        builder.push("INSERT INTO ").push_identifier(&self.table);
        if data.is_empty() {
            builder.push(" DEFAULT VALUES");
        } else {
            builder.push(" (");
            for (i, column) in data.keys().enumerate() {
                if i > 0 {
                    builder.push(", ");
                }
                builder.push_identifier(column);
            }
            builder.push(") VALUES (");
            for (i, value) in data.values().enumerate() {
                if i > 0 {
                    builder.push(", ");
                }
                builder.push_param(Self::bindable(value)?);
            }
            builder.push(")");
        }
        if let (Some(key), true) = (returning, self.dialect.returning) {
            builder.push(" RETURNING ").push_identifier(key);
        }
        Ok(Self::finish(builder))
    }

    /// Render an `UPDATE` of the filtered rows.
    pub fn to_update_sql(&self, data: &Record) -> QueryResult<(String, Vec<Value>)> {
        if data.is_empty() {
            return Err(QueryError::invalid_parameter("update requires at least one column"));
        }
        let mut builder = SqlBuilder::new(self.dialect);
        builder.push("UPDATE ").push_identifier(&self.table).push(" SET ");
        for (i, (column, value)) in data.iter().enumerate() {
            if i > 0 {
                builder.push(", ");
            }
            builder.push_identifier(column).push(" = ").push_param(Self::bindable(value)?);
        }
        for (i, condition) in self.conditions.iter().enumerate() {
            builder.push(if i == 0 { " WHERE (" } else { " AND (" });
            builder.push_fragment(condition).push(")");
        }
        Ok(Self::finish(builder))
    }

    /// Render a `DELETE` of the filtered rows.
    pub fn to_delete_sql(&self) -> (String, Vec<Value>) {
        let mut builder = SqlBuilder::new(self.dialect);
        builder.push("DELETE");
        self.write_from_where(&mut builder);
        Self::finish(builder)
    }

    fn bindable(value: &Value) -> QueryResult<Value> {
        match value {
            Value::Query(_) => Err(QueryError::invalid_parameter(
                "a sub-query cannot be written as a column value",
            )),
            other => Ok(other.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn questions(dialect: Dialect) -> Query {
        Query::table(dialect, "questions")
    }

    #[test]
    fn test_plain_select() {
        let (sql, params) = questions(Dialect::GENERIC).to_select_sql();
        assert_eq!(sql, r#"SELECT * FROM "questions""#);
        assert!(params.is_empty());
    }

    #[test]
    fn test_conditions_are_conjunctive() {
        let query = questions(Dialect::POSTGRES)
            .where_eq("topic_id", 1001)
            .unwrap()
            .where_eq("deleted_at", Value::Null)
            .unwrap();
        let (sql, params) = query.to_select_sql();
        assert_eq!(
            sql,
            r#"SELECT * FROM "questions" WHERE ("topic_id" = $1) AND ("deleted_at" IS NULL)"#
        );
        assert_eq!(params, vec![Value::Int(1001)]);
    }

    #[test]
    fn test_pagination_window() {
        let query = questions(Dialect::POSTGRES)
            .order_by(OrderByField::asc("questions.id"))
            .unwrap()
            .paginate(&Pagination::page(3, 20));
        let (sql, _) = query.to_select_sql();
        assert_eq!(
            sql,
            r#"SELECT * FROM "questions" ORDER BY "questions"."id" ASC LIMIT 20 OFFSET 40"#
        );
    }

    #[test]
    fn test_offset_only_generic() {
        let (sql, _) = questions(Dialect::GENERIC).offset(5).to_select_sql();
        assert_eq!(sql, r#"SELECT * FROM "questions" LIMIT -1 OFFSET 5"#);
    }

    #[test]
    fn test_subquery_numbering() {
        let inner = Query::table(Dialect::POSTGRES, "topics")
            .select(&["id"])
            .unwrap()
            .where_eq("name", "Science")
            .unwrap();
        let mut fragment = SqlFragment::raw("\"topic_id\" IN (");
        fragment.push_query(inner).push(")");

        let query = questions(Dialect::POSTGRES)
            .where_eq("id", 1)
            .unwrap()
            .where_fragment(fragment);
        let (sql, params) = query.to_select_sql();
        assert_eq!(
            sql,
            r#"SELECT * FROM "questions" WHERE ("id" = $1) AND ("topic_id" IN (SELECT "id" FROM "topics" WHERE ("name" = $2)))"#
        );
        assert_eq!(params, vec![Value::Int(1), Value::from("Science")]);
    }

    #[test]
    fn test_count_sql() {
        let query = questions(Dialect::GENERIC).where_eq("topic_id", 1).unwrap().limit(10);
        let (sql, _) = query.to_count_sql();
        assert_eq!(sql, r#"SELECT COUNT(*) AS "count" FROM "questions" WHERE ("topic_id" = ?)"#);
    }

    #[test]
    fn test_capped_count_sql() {
        let (sql, _) = questions(Dialect::POSTGRES).to_capped_count_sql(40, 1000);
        assert_eq!(
            sql,
            r#"SELECT COUNT(*) AS "count" FROM (SELECT 1 FROM "questions" LIMIT 1001 OFFSET 40) AS "capped""#
        );
    }

    #[test]
    fn test_insert_sql() {
        let mut data = Record::new();
        data.insert("content".into(), Value::from("Why?"));
        data.insert("topic_id".into(), Value::Int(1001));

        let (sql, params) = questions(Dialect::POSTGRES).to_insert_sql(&data, Some("id")).unwrap();
        assert_eq!(
            sql,
            r#"INSERT INTO "questions" ("content", "topic_id") VALUES ($1, $2) RETURNING "id""#
        );
        assert_eq!(params.len(), 2);

        let (sql, _) = questions(Dialect::GENERIC).to_insert_sql(&data, Some("id")).unwrap();
        assert_eq!(sql, r#"INSERT INTO "questions" ("content", "topic_id") VALUES (?, ?)"#);

        let (sql, _) = questions(Dialect::GENERIC).to_insert_sql(&Record::new(), None).unwrap();
        assert_eq!(sql, r#"INSERT INTO "questions" DEFAULT VALUES"#);
    }

    #[test]
    fn test_update_and_delete_sql() {
        let mut data = Record::new();
        data.insert("content".into(), Value::from("Edited"));
        let scope = questions(Dialect::POSTGRES).where_eq("id", 2001).unwrap();

        let (sql, params) = scope.to_update_sql(&data).unwrap();
        assert_eq!(sql, r#"UPDATE "questions" SET "content" = $1 WHERE ("id" = $2)"#);
        assert_eq!(params, vec![Value::from("Edited"), Value::Int(2001)]);

        let (sql, _) = scope.to_delete_sql();
        assert_eq!(sql, r#"DELETE FROM "questions" WHERE ("id" = $1)"#);

        assert!(scope.to_update_sql(&Record::new()).is_err());
    }
}
