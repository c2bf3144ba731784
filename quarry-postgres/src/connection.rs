//! PostgreSQL connection wrapper.

use async_trait::async_trait;
use deadpool_postgres::Object;
use postgres_types::ToSql;
use quarry_query::{Connection, QueryResult, Row, Value};
use tokio_postgres::Statement;
use tracing::debug;

use crate::config::PgExtensions;
use crate::error::PgResult;
use crate::types::{self, PgParam};

/// A pooled connection. Returns to its pool when dropped.
pub struct PgConnection {
    client: Object,
    extensions: PgExtensions,
}

impl PgConnection {
    pub(crate) fn new(client: Object, extensions: PgExtensions) -> Self {
        Self { client, extensions }
    }

    /// The decoding extensions active on this connection.
    pub fn extensions(&self) -> PgExtensions {
        self.extensions
    }

    /// Get the underlying pooled client.
    pub fn inner(&self) -> &Object {
        &self.client
    }

    async fn prepare(&self, sql: &str, params: &[Value]) -> PgResult<(Statement, Vec<PgParam>)> {
        let stmt = self.client.prepare_cached(sql).await?;
        let bound = types::to_params(params, stmt.params())?;
        Ok((stmt, bound))
    }

    async fn rows(&self, sql: &str, params: &[Value]) -> PgResult<Vec<Row>> {
        debug!(sql = %sql, params = params.len(), "Executing query");
        let (stmt, bound) = self.prepare(sql, params).await?;
        let rows = self.client.query(&stmt, &refs(&bound)).await?;
        rows.iter().map(|row| types::from_row(row, self.extensions)).collect()
    }

    async fn affected(&self, sql: &str, params: &[Value]) -> PgResult<u64> {
        debug!(sql = %sql, params = params.len(), "Executing statement");
        let (stmt, bound) = self.prepare(sql, params).await?;
        Ok(self.client.execute(&stmt, &refs(&bound)).await?)
    }
}

fn refs(bound: &[PgParam]) -> Vec<&(dyn ToSql + Sync)> {
    bound.iter().map(|param| &**param as &(dyn ToSql + Sync)).collect()
}

#[async_trait]
impl Connection for PgConnection {
    fn engine(&self) -> &str {
        "postgres"
    }

    async fn query(&self, sql: &str, params: &[Value]) -> QueryResult<Vec<Row>> {
        Ok(self.rows(sql, params).await?)
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> QueryResult<u64> {
        Ok(self.affected(sql, params).await?)
    }

    /// Expects an `INSERT ... RETURNING` statement.
    async fn insert(&self, sql: &str, params: &[Value], primary_key: &str) -> QueryResult<Value> {
        let rows = self.rows(sql, params).await?;
        Ok(rows
            .into_iter()
            .next()
            .and_then(|mut row| row.swap_remove(primary_key))
            .unwrap_or(Value::Null))
    }

    async fn batch_execute(&self, sql: &str) -> QueryResult<()> {
        debug!(sql = %sql, "Executing batch");
        self.client
            .batch_execute(sql)
            .await
            .map_err(|e| crate::error::PgError::from(e).into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PgConfig;
    use crate::pool::PgPool;
    use pretty_assertions::assert_eq;

    async fn live_connection() -> Option<PgConnection> {
        let url = std::env::var("QUARRY_TEST_POSTGRES_URL").ok()?;
        let mut config = PgConfig::from_url(url).unwrap();
        config.extensions = PgExtensions::all();
        Some(PgPool::new(config).unwrap().get().await.unwrap())
    }

    #[tokio::test]
    #[ignore = "requires QUARRY_TEST_POSTGRES_URL"]
    async fn test_round_trip() {
        let Some(conn) = live_connection().await else {
            return;
        };
        conn.batch_execute(
            "CREATE TEMP TABLE quarry_rt (id BIGSERIAL PRIMARY KEY, content TEXT NOT NULL UNIQUE, \
             labels TEXT[] NOT NULL DEFAULT '{}', custom JSONB)",
        )
        .await
        .unwrap();

        let id = conn
            .insert(
                r#"INSERT INTO "quarry_rt" ("content", "labels", "custom") VALUES ($1, $2, $3) RETURNING "id""#,
                &[
                    Value::from("why?"),
                    Value::Array(vec![Value::from("a"), Value::from("b c")]),
                    Value::Json(serde_json::json!({"k": [1, 2]})),
                ],
                "id",
            )
            .await
            .unwrap();
        assert_eq!(id, Value::Int(1));

        let rows = conn
            .query(r#"SELECT * FROM "quarry_rt" WHERE "id" = $1"#, &[Value::from("1")])
            .await
            .unwrap();
        assert_eq!(rows[0]["labels"], Value::Array(vec![Value::from("a"), Value::from("b c")]));
        assert_eq!(rows[0]["custom"], Value::Json(serde_json::json!({"k": [1, 2]})));

        let overlap = conn
            .query(
                r#"SELECT "id" FROM "quarry_rt" WHERE "labels" && $1"#,
                &[Value::Array(vec![Value::from("b c")])],
            )
            .await
            .unwrap();
        assert_eq!(overlap.len(), 1);
    }

    #[tokio::test]
    #[ignore = "requires QUARRY_TEST_POSTGRES_URL"]
    async fn test_unique_violation_is_classified() {
        let Some(conn) = live_connection().await else {
            return;
        };
        conn.batch_execute("CREATE TEMP TABLE quarry_uv (id SERIAL PRIMARY KEY, name TEXT UNIQUE)")
            .await
            .unwrap();
        let sql = r#"INSERT INTO "quarry_uv" ("name") VALUES ($1) RETURNING "id""#;
        conn.insert(sql, &[Value::from("x")], "id").await.unwrap();

        let err = conn.insert(sql, &[Value::from("x")], "id").await.unwrap_err();
        assert_eq!(err.code, quarry_query::ErrorCode::UniqueConstraint);
    }
}
