//! Repository operations over one model's table.
//!
//! A [`Repository`] combines a [`Model`] definition (table, key, encoders and
//! custom filters) with an [`AuthContext`] that scopes every operation. It
//! holds no connection: each operation takes the caller's [`Session`] and
//! enters the scope it needs, read for `find_by`/`index`, read-write for
//! `create`/`update`/`delete`.
//!
//! ```rust,ignore
//! struct Question;
//!
//! impl Model for Question {
//!     const TABLE_NAME: &'static str = "questions";
//!
//!     fn encoders(registry: &mut EncoderRegistry) {
//!         registry.register("labels", PgArrayEncoder).register("custom", JsonEncoder);
//!     }
//! }
//!
//! let questions = Repository::<Question>::new(Arc::new(SystemAuth));
//! let page = questions
//!     .index(&mut session, filters! { "labels__contains" => vec!["rust"] }, IndexOptions::new().sort("-id")?)
//!     .await?;
//! ```

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, instrument};

use crate::connection::{Mode, Session};
use crate::dialect::Dialect;
use crate::encoder::EncoderRegistry;
use crate::error::{QueryError, QueryResult};
use crate::filter::{CustomFilter, CustomFilters, FilterCompiler, FilterExpression, FilterSource, Operator};
use crate::pagination::{COUNT_CAP, CountMetadata, Pagination};
use crate::query::Query;
use crate::types::{OrderByField, SortSpec};
use crate::value::{Record, Row, Value};

/// A table-backed model.
pub trait Model: Send + Sync + 'static {
    /// Table name.
    const TABLE_NAME: &'static str;

    /// Primary key column.
    const PRIMARY_KEY: &'static str = "id";

    /// Name used in error messages.
    const MODEL_NAME: &'static str = Self::TABLE_NAME;

    /// Resource name passed to the [`AuthContext`].
    const RESOURCE: &'static str = Self::TABLE_NAME;

    /// Register per-field encoders.
    fn encoders(_registry: &mut EncoderRegistry) {}

    /// Register custom filters.
    fn custom_filters(_filters: &mut CustomFilters) {}
}

/// The operation an authorization check is made for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    /// Insert.
    Create,
    /// Select.
    Read,
    /// Update.
    Update,
    /// Delete.
    Delete,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Create => "create",
            Self::Read => "read",
            Self::Update => "update",
            Self::Delete => "delete",
        })
    }
}

/// The rows an authorization check grants.
#[derive(Debug, Clone, PartialEq)]
pub enum ScopeRule {
    /// Every row.
    All,
    /// Rows whose primary key equals the value (or is one of the list).
    Matching(Value),
}

/// Authorization consulted by every repository operation.
pub trait AuthContext: Send + Sync {
    /// The rows `action` may touch on `resource`.
    ///
    /// Denial is an [`ErrorCode::AccessDenied`](crate::ErrorCode::AccessDenied) error.
    fn can(&self, action: Action, resource: &str) -> QueryResult<ScopeRule>;
}

/// Grants every action on every row.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemAuth;

impl AuthContext for SystemAuth {
    fn can(&self, _action: Action, _resource: &str) -> QueryResult<ScopeRule> {
        Ok(ScopeRule::All)
    }
}

/// Options of [`Repository::index`].
#[derive(Debug, Clone)]
pub struct IndexOptions {
    scope: Option<Query>,
    pagination: Option<Pagination>,
    sort: SortSpec,
    count: bool,
}

impl Default for IndexOptions {
    fn default() -> Self {
        Self {
            scope: None,
            pagination: Some(Pagination::default()),
            sort: SortSpec::none(),
            count: true,
        }
    }
}

impl IndexOptions {
    /// First page of 1000 rows, counted, sorted by primary key.
    pub fn new() -> Self {
        Self::default()
    }

    /// Use `scope` as the base query instead of the authorization scope.
    pub fn scope(mut self, scope: Query) -> Self {
        self.scope = Some(scope);
        self
    }

    /// Request page `page` (1-based).
    pub fn page(mut self, page: u64) -> Self {
        let items = self.pagination.unwrap_or_default().items_per_page;
        self.pagination = Some(Pagination::page(page, items));
        self
    }

    /// Set the page size.
    pub fn items_per_page(mut self, items_per_page: u64) -> Self {
        let page = self.pagination.unwrap_or_default().page;
        self.pagination = Some(Pagination::page(page, items_per_page));
        self
    }

    /// Return every row in one page.
    pub fn without_pagination(mut self) -> Self {
        self.pagination = None;
        self
    }

    /// Sort by comma-separated `[-]column` specifiers.
    pub fn sort(mut self, specifiers: &str) -> QueryResult<Self> {
        self.sort = specifiers.parse()?;
        Ok(self)
    }

    /// Sort by an already parsed sort list.
    pub fn sort_by(mut self, sort: SortSpec) -> Self {
        self.sort = sort;
        self
    }

    /// Enable or disable count metadata.
    pub fn count(mut self, count: bool) -> Self {
        self.count = count;
        self
    }
}

/// Rows of one index page with their count metadata.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexResult {
    /// Decoded rows.
    pub rows: Vec<Row>,
    /// `{count, more}`, `{count}` or `{}`.
    pub metadata: CountMetadata,
}

struct ModelDefinition {
    table: &'static str,
    primary_key: &'static str,
    encoders: EncoderRegistry,
    custom_filters: CustomFilters,
}

/// The definition bound to one dialect, as seen by the filter compiler.
struct Source<'a> {
    definition: &'a ModelDefinition,
    dialect: Dialect,
}

impl FilterSource for Source<'_> {
    fn custom_filter(&self, name: &str) -> Option<&CustomFilter> {
        self.definition.custom_filters.get(name)
    }

    fn table(&self) -> Query {
        Query::table(self.dialect, self.definition.table)
    }

    fn primary_key(&self) -> &str {
        self.definition.primary_key
    }
}

/// Data access for one model.
pub struct Repository<M: Model> {
    auth: Arc<dyn AuthContext>,
    definition: Arc<ModelDefinition>,
    _model: PhantomData<fn() -> M>,
}

impl<M: Model> Clone for Repository<M> {
    fn clone(&self) -> Self {
        Self {
            auth: Arc::clone(&self.auth),
            definition: Arc::clone(&self.definition),
            _model: PhantomData,
        }
    }
}

impl<M: Model> fmt::Debug for Repository<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Repository")
            .field("table", &self.definition.table)
            .field("primary_key", &self.definition.primary_key)
            .field("encoders", &self.definition.encoders)
            .field("custom_filters", &self.definition.custom_filters.len())
            .finish()
    }
}

impl<M: Model> Repository<M> {
    /// Create a repository authorized by `auth`.
    pub fn new(auth: Arc<dyn AuthContext>) -> Self {
        let mut encoders = EncoderRegistry::new();
        M::encoders(&mut encoders);
        let mut custom_filters = CustomFilters::new();
        M::custom_filters(&mut custom_filters);
        Self {
            auth,
            definition: Arc::new(ModelDefinition {
                table: M::TABLE_NAME,
                primary_key: M::PRIMARY_KEY,
                encoders,
                custom_filters,
            }),
            _model: PhantomData,
        }
    }

    /// The same repository under another authorization.
    pub fn with_auth(&self, auth: Arc<dyn AuthContext>) -> Self {
        Self {
            auth,
            definition: Arc::clone(&self.definition),
            _model: PhantomData,
        }
    }

    /// The field encoders.
    pub fn encoders(&self) -> &EncoderRegistry {
        &self.definition.encoders
    }

    /// An unscoped query over the table.
    pub fn table(&self, dialect: Dialect) -> Query {
        Query::table(dialect, M::TABLE_NAME)
    }

    /// The query `action` is allowed to touch.
    pub fn scoped(&self, dialect: Dialect, action: Action) -> QueryResult<Query> {
        let base = self.table(dialect);
        match self.auth.can(action, M::RESOURCE)? {
            ScopeRule::All => Ok(base),
            ScopeRule::Matching(id) => Operator::Eq.apply(base, &self.qualified_key(&dialect)?, &id),
        }
    }

    fn qualified_key(&self, dialect: &Dialect) -> QueryResult<String> {
        dialect.quote_path(&format!("{}.{}", M::TABLE_NAME, M::PRIMARY_KEY))
    }

    fn by_key(&self, scope: Query, id: &Value) -> QueryResult<Query> {
        if id.is_null() {
            return Err(QueryError::invalid_parameter("primary key must not be null").with_model(M::MODEL_NAME));
        }
        let column = self.qualified_key(&scope.dialect())?;
        Operator::Eq.apply(scope, &column, id)
    }

    fn compile(&self, scope: Query, filters: FilterExpression) -> QueryResult<Query> {
        let encoded = self
            .definition
            .encoders
            .encode_filters(filters, &self.definition.custom_filters)?;
        let source = Source {
            definition: &self.definition,
            dialect: scope.dialect(),
        };
        FilterCompiler::new(scope.dialect()).filter_by(scope, &encoded, &source)
    }

    fn decode(&self, rows: Vec<Row>) -> QueryResult<Vec<Row>> {
        rows.into_iter()
            .map(|row| self.definition.encoders.decode_row(row))
            .collect()
    }

    /// Insert `data` and return the generated primary key as a string.
    ///
    /// Constraint violations surface as
    /// [`ErrorCode::CannotCreateRecord`](crate::ErrorCode::CannotCreateRecord).
    #[instrument(skip_all, fields(table = M::TABLE_NAME))]
    pub async fn create(&self, session: &mut Session, data: Record) -> QueryResult<String> {
        self.auth.can(Action::Create, M::RESOURCE)?;
        let dialect = session.dialect()?;
        let record = self.definition.encoders.encode_record(data)?;
        let (sql, params) = self.table(dialect).to_insert_sql(&record, Some(M::PRIMARY_KEY))?;

        let scope = session.client(Mode::ReadWrite).await?;
        let key = scope
            .connection()
            .insert(&sql, &params, M::PRIMARY_KEY)
            .await
            .map_err(|err| {
                if err.is_constraint_violation() {
                    QueryError::cannot_create_record(M::MODEL_NAME, err.message.clone())
                        .with_sql(sql.as_str())
                        .with_source(err)
                } else {
                    statement_failed::<M>("create", &sql)(err)
                }
            })?;
        if key.is_null() {
            return Err(QueryError::cannot_create_record(M::MODEL_NAME, "no primary key was generated"));
        }
        debug!(key = %key, "Created record");
        Ok(key.to_key_string())
    }

    /// Update the row with primary key `id` within the update scope.
    ///
    /// Empty `attributes` succeed without touching the database. Returns
    /// `false` when no row matched.
    pub async fn update(&self, session: &mut Session, id: impl Into<Value>, attributes: Record) -> QueryResult<bool> {
        let scope = self.scoped(session.dialect()?, Action::Update)?;
        self.update_in(session, scope, id, attributes).await
    }

    /// Update the row with primary key `id` within an explicit scope.
    #[instrument(skip_all, fields(table = M::TABLE_NAME))]
    pub async fn update_in(
        &self,
        session: &mut Session,
        scope: Query,
        id: impl Into<Value>,
        attributes: Record,
    ) -> QueryResult<bool> {
        if attributes.is_empty() {
            return Ok(true);
        }
        let query = self.by_key(scope, &id.into())?;
        let record = self.definition.encoders.encode_record(attributes)?;
        let (sql, params) = query.to_update_sql(&record)?;

        let scope = session.client(Mode::ReadWrite).await?;
        let affected = scope
            .connection()
            .execute(&sql, &params)
            .await
            .map_err(statement_failed::<M>("update", &sql))?;
        Ok(affected > 0)
    }

    /// [`Repository::update`], failing with `RecordNotFound` when no row matched.
    pub async fn update_required(
        &self,
        session: &mut Session,
        id: impl Into<Value>,
        attributes: Record,
    ) -> QueryResult<()> {
        if self.update(session, id, attributes).await? {
            Ok(())
        } else {
            Err(QueryError::not_found(M::MODEL_NAME))
        }
    }

    /// Delete the row with primary key `id`; returns whether a row was removed.
    #[instrument(skip_all, fields(table = M::TABLE_NAME))]
    pub async fn delete(&self, session: &mut Session, id: impl Into<Value>) -> QueryResult<bool> {
        let scope = self.scoped(session.dialect()?, Action::Delete)?;
        let (sql, params) = self.by_key(scope, &id.into())?.to_delete_sql();

        let scope = session.client(Mode::ReadWrite).await?;
        let affected = scope
            .connection()
            .execute(&sql, &params)
            .await
            .map_err(statement_failed::<M>("delete", &sql))?;
        Ok(affected > 0)
    }

    /// The first row matching `filters` within the read scope.
    pub async fn find_by(&self, session: &mut Session, filters: FilterExpression) -> QueryResult<Option<Row>> {
        let scope = self.scoped(session.dialect()?, Action::Read)?;
        self.find_by_in(session, scope, filters).await
    }

    /// The first row matching `filters` within an explicit scope.
    #[instrument(skip_all, fields(table = M::TABLE_NAME))]
    pub async fn find_by_in(
        &self,
        session: &mut Session,
        scope: Query,
        filters: FilterExpression,
    ) -> QueryResult<Option<Row>> {
        let (sql, params) = self.compile(scope, filters)?.limit(1).to_select_sql();

        let scope = session.client(Mode::Read).await?;
        let rows = scope
            .connection()
            .query(&sql, &params)
            .await
            .map_err(statement_failed::<M>("find_by", &sql))?;
        match rows.into_iter().next() {
            Some(row) => Ok(Some(self.definition.encoders.decode_row(row)?)),
            None => Ok(None),
        }
    }

    /// [`Repository::find_by`], failing with `RecordNotFound` when nothing matched.
    pub async fn find_by_required(&self, session: &mut Session, filters: FilterExpression) -> QueryResult<Row> {
        self.find_by(session, filters)
            .await?
            .ok_or_else(|| QueryError::not_found(M::MODEL_NAME))
    }

    /// One page of rows matching `filters`, with count metadata.
    ///
    /// Rows are ordered by the requested sort, or by the table's primary key.
    /// With pagination the count scans at most [`COUNT_CAP`] rows past the
    /// page offset: `count` is `offset + min(remaining, COUNT_CAP)` and `more`
    /// reports whether rows remain beyond the cap. Without pagination the
    /// count is exact.
    #[instrument(skip_all, fields(table = M::TABLE_NAME))]
    pub async fn index(
        &self,
        session: &mut Session,
        filters: FilterExpression,
        options: IndexOptions,
    ) -> QueryResult<IndexResult> {
        let base = match options.scope {
            Some(scope) => scope,
            None => self.scoped(session.dialect()?, Action::Read)?,
        };
        let filtered = self.compile(base, filters)?;

        let mut ordered = filtered.clone();
        if options.sort.is_empty() {
            ordered = ordered.order_by(OrderByField::asc(format!("{}.{}", M::TABLE_NAME, M::PRIMARY_KEY)))?;
        } else {
            for field in options.sort.fields() {
                ordered = ordered.order_by(field.clone())?;
            }
        }

        let (select, count) = match options.pagination {
            Some(pagination) => {
                pagination.validate()?;
                let select = ordered.paginate(&pagination).to_select_sql();
                let count = options
                    .count
                    .then(|| (filtered.to_capped_count_sql(pagination.offset(), COUNT_CAP), Some(pagination.offset())));
                (select, count)
            }
            None => {
                let select = ordered.to_select_sql();
                let count = options.count.then(|| (filtered.to_count_sql(), None));
                (select, count)
            }
        };

        let scope = session.client(Mode::Read).await?;
        let rows = scope
            .connection()
            .query(&select.0, &select.1)
            .await
            .map_err(statement_failed::<M>("index", &select.0))?;
        let metadata = match count {
            None => CountMetadata::none(),
            Some(((sql, params), offset)) => {
                let counted = scope
                    .connection()
                    .query(&sql, &params)
                    .await
                    .map_err(statement_failed::<M>("count", &sql))?;
                let counted = read_count(counted)?;
                match offset {
                    Some(offset) => CountMetadata::capped(offset, counted),
                    None => CountMetadata::exact(counted),
                }
            }
        };
        drop(scope);

        Ok(IndexResult {
            rows: self.decode(rows)?,
            metadata,
        })
    }
}

/// Attach the operation, model and statement to a driver error.
fn statement_failed<'a, M: Model>(operation: &'static str, sql: &'a str) -> impl FnOnce(QueryError) -> QueryError + 'a {
    move |err| err.with_context(operation).with_model(M::MODEL_NAME).with_sql(sql)
}

fn read_count(rows: Vec<Row>) -> QueryResult<u64> {
    let value = rows
        .into_iter()
        .next()
        .and_then(|row| row.get("count").cloned())
        .ok_or_else(|| QueryError::deserialization("count query returned no rows"))?;
    match value {
        Value::Int(n) if n >= 0 => Ok(n as u64),
        Value::String(s) => s
            .parse()
            .map_err(|_| QueryError::deserialization(format!("invalid count `{}`", s))),
        other => Err(QueryError::deserialization(format!("invalid count {}", other))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{ConnectionRouter, ConnectionState};
    use crate::encoder::{JsonEncoder, PgArrayEncoder};
    use crate::error::ErrorCode;
    use crate::filters;
    use crate::testing::{MockLog, MockProvider, MockResponse, row};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    struct Question;

    impl Model for Question {
        const TABLE_NAME: &'static str = "questions";
        const MODEL_NAME: &'static str = "Question";

        fn encoders(registry: &mut EncoderRegistry) {
            registry.register("labels", PgArrayEncoder).register("custom", JsonEncoder);
        }

        fn custom_filters(filters: &mut CustomFilters) {
            filters.register("answered", |source, query, value| {
                let op = if value.is_falsy_token() { "IS NULL" } else { "IS NOT NULL" };
                let column = query.dialect().quote_path(&format!("{}.answered_at", source.table().table_name()))?;
                Ok(query.where_fragment(crate::sql::SqlFragment::raw(format!("{} {}", column, op))))
            });
        }
    }

    struct OwnRows;

    impl AuthContext for OwnRows {
        fn can(&self, action: Action, resource: &str) -> QueryResult<ScopeRule> {
            match action {
                Action::Delete => Err(QueryError::access_denied(action, resource)),
                _ => Ok(ScopeRule::Matching(Value::from(vec![1, 2]))),
            }
        }
    }

    fn setup(engine: &'static str) -> (MockLog, MockProvider, Session) {
        let log = MockLog::new();
        let provider = MockProvider::new("db", engine, &log);
        let router = Arc::new(ConnectionRouter::simple(provider.shared()));
        (log, provider, router.session())
    }

    fn repo() -> Repository<Question> {
        Repository::new(Arc::new(SystemAuth))
    }

    #[tokio::test]
    async fn test_create_returns_key() {
        let (log, provider, mut session) = setup("postgres");
        provider.push(MockResponse::Key(Value::Int(2001)));

        let mut data = Record::new();
        data.insert("content".into(), Value::from("why?"));
        data.insert("labels".into(), Value::List(vec![]));
        let id = repo().create(&mut session, data).await.unwrap();

        assert_eq!(id, "2001");
        let statement = &log.statements()[0];
        assert_eq!(
            statement.sql,
            r#"INSERT INTO "questions" ("content", "labels") VALUES ($1, '{}') RETURNING "id""#
        );
        assert_eq!(statement.params, vec![Value::from("why?")]);
    }

    #[tokio::test]
    async fn test_create_translates_constraint_violations() {
        let (_log, provider, mut session) = setup("sqlite");
        provider.push(MockResponse::Error(ErrorCode::UniqueConstraint, "duplicate id".into()));

        let err = repo().create(&mut session, Record::new()).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::CannotCreateRecord);
        assert!(err.message.contains("duplicate id"));
        assert_eq!(session.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_create_propagates_other_errors() {
        let (log, provider, mut session) = setup("sqlite");
        provider.push(MockResponse::Error(ErrorCode::SqlSyntax, "near VALUES".into()));

        let err = repo().create(&mut session, Record::new()).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::SqlSyntax);
        assert_eq!(err.context.operation.as_deref(), Some("create"));
        assert_eq!(err.context.model.as_deref(), Some("Question"));
        assert_eq!(err.context.sql, log.sql().first().cloned());
    }

    #[tokio::test]
    async fn test_read_errors_carry_the_statement() {
        let (log, provider, mut session) = setup("postgres");
        provider.push(MockResponse::Error(ErrorCode::DatabaseError, "canceling statement".into()));

        let err = repo()
            .find_by(&mut session, filters! { "id" => 1 })
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::DatabaseError);
        assert_eq!(err.context.operation.as_deref(), Some("find_by"));
        let sql = err.context.sql.clone().unwrap();
        assert_eq!(log.sql(), vec![sql.clone()]);
        assert!(err.display_full().contains(&sql));
    }

    #[tokio::test]
    async fn test_update() {
        let (log, provider, mut session) = setup("sqlite");

        assert!(repo().update(&mut session, 1, Record::new()).await.unwrap());
        assert!(log.statements().is_empty());

        let mut changes = Record::new();
        changes.insert("custom".into(), Value::from_json(json!({"a": 1})));
        provider.push(MockResponse::Affected(0));
        assert!(!repo().update(&mut session, 1, changes.clone()).await.unwrap());

        provider.push(MockResponse::Affected(1));
        assert!(repo().update(&mut session, 1, changes.clone()).await.unwrap());

        let statement = &log.statements()[1];
        assert_eq!(
            statement.sql,
            r#"UPDATE "questions" SET "custom" = ? WHERE ("questions"."id" = ?)"#
        );
        assert_eq!(statement.params, vec![Value::Json(json!({"a": 1})), Value::Int(1)]);

        provider.push(MockResponse::Affected(0));
        let err = repo().update_required(&mut session, 9, changes).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_delete() {
        let (log, provider, mut session) = setup("postgres");
        provider.push(MockResponse::Affected(1)).push(MockResponse::Affected(0));

        assert!(repo().delete(&mut session, 3).await.unwrap());
        assert!(!repo().delete(&mut session, 3).await.unwrap());
        assert_eq!(log.sql()[0], r#"DELETE FROM "questions" WHERE ("questions"."id" = $1)"#);
    }

    #[tokio::test]
    async fn test_auth_scopes_and_denial() {
        let (log, _provider, mut session) = setup("postgres");
        let scoped = repo().with_auth(Arc::new(OwnRows));

        scoped.find_by(&mut session, filters! { "content" => "x" }).await.unwrap();
        assert_eq!(
            log.sql()[0],
            r#"SELECT * FROM "questions" WHERE ("questions"."id" IN ($1, $2)) AND ("content" = $3) LIMIT 1"#
        );

        let err = scoped.delete(&mut session, 1).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::AccessDenied);
        assert_eq!(log.statements().len(), 1);
    }

    #[tokio::test]
    async fn test_find_by_decodes_and_encodes() {
        let (log, provider, mut session) = setup("postgres");
        provider.push(MockResponse::Rows(vec![row([
            ("id", Value::Int(1)),
            ("labels", Value::Array(vec![Value::from("rust")])),
            ("custom", Value::Json(json!({"a": {"b": 2}}))),
        ])]));

        let found = repo()
            .find_by(&mut session, filters! { "labels__contains" => vec!["rust"], "answered" => false })
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found["labels"], Value::from(vec!["rust"]));
        assert_eq!(found["custom"], Value::from_json(json!({"a": {"b": 2}})));

        let statement = &log.statements()[0];
        assert_eq!(
            statement.sql,
            r#"SELECT * FROM "questions" WHERE ("labels" && $1) AND ("questions"."answered_at" IS NULL) LIMIT 1"#
        );
        assert_eq!(statement.params, vec![Value::Array(vec![Value::from("rust")])]);

        assert!(repo().find_by(&mut session, FilterExpression::new()).await.unwrap().is_none());
        let err = repo().find_by_required(&mut session, FilterExpression::new()).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_index_capped_count() {
        let (log, provider, mut session) = setup("sqlite");
        provider
            .push(MockResponse::Rows(vec![row([("id", 11)]), row([("id", 12)])]))
            .push(MockResponse::Rows(vec![row([("count", 1001)])]));

        let result = repo()
            .index(
                &mut session,
                filters! { "content__prefix" => "50%" },
                IndexOptions::new().page(3).items_per_page(5).sort("-created_at,id").unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(result.rows.len(), 2);
        assert_eq!(result.metadata, CountMetadata { count: Some(1010), more: Some(true) });
        assert_eq!(
            log.sql(),
            vec![
                r#"SELECT * FROM "questions" WHERE (LOWER("content") LIKE LOWER(?) ESCAPE '\') ORDER BY "created_at" DESC, "id" ASC LIMIT 5 OFFSET 10"#,
                r#"SELECT COUNT(*) AS "count" FROM (SELECT 1 FROM "questions" WHERE (LOWER("content") LIKE LOWER(?) ESCAPE '\') LIMIT 1001 OFFSET 10) AS "capped""#,
            ]
        );
        assert_eq!(log.statements()[0].params, vec![Value::from("50\\%%")]);
    }

    #[tokio::test]
    async fn test_index_variants() {
        let (log, provider, mut session) = setup("postgres");
        provider.push(MockResponse::Rows(vec![])).push(MockResponse::Rows(vec![row([("count", 3)])]));

        let all = repo()
            .index(&mut session, FilterExpression::new(), IndexOptions::new().without_pagination())
            .await
            .unwrap();
        assert_eq!(all.metadata, CountMetadata::exact(3));
        assert_eq!(
            log.sql(),
            vec![
                r#"SELECT * FROM "questions" ORDER BY "questions"."id" ASC"#,
                r#"SELECT COUNT(*) AS "count" FROM "questions""#,
            ]
        );

        log.clear();
        let uncounted = repo()
            .index(&mut session, FilterExpression::new(), IndexOptions::new().count(false))
            .await
            .unwrap();
        assert!(uncounted.metadata.is_empty());
        assert_eq!(log.sql().len(), 1);

        let err = repo()
            .index(&mut session, FilterExpression::new(), IndexOptions::new().page(0))
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidParameter);
    }

    #[tokio::test]
    async fn test_unknown_operator_fails_before_io() {
        let (log, _provider, mut session) = setup("sqlite");
        let err = repo()
            .index(&mut session, filters! { "labels__contains" => vec!["a"] }, IndexOptions::new())
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::UnknownOperator);
        assert!(log.statements().is_empty());
    }

    #[tokio::test]
    async fn test_unsupported_dialect() {
        let log = MockLog::new();
        let router = Arc::new(ConnectionRouter::simple(MockProvider::new("db", "mysql", &log).shared()));
        let mut session = router.session();
        let err = repo().find_by(&mut session, FilterExpression::new()).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::UnsupportedDialect);
    }
}
