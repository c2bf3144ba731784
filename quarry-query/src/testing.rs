//! Recording connections for tests.
//!
//! [`MockProvider`] opens [`MockConnection`]s that record every statement into
//! a shared [`MockLog`] and answer from a queue of scripted responses.
//!
//! ```rust
//! use quarry_query::connection::{ConnectionRouter, Mode};
//! use quarry_query::testing::{MockLog, MockProvider, MockResponse};
//! use std::sync::Arc;
//!
//! # tokio_test_block(async {
//! let log = MockLog::new();
//! let db = MockProvider::postgres("db", &log);
//! db.push(MockResponse::Affected(1));
//!
//! let router = Arc::new(ConnectionRouter::simple(db.shared()));
//! let mut session = router.session();
//! let scope = session.client(Mode::ReadWrite).await.unwrap();
//! assert_eq!(scope.connection().execute("DELETE FROM \"t\"", &[]).await.unwrap(), 1);
//! assert_eq!(log.statements()[0].sql, "DELETE FROM \"t\"");
//! # });
//! # fn tokio_test_block<F: std::future::Future>(f: F) -> F::Output {
//! #     tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(f)
//! # }
//! ```

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::connection::{Connection, ConnectionProvider};
use crate::error::{ErrorCode, QueryError, QueryResult};
use crate::value::{Row, Value};

/// A statement seen by a mock connection.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    /// Name of the provider that opened the connection.
    pub target: String,
    /// Sequence number of the connection within its provider.
    pub connection: usize,
    /// Statement text.
    pub sql: String,
    /// Bound parameters.
    pub params: Vec<Value>,
}

/// A scripted answer for the next matching call.
#[derive(Debug, Clone)]
pub enum MockResponse {
    /// Rows for `query`.
    Rows(Vec<Row>),
    /// Affected row count for `execute`.
    Affected(u64),
    /// Generated key for `insert`.
    Key(Value),
    /// A failure for the next call of any kind.
    Error(ErrorCode, String),
}

#[derive(Default)]
struct LogState {
    statements: Vec<Statement>,
    connects: HashMap<String, usize>,
}

/// Statement log shared by every mock of one test.
#[derive(Clone, Default)]
pub struct MockLog {
    state: Arc<Mutex<LogState>>,
}

impl MockLog {
    /// Create an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Every statement recorded so far, in order.
    pub fn statements(&self) -> Vec<Statement> {
        self.state.lock().statements.clone()
    }

    /// Statement text recorded so far, in order.
    pub fn sql(&self) -> Vec<String> {
        self.state.lock().statements.iter().map(|s| s.sql.clone()).collect()
    }

    /// Number of connections opened against `target`.
    pub fn connects(&self, target: &str) -> usize {
        self.state.lock().connects.get(target).copied().unwrap_or(0)
    }

    /// Forget every recorded statement.
    pub fn clear(&self) {
        self.state.lock().statements.clear();
    }

    fn record(&self, statement: Statement) {
        self.state.lock().statements.push(statement);
    }

    fn connected(&self, target: &str) -> usize {
        let mut state = self.state.lock();
        let count = state.connects.entry(target.to_string()).or_insert(0);
        *count += 1;
        *count
    }
}

#[derive(Default)]
struct ProviderState {
    responses: VecDeque<MockResponse>,
    connect_error: Option<String>,
}

/// A provider of recording connections.
#[derive(Clone)]
pub struct MockProvider {
    name: String,
    engine: &'static str,
    log: MockLog,
    state: Arc<Mutex<ProviderState>>,
}

impl MockProvider {
    /// Create a provider for `engine`.
    pub fn new(name: impl Into<String>, engine: &'static str, log: &MockLog) -> Self {
        Self {
            name: name.into(),
            engine,
            log: log.clone(),
            state: Arc::default(),
        }
    }

    /// A PostgreSQL provider.
    pub fn postgres(name: impl Into<String>, log: &MockLog) -> Self {
        Self::new(name, "postgres", log)
    }

    /// A SQLite provider.
    pub fn sqlite(name: impl Into<String>, log: &MockLog) -> Self {
        Self::new(name, "sqlite", log)
    }

    /// This provider as a router target.
    pub fn shared(&self) -> Arc<dyn ConnectionProvider> {
        Arc::new(self.clone())
    }

    /// Queue a response for connections of this provider.
    pub fn push(&self, response: MockResponse) -> &Self {
        self.state.lock().responses.push_back(response);
        self
    }

    /// Make every later `connect` fail with `message`.
    pub fn fail_connections(&self, message: impl Into<String>) {
        self.state.lock().connect_error = Some(message.into());
    }
}

#[async_trait]
impl ConnectionProvider for MockProvider {
    fn engine(&self) -> &str {
        self.engine
    }

    async fn connect(&self) -> QueryResult<Arc<dyn Connection>> {
        if let Some(message) = self.state.lock().connect_error.clone() {
            return Err(QueryError::connection(message));
        }
        let id = self.log.connected(&self.name);
        Ok(Arc::new(MockConnection {
            target: self.name.clone(),
            id,
            engine: self.engine,
            log: self.log.clone(),
            state: Arc::clone(&self.state),
        }))
    }
}

/// A connection that records statements instead of running them.
pub struct MockConnection {
    target: String,
    id: usize,
    engine: &'static str,
    log: MockLog,
    state: Arc<Mutex<ProviderState>>,
}

impl MockConnection {
    fn record(&self, sql: &str, params: &[Value]) {
        self.log.record(Statement {
            target: self.target.clone(),
            connection: self.id,
            sql: sql.to_string(),
            params: params.to_vec(),
        });
    }

    /// Pop the front response if `accept` takes it; errors are always taken.
    fn next<T>(&self, accept: impl Fn(&MockResponse) -> Option<T>) -> QueryResult<Option<T>> {
        let mut state = self.state.lock();
        let Some(front) = state.responses.front() else {
            return Ok(None);
        };
        if let MockResponse::Error(code, message) = front {
            let err = QueryError::new(*code, message.clone());
            state.responses.pop_front();
            return Err(err);
        }
        let taken = accept(front);
        if taken.is_some() {
            state.responses.pop_front();
        }
        Ok(taken)
    }
}

#[async_trait]
impl Connection for MockConnection {
    fn engine(&self) -> &str {
        self.engine
    }

    async fn query(&self, sql: &str, params: &[Value]) -> QueryResult<Vec<Row>> {
        self.record(sql, params);
        let rows = self.next(|r| match r {
            MockResponse::Rows(rows) => Some(rows.clone()),
            _ => None,
        })?;
        Ok(rows.unwrap_or_default())
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> QueryResult<u64> {
        self.record(sql, params);
        let affected = self.next(|r| match r {
            MockResponse::Affected(n) => Some(*n),
            _ => None,
        })?;
        Ok(affected.unwrap_or(0))
    }

    async fn insert(&self, sql: &str, params: &[Value], _primary_key: &str) -> QueryResult<Value> {
        self.record(sql, params);
        let key = self.next(|r| match r {
            MockResponse::Key(key) => Some(key.clone()),
            _ => None,
        })?;
        Ok(key.unwrap_or(Value::Int(1)))
    }

    async fn batch_execute(&self, sql: &str) -> QueryResult<()> {
        self.record(sql, &[]);
        self.next(|_| None::<()>)?;
        Ok(())
    }
}

/// Build a row from column/value pairs.
pub fn row<I, K, V>(columns: I) -> Row
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<Value>,
{
    columns.into_iter().map(|(k, v)| (k.into(), v.into())).collect()
}
