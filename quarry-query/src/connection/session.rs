//! Per-unit-of-work connection scope tracking.

use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use tracing::{debug, error, warn};

use super::router::{ConnectionRouter, Mode, Target, Topology};
use super::Connection;
use crate::dialect::Dialect;
use crate::error::{QueryError, QueryResult};
use crate::transaction::{Transaction, TransactionConfig};

/// Which connection, if any, a session currently has in scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No scope is active.
    Disconnected,
    /// Inside a scope on a simple topology.
    Simple,
    /// Inside a scope bound to the cluster primary.
    Primary,
    /// Inside a scope bound to a cluster replica.
    Replica,
}

/// A callback waiting for the enclosing transaction to commit.
pub(crate) type AfterCommit = Box<dyn FnOnce() + Send + Sync>;

pub(crate) struct ActiveScope {
    mode: Mode,
    target: Target,
    connection: Arc<dyn Connection>,
    transaction_depth: u32,
    /// Rollbacks of abandoned nested transactions, run before the connection
    /// serves another statement.
    pending: Vec<String>,
    after_commit: Vec<AfterCommit>,
}

impl ActiveScope {
    fn nested(&self, mode: Mode) -> Self {
        Self {
            mode,
            target: self.target,
            connection: Arc::clone(&self.connection),
            transaction_depth: self.transaction_depth,
            pending: Vec::new(),
            after_commit: Vec::new(),
        }
    }
}

/// The context of one logical unit of work.
///
/// A session records the connection scope that is currently active. Scopes
/// nest: [`Session::client`] returns a [`Scoped`] guard, and dropping the
/// guard restores whatever scope was active before it, whether the block
/// returned normally, bailed out with `?`, panicked or was cancelled.
///
/// Sessions are cheap and are not shared between tasks; the router behind
/// them is.
pub struct Session {
    router: Arc<ConnectionRouter>,
    active: Option<ActiveScope>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("router", &self.router)
            .field("state", &self.state())
            .field("mode", &self.mode())
            .field("transaction_depth", &self.transaction_depth())
            .finish()
    }
}

impl Session {
    /// Create a session with no active scope.
    pub fn new(router: Arc<ConnectionRouter>) -> Self {
        Self { router, active: None }
    }

    /// The router this session draws connections from.
    pub fn router(&self) -> &Arc<ConnectionRouter> {
        &self.router
    }

    /// The dialect of the router's engine.
    pub fn dialect(&self) -> QueryResult<Dialect> {
        self.router.dialect()
    }

    /// The current connection state.
    pub fn state(&self) -> ConnectionState {
        match self.active.as_ref().map(|a| a.target) {
            None => ConnectionState::Disconnected,
            Some(Target::Single) => ConnectionState::Simple,
            Some(Target::Primary) => ConnectionState::Primary,
            Some(Target::Replica) => ConnectionState::Replica,
        }
    }

    /// The mode of the active scope.
    pub fn mode(&self) -> Option<Mode> {
        self.active.as_ref().map(|a| a.mode)
    }

    /// The connection of the active scope.
    pub fn connection(&self) -> Option<&Arc<dyn Connection>> {
        self.active.as_ref().map(|a| &a.connection)
    }

    /// Check if a transaction is open in the active scope.
    pub fn in_transaction(&self) -> bool {
        self.transaction_depth() > 0
    }

    pub(crate) fn transaction_depth(&self) -> u32 {
        self.active.as_ref().map_or(0, |a| a.transaction_depth)
    }

    /// Run `callback` once the enclosing transaction commits.
    ///
    /// Outside a transaction the callback runs immediately. Callbacks added
    /// inside a savepoint move to the parent transaction when the savepoint
    /// is released and are discarded when it rolls back.
    pub fn after_commit(&mut self, callback: impl FnOnce() + Send + Sync + 'static) {
        match self.active.as_mut() {
            Some(active) if active.transaction_depth > 0 => active.after_commit.push(Box::new(callback)),
            _ => callback(),
        }
    }

    /// Enter a connection scope for `mode`.
    ///
    /// On a simple topology the single database serves every mode. On a
    /// cluster, a read-write scope binds to the primary and a read scope to a
    /// replica, except that an enclosing scope is reused when it can serve the
    /// request: a read-write scope inside a read-write scope shares its
    /// connection, and a read scope inside any scope keeps that scope's
    /// connection so reads observe writes already made on it.
    ///
    /// Rollbacks left behind by dropped nested transactions run first.
    /// Connection errors are returned without retrying and leave the
    /// session unchanged.
    pub async fn client(&mut self, mode: Mode) -> QueryResult<Scoped<'_>> {
        self.flush_pending().await?;

        let reused = match (&self.active, self.router.topology(), mode) {
            (Some(active), Topology::Simple, _) => Some(active.nested(escalate(active.mode, mode))),
            (Some(active), Topology::Cluster, Mode::ReadWrite) if active.mode == Mode::ReadWrite => {
                Some(active.nested(Mode::ReadWrite))
            }
            (Some(active), Topology::Cluster, Mode::Read) => Some(active.nested(active.mode)),
            _ => None,
        };

        let scope = match reused {
            Some(scope) => {
                debug!(mode = ?mode, target = ?scope.target, "Reusing connection scope");
                scope
            }
            None => {
                let target = self.router.target_for(mode);
                let connection = self.router.open(target).await?;
                debug!(mode = ?mode, target = ?target, "Entering connection scope");
                ActiveScope {
                    mode,
                    target,
                    connection,
                    transaction_depth: 0,
                    pending: Vec::new(),
                    after_commit: Vec::new(),
                }
            }
        };

        let connection = Arc::clone(&scope.connection);
        let prior = self.active.replace(scope);
        Ok(Scoped {
            session: self,
            prior,
            connection,
        })
    }

    /// Open a transaction with the default configuration.
    pub async fn transaction(&mut self) -> QueryResult<Transaction<'_>> {
        self.transaction_with(TransactionConfig::default()).await
    }

    /// Open a transaction in a read-write scope.
    ///
    /// Inside an open transaction this creates a savepoint instead.
    pub async fn transaction_with(&mut self, config: TransactionConfig) -> QueryResult<Transaction<'_>> {
        let dialect = self.dialect()?;
        let scope = self.client(Mode::ReadWrite).await?;
        Transaction::begin(scope, &config, &dialect).await
    }

    /// Run the rollbacks queued on the active scope.
    pub(crate) async fn flush_pending(&mut self) -> QueryResult<()> {
        let Some(active) = self.active.as_mut() else {
            return Ok(());
        };
        if active.pending.is_empty() {
            return Ok(());
        }
        let connection = Arc::clone(&active.connection);
        for sql in std::mem::take(&mut active.pending) {
            debug!(sql = %sql, "Rolling back abandoned transaction");
            connection.batch_execute(&sql).await.map_err(|err| {
                QueryError::transaction(format!("rollback of abandoned transaction failed: {}", err))
                    .with_sql(sql.clone())
                    .with_source(err)
            })?;
        }
        Ok(())
    }
}

fn escalate(current: Mode, requested: Mode) -> Mode {
    if current == Mode::ReadWrite || requested == Mode::ReadWrite {
        Mode::ReadWrite
    } else {
        Mode::Read
    }
}

/// Run `statements` on a connection that has left its session.
fn spawn_rollback(connection: Arc<dyn Connection>, statements: Vec<String>) {
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn(async move {
                for sql in statements {
                    if let Err(err) = connection.batch_execute(&sql).await {
                        error!(sql = %sql, error = %err.display_full(), "Rollback of dropped transaction failed");
                        break;
                    }
                }
            });
        }
        Err(_) => {
            error!("Transaction dropped outside a runtime; rollback skipped");
        }
    }
}

/// An active connection scope.
///
/// Dereferences to the [`Session`] so nested operations can run inside the
/// scope. Dropping the guard restores the prior scope.
pub struct Scoped<'s> {
    session: &'s mut Session,
    prior: Option<ActiveScope>,
    connection: Arc<dyn Connection>,
}

impl Scoped<'_> {
    /// The connection bound to this scope.
    pub fn connection(&self) -> &Arc<dyn Connection> {
        &self.connection
    }

    pub(crate) fn set_transaction_depth(&mut self, depth: u32) {
        if let Some(active) = self.session.active.as_mut() {
            active.transaction_depth = depth;
        }
    }

    /// Forget rollbacks and callbacks queued by nested transactions.
    pub(crate) fn discard_nested(&mut self) {
        if let Some(active) = self.session.active.as_mut() {
            active.pending.clear();
            active.after_commit.clear();
        }
    }

    /// Queue `sql` to run before the connection is used again.
    pub(crate) fn defer(&mut self, sql: String) {
        if let Some(active) = self.session.active.as_mut() {
            active.pending.push(sql);
        }
    }

    pub(crate) fn take_after_commit(&mut self) -> Vec<AfterCommit> {
        self.session
            .active
            .as_mut()
            .map(|active| std::mem::take(&mut active.after_commit))
            .unwrap_or_default()
    }
}

impl Deref for Scoped<'_> {
    type Target = Session;

    fn deref(&self) -> &Session {
        self.session
    }
}

impl DerefMut for Scoped<'_> {
    fn deref_mut(&mut self) -> &mut Session {
        self.session
    }
}

impl Drop for Scoped<'_> {
    fn drop(&mut self) {
        let leaving = self.session.active.take();
        self.session.active = self.prior.take();
        let Some(mut leaving) = leaving else {
            return;
        };

        // Work queued on this scope belongs to whoever keeps using the connection.
        let pending = std::mem::take(&mut leaving.pending);
        let after_commit = std::mem::take(&mut leaving.after_commit);
        match self.session.active.as_mut() {
            Some(prior) if Arc::ptr_eq(&prior.connection, &leaving.connection) => {
                prior.pending.extend(pending);
                prior.after_commit.extend(after_commit);
            }
            _ => {
                if !pending.is_empty() {
                    spawn_rollback(leaving.connection, pending);
                }
                if !after_commit.is_empty() {
                    warn!(callbacks = after_commit.len(), "Discarding after-commit callbacks of a closed scope");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockLog, MockProvider};
    use pretty_assertions::assert_eq;

    fn cluster(log: &MockLog) -> Arc<ConnectionRouter> {
        Arc::new(
            ConnectionRouter::cluster(
                MockProvider::postgres("primary", log).shared(),
                vec![MockProvider::postgres("replica", log).shared()],
            )
            .unwrap(),
        )
    }

    async fn run(session: &mut Session, mode: Mode, sql: &str) -> QueryResult<()> {
        let scope = session.client(mode).await?;
        scope.connection().batch_execute(sql).await
    }

    fn targets(log: &MockLog) -> Vec<(String, String)> {
        log.statements().into_iter().map(|s| (s.target, s.sql)).collect()
    }

    #[tokio::test]
    async fn test_cluster_routes_by_mode() {
        let log = MockLog::new();
        let mut session = cluster(&log).session();

        run(&mut session, Mode::Read, "r").await.unwrap();
        run(&mut session, Mode::ReadWrite, "w").await.unwrap();

        assert_eq!(
            targets(&log),
            vec![("replica".into(), "r".into()), ("primary".into(), "w".into())]
        );
        assert_eq!(session.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_read_inside_write_reuses_primary() {
        let log = MockLog::new();
        let mut session = cluster(&log).session();

        {
            let mut outer = session.client(Mode::ReadWrite).await.unwrap();
            outer.connection().batch_execute("w").await.unwrap();
            run(&mut outer, Mode::Read, "r").await.unwrap();
            run(&mut outer, Mode::ReadWrite, "w2").await.unwrap();
            assert_eq!(outer.state(), ConnectionState::Primary);
        }

        let statements = log.statements();
        assert!(statements.iter().all(|s| s.target == "primary"));
        assert!(statements.iter().all(|s| s.connection == statements[0].connection));
        assert_eq!(session.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_write_inside_read_escalates_to_primary() {
        let log = MockLog::new();
        let mut session = cluster(&log).session();

        let mut outer = session.client(Mode::Read).await.unwrap();
        assert_eq!(outer.state(), ConnectionState::Replica);
        {
            let inner = outer.client(Mode::ReadWrite).await.unwrap();
            assert_eq!(inner.state(), ConnectionState::Primary);
        }
        assert_eq!(outer.state(), ConnectionState::Replica);
        assert_eq!(outer.mode(), Some(Mode::Read));
    }

    #[tokio::test]
    async fn test_simple_topology_escalates_mode_only() {
        let log = MockLog::new();
        let router = Arc::new(ConnectionRouter::simple(MockProvider::sqlite("db", &log).shared()));
        let mut session = router.session();

        let mut outer = session.client(Mode::Read).await.unwrap();
        {
            let inner = outer.client(Mode::ReadWrite).await.unwrap();
            assert_eq!(inner.state(), ConnectionState::Simple);
            assert_eq!(inner.mode(), Some(Mode::ReadWrite));
        }
        assert_eq!(outer.mode(), Some(Mode::Read));
        drop(outer);
        assert_eq!(log.connects("db"), 1);
    }

    #[tokio::test]
    async fn test_scope_restored_on_error() {
        let log = MockLog::new();
        let mut session = cluster(&log).session();

        async fn failing(session: &mut Session) -> QueryResult<()> {
            let _scope = session.client(Mode::ReadWrite).await?;
            Err(QueryError::internal("boom"))
        }

        assert!(failing(&mut session).await.is_err());
        assert_eq!(session.state(), ConnectionState::Disconnected);
        assert_eq!(session.mode(), None);
    }

    #[tokio::test]
    async fn test_failed_connect_leaves_session_unchanged() {
        let log = MockLog::new();
        let primary = MockProvider::postgres("primary", &log);
        primary.fail_connections("refused");
        let router = Arc::new(
            ConnectionRouter::cluster(primary.shared(), vec![MockProvider::postgres("replica", &log).shared()])
                .unwrap(),
        );
        let mut session = router.session();

        let mut outer = session.client(Mode::Read).await.unwrap();
        assert!(outer.client(Mode::ReadWrite).await.is_err());
        assert_eq!(outer.state(), ConnectionState::Replica);
    }
}
