//! Topology-aware connection routing.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tracing::debug;

use super::{Connection, ConnectionProvider, Session};
use crate::dialect::Dialect;
use crate::error::{QueryError, QueryResult};

/// The kind of work a scope performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mode {
    /// Reads only; may be served by a replica.
    Read,
    /// Reads and writes; always served by the primary.
    ReadWrite,
}

/// How the databases behind a router are arranged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Topology {
    /// One database serves every mode.
    Simple,
    /// Writes go to a primary, reads to replicas.
    Cluster,
}

/// The physical target a connection was opened against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    /// The only database of a simple topology.
    Single,
    /// The cluster primary.
    Primary,
    /// A cluster replica.
    Replica,
}

enum Providers {
    Simple(Arc<dyn ConnectionProvider>),
    Cluster {
        primary: Arc<dyn ConnectionProvider>,
        replicas: Vec<Arc<dyn ConnectionProvider>>,
    },
}

/// Resolves modes to connection targets.
///
/// A router is immutable once built and is shared between sessions.
pub struct ConnectionRouter {
    targets: Providers,
    round_robin: AtomicUsize,
}

impl fmt::Debug for ConnectionRouter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let replicas = match &self.targets {
            Providers::Simple(_) => 0,
            Providers::Cluster { replicas, .. } => replicas.len(),
        };
        f.debug_struct("ConnectionRouter")
            .field("topology", &self.topology())
            .field("engine", &self.engine())
            .field("replicas", &replicas)
            .finish()
    }
}

impl ConnectionRouter {
    /// A router over a single database.
    pub fn simple(provider: Arc<dyn ConnectionProvider>) -> Self {
        Self {
            targets: Providers::Simple(provider),
            round_robin: AtomicUsize::new(0),
        }
    }

    /// A router over a primary and at least one replica of the same engine.
    pub fn cluster(
        primary: Arc<dyn ConnectionProvider>,
        replicas: Vec<Arc<dyn ConnectionProvider>>,
    ) -> QueryResult<Self> {
        if replicas.is_empty() {
            return Err(QueryError::config("a cluster requires at least one replica"));
        }
        if let Some(mismatch) = replicas.iter().find(|r| r.engine() != primary.engine()) {
            return Err(QueryError::config(format!(
                "replica engine `{}` differs from primary engine `{}`",
                mismatch.engine(),
                primary.engine()
            )));
        }
        Ok(Self {
            targets: Providers::Cluster { primary, replicas },
            round_robin: AtomicUsize::new(0),
        })
    }

    /// The router's topology.
    pub fn topology(&self) -> Topology {
        match self.targets {
            Providers::Simple(_) => Topology::Simple,
            Providers::Cluster { .. } => Topology::Cluster,
        }
    }

    /// Engine name of every target.
    pub fn engine(&self) -> &str {
        match &self.targets {
            Providers::Simple(provider) => provider.engine(),
            Providers::Cluster { primary, .. } => primary.engine(),
        }
    }

    /// The dialect for this router's engine.
    pub fn dialect(&self) -> QueryResult<Dialect> {
        Dialect::for_engine(self.engine())
    }

    /// The target that serves `mode` when no scope is active.
    pub fn target_for(&self, mode: Mode) -> Target {
        match (&self.targets, mode) {
            (Providers::Simple(_), _) => Target::Single,
            (Providers::Cluster { .. }, Mode::ReadWrite) => Target::Primary,
            (Providers::Cluster { .. }, Mode::Read) => Target::Replica,
        }
    }

    /// Open a connection against `target`.
    ///
    /// Replicas are used in rotation. Establishment errors are returned as-is.
    pub async fn open(&self, target: Target) -> QueryResult<Arc<dyn Connection>> {
        let provider = match (&self.targets, target) {
            (Providers::Simple(provider), _) => provider,
            (Providers::Cluster { primary, .. }, Target::Primary | Target::Single) => primary,
            (Providers::Cluster { replicas, .. }, Target::Replica) => {
                let idx = self.round_robin.fetch_add(1, Ordering::Relaxed) % replicas.len();
                &replicas[idx]
            }
        };
        debug!(target = ?target, engine = provider.engine(), "Opening connection");
        provider.connect().await
    }

    /// Start a new session (unit of work) on this router.
    pub fn session(self: &Arc<Self>) -> Session {
        Session::new(Arc::clone(self))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockLog, MockProvider};

    #[test]
    fn test_targets() {
        let log = MockLog::new();
        let simple = ConnectionRouter::simple(MockProvider::postgres("db", &log).shared());
        assert_eq!(simple.topology(), Topology::Simple);
        assert_eq!(simple.target_for(Mode::ReadWrite), Target::Single);
        assert_eq!(simple.target_for(Mode::Read), Target::Single);

        let cluster = ConnectionRouter::cluster(
            MockProvider::postgres("primary", &log).shared(),
            vec![MockProvider::postgres("replica", &log).shared()],
        )
        .unwrap();
        assert_eq!(cluster.topology(), Topology::Cluster);
        assert_eq!(cluster.target_for(Mode::ReadWrite), Target::Primary);
        assert_eq!(cluster.target_for(Mode::Read), Target::Replica);
        assert_eq!(cluster.dialect().unwrap(), Dialect::POSTGRES);
    }

    #[test]
    fn test_cluster_validation() {
        let log = MockLog::new();
        let primary = MockProvider::postgres("primary", &log).shared();
        assert!(ConnectionRouter::cluster(primary.clone(), vec![]).is_err());
        assert!(
            ConnectionRouter::cluster(primary, vec![MockProvider::sqlite("replica", &log).shared()]).is_err()
        );
    }

    #[tokio::test]
    async fn test_replicas_rotate() {
        let log = MockLog::new();
        let router = ConnectionRouter::cluster(
            MockProvider::postgres("primary", &log).shared(),
            vec![
                MockProvider::postgres("replica-a", &log).shared(),
                MockProvider::postgres("replica-b", &log).shared(),
            ],
        )
        .unwrap();

        for _ in 0..3 {
            let conn = router.open(Target::Replica).await.unwrap();
            conn.batch_execute("SELECT 1").await.unwrap();
        }
        let targets: Vec<String> = log.statements().into_iter().map(|s| s.target).collect();
        assert_eq!(targets, vec!["replica-a", "replica-b", "replica-a"]);
    }

    #[tokio::test]
    async fn test_connect_errors_propagate() {
        let log = MockLog::new();
        let provider = MockProvider::postgres("db", &log);
        provider.fail_connections("connection refused");
        let router = ConnectionRouter::simple(provider.shared());

        let err = router.open(Target::Single).await.err().unwrap();
        assert!(err.is_connection_error());
    }
}
