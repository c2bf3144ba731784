//! Database topology configuration.
//!
//! ```toml
//! mode = "cluster"
//! extensions = ["pg_array", "pg_json"]
//!
//! [master]
//! uri = "postgres://app@primary.internal/app"
//! max_connections = 20
//!
//! [replica]
//! uri = "postgres://app@replica.internal/app"
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;
use url::Url;

use super::env::{EnvExpander, EnvSource, StdEnvSource};
use crate::error::{ErrorCode, QueryError};

/// Pool size used when a target does not set one.
pub const DEFAULT_MAX_CONNECTIONS: usize = 10;

/// Errors raised while loading or validating configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// A connection URI could not be parsed.
    #[error("Invalid connection URI `{uri}`: {message}")]
    InvalidUri { uri: String, message: String },

    /// A URI names an engine no driver supports.
    #[error("Unknown database engine: {0}")]
    UnknownEngine(String),

    /// A required field is absent.
    #[error("Missing required field: {0}")]
    MissingField(String),

    /// A field has an unusable value.
    #[error("Invalid option '{key}': {message}")]
    InvalidOption { key: String, message: String },

    /// The fields present do not describe a valid topology.
    #[error("Illegal configuration: {0}")]
    IllegalTopology(String),

    /// A referenced environment variable is not set.
    #[error("Environment variable not found: {0}")]
    EnvNotFound(String),

    /// An environment reference could not be expanded.
    #[error("Invalid environment variable '{name}': {message}")]
    InvalidEnvValue { name: String, message: String },

    /// The configuration file could not be read.
    #[error("Cannot read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// The configuration text is not valid TOML for this schema.
    #[error("Cannot parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
}

impl From<ConfigError> for QueryError {
    fn from(err: ConfigError) -> Self {
        let code = match &err {
            ConfigError::MissingField(_) | ConfigError::EnvNotFound(_) => ErrorCode::MissingConfiguration,
            ConfigError::InvalidUri { .. } | ConfigError::UnknownEngine(_) => ErrorCode::InvalidConnectionString,
            _ => ErrorCode::InvalidConfiguration,
        };
        QueryError::new(code, err.to_string()).with_source(err)
    }
}

/// Topology selector.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TopologyMode {
    /// One database for every mode.
    #[default]
    Simple,
    /// A primary for writes and a replica for reads.
    Cluster,
}

/// Connection settings of one database target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TargetConfig {
    /// Connection URI; the scheme selects the engine.
    pub uri: String,
    /// Pool size.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_connections: Option<usize>,
}

impl TargetConfig {
    /// A target with the default pool size.
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            max_connections: None,
        }
    }

    /// Set the pool size.
    pub fn with_max_connections(mut self, max_connections: usize) -> Self {
        self.max_connections = Some(max_connections);
        self
    }

    /// The pool size, falling back to [`DEFAULT_MAX_CONNECTIONS`].
    pub fn max_connections(&self) -> usize {
        self.max_connections.unwrap_or(DEFAULT_MAX_CONNECTIONS)
    }

    /// The parsed URI.
    pub fn url(&self) -> Result<Url, ConfigError> {
        Url::parse(&self.uri).map_err(|err| ConfigError::InvalidUri {
            uri: self.uri.clone(),
            message: err.to_string(),
        })
    }

    /// The canonical engine name for the URI scheme.
    pub fn engine(&self) -> Result<&'static str, ConfigError> {
        match self.url()?.scheme() {
            "postgres" | "postgresql" => Ok("postgres"),
            "sqlite" | "sqlite3" | "file" => Ok("sqlite"),
            other => Err(ConfigError::UnknownEngine(other.to_string())),
        }
    }

    fn validate(&self, name: &str) -> Result<(), ConfigError> {
        self.engine()?;
        if self.max_connections == Some(0) {
            return Err(ConfigError::InvalidOption {
                key: format!("{}.max_connections", name),
                message: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

/// The targets of a validated configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Targets {
    /// One database.
    Simple(TargetConfig),
    /// A primary and a replica.
    Cluster {
        master: TargetConfig,
        replica: TargetConfig,
    },
}

impl Targets {
    /// Engine name shared by every target.
    pub fn engine(&self) -> Result<&'static str, ConfigError> {
        match self {
            Targets::Simple(target) => target.engine(),
            Targets::Cluster { master, .. } => master.engine(),
        }
    }
}

/// Database configuration as read from a file or the environment.
///
/// A simple topology takes either a top-level `uri` (with optional
/// `max_connections`) or a `[db]` table. A cluster takes `[master]` and
/// `[replica]` tables and nothing else. `extensions` names driver extensions
/// activated on every connection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DatabaseConfig {
    /// Topology selector.
    #[serde(default)]
    pub mode: TopologyMode,
    /// Driver extensions to activate.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extensions: Vec<String>,
    /// Simple target URI.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
    /// Simple target pool size.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_connections: Option<usize>,
    /// Simple target as a table.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub db: Option<TargetConfig>,
    /// Cluster primary.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub master: Option<TargetConfig>,
    /// Cluster replica.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replica: Option<TargetConfig>,
}

impl DatabaseConfig {
    /// A simple topology on `uri`.
    pub fn simple(uri: impl Into<String>) -> Self {
        Self {
            uri: Some(uri.into()),
            ..Self::default()
        }
    }

    /// A cluster topology.
    pub fn cluster(master: TargetConfig, replica: TargetConfig) -> Self {
        Self {
            mode: TopologyMode::Cluster,
            master: Some(master),
            replica: Some(replica),
            ..Self::default()
        }
    }

    /// Add a driver extension.
    pub fn with_extension(mut self, name: impl Into<String>) -> Self {
        self.extensions.push(name.into());
        self
    }

    /// Check the topology rules and resolve the targets.
    pub fn validate(&self) -> Result<Targets, ConfigError> {
        let targets = match self.mode {
            TopologyMode::Simple => {
                if self.master.is_some() || self.replica.is_some() {
                    return Err(ConfigError::IllegalTopology(
                        "simple mode does not accept `master` or `replica`".to_string(),
                    ));
                }
                let target = match (&self.uri, &self.db) {
                    (Some(_), Some(_)) => {
                        return Err(ConfigError::IllegalTopology(
                            "set either `uri` or `[db]`, not both".to_string(),
                        ));
                    }
                    (Some(uri), None) => TargetConfig {
                        uri: uri.clone(),
                        max_connections: self.max_connections,
                    },
                    (None, Some(db)) if self.max_connections.is_none() => db.clone(),
                    (None, Some(_)) => {
                        return Err(ConfigError::IllegalTopology(
                            "`max_connections` belongs inside `[db]`".to_string(),
                        ));
                    }
                    (None, None) => return Err(ConfigError::MissingField("uri".to_string())),
                };
                target.validate("db")?;
                Targets::Simple(target)
            }
            TopologyMode::Cluster => {
                if self.uri.is_some() || self.db.is_some() || self.max_connections.is_some() {
                    return Err(ConfigError::IllegalTopology(
                        "cluster mode accepts only `master` and `replica` targets".to_string(),
                    ));
                }
                let master = self
                    .master
                    .clone()
                    .ok_or_else(|| ConfigError::MissingField("master".to_string()))?;
                let replica = self
                    .replica
                    .clone()
                    .ok_or_else(|| ConfigError::MissingField("replica".to_string()))?;
                master.validate("master")?;
                replica.validate("replica")?;
                if master.engine()? != replica.engine()? {
                    return Err(ConfigError::IllegalTopology(
                        "`master` and `replica` must use the same engine".to_string(),
                    ));
                }
                Targets::Cluster { master, replica }
            }
        };
        Ok(targets)
    }

    /// Parse TOML text and validate it.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Expand environment references in TOML text, then parse it.
    pub fn from_toml_with<S: EnvSource>(text: &str, expander: &EnvExpander<S>) -> Result<Self, ConfigError> {
        Self::from_toml_str(&expander.expand(text)?)
    }

    /// Load a TOML file, expanding `${VAR}` references from the environment.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let config = Self::from_toml_with(&text, &EnvExpander::new())?;
        info!(path = %path.display(), mode = ?config.mode, "Loaded database configuration");
        Ok(config)
    }

    /// Build a configuration from `DATABASE_URL`, `DATABASE_MAX_CONNECTIONS`
    /// and `DATABASE_REPLICA_URL`.
    ///
    /// Setting a replica URL selects a cluster with `DATABASE_URL` as primary.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_env_source(&StdEnvSource)
    }

    /// [`DatabaseConfig::from_env`] against a custom source.
    pub fn from_env_source(source: &impl EnvSource) -> Result<Self, ConfigError> {
        let uri = source
            .get("DATABASE_URL")
            .filter(|v| !v.is_empty())
            .ok_or_else(|| ConfigError::EnvNotFound("DATABASE_URL".to_string()))?;
        let max_connections = match source.get("DATABASE_MAX_CONNECTIONS").filter(|v| !v.is_empty()) {
            Some(raw) => Some(raw.trim().parse::<usize>().map_err(|err| ConfigError::InvalidEnvValue {
                name: "DATABASE_MAX_CONNECTIONS".to_string(),
                message: err.to_string(),
            })?),
            None => None,
        };

        let config = match source.get("DATABASE_REPLICA_URL").filter(|v| !v.is_empty()) {
            Some(replica) => Self::cluster(
                TargetConfig { uri, max_connections },
                TargetConfig {
                    uri: replica,
                    max_connections,
                },
            ),
            None => Self {
                uri: Some(uri),
                max_connections,
                ..Self::default()
            },
        };
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::MapEnvSource;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_simple_uri() {
        let config = DatabaseConfig::from_toml_str(
            r#"
            uri = "postgres://localhost/app"
            max_connections = 4
            extensions = ["pg_array"]
            "#,
        )
        .unwrap();
        assert_eq!(config.extensions, vec!["pg_array"]);
        assert_eq!(
            config.validate().unwrap(),
            Targets::Simple(TargetConfig::new("postgres://localhost/app").with_max_connections(4))
        );
    }

    #[test]
    fn test_simple_db_table() {
        let config = DatabaseConfig::from_toml_str(
            r#"
            mode = "simple"
            [db]
            uri = "sqlite://./app.db"
            "#,
        )
        .unwrap();
        let Targets::Simple(target) = config.validate().unwrap() else {
            panic!("expected a simple topology");
        };
        assert_eq!(target.engine().unwrap(), "sqlite");
        assert_eq!(target.max_connections(), DEFAULT_MAX_CONNECTIONS);
    }

    #[test]
    fn test_cluster() {
        let config = DatabaseConfig::from_toml_str(
            r#"
            mode = "cluster"
            [master]
            uri = "postgresql://primary/app"
            max_connections = 8
            [replica]
            uri = "postgres://replica/app"
            "#,
        )
        .unwrap();
        let targets = config.validate().unwrap();
        assert_eq!(targets.engine().unwrap(), "postgres");
        assert!(matches!(targets, Targets::Cluster { ref master, .. } if master.max_connections() == 8));
    }

    #[test]
    fn test_illegal_topologies() {
        let cases = [
            r#"mode = "cluster"
               [master]
               uri = "postgres://a/app""#,
            r#"mode = "cluster"
               uri = "postgres://a/app"
               [master]
               uri = "postgres://a/app"
               [replica]
               uri = "postgres://b/app""#,
            r#"uri = "postgres://a/app"
               [replica]
               uri = "postgres://b/app""#,
            r#"mode = "simple""#,
            r#"uri = "postgres://a/app"
               [db]
               uri = "postgres://a/app""#,
            r#"mode = "cluster"
               [master]
               uri = "postgres://a/app"
               [replica]
               uri = "sqlite://b.db""#,
        ];
        for case in cases {
            assert!(DatabaseConfig::from_toml_str(case).is_err(), "accepted: {}", case);
        }
    }

    #[test]
    fn test_bad_values() {
        assert!(matches!(
            DatabaseConfig::simple("mysql://localhost/app").validate(),
            Err(ConfigError::UnknownEngine(_))
        ));
        assert!(matches!(
            DatabaseConfig::simple("not a uri").validate(),
            Err(ConfigError::InvalidUri { .. })
        ));
        assert!(matches!(
            DatabaseConfig::from_toml_str("mode = \"replicated\""),
            Err(ConfigError::Parse(_))
        ));
        let zero = DatabaseConfig {
            max_connections: Some(0),
            ..DatabaseConfig::simple("postgres://a/app")
        };
        assert!(matches!(zero.validate(), Err(ConfigError::InvalidOption { .. })));
    }

    #[test]
    fn test_env_expansion() {
        let env = EnvExpander::with_source(MapEnvSource::new().set("PRIMARY", "primary.internal"));
        let config = DatabaseConfig::from_toml_with(
            r#"
            uri = "postgres://${PRIMARY}/app"
            max_connections = ${POOL:-3}
            "#,
            &env,
        )
        .unwrap();
        assert_eq!(config.uri.as_deref(), Some("postgres://primary.internal/app"));
        assert_eq!(config.max_connections, Some(3));
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("database.toml");
        std::fs::write(
            &path,
            r#"
            uri = "sqlite://./forum.db"
            max_connections = ${QUARRY_CONFIG_TEST_UNSET_POOL:-5}
            extensions = ["json"]
            "#,
        )
        .unwrap();

        let config = DatabaseConfig::from_file(&path).unwrap();
        assert_eq!(config.max_connections, Some(5));
        assert_eq!(config.extensions, vec!["json"]);

        let missing = DatabaseConfig::from_file(dir.path().join("absent.toml"));
        assert!(matches!(missing, Err(ConfigError::Io { .. })));
    }

    #[test]
    fn test_from_env_source() {
        let simple = DatabaseConfig::from_env_source(
            &MapEnvSource::new()
                .set("DATABASE_URL", "postgres://a/app")
                .set("DATABASE_MAX_CONNECTIONS", "7"),
        )
        .unwrap();
        assert_eq!(simple.mode, TopologyMode::Simple);
        assert_eq!(simple.max_connections, Some(7));

        let cluster = DatabaseConfig::from_env_source(
            &MapEnvSource::new()
                .set("DATABASE_URL", "postgres://a/app")
                .set("DATABASE_REPLICA_URL", "postgres://b/app"),
        )
        .unwrap();
        assert_eq!(cluster.mode, TopologyMode::Cluster);

        assert!(DatabaseConfig::from_env_source(&MapEnvSource::new()).is_err());
        assert!(
            DatabaseConfig::from_env_source(
                &MapEnvSource::new()
                    .set("DATABASE_URL", "postgres://a/app")
                    .set("DATABASE_MAX_CONNECTIONS", "many"),
            )
            .is_err()
        );
    }

    #[test]
    fn test_into_query_error() {
        let err: QueryError = ConfigError::MissingField("uri".into()).into();
        assert_eq!(err.code, ErrorCode::MissingConfiguration);
        let err: QueryError = ConfigError::UnknownEngine("mysql".into()).into();
        assert_eq!(err.code, ErrorCode::InvalidConnectionString);
    }
}
