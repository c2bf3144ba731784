//! SQLite configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use quarry_query::{DatabaseConfig, TargetConfig};

use crate::error::{SqliteError, SqliteResult};

/// Extension decoding JSON object/array text into documents.
pub const JSON: &str = "json";

/// Settings for one SQLite database.
#[derive(Debug, Clone, PartialEq)]
pub struct SqliteConfig {
    /// Database location.
    pub path: DatabasePath,
    /// Enable foreign keys.
    pub foreign_keys: bool,
    /// Busy timeout in milliseconds.
    pub busy_timeout_ms: Option<u32>,
    /// Synchronous mode.
    pub synchronous: SynchronousMode,
    /// Journal mode.
    pub journal_mode: JournalMode,
    /// Pool size. In-memory databases always use a single connection.
    pub max_connections: usize,
    /// How long a checkout waits for a free connection.
    pub acquire_timeout: Duration,
    /// Idle connections older than this are closed instead of reused.
    pub idle_timeout: Option<Duration>,
    /// Decoding extensions.
    pub extensions: SqliteExtensions,
}

/// Database location.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum DatabasePath {
    /// In-memory database.
    #[default]
    Memory,
    /// File-based database.
    File(PathBuf),
}

impl DatabasePath {
    /// The path as given to SQLite.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Memory => ":memory:",
            Self::File(path) => path.to_str().unwrap_or(":memory:"),
        }
    }

    /// Check if this is an in-memory database.
    pub fn is_memory(&self) -> bool {
        matches!(self, Self::Memory)
    }
}

/// SQLite synchronous mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SynchronousMode {
    /// No syncs.
    Off,
    /// Sync at critical moments.
    #[default]
    Normal,
    /// Sync on every commit.
    Full,
}

impl SynchronousMode {
    /// Get the SQLite pragma value.
    pub fn as_pragma(&self) -> &'static str {
        match self {
            Self::Off => "OFF",
            Self::Normal => "NORMAL",
            Self::Full => "FULL",
        }
    }
}

/// SQLite journal mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum JournalMode {
    /// Rollback journal deleted after each transaction.
    Delete,
    /// Journal kept in memory.
    Memory,
    /// Write-ahead logging.
    #[default]
    Wal,
}

impl JournalMode {
    /// Get the SQLite pragma value.
    pub fn as_pragma(&self) -> &'static str {
        match self {
            Self::Delete => "DELETE",
            Self::Memory => "MEMORY",
            Self::Wal => "WAL",
        }
    }
}

/// Decoding extensions activated on every connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SqliteExtensions {
    /// TEXT cells holding a JSON object or array decode to JSON documents.
    pub json: bool,
}

impl SqliteExtensions {
    /// Resolve extension names; unknown names are an error.
    pub fn from_names<S: AsRef<str>>(names: &[S]) -> SqliteResult<Self> {
        let mut extensions = Self::default();
        for name in names {
            match name.as_ref() {
                JSON => extensions.json = true,
                other => return Err(SqliteError::config(format!("unknown SQLite extension: {}", other))),
            }
        }
        Ok(extensions)
    }

    /// The extensions named by a database configuration.
    pub fn from_config(config: &DatabaseConfig) -> SqliteResult<Self> {
        Self::from_names(&config.extensions)
    }
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self {
            path: DatabasePath::Memory,
            foreign_keys: true,
            busy_timeout_ms: Some(5000),
            synchronous: SynchronousMode::Normal,
            journal_mode: JournalMode::Wal,
            max_connections: quarry_query::connection::DEFAULT_MAX_CONNECTIONS,
            acquire_timeout: Duration::from_secs(30),
            idle_timeout: Some(Duration::from_secs(300)),
            extensions: SqliteExtensions::default(),
        }
    }
}

impl SqliteConfig {
    /// An in-memory database.
    pub fn memory() -> Self {
        Self::default()
    }

    /// A file-based database.
    pub fn file(path: impl AsRef<Path>) -> Self {
        Self {
            path: DatabasePath::File(path.as_ref().to_path_buf()),
            ..Default::default()
        }
    }

    /// Parse a SQLite URL.
    ///
    /// Supported formats:
    /// - `sqlite::memory:` - In-memory database
    /// - `sqlite://path/to/db.sqlite` - Relative path
    /// - `sqlite:///absolute/path/db.sqlite` - Absolute path
    /// - `file:path/to/db.sqlite` - Alternative format
    ///
    /// Query parameters: `foreign_keys`, `busy_timeout` (ms), `synchronous`,
    /// `journal_mode` and `mode=memory`.
    pub fn from_url(url: impl AsRef<str>) -> SqliteResult<Self> {
        let url = url.as_ref();
        let (location, query) = match url.split_once('?') {
            Some((location, query)) => (location, Some(query)),
            None => (url, None),
        };

        let path = if let Some(path) = location.strip_prefix("sqlite://") {
            path
        } else if let Some(path) = location.strip_prefix("sqlite3://") {
            path
        } else if let Some(path) = location.strip_prefix("sqlite:") {
            path
        } else if let Some(path) = location.strip_prefix("file:") {
            path
        } else {
            return Err(SqliteError::config(format!("not a SQLite URL: {}", url)));
        };

        let mut config = match path {
            "" => return Err(SqliteError::config("database path is required")),
            ":memory:" => Self::memory(),
            path => Self::file(path),
        };

        for pair in query.into_iter().flat_map(|q| q.split('&')).filter(|p| !p.is_empty()) {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            match key {
                "mode" if value == "memory" => config.path = DatabasePath::Memory,
                "foreign_keys" => config.foreign_keys = matches!(value, "true" | "1" | "on"),
                "busy_timeout" => {
                    let ms = value
                        .parse()
                        .map_err(|_| SqliteError::config(format!("invalid busy_timeout: {}", value)))?;
                    config.busy_timeout_ms = Some(ms);
                }
                "synchronous" => {
                    config.synchronous = match value.to_lowercase().as_str() {
                        "off" => SynchronousMode::Off,
                        "normal" => SynchronousMode::Normal,
                        "full" => SynchronousMode::Full,
                        other => return Err(SqliteError::config(format!("invalid synchronous mode: {}", other))),
                    };
                }
                "journal_mode" => {
                    config.journal_mode = match value.to_lowercase().as_str() {
                        "delete" => JournalMode::Delete,
                        "memory" => JournalMode::Memory,
                        "wal" => JournalMode::Wal,
                        other => return Err(SqliteError::config(format!("invalid journal mode: {}", other))),
                    };
                }
                other => return Err(SqliteError::config(format!("unknown connection option: {}", other))),
            }
        }

        Ok(config)
    }

    /// Settings for one target of a [`DatabaseConfig`].
    pub fn from_target(target: &TargetConfig, extensions: SqliteExtensions) -> SqliteResult<Self> {
        let mut config = Self::from_url(&target.uri)?;
        config.max_connections = target.max_connections();
        config.extensions = extensions;
        Ok(config)
    }

    /// The statements run on every new connection.
    pub fn init_sql(&self) -> String {
        let mut sql = String::new();
        if self.foreign_keys {
            sql.push_str("PRAGMA foreign_keys = ON;\n");
        }
        if !self.path.is_memory() {
            sql.push_str(&format!("PRAGMA journal_mode = {};\n", self.journal_mode.as_pragma()));
        }
        sql.push_str(&format!("PRAGMA synchronous = {};\n", self.synchronous.as_pragma()));
        if let Some(timeout) = self.busy_timeout_ms {
            sql.push_str(&format!("PRAGMA busy_timeout = {};\n", timeout));
        }
        sql
    }

    /// Set the pool size.
    pub fn max_connections(mut self, n: usize) -> Self {
        self.max_connections = n;
        self
    }

    /// Set the checkout timeout.
    pub fn acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    /// Enable or disable foreign keys.
    pub fn foreign_keys(mut self, enabled: bool) -> Self {
        self.foreign_keys = enabled;
        self
    }

    /// Set the journal mode.
    pub fn journal_mode(mut self, mode: JournalMode) -> Self {
        self.journal_mode = mode;
        self
    }

    /// Set the decoding extensions.
    pub fn extensions(mut self, extensions: SqliteExtensions) -> Self {
        self.extensions = extensions;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_from_url_memory() {
        assert!(SqliteConfig::from_url("sqlite::memory:").unwrap().path.is_memory());
        assert!(SqliteConfig::from_url("sqlite://x.db?mode=memory").unwrap().path.is_memory());
    }

    #[test]
    fn test_from_url_file() {
        let config = SqliteConfig::from_url("sqlite://./forum.db").unwrap();
        assert_eq!(config.path.as_str(), "./forum.db");

        let config = SqliteConfig::from_url("sqlite:///var/lib/forum.db").unwrap();
        assert_eq!(config.path.as_str(), "/var/lib/forum.db");

        let config = SqliteConfig::from_url("file:forum.db").unwrap();
        assert_eq!(config.path.as_str(), "forum.db");
    }

    #[test]
    fn test_from_url_options() {
        let config =
            SqliteConfig::from_url("sqlite://./forum.db?foreign_keys=0&busy_timeout=250&synchronous=full").unwrap();
        assert!(!config.foreign_keys);
        assert_eq!(config.busy_timeout_ms, Some(250));
        assert_eq!(config.synchronous, SynchronousMode::Full);
    }

    #[test]
    fn test_from_url_errors() {
        assert!(SqliteConfig::from_url("postgres://localhost/forum").is_err());
        assert!(SqliteConfig::from_url("sqlite://").is_err());
        assert!(SqliteConfig::from_url("sqlite://forum.db?cache=shared").is_err());
        assert!(SqliteConfig::from_url("sqlite://forum.db?busy_timeout=soon").is_err());
    }

    #[test]
    fn test_from_target() {
        let target = TargetConfig::new("sqlite:///tmp/forum.db").with_max_connections(2);
        let config = SqliteConfig::from_target(&target, SqliteExtensions { json: true }).unwrap();
        assert_eq!(config.max_connections, 2);
        assert!(config.extensions.json);
    }

    #[test]
    fn test_init_sql() {
        let sql = SqliteConfig::file("forum.db").init_sql();
        assert!(sql.contains("foreign_keys = ON"));
        assert!(sql.contains("journal_mode = WAL"));
        assert!(sql.contains("busy_timeout = 5000"));

        let sql = SqliteConfig::memory().init_sql();
        assert!(!sql.contains("journal_mode"));
    }

    #[test]
    fn test_extensions() {
        assert!(SqliteExtensions::from_names(&["json"]).unwrap().json);
        assert!(SqliteExtensions::from_names(&["pg_array"]).is_err());
    }
}
