//! Log output for Quarry.
//!
//! Quarry emits `tracing` events everywhere: rendered statements at `debug`,
//! connection scopes and pool checkouts at `debug`, dropped transactions at
//! `warn`. Applications with their own subscriber see them directly;
//! [`init`] installs a subscriber for applications without one.
//!
//! # Environment Variables
//!
//! - `QUARRY_DEBUG=true|1|yes` - Enable debug logging
//! - `QUARRY_LOG_LEVEL=trace|debug|info|warn|error` - Set the level
//! - `QUARRY_LOG_FORMAT=json|pretty|compact` - Set the output format (default: json)
//!
//! ```rust,no_run
//! quarry_query::logging::init();
//! ```

use std::sync::Once;

use crate::connection::{EnvSource, StdEnvSource};

static INIT: Once = Once::new();

/// Output format of the installed subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// One JSON object per event.
    Json,
    /// Multi-line human-readable output.
    Pretty,
    /// Single-line human-readable output.
    Compact,
}

/// Logging settings resolved from the environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogSettings {
    /// Whether anything was requested at all.
    pub enabled: bool,
    /// Maximum level.
    pub level: &'static str,
    /// Output format.
    pub format: LogFormat,
}

impl LogSettings {
    /// Read `QUARRY_DEBUG`, `QUARRY_LOG_LEVEL` and `QUARRY_LOG_FORMAT`.
    pub fn from_env() -> Self {
        Self::from_source(&StdEnvSource)
    }

    /// Read the settings from a custom source.
    pub fn from_source(source: &impl EnvSource) -> Self {
        let debug = source
            .get("QUARRY_DEBUG")
            .is_some_and(|v| matches!(v.to_lowercase().as_str(), "true" | "1" | "yes"));
        let requested = source.get("QUARRY_LOG_LEVEL");
        let level = match requested.as_deref().map(str::to_lowercase).as_deref() {
            Some("trace") => "trace",
            Some("debug") => "debug",
            Some("info") => "info",
            Some("warn") => "warn",
            Some("error") => "error",
            _ if debug => "debug",
            _ => "warn",
        };
        let format = match source.get("QUARRY_LOG_FORMAT").map(|f| f.to_lowercase()).as_deref() {
            Some("pretty") => LogFormat::Pretty,
            Some("compact") => LogFormat::Compact,
            _ => LogFormat::Json,
        };
        Self {
            enabled: debug || requested.is_some(),
            level,
            format,
        }
    }

    /// The `EnvFilter` directive for Quarry's crates.
    pub fn directive(&self) -> String {
        ["quarry", "quarry_query", "quarry_postgres", "quarry_sqlite"]
            .iter()
            .map(|target| format!("{}={}", target, self.level))
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// Install a `tracing-subscriber` according to the environment.
///
/// Only the first call has an effect, and nothing is installed unless
/// `QUARRY_DEBUG` or `QUARRY_LOG_LEVEL` is set. Without the
/// `tracing-subscriber` feature this is a no-op.
pub fn init() {
    INIT.call_once(|| {
        let settings = LogSettings::from_env();
        if !settings.enabled {
            return;
        }

        #[cfg(feature = "tracing-subscriber")]
        {
            use tracing_subscriber::{EnvFilter, fmt, prelude::*};

            let filter = EnvFilter::try_new(settings.directive()).unwrap_or_else(|_| EnvFilter::new("warn"));
            let registry = tracing_subscriber::registry().with(filter);
            let installed = match settings.format {
                LogFormat::Json => registry.with(fmt::layer().json()).try_init(),
                LogFormat::Compact => registry.with(fmt::layer().compact()).try_init(),
                LogFormat::Pretty => registry.with(fmt::layer().pretty()).try_init(),
            };
            if installed.is_ok() {
                tracing::info!(level = settings.level, format = ?settings.format, "Quarry logging initialized");
            }
        }
    });
}
