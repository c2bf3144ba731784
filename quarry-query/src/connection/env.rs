//! `${VAR}` expansion for configuration files.

use std::collections::HashMap;
use std::iter::Peekable;
use std::str::Chars;

use super::config::ConfigError;

/// Where variable values come from.
pub trait EnvSource: Send + Sync {
    /// The value of `name`, if set.
    fn get(&self, name: &str) -> Option<String>;
}

/// The process environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct StdEnvSource;

impl EnvSource for StdEnvSource {
    fn get(&self, name: &str) -> Option<String> {
        std::env::var(name).ok()
    }
}

/// A fixed set of variables.
#[derive(Debug, Clone, Default)]
pub struct MapEnvSource {
    vars: HashMap<String, String>,
}

impl MapEnvSource {
    /// Create an empty source.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a variable.
    pub fn set(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.vars.insert(name.into(), value.into());
        self
    }
}

impl EnvSource for MapEnvSource {
    fn get(&self, name: &str) -> Option<String> {
        self.vars.get(name).cloned()
    }
}

/// Expands variable references in configuration text.
///
/// Supported forms:
/// - `${VAR}`: required
/// - `${VAR:-default}`: `default` when unset or empty
/// - `${VAR:?message}`: required, failing with `message`
/// - `$VAR`: required
///
/// A `$` not followed by a name or `{` is kept literally.
#[derive(Debug, Clone)]
pub struct EnvExpander<S: EnvSource = StdEnvSource> {
    source: S,
}

impl EnvExpander<StdEnvSource> {
    /// Expand against the process environment.
    pub fn new() -> Self {
        Self { source: StdEnvSource }
    }
}

impl Default for EnvExpander<StdEnvSource> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: EnvSource> EnvExpander<S> {
    /// Expand against a custom source.
    pub fn with_source(source: S) -> Self {
        Self { source }
    }

    /// Expand every reference in `input`.
    pub fn expand(&self, input: &str) -> Result<String, ConfigError> {
        let mut out = String::with_capacity(input.len());
        let mut chars = input.chars().peekable();

        while let Some(c) = chars.next() {
            if c != '$' {
                out.push(c);
                continue;
            }
            match chars.peek() {
                Some('{') => {
                    chars.next();
                    out.push_str(&self.expand_braced(&mut chars)?);
                }
                Some(&next) if next.is_ascii_alphabetic() || next == '_' => {
                    out.push_str(&self.expand_bare(&mut chars)?);
                }
                _ => out.push('$'),
            }
        }
        Ok(out)
    }

    fn expand_braced(&self, chars: &mut Peekable<Chars<'_>>) -> Result<String, ConfigError> {
        let mut name = String::new();
        let mut modifier = None;
        let mut argument = String::new();
        let mut closed = false;

        for c in chars.by_ref() {
            match c {
                '}' => {
                    closed = true;
                    break;
                }
                ':' if modifier.is_none() => modifier = Some(None),
                c if modifier == Some(None) => modifier = Some(Some(c)),
                c if modifier.is_some() => argument.push(c),
                c => name.push(c),
            }
        }

        if !closed {
            return Err(ConfigError::InvalidEnvValue {
                name,
                message: "unterminated `${`".to_string(),
            });
        }
        if name.is_empty() {
            return Err(ConfigError::InvalidEnvValue {
                name,
                message: "empty variable name".to_string(),
            });
        }

        match self.source.get(&name) {
            Some(value) if !value.is_empty() => Ok(value),
            unset => match modifier.flatten() {
                Some('-') => Ok(argument),
                Some('?') => Err(ConfigError::InvalidEnvValue {
                    message: if argument.is_empty() {
                        format!("required variable `{}` is not set", name)
                    } else {
                        argument
                    },
                    name,
                }),
                _ => unset.ok_or(ConfigError::EnvNotFound(name)),
            },
        }
    }

    fn expand_bare(&self, chars: &mut Peekable<Chars<'_>>) -> Result<String, ConfigError> {
        let mut name = String::new();
        while let Some(&c) = chars.peek() {
            if !(c.is_ascii_alphanumeric() || c == '_') {
                break;
            }
            name.push(c);
            chars.next();
        }
        self.source.get(&name).ok_or(ConfigError::EnvNotFound(name))
    }
}

/// Expand `input` against the process environment.
pub fn expand_env(input: &str) -> Result<String, ConfigError> {
    EnvExpander::new().expand(input)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn expander() -> EnvExpander<MapEnvSource> {
        EnvExpander::with_source(
            MapEnvSource::new()
                .set("PGHOST", "db.internal")
                .set("PGPORT", "5432")
                .set("POOL", "")
                .set("REPLICA_HOST", "replica.internal"),
        )
    }

    #[test]
    fn test_braced_and_bare() {
        assert_eq!(
            expander().expand("postgres://${PGHOST}:$PGPORT/app").unwrap(),
            "postgres://db.internal:5432/app"
        );
    }

    #[test]
    fn test_defaults() {
        assert_eq!(expander().expand("${POOL:-10}").unwrap(), "10");
        assert_eq!(expander().expand("${MISSING:-5}").unwrap(), "5");
        assert_eq!(expander().expand("${PGPORT:-1}").unwrap(), "5432");
    }

    #[test]
    fn test_required_message() {
        let err = expander().expand("${MASTER_URL:?master url is required}").unwrap_err();
        assert!(err.to_string().contains("master url is required"));
    }

    #[test]
    fn test_missing_and_malformed() {
        assert!(matches!(expander().expand("${MISSING}"), Err(ConfigError::EnvNotFound(name)) if name == "MISSING"));
        assert!(expander().expand("${PGHOST").is_err());
        assert!(expander().expand("${}").is_err());
    }

    #[test]
    fn test_literal_dollar() {
        assert_eq!(expander().expand("costs $5 or $").unwrap(), "costs $5 or $");
    }
}
