//! SQL dialect capabilities.
//!
//! Both supported engines share one filter engine; what differs between them
//! is captured here as data: placeholder style, identifier quoting, and whether
//! the engine has native arrays and JSON containment.

use crate::error::{QueryError, QueryResult};

/// Escape a string for use as an SQL identifier.
///
/// Identifiers are always double-quoted; embedded quotes are doubled.
pub fn escape_identifier(name: &str) -> String {
    let escaped = name.replace('"', "\"\"");
    format!("\"{}\"", escaped)
}

/// Parameter placeholder style.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placeholder {
    /// `$1`, `$2`, ...
    Numbered,
    /// `?` for every parameter.
    Positional,
}

/// How a case-insensitive pattern match is spelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaseInsensitiveLike {
    /// `col ILIKE ?`
    ILike,
    /// `LOWER(col) LIKE LOWER(?)`
    LowerLike,
}

/// Capabilities of one SQL dialect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dialect {
    /// Engine name, as reported by connections.
    pub name: &'static str,
    /// Parameter placeholder style.
    pub placeholder: Placeholder,
    /// Native array columns and the `&&` overlap operator.
    pub native_arrays: bool,
    /// JSON containment via `@>`.
    pub json_containment: bool,
    /// Spelling of case-insensitive `LIKE`.
    pub case_insensitive_like: CaseInsensitiveLike,
    /// `INSERT ... RETURNING` support.
    pub returning: bool,
    /// `BEGIN ISOLATION LEVEL ...` support.
    pub isolation_levels: bool,
}

impl Dialect {
    /// PostgreSQL.
    pub const POSTGRES: Dialect = Dialect {
        name: "postgres",
        placeholder: Placeholder::Numbered,
        native_arrays: true,
        json_containment: true,
        case_insensitive_like: CaseInsensitiveLike::ILike,
        returning: true,
        isolation_levels: true,
    };

    /// The generic relational dialect (SQLite).
    pub const GENERIC: Dialect = Dialect {
        name: "sqlite",
        placeholder: Placeholder::Positional,
        native_arrays: false,
        json_containment: false,
        case_insensitive_like: CaseInsensitiveLike::LowerLike,
        returning: false,
        isolation_levels: false,
    };

    /// Resolve the dialect for an engine name.
    pub fn for_engine(engine: &str) -> QueryResult<Self> {
        match engine.to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" | "pg" => Ok(Self::POSTGRES),
            "sqlite" | "sqlite3" => Ok(Self::GENERIC),
            _ => Err(QueryError::unsupported_dialect(engine)),
        }
    }

    /// Check if this is the PostgreSQL dialect.
    pub fn is_postgres(&self) -> bool {
        *self == Self::POSTGRES
    }

    /// Get the parameter placeholder for a 1-based index.
    pub fn placeholder(&self, index: usize) -> String {
        match self.placeholder {
            Placeholder::Numbered => format!("${}", index),
            Placeholder::Positional => "?".to_string(),
        }
    }

    /// Quote one identifier segment.
    pub fn quote_identifier(&self, name: &str) -> String {
        escape_identifier(name)
    }

    /// Quote a possibly dotted column path segment by segment.
    ///
    /// ```rust
    /// use quarry_query::Dialect;
    ///
    /// let quoted = Dialect::POSTGRES.quote_path("questions.custom").unwrap();
    /// assert_eq!(quoted, r#""questions"."custom""#);
    /// ```
    pub fn quote_path(&self, path: &str) -> QueryResult<String> {
        let mut quoted = String::with_capacity(path.len() + 4);
        for (i, segment) in path.split('.').enumerate() {
            if segment.is_empty() {
                return Err(QueryError::invalid_filter(
                    path,
                    "column path contains an empty segment",
                ));
            }
            if i > 0 {
                quoted.push('.');
            }
            quoted.push_str(&self.quote_identifier(segment));
        }
        Ok(quoted)
    }

    /// Literal that stands for an empty native array.
    ///
    /// Binding an empty array leaves PostgreSQL unable to infer its element
    /// type, so the untyped literal is inlined instead.
    pub fn empty_array_literal(&self) -> Option<&'static str> {
        self.native_arrays.then_some("'{}'")
    }
}

impl Default for Dialect {
    fn default() -> Self {
        Self::POSTGRES
    }
}
