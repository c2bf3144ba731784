//! Ordering types.
//!
//! Sort specifiers arrive as `[-]column[.subcolumn]`, either comma-joined in a
//! single string or as a sequence:
//!
//! ```rust
//! use quarry_query::{SortOrder, SortSpec};
//!
//! let spec: SortSpec = "-created_at, questions.id".parse().unwrap();
//! let fields = spec.fields();
//! assert_eq!(fields[0].column, "created_at");
//! assert_eq!(fields[0].order, SortOrder::Desc);
//! assert_eq!(fields[1].column, "questions.id");
//! assert_eq!(fields[1].order, SortOrder::Asc);
//! ```

use std::str::FromStr;

use serde::{Deserialize, Deserializer};

use crate::error::{QueryError, QueryResult};

/// Sort order for ordering results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SortOrder {
    /// Ascending order.
    #[default]
    Asc,
    /// Descending order.
    Desc,
}

impl SortOrder {
    /// Get the SQL keyword for this sort order.
    pub fn as_sql(&self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

/// A single ordering term.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderByField {
    /// Column path, possibly dotted, unquoted.
    pub column: String,
    /// The sort order.
    pub order: SortOrder,
}

impl OrderByField {
    /// Create a new order by field.
    pub fn new(column: impl Into<String>, order: SortOrder) -> Self {
        Self {
            column: column.into(),
            order,
        }
    }

    /// Create an ascending order.
    pub fn asc(column: impl Into<String>) -> Self {
        Self::new(column, SortOrder::Asc)
    }

    /// Create a descending order.
    pub fn desc(column: impl Into<String>) -> Self {
        Self::new(column, SortOrder::Desc)
    }

    /// Parse one `[-]column` specifier.
    pub fn parse(specifier: &str) -> QueryResult<Self> {
        let trimmed = specifier.trim();
        let (column, order) = match trimmed.strip_prefix('-') {
            Some(rest) => (rest.trim(), SortOrder::Desc),
            None => (trimmed, SortOrder::Asc),
        };
        if column.is_empty() {
            return Err(QueryError::invalid_sort(specifier));
        }
        Ok(Self::new(column, order))
    }
}

/// An ordered list of ordering terms, applied left to right.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SortSpec {
    fields: Vec<OrderByField>,
}

impl SortSpec {
    /// No ordering.
    pub fn none() -> Self {
        Self::default()
    }

    /// Build from explicit fields.
    pub fn from_fields(fields: impl IntoIterator<Item = OrderByField>) -> Self {
        Self {
            fields: fields.into_iter().collect(),
        }
    }

    /// Parse a sequence of specifiers. Each entry may itself be comma-joined.
    pub fn from_specifiers<I, S>(specifiers: I) -> QueryResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut fields = Vec::new();
        for specifier in specifiers {
            for part in specifier.as_ref().split(',') {
                if part.trim().is_empty() {
                    continue;
                }
                fields.push(OrderByField::parse(part)?);
            }
        }
        Ok(Self { fields })
    }

    /// Append a field.
    pub fn then(mut self, field: OrderByField) -> Self {
        self.fields.push(field);
        self
    }

    /// The ordering terms.
    pub fn fields(&self) -> &[OrderByField] {
        &self.fields
    }

    /// Check if there are no terms.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl FromStr for SortSpec {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_specifiers([s])
    }
}

impl<'de> Deserialize<'de> for SortSpec {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Wire {
            Joined(String),
            Sequence(Vec<String>),
        }

        let parsed = match Wire::deserialize(deserializer)? {
            Wire::Joined(s) => Self::from_specifiers([s]),
            Wire::Sequence(items) => Self::from_specifiers(items),
        };
        parsed.map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_specifier() {
        assert_eq!(OrderByField::parse("-id").unwrap(), OrderByField::desc("id"));
        assert_eq!(OrderByField::parse(" topics.name ").unwrap(), OrderByField::asc("topics.name"));
        assert!(OrderByField::parse("-").is_err());
    }

    #[test]
    fn test_joined_string() {
        let spec: SortSpec = "a,-b,,c".parse().unwrap();
        assert_eq!(
            spec.fields(),
            &[OrderByField::asc("a"), OrderByField::desc("b"), OrderByField::asc("c")]
        );
    }

    #[test]
    fn test_sequence() {
        let spec = SortSpec::from_specifiers(vec!["-topic_id", "id,title"]).unwrap();
        assert_eq!(spec.fields().len(), 3);
        assert_eq!(spec.fields()[0], OrderByField::desc("topic_id"));
    }

    #[test]
    fn test_deserialize_wire_formats() {
        let joined: SortSpec = serde_json::from_str(r#""-id,title""#).unwrap();
        let sequence: SortSpec = serde_json::from_str(r#"["-id", "title"]"#).unwrap();
        assert_eq!(joined, sequence);
    }
}
