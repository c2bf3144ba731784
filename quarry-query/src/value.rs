//! Dynamic values flowing through filters, encoders and rows.
//!
//! A [`Value`] is either an *application* value (what callers put in filter
//! expressions and records) or a *storage* value (what an encoder hands to the
//! driver). The two storage-only variants are [`Value::Json`] for JSON documents
//! and [`Value::Array`] for native array columns; everything else can appear on
//! both sides.

use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::{QueryError, QueryResult};
use crate::query::Query;

/// An ordered structured record (field name to value).
pub type Record = IndexMap<String, Value>;

/// A row as returned by a driver: column name to value, in select order.
pub type Row = IndexMap<String, Value>;

/// A dynamically typed value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// SQL `NULL` / absent value.
    Null,
    /// Boolean value.
    Bool(bool),
    /// Integer value.
    Int(i64),
    /// Float value.
    Float(f64),
    /// String value.
    String(String),
    /// Application sequence of values.
    List(Vec<Value>),
    /// Structured record.
    Record(Record),
    /// Raw bytes.
    #[serde(skip_deserializing)]
    Bytes(Vec<u8>),
    /// JSON document in storage form.
    #[serde(skip_deserializing)]
    Json(JsonValue),
    /// Native array in storage form, bound as a single parameter.
    #[serde(skip_deserializing)]
    Array(Vec<Value>),
    /// Sub-query handle.
    #[serde(skip)]
    Query(Box<Query>),
}

/// Runtime shape of a value, used by operators to pick a predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    /// `NULL`.
    Null,
    /// A single bindable value.
    Scalar,
    /// An application sequence.
    Sequence,
    /// A sub-query handle.
    SubQuery,
    /// A structured record or JSON document.
    Record,
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Null => "null",
            Self::Scalar => "scalar",
            Self::Sequence => "sequence",
            Self::SubQuery => "sub-query",
            Self::Record => "record",
        };
        f.write_str(name)
    }
}

impl Value {
    /// Classify the value for operator dispatch.
    pub fn shape(&self) -> Shape {
        match self {
            Self::Null => Shape::Null,
            Self::List(_) => Shape::Sequence,
            Self::Query(_) => Shape::SubQuery,
            Self::Record(_) | Self::Json(_) => Shape::Record,
            Self::Bool(_)
            | Self::Int(_)
            | Self::Float(_)
            | Self::String(_)
            | Self::Bytes(_)
            | Self::Array(_) => Shape::Scalar,
        }
    }

    /// Name of the variant, for diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::String(_) => "string",
            Self::List(_) => "list",
            Self::Record(_) => "record",
            Self::Bytes(_) => "bytes",
            Self::Json(_) => "json",
            Self::Array(_) => "array",
            Self::Query(_) => "query",
        }
    }

    /// Check if this is `NULL`.
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Borrow the string content, if this is a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            Self::Json(JsonValue::String(s)) => Some(s),
            _ => None,
        }
    }

    /// Read an integer, if this is one.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            Self::Json(json) => json.as_i64(),
            _ => None,
        }
    }

    /// The tokens `exists` treats as "absent": `""`, `"0"` and `false`.
    pub fn is_falsy_token(&self) -> bool {
        matches!(self, Self::Bool(false))
            || matches!(self.as_str(), Some("") | Some("0"))
    }

    /// Text used for pattern operators, when the value is a plain scalar.
    pub fn pattern_text(&self) -> Option<String> {
        match self {
            Self::String(s) | Self::Json(JsonValue::String(s)) => Some(s.clone()),
            Self::Int(i) => Some(i.to_string()),
            Self::Float(f) => Some(f.to_string()),
            Self::Bool(b) => Some(b.to_string()),
            Self::Json(JsonValue::Number(n)) => Some(n.to_string()),
            _ => None,
        }
    }

    /// Render a generated key the way callers receive it from `create`.
    pub fn to_key_string(&self) -> String {
        match self {
            Self::Null => String::new(),
            Self::String(s) => s.clone(),
            Self::Int(i) => i.to_string(),
            Self::Float(f) => f.to_string(),
            Self::Bool(b) => b.to_string(),
            Self::Json(JsonValue::String(s)) => s.clone(),
            Self::Json(json) => json.to_string(),
            other => format!("{:?}", other),
        }
    }

    /// Build an application value from a JSON document.
    ///
    /// Objects become records and arrays become lists, at every depth.
    pub fn from_json(json: JsonValue) -> Self {
        match json {
            JsonValue::Null => Self::Null,
            JsonValue::Bool(b) => Self::Bool(b),
            JsonValue::Number(n) => match n.as_i64() {
                Some(i) => Self::Int(i),
                None => Self::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            JsonValue::String(s) => Self::String(s),
            JsonValue::Array(items) => Self::List(items.into_iter().map(Self::from_json).collect()),
            JsonValue::Object(map) => Self::Record(
                map.into_iter()
                    .map(|(k, v)| (k, Self::from_json(v)))
                    .collect(),
            ),
        }
    }

    /// Convert to a JSON document.
    ///
    /// Sub-query handles have no JSON form.
    pub fn to_json(&self) -> QueryResult<JsonValue> {
        Ok(match self {
            Self::Null => JsonValue::Null,
            Self::Bool(b) => JsonValue::Bool(*b),
            Self::Int(i) => JsonValue::from(*i),
            Self::Float(f) => serde_json::Number::from_f64(*f)
                .map(JsonValue::Number)
                .unwrap_or(JsonValue::Null),
            Self::String(s) => JsonValue::String(s.clone()),
            Self::Bytes(bytes) => JsonValue::Array(bytes.iter().map(|b| JsonValue::from(*b)).collect()),
            Self::List(items) | Self::Array(items) => {
                JsonValue::Array(items.iter().map(Value::to_json).collect::<QueryResult<_>>()?)
            }
            Self::Record(record) => {
                let mut map = serde_json::Map::with_capacity(record.len());
                for (key, value) in record {
                    map.insert(key.clone(), value.to_json()?);
                }
                JsonValue::Object(map)
            }
            Self::Json(json) => json.clone(),
            Self::Query(_) => {
                return Err(QueryError::invalid_parameter(
                    "a sub-query cannot be converted to JSON",
                ));
            }
        })
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("NULL"),
            Self::Query(_) => f.write_str("<sub-query>"),
            other => match other.to_json() {
                Ok(json) => write!(f, "{}", json),
                Err(_) => f.write_str(other.kind()),
            },
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Int(v as i64)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Self::Int(v as i64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<JsonValue> for Value {
    fn from(v: JsonValue) -> Self {
        Self::from_json(v)
    }
}

impl From<Record> for Value {
    fn from(v: Record) -> Self {
        Self::Record(v)
    }
}

impl From<Query> for Value {
    fn from(v: Query) -> Self {
        Self::Query(Box::new(v))
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Self::List(v.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Self::Null)
    }
}
