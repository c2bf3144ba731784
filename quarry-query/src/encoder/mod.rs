//! Per-field value encoders.
//!
//! An [`Encoder`] converts an application value to the representation a column
//! stores and back. Encoders are registered per field name in an
//! [`EncoderRegistry`]; fields without an encoder pass through unchanged.
//!
//! ```rust
//! use quarry_query::encoder::{EncoderRegistry, JsonEncoder};
//! use quarry_query::Value;
//! use serde_json::json;
//!
//! let mut registry = EncoderRegistry::new();
//! registry.register("custom", JsonEncoder);
//!
//! let stored = registry.encode("custom", Value::from_json(json!({"a": 1}))).unwrap();
//! assert_eq!(stored, Value::Json(json!({"a": 1})));
//! assert_eq!(registry.encode("content", Value::from("x")).unwrap(), Value::from("x"));
//! ```

mod array;
mod json;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::error::QueryResult;
use crate::filter::{CustomFilters, FilterExpression, FilterKey, Operator};
use crate::value::{Record, Row, Value};

pub use array::{PgArrayEncoder, format_array_literal, parse_array_literal};
pub use json::JsonEncoder;

/// A bidirectional transform between application and storage values.
pub trait Encoder: Send + Sync {
    /// Convert an application value to its storage form.
    fn encode(&self, value: Value) -> QueryResult<Value>;

    /// Convert a storage value back to its application form.
    fn decode(&self, value: Value) -> QueryResult<Value>;
}

/// Encoders keyed by field name.
#[derive(Clone, Default)]
pub struct EncoderRegistry {
    encoders: HashMap<String, Arc<dyn Encoder>>,
}

impl fmt::Debug for EncoderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut fields: Vec<&String> = self.encoders.keys().collect();
        fields.sort();
        f.debug_struct("EncoderRegistry").field("fields", &fields).finish()
    }
}

impl EncoderRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `encoder` for `field`, replacing any previous one.
    pub fn register(&mut self, field: impl Into<String>, encoder: impl Encoder + 'static) -> &mut Self {
        self.encoders.insert(field.into(), Arc::new(encoder));
        self
    }

    /// The encoder for `field`, if any.
    pub fn get(&self, field: &str) -> Option<&Arc<dyn Encoder>> {
        self.encoders.get(field)
    }

    /// Check if no encoders are registered.
    pub fn is_empty(&self) -> bool {
        self.encoders.is_empty()
    }

    /// Encode one field value.
    pub fn encode(&self, field: &str, value: Value) -> QueryResult<Value> {
        match self.encoders.get(field) {
            Some(encoder) => encoder.encode(value),
            None => Ok(value),
        }
    }

    /// Decode one field value.
    pub fn decode(&self, field: &str, value: Value) -> QueryResult<Value> {
        match self.encoders.get(field) {
            Some(encoder) => encoder.decode(value),
            None => Ok(value),
        }
    }

    /// Encode every field of a record about to be written.
    pub fn encode_record(&self, record: Record) -> QueryResult<Record> {
        if self.is_empty() {
            return Ok(record);
        }
        record
            .into_iter()
            .map(|(field, value)| {
                let encoded = self.encode(&field, value)?;
                Ok((field, encoded))
            })
            .collect()
    }

    /// Decode every column of a row read from storage.
    pub fn decode_row(&self, row: Row) -> QueryResult<Row> {
        if self.is_empty() {
            return Ok(row);
        }
        row.into_iter()
            .map(|(column, value)| {
                let decoded = self.decode(&column, value)?;
                Ok((column, decoded))
            })
            .collect()
    }

    /// Encode filter values for fields with an encoder.
    ///
    /// Keys handled by a custom filter receive their raw value. For operators
    /// that read a sequence as a set of candidates, each element is encoded
    /// on its own.
    pub fn encode_filters(&self, filters: FilterExpression, custom: &CustomFilters) -> QueryResult<FilterExpression> {
        if self.is_empty() {
            return Ok(filters);
        }
        let mut encoded = FilterExpression::new();
        for (key, value) in filters {
            if custom.contains(&key) {
                encoded.insert(key, value);
                continue;
            }
            let parsed = FilterKey::parse(&key);
            let Some(encoder) = self.encoders.get(parsed.field()) else {
                encoded.insert(key, value);
                continue;
            };
            let operator = Operator::all().find(|op| op.name() == parsed.operator);
            // `exists` takes a presence flag, not a field value.
            if operator == Some(Operator::Exists) {
                encoded.insert(key, value);
                continue;
            }
            let per_element = operator.is_some_and(Operator::expects_sequence);
            let value = match value {
                Value::List(items) if per_element => Value::List(
                    items
                        .into_iter()
                        .map(|item| encoder.encode(item))
                        .collect::<QueryResult<_>>()?,
                ),
                other => encoder.encode(other)?,
            };
            encoded.insert(key, value);
        }
        Ok(encoded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ErrorCode, QueryError};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    /// Stores dotted quads as digit strings: "1.2.3.4" <-> "1234".
    struct PointEncoder;

    impl Encoder for PointEncoder {
        fn encode(&self, value: Value) -> QueryResult<Value> {
            match value {
                Value::String(s) => Ok(Value::String(s.replace('.', ""))),
                other => Ok(other),
            }
        }

        fn decode(&self, value: Value) -> QueryResult<Value> {
            match value {
                Value::String(s) => {
                    let dotted: Vec<String> = s.chars().map(String::from).collect();
                    Ok(Value::String(dotted.join(".")))
                }
                Value::Null => Ok(Value::Null),
                other => Err(QueryError::unsupported_storage_shape("PointEncoder", other.kind())),
            }
        }
    }

    fn registry() -> EncoderRegistry {
        let mut registry = EncoderRegistry::new();
        registry
            .register("custom", JsonEncoder)
            .register("labels", PgArrayEncoder)
            .register("point", PointEncoder);
        registry
    }

    #[test]
    fn test_record_encoding() {
        let mut record = Record::new();
        record.insert("point".into(), Value::from("1.2.3.4"));
        record.insert("labels".into(), Value::List(vec![]));
        record.insert("content".into(), Value::from("plain"));

        let encoded = registry().encode_record(record).unwrap();
        assert_eq!(encoded["point"], Value::from("1234"));
        assert_eq!(encoded["labels"], Value::Array(vec![]));
        assert_eq!(encoded["content"], Value::from("plain"));
    }

    #[test]
    fn test_row_decoding() {
        let mut row = Row::new();
        row.insert("point".into(), Value::from("1234"));
        row.insert("custom".into(), Value::Json(json!({"a": 1})));
        row.insert("labels".into(), Value::Array(vec![Value::from("x")]));

        let decoded = registry().decode_row(row).unwrap();
        assert_eq!(decoded["point"], Value::from("1.2.3.4"));
        assert_eq!(decoded["custom"], Value::from_json(json!({"a": 1})));
        assert_eq!(decoded["labels"], Value::List(vec![Value::from("x")]));
    }

    #[test]
    fn test_decode_failure_surfaces() {
        let mut row = Row::new();
        row.insert("point".into(), Value::Int(1));
        let err = registry().decode_row(row).unwrap_err();
        assert_eq!(err.code, ErrorCode::UnsupportedStorageShape);
    }

    #[test]
    fn test_filter_encoding() {
        let mut custom = CustomFilters::new();
        custom.register("point", |_, query, _| Ok(query));

        let filters = FilterExpression::new()
            .with("point", "1.2.3.4")
            .with("custom__contains", Value::from_json(json!({"a": 1})))
            .with("labels__contains", Value::List(vec![]))
            .with("custom", Value::Null);

        let encoded = registry().encode_filters(filters.clone(), &CustomFilters::new()).unwrap();
        assert_eq!(encoded.get("point"), Some(&Value::from("1234")));
        assert_eq!(encoded.get("custom__contains"), Some(&Value::Json(json!({"a": 1}))));
        assert_eq!(encoded.get("labels__contains"), Some(&Value::List(vec![])));
        assert_eq!(encoded.get("custom"), Some(&Value::Null));

        let untouched = registry().encode_filters(filters, &custom).unwrap();
        assert_eq!(untouched.get("point"), Some(&Value::from("1.2.3.4")));
    }

    #[test]
    fn test_sequence_elements_are_encoded_individually() {
        let filters = FilterExpression::new().with("point__in", vec!["1.2", "3.4"]);
        let encoded = registry().encode_filters(filters, &CustomFilters::new()).unwrap();
        assert_eq!(encoded.get("point__in"), Some(&Value::from(vec!["12", "34"])));
    }

    #[test]
    fn test_exists_flag_is_not_encoded() {
        let filters = FilterExpression::new().with("custom__exists", false);
        let encoded = registry().encode_filters(filters, &CustomFilters::new()).unwrap();
        assert_eq!(encoded.get("custom__exists"), Some(&Value::Bool(false)));
    }
}
