use crate::error::{QueryError, QueryResult};
use crate::value::Value;

use super::Encoder;

/// Stores structured values as JSON documents.
///
/// Records, lists and scalars encode to [`Value::Json`]; `NULL` stays `NULL`.
/// Decoding accepts a JSON document, JSON text (for engines that return
/// documents as strings) or an already decoded record, and rebuilds nested
/// objects as records at every depth. Integers, floats and booleans pass
/// through: a column with numeric affinity hands a stored JSON scalar back
/// as a native number.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonEncoder;

impl Encoder for JsonEncoder {
    fn encode(&self, value: Value) -> QueryResult<Value> {
        match value {
            Value::Null => Ok(Value::Null),
            Value::Json(json) => Ok(Value::Json(json)),
            other => Ok(Value::Json(other.to_json()?)),
        }
    }

    fn decode(&self, value: Value) -> QueryResult<Value> {
        match value {
            Value::Null => Ok(Value::Null),
            Value::Json(json) => Ok(Value::from_json(json)),
            Value::Record(record) => Ok(Value::Record(record)),
            scalar @ (Value::Int(_) | Value::Float(_) | Value::Bool(_)) => Ok(scalar),
            Value::String(text) => {
                let json: serde_json::Value = serde_json::from_str(&text)
                    .map_err(|err| QueryError::deserialization(format!("invalid JSON text: {}", err)))?;
                Ok(Value::from_json(json))
            }
            other => Err(QueryError::unsupported_storage_shape("JsonEncoder", other.kind())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn round_trip(value: Value) -> Value {
        JsonEncoder.decode(JsonEncoder.encode(value).unwrap()).unwrap()
    }

    #[test]
    fn test_round_trips() {
        let record = Value::from_json(json!({"a": 1, "b": {"c": [true, null, 2.5]}}));
        assert_eq!(round_trip(record.clone()), record);
        assert_eq!(round_trip(Value::List(vec![])), Value::List(vec![]));
        assert_eq!(round_trip(Value::from(vec!["x", "y"])), Value::from(vec!["x", "y"]));
        assert_eq!(round_trip(Value::from("text")), Value::from("text"));
        assert_eq!(round_trip(Value::Int(4)), Value::Int(4));
        assert_eq!(round_trip(Value::Bool(false)), Value::Bool(false));
        assert_eq!(round_trip(Value::Null), Value::Null);
    }

    #[test]
    fn test_decode_json_text() {
        let decoded = JsonEncoder.decode(Value::from(r#"{"a": {"b": 1}}"#)).unwrap();
        assert_eq!(decoded, Value::from_json(json!({"a": {"b": 1}})));

        let err = JsonEncoder.decode(Value::from("{not json")).unwrap_err();
        assert_eq!(err.code, ErrorCode::DeserializationError);
    }

    #[test]
    fn test_decode_native_scalars() {
        assert_eq!(JsonEncoder.decode(Value::Int(4)).unwrap(), Value::Int(4));
        assert_eq!(JsonEncoder.decode(Value::Float(2.5)).unwrap(), Value::Float(2.5));
        assert_eq!(JsonEncoder.decode(Value::Bool(true)).unwrap(), Value::Bool(true));
    }

    #[test]
    fn test_unsupported_shapes() {
        for value in [Value::Bytes(vec![1]), Value::Array(vec![])] {
            let err = JsonEncoder.decode(value).unwrap_err();
            assert_eq!(err.code, ErrorCode::UnsupportedStorageShape);
        }
    }
}
