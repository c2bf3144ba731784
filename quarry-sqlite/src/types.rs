//! Value conversions for SQLite.

use quarry_query::{Row, Value};
use rusqlite::types::{Value as SqlValue, ValueRef};

use crate::config::SqliteExtensions;
use crate::error::{SqliteError, SqliteResult};

/// Convert a value to a SQLite parameter.
///
/// Booleans bind as integers. Lists, records, arrays and JSON documents
/// have no native column type and bind as their JSON text.
pub fn to_sqlite(value: &Value) -> SqliteResult<SqlValue> {
    Ok(match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Int(i) => SqlValue::Integer(*i),
        Value::Float(f) => SqlValue::Real(*f),
        Value::String(s) => SqlValue::Text(s.clone()),
        Value::Bytes(bytes) => SqlValue::Blob(bytes.clone()),
        Value::Json(json) => SqlValue::Text(json.to_string()),
        Value::List(_) | Value::Record(_) | Value::Array(_) => {
            let json = value
                .to_json()
                .map_err(|e| SqliteError::type_conversion(e.message))?;
            SqlValue::Text(json.to_string())
        }
        Value::Query(_) => {
            return Err(SqliteError::type_conversion(
                "a sub-query cannot be bound as a parameter",
            ));
        }
    })
}

/// Convert values to SQLite parameters.
pub fn to_params(values: &[Value]) -> SqliteResult<Vec<SqlValue>> {
    values.iter().map(to_sqlite).collect()
}

/// Convert a SQLite cell to a value.
pub fn from_sqlite(value: ValueRef<'_>, extensions: SqliteExtensions) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::Int(i),
        ValueRef::Real(f) => Value::Float(f),
        ValueRef::Text(bytes) => {
            let text = String::from_utf8_lossy(bytes).into_owned();
            if extensions.json && (text.starts_with('{') || text.starts_with('[')) {
                match serde_json::from_str(&text) {
                    Ok(json) => Value::Json(json),
                    Err(_) => Value::String(text),
                }
            } else {
                Value::String(text)
            }
        }
        ValueRef::Blob(bytes) => Value::Bytes(bytes.to_vec()),
    }
}

/// Decode a result row.
pub fn from_row(row: &rusqlite::Row<'_>, columns: &[String], extensions: SqliteExtensions) -> rusqlite::Result<Row> {
    let mut out = Row::with_capacity(columns.len());
    for (idx, name) in columns.iter().enumerate() {
        out.insert(name.clone(), from_sqlite(row.get_ref(idx)?, extensions));
    }
    Ok(out)
}
