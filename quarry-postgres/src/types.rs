//! Value conversions for PostgreSQL.
//!
//! Parameters are bound by the type the server inferred for each
//! placeholder, so a string key can be compared against an integer column
//! and an empty list against any array column.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use postgres_types::{FromSql, Kind, ToSql, Type};
use quarry_query::encoder::format_array_literal;
use quarry_query::{Row, Value};
use serde_json::Value as JsonValue;

use crate::config::PgExtensions;
use crate::error::{PgError, PgResult};

/// A boxed parameter ready for tokio-postgres.
pub type PgParam = Box<dyn ToSql + Sync + Send>;

/// Convert values to parameters for the given placeholder types.
pub fn to_params(values: &[Value], types: &[Type]) -> PgResult<Vec<PgParam>> {
    if values.len() != types.len() {
        return Err(PgError::type_conversion(format!(
            "statement expects {} parameters, got {}",
            types.len(),
            values.len()
        )));
    }
    values.iter().zip(types).map(|(value, ty)| to_param(value, ty)).collect()
}

/// Convert one value to a parameter of type `ty`.
pub fn to_param(value: &Value, ty: &Type) -> PgResult<PgParam> {
    if value.is_null() {
        return Ok(null_of(ty));
    }
    if let Kind::Array(element) = ty.kind() {
        return match value {
            Value::Array(items) | Value::List(items) => array_param(items, element),
            other => Err(mismatch(other, ty)),
        };
    }

    let param: PgParam = match *ty {
        Type::BOOL => Box::new(match value {
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::String(s) => parse(s, ty)?,
            other => return Err(mismatch(other, ty)),
        }),
        Type::INT2 => Box::new(i16::try_from(integer(value, ty)?).map_err(|_| mismatch(value, ty))?),
        Type::INT4 => Box::new(i32::try_from(integer(value, ty)?).map_err(|_| mismatch(value, ty))?),
        Type::INT8 => Box::new(integer(value, ty)?),
        Type::FLOAT4 => Box::new(float(value, ty)? as f32),
        Type::FLOAT8 => Box::new(float(value, ty)?),
        Type::JSON | Type::JSONB => Box::new(value.to_json().map_err(|e| PgError::type_conversion(e.message))?),
        Type::BYTEA => match value {
            Value::Bytes(bytes) => Box::new(bytes.clone()),
            Value::String(s) => Box::new(s.clone().into_bytes()),
            other => return Err(mismatch(other, ty)),
        },
        Type::UUID => Box::new(uuid::Uuid::parse_str(text(value, ty)?).map_err(|_| mismatch(value, ty))?),
        Type::TIMESTAMPTZ => Box::new(
            DateTime::parse_from_rfc3339(text(value, ty)?)
                .map_err(|_| mismatch(value, ty))?
                .with_timezone(&Utc),
        ),
        Type::TIMESTAMP => Box::new(parse_naive_datetime(text(value, ty)?).ok_or_else(|| mismatch(value, ty))?),
        Type::DATE => Box::new(NaiveDate::parse_from_str(text(value, ty)?, "%Y-%m-%d").map_err(|_| mismatch(value, ty))?),
        Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME | Type::UNKNOWN => Box::new(as_text(value)?),
        _ => return Err(mismatch(value, ty)),
    };
    Ok(param)
}

fn null_of(ty: &Type) -> PgParam {
    if let Kind::Array(_) = ty.kind() {
        return match *ty {
            Type::INT2_ARRAY => Box::new(None::<Vec<i16>>),
            Type::INT4_ARRAY => Box::new(None::<Vec<i32>>),
            Type::INT8_ARRAY => Box::new(None::<Vec<i64>>),
            Type::FLOAT8_ARRAY => Box::new(None::<Vec<f64>>),
            Type::BOOL_ARRAY => Box::new(None::<Vec<bool>>),
            Type::JSON_ARRAY | Type::JSONB_ARRAY => Box::new(None::<Vec<JsonValue>>),
            _ => Box::new(None::<Vec<String>>),
        };
    }
    match *ty {
        Type::BOOL => Box::new(None::<bool>),
        Type::INT2 => Box::new(None::<i16>),
        Type::INT4 => Box::new(None::<i32>),
        Type::INT8 => Box::new(None::<i64>),
        Type::FLOAT4 => Box::new(None::<f32>),
        Type::FLOAT8 => Box::new(None::<f64>),
        Type::JSON | Type::JSONB => Box::new(None::<JsonValue>),
        Type::BYTEA => Box::new(None::<Vec<u8>>),
        Type::UUID => Box::new(None::<uuid::Uuid>),
        Type::TIMESTAMPTZ => Box::new(None::<DateTime<Utc>>),
        Type::TIMESTAMP => Box::new(None::<NaiveDateTime>),
        Type::DATE => Box::new(None::<NaiveDate>),
        _ => Box::new(None::<String>),
    }
}

fn array_param(items: &[Value], element: &Type) -> PgResult<PgParam> {
    fn each<T>(items: &[Value], element: &Type, f: impl Fn(&Value, &Type) -> PgResult<T>) -> PgResult<Vec<Option<T>>> {
        items
            .iter()
            .map(|item| if item.is_null() { Ok(None) } else { f(item, element).map(Some) })
            .collect()
    }

    let param: PgParam = match *element {
        Type::INT2 => Box::new(each(items, element, |v, t| {
            i16::try_from(integer(v, t)?).map_err(|_| mismatch(v, t))
        })?),
        Type::INT4 => Box::new(each(items, element, |v, t| {
            i32::try_from(integer(v, t)?).map_err(|_| mismatch(v, t))
        })?),
        Type::INT8 => Box::new(each(items, element, integer)?),
        Type::FLOAT8 => Box::new(each(items, element, float)?),
        Type::BOOL => Box::new(each(items, element, |v, t| match v {
            Value::Bool(b) => Ok(*b),
            other => Err(mismatch(other, t)),
        })?),
        Type::JSON | Type::JSONB => Box::new(each(items, element, |v, _| {
            v.to_json().map_err(|e| PgError::type_conversion(e.message))
        })?),
        Type::UUID => Box::new(each(items, element, |v, t| {
            uuid::Uuid::parse_str(text(v, t)?).map_err(|_| mismatch(v, t))
        })?),
        _ => Box::new(each(items, element, |v, _| as_text(v))?),
    };
    Ok(param)
}

fn mismatch(value: &Value, ty: &Type) -> PgError {
    PgError::type_conversion(format!("cannot bind {} value {} as {}", value.kind(), value, ty))
}

fn parse<T: std::str::FromStr>(s: &str, ty: &Type) -> PgResult<T> {
    s.trim()
        .parse()
        .map_err(|_| PgError::type_conversion(format!("cannot parse {:?} as {}", s, ty)))
}

fn integer(value: &Value, ty: &Type) -> PgResult<i64> {
    match value {
        Value::Int(i) => Ok(*i),
        Value::Bool(b) => Ok(i64::from(*b)),
        Value::String(s) => parse(s, ty),
        Value::Json(JsonValue::Number(n)) => n.as_i64().ok_or_else(|| mismatch(value, ty)),
        other => Err(mismatch(other, ty)),
    }
}

fn float(value: &Value, ty: &Type) -> PgResult<f64> {
    match value {
        Value::Float(f) => Ok(*f),
        Value::Int(i) => Ok(*i as f64),
        Value::String(s) => parse(s, ty),
        Value::Json(JsonValue::Number(n)) => n.as_f64().ok_or_else(|| mismatch(value, ty)),
        other => Err(mismatch(other, ty)),
    }
}

fn text<'a>(value: &'a Value, ty: &Type) -> PgResult<&'a str> {
    value.as_str().ok_or_else(|| mismatch(value, ty))
}

/// Strings bind as-is; every other value binds as its JSON encoding.
fn as_text(value: &Value) -> PgResult<String> {
    match value {
        Value::String(s) => Ok(s.clone()),
        other => other
            .to_json()
            .map(|json| json.to_string())
            .map_err(|e| PgError::type_conversion(e.message)),
    }
}

fn parse_naive_datetime(s: &str) -> Option<NaiveDateTime> {
    ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(s, format).ok())
}

/// Decode a server row into a [`Row`].
pub fn from_row(row: &tokio_postgres::Row, extensions: PgExtensions) -> PgResult<Row> {
    let mut out = Row::with_capacity(row.len());
    for (idx, column) in row.columns().iter().enumerate() {
        let value = column_value(row, idx, column.type_(), extensions)
            .map_err(|e| PgError::deserialization(format!("column '{}': {}", column.name(), e)))?;
        out.insert(column.name().to_string(), value);
    }
    Ok(out)
}

fn get<'a, T: FromSql<'a>>(row: &'a tokio_postgres::Row, idx: usize) -> PgResult<Option<T>> {
    row.try_get::<_, Option<T>>(idx).map_err(PgError::from)
}

fn or_null<T>(value: Option<T>, f: impl FnOnce(T) -> Value) -> Value {
    value.map(f).unwrap_or(Value::Null)
}

fn column_value(row: &tokio_postgres::Row, idx: usize, ty: &Type, extensions: PgExtensions) -> PgResult<Value> {
    if let Kind::Array(element) = ty.kind() {
        let Some(items) = array_elements(row, idx, element)? else {
            return Ok(Value::Null);
        };
        return if extensions.arrays {
            Ok(Value::Array(items))
        } else {
            format_array_literal(&items)
                .map(Value::String)
                .map_err(|e| PgError::deserialization(e.message))
        };
    }

    Ok(match *ty {
        Type::BOOL => or_null(get::<bool>(row, idx)?, Value::Bool),
        Type::INT2 => or_null(get::<i16>(row, idx)?, |v| Value::Int(v.into())),
        Type::INT4 => or_null(get::<i32>(row, idx)?, |v| Value::Int(v.into())),
        Type::INT8 => or_null(get::<i64>(row, idx)?, Value::Int),
        Type::OID => or_null(get::<u32>(row, idx)?, |v| Value::Int(v.into())),
        Type::FLOAT4 => or_null(get::<f32>(row, idx)?, |v| Value::Float(v.into())),
        Type::FLOAT8 => or_null(get::<f64>(row, idx)?, Value::Float),
        Type::JSON | Type::JSONB => or_null(get::<JsonValue>(row, idx)?, |json| {
            if extensions.json {
                Value::Json(json)
            } else {
                Value::String(json.to_string())
            }
        }),
        Type::BYTEA => or_null(get::<Vec<u8>>(row, idx)?, Value::Bytes),
        Type::UUID => or_null(get::<uuid::Uuid>(row, idx)?, |v| Value::String(v.to_string())),
        Type::TIMESTAMPTZ => or_null(get::<DateTime<Utc>>(row, idx)?, |v| Value::String(v.to_rfc3339())),
        Type::TIMESTAMP => or_null(get::<NaiveDateTime>(row, idx)?, |v| Value::String(v.to_string())),
        Type::DATE => or_null(get::<NaiveDate>(row, idx)?, |v| Value::String(v.to_string())),
        _ => or_null(get::<String>(row, idx)?, Value::String),
    })
}

fn array_elements(row: &tokio_postgres::Row, idx: usize, element: &Type) -> PgResult<Option<Vec<Value>>> {
    fn collect<T>(items: Option<Vec<Option<T>>>, f: impl Fn(T) -> Value) -> Option<Vec<Value>> {
        items.map(|items| items.into_iter().map(|item| or_null(item, &f)).collect())
    }

    Ok(match *element {
        Type::BOOL => collect(get::<Vec<Option<bool>>>(row, idx)?, Value::Bool),
        Type::INT2 => collect(get::<Vec<Option<i16>>>(row, idx)?, |v| Value::Int(v.into())),
        Type::INT4 => collect(get::<Vec<Option<i32>>>(row, idx)?, |v| Value::Int(v.into())),
        Type::INT8 => collect(get::<Vec<Option<i64>>>(row, idx)?, Value::Int),
        Type::FLOAT4 => collect(get::<Vec<Option<f32>>>(row, idx)?, |v| Value::Float(v.into())),
        Type::FLOAT8 => collect(get::<Vec<Option<f64>>>(row, idx)?, Value::Float),
        Type::JSON | Type::JSONB => collect(get::<Vec<Option<JsonValue>>>(row, idx)?, Value::Json),
        Type::UUID => collect(get::<Vec<Option<uuid::Uuid>>>(row, idx)?, |v| Value::String(v.to_string())),
        _ => collect(get::<Vec<Option<String>>>(row, idx)?, Value::String),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_to_param_coerces_by_type() {
        assert!(to_param(&Value::from("42"), &Type::INT8).is_ok());
        assert!(to_param(&Value::Int(42), &Type::INT4).is_ok());
        assert!(to_param(&Value::Int(1 << 40), &Type::INT4).is_err());
        assert!(to_param(&Value::Int(7), &Type::TEXT).is_ok());
        assert!(to_param(&Value::from("nope"), &Type::INT8).is_err());
        assert!(to_param(&Value::from("2024-03-01T10:00:00Z"), &Type::TIMESTAMPTZ).is_ok());
        assert!(to_param(&Value::from("2024-03-01 10:00:00"), &Type::TIMESTAMP).is_ok());
        assert!(to_param(&Value::from("not-a-uuid"), &Type::UUID).is_err());
    }

    #[test]
    fn test_to_param_arrays() {
        let items = vec![Value::from("a"), Value::Null, Value::Int(3)];
        assert!(to_param(&Value::Array(items), &Type::TEXT_ARRAY).is_ok());
        assert!(to_param(&Value::Array(vec![]), &Type::INT4_ARRAY).is_ok());
        assert!(to_param(&Value::Array(vec![Value::from("x")]), &Type::INT4_ARRAY).is_err());
        assert!(to_param(&Value::from("a"), &Type::TEXT_ARRAY).is_err());
    }

    #[test]
    fn test_to_param_json_and_nulls() {
        let doc = Value::Json(serde_json::json!({"a": [1, 2]}));
        assert!(to_param(&doc, &Type::JSONB).is_ok());
        assert!(to_param(&Value::Null, &Type::INT4).is_ok());
        assert!(to_param(&Value::Null, &Type::JSONB_ARRAY).is_ok());
    }

    #[test]
    fn test_to_params_arity() {
        let err = to_params(&[Value::Int(1)], &[]).unwrap_err();
        assert!(matches!(err, PgError::TypeConversion(_)));
    }

    #[test]
    fn test_as_text() {
        assert_eq!(as_text(&Value::from("plain")).unwrap(), "plain");
        assert_eq!(as_text(&Value::Int(5)).unwrap(), "5");
        assert_eq!(as_text(&Value::from(vec!["a"])).unwrap(), r#"["a"]"#);
    }
}
