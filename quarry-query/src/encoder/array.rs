use crate::error::{QueryError, QueryResult};
use crate::value::Value;

use super::Encoder;

/// Stores lists in native array columns.
///
/// A list (empty included) encodes to [`Value::Array`]; rendering an empty
/// array is the dialect's concern. Decoding accepts a native array or, when the
/// driver surfaces arrays as text, a PostgreSQL array literal.
#[derive(Debug, Clone, Copy, Default)]
pub struct PgArrayEncoder;

impl Encoder for PgArrayEncoder {
    fn encode(&self, value: Value) -> QueryResult<Value> {
        match value {
            Value::List(items) => Ok(Value::Array(items)),
            other => Ok(other),
        }
    }

    fn decode(&self, value: Value) -> QueryResult<Value> {
        match value {
            Value::Null => Ok(Value::Null),
            Value::Array(items) | Value::List(items) => Ok(Value::List(items)),
            Value::String(literal) => parse_array_literal(&literal).map(Value::List),
            other => Err(QueryError::unsupported_storage_shape("PgArrayEncoder", other.kind())),
        }
    }
}

fn needs_quotes(element: &str) -> bool {
    element.is_empty()
        || element.eq_ignore_ascii_case("NULL")
        || element
            .chars()
            .any(|c| matches!(c, '{' | '}' | ',' | '"' | '\\') || c.is_whitespace())
}

fn push_element(out: &mut String, element: &str) {
    if needs_quotes(element) {
        out.push('"');
        for c in element.chars() {
            if matches!(c, '"' | '\\') {
                out.push('\\');
            }
            out.push(c);
        }
        out.push('"');
    } else {
        out.push_str(element);
    }
}

/// Render a one-dimensional PostgreSQL array literal.
///
/// Strings are written as-is; every other element is written as its JSON
/// encoding.
///
/// ```rust
/// use quarry_query::Value;
/// use quarry_query::encoder::format_array_literal;
///
/// let literal = format_array_literal(&[Value::from("a b"), Value::Int(2), Value::Null]).unwrap();
/// assert_eq!(literal, r#"{"a b",2,NULL}"#);
/// ```
pub fn format_array_literal(items: &[Value]) -> QueryResult<String> {
    let mut out = String::from("{");
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        match item {
            Value::Null => out.push_str("NULL"),
            Value::String(s) => push_element(&mut out, s),
            other => push_element(&mut out, &other.to_json()?.to_string()),
        }
    }
    out.push('}');
    Ok(out)
}

/// Parse a one-dimensional PostgreSQL array literal into strings and nulls.
pub fn parse_array_literal(literal: &str) -> QueryResult<Vec<Value>> {
    let malformed = || QueryError::deserialization(format!("malformed array literal `{}`", literal));
    let inner = literal
        .trim()
        .strip_prefix('{')
        .and_then(|rest| rest.strip_suffix('}'))
        .ok_or_else(malformed)?;

    let mut items = Vec::new();
    if inner.is_empty() {
        return Ok(items);
    }

    let mut chars = inner.chars().peekable();
    loop {
        let mut element = String::new();
        let quoted = chars.peek() == Some(&'"');
        if quoted {
            chars.next();
            loop {
                match chars.next() {
                    Some('\\') => element.push(chars.next().ok_or_else(malformed)?),
                    Some('"') => break,
                    Some(c) => element.push(c),
                    None => return Err(malformed()),
                }
            }
        } else {
            while let Some(&c) = chars.peek() {
                if c == ',' {
                    break;
                }
                if matches!(c, '{' | '}' | '"') {
                    return Err(malformed());
                }
                element.push(c);
                chars.next();
            }
        }

        if !quoted && element.eq_ignore_ascii_case("NULL") {
            items.push(Value::Null);
        } else {
            items.push(Value::String(element));
        }

        match chars.next() {
            Some(',') => continue,
            None => break,
            Some(_) => return Err(malformed()),
        }
    }
    Ok(items)
}
