//! A dynamic row value, carrying enough of its own type to round-trip
//! through any of the three supported drivers without consulting the
//! schema again (§9 "Dynamic row dicts").

use std::borrow::Cow;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A single column value copied from a source row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(Cow<'static, str>),
    Timestamp(NaiveDateTime),
    Date(NaiveDate),
    Time(NaiveTime),
    Uuid(Uuid),
    Json(serde_json::Value),
    Bytes(Vec<u8>),
    /// Array of values, e.g. a PostgreSQL `text[]` or `enum[]` column.
    /// Element values never collapse to `String` for an array-of-enum
    /// column — see `SemanticCategory::ArrayOfEnumerated`.
    Array(Vec<Value>),
}

impl Value {
    /// Convert to a SQL literal string suitable for INSERT statements.
    pub fn to_sql_literal(&self, db_type: &crate::schema::types::DatabaseType) -> String {
        match self {
            Value::Null => "NULL".to_string(),
            Value::Bool(b) => match db_type {
                crate::schema::types::DatabaseType::MySQL => {
                    if *b {
                        "1".to_string()
                    } else {
                        "0".to_string()
                    }
                }
                _ => {
                    if *b {
                        "TRUE".to_string()
                    } else {
                        "FALSE".to_string()
                    }
                }
            },
            Value::Int(i) => i.to_string(),
            Value::Float(f) => {
                if f.is_nan() {
                    "'NaN'".to_string()
                } else if f.is_infinite() {
                    if f.is_sign_positive() {
                        "'Infinity'".to_string()
                    } else {
                        "'-Infinity'".to_string()
                    }
                } else {
                    format!("{}", f)
                }
            }
            Value::String(s) => format!("'{}'", s.replace('\'', "''")),
            Value::Timestamp(ts) => format!("'{}'", ts.format("%Y-%m-%d %H:%M:%S")),
            Value::Date(d) => format!("'{}'", d.format("%Y-%m-%d")),
            Value::Time(t) => format!("'{}'", t.format("%H:%M:%S")),
            Value::Uuid(u) => format!("'{}'", u),
            Value::Json(j) => format!("'{}'", j.to_string().replace('\'', "''")),
            Value::Bytes(b) => match db_type {
                crate::schema::types::DatabaseType::PostgreSQL => {
                    format!("'\\x{}'", hex_encode(b))
                }
                _ => {
                    format!("X'{}'", hex_encode(b))
                }
            },
            Value::Array(items) => {
                let inner: Vec<String> = items.iter().map(|v| v.to_sql_literal(db_type)).collect();
                match db_type {
                    crate::schema::types::DatabaseType::PostgreSQL => {
                        format!("'{{{}}}'", inner.join(","))
                    }
                    _ => format!("'[{}]'", inner.join(",")),
                }
            }
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_string(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }
}

impl Eq for Value {}

impl std::hash::Hash for Value {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        // Hash on the canonical string form; floats are rare in primary
        // keys and this avoids carrying a separate Ord/Hash implementation
        // per scalar type just for the presence index.
        match self {
            Value::Null => "__NULL__".hash(state),
            Value::Bool(b) => b.hash(state),
            Value::Int(i) => i.hash(state),
            Value::Float(f) => format!("{:.10}", f).hash(state),
            Value::String(s) => s.hash(state),
            Value::Timestamp(ts) => ts.hash(state),
            Value::Date(d) => d.hash(state),
            Value::Time(t) => t.hash(state),
            Value::Uuid(u) => u.hash(state),
            Value::Json(j) => j.to_string().hash(state),
            Value::Bytes(b) => b.hash(state),
            Value::Array(items) => {
                for item in items {
                    item.hash(state);
                }
            }
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(fl) => write!(f, "{}", fl),
            Value::String(s) => write!(f, "{}", s),
            Value::Timestamp(ts) => write!(f, "{}", ts),
            Value::Date(d) => write!(f, "{}", d),
            Value::Time(t) => write!(f, "{}", t),
            Value::Uuid(u) => write!(f, "{}", u),
            Value::Json(j) => write!(f, "{}", j),
            Value::Bytes(b) => write!(f, "{}", hex_encode(b)),
            Value::Array(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
        }
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_literal_escapes_quotes() {
        let v = Value::String(Cow::Borrowed("O'Brien"));
        assert_eq!(
            v.to_sql_literal(&crate::schema::types::DatabaseType::PostgreSQL),
            "'O''Brien'"
        );
    }

    #[test]
    fn null_is_null() {
        assert!(Value::Null.is_null());
        assert!(!Value::Int(0).is_null());
    }

    #[test]
    fn array_literal_postgres_braces() {
        let v = Value::Array(vec![Value::Int(1), Value::Int(2)]);
        assert_eq!(
            v.to_sql_literal(&crate::schema::types::DatabaseType::PostgreSQL),
            "'{1,2}'"
        );
    }
}
