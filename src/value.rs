//! Bound-parameter and row values.
//!
//! Mirrors `rusqlite::types::Value` with its own `Serialize`/`Deserialize` impls, the same
//! shape libsql-server's `crate::query::Value` uses to move values across a wire boundary.
use rusqlite::types::{ToSqlOutput, ValueRef};
use rusqlite::ToSql;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Value::Null => ToSqlOutput::Owned(rusqlite::types::Value::Null),
            Value::Integer(i) => ToSqlOutput::Owned(rusqlite::types::Value::Integer(*i)),
            Value::Real(x) => ToSqlOutput::Owned(rusqlite::types::Value::Real(*x)),
            Value::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
            Value::Blob(b) => ToSqlOutput::Borrowed(ValueRef::Blob(b.as_slice())),
        })
    }
}

impl From<ValueRef<'_>> for Value {
    fn from(value: ValueRef<'_>) -> Self {
        match value {
            ValueRef::Null => Value::Null,
            ValueRef::Integer(i) => Value::Integer(i),
            ValueRef::Real(x) => Value::Real(x),
            ValueRef::Text(s) => Value::Text(String::from_utf8_lossy(s).into_owned()),
            ValueRef::Blob(b) => Value::Blob(b.to_vec()),
        }
    }
}

/// One row's worth of column values, as written into a batch by the query-batch routine
/// (spec section 4.6).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Row {
    pub values: Vec<Value>,
}

impl Row {
    /// Approximate wire size of this row, used by the batch routine to decide whether the row
    /// still "fits" in the bounded message buffer (spec section 4.6).
    pub fn encoded_len(&self) -> usize {
        self.values
            .iter()
            .map(|v| match v {
                Value::Null => 1,
                Value::Integer(_) => 9,
                Value::Real(_) => 9,
                Value::Text(s) => 5 + s.len(),
                Value::Blob(b) => 5 + b.len(),
            })
            .sum()
    }
}

/// Decode the positional bind parameters carried in a request's trailing message bytes (spec
/// section 4.5). The wire codec itself is out of scope; this crate only needs *a* concrete
/// encoding to be runnable and testable, so it uses `bincode` over `Vec<Value>` the same way
/// `sqld`'s RPC proxy layer bincode-encodes its own query parameters.
pub fn decode_params(bytes: &[u8]) -> Result<Vec<Value>, bincode::Error> {
    if bytes.is_empty() {
        return Ok(Vec::new());
    }
    bincode::deserialize(bytes)
}

pub fn encode_params(params: &[Value]) -> Vec<u8> {
    bincode::serialize(params).expect("Value is always serializable")
}
