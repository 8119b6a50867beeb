use std::cmp::Ordering;
use std::fmt;

use bytes::{Buf, BufMut};

use super::DataType;

/// A typed field value stored in a tuple.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Value {
    /// 32-bit signed integer
    Integer(i32),

    /// String value
    String(String),
}

impl Value {
    /// Returns true if the value can be stored in a column of the given type.
    pub fn fits(&self, data_type: &DataType) -> bool {
        match (self, data_type) {
            (Value::Integer(_), DataType::Integer) => true,
            (Value::String(s), DataType::String(n)) => s.len() <= *n as usize,
            _ => false,
        }
    }

    /// Appends exactly `data_type.size()` bytes to `buf`.
    /// Returns None if the value is incompatible with the type.
    pub fn serialize_into(&self, data_type: &DataType, buf: &mut impl BufMut) -> Option<()> {
        match (self, data_type) {
            (Value::Integer(v), DataType::Integer) => {
                buf.put_i32(*v);
                Some(())
            }
            (Value::String(s), DataType::String(n)) => {
                let bytes = s.as_bytes();
                let n = *n as usize;
                if bytes.len() > n {
                    return None;
                }
                buf.put_u32(bytes.len() as u32);
                buf.put_slice(bytes);
                buf.put_bytes(0, n - bytes.len());
                Some(())
            }
            _ => None,
        }
    }

    /// Serializes a value to bytes according to the given DataType.
    pub fn serialize(&self, data_type: &DataType) -> Option<Vec<u8>> {
        let mut bytes = Vec::with_capacity(data_type.size());
        self.serialize_into(data_type, &mut bytes)?;
        Some(bytes)
    }

    /// Deserializes a value from the front of `data`.
    /// Consumes exactly `data_type.size()` bytes.
    pub fn deserialize(data: &mut impl Buf, data_type: &DataType) -> Option<Self> {
        if data.remaining() < data_type.size() {
            return None;
        }
        match data_type {
            DataType::Integer => Some(Value::Integer(data.get_i32())),
            DataType::String(n) => {
                let n = *n as usize;
                let len = data.get_u32() as usize;
                if len > n {
                    return None;
                }
                let mut payload = vec![0u8; n];
                data.copy_to_slice(&mut payload);
                payload.truncate(len);
                String::from_utf8(payload).ok().map(Value::String)
            }
        }
    }

    /// Compares two values for ordering.
    /// Returns None if the values are of different types.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Integer(a), Value::Integer(b)) => Some(a.cmp(b)),
            (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Integer(v) => write!(f, "{}", v),
            Value::String(s) => write!(f, "'{}'", s),
        }
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Integer(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}
