use std::fmt;

use crate::common::STRING_LEN;

/// Field types supported by heap pages.
/// Every type has a fixed on-page width, so a page's layout is computable
/// from the schema alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    /// 32-bit signed integer: 4 bytes, big-endian
    Integer,

    /// String of at most n bytes.
    /// Stored as: length (4 bytes, big-endian) + n bytes, zero padded
    String(u16),
}

impl DataType {
    /// Returns the number of bytes this type occupies inside a tuple.
    pub fn size(&self) -> usize {
        match self {
            DataType::Integer => 4,
            DataType::String(n) => 4 + *n as usize,
        }
    }

    /// Parses a catalog type name (`int` or `string`).
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "int" => Some(DataType::Integer),
            "string" => Some(DataType::String(STRING_LEN)),
            _ => None,
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataType::Integer => write!(f, "INT"),
            DataType::String(n) => write!(f, "STRING({})", n),
        }
    }
}
