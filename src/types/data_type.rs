use std::cmp::Ordering;

use crate::types::{compare_values, Value};
use eyre::{bail, Result};

/// Column data types. Fieldless: precision and length limits are part of
/// the column definition, not the type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    Bool,
    SmallInt,
    Integer,
    BigInt,
    Double,
    Char,
    Varchar,
    Text,
    Blob,
}

impl DataType {
    pub fn is_numeric(self) -> bool {
        matches!(
            self,
            DataType::SmallInt | DataType::Integer | DataType::BigInt | DataType::Double
        )
    }

    pub fn is_character(self) -> bool {
        matches!(self, DataType::Char | DataType::Varchar | DataType::Text)
    }

    /// Collating comparison for this type. CHARACTER ignores trailing
    /// spaces (SQL padded semantics); every other type uses the value
    /// order.
    pub fn compare(self, a: &Value, b: &Value) -> Ordering {
        if self == DataType::Char {
            if let (Value::Text(x), Value::Text(y)) = (a, b) {
                return x.trim_end_matches(' ').cmp(y.trim_end_matches(' '));
            }
        }

        compare_values(a, b)
    }

    /// Checks a value against the limits of this type and an optional
    /// column length. Integer types enforce their native range; character
    /// types enforce the declared length. Null always passes.
    pub fn convert_to_type_limits(
        self,
        value: &Value,
        max_length: Option<u32>,
    ) -> Result<()> {
        match (self, value) {
            (_, Value::Null) => Ok(()),
            (DataType::Bool, Value::Bool(_)) => Ok(()),
            (DataType::SmallInt, Value::Int(v)) => {
                if *v < i16::MIN as i64 || *v > i16::MAX as i64 {
                    bail!("numeric value out of range for SMALLINT: {}", v);
                }
                Ok(())
            }
            (DataType::Integer, Value::Int(v)) => {
                if *v < i32::MIN as i64 || *v > i32::MAX as i64 {
                    bail!("numeric value out of range for INTEGER: {}", v);
                }
                Ok(())
            }
            (DataType::BigInt, Value::Int(_)) => Ok(()),
            (DataType::Double, Value::Double(_) | Value::Int(_)) => Ok(()),
            (DataType::Char | DataType::Varchar, Value::Text(s)) => {
                if let Some(limit) = max_length {
                    if s.chars().count() > limit as usize {
                        bail!(
                            "string data exceeds maximum length {}: {} characters",
                            limit,
                            s.chars().count()
                        );
                    }
                }
                Ok(())
            }
            (DataType::Text, Value::Text(_)) => Ok(()),
            (DataType::Blob, Value::Blob(b)) => {
                if let Some(limit) = max_length {
                    if b.len() > limit as usize {
                        bail!(
                            "binary data exceeds maximum length {}: {} bytes",
                            limit,
                            b.len()
                        );
                    }
                }
                Ok(())
            }
            (ty, v) => bail!("value {:?} is not assignable to type {:?}", v, ty),
        }
    }
}

impl std::fmt::Display for DataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            DataType::Bool => "BOOLEAN",
            DataType::SmallInt => "SMALLINT",
            DataType::Integer => "INTEGER",
            DataType::BigInt => "BIGINT",
            DataType::Double => "DOUBLE",
            DataType::Char => "CHARACTER",
            DataType::Varchar => "VARCHAR",
            DataType::Text => "TEXT",
            DataType::Blob => "BLOB",
        };
        f.write_str(name)
    }
}
