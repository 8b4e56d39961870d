use crate::col::ColumnDefinition;
use crate::constant::ColumnType;
use crate::error::{Result, bad_value, cannot_decode};
use crate::protocol::row::Cell;
use crate::value::Value;

use super::{Decode, null_error};

/// Column types every numeric target accepts.
fn accepts_numeric(ty: ColumnType) -> bool {
    matches!(
        ty,
        ColumnType::MYSQL_TYPE_TINY
            | ColumnType::MYSQL_TYPE_SHORT
            | ColumnType::MYSQL_TYPE_INT24
            | ColumnType::MYSQL_TYPE_LONG
            | ColumnType::MYSQL_TYPE_LONGLONG
            | ColumnType::MYSQL_TYPE_YEAR
            | ColumnType::MYSQL_TYPE_FLOAT
            | ColumnType::MYSQL_TYPE_DOUBLE
            | ColumnType::MYSQL_TYPE_DECIMAL
            | ColumnType::MYSQL_TYPE_NEWDECIMAL
            | ColumnType::MYSQL_TYPE_BIT
            | ColumnType::MYSQL_TYPE_VARCHAR
            | ColumnType::MYSQL_TYPE_VAR_STRING
            | ColumnType::MYSQL_TYPE_STRING
    )
}

/// Intermediate numeric shape shared by all integer and float targets.
enum Number {
    Int(i64),
    UInt(u64),
    Double(f64),
}

fn text_to_number(bytes: &[u8], target: &str) -> Result<Number> {
    let text = simdutf8::basic::from_utf8(bytes)
        .map_err(|_| bad_value(String::from_utf8_lossy(bytes), target))?;
    if let Ok(v) = text.parse::<i64>() {
        return Ok(Number::Int(v));
    }
    if let Ok(v) = text.parse::<u64>() {
        return Ok(Number::UInt(v));
    }
    if let Ok(v) = text.parse::<f64>() {
        return Ok(Number::Double(v));
    }
    Err(bad_value(text, target))
}

/// BIT values arrive as up-to-8 big-endian bytes.
fn bits_to_number(bytes: &[u8], target: &str) -> Result<Number> {
    if bytes.len() > 8 {
        return Err(bad_value(String::from_utf8_lossy(bytes), target));
    }
    let mut value = 0_u64;
    for &byte in bytes {
        value = (value << 8) | byte as u64;
    }
    Ok(Number::UInt(value))
}

fn cell_to_number(col: &ColumnDefinition, cell: Cell<'_>, target: &str) -> Result<Number> {
    let ty = col.column_type();
    if !accepts_numeric(ty) {
        return Err(cannot_decode(ty, target));
    }

    match cell {
        Cell::Null => Err(null_error(target)),
        Cell::Text(bytes) => {
            if ty == ColumnType::MYSQL_TYPE_BIT {
                bits_to_number(bytes, target)
            } else {
                text_to_number(bytes, target)
            }
        }
        Cell::Binary(value) => match value {
            Value::SignedInt(v) => Ok(Number::Int(v)),
            Value::UnsignedInt(v) => Ok(Number::UInt(v)),
            Value::Float(v) => Ok(Number::Double(v as f64)),
            Value::Double(v) => Ok(Number::Double(v)),
            Value::Bytes(bytes) => {
                if ty == ColumnType::MYSQL_TYPE_BIT {
                    bits_to_number(bytes, target)
                } else {
                    text_to_number(bytes, target)
                }
            }
            _ => Err(cannot_decode(ty, target)),
        },
    }
}

/// Fractional values truncate toward zero; out-of-range values are a
/// decode failure, never a wrap.
fn number_to_i64(number: Number, target: &str) -> Result<i64> {
    match number {
        Number::Int(v) => Ok(v),
        Number::UInt(v) => i64::try_from(v).map_err(|_| bad_value(v, target)),
        Number::Double(v) => {
            let truncated = v.trunc();
            if truncated >= i64::MIN as f64 && truncated <= i64::MAX as f64 {
                Ok(truncated as i64)
            } else {
                Err(bad_value(v, target))
            }
        }
    }
}

fn number_to_u64(number: Number, target: &str) -> Result<u64> {
    match number {
        Number::Int(v) => u64::try_from(v).map_err(|_| bad_value(v, target)),
        Number::UInt(v) => Ok(v),
        Number::Double(v) => {
            let truncated = v.trunc();
            if truncated >= 0.0 && truncated <= u64::MAX as f64 {
                Ok(truncated as u64)
            } else {
                Err(bad_value(v, target))
            }
        }
    }
}

macro_rules! signed_int_decode {
    ($ty:ty, $target:literal) => {
        impl Decode for $ty {
            const TARGET: &'static str = $target;

            fn decode(col: &ColumnDefinition, cell: Cell<'_>) -> Result<Self> {
                let wide = number_to_i64(cell_to_number(col, cell, $target)?, $target)?;
                <$ty>::try_from(wide).map_err(|_| bad_value(wide, $target))
            }
        }
    };
}

macro_rules! unsigned_int_decode {
    ($ty:ty, $target:literal) => {
        impl Decode for $ty {
            const TARGET: &'static str = $target;

            fn decode(col: &ColumnDefinition, cell: Cell<'_>) -> Result<Self> {
                let wide = number_to_u64(cell_to_number(col, cell, $target)?, $target)?;
                <$ty>::try_from(wide).map_err(|_| bad_value(wide, $target))
            }
        }
    };
}

signed_int_decode!(i8, "Byte");
signed_int_decode!(i16, "Short");
signed_int_decode!(i32, "Integer");
signed_int_decode!(i64, "Long");
unsigned_int_decode!(u8, "UnsignedByte");
unsigned_int_decode!(u16, "UnsignedShort");
unsigned_int_decode!(u32, "UnsignedInteger");
unsigned_int_decode!(u64, "UnsignedLong");

impl Decode for f64 {
    const TARGET: &'static str = "Double";

    fn decode(col: &ColumnDefinition, cell: Cell<'_>) -> Result<Self> {
        match cell_to_number(col, cell, Self::TARGET)? {
            Number::Int(v) => Ok(v as f64),
            Number::UInt(v) => Ok(v as f64),
            Number::Double(v) => Ok(v),
        }
    }
}

impl Decode for f32 {
    const TARGET: &'static str = "Float";

    fn decode(col: &ColumnDefinition, cell: Cell<'_>) -> Result<Self> {
        match cell_to_number(col, cell, Self::TARGET)? {
            Number::Int(v) => Ok(v as f32),
            Number::UInt(v) => Ok(v as f32),
            Number::Double(v) => Ok(v as f32),
        }
    }
}

/// Any non-zero numeric decodes to `true`.
impl Decode for bool {
    const TARGET: &'static str = "Boolean";

    fn decode(col: &ColumnDefinition, cell: Cell<'_>) -> Result<Self> {
        match cell_to_number(col, cell, Self::TARGET)? {
            Number::Int(v) => Ok(v != 0),
            Number::UInt(v) => Ok(v != 0),
            Number::Double(v) => Ok(v != 0.0),
        }
    }
}
