use crate::col::ColumnDefinition;
use crate::constant::ColumnType;
use crate::error::{Result, bad_value, cannot_decode};
use crate::protocol::row::Cell;
use crate::value::{DateTime, Time, Value};

use super::{Decode, null_error};

fn is_string_type(ty: ColumnType) -> bool {
    matches!(
        ty,
        ColumnType::MYSQL_TYPE_VARCHAR
            | ColumnType::MYSQL_TYPE_VAR_STRING
            | ColumnType::MYSQL_TYPE_STRING
            | ColumnType::MYSQL_TYPE_ENUM
            | ColumnType::MYSQL_TYPE_SET
            | ColumnType::MYSQL_TYPE_JSON
    )
}

fn bytes_to_string(bytes: &[u8], target: &str) -> Result<String> {
    match simdutf8::basic::from_utf8(bytes) {
        Ok(text) => Ok(text.to_string()),
        Err(_) => Err(bad_value(String::from_utf8_lossy(bytes), target)),
    }
}

/// Everything textual or numeric renders as a string; opaque binary types
/// do not.
impl Decode for String {
    const TARGET: &'static str = "String";

    fn decode(col: &ColumnDefinition, cell: Cell<'_>) -> Result<Self> {
        let ty = col.column_type();
        if matches!(ty, ColumnType::MYSQL_TYPE_GEOMETRY) {
            return Err(cannot_decode(ty, Self::TARGET));
        }

        match cell {
            Cell::Null => Err(null_error(Self::TARGET)),
            Cell::Text(bytes) => bytes_to_string(bytes, Self::TARGET),
            Cell::Binary(value) => match value {
                Value::SignedInt(v) => Ok(v.to_string()),
                Value::UnsignedInt(v) => Ok(v.to_string()),
                Value::Float(v) => Ok(v.to_string()),
                Value::Double(v) => Ok(v.to_string()),
                Value::Bytes(bytes) => bytes_to_string(bytes, Self::TARGET),
                Value::Timestamp0 => Ok("0000-00-00 00:00:00".to_string()),
                Value::Timestamp4(ts) => Ok(DateTime::from(ts).to_string()),
                Value::Timestamp7(ts) => Ok(DateTime::from(ts).to_string()),
                Value::Timestamp11(ts) => Ok(DateTime::from(ts).to_string()),
                Value::Time0 => Ok("00:00:00".to_string()),
                Value::Time8(t) => Ok(Time::from(t).to_string()),
                Value::Time12(t) => Ok(Time::from(t).to_string()),
                Value::Null => Err(null_error(Self::TARGET)),
            },
        }
    }
}

/// Raw bytes of string, blob, bit, json and geometry columns.
impl Decode for Vec<u8> {
    const TARGET: &'static str = "byte[]";

    fn decode(col: &ColumnDefinition, cell: Cell<'_>) -> Result<Self> {
        let ty = col.column_type();
        let accepted = is_string_type(ty)
            || matches!(
                ty,
                ColumnType::MYSQL_TYPE_BLOB
                    | ColumnType::MYSQL_TYPE_TINY_BLOB
                    | ColumnType::MYSQL_TYPE_MEDIUM_BLOB
                    | ColumnType::MYSQL_TYPE_LONG_BLOB
                    | ColumnType::MYSQL_TYPE_BIT
                    | ColumnType::MYSQL_TYPE_GEOMETRY
            );
        if !accepted {
            return Err(cannot_decode(ty, Self::TARGET));
        }

        match cell {
            Cell::Null => Err(null_error(Self::TARGET)),
            Cell::Text(bytes) => Ok(bytes.to_vec()),
            Cell::Binary(Value::Bytes(bytes)) => Ok(bytes.to_vec()),
            Cell::Binary(_) => Err(cannot_decode(ty, Self::TARGET)),
        }
    }
}

/// URLs are produced only from strings; a non-parsing string is a
/// syntactic decode failure.
impl Decode for url::Url {
    const TARGET: &'static str = "URL";

    fn decode(col: &ColumnDefinition, cell: Cell<'_>) -> Result<Self> {
        let ty = col.column_type();
        if !is_string_type(ty) {
            return Err(cannot_decode(ty, Self::TARGET));
        }

        let text = match cell {
            Cell::Null => return Err(null_error(Self::TARGET)),
            Cell::Text(bytes) => bytes_to_string(bytes, Self::TARGET)?,
            Cell::Binary(Value::Bytes(bytes)) => bytes_to_string(bytes, Self::TARGET)?,
            Cell::Binary(_) => return Err(cannot_decode(ty, Self::TARGET)),
        };

        url::Url::parse(&text).map_err(|_| bad_value(text, Self::TARGET))
    }
}
