use crate::col::ColumnDefinition;
use crate::constant::ColumnType;
use crate::error::{Result, bad_value, cannot_decode};
use crate::protocol::row::Cell;
use crate::value::{Geometry, Value};

use super::{Decode, null_error};

/// SRID prefix followed by well-known-binary bytes. Both wire protocols
/// carry geometry as an opaque byte string.
impl Decode for Geometry {
    const TARGET: &'static str = "Geometry";

    fn decode(col: &ColumnDefinition, cell: Cell<'_>) -> Result<Self> {
        let ty = col.column_type();
        if !matches!(ty, ColumnType::MYSQL_TYPE_GEOMETRY | ColumnType::MYSQL_TYPE_BLOB) {
            return Err(cannot_decode(ty, Self::TARGET));
        }

        let bytes = match cell {
            Cell::Null => return Err(null_error(Self::TARGET)),
            Cell::Text(bytes) => bytes,
            Cell::Binary(Value::Bytes(bytes)) => bytes,
            Cell::Binary(_) => return Err(cannot_decode(ty, Self::TARGET)),
        };

        // 4-byte SRID, then at least a WKB header (endianness + type)
        if bytes.len() < 9 {
            return Err(bad_value(
                String::from_utf8_lossy(bytes),
                Self::TARGET,
            ));
        }

        let srid = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        Ok(Geometry {
            srid,
            wkb: bytes[4..].to_vec(),
        })
    }
}
