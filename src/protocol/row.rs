use crate::col::ColumnDefinition;
use crate::error::{Error, Result};
use crate::protocol::primitive::*;
use crate::value::Value;

/// Marker byte for NULL cells in the text row format.
pub const TEXT_NULL: u8 = 0xFB;

/// NULL bitmap of a binary protocol row or parameter block.
///
/// Each bit marks the corresponding column NULL. Result-set rows carry a
/// 2-bit offset; parameter bitmaps start at bit 0.
#[derive(Debug, Clone, Copy)]
pub struct NullBitmap<'a> {
    bitmap: &'a [u8],
    offset: usize,
}

impl<'a> NullBitmap<'a> {
    pub fn for_result_set(bitmap: &'a [u8]) -> Self {
        Self { bitmap, offset: 2 }
    }

    pub fn for_parameters(bitmap: &'a [u8]) -> Self {
        Self { bitmap, offset: 0 }
    }

    pub fn is_null(&self, idx: usize) -> bool {
        let bit_pos = idx + self.offset;
        let byte_pos = bit_pos >> 3;
        let bit_offset = bit_pos & 7;

        if byte_pos >= self.bitmap.len() {
            return false;
        }

        (self.bitmap[byte_pos] & (1 << bit_offset)) != 0
    }
}

/// Number of bytes a result-set NULL bitmap occupies for `num_columns`.
pub fn result_set_bitmap_len(num_columns: usize) -> usize {
    (num_columns + 7 + 2) / 8
}

/// Number of bytes a parameter NULL bitmap occupies for `num_params`.
pub fn parameter_bitmap_len(num_params: usize) -> usize {
    (num_params + 7) / 8
}

/// A single cell of a row in either protocol shape, handed to codecs.
#[derive(Debug, Clone, Copy)]
pub enum Cell<'a> {
    Null,
    /// Text protocol: the cell's ASCII/UTF-8 representation
    Text(&'a [u8]),
    /// Binary protocol: the decoded wire value
    Binary(Value<'a>),
}

impl Cell<'_> {
    pub fn is_null(&self) -> bool {
        matches!(self, Cell::Null)
    }
}

/// The payload part of a binary protocol row packet.
#[derive(Debug, Clone, Copy)]
pub struct BinaryRowPayload<'a> {
    null_bitmap: NullBitmap<'a>,
    values: &'a [u8],
    num_columns: usize,
}

impl<'a> BinaryRowPayload<'a> {
    /// Split a binary row packet (leading 0x00, NULL bitmap, packed cells).
    pub fn parse(payload: &'a [u8], num_columns: usize) -> Result<Self> {
        let (header, data) = read_int_1(payload)?;
        if header != 0x00 {
            return Err(Error::Connection(format!(
                "expected binary row packet, got header 0x{header:02X}"
            )));
        }

        let (bitmap, values) = read_string_fix(data, result_set_bitmap_len(num_columns))?;
        Ok(Self {
            null_bitmap: NullBitmap::for_result_set(bitmap),
            values,
            num_columns,
        })
    }

    /// Materialize the cell at `idx`, walking the packed non-null cells
    /// before it.
    pub fn cell(&self, columns: &[ColumnDefinition], idx: usize) -> Result<Cell<'a>> {
        debug_assert_eq!(columns.len(), self.num_columns);

        let mut data = self.values;
        for (i, col) in columns.iter().take(idx + 1).enumerate() {
            if self.null_bitmap.is_null(i) {
                if i == idx {
                    return Ok(Cell::Null);
                }
                continue;
            }
            let (value, rest) = Value::parse(col.column_type(), col.flags(), data)?;
            if i == idx {
                return Ok(Cell::Binary(value));
            }
            data = rest;
        }

        Err(Error::OutOfBounds(format!(
            "invalid column index {idx} (result set has {} columns)",
            self.num_columns
        )))
    }
}

/// The payload part of a text protocol row packet: a sequence of
/// length-encoded cells, NULL marked by the 0xFB byte.
#[derive(Debug, Clone, Copy)]
pub struct TextRowPayload<'a>(pub &'a [u8]);

impl<'a> TextRowPayload<'a> {
    pub fn cell(&self, num_columns: usize, idx: usize) -> Result<Cell<'a>> {
        if idx >= num_columns {
            return Err(Error::OutOfBounds(format!(
                "invalid column index {idx} (result set has {num_columns} columns)"
            )));
        }

        let mut data = self.0;
        for i in 0..=idx {
            if data.first() == Some(&TEXT_NULL) {
                if i == idx {
                    return Ok(Cell::Null);
                }
                data = &data[1..];
                continue;
            }
            if i == idx {
                let (bytes, _) = read_string_lenenc(data)?;
                return Ok(Cell::Text(bytes));
            }
            data = skip_string_lenenc(data)?;
        }

        unreachable!("loop returns at idx")
    }
}

#[cfg(test)]
#[path = "row_test.rs"]
mod row_test;
