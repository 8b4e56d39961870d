use std::borrow::Cow;
use std::ops::Range;

use zerocopy::byteorder::little_endian::{U16 as U16LE, U32 as U32LE};
use zerocopy::{FromBytes, Immutable, KnownLayout};

use crate::constant::{ColumnFlags, ColumnType};
use crate::error::{Error, Result};
use crate::protocol::primitive::*;

/// Character set number marking binary (non-text) data.
pub const BINARY_CHARSET: u16 = 63;

/// Fixed-size tail of a column definition packet (12 bytes)
///
/// Follows the variable-length string fields, after the length-encoded 0x0C
/// indicator:
/// - Character set: 2 bytes LE
/// - Column length: 4 bytes LE
/// - Column type: 1 byte
/// - Flags: 2 bytes LE
/// - Decimals: 1 byte
/// - Reserved: 2 bytes
#[repr(C, packed)]
#[derive(Debug, Clone, Copy, FromBytes, KnownLayout, Immutable)]
pub struct ColumnDefinitionTail {
    charset: U16LE,
    column_length: U32LE,
    column_type: u8,
    flags: U16LE,
    decimals: u8,
    reserved: U16LE,
}

impl ColumnDefinitionTail {
    pub fn charset(&self) -> u16 {
        self.charset.get()
    }

    pub fn column_length(&self) -> u32 {
        self.column_length.get()
    }

    pub fn column_type(&self) -> Result<ColumnType> {
        ColumnType::from_u8(self.column_type).ok_or_else(|| {
            Error::Connection(format!("unknown column type 0x{:02X}", self.column_type))
        })
    }

    pub fn flags(&self) -> ColumnFlags {
        ColumnFlags::from_bits_truncate(self.flags.get())
    }
}

/// A column definition, immutable after construction.
///
/// Owns the raw packet payload and precomputed offsets of the string fields
/// into it; string accessors slice the backing bytes without copying. The
/// fixed tail is decoded into plain fields at parse time.
#[derive(Debug, Clone)]
pub struct ColumnDefinition {
    raw: Box<[u8]>,
    catalog: Range<u32>,
    schema: Range<u32>,
    table_alias: Range<u32>,
    table: Range<u32>,
    name_alias: Range<u32>,
    name: Range<u32>,
    charset: u16,
    column_length: u32,
    column_type: ColumnType,
    flags: ColumnFlags,
    decimals: u8,
}

impl ColumnDefinition {
    /// Parse a column definition packet payload, recording field offsets.
    pub fn parse(raw: Vec<u8>) -> Result<Self> {
        let base = raw.as_ptr() as usize;
        let range_of = |field: &[u8]| -> Range<u32> {
            let start = (field.as_ptr() as usize - base) as u32;
            start..start + field.len() as u32
        };

        let (catalog, data) = read_string_lenenc(&raw)?;
        let (schema, data) = read_string_lenenc(data)?;
        let (table_alias, data) = read_string_lenenc(data)?;
        let (table, data) = read_string_lenenc(data)?;
        let (name_alias, data) = read_string_lenenc(data)?;
        let (name, data) = read_string_lenenc(data)?;

        let (catalog, schema, table_alias, table, name_alias, name) = (
            range_of(catalog),
            range_of(schema),
            range_of(table_alias),
            range_of(table),
            range_of(name_alias),
            range_of(name),
        );

        // fixed-length field block, always 0x0c bytes
        let (_fixed_len, data) = read_int_lenenc(data)?;
        let (tail_bytes, _) = read_string_fix(data, 12)?;
        let tail = ColumnDefinitionTail::ref_from_bytes(tail_bytes).map_err(Error::from_debug)?;

        let charset = tail.charset();
        let column_length = tail.column_length();
        let column_type = tail.column_type()?;
        let flags = tail.flags();
        let decimals = tail.decimals;

        Ok(Self {
            raw: raw.into_boxed_slice(),
            catalog,
            schema,
            table_alias,
            table,
            name_alias,
            name,
            charset,
            column_length,
            column_type,
            flags,
            decimals,
        })
    }

    /// Build a definition for a client-side generated result set.
    pub fn create(name: &str, column_type: ColumnType) -> Self {
        let mut raw = Vec::new();
        write_string_lenenc(&mut raw, "def");
        write_string_lenenc(&mut raw, "");
        write_string_lenenc(&mut raw, "");
        write_string_lenenc(&mut raw, "");
        write_string_lenenc(&mut raw, name);
        write_string_lenenc(&mut raw, name);
        write_int_1(&mut raw, 0x0c);
        write_int_2(&mut raw, 33); // utf8
        write_int_4(&mut raw, 0);
        write_int_1(&mut raw, column_type as u8);
        write_int_2(&mut raw, 0);
        write_int_1(&mut raw, 0);
        write_int_2(&mut raw, 0);

        // construction from well-formed bytes cannot fail
        match Self::parse(raw) {
            Ok(col) => col,
            Err(_) => unreachable!("synthetic column definition must parse"),
        }
    }

    fn field(&self, range: &Range<u32>) -> &[u8] {
        &self.raw[range.start as usize..range.end as usize]
    }

    pub fn catalog(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(self.field(&self.catalog))
    }

    pub fn schema(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(self.field(&self.schema))
    }

    /// Table name after AS aliasing
    pub fn table_alias(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(self.field(&self.table_alias))
    }

    /// Original table name
    pub fn table(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(self.field(&self.table))
    }

    /// Column name after AS aliasing
    pub fn name_alias(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(self.field(&self.name_alias))
    }

    /// Original column name
    pub fn name(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(self.field(&self.name))
    }

    /// Label used for by-name cell lookup. The alias when one exists; the
    /// original column name when `alias_as_name` is requested or no alias
    /// was set.
    pub fn label(&self, alias_as_name: bool) -> Cow<'_, str> {
        if alias_as_name || self.name_alias.is_empty() {
            self.name()
        } else {
            self.name_alias()
        }
    }

    pub fn charset(&self) -> u16 {
        self.charset
    }

    pub fn column_length(&self) -> u32 {
        self.column_length
    }

    pub fn column_type(&self) -> ColumnType {
        self.column_type
    }

    pub fn flags(&self) -> ColumnFlags {
        self.flags
    }

    pub fn decimals(&self) -> u8 {
        self.decimals
    }

    pub fn is_unsigned(&self) -> bool {
        self.flags.contains(ColumnFlags::UNSIGNED_FLAG)
    }

    pub fn is_binary(&self) -> bool {
        self.charset == BINARY_CHARSET
    }
}

/// Build a complete column definition packet payload, for tests.
#[cfg(test)]
#[allow(clippy::too_many_arguments)]
pub(crate) fn encode_column_def(
    schema: &str,
    table: &str,
    name_alias: &str,
    name: &str,
    column_type: ColumnType,
    flags: ColumnFlags,
    charset: u16,
    decimals: u8,
) -> Vec<u8> {
    let mut packet = Vec::new();
    write_string_lenenc(&mut packet, "def");
    write_string_lenenc(&mut packet, schema);
    write_string_lenenc(&mut packet, table);
    write_string_lenenc(&mut packet, table);
    write_string_lenenc(&mut packet, name_alias);
    write_string_lenenc(&mut packet, name);
    write_int_1(&mut packet, 0x0c);
    write_int_2(&mut packet, charset);
    write_int_4(&mut packet, 11);
    write_int_1(&mut packet, column_type as u8);
    write_int_2(&mut packet, flags.bits());
    write_int_1(&mut packet, decimals);
    write_int_2(&mut packet, 0);
    packet
}

#[cfg(test)]
#[path = "col_test.rs"]
mod col_test;
