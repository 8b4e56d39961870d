use std::sync::Arc;

use crate::codec::Decode;
use crate::col::ColumnDefinition;
use crate::error::{Error, Result};
use crate::protocol::response::OkPayload;
use crate::protocol::row::{BinaryRowPayload, Cell, TextRowPayload};

/// One logical result of a command: an OK packet or a row stream.
#[derive(Debug)]
pub enum CommandResult {
    Ok(OkPayload),
    ResultSet(ResultSet),
}

impl CommandResult {
    pub fn as_ok(&self) -> Option<&OkPayload> {
        match self {
            CommandResult::Ok(ok) => Some(ok),
            CommandResult::ResultSet(_) => None,
        }
    }

    pub fn as_result_set(&self) -> Option<&ResultSet> {
        match self {
            CommandResult::ResultSet(rs) => Some(rs),
            CommandResult::Ok(_) => None,
        }
    }

    pub fn into_result_set(self) -> Option<ResultSet> {
        match self {
            CommandResult::ResultSet(rs) => Some(rs),
            CommandResult::Ok(_) => None,
        }
    }
}

pub(crate) fn cell_at<'a>(
    columns: &'a [ColumnDefinition],
    raw: &'a [u8],
    binary: bool,
    idx: usize,
) -> Result<Cell<'a>> {
    if idx >= columns.len() {
        return Err(Error::OutOfBounds(format!(
            "invalid column index {idx} (result set has {} columns)",
            columns.len()
        )));
    }
    if binary {
        BinaryRowPayload::parse(raw, columns.len())?.cell(columns, idx)
    } else {
        TextRowPayload(raw).cell(columns.len(), idx)
    }
}

pub(crate) fn index_of(
    columns: &[ColumnDefinition],
    label: &str,
    alias_as_name: bool,
) -> Result<usize> {
    columns
        .iter()
        .position(|col| col.label(alias_as_name).eq_ignore_ascii_case(label))
        .ok_or_else(|| Error::OutOfBounds(format!("no such column: '{label}'")))
}

/// A fully buffered result set.
///
/// Raw row payloads are stored as received and cells decode lazily on
/// access; the row buffer grows geometrically with the stream.
#[derive(Debug)]
pub struct ResultSet {
    columns: Arc<[ColumnDefinition]>,
    rows: Vec<Vec<u8>>,
    binary: bool,
    cursor: usize,
    terminator: OkPayload,
    alias_as_name: bool,
}

impl ResultSet {
    pub(crate) fn new(
        columns: Arc<[ColumnDefinition]>,
        rows: Vec<Vec<u8>>,
        binary: bool,
        terminator: OkPayload,
        alias_as_name: bool,
    ) -> Self {
        Self {
            columns,
            rows,
            binary,
            cursor: 0,
            terminator,
            alias_as_name,
        }
    }

    pub fn columns(&self) -> &[ColumnDefinition] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn warnings(&self) -> u16 {
        self.terminator.warnings
    }

    /// Advance the row pointer and borrow the next row.
    pub fn next_row(&mut self) -> Option<Row<'_>> {
        let raw = self.rows.get(self.cursor)?;
        self.cursor += 1;
        Some(Row {
            columns: &self.columns,
            raw,
            binary: self.binary,
            alias_as_name: self.alias_as_name,
        })
    }

    pub fn row(&self, idx: usize) -> Option<Row<'_>> {
        let raw = self.rows.get(idx)?;
        Some(Row {
            columns: &self.columns,
            raw,
            binary: self.binary,
            alias_as_name: self.alias_as_name,
        })
    }

    /// Case-insensitive label lookup.
    pub fn column_index(&self, label: &str) -> Result<usize> {
        index_of(&self.columns, label, self.alias_as_name)
    }
}

/// A borrowed row of a buffered result set.
#[derive(Debug, Clone, Copy)]
pub struct Row<'a> {
    columns: &'a [ColumnDefinition],
    raw: &'a [u8],
    binary: bool,
    alias_as_name: bool,
}

impl<'a> Row<'a> {
    pub fn cell(&self, idx: usize) -> Result<Cell<'a>> {
        cell_at(self.columns, self.raw, self.binary, idx)
    }

    pub fn is_null(&self, idx: usize) -> Result<bool> {
        Ok(self.cell(idx)?.is_null())
    }

    pub fn get<T: Decode>(&self, idx: usize) -> Result<T> {
        let cell = self.cell(idx)?;
        T::decode(&self.columns[idx], cell)
    }

    pub fn get_by_label<T: Decode>(&self, label: &str) -> Result<T> {
        let idx = index_of(self.columns, label, self.alias_as_name)?;
        self.get(idx)
    }
}

/// An owned row popped from a streaming result batch.
#[derive(Debug, Clone)]
pub struct OwnedRow {
    pub(crate) columns: Arc<[ColumnDefinition]>,
    pub(crate) raw: Vec<u8>,
    pub(crate) binary: bool,
    pub(crate) alias_as_name: bool,
}

impl OwnedRow {
    pub fn cell(&self, idx: usize) -> Result<Cell<'_>> {
        cell_at(&self.columns, &self.raw, self.binary, idx)
    }

    pub fn is_null(&self, idx: usize) -> Result<bool> {
        Ok(self.cell(idx)?.is_null())
    }

    pub fn get<T: Decode>(&self, idx: usize) -> Result<T> {
        let cell = self.cell(idx)?;
        T::decode(&self.columns[idx], cell)
    }

    pub fn get_by_label<T: Decode>(&self, label: &str) -> Result<T> {
        let idx = index_of(&self.columns, label, self.alias_as_name)?;
        self.get(idx)
    }
}

#[cfg(test)]
#[path = "resultset_test.rs"]
mod resultset_test;
