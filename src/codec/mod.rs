//! Conversions between wire cell encodings and caller-facing types.
//!
//! Each target type implements [`Decode`] and declares the set of column
//! types it accepts. Decoding from a column outside that set fails with
//! `"Data type X cannot be decoded as Y"`; an accepted column whose value
//! cannot be represented (overflow, unparseable text) fails with
//! `"value '…' cannot be decoded as Y"`. Neither failure corrupts the
//! session.

mod geometry;
mod numeric;
mod params;
mod temporal;
mod text;

pub use params::{ParamValue, escape_string_into, substitute_params};

use crate::col::ColumnDefinition;
use crate::error::{Error, Result};
use crate::protocol::row::Cell;

/// Decoding of a row cell into one target type.
pub trait Decode: Sized {
    /// Target name as it appears in decode error messages.
    const TARGET: &'static str;

    fn decode(col: &ColumnDefinition, cell: Cell<'_>) -> Result<Self>;
}

/// NULL decodes to `None`; everything else delegates.
impl<T: Decode> Decode for Option<T> {
    const TARGET: &'static str = T::TARGET;

    fn decode(col: &ColumnDefinition, cell: Cell<'_>) -> Result<Self> {
        if cell.is_null() {
            Ok(None)
        } else {
            T::decode(col, cell).map(Some)
        }
    }
}

pub(crate) fn null_error(target: &str) -> Error {
    Error::Decode(format!(
        "NULL cannot be decoded as {target}; decode as Option<{target}> instead"
    ))
}
