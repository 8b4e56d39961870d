//! Binary protocol values and the caller-facing temporal types.

use std::fmt;

use zerocopy::byteorder::little_endian::{U16 as U16LE, U32 as U32LE};
use zerocopy::{FromBytes, Immutable, KnownLayout};

use crate::constant::{ColumnFlags, ColumnType};
use crate::error::{Error, Result, bad_value, eyre};
use crate::protocol::primitive::*;

/// A single cell of a binary protocol row, borrowed from the row payload.
#[derive(Debug, Clone, Copy)]
pub enum Value<'a> {
    /// NULL value
    Null,
    /// Signed integer (TINYINT, SMALLINT, INT, BIGINT)
    SignedInt(i64),
    /// Unsigned integer (TINYINT UNSIGNED, SMALLINT UNSIGNED, INT UNSIGNED, BIGINT UNSIGNED)
    UnsignedInt(u64),
    /// FLOAT - 4-byte floating point
    Float(f32),
    /// DOUBLE - 8-byte floating point
    Double(f64),
    /// DATE/DATETIME/TIMESTAMP - 0 bytes (0000-00-00 00:00:00)
    Timestamp0,
    /// DATE/DATETIME/TIMESTAMP - 4 bytes (ymd)
    Timestamp4(&'a Timestamp4),
    /// DATE/DATETIME/TIMESTAMP - 7 bytes (ymd + hms)
    Timestamp7(&'a Timestamp7),
    /// DATE/DATETIME/TIMESTAMP - 11 bytes (ymd + hms + microseconds)
    Timestamp11(&'a Timestamp11),
    /// TIME - 0 bytes (00:00:00)
    Time0,
    /// TIME - 8 bytes (without microseconds)
    Time8(&'a Time8),
    /// TIME - 12 bytes (with microseconds)
    Time12(&'a Time12),
    /// BLOB, GEOMETRY, STRING, VARCHAR, VAR_STRING, DECIMAL, ..
    Bytes(&'a [u8]),
}

impl<'a> Value<'a> {
    /// Parse a single binary protocol value for a column of the given type.
    ///
    /// Returns the parsed value and the remaining bytes.
    pub fn parse(
        column_type: ColumnType,
        flags: ColumnFlags,
        data: &'a [u8],
    ) -> Result<(Self, &'a [u8])> {
        let is_unsigned = flags.contains(ColumnFlags::UNSIGNED_FLAG);

        match column_type {
            ColumnType::MYSQL_TYPE_NULL => Ok((Value::Null, data)),

            ColumnType::MYSQL_TYPE_TINY => {
                let (val, rest) = read_int_1(data)?;
                let value = if is_unsigned {
                    Value::UnsignedInt(val as u64)
                } else {
                    Value::SignedInt(val as i8 as i64)
                };
                Ok((value, rest))
            }

            ColumnType::MYSQL_TYPE_SHORT | ColumnType::MYSQL_TYPE_YEAR => {
                let (val, rest) = read_int_2(data)?;
                let value = if is_unsigned || column_type == ColumnType::MYSQL_TYPE_YEAR {
                    Value::UnsignedInt(val as u64)
                } else {
                    Value::SignedInt(val as i16 as i64)
                };
                Ok((value, rest))
            }

            ColumnType::MYSQL_TYPE_INT24 | ColumnType::MYSQL_TYPE_LONG => {
                let (val, rest) = read_int_4(data)?;
                let value = if is_unsigned {
                    Value::UnsignedInt(val as u64)
                } else {
                    Value::SignedInt(val as i32 as i64)
                };
                Ok((value, rest))
            }

            ColumnType::MYSQL_TYPE_LONGLONG => {
                let (val, rest) = read_int_8(data)?;
                let value = if is_unsigned {
                    Value::UnsignedInt(val)
                } else {
                    Value::SignedInt(val as i64)
                };
                Ok((value, rest))
            }

            ColumnType::MYSQL_TYPE_FLOAT => {
                let (val, rest) = read_int_4(data)?;
                Ok((Value::Float(f32::from_bits(val)), rest))
            }

            ColumnType::MYSQL_TYPE_DOUBLE => {
                let (val, rest) = read_int_8(data)?;
                Ok((Value::Double(f64::from_bits(val)), rest))
            }

            ColumnType::MYSQL_TYPE_DATE
            | ColumnType::MYSQL_TYPE_DATETIME
            | ColumnType::MYSQL_TYPE_TIMESTAMP
            | ColumnType::MYSQL_TYPE_TIMESTAMP2
            | ColumnType::MYSQL_TYPE_DATETIME2
            | ColumnType::MYSQL_TYPE_NEWDATE => {
                let (len, rest) = read_int_1(data)?;
                match len {
                    0 => Ok((Value::Timestamp0, rest)),
                    4 => {
                        let (bytes, rest) = read_string_fix(rest, 4)?;
                        let ts = Timestamp4::ref_from_bytes(bytes)?;
                        Ok((Value::Timestamp4(ts), rest))
                    }
                    7 => {
                        let (bytes, rest) = read_string_fix(rest, 7)?;
                        let ts = Timestamp7::ref_from_bytes(bytes)?;
                        Ok((Value::Timestamp7(ts), rest))
                    }
                    11 => {
                        let (bytes, rest) = read_string_fix(rest, 11)?;
                        let ts = Timestamp11::ref_from_bytes(bytes)?;
                        Ok((Value::Timestamp11(ts), rest))
                    }
                    _ => Err(Error::LibraryBug(eyre!("invalid timestamp length: {}", len))),
                }
            }

            ColumnType::MYSQL_TYPE_TIME | ColumnType::MYSQL_TYPE_TIME2 => {
                let (len, rest) = read_int_1(data)?;
                match len {
                    0 => Ok((Value::Time0, rest)),
                    8 => {
                        let (bytes, rest) = read_string_fix(rest, 8)?;
                        let time = Time8::ref_from_bytes(bytes)?;
                        Ok((Value::Time8(time), rest))
                    }
                    12 => {
                        let (bytes, rest) = read_string_fix(rest, 12)?;
                        let time = Time12::ref_from_bytes(bytes)?;
                        Ok((Value::Time12(time), rest))
                    }
                    _ => Err(Error::LibraryBug(eyre!("invalid time length: {}", len))),
                }
            }

            ColumnType::MYSQL_TYPE_VARCHAR
            | ColumnType::MYSQL_TYPE_VAR_STRING
            | ColumnType::MYSQL_TYPE_STRING
            | ColumnType::MYSQL_TYPE_BLOB
            | ColumnType::MYSQL_TYPE_TINY_BLOB
            | ColumnType::MYSQL_TYPE_MEDIUM_BLOB
            | ColumnType::MYSQL_TYPE_LONG_BLOB
            | ColumnType::MYSQL_TYPE_GEOMETRY
            | ColumnType::MYSQL_TYPE_JSON
            | ColumnType::MYSQL_TYPE_DECIMAL
            | ColumnType::MYSQL_TYPE_NEWDECIMAL
            | ColumnType::MYSQL_TYPE_ENUM
            | ColumnType::MYSQL_TYPE_SET
            | ColumnType::MYSQL_TYPE_BIT => {
                let (bytes, rest) = read_string_lenenc(data)?;
                Ok((Value::Bytes(bytes), rest))
            }
        }
    }
}

// ============================================================================
// Wire-layout temporal fragments
// ============================================================================

/// DATE/DATETIME/TIMESTAMP - 4 bytes (date only)
#[repr(C, packed)]
#[derive(Debug, Clone, Copy, FromBytes, KnownLayout, Immutable)]
pub struct Timestamp4 {
    pub year: U16LE,
    pub month: u8,
    pub day: u8,
}

/// DATE/DATETIME/TIMESTAMP - 7 bytes (without microseconds)
#[repr(C, packed)]
#[derive(Debug, Clone, Copy, FromBytes, KnownLayout, Immutable)]
pub struct Timestamp7 {
    pub year: U16LE,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
}

/// DATE/DATETIME/TIMESTAMP - 11 bytes (with microseconds)
#[repr(C, packed)]
#[derive(Debug, Clone, Copy, FromBytes, KnownLayout, Immutable)]
pub struct Timestamp11 {
    pub year: U16LE,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
    pub microsecond: U32LE,
}

/// TIME - 8 bytes: negative (1), days (4 LE), hour (1), minute (1), second (1)
#[repr(C, packed)]
#[derive(Debug, Clone, Copy, FromBytes, KnownLayout, Immutable)]
pub struct Time8 {
    pub is_negative: u8,
    pub days: U32LE,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
}

/// TIME - 12 bytes: negative (1), days (4 LE), hour (1), minute (1), second (1), microsecond (4 LE)
#[repr(C, packed)]
#[derive(Debug, Clone, Copy, FromBytes, KnownLayout, Immutable)]
pub struct Time12 {
    pub is_negative: u8,
    pub days: U32LE,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
    pub microsecond: U32LE,
}

// ============================================================================
// Caller-facing temporal types
// ============================================================================

/// Calendar date, as stored in DATE columns. `0000-00-00` is representable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Date {
    pub year: u16,
    pub month: u8,
    pub day: u8,
}

impl Date {
    pub fn new(year: u16, month: u8, day: u8) -> Self {
        Self { year, month, day }
    }

    pub(crate) fn parse_text(bytes: &[u8], target: &str) -> Result<Self> {
        let text = text_as_str(bytes, target)?;
        let mut parts = text.splitn(3, '-');
        let (y, m, d) = match (parts.next(), parts.next(), parts.next()) {
            (Some(y), Some(m), Some(d)) => (y, m, d),
            _ => return Err(bad_value(text, target)),
        };
        Ok(Self {
            year: y.parse().map_err(|_| bad_value(text, target))?,
            month: m.parse().map_err(|_| bad_value(text, target))?,
            day: d.parse().map_err(|_| bad_value(text, target))?,
        })
    }
}

impl fmt::Display for Date {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}-{:02}", self.year, self.month, self.day)
    }
}

/// Time of day or signed interval, as stored in TIME columns.
/// The range is wider than a day: up to 838:59:59.999999, possibly negative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Time {
    pub negative: bool,
    pub hours: u32,
    pub minutes: u8,
    pub seconds: u8,
    pub micros: u32,
}

impl Time {
    pub fn new(negative: bool, hours: u32, minutes: u8, seconds: u8, micros: u32) -> Self {
        Self {
            negative,
            hours,
            minutes,
            seconds,
            micros,
        }
    }

    /// Total magnitude in microseconds, ignoring the sign.
    pub fn total_micros(&self) -> u64 {
        (self.hours as u64 * 3600 + self.minutes as u64 * 60 + self.seconds as u64) * 1_000_000
            + self.micros as u64
    }

    pub(crate) fn parse_text(bytes: &[u8], target: &str) -> Result<Self> {
        let text = text_as_str(bytes, target)?;
        let (negative, body) = match text.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, text),
        };
        let (hms, micros) = split_fraction(body, text, target)?;

        let mut parts = hms.splitn(3, ':');
        let (h, m, s) = match (parts.next(), parts.next(), parts.next()) {
            (Some(h), Some(m), Some(s)) => (h, m, s),
            _ => return Err(bad_value(text, target)),
        };
        Ok(Self {
            negative,
            hours: h.parse().map_err(|_| bad_value(text, target))?,
            minutes: m.parse().map_err(|_| bad_value(text, target))?,
            seconds: s.parse().map_err(|_| bad_value(text, target))?,
            micros,
        })
    }
}

impl fmt::Display for Time {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.negative {
            write!(f, "-")?;
        }
        write!(f, "{:02}:{:02}:{:02}", self.hours, self.minutes, self.seconds)?;
        if self.micros > 0 {
            write!(f, ".{:06}", self.micros)?;
        }
        Ok(())
    }
}

impl From<&Time8> for Time {
    fn from(t: &Time8) -> Self {
        Self {
            negative: t.is_negative != 0,
            hours: t.days.get() * 24 + t.hour as u32,
            minutes: t.minute,
            seconds: t.second,
            micros: 0,
        }
    }
}

impl From<&Time12> for Time {
    fn from(t: &Time12) -> Self {
        Self {
            negative: t.is_negative != 0,
            hours: t.days.get() * 24 + t.hour as u32,
            minutes: t.minute,
            seconds: t.second,
            micros: t.microsecond.get(),
        }
    }
}

/// Combined date and time, as stored in DATETIME and TIMESTAMP columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DateTime {
    pub year: u16,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
    pub micro: u32,
}

impl DateTime {
    pub fn date(&self) -> Date {
        Date::new(self.year, self.month, self.day)
    }

    pub fn time(&self) -> Time {
        Time::new(false, self.hour as u32, self.minute, self.second, self.micro)
    }

    pub(crate) fn parse_text(bytes: &[u8], target: &str) -> Result<Self> {
        let text = text_as_str(bytes, target)?;
        let (date_part, rest) = match text.split_once(' ') {
            Some((d, t)) => (d, Some(t)),
            None => (text, None),
        };
        let date = Date::parse_text(date_part.as_bytes(), target)?;

        let (hour, minute, second, micro) = match rest {
            Some(time_part) => {
                let (hms, micros) = split_fraction(time_part, text, target)?;
                let mut parts = hms.splitn(3, ':');
                let (h, m, s) = match (parts.next(), parts.next(), parts.next()) {
                    (Some(h), Some(m), Some(s)) => (h, m, s),
                    _ => return Err(bad_value(text, target)),
                };
                (
                    h.parse().map_err(|_| bad_value(text, target))?,
                    m.parse().map_err(|_| bad_value(text, target))?,
                    s.parse().map_err(|_| bad_value(text, target))?,
                    micros,
                )
            }
            None => (0, 0, 0, 0),
        };

        Ok(Self {
            year: date.year,
            month: date.month,
            day: date.day,
            hour,
            minute,
            second,
            micro,
        })
    }
}

impl fmt::Display for DateTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
            self.year, self.month, self.day, self.hour, self.minute, self.second
        )?;
        if self.micro > 0 {
            write!(f, ".{:06}", self.micro)?;
        }
        Ok(())
    }
}

impl From<&Timestamp4> for DateTime {
    fn from(ts: &Timestamp4) -> Self {
        Self {
            year: ts.year.get(),
            month: ts.month,
            day: ts.day,
            ..Self::default()
        }
    }
}

impl From<&Timestamp7> for DateTime {
    fn from(ts: &Timestamp7) -> Self {
        Self {
            year: ts.year.get(),
            month: ts.month,
            day: ts.day,
            hour: ts.hour,
            minute: ts.minute,
            second: ts.second,
            micro: 0,
        }
    }
}

impl From<&Timestamp11> for DateTime {
    fn from(ts: &Timestamp11) -> Self {
        Self {
            year: ts.year.get(),
            month: ts.month,
            day: ts.day,
            hour: ts.hour,
            minute: ts.minute,
            second: ts.second,
            micro: ts.microsecond.get(),
        }
    }
}

/// Geometry value: a 4-byte SRID followed by well-known-binary bytes.
/// The WKB itself is carried opaquely.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Geometry {
    pub srid: u32,
    pub wkb: Vec<u8>,
}

fn text_as_str<'a>(bytes: &'a [u8], target: &str) -> Result<&'a str> {
    simdutf8::basic::from_utf8(bytes)
        .map_err(|_| bad_value(String::from_utf8_lossy(bytes), target))
}

/// Split an optional `.ffffff` fraction off a temporal text value, scaling
/// it to microseconds.
fn split_fraction<'a>(body: &'a str, original: &str, target: &str) -> Result<(&'a str, u32)> {
    match body.split_once('.') {
        Some((head, frac)) => {
            if frac.is_empty() || frac.len() > 6 || !frac.bytes().all(|b| b.is_ascii_digit()) {
                return Err(bad_value(original, target));
            }
            let scale = 10_u32.pow(6 - frac.len() as u32);
            let value: u32 = frac.parse().map_err(|_| bad_value(original, target))?;
            Ok((head, value * scale))
        }
        None => Ok((body, 0)),
    }
}

#[cfg(test)]
#[path = "value_test.rs"]
mod value_test;
