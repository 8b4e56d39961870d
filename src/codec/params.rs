use std::fmt::Write as _;

use crate::constant::ColumnType;
use crate::error::{Error, Result};
use crate::protocol::primitive::*;
use crate::value::{Date, DateTime, Time};

/// An owned statement parameter, encodable as a binary protocol value or a
/// text literal. Parameters are owned so a recorded transaction can be
/// replayed verbatim.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Null,
    Int(i64),
    UInt(u64),
    Float(f32),
    Double(f64),
    Text(String),
    Bytes(Vec<u8>),
    Date(Date),
    Time(Time),
    DateTime(DateTime),
}

impl ParamValue {
    pub fn is_null(&self) -> bool {
        matches!(self, ParamValue::Null)
    }

    /// Wire type code and unsigned flag for the COM_STMT_EXECUTE type block.
    pub fn type_code(&self) -> (ColumnType, bool) {
        match self {
            ParamValue::Null => (ColumnType::MYSQL_TYPE_NULL, false),
            ParamValue::Int(_) => (ColumnType::MYSQL_TYPE_LONGLONG, false),
            ParamValue::UInt(_) => (ColumnType::MYSQL_TYPE_LONGLONG, true),
            ParamValue::Float(_) => (ColumnType::MYSQL_TYPE_FLOAT, false),
            ParamValue::Double(_) => (ColumnType::MYSQL_TYPE_DOUBLE, false),
            ParamValue::Text(_) => (ColumnType::MYSQL_TYPE_VAR_STRING, false),
            ParamValue::Bytes(_) => (ColumnType::MYSQL_TYPE_BLOB, false),
            ParamValue::Date(_) => (ColumnType::MYSQL_TYPE_DATE, false),
            ParamValue::Time(_) => (ColumnType::MYSQL_TYPE_TIME, false),
            ParamValue::DateTime(_) => (ColumnType::MYSQL_TYPE_DATETIME, false),
        }
    }

    /// Binary protocol encoding. NULL parameters are carried by the NULL
    /// bitmap and contribute no bytes here.
    pub fn encode_binary(&self, out: &mut Vec<u8>) {
        match self {
            ParamValue::Null => {}
            ParamValue::Int(v) => write_int_8(out, *v as u64),
            ParamValue::UInt(v) => write_int_8(out, *v),
            ParamValue::Float(v) => out.extend_from_slice(&v.to_le_bytes()),
            ParamValue::Double(v) => out.extend_from_slice(&v.to_le_bytes()),
            ParamValue::Text(v) => write_bytes_lenenc(out, v.as_bytes()),
            ParamValue::Bytes(v) => write_bytes_lenenc(out, v),
            ParamValue::Date(v) => {
                write_int_1(out, 4);
                write_int_2(out, v.year);
                write_int_1(out, v.month);
                write_int_1(out, v.day);
            }
            ParamValue::Time(v) => {
                if v.total_micros() == 0 {
                    write_int_1(out, 0);
                } else {
                    let length = if v.micros > 0 { 12 } else { 8 };
                    write_int_1(out, length);
                    write_int_1(out, v.negative as u8);
                    write_int_4(out, v.hours / 24);
                    write_int_1(out, (v.hours % 24) as u8);
                    write_int_1(out, v.minutes);
                    write_int_1(out, v.seconds);
                    if v.micros > 0 {
                        write_int_4(out, v.micros);
                    }
                }
            }
            ParamValue::DateTime(v) => {
                let length = if v.micro > 0 { 11 } else { 7 };
                write_int_1(out, length);
                write_int_2(out, v.year);
                write_int_1(out, v.month);
                write_int_1(out, v.day);
                write_int_1(out, v.hour);
                write_int_1(out, v.minute);
                write_int_1(out, v.second);
                if v.micro > 0 {
                    write_int_4(out, v.micro);
                }
            }
        }
    }

    /// Render as a SQL literal for client-side parameter substitution.
    pub fn encode_text(&self, out: &mut String) {
        match self {
            ParamValue::Null => out.push_str("NULL"),
            ParamValue::Int(v) => {
                let _ = write!(out, "{v}");
            }
            ParamValue::UInt(v) => {
                let _ = write!(out, "{v}");
            }
            ParamValue::Float(v) => {
                let _ = write!(out, "{v}");
            }
            ParamValue::Double(v) => {
                let _ = write!(out, "{v}");
            }
            ParamValue::Text(v) => {
                out.push('\'');
                escape_string_into(out, v);
                out.push('\'');
            }
            ParamValue::Bytes(v) => {
                out.push_str("X'");
                for byte in v {
                    let _ = write!(out, "{byte:02X}");
                }
                out.push('\'');
            }
            ParamValue::Date(v) => {
                let _ = write!(out, "'{v}'");
            }
            ParamValue::Time(v) => {
                let _ = write!(out, "'{v}'");
            }
            ParamValue::DateTime(v) => {
                let _ = write!(out, "'{v}'");
            }
        }
    }
}

impl From<i8> for ParamValue {
    fn from(v: i8) -> Self {
        ParamValue::Int(v as i64)
    }
}
impl From<i16> for ParamValue {
    fn from(v: i16) -> Self {
        ParamValue::Int(v as i64)
    }
}
impl From<i32> for ParamValue {
    fn from(v: i32) -> Self {
        ParamValue::Int(v as i64)
    }
}
impl From<i64> for ParamValue {
    fn from(v: i64) -> Self {
        ParamValue::Int(v)
    }
}
impl From<u8> for ParamValue {
    fn from(v: u8) -> Self {
        ParamValue::UInt(v as u64)
    }
}
impl From<u16> for ParamValue {
    fn from(v: u16) -> Self {
        ParamValue::UInt(v as u64)
    }
}
impl From<u32> for ParamValue {
    fn from(v: u32) -> Self {
        ParamValue::UInt(v as u64)
    }
}
impl From<u64> for ParamValue {
    fn from(v: u64) -> Self {
        ParamValue::UInt(v)
    }
}
impl From<f32> for ParamValue {
    fn from(v: f32) -> Self {
        ParamValue::Float(v)
    }
}
impl From<f64> for ParamValue {
    fn from(v: f64) -> Self {
        ParamValue::Double(v)
    }
}
impl From<bool> for ParamValue {
    fn from(v: bool) -> Self {
        ParamValue::Int(v as i64)
    }
}
impl From<&str> for ParamValue {
    fn from(v: &str) -> Self {
        ParamValue::Text(v.to_string())
    }
}
impl From<String> for ParamValue {
    fn from(v: String) -> Self {
        ParamValue::Text(v)
    }
}
impl From<&[u8]> for ParamValue {
    fn from(v: &[u8]) -> Self {
        ParamValue::Bytes(v.to_vec())
    }
}
impl From<Vec<u8>> for ParamValue {
    fn from(v: Vec<u8>) -> Self {
        ParamValue::Bytes(v)
    }
}
impl From<Date> for ParamValue {
    fn from(v: Date) -> Self {
        ParamValue::Date(v)
    }
}
impl From<Time> for ParamValue {
    fn from(v: Time) -> Self {
        ParamValue::Time(v)
    }
}
impl From<DateTime> for ParamValue {
    fn from(v: DateTime) -> Self {
        ParamValue::DateTime(v)
    }
}
impl<T: Into<ParamValue>> From<Option<T>> for ParamValue {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(v) => v.into(),
            None => ParamValue::Null,
        }
    }
}

/// Append `s` with the characters MySQL string literals must escape.
pub fn escape_string_into(out: &mut String, s: &str) {
    for c in s.chars() {
        match c {
            '\'' => out.push_str("\\'"),
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\0' => out.push_str("\\0"),
            '\u{1a}' => out.push_str("\\Z"),
            _ => out.push(c),
        }
    }
}

/// Substitute `?` placeholders with text literals for client-side prepared
/// statements. Placeholders inside quoted strings, identifiers or comments
/// are left alone.
pub fn substitute_params(sql: &str, params: &[ParamValue]) -> Result<String> {
    let mut out = String::with_capacity(sql.len() + params.len() * 8);
    let mut params_iter = params.iter();
    let mut chars = sql.chars().peekable();
    let mut quote: Option<char> = None;

    while let Some(c) = chars.next() {
        match quote {
            Some(q) => {
                out.push(c);
                if c == '\\' && q != '`' {
                    if let Some(escaped) = chars.next() {
                        out.push(escaped);
                    }
                } else if c == q {
                    quote = None;
                }
            }
            None => match c {
                '\'' | '"' | '`' => {
                    quote = Some(c);
                    out.push(c);
                }
                '#' => {
                    // comment to end of line
                    out.push(c);
                    for rest in chars.by_ref() {
                        out.push(rest);
                        if rest == '\n' {
                            break;
                        }
                    }
                }
                '?' => match params_iter.next() {
                    Some(param) => param.encode_text(&mut out),
                    None => {
                        return Err(Error::BadUsage(format!(
                            "missing parameter for placeholder in '{sql}'"
                        )));
                    }
                },
                _ => out.push(c),
            },
        }
    }

    if params_iter.next().is_some() {
        return Err(Error::BadUsage(format!(
            "too many parameters for statement '{sql}'"
        )));
    }

    Ok(out)
}
