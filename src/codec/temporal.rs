use crate::col::ColumnDefinition;
use crate::constant::ColumnType;
use crate::error::{Result, bad_value, cannot_decode};
use crate::protocol::row::Cell;
use crate::value::{Date, DateTime, Time, Value};

use super::{Decode, null_error};

fn is_date_like(ty: ColumnType) -> bool {
    matches!(
        ty,
        ColumnType::MYSQL_TYPE_DATE
            | ColumnType::MYSQL_TYPE_NEWDATE
            | ColumnType::MYSQL_TYPE_DATETIME
            | ColumnType::MYSQL_TYPE_DATETIME2
            | ColumnType::MYSQL_TYPE_TIMESTAMP
            | ColumnType::MYSQL_TYPE_TIMESTAMP2
    )
}

fn is_string_type(ty: ColumnType) -> bool {
    matches!(
        ty,
        ColumnType::MYSQL_TYPE_VARCHAR
            | ColumnType::MYSQL_TYPE_VAR_STRING
            | ColumnType::MYSQL_TYPE_STRING
    )
}

fn text_str<'a>(bytes: &'a [u8], target: &str) -> Result<&'a str> {
    simdutf8::basic::from_utf8(bytes)
        .map_err(|_| bad_value(String::from_utf8_lossy(bytes), target))
}

impl Decode for Date {
    const TARGET: &'static str = "Date";

    fn decode(col: &ColumnDefinition, cell: Cell<'_>) -> Result<Self> {
        let ty = col.column_type();
        let accepted = is_date_like(ty) || is_string_type(ty) || ty == ColumnType::MYSQL_TYPE_YEAR;
        if !accepted {
            return Err(cannot_decode(ty, Self::TARGET));
        }

        match cell {
            Cell::Null => Err(null_error(Self::TARGET)),
            Cell::Text(bytes) => {
                if ty == ColumnType::MYSQL_TYPE_YEAR {
                    let year: u16 = text_str(bytes, Self::TARGET)?
                        .parse()
                        .map_err(|_| bad_value(String::from_utf8_lossy(bytes), Self::TARGET))?;
                    return Ok(Date::new(year, 1, 1));
                }
                // a datetime string is accepted for its date part
                let text = text_str(bytes, Self::TARGET)?;
                let date_part = text.split(' ').next().unwrap_or(text);
                Date::parse_text(date_part.as_bytes(), Self::TARGET)
            }
            Cell::Binary(value) => match value {
                Value::Timestamp0 => Ok(Date::default()),
                Value::Timestamp4(ts) => Ok(DateTime::from(ts).date()),
                Value::Timestamp7(ts) => Ok(DateTime::from(ts).date()),
                Value::Timestamp11(ts) => Ok(DateTime::from(ts).date()),
                // YEAR travels as an integer
                Value::UnsignedInt(year) => {
                    let year = u16::try_from(year).map_err(|_| bad_value(year, Self::TARGET))?;
                    Ok(Date::new(year, 1, 1))
                }
                Value::Bytes(bytes) => Date::parse_text(bytes, Self::TARGET),
                _ => Err(cannot_decode(ty, Self::TARGET)),
            },
        }
    }
}

impl Decode for Time {
    const TARGET: &'static str = "Time";

    fn decode(col: &ColumnDefinition, cell: Cell<'_>) -> Result<Self> {
        let ty = col.column_type();
        let accepted = matches!(ty, ColumnType::MYSQL_TYPE_TIME | ColumnType::MYSQL_TYPE_TIME2)
            || matches!(
                ty,
                ColumnType::MYSQL_TYPE_DATETIME
                    | ColumnType::MYSQL_TYPE_DATETIME2
                    | ColumnType::MYSQL_TYPE_TIMESTAMP
                    | ColumnType::MYSQL_TYPE_TIMESTAMP2
            )
            || is_string_type(ty);
        if !accepted {
            return Err(cannot_decode(ty, Self::TARGET));
        }

        match cell {
            Cell::Null => Err(null_error(Self::TARGET)),
            Cell::Text(bytes) => {
                if is_date_like(ty) {
                    let dt = DateTime::parse_text(bytes, Self::TARGET)?;
                    Ok(dt.time())
                } else {
                    Time::parse_text(bytes, Self::TARGET)
                }
            }
            Cell::Binary(value) => match value {
                Value::Time0 => Ok(Time::default()),
                Value::Time8(t) => Ok(Time::from(t)),
                Value::Time12(t) => Ok(Time::from(t)),
                Value::Timestamp7(ts) => Ok(DateTime::from(ts).time()),
                Value::Timestamp11(ts) => Ok(DateTime::from(ts).time()),
                Value::Timestamp0 => Ok(Time::default()),
                Value::Bytes(bytes) => Time::parse_text(bytes, Self::TARGET),
                _ => Err(cannot_decode(ty, Self::TARGET)),
            },
        }
    }
}

impl Decode for DateTime {
    const TARGET: &'static str = "Timestamp";

    fn decode(col: &ColumnDefinition, cell: Cell<'_>) -> Result<Self> {
        let ty = col.column_type();
        if !is_date_like(ty) && !is_string_type(ty) {
            return Err(cannot_decode(ty, Self::TARGET));
        }

        match cell {
            Cell::Null => Err(null_error(Self::TARGET)),
            Cell::Text(bytes) => DateTime::parse_text(bytes, Self::TARGET),
            Cell::Binary(value) => match value {
                Value::Timestamp0 => Ok(DateTime::default()),
                Value::Timestamp4(ts) => Ok(DateTime::from(ts)),
                Value::Timestamp7(ts) => Ok(DateTime::from(ts)),
                Value::Timestamp11(ts) => Ok(DateTime::from(ts)),
                Value::Bytes(bytes) => DateTime::parse_text(bytes, Self::TARGET),
                _ => Err(cannot_decode(ty, Self::TARGET)),
            },
        }
    }
}

/// TIME values and the day-plus-time span of a DATETIME. A DATETIME maps to
/// `(day - 1)` days plus its time of day, matching the original driver.
/// Negative TIME values cannot be represented.
impl Decode for std::time::Duration {
    const TARGET: &'static str = "Duration";

    fn decode(col: &ColumnDefinition, cell: Cell<'_>) -> Result<Self> {
        let ty = col.column_type();
        let accepted = matches!(ty, ColumnType::MYSQL_TYPE_TIME | ColumnType::MYSQL_TYPE_TIME2)
            || is_date_like(ty)
            || is_string_type(ty);
        if !accepted {
            return Err(cannot_decode(ty, Self::TARGET));
        }

        if matches!(ty, ColumnType::MYSQL_TYPE_TIME | ColumnType::MYSQL_TYPE_TIME2)
            || is_string_type(ty)
        {
            let time = Time::decode(col, cell)?;
            if time.negative {
                return Err(bad_value(time, Self::TARGET));
            }
            return Ok(std::time::Duration::from_micros(time.total_micros()));
        }

        let dt = DateTime::decode(col, cell)?;
        let days = dt.day.saturating_sub(1) as u64;
        let micros = ((days * 24 + dt.hour as u64) * 3600
            + dt.minute as u64 * 60
            + dt.second as u64)
            * 1_000_000
            + dt.micro as u64;
        Ok(std::time::Duration::from_micros(micros))
    }
}
