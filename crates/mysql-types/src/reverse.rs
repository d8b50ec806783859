//! Reverse conversion: MySQL values → SqlValue
//!
//! Rows read with prepared statements arrive typed. Statements without
//! parameters go over the text protocol, where every value arrives as bytes;
//! those are parsed back according to the column type so both paths yield
//! the same `SqlValue`s.

use chrono::{NaiveDate, NaiveDateTime};
use mysql_async::consts::{ColumnFlags, ColumnType};
use mysql_async::Value;
use sync_core::{Row, SqlValue};
use thiserror::Error;

/// MySQL value with the column information needed to decode it.
#[derive(Debug, Clone)]
pub struct MySQLValueWithSchema {
    /// The raw MySQL value.
    pub value: Value,
    /// The MySQL column type.
    pub column_type: ColumnType,
    /// Column flags (e.g., UNSIGNED, BINARY).
    pub column_flags: ColumnFlags,
}

/// Error during MySQL value conversion.
#[derive(Debug, Error)]
pub enum ConversionError {
    #[error("Missing value for column '{0}'")]
    MissingColumn(String),
    #[error("Invalid date/time value: {0:?}")]
    InvalidDateTime(Value),
}

impl MySQLValueWithSchema {
    pub fn new(value: Value, column_type: ColumnType, column_flags: ColumnFlags) -> Self {
        Self {
            value,
            column_type,
            column_flags,
        }
    }

    /// Convert to SqlValue.
    pub fn to_sql_value(self) -> Result<SqlValue, ConversionError> {
        SqlValue::try_from(self)
    }

    fn is_binary(&self) -> bool {
        use ColumnType::*;
        (matches!(
            self.column_type,
            MYSQL_TYPE_TINY_BLOB
                | MYSQL_TYPE_MEDIUM_BLOB
                | MYSQL_TYPE_BLOB
                | MYSQL_TYPE_LONG_BLOB
                | MYSQL_TYPE_STRING
                | MYSQL_TYPE_VAR_STRING
                | MYSQL_TYPE_VARCHAR
        ) && self.column_flags.contains(ColumnFlags::BINARY_FLAG))
            || matches!(self.column_type, MYSQL_TYPE_GEOMETRY | MYSQL_TYPE_BIT)
    }
}

impl TryFrom<MySQLValueWithSchema> for SqlValue {
    type Error = ConversionError;

    fn try_from(mv: MySQLValueWithSchema) -> Result<Self, Self::Error> {
        let binary = mv.is_binary();
        match mv.value {
            Value::NULL => Ok(SqlValue::Null),
            Value::Int(i) => Ok(SqlValue::Int(i)),
            Value::UInt(u) => Ok(SqlValue::UInt(u)),
            Value::Float(f) => Ok(SqlValue::Float(f64::from(f))),
            Value::Double(d) => Ok(SqlValue::Float(d)),
            Value::Bytes(bytes) => {
                if binary {
                    return Ok(SqlValue::Bytes(bytes));
                }
                match String::from_utf8(bytes) {
                    Ok(s) => Ok(parse_text(s, mv.column_type, mv.column_flags)),
                    Err(e) => Ok(SqlValue::Bytes(e.into_bytes())),
                }
            }
            Value::Date(year, month, day, hour, minute, second, micros) => {
                let Some(date) = NaiveDate::from_ymd_opt(year.into(), month.into(), day.into())
                else {
                    // Zero dates ('0000-00-00') survive as text so they can be
                    // written back unchanged.
                    return Ok(SqlValue::Text(format!(
                        "{year:04}-{month:02}-{day:02} {hour:02}:{minute:02}:{second:02}"
                    )));
                };
                if matches!(
                    mv.column_type,
                    ColumnType::MYSQL_TYPE_DATE | ColumnType::MYSQL_TYPE_NEWDATE
                ) {
                    return Ok(SqlValue::Date(date));
                }
                date.and_hms_micro_opt(hour.into(), minute.into(), second.into(), micros)
                    .map(SqlValue::DateTime)
                    .ok_or(ConversionError::InvalidDateTime(Value::Date(
                        year, month, day, hour, minute, second, micros,
                    )))
            }
            Value::Time(negative, days, hours, minutes, seconds, micros) => {
                let sign = if negative { "-" } else { "" };
                let hours = u32::from(hours) + days * 24;
                let mut text = format!("{sign}{hours:02}:{minutes:02}:{seconds:02}");
                if micros != 0 {
                    text.push_str(&format!(".{micros:06}"));
                }
                Ok(SqlValue::Text(text))
            }
        }
    }
}

/// Text-protocol value for `column_type`. Anything that fails to parse stays text.
fn parse_text(s: String, column_type: ColumnType, flags: ColumnFlags) -> SqlValue {
    use ColumnType::*;
    match column_type {
        MYSQL_TYPE_TINY | MYSQL_TYPE_SHORT | MYSQL_TYPE_INT24 | MYSQL_TYPE_LONG
        | MYSQL_TYPE_LONGLONG | MYSQL_TYPE_YEAR => {
            if flags.contains(ColumnFlags::UNSIGNED_FLAG) {
                s.parse().map(SqlValue::UInt).unwrap_or(SqlValue::Text(s))
            } else {
                s.parse().map(SqlValue::Int).unwrap_or(SqlValue::Text(s))
            }
        }
        MYSQL_TYPE_FLOAT | MYSQL_TYPE_DOUBLE => {
            s.parse().map(SqlValue::Float).unwrap_or(SqlValue::Text(s))
        }
        MYSQL_TYPE_DATE | MYSQL_TYPE_NEWDATE => NaiveDate::parse_from_str(&s, "%Y-%m-%d")
            .map(SqlValue::Date)
            .unwrap_or(SqlValue::Text(s)),
        MYSQL_TYPE_DATETIME | MYSQL_TYPE_DATETIME2 | MYSQL_TYPE_TIMESTAMP
        | MYSQL_TYPE_TIMESTAMP2 => NaiveDateTime::parse_from_str(&s, "%Y-%m-%d %H:%M:%S%.f")
            .map(SqlValue::DateTime)
            .unwrap_or(SqlValue::Text(s)),
        _ => SqlValue::Text(s),
    }
}

/// Decode a full result row into a column-name keyed `Row`.
pub fn row_to_sql_row(mut row: mysql_async::Row) -> Result<Row, ConversionError> {
    let columns = row.columns();
    let mut out = Row::new();
    for (index, column) in columns.iter().enumerate() {
        let name = column.name_str().to_string();
        let value: Value = row
            .take(index)
            .ok_or_else(|| ConversionError::MissingColumn(name.clone()))?;
        let value =
            MySQLValueWithSchema::new(value, column.column_type(), column.flags()).to_sql_value()?;
        out.insert(name, value);
    }
    Ok(out)
}
