//! Column values as read from and written to the replicated databases.
//!
//! `SqlValue` is deliberately small: it carries what MySQL hands back over
//! the binary protocol and what peers send as JSON. Rows are keyed by column
//! name so they serialize as plain JSON objects for the push/pull API.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

use base64::{engine::general_purpose, Engine as _};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Timelike};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// A row keyed by column name.
pub type Row = BTreeMap<String, SqlValue>;

const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const DATETIME_FRACTION_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";
const DATE_FORMAT: &str = "%Y-%m-%d";
const BINARY_KEY_PREFIX: &str = "base64:";

/// A single column value.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Int(i64),
    UInt(u64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
}

impl SqlValue {
    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }

    /// String form used for primary keys in the metadata store and for key
    /// equality across sides (an `Int(7)` and a `Text("7")` are the same key).
    ///
    /// Bytes that are not valid UTF-8 are written as `base64:<standard base64>`
    /// so distinct binary keys never share a string form.
    pub fn to_key_string(&self) -> String {
        match self {
            SqlValue::Null => String::new(),
            SqlValue::Int(i) => i.to_string(),
            SqlValue::UInt(u) => u.to_string(),
            SqlValue::Float(f) => f.to_string(),
            SqlValue::Text(s) => s.clone(),
            SqlValue::Bytes(b) => match std::str::from_utf8(b) {
                Ok(s) => s.to_string(),
                Err(_) => format!("{BINARY_KEY_PREFIX}{}", general_purpose::STANDARD.encode(b)),
            },
            SqlValue::Date(d) => d.format(DATE_FORMAT).to_string(),
            SqlValue::DateTime(dt) => format_datetime(dt),
        }
    }

    /// Interpret the value as a point in time.
    ///
    /// Text is accepted in MySQL (`2024-01-31 10:00:00[.ffffff]`), ISO 8601
    /// and RFC 3339 form, since rows pushed by peers arrive as JSON strings.
    pub fn as_datetime(&self) -> Option<NaiveDateTime> {
        match self {
            SqlValue::DateTime(dt) => Some(*dt),
            SqlValue::Date(d) => d.and_hms_opt(0, 0, 0),
            SqlValue::Text(s) => parse_datetime(s),
            SqlValue::Bytes(b) => std::str::from_utf8(b).ok().and_then(parse_datetime),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            SqlValue::Int(i) => Some(*i as f64),
            SqlValue::UInt(u) => Some(*u as f64),
            SqlValue::Float(f) => Some(*f),
            SqlValue::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            SqlValue::Int(i) => Some(*i),
            SqlValue::UInt(u) => i64::try_from(*u).ok(),
            SqlValue::Float(f) if f.fract() == 0.0 => Some(*f as i64),
            SqlValue::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Non-negative integer view, as used for counters read back from MySQL
    /// (`SUM()` arrives as a decimal string).
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            SqlValue::UInt(u) => Some(*u),
            SqlValue::Text(s) => s.trim().parse::<f64>().ok().and_then(|f| {
                (f >= 0.0 && f.fract() == 0.0).then_some(f as u64)
            }),
            other => other.as_i64().and_then(|i| u64::try_from(i).ok()),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            SqlValue::Text(s) => Some(s),
            SqlValue::Bytes(b) => std::str::from_utf8(b).ok(),
            _ => None,
        }
    }

    /// Order two non-null version values (typically the timestamp column).
    ///
    /// Both sides are compared as date-times when both parse as such, then
    /// as numbers, and finally by their string form.
    pub fn version_cmp(&self, other: &SqlValue) -> Ordering {
        if let (Some(a), Some(b)) = (self.as_datetime(), other.as_datetime()) {
            return a.cmp(&b);
        }
        if let (Some(a), Some(b)) = (self.as_f64(), other.as_f64()) {
            return a.partial_cmp(&b).unwrap_or(Ordering::Equal);
        }
        self.to_key_string().cmp(&other.to_key_string())
    }

    /// JSON form used on the wire between environments.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            SqlValue::Null => serde_json::Value::Null,
            SqlValue::Int(i) => serde_json::Value::from(*i),
            SqlValue::UInt(u) => serde_json::Value::from(*u),
            SqlValue::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            SqlValue::Text(s) => serde_json::Value::String(s.clone()),
            SqlValue::Bytes(b) => match std::str::from_utf8(b) {
                Ok(s) => serde_json::Value::String(s.to_string()),
                Err(_) => serde_json::Value::Array(
                    b.iter().map(|byte| serde_json::Value::from(*byte)).collect(),
                ),
            },
            SqlValue::Date(_) | SqlValue::DateTime(_) => {
                serde_json::Value::String(self.to_key_string())
            }
        }
    }
}

fn format_datetime(dt: &NaiveDateTime) -> String {
    if dt.nanosecond() == 0 {
        dt.format(DATETIME_FORMAT).to_string()
    } else {
        dt.format(DATETIME_FRACTION_FORMAT).to_string()
    }
}

fn parse_datetime(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f"))
        .ok()
        .or_else(|| {
            DateTime::parse_from_rfc3339(s)
                .ok()
                .map(|dt| dt.naive_utc())
        })
        .or_else(|| {
            NaiveDate::parse_from_str(s, DATE_FORMAT)
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

/// Serde helpers for `NaiveDateTime` fields in MySQL text form
/// (`2024-01-31 10:00:00`), as used in API payloads and stats records.
pub mod mysql_datetime {
    use super::*;
    use serde::de::Error;

    pub fn serialize<S: Serializer>(
        value: &NaiveDateTime,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format_datetime(value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<NaiveDateTime, D::Error> {
        let s = String::deserialize(deserializer)?;
        parse_datetime(&s).ok_or_else(|| D::Error::custom(format!("invalid datetime: {s}")))
    }
}

/// Like [`mysql_datetime`] for optional fields.
pub mod mysql_datetime_option {
    use super::*;
    use serde::de::Error;

    pub fn serialize<S: Serializer>(
        value: &Option<NaiveDateTime>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(dt) => serializer.serialize_str(&format_datetime(dt)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<NaiveDateTime>, D::Error> {
        match Option::<String>::deserialize(deserializer)? {
            Some(s) => parse_datetime(&s)
                .map(Some)
                .ok_or_else(|| D::Error::custom(format!("invalid datetime: {s}"))),
            None => Ok(None),
        }
    }
}

impl fmt::Display for SqlValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqlValue::Null => f.write_str("NULL"),
            other => f.write_str(&other.to_key_string()),
        }
    }
}

impl From<serde_json::Value> for SqlValue {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => SqlValue::Null,
            serde_json::Value::Bool(b) => SqlValue::Int(i64::from(b)),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    SqlValue::Int(i)
                } else if let Some(u) = n.as_u64() {
                    SqlValue::UInt(u)
                } else {
                    n.as_f64().map(SqlValue::Float).unwrap_or(SqlValue::Null)
                }
            }
            serde_json::Value::String(s) => SqlValue::Text(s),
            serde_json::Value::Array(items) => {
                let bytes: Option<Vec<u8>> = items
                    .iter()
                    .map(|item| item.as_u64().and_then(|n| u8::try_from(n).ok()))
                    .collect();
                match bytes {
                    Some(bytes) if !items.is_empty() => SqlValue::Bytes(bytes),
                    _ => SqlValue::Text(serde_json::Value::Array(items).to_string()),
                }
            }
            obj @ serde_json::Value::Object(_) => SqlValue::Text(obj.to_string()),
        }
    }
}

impl Serialize for SqlValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for SqlValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        serde_json::Value::deserialize(deserializer).map(SqlValue::from)
    }
}

impl From<i64> for SqlValue {
    fn from(value: i64) -> Self {
        SqlValue::Int(value)
    }
}

impl From<i32> for SqlValue {
    fn from(value: i32) -> Self {
        SqlValue::Int(i64::from(value))
    }
}

impl From<u64> for SqlValue {
    fn from(value: u64) -> Self {
        SqlValue::UInt(value)
    }
}

impl From<u32> for SqlValue {
    fn from(value: u32) -> Self {
        SqlValue::UInt(u64::from(value))
    }
}

impl From<f64> for SqlValue {
    fn from(value: f64) -> Self {
        SqlValue::Float(value)
    }
}

impl From<bool> for SqlValue {
    fn from(value: bool) -> Self {
        SqlValue::Int(i64::from(value))
    }
}

impl From<&str> for SqlValue {
    fn from(value: &str) -> Self {
        SqlValue::Text(value.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(value: String) -> Self {
        SqlValue::Text(value)
    }
}

impl From<NaiveDate> for SqlValue {
    fn from(value: NaiveDate) -> Self {
        SqlValue::Date(value)
    }
}

impl From<NaiveDateTime> for SqlValue {
    fn from(value: NaiveDateTime) -> Self {
        SqlValue::DateTime(value)
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(SqlValue::Null)
    }
}
