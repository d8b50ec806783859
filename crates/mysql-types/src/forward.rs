//! Forward conversion: SqlValue → MySQLValue
//!
//! Values are always bound as statement parameters, never spliced into SQL.

use chrono::{Datelike, NaiveDateTime, Timelike};
use mysql_async::Value;
use sync_core::SqlValue;

/// MySQL value wrapper for type-safe conversions.
#[derive(Debug, Clone, PartialEq)]
pub struct MySQLValue(pub Value);

impl MySQLValue {
    /// Get the inner mysql_async::Value.
    pub fn into_inner(self) -> Value {
        self.0
    }
}

impl From<SqlValue> for MySQLValue {
    fn from(value: SqlValue) -> Self {
        match value {
            SqlValue::Null => MySQLValue(Value::NULL),
            SqlValue::Int(i) => MySQLValue(Value::Int(i)),
            SqlValue::UInt(u) => MySQLValue(Value::UInt(u)),
            SqlValue::Float(f) => MySQLValue(Value::Double(f)),
            SqlValue::Text(s) => MySQLValue(Value::Bytes(s.into_bytes())),
            SqlValue::Bytes(b) => MySQLValue(Value::Bytes(b)),
            SqlValue::Date(d) => MySQLValue(Value::Date(
                d.year() as u16,
                d.month() as u8,
                d.day() as u8,
                0,
                0,
                0,
                0,
            )),
            SqlValue::DateTime(dt) => MySQLValue(datetime_value(&dt)),
        }
    }
}

// MySQL stores microseconds at most.
fn datetime_value(dt: &NaiveDateTime) -> Value {
    Value::Date(
        dt.year() as u16,
        dt.month() as u8,
        dt.day() as u8,
        dt.hour() as u8,
        dt.minute() as u8,
        dt.second() as u8,
        dt.nanosecond() / 1000,
    )
}

/// Convert a parameter list for `exec`.
pub fn to_params(values: Vec<SqlValue>) -> Vec<Value> {
    values
        .into_iter()
        .map(|v| MySQLValue::from(v).into_inner())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_scalars() {
        assert_eq!(MySQLValue::from(SqlValue::Null).0, Value::NULL);
        assert_eq!(MySQLValue::from(SqlValue::Int(-4)).0, Value::Int(-4));
        assert_eq!(MySQLValue::from(SqlValue::UInt(4)).0, Value::UInt(4));
        assert_eq!(MySQLValue::from(SqlValue::Float(0.5)).0, Value::Double(0.5));
        assert_eq!(
            MySQLValue::from(SqlValue::from("hi")).0,
            Value::Bytes(b"hi".to_vec())
        );
    }

    #[test]
    fn test_datetime_keeps_microseconds() {
        let dt = NaiveDate::from_ymd_opt(2024, 3, 1)
            .unwrap()
            .and_hms_micro_opt(8, 30, 15, 123_456)
            .unwrap();
        assert_eq!(
            MySQLValue::from(SqlValue::DateTime(dt)).0,
            Value::Date(2024, 3, 1, 8, 30, 15, 123_456)
        );
    }

    #[test]
    fn test_date_is_midnight() {
        let d = NaiveDate::from_ymd_opt(1999, 12, 31).unwrap();
        assert_eq!(
            MySQLValue::from(SqlValue::Date(d)).0,
            Value::Date(1999, 12, 31, 0, 0, 0, 0)
        );
    }

    #[test]
    fn test_to_params_preserves_order() {
        let params = to_params(vec![SqlValue::from("a"), SqlValue::Int(1), SqlValue::Null]);
        assert_eq!(
            params,
            vec![Value::Bytes(b"a".to_vec()), Value::Int(1), Value::NULL]
        );
    }
}
