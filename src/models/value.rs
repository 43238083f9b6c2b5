//! Cell values carried from the source to the destination

use chrono::{DateTime, NaiveDate, NaiveDateTime, SubsecRound};
use serde::{Deserialize, Serialize};

use super::column::ColumnType;

/// Fractional second digits a PostgreSQL `TIMESTAMP` keeps
const TIMESTAMP_PRECISION: u16 = 6;

/// Text layouts accepted for timestamp columns, tried in order after RFC 3339
const TIMESTAMP_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
];

/// A single cell value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum Value {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
    Boolean(bool),
    Timestamp(NaiveDateTime),
}

/// A value could not be converted into the type of its destination column
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("cannot convert {value} to {target}")]
pub struct CoercionError {
    /// Rendered source value
    pub value: String,
    /// Destination column type
    pub target: ColumnType,
}

/// Canonical, hashable form of a non-null dedup key value
///
/// Two keys compare equal when their coerced values are equal, regardless of
/// whether they were read from the source or from the destination.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct KeyValue(String);

impl KeyValue {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for KeyValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Convert this value into the value domain of a column of type `target`
    ///
    /// Integers stored in timestamp columns are read as Unix epoch
    /// milliseconds, which is how the health export stores instants.
    /// Timestamps are rounded to microseconds, the precision the destination
    /// stores. Reals outside the `i64` range are not integers.
    pub fn coerce(&self, target: ColumnType) -> Result<Value, CoercionError> {
        let coerced = match (self, target) {
            (Value::Null, _) => Some(Value::Null),

            (Value::Integer(i), ColumnType::Integer) => Some(Value::Integer(*i)),
            (Value::Real(f), ColumnType::Integer) => {
                // i64::MAX as f64 rounds up to 2^63, which is already out of range
                let in_range = *f >= i64::MIN as f64 && *f < i64::MAX as f64;
                (f.fract() == 0.0 && in_range).then(|| Value::Integer(*f as i64))
            }
            (Value::Boolean(b), ColumnType::Integer) => Some(Value::Integer(i64::from(*b))),
            (Value::Text(s), ColumnType::Integer) => s.trim().parse().ok().map(Value::Integer),

            (Value::Real(f), ColumnType::Real) => Some(Value::Real(*f)),
            (Value::Integer(i), ColumnType::Real) => Some(Value::Real(*i as f64)),
            (Value::Text(s), ColumnType::Real) => s.trim().parse().ok().map(Value::Real),

            (value, ColumnType::Text) => Some(Value::Text(value.render())),

            (Value::Boolean(b), ColumnType::Boolean) => Some(Value::Boolean(*b)),
            (Value::Integer(0), ColumnType::Boolean) => Some(Value::Boolean(false)),
            (Value::Integer(1), ColumnType::Boolean) => Some(Value::Boolean(true)),
            (Value::Text(s), ColumnType::Boolean) => parse_bool(s).map(Value::Boolean),

            (Value::Timestamp(ts), ColumnType::Timestamp) => Some(timestamp(*ts)),
            (Value::Integer(ms), ColumnType::Timestamp) => {
                DateTime::from_timestamp_millis(*ms).map(|dt| timestamp(dt.naive_utc()))
            }
            (Value::Text(s), ColumnType::Timestamp) => parse_timestamp(s).map(timestamp),

            (Value::Blob(b), ColumnType::Blob) => Some(Value::Blob(b.clone())),
            (Value::Text(s), ColumnType::Blob) => Some(Value::Blob(s.as_bytes().to_vec())),

            _ => None,
        };

        coerced.ok_or_else(|| CoercionError {
            value: self.render(),
            target,
        })
    }

    /// Canonical key for duplicate detection, `None` for a null value
    ///
    /// Callers must coerce source values to the destination key column type
    /// first so that both sides render identically.
    pub fn dedup_key(&self) -> Option<KeyValue> {
        match self {
            Value::Null => None,
            // Display is the shortest exact form; -0.0 == 0.0 so fold the sign
            Value::Real(f) if *f == 0.0 => Some(KeyValue("r:0".to_string())),
            Value::Real(f) => Some(KeyValue(format!("r:{}", f))),
            Value::Integer(i) => Some(KeyValue(format!("i:{}", i))),
            Value::Text(s) => Some(KeyValue(format!("t:{}", s))),
            Value::Boolean(b) => Some(KeyValue(format!("b:{}", b))),
            Value::Timestamp(ts) => Some(KeyValue(format!(
                "ts:{}",
                ts.format("%Y-%m-%dT%H:%M:%S%.f")
            ))),
            Value::Blob(b) => Some(KeyValue(format!("x:{}", hex(b)))),
        }
    }

    /// Human-readable rendering, also used for text coercion
    pub fn render(&self) -> String {
        match self {
            Value::Null => "NULL".to_string(),
            Value::Integer(i) => i.to_string(),
            Value::Real(f) => f.to_string(),
            Value::Text(s) => s.clone(),
            Value::Boolean(b) => b.to_string(),
            Value::Timestamp(ts) => ts.format("%Y-%m-%d %H:%M:%S%.f").to_string(),
            Value::Blob(b) => match std::str::from_utf8(b) {
                Ok(s) => s.to_string(),
                Err(_) => format!("\\x{}", hex(b)),
            },
        }
    }
}

impl From<rusqlite::types::ValueRef<'_>> for Value {
    fn from(value: rusqlite::types::ValueRef<'_>) -> Self {
        use rusqlite::types::ValueRef;

        match value {
            ValueRef::Null => Value::Null,
            ValueRef::Integer(i) => Value::Integer(i),
            ValueRef::Real(f) => Value::Real(f),
            ValueRef::Text(s) => Value::Text(String::from_utf8_lossy(s).to_string()),
            ValueRef::Blob(b) => Value::Blob(b.to_vec()),
        }
    }
}

fn timestamp(ts: NaiveDateTime) -> Value {
    Value::Timestamp(ts.round_subsecs(TIMESTAMP_PRECISION))
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_lowercase().as_str() {
        "true" | "t" | "1" | "yes" | "y" => Some(true),
        "false" | "f" | "0" | "no" | "n" => Some(false),
        _ => None,
    }
}

fn parse_timestamp(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.naive_utc());
    }
    for format in TIMESTAMP_FORMATS {
        if let Ok(ts) = NaiveDateTime::parse_from_str(s, format) {
            return Some(ts);
        }
    }

    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").unwrap()
    }

    #[test]
    fn test_null_coerces_to_null_for_every_type() {
        for target in [
            ColumnType::Integer,
            ColumnType::Real,
            ColumnType::Text,
            ColumnType::Timestamp,
            ColumnType::Boolean,
            ColumnType::Blob,
        ] {
            assert_eq!(Value::Null.coerce(target).unwrap(), Value::Null);
        }
    }

    #[test]
    fn test_integer_coercions() {
        assert_eq!(
            Value::Text(" 42 ".into()).coerce(ColumnType::Integer).unwrap(),
            Value::Integer(42)
        );
        assert_eq!(
            Value::Real(3.0).coerce(ColumnType::Integer).unwrap(),
            Value::Integer(3)
        );
        assert!(Value::Real(3.5).coerce(ColumnType::Integer).is_err());
        assert!(Value::Text("abc".into()).coerce(ColumnType::Integer).is_err());
    }

    #[test]
    fn test_text_accepts_everything() {
        assert_eq!(
            Value::Integer(7).coerce(ColumnType::Text).unwrap(),
            Value::Text("7".into())
        );
        assert_eq!(
            Value::Blob(b"abc".to_vec()).coerce(ColumnType::Text).unwrap(),
            Value::Text("abc".into())
        );
        assert_eq!(
            Value::Blob(vec![0xff, 0x00]).coerce(ColumnType::Text).unwrap(),
            Value::Text("\\xff00".into())
        );
    }

    #[test]
    fn test_boolean_coercions() {
        assert_eq!(
            Value::Integer(1).coerce(ColumnType::Boolean).unwrap(),
            Value::Boolean(true)
        );
        assert_eq!(
            Value::Text("No".into()).coerce(ColumnType::Boolean).unwrap(),
            Value::Boolean(false)
        );
        assert!(Value::Integer(2).coerce(ColumnType::Boolean).is_err());
    }

    #[test]
    fn test_timestamp_from_text_layouts() {
        let expected = ts("2024-01-02 03:04:05");
        for input in [
            "2024-01-02 03:04:05",
            "2024-01-02T03:04:05",
            "2024-01-02T03:04:05Z",
            "2024-01-02T04:04:05+01:00",
        ] {
            assert_eq!(
                Value::Text(input.into())
                    .coerce(ColumnType::Timestamp)
                    .unwrap(),
                Value::Timestamp(expected),
                "layout {}",
                input
            );
        }

        assert_eq!(
            Value::Text("2024-01-01".into())
                .coerce(ColumnType::Timestamp)
                .unwrap(),
            Value::Timestamp(ts("2024-01-01 00:00:00"))
        );
    }

    #[test]
    fn test_timestamp_from_epoch_millis() {
        assert_eq!(
            Value::Integer(1_704_067_200_000)
                .coerce(ColumnType::Timestamp)
                .unwrap(),
            Value::Timestamp(ts("2024-01-01 00:00:00"))
        );
    }

    #[test]
    fn test_unconvertible_timestamp_is_an_error() {
        let err = Value::Text("yesterday".into())
            .coerce(ColumnType::Timestamp)
            .unwrap_err();
        assert_eq!(err.target, ColumnType::Timestamp);
        assert_eq!(err.value, "yesterday");
    }

    #[test]
    fn test_dedup_key_null_has_no_key() {
        assert!(Value::Null.dedup_key().is_none());
    }

    #[test]
    fn test_dedup_key_matches_after_coercion() {
        let from_source = Value::Text("2024-01-01T00:00:00Z".into())
            .coerce(ColumnType::Timestamp)
            .unwrap();
        let from_destination = Value::Timestamp(ts("2024-01-01 00:00:00"));
        assert_eq!(from_source.dedup_key(), from_destination.dedup_key());

        assert_ne!(
            Value::Integer(1).dedup_key(),
            Value::Text("1".into()).dedup_key()
        );
    }

    #[test]
    fn test_out_of_range_real_is_not_an_integer() {
        assert!(Value::Real(1e20).coerce(ColumnType::Integer).is_err());
        assert!(Value::Real(-1e20).coerce(ColumnType::Integer).is_err());
        assert!(Value::Real(9_223_372_036_854_775_807.0)
            .coerce(ColumnType::Integer)
            .is_err());
        assert_eq!(
            Value::Real(-9_223_372_036_854_775_808.0)
                .coerce(ColumnType::Integer)
                .unwrap(),
            Value::Integer(i64::MIN)
        );
        assert!(Value::Real(f64::INFINITY).coerce(ColumnType::Integer).is_err());
        assert!(Value::Real(f64::NAN).coerce(ColumnType::Integer).is_err());
    }

    #[test]
    fn test_large_reals_keep_distinct_keys() {
        assert_ne!(Value::Real(1e20).dedup_key(), Value::Real(2e20).dedup_key());
        assert_ne!(Value::Real(1e19).dedup_key(), Value::Real(2e19).dedup_key());
        assert_eq!(
            Value::Real(1e20).dedup_key().unwrap().as_str(),
            "r:100000000000000000000"
        );
        assert_eq!(Value::Real(3.0).dedup_key().unwrap().as_str(), "r:3");
        assert_eq!(Value::Real(-0.0).dedup_key(), Value::Real(0.0).dedup_key());
    }

    #[test]
    fn test_timestamps_round_to_microseconds() {
        let from_source = Value::Text("2024-01-01 00:00:00.1234567".into())
            .coerce(ColumnType::Timestamp)
            .unwrap();
        let stored = NaiveDateTime::parse_from_str(
            "2024-01-01 00:00:00.123457",
            "%Y-%m-%d %H:%M:%S%.f",
        )
        .unwrap();

        assert_eq!(from_source, Value::Timestamp(stored));
        assert_eq!(
            from_source.dedup_key(),
            Value::Timestamp(stored)
                .coerce(ColumnType::Timestamp)
                .unwrap()
                .dedup_key()
        );
    }
}
