//! Typed coercion of client-supplied text and JSON into storage values.
//!
//! The column's declared [`ColumnType`] decides the Rust representation. Where one
//! column type can be backed by more than one Rust type (zoned timestamps), every
//! candidate is returned in preference order and the caller keeps the first one the
//! model accepts.

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use sea_orm::{ColumnType, Value};
use uuid::Uuid;

const DATE_FORMAT: &str = "%Y-%m-%d";
const TIME_FORMAT: &str = "%H:%M:%S%.f";
const NAIVE_DATETIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scalar {
    Bool,
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
    F32,
    F64,
    Text,
    Uuid,
    Date,
    Time,
    NaiveDateTime,
    ZonedDateTime,
    UtcDateTime,
    Json,
}

fn scalars(column_type: &ColumnType) -> &'static [Scalar] {
    match column_type {
        ColumnType::Boolean => &[Scalar::Bool],
        ColumnType::TinyInteger => &[Scalar::I8],
        ColumnType::SmallInteger => &[Scalar::I16],
        ColumnType::Integer => &[Scalar::I32],
        ColumnType::BigInteger => &[Scalar::I64],
        ColumnType::TinyUnsigned => &[Scalar::U8],
        ColumnType::SmallUnsigned => &[Scalar::U16],
        ColumnType::Unsigned => &[Scalar::U32],
        ColumnType::BigUnsigned => &[Scalar::U64],
        ColumnType::Float => &[Scalar::F32],
        ColumnType::Double => &[Scalar::F64],
        ColumnType::Uuid => &[Scalar::Uuid],
        ColumnType::Date => &[Scalar::Date],
        ColumnType::Time => &[Scalar::Time],
        ColumnType::DateTime | ColumnType::Timestamp => &[Scalar::NaiveDateTime],
        ColumnType::TimestampWithTimeZone => &[Scalar::ZonedDateTime, Scalar::UtcDateTime],
        ColumnType::Json | ColumnType::JsonBinary => &[Scalar::Json],
        _ => &[Scalar::Text],
    }
}

fn null_of(scalar: Scalar) -> Value {
    match scalar {
        Scalar::Bool => Value::Bool(None),
        Scalar::I8 => Value::TinyInt(None),
        Scalar::I16 => Value::SmallInt(None),
        Scalar::I32 => Value::Int(None),
        Scalar::I64 => Value::BigInt(None),
        Scalar::U8 => Value::TinyUnsigned(None),
        Scalar::U16 => Value::SmallUnsigned(None),
        Scalar::U32 => Value::Unsigned(None),
        Scalar::U64 => Value::BigUnsigned(None),
        Scalar::F32 => Value::Float(None),
        Scalar::F64 => Value::Double(None),
        Scalar::Text => Value::String(None),
        Scalar::Uuid => Value::Uuid(None),
        Scalar::Date => Value::ChronoDate(None),
        Scalar::Time => Value::ChronoTime(None),
        Scalar::NaiveDateTime => Value::ChronoDateTime(None),
        Scalar::ZonedDateTime => Value::ChronoDateTimeWithTimeZone(None),
        Scalar::UtcDateTime => Value::ChronoDateTimeUtc(None),
        Scalar::Json => Value::Json(None),
    }
}

fn integer<T: TryFrom<i64> + Into<Value>>(value: i64) -> Result<Value, String> {
    T::try_from(value)
        .map(Into::into)
        .map_err(|_| format!("{value} is out of range"))
}

fn unsigned<T: TryFrom<u64> + Into<Value>>(value: u64) -> Result<Value, String> {
    T::try_from(value)
        .map(Into::into)
        .map_err(|_| format!("{value} is out of range"))
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn parse_naive_datetime(raw: &str) -> Result<NaiveDateTime, String> {
    let trimmed = raw.strip_suffix('Z').unwrap_or(raw);
    NaiveDateTime::parse_from_str(trimmed, NAIVE_DATETIME_FORMAT)
        .map_err(|_| "expected a date-time formatted as YYYY-MM-DDTHH:MM:SS".to_string())
}

fn parse_zoned(raw: &str) -> Result<DateTime<FixedOffset>, String> {
    DateTime::parse_from_rfc3339(raw)
        .map_err(|_| "expected an RFC 3339 timestamp with offset".to_string())
}

fn text_to_value(scalar: Scalar, text: &str) -> Result<Value, String> {
    // Whitespace is data in text columns; it only pads scalar spellings
    let raw = text.trim();
    let signed = || raw.parse::<i64>().map_err(|_| "expected an integer".to_string());
    let natural = || {
        raw.parse::<u64>()
            .map_err(|_| "expected a non-negative integer".to_string())
    };
    match scalar {
        Scalar::Bool => parse_bool(raw)
            .map(Value::from)
            .ok_or_else(|| "expected a boolean".to_string()),
        Scalar::I8 => integer::<i8>(signed()?),
        Scalar::I16 => integer::<i16>(signed()?),
        Scalar::I32 => integer::<i32>(signed()?),
        Scalar::I64 => signed().map(Value::from),
        Scalar::U8 => unsigned::<u8>(natural()?),
        Scalar::U16 => unsigned::<u16>(natural()?),
        Scalar::U32 => unsigned::<u32>(natural()?),
        Scalar::U64 => natural().map(Value::from),
        Scalar::F32 => raw
            .parse::<f32>()
            .map(Value::from)
            .map_err(|_| "expected a number".to_string()),
        Scalar::F64 => raw
            .parse::<f64>()
            .map(Value::from)
            .map_err(|_| "expected a number".to_string()),
        Scalar::Text => Ok(Value::from(text.to_string())),
        Scalar::Uuid => Uuid::parse_str(raw)
            .map(Value::from)
            .map_err(|_| "expected a UUID".to_string()),
        Scalar::Date => NaiveDate::parse_from_str(raw, DATE_FORMAT)
            .map(Value::from)
            .map_err(|_| "expected a date formatted as YYYY-MM-DD".to_string()),
        Scalar::Time => NaiveTime::parse_from_str(raw, TIME_FORMAT)
            .map(Value::from)
            .map_err(|_| "expected a time formatted as HH:MM:SS".to_string()),
        Scalar::NaiveDateTime => parse_naive_datetime(raw).map(Value::from),
        Scalar::ZonedDateTime => parse_zoned(raw).map(Value::from),
        Scalar::UtcDateTime => parse_zoned(raw).map(|dt| Value::from(dt.with_timezone(&Utc))),
        Scalar::Json => serde_json::from_str::<serde_json::Value>(raw)
            .map(Value::from)
            .map_err(|_| "expected a JSON document".to_string()),
    }
}

fn json_to_value(scalar: Scalar, json: &serde_json::Value) -> Result<Value, String> {
    use serde_json::Value as Json;

    if json.is_null() {
        return Ok(null_of(scalar));
    }
    match (scalar, json) {
        (Scalar::Json, other) => Ok(Value::from(other.clone())),
        (Scalar::Bool, Json::Bool(b)) => Ok(Value::from(*b)),
        (Scalar::I8 | Scalar::I16 | Scalar::I32 | Scalar::I64, Json::Number(n)) => {
            let value = n.as_i64().ok_or_else(|| "expected an integer".to_string())?;
            match scalar {
                Scalar::I8 => integer::<i8>(value),
                Scalar::I16 => integer::<i16>(value),
                Scalar::I32 => integer::<i32>(value),
                _ => Ok(Value::from(value)),
            }
        }
        (Scalar::U8 | Scalar::U16 | Scalar::U32 | Scalar::U64, Json::Number(n)) => {
            let value = n
                .as_u64()
                .ok_or_else(|| "expected a non-negative integer".to_string())?;
            match scalar {
                Scalar::U8 => unsigned::<u8>(value),
                Scalar::U16 => unsigned::<u16>(value),
                Scalar::U32 => unsigned::<u32>(value),
                _ => Ok(Value::from(value)),
            }
        }
        #[allow(clippy::cast_possible_truncation)]
        (Scalar::F32, Json::Number(n)) => n
            .as_f64()
            .map(|f| Value::from(f as f32))
            .ok_or_else(|| "expected a number".to_string()),
        (Scalar::F64, Json::Number(n)) => n
            .as_f64()
            .map(Value::from)
            .ok_or_else(|| "expected a number".to_string()),
        (
            Scalar::Text
            | Scalar::Uuid
            | Scalar::Date
            | Scalar::Time
            | Scalar::NaiveDateTime
            | Scalar::ZonedDateTime
            | Scalar::UtcDateTime,
            Json::String(s),
        ) => text_to_value(scalar, s),
        (Scalar::Bool, _) => Err("expected a boolean".to_string()),
        (Scalar::Text, _) => Err("expected a string".to_string()),
        (Scalar::F32 | Scalar::F64, _) => Err("expected a number".to_string()),
        (
            Scalar::I8
            | Scalar::I16
            | Scalar::I32
            | Scalar::I64
            | Scalar::U8
            | Scalar::U16
            | Scalar::U32
            | Scalar::U64,
            _,
        ) => Err("expected an integer".to_string()),
        _ => Err("expected a string".to_string()),
    }
}

/// Coerce a query-string value for comparison against a column.
pub(crate) fn coerce_param(column_type: &ColumnType, raw: &str) -> Result<Value, String> {
    text_to_value(scalars(column_type)[0], raw)
}

/// Coerce a JSON body value into every representation the column may have.
pub(crate) fn coerce_json(
    column_type: &ColumnType,
    json: &serde_json::Value,
) -> Result<Vec<Value>, String> {
    scalars(column_type)
        .iter()
        .map(|scalar| json_to_value(*scalar, json))
        .collect()
}

/// Whether values of the column are character strings that LIKE can match.
pub(crate) fn is_text(column_type: &ColumnType) -> bool {
    matches!(
        column_type,
        ColumnType::String(_) | ColumnType::Text | ColumnType::Char(_)
    )
}

/// Interpret the value of a `__null` filter: truthy means IS NULL.
pub(crate) fn truthy(raw: &str) -> Option<bool> {
    parse_bool(raw.trim())
}
