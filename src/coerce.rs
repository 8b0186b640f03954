// =====================================================
// TYPE COERCION BETWEEN JSON INPUT AND ENGINE VALUES
// =====================================================
//
// Two conversion paths exist on purpose and are NOT unified:
//  - the string-input CRUD path (`convert_text`) degrades to the raw string
//    whenever a parse fails, so a bad value reaches the driver unchanged;
//  - the JSON-input routine/query path (`convert_json_param`) applies a
//    strict per-type table and rejects unparseable values.
//
// The midnight-narrowing rule and the JSON-parameter detection live here so
// every engine applies them identically.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use serde_json::Value;
use uuid::Uuid;

use crate::dialect::Dialect;
use crate::error::{GatewayError, Result};

// --- Scalar Values ---

/// A typed scalar ready to bind as a statement parameter.
#[derive(Clone, Debug, PartialEq)]
pub enum SqlValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
    Time(NaiveTime),
    Uuid(Uuid),
    /// JSON document serialized to text.
    Json(String),
    Bytes(Vec<u8>),
}

impl SqlValue {
    /// Direct mapping from a JSON literal, with no type hints: numbers stay
    /// numbers, structured values become JSON text.
    pub fn from_json_literal(value: &Value) -> SqlValue {
        match value {
            Value::Null => SqlValue::Null,
            Value::Bool(b) => SqlValue::Bool(*b),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    SqlValue::Int(i)
                } else {
                    SqlValue::Float(n.as_f64().unwrap_or(0.0))
                }
            }
            Value::String(s) => SqlValue::Text(s.clone()),
            other => SqlValue::Json(other.to_string()),
        }
    }
}

// --- Engine Type Families ---

fn base_type(type_name: &str) -> String {
    // strip any "(n)" suffix the catalog may carry, e.g. varchar(120)
    let lower = type_name.trim().to_lowercase();
    match lower.split_once('(') {
        Some((head, _)) => head.trim().to_string(),
        None => lower,
    }
}

pub fn is_integer_type(dialect: Dialect, type_name: &str) -> bool {
    let t = base_type(type_name);
    match dialect {
        Dialect::Postgres => {
            matches!(t.as_str(), "integer" | "int" | "int4" | "bigint" | "int8" | "smallint" | "int2")
        }
        Dialect::MySql => matches!(
            t.as_str(),
            "int" | "integer" | "bigint" | "smallint" | "tinyint" | "mediumint"
        ),
        Dialect::SqlServer => matches!(t.as_str(), "int" | "bigint" | "smallint" | "tinyint"),
    }
}

pub fn is_decimal_type(_dialect: Dialect, type_name: &str) -> bool {
    matches!(base_type(type_name).as_str(), "decimal" | "numeric" | "money" | "smallmoney")
}

pub fn is_float_type(dialect: Dialect, type_name: &str) -> bool {
    let t = base_type(type_name);
    match dialect {
        Dialect::Postgres => {
            matches!(t.as_str(), "real" | "float4" | "double precision" | "float8")
        }
        Dialect::MySql => matches!(t.as_str(), "float" | "double" | "real"),
        Dialect::SqlServer => matches!(t.as_str(), "float" | "real"),
    }
}

pub fn is_bool_type(dialect: Dialect, type_name: &str) -> bool {
    let t = base_type(type_name);
    match dialect {
        Dialect::Postgres => matches!(t.as_str(), "boolean" | "bool"),
        Dialect::MySql | Dialect::SqlServer => t == "bit",
    }
}

pub fn is_date_type(_dialect: Dialect, type_name: &str) -> bool {
    base_type(type_name) == "date"
}

/// Timestamp types, where a bare-date probe needs the date-cast predicate.
pub fn is_datetime_type(dialect: Dialect, type_name: &str) -> bool {
    let t = base_type(type_name);
    match dialect {
        Dialect::Postgres => matches!(
            t.as_str(),
            "timestamp" | "timestamp without time zone" | "timestamp with time zone" | "timestamptz"
        ),
        Dialect::MySql => matches!(t.as_str(), "datetime" | "timestamp"),
        Dialect::SqlServer => matches!(t.as_str(), "datetime" | "datetime2" | "smalldatetime"),
    }
}

pub fn is_time_type(_dialect: Dialect, type_name: &str) -> bool {
    matches!(
        base_type(type_name).as_str(),
        "time" | "time without time zone" | "time with time zone"
    )
}

pub fn is_uuid_type(dialect: Dialect, type_name: &str) -> bool {
    let t = base_type(type_name);
    match dialect {
        Dialect::Postgres => t == "uuid",
        Dialect::SqlServer => t == "uniqueidentifier",
        Dialect::MySql => false,
    }
}

pub fn is_text_type(dialect: Dialect, type_name: &str) -> bool {
    let t = base_type(type_name);
    match dialect {
        Dialect::Postgres => matches!(
            t.as_str(),
            "character varying" | "varchar" | "character" | "char" | "text"
        ),
        Dialect::MySql => matches!(
            t.as_str(),
            "varchar" | "char" | "text" | "tinytext" | "mediumtext" | "longtext" | "enum" | "set"
        ),
        Dialect::SqlServer => {
            matches!(t.as_str(), "varchar" | "nvarchar" | "char" | "nchar" | "text" | "ntext")
        }
    }
}

/// JSON-typed per catalog: `json`/`jsonb` where the engine has them;
/// SQL Server uses `nvarchar(max)` (catalog length -1) as its JSON carrier.
pub fn is_json_type(dialect: Dialect, type_name: &str, max_length: Option<i64>) -> bool {
    let t = base_type(type_name);
    match dialect {
        Dialect::Postgres => matches!(t.as_str(), "json" | "jsonb"),
        Dialect::MySql => t == "json",
        Dialect::SqlServer => t == "nvarchar" && max_length == Some(-1),
    }
}

// --- Date Heuristics ---

/// A bare calendar date: 10 chars, two dashes, no time separators.
pub fn is_bare_date(value: &str) -> bool {
    value.len() == 10
        && value.matches('-').count() == 2
        && !value.contains('T')
        && !value.contains(':')
}

/// Accepts ISO-8601 with `T` or space separators, optional fractional
/// seconds, optional `Z`/offset suffix, and bare dates (midnight).
pub fn parse_iso_datetime(value: &str) -> Option<NaiveDateTime> {
    let trimmed = value.trim();
    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(trimmed) {
        return Some(dt.naive_local());
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(trimmed, format) {
            return Some(dt);
        }
    }
    if let Ok(d) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
        return d.and_hms_opt(0, 0, 0);
    }
    None
}

/// The date part of an ISO string, however much time detail it carries.
pub fn extract_date_only(value: &str) -> Option<NaiveDate> {
    if let Some(dt) = parse_iso_datetime(value) {
        return Some(dt.date());
    }
    NaiveDate::parse_from_str(value.get(..10)?, "%Y-%m-%d").ok()
}

/// Narrows a midnight timestamp to a plain date. Already-narrowed dates and
/// timestamps with a real time-of-day pass through unchanged, so applying
/// this twice is a no-op.
pub fn narrow_midnight(value: SqlValue) -> SqlValue {
    match value {
        SqlValue::DateTime(dt)
            if dt.hour() == 0 && dt.minute() == 0 && dt.second() == 0 =>
        {
            SqlValue::Date(dt.date())
        }
        other => other,
    }
}

// --- JSON Parameter Detection ---

const JSON_NAME_HINTS: [&str; 4] = ["roles", "detalles", "json", "data"];

/// A routine parameter is treated as JSON when its catalog type says so,
/// when its string value is shaped like a JSON document, or when its name
/// suggests JSON and the value is shaped like one.
pub fn is_json_param(
    dialect: Dialect,
    type_name: &str,
    max_length: Option<i64>,
    param_name: &str,
    value: &Value,
) -> bool {
    if is_json_type(dialect, type_name, max_length) {
        return true;
    }
    if let Value::String(s) = value {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return false;
        }
        if trimmed.starts_with('{') || trimmed.starts_with('[') {
            return true;
        }
        let name_lower = param_name.to_lowercase();
        if JSON_NAME_HINTS.iter().any(|hint| name_lower.contains(hint))
            && (trimmed.starts_with('{') || trimmed.starts_with('['))
        {
            return true;
        }
    }
    false
}

// --- Permissive String Conversion (CRUD path) ---

fn bool_from_str(dialect: Dialect, value: &str) -> bool {
    let v = value.to_lowercase();
    match dialect {
        Dialect::Postgres => matches!(v.as_str(), "true" | "1" | "yes" | "si" | "t"),
        _ => matches!(v.as_str(), "true" | "1" | "yes" | "si"),
    }
}

/// Converts a raw string to the column's native family. A parse failure is
/// not fatal: the original text is handed to the driver unchanged.
pub fn convert_text(dialect: Dialect, raw: &str, type_name: Option<&str>) -> SqlValue {
    let type_name = match type_name {
        Some(t) => t,
        None => return SqlValue::Text(raw.to_string()),
    };

    if is_integer_type(dialect, type_name) {
        return match raw.trim().parse::<i64>() {
            Ok(v) => SqlValue::Int(v),
            Err(_) => SqlValue::Text(raw.to_string()),
        };
    }
    if is_decimal_type(dialect, type_name) || is_float_type(dialect, type_name) {
        return match raw.trim().parse::<f64>() {
            Ok(v) => SqlValue::Float(v),
            Err(_) => SqlValue::Text(raw.to_string()),
        };
    }
    if is_bool_type(dialect, type_name) {
        return SqlValue::Bool(bool_from_str(dialect, raw));
    }
    if is_uuid_type(dialect, type_name) {
        return match Uuid::parse_str(raw.trim()) {
            Ok(v) => SqlValue::Uuid(v),
            Err(_) => SqlValue::Text(raw.to_string()),
        };
    }
    if is_date_type(dialect, type_name) {
        return match extract_date_only(raw) {
            Some(d) => SqlValue::Date(d),
            None => SqlValue::Text(raw.to_string()),
        };
    }
    if is_datetime_type(dialect, type_name) {
        return match parse_iso_datetime(raw) {
            Some(dt) => SqlValue::DateTime(dt),
            None => SqlValue::Text(raw.to_string()),
        };
    }
    if is_time_type(dialect, type_name) {
        return match NaiveTime::parse_from_str(raw.trim(), "%H:%M:%S%.f") {
            Ok(t) => SqlValue::Time(t),
            Err(_) => SqlValue::Text(raw.to_string()),
        };
    }
    // text and json families carry the string through as-is
    SqlValue::Text(raw.to_string())
}

// --- Strict JSON Conversion (routine/query path) ---

fn strict_error(param_name: &str, expected: &str, value: &Value) -> GatewayError {
    GatewayError::input(format!(
        "parameter '{}' cannot be converted to {}: {}",
        param_name, expected, value
    ))
}

/// Converts a JSON-originated value to the routine parameter's native
/// family per the catalog metadata. Unlike the CRUD path this is strict:
/// unparseable values are rejected.
pub fn convert_json_param(
    dialect: Dialect,
    value: &Value,
    type_name: &str,
    max_length: Option<i64>,
    param_name: &str,
) -> Result<SqlValue> {
    if is_json_param(dialect, type_name, max_length, param_name, value) {
        return Ok(match value {
            Value::Object(_) | Value::Array(_) => SqlValue::Json(value.to_string()),
            Value::String(s) => SqlValue::Json(s.clone()),
            Value::Null => SqlValue::Null,
            other => SqlValue::Json(other.to_string()),
        });
    }

    if is_integer_type(dialect, type_name) {
        return Ok(SqlValue::Int(match value {
            Value::Null => 0,
            Value::Number(n) => n
                .as_i64()
                .or_else(|| n.as_f64().map(|f| f as i64))
                .ok_or_else(|| strict_error(param_name, "an integer", value))?,
            Value::Bool(b) => i64::from(*b),
            Value::String(s) => s
                .trim()
                .parse::<i64>()
                .map_err(|_| strict_error(param_name, "an integer", value))?,
            other => return Err(strict_error(param_name, "an integer", other)),
        }));
    }

    if is_decimal_type(dialect, type_name) || is_float_type(dialect, type_name) {
        return Ok(SqlValue::Float(match value {
            Value::Null => 0.0,
            Value::Number(n) => n
                .as_f64()
                .ok_or_else(|| strict_error(param_name, "a number", value))?,
            Value::String(s) => s
                .trim()
                .parse::<f64>()
                .map_err(|_| strict_error(param_name, "a number", value))?,
            other => return Err(strict_error(param_name, "a number", other)),
        }));
    }

    if is_bool_type(dialect, type_name) {
        return Ok(match value {
            Value::Null => SqlValue::Null,
            Value::Bool(b) => SqlValue::Bool(*b),
            Value::String(s) => SqlValue::Bool(bool_from_str(dialect, s)),
            Value::Number(n) => SqlValue::Bool(n.as_f64().map(|f| f != 0.0).unwrap_or(false)),
            other => return Err(strict_error(param_name, "a boolean", other)),
        });
    }

    if is_date_type(dialect, type_name) {
        return Ok(match value {
            Value::Null => SqlValue::Null,
            Value::String(s) => match extract_date_only(s) {
                Some(d) => SqlValue::Date(d),
                None => SqlValue::Text(s.clone()),
            },
            other => return Err(strict_error(param_name, "a date", other)),
        });
    }

    if is_datetime_type(dialect, type_name) {
        return Ok(match value {
            Value::Null => SqlValue::Null,
            Value::String(s) => match parse_iso_datetime(s) {
                Some(dt) => SqlValue::DateTime(dt),
                None => SqlValue::Text(s.clone()),
            },
            other => return Err(strict_error(param_name, "a timestamp", other)),
        });
    }

    if is_time_type(dialect, type_name) {
        return Ok(match value {
            Value::Null => SqlValue::Null,
            Value::String(s) => NaiveTime::parse_from_str(s.trim(), "%H:%M:%S%.f")
                .map(SqlValue::Time)
                .map_err(|_| strict_error(param_name, "a time", value))?,
            other => return Err(strict_error(param_name, "a time", other)),
        });
    }

    if is_uuid_type(dialect, type_name) {
        return Ok(match value {
            Value::Null => SqlValue::Null,
            Value::String(s) => Uuid::parse_str(s.trim())
                .map(SqlValue::Uuid)
                .map_err(|_| strict_error(param_name, "a uuid", value))?,
            other => return Err(strict_error(param_name, "a uuid", other)),
        });
    }

    if is_text_type(dialect, type_name) {
        return Ok(SqlValue::Text(match value {
            Value::Null => String::new(),
            Value::String(s) => s.clone(),
            Value::Bool(b) => b.to_string(),
            Value::Number(n) => n.to_string(),
            other => other.to_string(),
        }));
    }

    Ok(SqlValue::from_json_literal(value))
}

// --- Ad-hoc Parameter Sniffing ---

/// Types an ad-hoc query parameter from its JSON shape alone, before the
/// midnight narrowing is applied. Strings are sniffed as ISO timestamps,
/// integers, floats and booleans in that order.
pub fn sniff_param(value: &Value) -> SqlValue {
    match value {
        Value::String(s) if !s.is_empty() => {
            if let Some(dt) = parse_iso_datetime(s) {
                return SqlValue::DateTime(dt);
            }
            if let Ok(i) = s.trim().parse::<i64>() {
                return SqlValue::Int(i);
            }
            if let Ok(f) = s.trim().parse::<f64>() {
                return SqlValue::Float(f);
            }
            match s.to_lowercase().as_str() {
                "true" => SqlValue::Bool(true),
                "false" => SqlValue::Bool(false),
                _ => SqlValue::Text(s.clone()),
            }
        }
        other => SqlValue::from_json_literal(other),
    }
}

// --- Transport Serialization ---

pub fn date_to_json(d: NaiveDate) -> Value {
    Value::String(d.format("%Y-%m-%d").to_string())
}

pub fn datetime_to_json(dt: NaiveDateTime) -> Value {
    Value::String(dt.format("%Y-%m-%dT%H:%M:%S%.f").to_string())
}

pub fn time_to_json(t: NaiveTime) -> Value {
    Value::String(t.format("%H:%M:%S%.f").to_string())
}

/// Fixed-point values travel as doubles; the narrowing is documented and
/// accepted for transport.
pub fn decimal_to_json(d: rust_decimal::Decimal) -> Value {
    use rust_decimal::prelude::ToPrimitive;
    match d.to_f64() {
        Some(f) => serde_json::json!(f),
        None => Value::String(d.to_string()),
    }
}

pub fn bytes_to_json(bytes: &[u8]) -> Value {
    Value::String(format!("0x{}", hex::encode(bytes)))
}

pub fn uuid_to_json(u: Uuid) -> Value {
    Value::String(u.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dt(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, mo, d)
            .unwrap()
            .and_hms_opt(h, mi, s)
            .unwrap()
    }

    #[test]
    fn bare_date_detection() {
        assert!(is_bare_date("2024-01-15"));
        assert!(!is_bare_date("2024-01-15T00:00:00"));
        assert!(!is_bare_date("2024-01-15 00:00"));
        assert!(!is_bare_date("15/01/2024"));
    }

    #[test]
    fn iso_parsing_accepts_common_shapes() {
        assert_eq!(parse_iso_datetime("2024-01-15T10:30:00"), Some(dt(2024, 1, 15, 10, 30, 0)));
        assert_eq!(parse_iso_datetime("2024-01-15 10:30:00"), Some(dt(2024, 1, 15, 10, 30, 0)));
        assert_eq!(parse_iso_datetime("2024-01-15T10:30:00Z"), Some(dt(2024, 1, 15, 10, 30, 0)));
        assert_eq!(parse_iso_datetime("2024-01-15"), Some(dt(2024, 1, 15, 0, 0, 0)));
        assert_eq!(parse_iso_datetime("not a date"), None);
    }

    #[test]
    fn midnight_narrowing_applies_once_and_is_idempotent() {
        let midnight = SqlValue::DateTime(dt(2024, 1, 15, 0, 0, 0));
        let narrowed = narrow_midnight(midnight);
        let date = NaiveDate::from_ymd_opt(2024, 1, 15).unwrap();
        assert_eq!(narrowed, SqlValue::Date(date));
        // re-applying to an already-narrowed date is a no-op
        assert_eq!(narrow_midnight(narrowed.clone()), narrowed);
    }

    #[test]
    fn midnight_narrowing_keeps_real_timestamps() {
        let afternoon = SqlValue::DateTime(dt(2024, 1, 15, 14, 30, 5));
        assert_eq!(narrow_midnight(afternoon.clone()), afternoon);
    }

    #[test]
    fn json_param_detected_by_catalog_type() {
        assert!(is_json_param(Dialect::Postgres, "jsonb", None, "payload", &serde_json::json!("x")));
        assert!(is_json_param(Dialect::MySql, "json", None, "payload", &serde_json::json!("x")));
        assert!(is_json_param(
            Dialect::SqlServer,
            "nvarchar",
            Some(-1),
            "payload",
            &serde_json::json!("x")
        ));
        assert!(!is_json_param(
            Dialect::SqlServer,
            "nvarchar",
            Some(200),
            "payload",
            &serde_json::json!("x")
        ));
    }

    #[test]
    fn json_param_detected_by_content_and_name() {
        let shaped = serde_json::json!("{\"a\":1}");
        let plain = serde_json::json!("hello");
        assert!(is_json_param(Dialect::Postgres, "text", None, "detalles", &shaped));
        assert!(!is_json_param(Dialect::Postgres, "text", None, "detalles", &plain));
        // content alone is enough even without a hinted name
        assert!(is_json_param(Dialect::Postgres, "text", None, "x", &shaped));
    }

    #[test]
    fn convert_text_parses_numeric_families() {
        assert_eq!(convert_text(Dialect::Postgres, "42", Some("integer")), SqlValue::Int(42));
        assert_eq!(convert_text(Dialect::MySql, "42", Some("bigint")), SqlValue::Int(42));
        assert_eq!(
            convert_text(Dialect::SqlServer, "12.5", Some("decimal")),
            SqlValue::Float(12.5)
        );
    }

    #[test]
    fn convert_text_degrades_to_raw_string_on_parse_failure() {
        assert_eq!(
            convert_text(Dialect::Postgres, "abc", Some("integer")),
            SqlValue::Text("abc".into())
        );
        assert_eq!(
            convert_text(Dialect::MySql, "12,5", Some("decimal")),
            SqlValue::Text("12,5".into())
        );
    }

    #[test]
    fn convert_text_handles_dates_and_booleans() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        assert_eq!(convert_text(Dialect::Postgres, "2024-03-01", Some("date")), SqlValue::Date(date));
        assert_eq!(
            convert_text(Dialect::Postgres, "2024-03-01T08:00:00", Some("date")),
            SqlValue::Date(date)
        );
        assert_eq!(convert_text(Dialect::Postgres, "t", Some("boolean")), SqlValue::Bool(true));
        assert_eq!(convert_text(Dialect::MySql, "si", Some("bit")), SqlValue::Bool(true));
        assert_eq!(convert_text(Dialect::MySql, "t", Some("bit")), SqlValue::Bool(false));
    }

    #[test]
    fn convert_text_without_metadata_passes_through() {
        assert_eq!(convert_text(Dialect::Postgres, "42", None), SqlValue::Text("42".into()));
    }

    #[test]
    fn round_trip_date_through_transport_form() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let transported = date_to_json(date);
        let back = convert_text(Dialect::Postgres, transported.as_str().unwrap(), Some("date"));
        assert_eq!(back, SqlValue::Date(date));
    }

    #[test]
    fn round_trip_integer_through_transport_form() {
        let back = convert_text(Dialect::MySql, "9007", Some("int"));
        assert_eq!(back, SqlValue::Int(9007));
    }

    #[test]
    fn strict_path_defaults_nulls_per_family() {
        let null = Value::Null;
        assert_eq!(
            convert_json_param(Dialect::Postgres, &null, "integer", None, "n").unwrap(),
            SqlValue::Int(0)
        );
        assert_eq!(
            convert_json_param(Dialect::Postgres, &null, "numeric", None, "n").unwrap(),
            SqlValue::Float(0.0)
        );
        assert_eq!(
            convert_json_param(Dialect::Postgres, &null, "varchar", None, "n").unwrap(),
            SqlValue::Text(String::new())
        );
    }

    #[test]
    fn strict_path_rejects_garbage_numbers() {
        let bad = serde_json::json!("abc");
        assert!(convert_json_param(Dialect::Postgres, &bad, "integer", None, "n").is_err());
        assert!(convert_json_param(Dialect::MySql, &bad, "decimal", None, "n").is_err());
    }

    #[test]
    fn strict_path_serializes_structured_json() {
        let doc = serde_json::json!({"roles": ["admin"]});
        let converted =
            convert_json_param(Dialect::Postgres, &doc, "jsonb", None, "roles").unwrap();
        assert_eq!(converted, SqlValue::Json("{\"roles\":[\"admin\"]}".into()));
    }

    #[test]
    fn strict_path_passes_json_shaped_strings_unchanged() {
        let doc = serde_json::json!("{\"a\":1}");
        let converted =
            convert_json_param(Dialect::Postgres, &doc, "text", None, "detalles").unwrap();
        assert_eq!(converted, SqlValue::Json("{\"a\":1}".into()));
    }

    #[test]
    fn strict_path_boolean_vocabulary() {
        for word in ["true", "1", "yes", "si"] {
            let v = serde_json::json!(word);
            assert_eq!(
                convert_json_param(Dialect::MySql, &v, "bit", None, "activo").unwrap(),
                SqlValue::Bool(true),
                "word {:?}",
                word
            );
        }
        let v = serde_json::json!("no");
        assert_eq!(
            convert_json_param(Dialect::MySql, &v, "bit", None, "activo").unwrap(),
            SqlValue::Bool(false)
        );
    }

    #[test]
    fn strict_path_truncates_datetimes_for_date_targets() {
        let v = serde_json::json!("2024-05-10T00:00:00");
        assert_eq!(
            convert_json_param(Dialect::SqlServer, &v, "date", None, "fecha").unwrap(),
            SqlValue::Date(NaiveDate::from_ymd_opt(2024, 5, 10).unwrap())
        );
    }

    #[test]
    fn sniffer_types_strings_by_shape() {
        assert_eq!(sniff_param(&serde_json::json!("42")), SqlValue::Int(42));
        assert_eq!(sniff_param(&serde_json::json!("4.5")), SqlValue::Float(4.5));
        assert_eq!(sniff_param(&serde_json::json!("true")), SqlValue::Bool(true));
        assert_eq!(
            sniff_param(&serde_json::json!("2024-01-15T10:00:00")),
            SqlValue::DateTime(dt(2024, 1, 15, 10, 0, 0))
        );
        assert_eq!(sniff_param(&serde_json::json!("hello")), SqlValue::Text("hello".into()));
        assert_eq!(sniff_param(&serde_json::json!(7)), SqlValue::Int(7));
        assert_eq!(sniff_param(&Value::Null), SqlValue::Null);
    }

    #[test]
    fn sniffed_bare_date_narrows_to_date() {
        let sniffed = sniff_param(&serde_json::json!("2024-01-15"));
        assert_eq!(
            narrow_midnight(sniffed),
            SqlValue::Date(NaiveDate::from_ymd_opt(2024, 1, 15).unwrap())
        );
    }

    #[test]
    fn transport_serialization_forms() {
        assert_eq!(
            datetime_to_json(dt(2024, 1, 15, 10, 30, 0)),
            Value::String("2024-01-15T10:30:00".into())
        );
        assert_eq!(bytes_to_json(&[0xde, 0xad]), Value::String("0xdead".into()));
        let d = rust_decimal::Decimal::new(12345, 2);
        assert_eq!(decimal_to_json(d), serde_json::json!(123.45));
    }

    #[test]
    fn type_families_per_dialect() {
        assert!(is_integer_type(Dialect::Postgres, "int8"));
        assert!(is_integer_type(Dialect::MySql, "mediumint"));
        assert!(!is_integer_type(Dialect::SqlServer, "numeric"));
        assert!(is_datetime_type(Dialect::Postgres, "timestamp without time zone"));
        assert!(is_datetime_type(Dialect::SqlServer, "datetime2"));
        assert!(is_datetime_type(Dialect::MySql, "timestamp"));
        assert!(is_text_type(Dialect::MySql, "varchar(120)"));
        assert!(is_uuid_type(Dialect::Postgres, "uuid"));
        assert!(!is_uuid_type(Dialect::MySql, "uuid"));
    }
}
