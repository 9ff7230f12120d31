//! Coercion of raw source values into declared field types.
//!
//! Raw values arrive as `serde_json::Value`: environment variables are always
//! strings, YAML leaves keep their scalar type, and runtime settings backends
//! may hand back anything. Coercion is deliberately loose. Numeric fields
//! parse the leading number of a string and fall back to zero when there is
//! none (`"abc"` becomes `0`), which matches long-standing deployments rather
//! than validating input.

use crate::error::SettingsError;
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::Serialize;
use serde_json::Value as RawValue;
use std::fmt;
use std::str::FromStr;
use tracing::warn;

/// Strings (compared case-insensitively) that coerce to `false`.
const FALSE_STRINGS: &[&str] = &["0", "f", "false", "off"];

/// Date/time layouts with an explicit offset, tried after RFC 3339 and RFC 2822.
const OFFSET_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S %z",
    "%Y-%m-%d %H:%M:%S%.f %z",
    "%Y-%m-%d %H:%M:%S%z",
];

/// Layouts without an offset; these are interpreted as UTC.
const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
];

/// The declared type of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    #[default]
    String,
    Symbol,
    Integer,
    Float,
    Boolean,
    #[serde(rename = "datetime")]
    DateTime,
    Array,
}

impl FieldType {
    pub const ALL: [FieldType; 7] = [
        FieldType::String,
        FieldType::Symbol,
        FieldType::Integer,
        FieldType::Float,
        FieldType::Boolean,
        FieldType::DateTime,
        FieldType::Array,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FieldType::String => "string",
            FieldType::Symbol => "symbol",
            FieldType::Integer => "integer",
            FieldType::Float => "float",
            FieldType::Boolean => "boolean",
            FieldType::DateTime => "datetime",
            FieldType::Array => "array",
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FieldType {
    type Err = SettingsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        FieldType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| SettingsError::InvalidType(s.to_string()))
    }
}

/// A coerced setting value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    String(String),
    Symbol(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
    DateTime(DateTime<Utc>),
    Array(Vec<String>),
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) | Value::Symbol(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_datetime(&self) -> Option<DateTime<Utc>> {
        match self {
            Value::DateTime(t) => Some(*t),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[String]> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    /// Convert back into the raw representation accepted by [`coerce`].
    pub fn to_raw(&self) -> RawValue {
        match self {
            Value::String(s) | Value::Symbol(s) => RawValue::String(s.clone()),
            Value::Integer(i) => RawValue::from(*i),
            Value::Float(f) => RawValue::from(*f),
            Value::Boolean(b) => RawValue::Bool(*b),
            Value::DateTime(t) => RawValue::String(t.to_rfc3339()),
            Value::Array(items) => {
                RawValue::Array(items.iter().cloned().map(RawValue::String).collect())
            }
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::String(s) | Value::Symbol(s) => f.write_str(s),
            Value::Integer(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", x),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::DateTime(t) => f.write_str(&t.to_rfc3339()),
            Value::Array(items) => write!(f, "{}", items.join(",")),
        }
    }
}

/// Extraction of a concrete Rust type from a coerced [`Value`].
pub trait FromValue: Sized {
    fn from_value(value: Value) -> Option<Self>;
}

impl FromValue for Value {
    fn from_value(value: Value) -> Option<Self> {
        Some(value)
    }
}

impl FromValue for String {
    fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::String(s) | Value::Symbol(s) => Some(s),
            _ => None,
        }
    }
}

impl FromValue for i64 {
    fn from_value(value: Value) -> Option<Self> {
        value.as_i64()
    }
}

impl FromValue for f64 {
    fn from_value(value: Value) -> Option<Self> {
        value.as_f64()
    }
}

impl FromValue for bool {
    fn from_value(value: Value) -> Option<Self> {
        value.as_bool()
    }
}

impl FromValue for DateTime<Utc> {
    fn from_value(value: Value) -> Option<Self> {
        value.as_datetime()
    }
}

impl FromValue for Vec<String> {
    fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }
}

/// Returns true if the value is null or an empty string, sequence, or map.
///
/// `false` and `0` are not blank.
pub fn is_blank(raw: &RawValue) -> bool {
    match raw {
        RawValue::Null => true,
        RawValue::String(s) => s.is_empty(),
        RawValue::Array(items) => items.is_empty(),
        RawValue::Object(map) => map.is_empty(),
        RawValue::Bool(_) | RawValue::Number(_) => false,
    }
}

pub fn is_present(raw: &RawValue) -> bool {
    !is_blank(raw)
}

/// True for numbers and strings that look like `-12` or `3.5`.
pub fn is_numeric(raw: &RawValue) -> bool {
    match raw {
        RawValue::Number(_) => true,
        RawValue::String(s) => is_numeric_str(s),
        _ => false,
    }
}

fn is_numeric_str(s: &str) -> bool {
    let digits = s.strip_prefix('-').unwrap_or(s);
    let (int_part, frac_part) = match digits.split_once('.') {
        Some((i, f)) => (i, Some(f)),
        None => (digits, None),
    };
    let all_digits = |p: &str| !p.is_empty() && p.bytes().all(|b| b.is_ascii_digit());
    all_digits(int_part) && frac_part.is_none_or(all_digits)
}

/// Coerce a raw value to the given type.
///
/// Null always coerces to `None`. Other blank input coerces to `None`,
/// except for arrays where blank input yields an empty array.
pub fn coerce(raw: &RawValue, field_type: FieldType) -> Option<Value> {
    if raw.is_null() {
        return None;
    }
    if field_type == FieldType::Array {
        return Some(Value::Array(array(raw)));
    }
    if is_blank(raw) {
        return None;
    }

    match field_type {
        FieldType::String => Some(Value::String(raw_to_string(raw))),
        FieldType::Symbol => Some(Value::Symbol(raw_to_string(raw))),
        FieldType::Integer => Some(Value::Integer(integer(raw))),
        FieldType::Float => Some(Value::Float(float(raw))),
        FieldType::Boolean => boolean(raw).map(Value::Boolean),
        FieldType::DateTime => datetime(raw).map(Value::DateTime),
        FieldType::Array => Some(Value::Array(array(raw))),
    }
}

/// Cast variations of booleans (`"true"`, `"off"`, `1`, `0`, ...) to a bool.
///
/// Only the integer `0` is false among numbers; `0.0` is true.
pub fn boolean(raw: &RawValue) -> Option<bool> {
    if is_blank(raw) {
        return None;
    }
    let value = match raw {
        RawValue::Bool(b) => *b,
        RawValue::Number(n) => n.as_i64() != Some(0),
        RawValue::String(s) => !FALSE_STRINGS.iter().any(|f| s.eq_ignore_ascii_case(f)),
        _ => true,
    };
    Some(value)
}

/// Integer coercion. Strings parse their leading integer, or zero.
pub fn integer(raw: &RawValue) -> i64 {
    match raw {
        RawValue::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .unwrap_or_default(),
        other => leading_integer(&raw_to_string(other)),
    }
}

/// Float coercion. Strings parse their leading decimal number, or zero.
pub fn float(raw: &RawValue) -> f64 {
    match raw {
        RawValue::Number(n) => n.as_f64().unwrap_or_default(),
        other => leading_float(&raw_to_string(other)),
    }
}

/// Timestamp coercion. Numbers are epoch seconds; strings are parsed as
/// RFC 3339, RFC 2822, or a handful of common layouts. Results are in UTC.
pub fn datetime(raw: &RawValue) -> Option<DateTime<Utc>> {
    if is_blank(raw) {
        return None;
    }
    if is_numeric(raw) {
        return epoch_seconds(float(raw));
    }

    let text = raw_to_string(raw);
    let parsed = parse_datetime(text.trim());
    if parsed.is_none() {
        warn!(value = %text, "Unable to parse timestamp");
    }
    parsed
}

/// Array coercion. Sequences stringify each element; strings are parsed as a
/// single comma separated line.
pub fn array(raw: &RawValue) -> Vec<String> {
    match raw {
        RawValue::Null => Vec::new(),
        RawValue::Array(items) => items.iter().map(raw_to_string).collect(),
        RawValue::String(s) if s.is_empty() => Vec::new(),
        RawValue::String(s) => parse_csv_line(s),
        other => vec![raw_to_string(other)],
    }
}

/// Split one line of comma separated values.
///
/// Commas inside double quotes do not split, quote characters are dropped,
/// and a backslash adds the next character literally. Each element is
/// trimmed of surrounding whitespace.
pub fn parse_csv_line(line: &str) -> Vec<String> {
    let mut values = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars();

    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                if let Some(escaped) = chars.next() {
                    current.push(escaped);
                }
            }
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => {
                values.push(current.trim().to_string());
                current.clear();
            }
            _ => current.push(c),
        }
    }
    values.push(current.trim().to_string());
    values
}

/// String form of a raw value. Null is the empty string and structured
/// values are rendered as JSON.
pub fn raw_to_string(raw: &RawValue) -> String {
    match raw {
        RawValue::Null => String::new(),
        RawValue::String(s) => s.clone(),
        RawValue::Bool(b) => b.to_string(),
        RawValue::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

fn leading_integer(s: &str) -> i64 {
    let s = s.trim_start();
    let (negative, rest) = match s.as_bytes().first() {
        Some(b'-') => (true, &s[1..]),
        Some(b'+') => (false, &s[1..]),
        _ => (false, s),
    };

    let mut value: i64 = 0;
    let mut prev_digit = false;
    for b in rest.bytes() {
        match b {
            b'0'..=b'9' => {
                let digit = i64::from(b - b'0');
                value = value
                    .saturating_mul(10)
                    .saturating_add(if negative { -digit } else { digit });
                prev_digit = true;
            }
            b'_' if prev_digit => prev_digit = false,
            _ => break,
        }
    }
    value
}

fn leading_float(s: &str) -> f64 {
    let s = s.trim_start();
    let bytes = s.as_bytes();
    let mut end = 0;

    if matches!(bytes.first(), Some(b'-' | b'+')) {
        end += 1;
    }
    let int_start = end;
    while end < bytes.len() && bytes[end].is_ascii_digit() {
        end += 1;
    }
    let mut has_digits = end > int_start;

    if end < bytes.len() && bytes[end] == b'.' {
        let frac_start = end + 1;
        let mut frac_end = frac_start;
        while frac_end < bytes.len() && bytes[frac_end].is_ascii_digit() {
            frac_end += 1;
        }
        if frac_end > frac_start {
            end = frac_end;
            has_digits = true;
        }
    }
    if !has_digits {
        return 0.0;
    }

    if end < bytes.len() && matches!(bytes[end], b'e' | b'E') {
        let mut exp_end = end + 1;
        if matches!(bytes.get(exp_end), Some(b'-' | b'+')) {
            exp_end += 1;
        }
        let digits_start = exp_end;
        while exp_end < bytes.len() && bytes[exp_end].is_ascii_digit() {
            exp_end += 1;
        }
        if exp_end > digits_start {
            end = exp_end;
        }
    }

    s[..end].parse().unwrap_or_default()
}

fn epoch_seconds(seconds: f64) -> Option<DateTime<Utc>> {
    if !seconds.is_finite() {
        return None;
    }
    let whole = seconds.floor();
    let nanos = ((seconds - whole) * 1_000_000_000.0).round().min(999_999_999.0) as u32;
    DateTime::from_timestamp(whole as i64, nanos)
}

fn parse_datetime(text: &str) -> Option<DateTime<Utc>> {
    if let Ok(t) = DateTime::parse_from_rfc3339(text) {
        return Some(t.with_timezone(&Utc));
    }
    if let Ok(t) = DateTime::parse_from_rfc2822(text) {
        return Some(t.with_timezone(&Utc));
    }
    for format in OFFSET_FORMATS {
        if let Ok(t) = DateTime::parse_from_str(text, format) {
            return Some(t.with_timezone(&Utc));
        }
    }
    for format in NAIVE_FORMATS {
        if let Ok(t) = NaiveDateTime::parse_from_str(text, format) {
            return Some(Utc.from_utc_datetime(&t));
        }
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|t| Utc.from_utc_datetime(&t))
}
