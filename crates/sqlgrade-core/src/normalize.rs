//! Canonical string form of result rows.
//!
//! Every non-null cell becomes a string chosen so that values the database
//! considers equal serialize identically: decimals keep their declared scale
//! (`12.5` and `12.50` in a `NUMERIC(10,2)` column both become `"12.50"`),
//! booleans are `"true"`/`"false"`, dates are ISO `YYYY-MM-DD`. SQL `NULL`
//! stays a real null marker, never the string `"null"`.

use crate::model::{ColumnMeta, ColumnType, Dialect, ResultRow, Value};
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::ser::{Serialize, SerializeMap, Serializer};
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedRow {
    cells: Vec<(String, Option<String>)>,
}

impl NormalizedRow {
    pub fn new(cells: Vec<(String, Option<String>)>) -> Self {
        Self { cells }
    }

    pub fn cells(&self) -> &[(String, Option<String>)] {
        &self.cells
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// `None` if the column is absent; `Some(None)` for a null cell.
    pub fn get(&self, column: &str) -> Option<Option<&str>> {
        self.cells
            .iter()
            .find(|(c, _)| c == column)
            .map(|(_, v)| v.as_deref())
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.cells.iter().map(|(c, _)| c.as_str())
    }

    /// Same cells with keys sorted, for order-insensitive column comparison.
    pub fn sorted(&self) -> NormalizedRow {
        let mut cells = self.cells.clone();
        cells.sort_by(|a, b| a.0.cmp(&b.0));
        NormalizedRow { cells }
    }

    /// Serialization with sorted keys. Two rows are equal iff their keys are.
    pub fn canonical_key(&self) -> String {
        serde_json::to_string(&self.sorted()).unwrap_or_default()
    }

    /// JSON object in engine column order.
    pub fn to_json(&self) -> serde_json::Value {
        let mut map = serde_json::Map::new();
        for (c, v) in &self.cells {
            map.insert(
                c.clone(),
                v.as_ref()
                    .map(|s| serde_json::Value::String(s.clone()))
                    .unwrap_or(serde_json::Value::Null),
            );
        }
        serde_json::Value::Object(map)
    }
}

impl Serialize for NormalizedRow {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.cells.len()))?;
        for (c, v) in &self.cells {
            map.serialize_entry(c, v)?;
        }
        map.end()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Normalizer {
    dialect: Dialect,
}

impl Normalizer {
    pub fn new(dialect: Dialect) -> Self {
        Self { dialect }
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    pub fn normalize(&self, row: &ResultRow) -> NormalizedRow {
        NormalizedRow::new(
            row.iter()
                .map(|(col, v)| (col.name.clone(), self.normalize_value(v, col.ty)))
                .collect(),
        )
    }

    pub fn normalize_all(&self, rows: &[ResultRow]) -> Vec<NormalizedRow> {
        rows.iter().map(|r| self.normalize(r)).collect()
    }

    /// Re-applies the type rules to an already normalized row, reading every
    /// cell as text. Columns not present in `types` are left untouched.
    /// Idempotent: canonical input comes back unchanged.
    pub fn renormalize(&self, row: &NormalizedRow, types: &HashMap<&str, ColumnType>) -> NormalizedRow {
        NormalizedRow::new(
            row.cells()
                .iter()
                .map(|(c, v)| {
                    let out = match (v, types.get(c.as_str())) {
                        (Some(s), Some(ty)) => self.normalize_value(&Value::Text(s.clone()), *ty),
                        (other, _) => other.clone(),
                    };
                    (c.clone(), out)
                })
                .collect(),
        )
    }

    pub fn normalize_value(&self, value: &Value, ty: ColumnType) -> Option<String> {
        if value.is_null() {
            return None;
        }
        let out = match ty {
            ColumnType::Boolean => bool_form(value),
            ColumnType::Decimal { scale } => decimal_form(value, scale),
            ColumnType::Integer => integer_form(value),
            ColumnType::Float => float_form(value),
            ColumnType::Date => date_form(value),
            ColumnType::Timestamp => self.timestamp_form(value),
            ColumnType::Text | ColumnType::Blob | ColumnType::Unknown => None,
        };
        Some(out.unwrap_or_else(|| plain_form(value)))
    }

    fn timestamp_form(&self, value: &Value) -> Option<String> {
        let Value::Text(s) = value else {
            return None;
        };
        parse_timestamp(s).map(|ts| ts.format(self.dialect.timestamp_format()).to_string())
    }
}

/// Column types, keyed by name, for [`Normalizer::renormalize`].
pub fn type_map(columns: &[ColumnMeta]) -> HashMap<&str, ColumnType> {
    columns.iter().map(|c| (c.name.as_str(), c.ty)).collect()
}

fn plain_form(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Bool(b) => b.to_string(),
        Value::Integer(i) => i.to_string(),
        Value::Real(f) => format_f64(*f),
        Value::Text(s) => s.clone(),
        Value::Blob(b) => format!("\\x{}", hex::encode(b)),
    }
}

fn bool_form(value: &Value) -> Option<String> {
    let b = match value {
        Value::Bool(b) => *b,
        Value::Integer(i) => *i != 0,
        Value::Real(f) => *f != 0.0,
        Value::Text(s) => match s.trim().to_ascii_lowercase().as_str() {
            "t" | "true" | "1" | "yes" | "y" | "on" => true,
            "f" | "false" | "0" | "no" | "n" | "off" => false,
            _ => return None,
        },
        _ => return None,
    };
    Some(b.to_string())
}

fn decimal_form(value: &Value, scale: Option<u32>) -> Option<String> {
    match value {
        Value::Integer(i) => canonical_decimal(&i.to_string(), scale),
        Value::Real(f) if f.is_finite() => match scale {
            Some(s) => canonical_decimal(&format!("{:.*}", s as usize, f), Some(s)),
            None => Some(format_f64(*f)),
        },
        Value::Text(s) => canonical_decimal(s, scale),
        _ => None,
    }
}

fn integer_form(value: &Value) -> Option<String> {
    match value {
        Value::Integer(i) => Some(i.to_string()),
        Value::Real(f) => Some(format_f64(*f)),
        Value::Text(s) => canonical_decimal(s, None),
        Value::Bool(b) => Some(if *b { "1" } else { "0" }.to_string()),
        _ => None,
    }
}

fn float_form(value: &Value) -> Option<String> {
    match value {
        Value::Integer(i) => Some(i.to_string()),
        Value::Real(f) => Some(format_f64(*f)),
        Value::Text(s) => canonical_decimal(s, None),
        _ => None,
    }
}

fn date_form(value: &Value) -> Option<String> {
    let Value::Text(s) = value else {
        return None;
    };
    let t = s.trim();
    if let Ok(d) = NaiveDate::parse_from_str(t, "%Y-%m-%d") {
        return Some(d.format("%Y-%m-%d").to_string());
    }
    parse_timestamp(t).map(|ts| ts.date().format("%Y-%m-%d").to_string())
}

fn parse_timestamp(s: &str) -> Option<NaiveDateTime> {
    let t = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(t) {
        return Some(dt.naive_utc());
    }
    for fmt in [
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M",
        "%Y-%m-%dT%H:%M",
    ] {
        if let Ok(ts) = NaiveDateTime::parse_from_str(t, fmt) {
            return Some(ts);
        }
    }
    NaiveDate::parse_from_str(t, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

/// Shortest round-trip decimal rendering with trailing zeros removed.
pub fn format_f64(f: f64) -> String {
    if f.is_nan() {
        return "NaN".to_string();
    }
    if f.is_infinite() {
        return if f > 0.0 { "Infinity" } else { "-Infinity" }.to_string();
    }
    let s = format!("{}", f);
    canonical_decimal(&s, None).unwrap_or(s)
}

/// Rewrites a plain decimal literal. With `Some(scale)` the fraction is padded
/// or rounded half away from zero to exactly `scale` digits; with `None`
/// trailing fractional zeros are dropped. Returns `None` for anything that is
/// not `[+-]digits[.digits]`.
pub fn canonical_decimal(raw: &str, scale: Option<u32>) -> Option<String> {
    let t = raw.trim();
    let (neg, body) = match t.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, t.strip_prefix('+').unwrap_or(t)),
    };
    let (int_part, frac_part) = body.split_once('.').unwrap_or((body, ""));
    if int_part.is_empty() && frac_part.is_empty() {
        return None;
    }
    if !int_part.bytes().all(|b| b.is_ascii_digit()) || !frac_part.bytes().all(|b| b.is_ascii_digit())
    {
        return None;
    }

    let mut int_digits: Vec<u8> = int_part.trim_start_matches('0').bytes().collect();
    let mut frac: Vec<u8> = frac_part.bytes().collect();

    match scale {
        Some(s) => {
            let s = s as usize;
            if frac.len() > s {
                let round_up = frac[s] >= b'5';
                frac.truncate(s);
                if round_up {
                    increment(&mut int_digits, &mut frac);
                }
            } else {
                frac.resize(s, b'0');
            }
        }
        None => {
            while frac.last() == Some(&b'0') {
                frac.pop();
            }
        }
    }

    if int_digits.is_empty() {
        int_digits.push(b'0');
    }
    let is_zero = int_digits.iter().chain(frac.iter()).all(|d| *d == b'0');

    let mut out = String::with_capacity(int_digits.len() + frac.len() + 2);
    if neg && !is_zero {
        out.push('-');
    }
    out.push_str(std::str::from_utf8(&int_digits).ok()?);
    if !frac.is_empty() {
        out.push('.');
        out.push_str(std::str::from_utf8(&frac).ok()?);
    }
    Some(out)
}

fn increment(int_digits: &mut Vec<u8>, frac: &mut [u8]) {
    for d in frac.iter_mut().rev() {
        if *d == b'9' {
            *d = b'0';
        } else {
            *d += 1;
            return;
        }
    }
    for d in int_digits.iter_mut().rev() {
        if *d == b'9' {
            *d = b'0';
        } else {
            *d += 1;
            return;
        }
    }
    int_digits.insert(0, b'1');
}
