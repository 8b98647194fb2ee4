//! Record and row types shared by the normalizer and the parquet store.
//!
//! - [`RawRecord`]: a loosely-typed JSON object as received from the provider.
//! - [`Value`]: one typed cell. Coercion failures become [`Value::Null`], never errors.
//! - [`NormalizedRow`]: typed key fields plus ordered, named optional fields.

use crate::symbol::Symbol;
use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime};
use std::fmt;

/// A provider record before normalization.
pub type RawRecord = serde_json::Map<String, serde_json::Value>;

/// Reserved column names for the typed key fields of a [`NormalizedRow`].
pub const SYMBOL: &str = "symbol";
pub const DATE: &str = "date";
pub const PERIOD: &str = "period";
pub const FISCAL_YEAR: &str = "fiscalYear";
pub const SEGMENT: &str = "segment";

/// Days between 0001-01-01 (CE day 1) and 1970-01-01.
const UNIX_EPOCH_FROM_CE: i32 = 719_163;

/// One typed cell.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Date(NaiveDate),
}

impl Value {
    /// Best-effort conversion of a JSON value. Nested arrays/objects are kept as JSON text.
    pub fn from_json(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(*b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => n.as_f64().map(Value::Float).unwrap_or(Value::Null),
            },
            serde_json::Value::String(s) => Value::Text(s.clone()),
            nested => Value::Text(nested.to_string()),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Float(f) if f.fract() == 0.0 && f.is_finite() => Some(*f as i64),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_date(&self) -> Option<NaiveDate> {
        match self {
            Value::Date(d) => Some(*d),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Render any non-null value as text (used when a column mixes kinds).
    pub fn to_text(&self) -> Option<String> {
        match self {
            Value::Null => None,
            Value::Text(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }

    /// Canonical string used for key comparison during dedup.
    pub(crate) fn key_repr(&self) -> String {
        match self {
            Value::Null => "\u{0}null".to_string(),
            other => other.to_string(),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::Text(s) => f.write_str(s),
            Value::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
        }
    }
}

// ── Coercion ────────────────────────────────────────────────────────

/// Parse a date-like JSON value. Unparseable input yields `None`.
///
/// Accepts `YYYY-MM-DD`, `YYYY-MM-DD HH:MM:SS` and RFC 3339 timestamps.
pub fn coerce_date(value: &serde_json::Value) -> Option<NaiveDate> {
    let s = value.as_str()?.trim();
    if let Ok(d) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Some(d);
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return Some(dt.date());
    }
    DateTime::parse_from_rfc3339(s).ok().map(|dt| dt.date_naive())
}

/// Coerce to a nullable integer: integral numbers or numeric strings.
pub fn coerce_int(value: &serde_json::Value) -> Option<i64> {
    match value {
        serde_json::Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
        serde_json::Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>().ok().or_else(|| {
                s.parse::<f64>()
                    .ok()
                    .filter(|f| f.is_finite() && f.fract() == 0.0)
                    .map(|f| f as i64)
            })
        }
        _ => None,
    }
}

/// Coerce to a nullable float: numbers or numeric strings.
pub fn coerce_float(value: &serde_json::Value) -> Option<f64> {
    match value {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().parse::<f64>().ok().filter(|f| f.is_finite()),
        _ => None,
    }
}

pub(crate) fn date_to_epoch_days(date: NaiveDate) -> i32 {
    date.num_days_from_ce() - UNIX_EPOCH_FROM_CE
}

pub(crate) fn date_from_epoch_days(days: i32) -> Option<NaiveDate> {
    NaiveDate::from_num_days_from_ce_opt(days.checked_add(UNIX_EPOCH_FROM_CE)?)
}

// ── NormalizedRow ───────────────────────────────────────────────────

/// A typed row keyed by symbol/date and, where the dataset has them,
/// period/fiscal year/segment.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedRow {
    pub symbol: Symbol,
    pub date: NaiveDate,
    pub period: Option<String>,
    pub fiscal_year: Option<i64>,
    pub segment: Option<String>,
    fields: Vec<(String, Value)>,
}

impl NormalizedRow {
    pub fn new(symbol: Symbol, date: NaiveDate) -> Self {
        Self {
            symbol,
            date,
            period: None,
            fiscal_year: None,
            segment: None,
            fields: Vec::new(),
        }
    }

    pub fn with_period(mut self, period: impl Into<String>) -> Self {
        self.period = Some(period.into());
        self
    }

    pub fn with_segment(mut self, segment: impl Into<String>) -> Self {
        self.segment = Some(segment.into());
        self
    }

    pub fn with_field(mut self, name: impl Into<String>, value: Value) -> Self {
        self.set(name, value);
        self
    }

    /// Set a non-key field, replacing any previous value under the same name.
    ///
    /// Reserved key names are routed to the typed fields.
    pub fn set(&mut self, name: impl Into<String>, value: Value) {
        let name = name.into();
        match name.as_str() {
            PERIOD => self.period = value.to_text(),
            FISCAL_YEAR => self.fiscal_year = value.as_i64(),
            SEGMENT => self.segment = value.to_text(),
            SYMBOL | DATE => {}
            _ => match self.fields.iter_mut().find(|(n, _)| *n == name) {
                Some((_, slot)) => *slot = value,
                None => self.fields.push((name, value)),
            },
        }
    }

    /// Look up any column, key or not. Absent columns read as `Null`.
    pub fn get(&self, column: &str) -> Value {
        match column {
            SYMBOL => Value::Text(self.symbol.to_string()),
            DATE => Value::Date(self.date),
            PERIOD => self.period.clone().map(Value::Text).unwrap_or(Value::Null),
            FISCAL_YEAR => self.fiscal_year.map(Value::Int).unwrap_or(Value::Null),
            SEGMENT => self.segment.clone().map(Value::Text).unwrap_or(Value::Null),
            _ => self
                .fields
                .iter()
                .find(|(n, _)| n == column)
                .map(|(_, v)| v.clone())
                .unwrap_or(Value::Null),
        }
    }

    /// Non-key fields in insertion order.
    pub fn fields(&self) -> &[(String, Value)] {
        &self.fields
    }

    /// All populated cells: key columns first, then fields.
    pub fn cells(&self) -> Vec<(String, Value)> {
        let mut cells = Vec::with_capacity(self.fields.len() + 5);
        cells.push((SYMBOL.to_string(), Value::Text(self.symbol.to_string())));
        cells.push((DATE.to_string(), Value::Date(self.date)));
        if let Some(p) = &self.period {
            cells.push((PERIOD.to_string(), Value::Text(p.clone())));
        }
        if let Some(y) = self.fiscal_year {
            cells.push((FISCAL_YEAR.to_string(), Value::Int(y)));
        }
        if let Some(s) = &self.segment {
            cells.push((SEGMENT.to_string(), Value::Text(s.clone())));
        }
        cells.extend(self.fields.iter().cloned());
        cells
    }

    /// Rebuild a row from stored cells. Returns `None` if symbol or date is missing/invalid.
    pub fn from_cells(cells: impl IntoIterator<Item = (String, Value)>) -> Option<Self> {
        let mut symbol = None;
        let mut date = None;
        let mut rest = Vec::new();
        for (name, value) in cells {
            match name.as_str() {
                SYMBOL => symbol = value.as_text().and_then(|s| Symbol::parse(s).ok()),
                DATE => date = value.as_date(),
                _ => rest.push((name, value)),
            }
        }
        let mut row = NormalizedRow::new(symbol?, date?);
        for (name, value) in rest {
            row.set(name, value);
        }
        Some(row)
    }

    /// Key tuple used for dedup.
    pub(crate) fn key(&self, key_columns: &[String]) -> Vec<String> {
        key_columns.iter().map(|c| self.get(c).key_repr()).collect()
    }
}
