//! Raw provider records → [`NormalizedRow`]s.
//!
//! Coercion never fails a batch: bad values become `Null`, and records without
//! a parseable `date` are dropped and counted. The row symbol is always the
//! symbol the records were fetched for.

use crate::row::{
    coerce_date, coerce_float, coerce_int, NormalizedRow, RawRecord, Value, DATE, FISCAL_YEAR,
    PERIOD, SYMBOL,
};
use crate::symbol::Symbol;
use serde::{Deserialize, Serialize};

/// Date-like fields coerced to dates by the default transform.
pub const DATE_FIELDS: [&str; 3] = [DATE, "filingDate", "acceptedDate"];

/// Columns kept by the prices transform, all coerced to floats.
pub const PRICE_FIELDS: [&str; 5] = ["adjOpen", "adjHigh", "adjLow", "adjClose", "volume"];

/// Rows produced from one batch of records.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Normalized {
    pub rows: Vec<NormalizedRow>,
    /// Records (or exploded segment rows) discarded for a missing/unparseable date.
    pub dropped: usize,
}

impl Normalized {
    fn push(&mut self, row: Option<NormalizedRow>) {
        match row {
            Some(row) => self.rows.push(row),
            None => self.dropped += 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Normalizer {
    /// Keep every field; coerce date-like fields and `fiscalYear`.
    Passthrough,
    /// Keep only adjusted OHLC and volume.
    Prices,
    /// Explode the nested `data` mapping into one row per segment.
    RevenueSegments,
}

impl Normalizer {
    pub fn normalize(&self, symbol: &Symbol, records: &[RawRecord]) -> Normalized {
        let mut out = Normalized::default();
        for record in records {
            match self {
                Normalizer::Passthrough => out.push(passthrough(symbol, record)),
                Normalizer::Prices => out.push(prices(symbol, record)),
                Normalizer::RevenueSegments => segments(symbol, record, &mut out),
            }
        }
        out
    }
}

fn record_date(record: &RawRecord) -> Option<chrono::NaiveDate> {
    record.get(DATE).and_then(coerce_date)
}

fn passthrough(symbol: &Symbol, record: &RawRecord) -> Option<NormalizedRow> {
    let mut row = NormalizedRow::new(symbol.clone(), record_date(record)?);
    for (name, raw) in record {
        let value = match name.as_str() {
            SYMBOL | DATE => continue,
            FISCAL_YEAR => coerce_int(raw).map(Value::Int).unwrap_or(Value::Null),
            field if DATE_FIELDS.contains(&field) => {
                coerce_date(raw).map(Value::Date).unwrap_or(Value::Null)
            }
            _ => Value::from_json(raw),
        };
        row.set(name.as_str(), value);
    }
    Some(row)
}

fn prices(symbol: &Symbol, record: &RawRecord) -> Option<NormalizedRow> {
    let mut row = NormalizedRow::new(symbol.clone(), record_date(record)?);
    for field in PRICE_FIELDS {
        let value = record
            .get(field)
            .and_then(coerce_float)
            .map(Value::Float)
            .unwrap_or(Value::Null);
        row.set(field, value);
    }
    Some(row)
}

fn segments(symbol: &Symbol, record: &RawRecord, out: &mut Normalized) {
    let Some(serde_json::Value::Object(data)) = record.get("data") else {
        return;
    };
    if data.is_empty() {
        return;
    }
    let Some(date) = record_date(record) else {
        out.dropped += data.len();
        return;
    };

    let currency = record
        .get("reportedCurrency")
        .map(Value::from_json)
        .unwrap_or(Value::Null);
    let period = record.get(PERIOD).map(Value::from_json).unwrap_or(Value::Null);
    let fiscal_year = record
        .get(FISCAL_YEAR)
        .and_then(coerce_int)
        .map(Value::Int)
        .unwrap_or(Value::Null);

    for (segment, revenue) in data {
        let revenue = coerce_float(revenue).map(Value::Float).unwrap_or(Value::Null);
        let mut row = NormalizedRow::new(symbol.clone(), date).with_segment(segment.as_str());
        row.set(PERIOD, period.clone());
        row.set(FISCAL_YEAR, fiscal_year.clone());
        row.set("reportedCurrency", currency.clone());
        row.set("revenue", revenue);
        out.rows.push(row);
    }
}
