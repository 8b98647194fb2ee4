//! Dataset descriptors: endpoint, natural key and normalizer per dataset.

use crate::normalize::Normalizer;
use crate::row::{DATE, PERIOD, SEGMENT, SYMBOL};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetDescriptor {
    /// Directory name under `parquet/`, also used in logs and summaries.
    pub name: String,
    /// Endpoint path relative to the provider base URL.
    pub endpoint: String,
    /// Natural key used for dedup during merge.
    pub key_columns: Vec<String>,
    pub normalizer: Normalizer,
}

pub const PRICES: &str = "prices";
pub const BALANCE_SHEET: &str = "balance_sheet";
pub const INCOME_STATEMENT: &str = "income_statement";
pub const KEY_METRICS: &str = "key_metrics";
pub const RATIOS: &str = "ratios";
pub const REVENUE_SEGMENTS: &str = "revenue_segments";

/// Fundamentals datasets in import order.
pub const FUNDAMENTALS: [&str; 5] = [
    BALANCE_SHEET,
    INCOME_STATEMENT,
    KEY_METRICS,
    RATIOS,
    REVENUE_SEGMENTS,
];

impl DatasetDescriptor {
    pub fn new(
        name: impl Into<String>,
        endpoint: impl Into<String>,
        key_columns: &[&str],
        normalizer: Normalizer,
    ) -> Self {
        Self {
            name: name.into(),
            endpoint: endpoint.into(),
            key_columns: key_columns.iter().map(|c| c.to_string()).collect(),
            normalizer,
        }
    }

    pub fn prices() -> Self {
        Self::new(
            PRICES,
            "historical-price-eod/dividend-adjusted",
            &[SYMBOL, DATE],
            Normalizer::Prices,
        )
    }

    pub fn balance_sheet() -> Self {
        Self::statement(BALANCE_SHEET, "balance-sheet-statement")
    }

    pub fn income_statement() -> Self {
        Self::statement(INCOME_STATEMENT, "income-statement")
    }

    pub fn key_metrics() -> Self {
        Self::statement(KEY_METRICS, "key-metrics")
    }

    pub fn ratios() -> Self {
        Self::statement(RATIOS, "ratios")
    }

    pub fn revenue_segments() -> Self {
        Self::new(
            REVENUE_SEGMENTS,
            "revenue-product-segmentation",
            &[SYMBOL, DATE, SEGMENT],
            Normalizer::RevenueSegments,
        )
    }

    fn statement(name: &str, endpoint: &str) -> Self {
        Self::new(name, endpoint, &[SYMBOL, DATE, PERIOD], Normalizer::Passthrough)
    }

    /// Look up a built-in dataset by name.
    pub fn by_name(name: &str) -> Option<Self> {
        match name {
            PRICES => Some(Self::prices()),
            BALANCE_SHEET => Some(Self::balance_sheet()),
            INCOME_STATEMENT => Some(Self::income_statement()),
            KEY_METRICS => Some(Self::key_metrics()),
            RATIOS => Some(Self::ratios()),
            REVENUE_SEGMENTS => Some(Self::revenue_segments()),
            _ => None,
        }
    }

    pub fn fundamentals() -> Vec<Self> {
        FUNDAMENTALS.iter().filter_map(|n| Self::by_name(n)).collect()
    }

    pub fn all() -> Vec<Self> {
        std::iter::once(Self::prices())
            .chain(Self::fundamentals())
            .collect()
    }

    /// Names of every built-in dataset.
    pub fn names() -> Vec<&'static str> {
        std::iter::once(PRICES).chain(FUNDAMENTALS).collect()
    }
}
