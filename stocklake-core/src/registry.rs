//! Symbol registry backed by the S&P 500 constituents snapshot.

use crate::client::{FetchClient, FetchOutcome};
use crate::row::{RawRecord, Value};
use crate::store::{ParquetStore, StoreError, StoreLayout};
use crate::symbol::{dedup_symbols, Symbol};
use crate::table::Table;
use std::path::PathBuf;
use thiserror::Error;

pub const CONSTITUENTS_ENDPOINT: &str = "sp500-constituent";

/// Columns always present in the snapshot, in this order; absent values are null.
pub const CONSTITUENT_COLUMNS: [&str; 8] = [
    "symbol",
    "name",
    "sector",
    "subSector",
    "headQuarter",
    "dateFirstAdded",
    "cik",
    "founded",
];

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("constituents fetch failed: {0:?}")]
    Fetch(FetchOutcome),

    #[error("provider returned an empty constituents list")]
    Empty,

    #[error("no constituents snapshot at {0} (run `stocklake symbols` first)")]
    MissingSnapshot(PathBuf),

    #[error("constituents snapshot has no 'symbol' column")]
    MissingSymbolColumn,

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Build the snapshot table: fixed columns first, then any extra provider fields.
pub fn constituents_table(records: &[RawRecord]) -> Table {
    Table::from_rows(records.iter().map(|record| {
        let mut cells: Vec<(String, Value)> = CONSTITUENT_COLUMNS
            .iter()
            .map(|c| {
                let value = record.get(*c).map(Value::from_json).unwrap_or(Value::Null);
                (c.to_string(), value)
            })
            .collect();
        cells.extend(
            record
                .iter()
                .filter(|(k, _)| !CONSTITUENT_COLUMNS.contains(&k.as_str()))
                .map(|(k, v)| (k.clone(), Value::from_json(v))),
        );
        cells
    }))
}

/// Fetch the constituents list and atomically overwrite the snapshot.
///
/// A failed or empty fetch leaves the previous snapshot in place.
pub fn refresh_constituents(
    client: &FetchClient,
    store: &ParquetStore,
    layout: &StoreLayout,
) -> Result<usize, RegistryError> {
    let records = match client.fetch(CONSTITUENTS_ENDPOINT, None) {
        FetchOutcome::Records(records) => records,
        failure => return Err(RegistryError::Fetch(failure)),
    };
    if records.is_empty() {
        return Err(RegistryError::Empty);
    }

    let table = constituents_table(&records);
    let path = layout.constituents_file();
    store.write_table(&table, &path)?;
    tracing::info!(rows = table.height(), path = %path.display(), "constituents snapshot written");
    Ok(table.height())
}

/// Symbols from the snapshot: validated, deduplicated, sorted.
pub fn load_symbols(store: &ParquetStore, layout: &StoreLayout) -> Result<Vec<Symbol>, RegistryError> {
    let path = layout.constituents_file();
    if !path.exists() {
        return Err(RegistryError::MissingSnapshot(path));
    }
    let table = store.read_table(&path)?;
    let column = table
        .column("symbol")
        .ok_or(RegistryError::MissingSymbolColumn)?;

    let mut symbols = dedup_symbols(column.into_iter().filter_map(Value::as_text));
    symbols.sort();
    Ok(symbols)
}
