//! Progress reporting for import batches.

use crate::import::ImportError;
use crate::summary::{BatchSummary, SymbolOutcome};
use stocklake_core::Symbol;

/// Callback interface for batch progress.
///
/// Called from the thread that drives the batch, in completion order.
pub trait ImportProgress: Send + Sync {
    /// Called when one symbol finishes; `done` counts finished symbols so far.
    fn on_symbol_done(
        &self,
        dataset: &str,
        symbol: &Symbol,
        done: usize,
        total: usize,
        result: &Result<SymbolOutcome, ImportError>,
    );

    /// Called once, after every symbol has finished.
    fn on_batch_complete(&self, summary: &BatchSummary);
}

/// Reports through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogProgress;

impl ImportProgress for LogProgress {
    fn on_symbol_done(
        &self,
        dataset: &str,
        symbol: &Symbol,
        done: usize,
        total: usize,
        result: &Result<SymbolOutcome, ImportError>,
    ) {
        match result {
            Ok(SymbolOutcome::Merged { rows_added, .. }) => {
                tracing::debug!(dataset, %symbol, done, total, rows_added, "merged");
            }
            Ok(outcome) => {
                tracing::debug!(dataset, %symbol, done, total, ?outcome, "no rows written");
            }
            // Failures are already logged at error level by the importer.
            Err(_) => {}
        }
    }

    fn on_batch_complete(&self, summary: &BatchSummary) {
        tracing::info!(
            dataset = %summary.dataset,
            symbols_total = summary.symbols_total,
            symbols_done = summary.symbols_done,
            rows_added = summary.rows_added,
            files_touched = summary.files_touched,
            symbols_empty = summary.symbols_empty,
            symbols_failed = summary.symbols_failed,
            fetch_rejected = summary.fetch_rejected,
            fetch_exhausted = summary.fetch_exhausted,
            fetch_malformed = summary.fetch_malformed,
            rows_dropped = summary.rows_dropped,
            "import complete"
        );
    }
}

/// Discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl ImportProgress for NoProgress {
    fn on_symbol_done(
        &self,
        _dataset: &str,
        _symbol: &Symbol,
        _done: usize,
        _total: usize,
        _result: &Result<SymbolOutcome, ImportError>,
    ) {
    }

    fn on_batch_complete(&self, _summary: &BatchSummary) {}
}
