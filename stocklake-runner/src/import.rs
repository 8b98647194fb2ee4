//! Import orchestrator: fetch → normalize → merge for every symbol of a dataset,
//! on a bounded rayon pool.
//!
//! Each symbol is one task and owns exactly one target file, so merges never
//! race. A task that errors or panics is logged and counted; it never aborts
//! the batch or touches another symbol's file. Results are folded into the
//! [`BatchSummary`] in completion order.

use crate::progress::ImportProgress;
use crate::summary::{BatchSummary, SymbolOutcome};
use std::any::Any;
use std::collections::HashSet;
use std::fs;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::mpsc;
use stocklake_core::{
    DatasetDescriptor, FetchClient, FetchOutcome, ParquetStore, StoreError, StoreLayout, Symbol,
};
use thiserror::Error;

/// Per-symbol failure. Never aborts the batch.
#[derive(Debug, Error)]
pub enum ImportError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("worker panicked: {0}")]
    Panicked(String),
}

/// Failure that prevents a batch from starting.
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("worker count must be at least 1")]
    NoWorkers,

    #[error("failed to build worker pool: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),

    #[error("failed to create dataset directory {path}: {source}")]
    DatasetDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Produces raw records for one (dataset, symbol) pair. Must not fail:
/// problems are reported through the [`FetchOutcome`] variant.
pub trait RecordSource: Send + Sync {
    fn fetch(&self, dataset: &DatasetDescriptor, symbol: &Symbol) -> FetchOutcome;
}

impl RecordSource for FetchClient {
    fn fetch(&self, dataset: &DatasetDescriptor, symbol: &Symbol) -> FetchOutcome {
        self.fetch_symbol(&dataset.endpoint, symbol)
    }
}

pub struct Importer {
    source: Box<dyn RecordSource>,
    store: ParquetStore,
    layout: StoreLayout,
    workers: usize,
}

impl Importer {
    pub fn new(
        source: impl RecordSource + 'static,
        store: ParquetStore,
        layout: StoreLayout,
        workers: usize,
    ) -> Self {
        Self {
            source: Box::new(source),
            store,
            layout,
            workers,
        }
    }

    pub fn layout(&self) -> &StoreLayout {
        &self.layout
    }

    pub fn store(&self) -> &ParquetStore {
        &self.store
    }

    /// Import one dataset for `symbols` with at most `workers` tasks in flight.
    ///
    /// Repeated symbols are collapsed to their first occurrence so that no two
    /// tasks ever merge into the same file.
    pub fn import_dataset(
        &self,
        dataset: &DatasetDescriptor,
        symbols: &[Symbol],
        progress: &dyn ImportProgress,
    ) -> Result<BatchSummary, RunnerError> {
        if self.workers == 0 {
            return Err(RunnerError::NoWorkers);
        }
        let dir = self.layout.dataset_dir(&dataset.name);
        fs::create_dir_all(&dir).map_err(|source| RunnerError::DatasetDir {
            path: dir.clone(),
            source,
        })?;

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.workers)
            .thread_name(|i| format!("stocklake-worker-{i}"))
            .build()?;

        let symbols = unique_symbols(symbols);
        let total = symbols.len();
        let mut summary = BatchSummary::new(&dataset.name, total);
        tracing::info!(dataset = %dataset.name, symbols = total, workers = self.workers, "import started");

        // The fold runs on the calling thread, so a pool of one worker cannot deadlock.
        pool.in_place_scope(|scope| {
            let (tx, rx) = mpsc::channel();
            for symbol in symbols.iter().copied() {
                let tx = tx.clone();
                scope.spawn(move |_| {
                    let result = self.process_guarded(dataset, symbol);
                    // The receiver outlives every task.
                    let _ = tx.send((symbol, result));
                });
            }
            drop(tx);

            for (done, (symbol, result)) in rx.iter().enumerate() {
                match &result {
                    Ok(outcome) => summary.record(outcome),
                    Err(e) => {
                        tracing::error!(dataset = %dataset.name, %symbol, error = %e, "symbol failed, skipping");
                        summary.record_failure();
                    }
                }
                progress.on_symbol_done(&dataset.name, symbol, done + 1, total, &result);
            }
        });

        progress.on_batch_complete(&summary);
        Ok(summary)
    }

    /// Import several datasets in order over the same symbol list.
    pub fn import_all(
        &self,
        datasets: &[DatasetDescriptor],
        symbols: &[Symbol],
        progress: &dyn ImportProgress,
    ) -> Result<Vec<BatchSummary>, RunnerError> {
        datasets
            .iter()
            .map(|dataset| self.import_dataset(dataset, symbols, progress))
            .collect()
    }

    fn process_guarded(
        &self,
        dataset: &DatasetDescriptor,
        symbol: &Symbol,
    ) -> Result<SymbolOutcome, ImportError> {
        panic::catch_unwind(AssertUnwindSafe(|| self.process_symbol(dataset, symbol)))
            .unwrap_or_else(|payload| Err(ImportError::Panicked(panic_message(payload.as_ref()))))
    }

    /// Run the whole pipeline for one symbol.
    pub fn process_symbol(
        &self,
        dataset: &DatasetDescriptor,
        symbol: &Symbol,
    ) -> Result<SymbolOutcome, ImportError> {
        let records = match self.source.fetch(dataset, symbol) {
            FetchOutcome::Records(records) => records,
            FetchOutcome::Rejected { status } => return Ok(SymbolOutcome::Rejected { status }),
            FetchOutcome::Exhausted { attempts, .. } => {
                return Ok(SymbolOutcome::Exhausted { attempts })
            }
            FetchOutcome::Malformed { .. } => return Ok(SymbolOutcome::Malformed),
        };

        let normalized = dataset.normalizer.normalize(symbol, &records);
        let dropped = normalized.dropped;
        if normalized.rows.is_empty() {
            return Ok(SymbolOutcome::Empty { dropped });
        }

        let target = self.layout.symbol_file(&dataset.name, symbol);
        let merge = self
            .store
            .merge(normalized.rows, &target, &dataset.key_columns)?;

        Ok(SymbolOutcome::Merged {
            rows_added: merge.rows_added,
            dropped,
        })
    }
}

/// First occurrence of each symbol, in input order.
fn unique_symbols(symbols: &[Symbol]) -> Vec<&Symbol> {
    let mut seen = HashSet::with_capacity(symbols.len());
    symbols.iter().filter(|s| seen.insert(*s)).collect()
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
