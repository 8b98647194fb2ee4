//! Stocklake Runner: import orchestration.
//!
//! This crate builds on `stocklake-core` to provide:
//! - The bounded worker pool that runs fetch → normalize → merge per symbol
//! - Per-symbol failure isolation (errors and panics)
//! - Batch summaries and progress reporting

pub mod import;
pub mod progress;
pub mod summary;

pub use import::{ImportError, Importer, RecordSource, RunnerError};
pub use progress::{ImportProgress, LogProgress, NoProgress};
pub use summary::{BatchSummary, SymbolOutcome};
