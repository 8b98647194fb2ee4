//! Stocklake Core: symbols, rate limiting, fetching, normalization and parquet storage.
//!
//! This crate contains the per-symbol building blocks of the import pipeline:
//! - Validated ticker symbols (the storage partition key)
//! - A sliding-window rate limiter shared by every worker
//! - A retrying fetch client behind a transport seam
//! - Normalizers from raw provider JSON to typed rows
//! - The parquet upsert-merge store with atomic replace
//! - The constituents registry and read-only dataset views

pub mod client;
pub mod config;
pub mod dataset;
pub mod limiter;
pub mod normalize;
pub mod registry;
pub mod row;
pub mod store;
pub mod symbol;
pub mod table;
pub mod view;

pub use client::{FetchClient, FetchOutcome, ReqwestTransport, RetryPolicy, Transport};
pub use config::{ConfigError, ImportConfig};
pub use dataset::DatasetDescriptor;
pub use limiter::RateLimiter;
pub use normalize::{Normalized, Normalizer};
pub use row::{NormalizedRow, RawRecord, Value};
pub use store::{MergeResult, ParquetStore, StoreError, StoreLayout};
pub use symbol::{Symbol, SymbolError};
pub use view::{DatasetStats, DatasetView};

#[cfg(test)]
mod tests {
    use super::*;

    /// Everything shared across worker threads must be Send + Sync.
    #[allow(dead_code)]
    fn assert_send_sync() {
        fn require_send_sync<T: Send + Sync>() {}

        require_send_sync::<FetchClient>();
        require_send_sync::<RateLimiter>();
        require_send_sync::<ParquetStore>();
        require_send_sync::<DatasetDescriptor>();
        require_send_sync::<NormalizedRow>();
        require_send_sync::<FetchOutcome>();
    }
}
