//! Integration tests for batch imports: end-to-end upsert, failure isolation,
//! bounded concurrency and the real fetch client behind the worker pool.

use chrono::NaiveDate;
use serde_json::json;
use polars::prelude::DataFrame;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use stocklake_core::client::{HttpResponse, Transport, TransportError};
use stocklake_core::store::{FrameWriter, ParquetFrameWriter};
use stocklake_core::{
    DatasetDescriptor, FetchClient, FetchOutcome, NormalizedRow, ParquetStore, RateLimiter,
    RawRecord, RetryPolicy, StoreError, StoreLayout, Symbol, Value,
};
use stocklake_runner::{
    BatchSummary, ImportError, ImportProgress, Importer, NoProgress, RecordSource, SymbolOutcome,
};
use tempfile::TempDir;

fn sym(s: &str) -> Symbol {
    Symbol::parse(s).unwrap()
}

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn record(value: serde_json::Value) -> RawRecord {
    value.as_object().cloned().unwrap()
}

/// A dataset with a plain `close` column, keyed on symbol/date.
fn closes() -> DatasetDescriptor {
    DatasetDescriptor::new(
        "closes",
        "closes",
        &["symbol", "date"],
        stocklake_core::Normalizer::Passthrough,
    )
}

/// Canned records per symbol; symbols listed in `panics` blow up mid-fetch.
#[derive(Default)]
struct Canned {
    records: HashMap<String, FetchOutcome>,
    panics: Vec<String>,
}

impl RecordSource for Canned {
    fn fetch(&self, _dataset: &DatasetDescriptor, symbol: &Symbol) -> FetchOutcome {
        if self.panics.iter().any(|p| p == symbol.as_str()) {
            panic!("provider exploded for {symbol}");
        }
        self.records
            .get(symbol.as_str())
            .cloned()
            .unwrap_or(FetchOutcome::Records(Vec::new()))
    }
}

/// Records every progress callback.
#[derive(Default)]
struct Recorder {
    done: Mutex<Vec<(String, usize, bool)>>,
    batches: Mutex<Vec<BatchSummary>>,
}

impl ImportProgress for Recorder {
    fn on_symbol_done(
        &self,
        _dataset: &str,
        symbol: &Symbol,
        done: usize,
        _total: usize,
        result: &Result<SymbolOutcome, ImportError>,
    ) {
        self.done
            .lock()
            .unwrap()
            .push((symbol.to_string(), done, result.is_ok()));
    }

    fn on_batch_complete(&self, summary: &BatchSummary) {
        self.batches.lock().unwrap().push(summary.clone());
    }
}

#[test]
fn end_to_end_upsert_scenario() {
    let dir = TempDir::new().unwrap();
    let layout = StoreLayout::new(dir.path());
    let store = ParquetStore::new();
    let dataset = closes();

    // AAA already holds {2024-01-02, close 100}.
    let aaa_file = layout.symbol_file(&dataset.name, &sym("AAA"));
    store
        .merge(
            vec![NormalizedRow::new(sym("AAA"), date(2024, 1, 2))
                .with_field("close", Value::Float(100.0))],
            &aaa_file,
            &dataset.key_columns,
        )
        .unwrap();

    let mut canned = Canned::default();
    canned.records.insert(
        "AAA".into(),
        FetchOutcome::Records(vec![record(json!({"date": "2024-01-02", "close": 105.0}))]),
    );
    canned.records.insert(
        "BBB".into(),
        FetchOutcome::Records(vec![
            record(json!({"date": "2024-01-02", "close": 50.0})),
            record(json!({"date": "2024-01-03", "close": 51.0})),
        ]),
    );

    let importer = Importer::new(canned, ParquetStore::new(), layout.clone(), 4);
    let recorder = Recorder::default();
    let summary = importer
        .import_dataset(&dataset, &[sym("AAA"), sym("BBB")], &recorder)
        .unwrap();

    assert_eq!(summary.rows_added, 2);
    assert_eq!(summary.symbols_done, 2);
    assert_eq!(summary.files_touched, 2);
    assert_eq!(summary.symbols_skipped(), 0);

    let aaa = store.load_rows(&aaa_file).unwrap();
    assert_eq!(aaa.len(), 1);
    assert_eq!(aaa[0].get("close"), Value::Float(105.0));

    let bbb = store
        .load_rows(&layout.symbol_file(&dataset.name, &sym("BBB")))
        .unwrap();
    assert_eq!(bbb.len(), 2);

    let done = recorder.done.lock().unwrap();
    assert_eq!(done.len(), 2);
    let mut counters: Vec<usize> = done.iter().map(|(_, n, _)| *n).collect();
    counters.sort_unstable();
    assert_eq!(counters, vec![1, 2]);
    assert_eq!(recorder.batches.lock().unwrap().as_slice(), &[summary]);
}

#[test]
fn a_failing_symbol_does_not_disturb_the_others() {
    let dir = TempDir::new().unwrap();
    let layout = StoreLayout::new(dir.path());
    let store = ParquetStore::new();
    let dataset = closes();

    let x_file = layout.symbol_file(&dataset.name, &sym("X"));
    store
        .merge(
            vec![NormalizedRow::new(sym("X"), date(2024, 1, 2))
                .with_field("close", Value::Float(1.0))],
            &x_file,
            &dataset.key_columns,
        )
        .unwrap();
    let x_before = fs::read(&x_file).unwrap();

    let mut canned = Canned {
        panics: vec!["X".into()],
        ..Canned::default()
    };
    for s in ["Y", "Z"] {
        canned.records.insert(
            s.into(),
            FetchOutcome::Records(vec![record(json!({"date": "2024-01-02", "close": 2.0}))]),
        );
    }

    let importer = Importer::new(canned, ParquetStore::new(), layout.clone(), 2);
    let recorder = Recorder::default();
    let summary = importer
        .import_dataset(&dataset, &[sym("X"), sym("Y"), sym("Z")], &recorder)
        .unwrap();

    assert_eq!(summary.symbols_total, 3);
    assert_eq!(summary.symbols_done, 2);
    assert_eq!(summary.symbols_failed, 1);
    assert_eq!(summary.rows_added, 2);
    assert_eq!(fs::read(&x_file).unwrap(), x_before);

    let done = recorder.done.lock().unwrap();
    let x = done.iter().find(|(s, _, _)| s == "X").unwrap();
    assert!(!x.2, "X should be reported as failed");
}

/// Leaves a partial temp file and fails for one symbol's target; writes the rest.
struct FailFor(&'static str);

impl FrameWriter for FailFor {
    fn write(&self, frame: &mut DataFrame, path: &Path) -> Result<(), StoreError> {
        let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
        if name.starts_with(&format!("{}.", self.0)) {
            fs::write(path, b"partial").unwrap();
            return Err(StoreError::parquet(path, "disk full"));
        }
        ParquetFrameWriter.write(frame, path)
    }
}

#[test]
fn a_failed_merge_leaves_the_prior_file_intact() {
    let dir = TempDir::new().unwrap();
    let layout = StoreLayout::new(dir.path());
    let dataset = closes();

    let x_file = layout.symbol_file(&dataset.name, &sym("X"));
    ParquetStore::new()
        .merge(
            vec![NormalizedRow::new(sym("X"), date(2024, 1, 2))
                .with_field("close", Value::Float(1.0))],
            &x_file,
            &dataset.key_columns,
        )
        .unwrap();
    let x_before = fs::read(&x_file).unwrap();

    let mut canned = Canned::default();
    for s in ["X", "Y", "Z"] {
        canned.records.insert(
            s.into(),
            FetchOutcome::Records(vec![record(json!({"date": "2024-01-03", "close": 3.0}))]),
        );
    }

    let importer = Importer::new(
        canned,
        ParquetStore::with_writer(FailFor("X")),
        layout.clone(),
        2,
    );
    let recorder = Recorder::default();
    let summary = importer
        .import_dataset(&dataset, &[sym("X"), sym("Y"), sym("Z")], &recorder)
        .unwrap();

    assert_eq!(summary.symbols_failed, 1);
    assert_eq!(summary.symbols_done, 2);
    assert_eq!(summary.rows_added, 2);
    assert_eq!(fs::read(&x_file).unwrap(), x_before);
    assert!(!x_file.with_extension("parquet.tmp").exists());

    let store = ParquetStore::new();
    for s in ["Y", "Z"] {
        let rows = store
            .load_rows(&layout.symbol_file(&dataset.name, &sym(s)))
            .unwrap();
        assert_eq!(rows.len(), 1);
    }
    let done = recorder.done.lock().unwrap();
    let x = done.iter().find(|(s, _, _)| s == "X").unwrap();
    assert!(!x.2, "X should be reported as failed");
}

/// Holds every write open long enough for concurrent merges to overlap.
struct SlowWriter;

impl FrameWriter for SlowWriter {
    fn write(&self, frame: &mut DataFrame, path: &Path) -> Result<(), StoreError> {
        thread::sleep(Duration::from_millis(100));
        ParquetFrameWriter.write(frame, path)
    }
}

#[test]
fn repeated_symbols_are_merged_once() {
    let dir = TempDir::new().unwrap();
    let layout = StoreLayout::new(dir.path());
    let dataset = closes();

    let mut canned = Canned::default();
    for s in ["AAA", "BBB"] {
        canned.records.insert(
            s.into(),
            FetchOutcome::Records(vec![record(json!({"date": "2024-01-02", "close": 7.0}))]),
        );
    }

    let importer = Importer::new(canned, ParquetStore::with_writer(SlowWriter), layout.clone(), 2);
    let recorder = Recorder::default();
    let summary = importer
        .import_dataset(&dataset, &[sym("AAA"), sym("AAA"), sym("BBB")], &recorder)
        .unwrap();

    assert_eq!(summary.symbols_total, 2);
    assert_eq!(summary.symbols_done, 2);
    assert_eq!(summary.symbols_failed, 0);
    assert_eq!(summary.rows_added, 2);
    assert_eq!(recorder.done.lock().unwrap().len(), 2);

    let aaa_file = layout.symbol_file(&dataset.name, &sym("AAA"));
    assert_eq!(ParquetStore::new().load_rows(&aaa_file).unwrap().len(), 1);
    assert!(!aaa_file.with_extension("parquet.tmp").exists());
}

#[test]
fn fetch_failures_are_counted_not_raised() {
    let dir = TempDir::new().unwrap();
    let mut canned = Canned::default();
    canned
        .records
        .insert("R".into(), FetchOutcome::Rejected { status: 403 });
    canned.records.insert(
        "E".into(),
        FetchOutcome::Exhausted {
            attempts: 5,
            last_error: "HTTP 429".into(),
        },
    );
    canned.records.insert(
        "M".into(),
        FetchOutcome::Malformed {
            reason: "not json".into(),
        },
    );

    let importer = Importer::new(canned, ParquetStore::new(), StoreLayout::new(dir.path()), 3);
    let summary = importer
        .import_dataset(&closes(), &[sym("R"), sym("E"), sym("M"), sym("N")], &NoProgress)
        .unwrap();

    assert_eq!(summary.symbols_done, 0);
    assert_eq!(summary.fetch_rejected, 1);
    assert_eq!(summary.fetch_exhausted, 1);
    assert_eq!(summary.fetch_malformed, 1);
    assert_eq!(summary.symbols_empty, 1);
    assert_eq!(summary.files_touched, 0);
}

/// Tracks the peak number of concurrent fetches.
struct Gauge {
    current: AtomicUsize,
    peak: Arc<AtomicUsize>,
}

impl RecordSource for Gauge {
    fn fetch(&self, _dataset: &DatasetDescriptor, _symbol: &Symbol) -> FetchOutcome {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        thread::sleep(Duration::from_millis(20));
        self.current.fetch_sub(1, Ordering::SeqCst);
        FetchOutcome::Records(Vec::new())
    }
}

#[test]
fn in_flight_tasks_never_exceed_worker_count() {
    let dir = TempDir::new().unwrap();
    let peak = Arc::new(AtomicUsize::new(0));
    let gauge = Gauge {
        current: AtomicUsize::new(0),
        peak: Arc::clone(&peak),
    };
    let importer = Importer::new(gauge, ParquetStore::new(), StoreLayout::new(dir.path()), 3);
    let symbols: Vec<Symbol> = (0..12).map(|i| sym(&format!("S{i}"))).collect();

    let summary = importer
        .import_dataset(&closes(), &symbols, &NoProgress)
        .unwrap();

    assert_eq!(summary.symbols_empty, 12);
    let peak = peak.load(Ordering::SeqCst);
    assert!(peak <= 3, "peak concurrency {peak} exceeded 3 workers");
    assert!(peak >= 1);
}

/// HTTP double for the real client: 429 once per symbol, then a price row.
#[derive(Default)]
struct FlakyProvider {
    seen: Mutex<HashMap<String, usize>>,
}

impl Transport for FlakyProvider {
    fn get(&self, _url: &str, query: &[(&str, &str)]) -> Result<HttpResponse, TransportError> {
        let symbol = query
            .iter()
            .find(|(k, _)| *k == "symbol")
            .map(|(_, v)| v.to_string())
            .unwrap_or_default();
        let mut seen = self.seen.lock().unwrap();
        let count = seen.entry(symbol.clone()).or_insert(0);
        *count += 1;
        if *count == 1 {
            return Ok(HttpResponse::new(429, "Limit Reach"));
        }
        let body = json!([{"symbol": symbol, "date": "2024-01-02", "adjClose": 10.0, "volume": 100}]);
        Ok(HttpResponse::new(200, body.to_string()))
    }
}

#[test]
fn fetch_client_drives_the_pool_under_the_rate_limit() {
    let dir = TempDir::new().unwrap();
    let layout = StoreLayout::new(dir.path());
    let limiter = Arc::new(RateLimiter::new(100, Duration::from_secs(60)).unwrap());
    let client = FetchClient::new(
        Arc::new(FlakyProvider::default()),
        Arc::clone(&limiter),
        "https://fake.test/stable",
        "key",
        RetryPolicy::new(3, Duration::from_millis(1)),
    );

    let importer = Importer::new(client, ParquetStore::new(), layout.clone(), 4);
    let symbols = vec![sym("AAA"), sym("BBB"), sym("CCC")];
    let summary = importer
        .import_dataset(&DatasetDescriptor::prices(), &symbols, &NoProgress)
        .unwrap();

    assert_eq!(summary.symbols_done, 3);
    assert_eq!(summary.rows_added, 3);
    // One retry per symbol: each retry consumed its own slot.
    assert_eq!(limiter.in_window(), 6);

    let rows = ParquetStore::new()
        .load_rows(&layout.symbol_file("prices", &sym("BBB")))
        .unwrap();
    assert_eq!(rows[0].symbol, sym("BBB"));
    assert_eq!(rows[0].get("adjClose"), Value::Float(10.0));
}

#[test]
fn import_all_runs_datasets_in_order() {
    let dir = TempDir::new().unwrap();
    let mut canned = Canned::default();
    canned.records.insert(
        "AAA".into(),
        FetchOutcome::Records(vec![record(
            json!({"date": "2024-03-30", "period": "Q1", "fiscalYear": "2024", "revenue": 1})
        )]),
    );
    let importer = Importer::new(canned, ParquetStore::new(), StoreLayout::new(dir.path()), 2);
    let datasets = vec![DatasetDescriptor::ratios(), DatasetDescriptor::key_metrics()];

    let summaries = importer
        .import_all(&datasets, &[sym("AAA")], &NoProgress)
        .unwrap();

    let names: Vec<&str> = summaries.iter().map(|s| s.dataset.as_str()).collect();
    assert_eq!(names, vec!["ratios", "key_metrics"]);
    let total = summaries
        .into_iter()
        .reduce(BatchSummary::combine)
        .unwrap();
    assert_eq!(total.rows_added, 2);
    assert_eq!(total.files_touched, 2);
}
