//! Stocklake CLI: constituents refresh, dataset imports and storage stats.
//!
//! Commands:
//! - `symbols`: refresh the S&P 500 constituents snapshot
//! - `prices`: import dividend-adjusted daily prices
//! - `fundamentals`: import the fundamentals datasets in order
//! - `import`: import one named dataset
//! - `stats`: report files, rows, symbols and date range per dataset

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use stocklake_core::dataset::FUNDAMENTALS;
use stocklake_core::registry::{load_symbols, refresh_constituents, RegistryError};
use stocklake_core::symbol::dedup_symbols;
use stocklake_core::{
    DatasetDescriptor, DatasetView, FetchClient, ImportConfig, ParquetStore, RateLimiter,
    ReqwestTransport, StoreLayout, Symbol,
};
use stocklake_runner::{BatchSummary, Importer, LogProgress};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "stocklake",
    version,
    about = "Stocklake: rate-limited market data ingest into per-symbol Parquet files"
)]
struct Cli {
    /// TOML config file. Environment variables and flags override it.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Data directory (overrides config and STOCKLAKE_DATA_DIR).
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Refresh the S&P 500 constituents snapshot.
    Symbols,
    /// Import dividend-adjusted daily prices.
    Prices(ImportArgs),
    /// Import fundamentals datasets (all five by default).
    Fundamentals {
        /// Dataset to import; repeat for several. Defaults to every fundamentals dataset.
        #[arg(long = "dataset")]
        datasets: Vec<String>,

        #[command(flatten)]
        args: ImportArgs,
    },
    /// Import a single dataset by name.
    Import {
        /// One of: prices, balance_sheet, income_statement, key_metrics, ratios, revenue_segments.
        dataset: String,

        #[command(flatten)]
        args: ImportArgs,
    },
    /// Report per-dataset statistics.
    Stats,
}

#[derive(Args)]
struct ImportArgs {
    /// Concurrent workers (overrides MAX_WORKERS).
    #[arg(long)]
    workers: Option<usize>,

    /// Symbols to import. Defaults to the constituents snapshot.
    symbols: Vec<String>,
}

/// Structured logging; `RUST_LOG` overrides the default filter.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("stocklake=info,stocklake_core=info,stocklake_runner=info")
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_names(true)
        .init();
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let mut config = ImportConfig::load(cli.config.as_deref())?;
    if let Some(dir) = cli.data_dir {
        config.data_dir = dir;
    }
    tracing::debug!(?config, "configuration loaded");

    match cli.command {
        Commands::Symbols => run_symbols(&config),
        Commands::Prices(args) => run_import(config, vec![DatasetDescriptor::prices()], args),
        Commands::Fundamentals { datasets, args } => {
            let datasets = if datasets.is_empty() {
                DatasetDescriptor::fundamentals()
            } else {
                datasets
                    .iter()
                    .map(|name| resolve_fundamental(name))
                    .collect::<Result<Vec<_>>>()?
            };
            run_import(config, datasets, args)
        }
        Commands::Import { dataset, args } => {
            let dataset = resolve_dataset(&dataset)?;
            run_import(config, vec![dataset], args)
        }
        Commands::Stats => run_stats(&config.layout()),
    }
}

fn resolve_dataset(name: &str) -> Result<DatasetDescriptor> {
    match DatasetDescriptor::by_name(name) {
        Some(dataset) => Ok(dataset),
        None => bail!(
            "unknown dataset '{name}' (expected one of: {})",
            DatasetDescriptor::names().join(", ")
        ),
    }
}

fn resolve_fundamental(name: &str) -> Result<DatasetDescriptor> {
    if !FUNDAMENTALS.contains(&name) {
        bail!(
            "'{name}' is not a fundamentals dataset (expected one of: {})",
            FUNDAMENTALS.join(", ")
        );
    }
    resolve_dataset(name)
}

fn build_client(config: &ImportConfig) -> Result<FetchClient> {
    let transport = ReqwestTransport::new(config.request_timeout())?;
    let limiter = RateLimiter::per_minute(config.requests_per_minute)?;
    Ok(FetchClient::new(
        Arc::new(transport),
        Arc::new(limiter),
        &config.base_url,
        &config.api_key,
        config.retry_policy(),
    ))
}

fn run_symbols(config: &ImportConfig) -> Result<()> {
    config.validate()?;
    let client = build_client(config)?;
    let layout = config.layout();
    let rows = refresh_constituents(&client, &ParquetStore::new(), &layout)?;
    println!(
        "Constituents snapshot: {rows} rows -> {}",
        layout.constituents_file().display()
    );
    Ok(())
}

fn run_import(
    mut config: ImportConfig,
    datasets: Vec<DatasetDescriptor>,
    args: ImportArgs,
) -> Result<()> {
    if let Some(workers) = args.workers {
        config.max_workers = workers;
    }
    config.validate()?;

    let layout = config.layout();
    let store = ParquetStore::new();
    let symbols = resolve_symbols(&args.symbols, &store, &layout)?;

    let client = build_client(&config)?;
    let importer = Importer::new(client, store, layout, config.max_workers);
    let summaries = importer.import_all(&datasets, &symbols, &LogProgress)?;

    for summary in &summaries {
        println!("{summary}");
    }
    if summaries.len() > 1 {
        if let Some(total) = summaries.into_iter().reduce(BatchSummary::combine) {
            println!("Total: {total}");
        }
    }
    Ok(())
}

fn resolve_symbols(
    raw: &[String],
    store: &ParquetStore,
    layout: &StoreLayout,
) -> Result<Vec<Symbol>> {
    if raw.is_empty() {
        return load_symbols(store, layout).context("loading symbols from constituents snapshot");
    }
    let symbols = dedup_symbols(raw);
    if symbols.is_empty() {
        bail!("no valid symbols given");
    }
    Ok(symbols)
}

/// Symbol count of the constituents snapshot, `None` when none has been taken.
fn snapshot_size(store: &ParquetStore, layout: &StoreLayout) -> Result<Option<usize>> {
    match load_symbols(store, layout) {
        Ok(symbols) => Ok(Some(symbols.len())),
        Err(RegistryError::MissingSnapshot(_)) => Ok(None),
        Err(e) => Err(e).context("reading constituents snapshot"),
    }
}

fn run_stats(layout: &StoreLayout) -> Result<()> {
    let store = ParquetStore::new();

    match snapshot_size(&store, layout)? {
        Some(count) => println!("constituents       symbols={count}"),
        None => println!("constituents       (no snapshot)"),
    }

    for name in DatasetDescriptor::names() {
        match DatasetView::open(layout, name)? {
            Some(view) => println!("{}", view.stats(&store)?),
            None => println!("{name:<18} (no files)"),
        }
    }
    Ok(())
}
