//! Parquet storage with atomic upsert-merge.
//!
//! Layout: `{data_dir}/parquet/{dataset}/{SYMBOL}.parquet`, plus the
//! constituents snapshot at `{data_dir}/parquet/sp500_constituents.parquet`.
//!
//! Every file path is derived from a validated [`Symbol`], so one symbol maps to
//! exactly one file per dataset. The engine takes no locks: callers must keep at
//! most one merge in flight per target path, which the importer guarantees by
//! running one task per symbol.
//!
//! Writes go to `{file}.tmp` and are renamed into place; a reader of the target
//! sees either the previous complete file or the new complete file.

use crate::row::NormalizedRow;
use crate::symbol::Symbol;
use crate::table::Table;
use polars::prelude::{DataFrame, ParquetReader, ParquetWriter, SerReader};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors from the parquet store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("parquet error at {path}: {message}")]
    Parquet { path: PathBuf, message: String },

    #[error("row {row} of {path} has no valid symbol/date")]
    Decode { path: PathBuf, row: usize },

    #[error("atomic rename {from} -> {to} failed: {source}")]
    Rename {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl StoreError {
    pub fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    pub fn parquet(path: &Path, err: impl std::fmt::Display) -> Self {
        Self::Parquet {
            path: path.to_path_buf(),
            message: err.to_string(),
        }
    }
}

/// Outcome of one upsert-merge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeResult {
    /// Net row-count growth after dedup; replaced rows do not count.
    pub rows_added: usize,
}

// ── Layout ──────────────────────────────────────────────────────────

/// Where each dataset's files live under the data directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreLayout {
    root: PathBuf,
}

impl StoreLayout {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            root: data_dir.into(),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.root
    }

    pub fn parquet_dir(&self) -> PathBuf {
        self.root.join("parquet")
    }

    /// `{data_dir}/parquet/{dataset}/`
    pub fn dataset_dir(&self, dataset: &str) -> PathBuf {
        self.parquet_dir().join(dataset)
    }

    /// `{data_dir}/parquet/{dataset}/{SYMBOL}.parquet`
    pub fn symbol_file(&self, dataset: &str, symbol: &Symbol) -> PathBuf {
        self.dataset_dir(dataset)
            .join(format!("{}.parquet", symbol.as_str()))
    }

    pub fn constituents_file(&self) -> PathBuf {
        self.parquet_dir().join("sp500_constituents.parquet")
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    path.with_extension("parquet.tmp")
}

// ── Frame writer seam ───────────────────────────────────────────────

/// Serializes a frame to a file path. The store always passes a temporary
/// path; the rename into place happens afterwards.
pub trait FrameWriter: Send + Sync {
    fn write(&self, frame: &mut DataFrame, path: &Path) -> Result<(), StoreError>;
}

/// Writes parquet with Polars and fsyncs before returning.
#[derive(Debug, Clone, Copy, Default)]
pub struct ParquetFrameWriter;

impl FrameWriter for ParquetFrameWriter {
    fn write(&self, frame: &mut DataFrame, path: &Path) -> Result<(), StoreError> {
        let mut file = fs::File::create(path).map_err(|e| StoreError::io(path, e))?;
        ParquetWriter::new(&mut file)
            .finish(frame)
            .map_err(|e| StoreError::parquet(path, e))?;
        file.sync_all().map_err(|e| StoreError::io(path, e))
    }
}

// ── Store ───────────────────────────────────────────────────────────

/// Reads, writes and upsert-merges parquet files.
pub struct ParquetStore {
    writer: Box<dyn FrameWriter>,
}

impl Default for ParquetStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ParquetStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParquetStore").finish_non_exhaustive()
    }
}

impl ParquetStore {
    pub fn new() -> Self {
        Self::with_writer(ParquetFrameWriter)
    }

    pub fn with_writer(writer: impl FrameWriter + 'static) -> Self {
        Self {
            writer: Box::new(writer),
        }
    }

    /// Atomically replace `path` with `table`.
    pub fn write_table(&self, table: &Table, path: &Path) -> Result<(), StoreError> {
        let mut frame = table.to_frame().map_err(|e| StoreError::parquet(path, e))?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
        }

        let tmp = tmp_path(path);
        if let Err(e) = self.writer.write(&mut frame, &tmp) {
            let _ = fs::remove_file(&tmp);
            return Err(e);
        }

        fs::rename(&tmp, path).map_err(|source| {
            let _ = fs::remove_file(&tmp);
            StoreError::Rename {
                from: tmp.clone(),
                to: path.to_path_buf(),
                source,
            }
        })
    }

    pub fn read_table(&self, path: &Path) -> Result<Table, StoreError> {
        let file = fs::File::open(path).map_err(|e| StoreError::io(path, e))?;
        let frame = ParquetReader::new(file)
            .finish()
            .map_err(|e| StoreError::parquet(path, e))?;
        Table::from_frame(&frame).map_err(|e| StoreError::parquet(path, e))
    }

    /// Load the rows stored at `path`; a missing file reads as empty.
    pub fn load_rows(&self, path: &Path) -> Result<Vec<NormalizedRow>, StoreError> {
        if !path.exists() {
            return Ok(Vec::new());
        }
        let table = self.read_table(path)?;
        table
            .records()
            .enumerate()
            .map(|(row, cells)| {
                NormalizedRow::from_cells(cells).ok_or_else(|| StoreError::Decode {
                    path: path.to_path_buf(),
                    row,
                })
            })
            .collect()
    }

    pub fn write_rows(&self, rows: &[NormalizedRow], path: &Path) -> Result<(), StoreError> {
        let table = Table::from_rows(rows.iter().map(NormalizedRow::cells));
        self.write_table(&table, path)
    }

    /// Upsert `new_rows` into the file at `target`, deduplicating on `key_columns`.
    ///
    /// An empty batch returns zero without touching the filesystem. On any
    /// error the previous file is left as it was.
    pub fn merge(
        &self,
        new_rows: Vec<NormalizedRow>,
        target: &Path,
        key_columns: &[String],
    ) -> Result<MergeResult, StoreError> {
        if new_rows.is_empty() {
            return Ok(MergeResult::default());
        }

        let existing = self.load_rows(target)?;
        let before = existing.len();
        let merged = upsert(existing, new_rows, key_columns);
        self.write_rows(&merged, target)?;

        tracing::debug!(
            path = %target.display(),
            before,
            after = merged.len(),
            "merged rows"
        );

        Ok(MergeResult {
            rows_added: merged.len().saturating_sub(before),
        })
    }
}

/// Combine `existing` then `incoming`, last write wins per key.
///
/// A replaced row keeps the position of the key's first occurrence; the result
/// is then stably sorted by date.
pub fn upsert(
    existing: Vec<NormalizedRow>,
    incoming: Vec<NormalizedRow>,
    key_columns: &[String],
) -> Vec<NormalizedRow> {
    let mut index: HashMap<Vec<String>, usize> = HashMap::new();
    let mut merged: Vec<NormalizedRow> = Vec::with_capacity(existing.len() + incoming.len());

    for row in existing.into_iter().chain(incoming) {
        let key = row.key(key_columns);
        match index.get(&key) {
            Some(&slot) => merged[slot] = row,
            None => {
                index.insert(key, merged.len());
                merged.push(row);
            }
        }
    }

    merged.sort_by_key(|row| row.date);
    merged
}
