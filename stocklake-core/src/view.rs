//! Read-only access to a dataset directory.
//!
//! A view only exists once the dataset has at least one parquet file.

use crate::row::NormalizedRow;
use crate::store::{ParquetStore, StoreError, StoreLayout};
use crate::symbol::Symbol;
use chrono::NaiveDate;
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct DatasetView {
    dataset: String,
    files: Vec<PathBuf>,
}

/// Aggregate statistics over every file of a dataset.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DatasetStats {
    pub dataset: String,
    pub files: usize,
    pub rows: usize,
    pub symbols: usize,
    pub min_date: Option<(NaiveDate, Symbol)>,
    pub max_date: Option<(NaiveDate, Symbol)>,
}

impl fmt::Display for DatasetStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:<18} files={:<5} rows={:<9} symbols={:<5}",
            self.dataset, self.files, self.rows, self.symbols
        )?;
        if let (Some((lo, lo_sym)), Some((hi, hi_sym))) = (&self.min_date, &self.max_date) {
            write!(f, " range={lo} ({lo_sym}) .. {hi} ({hi_sym})")?;
        }
        Ok(())
    }
}

fn is_parquet(path: &Path) -> bool {
    path.is_file() && path.extension().and_then(|e| e.to_str()) == Some("parquet")
}

impl DatasetView {
    /// `None` when the dataset directory is missing or holds no parquet files.
    pub fn open(layout: &StoreLayout, dataset: &str) -> Result<Option<Self>, StoreError> {
        let dir = layout.dataset_dir(dataset);
        if !dir.is_dir() {
            return Ok(None);
        }

        let mut files = Vec::new();
        for entry in fs::read_dir(&dir).map_err(|e| StoreError::io(&dir, e))? {
            let path = entry.map_err(|e| StoreError::io(&dir, e))?.path();
            if is_parquet(&path) {
                files.push(path);
            }
        }
        if files.is_empty() {
            return Ok(None);
        }
        files.sort();

        Ok(Some(Self {
            dataset: dataset.to_string(),
            files,
        }))
    }

    pub fn dataset(&self) -> &str {
        &self.dataset
    }

    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    /// Every row of every file, file by file in path order.
    pub fn load_all(&self, store: &ParquetStore) -> Result<Vec<NormalizedRow>, StoreError> {
        let mut rows = Vec::new();
        for file in &self.files {
            rows.extend(store.load_rows(file)?);
        }
        Ok(rows)
    }

    pub fn stats(&self, store: &ParquetStore) -> Result<DatasetStats, StoreError> {
        let mut stats = DatasetStats {
            dataset: self.dataset.clone(),
            files: self.files.len(),
            rows: 0,
            symbols: 0,
            min_date: None,
            max_date: None,
        };
        let mut symbols = HashSet::new();

        for file in &self.files {
            for row in store.load_rows(file)? {
                stats.rows += 1;
                if stats.min_date.as_ref().map_or(true, |(d, _)| row.date < *d) {
                    stats.min_date = Some((row.date, row.symbol.clone()));
                }
                if stats.max_date.as_ref().map_or(true, |(d, _)| row.date > *d) {
                    stats.max_date = Some((row.date, row.symbol.clone()));
                }
                symbols.insert(row.symbol);
            }
        }
        stats.symbols = symbols.len();
        Ok(stats)
    }
}
