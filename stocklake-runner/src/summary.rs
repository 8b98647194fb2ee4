//! Per-batch import counters.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// What happened to one symbol in a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolOutcome {
    /// Rows were merged into the symbol's file.
    Merged { rows_added: usize, dropped: usize },
    /// The fetch succeeded but normalization left no rows.
    Empty { dropped: usize },
    /// The provider answered with a non-retryable status.
    Rejected { status: u16 },
    /// Every attempt failed with a retryable error.
    Exhausted { attempts: u32 },
    /// 200 with a body that is not JSON records.
    Malformed,
}

/// Counters accumulated over one import batch.
///
/// `symbols_done`, `rows_added` and `files_touched` describe what was written;
/// the rest separate "no data" from fetch failures. Aggregation is
/// commutative, so completion order never changes the result.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub dataset: String,
    pub symbols_total: usize,
    pub symbols_done: usize,
    pub rows_added: usize,
    pub files_touched: usize,
    pub symbols_empty: usize,
    pub symbols_failed: usize,
    pub fetch_rejected: usize,
    pub fetch_exhausted: usize,
    pub fetch_malformed: usize,
    pub rows_dropped: usize,
}

impl BatchSummary {
    pub fn new(dataset: impl Into<String>, symbols_total: usize) -> Self {
        Self {
            dataset: dataset.into(),
            symbols_total,
            ..Self::default()
        }
    }

    pub fn record(&mut self, outcome: &SymbolOutcome) {
        match *outcome {
            SymbolOutcome::Merged {
                rows_added,
                dropped,
            } => {
                self.symbols_done += 1;
                self.files_touched += 1;
                self.rows_added += rows_added;
                self.rows_dropped += dropped;
            }
            SymbolOutcome::Empty { dropped } => {
                self.symbols_empty += 1;
                self.rows_dropped += dropped;
            }
            SymbolOutcome::Rejected { .. } => self.fetch_rejected += 1,
            SymbolOutcome::Exhausted { .. } => self.fetch_exhausted += 1,
            SymbolOutcome::Malformed => self.fetch_malformed += 1,
        }
    }

    pub fn record_failure(&mut self) {
        self.symbols_failed += 1;
    }

    /// Symbols that produced no write, for any reason.
    pub fn symbols_skipped(&self) -> usize {
        self.symbols_empty
            + self.symbols_failed
            + self.fetch_rejected
            + self.fetch_exhausted
            + self.fetch_malformed
    }

    /// Sum two summaries. Dataset names are unioned (`a+b`, sorted).
    pub fn combine(self, other: Self) -> Self {
        let names: BTreeSet<&str> = self
            .dataset
            .split('+')
            .chain(other.dataset.split('+'))
            .filter(|n| !n.is_empty())
            .collect();
        Self {
            dataset: names.into_iter().collect::<Vec<_>>().join("+"),
            symbols_total: self.symbols_total + other.symbols_total,
            symbols_done: self.symbols_done + other.symbols_done,
            rows_added: self.rows_added + other.rows_added,
            files_touched: self.files_touched + other.files_touched,
            symbols_empty: self.symbols_empty + other.symbols_empty,
            symbols_failed: self.symbols_failed + other.symbols_failed,
            fetch_rejected: self.fetch_rejected + other.fetch_rejected,
            fetch_exhausted: self.fetch_exhausted + other.fetch_exhausted,
            fetch_malformed: self.fetch_malformed + other.fetch_malformed,
            rows_dropped: self.rows_dropped + other.rows_dropped,
        }
    }
}

impl fmt::Display for BatchSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {}/{} symbols done, {} rows added, {} files touched",
            self.dataset, self.symbols_done, self.symbols_total, self.rows_added, self.files_touched
        )?;
        let skipped = self.symbols_skipped();
        if skipped > 0 {
            write!(
                f,
                " ({skipped} skipped: {} empty, {} rejected, {} exhausted, {} malformed, {} failed)",
                self.symbols_empty,
                self.fetch_rejected,
                self.fetch_exhausted,
                self.fetch_malformed,
                self.symbols_failed
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary(outcomes: &[SymbolOutcome]) -> BatchSummary {
        let mut s = BatchSummary::new("prices", outcomes.len());
        for o in outcomes {
            s.record(o);
        }
        s
    }

    #[test]
    fn record_counts_each_outcome_kind() {
        let s = summary(&[
            SymbolOutcome::Merged { rows_added: 3, dropped: 1 },
            SymbolOutcome::Merged { rows_added: 0, dropped: 0 },
            SymbolOutcome::Empty { dropped: 2 },
            SymbolOutcome::Rejected { status: 403 },
            SymbolOutcome::Exhausted { attempts: 5 },
            SymbolOutcome::Malformed,
        ]);
        assert_eq!(s.symbols_done, 2);
        assert_eq!(s.files_touched, 2);
        assert_eq!(s.rows_added, 3);
        assert_eq!(s.rows_dropped, 3);
        assert_eq!(s.symbols_skipped(), 4);
    }

    #[test]
    fn order_of_recording_does_not_matter() {
        let outcomes = [
            SymbolOutcome::Merged { rows_added: 2, dropped: 0 },
            SymbolOutcome::Rejected { status: 404 },
            SymbolOutcome::Merged { rows_added: 5, dropped: 1 },
        ];
        let mut reversed = outcomes;
        reversed.reverse();
        assert_eq!(summary(&outcomes), summary(&reversed));
    }

    #[test]
    fn combine_is_commutative() {
        let a = summary(&[SymbolOutcome::Merged { rows_added: 2, dropped: 0 }]);
        let mut b = summary(&[SymbolOutcome::Malformed]);
        b.dataset = "ratios".into();
        b.record_failure();

        let ab = a.clone().combine(b.clone());
        assert_eq!(ab, b.combine(a));
        assert_eq!(ab.dataset, "prices+ratios");
        assert_eq!(ab.symbols_total, 2);
        assert_eq!(ab.symbols_failed, 1);
    }

    #[test]
    fn display_mentions_skips_only_when_present() {
        let clean = summary(&[SymbolOutcome::Merged { rows_added: 1, dropped: 0 }]);
        assert_eq!(clean.to_string(), "prices: 1/1 symbols done, 1 rows added, 1 files touched");
        let skipped = summary(&[SymbolOutcome::Empty { dropped: 0 }]);
        assert!(skipped.to_string().contains("1 skipped"));
    }
}
