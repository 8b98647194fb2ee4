//! Ticker symbols: the partition key for storage and the unit of concurrent work.
//!
//! A `Symbol` can only be built through [`Symbol::parse`], which restricts the
//! alphabet so that a storage path derived from a symbol can never escape its
//! dataset directory.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use thiserror::Error;

/// Errors from symbol validation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SymbolError {
    #[error("symbol is empty")]
    Empty,

    #[error("symbol '{symbol}' contains invalid character '{ch}'")]
    InvalidCharacter { symbol: String, ch: char },

    #[error("symbol '{0}' is a reserved path component")]
    Reserved(String),
}

/// An uppercase ticker, e.g. `AAPL` or `BRK.B`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Symbol(String);

impl Symbol {
    /// Trim, uppercase and validate a raw ticker.
    pub fn parse(raw: &str) -> Result<Self, SymbolError> {
        let symbol = raw.trim().to_ascii_uppercase();
        if symbol.is_empty() {
            return Err(SymbolError::Empty);
        }
        if let Some(ch) = symbol.chars().find(|c| !is_symbol_char(*c)) {
            return Err(SymbolError::InvalidCharacter { symbol, ch });
        }
        // Only dots in the alphabet could form these.
        if symbol.chars().all(|c| c == '.') {
            return Err(SymbolError::Reserved(symbol));
        }
        Ok(Self(symbol))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn is_symbol_char(c: char) -> bool {
    c.is_ascii_uppercase() || c.is_ascii_digit() || matches!(c, '.' | '-' | '^' | '=')
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Symbol {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Symbol {
    type Error = SymbolError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Symbol> for String {
    fn from(symbol: Symbol) -> Self {
        symbol.0
    }
}

/// Parse and deduplicate raw tickers, keeping first-occurrence order.
///
/// Invalid entries are skipped with a warning rather than failing the list.
pub fn dedup_symbols<I, S>(raw: I) -> Vec<Symbol>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut seen = HashSet::new();
    let mut symbols = Vec::new();
    for item in raw {
        match Symbol::parse(item.as_ref()) {
            Ok(symbol) => {
                if seen.insert(symbol.clone()) {
                    symbols.push(symbol);
                }
            }
            Err(e) => tracing::warn!(raw = item.as_ref(), error = %e, "skipping invalid symbol"),
        }
    }
    symbols
}
