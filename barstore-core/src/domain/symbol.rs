//! Ticker symbols, normalized to uppercase at the boundary.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Characters the market data provider rejects in a ticker.
const PROVIDER_INVALID_CHARS: [char; 2] = ['^', '/'];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SymbolError {
    #[error("symbol is empty")]
    Empty,

    #[error("symbol '{0}' contains whitespace")]
    Whitespace(String),

    #[error("symbol '{0}' cannot be used as a directory name")]
    NotAPathComponent(String),
}

/// An uppercase ticker symbol.
///
/// Comparison is case-insensitive at construction (`"spy"` and `"SPY"` build
/// equal values) and case-sensitive afterwards. Every symbol is also a valid
/// single path component, since it names the symbol's chunk directory.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Symbol(String);

impl Symbol {
    pub fn new(raw: &str) -> Result<Self, SymbolError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(SymbolError::Empty);
        }
        if trimmed.chars().any(char::is_whitespace) {
            return Err(SymbolError::Whitespace(trimmed.to_string()));
        }
        if trimmed.contains(['/', '\\']) || trimmed == "." || trimmed == ".." {
            return Err(SymbolError::NotAPathComponent(trimmed.to_string()));
        }
        Ok(Self(trimmed.to_uppercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// False for index tickers and share-class notations the provider
    /// cannot serve (e.g. `^GSPC`, `BRK/B`).
    pub fn is_provider_safe(&self) -> bool {
        !self.0.contains(PROVIDER_INVALID_CHARS)
    }
}

/// Whether a raw ticker string can be requested from the provider at all.
pub fn is_provider_safe_str(raw: &str) -> bool {
    !raw.contains(PROVIDER_INVALID_CHARS)
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Symbol {
    type Err = SymbolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for Symbol {
    type Error = SymbolError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(&value)
    }
}

impl From<Symbol> for String {
    fn from(symbol: Symbol) -> Self {
        symbol.0
    }
}

impl AsRef<str> for Symbol {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
