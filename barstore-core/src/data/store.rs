//! The bar store contract.
//!
//! A store caches per-symbol bar history locally at a single timeframe. The
//! trait is backend-agnostic; `ParquetBarStore` is the file-backed variant.

use super::error::StoreError;
use crate::domain::{Bar, Symbol, Timeframe};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use std::collections::{BTreeMap, BTreeSet};

/// Default age after which a symbol counts as out of date.
pub fn default_stale_threshold() -> Duration {
    Duration::days(3)
}

pub trait BarStore {
    /// Granularity of every series in this store.
    fn timeframe(&self) -> Timeframe;

    /// True iff at least one bar is persisted for `symbol`.
    fn contains(&self, symbol: &Symbol) -> bool;

    /// Every symbol with persisted data.
    fn list_symbols(&self) -> Result<BTreeSet<Symbol>, StoreError>;

    /// Stored bars whose UTC date lies within `[start, end]`, ascending.
    ///
    /// A missing bound leaves that side open. `start > end` yields an empty
    /// result rather than an error.
    fn get_range(
        &self,
        symbol: &Symbol,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> Result<Vec<Bar>, StoreError>;

    /// The full stored series.
    fn get(&self, symbol: &Symbol) -> Result<Vec<Bar>, StoreError> {
        self.get_range(symbol, None, None)
    }

    /// The most recent stored bar.
    fn get_last(&self, symbol: &Symbol) -> Result<Bar, StoreError>;

    /// Merge `bars` into an existing series. Where a timestamp is already
    /// stored, the incoming bar replaces it.
    fn update(&self, symbol: &Symbol, bars: Vec<Bar>) -> Result<(), StoreError>;

    /// Remove every chunk of `symbol`.
    fn delete(&self, symbol: &Symbol) -> Result<(), StoreError>;

    /// Bootstrap a new symbol with its full lookback history and return what
    /// was stored.
    fn add(&self, symbol: &Symbol) -> Result<Vec<Bar>, StoreError>;

    /// Bring each of `symbols` up to date with the provider. Every symbol
    /// must already be stored; nothing is fetched otherwise.
    fn flush_at(&self, symbols: &BTreeSet<Symbol>, now: DateTime<Utc>) -> Result<(), StoreError>;

    fn flush(&self, symbols: &BTreeSet<Symbol>) -> Result<(), StoreError> {
        self.flush_at(symbols, Utc::now())
    }

    /// Symbols whose last bar is older than `threshold` as of `now`, mapped
    /// to that age.
    fn get_out_of_date_at(
        &self,
        threshold: Duration,
        now: DateTime<Utc>,
    ) -> Result<BTreeMap<Symbol, Duration>, StoreError> {
        let mut stale = BTreeMap::new();
        for symbol in self.list_symbols()? {
            let age = now - self.get_last(&symbol)?.timestamp;
            if age > threshold {
                stale.insert(symbol, age);
            }
        }
        Ok(stale)
    }

    fn get_out_of_date(&self, threshold: Duration) -> Result<BTreeMap<Symbol, Duration>, StoreError> {
        self.get_out_of_date_at(threshold, Utc::now())
    }
}
