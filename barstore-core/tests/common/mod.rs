//! Shared fixtures: an in-memory provider and bar builders.

#![allow(dead_code)]

use barstore_core::data::{BarProvider, ParquetBarStore, ProviderError};
use barstore_core::domain::{Bar, Symbol, Timeframe};
use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

/// One recorded `fetch` call.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchRequest {
    pub symbol: Symbol,
    pub timeframe: Timeframe,
    pub start: NaiveDate,
    pub end: NaiveDate,
}

/// Serves canned history per symbol, filtered to the requested window.
#[derive(Default)]
pub struct FakeProvider {
    history: Mutex<BTreeMap<Symbol, Vec<Bar>>>,
    requests: Mutex<Vec<FetchRequest>>,
}

impl FakeProvider {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_history(&self, symbol: &str, bars: Vec<Bar>) {
        self.history
            .lock()
            .unwrap()
            .insert(sym(symbol), bars);
    }

    pub fn requests(&self) -> Vec<FetchRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl BarProvider for FakeProvider {
    fn name(&self) -> &str {
        "fake"
    }

    fn fetch(
        &self,
        symbol: &Symbol,
        timeframe: Timeframe,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<Bar>, ProviderError> {
        self.requests.lock().unwrap().push(FetchRequest {
            symbol: symbol.clone(),
            timeframe,
            start,
            end,
        });
        let history = self.history.lock().unwrap();
        let bars = history
            .get(symbol)
            .ok_or_else(|| ProviderError::SymbolNotFound {
                symbol: symbol.to_string(),
            })?;
        Ok(bars
            .iter()
            .filter(|b| b.date() >= start && b.date() <= end)
            .cloned()
            .collect())
    }
}

pub fn sym(s: &str) -> Symbol {
    Symbol::new(s).unwrap()
}

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

/// Daily bar stamped at 05:00 UTC (US market midnight), as the provider
/// reports them.
pub fn daily(y: i32, m: u32, d: u32, close: f64) -> Bar {
    at(Utc.with_ymd_and_hms(y, m, d, 5, 0, 0).unwrap(), close)
}

pub fn at(timestamp: DateTime<Utc>, close: f64) -> Bar {
    Bar {
        timestamp,
        open: close,
        high: close + 0.5,
        low: close - 0.5,
        close,
        volume: 1_000,
        trade_count: Some(10),
        vwap: Some(close),
    }
}

/// Consecutive calendar-day bars starting at `first`, closes 1, 2, 3, ...
pub fn daily_run(first: NaiveDate, days: usize) -> Vec<Bar> {
    (0..days)
        .map(|i| {
            let d = first + Duration::days(i as i64);
            at(d.and_hms_opt(5, 0, 0).unwrap().and_utc(), (i + 1) as f64)
        })
        .collect()
}

/// "Now" used by fixtures; far enough after every canned history.
pub fn fixture_now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
}

pub fn closes(bars: &[Bar]) -> Vec<f64> {
    bars.iter().map(|b| b.close).collect()
}

pub struct TestStore {
    pub dir: TempDir,
    pub provider: Arc<FakeProvider>,
    pub store: ParquetBarStore,
}

/// Empty daily store over a fresh temp dir with a 10-year lookback.
pub fn empty_store() -> TestStore {
    let dir = tempfile::tempdir().unwrap();
    let provider = FakeProvider::new();
    let store = ParquetBarStore::open(dir.path(), Timeframe::DAY, provider.clone())
        .unwrap()
        .with_lookback(Duration::days(3650));
    TestStore {
        dir,
        provider,
        store,
    }
}

/// Store with `symbol` bootstrapped from `bars`.
pub fn seeded_store(symbol: &str, bars: Vec<Bar>) -> TestStore {
    let t = empty_store();
    t.provider.set_history(symbol, bars);
    t.store.add_at(&sym(symbol), fixture_now()).unwrap();
    t
}
