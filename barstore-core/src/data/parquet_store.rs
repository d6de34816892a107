//! File-backed bar store with year-partitioned Parquet chunks.
//!
//! Layout: `{root}/{SYMBOL}/{year}.parquet`, plus a `.timeframe` marker at
//! the root recording the granularity the store was created with.
//!
//! Writes stage every affected chunk as `{year}.parquet.tmp` and rename the
//! staged files into place only once all of them are complete. A merge never
//! shrinks a year, so no chunk has to be deleted during an update; a crash
//! leaves each chunk either fully old or fully new. The store assumes a
//! single writer per root.

use super::chunk::{read_chunk, write_chunk};
use super::error::StoreError;
use super::layout::{ChunkFile, ChunkLayout};
use super::provider::BarProvider;
use super::store::BarStore;
use crate::config::StoreConfig;
use crate::domain::{Bar, Symbol, Timeframe};
use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

const TIMEFRAME_MARKER: &str = ".timeframe";

/// The Parquet-backed store.
pub struct ParquetBarStore {
    layout: ChunkLayout,
    timeframe: Timeframe,
    provider: Arc<dyn BarProvider>,
    lookback: Duration,
}

/// Summary of one stored symbol.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SymbolStatus {
    pub symbol: Symbol,
    pub years: Vec<i32>,
    pub bar_count: usize,
    pub first: DateTime<Utc>,
    pub last: DateTime<Utc>,
}

/// A chunk that failed to decode or violates the chunk invariants.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkIssue {
    pub symbol: Symbol,
    pub year: i32,
    pub path: PathBuf,
    pub reason: String,
}

impl ParquetBarStore {
    /// Open (creating if needed) a store rooted at `root`.
    ///
    /// Fails with `InvalidArgument` if the root was created for a different
    /// timeframe.
    pub fn open(
        root: impl Into<PathBuf>,
        timeframe: Timeframe,
        provider: Arc<dyn BarProvider>,
    ) -> Result<Self, StoreError> {
        let root = root.into();
        info!(root = %root.display(), %timeframe, provider = provider.name(), "opening bar store");
        fs::create_dir_all(&root).map_err(StoreError::io(&root))?;
        check_timeframe_marker(&root, timeframe, true)?;
        Ok(Self::new(root, timeframe, provider))
    }

    /// Open a store that must already exist. Nothing is created on disk, so
    /// this works on read-only mounts and a mistyped root is an error.
    pub fn open_existing(
        root: impl Into<PathBuf>,
        timeframe: Timeframe,
        provider: Arc<dyn BarProvider>,
    ) -> Result<Self, StoreError> {
        let root = root.into();
        if !root.is_dir() {
            return Err(StoreError::InvalidArgument(format!(
                "no store at {}",
                root.display()
            )));
        }
        debug!(root = %root.display(), %timeframe, "opening existing bar store");
        check_timeframe_marker(&root, timeframe, false)?;
        Ok(Self::new(root, timeframe, provider))
    }

    fn new(root: PathBuf, timeframe: Timeframe, provider: Arc<dyn BarProvider>) -> Self {
        Self {
            layout: ChunkLayout::new(root),
            timeframe,
            provider,
            lookback: Duration::days(365 * 5),
        }
    }

    pub fn from_config(
        config: &StoreConfig,
        provider: Arc<dyn BarProvider>,
    ) -> Result<Self, StoreError> {
        Ok(Self::open(&config.root, config.timeframe, provider)?.with_lookback(config.lookback()))
    }

    /// `open_existing` with the config's root and timeframe.
    pub fn from_config_existing(
        config: &StoreConfig,
        provider: Arc<dyn BarProvider>,
    ) -> Result<Self, StoreError> {
        Ok(Self::open_existing(&config.root, config.timeframe, provider)?
            .with_lookback(config.lookback()))
    }

    /// History window fetched by `add`, ending yesterday.
    pub fn with_lookback(mut self, lookback: Duration) -> Self {
        self.lookback = lookback;
        self
    }

    pub fn layout(&self) -> &ChunkLayout {
        &self.layout
    }

    pub fn provider(&self) -> &dyn BarProvider {
        self.provider.as_ref()
    }

    /// `add`, with "today" taken from `now`.
    pub fn add_at(&self, symbol: &Symbol, now: DateTime<Utc>) -> Result<Vec<Bar>, StoreError> {
        if self.contains(symbol) {
            return Err(StoreError::AlreadyExists {
                symbol: symbol.clone(),
            });
        }

        let end = yesterday(now);
        let start = end.checked_sub_signed(self.lookback).ok_or_else(|| {
            StoreError::InvalidArgument(format!(
                "lookback of {} days reaches before the earliest date",
                self.lookback.num_days()
            ))
        })?;
        info!(%symbol, %start, %end, "fetching all available history");
        let fetched = self.provider.fetch(symbol, self.timeframe, start, end)?;

        if fetched.is_empty() {
            warn!(%symbol, "provider returned no bars, nothing stored");
            return Ok(fetched);
        }

        let bars = canonicalize(fetched);
        let years = self.persist(symbol, &bars)?;
        info!(%symbol, rows = bars.len(), chunks = years.len(), "added symbol to store");
        Ok(bars)
    }

    /// Per-symbol summary: stored years, row count, first and last instant.
    pub fn status(&self, symbol: &Symbol) -> Result<SymbolStatus, StoreError> {
        let chunks = self.require_chunks(symbol)?;
        let mut bar_count = 0;
        let mut first = None;
        let mut last = None;
        for chunk in &chunks {
            let bars = read_chunk(&chunk.path, chunk.year)?;
            bar_count += bars.len();
            first = first.or(bars.first().map(|b| b.timestamp));
            last = bars.last().map(|b| b.timestamp).or(last);
        }

        match (first, last) {
            (Some(first), Some(last)) => Ok(SymbolStatus {
                symbol: symbol.clone(),
                years: chunks.iter().map(|c| c.year).collect(),
                bar_count,
                first,
                last,
            }),
            _ => Err(StoreError::NotFound {
                symbol: symbol.clone(),
            }),
        }
    }

    /// Decode every chunk of `symbol` and report the ones that fail.
    ///
    /// I/O failures other than decoding abort the scan.
    pub fn verify(&self, symbol: &Symbol) -> Result<Vec<ChunkIssue>, StoreError> {
        let mut issues = Vec::new();
        for chunk in self.require_chunks(symbol)? {
            match read_chunk(&chunk.path, chunk.year) {
                Ok(bars) => debug!(%symbol, year = chunk.year, rows = bars.len(), "chunk ok"),
                Err(StoreError::Codec { reason, .. }) => issues.push(ChunkIssue {
                    symbol: symbol.clone(),
                    year: chunk.year,
                    path: chunk.path,
                    reason,
                }),
                Err(e) => return Err(e),
            }
        }
        Ok(issues)
    }

    /// Move a corrupt chunk aside (`.quarantined`) so reads skip it.
    pub fn quarantine(&self, issue: &ChunkIssue) -> Result<PathBuf, StoreError> {
        let target = ChunkLayout::quarantine_path(&issue.path);
        warn!(
            symbol = %issue.symbol,
            year = issue.year,
            reason = %issue.reason,
            target = %target.display(),
            "quarantining corrupt chunk"
        );
        fs::rename(&issue.path, &target).map_err(StoreError::io(&issue.path))?;
        Ok(target)
    }

    fn require_chunks(&self, symbol: &Symbol) -> Result<Vec<ChunkFile>, StoreError> {
        let chunks = self.layout.list_chunks(symbol)?;
        if chunks.is_empty() {
            return Err(StoreError::NotFound {
                symbol: symbol.clone(),
            });
        }
        Ok(chunks)
    }

    /// Write `bars` (ascending, unique) as one chunk per year, replacing any
    /// existing chunks of those years. Returns the years written.
    fn persist(&self, symbol: &Symbol, bars: &[Bar]) -> Result<Vec<i32>, StoreError> {
        let dir = self.layout.symbol_dir(symbol);
        fs::create_dir_all(&dir).map_err(StoreError::io(&dir))?;

        let leftovers = self.layout.clear_staging(symbol)?;
        if leftovers > 0 {
            warn!(%symbol, leftovers, "removed staging files from an interrupted write");
        }

        let mut staged: Vec<(i32, PathBuf)> = Vec::new();
        for (year, group) in split_by_year(bars) {
            let tmp = self.layout.staging_path(symbol, year);
            if let Err(e) = write_chunk(&tmp, group) {
                discard_staged(symbol, std::iter::once(&tmp).chain(staged.iter().map(|(_, p)| p)));
                return Err(e);
            }
            staged.push((year, tmp));
        }

        for (i, (year, tmp)) in staged.iter().enumerate() {
            let path = self.layout.chunk_path(symbol, *year);
            if let Err(source) = fs::rename(tmp, &path) {
                warn!(
                    %symbol,
                    replaced = ?staged[..i].iter().map(|(y, _)| *y).collect::<Vec<_>>(),
                    failed = year,
                    "rename failed part way through a write"
                );
                discard_staged(symbol, staged[i..].iter().map(|(_, p)| p));
                return Err(StoreError::Io { path, source });
            }
        }
        Ok(staged.into_iter().map(|(year, _)| year).collect())
    }
}

impl BarStore for ParquetBarStore {
    fn timeframe(&self) -> Timeframe {
        self.timeframe
    }

    fn contains(&self, symbol: &Symbol) -> bool {
        self.layout.has_chunks(symbol)
    }

    fn list_symbols(&self) -> Result<BTreeSet<Symbol>, StoreError> {
        self.layout.list_symbols()
    }

    fn get_range(
        &self,
        symbol: &Symbol,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> Result<Vec<Bar>, StoreError> {
        let chunks = self.require_chunks(symbol)?;
        debug!(%symbol, ?start, ?end, "retrieving stored bars");

        if let (Some(s), Some(e)) = (start, end) {
            if s > e {
                return Ok(Vec::new());
            }
        }

        // Coarse filter on the chunk year, then exact filter on the bar date.
        let mut bars = Vec::new();
        for chunk in chunks.iter().filter(|c| {
            start.map_or(true, |s| c.year >= s.year()) && end.map_or(true, |e| c.year <= e.year())
        }) {
            bars.extend(read_chunk(&chunk.path, chunk.year)?);
        }
        bars.retain(|b| {
            let date = b.date();
            start.map_or(true, |s| date >= s) && end.map_or(true, |e| date <= e)
        });
        Ok(bars)
    }

    fn get_last(&self, symbol: &Symbol) -> Result<Bar, StoreError> {
        let chunks = self.require_chunks(symbol)?;
        // Chunks are ordered by numeric year, so the last one is the latest.
        let latest = &chunks[chunks.len() - 1];
        read_chunk(&latest.path, latest.year)?
            .pop()
            .ok_or_else(|| StoreError::codec(&latest.path, "empty chunk"))
    }

    fn update(&self, symbol: &Symbol, bars: Vec<Bar>) -> Result<(), StoreError> {
        let chunks = self.require_chunks(symbol)?;
        if bars.is_empty() {
            debug!(%symbol, "update with no rows, nothing to do");
            return Ok(());
        }
        info!(%symbol, rows = bars.len(), "updating symbol with potentially new rows");

        let (min_year, max_year) = bars.iter().fold((i32::MAX, i32::MIN), |(lo, hi), b| {
            (lo.min(b.year()), hi.max(b.year()))
        });

        let mut merged: BTreeMap<DateTime<Utc>, Bar> = BTreeMap::new();
        for chunk in chunks
            .iter()
            .filter(|c| (min_year..=max_year).contains(&c.year))
        {
            for bar in read_chunk(&chunk.path, chunk.year)? {
                merged.insert(bar.timestamp, bar);
            }
        }
        let existing = merged.len();

        // Incoming rows overwrite stored rows (and earlier incoming rows)
        // with the same timestamp.
        for bar in bars {
            merged.insert(bar.timestamp, bar);
        }
        let merged: Vec<Bar> = merged.into_values().collect();
        debug!(%symbol, existing, merged = merged.len(), min_year, max_year, "merged rows");

        self.persist(symbol, &merged)?;
        Ok(())
    }

    fn delete(&self, symbol: &Symbol) -> Result<(), StoreError> {
        self.require_chunks(symbol)?;
        warn!(%symbol, "deleting all data for symbol");
        let dir = self.layout.symbol_dir(symbol);
        fs::remove_dir_all(&dir).map_err(StoreError::io(&dir))
    }

    fn add(&self, symbol: &Symbol) -> Result<Vec<Bar>, StoreError> {
        self.add_at(symbol, Utc::now())
    }

    fn flush_at(&self, symbols: &BTreeSet<Symbol>, now: DateTime<Utc>) -> Result<(), StoreError> {
        let missing: Vec<&str> = symbols
            .iter()
            .filter(|s| !self.contains(s))
            .map(Symbol::as_str)
            .collect();
        if !missing.is_empty() {
            return Err(StoreError::InvalidArgument(format!(
                "symbols not in store: {}",
                missing.join(", ")
            )));
        }

        let end = yesterday(now);
        for symbol in symbols {
            let delta = now - self.get_last(symbol)?.timestamp;
            let start = end - Duration::days(delta.num_days());
            if start > end {
                debug!(%symbol, "last bar is in the future, skipping refresh");
                continue;
            }
            info!(%symbol, %start, %end, "refreshing symbol");
            let fetched = self.provider.fetch(symbol, self.timeframe, start, end)?;
            self.update(symbol, fetched)?;
        }
        Ok(())
    }
}

/// Best-effort removal of staging files after a failed write. A file that
/// cannot be removed is logged and cleared by the next write to the symbol.
fn discard_staged<'a>(symbol: &Symbol, paths: impl Iterator<Item = &'a PathBuf>) {
    for path in paths {
        match fs::remove_file(path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(%symbol, path = %path.display(), error = %e, "could not remove staging file"),
        }
    }
}

fn yesterday(now: DateTime<Utc>) -> NaiveDate {
    now.date_naive() - Duration::days(1)
}

/// Sort ascending and drop duplicate timestamps, keeping the later row.
fn canonicalize(bars: Vec<Bar>) -> Vec<Bar> {
    let mut by_ts: BTreeMap<DateTime<Utc>, Bar> = BTreeMap::new();
    for bar in bars {
        by_ts.insert(bar.timestamp, bar);
    }
    by_ts.into_values().collect()
}

/// Split an ascending slice into maximal runs sharing a calendar year.
fn split_by_year(bars: &[Bar]) -> Vec<(i32, &[Bar])> {
    let mut groups = Vec::new();
    let mut start = 0;
    while start < bars.len() {
        let year = bars[start].year();
        let len = bars[start..]
            .iter()
            .take_while(|b| b.year() == year)
            .count();
        groups.push((year, &bars[start..start + len]));
        start += len;
    }
    groups
}

/// Refuse a root recorded with a different timeframe. With `create`, a root
/// without a marker gets one.
fn check_timeframe_marker(
    root: &Path,
    timeframe: Timeframe,
    create: bool,
) -> Result<(), StoreError> {
    let marker = root.join(TIMEFRAME_MARKER);
    match fs::read_to_string(&marker) {
        Ok(content) => {
            let recorded = content.trim();
            if recorded != timeframe.to_string() {
                return Err(StoreError::InvalidArgument(format!(
                    "store at {} holds {recorded} bars, cannot open it as {timeframe}",
                    root.display()
                )));
            }
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound && !create => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            fs::write(&marker, format!("{timeframe}\n")).map_err(StoreError::io(&marker))
        }
        Err(e) => Err(StoreError::Io {
            path: marker,
            source: e,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::provider::ProviderError;
    use chrono::TimeZone;

    struct EmptyProvider;

    impl BarProvider for EmptyProvider {
        fn name(&self) -> &str {
            "empty"
        }

        fn fetch(
            &self,
            _symbol: &Symbol,
            _timeframe: Timeframe,
            _start: NaiveDate,
            _end: NaiveDate,
        ) -> Result<Vec<Bar>, ProviderError> {
            Ok(Vec::new())
        }
    }

    fn bar_at(y: i32, m: u32, d: u32) -> Bar {
        Bar {
            timestamp: Utc.with_ymd_and_hms(y, m, d, 5, 0, 0).unwrap(),
            open: 1.0,
            high: 1.0,
            low: 1.0,
            close: 1.0,
            volume: 1,
            trade_count: None,
            vwap: None,
        }
    }

    #[test]
    fn split_by_year_groups_runs() {
        let bars = vec![
            bar_at(2020, 12, 30),
            bar_at(2020, 12, 31),
            bar_at(2021, 1, 4),
            bar_at(2023, 6, 1),
        ];
        let groups: Vec<(i32, usize)> = split_by_year(&bars)
            .into_iter()
            .map(|(y, g)| (y, g.len()))
            .collect();
        assert_eq!(groups, vec![(2020, 2), (2021, 1), (2023, 1)]);
        assert!(split_by_year(&[]).is_empty());
    }

    #[test]
    fn canonicalize_keeps_later_duplicate() {
        let mut a = bar_at(2021, 1, 2);
        a.close = 1.0;
        let mut b = bar_at(2021, 1, 2);
        b.close = 2.0;
        let out = canonicalize(vec![bar_at(2021, 1, 3), a, b]);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].close, 2.0);
        assert!(out[0].timestamp < out[1].timestamp);
    }

    #[test]
    fn reopening_with_other_timeframe_fails() {
        let dir = tempfile::tempdir().unwrap();
        ParquetBarStore::open(dir.path(), Timeframe::DAY, Arc::new(EmptyProvider)).unwrap();
        ParquetBarStore::open(dir.path(), Timeframe::DAY, Arc::new(EmptyProvider)).unwrap();
        let err = ParquetBarStore::open(dir.path(), Timeframe::MINUTE, Arc::new(EmptyProvider))
            .err()
            .unwrap();
        assert!(matches!(err, StoreError::InvalidArgument(_)));
    }

    #[test]
    fn add_with_empty_history_stores_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let store =
            ParquetBarStore::open(dir.path(), Timeframe::DAY, Arc::new(EmptyProvider)).unwrap();
        let spy = Symbol::new("SPY").unwrap();
        assert!(store.add(&spy).unwrap().is_empty());
        assert!(!store.contains(&spy));
    }

    #[test]
    fn persist_clears_stale_staging_files() {
        let dir = tempfile::tempdir().unwrap();
        let store =
            ParquetBarStore::open(dir.path(), Timeframe::DAY, Arc::new(EmptyProvider)).unwrap();
        let spy = Symbol::new("SPY").unwrap();
        let leftover = store.layout().staging_path(&spy, 1999);
        fs::create_dir_all(leftover.parent().unwrap()).unwrap();
        fs::write(&leftover, b"partial").unwrap();

        let years = store.persist(&spy, &[bar_at(2021, 1, 4)]).unwrap();
        assert_eq!(years, vec![2021]);
        assert!(!leftover.exists());
        assert!(store.layout().chunk_path(&spy, 2021).exists());
        assert!(!store.layout().staging_path(&spy, 2021).exists());
    }

    #[test]
    fn failed_rename_removes_remaining_staging_files() {
        let dir = tempfile::tempdir().unwrap();
        let store =
            ParquetBarStore::open(dir.path(), Timeframe::DAY, Arc::new(EmptyProvider)).unwrap();
        let spy = Symbol::new("SPY").unwrap();
        // A non-empty directory in place of the 2022 chunk makes its rename fail.
        let blocker = store.layout().chunk_path(&spy, 2022);
        fs::create_dir_all(blocker.join("occupied")).unwrap();

        let err = store
            .persist(&spy, &[bar_at(2021, 1, 4), bar_at(2022, 1, 3), bar_at(2023, 1, 3)])
            .unwrap_err();

        assert!(matches!(err, StoreError::Io { .. }));
        assert!(store.layout().chunk_path(&spy, 2021).exists());
        for year in [2021, 2022, 2023] {
            assert!(!store.layout().staging_path(&spy, year).exists());
        }
        assert!(!store.layout().chunk_path(&spy, 2023).exists());
    }

    #[test]
    fn open_existing_creates_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("typo");
        let err = ParquetBarStore::open_existing(&missing, Timeframe::DAY, Arc::new(EmptyProvider))
            .err()
            .unwrap();
        assert!(matches!(err, StoreError::InvalidArgument(_)));
        assert!(!missing.exists());

        let store =
            ParquetBarStore::open_existing(dir.path(), Timeframe::DAY, Arc::new(EmptyProvider))
                .unwrap();
        assert!(store.list_symbols().unwrap().is_empty());
        assert!(!dir.path().join(TIMEFRAME_MARKER).exists());
    }

    #[test]
    fn open_existing_checks_recorded_timeframe() {
        let dir = tempfile::tempdir().unwrap();
        ParquetBarStore::open(dir.path(), Timeframe::DAY, Arc::new(EmptyProvider)).unwrap();
        assert!(
            ParquetBarStore::open_existing(dir.path(), Timeframe::DAY, Arc::new(EmptyProvider))
                .is_ok()
        );
        assert!(matches!(
            ParquetBarStore::open_existing(dir.path(), Timeframe::MINUTE, Arc::new(EmptyProvider)),
            Err(StoreError::InvalidArgument(_))
        ));
    }

    #[test]
    fn huge_lookback_is_rejected_not_panicking() {
        let dir = tempfile::tempdir().unwrap();
        let store = ParquetBarStore::open(dir.path(), Timeframe::DAY, Arc::new(EmptyProvider))
            .unwrap()
            .with_lookback(Duration::MAX);
        let err = store.add(&Symbol::new("SPY").unwrap()).unwrap_err();
        assert!(matches!(err, StoreError::InvalidArgument(_)));
    }
}
