//! Directory layout of a store.
//!
//! Layout: `{root}/{SYMBOL}/{year}.parquet`
//!
//! Chunks are discovered by listing the symbol directory, never through a
//! side index. Years are parsed out of file names and ordered numerically.

use super::error::StoreError;
use crate::domain::Symbol;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

pub const CHUNK_EXTENSION: &str = "parquet";
const STAGING_SUFFIX: &str = "tmp";
const QUARANTINE_SUFFIX: &str = "quarantined";

/// One persisted year-chunk of a symbol's series.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct ChunkFile {
    pub year: i32,
    pub path: PathBuf,
}

/// Maps `(symbol, year)` pairs to paths under a root directory.
#[derive(Debug, Clone)]
pub struct ChunkLayout {
    root: PathBuf,
}

impl ChunkLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root directory of the store.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory for a specific symbol: `{root}/{SYMBOL}/`
    pub fn symbol_dir(&self, symbol: &Symbol) -> PathBuf {
        self.root.join(symbol.as_str())
    }

    /// Path to the chunk for a symbol+year: `{root}/{SYMBOL}/{year}.parquet`
    pub fn chunk_path(&self, symbol: &Symbol, year: i32) -> PathBuf {
        self.symbol_dir(symbol)
            .join(format!("{year}.{CHUNK_EXTENSION}"))
    }

    /// Where a chunk is written before being renamed over `chunk_path`.
    pub fn staging_path(&self, symbol: &Symbol, year: i32) -> PathBuf {
        self.symbol_dir(symbol)
            .join(format!("{year}.{CHUNK_EXTENSION}.{STAGING_SUFFIX}"))
    }

    /// Where a corrupt chunk is moved so it stops participating in reads.
    pub fn quarantine_path(chunk: &Path) -> PathBuf {
        chunk.with_extension(format!("{CHUNK_EXTENSION}.{QUARANTINE_SUFFIX}"))
    }

    /// All chunks of a symbol, sorted by year ascending. Empty if the symbol
    /// has no directory.
    pub fn list_chunks(&self, symbol: &Symbol) -> Result<Vec<ChunkFile>, StoreError> {
        let dir = self.symbol_dir(symbol);
        if !dir.is_dir() {
            return Ok(Vec::new());
        }

        let mut chunks = Vec::new();
        for entry in fs::read_dir(&dir).map_err(StoreError::io(&dir))? {
            let path = entry.map_err(StoreError::io(&dir))?.path();
            if let Some(year) = chunk_year(&path) {
                chunks.push(ChunkFile { year, path });
            }
        }
        chunks.sort();
        Ok(chunks)
    }

    /// Cheap existence probe: true iff the symbol directory holds at least
    /// one chunk file.
    pub fn has_chunks(&self, symbol: &Symbol) -> bool {
        let Ok(entries) = fs::read_dir(self.symbol_dir(symbol)) else {
            return false;
        };
        entries
            .filter_map(Result::ok)
            .any(|entry| chunk_year(&entry.path()).is_some())
    }

    /// Every symbol directory under the root that holds at least one chunk.
    pub fn list_symbols(&self) -> Result<BTreeSet<Symbol>, StoreError> {
        let mut symbols = BTreeSet::new();
        if !self.root.is_dir() {
            return Ok(symbols);
        }

        for entry in fs::read_dir(&self.root).map_err(StoreError::io(&self.root))? {
            let entry = entry.map_err(StoreError::io(&self.root))?;
            if !entry.path().is_dir() {
                continue;
            }
            let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
                continue;
            };
            // Only directories already in normalized form belong to the store.
            match Symbol::new(&name) {
                Ok(symbol) if symbol.as_str() == name && self.has_chunks(&symbol) => {
                    symbols.insert(symbol);
                }
                _ => debug!(dir = %entry.path().display(), "ignoring non-symbol directory"),
            }
        }
        Ok(symbols)
    }

    /// Remove staging files left behind by an interrupted write.
    pub fn clear_staging(&self, symbol: &Symbol) -> Result<usize, StoreError> {
        let dir = self.symbol_dir(symbol);
        if !dir.is_dir() {
            return Ok(0);
        }

        let mut removed = 0;
        for entry in fs::read_dir(&dir).map_err(StoreError::io(&dir))? {
            let path = entry.map_err(StoreError::io(&dir))?.path();
            if path.extension().and_then(|e| e.to_str()) == Some(STAGING_SUFFIX) {
                fs::remove_file(&path).map_err(StoreError::io(&path))?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}

/// Year token of a chunk file name, or `None` for anything that is not
/// exactly `{year}.parquet` (staging files, quarantined files, sidecars).
fn chunk_year(path: &Path) -> Option<i32> {
    if !path.is_file() {
        return None;
    }
    let name = path.file_name()?.to_str()?;
    name.strip_suffix(CHUNK_EXTENSION)?
        .strip_suffix('.')?
        .parse()
        .ok()
}
