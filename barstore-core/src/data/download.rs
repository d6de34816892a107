//! Batch ingestion: bootstraps many symbols into a store with progress
//! reporting.
//!
//! Per symbol: skip tickers the provider cannot serve, skip symbols already
//! stored, otherwise `add`. A failure is recorded and the batch moves on;
//! only an open provider circuit breaker stops further requests.

use super::error::StoreError;
use super::provider::ProviderError;
use super::store::BarStore;
use crate::domain::{is_provider_safe_str, Symbol};
use tracing::{info, warn};

/// Why a symbol was not downloaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    InvalidSymbol,
    AlreadyStored,
}

/// Progress callback for multi-symbol operations.
pub trait DownloadProgress {
    /// Called when starting to fetch a symbol.
    fn on_start(&self, symbol: &str, index: usize, total: usize);

    fn on_skip(&self, symbol: &str, reason: SkipReason);

    /// Called when a symbol fetch completes, with the number of bars stored.
    fn on_complete(&self, symbol: &str, result: &Result<usize, StoreError>);

    /// Called when the entire batch is done.
    fn on_batch_complete(&self, summary: &IngestSummary);
}

/// Progress reporter that logs through `tracing`.
pub struct LogProgress;

impl DownloadProgress for LogProgress {
    fn on_start(&self, symbol: &str, index: usize, total: usize) {
        info!("[{}/{}] downloading historical data for {symbol}", index + 1, total);
    }

    fn on_skip(&self, symbol: &str, reason: SkipReason) {
        match reason {
            SkipReason::InvalidSymbol => warn!(symbol, "invalid symbol, skipping"),
            SkipReason::AlreadyStored => info!(symbol, "already in store, skipping"),
        }
    }

    fn on_complete(&self, symbol: &str, result: &Result<usize, StoreError>) {
        match result {
            Ok(rows) => info!(symbol, rows, "stored"),
            Err(e) => warn!(symbol, error = %e, "failed to download data, skipping"),
        }
    }

    fn on_batch_complete(&self, summary: &IngestSummary) {
        info!(
            total = summary.total,
            added = summary.added.len(),
            skipped_invalid = summary.skipped_invalid.len(),
            skipped_existing = summary.skipped_existing.len(),
            failed = summary.failed.len(),
            "download complete"
        );
    }
}

/// Outcome of a batch ingestion.
#[derive(Debug, Default)]
pub struct IngestSummary {
    pub total: usize,
    pub added: Vec<Symbol>,
    pub skipped_invalid: Vec<String>,
    pub skipped_existing: Vec<Symbol>,
    pub failed: Vec<(String, StoreError)>,
}

impl IngestSummary {
    pub fn all_succeeded(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Add every not-yet-stored symbol in `raw_symbols` to `store`.
pub fn ingest_symbols(
    store: &dyn BarStore,
    raw_symbols: &[String],
    progress: &dyn DownloadProgress,
) -> IngestSummary {
    let total = raw_symbols.len();
    let mut summary = IngestSummary {
        total,
        ..IngestSummary::default()
    };

    let mut breaker_open = false;
    for (i, raw) in raw_symbols.iter().enumerate() {
        let symbol = match Symbol::new(raw) {
            Ok(symbol) if is_provider_safe_str(raw) => symbol,
            _ => {
                progress.on_skip(raw, SkipReason::InvalidSymbol);
                summary.skipped_invalid.push(raw.clone());
                continue;
            }
        };

        if store.contains(&symbol) {
            progress.on_skip(symbol.as_str(), SkipReason::AlreadyStored);
            summary.skipped_existing.push(symbol);
            continue;
        }

        // Every further request would be refused; record without calling.
        if breaker_open {
            summary.failed.push((
                symbol.to_string(),
                StoreError::Provider(ProviderError::CircuitBreakerTripped),
            ));
            continue;
        }

        progress.on_start(symbol.as_str(), i, total);
        let result = store.add(&symbol).map(|bars| bars.len());
        progress.on_complete(symbol.as_str(), &result);

        match result {
            Ok(_) => summary.added.push(symbol),
            Err(e) => {
                breaker_open = matches!(
                    e,
                    StoreError::Provider(ProviderError::CircuitBreakerTripped)
                );
                summary.failed.push((symbol.to_string(), e));
            }
        }
    }

    progress.on_batch_complete(&summary);
    summary
}
