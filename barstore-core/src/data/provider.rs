//! Fetch capability trait and its error type.
//!
//! The store never talks to a market data vendor directly. It is handed a
//! `BarProvider` at construction and calls it for bootstrap and refresh, so
//! tests can substitute an in-memory fake.

use crate::domain::{Bar, Symbol, Timeframe};
use chrono::NaiveDate;
use thiserror::Error;

/// Errors reported by a market data provider.
///
/// The store does not catch or retry these; they surface to the caller
/// wrapped in `StoreError::Provider`.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("network unreachable: {0}")]
    NetworkUnreachable(String),

    #[error("rate limited by provider (retry after {retry_after_secs}s)")]
    RateLimited { retry_after_secs: u64 },

    #[error("response format changed: {0}")]
    ResponseFormatChanged(String),

    #[error("authentication required: {0}")]
    AuthenticationRequired(String),

    #[error("symbol not found: {symbol}")]
    SymbolNotFound { symbol: String },

    #[error("hard stop: data provider has blocked requests (circuit breaker tripped)")]
    CircuitBreakerTripped,

    #[error("provider error: {0}")]
    Other(String),
}

/// A source of historical bars (Alpaca REST, a test fake, ...).
pub trait BarProvider: Send + Sync {
    /// Human-readable name of this provider.
    fn name(&self) -> &str;

    /// Fetch bars for `symbol` at `timeframe` whose dates fall within
    /// `[start, end]`, in ascending timestamp order.
    fn fetch(
        &self,
        symbol: &Symbol,
        timeframe: Timeframe,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<Bar>, ProviderError>;

    /// Check if the provider is currently available (not rate-limited, not blocked).
    fn is_available(&self) -> bool {
        true
    }
}
