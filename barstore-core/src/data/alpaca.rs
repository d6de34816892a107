//! Alpaca market data provider.
//!
//! Fetches historical stock bars from the Alpaca Market Data v2 REST API
//! (`/v2/stocks/{symbol}/bars`), following `next_page_token` pagination.
//! Handles rate limiting, retries with exponential backoff, and the circuit
//! breaker.

use super::circuit_breaker::CircuitBreaker;
use super::provider::{BarProvider, ProviderError};
use crate::config::{ProviderConfig, MAX_RETRIES};
use crate::domain::{Bar, Symbol, Timeframe};
use chrono::{DateTime, NaiveDate, Utc};
use reqwest::header::{HeaderMap, HeaderValue};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

pub const KEY_ID_ENV: &str = "APCA_API_KEY_ID";
pub const SECRET_KEY_ENV: &str = "APCA_API_SECRET_KEY";

/// Largest page the API serves.
const PAGE_LIMIT: u32 = 10_000;

const MAX_BACKOFF: Duration = Duration::from_secs(60);

#[derive(Debug, Deserialize)]
struct BarsPage {
    #[serde(default)]
    bars: Option<Vec<AlpacaBar>>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AlpacaBar {
    #[serde(rename = "t")]
    timestamp: DateTime<Utc>,
    #[serde(rename = "o")]
    open: f64,
    #[serde(rename = "h")]
    high: f64,
    #[serde(rename = "l")]
    low: f64,
    #[serde(rename = "c")]
    close: f64,
    #[serde(rename = "v")]
    volume: f64,
    #[serde(rename = "n")]
    trade_count: Option<u64>,
    #[serde(rename = "vw")]
    vwap: Option<f64>,
}

impl From<AlpacaBar> for Bar {
    fn from(ab: AlpacaBar) -> Self {
        Bar {
            timestamp: ab.timestamp,
            open: ab.open,
            high: ab.high,
            low: ab.low,
            close: ab.close,
            volume: ab.volume.max(0.0).round() as u64,
            trade_count: ab.trade_count,
            vwap: ab.vwap,
        }
    }
}

/// Alpaca REST data provider.
///
/// Owns its HTTP client; construct one and share it (via `Arc`) between
/// every store that needs it.
pub struct AlpacaProvider {
    client: reqwest::blocking::Client,
    base_url: String,
    feed: String,
    circuit_breaker: CircuitBreaker,
    max_retries: u32,
    base_delay: Duration,
}

impl AlpacaProvider {
    pub fn new(
        key_id: &str,
        secret_key: &str,
        config: &ProviderConfig,
    ) -> Result<Self, ProviderError> {
        let mut headers = HeaderMap::new();
        headers.insert("APCA-API-KEY-ID", header_value(key_id)?);
        headers.insert("APCA-API-SECRET-KEY", header_value(secret_key)?);

        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .default_headers(headers)
            .build()
            .map_err(|e| ProviderError::Other(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            feed: config.feed.clone(),
            circuit_breaker: CircuitBreaker::new(
                Duration::from_secs(config.breaker_cooldown_secs),
                3,
            ),
            max_retries: config.max_retries.min(MAX_RETRIES),
            base_delay: Duration::from_millis(500),
        })
    }

    /// Build a provider from the `APCA_API_KEY_ID` / `APCA_API_SECRET_KEY`
    /// environment variables.
    pub fn from_env(config: &ProviderConfig) -> Result<Self, ProviderError> {
        let key_id = env_credential(KEY_ID_ENV)?;
        let secret_key = env_credential(SECRET_KEY_ENV)?;
        Self::new(&key_id, &secret_key, config)
    }

    pub fn circuit_breaker(&self) -> &CircuitBreaker {
        &self.circuit_breaker
    }

    fn bars_url(&self, symbol: &Symbol) -> String {
        format!("{}/v2/stocks/{symbol}/bars", self.base_url)
    }

    fn query(
        &self,
        timeframe: Timeframe,
        start: NaiveDate,
        end: NaiveDate,
        page_token: Option<&str>,
    ) -> Vec<(&'static str, String)> {
        let mut query = vec![
            ("timeframe", timeframe.to_string()),
            ("start", format!("{start}T00:00:00Z")),
            ("end", format!("{end}T23:59:59Z")),
            ("limit", PAGE_LIMIT.to_string()),
            ("adjustment", "raw".to_string()),
            ("feed", self.feed.clone()),
            ("sort", "asc".to_string()),
        ];
        if let Some(token) = page_token {
            query.push(("page_token", token.to_string()));
        }
        query
    }

    /// Wait before retry `attempt` (1-based): the base delay doubled per
    /// attempt, capped at `MAX_BACKOFF`.
    fn backoff_delay(&self, attempt: u32) -> Duration {
        2u32.checked_pow(attempt.saturating_sub(1))
            .and_then(|factor| self.base_delay.checked_mul(factor))
            .map_or(MAX_BACKOFF, |delay| delay.min(MAX_BACKOFF))
    }

    /// Execute a single page request with retry and circuit breaker logic.
    fn get_page(
        &self,
        symbol: &Symbol,
        query: &[(&'static str, String)],
    ) -> Result<BarsPage, ProviderError> {
        if !self.circuit_breaker.is_allowed() {
            return Err(ProviderError::CircuitBreakerTripped);
        }

        let url = self.bars_url(symbol);
        let mut last_error = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = self.backoff_delay(attempt);
                debug!(%symbol, attempt, delay_ms = delay.as_millis() as u64, "retrying bars request");
                std::thread::sleep(delay);
            }

            if !self.circuit_breaker.is_allowed() {
                return Err(ProviderError::CircuitBreakerTripped);
            }

            let resp = match self.client.get(&url).query(query).send() {
                Ok(resp) => resp,
                Err(e) if e.is_connect() || e.is_timeout() => {
                    self.circuit_breaker.record_failure();
                    last_error = Some(ProviderError::NetworkUnreachable(e.to_string()));
                    continue;
                }
                Err(e) => return Err(ProviderError::NetworkUnreachable(e.to_string())),
            };

            let status = resp.status();
            if status == reqwest::StatusCode::FORBIDDEN {
                self.circuit_breaker.trip();
                return Err(ProviderError::CircuitBreakerTripped);
            }
            if status == reqwest::StatusCode::UNAUTHORIZED {
                return Err(ProviderError::AuthenticationRequired(
                    "Alpaca rejected the API key".into(),
                ));
            }
            if status == reqwest::StatusCode::NOT_FOUND {
                return Err(ProviderError::SymbolNotFound {
                    symbol: symbol.to_string(),
                });
            }
            if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                self.circuit_breaker.record_failure();
                let retry_after = resp
                    .headers()
                    .get("retry-after")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse::<u64>().ok())
                    .unwrap_or(60);
                warn!(%symbol, retry_after, "rate limited by provider");
                last_error = Some(ProviderError::RateLimited {
                    retry_after_secs: retry_after,
                });
                continue;
            }
            if status.is_server_error() {
                self.circuit_breaker.record_failure();
                last_error = Some(ProviderError::Other(format!("HTTP {status} for {symbol}")));
                continue;
            }
            if !status.is_success() {
                let body = resp.text().unwrap_or_default();
                return Err(ProviderError::Other(format!(
                    "HTTP {status} for {symbol}: {body}"
                )));
            }

            let page: BarsPage = resp.json().map_err(|e| {
                ProviderError::ResponseFormatChanged(format!(
                    "failed to parse response for {symbol}: {e}"
                ))
            })?;
            self.circuit_breaker.record_success();
            return Ok(page);
        }

        Err(last_error.unwrap_or_else(|| ProviderError::Other("max retries exceeded".into())))
    }
}

impl BarProvider for AlpacaProvider {
    fn name(&self) -> &str {
        "alpaca"
    }

    fn fetch(
        &self,
        symbol: &Symbol,
        timeframe: Timeframe,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<Bar>, ProviderError> {
        let mut bars = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let query = self.query(timeframe, start, end, page_token.as_deref());
            let page = self.get_page(symbol, &query)?;
            bars.extend(page.bars.unwrap_or_default().into_iter().map(Bar::from));
            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }
        debug!(%symbol, %timeframe, %start, %end, rows = bars.len(), "fetched bars");
        Ok(bars)
    }

    fn is_available(&self) -> bool {
        self.circuit_breaker.is_allowed()
    }
}

fn header_value(raw: &str) -> Result<HeaderValue, ProviderError> {
    let mut value = HeaderValue::from_str(raw).map_err(|_| {
        ProviderError::AuthenticationRequired("API credentials contain invalid characters".into())
    })?;
    value.set_sensitive(true);
    Ok(value)
}

fn env_credential(name: &str) -> Result<String, ProviderError> {
    std::env::var(name)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| ProviderError::AuthenticationRequired(format!("{name} is not set")))
}
