//! Barstore Core: local, year-partitioned cache of historical OHLCV bars.
//!
//! This crate contains:
//! - Domain types (bars, symbols, timeframes)
//! - The `BarStore` contract and its Parquet-backed implementation
//! - The chunk codec and on-disk directory layout
//! - The `BarProvider` fetch capability and an Alpaca REST provider
//! - Batch ingestion from symbol-list CSV files
//! - TOML configuration

pub mod config;
pub mod data;
pub mod domain;

pub use config::{ConfigError, ProviderConfig, StoreConfig};
pub use data::{BarProvider, BarStore, ParquetBarStore, ProviderError, StoreError};
pub use domain::{Bar, Symbol, Timeframe};
