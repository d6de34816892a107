//! Bar storage, fetching, and batch ingestion

pub mod alpaca;
pub mod chunk;
pub mod circuit_breaker;
pub mod download;
pub mod error;
pub mod layout;
pub mod parquet_store;
pub mod provider;
pub mod store;
pub mod symbol_list;

pub use alpaca::AlpacaProvider;
pub use circuit_breaker::CircuitBreaker;
pub use download::{ingest_symbols, DownloadProgress, IngestSummary, LogProgress, SkipReason};
pub use error::StoreError;
pub use layout::{ChunkFile, ChunkLayout};
pub use parquet_store::{ChunkIssue, ParquetBarStore, SymbolStatus};
pub use provider::{BarProvider, ProviderError};
pub use store::{default_stale_threshold, BarStore};
pub use symbol_list::{read_symbol_lists, SymbolListError};
