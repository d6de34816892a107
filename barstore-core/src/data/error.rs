use super::provider::ProviderError;
use crate::domain::{Symbol, SymbolError};
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Structured error types for store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("no stored data for symbol '{symbol}'")]
    NotFound { symbol: Symbol },

    #[error("symbol '{symbol}' is already stored; refresh it instead of adding it")]
    AlreadyExists { symbol: Symbol },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error(transparent)]
    InvalidSymbol(#[from] SymbolError),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("corrupt chunk {}: {reason}", path.display())]
    Codec { path: PathBuf, reason: String },

    #[error("I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>) -> impl FnOnce(io::Error) -> StoreError {
        let path = path.into();
        move |source| StoreError::Io { path, source }
    }

    pub(crate) fn codec(path: impl Into<PathBuf>, reason: impl Into<String>) -> StoreError {
        StoreError::Codec {
            path: path.into(),
            reason: reason.into(),
        }
    }
}
