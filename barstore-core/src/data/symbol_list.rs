//! Symbol lists: CSV files with a `Symbol` column (index constituents,
//! exchange listings, ...).

use csv::ReaderBuilder;
use std::io::Read;
use std::path::Path;
use thiserror::Error;

const SYMBOL_COLUMN: &str = "Symbol";

#[derive(Debug, Error)]
pub enum SymbolListError {
    #[error("{source_name}: {source}")]
    Csv {
        source_name: String,
        #[source]
        source: csv::Error,
    },

    #[error("{source_name}: no 'Symbol' column in header")]
    MissingColumn { source_name: String },
}

/// Read raw ticker strings, in file order, from each CSV file in turn.
pub fn read_symbol_lists<P: AsRef<Path>>(paths: &[P]) -> Result<Vec<String>, SymbolListError> {
    let mut symbols = Vec::new();
    for path in paths {
        let path = path.as_ref();
        let source_name = path.display().to_string();
        let reader = ReaderBuilder::new()
            .flexible(true)
            .from_path(path)
            .map_err(|source| SymbolListError::Csv {
                source_name: source_name.clone(),
                source,
            })?;
        symbols.extend(read_symbols(reader, &source_name)?);
    }
    Ok(symbols)
}

/// Read the `Symbol` column of one CSV document.
pub fn read_symbols<R: Read>(
    mut reader: csv::Reader<R>,
    source_name: &str,
) -> Result<Vec<String>, SymbolListError> {
    let csv_err = |source| SymbolListError::Csv {
        source_name: source_name.to_string(),
        source,
    };

    let column = reader
        .headers()
        .map_err(csv_err)?
        .iter()
        .position(|h| h.trim() == SYMBOL_COLUMN)
        .ok_or_else(|| SymbolListError::MissingColumn {
            source_name: source_name.to_string(),
        })?;

    let mut symbols = Vec::new();
    for record in reader.records() {
        let record = record.map_err(csv_err)?;
        if let Some(raw) = record.get(column).map(str::trim).filter(|s| !s.is_empty()) {
            symbols.push(raw.to_string());
        }
    }
    Ok(symbols)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn from_str(content: &str) -> Result<Vec<String>, SymbolListError> {
        let reader = ReaderBuilder::new()
            .flexible(true)
            .from_reader(content.as_bytes());
        read_symbols(reader, "inline")
    }

    #[test]
    fn reads_symbol_column_in_order() {
        let csv = "Symbol,Name,Sector\nMMM,3M,Industrials\nAOS,A. O. Smith,Industrials\n";
        assert_eq!(from_str(csv).unwrap(), vec!["MMM", "AOS"]);
    }

    #[test]
    fn column_position_is_not_fixed() {
        let csv = "Name,Symbol\nApple,AAPL\nBerkshire,BRK/B\n";
        assert_eq!(from_str(csv).unwrap(), vec!["AAPL", "BRK/B"]);
    }

    #[test]
    fn blank_cells_are_skipped() {
        let csv = "Symbol\nSPY\n\"  \"\nQQQ\n";
        assert_eq!(from_str(csv).unwrap(), vec!["SPY", "QQQ"]);
    }

    #[test]
    fn missing_column_is_an_error() {
        let err = from_str("Ticker\nSPY\n").unwrap_err();
        assert!(matches!(err, SymbolListError::MissingColumn { .. }));
    }

    #[test]
    fn reads_multiple_files() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.csv");
        let b = dir.path().join("b.csv");
        std::fs::write(&a, "Symbol\nSPY\n").unwrap();
        std::fs::write(&b, "Symbol\nQQQ\n^GSPC\n").unwrap();
        assert_eq!(read_symbol_lists(&[a, b]).unwrap(), vec!["SPY", "QQQ", "^GSPC"]);
    }
}
