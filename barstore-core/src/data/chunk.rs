//! Chunk codec: one symbol-year of bars as a zstd-compressed Parquet file.
//!
//! Columns: `timestamp` (Datetime[ns, UTC]), `open`, `high`, `low`, `close`
//! (f64), `volume` (u64), `trade_count` (nullable u64), `vwap` (nullable f64).
//!
//! Timestamps are stored at the full precision of `DateTime<Utc>`, so the
//! instant read back is the instant written. Encoding requires a non-empty,
//! strictly ascending, single-year slice within the nanosecond range
//! (years 1677 to 2262).
//! Decoding re-checks the same invariants so a hand-edited or truncated
//! file is reported instead of silently merged.

use super::error::StoreError;
use crate::domain::Bar;
use chrono::{DateTime, Datelike, Utc};
use polars::prelude::*;
use std::fs;
use std::path::Path;

const REQUIRED_COLUMNS: [&str; 6] = ["timestamp", "open", "high", "low", "close", "volume"];

/// Write `bars` to `path`, replacing any existing file.
///
/// The file is synced before returning so a following rename publishes
/// complete contents.
pub fn write_chunk(path: &Path, bars: &[Bar]) -> Result<(), StoreError> {
    check_chunk_invariants(bars).map_err(StoreError::InvalidArgument)?;
    let timestamps = timestamp_nanos(bars).map_err(StoreError::InvalidArgument)?;

    let mut df = bars_to_dataframe(bars, timestamps)
        .map_err(|e| StoreError::codec(path, format!("encode: {e}")))?;

    let mut file = fs::File::create(path).map_err(StoreError::io(path))?;
    ParquetWriter::new(&mut file)
        .with_compression(ParquetCompression::Zstd(None))
        .finish(&mut df)
        .map_err(|e| StoreError::codec(path, format!("write parquet: {e}")))?;
    file.sync_all().map_err(StoreError::io(path))?;
    Ok(())
}

/// Read the chunk at `path`, which must hold bars of `year` only.
pub fn read_chunk(path: &Path, year: i32) -> Result<Vec<Bar>, StoreError> {
    let file = fs::File::open(path).map_err(StoreError::io(path))?;
    let df = ParquetReader::new(file)
        .finish()
        .map_err(|e| StoreError::codec(path, format!("read parquet: {e}")))?;

    if df.height() == 0 {
        return Err(StoreError::codec(path, "empty chunk"));
    }
    for name in REQUIRED_COLUMNS {
        if df.column(name).is_err() {
            return Err(StoreError::codec(path, format!("missing column '{name}'")));
        }
    }

    let bars = dataframe_to_bars(&df).map_err(|reason| StoreError::codec(path, reason))?;

    if let Some(stray) = bars.iter().find(|b| b.year() != year) {
        return Err(StoreError::codec(
            path,
            format!("bar at {} does not belong to year {year}", stray.timestamp),
        ));
    }
    check_chunk_invariants(&bars).map_err(|reason| StoreError::codec(path, reason))?;
    Ok(bars)
}

/// Non-empty, one calendar year, timestamps strictly ascending.
fn check_chunk_invariants(bars: &[Bar]) -> Result<(), String> {
    let first = bars.first().ok_or("chunk has no bars")?;
    if let Some(other) = bars.iter().find(|b| b.year() != first.year()) {
        return Err(format!(
            "chunk spans years {} and {}",
            first.year(),
            other.year()
        ));
    }
    if let Some(pair) = bars.windows(2).find(|w| w[0].timestamp >= w[1].timestamp) {
        return Err(format!(
            "timestamps not strictly ascending at {} -> {}",
            pair[0].timestamp, pair[1].timestamp
        ));
    }
    Ok(())
}

fn timestamp_nanos(bars: &[Bar]) -> Result<Vec<i64>, String> {
    bars.iter()
        .map(|b| {
            b.timestamp
                .timestamp_nanos_opt()
                .ok_or_else(|| format!("timestamp {} outside the storable range", b.timestamp))
        })
        .collect()
}

fn bars_to_dataframe(bars: &[Bar], timestamps: Vec<i64>) -> PolarsResult<DataFrame> {
    let opens: Vec<f64> = bars.iter().map(|b| b.open).collect();
    let highs: Vec<f64> = bars.iter().map(|b| b.high).collect();
    let lows: Vec<f64> = bars.iter().map(|b| b.low).collect();
    let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
    let volumes: Vec<u64> = bars.iter().map(|b| b.volume).collect();
    let trade_counts: Vec<Option<u64>> = bars.iter().map(|b| b.trade_count).collect();
    let vwaps: Vec<Option<f64>> = bars.iter().map(|b| b.vwap).collect();

    DataFrame::new(vec![
        Column::new("timestamp".into(), timestamps).cast(&DataType::Datetime(
            TimeUnit::Nanoseconds,
            Some("UTC".into()),
        ))?,
        Column::new("open".into(), opens),
        Column::new("high".into(), highs),
        Column::new("low".into(), lows),
        Column::new("close".into(), closes),
        Column::new("volume".into(), volumes),
        Column::new("trade_count".into(), trade_counts),
        Column::new("vwap".into(), vwaps),
    ])
}

fn dataframe_to_bars(df: &DataFrame) -> Result<Vec<Bar>, String> {
    let column = |name: &str| df.column(name).map_err(|e| format!("column {name}: {e}"));
    let f64_column = |name: &str| {
        column(name)?
            .f64()
            .map(|ca| ca.clone())
            .map_err(|e| format!("{name} column type: {e}"))
    };

    let ts_col = column("timestamp")?;
    let unit = match ts_col.dtype() {
        DataType::Datetime(unit, _) => *unit,
        other => return Err(format!("timestamp column has type {other}, expected datetime")),
    };
    let ts_physical = ts_col
        .cast(&DataType::Int64)
        .map_err(|e| format!("timestamp cast: {e}"))?;
    let ts_ca = ts_physical
        .i64()
        .map_err(|e| format!("timestamp column type: {e}"))?;

    let open_ca = f64_column("open")?;
    let high_ca = f64_column("high")?;
    let low_ca = f64_column("low")?;
    let close_ca = f64_column("close")?;
    let vol_ca = column("volume")?
        .u64()
        .map_err(|e| format!("volume column type: {e}"))?;

    // Optional columns: chunks written without them decode as all-null.
    let trade_ca = match df.column("trade_count") {
        Ok(col) => Some(
            col.u64()
                .map_err(|e| format!("trade_count column type: {e}"))?,
        ),
        Err(_) => None,
    };
    let vwap_ca = match df.column("vwap") {
        Ok(_) => Some(f64_column("vwap")?),
        Err(_) => None,
    };

    let n = df.height();
    let mut bars = Vec::with_capacity(n);
    for i in 0..n {
        let raw = ts_ca
            .get(i)
            .ok_or_else(|| format!("null timestamp at row {i}"))?;
        let timestamp = instant_from_physical(raw, unit)
            .ok_or_else(|| format!("timestamp out of range at row {i}: {raw}"))?;

        bars.push(Bar {
            timestamp,
            open: open_ca.get(i).unwrap_or(f64::NAN),
            high: high_ca.get(i).unwrap_or(f64::NAN),
            low: low_ca.get(i).unwrap_or(f64::NAN),
            close: close_ca.get(i).unwrap_or(f64::NAN),
            volume: vol_ca.get(i).unwrap_or(0),
            trade_count: trade_ca.and_then(|ca| ca.get(i)),
            vwap: vwap_ca.as_ref().and_then(|ca| ca.get(i)),
        });
    }
    Ok(bars)
}

fn instant_from_physical(value: i64, unit: TimeUnit) -> Option<DateTime<Utc>> {
    match unit {
        TimeUnit::Nanoseconds => Some(DateTime::from_timestamp_nanos(value)),
        TimeUnit::Microseconds => DateTime::from_timestamp_micros(value),
        TimeUnit::Milliseconds => DateTime::from_timestamp_millis(value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Timelike};

    fn bar(y: i32, m: u32, d: u32, close: f64) -> Bar {
        Bar {
            timestamp: Utc.with_ymd_and_hms(y, m, d, 5, 0, 0).unwrap(),
            open: close - 1.0,
            high: close + 1.0,
            low: close - 2.0,
            close,
            volume: 1_000,
            trade_count: None,
            vwap: None,
        }
    }

    #[test]
    fn write_and_read_preserves_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("2024.parquet");
        let mut bars = vec![bar(2024, 1, 2, 101.0), bar(2024, 1, 3, 102.0)];
        bars[1].trade_count = Some(42);
        bars[1].vwap = Some(101.7);
        bars[1].timestamp = bars[1].timestamp.with_nanosecond(123_456_000).unwrap();

        write_chunk(&path, &bars).unwrap();
        let loaded = read_chunk(&path, 2024).unwrap();

        assert_eq!(loaded, bars);
        assert_eq!(loaded[0].trade_count, None);
        assert_eq!(loaded[1].vwap, Some(101.7));
    }

    #[test]
    fn write_rejects_empty_and_multi_year() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("2024.parquet");
        assert!(matches!(
            write_chunk(&path, &[]),
            Err(StoreError::InvalidArgument(_))
        ));
        assert!(matches!(
            write_chunk(&path, &[bar(2023, 12, 29, 1.0), bar(2024, 1, 2, 2.0)]),
            Err(StoreError::InvalidArgument(_))
        ));
        assert!(!path.exists());
    }

    #[test]
    fn write_rejects_unsorted_or_duplicate() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("2024.parquet");
        let dup = vec![bar(2024, 1, 2, 1.0), bar(2024, 1, 2, 2.0)];
        assert!(write_chunk(&path, &dup).is_err());
        let unsorted = vec![bar(2024, 1, 3, 1.0), bar(2024, 1, 2, 2.0)];
        assert!(write_chunk(&path, &unsorted).is_err());
    }

    #[test]
    fn read_rejects_wrong_year() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("2023.parquet");
        write_chunk(&path, &[bar(2024, 1, 2, 1.0)]).unwrap();
        assert!(matches!(
            read_chunk(&path, 2023),
            Err(StoreError::Codec { .. })
        ));
    }

    #[test]
    fn read_garbage_is_codec_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("2024.parquet");
        fs::write(&path, b"definitely not parquet").unwrap();
        assert!(matches!(
            read_chunk(&path, 2024),
            Err(StoreError::Codec { .. })
        ));
    }

    #[test]
    fn read_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            read_chunk(&dir.path().join("1999.parquet"), 1999),
            Err(StoreError::Io { .. })
        ));
    }

    #[test]
    fn sub_microsecond_instants_survive_and_stay_distinct() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("2024.parquet");
        let first = bar(2024, 1, 2, 1.0);
        let mut second = first.clone();
        second.timestamp = first.timestamp + chrono::Duration::nanoseconds(500);
        second.close = 2.0;
        let mut third = bar(2024, 1, 3, 3.0);
        third.timestamp = third.timestamp.with_nanosecond(1).unwrap();

        let bars = vec![first, second, third];
        write_chunk(&path, &bars).unwrap();

        assert_eq!(read_chunk(&path, 2024).unwrap(), bars);
    }

    #[test]
    fn write_rejects_instants_outside_nanosecond_range() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("2300.parquet");
        assert!(matches!(
            write_chunk(&path, &[bar(2300, 1, 2, 1.0)]),
            Err(StoreError::InvalidArgument(_))
        ));
        assert!(!path.exists());
    }

    #[test]
    fn reads_chunks_written_with_microsecond_timestamps() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("2024.parquet");
        let bars = vec![bar(2024, 1, 2, 1.0), bar(2024, 1, 3, 2.0)];
        let micros: Vec<i64> = bars.iter().map(|b| b.timestamp.timestamp_micros()).collect();
        let mut df = DataFrame::new(vec![
            Column::new("timestamp".into(), micros)
                .cast(&DataType::Datetime(TimeUnit::Microseconds, Some("UTC".into())))
                .unwrap(),
            Column::new("open".into(), bars.iter().map(|b| b.open).collect::<Vec<_>>()),
            Column::new("high".into(), bars.iter().map(|b| b.high).collect::<Vec<_>>()),
            Column::new("low".into(), bars.iter().map(|b| b.low).collect::<Vec<_>>()),
            Column::new("close".into(), bars.iter().map(|b| b.close).collect::<Vec<_>>()),
            Column::new("volume".into(), bars.iter().map(|b| b.volume).collect::<Vec<_>>()),
        ])
        .unwrap();
        let mut file = fs::File::create(&path).unwrap();
        ParquetWriter::new(&mut file).finish(&mut df).unwrap();

        assert_eq!(read_chunk(&path, 2024).unwrap(), bars);
    }
}
