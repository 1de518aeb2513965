//! Historical bar loading for backtesting.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

/// One instrument's bar (and optional closing quote) from the data file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BarRecord {
    pub timestamp: DateTime<Utc>,
    pub symbol: String,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub bid: Option<Decimal>,
    pub ask: Option<Decimal>,
}

impl BarRecord {
    pub fn has_quote(&self) -> bool {
        self.bid.is_some() || self.ask.is_some()
    }
}

/// All bars sharing one open time, in file order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub timestamp: DateTime<Utc>,
    pub bars: Vec<BarRecord>,
}

/// Source of historical bars.
pub trait DataLoader: Send + Sync {
    /// Snapshots with `start <= timestamp <= end`, oldest first.
    fn load_snapshots(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Vec<MarketSnapshot>>;

    fn available_range(&self) -> Option<(DateTime<Utc>, DateTime<Utc>)>;

    fn available_symbols(&self) -> Vec<String>;
}

/// CSV bar loader.
///
/// Expected CSV format (bid/ask optional):
/// ```csv
/// timestamp,symbol,open,high,low,close,bid,ask
/// 2024-01-02T00:00:00Z,EURUSD,1.10410,1.10480,1.10350,1.10420,1.10418,1.10422
/// ```
#[derive(Debug, Clone)]
pub struct CsvBarLoader {
    snapshots: Vec<MarketSnapshot>,
    symbols: Vec<String>,
}

impl CsvBarLoader {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read CSV file: {}", path.display()))?;

        Self::from_csv_content(&content)
    }

    pub fn from_csv_content(content: &str) -> Result<Self> {
        let mut by_timestamp: BTreeMap<DateTime<Utc>, Vec<BarRecord>> = BTreeMap::new();
        let mut symbols = BTreeSet::new();

        for (line_num, line) in content.lines().enumerate() {
            if line_num == 0 && line.starts_with("timestamp") {
                continue;
            }
            if line.trim().is_empty() {
                continue;
            }

            let record = parse_row(line)
                .with_context(|| format!("Failed to parse line {}: {}", line_num + 1, line))?;
            symbols.insert(record.symbol.clone());
            by_timestamp.entry(record.timestamp).or_default().push(record);
        }

        if by_timestamp.is_empty() {
            anyhow::bail!("CSV file contains no data rows");
        }

        Ok(Self {
            snapshots: by_timestamp
                .into_iter()
                .map(|(timestamp, bars)| MarketSnapshot { timestamp, bars })
                .collect(),
            symbols: symbols.into_iter().collect(),
        })
    }

    /// Number of distinct bar times.
    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    pub fn bar_count(&self) -> usize {
        self.snapshots.iter().map(|s| s.bars.len()).sum()
    }

    pub fn has_quotes(&self) -> bool {
        self.snapshots
            .iter()
            .flat_map(|s| &s.bars)
            .any(BarRecord::has_quote)
    }
}

impl DataLoader for CsvBarLoader {
    fn load_snapshots(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Vec<MarketSnapshot>> {
        Ok(self
            .snapshots
            .iter()
            .filter(|s| s.timestamp >= start && s.timestamp <= end)
            .cloned()
            .collect())
    }

    fn available_range(&self) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        let first = self.snapshots.first()?;
        let last = self.snapshots.last()?;
        Some((first.timestamp, last.timestamp))
    }

    fn available_symbols(&self) -> Vec<String> {
        self.symbols.clone()
    }
}

fn parse_decimal(raw: &str, column: &str) -> Result<Decimal> {
    raw.trim()
        .parse()
        .with_context(|| format!("Invalid {}: {}", column, raw))
}

fn parse_optional(parts: &[&str], index: usize, column: &str) -> Result<Option<Decimal>> {
    match parts.get(index).map(|s| s.trim()) {
        None | Some("") => Ok(None),
        Some(raw) => parse_decimal(raw, column).map(Some),
    }
}

fn parse_row(line: &str) -> Result<BarRecord> {
    let parts: Vec<&str> = line.split(',').collect();
    if parts.len() < 6 {
        anyhow::bail!(
            "Expected at least 6 columns (timestamp,symbol,open,high,low,close[,bid,ask]), got {}",
            parts.len()
        );
    }

    let record = BarRecord {
        timestamp: parts[0]
            .trim()
            .parse()
            .with_context(|| format!("Invalid timestamp: {}", parts[0]))?,
        symbol: parts[1].trim().to_string(),
        open: parse_decimal(parts[2], "open")?,
        high: parse_decimal(parts[3], "high")?,
        low: parse_decimal(parts[4], "low")?,
        close: parse_decimal(parts[5], "close")?,
        bid: parse_optional(&parts, 6, "bid")?,
        ask: parse_optional(&parts, 7, "ask")?,
    };

    if record.symbol.is_empty() {
        anyhow::bail!("Empty symbol");
    }
    if record.high < record.low {
        anyhow::bail!("High {} below low {}", record.high, record.low);
    }
    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, TimeZone};
    use rust_decimal_macros::dec;

    const SAMPLE: &str = r#"timestamp,symbol,open,high,low,close,bid,ask
2024-01-02T00:00:00Z,EURUSD,1.1041,1.1048,1.1035,1.1042,1.1041,1.1043
2024-01-02T00:00:00Z,GBPUSD,1.2701,1.2712,1.2695,1.2708,,
2024-01-01T00:00:00Z,EURUSD,1.1030,1.1045,1.1025,1.1040
2024-01-03T00:00:00Z,EURUSD,1.1042,1.1050,1.1031,1.1036,1.1035,1.1037
"#;

    #[test]
    fn test_csv_parsing_groups_and_sorts() {
        let loader = CsvBarLoader::from_csv_content(SAMPLE).unwrap();

        assert_eq!(loader.len(), 3);
        assert_eq!(loader.bar_count(), 4);
        assert_eq!(loader.available_symbols(), vec!["EURUSD", "GBPUSD"]);
        assert!(loader.has_quotes());

        let range = loader.available_range().unwrap();
        assert_eq!(range.0, Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
        assert_eq!(range.1, Utc.with_ymd_and_hms(2024, 1, 3, 0, 0, 0).unwrap());

        let (start, end) = range;
        let snapshots = loader.load_snapshots(start, end).unwrap();
        assert_eq!(snapshots[1].bars.len(), 2);
        assert_eq!(snapshots[1].bars[0].symbol, "EURUSD");
        assert_eq!(snapshots[1].bars[0].bid, Some(dec!(1.1041)));
        assert_eq!(snapshots[1].bars[1].bid, None);
        assert!(!snapshots[0].bars[0].has_quote());
    }

    #[test]
    fn test_filter_by_date_range() {
        let loader = CsvBarLoader::from_csv_content(SAMPLE).unwrap();

        let start = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2024, 1, 2, 12, 0, 0).unwrap();

        let filtered = loader.load_snapshots(start, end).unwrap();
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].timestamp.day(), 2);
    }

    #[test]
    fn test_rejects_malformed_rows() {
        let short = "timestamp,symbol,open,high,low,close\n2024-01-01T00:00:00Z,EURUSD,1.1,1.2\n";
        assert!(CsvBarLoader::from_csv_content(short).is_err());

        let inverted = "2024-01-01T00:00:00Z,EURUSD,1.1,1.0,1.2,1.1\n";
        assert!(CsvBarLoader::from_csv_content(inverted).is_err());

        let bad_price = "2024-01-01T00:00:00Z,EURUSD,1.1,abc,1.0,1.1\n";
        let err = CsvBarLoader::from_csv_content(bad_price).unwrap_err();
        assert!(format!("{:#}", err).contains("Invalid high"));

        assert!(CsvBarLoader::from_csv_content("timestamp,symbol\n").is_err());
    }
}
