//! CSV file data adapter.
//!
//! Both feeds are long-format files holding every asset:
//!
//! ```text
//! asset_id,timestamp,source_id,strength,confidence
//! asset_id,timestamp,close
//! ```

use crate::domain::error::SigtraderError;
use crate::domain::price::PricePoint;
use crate::domain::signal::SignalPoint;
use crate::ports::data_port::{DataPort, DataRange};
use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use tracing::debug;

#[derive(Debug, Deserialize)]
struct SignalRecord {
    asset_id: String,
    timestamp: String,
    source_id: String,
    strength: f64,
    confidence: f64,
}

#[derive(Debug, Deserialize)]
struct PriceRecord {
    asset_id: String,
    timestamp: String,
    close: f64,
}

/// In-memory copy of the signal and price files.
pub struct CsvAdapter {
    signals: Vec<SignalPoint>,
    prices: Vec<PricePoint>,
}

impl CsvAdapter {
    pub fn load(signals_path: &Path, prices_path: &Path) -> Result<Self, SigtraderError> {
        let signals = read_signals(&read_file(signals_path)?, &signals_path.display().to_string())?;
        let prices = read_prices(&read_file(prices_path)?, &prices_path.display().to_string())?;
        debug!(
            signals = signals.len(),
            prices = prices.len(),
            "loaded CSV feeds"
        );
        Ok(Self { signals, prices })
    }

    pub fn from_strings(signals_csv: &str, prices_csv: &str) -> Result<Self, SigtraderError> {
        Ok(Self {
            signals: read_signals(signals_csv, "signals")?,
            prices: read_prices(prices_csv, "prices")?,
        })
    }
}

fn read_file(path: &Path) -> Result<String, SigtraderError> {
    fs::read_to_string(path).map_err(|e| SigtraderError::Data {
        reason: format!("failed to read {}: {}", path.display(), e),
    })
}

fn reader(content: &str) -> csv::Reader<&[u8]> {
    csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(content.as_bytes())
}

fn read_signals(content: &str, origin: &str) -> Result<Vec<SignalPoint>, SigtraderError> {
    let mut points = Vec::new();
    for result in reader(content).deserialize::<SignalRecord>() {
        let record = result.map_err(|e| SigtraderError::Data {
            reason: format!("{origin}: CSV parse error: {e}"),
        })?;
        if record.strength.is_nan() || record.confidence.is_nan() {
            return Err(SigtraderError::Data {
                reason: format!(
                    "{origin}: NaN signal from {} for {} at {}",
                    record.source_id, record.asset_id, record.timestamp
                ),
            });
        }
        let timestamp = parse_timestamp(&record.timestamp)?;
        points.push(SignalPoint::new(
            record.asset_id,
            timestamp,
            record.source_id,
            record.strength,
            record.confidence,
        ));
    }
    Ok(points)
}

fn read_prices(content: &str, origin: &str) -> Result<Vec<PricePoint>, SigtraderError> {
    let mut points = Vec::new();
    for result in reader(content).deserialize::<PriceRecord>() {
        let record = result.map_err(|e| SigtraderError::Data {
            reason: format!("{origin}: CSV parse error: {e}"),
        })?;
        points.push(PricePoint {
            timestamp: parse_timestamp(&record.timestamp)?,
            asset_id: record.asset_id,
            close: record.close,
        });
    }
    Ok(points)
}

/// Accepts RFC 3339, `YYYY-MM-DD` (midnight UTC) or integer epoch seconds.
pub fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, SigtraderError> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return Ok(ts.with_timezone(&Utc));
    }
    if let Some(ts) = NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
    {
        return Ok(ts.and_utc());
    }
    if let Some(ts) = value.parse::<i64>().ok().and_then(|secs| DateTime::from_timestamp(secs, 0)) {
        return Ok(ts);
    }
    Err(SigtraderError::Data {
        reason: format!("invalid timestamp '{value}'"),
    })
}

impl DataPort for CsvAdapter {
    fn fetch_signals(&self, asset_id: &str) -> Result<Vec<SignalPoint>, SigtraderError> {
        let mut points: Vec<SignalPoint> = self
            .signals
            .iter()
            .filter(|p| p.asset_id == asset_id)
            .cloned()
            .collect();
        points.sort_by_key(|p| p.timestamp);
        Ok(points)
    }

    fn fetch_prices(&self, asset_id: &str) -> Result<Vec<PricePoint>, SigtraderError> {
        let mut points: Vec<PricePoint> = self
            .prices
            .iter()
            .filter(|p| p.asset_id == asset_id)
            .cloned()
            .collect();
        points.sort_by_key(|p| p.timestamp);
        Ok(points)
    }

    fn list_assets(&self) -> Result<Vec<String>, SigtraderError> {
        let assets: BTreeSet<&str> = self.prices.iter().map(|p| p.asset_id.as_str()).collect();
        Ok(assets.into_iter().map(String::from).collect())
    }

    fn get_data_range(&self, asset_id: &str) -> Result<Option<DataRange>, SigtraderError> {
        let prices = self.fetch_prices(asset_id)?;
        let (Some(first), Some(last)) = (prices.first(), prices.last()) else {
            return Ok(None);
        };
        let signals = self.fetch_signals(asset_id)?;
        let sources: BTreeSet<&str> = signals.iter().map(|s| s.source_id.as_str()).collect();
        Ok(Some(DataRange {
            first: first.timestamp,
            last: last.timestamp,
            price_rows: prices.len(),
            signal_rows: signals.len(),
            sources: sources.into_iter().map(String::from).collect(),
        }))
    }
}
