#![allow(dead_code)]

use chrono::{DateTime, Duration, TimeZone, Utc};
use sigtrader::domain::aggregator::AggregatorConfig;
use sigtrader::domain::backtest::BacktestConfig;
use sigtrader::domain::error::SigtraderError;
use sigtrader::domain::normalizer::NormalizerConfig;
use sigtrader::domain::pipeline::{AssetInput, EngineConfig};
use sigtrader::domain::price::{PricePoint, PriceSeries};
use sigtrader::domain::signal::SignalPoint;
use sigtrader::ports::data_port::{DataPort, DataRange};
use std::collections::{BTreeMap, HashMap};

pub struct MockDataPort {
    pub prices: HashMap<String, Vec<PricePoint>>,
    pub signals: HashMap<String, Vec<SignalPoint>>,
    pub errors: HashMap<String, String>,
}

impl MockDataPort {
    pub fn new() -> Self {
        Self {
            prices: HashMap::new(),
            signals: HashMap::new(),
            errors: HashMap::new(),
        }
    }

    pub fn with_prices(mut self, asset: &str, closes: &[f64]) -> Self {
        self.prices.insert(asset.to_string(), price_points(asset, closes));
        self
    }

    pub fn with_signals(mut self, asset: &str, points: Vec<SignalPoint>) -> Self {
        self.signals.entry(asset.to_string()).or_default().extend(points);
        self
    }

    pub fn with_error(mut self, asset: &str, reason: &str) -> Self {
        self.errors.insert(asset.to_string(), reason.to_string());
        self
    }

    fn check(&self, asset: &str) -> Result<(), SigtraderError> {
        match self.errors.get(asset) {
            Some(reason) => Err(SigtraderError::Data {
                reason: reason.clone(),
            }),
            None => Ok(()),
        }
    }
}

impl DataPort for MockDataPort {
    fn fetch_signals(&self, asset_id: &str) -> Result<Vec<SignalPoint>, SigtraderError> {
        self.check(asset_id)?;
        Ok(self.signals.get(asset_id).cloned().unwrap_or_default())
    }

    fn fetch_prices(&self, asset_id: &str) -> Result<Vec<PricePoint>, SigtraderError> {
        self.check(asset_id)?;
        Ok(self.prices.get(asset_id).cloned().unwrap_or_default())
    }

    fn list_assets(&self) -> Result<Vec<String>, SigtraderError> {
        let mut assets: Vec<String> = self.prices.keys().cloned().collect();
        assets.sort();
        Ok(assets)
    }

    fn get_data_range(&self, asset_id: &str) -> Result<Option<DataRange>, SigtraderError> {
        self.check(asset_id)?;
        let Some(prices) = self.prices.get(asset_id).filter(|p| !p.is_empty()) else {
            return Ok(None);
        };
        let signals = self.signals.get(asset_id).cloned().unwrap_or_default();
        let mut sources: Vec<String> = signals.iter().map(|s| s.source_id.clone()).collect();
        sources.sort();
        sources.dedup();
        Ok(Some(DataRange {
            first: prices.iter().map(|p| p.timestamp).min().unwrap(),
            last: prices.iter().map(|p| p.timestamp).max().unwrap(),
            price_rows: prices.len(),
            signal_rows: signals.len(),
            sources,
        }))
    }
}

/// Daily bar `i` starting 2024-01-01.
pub fn ts(i: usize) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::days(i as i64)
}

pub fn price_points(asset: &str, closes: &[f64]) -> Vec<PricePoint> {
    closes
        .iter()
        .enumerate()
        .map(|(i, &close)| PricePoint {
            asset_id: asset.to_string(),
            timestamp: ts(i),
            close,
        })
        .collect()
}

pub fn series(asset: &str, closes: &[f64]) -> PriceSeries {
    PriceSeries::from_points(asset, &price_points(asset, closes)).unwrap()
}

/// One point per bar from `source`, full confidence.
pub fn signal_run(asset: &str, source: &str, strengths: &[f64]) -> Vec<SignalPoint> {
    strengths
        .iter()
        .enumerate()
        .map(|(i, &s)| SignalPoint::new(asset, ts(i), source, s, 1.0))
        .collect()
}

pub fn input(asset: &str, closes: &[f64], signals: Vec<SignalPoint>) -> AssetInput {
    AssetInput {
        asset_id: asset.to_string(),
        signals,
        prices: series(asset, closes),
    }
}

pub fn weights(pairs: &[(&str, f64)]) -> BTreeMap<String, f64> {
    pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
}

/// Threshold 0.5, no band, 10,000 cash, full sizing, zero costs.
pub fn engine_config(pairs: &[(&str, f64)]) -> EngineConfig {
    EngineConfig {
        normalizer: NormalizerConfig::default(),
        aggregator: AggregatorConfig {
            weights: weights(pairs),
            ..AggregatorConfig::default()
        },
        backtest: BacktestConfig::default(),
        walk_forward: None,
    }
}
