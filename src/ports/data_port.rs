//! Signal and price data access port trait.

use crate::domain::error::SigtraderError;
use crate::domain::price::PricePoint;
use crate::domain::signal::SignalPoint;
use chrono::{DateTime, Utc};

/// Span of stored data for one asset.
#[derive(Debug, Clone, PartialEq)]
pub struct DataRange {
    pub first: DateTime<Utc>,
    pub last: DateTime<Utc>,
    pub price_rows: usize,
    pub signal_rows: usize,
    pub sources: Vec<String>,
}

pub trait DataPort {
    fn fetch_signals(&self, asset_id: &str) -> Result<Vec<SignalPoint>, SigtraderError>;

    fn fetch_prices(&self, asset_id: &str) -> Result<Vec<PricePoint>, SigtraderError>;

    /// Assets with price data, sorted.
    fn list_assets(&self) -> Result<Vec<String>, SigtraderError>;

    fn get_data_range(&self, asset_id: &str) -> Result<Option<DataRange>, SigtraderError>;
}
