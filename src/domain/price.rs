//! Close-price series used for execution reference and mark-to-market.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::error::SigtraderError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    pub asset_id: String,
    pub timestamp: DateTime<Utc>,
    pub close: f64,
}

/// Strictly increasing close prices for one asset. Its timestamps form the
/// grid everything else is aligned onto.
#[derive(Debug, Clone, PartialEq)]
pub struct PriceSeries {
    asset_id: String,
    timestamps: Vec<DateTime<Utc>>,
    closes: Vec<f64>,
}

impl PriceSeries {
    /// Build a series from unordered points. Points for other assets are
    /// ignored; a repeated timestamp keeps the last point seen.
    pub fn from_points(asset_id: &str, points: &[PricePoint]) -> Result<Self, SigtraderError> {
        let mut own: Vec<&PricePoint> = points.iter().filter(|p| p.asset_id == asset_id).collect();
        own.sort_by_key(|p| p.timestamp);

        let mut timestamps: Vec<DateTime<Utc>> = Vec::with_capacity(own.len());
        let mut closes: Vec<f64> = Vec::with_capacity(own.len());
        for p in own {
            if !p.close.is_finite() || p.close <= 0.0 {
                return Err(SigtraderError::Data {
                    reason: format!(
                        "invalid close {} for {} at {}",
                        p.close, asset_id, p.timestamp
                    ),
                });
            }
            if timestamps.last() == Some(&p.timestamp) {
                if let Some(last) = closes.last_mut() {
                    *last = p.close;
                }
                continue;
            }
            timestamps.push(p.timestamp);
            closes.push(p.close);
        }

        Ok(PriceSeries {
            asset_id: asset_id.to_string(),
            timestamps,
            closes,
        })
    }

    pub fn asset_id(&self) -> &str {
        &self.asset_id
    }

    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    pub fn timestamps(&self) -> &[DateTime<Utc>] {
        &self.timestamps
    }

    pub fn closes(&self) -> &[f64] {
        &self.closes
    }

    /// Sub-series covering grid indices `range`.
    pub fn slice(&self, range: std::ops::Range<usize>) -> PriceSeries {
        PriceSeries {
            asset_id: self.asset_id.clone(),
            timestamps: self.timestamps[range.clone()].to_vec(),
            closes: self.closes[range].to_vec(),
        }
    }
}
