//! Combination of normalized per-source signals into one decision per row.
//!
//! The decision stream is edge-triggered: BUY or SELL is emitted on the row
//! where the directional regime flips, every other row is HOLD. Flipping an
//! established regime requires crossing the opposite threshold widened by
//! the hysteresis band; drifting back into the neutral band never flips it.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use super::combiner::ScoreModel;
use super::error::SigtraderError;
use super::normalizer::{FrameRow, NormalizedFrame};
use super::signal::{AggregatedSignal, Decision};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregationStrategy {
    Weighted,
    Learned,
}

impl FromStr for AggregationStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "weighted" => Ok(AggregationStrategy::Weighted),
            "learned" => Ok(AggregationStrategy::Learned),
            other => Err(format!("unknown aggregator strategy '{other}'")),
        }
    }
}

impl fmt::Display for AggregationStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AggregationStrategy::Weighted => write!(f, "weighted"),
            AggregationStrategy::Learned => write!(f, "learned"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AggregatorConfig {
    pub strategy: AggregationStrategy,
    /// Per-source weights; the key set is the configured source set.
    pub weights: BTreeMap<String, f64>,
    pub buy_threshold: f64,
    /// Magnitude; SELL triggers below `-sell_threshold`.
    pub sell_threshold: f64,
    pub hysteresis_band: f64,
}

impl AggregatorConfig {
    pub fn source_ids(&self) -> Vec<String> {
        self.weights.keys().cloned().collect()
    }
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        AggregatorConfig {
            strategy: AggregationStrategy::Weighted,
            weights: BTreeMap::new(),
            buy_threshold: 0.5,
            sell_threshold: 0.5,
            hysteresis_band: 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Regime {
    Neutral,
    Bullish,
    Bearish,
}

#[derive(Debug, Clone)]
pub struct Aggregator {
    config: AggregatorConfig,
    model: Option<Arc<dyn ScoreModel>>,
    regime: Regime,
}

impl Aggregator {
    /// Build an aggregator for the configured strategy. The learned strategy
    /// needs a model.
    pub fn new(
        config: AggregatorConfig,
        model: Option<Arc<dyn ScoreModel>>,
    ) -> Result<Self, SigtraderError> {
        if config.strategy == AggregationStrategy::Learned && model.is_none() {
            return Err(SigtraderError::Model {
                reason: "learned strategy requires a trained model".into(),
            });
        }
        Ok(Aggregator {
            config,
            model,
            regime: Regime::Neutral,
        })
    }

    pub fn weighted(config: AggregatorConfig) -> Self {
        Aggregator {
            config: AggregatorConfig {
                strategy: AggregationStrategy::Weighted,
                ..config
            },
            model: None,
            regime: Regime::Neutral,
        }
    }

    pub fn regime(&self) -> Regime {
        self.regime
    }

    pub fn reset(&mut self) {
        self.regime = Regime::Neutral;
    }

    /// Score a row without touching the regime.
    pub fn score(&self, row: &FrameRow) -> Result<f64, SigtraderError> {
        check_alignment(row)?;
        match self.config.strategy {
            AggregationStrategy::Weighted => Ok(self.weighted_score(row)),
            AggregationStrategy::Learned => self.learned_score(row),
        }
    }

    pub fn step(&mut self, row: &FrameRow) -> Result<AggregatedSignal, SigtraderError> {
        let score = self.score(row)?;
        let decision = self.decide(score);
        Ok(AggregatedSignal {
            asset_id: row.asset_id.clone(),
            timestamp: row.timestamp,
            decision,
            score,
        })
    }

    pub fn run_rows(&mut self, rows: &[FrameRow]) -> Result<Vec<AggregatedSignal>, SigtraderError> {
        rows.iter().map(|row| self.step(row)).collect()
    }

    pub fn run(&mut self, frame: &NormalizedFrame) -> Result<Vec<AggregatedSignal>, SigtraderError> {
        self.run_rows(&frame.rows)
    }

    fn weighted_score(&self, row: &FrameRow) -> f64 {
        let mut num = 0.0;
        let mut den = 0.0;
        for point in row.cells.iter().filter_map(|c| c.point()) {
            let w = self.config.weights.get(&point.source_id).copied().unwrap_or(0.0);
            num += w * point.strength * point.confidence;
            den += w * point.confidence;
        }
        if den > 0.0 {
            (num / den).clamp(-1.0, 1.0)
        } else {
            0.0
        }
    }

    fn learned_score(&self, row: &FrameRow) -> Result<f64, SigtraderError> {
        let model = self.model.as_ref().ok_or_else(|| SigtraderError::Model {
            reason: "learned strategy requires a trained model".into(),
        })?;
        let features = row.features();
        if let Some(arity) = model.arity() {
            if arity != features.len() {
                return Err(SigtraderError::Model {
                    reason: format!(
                        "model expects {} features, row has {}",
                        arity,
                        features.len()
                    ),
                });
            }
        }
        let score = model.predict(&features);
        if !score.is_finite() {
            return Err(SigtraderError::Model {
                reason: format!("model produced non-finite score at {}", row.timestamp),
            });
        }
        Ok(score.clamp(-1.0, 1.0))
    }

    /// Exactly-at-threshold scores resolve to HOLD.
    fn decide(&mut self, score: f64) -> Decision {
        let buy = self.config.buy_threshold;
        let sell = self.config.sell_threshold;
        let band = self.config.hysteresis_band;

        match self.regime {
            Regime::Neutral if score > buy => {
                self.regime = Regime::Bullish;
                Decision::Buy
            }
            Regime::Neutral if score < -sell => {
                self.regime = Regime::Bearish;
                Decision::Sell
            }
            Regime::Bullish if score < -(sell + band) => {
                self.regime = Regime::Bearish;
                Decision::Sell
            }
            Regime::Bearish if score > buy + band => {
                self.regime = Regime::Bullish;
                Decision::Buy
            }
            _ => Decision::Hold,
        }
    }
}

fn check_alignment(row: &FrameRow) -> Result<(), SigtraderError> {
    for point in row.cells.iter().filter_map(|c| c.point()) {
        if point.asset_id != row.asset_id {
            return Err(SigtraderError::Alignment {
                asset_id: row.asset_id.clone(),
                timestamp: row.timestamp,
                reason: format!(
                    "source {} carries a point for {}",
                    point.source_id, point.asset_id
                ),
            });
        }
        if point.timestamp > row.timestamp {
            return Err(SigtraderError::Alignment {
                asset_id: row.asset_id.clone(),
                timestamp: row.timestamp,
                reason: format!(
                    "source {} point at {} is after the row",
                    point.source_id, point.timestamp
                ),
            });
        }
    }
    Ok(())
}
