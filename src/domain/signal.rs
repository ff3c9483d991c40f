//! Signal records flowing through the engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// One upstream observation for an asset from a single source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalPoint {
    pub asset_id: String,
    pub timestamp: DateTime<Utc>,
    pub source_id: String,
    /// Directional view in [-1, 1].
    pub strength: f64,
    /// Source self-reported confidence in [0, 1].
    pub confidence: f64,
}

impl SignalPoint {
    /// Build a point with strength and confidence clamped into range.
    pub fn new(
        asset_id: impl Into<String>,
        timestamp: DateTime<Utc>,
        source_id: impl Into<String>,
        strength: f64,
        confidence: f64,
    ) -> Self {
        SignalPoint {
            asset_id: asset_id.into(),
            timestamp,
            source_id: source_id.into(),
            strength: strength.clamp(-1.0, 1.0),
            confidence: confidence.clamp(0.0, 1.0),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Decision {
    Buy,
    Sell,
    Hold,
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Decision::Buy => write!(f, "BUY"),
            Decision::Sell => write!(f, "SELL"),
            Decision::Hold => write!(f, "HOLD"),
        }
    }
}

/// The combined per-asset decision at one grid timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatedSignal {
    pub asset_id: String,
    pub timestamp: DateTime<Utc>,
    pub decision: Decision,
    pub score: f64,
}

impl AggregatedSignal {
    pub fn is_actionable(&self) -> bool {
        self.decision != Decision::Hold
    }
}

/// Only the BUY/SELL entries of a decision stream, in order.
pub fn transitions(stream: &[AggregatedSignal]) -> Vec<&AggregatedSignal> {
    stream.iter().filter(|s| s.is_actionable()).collect()
}
