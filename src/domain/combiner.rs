//! Learned combiner models and their training.
//!
//! A model sees a row's feature vector (confidence-weighted strengths in
//! configured source order, NaN for absent sources) and returns a score.

use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::sync::Arc;

use super::error::SigtraderError;
use super::normalizer::FrameRow;

pub trait ScoreModel: Debug + Send + Sync {
    fn predict(&self, features: &[f64]) -> f64;

    /// Number of features the model was built for, if fixed.
    fn arity(&self) -> Option<usize> {
        None
    }
}

/// Sparse linear blend: Σ wᵢxᵢ / Σ|wᵢ| over present features.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearCombiner {
    pub source_ids: Vec<String>,
    pub weights: Vec<f64>,
}

impl LinearCombiner {
    pub fn new(source_ids: Vec<String>, weights: Vec<f64>) -> Result<Self, SigtraderError> {
        if source_ids.len() != weights.len() {
            return Err(SigtraderError::Model {
                reason: format!(
                    "{} sources but {} weights",
                    source_ids.len(),
                    weights.len()
                ),
            });
        }
        if let Some(w) = weights.iter().find(|w| !w.is_finite()) {
            return Err(SigtraderError::Model {
                reason: format!("non-finite weight {w}"),
            });
        }
        Ok(LinearCombiner {
            source_ids,
            weights,
        })
    }

    /// Reorder weights to match `source_ids`. Configured sources the model
    /// never saw get weight 0; model sources outside the set are an error.
    pub fn aligned_to(&self, source_ids: &[String]) -> Result<LinearCombiner, SigtraderError> {
        if let Some(extra) = self.source_ids.iter().find(|id| !source_ids.contains(id)) {
            return Err(SigtraderError::Model {
                reason: format!("model source '{extra}' is not configured"),
            });
        }
        let weights = source_ids
            .iter()
            .map(|id| {
                self.source_ids
                    .iter()
                    .position(|m| m == id)
                    .map_or(0.0, |j| self.weights[j])
            })
            .collect();
        LinearCombiner::new(source_ids.to_vec(), weights)
    }
}

impl ScoreModel for LinearCombiner {
    fn predict(&self, features: &[f64]) -> f64 {
        let mut num = 0.0;
        let mut den = 0.0;
        for (w, x) in self.weights.iter().zip(features) {
            if x.is_nan() {
                continue;
            }
            num += w * x;
            den += w.abs();
        }
        if den > 0.0 {
            (num / den).clamp(-1.0, 1.0)
        } else {
            0.0
        }
    }

    fn arity(&self) -> Option<usize> {
        Some(self.weights.len())
    }
}

/// Rows and aligned closes from a training window.
#[derive(Debug, Clone, Copy)]
pub struct TrainingSet<'a> {
    pub source_ids: &'a [String],
    pub rows: &'a [FrameRow],
    pub closes: &'a [f64],
}

impl TrainingSet<'_> {
    /// Next-bar simple returns. The last row has no target inside the window
    /// and is left out.
    pub fn forward_returns(&self) -> Vec<f64> {
        self.closes
            .windows(2)
            .map(|w| if w[0] > 0.0 { w[1] / w[0] - 1.0 } else { 0.0 })
            .collect()
    }
}

pub trait ModelTrainer: Send + Sync {
    fn fit(&self, set: &TrainingSet<'_>) -> Result<Arc<dyn ScoreModel>, SigtraderError>;
}

/// Weights each source by the Pearson correlation between its feature and
/// the next-bar return inside the training window.
#[derive(Debug, Clone)]
pub struct CorrelationTrainer {
    /// Sources with fewer paired observations get weight 0.
    pub min_samples: usize,
}

impl Default for CorrelationTrainer {
    fn default() -> Self {
        CorrelationTrainer { min_samples: 3 }
    }
}

impl ModelTrainer for CorrelationTrainer {
    fn fit(&self, set: &TrainingSet<'_>) -> Result<Arc<dyn ScoreModel>, SigtraderError> {
        if set.rows.len() != set.closes.len() {
            return Err(SigtraderError::Model {
                reason: format!(
                    "training set has {} rows but {} closes",
                    set.rows.len(),
                    set.closes.len()
                ),
            });
        }

        let targets = set.forward_returns();
        let features: Vec<Vec<f64>> = set.rows.iter().map(FrameRow::features).collect();

        let weights = (0..set.source_ids.len())
            .map(|j| {
                let pairs: Vec<(f64, f64)> = targets
                    .iter()
                    .enumerate()
                    .filter_map(|(i, &r)| {
                        let x = features[i].get(j).copied().unwrap_or(f64::NAN);
                        if x.is_nan() { None } else { Some((x, r)) }
                    })
                    .collect();
                if pairs.len() < self.min_samples {
                    0.0
                } else {
                    pearson(&pairs)
                }
            })
            .collect();

        Ok(Arc::new(LinearCombiner::new(set.source_ids.to_vec(), weights)?))
    }
}

fn pearson(pairs: &[(f64, f64)]) -> f64 {
    let n = pairs.len() as f64;
    let mean_x = pairs.iter().map(|p| p.0).sum::<f64>() / n;
    let mean_y = pairs.iter().map(|p| p.1).sum::<f64>() / n;
    let mut cov = 0.0;
    let mut var_x = 0.0;
    let mut var_y = 0.0;
    for &(x, y) in pairs {
        cov += (x - mean_x) * (y - mean_y);
        var_x += (x - mean_x).powi(2);
        var_y += (y - mean_y).powi(2);
    }
    if var_x <= 0.0 || var_y <= 0.0 {
        return 0.0;
    }
    cov / (var_x.sqrt() * var_y.sqrt())
}
