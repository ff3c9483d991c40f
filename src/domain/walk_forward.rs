//! Walk-forward validation.
//!
//! History is cut into (train, test) window pairs over grid indices. Models
//! are fit on the train slice only; the aggregate-simulate-evaluate chain
//! runs on the test slice only, with a fresh aggregator and portfolio per
//! window.

use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::ops::Range;
use std::sync::Arc;
use tracing::{debug, info};

use super::aggregator::{AggregationStrategy, Aggregator, AggregatorConfig};
use super::backtest::{BacktestConfig, BacktestResult, run_backtest};
use super::combiner::{ModelTrainer, ScoreModel, TrainingSet};
use super::error::SigtraderError;
use super::metrics::Metrics;
use super::normalizer::NormalizedFrame;
use super::portfolio::EquityPoint;
use super::position::Trade;
use super::price::PriceSeries;

/// Window lengths in grid bars.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WindowSpec {
    pub train_length: usize,
    pub test_length: usize,
    pub step: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WalkForwardWindow {
    pub index: usize,
    pub train: Range<usize>,
    pub test: Range<usize>,
}

/// Lay out windows over `history_len` bars. Test ranges immediately follow
/// their train range; successive pairs start `step` bars apart, and `step`
/// may not be shorter than the test range.
pub fn plan_windows(
    asset_id: &str,
    history_len: usize,
    spec: &WindowSpec,
) -> Result<Vec<WalkForwardWindow>, SigtraderError> {
    if spec.train_length == 0 || spec.test_length == 0 || spec.step == 0 {
        return Err(SigtraderError::config_invalid(
            "walk_forward",
            "train_length",
            "train_length, test_length and step must be positive",
        ));
    }
    if spec.step < spec.test_length {
        return Err(SigtraderError::config_invalid(
            "walk_forward",
            "step",
            format!(
                "step {} is shorter than test_length {}; test windows would overlap",
                spec.step, spec.test_length
            ),
        ));
    }
    let required = spec.train_length + spec.test_length;
    if history_len < required {
        return Err(SigtraderError::InsufficientHistory {
            asset_id: asset_id.to_string(),
            available: history_len,
            required,
        });
    }

    let mut windows = Vec::new();
    let mut start = 0usize;
    while start + required <= history_len {
        let split = start + spec.train_length;
        windows.push(WalkForwardWindow {
            index: windows.len(),
            train: start..split,
            test: split..split + spec.test_length,
        });
        start += spec.step;
    }
    Ok(windows)
}

/// Fitted and pre-trained models for walk-forward runs.
#[derive(Clone, Default)]
pub struct ModelRegistry {
    trainer: Option<Arc<dyn ModelTrainer>>,
    pretrained: Option<Arc<dyn ScoreModel>>,
    fitted: BTreeMap<(String, usize), Arc<dyn ScoreModel>>,
}

impl fmt::Debug for ModelRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelRegistry")
            .field("has_trainer", &self.trainer.is_some())
            .field("pretrained", &self.pretrained)
            .field("fitted", &self.fitted.len())
            .finish()
    }
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fit a fresh model on each window's training slice.
    pub fn with_trainer(trainer: Arc<dyn ModelTrainer>) -> Self {
        ModelRegistry {
            trainer: Some(trainer),
            ..Self::default()
        }
    }

    /// Use one externally trained model for every window.
    pub fn with_pretrained(model: Arc<dyn ScoreModel>) -> Self {
        ModelRegistry {
            pretrained: Some(model),
            ..Self::default()
        }
    }

    pub fn fitted_count(&self) -> usize {
        self.fitted.len()
    }

    pub fn cached(&self, asset_id: &str, window: usize) -> Option<Arc<dyn ScoreModel>> {
        self.fitted.get(&(asset_id.to_string(), window)).cloned()
    }

    /// Model for a window, fitting it from `training` on first request.
    pub fn model_for(
        &mut self,
        asset_id: &str,
        window: &WalkForwardWindow,
        training: &TrainingSet<'_>,
    ) -> Result<Arc<dyn ScoreModel>, SigtraderError> {
        if let Some(model) = &self.pretrained {
            return Ok(Arc::clone(model));
        }
        let key = (asset_id.to_string(), window.index);
        if let Some(model) = self.fitted.get(&key) {
            return Ok(Arc::clone(model));
        }
        let trainer = self.trainer.as_ref().ok_or_else(|| SigtraderError::Model {
            reason: "no trainer or pre-trained model registered".into(),
        })?;
        let model = trainer.fit(training)?;
        debug!(asset = asset_id, window = window.index, ?model, "fitted window model");
        self.fitted.insert(key, Arc::clone(&model));
        Ok(model)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WindowResult {
    pub window: WalkForwardWindow,
    pub result: BacktestResult,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WalkForwardReport {
    pub asset_id: String,
    pub windows: Vec<WindowResult>,
    /// Window curves chained so each starts where the previous one ended.
    pub combined_equity: Vec<EquityPoint>,
    pub combined_trades: Vec<Trade>,
    pub combined_metrics: Metrics,
}

#[derive(Debug)]
pub struct WalkForwardValidator {
    spec: WindowSpec,
    aggregator: AggregatorConfig,
    backtest: BacktestConfig,
    registry: ModelRegistry,
}

impl WalkForwardValidator {
    pub fn new(
        spec: WindowSpec,
        aggregator: AggregatorConfig,
        backtest: BacktestConfig,
        registry: ModelRegistry,
    ) -> Self {
        WalkForwardValidator {
            spec,
            aggregator,
            backtest,
            registry,
        }
    }

    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    pub fn run(
        &mut self,
        frame: &NormalizedFrame,
        prices: &PriceSeries,
    ) -> Result<WalkForwardReport, SigtraderError> {
        let asset_id = prices.asset_id();
        if frame.timestamps() != prices.timestamps() {
            return Err(SigtraderError::Alignment {
                asset_id: asset_id.to_string(),
                timestamp: prices
                    .timestamps()
                    .first()
                    .copied()
                    .unwrap_or(chrono::DateTime::<chrono::Utc>::MIN_UTC),
                reason: "signal frame and price grid differ".into(),
            });
        }

        let windows = plan_windows(asset_id, prices.len(), &self.spec)?;
        info!(asset = asset_id, windows = windows.len(), "walk-forward started");

        let mut results = Vec::with_capacity(windows.len());
        for window in windows {
            let model = match self.aggregator.strategy {
                AggregationStrategy::Weighted => None,
                AggregationStrategy::Learned => {
                    let training = TrainingSet {
                        source_ids: &frame.source_ids,
                        rows: &frame.rows[window.train.clone()],
                        closes: &prices.closes()[window.train.clone()],
                    };
                    Some(self.registry.model_for(asset_id, &window, &training)?)
                }
            };

            let mut aggregator = Aggregator::new(self.aggregator.clone(), model)?;
            let decisions = aggregator.run_rows(&frame.rows[window.test.clone()])?;
            let result = run_backtest(&decisions, &prices.slice(window.test.clone()), &self.backtest)?;
            debug!(
                asset = asset_id,
                window = window.index,
                train = ?window.train,
                test = ?window.test,
                trades = result.trades.len(),
                "window evaluated"
            );
            results.push(WindowResult { window, result });
        }

        Ok(self.combine(asset_id, results))
    }

    fn combine(&self, asset_id: &str, windows: Vec<WindowResult>) -> WalkForwardReport {
        let starting = self.backtest.starting_cash;
        let mut growth = 1.0;
        let mut combined_equity = Vec::new();
        let mut combined_trades = Vec::new();

        for w in &windows {
            for point in &w.result.equity_curve {
                combined_equity.push(EquityPoint {
                    timestamp: point.timestamp,
                    equity: point.equity * growth,
                });
            }
            combined_trades.extend(w.result.trades.iter().cloned());
            if let Some(end) = w.result.final_equity() {
                if starting > 0.0 {
                    growth *= end / starting;
                }
            }
        }

        let combined_metrics = Metrics::compute(
            &combined_equity,
            &combined_trades,
            Some(starting),
            &self.backtest.metrics,
        );

        WalkForwardReport {
            asset_id: asset_id.to_string(),
            windows,
            combined_equity,
            combined_trades,
            combined_metrics,
        }
    }
}
