//! Per-asset wiring of normalizer, aggregator, simulator and evaluator.

use rayon::prelude::*;
use std::sync::Arc;
use tracing::{info, warn};

use super::aggregator::{Aggregator, AggregatorConfig};
use super::backtest::{BacktestConfig, BacktestResult, run_backtest};
use super::combiner::ScoreModel;
use super::error::SigtraderError;
use super::normalizer::{NormalizedFrame, NormalizerConfig, normalize};
use super::price::PriceSeries;
use super::signal::{AggregatedSignal, SignalPoint};
use super::source::{SignalSource, partition_by_source};
use super::walk_forward::{ModelRegistry, WalkForwardReport, WalkForwardValidator, WindowSpec};

/// Immutable run configuration, built once from the config file.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub normalizer: NormalizerConfig,
    pub aggregator: AggregatorConfig,
    pub backtest: BacktestConfig,
    pub walk_forward: Option<WindowSpec>,
}

/// Fully materialized inputs for one asset.
#[derive(Debug, Clone)]
pub struct AssetInput {
    pub asset_id: String,
    pub signals: Vec<SignalPoint>,
    pub prices: PriceSeries,
}

/// Result for one asset of a multi-asset run.
#[derive(Debug)]
pub struct AssetOutcome<T> {
    pub asset_id: String,
    pub outcome: Result<T, SigtraderError>,
}

impl<T> AssetOutcome<T> {
    pub fn is_ok(&self) -> bool {
        self.outcome.is_ok()
    }
}

/// Normalize an asset's signals onto its price grid.
pub fn build_frame(input: &AssetInput, config: &EngineConfig) -> Result<NormalizedFrame, SigtraderError> {
    let source_ids = config.aggregator.source_ids();
    let sources = partition_by_source(&input.signals, &source_ids);
    let dyn_sources: Vec<&dyn SignalSource> = sources.iter().map(|s| s as &dyn SignalSource).collect();
    normalize(
        &input.asset_id,
        &dyn_sources,
        input.prices.timestamps(),
        &config.normalizer,
    )
}

/// Decisions for every grid timestamp of one asset.
pub fn decision_stream(
    input: &AssetInput,
    config: &EngineConfig,
    model: Option<Arc<dyn ScoreModel>>,
) -> Result<Vec<AggregatedSignal>, SigtraderError> {
    let frame = build_frame(input, config)?;
    let mut aggregator = Aggregator::new(config.aggregator.clone(), model)?;
    aggregator.run(&frame)
}

/// Normalize, aggregate and simulate one asset over its whole history.
pub fn run_asset(
    input: &AssetInput,
    config: &EngineConfig,
    model: Option<Arc<dyn ScoreModel>>,
) -> Result<BacktestResult, SigtraderError> {
    if input.prices.is_empty() {
        return Err(SigtraderError::NoData {
            asset_id: input.asset_id.clone(),
        });
    }
    let decisions = decision_stream(input, config, model)?;
    run_backtest(&decisions, &input.prices, &config.backtest)
}

/// Walk-forward validation of one asset with its own copy of `registry`.
pub fn walk_forward_asset(
    input: &AssetInput,
    config: &EngineConfig,
    spec: WindowSpec,
    registry: ModelRegistry,
) -> Result<WalkForwardReport, SigtraderError> {
    let frame = build_frame(input, config)?;
    let mut validator =
        WalkForwardValidator::new(spec, config.aggregator.clone(), config.backtest.clone(), registry);
    validator.run(&frame, &input.prices)
}

/// Backtest every asset in parallel. Outcomes come back in input order and a
/// failing asset does not stop the others.
pub fn run_assets(
    inputs: &[AssetInput],
    config: &EngineConfig,
    model: Option<Arc<dyn ScoreModel>>,
) -> Vec<AssetOutcome<BacktestResult>> {
    info!(assets = inputs.len(), "backtest run started");
    let outcomes: Vec<_> = inputs
        .par_iter()
        .map(|input| AssetOutcome {
            asset_id: input.asset_id.clone(),
            outcome: run_asset(input, config, model.clone()),
        })
        .collect();
    log_failures(&outcomes);
    outcomes
}

pub fn walk_forward_assets(
    inputs: &[AssetInput],
    config: &EngineConfig,
    spec: WindowSpec,
    registry: &ModelRegistry,
) -> Vec<AssetOutcome<WalkForwardReport>> {
    info!(assets = inputs.len(), "walk-forward run started");
    let outcomes: Vec<_> = inputs
        .par_iter()
        .map(|input| AssetOutcome {
            asset_id: input.asset_id.clone(),
            outcome: walk_forward_asset(input, config, spec, registry.clone()),
        })
        .collect();
    log_failures(&outcomes);
    outcomes
}

fn log_failures<T>(outcomes: &[AssetOutcome<T>]) {
    for o in outcomes {
        if let Err(e) = &o.outcome {
            warn!(asset = %o.asset_id, error = %e, "asset run failed");
        }
    }
}
