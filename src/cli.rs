//! CLI definition and dispatch.

use clap::{Parser, Subcommand};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::info;

use crate::adapters::csv_adapter::CsvAdapter;
use crate::adapters::file_config_adapter::FileConfigAdapter;
use crate::adapters::json_adapter::{JsonReportAdapter, load_linear_model};
use crate::domain::aggregator::{AggregationStrategy, AggregatorConfig};
use crate::domain::backtest::{BacktestConfig, BacktestResult};
use crate::domain::combiner::{CorrelationTrainer, ScoreModel};
use crate::domain::config_validation::validate_engine_config;
use crate::domain::cost_model::CostModel;
use crate::domain::error::SigtraderError;
use crate::domain::metrics::{DEFAULT_PERIODS_PER_YEAR, MetricsConfig};
use crate::domain::normalizer::NormalizerConfig;
use crate::domain::pipeline::{
    AssetInput, AssetOutcome, EngineConfig, decision_stream, run_assets, walk_forward_assets,
};
use crate::domain::price::PriceSeries;
use crate::domain::signal::transitions;
use crate::domain::walk_forward::{ModelRegistry, WalkForwardReport, WindowSpec};
use crate::ports::config_port::ConfigPort;
use crate::ports::data_port::DataPort;
use crate::ports::report_port::ReportPort;

const DEFAULT_STALENESS_SECS: i64 = 5 * 24 * 60 * 60;

#[derive(Parser, Debug)]
#[command(name = "sigtrader", about = "Signal aggregation and backtesting engine")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Backtest the aggregated decision stream over the full history
    Backtest {
        #[arg(short, long)]
        config: PathBuf,
        /// JSON output file (stdout if omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
        #[arg(long)]
        asset: Option<String>,
    },
    /// Run walk-forward validation
    WalkForward {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(short, long)]
        output: Option<PathBuf>,
        #[arg(long)]
        asset: Option<String>,
    },
    /// Emit the decision stream as CSV
    Decisions {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(short, long)]
        output: Option<PathBuf>,
        #[arg(long)]
        asset: Option<String>,
    },
    /// Validate a configuration file
    Validate {
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Show data range per asset
    Info {
        #[arg(short, long)]
        config: PathBuf,
    },
}

pub fn run(cli: Cli) -> ExitCode {
    match cli.command {
        Command::Backtest {
            config,
            output,
            asset,
        } => run_backtest(&config, output.as_deref(), asset.as_deref()),
        Command::WalkForward {
            config,
            output,
            asset,
        } => run_walk_forward(&config, output.as_deref(), asset.as_deref()),
        Command::Decisions {
            config,
            output,
            asset,
        } => run_decisions(&config, output.as_deref(), asset.as_deref()),
        Command::Validate { config } => run_validate(&config),
        Command::Info { config } => run_info(&config),
    }
}

fn fail(err: &SigtraderError) -> ExitCode {
    eprintln!("error: {err}");
    err.into()
}

pub fn load_config(path: &Path) -> Result<FileConfigAdapter, ExitCode> {
    FileConfigAdapter::from_file(path).map_err(|e| {
        let err = SigtraderError::ConfigParse {
            file: path.display().to_string(),
            reason: e.to_string(),
        };
        fail(&err)
    })
}

/// Load, validate and build the engine configuration.
fn prepare(config_path: &Path) -> Result<(FileConfigAdapter, EngineConfig), ExitCode> {
    eprintln!("Loading config from {}", config_path.display());
    let adapter = load_config(config_path)?;
    validate_engine_config(&adapter).map_err(|e| fail(&e))?;
    let engine = build_engine_config(&adapter).map_err(|e| fail(&e))?;
    Ok((adapter, engine))
}

pub fn build_engine_config(adapter: &dyn ConfigPort) -> Result<EngineConfig, SigtraderError> {
    let staleness_secs = adapter.get_int("normalizer", "staleness_secs", DEFAULT_STALENESS_SECS);
    let normalizer = NormalizerConfig {
        staleness_tolerance: chrono::TimeDelta::try_seconds(staleness_secs).ok_or_else(|| {
            SigtraderError::config_invalid("normalizer", "staleness_secs", "out of range")
        })?,
        min_history: adapter.get_int("normalizer", "min_history", 0).max(0) as usize,
    };

    let strategy = match adapter.get_string("aggregator", "strategy") {
        Some(name) => name
            .parse::<AggregationStrategy>()
            .map_err(|reason| SigtraderError::config_invalid("aggregator", "strategy", reason))?,
        None => AggregationStrategy::Weighted,
    };
    let weights: BTreeMap<String, f64> = adapter
        .get_keys("weights")
        .into_iter()
        .map(|key| {
            let weight = adapter.get_double("weights", &key, 0.0);
            (key, weight)
        })
        .collect();
    let aggregator = AggregatorConfig {
        strategy,
        weights,
        buy_threshold: adapter.get_double("aggregator", "buy_threshold", 0.5),
        sell_threshold: adapter.get_double("aggregator", "sell_threshold", 0.5),
        hysteresis_band: adapter.get_double("aggregator", "hysteresis_band", 0.0),
    };

    let backtest = BacktestConfig {
        starting_cash: adapter.get_double("backtest", "starting_cash", 10_000.0),
        position_fraction: adapter.get_double("backtest", "position_fraction", 1.0),
        allow_short: adapter.get_bool("backtest", "allow_short", false),
        allow_reversal: adapter.get_bool("backtest", "allow_reversal", false),
        liquidate_at_end: adapter.get_bool("backtest", "liquidate_at_end", true),
        costs: CostModel {
            slippage_bps: adapter.get_double("backtest", "slippage_bps", 0.0),
            fixed_fee: adapter.get_double("backtest", "fixed_fee", 0.0),
            variable_fee_rate: adapter.get_double("backtest", "variable_fee_rate", 0.0),
        },
        metrics: MetricsConfig {
            periods_per_year: adapter.get_double(
                "backtest",
                "periods_per_year",
                DEFAULT_PERIODS_PER_YEAR,
            ),
            risk_free_rate: adapter.get_double("backtest", "risk_free_rate", 0.0),
        },
    };

    let walk_forward = if adapter.get_keys("walk_forward").is_empty() {
        None
    } else {
        Some(WindowSpec {
            train_length: adapter.get_int("walk_forward", "train_length", 0).max(0) as usize,
            test_length: adapter.get_int("walk_forward", "test_length", 0).max(0) as usize,
            step: adapter.get_int("walk_forward", "step", 0).max(0) as usize,
        })
    };

    Ok(EngineConfig {
        normalizer,
        aggregator,
        backtest,
        walk_forward,
    })
}

/// Data paths in the config are relative to the config file.
fn resolve_path(config_path: &Path, raw: &str) -> PathBuf {
    let path = PathBuf::from(raw.trim());
    match config_path.parent() {
        Some(dir) if path.is_relative() => dir.join(path),
        _ => path,
    }
}

fn open_data(adapter: &dyn ConfigPort, config_path: &Path) -> Result<CsvAdapter, SigtraderError> {
    let get = |key: &str| {
        adapter
            .get_string("data", key)
            .ok_or_else(|| SigtraderError::ConfigMissing {
                section: "data".into(),
                key: key.into(),
            })
    };
    let signals = resolve_path(config_path, &get("signals")?);
    let prices = resolve_path(config_path, &get("prices")?);
    CsvAdapter::load(&signals, &prices)
}

/// `--asset` wins over `[data] assets`; otherwise every asset with prices.
fn resolve_assets(
    adapter: &dyn ConfigPort,
    data: &dyn DataPort,
    asset_override: Option<&str>,
) -> Result<Vec<String>, SigtraderError> {
    if let Some(asset) = asset_override {
        return Ok(vec![asset.to_string()]);
    }
    if let Some(list) = adapter.get_string("data", "assets") {
        let assets: Vec<String> = list
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        if !assets.is_empty() {
            return Ok(assets);
        }
    }
    data.list_assets()
}

pub fn load_inputs(
    data: &dyn DataPort,
    assets: &[String],
) -> Result<Vec<AssetInput>, SigtraderError> {
    assets
        .iter()
        .map(|asset_id| {
            let prices = PriceSeries::from_points(asset_id, &data.fetch_prices(asset_id)?)?;
            Ok(AssetInput {
                asset_id: asset_id.clone(),
                signals: data.fetch_signals(asset_id)?,
                prices,
            })
        })
        .collect()
}

/// Pre-trained model from `[aggregator] model_path`, aligned to the
/// configured sources.
fn load_model(
    adapter: &dyn ConfigPort,
    config_path: &Path,
    engine: &EngineConfig,
) -> Result<Option<Arc<dyn ScoreModel>>, SigtraderError> {
    let Some(raw) = adapter
        .get_string("aggregator", "model_path")
        .filter(|s| !s.trim().is_empty())
    else {
        return Ok(None);
    };
    let model = load_linear_model(&resolve_path(config_path, &raw))?
        .aligned_to(&engine.aggregator.source_ids())?;
    info!(path = %raw, "loaded pre-trained model");
    Ok(Some(Arc::new(model)))
}

fn load_everything(
    config_path: &Path,
    asset_override: Option<&str>,
) -> Result<(FileConfigAdapter, EngineConfig, Vec<AssetInput>), ExitCode> {
    let (adapter, engine) = prepare(config_path)?;
    let data = open_data(&adapter, config_path).map_err(|e| fail(&e))?;
    let assets = resolve_assets(&adapter, &data, asset_override).map_err(|e| fail(&e))?;
    if assets.is_empty() {
        eprintln!("error: no assets to run");
        return Err(ExitCode::from(3));
    }
    let inputs = load_inputs(&data, &assets).map_err(|e| fail(&e))?;
    Ok((adapter, engine, inputs))
}

/// Collect successful outcomes; the first failure decides the exit code.
fn split_outcomes<T>(outcomes: Vec<AssetOutcome<T>>) -> (Vec<T>, Option<SigtraderError>) {
    let mut ok = Vec::new();
    let mut first_err = None;
    for o in outcomes {
        match o.outcome {
            Ok(v) => ok.push(v),
            Err(e) => {
                eprintln!("warning: {} failed: {}", o.asset_id, e);
                first_err.get_or_insert(e);
            }
        }
    }
    (ok, first_err)
}

fn finish(first_err: Option<SigtraderError>) -> ExitCode {
    match first_err {
        Some(e) => (&e).into(),
        None => ExitCode::SUCCESS,
    }
}

fn run_backtest(config_path: &Path, output: Option<&Path>, asset: Option<&str>) -> ExitCode {
    let (adapter, engine, inputs) = match load_everything(config_path, asset) {
        Ok(v) => v,
        Err(code) => return code,
    };

    let model = match load_model(&adapter, config_path, &engine) {
        Ok(m) => m,
        Err(e) => return fail(&e),
    };
    if engine.aggregator.strategy == AggregationStrategy::Learned && model.is_none() {
        return fail(&SigtraderError::ConfigMissing {
            section: "aggregator".into(),
            key: "model_path".into(),
        });
    }

    eprintln!("Running backtest: {} assets", inputs.len());
    let (results, first_err) = split_outcomes(run_assets(&inputs, &engine, model));
    for result in &results {
        print_backtest_summary(result);
    }

    if let Err(e) = JsonReportAdapter::new().write_backtests(&results, output) {
        return fail(&e);
    }
    if let Some(path) = output {
        eprintln!("\nReport written to: {}", path.display());
    }
    finish(first_err)
}

fn run_walk_forward(config_path: &Path, output: Option<&Path>, asset: Option<&str>) -> ExitCode {
    let (adapter, engine, inputs) = match load_everything(config_path, asset) {
        Ok(v) => v,
        Err(code) => return code,
    };
    let Some(spec) = engine.walk_forward else {
        return fail(&SigtraderError::ConfigMissing {
            section: "walk_forward".into(),
            key: "train_length".into(),
        });
    };

    let registry = match load_model(&adapter, config_path, &engine) {
        Ok(Some(model)) => ModelRegistry::with_pretrained(model),
        Ok(None) if engine.aggregator.strategy == AggregationStrategy::Learned => {
            ModelRegistry::with_trainer(Arc::new(CorrelationTrainer::default()))
        }
        Ok(None) => ModelRegistry::new(),
        Err(e) => return fail(&e),
    };

    eprintln!(
        "Running walk-forward: {} assets, train {} / test {} / step {} bars",
        inputs.len(),
        spec.train_length,
        spec.test_length,
        spec.step
    );
    let (reports, first_err) =
        split_outcomes(walk_forward_assets(&inputs, &engine, spec, &registry));
    for report in &reports {
        print_walk_forward_summary(report);
    }

    if let Err(e) = JsonReportAdapter::new().write_walk_forward(&reports, output) {
        return fail(&e);
    }
    if let Some(path) = output {
        eprintln!("\nReport written to: {}", path.display());
    }
    finish(first_err)
}

fn run_decisions(config_path: &Path, output: Option<&Path>, asset: Option<&str>) -> ExitCode {
    let (adapter, engine, inputs) = match load_everything(config_path, asset) {
        Ok(v) => v,
        Err(code) => return code,
    };
    let model = match load_model(&adapter, config_path, &engine) {
        Ok(m) => m,
        Err(e) => return fail(&e),
    };

    let mut decisions = Vec::new();
    let mut first_err = None;
    for input in &inputs {
        match decision_stream(input, &engine, model.clone()) {
            Ok(stream) => decisions.extend(stream),
            Err(e) => {
                eprintln!("warning: {} failed: {}", input.asset_id, e);
                first_err.get_or_insert(e);
            }
        }
    }

    if let Err(e) = JsonReportAdapter::new().write_decisions(&decisions, output) {
        return fail(&e);
    }
    eprintln!(
        "{} decisions written ({} BUY/SELL)",
        decisions.len(),
        transitions(&decisions).len()
    );
    finish(first_err)
}

fn run_validate(config_path: &Path) -> ExitCode {
    let (_, engine) = match prepare(config_path) {
        Ok(v) => v,
        Err(code) => return code,
    };

    let agg = &engine.aggregator;
    eprintln!("\nAggregator:");
    eprintln!("  strategy:        {}", agg.strategy);
    eprintln!("  buy threshold:   {}", agg.buy_threshold);
    eprintln!("  sell threshold:  {}", agg.sell_threshold);
    eprintln!("  hysteresis band: {}", agg.hysteresis_band);
    eprintln!("\nSources:");
    for (source, weight) in &agg.weights {
        eprintln!("  {source}: {weight}");
    }
    let bt = &engine.backtest;
    eprintln!("\nBacktest:");
    eprintln!("  starting cash:     {:.2}", bt.starting_cash);
    eprintln!("  position fraction: {}", bt.position_fraction);
    eprintln!("  allow short:       {}", bt.allow_short);
    if let Some(spec) = engine.walk_forward {
        eprintln!("\nWalk-forward:");
        eprintln!(
            "  train {} / test {} / step {} bars",
            spec.train_length, spec.test_length, spec.step
        );
    }

    eprintln!("\nConfiguration is valid");
    ExitCode::SUCCESS
}

fn run_info(config_path: &Path) -> ExitCode {
    let adapter = match load_config(config_path) {
        Ok(a) => a,
        Err(code) => return code,
    };
    let data = match open_data(&adapter, config_path) {
        Ok(d) => d,
        Err(e) => return fail(&e),
    };
    let assets = match data.list_assets() {
        Ok(a) => a,
        Err(e) => return fail(&e),
    };

    if assets.is_empty() {
        eprintln!("No price data found");
        return ExitCode::SUCCESS;
    }
    println!("asset,first,last,price_rows,signal_rows,sources");
    for asset in &assets {
        match data.get_data_range(asset) {
            Ok(Some(range)) => println!(
                "{},{},{},{},{},{}",
                asset,
                range.first.to_rfc3339(),
                range.last.to_rfc3339(),
                range.price_rows,
                range.signal_rows,
                range.sources.join(";")
            ),
            Ok(None) => eprintln!("{asset}: no data"),
            Err(e) => return fail(&e),
        }
    }
    eprintln!("{} assets found", assets.len());
    ExitCode::SUCCESS
}

fn print_backtest_summary(result: &BacktestResult) {
    let m = &result.metrics;
    eprintln!("\n=== {} ===", result.asset_id);
    eprintln!("Total Return:     {:.2}%", m.total_return * 100.0);
    eprintln!("Annualized:       {:.2}%", m.annualized_return * 100.0);
    eprintln!("Volatility:       {:.2}%", m.annualized_volatility * 100.0);
    eprintln!("Sharpe Ratio:     {:.2}", m.sharpe_ratio);
    eprintln!("Max Drawdown:     -{:.1}%", m.max_drawdown * 100.0);
    eprintln!("Total Trades:     {}", m.trade_count);
    eprintln!("Win Rate:         {:.1}%", m.win_rate * 100.0);
    if result.skipped_trades() > 0 {
        eprintln!("Skipped Trades:   {}", result.skipped_trades());
    }
}

fn print_walk_forward_summary(report: &WalkForwardReport) {
    let m = &report.combined_metrics;
    eprintln!("\n=== {} ({} windows) ===", report.asset_id, report.windows.len());
    for w in &report.windows {
        eprintln!(
            "  window {}: test bars {}..{}, return {:.2}%, {} trades",
            w.window.index,
            w.window.test.start,
            w.window.test.end,
            w.result.metrics.total_return * 100.0,
            w.result.metrics.trade_count
        );
    }
    eprintln!("Combined Return:  {:.2}%", m.total_return * 100.0);
    eprintln!("Sharpe Ratio:     {:.2}", m.sharpe_ratio);
    eprintln!("Max Drawdown:     -{:.1}%", m.max_drawdown * 100.0);
}
