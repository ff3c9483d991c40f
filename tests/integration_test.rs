//! Integration tests for the full signal → decision → simulation chain.
//!
//! Tests cover:
//! - Reference scenarios: decision edges, next-bar execution, drawdown, empty signals
//! - Multi-source weighting and stale-source handling
//! - Multi-asset runs through a mock data port, with per-asset failures
//! - Walk-forward runs with per-window training confined to the train range
//! - Cost model effects on results
//! - JSON report output

mod common;

use approx::assert_relative_eq;
use common::*;
use sigtrader::adapters::json_adapter::JsonReportAdapter;
use sigtrader::cli::load_inputs;
use sigtrader::domain::aggregator::AggregationStrategy;
use sigtrader::domain::combiner::CorrelationTrainer;
use sigtrader::domain::cost_model::{CostModel, Side};
use sigtrader::domain::error::SigtraderError;
use sigtrader::domain::metrics::{Metrics, MetricsConfig};
use sigtrader::domain::normalizer::NormalizerConfig;
use sigtrader::domain::pipeline::{
    build_frame, decision_stream, run_asset, run_assets, walk_forward_asset,
};
use sigtrader::domain::portfolio::EquityPoint;
use sigtrader::domain::position::TradeKind;
use sigtrader::domain::signal::Decision;
use sigtrader::domain::walk_forward::{ModelRegistry, WalkForwardValidator, WindowSpec};
use sigtrader::ports::report_port::ReportPort;
use std::sync::Arc;

const SCENARIO_STRENGTHS: [f64; 5] = [0.1, 0.9, 0.9, -0.9, -0.9];
const SCENARIO_CLOSES: [f64; 5] = [100.0, 100.0, 110.0, 120.0, 130.0];

fn scenario_input() -> sigtrader::domain::pipeline::AssetInput {
    input(
        "AAPL",
        &SCENARIO_CLOSES,
        signal_run("AAPL", "technical", &SCENARIO_STRENGTHS),
    )
}

mod reference_scenarios {
    use super::*;

    #[test]
    fn decisions_fire_on_threshold_edges() {
        let config = engine_config(&[("technical", 1.0)]);
        let decisions: Vec<Decision> = decision_stream(&scenario_input(), &config, None)
            .unwrap()
            .iter()
            .map(|d| d.decision)
            .collect();
        assert_eq!(
            decisions,
            vec![
                Decision::Hold,
                Decision::Buy,
                Decision::Hold,
                Decision::Sell,
                Decision::Hold
            ]
        );
    }

    #[test]
    fn trades_execute_one_bar_after_the_decision() {
        let config = engine_config(&[("technical", 1.0)]);
        let result = run_asset(&scenario_input(), &config, None).unwrap();

        assert_eq!(result.trades.len(), 2);
        let open = &result.trades[0];
        assert_eq!(open.kind, TradeKind::Open);
        assert_eq!(open.side, Side::Buy);
        assert_eq!(open.timestamp, ts(2));
        assert_eq!(open.fill_price, 110.0);
        assert_eq!(open.quantity, 90);

        let close = &result.trades[1];
        assert_eq!(close.kind, TradeKind::Close);
        assert_eq!(close.timestamp, ts(4));
        assert_eq!(close.fill_price, 130.0);
        assert_relative_eq!(close.realized_pnl.unwrap(), 1_800.0);

        assert_eq!(result.equity_curve.len(), 5);
        assert_relative_eq!(result.final_equity().unwrap(), 11_800.0);
        assert_relative_eq!(result.final_cash, 11_800.0);
        assert!(result.open_positions.is_empty());
        assert_relative_eq!(result.metrics.win_rate, 1.0);
    }

    #[test]
    fn drawdown_of_reference_curve() {
        let curve: Vec<EquityPoint> = [10_000.0, 10_500.0, 9_800.0, 10_200.0]
            .iter()
            .enumerate()
            .map(|(i, &equity)| EquityPoint {
                timestamp: ts(i),
                equity,
            })
            .collect();
        let metrics = Metrics::compute(&curve, &[], None, &MetricsConfig::default());
        assert_relative_eq!(metrics.max_drawdown, 700.0 / 10_500.0);
        assert_relative_eq!(metrics.total_return, 0.02);
    }

    #[test]
    fn empty_signal_set_holds_everywhere() {
        let config = engine_config(&[("technical", 1.0)]);
        let input = input("AAPL", &SCENARIO_CLOSES, Vec::new());
        let result = run_asset(&input, &config, None).unwrap();

        assert!(result.decisions.iter().all(|d| d.decision == Decision::Hold));
        assert!(result.decisions.iter().all(|d| d.score == 0.0));
        assert!(result.trades.is_empty());
        assert!(result.equity_curve.iter().all(|p| p.equity == 10_000.0));
        assert_eq!(result.metrics.total_return, 0.0);
    }

    #[test]
    fn min_history_rejects_sparse_signals() {
        let mut config = engine_config(&[("technical", 1.0)]);
        config.normalizer.min_history = 3;
        let input = input(
            "AAPL",
            &SCENARIO_CLOSES,
            signal_run("AAPL", "technical", &[0.5]),
        );
        config.normalizer.staleness_tolerance = chrono::TimeDelta::hours(12);
        assert!(matches!(
            run_asset(&input, &config, None),
            Err(SigtraderError::InsufficientHistory {
                available: 1,
                required: 3,
                ..
            })
        ));
    }
}

mod multi_source {
    use super::*;

    #[test]
    fn weights_blend_sources() {
        let mut signals = signal_run("AAPL", "technical", &[0.9, 0.9, 0.9]);
        signals.extend(signal_run("AAPL", "sentiment", &[-0.3, -0.3, -0.3]));
        let input = input("AAPL", &[100.0, 101.0, 102.0], signals);
        let config = engine_config(&[("technical", 0.75), ("sentiment", 0.25)]);

        let stream = decision_stream(&input, &config, None).unwrap();
        // (0.75*0.9 + 0.25*-0.3) / 1.0
        assert_relative_eq!(stream[0].score, 0.6, epsilon = 1e-12);
        assert_eq!(stream[0].decision, Decision::Buy);
    }

    #[test]
    fn unconfigured_source_is_ignored() {
        let mut signals = signal_run("AAPL", "technical", &[0.2, 0.2]);
        signals.extend(signal_run("AAPL", "rumours", &[-1.0, -1.0]));
        let input = input("AAPL", &[100.0, 101.0], signals);
        let config = engine_config(&[("technical", 1.0)]);

        let stream = decision_stream(&input, &config, None).unwrap();
        assert_relative_eq!(stream[0].score, 0.2, epsilon = 1e-12);
    }

    #[test]
    fn stale_source_drops_out_and_is_reported() {
        let mut signals = signal_run("AAPL", "technical", &[0.9]);
        signals.extend(signal_run("AAPL", "sentiment", &[0.1, 0.1, 0.1, 0.1, 0.1]));
        let input = input("AAPL", &[100.0; 5], signals);
        let mut config = engine_config(&[("technical", 1.0), ("sentiment", 1.0)]);
        config.normalizer = NormalizerConfig {
            staleness_tolerance: chrono::TimeDelta::days(1),
            min_history: 0,
        };

        let frame = build_frame(&input, &config).unwrap();
        assert_eq!(frame.gaps.len(), 1);
        assert_eq!(frame.gaps[0].source_id, "technical");
        assert_eq!(frame.gaps[0].timestamp, ts(2));
        assert_eq!(frame.gaps[0].last_seen, ts(0));

        let stream = decision_stream(&input, &config, None).unwrap();
        assert_relative_eq!(stream[1].score, 0.5, epsilon = 1e-12);
        assert_relative_eq!(stream[4].score, 0.1, epsilon = 1e-12);
    }
}

mod multi_asset {
    use super::*;

    #[test]
    fn assets_run_independently_in_input_order() {
        let port = MockDataPort::new()
            .with_prices("MSFT", &[300.0, 310.0, 320.0, 330.0])
            .with_signals("MSFT", signal_run("MSFT", "technical", &[0.9, 0.9, 0.9, 0.9]))
            .with_prices("AAPL", &SCENARIO_CLOSES)
            .with_signals("AAPL", signal_run("AAPL", "technical", &SCENARIO_STRENGTHS));
        let assets = vec!["MSFT".to_string(), "AAPL".to_string()];
        let inputs = load_inputs(&port, &assets).unwrap();
        let config = engine_config(&[("technical", 1.0)]);

        let outcomes = run_assets(&inputs, &config, None);
        assert_eq!(outcomes[0].asset_id, "MSFT");
        assert_eq!(outcomes[1].asset_id, "AAPL");

        let aapl = outcomes[1].outcome.as_ref().unwrap();
        let alone = run_asset(&scenario_input(), &config, None).unwrap();
        assert_eq!(aapl.trades, alone.trades);
        assert_eq!(aapl.equity_curve, alone.equity_curve);

        let msft = outcomes[0].outcome.as_ref().unwrap();
        assert_eq!(msft.trades[0].timestamp, ts(1));
    }

    #[test]
    fn asset_without_prices_fails_alone() {
        let port = MockDataPort::new()
            .with_prices("AAPL", &SCENARIO_CLOSES)
            .with_signals("AAPL", signal_run("AAPL", "technical", &SCENARIO_STRENGTHS));
        let assets = vec!["TSLA".to_string(), "AAPL".to_string()];
        let inputs = load_inputs(&port, &assets).unwrap();

        let outcomes = run_assets(&inputs, &engine_config(&[("technical", 1.0)]), None);
        assert!(matches!(
            outcomes[0].outcome,
            Err(SigtraderError::NoData { .. })
        ));
        assert_eq!(outcomes[1].outcome.as_ref().unwrap().trades.len(), 2);
    }

    #[test]
    fn data_port_error_propagates() {
        let port = MockDataPort::new()
            .with_prices("AAPL", &SCENARIO_CLOSES)
            .with_error("AAPL", "disk on fire");
        let result = load_inputs(&port, &["AAPL".to_string()]);
        assert!(matches!(result, Err(SigtraderError::Data { reason }) if reason == "disk on fire"));
    }

    #[test]
    fn data_range_reports_sources() {
        use sigtrader::ports::data_port::DataPort;
        let mut signals = signal_run("AAPL", "technical", &[0.1, 0.2]);
        signals.extend(signal_run("AAPL", "forecast", &[0.3]));
        let port = MockDataPort::new()
            .with_prices("AAPL", &SCENARIO_CLOSES)
            .with_signals("AAPL", signals);
        let range = port.get_data_range("AAPL").unwrap().unwrap();
        assert_eq!(range.first, ts(0));
        assert_eq!(range.last, ts(4));
        assert_eq!(range.sources, vec!["forecast", "technical"]);
        assert_eq!(port.list_assets().unwrap(), vec!["AAPL"]);
    }
}

mod walk_forward {
    use super::*;

    fn oscillating(n: usize) -> (Vec<f64>, Vec<f64>) {
        let closes = (0..n)
            .map(|i| if i % 6 < 3 { 100.0 + i as f64 } else { 100.0 - i as f64 * 0.5 })
            .collect();
        let strengths = (0..n).map(|i| if i % 6 < 3 { 0.8 } else { -0.8 }).collect();
        (closes, strengths)
    }

    #[test]
    fn windows_only_trade_inside_test_ranges() {
        let (closes, strengths) = oscillating(42);
        let input = input("AAPL", &closes, signal_run("AAPL", "technical", &strengths));
        let mut config = engine_config(&[("technical", 1.0)]);
        config.backtest.allow_short = true;
        let spec = WindowSpec {
            train_length: 12,
            test_length: 6,
            step: 6,
        };

        let report = walk_forward_asset(&input, &config, spec, ModelRegistry::new()).unwrap();
        assert_eq!(report.windows.len(), 5);
        for w in &report.windows {
            let first = ts(w.window.test.start);
            let last = ts(w.window.test.end - 1);
            assert!(w.result.trades.iter().all(|t| t.timestamp >= first && t.timestamp <= last));
            assert_eq!(w.result.equity_curve[0].timestamp, first);
        }
        for pair in report.windows.windows(2) {
            assert!(pair[0].window.test.end <= pair[1].window.test.start);
        }
        assert_eq!(report.combined_equity.len(), 30);
    }

    #[test]
    fn training_never_sees_test_prices() {
        let (closes, strengths) = oscillating(24);
        let spec = WindowSpec {
            train_length: 12,
            test_length: 6,
            step: 6,
        };
        let mut config = engine_config(&[("technical", 1.0)]);
        config.aggregator.strategy = AggregationStrategy::Learned;

        let fitted_weight = |closes: &[f64]| {
            let input = input("AAPL", closes, signal_run("AAPL", "technical", &strengths));
            let frame = build_frame(&input, &config).unwrap();
            let mut validator = WalkForwardValidator::new(
                spec,
                config.aggregator.clone(),
                config.backtest.clone(),
                ModelRegistry::with_trainer(Arc::new(CorrelationTrainer::default())),
            );
            validator.run(&frame, &input.prices).unwrap();
            let model = validator.registry().cached("AAPL", 0).unwrap();
            model.predict(&[1.0])
        };

        let mut shocked = closes.clone();
        for c in shocked.iter_mut().skip(12) {
            *c *= 3.0;
        }
        assert_eq!(fitted_weight(&closes), fitted_weight(&shocked));
    }

    #[test]
    fn too_short_history_is_fatal() {
        let input = input(
            "AAPL",
            &SCENARIO_CLOSES,
            signal_run("AAPL", "technical", &SCENARIO_STRENGTHS),
        );
        let spec = WindowSpec {
            train_length: 4,
            test_length: 2,
            step: 2,
        };
        let result = walk_forward_asset(&input, &engine_config(&[("technical", 1.0)]), spec, ModelRegistry::new());
        assert!(matches!(
            result,
            Err(SigtraderError::InsufficientHistory {
                available: 5,
                required: 6,
                ..
            })
        ));
    }
}

mod costs {
    use super::*;

    #[test]
    fn frictions_reduce_final_equity() {
        let free = run_asset(&scenario_input(), &engine_config(&[("technical", 1.0)]), None).unwrap();

        let mut config = engine_config(&[("technical", 1.0)]);
        config.backtest.costs = CostModel {
            slippage_bps: 10.0,
            fixed_fee: 2.0,
            variable_fee_rate: 0.001,
        };
        let costly = run_asset(&scenario_input(), &config, None).unwrap();

        assert_eq!(costly.trades.len(), 2);
        assert!(costly.trades[0].fill_price > 110.0);
        assert!(costly.trades[1].fill_price < 130.0);
        assert!(costly.trades.iter().all(|t| t.fees > 2.0));
        assert!(costly.final_equity().unwrap() < free.final_equity().unwrap());
        assert!(costly.final_cash >= 0.0);
    }
}

mod reporting {
    use super::*;
    use std::fs;

    #[test]
    fn backtest_report_serializes_results() {
        let result = run_asset(&scenario_input(), &engine_config(&[("technical", 1.0)]), None).unwrap();
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("report.json");

        JsonReportAdapter::new()
            .write_backtests(std::slice::from_ref(&result), Some(&path))
            .unwrap();

        let json: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        let first = &json[0];
        assert_eq!(first["asset_id"], "AAPL");
        assert_eq!(first["trades"].as_array().unwrap().len(), 2);
        assert_eq!(first["trades"][0]["side"], "BUY");
        assert_eq!(first["decisions"][1]["decision"], "BUY");
        assert_eq!(first["equity_curve"].as_array().unwrap().len(), 5);
        assert!(first["metrics"]["sharpe_ratio"].is_number());
    }
}
