//! Backtest simulator: replays a decision stream against a price series.
//!
//! A decision emitted on bar `i` is executed on bar `i + 1` at that bar's
//! close (through the cost model) and the trade carries bar `i + 1`'s
//! timestamp. A decision on the final bar is never executed, and with
//! end-of-run liquidation no new position is opened on the final bar.
//! A short whose equity reaches zero at a bar's close is covered on that
//! bar. Equity is marked on every bar after any execution on that bar.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

use super::cost_model::{CostModel, Side};
use super::error::SigtraderError;
use super::metrics::{Metrics, MetricsConfig};
use super::portfolio::{EquityPoint, PortfolioState};
use super::position::{Position, PositionState, Trade, TradeKind};
use super::price::PriceSeries;
use super::signal::{AggregatedSignal, Decision};

#[derive(Debug, Clone, PartialEq)]
pub struct BacktestConfig {
    pub starting_cash: f64,
    /// Fraction of current equity committed to each new position.
    pub position_fraction: f64,
    pub allow_short: bool,
    /// Open the opposite position right after closing one.
    pub allow_reversal: bool,
    /// Force-close open positions on the final bar.
    pub liquidate_at_end: bool,
    pub costs: CostModel,
    pub metrics: MetricsConfig,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        BacktestConfig {
            starting_cash: 10_000.0,
            position_fraction: 1.0,
            allow_short: false,
            allow_reversal: false,
            liquidate_at_end: true,
            costs: CostModel::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    InsufficientCash,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SimulationEvent {
    /// An intended entry that could not be funded.
    SkippedTrade {
        asset_id: String,
        timestamp: DateTime<Utc>,
        side: Side,
        reason: SkipReason,
    },
    /// A decision with no bar left to hold a position on.
    SignalExpired {
        asset_id: String,
        timestamp: DateTime<Utc>,
        decision: Decision,
    },
    /// A short covered because its losses consumed the escrowed notional.
    StopOut {
        asset_id: String,
        timestamp: DateTime<Utc>,
        price: f64,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BacktestResult {
    pub asset_id: String,
    pub equity_curve: Vec<EquityPoint>,
    pub trades: Vec<Trade>,
    pub events: Vec<SimulationEvent>,
    pub decisions: Vec<AggregatedSignal>,
    pub metrics: Metrics,
    pub final_cash: f64,
    pub open_positions: Vec<Position>,
}

impl BacktestResult {
    pub fn skipped_trades(&self) -> usize {
        self.events
            .iter()
            .filter(|e| matches!(e, SimulationEvent::SkippedTrade { .. }))
            .count()
    }

    pub fn final_equity(&self) -> Option<f64> {
        self.equity_curve.last().map(|p| p.equity)
    }
}

/// Run one asset's simulation. `decisions` must be aligned one-to-one with
/// the price grid.
pub fn run_backtest(
    decisions: &[AggregatedSignal],
    prices: &PriceSeries,
    config: &BacktestConfig,
) -> Result<BacktestResult, SigtraderError> {
    check_alignment(decisions, prices)?;

    let asset_id = prices.asset_id();
    let mut sim = Simulator::new(asset_id, config);
    let timestamps = prices.timestamps();
    let closes = prices.closes();
    let last = timestamps.len().saturating_sub(1);
    let mut pending: Option<Decision> = None;

    for (i, (&timestamp, &price)) in timestamps.iter().zip(closes).enumerate() {
        let closing_bar = i == last && config.liquidate_at_end;
        if let Some(decision) = pending.take() {
            sim.execute(decision, timestamp, price, !closing_bar);
        }
        sim.stop_out(timestamp, price);
        if closing_bar {
            sim.liquidate(timestamp, price);
        }
        sim.mark(timestamp, price);

        let signal = &decisions[i];
        if signal.decision != Decision::Hold {
            if i == last {
                sim.events.push(SimulationEvent::SignalExpired {
                    asset_id: asset_id.to_string(),
                    timestamp,
                    decision: signal.decision,
                });
            } else {
                pending = Some(signal.decision);
            }
        }
    }

    let events = sim.events;
    let frozen = sim.portfolio.freeze();
    let metrics = Metrics::compute(
        &frozen.equity_curve,
        &frozen.trades,
        Some(frozen.starting_cash),
        &config.metrics,
    );

    info!(
        asset = asset_id,
        bars = timestamps.len(),
        trades = frozen.trades.len(),
        total_return = metrics.total_return,
        "backtest complete"
    );

    Ok(BacktestResult {
        asset_id: asset_id.to_string(),
        equity_curve: frozen.equity_curve,
        trades: frozen.trades,
        events,
        decisions: decisions.to_vec(),
        metrics,
        final_cash: frozen.final_cash,
        open_positions: frozen.open_positions,
    })
}

fn check_alignment(
    decisions: &[AggregatedSignal],
    prices: &PriceSeries,
) -> Result<(), SigtraderError> {
    if decisions.len() != prices.len() {
        return Err(SigtraderError::Alignment {
            asset_id: prices.asset_id().to_string(),
            timestamp: prices
                .timestamps()
                .first()
                .copied()
                .unwrap_or(DateTime::<Utc>::MIN_UTC),
            reason: format!(
                "{} decisions for {} price bars",
                decisions.len(),
                prices.len()
            ),
        });
    }
    for (signal, &t) in decisions.iter().zip(prices.timestamps()) {
        if signal.timestamp != t || signal.asset_id != prices.asset_id() {
            return Err(SigtraderError::Alignment {
                asset_id: prices.asset_id().to_string(),
                timestamp: t,
                reason: format!(
                    "decision for {} at {} does not match price bar",
                    signal.asset_id, signal.timestamp
                ),
            });
        }
    }
    Ok(())
}

struct Simulator<'a> {
    asset_id: &'a str,
    config: &'a BacktestConfig,
    portfolio: PortfolioState,
    events: Vec<SimulationEvent>,
}

impl<'a> Simulator<'a> {
    fn new(asset_id: &'a str, config: &'a BacktestConfig) -> Self {
        Simulator {
            asset_id,
            config,
            portfolio: PortfolioState::new(config.starting_cash),
            events: Vec::new(),
        }
    }

    fn state(&self) -> PositionState {
        self.portfolio
            .get_position(self.asset_id)
            .map(Position::state)
            .unwrap_or(PositionState::Flat)
    }

    fn equity(&self, price: f64) -> f64 {
        let prices = BTreeMap::from([(self.asset_id.to_string(), price)]);
        self.portfolio.total_equity(&prices)
    }

    fn mark(&mut self, timestamp: DateTime<Utc>, price: f64) {
        let equity = self.equity(price);
        self.portfolio.record_equity(timestamp, equity);
    }

    fn execute(
        &mut self,
        decision: Decision,
        timestamp: DateTime<Utc>,
        price: f64,
        allow_entry: bool,
    ) {
        let entry = match (self.state(), decision) {
            (PositionState::Flat, Decision::Buy) => Some(Side::Buy),
            (PositionState::Flat, Decision::Sell) if self.config.allow_short => Some(Side::Sell),
            (PositionState::Long, Decision::Sell) => {
                self.close(timestamp, price);
                (self.config.allow_reversal && self.config.allow_short).then_some(Side::Sell)
            }
            (PositionState::Short, Decision::Buy) => {
                self.close(timestamp, price);
                self.config.allow_reversal.then_some(Side::Buy)
            }
            _ => None,
        };

        match entry {
            Some(side) if allow_entry => self.open(side, timestamp, price),
            Some(side) => {
                debug!(asset = self.asset_id, %timestamp, %side, "entry on closing bar dropped");
                self.events.push(SimulationEvent::SignalExpired {
                    asset_id: self.asset_id.to_string(),
                    timestamp,
                    decision,
                });
            }
            None => {}
        }
    }

    fn stop_out(&mut self, timestamp: DateTime<Utc>, price: f64) {
        let wiped = self
            .portfolio
            .get_position(self.asset_id)
            .is_some_and(|p| p.is_short() && p.equity_value(price) <= 0.0);
        if !wiped {
            return;
        }
        warn!(asset = self.asset_id, %timestamp, price, "short stopped out");
        self.events.push(SimulationEvent::StopOut {
            asset_id: self.asset_id.to_string(),
            timestamp,
            price,
        });
        self.close(timestamp, price);
    }

    fn open(&mut self, side: Side, timestamp: DateTime<Utc>, price: f64) {
        let costs = &self.config.costs;
        let cash = self.portfolio.cash;
        let budget = self.equity(price) * self.config.position_fraction;

        let mut quantity = costs.affordable_quantity(side, price, budget, cash);
        while quantity > 0 && entry_outlay(costs, side, quantity, price) > cash {
            quantity -= 1;
        }

        if quantity == 0 {
            warn!(
                asset = self.asset_id,
                %timestamp,
                %side,
                cash,
                "skipping entry: insufficient cash"
            );
            self.events.push(SimulationEvent::SkippedTrade {
                asset_id: self.asset_id.to_string(),
                timestamp,
                side,
                reason: SkipReason::InsufficientCash,
            });
            return;
        }

        let fill = costs.fill(side, quantity as f64, price, None);
        self.portfolio.cash -= quantity as f64 * fill.fill_price + fill.fees;

        let signed = match side {
            Side::Buy => quantity,
            Side::Sell => -quantity,
        };
        self.portfolio.add_position(Position {
            asset_id: self.asset_id.to_string(),
            quantity: signed,
            average_cost: fill.fill_price,
            entry_fees: fill.fees,
            opened_at: timestamp,
        });
        self.portfolio.record_trade(Trade {
            asset_id: self.asset_id.to_string(),
            timestamp,
            side,
            kind: TradeKind::Open,
            quantity,
            fill_price: fill.fill_price,
            fees: fill.fees,
            realized_pnl: None,
        });
        debug!(
            asset = self.asset_id,
            %timestamp,
            %side,
            quantity,
            price = fill.fill_price,
            "opened position"
        );
    }

    fn close(&mut self, timestamp: DateTime<Utc>, price: f64) {
        let Some(position) = self.portfolio.remove_position(self.asset_id) else {
            return;
        };
        let side = position.closing_side();
        let qty_abs = position.quantity.unsigned_abs() as i64;
        let fill = self.config.costs.fill(side, qty_abs as f64, price, None);

        let pnl = position.quantity as f64 * (fill.fill_price - position.average_cost)
            - position.entry_fees
            - fill.fees;

        let exit_value = qty_abs as f64 * fill.fill_price;
        if position.is_long() {
            self.portfolio.cash += exit_value - fill.fees;
        } else {
            // Release the escrowed entry notional and settle the difference.
            let escrow = qty_abs as f64 * position.average_cost;
            self.portfolio.cash += escrow + (escrow - exit_value) - fill.fees;
        }

        self.portfolio.record_trade(Trade {
            asset_id: self.asset_id.to_string(),
            timestamp,
            side,
            kind: TradeKind::Close,
            quantity: qty_abs,
            fill_price: fill.fill_price,
            fees: fill.fees,
            realized_pnl: Some(pnl),
        });
        debug!(
            asset = self.asset_id,
            %timestamp,
            %side,
            quantity = qty_abs,
            pnl,
            "closed position"
        );
    }

    fn liquidate(&mut self, timestamp: DateTime<Utc>, price: f64) {
        if self.state() != PositionState::Flat {
            debug!(asset = self.asset_id, %timestamp, "liquidating at end of grid");
            self.close(timestamp, price);
        }
    }
}

fn entry_outlay(costs: &CostModel, side: Side, quantity: i64, price: f64) -> f64 {
    let fill = costs.fill(side, quantity as f64, price, None);
    quantity as f64 * fill.fill_price + fill.fees
}
