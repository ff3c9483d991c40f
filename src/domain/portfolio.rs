//! Portfolio state and equity tracking.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::position::{Position, Trade};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EquityPoint {
    pub timestamp: DateTime<Utc>,
    pub equity: f64,
}

/// Mutable account state owned by one simulation run.
#[derive(Debug, Clone, PartialEq)]
pub struct PortfolioState {
    pub cash: f64,
    pub starting_cash: f64,
    pub positions: BTreeMap<String, Position>,
    pub trades: Vec<Trade>,
    pub equity_curve: Vec<EquityPoint>,
}

impl PortfolioState {
    pub fn new(starting_cash: f64) -> Self {
        PortfolioState {
            cash: starting_cash,
            starting_cash,
            positions: BTreeMap::new(),
            trades: Vec::new(),
            equity_curve: Vec::new(),
        }
    }

    pub fn add_position(&mut self, position: Position) {
        self.positions.insert(position.asset_id.clone(), position);
    }

    pub fn get_position(&self, asset_id: &str) -> Option<&Position> {
        self.positions.get(asset_id)
    }

    pub fn remove_position(&mut self, asset_id: &str) -> Option<Position> {
        self.positions.remove(asset_id)
    }

    pub fn record_trade(&mut self, trade: Trade) {
        self.trades.push(trade);
    }

    pub fn record_equity(&mut self, timestamp: DateTime<Utc>, equity: f64) {
        self.equity_curve.push(EquityPoint { timestamp, equity });
    }

    /// Cash plus every position marked at its latest known price. Positions
    /// without a price are carried at cost.
    pub fn total_equity(&self, prices: &BTreeMap<String, f64>) -> f64 {
        let position_value: f64 = self
            .positions
            .values()
            .map(|pos| match prices.get(&pos.asset_id) {
                Some(&price) => pos.equity_value(price),
                None => pos.equity_value(pos.average_cost),
            })
            .sum();
        self.cash + position_value
    }

    /// Consume the state into its read-only history.
    pub fn freeze(self) -> FrozenPortfolio {
        FrozenPortfolio {
            final_cash: self.cash,
            starting_cash: self.starting_cash,
            open_positions: self.positions.into_values().collect(),
            trades: self.trades,
            equity_curve: self.equity_curve,
        }
    }
}

/// Portfolio history after a run has ended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrozenPortfolio {
    pub final_cash: f64,
    pub starting_cash: f64,
    pub open_positions: Vec<Position>,
    pub trades: Vec<Trade>,
    pub equity_curve: Vec<EquityPoint>,
}
