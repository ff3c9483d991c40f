//! Open positions and executed trades.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::cost_model::Side;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PositionState {
    Flat,
    Long,
    Short,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub asset_id: String,
    /// Positive long, negative short.
    pub quantity: i64,
    pub average_cost: f64,
    pub entry_fees: f64,
    pub opened_at: DateTime<Utc>,
}

impl Position {
    pub fn is_long(&self) -> bool {
        self.quantity > 0
    }

    pub fn is_short(&self) -> bool {
        self.quantity < 0
    }

    pub fn state(&self) -> PositionState {
        if self.is_long() {
            PositionState::Long
        } else if self.is_short() {
            PositionState::Short
        } else {
            PositionState::Flat
        }
    }

    pub fn unrealized_pnl(&self, price: f64) -> f64 {
        self.quantity as f64 * (price - self.average_cost)
    }

    /// Contribution to equity at `price`. Shorts hold their entry notional
    /// in escrow, so their value is escrow plus unrealized P&L.
    pub fn equity_value(&self, price: f64) -> f64 {
        self.quantity.unsigned_abs() as f64 * self.average_cost + self.unrealized_pnl(price)
    }

    /// Side of the trade that would flatten this position.
    pub fn closing_side(&self) -> Side {
        if self.is_long() { Side::Sell } else { Side::Buy }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeKind {
    Open,
    Close,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub asset_id: String,
    pub timestamp: DateTime<Utc>,
    pub side: Side,
    pub kind: TradeKind,
    /// Always positive; direction is carried by `side`.
    pub quantity: i64,
    pub fill_price: f64,
    pub fees: f64,
    /// Round-trip P&L net of entry and exit fees, closing trades only.
    pub realized_pnl: Option<f64>,
}

impl Trade {
    pub fn is_closing(&self) -> bool {
        self.kind == TradeKind::Close
    }
}
