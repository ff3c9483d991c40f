//! Trade execution frictions: slippage and fees.
//!
//! fill_price = reference × (1 + slippage_bps / 10000 × sign(side))
//! fees       = fixed_fee + quantity × reference × variable_fee_rate

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn sign(self) -> f64 {
        match self {
            Side::Buy => 1.0,
            Side::Sell => -1.0,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Buy => write!(f, "BUY"),
            Side::Sell => write!(f, "SELL"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct CostModel {
    /// Widens the fill away from the reference price.
    pub slippage_bps: f64,
    /// Flat cost per trade.
    pub fixed_fee: f64,
    /// Proportional cost on traded notional.
    pub variable_fee_rate: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Fill {
    pub fill_price: f64,
    pub fees: f64,
}

impl CostModel {
    /// Price and fees for trading `quantity` units.
    ///
    /// `liquidity_hint` in (0, 1) scales slippage by `1 / hint` for thin
    /// markets; `None` or values ≥ 1 leave it unchanged.
    pub fn fill(
        &self,
        side: Side,
        quantity: f64,
        reference_price: f64,
        liquidity_hint: Option<f64>,
    ) -> Fill {
        let widening = match liquidity_hint {
            Some(h) if h > 0.0 && h < 1.0 => 1.0 / h,
            _ => 1.0,
        };
        let slippage = self.slippage_bps * widening / 10_000.0;
        Fill {
            fill_price: reference_price * (1.0 + slippage * side.sign()),
            fees: self.fees(quantity, reference_price),
        }
    }

    pub fn fees(&self, quantity: f64, reference_price: f64) -> f64 {
        self.fixed_fee + quantity.abs() * reference_price * self.variable_fee_rate
    }

    /// Largest whole quantity whose notional plus fees fits in `cash`, capped
    /// at `budget` notional.
    pub fn affordable_quantity(
        &self,
        side: Side,
        reference_price: f64,
        budget: f64,
        cash: f64,
    ) -> i64 {
        let fill_price = self.fill(side, 1.0, reference_price, None).fill_price;
        if fill_price <= 0.0 || cash <= self.fixed_fee {
            return 0;
        }
        let by_budget = budget.min(cash) / fill_price;
        let by_cash = (cash - self.fixed_fee) / (fill_price + reference_price * self.variable_fee_rate);
        let qty = by_budget.min(by_cash).floor();
        if qty.is_finite() && qty > 0.0 {
            qty as i64
        } else {
            0
        }
    }
}
