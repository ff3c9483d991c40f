//! Performance metrics reduced from an equity curve and trade list.

use serde::{Deserialize, Serialize};

use super::portfolio::EquityPoint;
use super::position::Trade;

pub const DEFAULT_PERIODS_PER_YEAR: f64 = 252.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MetricsConfig {
    pub periods_per_year: f64,
    /// Annual rate.
    pub risk_free_rate: f64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        MetricsConfig {
            periods_per_year: DEFAULT_PERIODS_PER_YEAR,
            risk_free_rate: 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Metrics {
    pub total_return: f64,
    pub annualized_return: f64,
    pub annualized_volatility: f64,
    pub sharpe_ratio: f64,
    pub sortino_ratio: f64,
    pub max_drawdown: f64,
    /// Longest run of bars spent below a prior peak.
    pub max_drawdown_duration: usize,
    pub win_rate: f64,
    pub profit_factor: f64,
    pub trade_count: usize,
    pub closing_trades: usize,
}

impl Metrics {
    /// `starting_equity` anchors total return; when `None` the first equity
    /// point is used.
    pub fn compute(
        equity_curve: &[EquityPoint],
        trades: &[Trade],
        starting_equity: Option<f64>,
        config: &MetricsConfig,
    ) -> Self {
        let initial = starting_equity
            .or_else(|| equity_curve.first().map(|p| p.equity))
            .unwrap_or(0.0);
        let final_equity = equity_curve.last().map(|p| p.equity).unwrap_or(initial);

        let total_return = if initial > 0.0 {
            (final_equity - initial) / initial
        } else {
            0.0
        };

        let periods = equity_curve.len() as f64;
        let years = periods / config.periods_per_year;
        let annualized_return = if years > 0.0 && total_return.is_finite() && total_return > -1.0 {
            (1.0 + total_return).powf(1.0 / years) - 1.0
        } else {
            0.0
        };

        let returns = periodic_returns(equity_curve);
        let risk = compute_risk_adjusted(&returns, config);
        let (max_drawdown, max_drawdown_duration) = compute_drawdown(equity_curve);
        let (win_rate, profit_factor, closing_trades) = compute_trade_stats(trades);

        Metrics {
            total_return,
            annualized_return,
            annualized_volatility: risk.volatility,
            sharpe_ratio: risk.sharpe,
            sortino_ratio: risk.sortino,
            max_drawdown,
            max_drawdown_duration,
            win_rate,
            profit_factor,
            trade_count: trades.len(),
            closing_trades,
        }
    }
}

pub fn periodic_returns(equity_curve: &[EquityPoint]) -> Vec<f64> {
    equity_curve
        .windows(2)
        .map(|w| {
            let prev = w[0].equity;
            if prev > 0.0 {
                (w[1].equity - prev) / prev
            } else {
                0.0
            }
        })
        .collect()
}

pub fn compute_drawdown(equity_curve: &[EquityPoint]) -> (f64, usize) {
    let Some(first) = equity_curve.first() else {
        return (0.0, 0);
    };

    let mut peak = first.equity;
    let mut max_dd = 0.0_f64;
    let mut max_duration = 0usize;
    let mut duration = 0usize;

    for point in equity_curve {
        if point.equity >= peak {
            peak = point.equity;
            duration = 0;
        } else if peak > 0.0 {
            max_dd = max_dd.max((peak - point.equity) / peak);
            duration += 1;
            max_duration = max_duration.max(duration);
        }
    }

    (max_dd, max_duration)
}

struct RiskAdjusted {
    volatility: f64,
    sharpe: f64,
    sortino: f64,
}

fn compute_risk_adjusted(returns: &[f64], config: &MetricsConfig) -> RiskAdjusted {
    if returns.is_empty() || config.periods_per_year <= 0.0 {
        return RiskAdjusted {
            volatility: 0.0,
            sharpe: 0.0,
            sortino: 0.0,
        };
    }

    let n = returns.len() as f64;
    let mean = returns.iter().sum::<f64>() / n;
    let variance = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / n;
    let stddev = variance.sqrt();
    let scale = config.periods_per_year.sqrt();

    let periodic_rf = config.risk_free_rate / config.periods_per_year;
    let excess = mean - periodic_rf;

    let volatility = stddev * scale;
    let sharpe = if stddev > 0.0 {
        excess / stddev * scale
    } else {
        0.0
    };

    let downside = returns
        .iter()
        .filter(|&&r| r < periodic_rf)
        .map(|&r| (r - periodic_rf).powi(2))
        .sum::<f64>()
        / n;
    let downside_stddev = downside.sqrt();
    let sortino = if downside_stddev > 0.0 {
        excess / downside_stddev * scale
    } else {
        0.0
    };

    RiskAdjusted {
        volatility,
        sharpe,
        sortino,
    }
}

fn compute_trade_stats(trades: &[Trade]) -> (f64, f64, usize) {
    let mut closing = 0usize;
    let mut won = 0usize;
    let mut gross_win = 0.0_f64;
    let mut gross_loss = 0.0_f64;

    for pnl in trades.iter().filter_map(|t| t.realized_pnl) {
        closing += 1;
        if pnl > 0.0 {
            won += 1;
            gross_win += pnl;
        } else if pnl < 0.0 {
            gross_loss += -pnl;
        }
    }

    let win_rate = if closing > 0 {
        won as f64 / closing as f64
    } else {
        0.0
    };
    let profit_factor = if gross_loss > 0.0 {
        gross_win / gross_loss
    } else if gross_win > 0.0 {
        f64::INFINITY
    } else {
        0.0
    };

    (win_rate, profit_factor, closing)
}
