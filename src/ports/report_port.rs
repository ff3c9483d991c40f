//! Report generation port trait.

use crate::domain::backtest::BacktestResult;
use crate::domain::error::SigtraderError;
use crate::domain::signal::AggregatedSignal;
use crate::domain::walk_forward::WalkForwardReport;
use std::path::Path;

/// Port for persisting run results. `None` for `output` means stdout.
pub trait ReportPort {
    fn write_backtests(
        &self,
        results: &[BacktestResult],
        output: Option<&Path>,
    ) -> Result<(), SigtraderError>;

    fn write_walk_forward(
        &self,
        reports: &[WalkForwardReport],
        output: Option<&Path>,
    ) -> Result<(), SigtraderError>;

    fn write_decisions(
        &self,
        decisions: &[AggregatedSignal],
        output: Option<&Path>,
    ) -> Result<(), SigtraderError>;
}
