//! Report output port trait.

use crate::domain::backtest::BacktestResult;
use crate::domain::error::SigtraderError;
use crate::domain::metrics::Metrics;
use crate::domain::portfolio::PortfolioResult;
use std::path::Path;

/// Port for persisting simulation output.
pub trait ReportPort {
    fn write_backtest(
        &self,
        result: &BacktestResult,
        metrics: &Metrics,
        output_dir: &Path,
    ) -> Result<(), SigtraderError>;

    fn write_portfolio(
        &self,
        result: &PortfolioResult,
        metrics: &Metrics,
        output_dir: &Path,
    ) -> Result<(), SigtraderError>;
}
