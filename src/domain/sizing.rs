//! Fractional-Kelly position sizing.
//!
//! The two-pass workflow probes each instrument at full size, reads win rate
//! and profit factor off the probe's trade ledger, then re-runs at the
//! recommended fraction.

use rayon::prelude::*;
use tracing::debug;

use super::backtest::{BacktestConfig, BacktestResult, run_backtest};
use super::code_data::CodeData;
use super::error::SigtraderError;
use super::metrics::Metrics;

/// Profit factor assumed for a run without losing trades.
pub const UNBOUNDED_PROFIT_FACTOR: f64 = 2.0;

#[derive(Debug, Clone, PartialEq)]
pub struct SizingConfig {
    /// Upper bound on the recommended capital fraction.
    pub max_cap: f64,
    /// Lower bound on the recommended capital fraction.
    pub min_fraction: f64,
    /// Fraction returned for systems with profit factor <= 1.
    pub floor: f64,
    /// Kelly safety discount; 0.5 is half-Kelly.
    pub kelly_scale: f64,
}

impl Default for SizingConfig {
    fn default() -> Self {
        SizingConfig {
            max_cap: 0.25,
            min_fraction: 0.01,
            floor: 0.05,
            kelly_scale: 0.5,
        }
    }
}

/// Recommended capital fraction in `[min_fraction, max_cap]`.
///
/// edge = (p * b - (1 - p)) / b with p = win rate and b = profit factor.
/// An infinite profit factor (no losing trades) is sized as
/// [`UNBOUNDED_PROFIT_FACTOR`].
pub fn kelly_fraction(win_rate: f64, profit_factor: f64, config: &SizingConfig) -> f64 {
    if profit_factor.is_nan() || win_rate.is_nan() || profit_factor <= 1.0 {
        return config.floor;
    }

    let p = win_rate.clamp(0.0, 1.0);
    let q = 1.0 - p;
    let b = if profit_factor.is_infinite() {
        UNBOUNDED_PROFIT_FACTOR
    } else {
        profit_factor
    };
    let edge = (p * b - q) / b;

    (edge * config.kelly_scale).clamp(config.min_fraction, config.max_cap)
}

/// Outcome of a probe-then-size run.
#[derive(Debug, Clone)]
pub struct SizedRun {
    pub fraction: f64,
    /// Metrics of the full-size probe run.
    pub probe: Metrics,
    pub result: BacktestResult,
}

pub fn run_kelly_sized(
    instrument: &CodeData,
    config: &BacktestConfig,
    sizing: &SizingConfig,
) -> Result<SizedRun, SigtraderError> {
    let probe_result = run_backtest(&instrument.code, &instrument.bars, 1.0, config)?;
    let probe = Metrics::compute(&probe_result, config.risk_free_rate);
    let fraction = kelly_fraction(probe.win_rate, probe.profit_factor, sizing);
    debug!(
        code = %instrument.code,
        win_rate = probe.win_rate,
        profit_factor = probe.profit_factor,
        fraction,
        "kelly fraction"
    );
    let result = run_backtest(&instrument.code, &instrument.bars, fraction, config)?;
    Ok(SizedRun {
        fraction,
        probe,
        result,
    })
}

/// [`run_kelly_sized`] for every instrument on the rayon pool, in input order.
pub fn run_kelly_batch(
    instruments: &[CodeData],
    config: &BacktestConfig,
    sizing: &SizingConfig,
) -> Result<Vec<SizedRun>, SigtraderError> {
    instruments
        .par_iter()
        .map(|cd| run_kelly_sized(cd, config, sizing))
        .collect()
}
