//! ATR-based stop-loss / take-profit bands.
//!
//! InitialStopLoss[i]   = Close[i] - ATR[i] * stop_loss_mult
//! InitialTakeProfit[i] = Close[i] + ATR[i] * take_profit_mult
//!
//! When the bars carry no precomputed ATR, it is the trailing simple mean of
//! the true range over `atr_period` bars. Warmup bars yield NaN bands.

use crate::domain::ohlcv::Bar;

#[derive(Debug, Clone, PartialEq)]
pub struct RiskConfig {
    pub atr_period: usize,
    pub stop_loss_mult: f64,
    pub take_profit_mult: f64,
}

impl Default for RiskConfig {
    fn default() -> Self {
        RiskConfig {
            atr_period: 14,
            stop_loss_mult: 2.0,
            take_profit_mult: 3.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RiskBand {
    pub atr: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
}

impl RiskBand {
    /// A position can only be opened on a bar with both levels defined.
    pub fn is_valid(&self) -> bool {
        self.stop_loss.is_finite() && self.take_profit.is_finite()
    }
}

/// Per-bar true range. The first bar has no previous close and falls back to
/// high - low.
pub fn true_ranges(bars: &[Bar]) -> Vec<f64> {
    bars.iter()
        .enumerate()
        .map(|(i, bar)| {
            let prev_close = if i == 0 { f64::NAN } else { bars[i - 1].close };
            bar.true_range(prev_close)
        })
        .collect()
}

/// Trailing simple mean of the true range. The first `period - 1` values are NaN.
pub fn average_true_range(bars: &[Bar], period: usize) -> Vec<f64> {
    let tr = true_ranges(bars);
    let mut atr = vec![f64::NAN; tr.len()];
    if period == 0 {
        return atr;
    }
    for i in (period - 1)..tr.len() {
        let window = &tr[i + 1 - period..=i];
        atr[i] = window.iter().sum::<f64>() / period as f64;
    }
    atr
}

/// Compute the risk band for every bar.
///
/// A precomputed `ATR` column is used only when every bar carries it;
/// otherwise the whole column is derived from the price series.
pub fn compute_risk_bands(bars: &[Bar], config: &RiskConfig) -> Vec<RiskBand> {
    let precomputed: Option<Vec<f64>> = bars.iter().map(|b| b.atr()).collect();
    let atr = match precomputed {
        Some(values) if !bars.is_empty() => values,
        _ => average_true_range(bars, config.atr_period),
    };

    bars.iter()
        .zip(atr)
        .map(|(bar, atr)| RiskBand {
            atr,
            stop_loss: bar.close - atr * config.stop_loss_mult,
            take_profit: bar.close + atr * config.take_profit_mult,
        })
        .collect()
}
