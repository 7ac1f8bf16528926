//! Single-instrument signal-to-equity simulator.
//!
//! Per bar:
//! 1. The position state machine turns raw signals plus risk bands into
//!    effective signals (forced exits override the raw signal).
//! 2. Position = effective signals forward-filled, clamped to {0, 1}.
//! 3. Strategy_Return[i] = Position[i-1] * Market_Return[i] * size
//!    - commission * |Position[i] - Position[i-1]|.
//! 4. Equity compounds from `initial_capital`; undefined returns count as 0.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use rayon::prelude::*;
use tracing::debug;

use super::code_data::CodeData;
use super::error::SigtraderError;
use super::ohlcv::{Bar, Signal, has_signal_column};
use super::position::{ClosedTrade, ExitReason, LongPosition, OpenTrade, PositionState};
use super::risk::{RiskBand, RiskConfig, compute_risk_bands};

#[derive(Debug, Clone, PartialEq)]
pub struct BacktestConfig {
    pub initial_capital: f64,
    /// Fraction of notional charged on every position change.
    pub commission: f64,
    pub risk_free_rate: f64,
    /// `None` disables stop-loss / take-profit exits.
    pub risk: Option<RiskConfig>,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        BacktestConfig {
            initial_capital: 100_000.0,
            commission: 0.001,
            risk_free_rate: 0.02,
            risk: Some(RiskConfig::default()),
        }
    }
}

/// One row of the extended bar series: the input bar followed by the
/// simulation columns.
#[derive(Debug, Clone, PartialEq)]
pub struct BacktestRow {
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub indicators: BTreeMap<String, f64>,
    pub signal: Signal,
    pub effective_signal: Signal,
    /// Set on bars where the position was closed.
    pub exit_reason: Option<ExitReason>,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub market_return: f64,
    pub position: u8,
    pub strategy_return: f64,
    pub trades: f64,
    pub cumulative_return: f64,
    pub equity: f64,
    pub peak: f64,
    pub drawdown: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BacktestResult {
    pub code: String,
    pub initial_capital: f64,
    pub position_size: f64,
    pub rows: Vec<BacktestRow>,
    pub trades: Vec<ClosedTrade>,
    pub open_trade: Option<OpenTrade>,
}

impl BacktestResult {
    pub fn final_equity(&self) -> f64 {
        self.rows
            .last()
            .map(|r| r.equity)
            .unwrap_or(self.initial_capital)
    }

    pub fn trade_events(&self) -> usize {
        self.rows.iter().filter(|r| r.trades > 0.0).count()
    }
}

/// Output of the position state machine for one bar.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transition {
    pub signal: Signal,
    pub exit_reason: Option<ExitReason>,
}

/// Run the FLAT/LONG state machine over the bars.
///
/// Entries need a valid close and, when bands are supplied, a valid band on
/// the entry bar. Stop and target are fixed at entry. A forced exit on a bar
/// takes precedence over whatever the raw signal says.
pub fn effective_signals(bars: &[Bar], bands: Option<&[RiskBand]>) -> Vec<Transition> {
    let mut state = PositionState::Flat;
    let mut out = Vec::with_capacity(bars.len());

    for (i, bar) in bars.iter().enumerate() {
        let raw = bar.signal.unwrap_or_default();
        let transition = match &state {
            PositionState::Flat => {
                let band = bands.map(|b| b[i]);
                let band_ok = band.is_none_or(|b| b.is_valid());
                if raw == Signal::Enter && bar.has_valid_close() && band_ok {
                    state = PositionState::Long(LongPosition {
                        entry_index: i,
                        entry_date: bar.date,
                        entry_price: bar.close,
                        stop_loss: band.map(|b| b.stop_loss),
                        take_profit: band.map(|b| b.take_profit),
                    });
                    Transition {
                        signal: Signal::Enter,
                        exit_reason: None,
                    }
                } else {
                    Transition {
                        signal: Signal::Hold,
                        exit_reason: None,
                    }
                }
            }
            PositionState::Long(pos) => {
                let reason = pos.forced_exit(bar.close).or(if raw == Signal::Exit {
                    Some(ExitReason::Signal)
                } else {
                    None
                });
                match reason {
                    Some(reason) => {
                        if reason != ExitReason::Signal {
                            debug!(date = %bar.date, close = bar.close, %reason, "forced exit");
                        }
                        state = PositionState::Flat;
                        Transition {
                            signal: Signal::Exit,
                            exit_reason: Some(reason),
                        }
                    }
                    None => Transition {
                        signal: Signal::Hold,
                        exit_reason: None,
                    },
                }
            }
        };
        out.push(transition);
    }

    out
}

/// Forward-fill non-zero signals and clamp to long-only {0, 1}.
pub fn forward_fill_position(signals: &[Signal]) -> Vec<u8> {
    let mut current = 0u8;
    signals
        .iter()
        .map(|s| {
            match s {
                Signal::Enter => current = 1,
                Signal::Exit => current = 0,
                Signal::Hold => {}
            }
            current
        })
        .collect()
}

/// Close-to-close percentage change. NaN for the first bar and wherever
/// either close is missing or non-positive.
pub fn market_returns(bars: &[Bar]) -> Vec<f64> {
    bars.iter()
        .enumerate()
        .map(|(i, bar)| {
            if i == 0 {
                return f64::NAN;
            }
            let prev = &bars[i - 1];
            if prev.has_valid_close() && bar.has_valid_close() {
                bar.close / prev.close - 1.0
            } else {
                f64::NAN
            }
        })
        .collect()
}

/// Running peak and drawdown (`equity / peak - 1`, never positive).
pub fn drawdown_series(equity: &[f64]) -> (Vec<f64>, Vec<f64>) {
    let mut peak = f64::NEG_INFINITY;
    let mut peaks = Vec::with_capacity(equity.len());
    let mut drawdowns = Vec::with_capacity(equity.len());
    for &value in equity {
        peak = peak.max(value);
        peaks.push(peak);
        let dd = if peak > 0.0 { value / peak - 1.0 } else { 0.0 };
        drawdowns.push(dd.min(0.0));
    }
    (peaks, drawdowns)
}

/// Simulate one instrument.
///
/// Fails only when the series carries no signal column. An empty series
/// produces an empty result.
pub fn run_backtest(
    code: &str,
    bars: &[Bar],
    position_size: f64,
    config: &BacktestConfig,
) -> Result<BacktestResult, SigtraderError> {
    if !has_signal_column(bars) {
        return Err(SigtraderError::MissingSignal {
            code: code.to_string(),
        });
    }

    let bands = config
        .risk
        .as_ref()
        .map(|risk| compute_risk_bands(bars, risk));
    let transitions = effective_signals(bars, bands.as_deref());
    let effective: Vec<Signal> = transitions.iter().map(|t| t.signal).collect();
    let positions = forward_fill_position(&effective);
    let market = market_returns(bars);

    let mut strategy_returns = Vec::with_capacity(bars.len());
    let mut trades = Vec::with_capacity(bars.len());
    let mut cumulative = Vec::with_capacity(bars.len());
    let mut factor = 1.0;

    for i in 0..bars.len() {
        let (ret, trade) = if i == 0 {
            (f64::NAN, 0.0)
        } else {
            let held = f64::from(positions[i - 1]);
            let trade = (f64::from(positions[i]) - held).abs();
            (held * market[i] * position_size - trade * config.commission, trade)
        };
        if !ret.is_nan() {
            factor *= 1.0 + ret;
        }
        strategy_returns.push(ret);
        trades.push(trade);
        cumulative.push(factor);
    }

    let equity: Vec<f64> = cumulative
        .iter()
        .map(|c| c * config.initial_capital)
        .collect();
    let (peaks, drawdowns) = drawdown_series(&equity);

    let rows = bars
        .iter()
        .enumerate()
        .map(|(i, bar)| BacktestRow {
            date: bar.date,
            open: bar.open,
            high: bar.high,
            low: bar.low,
            close: bar.close,
            volume: bar.volume,
            indicators: bar.indicators.clone(),
            signal: bar.signal.unwrap_or_default(),
            effective_signal: effective[i],
            exit_reason: transitions[i].exit_reason,
            stop_loss: bands.as_ref().map_or(f64::NAN, |b| b[i].stop_loss),
            take_profit: bands.as_ref().map_or(f64::NAN, |b| b[i].take_profit),
            market_return: market[i],
            position: positions[i],
            strategy_return: strategy_returns[i],
            trades: trades[i],
            cumulative_return: cumulative[i],
            equity: equity[i],
            peak: peaks[i],
            drawdown: drawdowns[i],
        })
        .collect::<Vec<_>>();

    let (closed, open_trade) = build_trade_ledger(bars, &transitions, &positions, &equity, config);

    Ok(BacktestResult {
        code: code.to_string(),
        initial_capital: config.initial_capital,
        position_size,
        rows,
        trades: closed,
        open_trade,
    })
}

fn build_trade_ledger(
    bars: &[Bar],
    transitions: &[Transition],
    positions: &[u8],
    equity: &[f64],
    config: &BacktestConfig,
) -> (Vec<ClosedTrade>, Option<OpenTrade>) {
    let equity_before = |i: usize| {
        if i == 0 {
            config.initial_capital
        } else {
            equity[i - 1]
        }
    };

    let mut closed = Vec::new();
    let mut entry: Option<usize> = None;

    for i in 0..positions.len() {
        let prev = if i == 0 { 0 } else { positions[i - 1] };
        match (prev, positions[i]) {
            (0, 1) => entry = Some(i),
            (1, 0) => {
                if let Some(e) = entry.take() {
                    closed.push(ClosedTrade {
                        entry_index: e,
                        exit_index: i,
                        entry_date: bars[e].date,
                        exit_date: bars[i].date,
                        entry_price: bars[e].close,
                        exit_price: bars[i].close,
                        exit_reason: transitions[i].exit_reason.unwrap_or(ExitReason::Signal),
                        net_return: equity[i] / equity_before(e) - 1.0,
                    });
                }
            }
            _ => {}
        }
    }

    let open_trade = entry.map(|e| {
        let last = positions.len() - 1;
        OpenTrade {
            entry_index: e,
            entry_date: bars[e].date,
            entry_price: bars[e].close,
            mark_price: bars[last].close,
            net_return: equity[last] / equity_before(e) - 1.0,
        }
    });

    (closed, open_trade)
}

/// Simulate many instruments independently on the rayon pool. Results keep
/// the input order.
pub fn run_batch(
    instruments: &[CodeData],
    position_size: f64,
    config: &BacktestConfig,
) -> Result<Vec<BacktestResult>, SigtraderError> {
    instruments
        .par_iter()
        .map(|cd| run_backtest(&cd.code, &cd.bars, position_size, config))
        .collect()
}
