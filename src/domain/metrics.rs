//! Performance metrics and statistics.

use super::backtest::BacktestResult;
use super::portfolio::PortfolioResult;

pub const TRADING_DAYS_PER_YEAR: f64 = 252.0;

#[derive(Debug, Clone, PartialEq)]
pub struct Metrics {
    pub bar_count: usize,
    pub total_return: f64,
    pub annualized_return: f64,
    pub annualized_volatility: f64,
    pub sharpe_ratio: f64,
    /// Minimum of the drawdown series, so never positive.
    pub max_drawdown: f64,
    pub total_trades: usize,
    pub trades_won: usize,
    pub trades_lost: usize,
    pub trades_breakeven: usize,
    pub win_rate: f64,
    pub profit_factor: f64,
    pub avg_win: f64,
    pub avg_loss: f64,
    pub largest_win: f64,
    pub largest_loss: f64,
    pub avg_holding_bars: f64,
}

/// Realized outcome of one trade: a return for the single-asset engine, a
/// cash PnL for the portfolio engine.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TradeOutcome {
    pub value: f64,
    pub holding_bars: usize,
}

impl Metrics {
    pub fn compute(result: &BacktestResult, risk_free_rate: f64) -> Self {
        let cumulative: Vec<f64> = result.rows.iter().map(|r| r.cumulative_return).collect();
        let returns: Vec<f64> = result.rows.iter().map(|r| r.strategy_return).collect();
        let drawdowns: Vec<f64> = result.rows.iter().map(|r| r.drawdown).collect();
        let outcomes: Vec<TradeOutcome> = result
            .trades
            .iter()
            .map(|t| TradeOutcome {
                value: t.net_return,
                holding_bars: t.holding_bars(),
            })
            .collect();

        Self::from_series(&cumulative, &returns, &drawdowns, &outcomes, risk_free_rate)
    }

    pub fn compute_portfolio(result: &PortfolioResult, risk_free_rate: f64) -> Self {
        let cumulative: Vec<f64> = result.records.iter().map(|r| r.cumulative_return).collect();
        let returns: Vec<f64> = result.records.iter().map(|r| r.strategy_return).collect();
        let drawdowns: Vec<f64> = result.records.iter().map(|r| r.drawdown).collect();
        let outcomes: Vec<TradeOutcome> = result
            .closed_trades
            .iter()
            .map(|t| TradeOutcome {
                value: t.pnl,
                holding_bars: t.holding_bars,
            })
            .collect();

        Self::from_series(&cumulative, &returns, &drawdowns, &outcomes, risk_free_rate)
    }

    pub fn from_series(
        cumulative: &[f64],
        returns: &[f64],
        drawdowns: &[f64],
        outcomes: &[TradeOutcome],
        risk_free_rate: f64,
    ) -> Self {
        let bar_count = cumulative.len();
        let total_return = cumulative.last().map(|c| c - 1.0).unwrap_or(0.0);
        let annualized_return = annualize(total_return, bar_count);
        let annualized_volatility = sample_stddev(returns) * TRADING_DAYS_PER_YEAR.sqrt();

        let sharpe_ratio = if annualized_volatility > 0.0 && annualized_volatility.is_finite() {
            (annualized_return - risk_free_rate) / annualized_volatility
        } else {
            0.0
        };

        let max_drawdown = drawdowns
            .iter()
            .copied()
            .filter(|d| !d.is_nan())
            .fold(0.0_f64, f64::min);

        let mut trades_won = 0usize;
        let mut trades_lost = 0usize;
        let mut trades_breakeven = 0usize;
        let mut total_wins = 0.0_f64;
        let mut total_losses = 0.0_f64;
        let mut largest_win = 0.0_f64;
        let mut largest_loss = 0.0_f64;
        let mut total_holding = 0usize;

        for outcome in outcomes {
            let value = outcome.value;
            if value > 0.0 {
                trades_won += 1;
                total_wins += value;
                largest_win = largest_win.max(value);
            } else if value < 0.0 {
                trades_lost += 1;
                total_losses += value.abs();
                largest_loss = largest_loss.max(value.abs());
            } else {
                trades_breakeven += 1;
            }
            total_holding += outcome.holding_bars;
        }

        let total_trades = outcomes.len();
        let win_rate = if total_trades > 0 {
            trades_won as f64 / total_trades as f64
        } else {
            0.0
        };

        // No losing trades, including no trades at all, is unbounded.
        let profit_factor = if total_losses > 0.0 {
            total_wins / total_losses
        } else {
            f64::INFINITY
        };

        let avg_win = if trades_won > 0 {
            total_wins / trades_won as f64
        } else {
            0.0
        };

        let avg_loss = if trades_lost > 0 {
            total_losses / trades_lost as f64
        } else {
            0.0
        };

        let avg_holding_bars = if total_trades > 0 {
            total_holding as f64 / total_trades as f64
        } else {
            0.0
        };

        Metrics {
            bar_count,
            total_return,
            annualized_return,
            annualized_volatility,
            sharpe_ratio,
            max_drawdown,
            total_trades,
            trades_won,
            trades_lost,
            trades_breakeven,
            win_rate,
            profit_factor,
            avg_win,
            avg_loss,
            largest_win,
            largest_loss,
            avg_holding_bars,
        }
    }

    /// Key/value record consumed by reporting.
    pub fn to_record(&self) -> Vec<(String, String)> {
        vec![
            ("Total Return".into(), format_pct(self.total_return)),
            ("Annual Return".into(), format_pct(self.annualized_return)),
            ("Max Drawdown".into(), format_pct(self.max_drawdown)),
            ("Sharpe Ratio".into(), format!("{:.2}", self.sharpe_ratio)),
            ("Win Rate".into(), format_pct(self.win_rate)),
            ("Profit Factor".into(), format_ratio(self.profit_factor)),
            ("Trade Count".into(), self.total_trades.to_string()),
        ]
    }
}

/// (1 + total)^(252 / bars) - 1; zero for an empty series, -100% once the
/// account is wiped out.
pub fn annualize(total_return: f64, bar_count: usize) -> f64 {
    if bar_count == 0 || !total_return.is_finite() {
        return 0.0;
    }
    let base = 1.0 + total_return;
    if base <= 0.0 {
        return -1.0;
    }
    base.powf(TRADING_DAYS_PER_YEAR / bar_count as f64) - 1.0
}

/// Sample standard deviation (n - 1) of the finite values.
pub fn sample_stddev(values: &[f64]) -> f64 {
    let finite: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    if finite.len() < 2 {
        return 0.0;
    }
    let n = finite.len() as f64;
    let mean = finite.iter().sum::<f64>() / n;
    let variance = finite.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
    variance.sqrt()
}

pub fn format_pct(value: f64) -> String {
    format!("{:.2}%", value * 100.0)
}

pub fn format_ratio(value: f64) -> String {
    if value.is_infinite() {
        "inf".to_string()
    } else {
        format!("{:.2}", value)
    }
}
