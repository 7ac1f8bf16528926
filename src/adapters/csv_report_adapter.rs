//! CSV report writer.
//!
//! Per-instrument runs write `<CODE>_backtest.csv`, `<CODE>_trades.csv` and
//! `<CODE>_metrics.csv`. Portfolio runs write `portfolio_equity.csv`,
//! `portfolio_weights.csv`, `portfolio_fills.csv`, `portfolio_trades.csv`
//! and `portfolio_metrics.csv`.
//!
//! The bar and equity series use the column names downstream reporting reads
//! (`Market_Return`, `Equity_Curve`, ...). Ledgers use snake_case.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::info;

use crate::domain::backtest::BacktestResult;
use crate::domain::error::SigtraderError;
use crate::domain::metrics::Metrics;
use crate::domain::portfolio::{DailyRecord, Fill, PortfolioResult, PortfolioTrade, Side};
use crate::domain::position::ClosedTrade;
use crate::ports::report_port::ReportPort;

#[derive(Debug, Default, Clone, Copy)]
pub struct CsvReportAdapter;

#[derive(Serialize)]
struct TradeRow {
    entry_date: String,
    exit_date: String,
    entry_price: f64,
    exit_price: f64,
    exit_reason: String,
    holding_bars: usize,
    net_return: f64,
}

impl From<&ClosedTrade> for TradeRow {
    fn from(t: &ClosedTrade) -> Self {
        TradeRow {
            entry_date: t.entry_date.to_string(),
            exit_date: t.exit_date.to_string(),
            entry_price: t.entry_price,
            exit_price: t.exit_price,
            exit_reason: t.exit_reason.to_string(),
            holding_bars: t.holding_bars(),
            net_return: t.net_return,
        }
    }
}

#[derive(Serialize)]
struct EquityRow {
    #[serde(rename = "Date")]
    date: String,
    #[serde(rename = "Total_Equity")]
    total_equity: f64,
    #[serde(rename = "Cash")]
    cash: f64,
    #[serde(rename = "Trades")]
    trades: usize,
    #[serde(rename = "Strategy_Return")]
    strategy_return: f64,
    #[serde(rename = "Cumulative_Return")]
    cumulative_return: f64,
    #[serde(rename = "Drawdown")]
    drawdown: f64,
    #[serde(rename = "Equity_Curve")]
    equity_curve: f64,
}

impl From<&DailyRecord> for EquityRow {
    fn from(r: &DailyRecord) -> Self {
        EquityRow {
            date: r.date.to_string(),
            total_equity: r.total_equity,
            cash: r.cash,
            trades: r.trades,
            strategy_return: r.strategy_return,
            cumulative_return: r.cumulative_return,
            drawdown: r.drawdown,
            equity_curve: r.equity_curve,
        }
    }
}

#[derive(Serialize)]
struct FillRow<'a> {
    date: String,
    code: &'a str,
    side: &'static str,
    shares: u64,
    price: f64,
}

impl<'a> From<&'a Fill> for FillRow<'a> {
    fn from(f: &'a Fill) -> Self {
        FillRow {
            date: f.date.to_string(),
            code: &f.code,
            side: match f.side {
                Side::Buy => "buy",
                Side::Sell => "sell",
            },
            shares: f.shares,
            price: f.price,
        }
    }
}

#[derive(Serialize)]
struct RoundTripRow<'a> {
    code: &'a str,
    shares: u64,
    entry_date: String,
    exit_date: String,
    avg_entry_price: f64,
    exit_price: f64,
    pnl: f64,
    holding_bars: usize,
}

impl<'a> From<&'a PortfolioTrade> for RoundTripRow<'a> {
    fn from(t: &'a PortfolioTrade) -> Self {
        RoundTripRow {
            code: &t.code,
            shares: t.shares,
            entry_date: t.entry_date.to_string(),
            exit_date: t.exit_date.to_string(),
            avg_entry_price: t.avg_entry_price,
            exit_price: t.exit_price,
            pnl: t.pnl,
            holding_bars: t.holding_bars,
        }
    }
}

fn write_rows<T, I>(path: &Path, rows: I) -> Result<(), SigtraderError>
where
    T: Serialize,
    I: IntoIterator<Item = T>,
{
    let mut wtr = csv::Writer::from_path(path)?;
    for row in rows {
        wtr.serialize(row)?;
    }
    wtr.flush()?;
    Ok(())
}

/// Header-only output still gets written when there are no rows.
fn write_rows_with_header<T, I>(
    path: &Path,
    header: &[&str],
    rows: I,
) -> Result<(), SigtraderError>
where
    T: Serialize,
    I: IntoIterator<Item = T>,
{
    let mut wtr = csv::WriterBuilder::new()
        .has_headers(false)
        .from_path(path)?;
    wtr.write_record(header)?;
    for row in rows {
        wtr.serialize(row)?;
    }
    wtr.flush()?;
    Ok(())
}

const BAR_COLUMNS: [&str; 7] = ["Date", "Open", "High", "Low", "Close", "Volume", "Signal"];

const SIMULATION_COLUMNS: [&str; 12] = [
    "Effective_Signal",
    "Stop_Loss",
    "Take_Profit",
    "Market_Return",
    "Position",
    "Strategy_Return",
    "Trades",
    "Cumulative_Return",
    "Equity_Curve",
    "Peak",
    "Drawdown",
    "Exit_Reason",
];

/// Input bar columns, every indicator seen in the series, then the
/// simulation columns. Missing indicator values are left empty.
fn write_bar_series(path: &Path, result: &BacktestResult) -> Result<(), SigtraderError> {
    let indicators: BTreeSet<&str> = result
        .rows
        .iter()
        .flat_map(|r| r.indicators.keys().map(String::as_str))
        .collect();

    let mut wtr = csv::Writer::from_path(path)?;
    let header: Vec<&str> = BAR_COLUMNS
        .iter()
        .copied()
        .chain(indicators.iter().copied())
        .chain(SIMULATION_COLUMNS)
        .collect();
    wtr.write_record(&header)?;

    for row in &result.rows {
        let mut record = vec![
            row.date.to_string(),
            row.open.to_string(),
            row.high.to_string(),
            row.low.to_string(),
            row.close.to_string(),
            row.volume.to_string(),
            row.signal.as_i8().to_string(),
        ];
        record.extend(
            indicators
                .iter()
                .map(|name| row.indicators.get(*name).map_or_else(String::new, f64::to_string)),
        );
        record.extend([
            row.effective_signal.as_i8().to_string(),
            row.stop_loss.to_string(),
            row.take_profit.to_string(),
            row.market_return.to_string(),
            row.position.to_string(),
            row.strategy_return.to_string(),
            row.trades.to_string(),
            row.cumulative_return.to_string(),
            row.equity.to_string(),
            row.peak.to_string(),
            row.drawdown.to_string(),
            row.exit_reason.map_or_else(String::new, |r| r.to_string()),
        ]);
        wtr.write_record(&record)?;
    }
    wtr.flush()?;
    Ok(())
}

fn write_metrics(path: &Path, metrics: &Metrics) -> Result<(), SigtraderError> {
    let mut wtr = csv::Writer::from_path(path)?;
    wtr.write_record(["metric", "value"])?;
    for (key, value) in metrics.to_record() {
        wtr.write_record([key.as_str(), value.as_str()])?;
    }
    wtr.flush()?;
    Ok(())
}

fn write_weights(path: &Path, result: &PortfolioResult) -> Result<(), SigtraderError> {
    let mut wtr = csv::Writer::from_path(path)?;
    let mut header = vec!["Date".to_string()];
    header.extend(result.codes.iter().cloned());
    header.push("Cash".to_string());
    wtr.write_record(&header)?;

    for snapshot in &result.weights {
        let mut record = vec![snapshot.date.to_string()];
        record.extend(
            result
                .codes
                .iter()
                .map(|code| snapshot.weights.get(code).copied().unwrap_or(0.0).to_string()),
        );
        record.push(snapshot.cash.to_string());
        wtr.write_record(&record)?;
    }
    wtr.flush()?;
    Ok(())
}

fn prepare_dir(dir: &Path) -> Result<PathBuf, SigtraderError> {
    fs::create_dir_all(dir)?;
    Ok(dir.to_path_buf())
}

const TRADE_HEADER: [&str; 7] = [
    "entry_date",
    "exit_date",
    "entry_price",
    "exit_price",
    "exit_reason",
    "holding_bars",
    "net_return",
];

const ROUND_TRIP_HEADER: [&str; 8] = [
    "code",
    "shares",
    "entry_date",
    "exit_date",
    "avg_entry_price",
    "exit_price",
    "pnl",
    "holding_bars",
];

const FILL_HEADER: [&str; 5] = ["date", "code", "side", "shares", "price"];

impl ReportPort for CsvReportAdapter {
    fn write_backtest(
        &self,
        result: &BacktestResult,
        metrics: &Metrics,
        output_dir: &Path,
    ) -> Result<(), SigtraderError> {
        let dir = prepare_dir(output_dir)?;
        let code = &result.code;

        write_bar_series(&dir.join(format!("{code}_backtest.csv")), result)?;
        write_rows_with_header(
            &dir.join(format!("{code}_trades.csv")),
            &TRADE_HEADER,
            result.trades.iter().map(TradeRow::from),
        )?;
        write_metrics(&dir.join(format!("{code}_metrics.csv")), metrics)?;

        info!(code = %code, dir = %dir.display(), "report written");
        Ok(())
    }

    fn write_portfolio(
        &self,
        result: &PortfolioResult,
        metrics: &Metrics,
        output_dir: &Path,
    ) -> Result<(), SigtraderError> {
        let dir = prepare_dir(output_dir)?;

        write_rows(
            &dir.join("portfolio_equity.csv"),
            result.records.iter().map(EquityRow::from),
        )?;
        write_weights(&dir.join("portfolio_weights.csv"), result)?;
        write_rows_with_header(
            &dir.join("portfolio_fills.csv"),
            &FILL_HEADER,
            result.fills.iter().map(FillRow::from),
        )?;
        write_rows_with_header(
            &dir.join("portfolio_trades.csv"),
            &ROUND_TRIP_HEADER,
            result.closed_trades.iter().map(RoundTripRow::from),
        )?;
        write_metrics(&dir.join("portfolio_metrics.csv"), metrics)?;

        info!(dir = %dir.display(), "portfolio report written");
        Ok(())
    }
}
