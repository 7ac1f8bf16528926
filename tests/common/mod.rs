#![allow(dead_code)]

use chrono::NaiveDate;
use sigtrader::domain::backtest::{BacktestConfig, BacktestResult};
use sigtrader::domain::code_data::CodeData;
use sigtrader::domain::error::SigtraderError;
use sigtrader::domain::metrics::Metrics;
pub use sigtrader::domain::ohlcv::{Bar, Signal};
use sigtrader::domain::portfolio::PortfolioResult;
use sigtrader::ports::data_port::DataPort;
use sigtrader::ports::report_port::ReportPort;
use std::cell::RefCell;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

pub struct MockDataPort {
    pub data: HashMap<String, Vec<Bar>>,
    pub errors: HashMap<String, String>,
}

impl MockDataPort {
    pub fn new() -> Self {
        Self {
            data: HashMap::new(),
            errors: HashMap::new(),
        }
    }

    pub fn with_bars(mut self, code: &str, bars: Vec<Bar>) -> Self {
        self.data.insert(code.to_string(), bars);
        self
    }

    pub fn with_error(mut self, code: &str, reason: &str) -> Self {
        self.errors.insert(code.to_string(), reason.to_string());
        self
    }
}

impl DataPort for MockDataPort {
    fn fetch_bars(
        &self,
        code: &str,
        start_date: Option<NaiveDate>,
        end_date: Option<NaiveDate>,
    ) -> Result<Vec<Bar>, SigtraderError> {
        if let Some(reason) = self.errors.get(code) {
            return Err(SigtraderError::DataLoad {
                reason: reason.clone(),
            });
        }
        Ok(self
            .data
            .get(code)
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .filter(|b| start_date.is_none_or(|s| b.date >= s))
            .filter(|b| end_date.is_none_or(|e| b.date <= e))
            .collect())
    }

    fn list_symbols(&self) -> Result<Vec<String>, SigtraderError> {
        let mut symbols: Vec<String> = self.data.keys().cloned().collect();
        symbols.sort();
        Ok(symbols)
    }

    fn get_data_range(
        &self,
        code: &str,
    ) -> Result<Option<(NaiveDate, NaiveDate, usize)>, SigtraderError> {
        match self.data.get(code) {
            Some(bars) if !bars.is_empty() => {
                let min = bars.iter().map(|b| b.date).min().unwrap();
                let max = bars.iter().map(|b| b.date).max().unwrap();
                Ok(Some((min, max, bars.len())))
            }
            _ => Ok(None),
        }
    }
}

/// Records what would have been written.
pub struct MockReportPort {
    pub backtests: RefCell<Vec<(String, PathBuf)>>,
    pub portfolios: RefCell<Vec<(usize, PathBuf)>>,
}

impl MockReportPort {
    pub fn new() -> Self {
        Self {
            backtests: RefCell::new(Vec::new()),
            portfolios: RefCell::new(Vec::new()),
        }
    }
}

impl ReportPort for MockReportPort {
    fn write_backtest(
        &self,
        result: &BacktestResult,
        _metrics: &Metrics,
        output_dir: &Path,
    ) -> Result<(), SigtraderError> {
        self.backtests
            .borrow_mut()
            .push((result.code.clone(), output_dir.to_path_buf()));
        Ok(())
    }

    fn write_portfolio(
        &self,
        result: &PortfolioResult,
        _metrics: &Metrics,
        output_dir: &Path,
    ) -> Result<(), SigtraderError> {
        self.portfolios
            .borrow_mut()
            .push((result.records.len(), output_dir.to_path_buf()));
        Ok(())
    }
}

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

pub fn make_bar(date: &str, close: f64, signal: i64) -> Bar {
    Bar::new(
        NaiveDate::parse_from_str(date, "%Y-%m-%d").unwrap(),
        close - 1.0,
        close + 1.0,
        close - 2.0,
        close,
        1000.0,
    )
    .with_signal(Signal::try_from(signal).unwrap())
}

/// Consecutive daily bars from `start` with the given closes and signals.
pub fn series(start: NaiveDate, closes: &[f64], signals: &[i64]) -> Vec<Bar> {
    closes
        .iter()
        .zip(signals)
        .enumerate()
        .map(|(i, (&close, &signal))| {
            Bar::new(
                start + chrono::Days::new(i as u64),
                close,
                close,
                close,
                close,
                1000.0,
            )
            .with_signal(Signal::try_from(signal).unwrap())
        })
        .collect()
}

/// `count` rising bars with an entry on the first bar and no other signals.
pub fn generate_bars(start_date: &str, count: usize, start_price: f64) -> Vec<Bar> {
    let start = NaiveDate::parse_from_str(start_date, "%Y-%m-%d").unwrap();
    (0..count)
        .map(|i| {
            let close = start_price + i as f64;
            let signal = if i == 0 { Signal::Enter } else { Signal::Hold };
            Bar::new(
                start + chrono::Days::new(i as u64),
                close,
                close + 1.0,
                close - 1.0,
                close,
                1000.0,
            )
            .with_signal(signal)
        })
        .collect()
}

pub fn make_code_data(code: &str, bars: Vec<Bar>) -> CodeData {
    CodeData::new(code.to_string(), bars)
}

pub fn frictionless_config() -> BacktestConfig {
    BacktestConfig {
        initial_capital: 100_000.0,
        commission: 0.0,
        risk_free_rate: 0.02,
        risk: None,
    }
}
