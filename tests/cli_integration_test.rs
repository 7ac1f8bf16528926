//! CLI integration tests against real INI and CSV files on disk.
//!
//! Tests cover:
//! - `validate` accepting and rejecting configs with the right exit codes
//! - `backtest` and `portfolio` writing their CSV reports
//! - `symbols` over a data directory
//! - Exit codes for missing signals and missing data

use clap::Parser;
use sigtrader::cli::{Cli, run};
use std::fmt::Write as _;
use std::fs;
use std::path::Path;
use std::process::ExitCode;
use tempfile::TempDir;

fn exit_code(args: &[&str]) -> String {
    let cli = Cli::try_parse_from(args).unwrap();
    format!("{:?}", run(cli))
}

fn code(n: u8) -> String {
    format!("{:?}", ExitCode::from(n))
}

fn success() -> String {
    format!("{:?}", ExitCode::SUCCESS)
}

/// 40 daily bars with an entry on bar 16, after the ATR warmup, and an exit
/// signal on bar 30.
fn write_signal_csv(dir: &Path, code: &str, start_price: f64) {
    let mut csv = String::from("date,open,high,low,close,volume,signal\n");
    let start = chrono::NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
    for i in 0..40u64 {
        let day = start + chrono::Days::new(i);
        let close = start_price + (i as f64 * 0.7).sin() * 3.0 + i as f64 * 0.2;
        let signal = match i {
            16 => 1,
            30 => -1,
            _ => 0,
        };
        writeln!(
            csv,
            "{day},{close},{},{},{close},1000,{signal}",
            close + 1.0,
            close - 1.0
        )
        .unwrap();
    }
    fs::write(dir.join(format!("{code}.csv")), csv).unwrap();
}

struct Workspace {
    dir: TempDir,
}

impl Workspace {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("data")).unwrap();
        Self { dir }
    }

    fn data(&self) -> std::path::PathBuf {
        self.dir.path().join("data")
    }

    fn ini(&self, body: &str) -> String {
        let path = self.dir.path().join("run.ini");
        let content = format!("[data]\ndir = {}\n{body}", self.data().display());
        fs::write(&path, content).unwrap();
        path.display().to_string()
    }

    fn out(&self) -> std::path::PathBuf {
        self.dir.path().join("out")
    }
}

#[test]
fn validate_accepts_good_config() {
    let ws = Workspace::new();
    let ini = ws.ini("[backtest]\ncodes = AAA\n[strategy]\nkind = macd\n");
    assert_eq!(exit_code(&["sigtrader", "validate", "-c", &ini]), success());
}

#[test]
fn validate_rejects_bad_values_with_config_exit_code() {
    let ws = Workspace::new();
    let ini = ws.ini("[portfolio]\nmax_stock_weight = 1.5\n");
    assert_eq!(exit_code(&["sigtrader", "validate", "-c", &ini]), code(2));

    let ini = ws.ini("[strategy]\nkind = tarot\n");
    assert_eq!(exit_code(&["sigtrader", "validate", "-c", &ini]), code(2));
}

#[test]
fn missing_config_file_is_config_error() {
    assert_eq!(
        exit_code(&["sigtrader", "validate", "-c", "/nonexistent/sigtrader.ini"]),
        code(2)
    );
}

#[test]
fn backtest_writes_reports_per_code() {
    let ws = Workspace::new();
    write_signal_csv(&ws.data(), "AAA", 100.0);
    write_signal_csv(&ws.data(), "BBB", 50.0);
    let ini = ws.ini("[backtest]\ncodes = AAA,BBB\n");
    let out = ws.out();

    assert_eq!(
        exit_code(&["sigtrader", "backtest", "-c", &ini, "-o", out.to_str().unwrap()]),
        success()
    );
    for code in ["AAA", "BBB"] {
        assert!(out.join(format!("{code}_backtest.csv")).exists());
        assert!(out.join(format!("{code}_trades.csv")).exists());
        let metrics = fs::read_to_string(out.join(format!("{code}_metrics.csv"))).unwrap();
        assert!(metrics.starts_with("metric,value"));
        assert!(metrics.contains("Trade Count,1"));
    }
}

#[test]
fn backtest_code_override() {
    let ws = Workspace::new();
    write_signal_csv(&ws.data(), "AAA", 100.0);
    write_signal_csv(&ws.data(), "BBB", 50.0);
    let ini = ws.ini("[backtest]\ncodes = AAA,BBB\n");
    let out = ws.out();

    assert_eq!(
        exit_code(&[
            "sigtrader",
            "backtest",
            "-c",
            &ini,
            "-o",
            out.to_str().unwrap(),
            "--code",
            "bbb"
        ]),
        success()
    );
    assert!(out.join("BBB_backtest.csv").exists());
    assert!(!out.join("AAA_backtest.csv").exists());
}

#[test]
fn backtest_without_signal_column_exits_4() {
    let ws = Workspace::new();
    let mut csv = String::from("date,open,high,low,close,volume\n");
    for day in 1..=31 {
        writeln!(csv, "2024-01-{day:02},1,1,1,1,1").unwrap();
    }
    fs::write(ws.data().join("RAW.csv"), csv).unwrap();
    let ini = ws.ini("[backtest]\ncodes = RAW\n");

    assert_eq!(exit_code(&["sigtrader", "backtest", "-c", &ini]), code(4));
}

#[test]
fn backtest_with_no_usable_data_exits_5() {
    let ws = Workspace::new();
    let ini = ws.ini("[backtest]\ncodes = GHOST\n");
    assert_eq!(exit_code(&["sigtrader", "backtest", "-c", &ini]), code(5));
}

#[test]
fn portfolio_writes_equity_and_weights() {
    let ws = Workspace::new();
    write_signal_csv(&ws.data(), "AAA", 100.0);
    write_signal_csv(&ws.data(), "BBB", 50.0);
    let ini = ws.ini("[backtest]\ncodes = AAA,BBB\n[portfolio]\nmax_stock_weight = 0.3\n");
    let out = ws.out();

    assert_eq!(
        exit_code(&["sigtrader", "portfolio", "-c", &ini, "-o", out.to_str().unwrap()]),
        success()
    );

    let weights = fs::read_to_string(out.join("portfolio_weights.csv")).unwrap();
    assert_eq!(weights.lines().next(), Some("Date,AAA,BBB,Cash"));
    assert_eq!(weights.lines().count(), 41);

    let fills = fs::read_to_string(out.join("portfolio_fills.csv")).unwrap();
    // Both enter on bar 16 and drop out of the active set on bar 17.
    assert_eq!(fills.lines().count(), 5);
    assert!(out.join("portfolio_equity.csv").exists());
    assert!(out.join("portfolio_trades.csv").exists());
    assert!(out.join("portfolio_metrics.csv").exists());
}

#[test]
fn symbols_lists_data_directory() {
    let ws = Workspace::new();
    write_signal_csv(&ws.data(), "AAA", 100.0);
    let ini = ws.ini("");
    assert_eq!(exit_code(&["sigtrader", "symbols", "-c", &ini]), success());
}

#[test]
fn symbols_missing_data_dir_exits_3() {
    let ws = Workspace::new();
    let path = ws.dir.path().join("run.ini");
    fs::write(&path, "[data]\ndir = /nonexistent/sigtrader/data\n").unwrap();
    assert_eq!(
        exit_code(&["sigtrader", "symbols", "-c", path.to_str().unwrap()]),
        code(3)
    );
}
