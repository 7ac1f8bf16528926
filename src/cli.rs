//! CLI definition and dispatch.

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use crate::adapters::csv_adapter::CsvAdapter;
use crate::adapters::csv_report_adapter::CsvReportAdapter;
use crate::adapters::file_config_adapter::FileConfigAdapter;
use crate::domain::backtest::{BacktestConfig, BacktestResult, run_batch};
use crate::domain::code_data::CodeData;
use crate::domain::config_validation::{parse_optional_date, validate_config};
use crate::domain::error::SigtraderError;
use crate::domain::metrics::{Metrics, format_pct, format_ratio};
use crate::domain::portfolio::{AllocatorConfig, PortfolioResult, RebalancePolicy, run_portfolio};
use crate::domain::risk::RiskConfig;
use crate::domain::sizing::{SizingConfig, run_kelly_batch};
use crate::domain::strategy::{
    BollingerReversion, MaCrossover, MacdMomentum, ModelThreshold, SignalStrategy,
};
use crate::domain::universe::{MIN_BARS, load_universe, parse_codes};
use crate::ports::config_port::ConfigPort;
use crate::ports::data_port::DataPort;
use crate::ports::report_port::ReportPort;

#[derive(Parser, Debug)]
#[command(name = "sigtrader", about = "Signal-driven trading backtester")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Backtest each instrument independently
    Backtest {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(short, long)]
        output: Option<PathBuf>,
        #[arg(long)]
        code: Option<String>,
    },
    /// Run the multi-instrument portfolio allocator
    Portfolio {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Validate a configuration file
    Validate {
        #[arg(short, long)]
        config: PathBuf,
    },
    /// List instruments in the data directory with their date ranges
    Symbols {
        #[arg(short, long)]
        config: PathBuf,
    },
}

pub fn run(cli: Cli) -> ExitCode {
    let result = match cli.command {
        Command::Backtest {
            config,
            output,
            code,
        } => run_backtest(&config, output.as_deref(), code.as_deref()),
        Command::Portfolio { config, output } => run_portfolio_mode(&config, output.as_deref()),
        Command::Validate { config } => run_validate(&config),
        Command::Symbols { config } => run_symbols(&config),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            (&e).into()
        }
    }
}

pub fn load_config(path: &Path) -> Result<FileConfigAdapter, SigtraderError> {
    eprintln!("Loading config from {}", path.display());
    let adapter = FileConfigAdapter::from_file(path)?;
    validate_config(&adapter)?;
    Ok(adapter)
}

pub fn data_dir(config: &dyn ConfigPort) -> PathBuf {
    config
        .get_string("data", "dir")
        .filter(|d| !d.trim().is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("data"))
}

pub fn build_risk_config(config: &dyn ConfigPort) -> RiskConfig {
    let defaults = RiskConfig::default();
    RiskConfig {
        atr_period: config.get_int("risk", "atr_period", defaults.atr_period as i64).max(1) as usize,
        stop_loss_mult: config.get_double("risk", "stop_loss_mult", defaults.stop_loss_mult),
        take_profit_mult: config.get_double("risk", "take_profit_mult", defaults.take_profit_mult),
    }
}

pub fn build_backtest_config(config: &dyn ConfigPort) -> BacktestConfig {
    let defaults = BacktestConfig::default();
    BacktestConfig {
        initial_capital: config.get_double("backtest", "initial_capital", defaults.initial_capital),
        commission: config.get_double("backtest", "commission", defaults.commission),
        risk_free_rate: config.get_double("backtest", "risk_free_rate", defaults.risk_free_rate),
        risk: config
            .get_bool("backtest", "risk_exits", true)
            .then(|| build_risk_config(config)),
    }
}

pub fn build_allocator_config(config: &dyn ConfigPort) -> Result<AllocatorConfig, SigtraderError> {
    let defaults = AllocatorConfig::default();
    let policy = match config.get_string("portfolio", "rebalance") {
        Some(p) => p
            .parse::<RebalancePolicy>()
            .map_err(|reason| SigtraderError::config_invalid("portfolio", "rebalance", reason))?,
        None => defaults.policy,
    };
    Ok(AllocatorConfig {
        initial_capital: config.get_double("backtest", "initial_capital", defaults.initial_capital),
        max_stock_weight: config.get_double(
            "portfolio",
            "max_stock_weight",
            defaults.max_stock_weight,
        ),
        policy,
    })
}

/// `None` when sizing is disabled.
pub fn build_sizing_config(config: &dyn ConfigPort) -> Option<SizingConfig> {
    if !config.get_bool("sizing", "enabled", true) {
        return None;
    }
    let defaults = SizingConfig::default();
    Some(SizingConfig {
        max_cap: config.get_double("sizing", "max_cap", defaults.max_cap),
        min_fraction: config.get_double("sizing", "min_fraction", defaults.min_fraction),
        floor: config.get_double("sizing", "floor", defaults.floor),
        kelly_scale: config.get_double("sizing", "kelly_scale", defaults.kelly_scale),
    })
}

/// `None` for `kind = none`, meaning the data already carries signals.
pub fn build_strategy(
    config: &dyn ConfigPort,
) -> Result<Option<Box<dyn SignalStrategy>>, SigtraderError> {
    let kind = config
        .get_string("strategy", "kind")
        .map(|k| k.trim().to_lowercase())
        .unwrap_or_else(|| "none".to_string());

    let strategy: Box<dyn SignalStrategy> = match kind.as_str() {
        "none" => return Ok(None),
        "ma_crossover" => {
            let defaults = MaCrossover::default();
            Box::new(MaCrossover::new(
                config.get_int("strategy", "sma_short", defaults.short as i64) as usize,
                config.get_int("strategy", "sma_long", defaults.long as i64) as usize,
                config.get_double("strategy", "rsi_limit", defaults.rsi_limit),
            ))
        }
        "bollinger" => Box::new(BollingerReversion),
        "macd" => Box::new(MacdMomentum),
        "model" => {
            let defaults = ModelThreshold::default();
            Box::new(ModelThreshold {
                column: config
                    .get_string("strategy", "column")
                    .map(|c| c.trim().to_string())
                    .unwrap_or(defaults.column),
                threshold: config.get_double("strategy", "threshold", defaults.threshold),
            })
        }
        other => {
            return Err(SigtraderError::config_invalid(
                "strategy",
                "kind",
                format!("unknown strategy kind: {other}"),
            ));
        }
    };
    Ok(Some(strategy))
}

/// The `--code` override wins, then `[backtest] codes`, then every symbol
/// the data port knows about.
pub fn resolve_codes(
    code_override: Option<&str>,
    config: &dyn ConfigPort,
    data_port: &dyn DataPort,
) -> Result<Vec<String>, SigtraderError> {
    if let Some(c) = code_override {
        return Ok(parse_codes(c)?);
    }
    match config.get_string("backtest", "codes") {
        Some(codes) if !codes.trim().is_empty() => Ok(parse_codes(&codes)?),
        _ => data_port.list_symbols(),
    }
}

/// Load the universe and annotate it with the configured strategy.
pub fn prepare_instruments(
    data_port: &dyn DataPort,
    config: &dyn ConfigPort,
    code_override: Option<&str>,
) -> Result<Vec<CodeData>, SigtraderError> {
    let codes = resolve_codes(code_override, config, data_port)?;
    if codes.is_empty() {
        return Err(SigtraderError::ConfigMissing {
            section: "backtest".to_string(),
            key: "codes".to_string(),
        });
    }
    let start = parse_optional_date(config, "backtest", "start_date")?;
    let end = parse_optional_date(config, "backtest", "end_date")?;
    let min_bars = config.get_int("backtest", "min_bars", MIN_BARS as i64).max(1) as usize;

    eprintln!("Loading {} codes...", codes.len());
    let universe = load_universe(data_port, &codes, start, end, min_bars)?;

    let strategy = build_strategy(config)?;
    let instruments = match strategy {
        Some(strategy) => {
            eprintln!("Applying strategy: {}", strategy.name());
            universe
                .instruments
                .into_iter()
                .map(|cd| CodeData::new(cd.code, strategy.compute_signals(&cd.bars)))
                .collect()
        }
        None => universe.instruments,
    };
    Ok(instruments)
}

/// One finished per-instrument run.
pub struct InstrumentReport {
    pub fraction: f64,
    pub result: BacktestResult,
    pub metrics: Metrics,
}

pub fn run_backtest_pipeline(
    data_port: &dyn DataPort,
    report_port: &dyn ReportPort,
    config: &dyn ConfigPort,
    output: Option<&Path>,
    code_override: Option<&str>,
) -> Result<Vec<InstrumentReport>, SigtraderError> {
    let bt_config = build_backtest_config(config);
    let instruments = prepare_instruments(data_port, config, code_override)?;

    eprintln!("Running backtest: {} codes", instruments.len());
    let runs: Vec<(f64, BacktestResult)> = match build_sizing_config(config) {
        Some(sizing) => run_kelly_batch(&instruments, &bt_config, &sizing)?
            .into_iter()
            .map(|run| (run.fraction, run.result))
            .collect(),
        None => {
            let size = config.get_double("backtest", "position_size", 1.0);
            run_batch(&instruments, size, &bt_config)?
                .into_iter()
                .map(|result| (size, result))
                .collect()
        }
    };

    let mut reports = Vec::with_capacity(runs.len());
    for (fraction, result) in runs {
        let metrics = Metrics::compute(&result, bt_config.risk_free_rate);
        print_summary(&result.code, fraction, &metrics);
        if let Some(dir) = output {
            report_port.write_backtest(&result, &metrics, dir)?;
        }
        reports.push(InstrumentReport {
            fraction,
            result,
            metrics,
        });
    }
    Ok(reports)
}

pub fn run_portfolio_pipeline(
    data_port: &dyn DataPort,
    report_port: &dyn ReportPort,
    config: &dyn ConfigPort,
    output: Option<&Path>,
) -> Result<(PortfolioResult, Metrics), SigtraderError> {
    let alloc_config = build_allocator_config(config)?;
    let risk_free_rate = config.get_double("backtest", "risk_free_rate", 0.02);
    let instruments = prepare_instruments(data_port, config, None)?;

    eprintln!(
        "Running portfolio: {} codes, max weight {}",
        instruments.len(),
        format_pct(alloc_config.max_stock_weight)
    );
    let result = run_portfolio(&instruments, &alloc_config)?;
    let metrics = Metrics::compute_portfolio(&result, risk_free_rate);

    print_summary("Portfolio", 1.0, &metrics);
    eprintln!("Final Equity:     {:.2}", result.final_equity());
    eprintln!("Fills:            {}", result.fills.len());

    if let Some(dir) = output {
        report_port.write_portfolio(&result, &metrics, dir)?;
    }
    Ok((result, metrics))
}

fn print_summary(label: &str, fraction: f64, metrics: &Metrics) {
    eprintln!("\n=== {label} ===");
    eprintln!("Position Size:    {}", format_pct(fraction));
    eprintln!("Total Return:     {}", format_pct(metrics.total_return));
    eprintln!("Annualized:       {}", format_pct(metrics.annualized_return));
    eprintln!("Volatility:       {}", format_pct(metrics.annualized_volatility));
    eprintln!("Sharpe Ratio:     {:.2}", metrics.sharpe_ratio);
    eprintln!("Max Drawdown:     {}", format_pct(metrics.max_drawdown));
    eprintln!("Total Trades:     {}", metrics.total_trades);
    eprintln!("Win Rate:         {}", format_pct(metrics.win_rate));
    eprintln!("Profit Factor:    {}", format_ratio(metrics.profit_factor));
}

fn run_backtest(
    config_path: &Path,
    output: Option<&Path>,
    code_override: Option<&str>,
) -> Result<(), SigtraderError> {
    let config = load_config(config_path)?;
    let data_port = CsvAdapter::new(data_dir(&config));
    let reports =
        run_backtest_pipeline(&data_port, &CsvReportAdapter, &config, output, code_override)?;
    if let Some(dir) = output {
        eprintln!("\n{} reports written to: {}", reports.len(), dir.display());
    }
    Ok(())
}

fn run_portfolio_mode(config_path: &Path, output: Option<&Path>) -> Result<(), SigtraderError> {
    let config = load_config(config_path)?;
    let data_port = CsvAdapter::new(data_dir(&config));
    run_portfolio_pipeline(&data_port, &CsvReportAdapter, &config, output)?;
    if let Some(dir) = output {
        eprintln!("\nReport written to: {}", dir.display());
    }
    Ok(())
}

fn run_validate(config_path: &Path) -> Result<(), SigtraderError> {
    let config = load_config(config_path)?;
    eprintln!("Config validated successfully");

    let bt = build_backtest_config(&config);
    eprintln!("\nBacktest:");
    eprintln!("  initial_capital: {:.2}", bt.initial_capital);
    eprintln!("  commission:      {}", bt.commission);
    match bt.risk {
        Some(risk) => eprintln!(
            "  risk exits:      ATR({}) stop x{} target x{}",
            risk.atr_period, risk.stop_loss_mult, risk.take_profit_mult
        ),
        None => eprintln!("  risk exits:      off"),
    }

    let strategy = build_strategy(&config)?;
    eprintln!(
        "\nStrategy: {}",
        strategy.as_ref().map_or("none (signals from data)", |s| s.name())
    );

    match config.get_string("backtest", "codes") {
        Some(codes) if !codes.trim().is_empty() => {
            eprintln!("Universe: {}", parse_codes(&codes)?.join(", "));
        }
        _ => eprintln!("Universe: all symbols in {}", data_dir(&config).display()),
    }

    eprintln!("\nConfiguration is valid.");
    Ok(())
}

fn run_symbols(config_path: &Path) -> Result<(), SigtraderError> {
    let config = load_config(config_path)?;
    let data_port = CsvAdapter::new(data_dir(&config));
    let symbols = data_port.list_symbols()?;

    if symbols.is_empty() {
        eprintln!("No symbols found in {}", data_dir(&config).display());
        return Ok(());
    }
    for symbol in &symbols {
        match data_port.get_data_range(symbol) {
            Ok(Some((first, last, count))) => {
                println!("{symbol}: {count} bars, {first} to {last}");
            }
            Ok(None) => println!("{symbol}: no data"),
            Err(e) => eprintln!("error reading {symbol}: {e}"),
        }
    }
    eprintln!("{} symbols found", symbols.len());
    Ok(())
}
