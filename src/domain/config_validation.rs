//! Configuration validation.
//!
//! Validates every config section before a run starts. Missing keys fall back
//! to their defaults and are not errors.

use crate::domain::error::SigtraderError;
use crate::domain::portfolio::RebalancePolicy;
use crate::domain::universe::parse_codes;
use crate::ports::config_port::ConfigPort;
use chrono::NaiveDate;

pub const STRATEGY_KINDS: [&str; 5] = ["none", "ma_crossover", "bollinger", "macd", "model"];

pub fn validate_config(config: &dyn ConfigPort) -> Result<(), SigtraderError> {
    validate_backtest_config(config)?;
    validate_risk_config(config)?;
    validate_portfolio_config(config)?;
    validate_sizing_config(config)?;
    validate_strategy_config(config)?;
    Ok(())
}

pub fn validate_backtest_config(config: &dyn ConfigPort) -> Result<(), SigtraderError> {
    let capital = config.get_double("backtest", "initial_capital", 100_000.0);
    if capital <= 0.0 {
        return Err(SigtraderError::config_invalid(
            "backtest",
            "initial_capital",
            "initial_capital must be positive",
        ));
    }

    let commission = config.get_double("backtest", "commission", 0.001);
    if commission < 0.0 {
        return Err(SigtraderError::config_invalid(
            "backtest",
            "commission",
            "commission must be non-negative",
        ));
    }

    let size = config.get_double("backtest", "position_size", 1.0);
    if size <= 0.0 || size > 1.0 {
        return Err(SigtraderError::config_invalid(
            "backtest",
            "position_size",
            "position_size must be in (0, 1]",
        ));
    }

    let rf = config.get_double("backtest", "risk_free_rate", 0.02);
    if !(0.0..1.0).contains(&rf) {
        return Err(SigtraderError::config_invalid(
            "backtest",
            "risk_free_rate",
            "risk_free_rate must be between 0 and 1",
        ));
    }

    validate_dates(config)?;

    if let Some(codes) = config.get_string("backtest", "codes") {
        parse_codes(&codes)?;
    }
    Ok(())
}

fn validate_dates(config: &dyn ConfigPort) -> Result<(), SigtraderError> {
    let start = parse_optional_date(config, "backtest", "start_date")?;
    let end = parse_optional_date(config, "backtest", "end_date")?;
    if matches!((start, end), (Some(s), Some(e)) if s >= e) {
        return Err(SigtraderError::config_invalid(
            "backtest",
            "start_date",
            "start_date must be before end_date",
        ));
    }
    Ok(())
}

/// Blank or absent values are `None`; anything else must be YYYY-MM-DD.
pub fn parse_optional_date(
    config: &dyn ConfigPort,
    section: &str,
    key: &str,
) -> Result<Option<NaiveDate>, SigtraderError> {
    match config.get_string(section, key) {
        Some(s) if !s.trim().is_empty() => NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
            .map(Some)
            .map_err(|_| {
                SigtraderError::config_invalid(
                    section,
                    key,
                    format!("invalid {key} format, expected YYYY-MM-DD"),
                )
            }),
        _ => Ok(None),
    }
}

pub fn validate_risk_config(config: &dyn ConfigPort) -> Result<(), SigtraderError> {
    if config.get_int("risk", "atr_period", 14) < 1 {
        return Err(SigtraderError::config_invalid(
            "risk",
            "atr_period",
            "atr_period must be at least 1",
        ));
    }
    for (key, default) in [("stop_loss_mult", 2.0), ("take_profit_mult", 3.0)] {
        if config.get_double("risk", key, default) <= 0.0 {
            return Err(SigtraderError::config_invalid(
                "risk",
                key,
                format!("{key} must be positive"),
            ));
        }
    }
    Ok(())
}

pub fn validate_portfolio_config(config: &dyn ConfigPort) -> Result<(), SigtraderError> {
    let weight = config.get_double("portfolio", "max_stock_weight", 0.15);
    if weight <= 0.0 || weight > 1.0 {
        return Err(SigtraderError::config_invalid(
            "portfolio",
            "max_stock_weight",
            "max_stock_weight must be in (0, 1]",
        ));
    }
    if let Some(policy) = config.get_string("portfolio", "rebalance") {
        policy
            .parse::<RebalancePolicy>()
            .map_err(|reason| SigtraderError::config_invalid("portfolio", "rebalance", reason))?;
    }
    Ok(())
}

pub fn validate_sizing_config(config: &dyn ConfigPort) -> Result<(), SigtraderError> {
    let unit = |key: &str, default: f64| -> Result<f64, SigtraderError> {
        let value = config.get_double("sizing", key, default);
        if value <= 0.0 || value > 1.0 {
            return Err(SigtraderError::config_invalid(
                "sizing",
                key,
                format!("{key} must be in (0, 1]"),
            ));
        }
        Ok(value)
    };

    let max_cap = unit("max_cap", 0.25)?;
    unit("floor", 0.05)?;
    let min_fraction = unit("min_fraction", 0.01)?;
    if min_fraction > max_cap {
        return Err(SigtraderError::config_invalid(
            "sizing",
            "min_fraction",
            "min_fraction must not exceed max_cap",
        ));
    }
    if config.get_double("sizing", "kelly_scale", 0.5) <= 0.0 {
        return Err(SigtraderError::config_invalid(
            "sizing",
            "kelly_scale",
            "kelly_scale must be positive",
        ));
    }
    Ok(())
}

pub fn validate_strategy_config(config: &dyn ConfigPort) -> Result<(), SigtraderError> {
    let kind = config
        .get_string("strategy", "kind")
        .map(|k| k.trim().to_lowercase())
        .unwrap_or_else(|| "none".to_string());

    match kind.as_str() {
        "ma_crossover" => {
            let short = config.get_int("strategy", "sma_short", 20);
            let long = config.get_int("strategy", "sma_long", 60);
            if short < 1 || long <= short {
                return Err(SigtraderError::config_invalid(
                    "strategy",
                    "sma_long",
                    "sma_short must be at least 1 and below sma_long",
                ));
            }
        }
        "model" => {
            let threshold = config.get_double("strategy", "threshold", 0.6);
            if !(0.0..=1.0).contains(&threshold) {
                return Err(SigtraderError::config_invalid(
                    "strategy",
                    "threshold",
                    "threshold must be between 0 and 1",
                ));
            }
            if config
                .get_string("strategy", "column")
                .is_some_and(|c| c.trim().is_empty())
            {
                return Err(SigtraderError::ConfigMissing {
                    section: "strategy".to_string(),
                    key: "column".to_string(),
                });
            }
        }
        k if STRATEGY_KINDS.contains(&k) => {}
        other => {
            return Err(SigtraderError::config_invalid(
                "strategy",
                "kind",
                format!("unknown strategy kind: {other}"),
            ));
        }
    }
    Ok(())
}
