//! Instrument universe: parsing code lists and loading each code's bars.
//!
//! Codes with no data or too few bars are skipped with a warning; the run
//! only fails when nothing survives.

use crate::domain::code_data::CodeData;
use crate::domain::error::SigtraderError;
use crate::ports::data_port::DataPort;
use chrono::NaiveDate;
use std::collections::HashSet;
use tracing::{info, warn};

pub const MIN_BARS: usize = 30;

#[derive(Debug, Clone, thiserror::Error)]
pub enum UniverseError {
    #[error("empty token in code list")]
    EmptyToken,

    #[error("duplicate code: {0}")]
    DuplicateCode(String),
}

impl From<UniverseError> for SigtraderError {
    fn from(err: UniverseError) -> Self {
        SigtraderError::config_invalid("backtest", "codes", err.to_string())
    }
}

pub fn parse_codes(input: &str) -> Result<Vec<String>, UniverseError> {
    let mut codes = Vec::new();
    let mut seen = HashSet::new();

    for token in input.split(',') {
        let trimmed = token.trim();
        if trimmed.is_empty() {
            return Err(UniverseError::EmptyToken);
        }
        let code = trimmed.to_uppercase();
        if !seen.insert(code.clone()) {
            return Err(UniverseError::DuplicateCode(code));
        }
        codes.push(code);
    }

    Ok(codes)
}

#[derive(Debug, Clone, PartialEq)]
pub enum SkipReason {
    NoData,
    InsufficientBars { bars: usize },
}

#[derive(Debug, Clone)]
pub struct SkippedCode {
    pub code: String,
    pub reason: SkipReason,
}

pub struct LoadedUniverse {
    pub instruments: Vec<CodeData>,
    pub skipped: Vec<SkippedCode>,
}

impl LoadedUniverse {
    pub fn codes(&self) -> Vec<&str> {
        self.instruments.iter().map(|cd| cd.code.as_str()).collect()
    }
}

/// Fetch every code, keeping the ones with at least `min_bars` bars.
pub fn load_universe(
    data_port: &dyn DataPort,
    codes: &[String],
    start_date: Option<NaiveDate>,
    end_date: Option<NaiveDate>,
    min_bars: usize,
) -> Result<LoadedUniverse, SigtraderError> {
    let mut instruments = Vec::new();
    let mut skipped = Vec::new();

    for code in codes {
        let bars = match data_port.fetch_bars(code, start_date, end_date) {
            Ok(bars) => bars,
            Err(e) => {
                warn!(code = %code, error = %e, "skipping code");
                skipped.push(SkippedCode {
                    code: code.clone(),
                    reason: SkipReason::NoData,
                });
                continue;
            }
        };

        if bars.is_empty() {
            warn!(code = %code, "skipping code: no data found");
            skipped.push(SkippedCode {
                code: code.clone(),
                reason: SkipReason::NoData,
            });
            continue;
        }

        if bars.len() < min_bars {
            warn!(
                code = %code,
                bars = bars.len(),
                minimum = min_bars,
                "skipping code: insufficient bars"
            );
            skipped.push(SkippedCode {
                code: code.clone(),
                reason: SkipReason::InsufficientBars { bars: bars.len() },
            });
            continue;
        }

        info!(code = %code, bars = bars.len(), "loaded");
        instruments.push(CodeData::new(code.clone(), bars));
    }

    if instruments.is_empty() {
        return Err(SigtraderError::InsufficientData {
            code: "all".to_string(),
            bars: 0,
            minimum: min_bars,
        });
    }

    if !skipped.is_empty() {
        info!(
            kept = instruments.len(),
            total = instruments.len() + skipped.len(),
            "universe reduced"
        );
    }

    Ok(LoadedUniverse {
        instruments,
        skipped,
    })
}
