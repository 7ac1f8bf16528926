//! CSV file data adapter.
//!
//! Reads `<dir>/<CODE>.csv`. Columns are matched by header name, case
//! insensitively for the core fields: `date, open, high, low, close, volume`
//! and an optional `signal`. Every other column is loaded as an indicator
//! under its header name. Empty or unparseable numeric cells become NaN.

use crate::domain::error::SigtraderError;
use crate::domain::ohlcv::{Bar, Signal};
use crate::ports::data_port::DataPort;
use chrono::NaiveDate;
use csv::StringRecord;
use std::fs;
use std::path::PathBuf;

pub struct CsvAdapter {
    base_path: PathBuf,
}

struct ColumnMap {
    date: usize,
    open: usize,
    high: usize,
    low: usize,
    close: usize,
    volume: usize,
    signal: Option<usize>,
    indicators: Vec<(usize, String)>,
}

impl ColumnMap {
    fn from_headers(headers: &StringRecord, path: &str) -> Result<Self, SigtraderError> {
        let find = |name: &str| {
            headers
                .iter()
                .position(|h| h.trim().eq_ignore_ascii_case(name))
        };
        let require = |name: &str| {
            find(name).ok_or_else(|| SigtraderError::DataLoad {
                reason: format!("{path}: missing {name} column"),
            })
        };

        let date = require("date")?;
        let open = require("open")?;
        let high = require("high")?;
        let low = require("low")?;
        let close = require("close")?;
        let volume = require("volume")?;
        let signal = find("signal");

        let core = [Some(date), Some(open), Some(high), Some(low), Some(close), Some(volume), signal];
        let indicators = headers
            .iter()
            .enumerate()
            .filter(|(i, _)| !core.contains(&Some(*i)))
            .map(|(i, h)| (i, h.trim().to_string()))
            .collect();

        Ok(ColumnMap {
            date,
            open,
            high,
            low,
            close,
            volume,
            signal,
            indicators,
        })
    }
}

fn parse_number(cell: Option<&str>) -> f64 {
    cell.map(str::trim)
        .filter(|s| !s.is_empty())
        .and_then(|s| s.parse().ok())
        .unwrap_or(f64::NAN)
}

/// Accepts `YYYY-MM-DD`, ignoring any trailing time component.
fn parse_date(cell: &str) -> Option<NaiveDate> {
    let cell = cell.trim();
    let day = cell.get(..10).unwrap_or(cell);
    NaiveDate::parse_from_str(day, "%Y-%m-%d").ok()
}

impl CsvAdapter {
    pub fn new(base_path: PathBuf) -> Self {
        Self { base_path }
    }

    fn csv_path(&self, code: &str) -> PathBuf {
        self.base_path.join(format!("{}.csv", code))
    }

    fn read_all(&self, code: &str) -> Result<Vec<Bar>, SigtraderError> {
        let path = self.csv_path(code);
        if !path.exists() {
            return Err(SigtraderError::NoData {
                code: code.to_string(),
            });
        }
        let display = path.display().to_string();
        let content = fs::read_to_string(&path).map_err(|e| SigtraderError::DataLoad {
            reason: format!("failed to read {display}: {e}"),
        })?;

        let mut rdr = csv::Reader::from_reader(content.as_bytes());
        let headers = rdr.headers()?.clone();
        let columns = ColumnMap::from_headers(&headers, &display)?;
        let mut bars = Vec::new();

        for (line, result) in rdr.records().enumerate() {
            let record = result?;
            let date_cell = record.get(columns.date).unwrap_or_default();
            let date = parse_date(date_cell).ok_or_else(|| SigtraderError::DataLoad {
                reason: format!("{display} row {}: invalid date '{date_cell}'", line + 1),
            })?;

            let mut bar = Bar::new(
                date,
                parse_number(record.get(columns.open)),
                parse_number(record.get(columns.high)),
                parse_number(record.get(columns.low)),
                parse_number(record.get(columns.close)),
                parse_number(record.get(columns.volume)),
            );
            if let Some(i) = columns.signal {
                bar.signal = Some(Signal::from_value(parse_number(record.get(i))).unwrap_or_default());
            }
            for (i, name) in &columns.indicators {
                bar.indicators
                    .insert(name.clone(), parse_number(record.get(*i)));
            }
            bars.push(bar);
        }

        bars.sort_by_key(|b| b.date);
        Ok(bars)
    }
}

impl DataPort for CsvAdapter {
    fn fetch_bars(
        &self,
        code: &str,
        start_date: Option<NaiveDate>,
        end_date: Option<NaiveDate>,
    ) -> Result<Vec<Bar>, SigtraderError> {
        let mut bars = self.read_all(code)?;
        bars.retain(|b| {
            start_date.is_none_or(|start| b.date >= start) && end_date.is_none_or(|end| b.date <= end)
        });
        Ok(bars)
    }

    fn list_symbols(&self) -> Result<Vec<String>, SigtraderError> {
        let entries = fs::read_dir(&self.base_path).map_err(|e| SigtraderError::DataLoad {
            reason: format!(
                "failed to read directory {}: {}",
                self.base_path.display(),
                e
            ),
        })?;

        let mut symbols = Vec::new();
        for entry in entries {
            let path = entry?.path();
            let is_csv = path
                .extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case("csv"));
            if !is_csv {
                continue;
            }
            if let Some(stem) = path.file_stem() {
                symbols.push(stem.to_string_lossy().into_owned());
            }
        }

        symbols.sort();
        Ok(symbols)
    }

    fn get_data_range(
        &self,
        code: &str,
    ) -> Result<Option<(NaiveDate, NaiveDate, usize)>, SigtraderError> {
        let bars = match self.read_all(code) {
            Ok(bars) => bars,
            Err(SigtraderError::NoData { .. }) => return Ok(None),
            Err(e) => return Err(e),
        };
        Ok(match (bars.first(), bars.last()) {
            (Some(first), Some(last)) => Some((first.date, last.date, bars.len())),
            _ => None,
        })
    }
}
