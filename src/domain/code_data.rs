//! Per-instrument bar series and the unified multi-instrument timeline.

use crate::domain::error::SigtraderError;
use crate::domain::ohlcv::{Bar, Signal, has_signal_column};
use chrono::NaiveDate;
use std::collections::{BTreeSet, HashMap};

#[derive(Debug, Clone)]
pub struct CodeData {
    pub code: String,
    pub bars: Vec<Bar>,
    pub date_index: HashMap<NaiveDate, usize>,
}

impl CodeData {
    /// Bars are sorted by date; a later duplicate date replaces the earlier one.
    pub fn new(code: String, mut bars: Vec<Bar>) -> Self {
        bars.sort_by_key(|b| b.date);
        bars.dedup_by(|later, earlier| {
            if later.date == earlier.date {
                std::mem::swap(later, earlier);
                true
            } else {
                false
            }
        });
        let date_index = bars
            .iter()
            .enumerate()
            .map(|(i, bar)| (bar.date, i))
            .collect();
        Self {
            code,
            bars,
            date_index,
        }
    }

    pub fn get_bar(&self, date: NaiveDate) -> Option<&Bar> {
        self.date_index.get(&date).map(|&i| &self.bars[i])
    }

    /// Latest valid close on or before `date`, 0.0 when none exists yet.
    pub fn price_at_or_before(&self, date: NaiveDate) -> f64 {
        let end = self.bars.partition_point(|b| b.date <= date);
        self.bars[..end]
            .iter()
            .rev()
            .find(|b| b.has_valid_close())
            .map(|b| b.close)
            .unwrap_or(0.0)
    }

    /// Signal of the bar dated exactly `date`. Hold when the instrument has
    /// no bar that day, so a delisted or suspended instrument is never active.
    pub fn signal_on(&self, date: NaiveDate) -> Signal {
        self.get_bar(date)
            .and_then(|b| b.signal)
            .unwrap_or(Signal::Hold)
    }

    pub fn require_signals(&self) -> Result<(), SigtraderError> {
        if has_signal_column(&self.bars) {
            Ok(())
        } else {
            Err(SigtraderError::MissingSignal {
                code: self.code.clone(),
            })
        }
    }
}

/// Sorted union of every instrument's dates.
pub fn build_unified_timeline(codes: &[CodeData]) -> Vec<NaiveDate> {
    let unique_dates: BTreeSet<NaiveDate> = codes
        .iter()
        .flat_map(|cd| cd.bars.iter().map(|bar| bar.date))
        .collect();
    unique_dates.into_iter().collect()
}
