//! Daily bar representation with the strategy signal annotation.

use chrono::NaiveDate;
use std::collections::BTreeMap;

/// Strategy directive attached to a bar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Signal {
    Exit,
    #[default]
    Hold,
    Enter,
}

impl Signal {
    pub fn as_i8(self) -> i8 {
        match self {
            Signal::Exit => -1,
            Signal::Hold => 0,
            Signal::Enter => 1,
        }
    }

    /// Any positive value is an entry and any negative value an exit.
    pub fn from_value(value: f64) -> Option<Signal> {
        if value.is_nan() {
            None
        } else if value > 0.0 {
            Some(Signal::Enter)
        } else if value < 0.0 {
            Some(Signal::Exit)
        } else {
            Some(Signal::Hold)
        }
    }
}

impl TryFrom<i64> for Signal {
    type Error = i64;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match value {
            -1 => Ok(Signal::Exit),
            0 => Ok(Signal::Hold),
            1 => Ok(Signal::Enter),
            other => Err(other),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Bar {
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    /// `None` means the series was never run through a strategy.
    pub signal: Option<Signal>,
    pub indicators: BTreeMap<String, f64>,
}

impl Bar {
    pub fn new(date: NaiveDate, open: f64, high: f64, low: f64, close: f64, volume: f64) -> Self {
        Bar {
            date,
            open,
            high,
            low,
            close,
            volume,
            signal: None,
            indicators: BTreeMap::new(),
        }
    }

    pub fn with_signal(mut self, signal: Signal) -> Self {
        self.signal = Some(signal);
        self
    }

    pub fn with_indicator(mut self, name: &str, value: f64) -> Self {
        self.indicators.insert(name.to_string(), value);
        self
    }

    /// Indicator value, `None` when absent or NaN.
    pub fn indicator(&self, name: &str) -> Option<f64> {
        self.indicators.get(name).copied().filter(|v| !v.is_nan())
    }

    /// Precomputed average true range, if the indicator stage supplied one.
    pub fn atr(&self) -> Option<f64> {
        self.indicators
            .get("ATR")
            .or_else(|| self.indicators.get("ATR_14"))
            .copied()
    }

    pub fn has_valid_close(&self) -> bool {
        self.close.is_finite() && self.close > 0.0
    }

    /// max(high - low, |high - prev_close|, |low - prev_close|)
    pub fn true_range(&self, prev_close: f64) -> f64 {
        let hl = self.high - self.low;
        let hc = (self.high - prev_close).abs();
        let lc = (self.low - prev_close).abs();
        hl.max(hc).max(lc)
    }
}

/// True when every bar carries a signal. Empty series pass.
pub fn has_signal_column(bars: &[Bar]) -> bool {
    bars.iter().all(|b| b.signal.is_some())
}
