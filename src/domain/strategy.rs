//! Signal-generating strategies.
//!
//! Each strategy reads precomputed indicator columns and annotates a copy of
//! the bar series with a [`Signal`]. A bar whose inputs are missing gets
//! `Hold`. When entry and exit conditions both fire, exit wins.

use crate::domain::ohlcv::{Bar, Signal};

pub trait SignalStrategy: Send + Sync {
    fn name(&self) -> &str;

    /// Returns a new series with every bar's signal set.
    fn compute_signals(&self, bars: &[Bar]) -> Vec<Bar>;
}

fn annotate<F>(bars: &[Bar], mut decide: F) -> Vec<Bar>
where
    F: FnMut(Option<&Bar>, &Bar) -> (bool, bool),
{
    let mut prev: Option<&Bar> = None;
    bars.iter()
        .map(|bar| {
            let (enter, exit) = decide(prev, bar);
            prev = Some(bar);
            let signal = if exit {
                Signal::Exit
            } else if enter {
                Signal::Enter
            } else {
                Signal::Hold
            };
            bar.clone().with_signal(signal)
        })
        .collect()
}

/// Golden/death cross of two simple moving averages, entries filtered by RSI.
#[derive(Debug, Clone, PartialEq)]
pub struct MaCrossover {
    pub short: usize,
    pub long: usize,
    pub rsi_limit: f64,
    short_col: String,
    long_col: String,
}

impl MaCrossover {
    pub const RSI_COLUMN: &'static str = "RSI_14";

    pub fn new(short: usize, long: usize, rsi_limit: f64) -> Self {
        MaCrossover {
            short,
            long,
            rsi_limit,
            short_col: format!("SMA_{short}"),
            long_col: format!("SMA_{long}"),
        }
    }

    fn spread(&self, bar: &Bar) -> Option<(f64, f64)> {
        Some((bar.indicator(&self.short_col)?, bar.indicator(&self.long_col)?))
    }
}

impl Default for MaCrossover {
    fn default() -> Self {
        MaCrossover::new(20, 60, 70.0)
    }
}

impl SignalStrategy for MaCrossover {
    fn name(&self) -> &str {
        "ma_crossover"
    }

    fn compute_signals(&self, bars: &[Bar]) -> Vec<Bar> {
        annotate(bars, |prev, bar| {
            let (Some((s, l)), Some((ps, pl))) =
                (self.spread(bar), prev.and_then(|p| self.spread(p)))
            else {
                return (false, false);
            };
            let rsi_ok = bar
                .indicator(Self::RSI_COLUMN)
                .is_some_and(|rsi| rsi < self.rsi_limit);
            let golden = s > l && ps <= pl;
            let death = s < l && ps >= pl;
            (golden && rsi_ok, death)
        })
    }
}

/// Buy below the lower Bollinger band, exit once price is back above the middle.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BollingerReversion;

impl SignalStrategy for BollingerReversion {
    fn name(&self) -> &str {
        "bollinger"
    }

    fn compute_signals(&self, bars: &[Bar]) -> Vec<Bar> {
        annotate(bars, |_, bar| {
            let enter = bar.indicator("BB_L").is_some_and(|lower| bar.close < lower);
            let exit = bar.indicator("BB_M").is_some_and(|mid| bar.close > mid);
            (enter, exit)
        })
    }
}

/// Enter on a positive and rising MACD histogram, exit once it turns negative.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MacdMomentum;

impl SignalStrategy for MacdMomentum {
    fn name(&self) -> &str {
        "macd"
    }

    fn compute_signals(&self, bars: &[Bar]) -> Vec<Bar> {
        annotate(bars, |prev, bar| {
            let Some(hist) = bar.indicator("MACD_hist") else {
                return (false, false);
            };
            let rising = prev
                .and_then(|p| p.indicator("MACD_hist"))
                .is_some_and(|prev_hist| hist > prev_hist);
            (hist > 0.0 && rising, hist < 0.0)
        })
    }
}

/// Enter while a precomputed model probability column exceeds a threshold.
/// Never emits an explicit exit; a falling probability just stops re-entry.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelThreshold {
    pub column: String,
    pub threshold: f64,
}

impl Default for ModelThreshold {
    fn default() -> Self {
        ModelThreshold {
            column: "Prob".into(),
            threshold: 0.6,
        }
    }
}

impl SignalStrategy for ModelThreshold {
    fn name(&self) -> &str {
        "model"
    }

    fn compute_signals(&self, bars: &[Bar]) -> Vec<Bar> {
        annotate(bars, |_, bar| {
            let enter = bar
                .indicator(&self.column)
                .is_some_and(|p| p > self.threshold);
            (enter, false)
        })
    }
}
