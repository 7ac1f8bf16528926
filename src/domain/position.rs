//! Single-asset position state and the trade ledger.

use chrono::NaiveDate;

/// An open long position. Stop and target are fixed at entry.
#[derive(Debug, Clone, PartialEq)]
pub struct LongPosition {
    pub entry_index: usize,
    pub entry_date: NaiveDate,
    pub entry_price: f64,
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
}

impl LongPosition {
    pub fn should_stop_loss(&self, price: f64) -> bool {
        match self.stop_loss {
            Some(level) => price <= level,
            None => false,
        }
    }

    pub fn should_take_profit(&self, price: f64) -> bool {
        match self.take_profit {
            Some(level) => price >= level,
            None => false,
        }
    }

    /// Forced exit check. Stop-loss wins when both trigger on a zero-width band.
    pub fn forced_exit(&self, price: f64) -> Option<ExitReason> {
        if self.should_stop_loss(price) {
            Some(ExitReason::StopLoss)
        } else if self.should_take_profit(price) {
            Some(ExitReason::TakeProfit)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub enum PositionState {
    #[default]
    Flat,
    Long(LongPosition),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    StopLoss,
    TakeProfit,
    Signal,
}

impl std::fmt::Display for ExitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ExitReason::StopLoss => "stop_loss",
            ExitReason::TakeProfit => "take_profit",
            ExitReason::Signal => "signal",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClosedTrade {
    pub entry_index: usize,
    pub exit_index: usize,
    pub entry_date: NaiveDate,
    pub exit_date: NaiveDate,
    pub entry_price: f64,
    pub exit_price: f64,
    pub exit_reason: ExitReason,
    /// Equity change from the bar before entry to the exit bar, net of
    /// commission and position sizing.
    pub net_return: f64,
}

impl ClosedTrade {
    pub fn holding_bars(&self) -> usize {
        self.exit_index - self.entry_index
    }
}

/// A position still open on the final bar, valued at that bar's close.
#[derive(Debug, Clone, PartialEq)]
pub struct OpenTrade {
    pub entry_index: usize,
    pub entry_date: NaiveDate,
    pub entry_price: f64,
    pub mark_price: f64,
    pub net_return: f64,
}
