//! Multi-instrument account and the daily rebalancing allocator.
//!
//! Each date on the union timeline:
//! 1. Price every instrument at its latest valid close on or before the date
//!    (0.0 before its first observation).
//! 2. Total equity = cash + Σ shares × price, measured before trading.
//! 3. Active set = instruments whose signal in force is Enter and whose price
//!    is positive.
//! 4. Sell every held instrument outside the active set, then buy each active
//!    instrument up to min(1 / |active|, max_stock_weight) of total equity.
//!
//! Trading only moves value between cash and holdings.

use chrono::NaiveDate;
use std::collections::BTreeMap;
use std::str::FromStr;
use tracing::debug;

use super::code_data::{CodeData, build_unified_timeline};
use super::backtest::drawdown_series;
use super::error::SigtraderError;
use super::ohlcv::Signal;

/// What to do with an active holding that sits above its target weight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RebalancePolicy {
    /// Leave it alone; only inactive holdings are ever sold.
    #[default]
    HoldActive,
    /// Sell the excess back to target before buying.
    TrimOverweight,
}

impl FromStr for RebalancePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "hold_active" => Ok(RebalancePolicy::HoldActive),
            "trim_overweight" => Ok(RebalancePolicy::TrimOverweight),
            other => Err(format!("unknown rebalance policy: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AllocatorConfig {
    pub initial_capital: f64,
    pub max_stock_weight: f64,
    pub policy: RebalancePolicy,
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        AllocatorConfig {
            initial_capital: 100_000.0,
            max_stock_weight: 0.15,
            policy: RebalancePolicy::HoldActive,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Holding {
    pub shares: u64,
    /// Total cash paid for the shares still held.
    pub cost_basis: f64,
    pub entry_date: NaiveDate,
    pub entry_index: usize,
}

impl Holding {
    pub fn market_value(&self, price: f64) -> f64 {
        self.shares as f64 * price
    }

    pub fn avg_price(&self) -> f64 {
        if self.shares == 0 {
            0.0
        } else {
            self.cost_basis / self.shares as f64
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Buy,
    Sell,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Fill {
    pub date: NaiveDate,
    pub code: String,
    pub side: Side,
    pub shares: u64,
    pub price: f64,
}

/// A sale of some or all of a holding, with PnL against average cost.
#[derive(Debug, Clone, PartialEq)]
pub struct PortfolioTrade {
    pub code: String,
    pub shares: u64,
    pub entry_date: NaiveDate,
    pub exit_date: NaiveDate,
    pub avg_entry_price: f64,
    pub exit_price: f64,
    pub pnl: f64,
    pub holding_bars: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Account {
    pub cash: f64,
    pub holdings: BTreeMap<String, Holding>,
}

impl Account {
    pub fn new(initial_capital: f64) -> Self {
        Account {
            cash: initial_capital,
            holdings: BTreeMap::new(),
        }
    }

    pub fn shares(&self, code: &str) -> u64 {
        self.holdings.get(code).map_or(0, |h| h.shares)
    }

    /// Value of one holding; zero when unpriced.
    pub fn holding_value(&self, code: &str, prices: &BTreeMap<String, f64>) -> f64 {
        let price = prices.get(code).copied().unwrap_or(0.0);
        self.holdings
            .get(code)
            .map_or(0.0, |h| h.market_value(price))
    }

    pub fn total_equity(&self, prices: &BTreeMap<String, f64>) -> f64 {
        let position_value: f64 = self
            .holdings
            .keys()
            .map(|code| self.holding_value(code, prices))
            .sum();
        self.cash + position_value
    }

    /// Buy whole shares. Returns false, leaving the account untouched, when
    /// cash does not cover the cost.
    pub fn buy(&mut self, code: &str, shares: u64, price: f64, date: NaiveDate, index: usize) -> bool {
        let cost = shares as f64 * price;
        if shares == 0 || cost > self.cash {
            return false;
        }
        self.cash -= cost;
        let holding = self.holdings.entry(code.to_string()).or_insert(Holding {
            shares: 0,
            cost_basis: 0.0,
            entry_date: date,
            entry_index: index,
        });
        holding.shares += shares;
        holding.cost_basis += cost;
        true
    }

    /// Sell up to `shares`; the holding is dropped once empty.
    pub fn sell(
        &mut self,
        code: &str,
        shares: u64,
        price: f64,
        date: NaiveDate,
        index: usize,
    ) -> Option<PortfolioTrade> {
        let holding = self.holdings.get_mut(code)?;
        let shares = shares.min(holding.shares);
        if shares == 0 {
            return None;
        }
        let avg = holding.avg_price();
        let proceeds = shares as f64 * price;
        let trade = PortfolioTrade {
            code: code.to_string(),
            shares,
            entry_date: holding.entry_date,
            exit_date: date,
            avg_entry_price: avg,
            exit_price: price,
            pnl: proceeds - avg * shares as f64,
            holding_bars: index - holding.entry_index,
        };

        self.cash += proceeds;
        holding.cost_basis -= avg * shares as f64;
        holding.shares -= shares;
        if holding.shares == 0 {
            self.holdings.remove(code);
        }
        Some(trade)
    }

    pub fn sell_all(
        &mut self,
        code: &str,
        price: f64,
        date: NaiveDate,
        index: usize,
    ) -> Option<PortfolioTrade> {
        let shares = self.shares(code);
        self.sell(code, shares, price, date, index)
    }
}

/// One row of the portfolio equity series.
#[derive(Debug, Clone, PartialEq)]
pub struct DailyRecord {
    pub date: NaiveDate,
    /// Equity measured before the day's trades.
    pub pre_trade_equity: f64,
    /// Equity measured after the day's trades.
    pub total_equity: f64,
    pub cash: f64,
    /// Count of active signals.
    pub trades: usize,
    pub fills: usize,
    pub strategy_return: f64,
    pub cumulative_return: f64,
    pub drawdown: f64,
    pub equity_curve: f64,
}

/// Value fraction per instrument plus cash, after the day's trades.
#[derive(Debug, Clone, PartialEq)]
pub struct WeightSnapshot {
    pub date: NaiveDate,
    pub weights: BTreeMap<String, f64>,
    pub cash: f64,
}

impl WeightSnapshot {
    pub fn total(&self) -> f64 {
        self.weights.values().sum::<f64>() + self.cash
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PortfolioResult {
    pub initial_capital: f64,
    pub codes: Vec<String>,
    pub records: Vec<DailyRecord>,
    pub weights: Vec<WeightSnapshot>,
    pub fills: Vec<Fill>,
    pub closed_trades: Vec<PortfolioTrade>,
    pub final_account: Account,
}

impl PortfolioResult {
    pub fn final_equity(&self) -> f64 {
        self.records
            .last()
            .map(|r| r.total_equity)
            .unwrap_or(self.initial_capital)
    }
}

/// Run the joint simulation over every instrument.
///
/// Every series must carry a signal column. Missing prices never fail the
/// run; the instrument is simply left out of valuation and trading that day.
pub fn run_portfolio(
    instruments: &[CodeData],
    config: &AllocatorConfig,
) -> Result<PortfolioResult, SigtraderError> {
    for cd in instruments {
        cd.require_signals()?;
    }

    let timeline = build_unified_timeline(instruments);
    let mut account = Account::new(config.initial_capital);
    let mut records: Vec<DailyRecord> = Vec::with_capacity(timeline.len());
    let mut weights = Vec::with_capacity(timeline.len());
    let mut fills = Vec::new();
    let mut closed_trades = Vec::new();
    let mut prev_equity = config.initial_capital;

    for (index, &date) in timeline.iter().enumerate() {
        let prices: BTreeMap<String, f64> = instruments
            .iter()
            .map(|cd| (cd.code.clone(), cd.price_at_or_before(date)))
            .collect();
        let pre_trade_equity = account.total_equity(&prices);

        let active: Vec<&str> = instruments
            .iter()
            .filter(|cd| {
                cd.signal_on(date) == Signal::Enter && prices[&cd.code] > 0.0
            })
            .map(|cd| cd.code.as_str())
            .collect();
        let fills_before = fills.len();

        // Sell first.
        let held: Vec<String> = account.holdings.keys().cloned().collect();
        for code in &held {
            let price = prices.get(code).copied().unwrap_or(0.0);
            if price <= 0.0 || active.contains(&code.as_str()) {
                continue;
            }
            let shares = account.shares(code);
            if let Some(trade) = account.sell_all(code, price, date, index) {
                fills.push(Fill {
                    date,
                    code: code.clone(),
                    side: Side::Sell,
                    shares,
                    price,
                });
                closed_trades.push(trade);
            }
        }

        if !active.is_empty() {
            let target_weight = (1.0 / active.len() as f64).min(config.max_stock_weight);
            let target_value = pre_trade_equity * target_weight;

            if config.policy == RebalancePolicy::TrimOverweight {
                for &code in &active {
                    let price = prices[code];
                    let excess = account.holding_value(code, &prices) - target_value;
                    let shares = (excess / price).floor();
                    if shares < 1.0 {
                        continue;
                    }
                    if let Some(trade) = account.sell(code, shares as u64, price, date, index) {
                        fills.push(Fill {
                            date,
                            code: code.to_string(),
                            side: Side::Sell,
                            shares: trade.shares,
                            price,
                        });
                        closed_trades.push(trade);
                    }
                }
            }

            for &code in &active {
                let price = prices[code];
                let current = account.holding_value(code, &prices);
                if current >= target_value {
                    continue;
                }
                let shares = ((target_value - current) / price).floor();
                if shares < 1.0 {
                    continue;
                }
                let shares = shares as u64;
                if account.buy(code, shares, price, date, index) {
                    fills.push(Fill {
                        date,
                        code: code.to_string(),
                        side: Side::Buy,
                        shares,
                        price,
                    });
                } else {
                    debug!(%date, code, shares, price, cash = account.cash, "insufficient cash, buy skipped");
                }
            }
        }

        let total_equity = account.total_equity(&prices);
        let strategy_return = if prev_equity != 0.0 {
            total_equity / prev_equity - 1.0
        } else {
            0.0
        };
        prev_equity = total_equity;

        weights.push(weight_snapshot(date, &account, &prices, total_equity));
        records.push(DailyRecord {
            date,
            pre_trade_equity,
            total_equity,
            cash: account.cash,
            trades: active.len(),
            fills: fills.len() - fills_before,
            strategy_return,
            cumulative_return: total_equity / config.initial_capital,
            drawdown: 0.0,
            equity_curve: total_equity,
        });
    }

    let equity: Vec<f64> = records.iter().map(|r| r.total_equity).collect();
    let (_, drawdowns) = drawdown_series(&equity);
    for (record, dd) in records.iter_mut().zip(drawdowns) {
        record.drawdown = dd;
    }

    Ok(PortfolioResult {
        initial_capital: config.initial_capital,
        codes: instruments.iter().map(|cd| cd.code.clone()).collect(),
        records,
        weights,
        fills,
        closed_trades,
        final_account: account,
    })
}

fn weight_snapshot(
    date: NaiveDate,
    account: &Account,
    prices: &BTreeMap<String, f64>,
    total_equity: f64,
) -> WeightSnapshot {
    if total_equity <= 0.0 {
        return WeightSnapshot {
            date,
            weights: prices.keys().map(|code| (code.clone(), 0.0)).collect(),
            cash: 1.0,
        };
    }
    WeightSnapshot {
        date,
        weights: prices
            .keys()
            .map(|code| (code.clone(), account.holding_value(code, prices) / total_equity))
            .collect(),
        cash: account.cash / total_equity,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ohlcv::Bar;
    use approx::assert_relative_eq;

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, day).unwrap()
    }

    fn make_code(code: &str, rows: &[(u32, f64, i64)]) -> CodeData {
        let bars = rows
            .iter()
            .map(|&(day, close, sig)| {
                Bar::new(d(day), close, close, close, close, 1000.0)
                    .with_signal(Signal::try_from(sig).unwrap())
            })
            .collect();
        CodeData::new(code.to_string(), bars)
    }

    fn prices(pairs: &[(&str, f64)]) -> BTreeMap<String, f64> {
        pairs.iter().map(|&(c, p)| (c.to_string(), p)).collect()
    }

    #[test]
    fn config_defaults() {
        let c = AllocatorConfig::default();
        assert_relative_eq!(c.initial_capital, 100_000.0);
        assert_relative_eq!(c.max_stock_weight, 0.15);
        assert_eq!(c.policy, RebalancePolicy::HoldActive);
    }

    #[test]
    fn policy_from_str() {
        assert_eq!(
            "hold_active".parse::<RebalancePolicy>(),
            Ok(RebalancePolicy::HoldActive)
        );
        assert_eq!(
            " TRIM_OVERWEIGHT ".parse::<RebalancePolicy>(),
            Ok(RebalancePolicy::TrimOverweight)
        );
        assert!("sometimes".parse::<RebalancePolicy>().is_err());
    }

    #[test]
    fn account_buy_and_total_equity() {
        let mut account = Account::new(10_000.0);
        assert!(account.buy("BHP", 10, 100.0, d(1), 0));
        assert_relative_eq!(account.cash, 9_000.0);
        assert_relative_eq!(account.total_equity(&prices(&[("BHP", 110.0)])), 10_100.0);
        // Unpriced holdings contribute nothing.
        assert_relative_eq!(account.total_equity(&prices(&[])), 9_000.0);
    }

    #[test]
    fn account_buy_rejects_insufficient_cash() {
        let mut account = Account::new(500.0);
        assert!(!account.buy("BHP", 10, 100.0, d(1), 0));
        assert_relative_eq!(account.cash, 500.0);
        assert!(account.holdings.is_empty());
    }

    #[test]
    fn account_partial_and_full_sell() {
        let mut account = Account::new(10_000.0);
        account.buy("BHP", 10, 100.0, d(1), 0);
        account.buy("BHP", 10, 120.0, d(2), 1);

        let partial = account.sell("BHP", 5, 130.0, d(3), 2).unwrap();
        assert_eq!(partial.shares, 5);
        assert_relative_eq!(partial.avg_entry_price, 110.0);
        assert_relative_eq!(partial.pnl, 100.0);
        assert_eq!(partial.holding_bars, 2);
        assert_eq!(account.shares("BHP"), 15);

        let rest = account.sell_all("BHP", 100.0, d(4), 3).unwrap();
        assert_eq!(rest.shares, 15);
        assert_relative_eq!(rest.pnl, -150.0);
        assert!(account.holdings.is_empty());
        assert_relative_eq!(account.cash, 10_000.0 - 2_200.0 + 650.0 + 1_500.0);
    }

    #[test]
    fn sell_unknown_code_is_none() {
        let mut account = Account::new(1.0);
        assert!(account.sell_all("XYZ", 10.0, d(1), 0).is_none());
    }

    #[test]
    fn equal_split_between_two_active_instruments() {
        let a = make_code("AAA", &[(1, 100.0, 1)]);
        let b = make_code("BBB", &[(1, 100.0, 1)]);
        let config = AllocatorConfig {
            max_stock_weight: 0.5,
            ..AllocatorConfig::default()
        };
        let result = run_portfolio(&[a, b], &config).unwrap();

        let w = &result.weights[0];
        assert_relative_eq!(w.weights["AAA"], 0.5);
        assert_relative_eq!(w.weights["BBB"], 0.5);
        assert_relative_eq!(w.cash, 0.0);
        assert_eq!(result.final_account.shares("AAA"), 500);
        assert_eq!(result.records[0].trades, 2);
        assert_eq!(result.records[0].fills, 2);
    }

    #[test]
    fn weight_cap_leaves_cash() {
        let a = make_code("AAA", &[(1, 100.0, 1)]);
        let result = run_portfolio(&[a], &AllocatorConfig::default()).unwrap();
        let w = &result.weights[0];
        assert_relative_eq!(w.weights["AAA"], 0.15);
        assert_relative_eq!(w.cash, 0.85);
    }

    #[test]
    fn inactive_holding_is_liquidated() {
        let a = make_code("AAA", &[(1, 100.0, 1), (2, 110.0, 0), (3, 120.0, 0)]);
        let result = run_portfolio(&[a], &AllocatorConfig::default()).unwrap();

        assert_eq!(result.final_account.shares("AAA"), 0);
        assert_eq!(result.closed_trades.len(), 1);
        assert_relative_eq!(result.closed_trades[0].pnl, 150.0 * 10.0);
        assert_eq!(result.fills.len(), 2);
        assert_eq!(result.fills[1].side, Side::Sell);
        // Day 2 liquidates at 110, so day 3 holds only cash.
        assert_relative_eq!(result.records[2].total_equity, 101_500.0);
        assert_relative_eq!(result.records[1].strategy_return, 0.015, epsilon = 1e-12);
    }

    #[test]
    fn active_overweight_is_kept_under_hold_policy() {
        let a = make_code("AAA", &[(1, 100.0, 1), (2, 200.0, 1)]);
        let result = run_portfolio(&[a], &AllocatorConfig::default()).unwrap();
        assert_eq!(result.final_account.shares("AAA"), 150);
        assert_eq!(result.records[1].fills, 0);
    }

    #[test]
    fn active_overweight_is_trimmed_under_trim_policy() {
        let a = make_code("AAA", &[(1, 100.0, 1), (2, 200.0, 1)]);
        let config = AllocatorConfig {
            policy: RebalancePolicy::TrimOverweight,
            ..AllocatorConfig::default()
        };
        let result = run_portfolio(&[a], &config).unwrap();

        // Day 2 equity 115_000, target 17_250: excess 12_750 sells 63 of 150.
        assert_eq!(result.final_account.shares("AAA"), 87);
        assert_eq!(result.records[1].fills, 1);
        assert_relative_eq!(
            result.records[1].pre_trade_equity,
            result.records[1].total_equity,
            epsilon = 1e-6
        );
    }

    #[test]
    fn union_timeline_and_unlisted_instrument() {
        let a = make_code("AAA", &[(1, 100.0, 1), (2, 100.0, 1), (3, 100.0, 1)]);
        let b = make_code("BBB", &[(3, 50.0, 1)]);
        let config = AllocatorConfig {
            max_stock_weight: 1.0,
            ..AllocatorConfig::default()
        };
        let result = run_portfolio(&[a, b], &config).unwrap();

        assert_eq!(result.records.len(), 3);
        // BBB has no price before day 3.
        assert_relative_eq!(result.weights[0].weights["BBB"], 0.0);
        assert_eq!(result.records[0].trades, 1);
        assert_eq!(result.records[2].trades, 2);
    }

    #[test]
    fn gap_day_values_at_last_close_and_drops_out_of_active_set() {
        let a = make_code("AAA", &[(1, 100.0, 1), (3, 120.0, 1)]);
        let b = make_code("BBB", &[(1, 10.0, 0), (2, 10.0, 0), (3, 10.0, 0)]);
        let result = run_portfolio(&[a, b], &AllocatorConfig::default()).unwrap();

        // No AAA bar on day 2: valued at the day 1 close, then sold at it.
        assert_eq!(result.records[1].trades, 0);
        assert_relative_eq!(result.records[1].pre_trade_equity, 100_000.0);
        assert_eq!(result.fills[1].side, Side::Sell);
        assert_relative_eq!(result.fills[1].price, 100.0);
        assert_relative_eq!(result.weights[1].weights["AAA"], 0.0);
        // Day 3 carries an Enter bar again.
        assert_eq!(result.records[2].trades, 1);
        assert_eq!(result.final_account.shares("AAA"), 125);
    }

    #[test]
    fn delisted_instrument_is_liquidated_and_frees_its_slot() {
        let a = make_code("AAA", &[(1, 100.0, 1), (2, 100.0, 1)]);
        let b = make_code(
            "BBB",
            &[(1, 10.0, 0), (2, 10.0, 0), (3, 10.0, 1), (4, 10.0, 1), (5, 10.0, 1)],
        );
        let config = AllocatorConfig {
            max_stock_weight: 0.5,
            ..AllocatorConfig::default()
        };
        let result = run_portfolio(&[a, b], &config).unwrap();

        // AAA has no bars after day 2: sold on day 3 at its last close.
        assert_eq!(result.final_account.shares("AAA"), 0);
        assert_eq!(result.closed_trades.len(), 1);
        assert_eq!(result.closed_trades[0].code, "AAA");
        assert_eq!(result.closed_trades[0].exit_date, d(3));
        for day in 2..5 {
            assert_eq!(result.records[day].trades, 1);
            assert_relative_eq!(result.weights[day].weights["AAA"], 0.0);
        }
        // BBB alone is active, so it gets the full cap rather than half of it.
        assert_relative_eq!(result.weights[4].weights["BBB"], 0.5);
        assert_eq!(result.final_account.shares("BBB"), 5_000);
    }

    #[test]
    fn target_below_one_share_buys_nothing() {
        let a = make_code("AAA", &[(1, 200_000.0, 1)]);
        let config = AllocatorConfig {
            max_stock_weight: 1.0,
            ..AllocatorConfig::default()
        };
        let result = run_portfolio(&[a], &config).unwrap();
        assert!(result.fills.is_empty());
        assert_relative_eq!(result.records[0].cash, 100_000.0);
    }

    #[test]
    fn insufficient_cash_skips_buy() {
        // AAA takes all the cash on day 1 and stays active, so BBB cannot be funded.
        let a = make_code("AAA", &[(1, 100.0, 1), (2, 100.0, 1)]);
        let b = make_code("BBB", &[(1, 10.0, 0), (2, 10.0, 1)]);
        let config = AllocatorConfig {
            max_stock_weight: 1.0,
            ..AllocatorConfig::default()
        };
        let result = run_portfolio(&[a, b], &config).unwrap();

        assert_eq!(result.final_account.shares("AAA"), 1000);
        assert_eq!(result.final_account.shares("BBB"), 0);
        assert_eq!(result.records[1].trades, 2);
        assert_eq!(result.records[1].fills, 0);
        assert_relative_eq!(result.records[1].cash, 0.0);
    }

    #[test]
    fn capital_conserved_and_weights_sum_to_one() {
        let a = make_code("AAA", &[(1, 100.0, 1), (2, 105.0, 1), (3, 95.0, -1), (4, 99.0, 1)]);
        let b = make_code("BBB", &[(1, 30.0, 0), (2, 31.0, 1), (3, 33.0, 1), (4, 29.0, 0)]);
        let c = make_code("CCC", &[(2, 7.0, 1), (4, 8.0, 1)]);
        let config = AllocatorConfig {
            max_stock_weight: 0.4,
            ..AllocatorConfig::default()
        };
        let result = run_portfolio(&[a, b, c], &config).unwrap();

        for (record, w) in result.records.iter().zip(&result.weights) {
            assert_relative_eq!(record.pre_trade_equity, record.total_equity, epsilon = 1e-6);
            assert_relative_eq!(w.total(), 1.0, epsilon = 1e-9);
            assert!(record.cash >= 0.0);
            assert!(record.drawdown <= 0.0);
        }
    }

    #[test]
    fn missing_signal_column_is_fatal() {
        let bare = CodeData::new(
            "BAD".into(),
            vec![Bar::new(d(1), 1.0, 1.0, 1.0, 1.0, 0.0)],
        );
        let err = run_portfolio(&[bare], &AllocatorConfig::default()).unwrap_err();
        assert!(matches!(err, SigtraderError::MissingSignal { .. }));
    }

    #[test]
    fn empty_universe() {
        let result = run_portfolio(&[], &AllocatorConfig::default()).unwrap();
        assert!(result.records.is_empty());
        assert_relative_eq!(result.final_equity(), 100_000.0);
    }
}
