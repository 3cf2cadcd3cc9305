//! Tick-driven simulator: fixed-schedule, deterministic, single pass.
//!
//! Per tick: advance the EMA bands, track bankruptcy proximity, snapshot
//! stats once per simulated minute, rebuild stale order ladders, then sweep
//! the ladders against the trade price and book fills. Fills pull the next
//! ladder refresh forward by the simulated latency.

use std::collections::VecDeque;

use crate::config::StrategyParams;
use crate::engine::close::{plan_long_closes, plan_short_closes};
use crate::engine::entry::plan_entries;
use crate::engine::position::{
    apply_fill, bankruptcy_price, equity as account_equity, unrealized_pnl,
};
use crate::engine::ContractError;
use crate::math::contract::{long_pnl, qty_to_cost, short_pnl};
use crate::math::ema::{span_triple, EmaBand};
use crate::math::round::{rel_diff, round_step};
use crate::telemetry::diag::DiagnosticSink;
use crate::types::{Fill, Order, OrderTag, Position, Side, StatsSnapshot, Tick};

const STATS_INTERVAL_MS: f64 = 60_000.0;
const GRID_REFRESH_MS: f64 = 1000.0 * 60.0 * 10.0;
/// A tick within 6% of the bankruptcy price counts as liquidation.
const BANKRUPTCY_PROXIMITY: f64 = 0.06;
/// Equity below 20% of start ends the run early.
const EQUITY_FLOOR_FRACTION: f64 = 0.2;
const PROFIT_REFRESH_BONUS_MS: f64 = 2_500.0;
const STUCK_REFRESH_BONUS_MS: f64 = 15_000.0;

/// Accumulated simulation output. Complete for any admissible input: runs
/// end on tick exhaustion, the equity floor, or bankruptcy, never mid-tick.
#[derive(Clone, Debug, Default)]
pub struct BacktestReport {
    pub fills: Vec<Fill>,
    pub stats: Vec<StatsSnapshot>,
}

struct SideLadders {
    entries: VecDeque<Order>,
    closes: VecDeque<Order>,
    next_entry_update: f64,
    next_close_update: f64,
}

impl SideLadders {
    fn new() -> Self {
        Self {
            entries: VecDeque::from(vec![Order::EMPTY]),
            closes: VecDeque::from(vec![Order::EMPTY]),
            next_entry_update: 0.0,
            next_close_update: 0.0,
        }
    }
}

fn validate_ticks(ticks: &[Tick]) -> Result<(), ContractError> {
    for (index, tick) in ticks.iter().enumerate() {
        if !(tick.ts.is_finite() && tick.qty.is_finite() && tick.price.is_finite()) {
            return Err(ContractError::NonFiniteTick { index });
        }
    }
    Ok(())
}

/// Run one full simulation over `ticks`.
pub fn run_backtest(
    ticks: &[Tick],
    params: &StrategyParams,
    starting_balance: f64,
    sink: &dyn DiagnosticSink,
) -> Result<BacktestReport, ContractError> {
    if starting_balance <= 0.0 {
        return Err(ContractError::NonPositiveBalance(starting_balance));
    }
    validate_ticks(ticks)?;

    let xp = &params.exchange;
    let latency = xp.latency_ms;

    let spans_long = span_triple(
        params.long.ema_span_min,
        params.long.ema_span_max,
        params.long.enabled,
    );
    let spans_short = span_triple(
        params.short.ema_span_min,
        params.short.ema_span_max,
        params.short.enabled,
    );
    let max_span_f = spans_long
        .iter()
        .chain(spans_short.iter())
        .copied()
        .fold(f64::NEG_INFINITY, f64::max);
    let max_span = max_span_f.round() as usize;
    if max_span >= ticks.len() {
        return Err(ContractError::EmaSpanTooLong {
            span: max_span,
            n_ticks: ticks.len(),
        });
    }

    let burn_in: Vec<f64> = ticks[..max_span].iter().map(|t| t.price).collect();
    let mut emas_long = EmaBand::seed(&burn_in, spans_long);
    let mut emas_short = EmaBand::seed(&burn_in, spans_short);

    let mut balance = starting_balance;
    let mut balance_long = starting_balance;
    let mut balance_short = starting_balance;
    let mut equity = starting_balance;
    let mut long = Position::FLAT;
    let mut short = Position::FLAT;
    let mut bkr_price = 0.0;
    let mut closest_bkr = 1.0_f64;

    let mut long_ladders = SideLadders::new();
    let mut short_ladders = SideLadders::new();
    let mut next_stats_update = 0.0;

    let mut long_wallet_exposure = 0.0;
    let mut short_wallet_exposure = 0.0;
    let long_unstuck_threshold = if params.long.auto_unstuck_wallet_exposure_threshold != 0.0 {
        params.long.wallet_exposure_limit
            * (1.0 - params.long.auto_unstuck_wallet_exposure_threshold)
    } else {
        params.long.wallet_exposure_limit * 10.0
    };
    let short_unstuck_threshold = if params.short.auto_unstuck_wallet_exposure_threshold != 0.0 {
        params.short.wallet_exposure_limit
            * (1.0 - params.short.auto_unstuck_wallet_exposure_threshold)
    } else {
        params.short.wallet_exposure_limit * 10.0
    };

    let mut fills: Vec<Fill> = Vec::new();
    let mut stats: Vec<StatsSnapshot> = Vec::new();

    for k in max_span..ticks.len() {
        let tick = ticks[k];
        let (ts, price) = (tick.ts, tick.price);

        if params.long.enabled {
            emas_long.update(price);
        }
        if params.short.enabled {
            emas_short.update(price);
        }
        if tick.qty == 0.0 {
            continue;
        }

        closest_bkr = closest_bkr.min(rel_diff(bkr_price, price));

        if ts >= next_stats_update {
            equity = balance + unrealized_pnl(long, short, price, xp);
            let equity_long = balance_long + long_pnl(long.price, price, long.size, xp);
            let equity_short = balance_short + short_pnl(short.price, price, short.size, xp);
            if equity / starting_balance < EQUITY_FLOOR_FRACTION {
                return Ok(BacktestReport { fills, stats });
            }
            stats.push(StatsSnapshot {
                timestamp: ts,
                balance,
                equity,
                bkr_price,
                long_psize: long.size,
                long_pprice: long.price,
                short_psize: short.size,
                short_pprice: short.price,
                price,
                closest_bkr,
                balance_long,
                balance_short,
                equity_long,
                equity_short,
            });
            next_stats_update = ts + STATS_INTERVAL_MS;
        }

        let prev_price = ticks[k - 1].price;
        if ts >= long_ladders.next_entry_update {
            long_ladders.entries = if params.long.enabled {
                VecDeque::from(plan_entries(
                    Side::Long,
                    balance,
                    long,
                    prev_price,
                    emas_long.lower(),
                    xp,
                    &params.long,
                    sink,
                )?)
            } else {
                VecDeque::from(vec![Order::EMPTY])
            };
            long_ladders.next_entry_update = ts + GRID_REFRESH_MS;
        }
        if ts >= short_ladders.next_entry_update {
            short_ladders.entries = if params.short.enabled {
                VecDeque::from(plan_entries(
                    Side::Short,
                    balance,
                    short,
                    prev_price,
                    emas_short.upper(),
                    xp,
                    &params.short,
                    sink,
                )?)
            } else {
                VecDeque::from(vec![Order::EMPTY])
            };
            short_ladders.next_entry_update = ts + GRID_REFRESH_MS;
        }
        if ts >= long_ladders.next_close_update {
            long_ladders.closes = if params.long.enabled {
                VecDeque::from(plan_long_closes(
                    balance,
                    long,
                    prev_price,
                    emas_long.upper(),
                    xp,
                    &params.long,
                    sink,
                ))
            } else {
                VecDeque::from(vec![Order::EMPTY])
            };
            long_ladders.next_close_update = ts + GRID_REFRESH_MS;
        }
        if ts >= short_ladders.next_close_update {
            short_ladders.closes = if params.short.enabled {
                VecDeque::from(plan_short_closes(
                    balance,
                    short,
                    prev_price,
                    emas_short.lower(),
                    xp,
                    &params.short,
                    sink,
                ))
            } else {
                VecDeque::from(vec![Order::EMPTY])
            };
            short_ladders.next_close_update = ts + GRID_REFRESH_MS;
        }

        if closest_bkr < BANKRUPTCY_PROXIMITY {
            if long.size != 0.0 {
                let fee_paid = -qty_to_cost(long.size, long.price, xp) * xp.maker_fee;
                let pnl = long_pnl(long.price, price, -long.size, xp);
                balance = 0.0;
                equity = 0.0;
                long = Position::FLAT;
                fills.push(Fill {
                    index: k,
                    timestamp: ts,
                    pnl,
                    fee_paid,
                    balance,
                    equity,
                    qty: 0.0,
                    price,
                    psize: 0.0,
                    pprice: 0.0,
                    tag: OrderTag::Bankruptcy(Side::Long),
                });
            }
            if short.size != 0.0 {
                let fee_paid = -qty_to_cost(short.size, short.price, xp) * xp.maker_fee;
                let pnl = short_pnl(short.price, price, -short.size, xp);
                balance = 0.0;
                equity = 0.0;
                short = Position::FLAT;
                fills.push(Fill {
                    index: k,
                    timestamp: ts,
                    pnl,
                    fee_paid,
                    balance,
                    equity,
                    qty: 0.0,
                    price,
                    psize: 0.0,
                    pprice: 0.0,
                    tag: OrderTag::Bankruptcy(Side::Short),
                });
            }
            return Ok(BacktestReport { fills, stats });
        }

        // long entries fill while the price trades through them
        loop {
            let head = match long_ladders.entries.front() {
                Some(&head) if head.qty > 0.0 && price < head.price => head,
                _ => break,
            };
            long_ladders.next_entry_update = long_ladders.next_entry_update.min(ts + latency);
            long_ladders.next_close_update = long_ladders.next_close_update.min(ts + latency);
            long = apply_fill(long, head.qty, head.price, xp.qty_step);
            let fee_paid = -qty_to_cost(head.qty, head.price, xp) * xp.maker_fee;
            balance += fee_paid;
            balance_long += fee_paid;
            equity = account_equity(balance, long, short, price, xp);
            fills.push(Fill {
                index: k,
                timestamp: ts,
                pnl: 0.0,
                fee_paid,
                balance,
                equity,
                qty: head.qty,
                price: head.price,
                psize: long.size,
                pprice: long.price,
                tag: head.tag,
            });
            long_ladders.entries.pop_front();
            bkr_price = bankruptcy_price(balance, long, short, xp);
            long_wallet_exposure = qty_to_cost(long.size, long.price, xp) / balance;
        }
        loop {
            let head = match short_ladders.entries.front() {
                Some(&head) if head.qty < 0.0 && price > head.price => head,
                _ => break,
            };
            short_ladders.next_entry_update = short_ladders.next_entry_update.min(ts + latency);
            short_ladders.next_close_update = short_ladders.next_close_update.min(ts + latency);
            short = apply_fill(short, head.qty, head.price, xp.qty_step);
            let fee_paid = -qty_to_cost(head.qty, head.price, xp) * xp.maker_fee;
            balance += fee_paid;
            balance_short += fee_paid;
            equity = account_equity(balance, short, short, price, xp);
            fills.push(Fill {
                index: k,
                timestamp: ts,
                pnl: 0.0,
                fee_paid,
                balance,
                equity,
                qty: head.qty,
                price: head.price,
                psize: short.size,
                pprice: short.price,
                tag: head.tag,
            });
            short_ladders.entries.pop_front();
            bkr_price = bankruptcy_price(balance, short, short, xp);
            short_wallet_exposure = qty_to_cost(short.size, short.price, xp) / balance;
        }

        // long closes fill above their price
        while long.size > 0.0 {
            let head = match long_ladders.closes.front() {
                Some(&head) if head.qty < 0.0 && price > head.price => head,
                _ => break,
            };
            long_ladders.next_entry_update = long_ladders.next_entry_update.min(ts + latency);
            long_ladders.next_close_update = long_ladders.next_close_update.min(ts + latency);
            let mut close_qty = head.qty;
            let new_size = round_step(long.size + close_qty, xp.qty_step);
            if new_size < 0.0 {
                sink.warn(&format!(
                    "long close qty greater than long psize: psize={} pprice={} close={:?}",
                    long.size, long.price, head,
                ));
                close_qty = -long.size;
                long = Position::FLAT;
            } else {
                long.size = new_size;
            }
            let fee_paid = -qty_to_cost(close_qty, head.price, xp) * xp.maker_fee;
            let pnl = long_pnl(long.price, head.price, close_qty, xp);
            balance += fee_paid + pnl;
            balance_long += fee_paid + pnl;
            if long.size == 0.0 {
                long.price = 0.0;
            }
            equity = account_equity(balance, long, short, price, xp);
            fills.push(Fill {
                index: k,
                timestamp: ts,
                pnl,
                fee_paid,
                balance,
                equity,
                qty: close_qty,
                price: head.price,
                psize: long.size,
                pprice: long.price,
                tag: head.tag,
            });
            long_ladders.closes.pop_front();
            bkr_price = bankruptcy_price(balance, long, short, xp);
            long_wallet_exposure = qty_to_cost(long.size, long.price, xp) / balance;
        }
        while short.size < 0.0 {
            let head = match short_ladders.closes.front() {
                Some(&head) if head.qty > 0.0 && price < head.price => head,
                _ => break,
            };
            short_ladders.next_entry_update = short_ladders.next_entry_update.min(ts + latency);
            short_ladders.next_close_update = short_ladders.next_close_update.min(ts + latency);
            let mut close_qty = head.qty;
            let new_size = round_step(short.size + close_qty, xp.qty_step);
            if new_size > 0.0 {
                sink.warn(&format!(
                    "short close qty less than short psize: psize={} pprice={} close={:?}",
                    short.size, short.price, head,
                ));
                close_qty = -short.size;
                short = Position::FLAT;
            } else {
                short.size = new_size;
            }
            let fee_paid = -qty_to_cost(close_qty, head.price, xp) * xp.maker_fee;
            let pnl = short_pnl(short.price, head.price, close_qty, xp);
            balance += fee_paid + pnl;
            balance_short += fee_paid + pnl;
            if short.size == 0.0 {
                short.price = 0.0;
            }
            equity = account_equity(balance, short, short, price, xp);
            fills.push(Fill {
                index: k,
                timestamp: ts,
                pnl,
                fee_paid,
                balance,
                equity,
                qty: close_qty,
                price: head.price,
                psize: short.size,
                pprice: short.price,
                tag: head.tag,
            });
            short_ladders.closes.pop_front();
            bkr_price = bankruptcy_price(balance, short, short, xp);
            short_wallet_exposure = qty_to_cost(short.size, short.price, xp) / balance;
        }

        // adaptive refresh bias: flat sides re-enter quickly, profitable
        // sides re-close quickly, stuck sides re-plan both after a pause
        if params.long.enabled {
            if long.size == 0.0 {
                long_ladders.next_entry_update =
                    long_ladders.next_entry_update.min(ts + latency);
            } else if price > long.price {
                long_ladders.next_close_update = long_ladders
                    .next_close_update
                    .min(ts + latency + PROFIT_REFRESH_BONUS_MS);
            } else if long_wallet_exposure >= long_unstuck_threshold {
                long_ladders.next_close_update = long_ladders
                    .next_close_update
                    .min(ts + latency + STUCK_REFRESH_BONUS_MS);
                long_ladders.next_entry_update = long_ladders
                    .next_entry_update
                    .min(ts + latency + STUCK_REFRESH_BONUS_MS);
            }
        }
        if params.short.enabled {
            if short.size == 0.0 {
                short_ladders.next_entry_update =
                    short_ladders.next_entry_update.min(ts + latency);
            } else if price < short.price {
                short_ladders.next_close_update = short_ladders
                    .next_close_update
                    .min(ts + latency + PROFIT_REFRESH_BONUS_MS);
            } else if short_wallet_exposure >= short_unstuck_threshold {
                short_ladders.next_close_update = short_ladders
                    .next_close_update
                    .min(ts + latency + STUCK_REFRESH_BONUS_MS);
                short_ladders.next_entry_update = short_ladders
                    .next_entry_update
                    .min(ts + latency + STUCK_REFRESH_BONUS_MS);
            }
        }
    }

    Ok(BacktestReport { fills, stats })
}
