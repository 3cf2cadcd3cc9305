//! Entry ladder construction and the runtime entry planner.
//!
//! A ladder is built in three layers:
//!   1. `GridShape::eval` lays a geometric price ladder and derives each
//!      node's quantity analytically from the average-price drift equation.
//!   2. The exposure-weighting solver picks the drift weighting so the
//!      terminal node lands on the wallet exposure limit, then the whole-grid
//!      builder appends the optional secondary tranche.
//!   3. The approximator matches a live position onto that ladder and
//!      returns the unfilled tail.
//! The planner turns the tail into concrete orders against the current
//! quotes and EMA band.

use crate::engine::position::{apply_fill, wallet_exposure};
use crate::engine::solvers::entry_qty_for_exposure_target;
use crate::engine::ContractError;
use crate::config::SideParams;
use crate::math::contract::{cost_to_qty, initial_entry_qty, min_entry_qty, qty_to_cost};
use crate::math::interp::{interpolate, linspace};
use crate::math::round::{rel_diff, round_dn, round_step, round_up};
use crate::telemetry::diag::DiagnosticSink;
use crate::types::{ExchangeParams, GridNode, Order, OrderTag, Position, Side};

const WEIGHTING_MAX_ITERS: usize = 20;
const WEIGHTING_TOLERANCE: f64 = 0.01;

/// `n` values from `start` to `end`: linear when `base == 1`, otherwise the
/// normalised geometric sequence base^i mapped onto [start, end].
pub fn basespace(start: f64, end: f64, base: f64, n: usize) -> Vec<f64> {
    if base == 1.0 {
        return linspace(start, end, n);
    }
    let a: Vec<f64> = (0..n).map(|i| base.powi(i as i32)).collect();
    let lo = a.iter().copied().fold(f64::INFINITY, f64::min);
    let hi = a.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    a.into_iter()
        .map(|x| (x - lo) / (hi - lo) * (end - start) + start)
        .collect()
}

/// Quantity that moves the average price to satisfy the drift equation
/// `(pprice_new - price) / price = d` at the node price, solved analytically.
fn drift_entry_qty(side: Side, psize: f64, pprice: f64, entry_price: f64, d: f64) -> f64 {
    match side {
        Side::Long => -(psize * (entry_price * d + entry_price - pprice)) / (entry_price * d),
        Side::Short => -((psize * (entry_price * (d - 1.0) + pprice)) / (entry_price * d)),
    }
}

/// One candidate ladder configuration. The exposure limit and initial
/// quantity fraction here may already be primary-tranche adjusted.
struct GridShape<'a> {
    side: Side,
    balance: f64,
    initial_entry_price: f64,
    wallet_exposure_limit: f64,
    initial_qty_pct: f64,
    grid_span: f64,
    eprice_pprice_diff: f64,
    eprice_exp_base: f64,
    max_n_entry_orders: usize,
    eprices: Option<&'a [f64]>,
    prev_pprice: Option<f64>,
    xp: &'a ExchangeParams,
}

impl GridShape<'_> {
    /// Lay the full ladder for a given drift weighting. Nodes whose derived
    /// quantity falls below the instrument minimum get quantity zero but
    /// keep their slot.
    fn eval(&self, weighting: f64) -> Vec<GridNode> {
        let xp = self.xp;
        let prices: Vec<f64> = match self.eprices {
            Some(eprices) => eprices.to_vec(),
            None => {
                let span_end = match self.side {
                    Side::Long => self.initial_entry_price * (1.0 - self.grid_span),
                    Side::Short => self.initial_entry_price * (1.0 + self.grid_span),
                };
                basespace(
                    self.initial_entry_price,
                    span_end,
                    self.eprice_exp_base,
                    self.max_n_entry_orders,
                )
                .into_iter()
                .map(|p| match self.side {
                    Side::Long => round_dn(p, xp.price_step),
                    Side::Short => round_up(p, xp.price_step),
                })
                .collect()
            }
        };
        let mut grid = Vec::with_capacity(prices.len() + 1);
        if prices.is_empty() {
            return grid;
        }

        let iqty = min_entry_qty(prices[0], xp).max(round_step(
            cost_to_qty(
                self.balance * self.wallet_exposure_limit * self.initial_qty_pct,
                self.initial_entry_price,
                xp,
            ),
            xp.qty_step,
        ));
        let qty = self.side.sign() * iqty;
        let mut psize = qty;
        let mut pprice = self.prev_pprice.unwrap_or(prices[0]);
        grid.push(GridNode {
            qty,
            price: prices[0],
            psize,
            pprice,
            wallet_exposure: qty_to_cost(psize, pprice, xp) / self.balance,
        });

        for &price in &prices[1..] {
            let prev_exposure = grid[grid.len() - 1].wallet_exposure;
            let adjusted_diff = self.eprice_pprice_diff * (1.0 + prev_exposure * weighting);
            let mut qty = round_step(
                drift_entry_qty(self.side, psize, pprice, price, adjusted_diff),
                xp.qty_step,
            );
            if self.side.sign() * qty < min_entry_qty(price, xp) {
                qty = 0.0;
            }
            let pos = apply_fill(
                Position {
                    size: psize,
                    price: pprice,
                },
                qty,
                price,
                xp.qty_step,
            );
            psize = pos.size;
            pprice = pos.price;
            grid.push(GridNode {
                qty,
                price,
                psize,
                pprice,
                wallet_exposure: qty_to_cost(psize, pprice, xp) / self.balance,
            });
        }
        grid
    }

    fn terminal_exposure(&self, weighting: f64) -> f64 {
        match self.eval(weighting).last() {
            Some(node) => node.wallet_exposure,
            None => 0.0,
        }
    }

    /// Pick the drift weighting whose ladder terminates on the exposure
    /// limit. Brackets between zero (too little exposure) and progressively
    /// 1e3 / 1e4 / 1e5 (too much), seeds one interpolation, then bisects.
    fn solve_weighting(&self) -> f64 {
        let limit = self.wallet_exposure_limit;
        let mut guess = 0.0;
        let mut val = self.terminal_exposure(guess);
        if val < limit {
            return guess;
        }
        let mut too_low = (guess, val);
        guess = 1_000.0;
        val = self.terminal_exposure(guess);
        if val > limit {
            guess = 10_000.0;
            val = self.terminal_exposure(guess);
            if val > limit {
                guess = 100_000.0;
                val = self.terminal_exposure(guess);
                if val > limit {
                    return guess;
                }
            }
        }
        let mut too_high = (guess, val);

        guess = interpolate(
            limit,
            &[too_low.0, too_high.0],
            &[too_low.1, too_high.1],
        );
        val = self.terminal_exposure(guess);
        if val < limit {
            too_high = (guess, val);
        } else {
            too_low = (guess, val);
        }

        let mut best = ((val - limit).abs() / limit, guess);
        let mut old_guess = 0.0;
        let mut i = 0;
        loop {
            i += 1;
            let diff = (val - limit).abs() / limit;
            if diff < best.0 {
                best = (diff, guess);
            }
            if diff < WEIGHTING_TOLERANCE {
                return best.1;
            }
            if i >= WEIGHTING_MAX_ITERS
                || (old_guess - guess).abs() / guess < WEIGHTING_TOLERANCE * 0.1
            {
                return best.1;
            }
            old_guess = guess;
            guess = (too_high.0 + too_low.0) / 2.0;
            val = self.terminal_exposure(guess);
            if val < limit {
                too_high = (guess, val);
            } else {
                too_low = (guess, val);
            }
        }
    }
}

/// Full ladder from a hypothetical initial entry price: primary tranche
/// with self-calibrated weighting plus the optional secondary tail node,
/// filtered to nodes with a live quantity.
#[allow(clippy::too_many_arguments)]
pub fn whole_entry_grid(
    side: Side,
    balance: f64,
    initial_entry_price: f64,
    xp: &ExchangeParams,
    sp: &SideParams,
    eprices: Option<&[f64]>,
    prev_pprice: Option<f64>,
    sink: &dyn DiagnosticSink,
) -> Result<Vec<GridNode>, ContractError> {
    let mut secondary_allocation = sp.secondary_allocation;
    if secondary_allocation <= 0.05 {
        // ignore tail tranches below 5%
        secondary_allocation = 0.0;
    } else if secondary_allocation >= 1.0 {
        return Err(ContractError::SecondaryAllocation(secondary_allocation));
    }
    let primary_allocation = 1.0 - secondary_allocation;
    let shape = GridShape {
        side,
        balance,
        initial_entry_price,
        wallet_exposure_limit: sp.wallet_exposure_limit * primary_allocation,
        initial_qty_pct: sp.initial_qty_pct / primary_allocation,
        grid_span: sp.grid_span,
        eprice_pprice_diff: sp.eprice_pprice_diff,
        eprice_exp_base: sp.eprice_exp_base,
        max_n_entry_orders: sp.max_n_entry_orders,
        eprices,
        prev_pprice,
        xp,
    };
    let weighting = shape.solve_weighting();
    let mut grid = shape.eval(weighting);

    if secondary_allocation > 0.0 {
        if let Some(last) = grid.last().copied() {
            let entry_price = match side {
                Side::Long => {
                    round_dn(last.pprice * (1.0 - sp.secondary_pprice_diff), xp.price_step)
                        .min(last.price)
                }
                Side::Short => {
                    round_up(last.pprice * (1.0 + sp.secondary_pprice_diff), xp.price_step)
                        .max(last.price)
                }
            };
            let qty = side.sign()
                * entry_qty_for_exposure_target(
                    balance,
                    last.psize,
                    last.pprice,
                    sp.wallet_exposure_limit,
                    entry_price,
                    xp,
                    sink,
                )
                .value;
            let pos = apply_fill(
                Position {
                    size: last.psize,
                    price: last.pprice,
                },
                qty,
                entry_price,
                xp.qty_step,
            );
            grid.push(GridNode {
                qty,
                price: entry_price,
                psize: pos.size,
                pprice: pos.price,
                wallet_exposure: qty_to_cost(pos.size, pos.price, xp) / balance,
            });
        }
    }
    grid.retain(|node| match side {
        Side::Long => node.qty > 0.0,
        Side::Short => node.qty < 0.0,
    });
    Ok(grid)
}

/// Ladder tail for a live position: rebuild candidate ladders until one
/// node's cumulative size matches the position, then return everything
/// after it. A position matching no node is treated as a partial fill of
/// the first node that exceeds it.
pub fn approximate_grid(
    side: Side,
    balance: f64,
    pos: Position,
    xp: &ExchangeParams,
    sp: &SideParams,
    sink: &dyn DiagnosticSink,
) -> Result<Vec<GridNode>, ContractError> {
    if pos.price == 0.0 {
        return Err(ContractError::MissingPositionPrice);
    }
    if pos.is_flat() {
        return whole_entry_grid(side, balance, pos.price, xp, sp, None, None, sink);
    }
    let abs_psize = pos.size.abs();
    let step = xp.qty_step;

    // rebuild from a guessed initial entry price, reporting the node whose
    // cumulative size is closest to the target position
    let eval_at = |ientry_price_guess: f64,
                   target_psize: f64|
     -> Result<(Vec<GridNode>, f64, usize), ContractError> {
        let guess = round_step(ientry_price_guess, xp.price_step);
        let grid = whole_entry_grid(side, balance, guess, xp, sp, None, None, sink)?;
        let abs_target = target_psize.abs();
        let mut best = (f64::INFINITY, 0usize);
        for (i, node) in grid.iter().enumerate() {
            let d = (node.psize.abs() - abs_target).abs() / abs_target;
            if d < best.0 {
                best = (d, i);
            }
        }
        Ok((grid, best.0, best.1))
    };

    let (grid, _diff, i) = eval_at(pos.price, pos.size)?;
    let (grid, diff, i) = eval_at(pos.price * (pos.price / grid[i].pprice), pos.size)?;
    if diff < 0.01 {
        // good match: one refinement, then drop the filled prefix
        let (grid, _diff, i) = eval_at(grid[0].price * (pos.price / grid[i].pprice), pos.size)?;
        return Ok(grid[i + 1..].to_vec());
    }

    // no close match: treat the position as a partial fill of the first
    // node whose cumulative size exceeds it
    let mut grid = grid;
    let mut k = 0;
    while k + 1 < grid.len() && grid[k].psize.abs() <= abs_psize * 0.99999 {
        k += 1;
    }
    if k == 0 {
        // position smaller than even the initial quantity: shrink it
        let min_iqty = min_entry_qty(grid[0].price, xp);
        grid[0].qty = match side {
            Side::Long => min_iqty.max(round_step(grid[0].qty - pos.size, step)),
            Side::Short => -min_iqty.max(round_step(grid[0].qty.abs() - abs_psize, step)),
        };
        grid[0].psize = round_step(pos.size + grid[0].qty, step);
        grid[0].wallet_exposure = qty_to_cost(grid[0].psize, grid[0].pprice, xp) / balance;
        return Ok(grid);
    }
    if k == grid.len() {
        // position has outgrown the ladder's capacity
        return Ok(Vec::new());
    }
    for _ in 0..5 {
        // rebuild as if the partial fill were a full fill, until the
        // matched node stabilises
        let remaining_qty = round_step(grid[k].psize - pos.size, step);
        let npos = apply_fill(pos, remaining_qty, grid[k].price, step);
        let (g, _diff, _i) = eval_at(npos.price, npos.size)?;
        grid = g;
        if k >= grid.len() {
            k = grid.len().saturating_sub(1);
            continue;
        }
        let (g, _diff, _i) = eval_at(npos.price * (npos.price / grid[k].pprice), npos.size)?;
        grid = g;
        k = 0;
        while k + 1 < grid.len() && grid[k].psize.abs() <= abs_psize * 0.99999 {
            k += 1;
        }
    }
    let min_qty_k = min_entry_qty(grid[k].price, xp);
    grid[k].qty = match side {
        Side::Long => min_qty_k.max(round_step(grid[k].psize - pos.size, step)),
        Side::Short => -min_qty_k.max(round_step(grid[k].psize.abs() - abs_psize, step)),
    };
    Ok(grid[k..].to_vec())
}

fn initial_entry_price(
    side: Side,
    opposing_quote: f64,
    ema_band_extremum: f64,
    ema_dist: f64,
    xp: &ExchangeParams,
) -> f64 {
    match side {
        Side::Long => {
            opposing_quote.min(round_dn(ema_band_extremum * (1.0 - ema_dist), xp.price_step))
        }
        Side::Short => {
            opposing_quote.max(round_up(ema_band_extremum * (1.0 + ema_dist), xp.price_step))
        }
    }
}

/// Runtime entry planner: current state in, concrete entry ladder out.
/// `opposing_quote` is the highest bid for longs, lowest ask for shorts;
/// `ema_band_extremum` the band minimum for longs, maximum for shorts.
#[allow(clippy::too_many_arguments)]
pub fn plan_entries(
    side: Side,
    balance: f64,
    pos: Position,
    opposing_quote: f64,
    ema_band_extremum: f64,
    xp: &ExchangeParams,
    sp: &SideParams,
    sink: &dyn DiagnosticSink,
) -> Result<Vec<Order>, ContractError> {
    let min_eqty = min_entry_qty(opposing_quote, xp);
    let abs_psize = pos.size.abs();
    if !sp.enabled && abs_psize <= min_eqty {
        return Ok(vec![Order::EMPTY]);
    }

    if pos.is_flat() {
        let entry_price = initial_entry_price(
            side,
            opposing_quote,
            ema_band_extremum,
            sp.initial_eprice_ema_dist,
            xp,
        );
        let qty = initial_entry_qty(
            balance,
            entry_price,
            sp.wallet_exposure_limit,
            sp.initial_qty_pct,
            xp,
        );
        return Ok(vec![Order {
            qty: side.sign() * qty,
            price: entry_price,
            tag: OrderTag::InitialEntry(side),
        }]);
    }

    let exposure = wallet_exposure(balance, pos, xp);
    if exposure >= sp.wallet_exposure_limit {
        return Ok(vec![Order::EMPTY]);
    }

    if sp.auto_unstuck_wallet_exposure_threshold != 0.0 {
        let threshold = sp.wallet_exposure_limit
            * (1.0 - sp.auto_unstuck_wallet_exposure_threshold)
            * 0.99;
        if exposure > threshold {
            let unstuck_price = initial_entry_price(
                side,
                opposing_quote,
                ema_band_extremum,
                sp.auto_unstuck_ema_dist,
                xp,
            );
            let qty = entry_qty_for_exposure_target(
                balance,
                pos.size,
                pos.price,
                sp.wallet_exposure_limit,
                unstuck_price,
                xp,
                sink,
            )
            .value;
            return Ok(vec![Order {
                qty: side.sign() * qty,
                price: unstuck_price,
                tag: OrderTag::UnstuckEntry(side),
            }]);
        }
    }

    let mut grid = approximate_grid(side, balance, pos, xp, sp, sink)?;
    if grid.is_empty() {
        return Ok(vec![Order::EMPTY]);
    }

    if rel_diff(grid[0].pprice, grid[0].price) < 1e-5 {
        // head coincides with the average price: the initial entry was
        // partially filled, so re-plan it against the band
        let entry_price = initial_entry_price(
            side,
            opposing_quote,
            ema_band_extremum,
            sp.initial_eprice_ema_dist,
            xp,
        );
        let min_eqty = min_entry_qty(entry_price, xp);
        let max_eqty = round_step(
            cost_to_qty(
                balance * sp.wallet_exposure_limit * sp.initial_qty_pct,
                entry_price,
                xp,
            ),
            xp.qty_step,
        );
        let entry_qty = side.sign() * min_eqty.max(max_eqty.min(grid[0].qty.abs()));
        if qty_to_cost(entry_qty, entry_price, xp) / balance > sp.wallet_exposure_limit * 1.1 {
            sink.warn(&format!(
                "abnormally large partial initial entry: qty={} price={} balance={} \
                 psize={} pprice={} quote={} limit={}\ngrid: {:?}",
                entry_qty,
                entry_price,
                balance,
                pos.size,
                pos.price,
                opposing_quote,
                sp.wallet_exposure_limit,
                grid,
            ));
        }
        return Ok(vec![Order {
            qty: entry_qty,
            price: entry_price,
            tag: OrderTag::InitialEntry(side),
        }]);
    }

    let mut entries: Vec<Order> = Vec::new();
    let n = grid.len();
    for i in 0..n {
        match side {
            Side::Long => {
                // skip nodes not meaningfully beyond the current position
                if grid[i].psize < pos.size * 1.05 || grid[i].price > pos.price * 0.9995 {
                    continue;
                }
                if grid[i].wallet_exposure > sp.wallet_exposure_limit * 1.01 {
                    break;
                }
            }
            Side::Short => {
                if grid[i].psize > pos.size * 1.05 || grid[i].price < pos.price * 0.9995 {
                    continue;
                }
            }
        }
        let entry_price = match side {
            Side::Long => opposing_quote.min(grid[i].price),
            Side::Short => opposing_quote.max(grid[i].price),
        };
        let min_eqty = min_entry_qty(entry_price, xp);
        grid[i].price = entry_price;
        grid[i].qty = match side {
            Side::Long => min_eqty.max(grid[i].qty),
            Side::Short => -min_eqty.max(grid[i].qty.abs()),
        };
        let tag = if i == n - 1 && sp.secondary_allocation > 0.05 {
            OrderTag::SecondaryRentry(side)
        } else {
            OrderTag::PrimaryRentry(side)
        };
        let dedup = entries
            .last()
            .map(|last| last.price == entry_price)
            .unwrap_or(false);
        if !dedup {
            entries.push(Order {
                qty: grid[i].qty,
                price: grid[i].price,
                tag,
            });
        }
    }
    Ok(if entries.is_empty() {
        vec![Order::EMPTY]
    } else {
        entries
    })
}
