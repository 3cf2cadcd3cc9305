//! Close ladder planners.
//!
//! Close prices span `n_close_orders` markup points above (long) or below
//! (short) the position's average price; the position splits evenly across
//! them with the residual folded into the last order. When wallet exposure
//! has crossed the auto-unstuck threshold, a corrective close priced off
//! the EMA band is prepended. The short side carries extra behaviours:
//! a spot early-out, a breakeven full-close for dust positions, and an
//! adaptive remainder guard.

use crate::engine::solvers::close_qty_for_exposure_target;
use crate::config::SideParams;
use crate::math::contract::{cost_to_qty, min_entry_qty, qty_to_cost};
use crate::math::interp::linspace;
use crate::math::round::{round_dn, round_step, round_up};
use crate::telemetry::diag::DiagnosticSink;
use crate::types::{ExchangeParams, Order, OrderTag, Position, Side};

/// Breakeven markup covering the maker fee on a round trip.
const BREAKEVEN_MARKUP_SPOT: f64 = 0.0021;
const BREAKEVEN_MARKUP_FUTURES: f64 = 0.00041;

/// Long close ladder for the current position.
pub fn plan_long_closes(
    balance: f64,
    pos: Position,
    lowest_ask: f64,
    ema_band_upper: f64,
    xp: &ExchangeParams,
    sp: &SideParams,
    sink: &dyn DiagnosticSink,
) -> Vec<Order> {
    if pos.is_flat() {
        return vec![Order::EMPTY];
    }
    let minm = pos.price * (1.0 + sp.min_markup);
    let n = sp.n_close_orders.round() as usize;
    let mut close_prices: Vec<f64> = Vec::with_capacity(n);
    for p in linspace(
        minm,
        pos.price * (1.0 + sp.min_markup + sp.markup_range),
        n,
    ) {
        let price = round_up(p, xp.price_step);
        if price >= lowest_ask {
            close_prices.push(price);
        }
    }
    if close_prices.is_empty() {
        return vec![Order {
            qty: -pos.size,
            price: lowest_ask,
            tag: OrderTag::NormalClose(Side::Long),
        }];
    }

    let mut psize = round_dn(pos.size, xp.qty_step);
    let mut closes: Vec<Order> = Vec::new();

    let exposure = qty_to_cost(pos.size, pos.price, xp) / balance;
    let threshold = sp.wallet_exposure_limit * (1.0 - sp.auto_unstuck_wallet_exposure_threshold);
    if sp.auto_unstuck_wallet_exposure_threshold != 0.0 && exposure > threshold {
        let unstuck_price = lowest_ask.max(round_up(
            ema_band_upper * (1.0 + sp.auto_unstuck_ema_dist),
            xp.price_step,
        ));
        if unstuck_price < close_prices[0] {
            let unstuck_qty = close_qty_for_exposure_target(
                Side::Long,
                balance,
                psize,
                pos.price,
                threshold * 1.01,
                unstuck_price,
                xp,
                sink,
            )
            .value;
            let min_eqty = min_entry_qty(unstuck_price, xp);
            if unstuck_qty >= min_eqty {
                psize = round_step(psize - unstuck_qty, xp.qty_step);
                if psize < min_eqty {
                    // residual would be dust: close the whole position
                    return vec![Order {
                        qty: -round_dn(pos.size, xp.qty_step),
                        price: unstuck_price,
                        tag: OrderTag::UnstuckClose(Side::Long),
                    }];
                }
                closes.push(Order {
                    qty: -unstuck_qty,
                    price: unstuck_price,
                    tag: OrderTag::UnstuckClose(Side::Long),
                });
            }
        }
    }

    if close_prices.len() == 1 {
        if psize >= min_entry_qty(close_prices[0], xp) {
            closes.push(Order {
                qty: -psize,
                price: close_prices[0],
                tag: OrderTag::NormalClose(Side::Long),
            });
        }
        return closes;
    }

    let default_close_qty = round_dn(psize / close_prices.len() as f64, xp.qty_step);
    for &price in &close_prices[..close_prices.len() - 1] {
        let min_close_qty = min_entry_qty(price, xp);
        if psize < min_close_qty {
            break;
        }
        let close_qty = psize.min(min_close_qty.max(default_close_qty));
        closes.push(Order {
            qty: -close_qty,
            price,
            tag: OrderTag::NormalClose(Side::Long),
        });
        psize = round_step(psize - close_qty, xp.qty_step);
    }
    let last_price = close_prices[close_prices.len() - 1];
    if psize >= min_entry_qty(last_price, xp) {
        closes.push(Order {
            qty: -psize,
            price: last_price,
            tag: OrderTag::NormalClose(Side::Long),
        });
    } else if let Some(last) = closes.last_mut() {
        last.qty = -round_step(last.qty.abs() + psize, xp.qty_step);
    }
    closes
}

/// Short close ladder for the current position.
pub fn plan_short_closes(
    balance: f64,
    pos: Position,
    highest_bid: f64,
    ema_band_lower: f64,
    xp: &ExchangeParams,
    sp: &SideParams,
    sink: &dyn DiagnosticSink,
) -> Vec<Order> {
    if pos.is_flat() {
        return vec![Order::EMPTY];
    }
    let minm = pos.price * (1.0 - sp.min_markup);
    let mut abs_psize = pos.size.abs();
    if xp.spot && round_dn(abs_psize, xp.qty_step) < min_entry_qty(minm, xp) {
        return vec![Order::EMPTY];
    }
    if abs_psize
        < cost_to_qty(balance, pos.price, xp)
            * sp.wallet_exposure_limit
            * sp.initial_qty_pct
            * 0.5
    {
        // dust below half the initial quantity: close everything at
        // breakeven or better
        let breakeven_markup = if xp.spot {
            BREAKEVEN_MARKUP_SPOT
        } else {
            BREAKEVEN_MARKUP_FUTURES
        };
        let close_price =
            highest_bid.min(round_dn(pos.price * (1.0 - breakeven_markup), xp.price_step));
        return vec![Order {
            qty: round_step(abs_psize, xp.qty_step),
            price: close_price,
            tag: OrderTag::NormalClose(Side::Short),
        }];
    }
    let n = sp.n_close_orders.round() as usize;
    let mut close_prices: Vec<f64> = Vec::with_capacity(n);
    for p in linspace(
        minm,
        pos.price * (1.0 - sp.min_markup - sp.markup_range),
        n,
    ) {
        let price = round_dn(p, xp.price_step);
        if price <= highest_bid {
            close_prices.push(price);
        }
    }
    if close_prices.is_empty() {
        return vec![Order {
            qty: round_step(abs_psize, xp.qty_step),
            price: highest_bid,
            tag: OrderTag::NormalClose(Side::Short),
        }];
    }
    if close_prices.len() == 1 {
        return vec![Order {
            qty: round_step(abs_psize, xp.qty_step),
            price: close_prices[0],
            tag: OrderTag::NormalClose(Side::Short),
        }];
    }

    let mut closes: Vec<Order> = Vec::new();
    let exposure = qty_to_cost(pos.size, pos.price, xp) / balance;
    let threshold = sp.wallet_exposure_limit * (1.0 - sp.auto_unstuck_wallet_exposure_threshold);
    if sp.auto_unstuck_wallet_exposure_threshold != 0.0 && exposure > threshold {
        let unstuck_price = highest_bid.min(round_dn(
            ema_band_lower * (1.0 - sp.auto_unstuck_ema_dist),
            xp.price_step,
        ));
        if unstuck_price > close_prices[0] {
            let unstuck_qty = close_qty_for_exposure_target(
                Side::Short,
                balance,
                pos.size,
                pos.price,
                threshold * 1.01,
                unstuck_price,
                xp,
                sink,
            )
            .value;
            if unstuck_qty >= min_entry_qty(unstuck_price, xp) {
                closes.push(Order {
                    qty: unstuck_qty,
                    price: unstuck_price,
                    tag: OrderTag::UnstuckClose(Side::Short),
                });
                abs_psize = 0.0_f64.max(round_step(abs_psize - unstuck_qty, xp.qty_step));
            }
        }
    }

    let min_close_qty = min_entry_qty(close_prices[0], xp);
    let default_qty = round_dn(abs_psize / close_prices.len() as f64, xp.qty_step);
    if default_qty == 0.0 {
        return vec![Order {
            qty: round_step(abs_psize, xp.qty_step),
            price: close_prices[0],
            tag: OrderTag::NormalClose(Side::Short),
        }];
    }
    let default_qty = min_close_qty.max(default_qty);
    let mut remaining = round_step(abs_psize, xp.qty_step);
    for &close_price in &close_prices {
        // stop once the remainder is too small to be worth another order
        let enough_left = min_close_qty
            .max(
                cost_to_qty(balance, close_price, xp)
                    * sp.wallet_exposure_limit
                    * sp.initial_qty_pct
                    * 0.5,
            )
            .max(default_qty * 0.5);
        if remaining < enough_left {
            break;
        }
        let close_qty = remaining.min(default_qty.max(min_close_qty));
        closes.push(Order {
            qty: close_qty,
            price: close_price,
            tag: OrderTag::NormalClose(Side::Short),
        });
        remaining = round_step(remaining - close_qty, xp.qty_step);
    }
    if remaining != 0.0 {
        if let Some(last) = closes.last_mut() {
            last.qty = round_step(last.qty + remaining, xp.qty_step);
        } else {
            closes = vec![Order {
                qty: abs_psize,
                price: close_prices[0],
                tag: OrderTag::NormalClose(Side::Short),
            }];
        }
    }
    closes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::diag::NullSink;

    fn xp() -> ExchangeParams {
        ExchangeParams::default()
    }

    fn sp() -> SideParams {
        SideParams {
            wallet_exposure_limit: 0.3,
            initial_qty_pct: 0.05,
            min_markup: 0.005,
            markup_range: 0.01,
            n_close_orders: 5.0,
            ..SideParams::default()
        }
    }

    #[test]
    fn test_flat_position_emits_empty() {
        let orders = plan_long_closes(
            1000.0,
            Position::FLAT,
            100.0,
            100.0,
            &xp(),
            &sp(),
            &NullSink,
        );
        assert_eq!(orders, vec![Order::EMPTY]);
        let orders = plan_short_closes(
            1000.0,
            Position::FLAT,
            100.0,
            100.0,
            &xp(),
            &sp(),
            &NullSink,
        );
        assert_eq!(orders, vec![Order::EMPTY]);
    }

    /// The ladder splits the position across ascending markup prices and
    /// the quantities sum back to the full size.
    #[test]
    fn test_long_close_ladder_sums_to_position() {
        let pos = Position {
            size: 1.0,
            price: 100.0,
        };
        let orders = plan_long_closes(1000.0, pos, 100.0, 100.0, &xp(), &sp(), &NullSink);
        assert!(orders.len() > 1);
        let total: f64 = orders.iter().map(|o| o.qty).sum();
        assert!((total + 1.0).abs() < 1e-9, "total {}", total);
        for order in &orders {
            assert!(order.qty < 0.0);
            assert!(order.price > 100.0 * 1.005 - 0.01);
            assert_eq!(order.tag, OrderTag::NormalClose(Side::Long));
        }
        for w in orders.windows(2) {
            assert!(w[1].price > w[0].price, "ladder ascends");
        }
    }

    /// Every markup point below the ask filters out: fall back to one
    /// whole-position close at the ask.
    #[test]
    fn test_long_close_all_filtered_closes_at_ask() {
        let pos = Position {
            size: 1.0,
            price: 100.0,
        };
        let lowest_ask = 200.0;
        let orders = plan_long_closes(1000.0, pos, lowest_ask, 100.0, &xp(), &sp(), &NullSink);
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].qty, -1.0);
        assert_eq!(orders[0].price, 200.0);
    }

    #[test]
    fn test_long_unstuck_close_is_prepended() {
        let params = SideParams {
            auto_unstuck_wallet_exposure_threshold: 0.5,
            auto_unstuck_ema_dist: 0.0,
            ..sp()
        };
        // exposure 0.25 > threshold 0.3*0.5 = 0.15
        let pos = Position {
            size: 2.5,
            price: 100.0,
        };
        // band upper well below the markup ladder so the unstuck close
        // price undercuts close_prices[0]
        let orders = plan_long_closes(1000.0, pos, 100.0, 100.0, &xp(), &params, &NullSink);
        assert!(orders.len() >= 2);
        assert_eq!(orders[0].tag, OrderTag::UnstuckClose(Side::Long));
        assert!(orders[0].qty < 0.0);
        assert!(orders[0].price < orders[1].price);
        let total: f64 = orders.iter().map(|o| o.qty).sum();
        assert!((total + 2.5).abs() < 1e-9, "total {}", total);
    }

    #[test]
    fn test_short_close_ladder_descends_below_pprice() {
        let pos = Position {
            size: -1.0,
            price: 100.0,
        };
        let orders = plan_short_closes(1000.0, pos, 100.0, 100.0, &xp(), &sp(), &NullSink);
        assert!(orders.len() > 1);
        let total: f64 = orders.iter().map(|o| o.qty).sum();
        assert!((total - 1.0).abs() < 1e-9, "total {}", total);
        for order in &orders {
            assert!(order.qty > 0.0);
            assert!(order.price < 100.0);
        }
        for w in orders.windows(2) {
            assert!(w[1].price < w[0].price, "ladder descends");
        }
    }

    /// Scenario: short position smaller than half the initial quantity
    /// (0.01 vs balance-derived initial of 0.15).
    /// Expected: one whole-position close at the futures breakeven markup.
    #[test]
    fn test_short_breakeven_dust_close() {
        let pos = Position {
            size: -0.01,
            price: 100.0,
        };
        let orders = plan_short_closes(1000.0, pos, 100.0, 100.0, &xp(), &sp(), &NullSink);
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].qty, 0.01);
        let expected = round_dn(100.0 * (1.0 - BREAKEVEN_MARKUP_FUTURES), 0.01);
        assert_eq!(orders[0].price, expected.min(100.0));
    }

    /// Spot markets cannot close dust below the instrument minimum at all.
    #[test]
    fn test_short_spot_early_out() {
        let spot_xp = ExchangeParams {
            spot: true,
            ..ExchangeParams::default()
        };
        let pos = Position {
            size: -0.01,
            price: 100.0,
        };
        let orders = plan_short_closes(1000.0, pos, 100.0, 100.0, &spot_xp, &sp(), &NullSink);
        assert_eq!(orders, vec![Order::EMPTY]);
    }

    #[test]
    fn test_short_close_all_filtered_closes_at_bid() {
        let pos = Position {
            size: -1.0,
            price: 100.0,
        };
        // bid far below every markup point
        let orders = plan_short_closes(1000.0, pos, 50.0, 100.0, &xp(), &sp(), &NullSink);
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].price, 50.0);
        assert_eq!(orders[0].qty, 1.0);
    }

    #[test]
    fn test_short_unstuck_close_above_ladder() {
        let params = SideParams {
            auto_unstuck_wallet_exposure_threshold: 0.5,
            auto_unstuck_ema_dist: 0.0,
            ..sp()
        };
        let pos = Position {
            size: -2.5,
            price: 100.0,
        };
        // band lower above the markup ladder so the unstuck price clears
        // close_prices[0]
        let orders = plan_short_closes(1000.0, pos, 100.0, 100.0, &xp(), &params, &NullSink);
        assert!(orders.len() >= 2);
        assert_eq!(orders[0].tag, OrderTag::UnstuckClose(Side::Short));
        assert!(orders[0].qty > 0.0);
        assert!(orders[0].price > orders[1].price);
    }

    #[test]
    fn test_close_quantities_are_step_multiples() {
        let pos = Position {
            size: 1.2345,
            price: 100.0,
        };
        let orders = plan_long_closes(1000.0, pos, 100.0, 100.0, &xp(), &sp(), &NullSink);
        for order in &orders {
            let steps = order.qty / xp().qty_step;
            assert!(
                (steps - steps.round()).abs() < 1e-6,
                "qty {} not a step multiple",
                order.qty
            );
        }
    }
}
