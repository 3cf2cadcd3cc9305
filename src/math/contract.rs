//! Instrument arithmetic: cost/quantity conversion and per-side PnL.
//!
//! Linear contracts: cost = |qty| * price.
//! Inverse contracts: cost = |qty| / price * c_mult, so cost per unit scales
//! as 1/price. A zero price converts to zero instead of failing.

use crate::math::round::{round_step, round_up};
use crate::types::ExchangeParams;

#[inline]
pub fn cost_to_qty(cost: f64, price: f64, xp: &ExchangeParams) -> f64 {
    if xp.inverse {
        cost * price / xp.c_mult
    } else if price > 0.0 {
        cost / price
    } else {
        0.0
    }
}

#[inline]
pub fn qty_to_cost(qty: f64, price: f64, xp: &ExchangeParams) -> f64 {
    if xp.inverse {
        let per_unit = if price > 0.0 { (qty / price).abs() } else { 0.0 };
        per_unit * xp.c_mult
    } else {
        (qty * price).abs()
    }
}

/// Smallest admissible entry quantity at the given price: the exchange
/// minimum, raised to satisfy the minimum order cost on linear markets.
#[inline]
pub fn min_entry_qty(price: f64, xp: &ExchangeParams) -> f64 {
    if xp.inverse {
        xp.min_qty
    } else {
        let cost_floor = if price > 0.0 { xp.min_cost / price } else { 0.0 };
        xp.min_qty.max(round_up(cost_floor, xp.qty_step))
    }
}

#[inline]
pub fn long_pnl(entry_price: f64, close_price: f64, qty: f64, xp: &ExchangeParams) -> f64 {
    if xp.inverse {
        if entry_price == 0.0 || close_price == 0.0 {
            return 0.0;
        }
        qty.abs() * xp.c_mult * (1.0 / entry_price - 1.0 / close_price)
    } else {
        qty.abs() * (close_price - entry_price)
    }
}

#[inline]
pub fn short_pnl(entry_price: f64, close_price: f64, qty: f64, xp: &ExchangeParams) -> f64 {
    if xp.inverse {
        if entry_price == 0.0 || close_price == 0.0 {
            return 0.0;
        }
        qty.abs() * xp.c_mult * (1.0 / close_price - 1.0 / entry_price)
    } else {
        qty.abs() * (entry_price - close_price)
    }
}

/// Initial entry quantity: the configured fraction of the exposure budget,
/// floored at the instrument minimum.
pub fn initial_entry_qty(
    balance: f64,
    initial_entry_price: f64,
    wallet_exposure_limit: f64,
    initial_qty_pct: f64,
    xp: &ExchangeParams,
) -> f64 {
    min_entry_qty(initial_entry_price, xp).max(round_step(
        cost_to_qty(
            balance * wallet_exposure_limit * initial_qty_pct,
            initial_entry_price,
            xp,
        ),
        xp.qty_step,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn linear() -> ExchangeParams {
        ExchangeParams::default()
    }

    fn inverse() -> ExchangeParams {
        ExchangeParams {
            inverse: true,
            c_mult: 100.0,
            ..ExchangeParams::default()
        }
    }

    #[test]
    fn test_cost_qty_roundtrip_linear() {
        let xp = linear();
        for &(cost, price) in &[(50.0, 100.0), (1.0, 0.037), (12345.0, 250.5)] {
            let qty = cost_to_qty(cost, price, &xp);
            let back = qty_to_cost(qty, price, &xp);
            assert!(rel(back, cost) < 1e-9, "cost={} back={}", cost, back);
        }
    }

    #[test]
    fn test_cost_qty_roundtrip_inverse() {
        let xp = inverse();
        for &(cost, price) in &[(50.0, 100.0), (3.0, 9500.0)] {
            let qty = cost_to_qty(cost, price, &xp);
            let back = qty_to_cost(qty, price, &xp);
            assert!(rel(back, cost) < 1e-9, "cost={} back={}", cost, back);
        }
    }

    #[test]
    fn test_zero_price_conversions() {
        let xp = linear();
        assert_eq!(cost_to_qty(100.0, 0.0, &xp), 0.0);
        assert_eq!(qty_to_cost(100.0, 0.0, &xp), 0.0);
        let xp = inverse();
        assert_eq!(qty_to_cost(100.0, 0.0, &xp), 0.0);
    }

    /// Scenario: balance=10, price=100 — the cost-derived qty (0.0015 from
    /// 10*0.3*0.05/100) is below the 5-unit min_cost floor of 0.05.
    /// Expected: min_entry_qty wins and the clamp lands on 0.050.
    #[test]
    fn test_min_cost_clamp() {
        let xp = linear();
        assert_eq!(min_entry_qty(100.0, &xp), 0.05);
        let qty = initial_entry_qty(10.0, 100.0, 0.3, 0.05, &xp);
        assert_eq!(qty, 0.05);
    }

    #[test]
    fn test_initial_entry_qty_nominal() {
        let xp = linear();
        // 1000 * 0.3 * 0.05 / 100 = 0.15
        let qty = initial_entry_qty(1000.0, 100.0, 0.3, 0.05, &xp);
        assert_eq!(qty, 0.15);
    }

    #[test]
    fn test_min_entry_qty_inverse_is_exchange_min() {
        let xp = inverse();
        assert_eq!(min_entry_qty(100.0, &xp), xp.min_qty);
    }

    #[test]
    fn test_pnl_signs() {
        let xp = linear();
        assert_eq!(long_pnl(100.0, 110.0, 2.0, &xp), 20.0);
        assert_eq!(long_pnl(100.0, 90.0, 2.0, &xp), -20.0);
        assert_eq!(short_pnl(100.0, 90.0, 2.0, &xp), 20.0);
        assert_eq!(short_pnl(100.0, 110.0, 2.0, &xp), -20.0);
    }

    #[test]
    fn test_pnl_inverse() {
        let xp = inverse();
        // long inverse: |q| * c_mult * (1/entry - 1/close)
        let pnl = long_pnl(100.0, 125.0, 2.0, &xp);
        assert!(rel(pnl, 2.0 * 100.0 * (0.01 - 0.008)) < 1e-12);
        assert_eq!(long_pnl(0.0, 125.0, 2.0, &xp), 0.0);
        assert_eq!(short_pnl(100.0, 0.0, 2.0, &xp), 0.0);
    }

    fn rel(a: f64, b: f64) -> f64 {
        (a - b).abs() / b.abs().max(1e-12)
    }
}
