//! Position accounting: fill application, equity, bankruptcy price.

use crate::math::contract::{long_pnl, qty_to_cost, short_pnl};
use crate::math::round::{nan_to_0, round_step};
use crate::types::{ExchangeParams, Position};

/// Position after a fill of `qty` at `price`. The new average price is the
/// size-weighted mean of the old position and the fill; a fill that zeroes
/// the size resets the average price to zero.
pub fn apply_fill(pos: Position, qty: f64, price: f64, qty_step: f64) -> Position {
    if qty == 0.0 {
        return pos;
    }
    let new_size = round_step(pos.size + qty, qty_step);
    if new_size == 0.0 {
        return Position::FLAT;
    }
    Position {
        size: new_size,
        price: nan_to_0(pos.price) * (pos.size / new_size) + price * (qty / new_size),
    }
}

/// Wallet exposure the position would have after filling `qty` at `price`.
/// Works on magnitudes, so one body serves both sides.
pub fn wallet_exposure_if_filled(
    balance: f64,
    psize: f64,
    pprice: f64,
    qty: f64,
    price: f64,
    xp: &ExchangeParams,
) -> f64 {
    let psize = round_step(psize.abs(), xp.qty_step);
    let qty = round_step(qty.abs(), xp.qty_step);
    let pos = apply_fill(
        Position {
            size: psize,
            price: pprice,
        },
        qty,
        price,
        xp.qty_step,
    );
    qty_to_cost(pos.size, pos.price, xp) / balance
}

#[inline]
pub fn wallet_exposure(balance: f64, pos: Position, xp: &ExchangeParams) -> f64 {
    qty_to_cost(pos.size, pos.price, xp) / balance
}

/// Sum of both sides' unrealized PnL at the latest price.
pub fn unrealized_pnl(long: Position, short: Position, last_price: f64, xp: &ExchangeParams) -> f64 {
    long_pnl(long.price, last_price, long.size, xp)
        + short_pnl(short.price, last_price, short.size, xp)
}

/// Balance plus both sides' unrealized PnL at the latest price.
pub fn equity(
    balance: f64,
    long: Position,
    short: Position,
    last_price: f64,
    xp: &ExchangeParams,
) -> f64 {
    let mut equity = balance;
    if long.price != 0.0 && long.size != 0.0 {
        equity += long_pnl(long.price, last_price, long.size, xp);
    }
    if short.price != 0.0 && short.size != 0.0 {
        equity += short_pnl(short.price, last_price, short.size, xp);
    }
    equity
}

/// Price at which account equity reaches zero given both positions.
/// A degenerate denominator reports 0.0 ("never bankrupt on this alone");
/// the result is clamped at zero from below.
pub fn bankruptcy_price(
    balance: f64,
    long: Position,
    short: Position,
    xp: &ExchangeParams,
) -> f64 {
    let long_pprice = nan_to_0(long.price);
    let short_pprice = nan_to_0(short.price);
    let long_psize = long.size * xp.c_mult;
    let abs_short_psize = short.size.abs() * xp.c_mult;
    let bkr = if xp.inverse {
        let short_cost = if short_pprice > 0.0 {
            abs_short_psize / short_pprice
        } else {
            0.0
        };
        let long_cost = if long_pprice > 0.0 {
            long_psize / long_pprice
        } else {
            0.0
        };
        let denominator = short_cost - long_cost - balance;
        if denominator == 0.0 {
            return 0.0;
        }
        (abs_short_psize - long_psize) / denominator
    } else {
        let denominator = long_psize - abs_short_psize;
        if denominator == 0.0 {
            return 0.0;
        }
        (-balance + long_psize * long_pprice - abs_short_psize * short_pprice) / denominator
    };
    bkr.max(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn xp() -> ExchangeParams {
        ExchangeParams::default()
    }

    #[test]
    fn test_apply_fill_weighted_mean() {
        let pos = apply_fill(Position::FLAT, 1.0, 100.0, 0.001);
        assert_eq!(pos.size, 1.0);
        assert_eq!(pos.price, 100.0);
        let pos = apply_fill(pos, 1.0, 90.0, 0.001);
        assert_eq!(pos.size, 2.0);
        assert!((pos.price - 95.0).abs() < 1e-9);
        // 3:1 weighting
        let pos = apply_fill(pos, 2.0, 80.0, 0.001);
        assert_eq!(pos.size, 4.0);
        assert!((pos.price - 87.5).abs() < 1e-9);
    }

    #[test]
    fn test_apply_fill_zero_qty_is_identity() {
        let pos = Position {
            size: 1.5,
            price: 123.0,
        };
        assert_eq!(apply_fill(pos, 0.0, 999.0, 0.001), pos);
    }

    /// Round trip: open then fully close at any price returns to flat,
    /// including the average price reset.
    #[test]
    fn test_apply_fill_round_trip_resets() {
        let pos = apply_fill(Position::FLAT, 0.75, 100.0, 0.001);
        let flat = apply_fill(pos, -0.75, 123.45, 0.001);
        assert_eq!(flat, Position::FLAT);
    }

    #[test]
    fn test_apply_fill_bootstraps_nan_pprice() {
        let pos = Position {
            size: 0.0,
            price: f64::NAN,
        };
        let pos = apply_fill(pos, 1.0, 50.0, 0.001);
        assert_eq!(pos.price, 50.0);
    }

    #[test]
    fn test_short_fill_accumulation() {
        let pos = apply_fill(Position::FLAT, -1.0, 100.0, 0.001);
        let pos = apply_fill(pos, -1.0, 110.0, 0.001);
        assert_eq!(pos.size, -2.0);
        assert!((pos.price - 105.0).abs() < 1e-9);
    }

    #[test]
    fn test_wallet_exposure_if_filled() {
        let we = wallet_exposure_if_filled(1000.0, 0.0, 0.0, 1.0, 100.0, &xp());
        assert!((we - 0.1).abs() < 1e-9);
        let we = wallet_exposure_if_filled(1000.0, 1.0, 100.0, 1.0, 90.0, &xp());
        // 2 @ 95 -> 190 / 1000
        assert!((we - 0.19).abs() < 1e-9);
    }

    #[test]
    fn test_equity_both_sides() {
        let long = Position {
            size: 1.0,
            price: 100.0,
        };
        let short = Position {
            size: -2.0,
            price: 120.0,
        };
        // long: +10, short: +20 at price 110
        let eq = equity(1000.0, long, short, 110.0, &xp());
        assert!((eq - 1030.0).abs() < 1e-9);
        // flat sides contribute nothing
        assert_eq!(
            equity(1000.0, Position::FLAT, Position::FLAT, 110.0, &xp()),
            1000.0
        );
    }

    #[test]
    fn test_bankruptcy_price_linear_long_only() {
        // 10 @ 100 with balance 50: bkr = (-50 + 1000) / 10 = 95
        let long = Position {
            size: 10.0,
            price: 100.0,
        };
        let bkr = bankruptcy_price(50.0, long, Position::FLAT, &xp());
        assert!((bkr - 95.0).abs() < 1e-9);
    }

    #[test]
    fn test_bankruptcy_price_degenerate_denominator() {
        // balanced hedge: long size equals short size, denominator zero
        let long = Position {
            size: 1.0,
            price: 100.0,
        };
        let short = Position {
            size: -1.0,
            price: 110.0,
        };
        assert_eq!(bankruptcy_price(50.0, long, short, &xp()), 0.0);
        assert_eq!(
            bankruptcy_price(50.0, Position::FLAT, Position::FLAT, &xp()),
            0.0
        );
    }

    #[test]
    fn test_bankruptcy_price_clamped_at_zero() {
        // plenty of balance: raw bkr price would be negative
        let long = Position {
            size: 1.0,
            price: 100.0,
        };
        let bkr = bankruptcy_price(1000.0, long, Position::FLAT, &xp());
        assert_eq!(bkr, 0.0);
    }

    #[test]
    fn test_bankruptcy_price_inverse() {
        let xp = ExchangeParams {
            inverse: true,
            c_mult: 1.0,
            ..ExchangeParams::default()
        };
        let short = Position {
            size: -100.0,
            price: 100.0,
        };
        // short_cost = 1.0; denominator = 1.0 - 0 - 0.5 = 0.5; bkr = 100/0.5
        let bkr = bankruptcy_price(0.5, Position::FLAT, short, &xp);
        assert!((bkr - 200.0).abs() < 1e-9);
    }
}
