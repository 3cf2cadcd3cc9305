//! Secant-style inverters for position accounting.
//!
//! Both solvers share a structure: seed two guesses, evaluate the exposure
//! error, then iterate up to 15 rounds of linear interpolation in
//! (value -> guess) space with tie-break bumps when successive guesses or
//! values coincide. They stop early once relative error drops below 4% and
//! otherwise return the best guess seen.

use crate::engine::position::wallet_exposure_if_filled;
use crate::math::contract::{long_pnl, qty_to_cost, short_pnl};
use crate::math::interp::interpolate;
use crate::math::round::{round_dynamic, round_step};
use crate::telemetry::diag::DiagnosticSink;
use crate::types::{ExchangeParams, Side};

/// Solver result: the best guess plus its relative error. Divergence is a
/// quality downgrade, not a failure — simulation continues on `value`.
#[derive(Clone, Copy, Debug)]
pub struct SolverOutcome {
    pub value: f64,
    pub rel_err: f64,
}

impl SolverOutcome {
    const DIVERGENCE_THRESHOLD: f64 = 0.15;

    fn exact(value: f64) -> Self {
        Self {
            value,
            rel_err: 0.0,
        }
    }

    pub fn diverged(&self) -> bool {
        self.rel_err > Self::DIVERGENCE_THRESHOLD
    }
}

const MAX_ITERS: usize = 15;
const CLOSE_ENOUGH: f64 = 0.04;

fn best_outcome(evals: &[f64], guesses: &[f64]) -> SolverOutcome {
    let mut best = (evals[0], guesses[0]);
    for i in 1..evals.len() {
        if evals[i] < best.0 || (evals[i] == best.0 && guesses[i] < best.1) {
            best = (evals[i], guesses[i]);
        }
    }
    SolverOutcome {
        value: best.1,
        rel_err: best.0,
    }
}

fn trace(guesses: &[f64], vals: &[f64], evals: &[f64]) -> String {
    guesses
        .iter()
        .zip(vals)
        .zip(evals)
        .map(|((g, v), e)| {
            format!("({}, {}, {})", g, round_dynamic(*v, 4), round_dynamic(*e, 4))
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Close quantity `q in [0, |psize|]` such that closing `q` at `close_price`
/// leaves wallet exposure at `exposure_target`, accounting for the realised
/// PnL landing in the balance. Returns 0 when exposure is already within
/// 0.1% of target.
#[allow(clippy::too_many_arguments)]
pub fn close_qty_for_exposure_target(
    side: Side,
    balance: f64,
    psize: f64,
    pprice: f64,
    exposure_target: f64,
    close_price: f64,
    xp: &ExchangeParams,
    sink: &dyn DiagnosticSink,
) -> SolverOutcome {
    let wallet_exposure = qty_to_cost(psize, pprice, xp) / balance;
    if wallet_exposure <= exposure_target * 1.001 {
        return SolverOutcome::exact(0.0);
    }
    let abs_psize = psize.abs();
    let step = xp.qty_step;

    let val_at = |guess: f64| -> f64 {
        let pnl = match side {
            Side::Long => long_pnl(pprice, close_price, guess, xp),
            Side::Short => short_pnl(pprice, close_price, guess, xp),
        };
        qty_to_cost(abs_psize - guess, pprice, xp) / (balance + pnl)
    };
    let clamp = |g: f64| g.max(0.0).min(abs_psize);
    let err_of = |val: f64| (val - exposure_target).abs() / exposure_target;

    let mut guesses: Vec<f64> = Vec::with_capacity(MAX_ITERS + 2);
    let mut vals: Vec<f64> = Vec::with_capacity(MAX_ITERS + 2);
    let mut evals: Vec<f64> = Vec::with_capacity(MAX_ITERS + 2);

    guesses.push(clamp(round_step(
        abs_psize * (exposure_target / wallet_exposure),
        step,
    )));
    vals.push(val_at(guesses[0]));
    evals.push(err_of(vals[0]));

    guesses.push(clamp(round_step((guesses[0] * 1.2).max(guesses[0] + step), step)));
    if guesses[1] == guesses[0] {
        guesses[1] = clamp(round_step((guesses[0] * 0.8).min(guesses[0] - step), step));
    }
    vals.push(val_at(guesses[1]));
    evals.push(err_of(vals[1]));

    for _ in 0..MAX_ITERS {
        let n = guesses.len();
        if guesses[n - 1] == guesses[n - 2] || vals[n - 1] == vals[n - 2] {
            // stalled: bump the newest guess to break the tie. The long side
            // expands harder than the short side.
            let bumped = match side {
                Side::Long => (guesses[n - 2] * 2.0).max(guesses[n - 2] + step * 10.0),
                Side::Short => (guesses[n - 2] * 1.1).max(guesses[n - 2] + step),
            };
            guesses[n - 1] = abs_psize.min(round_step(bumped, step).abs());
            vals[n - 1] = val_at(guesses[n - 1]);
        }
        let n = guesses.len();
        let new_guess = interpolate(exposure_target, &vals[n - 2..], &guesses[n - 2..]);
        guesses.push(clamp(round_step(new_guess, step)));
        vals.push(val_at(guesses[n]));
        evals.push(err_of(vals[n]));
        if evals[n] < CLOSE_ENOUGH {
            break;
        }
    }

    let outcome = best_outcome(&evals, &guesses);
    if outcome.diverged() {
        sink.warn(&format!(
            "{} close qty solver diverged: balance={} psize={} pprice={} target={} \
             close_price={} wallet_exposure={} tries={}\n(guess, val, rel_err): {}",
            side.label(),
            balance,
            psize,
            pprice,
            exposure_target,
            close_price,
            wallet_exposure,
            guesses.len(),
            trace(&guesses, &vals, &evals),
        ));
    }
    outcome
}

/// Entry quantity `q >= 0` such that filling `q` at `entry_price` lands
/// wallet exposure on `exposure_target`. Returns 0 when exposure is already
/// within 1% of target. The magnitude serves both sides; short callers
/// negate it.
pub fn entry_qty_for_exposure_target(
    balance: f64,
    psize: f64,
    pprice: f64,
    exposure_target: f64,
    entry_price: f64,
    xp: &ExchangeParams,
    sink: &dyn DiagnosticSink,
) -> SolverOutcome {
    let wallet_exposure = qty_to_cost(psize, pprice, xp) / balance;
    if wallet_exposure >= exposure_target * 0.99 {
        return SolverOutcome::exact(0.0);
    }
    let step = xp.qty_step;

    let val_at =
        |guess: f64| wallet_exposure_if_filled(balance, psize, pprice, guess, entry_price, xp);
    let err_of = |val: f64| (val - exposure_target).abs() / exposure_target;

    let mut guesses: Vec<f64> = Vec::with_capacity(MAX_ITERS + 2);
    let mut vals: Vec<f64> = Vec::with_capacity(MAX_ITERS + 2);
    let mut evals: Vec<f64> = Vec::with_capacity(MAX_ITERS + 2);

    guesses.push(round_step(
        psize.abs() * exposure_target / wallet_exposure,
        step,
    ));
    vals.push(val_at(guesses[0]));
    evals.push(err_of(vals[0]));

    guesses.push(round_step((guesses[0] * 1.2).max(guesses[0] + step), step).max(0.0));
    vals.push(val_at(guesses[1]));
    evals.push(err_of(vals[1]));

    for _ in 0..MAX_ITERS {
        let n = guesses.len();
        if guesses[n - 1] == guesses[n - 2] {
            let bumped = (guesses[n - 2] * 1.1).max(guesses[n - 2] + step);
            guesses[n - 1] = round_step(bumped, step).abs();
            vals[n - 1] = val_at(guesses[n - 1]);
        }
        let n = guesses.len();
        let new_guess = interpolate(exposure_target, &vals[n - 2..], &guesses[n - 2..]);
        guesses.push(round_step(new_guess, step).max(0.0));
        vals.push(val_at(guesses[n]));
        evals.push(err_of(vals[n]));
        if evals[n] < CLOSE_ENOUGH {
            break;
        }
    }

    let outcome = best_outcome(&evals, &guesses);
    if outcome.diverged() {
        sink.warn(&format!(
            "entry qty solver diverged: balance={} psize={} pprice={} target={} \
             entry_price={} wallet_exposure={}\n(guess, val, rel_err): {}",
            balance,
            psize,
            pprice,
            exposure_target,
            entry_price,
            wallet_exposure,
            trace(&guesses, &vals, &evals),
        ));
    }
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::diag::NullSink;
    use crate::types::Position;

    fn xp() -> ExchangeParams {
        ExchangeParams::default()
    }

    #[test]
    fn test_close_qty_noop_when_at_target() {
        // exposure 0.1 with target 0.5: nothing to close
        let out = close_qty_for_exposure_target(
            Side::Long,
            1000.0,
            1.0,
            100.0,
            0.5,
            101.0,
            &xp(),
            &NullSink,
        );
        assert_eq!(out.value, 0.0);
        assert!(!out.diverged());
    }

    /// Scenario: long 10 @ 100 on balance 1000 (exposure 1.0), target 0.5,
    /// closing at 105.
    /// Expected: the returned qty lands residual exposure within the 4%
    /// solver tolerance of target.
    #[test]
    fn test_close_qty_reaches_target_long() {
        let (balance, psize, pprice, close_price, target) = (1000.0, 10.0, 100.0, 105.0, 0.5);
        let out = close_qty_for_exposure_target(
            Side::Long,
            balance,
            psize,
            pprice,
            target,
            close_price,
            &xp(),
            &NullSink,
        );
        assert!(out.value > 0.0 && out.value <= psize);
        let residual = qty_to_cost(psize - out.value, pprice, &xp())
            / (balance + long_pnl(pprice, close_price, out.value, &xp()));
        assert!(
            (residual - target).abs() / target < CLOSE_ENOUGH + 1e-9,
            "residual exposure {}",
            residual
        );
    }

    #[test]
    fn test_close_qty_reaches_target_short() {
        let (balance, psize, pprice, close_price, target) = (1000.0, -8.0, 100.0, 96.0, 0.4);
        let out = close_qty_for_exposure_target(
            Side::Short,
            balance,
            psize,
            pprice,
            target,
            close_price,
            &xp(),
            &NullSink,
        );
        assert!(out.value > 0.0 && out.value <= psize.abs());
        let residual = qty_to_cost(psize.abs() - out.value, pprice, &xp())
            / (balance + short_pnl(pprice, close_price, out.value, &xp()));
        assert!(
            (residual - target).abs() / target < CLOSE_ENOUGH + 1e-9,
            "residual exposure {}",
            residual
        );
    }

    #[test]
    fn test_close_qty_is_step_multiple() {
        let out = close_qty_for_exposure_target(
            Side::Long,
            1000.0,
            10.0,
            100.0,
            0.5,
            105.0,
            &xp(),
            &NullSink,
        );
        let steps = out.value / xp().qty_step;
        assert!((steps - steps.round()).abs() < 1e-6, "qty {}", out.value);
    }

    #[test]
    fn test_entry_qty_noop_when_at_target() {
        // exposure 1.0 already at target
        let out = entry_qty_for_exposure_target(
            1000.0, 10.0, 100.0, 1.0, 99.0, &xp(), &NullSink,
        );
        assert_eq!(out.value, 0.0);
    }

    /// Scenario: long 1 @ 100 on balance 1000 (exposure 0.1), target 0.5,
    /// entering at 95.
    /// Expected: filling the returned qty brings exposure within tolerance
    /// of target.
    #[test]
    fn test_entry_qty_reaches_target() {
        let (balance, psize, pprice, entry_price, target) = (1000.0, 1.0, 100.0, 95.0, 0.5);
        let out = entry_qty_for_exposure_target(
            balance, psize, pprice, target, entry_price, &xp(), &NullSink,
        );
        assert!(out.value > 0.0);
        let we = wallet_exposure_if_filled(balance, psize, pprice, out.value, entry_price, &xp());
        assert!(
            (we - target).abs() / target < CLOSE_ENOUGH + 1e-9,
            "exposure if filled {}",
            we
        );
        assert!(!out.diverged());
    }

    #[test]
    fn test_entry_qty_serves_short_magnitudes() {
        let out = entry_qty_for_exposure_target(
            1000.0, -1.0, 100.0, 0.5, 104.0, &xp(), &NullSink,
        );
        assert!(out.value > 0.0);
        let pos = Position {
            size: -1.0,
            price: 100.0,
        };
        let we = wallet_exposure_if_filled(1000.0, pos.size, pos.price, out.value, 104.0, &xp());
        assert!((we - 0.5).abs() / 0.5 < CLOSE_ENOUGH + 1e-9);
    }
}
