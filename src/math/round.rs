//! Step rounding with IEEE-754 drift absorption.
//!
//! Every step rounding passes through a 10-decimal "safety round" on both
//! sides of the step multiplication, so comparisons against step boundaries
//! stay stable after long chains of float arithmetic.

const SAFETY_DECIMALS: i32 = 10;

/// Round to a fixed number of decimal places.
#[inline]
fn round_decimals(n: f64, decimals: i32) -> f64 {
    let f = 10f64.powi(decimals);
    (n * f).round() / f
}

/// Round up to the nearest multiple of `step`.
#[inline]
pub fn round_up(n: f64, step: f64) -> f64 {
    round_decimals(
        round_decimals(n / step, SAFETY_DECIMALS).ceil() * step,
        SAFETY_DECIMALS,
    )
}

/// Round down to the nearest multiple of `step`.
#[inline]
pub fn round_dn(n: f64, step: f64) -> f64 {
    round_decimals(
        round_decimals(n / step, SAFETY_DECIMALS).floor() * step,
        SAFETY_DECIMALS,
    )
}

/// Round to the nearest multiple of `step`.
#[inline]
pub fn round_step(n: f64, step: f64) -> f64 {
    round_decimals((n / step).round() * step, SAFETY_DECIMALS)
}

/// Keep `d` significant digits of a value.
#[inline]
pub fn round_dynamic(n: f64, d: i32) -> f64 {
    if n == 0.0 {
        return n;
    }
    round_decimals(n, d - n.abs().log10().floor() as i32 - 1)
}

/// Relative difference |x - y| / |y|.
#[inline]
pub fn rel_diff(x: f64, y: f64) -> f64 {
    (x - y).abs() / y.abs()
}

/// Map NaN to 0.0, pass everything else through.
#[inline]
pub fn nan_to_0(x: f64) -> f64 {
    if x.is_nan() {
        0.0
    } else {
        x
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_step_basics() {
        assert_eq!(round_step(0.1234, 0.001), 0.123);
        assert_eq!(round_up(0.1231, 0.001), 0.124);
        assert_eq!(round_dn(0.1239, 0.001), 0.123);
    }

    /// Scenario: a value that is already an exact step multiple after float
    /// drift (e.g. 0.1 + 0.2 = 0.30000000000000004).
    /// Expected: the safety round keeps both directions on the boundary.
    #[test]
    fn test_safety_round_absorbs_drift() {
        let x = 0.1_f64 + 0.2_f64;
        assert_eq!(round_up(x, 0.1), 0.3);
        assert_eq!(round_dn(x, 0.1), 0.3);
        assert_eq!(round_step(x, 0.1), 0.3);
    }

    /// Property from the rounding contract:
    /// round_up(round_dn(x, s), s) is either round_dn(x, s) or one step above.
    #[test]
    fn test_round_up_of_round_dn() {
        let step = 0.001;
        for i in 0..500 {
            let x = 0.0003 + i as f64 * 0.0137;
            let dn = round_dn(x, step);
            let up = round_up(dn, step);
            let diff = (up - dn).abs();
            assert!(
                diff < 1e-12 || (diff - step).abs() < 1e-12,
                "x={} dn={} up={}",
                x,
                dn,
                up
            );
        }
    }

    #[test]
    fn test_round_dynamic() {
        assert_eq!(round_dynamic(1234.5678, 4), 1235.0);
        assert_eq!(round_dynamic(0.0012345, 3), 0.00123);
        assert_eq!(round_dynamic(0.0, 4), 0.0);
        assert_eq!(round_dynamic(-9.8765, 2), -9.9);
    }

    #[test]
    fn test_rel_diff_and_nan() {
        assert_eq!(rel_diff(101.0, 100.0), 0.01);
        assert_eq!(nan_to_0(f64::NAN), 0.0);
        assert_eq!(nan_to_0(1.5), 1.5);
    }
}
