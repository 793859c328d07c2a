//! Novelty decay of the treatment effect
//!
//! A new feature often lifts behavior most in its first days and fades as users get
//! used to it. The simulator models this as exponential decay of the absolute lift by
//! the day a user enters the experiment:
//!
//! ```text
//! lift(day) = lift0 × e^(-k × day)
//!
//!  Lift │ ╲
//! lift0 │  ╲
//!       │   ╲___
//!       │       ╲____
//!       │            ╲________
//!       │                     ╲____________
//!     0 │──────────────────────────────────────
//!       └────┬───────────────────────────────► Day
//!            │
//!        half-life = ln 2 / k
//! ```
//!
//! `k = 0` keeps the effect constant over the whole window.

use std::f64::consts::LN_2;

/// Fraction of the day-0 effect left on `day`
#[inline]
pub fn novelty_decay_factor(k: f64, day: u32) -> f64 {
    if k <= 0.0 {
        return 1.0;
    }
    (-k * f64::from(day)).exp()
}

/// Absolute lift for a user entering on `day`
#[inline]
pub fn decayed_lift(lift0: f64, k: f64, day: u32) -> f64 {
    lift0 * novelty_decay_factor(k, day)
}

/// Days until the effect halves; `None` when the effect does not decay
pub fn half_life_days(k: f64) -> Option<f64> {
    (k > 0.0).then(|| LN_2 / k)
}

/// Average decay factor over a window with days drawn uniformly from `0..days`
///
/// Closed form of the geometric series `(1/D) Σ e^(-k d)`. Multiplying by `lift0`
/// and the realized exposure rate gives the intention-to-treat lift a trial should
/// recover.
pub fn mean_window_factor(k: f64, days: u32) -> f64 {
    if days == 0 || k <= 0.0 {
        return 1.0;
    }
    let d = f64::from(days);
    let ratio = (-k).exp();
    (1.0 - (-k * d).exp()) / (d * (1.0 - ratio))
}

/// Retention of the effect at several days, for logging
pub fn decay_curve_debug(k: f64) -> String {
    let days = [0u32, 1, 3, 7, 14, 21, 28];

    let mut output = match half_life_days(k) {
        Some(h) => format!("Novelty decay (k = {k:.3}, half-life {h:.1} days):\n"),
        None => "Novelty decay disabled (constant effect)\n".to_string(),
    };
    for d in days {
        output.push_str(&format!(
            "  Day {:>3}: {:>6.2}%\n",
            d,
            novelty_decay_factor(k, d) * 100.0
        ));
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_decay_when_k_is_zero() {
        assert_eq!(novelty_decay_factor(0.0, 0), 1.0);
        assert_eq!(novelty_decay_factor(0.0, 27), 1.0);
        assert_eq!(decayed_lift(0.012, 0.0, 20), 0.012);
        assert_eq!(half_life_days(0.0), None);
    }

    #[test]
    fn test_exponential_property() {
        let k = 0.08;
        let ratio = novelty_decay_factor(k, 6) / novelty_decay_factor(k, 5);
        assert!((ratio - (-k).exp()).abs() < 1e-12);
    }

    #[test]
    fn test_half_life() {
        let k = 0.08;
        let h = half_life_days(k).unwrap();
        assert!((h - 8.664).abs() < 0.01);
        assert!(((-k * h).exp() - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_mean_window_matches_sum() {
        let k = 0.08;
        let days = 28;
        let brute: f64 = (0..days).map(|d| novelty_decay_factor(k, d)).sum::<f64>() / days as f64;
        assert!((mean_window_factor(k, days) - brute).abs() < 1e-12);
        assert_eq!(mean_window_factor(0.0, days), 1.0);
    }

    #[test]
    fn test_decay_curve_debug() {
        let curve = decay_curve_debug(0.1);
        assert!(curve.contains("half-life"));
        assert!(curve.contains("Day   0: 100.00%"));
    }
}
