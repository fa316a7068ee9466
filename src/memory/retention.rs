//! Retention Model - exponential forgetting curve over an accumulated spacing measure
//!
//! R = exp(-λ × (S + t_next / max(1, n_next))) where S = Σ t_i / n_i
//!
//! - t_i: seconds since the previous review at review i
//! - n_i: repetition count at review i (floored at 1)
//!
//! All inputs are normalized rather than rejected: missing, negative or
//! non-finite elapsed times count as 0 and non-positive repetition counts as 1.
//! An unbounded spacing sum is kept as is and decays retention to 0.

use crate::types::ReviewEvent;

/// Anything that contributes one `t / n` term to the spacing sum.
pub trait SpacingTerm {
    fn elapsed_sec(&self) -> f64;
    fn repetitions(&self) -> i64;
}

impl SpacingTerm for ReviewEvent {
    fn elapsed_sec(&self) -> f64 {
        self.time_since_last_review_sec
    }

    fn repetitions(&self) -> i64 {
        self.n_reps
    }
}

impl SpacingTerm for (f64, i64) {
    fn elapsed_sec(&self) -> f64 {
        self.0
    }

    fn repetitions(&self) -> i64 {
        self.1
    }
}

#[inline]
pub(crate) fn normalize_elapsed(t: f64) -> f64 {
    if t.is_finite() && t > 0.0 {
        t
    } else {
        0.0
    }
}

/// NaN and negative sums count as 0; +∞ passes through.
#[inline]
pub(crate) fn normalize_spacing_sum(s: f64) -> f64 {
    if s.is_nan() || s < 0.0 {
        0.0
    } else {
        s
    }
}

#[inline]
pub(crate) fn normalize_reps(n: i64) -> f64 {
    n.max(1) as f64
}

/// Effective elapsed time `t / max(1, n)` for a single review gap.
#[inline]
pub fn spacing_term(t: f64, n: i64) -> f64 {
    normalize_elapsed(t) / normalize_reps(n)
}

/// S = Σ t_i / n_i over a chronological list of prior events for one item.
pub fn compute_spacing_sum<T: SpacingTerm>(events: &[T]) -> f64 {
    events
        .iter()
        .map(|e| spacing_term(e.elapsed_sec(), e.repetitions()))
        .sum()
}

/// Total exposure `S + t_next / max(1, n_next)`; also the magnitude of dR/dλ.
pub fn exposure(spacing_sum: f64, t_next: f64, n_next: i64) -> f64 {
    normalize_spacing_sum(spacing_sum) + spacing_term(t_next, n_next)
}

/// Predicted recall probability in `[0, 1]`. Non-finite results map to 0.
pub fn retention(lambda: f64, spacing_sum: f64, t_next: f64, n_next: i64) -> f64 {
    let r = (-lambda * exposure(spacing_sum, t_next, n_next)).exp();
    if !r.is_finite() || r < 0.0 {
        return 0.0;
    }
    r.min(1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPSILON: f64 = 1e-9;

    #[test]
    fn test_spacing_sum_scenario() {
        let events = [(3600.0, 1), (7200.0, 2)];
        assert!((compute_spacing_sum(&events) - 7200.0).abs() < EPSILON);
    }

    #[test]
    fn test_spacing_sum_empty() {
        let events: [(f64, i64); 0] = [];
        assert_eq!(compute_spacing_sum(&events), 0.0);
    }

    #[test]
    fn test_spacing_sum_normalizes_inputs() {
        let events = [(-50.0, 3), (f64::NAN, 1), (100.0, 0), (100.0, -4)];
        assert!((compute_spacing_sum(&events) - 200.0).abs() < EPSILON);
    }

    #[test]
    fn test_retention_at_zero_exposure_is_one() {
        assert!((retention(0.15, 0.0, 0.0, 1) - 1.0).abs() < EPSILON);
    }

    #[test]
    fn test_retention_decays_with_time() {
        let r1 = retention(1e-5, 0.0, 3600.0, 1);
        let r2 = retention(1e-5, 0.0, 86400.0, 1);
        assert!(r1 > r2);
        assert!((r1 - (-0.036f64).exp()).abs() < EPSILON);
    }

    #[test]
    fn test_retention_repetitions_soften_decay() {
        let once = retention(1e-5, 0.0, 86400.0, 1);
        let many = retention(1e-5, 0.0, 86400.0, 4);
        assert!(many > once);
    }

    #[test]
    fn test_retention_non_finite_maps_to_zero() {
        assert_eq!(retention(f64::NAN, 10.0, 10.0, 1), 0.0);
        assert_eq!(retention(1.0, f64::INFINITY, 0.0, 1), 0.0);
        assert_eq!(retention(0.0, f64::INFINITY, 0.0, 1), 0.0);
        assert!(retention(0.2, 0.0, 3600.0, 1) < 1e-30);
    }

    #[test]
    fn test_unbounded_spacing_sum_forgets() {
        assert_eq!(exposure(f64::INFINITY, 10.0, 1), f64::INFINITY);
        assert_eq!(exposure(f64::NAN, 10.0, 1), 10.0);
        assert_eq!(exposure(-5.0, 10.0, 2), 5.0);
        assert_eq!(retention(1e-6, f64::INFINITY, 3600.0, 1), 0.0);
    }

    #[test]
    fn test_retention_clamped_for_negative_lambda() {
        assert_eq!(retention(-1.0, 100.0, 0.0, 1), 1.0);
    }
}
