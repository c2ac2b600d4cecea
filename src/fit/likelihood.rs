//! Poisson likelihood (Cash statistic).

use ndarray::{Array3, Zip};

/// Predicted counts are floored here before taking the log.
pub const NPRED_FLOOR: f64 = 1e-25;

/// `2 (μ − n ln μ)` for one pixel.
pub fn cash(counts: f64, npred: f64) -> f64 {
    let mu = npred.max(NPRED_FLOOR);
    2.0 * (mu - counts * mu.ln())
}

/// Summed Cash statistic over the pixels where `mask` is true (all pixels
/// without a mask).
pub fn cash_sum(counts: &Array3<f64>, npred: &Array3<f64>, mask: Option<&Array3<bool>>) -> f64 {
    match mask {
        Some(mask) => Zip::from(counts)
            .and(npred)
            .and(mask)
            .fold(0.0, |acc, &n, &mu, &keep| if keep { acc + cash(n, mu) } else { acc }),
        None => Zip::from(counts).and(npred).fold(0.0, |acc, &n, &mu| acc + cash(n, mu)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cash_is_minimal_at_observed_counts() {
        let at = cash(5.0, 5.0);
        assert!(cash(5.0, 4.0) > at);
        assert!(cash(5.0, 6.0) > at);
        assert_eq!(cash(0.0, 2.0), 4.0);
    }

    #[test]
    fn masked_pixels_are_ignored() {
        let counts = Array3::from_elem((1, 2, 2), 3.0);
        let npred = Array3::from_elem((1, 2, 2), 1.0);
        let mut mask = Array3::from_elem((1, 2, 2), true);
        mask[[0, 0, 0]] = false;
        let full = cash_sum(&counts, &npred, None);
        let masked = cash_sum(&counts, &npred, Some(&mask));
        assert!((full - 4.0 * cash(3.0, 1.0)).abs() < 1e-12);
        assert!((masked - 3.0 * cash(3.0, 1.0)).abs() < 1e-12);
    }

    #[test]
    fn zero_prediction_is_penalized_not_infinite() {
        assert!(cash(1.0, 0.0).is_finite());
        assert!(cash(1.0, 0.0) > cash(1.0, 1.0));
    }
}
