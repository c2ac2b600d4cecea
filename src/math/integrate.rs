//! Numerical integration over energy bins.

/// Integrate `f` over `[a, b]` with composite Simpson's rule in `ln(x)`.
///
/// Spectra are smooth in log-energy, so sampling uniformly in `ln(x)` keeps the
/// integration accurate over bins spanning a decade or more. Requires `0 < a < b`.
pub fn integrate_log_simpson<F>(f: F, a: f64, b: f64, intervals: usize) -> f64
where
    F: Fn(f64) -> f64,
{
    // Simpson needs an even number of intervals.
    let n = intervals.max(2) + intervals % 2;
    let (la, lb) = (a.ln(), b.ln());
    let h = (lb - la) / n as f64;

    // d x = x d(ln x)
    let g = |u: f64| {
        let x = u.exp();
        f(x) * x
    };

    let mut sum = g(la) + g(lb);
    for i in 1..n {
        let u = la + h * i as f64;
        sum += if i % 2 == 1 { 4.0 * g(u) } else { 2.0 * g(u) };
    }
    sum * h / 3.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integrates_power_law() {
        // ∫_1^10 x^-2 dx = 0.9
        let v = integrate_log_simpson(|x| x.powi(-2), 1.0, 10.0, 16);
        assert!((v - 0.9).abs() < 1e-4, "got {v}");
    }

    #[test]
    fn odd_interval_count_is_rounded_up() {
        let v = integrate_log_simpson(|_| 1.0, 1.0, 2.0, 5);
        assert!((v - 1.0).abs() < 1e-9);
    }
}
