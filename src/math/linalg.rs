//! Small dense linear solves for the likelihood optimizer.
//!
//! Each optimizer step solves the damped Newton system
//!
//! ```text
//! (H + λ·diag(H)) δ = -g
//! ```
//!
//! for a handful of free parameters. The Hessian comes from finite
//! differences and can be close to singular when two parameters (for example a
//! template norm and its spectral tilt) are strongly correlated, so we go
//! through SVD and progressively relax the singular-value cutoff.

use nalgebra::{DMatrix, DVector};

/// Solve `a x = b` using SVD.
///
/// Returns `None` if no finite solution exists at any tolerance.
pub fn solve_svd(a: &DMatrix<f64>, b: &DVector<f64>) -> Option<DVector<f64>> {
    let svd = a.clone().svd(true, true);

    for &tol in &[1e-12, 1e-10, 1e-8] {
        if let Ok(x) = svd.solve(b, tol) {
            if x.iter().all(|v| v.is_finite()) {
                return Some(x);
            }
        }
    }

    None
}
