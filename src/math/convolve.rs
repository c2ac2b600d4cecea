//! Direct 2-D convolution with small odd-sized kernels.
//!
//! PSF kernels are at most a few dozen pixels across, so the direct sum is
//! fast enough and keeps edge handling explicit: pixels outside the image
//! contribute zero.

use ndarray::{Array2, ArrayView2};

/// Convolve `image` with `kernel` ("same" output size, zero padding).
///
/// The kernel must have odd dimensions; its central pixel is the origin.
pub fn convolve_same(image: &ArrayView2<f64>, kernel: &ArrayView2<f64>) -> Array2<f64> {
    let (ny, nx) = image.dim();
    let (ky, kx) = kernel.dim();
    let cy = (ky / 2) as isize;
    let cx = (kx / 2) as isize;

    let mut out = Array2::<f64>::zeros((ny, nx));
    for ((iy, ix), &value) in image.indexed_iter() {
        if value == 0.0 {
            continue;
        }
        // Scatter: each input pixel spreads `value * kernel` around itself.
        for ((jy, jx), &k) in kernel.indexed_iter() {
            let oy = iy as isize + jy as isize - cy;
            let ox = ix as isize + jx as isize - cx;
            if oy < 0 || ox < 0 || oy >= ny as isize || ox >= nx as isize {
                continue;
            }
            out[[oy as usize, ox as usize]] += value * k;
        }
    }
    out
}
