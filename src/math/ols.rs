//! Weighted least squares solver.
//!
//! The logistic fits in this project are iteratively reweighted least squares:
//! each IRLS step solves
//!
//! ```text
//! minimize Σ w_i (z_i - x_i^T β)^2
//! ```
//!
//! for the working response `z`. Rows are pre-scaled by `sqrt(w_i)` by the
//! caller, so this module only needs to solve ordinary least squares.
//!
//! Implementation choices:
//! - SVD solves the least-squares problem robustly even when the design
//!   matrix is tall (more rows than columns). Nalgebra's `QR::solve` is
//!   intended for square systems and will panic for non-square matrices.
//! - Year-dummy columns can be nearly collinear with the intercept for
//!   two-year panels, so we try progressively looser tolerances before
//!   declaring the system unsolvable.
//! - The parameter dimension is tiny (a dozen columns), so SVD cost is
//!   negligible next to the resampling loops.

use nalgebra::{DMatrix, DVector};

/// Solve a least squares problem using SVD.
///
/// Returns `None` if the system is too ill-conditioned to solve robustly.
pub fn solve_least_squares(x: &DMatrix<f64>, y: &DVector<f64>) -> Option<DVector<f64>> {
    let svd = x.clone().svd(true, true);

    for &tol in &[1e-10, 1e-8, 1e-6] {
        if let Ok(beta) = svd.solve(y, tol) {
            if beta.iter().all(|v| v.is_finite()) {
                return Some(beta);
            }
        }
    }

    None
}

/// Invert a small symmetric matrix via SVD pseudo-inverse.
///
/// Used for covariance ("bread") matrices where near-singularity should
/// degrade gracefully rather than panic.
pub fn pseudo_inverse(m: &DMatrix<f64>) -> Option<DMatrix<f64>> {
    let svd = m.clone().svd(true, true);
    svd.pseudo_inverse(1e-12)
        .ok()
        .filter(|inv| inv.iter().all(|v| v.is_finite()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn least_squares_solves_simple_system() {
        // Fit y = 2 + 3x on x = [0,1,2]
        let x = DMatrix::from_row_slice(3, 2, &[1.0, 0.0, 1.0, 1.0, 1.0, 2.0]);
        let y = DVector::from_row_slice(&[2.0, 5.0, 8.0]);

        let beta = solve_least_squares(&x, &y).unwrap();
        assert!((beta[0] - 2.0).abs() < 1e-10);
        assert!((beta[1] - 3.0).abs() < 1e-10);
    }

    #[test]
    fn pseudo_inverse_recovers_inverse_for_well_conditioned() {
        let m = DMatrix::from_row_slice(2, 2, &[4.0, 1.0, 1.0, 3.0]);
        let inv = pseudo_inverse(&m).unwrap();
        let id = &m * &inv;
        assert!((id[(0, 0)] - 1.0).abs() < 1e-10);
        assert!((id[(1, 1)] - 1.0).abs() < 1e-10);
        assert!(id[(0, 1)].abs() < 1e-10);
    }
}
