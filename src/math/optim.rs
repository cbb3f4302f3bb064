//! BFGS minimizer with backtracking line search.
//!
//! The ordinal and multinomial log-likelihoods are smooth, low-dimensional
//! (a dozen or two parameters) and evaluated on in-memory data, so a plain
//! dense BFGS with an Armijo backtracking search is enough. No randomness:
//! given the same starting point and objective, the iterate sequence is
//! identical across runs.

use nalgebra::{DMatrix, DVector};

/// Result of a BFGS minimization.
#[derive(Debug, Clone)]
pub struct OptimResult {
    pub x: DVector<f64>,
    pub value: f64,
    pub gradient_norm: f64,
    pub iterations: usize,
    pub converged: bool,
}

const ARMIJO_C1: f64 = 1e-4;
const BACKTRACK_SHRINK: f64 = 0.5;
const MAX_BACKTRACKS: usize = 40;

/// Minimize `f` (which returns value and gradient) starting from `x0`.
///
/// Convergence: gradient infinity-norm below `tol`, or a relative objective
/// decrease below 1e-12 between accepted steps. Hitting `max_iters` without
/// either leaves `converged == false`; the caller decides whether that is
/// fatal.
pub fn minimize_bfgs<F>(f: F, x0: DVector<f64>, max_iters: usize, tol: f64) -> OptimResult
where
    F: Fn(&DVector<f64>) -> (f64, DVector<f64>),
{
    let dim = x0.len();
    let mut x = x0;
    let (mut fx, mut grad) = f(&x);
    let mut h_inv = DMatrix::<f64>::identity(dim, dim);

    let mut iterations = 0;
    let mut converged = grad.amax() < tol;

    while !converged && iterations < max_iters {
        iterations += 1;

        let direction = -(&h_inv * &grad);
        let slope = grad.dot(&direction);
        // A non-descent direction means the curvature approximation has gone
        // bad; reset to steepest descent.
        let (direction, slope) = if slope >= 0.0 || !slope.is_finite() {
            h_inv = DMatrix::identity(dim, dim);
            let d = -grad.clone();
            let s = grad.dot(&d);
            (d, s)
        } else {
            (direction, slope)
        };

        // Backtracking Armijo search.
        let mut step = 1.0_f64;
        let mut accepted = None;
        for _ in 0..MAX_BACKTRACKS {
            let candidate = &x + &direction * step;
            let (f_cand, g_cand) = f(&candidate);
            if f_cand.is_finite() && f_cand <= fx + ARMIJO_C1 * step * slope {
                accepted = Some((candidate, f_cand, g_cand));
                break;
            }
            step *= BACKTRACK_SHRINK;
        }

        let Some((x_new, f_new, g_new)) = accepted else {
            // Line search failed outright; stop with whatever we have.
            break;
        };

        let s = &x_new - &x;
        let y = &g_new - &grad;
        let sy = s.dot(&y);

        // BFGS inverse-Hessian update, skipped when the curvature condition
        // fails (keeps H positive definite).
        if sy > 1e-12 {
            let rho = 1.0 / sy;
            let identity = DMatrix::<f64>::identity(dim, dim);
            let left = &identity - &s * y.transpose() * rho;
            let right = &identity - &y * s.transpose() * rho;
            h_inv = &left * h_inv * &right + &s * s.transpose() * rho;
        }

        let rel_decrease = (fx - f_new).abs() / fx.abs().max(1.0);
        x = x_new;
        fx = f_new;
        grad = g_new;

        if grad.amax() < tol || rel_decrease < 1e-12 {
            converged = true;
        }
    }

    OptimResult {
        gradient_norm: grad.amax(),
        x,
        value: fx,
        iterations,
        converged,
    }
}

/// Numerical Hessian of a gradient function via central differences.
///
/// Used to back out standard errors at a fitted optimum; the gradient is
/// analytic, so one central difference per parameter is accurate enough.
pub fn numerical_hessian<G>(grad: G, x: &DVector<f64>) -> DMatrix<f64>
where
    G: Fn(&DVector<f64>) -> DVector<f64>,
{
    let dim = x.len();
    let mut h = DMatrix::<f64>::zeros(dim, dim);
    for j in 0..dim {
        let step = 1e-5 * x[j].abs().max(1.0);
        let mut x_hi = x.clone();
        let mut x_lo = x.clone();
        x_hi[j] += step;
        x_lo[j] -= step;
        let g_hi = grad(&x_hi);
        let g_lo = grad(&x_lo);
        let col = (g_hi - g_lo) / (2.0 * step);
        for i in 0..dim {
            h[(i, j)] = col[i];
        }
    }
    // Symmetrize; finite differencing leaves small asymmetries.
    for i in 0..dim {
        for j in (i + 1)..dim {
            let avg = 0.5 * (h[(i, j)] + h[(j, i)]);
            h[(i, j)] = avg;
            h[(j, i)] = avg;
        }
    }
    h
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bfgs_minimizes_quadratic() {
        // f(x) = (x0 - 3)^2 + 2(x1 + 1)^2
        let f = |x: &DVector<f64>| {
            let v = (x[0] - 3.0).powi(2) + 2.0 * (x[1] + 1.0).powi(2);
            let g = DVector::from_row_slice(&[2.0 * (x[0] - 3.0), 4.0 * (x[1] + 1.0)]);
            (v, g)
        };
        let res = minimize_bfgs(f, DVector::zeros(2), 100, 1e-8);
        assert!(res.converged);
        assert!((res.x[0] - 3.0).abs() < 1e-6);
        assert!((res.x[1] + 1.0).abs() < 1e-6);
    }

    #[test]
    fn bfgs_minimizes_rosenbrock() {
        let f = |x: &DVector<f64>| {
            let (a, b) = (x[0], x[1]);
            let v = (1.0 - a).powi(2) + 100.0 * (b - a * a).powi(2);
            let g = DVector::from_row_slice(&[
                -2.0 * (1.0 - a) - 400.0 * a * (b - a * a),
                200.0 * (b - a * a),
            ]);
            (v, g)
        };
        let res = minimize_bfgs(f, DVector::from_row_slice(&[-1.2, 1.0]), 500, 1e-6);
        assert!(res.converged, "gradient norm {}", res.gradient_norm);
        assert!((res.x[0] - 1.0).abs() < 1e-4);
        assert!((res.x[1] - 1.0).abs() < 1e-4);
    }

    #[test]
    fn numerical_hessian_of_quadratic_is_exact() {
        let grad = |x: &DVector<f64>| {
            DVector::from_row_slice(&[2.0 * (x[0] - 3.0), 4.0 * (x[1] + 1.0)])
        };
        let h = numerical_hessian(grad, &DVector::zeros(2));
        assert!((h[(0, 0)] - 2.0).abs() < 1e-6);
        assert!((h[(1, 1)] - 4.0).abs() < 1e-6);
        assert!(h[(0, 1)].abs() < 1e-6);
    }
}
