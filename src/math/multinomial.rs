//! Unordered multinomial logit, used only as a robustness cross-check for the
//! ordered fit.
//!
//! Baseline-category parameterization: level 0 is the reference, levels
//! `1..K-1` each get their own coefficient vector. Failure here is expected
//! with sparse categories (separation) and is never fatal; the caller logs
//! it and moves on.

use nalgebra::{DMatrix, DVector};

use crate::error::AppError;
use crate::math::optim::minimize_bfgs;

const MAX_ITERS: usize = 300;
const GRAD_TOL: f64 = 1e-4;

/// Fitted multinomial logit (cross-check only; no covariance).
#[derive(Debug, Clone)]
pub struct MultinomialFit {
    /// Coefficients per non-baseline level: `(n_levels - 1) × p`, row-major
    /// by level.
    pub coefficients: Vec<Vec<f64>>,
    pub log_likelihood: f64,
    pub iterations: usize,
}

/// Mean negative log-likelihood and gradient for the softmax model.
fn objective(
    x: &DMatrix<f64>,
    codes: &[usize],
    n_levels: usize,
    theta: &DVector<f64>,
) -> (f64, DVector<f64>) {
    let n = x.nrows();
    let p = x.ncols();
    let classes = n_levels - 1;

    let mut nll = 0.0;
    let mut grad = DVector::<f64>::zeros(classes * p);

    for i in 0..n {
        // Linear predictors; baseline level has η = 0.
        let mut eta = vec![0.0; n_levels];
        for c in 0..classes {
            let mut dot = 0.0;
            for j in 0..p {
                dot += theta[c * p + j] * x[(i, j)];
            }
            eta[c + 1] = dot;
        }

        // Log-sum-exp with max shift for stability.
        let max_eta = eta.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let denom: f64 = eta.iter().map(|e| (e - max_eta).exp()).sum();
        let log_denom = max_eta + denom.ln();

        let k = codes[i];
        nll -= eta[k] - log_denom;

        for c in 0..classes {
            let prob = (eta[c + 1] - log_denom).exp();
            let indicator = if k == c + 1 { 1.0 } else { 0.0 };
            let coef = prob - indicator;
            for j in 0..p {
                grad[c * p + j] += coef * x[(i, j)];
            }
        }
    }

    (nll / n as f64, grad / n as f64)
}

/// Fit the multinomial logit. `x` should include an intercept column.
pub fn fit_multinomial_logit(
    x: &DMatrix<f64>,
    codes: &[usize],
    n_levels: usize,
) -> Result<MultinomialFit, AppError> {
    let n = x.nrows();
    let p = x.ncols();
    if n == 0 || n_levels < 2 {
        return Err(AppError::model("Multinomial logit needs rows and >= 2 levels."));
    }
    if codes.iter().any(|&k| k >= n_levels) {
        return Err(AppError::model("Level code out of range."));
    }

    let classes = n_levels - 1;
    let theta0 = DVector::<f64>::zeros(classes * p);
    let result = minimize_bfgs(
        |theta| objective(x, codes, n_levels, theta),
        theta0,
        MAX_ITERS,
        GRAD_TOL,
    );

    if !result.converged {
        return Err(AppError::model(format!(
            "Multinomial logit did not converge (gradient norm {:.3e}); \
             often due to sparse categories or separation.",
            result.gradient_norm
        )));
    }

    let coefficients = (0..classes)
        .map(|c| (0..p).map(|j| result.x[c * p + j]).collect())
        .collect();

    Ok(MultinomialFit {
        coefficients,
        log_likelihood: -result.value * n as f64,
        iterations: result.iterations,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::prelude::*;
    use rand::rngs::StdRng;

    #[test]
    fn fits_three_class_synthetic_data() {
        // Class probabilities shift with x; check the fitted slopes point the
        // right way (class 2 favored at high x, class 0 at low x).
        let mut rng = StdRng::seed_from_u64(3);
        let n = 1500;
        let mut x = DMatrix::<f64>::zeros(n, 2);
        let mut codes = Vec::with_capacity(n);
        for i in 0..n {
            let xi: f64 = rng.gen_range(-2.0..2.0);
            x[(i, 0)] = 1.0;
            x[(i, 1)] = xi;
            let e1 = (0.5 + 1.0 * xi).exp();
            let e2 = (-0.5 + 2.0 * xi).exp();
            let denom = 1.0 + e1 + e2;
            let u: f64 = rng.gen_range(0.0..1.0);
            let k = if u < 1.0 / denom {
                0
            } else if u < (1.0 + e1) / denom {
                1
            } else {
                2
            };
            codes.push(k);
        }

        let fit = fit_multinomial_logit(&x, &codes, 3).unwrap();
        assert!(fit.coefficients[0][1] > 0.0);
        assert!(fit.coefficients[1][1] > fit.coefficients[0][1]);
        assert!(fit.log_likelihood.is_finite());
    }
}
