//! Cumulative-odds (proportional odds) ordered logistic regression.
//!
//! The model for level codes `k ∈ {0..K-1}` is:
//!
//! ```text
//! P(y <= k | x) = F(α_k - x'β),   F = logistic CDF
//! P(y == k | x) = F(α_k - x'β) - F(α_{k-1} - x'β)
//! ```
//!
//! with strictly increasing cutpoints `α` and no intercept column in `x`
//! (the cutpoints absorb it). Monotonicity is enforced by construction:
//! the optimizer works on `a` where `α_0 = a_0` and
//! `α_j = α_{j-1} + exp(a_j)`, so every iterate yields a valid model.
//!
//! Fitting maximizes the (mean) log-likelihood with analytic gradients via
//! BFGS. Standard errors come from the numerical Hessian of the direct
//! `(β, α)` parameterization at the optimum.

use nalgebra::{DMatrix, DVector};

use crate::error::AppError;
use crate::math::ols::pseudo_inverse;
use crate::math::optim::{minimize_bfgs, numerical_hessian};

const MAX_ITERS: usize = 500;
const GRAD_TOL: f64 = 1e-5;
const PROB_FLOOR: f64 = 1e-12;

/// Fitted ordered logit.
#[derive(Debug, Clone)]
pub struct OrdinalFit {
    /// Slope coefficients, one per design column.
    pub coefficients: DVector<f64>,
    /// Increasing cutpoints, length `n_levels - 1`.
    pub cutpoints: Vec<f64>,
    /// Standard errors for the slope coefficients.
    pub std_errors: Vec<f64>,
    pub log_likelihood: f64,
    pub iterations: usize,
}

fn sigmoid(z: f64) -> f64 {
    1.0 / (1.0 + (-z).exp())
}

fn cutpoints_from_raw(raw: &[f64]) -> Vec<f64> {
    let mut alpha = Vec::with_capacity(raw.len());
    let mut acc = 0.0;
    for (j, &a) in raw.iter().enumerate() {
        acc = if j == 0 { a } else { acc + a.exp() };
        alpha.push(acc);
    }
    alpha
}

/// Mean negative log-likelihood and its gradient in the `(β, a)` space.
fn objective(
    x: &DMatrix<f64>,
    codes: &[usize],
    n_levels: usize,
    theta: &DVector<f64>,
) -> (f64, DVector<f64>) {
    let n = x.nrows();
    let p = x.ncols();
    let n_cuts = n_levels - 1;

    let beta = theta.rows(0, p).into_owned();
    let raw: Vec<f64> = (0..n_cuts).map(|j| theta[p + j]).collect();
    let alpha = cutpoints_from_raw(&raw);

    let xb = x * &beta;

    let mut nll = 0.0;
    let mut g_beta = DVector::<f64>::zeros(p);
    let mut g_alpha = vec![0.0; n_cuts];

    for i in 0..n {
        let k = codes[i];
        let (f_hi, d_hi) = if k < n_cuts {
            let f = sigmoid(alpha[k] - xb[i]);
            (f, f * (1.0 - f))
        } else {
            (1.0, 0.0)
        };
        let (f_lo, d_lo) = if k > 0 {
            let f = sigmoid(alpha[k - 1] - xb[i]);
            (f, f * (1.0 - f))
        } else {
            (0.0, 0.0)
        };

        let prob = (f_hi - f_lo).max(PROB_FLOOR);
        nll -= prob.ln();

        let scale = 1.0 / prob;
        // d nll / dβ = ((f'_hi - f'_lo) / P) x_i
        let coef = (d_hi - d_lo) * scale;
        for j in 0..p {
            g_beta[j] += coef * x[(i, j)];
        }
        if k < n_cuts {
            g_alpha[k] -= d_hi * scale;
        }
        if k > 0 {
            g_alpha[k - 1] += d_lo * scale;
        }
    }

    // Chain rule α -> a: da_0 sees every cutpoint, da_j (j >= 1) sees
    // cutpoints m >= j scaled by exp(a_j). Suffix sums do both at once.
    let mut suffix = vec![0.0; n_cuts + 1];
    for j in (0..n_cuts).rev() {
        suffix[j] = suffix[j + 1] + g_alpha[j];
    }
    let mut grad = DVector::<f64>::zeros(p + n_cuts);
    for j in 0..p {
        grad[j] = g_beta[j] / n as f64;
    }
    for j in 0..n_cuts {
        let d = if j == 0 { suffix[0] } else { raw[j].exp() * suffix[j] };
        grad[p + j] = d / n as f64;
    }

    (nll / n as f64, grad)
}

/// Total-NLL gradient in the direct `(β, α)` parameterization.
///
/// Zero at the optimum found in the `a` space (the reparameterization is a
/// smooth bijection), which is what the Hessian-based standard errors need.
fn direct_gradient(
    x: &DMatrix<f64>,
    codes: &[usize],
    n_levels: usize,
    theta: &DVector<f64>,
) -> DVector<f64> {
    let n = x.nrows();
    let p = x.ncols();
    let n_cuts = n_levels - 1;

    let beta = theta.rows(0, p).into_owned();
    let alpha: Vec<f64> = (0..n_cuts).map(|j| theta[p + j]).collect();
    let xb = x * &beta;

    let mut grad = DVector::<f64>::zeros(p + n_cuts);
    for i in 0..n {
        let k = codes[i];
        let (f_hi, d_hi) = if k < n_cuts {
            let f = sigmoid(alpha[k] - xb[i]);
            (f, f * (1.0 - f))
        } else {
            (1.0, 0.0)
        };
        let (f_lo, d_lo) = if k > 0 {
            let f = sigmoid(alpha[k - 1] - xb[i]);
            (f, f * (1.0 - f))
        } else {
            (0.0, 0.0)
        };
        let prob = (f_hi - f_lo).max(PROB_FLOOR);
        let scale = 1.0 / prob;
        let coef = (d_hi - d_lo) * scale;
        for j in 0..p {
            grad[j] += coef * x[(i, j)];
        }
        if k < n_cuts {
            grad[p + k] -= d_hi * scale;
        }
        if k > 0 {
            grad[p + k - 1] += d_lo * scale;
        }
    }
    grad
}

/// Fit the ordered logit.
///
/// `codes` are 0-based level codes; `n_levels` distinct levels must all be
/// representable (codes `< n_levels`). Non-convergence is an error: the
/// primary decomposition fit treats it as fatal.
pub fn fit_ordered_logit(
    x: &DMatrix<f64>,
    codes: &[usize],
    n_levels: usize,
) -> Result<OrdinalFit, AppError> {
    let n = x.nrows();
    let p = x.ncols();
    if n == 0 {
        return Err(AppError::model("Ordered logit requires at least one row."));
    }
    if codes.len() != n {
        return Err(AppError::model("Design/code length mismatch."));
    }
    if n_levels < 2 {
        return Err(AppError::model(
            "Ordered logit requires at least two observed levels.",
        ));
    }
    if codes.iter().any(|&k| k >= n_levels) {
        return Err(AppError::model("Level code out of range."));
    }
    let n_cuts = n_levels - 1;

    // Start from β = 0 with cutpoints at the empirical cumulative logits, the
    // standard warm start for cumulative-odds models.
    let mut counts = vec![0usize; n_levels];
    for &k in codes {
        counts[k] += 1;
    }
    let mut theta0 = DVector::<f64>::zeros(p + n_cuts);
    let mut cum = 0usize;
    let mut prev_alpha = 0.0;
    for j in 0..n_cuts {
        cum += counts[j];
        let c = (cum as f64 / n as f64).clamp(1e-4, 1.0 - 1e-4);
        let alpha_j = (c / (1.0 - c)).ln();
        if j == 0 {
            theta0[p] = alpha_j;
        } else {
            theta0[p + j] = (alpha_j - prev_alpha).max(1e-6).ln();
        }
        prev_alpha = alpha_j;
    }

    let result = minimize_bfgs(
        |theta| objective(x, codes, n_levels, theta),
        theta0,
        MAX_ITERS,
        GRAD_TOL,
    );

    if !result.converged {
        return Err(AppError::model(format!(
            "Ordered logit did not converge after {} iterations \
             (gradient norm {:.3e}); check for separation or sparse levels.",
            result.iterations, result.gradient_norm
        )));
    }

    let beta = result.x.rows(0, p).into_owned();
    let raw: Vec<f64> = (0..n_cuts).map(|j| result.x[p + j]).collect();
    let cutpoints = cutpoints_from_raw(&raw);

    // Standard errors from the direct-space Hessian of the total NLL.
    let mut direct = DVector::<f64>::zeros(p + n_cuts);
    for j in 0..p {
        direct[j] = beta[j];
    }
    for j in 0..n_cuts {
        direct[p + j] = cutpoints[j];
    }
    let hessian = numerical_hessian(|t| direct_gradient(x, codes, n_levels, t), &direct);
    let std_errors = match pseudo_inverse(&hessian) {
        Some(cov) => (0..p).map(|j| cov[(j, j)].max(0.0).sqrt()).collect(),
        None => vec![f64::NAN; p],
    };

    Ok(OrdinalFit {
        coefficients: beta,
        cutpoints,
        std_errors,
        log_likelihood: -result.value * n as f64,
        iterations: result.iterations,
    })
}

/// Per-level fitted probabilities, one row per observation (n × K).
///
/// Rows telescope to exactly `F(+inf) - F(-inf) = 1`, so the probability
/// vector sums to 1 up to floating-point rounding.
pub fn predict_probabilities(fit: &OrdinalFit, x: &DMatrix<f64>) -> DMatrix<f64> {
    let n = x.nrows();
    let n_levels = fit.cutpoints.len() + 1;
    let xb = x * &fit.coefficients;

    let mut probs = DMatrix::<f64>::zeros(n, n_levels);
    for i in 0..n {
        let mut prev = 0.0;
        for k in 0..n_levels {
            let cum = if k < fit.cutpoints.len() {
                sigmoid(fit.cutpoints[k] - xb[i])
            } else {
                1.0
            };
            probs[(i, k)] = (cum - prev).max(0.0);
            prev = cum;
        }
    }
    probs
}
