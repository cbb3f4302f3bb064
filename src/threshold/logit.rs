//! Binary logistic models over the near-threshold sample.
//!
//! `above_cut ~ poverty_exposure [+ rural_exposure] + year fixed effects`,
//! fit twice: unweighted (contract-level) and enrollment-frequency-weighted.
//! Both use HC1 robust standard errors, and exposure coefficients are
//! reported as odds ratios with 95% Wald intervals.
//!
//! The enrollment weighting here is intentional and asymmetric with the
//! ordinal decomposition fit, which is unweighted by design; see the run
//! metadata note emitted by the decomposition stage.

use nalgebra::{DMatrix, DVector};
use serde::Serialize;

use crate::domain::WeightScheme;
use crate::error::AppError;
use crate::math::glm::fit_binomial_logit;
use crate::threshold::NearThresholdRow;

const Z_95: f64 = 1.96;

/// One reported model term.
#[derive(Debug, Clone, Serialize)]
pub struct CoefficientReport {
    pub name: String,
    pub estimate: f64,
    pub std_error: f64,
    pub odds_ratio: f64,
    pub or_ci_lower: f64,
    pub or_ci_upper: f64,
}

/// One fitted logistic model (per weighting scheme).
#[derive(Debug, Clone, Serialize)]
pub struct ThresholdLogitReport {
    pub scheme: WeightScheme,
    pub n_rows: usize,
    pub includes_rural: bool,
    pub log_likelihood: f64,
    pub coefficients: Vec<CoefficientReport>,
}

/// Fit the unweighted and enrollment-weighted models.
///
/// The rural term is included only when every row resolved a rural exposure;
/// a partially-covered rural column would silently shrink the sample, which
/// is worse than dropping the term.
pub fn fit_threshold_logits(
    rows: &[NearThresholdRow],
) -> Result<Vec<ThresholdLogitReport>, AppError> {
    if rows.is_empty() {
        return Err(AppError::model(
            "Near-threshold sample is empty; nothing to fit.",
        ));
    }

    let includes_rural = rows.iter().all(|r| r.rural_exposure.is_some());

    let mut years: Vec<i32> = rows.iter().map(|r| r.contract_year).collect();
    years.sort_unstable();
    years.dedup();
    // Baseline year omitted to avoid collinearity with the intercept.
    let dummy_years = &years[1..];

    let mut names = vec!["intercept".to_string(), "poverty_exposure".to_string()];
    if includes_rural {
        names.push("rural_exposure".to_string());
    }
    for y in dummy_years {
        names.push(format!("year_{y}"));
    }

    let n = rows.len();
    let p = names.len();
    let mut x = DMatrix::<f64>::zeros(n, p);
    let mut y = DVector::<f64>::zeros(n);
    let mut enrollment = DVector::<f64>::zeros(n);
    for (i, row) in rows.iter().enumerate() {
        let mut j = 0;
        x[(i, j)] = 1.0;
        j += 1;
        x[(i, j)] = row.poverty_exposure;
        j += 1;
        if includes_rural {
            x[(i, j)] = row.rural_exposure.unwrap_or(0.0);
            j += 1;
        }
        for dy in dummy_years {
            x[(i, j)] = if row.contract_year == *dy { 1.0 } else { 0.0 };
            j += 1;
        }
        y[i] = if row.above_cut { 1.0 } else { 0.0 };
        enrollment[i] = row.total_enrollment;
    }

    let mut reports = Vec::with_capacity(2);
    for scheme in [WeightScheme::Unweighted, WeightScheme::EnrollmentWeighted] {
        let weights = match scheme {
            WeightScheme::Unweighted => None,
            WeightScheme::EnrollmentWeighted => Some(&enrollment),
        };
        let fit = fit_binomial_logit(&x, &y, weights).map_err(|e| {
            AppError::model(format!(
                "Threshold logistic fit ({}) failed: {e}",
                scheme.display_name()
            ))
        })?;

        let coefficients = names
            .iter()
            .enumerate()
            .map(|(j, name)| {
                let b = fit.coefficients[j];
                let se = fit.std_error(j);
                CoefficientReport {
                    name: name.clone(),
                    estimate: b,
                    std_error: se,
                    odds_ratio: b.exp(),
                    or_ci_lower: (b - Z_95 * se).exp(),
                    or_ci_upper: (b + Z_95 * se).exp(),
                }
            })
            .collect();

        reports.push(ThresholdLogitReport {
            scheme,
            n_rows: n,
            includes_rural,
            log_likelihood: fit.log_likelihood,
            coefficients,
        });
    }
    Ok(reports)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ThresholdBand;
    use rand::prelude::*;
    use rand::rngs::StdRng;

    fn synthetic_rows(n: usize, seed: u64) -> Vec<NearThresholdRow> {
        // Higher poverty lowers the odds of landing above the cut.
        let mut rng = StdRng::seed_from_u64(seed);
        (0..n)
            .map(|i| {
                let poverty: f64 = rng.gen_range(0.05..0.35);
                let eta = 2.0 - 12.0 * poverty;
                let above = rng.gen_bool(1.0 / (1.0 + (-eta).exp()));
                NearThresholdRow {
                    contract_id: format!("H{i:03}"),
                    contract_year: if i % 2 == 0 { 2024 } else { 2025 },
                    rating: if above { 4.1 } else { 3.7 },
                    band: if above {
                        ThresholdBand::AboveCut
                    } else {
                        ThresholdBand::BelowCut
                    },
                    above_cut: above,
                    poverty_exposure: poverty,
                    rural_exposure: Some(rng.gen_range(0.0..1.0)),
                    total_enrollment: rng.gen_range(100.0..10_000.0),
                }
            })
            .collect()
    }

    #[test]
    fn poverty_coefficient_is_negative_with_valid_interval() {
        let rows = synthetic_rows(400, 21);
        let reports = fit_threshold_logits(&rows).unwrap();
        assert_eq!(reports.len(), 2);

        for report in &reports {
            assert!(report.includes_rural);
            let poverty = report
                .coefficients
                .iter()
                .find(|c| c.name == "poverty_exposure")
                .unwrap();
            assert!(poverty.estimate < 0.0);
            assert!(poverty.odds_ratio < 1.0);
            assert!(poverty.or_ci_lower <= poverty.odds_ratio);
            assert!(poverty.odds_ratio <= poverty.or_ci_upper);
        }
    }

    #[test]
    fn rural_term_dropped_when_coverage_is_partial() {
        let mut rows = synthetic_rows(200, 33);
        rows[7].rural_exposure = None;
        let reports = fit_threshold_logits(&rows).unwrap();
        assert!(!reports[0].includes_rural);
        assert!(
            reports[0]
                .coefficients
                .iter()
                .all(|c| c.name != "rural_exposure")
        );
    }

    #[test]
    fn year_dummies_skip_baseline() {
        let rows = synthetic_rows(200, 5);
        let reports = fit_threshold_logits(&rows).unwrap();
        let names: Vec<&str> = reports[0]
            .coefficients
            .iter()
            .map(|c| c.name.as_str())
            .collect();
        assert!(!names.contains(&"year_2024"));
        assert!(names.contains(&"year_2025"));
    }
}
