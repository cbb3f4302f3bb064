//! Fixed-width terminal tables for each pipeline stage.

use crate::domain::{BandRule, DecompositionResult, PipelineConfig, RunMetadata, ThresholdBand};
use crate::exposure::CoverageSummary;
use crate::math::{mean, percentile, std_dev};
use crate::model::decompose::{CrossCheck, OrdinalModelReport};
use crate::report::buckets::{BucketSummaryRow, DecileRow};
use crate::threshold::BandPointEstimate;
use crate::threshold::bootstrap::BootstrapOutput;
use crate::threshold::logit::ThresholdLogitReport;
use crate::weights::WeightSumQc;

/// Header block echoing the run configuration.
pub fn format_run_header(config: &PipelineConfig) -> String {
    let mut out = String::new();
    out.push_str("=== stars - structural decomposition of star ratings ===\n");
    out.push_str(&format!(
        "Bands: {} vs {} | poverty lag: {}y\n",
        config.band.band_label(ThresholdBand::BelowCut),
        config.band.band_label(ThresholdBand::AboveCut),
        config.poverty_lag_years,
    ));
    out.push_str(&format!(
        "Bootstrap: {} draws | seed: {} | min contracts per band-year: {}\n",
        config.bootstrap_draws, config.seed, config.min_band_contracts,
    ));
    out
}

pub fn format_weight_qc(qc: &[WeightSumQc]) -> String {
    let mut out = String::new();
    out.push_str("Weight-sum QC (should be ~1.0):\n");
    out.push_str(&format!(
        "{:>6} {:>16} {:>14} {:>14} {:>14}\n",
        "year", "contract-years", "avg", "min", "max"
    ));
    for row in qc {
        out.push_str(&format!(
            "{:>6} {:>16} {:>14.9} {:>14.9} {:>14.9}\n",
            row.year,
            row.contract_years_checked,
            row.avg_weight_sum,
            row.min_weight_sum,
            row.max_weight_sum
        ));
    }
    out
}

pub fn format_coverage(label: &str, summary: &[CoverageSummary]) -> String {
    let mut out = String::new();
    out.push_str(&format!("Coverage summary ({label}):\n"));
    out.push_str(&format!(
        "{:>6} {:>16} {:>14} {:>10} {:>10} {:>10}\n",
        "year", "contract-years", "out-of-scope", "avg", "min", "max"
    ));
    for row in summary {
        out.push_str(&format!(
            "{:>6} {:>16} {:>14} {:>10.4} {:>10.4} {:>10.4}\n",
            row.contract_year,
            row.contract_years,
            row.out_of_scope_count,
            row.avg_coverage_weight_share,
            row.min_coverage_weight_share,
            row.max_coverage_weight_share
        ));
    }
    out
}

/// List contract-years entirely outside an attribute's coverage.
pub fn format_out_of_scope(
    label: &str,
    exposures: &[crate::domain::ContractYearExposure],
    limit: usize,
) -> String {
    let out_of_scope: Vec<_> = exposures.iter().filter(|e| e.out_of_scope).collect();
    let mut out = String::new();
    out.push_str(&format!(
        "Out-of-scope contract-years ({label}): {}\n",
        out_of_scope.len()
    ));
    for e in out_of_scope.iter().take(limit) {
        out.push_str(&format!(
            "  {} {} ({} counties, none matched)\n",
            e.contract_id, e.contract_year, e.counties_total
        ));
    }
    if out_of_scope.len() > limit {
        out.push_str(&format!("  ... and {} more\n", out_of_scope.len() - limit));
    }
    out
}

pub fn format_band_estimates(points: &[BandPointEstimate], rule: &BandRule) -> String {
    let mut out = String::new();
    out.push_str("Near-threshold point estimates (poverty exposure):\n");
    out.push_str(&format!(
        "{:>6} {:>12} {:>10} {:>6} {:>14} {:>12} {:>14}\n",
        "year", "band", "contracts", "rows", "enrollment", "mean", "mean (wtd)"
    ));
    for p in points {
        out.push_str(&format!(
            "{:>6} {:>12} {:>10} {:>6} {:>14.0} {:>12.6} {:>14.6}\n",
            p.contract_year,
            rule.band_label(p.band),
            p.contracts,
            p.rows,
            p.total_enrollment,
            p.mean_exposure_unweighted,
            p.mean_exposure_enrollment_weighted
        ));
    }
    out
}

pub fn format_bootstrap(output: &BootstrapOutput, rule: &BandRule) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "Bootstrap CI: exposure diff, {} minus {}:\n",
        rule.band_label(ThresholdBand::BelowCut),
        rule.band_label(ThresholdBand::AboveCut),
    ));
    out.push_str(&format!(
        "{:>6} {:>22} {:>7} {:>12} {:>12} {:>12} {:>12}\n",
        "year", "scheme", "draws", "mean", "p2.5", "p50", "p97.5"
    ));
    for s in &output.summaries {
        out.push_str(&format!(
            "{:>6} {:>22} {:>7} {:>12.6} {:>12.6} {:>12.6} {:>12.6}\n",
            s.contract_year,
            s.scheme.display_name(),
            s.draws,
            s.boot_mean,
            s.ci_lower,
            s.ci_median,
            s.ci_upper
        ));
    }
    for skip in &output.skipped {
        out.push_str(&format!(
            "  (skipped {}) below={} above={} distinct contracts, under the resample minimum\n",
            skip.contract_year, skip.below_contracts, skip.above_contracts
        ));
    }
    out
}

pub fn format_logit_reports(reports: &[ThresholdLogitReport]) -> String {
    let mut out = String::new();
    for report in reports {
        out.push_str(&format!(
            "Logistic model ({}, n={}{}):\n",
            report.scheme.display_name(),
            report.n_rows,
            if report.includes_rural {
                ", with rural term"
            } else {
                ""
            }
        ));
        out.push_str(&format!(
            "{:<20} {:>10} {:>10} {:>10} {:>10} {:>10}\n",
            "term", "coef", "se(HC1)", "OR", "OR 2.5%", "OR 97.5%"
        ));
        for c in &report.coefficients {
            out.push_str(&format!(
                "{:<20} {:>10.4} {:>10.4} {:>10.4} {:>10.4} {:>10.4}\n",
                c.name, c.estimate, c.std_error, c.odds_ratio, c.or_ci_lower, c.or_ci_upper
            ));
        }
        out.push('\n');
    }
    out
}

pub fn format_ordinal_report(report: &OrdinalModelReport, cross_check: &CrossCheck) -> String {
    let mut out = String::new();
    out.push_str("Ordered logit (unweighted by design):\n");
    out.push_str(&format!(
        "rows: {} | levels: {:?} | log-likelihood: {:.3} | iterations: {}\n",
        report.n_rows, report.levels, report.log_likelihood, report.iterations
    ));
    out.push_str(&format!("{:<20} {:>12} {:>12}\n", "term", "coef", "se"));
    for (j, name) in report.feature_names.iter().enumerate() {
        out.push_str(&format!(
            "{:<20} {:>12.4} {:>12.4}\n",
            name, report.coefficients[j], report.std_errors[j]
        ));
    }
    out.push_str(&format!("cutpoints: {}\n", fmt_vec(&report.cutpoints)));
    out.push_str(&format!("cross-check: {}\n", cross_check.note));
    out
}

pub fn format_decomposition_summary(results: &[DecompositionResult]) -> String {
    let residuals: Vec<f64> = results.iter().map(|r| r.residual).collect();
    let mut out = String::new();
    out.push_str("Operational residual summary:\n");
    out.push_str(&format!(
        "n={} mean={:.4} std={:.4} min={:.4} p25={:.4} p50={:.4} p75={:.4} max={:.4}\n",
        residuals.len(),
        mean(&residuals),
        std_dev(&residuals),
        percentile(&residuals, 0.0),
        percentile(&residuals, 25.0),
        percentile(&residuals, 50.0),
        percentile(&residuals, 75.0),
        percentile(&residuals, 100.0),
    ));
    out
}

pub fn format_bucket_summary(rows: &[BucketSummaryRow]) -> String {
    let mut out = String::new();
    out.push_str("Residual buckets:\n");
    out.push_str(&format!(
        "{:>6} {:<28} {:>5} {:>9} {:>9} {:>9} {:>9} {:>9} {:>11}\n",
        "year",
        "bucket",
        "n",
        "observed",
        "expected",
        "residual",
        "poverty",
        "shortage",
        "log-enroll"
    ));
    for row in rows {
        out.push_str(&format!(
            "{:>6} {:<28} {:>5} {:>9.3} {:>9.3} {:>9.3} {:>9.3} {:>9.3} {:>11.3}\n",
            row.contract_year,
            row.bucket.display_name(),
            row.n,
            row.mean_observed,
            row.mean_expected,
            row.mean_residual,
            row.mean_poverty,
            row.mean_shortage,
            row.mean_log_enroll
        ));
    }
    out
}

pub fn format_opportunity_list(results: &[DecompositionResult]) -> String {
    let mut out = String::new();
    out.push_str("Opportunity list (most negative residuals in slice):\n");
    out.push_str(&format!(
        "{:<12} {:>6} {:>9} {:>9} {:>9}\n",
        "contract", "year", "observed", "expected", "residual"
    ));
    for r in results {
        out.push_str(&format!(
            "{:<12} {:>6} {:>9.2} {:>9.3} {:>9.3}\n",
            truncate(&r.contract_id, 12),
            r.contract_year,
            r.observed_rating,
            r.expected_rating,
            r.residual
        ));
    }
    out
}

pub fn format_decile_table(rows: &[DecileRow]) -> String {
    let mut out = String::new();
    if let Some(first) = rows.first() {
        out.push_str(&format!(
            "Decile effects - {}:\n",
            first.feature.display_name()
        ));
    }
    out.push_str(&format!(
        "{:>6} {:>7} {:>5} {:>12} {:>9} {:>9} {:>9}\n",
        "year", "decile", "n", "feature", "observed", "expected", "residual"
    ));
    for row in rows {
        out.push_str(&format!(
            "{:>6} {:>7} {:>5} {:>12.4} {:>9.3} {:>9.3} {:>9.3}\n",
            row.contract_year,
            row.decile,
            row.n,
            row.feature_mean,
            row.observed_mean,
            row.expected_mean,
            row.residual_mean
        ));
    }
    out
}

pub fn format_metadata(meta: &RunMetadata) -> String {
    format!(
        "Run metadata: tool={} date={} seed={} draws={} levels={:?} modeled={}\nNote: {}\n",
        meta.tool,
        meta.generated_at,
        meta.seed,
        meta.bootstrap_draws,
        meta.levels,
        meta.n_modeled,
        meta.weighting_note
    )
}

fn fmt_vec(v: &[f64]) -> String {
    let parts: Vec<String> = v.iter().map(|x| format!("{x:.4}")).collect();
    format!("[{}]", parts.join(", "))
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let mut out = String::new();
    for (i, ch) in s.chars().enumerate() {
        if i + 1 >= max {
            break;
        }
        out.push(ch);
    }
    out.push('.');
    out
}
