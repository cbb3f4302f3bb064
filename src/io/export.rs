//! Export pipeline artifacts to CSV/JSON.
//!
//! The exports are meant to be easy to consume in spreadsheets or downstream
//! reporting scripts; every table a collaborator needs is re-derivable from
//! one pipeline run without re-running the statistics.

use std::fs::File;
use std::io::Write;
use std::path::Path;

use crate::domain::{
    BandRule, ContractCountyWeight, ContractYearExposure, DecompositionResult, GeoConcentration,
    ResidualBucket, RunMetadata,
};
use crate::error::AppError;
use crate::model::decompose::OrdinalModelReport;
use crate::model::frame::ModelFrame;
use crate::report::buckets::{BucketSummaryRow, DecileRow};
use crate::threshold::bootstrap::BootstrapOutput;
use crate::threshold::logit::ThresholdLogitReport;

fn create(path: &Path) -> Result<File, AppError> {
    File::create(path)
        .map_err(|e| AppError::input(format!("Failed to create '{}': {e}", path.display())))
}

fn write_line(file: &mut File, path: &Path, line: &str) -> Result<(), AppError> {
    writeln!(file, "{line}")
        .map_err(|e| AppError::input(format!("Failed to write '{}': {e}", path.display())))
}

fn fmt_opt(value: Option<f64>) -> String {
    value.map(|v| format!("{v:.10}")).unwrap_or_default()
}

pub fn write_weights_csv(path: &Path, weights: &[ContractCountyWeight]) -> Result<(), AppError> {
    let mut file = create(path)?;
    write_line(
        &mut file,
        path,
        "contract_id,year,county_fips,enrollment,contract_year_total_enrollment,w_enroll",
    )?;
    for w in weights {
        write_line(
            &mut file,
            path,
            &format!(
                "{},{},{},{},{},{:.10}",
                w.contract_id,
                w.year,
                w.county_fips,
                w.enrollment,
                w.contract_year_total_enrollment,
                w.w_enroll
            ),
        )?;
    }
    Ok(())
}

pub fn write_exposure_csv(
    path: &Path,
    exposures: &[ContractYearExposure],
) -> Result<(), AppError> {
    let mut file = create(path)?;
    write_line(
        &mut file,
        path,
        "contract_id,contract_year,total_enrollment,exposure,coverage_weight_share,\
         out_of_scope,counties_total,counties_matched",
    )?;
    for e in exposures {
        write_line(
            &mut file,
            path,
            &format!(
                "{},{},{},{},{:.10},{},{},{}",
                e.contract_id,
                e.contract_year,
                e.total_enrollment,
                fmt_opt(e.exposure),
                e.coverage_weight_share,
                e.out_of_scope,
                e.counties_total,
                e.counties_matched
            ),
        )?;
    }
    Ok(())
}

pub fn write_concentration_csv(
    path: &Path,
    metrics: &[GeoConcentration],
) -> Result<(), AppError> {
    let mut file = create(path)?;
    write_line(
        &mut file,
        path,
        "contract_id,contract_year,hhi,entropy,top1_share,top5_share,n_counties",
    )?;
    for g in metrics {
        write_line(
            &mut file,
            path,
            &format!(
                "{},{},{:.10},{:.10},{:.10},{:.10},{}",
                g.contract_id, g.contract_year, g.hhi, g.entropy, g.top1_share, g.top5_share,
                g.n_counties
            ),
        )?;
    }
    Ok(())
}

pub fn write_frame_csv(path: &Path, frame: &ModelFrame) -> Result<(), AppError> {
    let mut file = create(path)?;
    write_line(
        &mut file,
        path,
        "contract_id,contract_year,rating,poverty_exposure,rural_exposure,shortage_exposure,\
         hhi,entropy,top1_share,top5_share,n_counties,total_enrollment",
    )?;
    for r in &frame.rows {
        write_line(
            &mut file,
            path,
            &format!(
                "{},{},{},{},{},{},{},{},{},{},{},{}",
                r.contract_id,
                r.contract_year,
                r.rating,
                fmt_opt(r.poverty_exposure),
                fmt_opt(r.rural_exposure),
                fmt_opt(r.shortage_exposure),
                fmt_opt(r.hhi),
                fmt_opt(r.entropy),
                fmt_opt(r.top1_share),
                fmt_opt(r.top5_share),
                r.n_counties.map(|n| n.to_string()).unwrap_or_default(),
                fmt_opt(r.total_enrollment)
            ),
        )?;
    }
    Ok(())
}

pub fn write_decomposition_csv(
    path: &Path,
    results: &[DecompositionResult],
    residual_tolerance: f64,
) -> Result<(), AppError> {
    let mut file = create(path)?;
    write_line(
        &mut file,
        path,
        "contract_id,contract_year,observed_rating,expected_rating,residual,bucket",
    )?;
    for r in results {
        let bucket = ResidualBucket::classify(r.residual, residual_tolerance);
        write_line(
            &mut file,
            path,
            &format!(
                "{},{},{},{:.10},{:.10},{}",
                r.contract_id,
                r.contract_year,
                r.observed_rating,
                r.expected_rating,
                r.residual,
                bucket.display_name().replace(' ', "_")
            ),
        )?;
    }
    Ok(())
}

pub fn write_bootstrap_csv(
    path: &Path,
    output: &BootstrapOutput,
    rule: &BandRule,
) -> Result<(), AppError> {
    let mut file = create(path)?;
    write_line(
        &mut file,
        path,
        "contract_year,scheme,bands,draws,boot_mean,ci_2p5,ci_50,ci_97p5",
    )?;
    // Band labels contain commas, so the field is quoted.
    let bands = format!(
        "\"{} minus {}\"",
        rule.band_label(crate::domain::ThresholdBand::BelowCut),
        rule.band_label(crate::domain::ThresholdBand::AboveCut)
    );
    for s in &output.summaries {
        write_line(
            &mut file,
            path,
            &format!(
                "{},{},{},{},{:.10},{:.10},{:.10},{:.10}",
                s.contract_year,
                s.scheme.display_name(),
                bands,
                s.draws,
                s.boot_mean,
                s.ci_lower,
                s.ci_median,
                s.ci_upper
            ),
        )?;
    }
    for skip in &output.skipped {
        write_line(
            &mut file,
            path,
            &format!(
                "{},skipped,below={} above={},0,,,,",
                skip.contract_year, skip.below_contracts, skip.above_contracts
            ),
        )?;
    }
    Ok(())
}

pub fn write_logit_csv(path: &Path, reports: &[ThresholdLogitReport]) -> Result<(), AppError> {
    let mut file = create(path)?;
    write_line(
        &mut file,
        path,
        "scheme,term,estimate,std_error,odds_ratio,or_ci_lower,or_ci_upper",
    )?;
    for report in reports {
        for c in &report.coefficients {
            write_line(
                &mut file,
                path,
                &format!(
                    "{},{},{:.10},{:.10},{:.10},{:.10},{:.10}",
                    report.scheme.display_name(),
                    c.name,
                    c.estimate,
                    c.std_error,
                    c.odds_ratio,
                    c.or_ci_lower,
                    c.or_ci_upper
                ),
            )?;
        }
    }
    Ok(())
}

pub fn write_ordinal_csv(path: &Path, report: &OrdinalModelReport) -> Result<(), AppError> {
    let mut file = create(path)?;
    write_line(&mut file, path, "term,estimate,std_error")?;
    for (j, name) in report.feature_names.iter().enumerate() {
        write_line(
            &mut file,
            path,
            &format!("{},{:.10},{:.10}", name, report.coefficients[j], report.std_errors[j]),
        )?;
    }
    for (k, cut) in report.cutpoints.iter().enumerate() {
        write_line(&mut file, path, &format!("cutpoint_{k},{cut:.10},"))?;
    }
    Ok(())
}

pub fn write_bucket_csv(path: &Path, rows: &[BucketSummaryRow]) -> Result<(), AppError> {
    let mut file = create(path)?;
    write_line(
        &mut file,
        path,
        "contract_year,bucket,n,mean_observed,mean_expected,mean_residual,\
         mean_poverty,mean_shortage,mean_log_enroll",
    )?;
    for row in rows {
        write_line(
            &mut file,
            path,
            &format!(
                "{},{},{},{:.10},{:.10},{:.10},{:.10},{:.10},{:.10}",
                row.contract_year,
                row.bucket.display_name().replace(' ', "_"),
                row.n,
                row.mean_observed,
                row.mean_expected,
                row.mean_residual,
                row.mean_poverty,
                row.mean_shortage,
                row.mean_log_enroll
            ),
        )?;
    }
    Ok(())
}

pub fn write_decile_csv(path: &Path, rows: &[DecileRow]) -> Result<(), AppError> {
    let mut file = create(path)?;
    write_line(
        &mut file,
        path,
        "feature,contract_year,decile,n,feature_mean,observed_mean,expected_mean,residual_mean",
    )?;
    for row in rows {
        write_line(
            &mut file,
            path,
            &format!(
                "{},{},{},{},{:.10},{:.10},{:.10},{:.10}",
                row.feature.display_name().replace(' ', "_"),
                row.contract_year,
                row.decile,
                row.n,
                row.feature_mean,
                row.observed_mean,
                row.expected_mean,
                row.residual_mean
            ),
        )?;
    }
    Ok(())
}

pub fn write_opportunity_csv(
    path: &Path,
    results: &[DecompositionResult],
) -> Result<(), AppError> {
    let mut file = create(path)?;
    write_line(
        &mut file,
        path,
        "contract_id,contract_year,observed_rating,expected_rating,residual",
    )?;
    for r in results {
        write_line(
            &mut file,
            path,
            &format!(
                "{},{},{},{:.10},{:.10}",
                r.contract_id, r.contract_year, r.observed_rating, r.expected_rating, r.residual
            ),
        )?;
    }
    Ok(())
}

/// Serialize run metadata as pretty JSON next to the tables.
pub fn write_metadata_json(path: &Path, meta: &RunMetadata) -> Result<(), AppError> {
    let json = serde_json::to_string_pretty(meta)
        .map_err(|e| AppError::input(format!("Failed to serialize run metadata: {e}")))?;
    std::fs::write(path, json)
        .map_err(|e| AppError::input(format!("Failed to write '{}': {e}", path.display())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exposure_csv_renders_null_exposure_as_empty_field() {
        let exposures = vec![ContractYearExposure {
            contract_id: "H100".to_string(),
            contract_year: 2024,
            total_enrollment: 100,
            exposure: None,
            coverage_weight_share: 0.0,
            out_of_scope: true,
            counties_total: 2,
            counties_matched: 0,
        }];
        let path = std::env::temp_dir().join("star_decomp_export_exposure.csv");
        write_exposure_csv(&path, &exposures).unwrap();
        let contents = std::fs::read_to_string(&path).unwrap();
        let data_line = contents.lines().nth(1).unwrap();
        // Null exposure must be an empty field, never "0".
        assert!(data_line.contains("H100,2024,100,,"));
        assert!(data_line.contains("true"));
    }

    #[test]
    fn metadata_json_round_trips() {
        let meta = RunMetadata {
            tool: "star-decomp 0.1.0".to_string(),
            generated_at: chrono::NaiveDate::from_ymd_opt(2026, 1, 15).unwrap(),
            seed: 42,
            bootstrap_draws: 2000,
            poverty_lag_years: 1,
            band: BandRule::default(),
            levels: vec![2.0, 2.5, 3.0],
            n_modeled: 500,
            ordinal_fit_weighted: false,
            weighting_note: "ordinal fit unweighted by design".to_string(),
        };
        let path = std::env::temp_dir().join("star_decomp_export_meta.json");
        write_metadata_json(&path, &meta).unwrap();
        let parsed: RunMetadata =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(parsed.seed, 42);
        assert!(!parsed.ordinal_fit_weighted);
    }
}
