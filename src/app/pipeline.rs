//! Shared pipeline logic used by every CLI entry point.
//!
//! Keeping this in one place avoids duplicating the core workflow:
//! ingest -> weights -> exposures -> concentration -> threshold inference ->
//! model frame -> ordinal fit -> decomposition
//!
//! The CLI handlers then focus on presentation (printing vs. exporting).
//! Every stage reads immutable inputs from the previous stage and
//! materializes a new immutable result, so partial runs (`threshold`,
//! `decompose`) reuse the same code path with later stages switched off.

use tracing::{info, warn};

use crate::domain::{
    ContractCountyWeight, ContractYearExposure, CountyAttribute, DecompositionResult,
    EnrollmentRecord, GeoConcentration, PipelineConfig, RatingRecord, RunMetadata,
};
use crate::error::AppError;
use crate::model::decompose::{Decomposition, fit_and_decompose};
use crate::model::frame::{ModelFrame, assemble_frame, build_model_matrix};
use crate::report::buckets::{
    BucketSummaryRow, DecileFeature, DecileRow, bucket_summary, decile_table, opportunity_list,
};
use crate::threshold::bootstrap::{BootstrapConfig, BootstrapOutput, bootstrap_band_contrast};
use crate::threshold::logit::{ThresholdLogitReport, fit_threshold_logits};
use crate::threshold::{BandPointEstimate, NearThresholdRow, band_point_estimates,
    build_near_threshold_sample};
use crate::weights::{WeightSumQc, build_weights, contract_year_enrollment, weight_sum_qc};

/// Which stages a run executes beyond the shared weighting/exposure core.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stages {
    Full,
    ThresholdOnly,
    DecomposeOnly,
}

/// All staged inputs in the fixed internal schema.
#[derive(Debug, Clone)]
pub struct StagedInputs {
    pub enrollment: Vec<EnrollmentRecord>,
    pub ratings: Vec<RatingRecord>,
    pub poverty: Vec<CountyAttribute>,
    pub rural: Vec<CountyAttribute>,
    pub shortage: Vec<CountyAttribute>,
}

/// Load every extract named by the config.
pub fn load_inputs(config: &PipelineConfig) -> Result<StagedInputs, AppError> {
    let mut enrollment = Vec::new();
    for path in &config.enrollment_paths {
        enrollment.extend(crate::io::ingest::read_enrollment(path)?.records);
    }
    let mut ratings = Vec::new();
    for path in &config.ratings_paths {
        ratings.extend(crate::io::ingest::read_ratings(path)?.records);
    }
    let poverty = crate::io::ingest::read_poverty(&config.poverty_path)?.records;
    let rural = crate::io::ingest::read_rural(&config.rural_path)?.records;
    let shortage = crate::io::ingest::read_shortage(&config.shortage_path)?.records;

    if enrollment.is_empty() {
        return Err(AppError::input("No enrollment rows were staged."));
    }
    if ratings.is_empty() {
        return Err(AppError::input("No rating rows were staged."));
    }

    info!(
        enrollment_rows = enrollment.len(),
        rating_rows = ratings.len(),
        poverty_rows = poverty.len(),
        rural_rows = rural.len(),
        shortage_rows = shortage.len(),
        "staged inputs loaded"
    );

    Ok(StagedInputs {
        enrollment,
        ratings,
        poverty,
        rural,
        shortage,
    })
}

/// The three per-attribute exposure tables.
#[derive(Debug, Clone)]
pub struct ExposureSet {
    pub poverty: Vec<ContractYearExposure>,
    pub rural: Vec<ContractYearExposure>,
    pub shortage: Vec<ContractYearExposure>,
}

/// Near-threshold stage outputs.
#[derive(Debug, Clone)]
pub struct ThresholdOutput {
    pub sample: Vec<NearThresholdRow>,
    pub point_estimates: Vec<BandPointEstimate>,
    pub bootstrap: BootstrapOutput,
    pub logits: Vec<ThresholdLogitReport>,
}

/// Decomposition stage outputs.
#[derive(Debug, Clone)]
pub struct ModelOutput {
    pub frame: ModelFrame,
    pub decomposition: Decomposition,
    pub buckets: Vec<BucketSummaryRow>,
    pub opportunity: Vec<DecompositionResult>,
    pub decile_tables: Vec<Vec<DecileRow>>,
    pub metadata: RunMetadata,
}

/// All computed outputs of one run.
#[derive(Debug, Clone)]
pub struct RunOutput {
    pub weights: Vec<ContractCountyWeight>,
    pub weight_qc: Vec<WeightSumQc>,
    pub exposures: ExposureSet,
    pub concentration: Vec<GeoConcentration>,
    pub threshold: Option<ThresholdOutput>,
    pub model: Option<ModelOutput>,
}

/// Execute the pipeline over pre-loaded inputs.
pub fn run_with_inputs(
    config: &PipelineConfig,
    inputs: &StagedInputs,
    stages: Stages,
) -> Result<RunOutput, AppError> {
    let weights = build_weights(&inputs.enrollment);
    if weights.is_empty() {
        return Err(AppError::input(
            "Weighting produced no rows; every contract-year had zero enrollment.",
        ));
    }
    let weight_qc = weight_sum_qc(&weights);

    let exposures = ExposureSet {
        poverty: crate::exposure::lagged_exposure(
            &weights,
            &inputs.poverty,
            config.poverty_lag_years,
        ),
        rural: crate::exposure::vintage_exposure(&weights, &inputs.rural),
        shortage: crate::exposure::explicit_zero_exposure(&weights, &inputs.shortage),
    };
    let concentration = crate::concentration::concentration_metrics(&weights);

    let threshold = match stages {
        Stages::DecomposeOnly => None,
        Stages::Full | Stages::ThresholdOnly => Some(run_threshold(config, inputs, &exposures)?),
    };

    let model = match stages {
        Stages::ThresholdOnly => None,
        Stages::Full | Stages::DecomposeOnly => Some(run_model(
            config,
            inputs,
            &weights,
            &exposures,
            &concentration,
        )?),
    };

    Ok(RunOutput {
        weights,
        weight_qc,
        exposures,
        concentration,
        threshold,
        model,
    })
}

fn run_threshold(
    config: &PipelineConfig,
    inputs: &StagedInputs,
    exposures: &ExposureSet,
) -> Result<ThresholdOutput, AppError> {
    let sample = build_near_threshold_sample(
        &inputs.ratings,
        &exposures.poverty,
        &exposures.rural,
        &config.band,
    );
    let point_estimates = band_point_estimates(&sample);
    let bootstrap = bootstrap_band_contrast(
        &sample,
        &BootstrapConfig {
            draws: config.bootstrap_draws,
            seed: config.seed,
            min_band_contracts: config.min_band_contracts,
        },
    );

    let logits = if sample.is_empty() {
        warn!("near-threshold sample is empty; skipping logistic models");
        Vec::new()
    } else {
        fit_threshold_logits(&sample)?
    };

    Ok(ThresholdOutput {
        sample,
        point_estimates,
        bootstrap,
        logits,
    })
}

fn run_model(
    config: &PipelineConfig,
    inputs: &StagedInputs,
    weights: &[ContractCountyWeight],
    exposures: &ExposureSet,
    concentration: &[GeoConcentration],
) -> Result<ModelOutput, AppError> {
    let enrollment = contract_year_enrollment(weights);
    let frame = assemble_frame(
        &inputs.ratings,
        &exposures.poverty,
        &exposures.rural,
        &exposures.shortage,
        concentration,
        &enrollment,
    );
    let matrix = build_model_matrix(&frame)?;
    let decomposition = fit_and_decompose(&matrix)?;

    let buckets = bucket_summary(
        &decomposition.results,
        &frame,
        config.residual_tolerance,
    );
    let opportunity = opportunity_list(
        &decomposition.results,
        config.opportunity_slice,
        config.opportunity_top_n,
    );
    let decile_tables = vec![
        decile_table(&decomposition.results, &frame, DecileFeature::ShortageExposure),
        decile_table(&decomposition.results, &frame, DecileFeature::PovertyExposure),
        decile_table(&decomposition.results, &frame, DecileFeature::LogEnroll),
    ];

    let metadata = RunMetadata {
        tool: format!("star-decomp {}", env!("CARGO_PKG_VERSION")),
        generated_at: chrono::Utc::now().date_naive(),
        seed: config.seed,
        bootstrap_draws: config.bootstrap_draws,
        poverty_lag_years: config.poverty_lag_years,
        band: config.band,
        levels: decomposition.report.levels.clone(),
        n_modeled: decomposition.results.len(),
        ordinal_fit_weighted: false,
        weighting_note: "The ordinal fit is unweighted by design; the near-threshold \
                         logistic models carry the enrollment-weighted view. Do not \
                         unify the two weighting policies."
            .to_string(),
    };

    Ok(ModelOutput {
        frame,
        decomposition,
        buckets,
        opportunity,
        decile_tables,
        metadata,
    })
}

/// Load inputs and execute the requested stages.
pub fn run_pipeline(config: &PipelineConfig, stages: Stages) -> Result<RunOutput, AppError> {
    let inputs = load_inputs(config)?;
    run_with_inputs(config, &inputs, stages)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::sample::{SampleConfig, generate_sample};
    use crate::domain::BandRule;
    use crate::weights::WEIGHT_SUM_TOLERANCE;

    fn pipeline_config(dir: &std::path::Path) -> PipelineConfig {
        PipelineConfig {
            enrollment_paths: vec![
                dir.join("enrollment_2024.csv"),
                dir.join("enrollment_2025.csv"),
            ],
            ratings_paths: vec![dir.join("ratings_2024.csv"), dir.join("ratings_2025.csv")],
            poverty_path: dir.join("county_poverty.csv"),
            rural_path: dir.join("county_rural.csv"),
            shortage_path: dir.join("county_shortage.csv"),
            out_dir: None,
            poverty_lag_years: 1,
            band: BandRule::default(),
            bootstrap_draws: 100,
            seed: 42,
            min_band_contracts: 5,
            residual_tolerance: 0.25,
            opportunity_slice: (3.5, 3.9),
            opportunity_top_n: 20,
        }
    }

    fn generate(tag: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!("star_decomp_pipeline_{tag}"));
        generate_sample(&SampleConfig {
            out_dir: dir.clone(),
            contracts: 120,
            counties: 150,
            years: vec![2024, 2025],
            seed: 11,
        })
        .unwrap();
        dir
    }

    #[test]
    fn full_pipeline_runs_end_to_end_on_sample_data() {
        let dir = generate("full");
        let config = pipeline_config(&dir);
        let output = run_pipeline(&config, Stages::Full).unwrap();

        // Weight invariant holds for every contract-year.
        for qc in &output.weight_qc {
            assert!((qc.min_weight_sum - 1.0).abs() <= WEIGHT_SUM_TOLERANCE);
            assert!((qc.max_weight_sum - 1.0).abs() <= WEIGHT_SUM_TOLERANCE);
        }
        assert!(output.weights.iter().all(|w| w.enrollment > 0));

        // Both stages produced output.
        let threshold = output.threshold.as_ref().unwrap();
        assert!(!threshold.sample.is_empty());
        assert!(!threshold.point_estimates.is_empty());
        let model = output.model.as_ref().unwrap();
        assert!(!model.decomposition.results.is_empty());
        assert!(!model.metadata.ordinal_fit_weighted);

        // Expected ratings stay inside the observed level range.
        let levels = &model.decomposition.report.levels;
        let (lo, hi) = (levels[0], *levels.last().unwrap());
        for r in &model.decomposition.results {
            assert!(r.expected_rating >= lo && r.expected_rating <= hi);
            assert!((r.residual - (r.observed_rating - r.expected_rating)).abs() < 1e-12);
        }
    }

    #[test]
    fn threshold_only_skips_the_model_stage() {
        let dir = generate("threshold");
        let config = pipeline_config(&dir);
        let output = run_pipeline(&config, Stages::ThresholdOnly).unwrap();
        assert!(output.threshold.is_some());
        assert!(output.model.is_none());
    }

    #[test]
    fn pipeline_rerun_is_deterministic() {
        let dir = generate("determinism");
        let config = pipeline_config(&dir);
        let a = run_pipeline(&config, Stages::Full).unwrap();
        let b = run_pipeline(&config, Stages::Full).unwrap();

        let boot_a = &a.threshold.as_ref().unwrap().bootstrap;
        let boot_b = &b.threshold.as_ref().unwrap().bootstrap;
        assert_eq!(boot_a.summaries.len(), boot_b.summaries.len());
        for (x, y) in boot_a.summaries.iter().zip(boot_b.summaries.iter()) {
            assert_eq!(x.boot_mean.to_bits(), y.boot_mean.to_bits());
            assert_eq!(x.ci_lower.to_bits(), y.ci_lower.to_bits());
            assert_eq!(x.ci_upper.to_bits(), y.ci_upper.to_bits());
        }

        let decomp_a = &a.model.as_ref().unwrap().decomposition.results;
        let decomp_b = &b.model.as_ref().unwrap().decomposition.results;
        for (x, y) in decomp_a.iter().zip(decomp_b.iter()) {
            assert_eq!(x.expected_rating.to_bits(), y.expected_rating.to_bits());
        }
    }

    #[test]
    fn missing_extract_aborts_with_input_error() {
        let dir = generate("missing");
        let mut config = pipeline_config(&dir);
        config.poverty_path = dir.join("does_not_exist.csv");
        let err = run_pipeline(&config, Stages::Full).unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }
}
