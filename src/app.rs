//! Top-level application orchestration.
//!
//! `src/main.rs` is intentionally tiny; this module is the "real main" that:
//! - parses CLI arguments
//! - runs the pipeline stages the subcommand asks for
//! - prints report tables
//! - writes optional CSV/JSON artifacts

use std::path::Path;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::cli::{Command, RunArgs, SampleArgs};
use crate::domain::{AttributeKind, BandRule, PipelineConfig};
use crate::error::AppError;

pub mod pipeline;

use pipeline::{RunOutput, Stages};

/// Entry point for the `stars` binary.
pub fn run() -> Result<(), AppError> {
    // Stage diagnostics go to stderr via tracing (RUST_LOG controls the
    // level); report tables stay on stdout.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = crate::cli::Cli::parse();
    match cli.command {
        Command::Run(args) => handle_pipeline(args, Stages::Full),
        Command::Threshold(args) => handle_pipeline(args, Stages::ThresholdOnly),
        Command::Decompose(args) => handle_pipeline(args, Stages::DecomposeOnly),
        Command::Sample(args) => handle_sample(args),
    }
}

fn handle_pipeline(args: RunArgs, stages: Stages) -> Result<(), AppError> {
    let config = pipeline_config_from_args(&args);
    let output = pipeline::run_pipeline(&config, stages)?;

    print_report(&config, &output);

    if let Some(out_dir) = &config.out_dir {
        export_artifacts(out_dir, &config, &output)?;
        println!("Artifacts written to {}", out_dir.display());
    }
    Ok(())
}

fn handle_sample(args: SampleArgs) -> Result<(), AppError> {
    let summary = crate::data::sample::generate_sample(&crate::data::sample::SampleConfig {
        out_dir: args.out_dir,
        contracts: args.contracts,
        counties: args.counties,
        years: args.years,
        seed: args.seed,
    })?;
    println!(
        "Generated {} contracts over {} counties:",
        summary.contracts, summary.counties
    );
    for file in &summary.files {
        println!("  {}", file.display());
    }
    Ok(())
}

fn print_report(config: &PipelineConfig, output: &RunOutput) {
    print!("{}", crate::report::format_run_header(config));
    println!();
    print!("{}", crate::report::format_weight_qc(&output.weight_qc));
    println!();
    print!(
        "{}",
        crate::report::format_coverage(
            AttributeKind::Poverty.display_name(),
            &crate::exposure::coverage_summary(&output.exposures.poverty)
        )
    );
    print!(
        "{}",
        crate::report::format_coverage(
            AttributeKind::Rural.display_name(),
            &crate::exposure::coverage_summary(&output.exposures.rural)
        )
    );
    print!(
        "{}",
        crate::report::format_coverage(
            &format!(
                "{} (designated share)",
                AttributeKind::Shortage.display_name()
            ),
            &crate::exposure::coverage_summary(&output.exposures.shortage)
        )
    );
    print!(
        "{}",
        crate::report::format_out_of_scope(
            AttributeKind::Poverty.display_name(),
            &output.exposures.poverty,
            20
        )
    );

    if let Some(threshold) = &output.threshold {
        println!();
        print!(
            "{}",
            crate::report::format_band_estimates(&threshold.point_estimates, &config.band)
        );
        println!();
        print!(
            "{}",
            crate::report::format_bootstrap(&threshold.bootstrap, &config.band)
        );
        println!();
        print!("{}", crate::report::format_logit_reports(&threshold.logits));
    }

    if let Some(model) = &output.model {
        println!();
        print!(
            "{}",
            crate::report::format_ordinal_report(
                &model.decomposition.report,
                &model.decomposition.cross_check
            )
        );
        println!();
        print!(
            "{}",
            crate::report::format_decomposition_summary(&model.decomposition.results)
        );
        println!();
        print!("{}", crate::report::format_bucket_summary(&model.buckets));
        println!();
        print!(
            "{}",
            crate::report::format_opportunity_list(&model.opportunity)
        );
        for table in &model.decile_tables {
            println!();
            print!("{}", crate::report::format_decile_table(table));
        }
        println!();
        print!("{}", crate::report::format_metadata(&model.metadata));
    }
}

fn export_artifacts(
    out_dir: &Path,
    config: &PipelineConfig,
    output: &RunOutput,
) -> Result<(), AppError> {
    std::fs::create_dir_all(out_dir).map_err(|e| {
        AppError::input(format!(
            "Failed to create output dir '{}': {e}",
            out_dir.display()
        ))
    })?;

    crate::io::export::write_weights_csv(&out_dir.join("contract_county_weights.csv"), &output.weights)?;
    crate::io::export::write_exposure_csv(
        &out_dir.join("poverty_exposure.csv"),
        &output.exposures.poverty,
    )?;
    crate::io::export::write_exposure_csv(
        &out_dir.join("rural_exposure.csv"),
        &output.exposures.rural,
    )?;
    crate::io::export::write_exposure_csv(
        &out_dir.join("shortage_exposure.csv"),
        &output.exposures.shortage,
    )?;
    crate::io::export::write_concentration_csv(
        &out_dir.join("geo_concentration.csv"),
        &output.concentration,
    )?;

    if let Some(threshold) = &output.threshold {
        crate::io::export::write_bootstrap_csv(
            &out_dir.join("bootstrap_summary.csv"),
            &threshold.bootstrap,
            &config.band,
        )?;
        crate::io::export::write_logit_csv(
            &out_dir.join("threshold_odds_ratios.csv"),
            &threshold.logits,
        )?;
    }

    if let Some(model) = &output.model {
        crate::io::export::write_frame_csv(&out_dir.join("model_frame.csv"), &model.frame)?;
        crate::io::export::write_decomposition_csv(
            &out_dir.join("decomposition.csv"),
            &model.decomposition.results,
            config.residual_tolerance,
        )?;
        crate::io::export::write_ordinal_csv(
            &out_dir.join("ordinal_coefficients.csv"),
            &model.decomposition.report,
        )?;
        crate::io::export::write_bucket_csv(
            &out_dir.join("residual_buckets.csv"),
            &model.buckets,
        )?;
        crate::io::export::write_opportunity_csv(
            &out_dir.join("opportunity_list.csv"),
            &model.opportunity,
        )?;
        for table in &model.decile_tables {
            if let Some(first) = table.first() {
                let name = format!(
                    "deciles_{}.csv",
                    first.feature.display_name().replace([' ', '(', ')'], "_")
                );
                crate::io::export::write_decile_csv(&out_dir.join(name), table)?;
            }
        }
        crate::io::export::write_metadata_json(
            &out_dir.join("run_metadata.json"),
            &model.metadata,
        )?;
    }

    Ok(())
}

pub fn pipeline_config_from_args(args: &RunArgs) -> PipelineConfig {
    PipelineConfig {
        enrollment_paths: args.enrollment.clone(),
        ratings_paths: args.ratings.clone(),
        poverty_path: args.poverty.clone(),
        rural_path: args.rural.clone(),
        shortage_path: args.shortage.clone(),
        out_dir: args.out_dir.clone(),
        poverty_lag_years: args.poverty_lag,
        band: BandRule {
            lower: args.band_lower,
            cut: args.band_cut,
            upper: args.band_upper,
        },
        bootstrap_draws: args.draws,
        seed: args.seed,
        min_band_contracts: args.min_band_contracts,
        residual_tolerance: args.residual_tolerance,
        opportunity_slice: (args.opportunity_lower, args.opportunity_upper),
        opportunity_top_n: args.top,
    }
}
