//! Command-line parsing for the structural decomposition pipeline.
//!
//! The goal of this module is to keep **argument parsing** and **command
//! dispatch** separate from the weighting/inference code.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Top-level CLI.
#[derive(Debug, Parser)]
#[command(
    name = "stars",
    version,
    about = "Structural vs. operational decomposition of star ratings"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the full pipeline: weights, exposures, concentration,
    /// near-threshold inference, and the structural decomposition.
    Run(RunArgs),
    /// Near-threshold analysis only (band contrasts, bootstrap, logit).
    Threshold(RunArgs),
    /// Model frame, ordinal fit, and decomposition only.
    Decompose(RunArgs),
    /// Write a synthetic demo dataset in the staged-extract CSV shapes.
    Sample(SampleArgs),
}

/// Common options for pipeline runs.
#[derive(Debug, Parser, Clone)]
pub struct RunArgs {
    /// Staged enrollment extract CSV(s), one per rating year (repeatable).
    #[arg(long = "enrollment", required = true, num_args = 1..)]
    pub enrollment: Vec<PathBuf>,

    /// Staged rating extract CSV(s) (repeatable).
    #[arg(long = "ratings", required = true, num_args = 1..)]
    pub ratings: Vec<PathBuf>,

    /// County poverty-rate CSV (keyed by its own vintage year).
    #[arg(long)]
    pub poverty: PathBuf,

    /// County rural-indicator CSV (single vintage).
    #[arg(long)]
    pub rural: PathBuf,

    /// County shortage-score CSV (designated counties only).
    #[arg(long)]
    pub shortage: PathBuf,

    /// Directory for CSV/JSON artifacts (reports print regardless).
    #[arg(long = "out-dir")]
    pub out_dir: Option<PathBuf>,

    /// Contract-year t joins poverty vintage t - lag.
    #[arg(long = "poverty-lag", default_value_t = 1)]
    pub poverty_lag: i32,

    /// Lower edge of the below-cut band.
    #[arg(long = "band-lower", default_value_t = 3.5)]
    pub band_lower: f64,

    /// The rating cutoff separating the two bands.
    #[arg(long = "band-cut", default_value_t = 4.0)]
    pub band_cut: f64,

    /// Upper edge of the above-cut band (inclusive).
    #[arg(long = "band-upper", default_value_t = 4.5)]
    pub band_upper: f64,

    /// Bootstrap resample draws per rating-year.
    #[arg(long, default_value_t = 2000)]
    pub draws: usize,

    /// Seed for the bootstrap resampler.
    #[arg(long, default_value_t = 42)]
    pub seed: u64,

    /// Skip a band-year's resample below this many distinct contracts.
    #[arg(long = "min-band-contracts", default_value_t = 5)]
    pub min_band_contracts: usize,

    /// Symmetric residual-bucket tolerance (stars).
    #[arg(long = "residual-tolerance", default_value_t = 0.25)]
    pub residual_tolerance: f64,

    /// Lower edge of the opportunity-list rating slice.
    #[arg(long = "opportunity-lower", default_value_t = 3.5)]
    pub opportunity_lower: f64,

    /// Upper edge of the opportunity-list rating slice.
    #[arg(long = "opportunity-upper", default_value_t = 3.9)]
    pub opportunity_upper: f64,

    /// Number of most-negative residuals in the opportunity list.
    #[arg(long, default_value_t = 50)]
    pub top: usize,
}

/// Options for synthetic sample generation.
#[derive(Debug, Parser, Clone)]
pub struct SampleArgs {
    /// Output directory for the synthetic CSVs.
    #[arg(long = "out-dir", default_value = "sample_data")]
    pub out_dir: PathBuf,

    /// Number of synthetic contracts.
    #[arg(long, default_value_t = 150)]
    pub contracts: usize,

    /// Size of the synthetic county pool.
    #[arg(long, default_value_t = 400)]
    pub counties: usize,

    /// Rating years to generate (repeatable).
    #[arg(long = "year", num_args = 1.., default_values_t = vec![2024, 2025])]
    pub years: Vec<i32>,

    /// Random seed for sample generation.
    #[arg(long, default_value_t = 7)]
    pub seed: u64,
}
