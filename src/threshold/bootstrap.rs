//! Cluster bootstrap for band contrasts.
//!
//! Resampling draws **distinct contract identifiers** with replacement within
//! each band-year, then expands each sampled identifier back to its rows via
//! re-join. This preserves within-contract multiplicity: a contract sampled
//! twice contributes its rows twice, and a contract with many rows never
//! fragments across draws.
//!
//! Determinism contract: identical seed + identical input data produce
//! bit-identical summaries regardless of thread count. Each rating-year gets
//! its own RNG stream derived from the master seed, and rayon only
//! distributes whole years, so scheduling cannot reorder draws.

use std::collections::BTreeMap;

use rand::prelude::*;
use rand::rngs::StdRng;
use rayon::prelude::*;
use serde::Serialize;
use tracing::warn;

use crate::domain::{ThresholdBand, WeightScheme};
use crate::math::{mean, percentile, weighted_mean};
use crate::threshold::NearThresholdRow;

#[derive(Debug, Clone)]
pub struct BootstrapConfig {
    pub draws: usize,
    pub seed: u64,
    /// Band-years with fewer distinct contracts than this are skipped and
    /// flagged instead of resampled.
    pub min_band_contracts: usize,
}

/// Resample summary for one rating-year under one weighting scheme.
#[derive(Debug, Clone, Serialize)]
pub struct BootstrapSummary {
    pub contract_year: i32,
    pub scheme: WeightScheme,
    pub draws: usize,
    pub boot_mean: f64,
    pub ci_lower: f64,
    pub ci_median: f64,
    pub ci_upper: f64,
}

/// A band-year skipped for insufficient distinct contracts.
#[derive(Debug, Clone, Serialize)]
pub struct SkippedYear {
    pub contract_year: i32,
    pub below_contracts: usize,
    pub above_contracts: usize,
}

#[derive(Debug, Clone)]
pub struct BootstrapOutput {
    pub summaries: Vec<BootstrapSummary>,
    pub skipped: Vec<SkippedYear>,
}

/// Indexed band-year data: distinct sorted ids plus each id's row indices.
struct BandIndex<'a> {
    ids: Vec<&'a str>,
    rows_by_id: BTreeMap<&'a str, Vec<usize>>,
}

impl<'a> BandIndex<'a> {
    fn build(rows: &'a [NearThresholdRow], band: ThresholdBand, year: i32) -> Self {
        let mut rows_by_id: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
        for (idx, row) in rows.iter().enumerate() {
            if row.contract_year == year && row.band == band {
                rows_by_id.entry(row.contract_id.as_str()).or_default().push(idx);
            }
        }
        let ids: Vec<&str> = rows_by_id.keys().copied().collect();
        Self { ids, rows_by_id }
    }

    /// One cluster resample: ids with replacement, expanded to row indices.
    fn resample(&self, rng: &mut StdRng) -> Vec<usize> {
        let mut out = Vec::new();
        for _ in 0..self.ids.len() {
            let id = self.ids[rng.gen_range(0..self.ids.len())];
            out.extend_from_slice(&self.rows_by_id[id]);
        }
        out
    }
}

fn contrast(rows: &[NearThresholdRow], below: &[usize], above: &[usize]) -> (f64, f64) {
    let exp_below: Vec<f64> = below.iter().map(|&i| rows[i].poverty_exposure).collect();
    let exp_above: Vec<f64> = above.iter().map(|&i| rows[i].poverty_exposure).collect();
    let enr_below: Vec<f64> = below.iter().map(|&i| rows[i].total_enrollment).collect();
    let enr_above: Vec<f64> = above.iter().map(|&i| rows[i].total_enrollment).collect();

    let diff_unweighted = mean(&exp_below) - mean(&exp_above);
    let diff_weighted =
        weighted_mean(&exp_below, &enr_below) - weighted_mean(&exp_above, &enr_above);
    (diff_unweighted, diff_weighted)
}

/// Derive an independent per-year RNG stream from the master seed.
fn year_seed(master: u64, year: i32) -> u64 {
    // SplitMix-style spread so adjacent years land far apart in seed space.
    (master ^ (year as u64)).wrapping_mul(0x9E37_79B9_7F4A_7C15)
}

enum YearOutcome {
    Skipped(SkippedYear),
    Summaries([BootstrapSummary; 2]),
}

/// Bootstrap the below-minus-above exposure contrast per rating-year.
pub fn bootstrap_band_contrast(
    rows: &[NearThresholdRow],
    config: &BootstrapConfig,
) -> BootstrapOutput {
    let mut years: Vec<i32> = rows.iter().map(|r| r.contract_year).collect();
    years.sort_unstable();
    years.dedup();

    let outcomes: Vec<YearOutcome> = years
        .par_iter()
        .map(|&year| {
            let below = BandIndex::build(rows, ThresholdBand::BelowCut, year);
            let above = BandIndex::build(rows, ThresholdBand::AboveCut, year);

            if below.ids.len() < config.min_band_contracts
                || above.ids.len() < config.min_band_contracts
            {
                warn!(
                    year,
                    below_contracts = below.ids.len(),
                    above_contracts = above.ids.len(),
                    "small sample in band-year; skipping bootstrap"
                );
                return YearOutcome::Skipped(SkippedYear {
                    contract_year: year,
                    below_contracts: below.ids.len(),
                    above_contracts: above.ids.len(),
                });
            }

            let mut rng = StdRng::seed_from_u64(year_seed(config.seed, year));
            let mut diffs_unweighted = Vec::with_capacity(config.draws);
            let mut diffs_weighted = Vec::with_capacity(config.draws);
            for _ in 0..config.draws {
                let sample_below = below.resample(&mut rng);
                let sample_above = above.resample(&mut rng);
                let (unweighted, weighted) = contrast(rows, &sample_below, &sample_above);
                diffs_unweighted.push(unweighted);
                diffs_weighted.push(weighted);
            }

            let summarize = |diffs: &[f64], scheme: WeightScheme| BootstrapSummary {
                contract_year: year,
                scheme,
                draws: diffs.len(),
                boot_mean: mean(diffs),
                ci_lower: percentile(diffs, 2.5),
                ci_median: percentile(diffs, 50.0),
                ci_upper: percentile(diffs, 97.5),
            };

            YearOutcome::Summaries([
                summarize(&diffs_unweighted, WeightScheme::Unweighted),
                summarize(&diffs_weighted, WeightScheme::EnrollmentWeighted),
            ])
        })
        .collect();

    let mut summaries = Vec::new();
    let mut skipped = Vec::new();
    for outcome in outcomes {
        match outcome {
            YearOutcome::Skipped(s) => skipped.push(s),
            YearOutcome::Summaries(pair) => summaries.extend(pair),
        }
    }
    BootstrapOutput { summaries, skipped }
}
