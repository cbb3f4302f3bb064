//! Near-threshold contrast engine.
//!
//! Isolates contract-years whose rating falls in the configured bands around
//! a policy cutoff, restricted to rows with a resolvable poverty exposure
//! (out-of-scope geography is excluded even when the rating is in band).
//! Point-estimate tables come first; resampled confidence intervals and the
//! logistic models live in the submodules.

pub mod bootstrap;
pub mod logit;

use std::collections::{BTreeMap, HashMap, HashSet};

use serde::Serialize;

use crate::domain::{BandRule, ContractYearExposure, RatingRecord, ThresholdBand};
use crate::math::weighted_mean;

/// One analyzable contract-year inside the near-threshold window.
#[derive(Debug, Clone, Serialize)]
pub struct NearThresholdRow {
    pub contract_id: String,
    pub contract_year: i32,
    pub rating: f64,
    pub band: ThresholdBand,
    pub above_cut: bool,
    pub poverty_exposure: f64,
    /// Rural exposure when its coverage resolves; the logistic models only
    /// include the rural term when every sampled row has one.
    pub rural_exposure: Option<f64>,
    pub total_enrollment: f64,
}

/// Join ratings to exposures and keep the in-band, in-scope rows.
pub fn build_near_threshold_sample(
    ratings: &[RatingRecord],
    poverty: &[ContractYearExposure],
    rural: &[ContractYearExposure],
    rule: &BandRule,
) -> Vec<NearThresholdRow> {
    let poverty_by_key: HashMap<(&str, i32), &ContractYearExposure> = poverty
        .iter()
        .map(|e| ((e.contract_id.as_str(), e.contract_year), e))
        .collect();
    let rural_by_key: HashMap<(&str, i32), &ContractYearExposure> = rural
        .iter()
        .map(|e| ((e.contract_id.as_str(), e.contract_year), e))
        .collect();

    let mut out = Vec::new();
    for r in ratings {
        let band = rule.classify(r.rating);
        if band == ThresholdBand::Outside {
            continue;
        }
        let key = (r.contract_id.as_str(), r.contract_year);
        let Some(p) = poverty_by_key.get(&key) else {
            continue;
        };
        // Null exposure means "exclude from analysis", never "zero".
        let Some(poverty_exposure) = p.exposure else {
            continue;
        };
        let rural_exposure = rural_by_key.get(&key).and_then(|e| e.exposure);

        out.push(NearThresholdRow {
            contract_id: r.contract_id.clone(),
            contract_year: r.contract_year,
            rating: r.rating,
            band,
            above_cut: band == ThresholdBand::AboveCut,
            poverty_exposure,
            rural_exposure,
            total_enrollment: p.total_enrollment as f64,
        });
    }
    out.sort_by(|a, b| {
        (a.contract_year, a.contract_id.as_str()).cmp(&(b.contract_year, b.contract_id.as_str()))
    });
    out
}

/// Per year/band descriptive statistics, reported before any resampling.
#[derive(Debug, Clone, Serialize)]
pub struct BandPointEstimate {
    pub contract_year: i32,
    pub band: ThresholdBand,
    pub contracts: usize,
    pub rows: usize,
    pub total_enrollment: f64,
    pub mean_exposure_unweighted: f64,
    pub mean_exposure_enrollment_weighted: f64,
}

pub fn band_point_estimates(rows: &[NearThresholdRow]) -> Vec<BandPointEstimate> {
    let mut groups: BTreeMap<(i32, ThresholdBand), Vec<&NearThresholdRow>> = BTreeMap::new();
    for row in rows {
        groups
            .entry((row.contract_year, row.band))
            .or_default()
            .push(row);
    }

    groups
        .into_iter()
        .map(|((year, band), rows)| {
            let exposures: Vec<f64> = rows.iter().map(|r| r.poverty_exposure).collect();
            let enrollments: Vec<f64> = rows.iter().map(|r| r.total_enrollment).collect();
            let contracts: HashSet<&str> =
                rows.iter().map(|r| r.contract_id.as_str()).collect();
            BandPointEstimate {
                contract_year: year,
                band,
                contracts: contracts.len(),
                rows: rows.len(),
                total_enrollment: enrollments.iter().sum(),
                mean_exposure_unweighted: exposures.iter().sum::<f64>() / exposures.len() as f64,
                mean_exposure_enrollment_weighted: weighted_mean(&exposures, &enrollments),
            }
        })
        .collect()
}
