//! Exposure weighting engine: enrollment → within-contract-year weights.
//!
//! Contract: within each (contract_id, year) group,
//! `w_enroll = enrollment / Σ enrollment`, where the denominator is computed
//! after dropping rows with non-positive enrollment. Dropped rows never
//! appear in the weight table (they are not zero-weighted), and a
//! contract-year whose total enrollment is zero simply produces no rows;
//! that is a data-quality signal, not an error.

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::warn;

use crate::domain::{ContractCountyWeight, EnrollmentRecord};

/// Tolerance for the within-contract-year weight-sum invariant.
pub const WEIGHT_SUM_TOLERANCE: f64 = 1e-6;

/// Build the contract-county weight table.
///
/// Plan-level rows are first summed to one row per (contract, year, county);
/// output is sorted by (contract_id, year, county_fips) so downstream stages
/// and exports are deterministic.
pub fn build_weights(records: &[EnrollmentRecord]) -> Vec<ContractCountyWeight> {
    // Aggregate plan-level rows; BTreeMap doubles as the deterministic sort.
    let mut by_county: BTreeMap<(String, i32, String), i64> = BTreeMap::new();
    for r in records {
        if r.enrollment <= 0 {
            continue;
        }
        *by_county
            .entry((r.contract_id.clone(), r.year, r.county_fips.clone()))
            .or_insert(0) += r.enrollment;
    }

    let mut totals: BTreeMap<(String, i32), i64> = BTreeMap::new();
    for ((contract_id, year, _), enrollment) in &by_county {
        *totals.entry((contract_id.clone(), *year)).or_insert(0) += enrollment;
    }

    let mut out = Vec::with_capacity(by_county.len());
    for ((contract_id, year, county_fips), enrollment) in by_county {
        let total = totals[&(contract_id.clone(), year)];
        if total <= 0 {
            continue;
        }
        out.push(ContractCountyWeight {
            w_enroll: enrollment as f64 / total as f64,
            contract_id,
            year,
            county_fips,
            enrollment,
            contract_year_total_enrollment: total,
        });
    }
    out
}

/// Contract-year total enrollment, read off the weight table.
pub fn contract_year_enrollment(
    weights: &[ContractCountyWeight],
) -> BTreeMap<(String, i32), i64> {
    let mut out = BTreeMap::new();
    for w in weights {
        out.entry((w.contract_id.clone(), w.year))
            .or_insert(w.contract_year_total_enrollment);
    }
    out
}

/// Per-year weight-sum QC summary (sums should be ~1.0).
#[derive(Debug, Clone, Serialize)]
pub struct WeightSumQc {
    pub year: i32,
    pub contract_years_checked: usize,
    pub avg_weight_sum: f64,
    pub min_weight_sum: f64,
    pub max_weight_sum: f64,
}

/// Check the weight-sum invariant and summarize it per year.
///
/// A violation beyond [`WEIGHT_SUM_TOLERANCE`] indicates a grouping bug; it
/// is logged loudly here and asserted in tests, never silently accepted.
pub fn weight_sum_qc(weights: &[ContractCountyWeight]) -> Vec<WeightSumQc> {
    let mut sums: BTreeMap<(String, i32), f64> = BTreeMap::new();
    for w in weights {
        *sums.entry((w.contract_id.clone(), w.year)).or_insert(0.0) += w.w_enroll;
    }

    let mut per_year: BTreeMap<i32, Vec<f64>> = BTreeMap::new();
    for ((contract_id, year), sum) in sums {
        if (sum - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
            warn!(
                contract_id = %contract_id,
                year,
                weight_sum = sum,
                "weight sum deviates from 1.0 beyond tolerance"
            );
        }
        per_year.entry(year).or_default().push(sum);
    }

    per_year
        .into_iter()
        .map(|(year, sums)| {
            let n = sums.len();
            let avg = sums.iter().sum::<f64>() / n as f64;
            let min = sums.iter().copied().fold(f64::INFINITY, f64::min);
            let max = sums.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            WeightSumQc {
                year,
                contract_years_checked: n,
                avg_weight_sum: avg,
                min_weight_sum: min,
                max_weight_sum: max,
            }
        })
        .collect()
}
