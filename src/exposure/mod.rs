//! Lagged attribute joiner: contract-county weights × county attributes →
//! contract-year exposures.
//!
//! Two join shapes exist, and the difference is deliberate:
//!
//! - **Renormalized** (poverty, rural): the exposure is the weighted average
//!   over *matched* counties only, rescaled by the matched weight. A contract
//!   with 60% county coverage gets an exposure computed as if the other 40%
//!   did not exist, with `coverage_weight_share` carrying the confidence
//!   signal. This avoids biasing exposures toward zero for data-sparse
//!   contracts.
//! - **Explicit zero** (shortage): counties without a designation are real
//!   zeros, not missing data, so the exposure is the raw weighted sum over
//!   all counties. `coverage_weight_share` then reports the
//!   designated-weight share as a diagnostic, and `out_of_scope` stays false
//!   whenever the contract-year has weight rows at all.
//!
//! Joins are explicit hash joins on typed keys; the engine never sees source
//! column names here.

use std::collections::{BTreeMap, HashMap};

use serde::Serialize;

use crate::domain::{ContractCountyWeight, ContractYearExposure, CountyAttribute};

/// Index weights by contract-year, preserving deterministic group order.
fn group_weights(
    weights: &[ContractCountyWeight],
) -> BTreeMap<(&str, i32), Vec<&ContractCountyWeight>> {
    let mut groups: BTreeMap<(&str, i32), Vec<&ContractCountyWeight>> = BTreeMap::new();
    for w in weights {
        groups
            .entry((w.contract_id.as_str(), w.year))
            .or_default()
            .push(w);
    }
    groups
}

fn aggregate<F>(
    weights: &[ContractCountyWeight],
    lookup: F,
    renormalize: bool,
) -> Vec<ContractYearExposure>
where
    F: Fn(&str, i32) -> Option<f64>,
{
    let mut out = Vec::new();
    for ((contract_id, year), rows) in group_weights(weights) {
        let total_enrollment = rows
            .iter()
            .map(|w| w.contract_year_total_enrollment)
            .max()
            .unwrap_or(0);

        let mut matched_weight = 0.0;
        let mut weighted_sum = 0.0;
        let mut counties_matched = 0usize;
        for w in &rows {
            if let Some(value) = lookup(&w.county_fips, year) {
                matched_weight += w.w_enroll;
                weighted_sum += w.w_enroll * value;
                counties_matched += 1;
            }
        }

        let (exposure, out_of_scope) = if renormalize {
            if matched_weight > 0.0 {
                (Some(weighted_sum / matched_weight), false)
            } else {
                // Coverage failure: null, never zero.
                (None, true)
            }
        } else {
            // Unmatched counties contribute an explicit 0 to the sum, so the
            // raw weighted sum is the exposure and the group is always in
            // scope.
            (Some(weighted_sum), false)
        };

        out.push(ContractYearExposure {
            contract_id: contract_id.to_string(),
            contract_year: year,
            total_enrollment,
            exposure,
            coverage_weight_share: matched_weight,
            out_of_scope,
            counties_total: rows.len(),
            counties_matched,
        });
    }
    out
}

/// Renormalized exposure against an attribute keyed by its own vintage year.
///
/// Contract-year `t` joins attribute year `t - lag_years` (poverty uses
/// lag 1).
pub fn lagged_exposure(
    weights: &[ContractCountyWeight],
    attributes: &[CountyAttribute],
    lag_years: i32,
) -> Vec<ContractYearExposure> {
    let mut by_year_county: HashMap<(i32, &str), f64> = HashMap::new();
    for a in attributes {
        if let Some(year) = a.year {
            by_year_county.insert((year, a.county_fips.as_str()), a.value);
        }
    }
    aggregate(
        weights,
        |county, contract_year| {
            by_year_county
                .get(&(contract_year - lag_years, county))
                .copied()
        },
        true,
    )
}

/// Renormalized exposure against a single-vintage attribute (no temporal
/// lag; rural classifications do not change rating-year-to-year in source
/// data).
pub fn vintage_exposure(
    weights: &[ContractCountyWeight],
    attributes: &[CountyAttribute],
) -> Vec<ContractYearExposure> {
    let by_county: HashMap<&str, f64> = attributes
        .iter()
        .map(|a| (a.county_fips.as_str(), a.value))
        .collect();
    aggregate(weights, |county, _| by_county.get(county).copied(), true)
}

/// Explicit-zero exposure for shortage scores: non-designated counties count
/// as 0, the raw weighted sum is the exposure, and `coverage_weight_share`
/// reports the designated-weight share.
pub fn explicit_zero_exposure(
    weights: &[ContractCountyWeight],
    attributes: &[CountyAttribute],
) -> Vec<ContractYearExposure> {
    let by_county: HashMap<&str, f64> = attributes
        .iter()
        .map(|a| (a.county_fips.as_str(), a.value))
        .collect();
    aggregate(weights, |county, _| by_county.get(county).copied(), false)
}

/// Per-year coverage summary for one exposure table.
#[derive(Debug, Clone, Serialize)]
pub struct CoverageSummary {
    pub contract_year: i32,
    pub contract_years: usize,
    pub out_of_scope_count: usize,
    pub avg_coverage_weight_share: f64,
    pub min_coverage_weight_share: f64,
    pub max_coverage_weight_share: f64,
}

pub fn coverage_summary(exposures: &[ContractYearExposure]) -> Vec<CoverageSummary> {
    let mut per_year: BTreeMap<i32, Vec<&ContractYearExposure>> = BTreeMap::new();
    for e in exposures {
        per_year.entry(e.contract_year).or_default().push(e);
    }
    per_year
        .into_iter()
        .map(|(year, rows)| {
            let shares: Vec<f64> = rows.iter().map(|e| e.coverage_weight_share).collect();
            CoverageSummary {
                contract_year: year,
                contract_years: rows.len(),
                out_of_scope_count: rows.iter().filter(|e| e.out_of_scope).count(),
                avg_coverage_weight_share: shares.iter().sum::<f64>() / shares.len() as f64,
                min_coverage_weight_share: shares.iter().copied().fold(f64::INFINITY, f64::min),
                max_coverage_weight_share: shares
                    .iter()
                    .copied()
                    .fold(f64::NEG_INFINITY, f64::max),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::EnrollmentRecord;
    use crate::weights::build_weights;
    use rand::prelude::*;
    use rand::rngs::StdRng;

    fn weights_for(counts: &[(&str, i64)]) -> Vec<ContractCountyWeight> {
        let records: Vec<EnrollmentRecord> = counts
            .iter()
            .map(|(fips, n)| EnrollmentRecord {
                contract_id: "H100".to_string(),
                year: 2024,
                county_fips: fips.to_string(),
                enrollment: *n,
            })
            .collect();
        build_weights(&records)
    }

    fn attr(fips: &str, year: Option<i32>, value: f64) -> CountyAttribute {
        CountyAttribute {
            county_fips: fips.to_string(),
            year,
            value,
        }
    }

    #[test]
    fn full_coverage_scenario() {
        let weights = weights_for(&[("06001", 80), ("06003", 20)]);
        let poverty = vec![
            attr("06001", Some(2023), 0.10),
            attr("06003", Some(2023), 0.30),
        ];
        let exposures = lagged_exposure(&weights, &poverty, 1);
        assert_eq!(exposures.len(), 1);
        let e = &exposures[0];
        assert!((e.exposure.unwrap() - 0.14).abs() < 1e-12);
        assert!((e.coverage_weight_share - 1.0).abs() < 1e-12);
        assert!(!e.out_of_scope);
        assert_eq!(e.total_enrollment, 100);
    }

    #[test]
    fn partial_coverage_renormalizes() {
        // Missing 06003 attribute: exposure is the matched-counties average,
        // not the raw weighted sum.
        let weights = weights_for(&[("06001", 80), ("06003", 20)]);
        let poverty = vec![attr("06001", Some(2023), 0.10)];
        let exposures = lagged_exposure(&weights, &poverty, 1);
        let e = &exposures[0];
        assert!((e.exposure.unwrap() - 0.10).abs() < 1e-12);
        assert!((e.coverage_weight_share - 0.8).abs() < 1e-12);
        assert!(!e.out_of_scope);
        assert_eq!(e.counties_matched, 1);
        assert_eq!(e.counties_total, 2);
    }

    #[test]
    fn zero_coverage_is_null_never_zero() {
        let weights = weights_for(&[("06001", 80), ("06003", 20)]);
        let poverty = vec![attr("99999", Some(2023), 0.5)];
        let exposures = lagged_exposure(&weights, &poverty, 1);
        let e = &exposures[0];
        assert!(e.exposure.is_none());
        assert_eq!(e.coverage_weight_share, 0.0);
        assert!(e.out_of_scope);
    }

    #[test]
    fn lag_rule_uses_attribute_vintage() {
        let weights = weights_for(&[("06001", 100)]);
        // Attribute from the contract year itself must NOT match under lag 1.
        let same_year = vec![attr("06001", Some(2024), 0.2)];
        assert!(lagged_exposure(&weights, &same_year, 1)[0].out_of_scope);

        let lagged = vec![attr("06001", Some(2023), 0.2)];
        assert!(!lagged_exposure(&weights, &lagged, 1)[0].out_of_scope);
    }

    #[test]
    fn rural_share_stays_in_unit_interval() {
        let weights = weights_for(&[("06001", 60), ("06003", 25), ("06005", 15)]);
        let rural = vec![
            attr("06001", None, 0.0),
            attr("06003", None, 1.0),
            attr("06005", None, 1.0),
        ];
        let e = &vintage_exposure(&weights, &rural)[0];
        let share = e.exposure.unwrap();
        assert!((0.0..=1.0).contains(&share));
        assert!((share - 0.40).abs() < 1e-12);
    }

    #[test]
    fn shortage_treats_unmatched_as_explicit_zero() {
        let weights = weights_for(&[("06001", 80), ("06003", 20)]);
        let shortage = vec![attr("06003", None, 15.0)];
        let e = &explicit_zero_exposure(&weights, &shortage)[0];
        // Raw weighted sum, no renormalization: 0.2 * 15.
        assert!((e.exposure.unwrap() - 3.0).abs() < 1e-12);
        // Designated-weight share is the diagnostic; not out of scope.
        assert!((e.coverage_weight_share - 0.2).abs() < 1e-12);
        assert!(!e.out_of_scope);
    }

    #[test]
    fn shortage_with_no_designations_is_a_real_zero() {
        let weights = weights_for(&[("06001", 80)]);
        let e = &explicit_zero_exposure(&weights, &[])[0];
        assert_eq!(e.exposure, Some(0.0));
        assert_eq!(e.coverage_weight_share, 0.0);
        assert!(!e.out_of_scope);
    }

    #[test]
    fn renormalized_exposure_bounded_by_matched_attribute_range() {
        // Randomized weights/attributes: a weighted average cannot leave the
        // range of its matched inputs.
        let mut rng = StdRng::seed_from_u64(17);
        for _ in 0..200 {
            let n = rng.gen_range(2..12);
            let counts: Vec<(String, i64)> = (0..n)
                .map(|i| (format!("{:05}", 1000 + i * 2), rng.gen_range(1..500)))
                .collect();
            let count_refs: Vec<(&str, i64)> =
                counts.iter().map(|(f, c)| (f.as_str(), *c)).collect();
            let weights = weights_for(&count_refs);

            let mut matched_values = Vec::new();
            let mut attrs = Vec::new();
            for (fips, _) in &counts {
                if rng.gen_bool(0.7) {
                    let v = rng.gen_range(-5.0..5.0);
                    attrs.push(attr(fips, Some(2023), v));
                    matched_values.push(v);
                }
            }

            let e = &lagged_exposure(&weights, &attrs, 1)[0];
            match e.exposure {
                None => assert!(matched_values.is_empty()),
                Some(value) => {
                    let lo = matched_values.iter().copied().fold(f64::INFINITY, f64::min);
                    let hi = matched_values
                        .iter()
                        .copied()
                        .fold(f64::NEG_INFINITY, f64::max);
                    assert!(
                        value >= lo - 1e-9 && value <= hi + 1e-9,
                        "exposure {value} outside [{lo}, {hi}]"
                    );
                }
            }
        }
    }

    #[test]
    fn shortage_exposure_monotone_in_designated_weight() {
        // Growing a designated county's enrollment (holding others fixed)
        // must not decrease the shortage exposure.
        let shortage = vec![attr("06003", None, 10.0)];
        let mut prev = f64::NEG_INFINITY;
        for designated_enrollment in [10, 50, 100, 500, 1000] {
            let weights = weights_for(&[("06001", 100), ("06003", designated_enrollment)]);
            let e = &explicit_zero_exposure(&weights, &shortage)[0];
            let value = e.exposure.unwrap();
            assert!(value >= prev, "{value} < {prev}");
            prev = value;
        }
    }

    #[test]
    fn coverage_summary_counts_out_of_scope() {
        let mut exposures = lagged_exposure(
            &weights_for(&[("06001", 80)]),
            &[attr("06001", Some(2023), 0.1)],
            1,
        );
        exposures.push(ContractYearExposure {
            contract_id: "H200".to_string(),
            contract_year: 2024,
            total_enrollment: 50,
            exposure: None,
            coverage_weight_share: 0.0,
            out_of_scope: true,
            counties_total: 3,
            counties_matched: 0,
        });
        let summary = coverage_summary(&exposures);
        assert_eq!(summary.len(), 1);
        assert_eq!(summary[0].contract_years, 2);
        assert_eq!(summary[0].out_of_scope_count, 1);
    }
}
