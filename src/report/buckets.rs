//! Residual classification and report-ready summary tables.
//!
//! The bucket labels are a closed enumeration ([`ResidualBucket`]), not
//! string literals scattered through the code; everything here is a pure
//! function of the decomposition results plus the frame features.

use std::collections::{BTreeMap, HashMap};

use serde::Serialize;

use crate::domain::{DecompositionResult, ResidualBucket};
use crate::math::mean;
use crate::model::frame::{FrameRow, ModelFrame};

/// Per year/bucket aggregate over the modeled contract-years.
#[derive(Debug, Clone, Serialize)]
pub struct BucketSummaryRow {
    pub contract_year: i32,
    pub bucket: ResidualBucket,
    pub n: usize,
    pub mean_observed: f64,
    pub mean_expected: f64,
    pub mean_residual: f64,
    pub mean_poverty: f64,
    pub mean_shortage: f64,
    pub mean_log_enroll: f64,
}

fn frame_index(frame: &ModelFrame) -> HashMap<(&str, i32), &FrameRow> {
    frame
        .rows
        .iter()
        .map(|r| ((r.contract_id.as_str(), r.contract_year), r))
        .collect()
}

pub fn bucket_summary(
    results: &[DecompositionResult],
    frame: &ModelFrame,
    tolerance: f64,
) -> Vec<BucketSummaryRow> {
    let features = frame_index(frame);

    let mut groups: BTreeMap<(i32, ResidualBucket), Vec<&DecompositionResult>> = BTreeMap::new();
    for r in results {
        let bucket = ResidualBucket::classify(r.residual, tolerance);
        groups.entry((r.contract_year, bucket)).or_default().push(r);
    }

    groups
        .into_iter()
        .map(|((year, bucket), rows)| {
            let observed: Vec<f64> = rows.iter().map(|r| r.observed_rating).collect();
            let expected: Vec<f64> = rows.iter().map(|r| r.expected_rating).collect();
            let residuals: Vec<f64> = rows.iter().map(|r| r.residual).collect();
            let feature_of = |get: &dyn Fn(&FrameRow) -> Option<f64>| -> Vec<f64> {
                rows.iter()
                    .filter_map(|r| {
                        features
                            .get(&(r.contract_id.as_str(), r.contract_year))
                            .and_then(|f| get(f))
                    })
                    .collect()
            };
            BucketSummaryRow {
                contract_year: year,
                bucket,
                n: rows.len(),
                mean_observed: mean(&observed),
                mean_expected: mean(&expected),
                mean_residual: mean(&residuals),
                mean_poverty: mean(&feature_of(&|f| f.poverty_exposure)),
                mean_shortage: mean(&feature_of(&|f| f.shortage_exposure)),
                mean_log_enroll: mean(&feature_of(&|f| f.log_enroll())),
            }
        })
        .collect()
}

/// The most negative residuals within a rating slice: contracts observed
/// below their structural expectation, i.e. execution opportunities.
pub fn opportunity_list(
    results: &[DecompositionResult],
    slice: (f64, f64),
    top_n: usize,
) -> Vec<DecompositionResult> {
    let (lo, hi) = slice;
    let mut in_slice: Vec<DecompositionResult> = results
        .iter()
        .filter(|r| r.observed_rating >= lo && r.observed_rating <= hi)
        .cloned()
        .collect();
    in_slice.sort_by(|a, b| {
        (a.contract_year, a.residual)
            .partial_cmp(&(b.contract_year, b.residual))
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    in_slice.truncate(top_n);
    in_slice
}

/// Which feature a decile table is cut on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DecileFeature {
    PovertyExposure,
    ShortageExposure,
    LogEnroll,
}

impl DecileFeature {
    pub fn display_name(self) -> &'static str {
        match self {
            DecileFeature::PovertyExposure => "poverty exposure",
            DecileFeature::ShortageExposure => "shortage exposure",
            DecileFeature::LogEnroll => "scale (log enrollment)",
        }
    }

    fn value(self, row: &FrameRow) -> Option<f64> {
        match self {
            DecileFeature::PovertyExposure => row.poverty_exposure,
            DecileFeature::ShortageExposure => row.shortage_exposure,
            DecileFeature::LogEnroll => row.log_enroll(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DecileRow {
    pub feature: DecileFeature,
    pub contract_year: i32,
    /// 1-based decile over the full modeled sample.
    pub decile: usize,
    pub n: usize,
    pub feature_mean: f64,
    pub observed_mean: f64,
    pub expected_mean: f64,
    pub residual_mean: f64,
}

/// Decile-of-feature effect table.
///
/// Deciles are cut over the full modeled sample (rank-based), then grouped
/// by (year, decile), matching the report artifact layout.
pub fn decile_table(
    results: &[DecompositionResult],
    frame: &ModelFrame,
    feature: DecileFeature,
) -> Vec<DecileRow> {
    let features = frame_index(frame);

    let mut with_value: Vec<(&DecompositionResult, f64)> = results
        .iter()
        .filter_map(|r| {
            features
                .get(&(r.contract_id.as_str(), r.contract_year))
                .and_then(|f| feature.value(f))
                .map(|v| (r, v))
        })
        .collect();
    if with_value.is_empty() {
        return Vec::new();
    }
    with_value.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));

    let n = with_value.len();
    let mut groups: BTreeMap<(i32, usize), Vec<(&DecompositionResult, f64)>> = BTreeMap::new();
    for (rank, (r, v)) in with_value.into_iter().enumerate() {
        let decile = (rank * 10 / n).min(9) + 1;
        groups.entry((r.contract_year, decile)).or_default().push((r, v));
    }

    groups
        .into_iter()
        .map(|((year, decile), rows)| {
            let values: Vec<f64> = rows.iter().map(|(_, v)| *v).collect();
            let observed: Vec<f64> = rows.iter().map(|(r, _)| r.observed_rating).collect();
            let expected: Vec<f64> = rows.iter().map(|(r, _)| r.expected_rating).collect();
            let residuals: Vec<f64> = rows.iter().map(|(r, _)| r.residual).collect();
            DecileRow {
                feature,
                contract_year: year,
                decile,
                n: rows.len(),
                feature_mean: mean(&values),
                observed_mean: mean(&observed),
                expected_mean: mean(&expected),
                residual_mean: mean(&residuals),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(contract: &str, year: i32, observed: f64, expected: f64) -> DecompositionResult {
        DecompositionResult {
            contract_id: contract.to_string(),
            contract_year: year,
            observed_rating: observed,
            expected_rating: expected,
            residual: observed - expected,
        }
    }

    fn frame_with(rows: &[(&str, i32, f64)]) -> ModelFrame {
        ModelFrame {
            rows: rows
                .iter()
                .map(|(c, y, pov)| FrameRow {
                    contract_id: c.to_string(),
                    contract_year: *y,
                    rating: 3.5,
                    poverty_exposure: Some(*pov),
                    rural_exposure: Some(0.2),
                    shortage_exposure: Some(3.0),
                    hhi: Some(0.4),
                    entropy: Some(1.0),
                    top1_share: Some(0.5),
                    top5_share: Some(0.9),
                    n_counties: Some(4),
                    total_enrollment: Some(1000.0),
                })
                .collect(),
        }
    }

    #[test]
    fn buckets_split_on_tolerance() {
        let results = vec![
            result("H1", 2024, 4.0, 3.6), // +0.4 over
            result("H2", 2024, 3.5, 3.6), // -0.1 near
            result("H3", 2024, 3.0, 3.6), // -0.6 under
        ];
        let frame = frame_with(&[("H1", 2024, 0.1), ("H2", 2024, 0.2), ("H3", 2024, 0.3)]);
        let summary = bucket_summary(&results, &frame, 0.25);
        assert_eq!(summary.len(), 3);
        assert_eq!(summary[0].bucket, ResidualBucket::Underperformance);
        assert_eq!(summary[0].n, 1);
        assert!((summary[0].mean_residual + 0.6).abs() < 1e-12);
    }

    #[test]
    fn opportunity_list_keeps_most_negative_in_slice() {
        let results = vec![
            result("H1", 2024, 3.5, 3.9),  // -0.4, in slice
            result("H2", 2024, 3.8, 3.7),  // +0.1, in slice
            result("H3", 2024, 4.4, 4.9),  // -0.5, outside slice
            result("H4", 2024, 3.6, 3.65), // -0.05, in slice
        ];
        let opp = opportunity_list(&results, (3.5, 3.9), 2);
        assert_eq!(opp.len(), 2);
        assert_eq!(opp[0].contract_id, "H1");
        assert_eq!(opp[1].contract_id, "H4");
    }

    #[test]
    fn decile_table_orders_by_feature() {
        let fixtures: Vec<(String, i32, f64)> = (0..20)
            .map(|i| (format!("H{i:02}"), 2024, i as f64 / 100.0))
            .collect();
        let fixture_refs: Vec<(&str, i32, f64)> =
            fixtures.iter().map(|(c, y, p)| (c.as_str(), *y, *p)).collect();
        let frame = frame_with(&fixture_refs);
        let results: Vec<DecompositionResult> = fixtures
            .iter()
            .map(|(c, y, _)| result(c, *y, 3.5, 3.4))
            .collect();

        let table = decile_table(&results, &frame, DecileFeature::PovertyExposure);
        assert_eq!(table.len(), 10);
        assert_eq!(table[0].decile, 1);
        assert_eq!(table[9].decile, 10);
        // Feature means must increase across deciles.
        for w in table.windows(2) {
            assert!(w[1].feature_mean > w[0].feature_mean);
        }
    }
}
