//! Contract-year modeling frame.
//!
//! Outer-joins ratings to every exposure variant and the concentration
//! metrics on (contract_id, contract_year), then narrows to the complete
//! rows the ordinal fit can use. The rating level set is derived from the
//! observed data here, never hardcoded, so the model adapts if the rating
//! scale's support changes.

use std::collections::HashMap;

use nalgebra::DMatrix;
use serde::Serialize;

use crate::domain::{ContractYearExposure, GeoConcentration, RatingRecord};
use crate::error::AppError;

/// One outer-join row; `None` marks missing structural coverage.
#[derive(Debug, Clone, Serialize)]
pub struct FrameRow {
    pub contract_id: String,
    pub contract_year: i32,
    pub rating: f64,
    pub poverty_exposure: Option<f64>,
    pub rural_exposure: Option<f64>,
    pub shortage_exposure: Option<f64>,
    pub hhi: Option<f64>,
    pub entropy: Option<f64>,
    pub top1_share: Option<f64>,
    pub top5_share: Option<f64>,
    pub n_counties: Option<usize>,
    pub total_enrollment: Option<f64>,
}

impl FrameRow {
    /// Log enrollment with the 1-enrollee floor used by the fit.
    pub fn log_enroll(&self) -> Option<f64> {
        self.total_enrollment.map(|n| n.max(1.0).ln())
    }

    /// Complete rows have every structural feature the fit requires.
    pub fn is_complete(&self) -> bool {
        self.poverty_exposure.is_some()
            && self.rural_exposure.is_some()
            && self.shortage_exposure.is_some()
            && self.hhi.is_some()
            && self.total_enrollment.is_some()
    }
}

#[derive(Debug, Clone)]
pub struct ModelFrame {
    pub rows: Vec<FrameRow>,
}

impl ModelFrame {
    pub fn complete_rows(&self) -> impl Iterator<Item = &FrameRow> {
        self.rows.iter().filter(|r| r.is_complete())
    }
}

/// Assemble the frame. Ratings drive the row set; everything else left-joins.
pub fn assemble_frame(
    ratings: &[RatingRecord],
    poverty: &[ContractYearExposure],
    rural: &[ContractYearExposure],
    shortage: &[ContractYearExposure],
    concentration: &[GeoConcentration],
    enrollment: &std::collections::BTreeMap<(String, i32), i64>,
) -> ModelFrame {
    let index_exposure = |exposures: &[ContractYearExposure]| -> HashMap<(String, i32), Option<f64>> {
        exposures
            .iter()
            .map(|e| ((e.contract_id.clone(), e.contract_year), e.exposure))
            .collect()
    };
    let poverty_by_key = index_exposure(poverty);
    let rural_by_key = index_exposure(rural);
    let shortage_by_key = index_exposure(shortage);
    let geo_by_key: HashMap<(String, i32), &GeoConcentration> = concentration
        .iter()
        .map(|g| ((g.contract_id.clone(), g.contract_year), g))
        .collect();

    let mut rows = Vec::with_capacity(ratings.len());
    for r in ratings {
        let key = (r.contract_id.clone(), r.contract_year);
        let geo = geo_by_key.get(&key);
        rows.push(FrameRow {
            contract_id: r.contract_id.clone(),
            contract_year: r.contract_year,
            rating: r.rating,
            // A key absent from the exposure table and an out-of-scope
            // exposure both land as None; downstream treats them alike.
            poverty_exposure: poverty_by_key.get(&key).copied().flatten(),
            rural_exposure: rural_by_key.get(&key).copied().flatten(),
            shortage_exposure: shortage_by_key.get(&key).copied().flatten(),
            hhi: geo.map(|g| g.hhi),
            entropy: geo.map(|g| g.entropy),
            top1_share: geo.map(|g| g.top1_share),
            top5_share: geo.map(|g| g.top5_share),
            n_counties: geo.map(|g| g.n_counties),
            total_enrollment: enrollment.get(&key).map(|&n| n as f64),
        });
    }
    rows.sort_by(|a, b| {
        (a.contract_year, a.contract_id.as_str()).cmp(&(b.contract_year, b.contract_id.as_str()))
    });
    ModelFrame { rows }
}

/// Identifying key carried alongside each design-matrix row.
#[derive(Debug, Clone)]
pub struct ModelKey {
    pub contract_id: String,
    pub contract_year: i32,
    pub rating: f64,
}

/// The numeric fitting problem: design matrix, level codes, and row keys.
#[derive(Debug, Clone)]
pub struct ModelMatrix {
    pub x: DMatrix<f64>,
    pub codes: Vec<usize>,
    /// Observed rating levels, sorted ascending; code `k` means
    /// `levels[k]`.
    pub levels: Vec<f64>,
    pub feature_names: Vec<String>,
    pub keys: Vec<ModelKey>,
}

/// Minimum distinct rating levels for the ordinal fit to be meaningful.
const MIN_LEVELS: usize = 3;

/// Build the design matrix from the frame's complete rows.
///
/// Features: the three exposures, the four concentration metrics, county
/// count, log enrollment (floored at 1 enrollee), and year dummies with the
/// baseline year omitted. No intercept column; the ordinal cutpoints absorb
/// it.
pub fn build_model_matrix(frame: &ModelFrame) -> Result<ModelMatrix, AppError> {
    let complete: Vec<&FrameRow> = frame.complete_rows().collect();
    if complete.is_empty() {
        return Err(AppError::model(
            "No complete rows remain after dropping missing structural features.",
        ));
    }

    let mut levels: Vec<f64> = complete.iter().map(|r| r.rating).collect();
    levels.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    levels.dedup_by(|a, b| (*a - *b).abs() < 1e-9);
    if levels.len() < MIN_LEVELS {
        return Err(AppError::model(format!(
            "Not enough distinct rating levels for an ordinal fit: found {:?}.",
            levels
        )));
    }

    let mut years: Vec<i32> = complete.iter().map(|r| r.contract_year).collect();
    years.sort_unstable();
    years.dedup();
    let dummy_years = &years[1..];

    let mut feature_names = vec![
        "poverty_exposure".to_string(),
        "rural_exposure".to_string(),
        "shortage_exposure".to_string(),
        "hhi".to_string(),
        "entropy".to_string(),
        "top1_share".to_string(),
        "top5_share".to_string(),
        "n_counties".to_string(),
        "log_enroll".to_string(),
    ];
    for y in dummy_years {
        feature_names.push(format!("year_{y}"));
    }

    let n = complete.len();
    let p = feature_names.len();
    let mut x = DMatrix::<f64>::zeros(n, p);
    let mut codes = Vec::with_capacity(n);
    let mut keys = Vec::with_capacity(n);

    for (i, row) in complete.iter().enumerate() {
        let enrollment = row.total_enrollment.unwrap_or(1.0).max(1.0);
        let values = [
            row.poverty_exposure.unwrap_or_default(),
            row.rural_exposure.unwrap_or_default(),
            row.shortage_exposure.unwrap_or_default(),
            row.hhi.unwrap_or_default(),
            row.entropy.unwrap_or_default(),
            row.top1_share.unwrap_or_default(),
            row.top5_share.unwrap_or_default(),
            row.n_counties.unwrap_or_default() as f64,
            enrollment.ln(),
        ];
        for (j, v) in values.iter().enumerate() {
            x[(i, j)] = *v;
        }
        for (d, y) in dummy_years.iter().enumerate() {
            x[(i, values.len() + d)] = if row.contract_year == *y { 1.0 } else { 0.0 };
        }

        let code = levels
            .iter()
            .position(|l| (l - row.rating).abs() < 1e-9)
            .ok_or_else(|| {
                AppError::model(format!(
                    "Rating {} missing from the derived level set.",
                    row.rating
                ))
            })?;
        codes.push(code);
        keys.push(ModelKey {
            contract_id: row.contract_id.clone(),
            contract_year: row.contract_year,
            rating: row.rating,
        });
    }

    Ok(ModelMatrix {
        x,
        codes,
        levels,
        feature_names,
        keys,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn exposure(contract: &str, year: i32, value: Option<f64>) -> ContractYearExposure {
        ContractYearExposure {
            contract_id: contract.to_string(),
            contract_year: year,
            total_enrollment: 100,
            exposure: value,
            coverage_weight_share: if value.is_some() { 1.0 } else { 0.0 },
            out_of_scope: value.is_none(),
            counties_total: 1,
            counties_matched: usize::from(value.is_some()),
        }
    }

    fn geo(contract: &str, year: i32) -> GeoConcentration {
        GeoConcentration {
            contract_id: contract.to_string(),
            contract_year: year,
            hhi: 0.5,
            entropy: 0.7,
            top1_share: 0.6,
            top5_share: 1.0,
            n_counties: 3,
        }
    }

    fn rating(contract: &str, year: i32, stars: f64) -> RatingRecord {
        RatingRecord {
            contract_id: contract.to_string(),
            contract_year: year,
            rating: stars,
        }
    }

    fn frame_fixture() -> ModelFrame {
        let contracts = ["H001", "H002", "H003", "H004", "H005", "H006"];
        let stars = [3.0, 3.5, 4.0, 4.5, 3.5, 4.0];
        let ratings: Vec<RatingRecord> = contracts
            .iter()
            .zip(stars.iter())
            .map(|(c, s)| rating(c, 2024, *s))
            .collect();
        let poverty: Vec<_> = contracts
            .iter()
            .map(|c| exposure(c, 2024, Some(0.15)))
            .collect();
        let rural: Vec<_> = contracts
            .iter()
            .map(|c| exposure(c, 2024, Some(0.4)))
            .collect();
        let shortage: Vec<_> = contracts
            .iter()
            .map(|c| exposure(c, 2024, Some(5.0)))
            .collect();
        let concentration: Vec<_> = contracts.iter().map(|c| geo(c, 2024)).collect();
        let enrollment: BTreeMap<(String, i32), i64> = contracts
            .iter()
            .map(|c| ((c.to_string(), 2024), 100))
            .collect();
        assemble_frame(
            &ratings,
            &poverty,
            &rural,
            &shortage,
            &concentration,
            &enrollment,
        )
    }

    #[test]
    fn incomplete_rows_are_kept_in_frame_but_not_in_matrix() {
        let mut frame = frame_fixture();
        frame.rows[0].poverty_exposure = None;
        assert_eq!(frame.rows.len(), 6);
        let matrix = build_model_matrix(&frame).unwrap();
        assert_eq!(matrix.x.nrows(), 5);
    }

    #[test]
    fn level_set_is_derived_from_observed_data() {
        let frame = frame_fixture();
        let matrix = build_model_matrix(&frame).unwrap();
        assert_eq!(matrix.levels, vec![3.0, 3.5, 4.0, 4.5]);
        // Codes index into the sorted level set.
        assert_eq!(matrix.codes[0], 0);
        assert!(matrix.codes.iter().all(|&c| c < matrix.levels.len()));
    }

    #[test]
    fn too_few_levels_is_fatal() {
        let mut frame = frame_fixture();
        for row in &mut frame.rows {
            row.rating = 4.0;
        }
        assert!(build_model_matrix(&frame).is_err());
    }

    #[test]
    fn single_year_frame_has_no_year_dummies() {
        let frame = frame_fixture();
        let matrix = build_model_matrix(&frame).unwrap();
        assert!(matrix.feature_names.iter().all(|n| !n.starts_with("year_")));
        assert_eq!(matrix.feature_names.len(), 9);
    }
}
