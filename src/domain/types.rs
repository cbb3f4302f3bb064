//! Shared domain types.
//!
//! These types are intentionally kept lightweight and serializable so they can be:
//!
//! - used in-memory across pipeline stages
//! - exported to JSON/CSV artifacts
//! - reloaded later by downstream reporting tools

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// One staged enrollment row: a plan-level enrollment count attributed to a
/// county for a given rating year.
///
/// Multiple plan-level rows for the same (contract, year, county) are summed
/// during weighting; this type carries them as delivered by staging.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrollmentRecord {
    pub contract_id: String,
    pub year: i32,
    /// 5-digit FIPS, zero-padded by ingest.
    pub county_fips: String,
    pub enrollment: i64,
}

/// A within-contract-year enrollment weight for one county.
///
/// Invariant: for a fixed (contract_id, year), `w_enroll` sums to 1.0 within
/// 1e-6 over all rows, and every row has `enrollment > 0`. Rows with
/// non-positive enrollment are dropped before the denominator is computed,
/// so they never appear here at all.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContractCountyWeight {
    pub contract_id: String,
    pub year: i32,
    pub county_fips: String,
    pub enrollment: i64,
    pub contract_year_total_enrollment: i64,
    pub w_enroll: f64,
}

/// A county-level structural attribute value, keyed by the attribute's own
/// vintage year (not the contract's rating year).
///
/// `year` is `None` for single-vintage attributes (rural classification,
/// shortage scores) that do not vary rating-year-to-year in source data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CountyAttribute {
    pub county_fips: String,
    pub year: Option<i32>,
    pub value: f64,
}

/// The structural attributes a contract-year can be exposed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttributeKind {
    /// County poverty rate, joined with a one-year lag by default.
    Poverty,
    /// Binary rural indicator; exposure is the weighted rural population share.
    Rural,
    /// Clinician-shortage score. Counties without a designation are explicit
    /// zeros, so this exposure skips renormalization.
    Shortage,
}

impl AttributeKind {
    pub fn display_name(self) -> &'static str {
        match self {
            AttributeKind::Poverty => "poverty",
            AttributeKind::Rural => "rural",
            AttributeKind::Shortage => "shortage",
        }
    }
}

/// One contract-year exposure to a single attribute kind.
///
/// `out_of_scope == true` iff `coverage_weight_share == 0` iff `exposure` is
/// `None`: a coverage failure must never masquerade as a zero-valued
/// exposure. For the shortage attribute, `coverage_weight_share` holds the
/// designated-weight share and an exposure of 0.0 is a real value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContractYearExposure {
    pub contract_id: String,
    pub contract_year: i32,
    pub total_enrollment: i64,
    pub exposure: Option<f64>,
    pub coverage_weight_share: f64,
    pub out_of_scope: bool,
    /// Number of weight rows in the contract-year.
    pub counties_total: usize,
    /// Number of weight rows with a matching attribute row.
    pub counties_matched: usize,
}

/// Geographic concentration of a contract-year's enrollment, derived from
/// the weight distribution alone (no external join).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeoConcentration {
    pub contract_id: String,
    pub contract_year: i32,
    pub hhi: f64,
    pub entropy: f64,
    pub top1_share: f64,
    pub top5_share: f64,
    pub n_counties: usize,
}

/// One observed overall rating for a contract-year.
///
/// The engine never hardcodes the rating scale; the ordered level set is
/// derived from observed data at fit time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RatingRecord {
    pub contract_id: String,
    pub contract_year: i32,
    pub rating: f64,
}

/// Structural-vs-operational split for one modeled contract-year.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecompositionResult {
    pub contract_id: String,
    pub contract_year: i32,
    pub observed_rating: f64,
    /// Probability-weighted expectation over the observed level set, not the
    /// arg-max class.
    pub expected_rating: f64,
    /// `observed_rating - expected_rating`.
    pub residual: f64,
}

/// The configurable near-threshold banding rule.
///
/// Defaults reproduce the 4-star cutoff study: lower band [3.5, 4.0), upper
/// band [4.0, 4.5].
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BandRule {
    pub lower: f64,
    pub cut: f64,
    pub upper: f64,
}

impl Default for BandRule {
    fn default() -> Self {
        Self {
            lower: 3.5,
            cut: 4.0,
            upper: 4.5,
        }
    }
}

impl BandRule {
    pub fn classify(&self, rating: f64) -> ThresholdBand {
        if rating >= self.lower && rating < self.cut {
            ThresholdBand::BelowCut
        } else if rating >= self.cut && rating <= self.upper {
            ThresholdBand::AboveCut
        } else {
            ThresholdBand::Outside
        }
    }

    pub fn band_label(&self, band: ThresholdBand) -> String {
        match band {
            ThresholdBand::BelowCut => format!("[{:.1},{:.1})", self.lower, self.cut),
            ThresholdBand::AboveCut => format!("[{:.1},{:.1}]", self.cut, self.upper),
            ThresholdBand::Outside => "outside".to_string(),
        }
    }
}

/// Where a rating falls relative to the configured cutoff bands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThresholdBand {
    BelowCut,
    AboveCut,
    Outside,
}

/// How band means are weighted in the contrast statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WeightScheme {
    Unweighted,
    /// Weighted by contract-year total enrollment (not `w_enroll`).
    EnrollmentWeighted,
}

impl WeightScheme {
    pub fn display_name(self) -> &'static str {
        match self {
            WeightScheme::Unweighted => "unweighted",
            WeightScheme::EnrollmentWeighted => "enrollment-weighted",
        }
    }
}

/// Operational-residual classification, relative to a symmetric tolerance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResidualBucket {
    /// Residual at or below -tolerance: execution opportunity.
    Underperformance,
    /// Within ±tolerance of the structural expectation.
    NearExpectation,
    /// Residual at or above +tolerance: observed rating beats the structural
    /// expectation.
    Overperformance,
}

impl ResidualBucket {
    pub fn classify(residual: f64, tolerance: f64) -> Self {
        if residual >= tolerance {
            ResidualBucket::Overperformance
        } else if residual <= -tolerance {
            ResidualBucket::Underperformance
        } else {
            ResidualBucket::NearExpectation
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            ResidualBucket::Overperformance => "operational overperformance",
            ResidualBucket::Underperformance => "operational underperformance",
            ResidualBucket::NearExpectation => "near expectation",
        }
    }
}

/// Metadata stamped on every run's exported artifacts.
///
/// `ordinal_fit_weighted` is always `false` today: the decomposition fit is
/// unweighted by design while the near-threshold logistic models are also
/// run enrollment-weighted. The flag exists so downstream readers see the
/// policy instead of rediscovering the asymmetry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunMetadata {
    pub tool: String,
    pub generated_at: chrono::NaiveDate,
    pub seed: u64,
    pub bootstrap_draws: usize,
    pub poverty_lag_years: i32,
    pub band: BandRule,
    /// Observed rating level set the ordinal fit derived.
    pub levels: Vec<f64>,
    pub n_modeled: usize,
    pub ordinal_fit_weighted: bool,
    pub weighting_note: String,
}

/// A full run's configuration as understood by the pipeline.
///
/// This is derived from CLI flags (plus defaults) and threaded through every
/// stage entry point; no stage reads ambient global state.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Staged enrollment extracts (one per rating year is typical).
    pub enrollment_paths: Vec<PathBuf>,
    /// Staged rating extracts.
    pub ratings_paths: Vec<PathBuf>,
    pub poverty_path: PathBuf,
    pub rural_path: PathBuf,
    pub shortage_path: PathBuf,

    /// Directory for CSV/JSON artifacts; `None` prints reports only.
    pub out_dir: Option<PathBuf>,

    /// Contract-year t uses poverty vintage t - lag.
    pub poverty_lag_years: i32,

    pub band: BandRule,
    pub bootstrap_draws: usize,
    pub seed: u64,
    /// A band-year with fewer distinct contracts than this is skipped for
    /// resampling and flagged.
    pub min_band_contracts: usize,

    /// Symmetric residual-bucket tolerance (stars).
    pub residual_tolerance: f64,
    /// Rating slice [lo, hi] for the opportunity list.
    pub opportunity_slice: (f64, f64),
    /// Number of most-negative residuals to keep in the opportunity list.
    pub opportunity_top_n: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn band_rule_classifies_edges() {
        let rule = BandRule::default();
        assert_eq!(rule.classify(3.5), ThresholdBand::BelowCut);
        assert_eq!(rule.classify(3.9), ThresholdBand::BelowCut);
        assert_eq!(rule.classify(4.0), ThresholdBand::AboveCut);
        assert_eq!(rule.classify(4.5), ThresholdBand::AboveCut);
        assert_eq!(rule.classify(3.0), ThresholdBand::Outside);
        assert_eq!(rule.classify(5.0), ThresholdBand::Outside);
    }

    #[test]
    fn residual_bucket_tolerance_is_inclusive() {
        assert_eq!(
            ResidualBucket::classify(0.25, 0.25),
            ResidualBucket::Overperformance
        );
        assert_eq!(
            ResidualBucket::classify(-0.25, 0.25),
            ResidualBucket::Underperformance
        );
        assert_eq!(
            ResidualBucket::classify(0.1, 0.25),
            ResidualBucket::NearExpectation
        );
    }
}
