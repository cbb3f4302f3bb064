//! Seeded synthetic staged-extract generation.
//!
//! Ratings are generated from a structural latent index computed off the
//! same weighting/exposure code the pipeline uses, plus noise, so a demo
//! run produces a decomposition with real signal in it, and the ordinal fit
//! has something to find.

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use rand::prelude::*;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand_distr::{Bernoulli, Beta, LogNormal, Normal};

use crate::domain::{CountyAttribute, EnrollmentRecord};
use crate::error::AppError;
use crate::exposure::{explicit_zero_exposure, lagged_exposure, vintage_exposure};
use crate::weights::build_weights;

/// Configuration for synthetic sample generation.
#[derive(Debug, Clone)]
pub struct SampleConfig {
    pub out_dir: PathBuf,
    pub contracts: usize,
    pub counties: usize,
    pub years: Vec<i32>,
    pub seed: u64,
}

impl Default for SampleConfig {
    fn default() -> Self {
        Self {
            out_dir: PathBuf::from("sample_data"),
            contracts: 150,
            counties: 400,
            years: vec![2024, 2025],
            seed: 7,
        }
    }
}

/// What was generated and where.
#[derive(Debug, Clone)]
pub struct SampleSummary {
    pub files: Vec<PathBuf>,
    pub contracts: usize,
    pub counties: usize,
}

struct County {
    fips: String,
    poverty: f64,
    rural: bool,
    shortage: Option<f64>,
}

pub fn generate_sample(config: &SampleConfig) -> Result<SampleSummary, AppError> {
    if config.contracts == 0 || config.counties == 0 || config.years.is_empty() {
        return Err(AppError::input(
            "Sample generation needs contracts, counties, and at least one year.",
        ));
    }
    std::fs::create_dir_all(&config.out_dir).map_err(|e| {
        AppError::input(format!(
            "Failed to create sample dir '{}': {e}",
            config.out_dir.display()
        ))
    })?;

    let mut rng = StdRng::seed_from_u64(config.seed);

    let poverty_dist =
        Beta::new(2.0, 8.0).map_err(|e| AppError::input(format!("Distribution error: {e}")))?;
    let rural_dist =
        Bernoulli::new(0.35).map_err(|e| AppError::input(format!("Distribution error: {e}")))?;
    let designated_dist =
        Bernoulli::new(0.4).map_err(|e| AppError::input(format!("Distribution error: {e}")))?;
    let enrollment_dist = LogNormal::<f64>::new(6.0, 1.2)
        .map_err(|e| AppError::input(format!("Distribution error: {e}")))?;
    let noise_dist = Normal::new(0.0, 0.45)
        .map_err(|e| AppError::input(format!("Distribution error: {e}")))?;

    // County pool with fixed structural attributes.
    let counties: Vec<County> = (0..config.counties)
        .map(|i| County {
            fips: format!("{:05}", 10_001 + i * 2),
            poverty: poverty_dist.sample(&mut rng),
            rural: rural_dist.sample(&mut rng),
            shortage: if designated_dist.sample(&mut rng) {
                Some(rng.gen_range(1.0..26.0_f64).round())
            } else {
                None
            },
        })
        .collect();

    // Contract service areas: a random handful of counties, stable across
    // years, with enrollment redrawn per year.
    let mut service_areas: Vec<Vec<usize>> = Vec::with_capacity(config.contracts);
    for _ in 0..config.contracts {
        let n_counties = rng.gen_range(1..=25.min(config.counties));
        let mut idx: Vec<usize> = (0..config.counties).collect();
        idx.shuffle(&mut rng);
        idx.truncate(n_counties);
        service_areas.push(idx);
    }

    let mut enrollment: Vec<EnrollmentRecord> = Vec::new();
    for (c, area) in service_areas.iter().enumerate() {
        let contract_id = format!("H{:04}", 1000 + c);
        for &year in &config.years {
            for &county_idx in area {
                let count = enrollment_dist.sample(&mut rng).round().max(1.0) as i64;
                // Occasionally split a county into two plan-level rows to
                // exercise the pre-weighting aggregation.
                if rng.gen_bool(0.1) && count > 1 {
                    let first = count / 2;
                    for part in [first, count - first] {
                        enrollment.push(EnrollmentRecord {
                            contract_id: contract_id.clone(),
                            year,
                            county_fips: counties[county_idx].fips.clone(),
                            enrollment: part,
                        });
                    }
                } else {
                    enrollment.push(EnrollmentRecord {
                        contract_id: contract_id.clone(),
                        year,
                        county_fips: counties[county_idx].fips.clone(),
                        enrollment: count,
                    });
                }
            }
        }
    }

    // Attribute tables in the internal schema, reused for the latent index.
    let poverty_attrs: Vec<CountyAttribute> = config
        .years
        .iter()
        .flat_map(|&year| {
            counties.iter().map(move |county| CountyAttribute {
                county_fips: county.fips.clone(),
                year: Some(year - 1),
                value: county.poverty,
            })
        })
        .collect();
    let rural_attrs: Vec<CountyAttribute> = counties
        .iter()
        .map(|county| CountyAttribute {
            county_fips: county.fips.clone(),
            year: None,
            value: if county.rural { 1.0 } else { 0.0 },
        })
        .collect();
    let shortage_attrs: Vec<CountyAttribute> = counties
        .iter()
        .filter_map(|county| {
            county.shortage.map(|score| CountyAttribute {
                county_fips: county.fips.clone(),
                year: None,
                value: score,
            })
        })
        .collect();

    // Structural latent index -> snapped star rating.
    let weights = build_weights(&enrollment);
    let poverty_exposures = lagged_exposure(&weights, &poverty_attrs, 1);
    let rural_exposures = vintage_exposure(&weights, &rural_attrs);
    let shortage_exposures = explicit_zero_exposure(&weights, &shortage_attrs);

    let rural_by_key: std::collections::HashMap<(String, i32), f64> = rural_exposures
        .iter()
        .map(|e| {
            (
                (e.contract_id.clone(), e.contract_year),
                e.exposure.unwrap_or(0.0),
            )
        })
        .collect();
    let shortage_by_key: std::collections::HashMap<(String, i32), f64> = shortage_exposures
        .iter()
        .map(|e| {
            (
                (e.contract_id.clone(), e.contract_year),
                e.exposure.unwrap_or(0.0),
            )
        })
        .collect();

    let mut ratings: Vec<(String, i32, f64)> = Vec::new();
    for e in &poverty_exposures {
        let Some(poverty) = e.exposure else { continue };
        let key = (e.contract_id.clone(), e.contract_year);
        let rural = rural_by_key.get(&key).copied().unwrap_or(0.0);
        let shortage = shortage_by_key.get(&key).copied().unwrap_or(0.0);
        let log_enroll = (e.total_enrollment.max(1) as f64).ln();

        let latent = 4.1 - 3.0 * poverty - 0.5 * rural - 0.03 * shortage
            + 0.12 * (log_enroll - 7.0)
            + noise_dist.sample(&mut rng);
        let stars = (latent * 2.0).round() / 2.0;
        ratings.push((e.contract_id.clone(), e.contract_year, stars.clamp(2.0, 5.0)));
    }

    // Write the staged CSV shapes the ingest layer expects.
    let mut files = Vec::new();
    for &year in &config.years {
        let path = config.out_dir.join(format!("enrollment_{year}.csv"));
        let mut file = create(&path)?;
        wline(&mut file, &path, "contract_id,year,county_fips,enrollment")?;
        for r in enrollment.iter().filter(|r| r.year == year) {
            wline(
                &mut file,
                &path,
                &format!(
                    "{},{},{},{}",
                    r.contract_id, r.year, r.county_fips, r.enrollment
                ),
            )?;
        }
        files.push(path);

        let path = config.out_dir.join(format!("ratings_{year}.csv"));
        let mut file = create(&path)?;
        wline(&mut file, &path, "contract_id,contract_year,stars_overall")?;
        for (contract_id, rating_year, stars) in ratings.iter().filter(|(_, y, _)| *y == year) {
            wline(
                &mut file,
                &path,
                &format!("{contract_id},{rating_year},{stars}"),
            )?;
        }
        files.push(path);
    }

    let path = config.out_dir.join("county_poverty.csv");
    let mut file = create(&path)?;
    wline(&mut file, &path, "county_fips,year,pov_rate_all")?;
    for a in &poverty_attrs {
        wline(
            &mut file,
            &path,
            &format!(
                "{},{},{:.6}",
                a.county_fips,
                a.year.unwrap_or_default(),
                a.value
            ),
        )?;
    }
    files.push(path);

    let path = config.out_dir.join("county_rural.csv");
    let mut file = create(&path)?;
    wline(&mut file, &path, "county_fips,rural_indicator")?;
    for a in &rural_attrs {
        wline(
            &mut file,
            &path,
            &format!("{},{}", a.county_fips, a.value as i64),
        )?;
    }
    files.push(path);

    let path = config.out_dir.join("county_shortage.csv");
    let mut file = create(&path)?;
    wline(&mut file, &path, "county_fips,hpsa_pc_score")?;
    for a in &shortage_attrs {
        wline(&mut file, &path, &format!("{},{}", a.county_fips, a.value))?;
    }
    files.push(path);

    Ok(SampleSummary {
        files,
        contracts: config.contracts,
        counties: config.counties,
    })
}

fn create(path: &Path) -> Result<File, AppError> {
    File::create(path)
        .map_err(|e| AppError::input(format!("Failed to create '{}': {e}", path.display())))
}

fn wline(file: &mut File, path: &Path, line: &str) -> Result<(), AppError> {
    writeln!(file, "{line}")
        .map_err(|e| AppError::input(format!("Failed to write '{}': {e}", path.display())))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_config(tag: &str) -> SampleConfig {
        SampleConfig {
            out_dir: std::env::temp_dir().join(format!("star_decomp_sample_{tag}")),
            contracts: 30,
            counties: 60,
            years: vec![2024, 2025],
            seed: 7,
        }
    }

    #[test]
    fn writes_all_extract_files() {
        let config = temp_config("files");
        let summary = generate_sample(&config).unwrap();
        // 2 per year + 3 county tables.
        assert_eq!(summary.files.len(), 7);
        for path in &summary.files {
            assert!(path.exists(), "missing {}", path.display());
        }
    }

    #[test]
    fn sample_round_trips_through_ingest() {
        let config = temp_config("roundtrip");
        generate_sample(&config).unwrap();

        let enrollment =
            crate::io::ingest::read_enrollment(&config.out_dir.join("enrollment_2024.csv"))
                .unwrap();
        assert!(!enrollment.records.is_empty());
        assert!(enrollment.row_errors.is_empty());

        let ratings =
            crate::io::ingest::read_ratings(&config.out_dir.join("ratings_2024.csv")).unwrap();
        assert!(!ratings.records.is_empty());
        for r in &ratings.records {
            assert!((2.0..=5.0).contains(&r.rating));
        }

        let poverty =
            crate::io::ingest::read_poverty(&config.out_dir.join("county_poverty.csv")).unwrap();
        assert!(
            poverty
                .records
                .iter()
                .all(|a| a.year == Some(2023) || a.year == Some(2024))
        );
    }

    #[test]
    fn same_seed_is_reproducible() {
        let config_a = temp_config("repro_a");
        let config_b = temp_config("repro_b");
        generate_sample(&config_a).unwrap();
        generate_sample(&config_b).unwrap();
        let a = std::fs::read_to_string(config_a.out_dir.join("ratings_2024.csv")).unwrap();
        let b = std::fs::read_to_string(config_b.out_dir.join("ratings_2024.csv")).unwrap();
        assert_eq!(a, b);
    }
}
