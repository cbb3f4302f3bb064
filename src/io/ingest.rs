//! CSV ingest and normalization for staged extracts.
//!
//! Government data vintages rename columns freely, so every logical field is
//! resolved through an ordered synonym candidate list, once, at load time.
//! The rest of the engine only ever sees the fixed internal schema
//! (`EnrollmentRecord`, `RatingRecord`, `CountyAttribute`).
//!
//! Design goals:
//! - **Strict schema** for required fields (schema errors carry the full
//!   discovered column list, exit code 3)
//! - **Row-level validation** (skip bad rows, but report what happened)
//! - **Deterministic behavior** (no hidden randomness)
//! - **Separation of concerns**: no weighting or modeling logic here

use std::collections::HashMap;
use std::fs::File;
use std::path::Path;

use csv::StringRecord;
use tracing::warn;

use crate::domain::{CountyAttribute, EnrollmentRecord, RatingRecord};
use crate::error::AppError;

/// Ordered candidates for one logical field.
struct ColumnSpec {
    logical: &'static str,
    candidates: &'static [&'static str],
}

const ENROLLMENT_CONTRACT: ColumnSpec = ColumnSpec {
    logical: "contract_id",
    candidates: &["contract_id", "contract", "contract_number"],
};
const ENROLLMENT_YEAR: ColumnSpec = ColumnSpec {
    logical: "year",
    candidates: &["year", "contract_year", "enrollment_year", "report_year"],
};
const ENROLLMENT_COUNTY: ColumnSpec = ColumnSpec {
    logical: "county_fips",
    candidates: &["county_fips", "fips", "fips_code", "county_code"],
};
const ENROLLMENT_COUNT: ColumnSpec = ColumnSpec {
    logical: "enrollment",
    candidates: &["enrollment", "enrollees", "enrolled", "plan_enrollment"],
};

const RATING_CONTRACT: ColumnSpec = ColumnSpec {
    logical: "contract_id",
    candidates: &["contract_id", "contract", "contract_number"],
};
const RATING_YEAR: ColumnSpec = ColumnSpec {
    logical: "contract_year",
    candidates: &["contract_year", "year", "rating_year"],
};
const RATING_VALUE: ColumnSpec = ColumnSpec {
    logical: "rating",
    candidates: &[
        "stars_overall",
        "stars",
        "star_rating",
        "overall_star_rating",
        "overall_stars",
        "overall_rating",
        "summary_star_rating",
    ],
};

const ATTRIBUTE_COUNTY: ColumnSpec = ColumnSpec {
    logical: "county_fips",
    candidates: &["county_fips", "fips", "fips_code", "county_code"],
};
const ATTRIBUTE_YEAR: ColumnSpec = ColumnSpec {
    logical: "year",
    candidates: &["year", "vintage", "data_year"],
};
const POVERTY_VALUE: ColumnSpec = ColumnSpec {
    logical: "poverty_rate",
    candidates: &["pov_rate_all", "poverty_rate", "pov_rate", "poverty_pct"],
};
const RURAL_VALUE: ColumnSpec = ColumnSpec {
    logical: "rural_indicator",
    candidates: &["rural_indicator", "rural", "is_rural"],
};
const SHORTAGE_VALUE: ColumnSpec = ColumnSpec {
    logical: "shortage_score",
    candidates: &["hpsa_pc_score", "hpsa_score", "shortage_score", "score"],
};

/// A row-level problem encountered during ingest (bad number, suppressed
/// value, short record). Never fatal on its own.
#[derive(Debug, Clone)]
pub struct RowError {
    pub line: usize,
    pub message: String,
}

/// Ingest output for one extract.
#[derive(Debug, Clone)]
pub struct Staged<T> {
    pub records: Vec<T>,
    pub row_errors: Vec<RowError>,
    pub rows_read: usize,
}

fn open_reader(path: &Path) -> Result<csv::Reader<File>, AppError> {
    let file = File::open(path)
        .map_err(|e| AppError::input(format!("Failed to open CSV '{}': {e}", path.display())))?;
    Ok(csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(file))
}

fn build_header_map(headers: &StringRecord) -> HashMap<String, usize> {
    headers
        .iter()
        .enumerate()
        .map(|(idx, name)| (normalize_header_name(name), idx))
        .collect()
}

fn normalize_header_name(name: &str) -> String {
    // Excel and other tools sometimes emit UTF-8 CSVs with a BOM prefix on the
    // first header. If we don't strip it, schema validation will incorrectly
    // report missing columns.
    let name = name.trim().trim_start_matches('\u{feff}');
    name.to_ascii_lowercase()
}

/// Resolve one logical field through its candidate list.
fn resolve_column(
    header_map: &HashMap<String, usize>,
    spec: &ColumnSpec,
    path: &Path,
) -> Result<usize, AppError> {
    for candidate in spec.candidates {
        if let Some(&idx) = header_map.get(*candidate) {
            return Ok(idx);
        }
    }
    let mut discovered: Vec<&str> = header_map.keys().map(|s| s.as_str()).collect();
    discovered.sort_unstable();
    Err(AppError::schema(format!(
        "Could not resolve column `{}` in '{}' (candidates {:?}). Discovered columns: {:?}",
        spec.logical,
        path.display(),
        spec.candidates,
        discovered
    )))
}

fn field<'r>(record: &'r StringRecord, idx: usize) -> Option<&'r str> {
    record.get(idx).map(str::trim).filter(|s| !s.is_empty())
}

/// Suppressed-cell markers used across the source extracts.
fn is_suppressed(raw: &str) -> bool {
    matches!(raw, "*" | "." | "NA" | "N/A" | "NR" | "-")
}

fn parse_f64(raw: &str) -> Result<f64, String> {
    raw.replace(',', "")
        .parse::<f64>()
        .map_err(|e| format!("invalid number '{raw}': {e}"))
}

fn parse_i64(raw: &str) -> Result<i64, String> {
    raw.replace(',', "")
        .parse::<i64>()
        .map_err(|e| format!("invalid integer '{raw}': {e}"))
}

fn parse_year(raw: &str) -> Result<i32, String> {
    raw.parse::<i32>()
        .map_err(|e| format!("invalid year '{raw}': {e}"))
}

/// Zero-pad county identifiers to the canonical 5-digit FIPS form.
fn normalize_fips(raw: &str) -> String {
    format!("{raw:0>5}")
}

fn log_row_errors(path: &Path, staged_rows: usize, errors: &[RowError]) {
    if !errors.is_empty() {
        warn!(
            path = %path.display(),
            rows_used = staged_rows,
            rows_skipped = errors.len(),
            first = %errors[0].message,
            "skipped rows during ingest"
        );
    }
}

/// Read one staged enrollment extract.
///
/// Suppressed enrollment cells are skipped (with a row error); they must not
/// be confused with zero enrollment, which is dropped later by the weighting
/// stage.
pub fn read_enrollment(path: &Path) -> Result<Staged<EnrollmentRecord>, AppError> {
    let mut reader = open_reader(path)?;
    let headers = reader
        .headers()
        .map_err(|e| AppError::input(format!("Failed to read CSV headers: {e}")))?
        .clone();
    let header_map = build_header_map(&headers);

    let contract_idx = resolve_column(&header_map, &ENROLLMENT_CONTRACT, path)?;
    let year_idx = resolve_column(&header_map, &ENROLLMENT_YEAR, path)?;
    let county_idx = resolve_column(&header_map, &ENROLLMENT_COUNTY, path)?;
    let count_idx = resolve_column(&header_map, &ENROLLMENT_COUNT, path)?;

    let mut records = Vec::new();
    let mut row_errors = Vec::new();
    let mut rows_read = 0usize;

    for (idx, result) in reader.records().enumerate() {
        // +2: records() starts after the header row, and CSV lines are 1-based.
        let line = idx + 2;
        rows_read += 1;

        let record = match result {
            Ok(r) => r,
            Err(e) => {
                row_errors.push(RowError {
                    line,
                    message: format!("CSV parse error: {e}"),
                });
                continue;
            }
        };

        let (Some(contract), Some(year), Some(county), Some(count)) = (
            field(&record, contract_idx),
            field(&record, year_idx),
            field(&record, county_idx),
            field(&record, count_idx),
        ) else {
            row_errors.push(RowError {
                line,
                message: "missing required field".to_string(),
            });
            continue;
        };

        if is_suppressed(count) {
            row_errors.push(RowError {
                line,
                message: format!("suppressed enrollment '{count}'"),
            });
            continue;
        }

        match (parse_year(year), parse_i64(count)) {
            (Ok(year), Ok(enrollment)) => records.push(EnrollmentRecord {
                contract_id: contract.to_string(),
                year,
                county_fips: normalize_fips(county),
                enrollment,
            }),
            (Err(e), _) | (_, Err(e)) => row_errors.push(RowError { line, message: e }),
        }
    }

    log_row_errors(path, records.len(), &row_errors);
    Ok(Staged {
        records,
        row_errors,
        rows_read,
    })
}

/// Read one staged rating extract.
pub fn read_ratings(path: &Path) -> Result<Staged<RatingRecord>, AppError> {
    let mut reader = open_reader(path)?;
    let headers = reader
        .headers()
        .map_err(|e| AppError::input(format!("Failed to read CSV headers: {e}")))?
        .clone();
    let header_map = build_header_map(&headers);

    let contract_idx = resolve_column(&header_map, &RATING_CONTRACT, path)?;
    let year_idx = resolve_column(&header_map, &RATING_YEAR, path)?;
    let rating_idx = resolve_column(&header_map, &RATING_VALUE, path)?;

    let mut records = Vec::new();
    let mut row_errors = Vec::new();
    let mut rows_read = 0usize;

    for (idx, result) in reader.records().enumerate() {
        let line = idx + 2;
        rows_read += 1;

        let record = match result {
            Ok(r) => r,
            Err(e) => {
                row_errors.push(RowError {
                    line,
                    message: format!("CSV parse error: {e}"),
                });
                continue;
            }
        };

        let (Some(contract), Some(year), Some(rating)) = (
            field(&record, contract_idx),
            field(&record, year_idx),
            field(&record, rating_idx),
        ) else {
            row_errors.push(RowError {
                line,
                message: "missing required field".to_string(),
            });
            continue;
        };

        // Contracts too new to be rated carry markers instead of a number.
        if is_suppressed(rating) {
            row_errors.push(RowError {
                line,
                message: format!("unrated contract ('{rating}')"),
            });
            continue;
        }

        match (parse_year(year), parse_f64(rating)) {
            (Ok(contract_year), Ok(rating)) => records.push(RatingRecord {
                contract_id: contract.to_string(),
                contract_year,
                rating,
            }),
            (Err(e), _) | (_, Err(e)) => row_errors.push(RowError { line, message: e }),
        }
    }

    log_row_errors(path, records.len(), &row_errors);
    Ok(Staged {
        records,
        row_errors,
        rows_read,
    })
}

fn read_attribute(
    path: &Path,
    value_spec: &ColumnSpec,
    with_year: bool,
) -> Result<Staged<CountyAttribute>, AppError> {
    let mut reader = open_reader(path)?;
    let headers = reader
        .headers()
        .map_err(|e| AppError::input(format!("Failed to read CSV headers: {e}")))?
        .clone();
    let header_map = build_header_map(&headers);

    let county_idx = resolve_column(&header_map, &ATTRIBUTE_COUNTY, path)?;
    let value_idx = resolve_column(&header_map, value_spec, path)?;
    let year_idx = if with_year {
        Some(resolve_column(&header_map, &ATTRIBUTE_YEAR, path)?)
    } else {
        None
    };

    let mut records = Vec::new();
    let mut row_errors = Vec::new();
    let mut rows_read = 0usize;

    for (idx, result) in reader.records().enumerate() {
        let line = idx + 2;
        rows_read += 1;

        let record = match result {
            Ok(r) => r,
            Err(e) => {
                row_errors.push(RowError {
                    line,
                    message: format!("CSV parse error: {e}"),
                });
                continue;
            }
        };

        let (Some(county), Some(value)) =
            (field(&record, county_idx), field(&record, value_idx))
        else {
            row_errors.push(RowError {
                line,
                message: "missing required field".to_string(),
            });
            continue;
        };
        if is_suppressed(value) {
            row_errors.push(RowError {
                line,
                message: format!("suppressed value '{value}'"),
            });
            continue;
        }

        let year = match year_idx {
            None => None,
            Some(yi) => {
                let Some(raw) = field(&record, yi) else {
                    row_errors.push(RowError {
                        line,
                        message: "missing year".to_string(),
                    });
                    continue;
                };
                match parse_year(raw) {
                    Ok(y) => Some(y),
                    Err(e) => {
                        row_errors.push(RowError { line, message: e });
                        continue;
                    }
                }
            }
        };

        match parse_f64(value) {
            Ok(value) => records.push(CountyAttribute {
                county_fips: normalize_fips(county),
                year,
                value,
            }),
            Err(e) => row_errors.push(RowError { line, message: e }),
        }
    }

    log_row_errors(path, records.len(), &row_errors);
    Ok(Staged {
        records,
        row_errors,
        rows_read,
    })
}

/// County poverty rates, keyed by the attribute's own vintage year.
pub fn read_poverty(path: &Path) -> Result<Staged<CountyAttribute>, AppError> {
    read_attribute(path, &POVERTY_VALUE, true)
}

/// County rural indicators (single vintage, no year column).
pub fn read_rural(path: &Path) -> Result<Staged<CountyAttribute>, AppError> {
    read_attribute(path, &RURAL_VALUE, false)
}

/// County shortage scores for designated counties (single vintage).
pub fn read_shortage(path: &Path) -> Result<Staged<CountyAttribute>, AppError> {
    read_attribute(path, &SHORTAGE_VALUE, false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_temp(name: &str, contents: &str) -> std::path::PathBuf {
        let path = std::env::temp_dir().join(format!("star_decomp_ingest_{name}.csv"));
        let mut file = File::create(&path).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        path
    }

    #[test]
    fn enrollment_resolves_synonyms_and_pads_fips() {
        let path = write_temp(
            "enrollment_synonyms",
            "contract_number,report_year,fips,enrollees\nH100,2024,6001,80\nH100,2024,6003,20\n",
        );
        let staged = read_enrollment(&path).unwrap();
        assert_eq!(staged.records.len(), 2);
        assert_eq!(staged.records[0].county_fips, "06001");
        assert_eq!(staged.records[0].enrollment, 80);
    }

    #[test]
    fn suppressed_enrollment_is_skipped_with_row_error() {
        let path = write_temp(
            "enrollment_suppressed",
            "contract_id,year,county_fips,enrollment\nH100,2024,06001,*\nH100,2024,06003,50\n",
        );
        let staged = read_enrollment(&path).unwrap();
        assert_eq!(staged.records.len(), 1);
        assert_eq!(staged.row_errors.len(), 1);
        assert_eq!(staged.row_errors[0].line, 2);
    }

    #[test]
    fn missing_column_reports_discovered_headers() {
        let path = write_temp(
            "enrollment_missing_col",
            "contract_id,year,county_fips\nH100,2024,06001\n",
        );
        let err = read_enrollment(&path).unwrap_err();
        assert_eq!(err.exit_code(), 3);
        let message = format!("{err}");
        assert!(message.contains("enrollment"));
        assert!(message.contains("county_fips"));
    }

    #[test]
    fn ratings_pick_first_matching_stars_candidate() {
        let path = write_temp(
            "ratings_candidates",
            "contract_id,contract_year,summary_star_rating\nH100,2024,3.5\nH200,2024,4.0\n",
        );
        let staged = read_ratings(&path).unwrap();
        assert_eq!(staged.records.len(), 2);
        assert!((staged.records[0].rating - 3.5).abs() < 1e-12);
    }

    #[test]
    fn poverty_requires_year_rural_does_not() {
        let pov = write_temp(
            "poverty_year",
            "county_fips,year,pov_rate_all\n06001,2023,0.10\n",
        );
        let staged = read_poverty(&pov).unwrap();
        assert_eq!(staged.records[0].year, Some(2023));

        let rural = write_temp("rural_vintage", "county_fips,rural_indicator\n06001,1\n");
        let staged = read_rural(&rural).unwrap();
        assert_eq!(staged.records[0].year, None);
        assert!((staged.records[0].value - 1.0).abs() < 1e-12);
    }

    #[test]
    fn missing_input_file_is_exit_code_two() {
        let err = read_enrollment(Path::new("/nonexistent/enrollment.csv")).unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }
}
