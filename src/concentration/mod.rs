//! Geographic concentration calculator.
//!
//! Pure functions of the weight distribution; no external join. Per
//! contract-year: HHI = Σ w², entropy = -Σ w·ln(w) (with 0·ln0 = 0),
//! top1/top5 shares, and the county count. Used as scale/diversification
//! controls in the structural regression.

use std::collections::BTreeMap;

use crate::domain::{ContractCountyWeight, GeoConcentration};

pub fn concentration_metrics(weights: &[ContractCountyWeight]) -> Vec<GeoConcentration> {
    let mut groups: BTreeMap<(&str, i32), Vec<f64>> = BTreeMap::new();
    for w in weights {
        if w.w_enroll > 0.0 {
            groups
                .entry((w.contract_id.as_str(), w.year))
                .or_default()
                .push(w.w_enroll);
        }
    }

    let mut out = Vec::with_capacity(groups.len());
    for ((contract_id, year), mut shares) in groups {
        shares.sort_by(|a, b| b.partial_cmp(a).unwrap_or(std::cmp::Ordering::Equal));

        let hhi: f64 = shares.iter().map(|w| w * w).sum();
        let entropy: f64 = -shares
            .iter()
            .filter(|w| **w > 0.0)
            .map(|w| w * w.ln())
            .sum::<f64>();
        let top1_share = shares[0];
        let top5_share: f64 = shares.iter().take(5).sum();

        out.push(GeoConcentration {
            contract_id: contract_id.to_string(),
            contract_year: year,
            hhi,
            entropy,
            top1_share,
            top5_share: top5_share.min(1.0),
            n_counties: shares.len(),
        });
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::EnrollmentRecord;
    use crate::weights::build_weights;
    use rand::prelude::*;
    use rand::rngs::StdRng;

    fn metrics_for(counts: &[i64]) -> GeoConcentration {
        let records: Vec<EnrollmentRecord> = counts
            .iter()
            .enumerate()
            .map(|(i, n)| EnrollmentRecord {
                contract_id: "H100".to_string(),
                year: 2024,
                county_fips: format!("{:05}", 1000 + i),
                enrollment: *n,
            })
            .collect();
        concentration_metrics(&build_weights(&records))
            .pop()
            .unwrap()
    }

    #[test]
    fn uniform_distribution_hhi_is_one_over_n() {
        for n in [1usize, 2, 5, 10, 40] {
            let counts = vec![100; n];
            let m = metrics_for(&counts);
            assert!(
                (m.hhi - 1.0 / n as f64).abs() < 1e-12,
                "n={n} hhi={}",
                m.hhi
            );
            assert_eq!(m.n_counties, n);
        }
    }

    #[test]
    fn single_county_is_fully_concentrated() {
        let m = metrics_for(&[123]);
        assert!((m.hhi - 1.0).abs() < 1e-12);
        assert!(m.entropy.abs() < 1e-12);
        assert!((m.top1_share - 1.0).abs() < 1e-12);
        assert!((m.top5_share - 1.0).abs() < 1e-12);
    }

    #[test]
    fn fewer_than_five_counties_top5_is_total_mass() {
        let m = metrics_for(&[50, 30, 20]);
        assert!((m.top5_share - 1.0).abs() < 1e-9);
        assert!((m.top1_share - 0.5).abs() < 1e-12);
    }

    #[test]
    fn metric_ranges_hold_on_random_distributions() {
        let mut rng = StdRng::seed_from_u64(23);
        for _ in 0..100 {
            let n = rng.gen_range(1..30);
            let counts: Vec<i64> = (0..n).map(|_| rng.gen_range(1..10_000)).collect();
            let m = metrics_for(&counts);
            assert!(m.hhi > 0.0 && m.hhi <= 1.0 + 1e-12);
            assert!(m.entropy >= -1e-12);
            assert!(m.top1_share <= m.top5_share + 1e-12);
            assert!(m.top5_share <= 1.0 + 1e-12);
            assert_eq!(m.n_counties, n);
        }
    }
}
