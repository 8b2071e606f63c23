//! Sample matrices indexed `[driver][iteration]`.

use rand::Rng;
use serde::{Deserialize, Serialize};

use super::distribution::{clamp_sample, map_to_dist};
use crate::domain::CostDriver;

/// Driver × iteration matrix of samples.
///
/// Raw matrices hold clamped uniform draws; mapped matrices hold values in
/// each driver's physical domain. A value that could not be mapped is NaN.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleMatrix {
    rows: Vec<Vec<f64>>,
    iterations: usize,
}

impl SampleMatrix {
    /// Build from rows. Every row must have `iterations` entries.
    pub fn from_rows(rows: Vec<Vec<f64>>, iterations: usize) -> Self {
        debug_assert!(rows.iter().all(|r| r.len() == iterations));
        Self { rows, iterations }
    }

    pub fn iterations(&self) -> usize {
        self.iterations
    }

    pub fn driver_count(&self) -> usize {
        self.rows.len()
    }

    pub fn row(&self, driver: usize) -> &[f64] {
        &self.rows[driver]
    }

    pub fn rows(&self) -> &[Vec<f64>] {
        &self.rows
    }

    pub fn value(&self, driver: usize, iteration: usize) -> Option<f64> {
        self.rows.get(driver)?.get(iteration).copied()
    }
}

/// Fill a `driver_count × iterations` matrix with clamped uniform draws,
/// row by row, from `rng`.
pub fn create_sample_matrix<R: Rng + ?Sized>(
    iterations: usize,
    driver_count: usize,
    rng: &mut R,
) -> SampleMatrix {
    let rows = (0..driver_count)
        .map(|_| {
            (0..iterations)
                .map(|_| clamp_sample(rng.gen::<f64>()))
                .collect()
        })
        .collect();
    SampleMatrix::from_rows(rows, iterations)
}

/// Map every row through its driver's distribution.
pub fn map_sample_matrix_to_distributions(raw: &SampleMatrix, drivers: &[CostDriver]) -> SampleMatrix {
    let rows = raw
        .rows
        .iter()
        .zip(drivers)
        .map(|(row, driver)| map_row(row, driver))
        .collect();
    SampleMatrix::from_rows(rows, raw.iterations)
}

/// Local SA matrix: row `varying` mapped through its distribution, every
/// other row held at its driver's mean.
pub fn create_sensitivity_sample_matrix(
    raw: &SampleMatrix,
    varying: usize,
    drivers: &[CostDriver],
) -> SampleMatrix {
    let rows = drivers
        .iter()
        .enumerate()
        .map(|(d, driver)| {
            if d == varying {
                map_row(raw.row(d), driver)
            } else {
                vec![driver.mean; raw.iterations]
            }
        })
        .collect();
    SampleMatrix::from_rows(rows, raw.iterations)
}

/// Sobol recombination: a copy of `a` with row `j` taken from `b`.
pub fn create_sobol_c(a: &SampleMatrix, b: &SampleMatrix, j: usize) -> SampleMatrix {
    let rows = a
        .rows
        .iter()
        .enumerate()
        .map(|(r, row)| if r == j { b.rows[r].clone() } else { row.clone() })
        .collect();
    SampleMatrix::from_rows(rows, a.iterations)
}

/// Single column with every driver at its mean.
pub fn baseline_matrix(drivers: &[CostDriver]) -> SampleMatrix {
    let rows = drivers.iter().map(|d| vec![d.mean]).collect();
    SampleMatrix::from_rows(rows, 1)
}

fn map_row(row: &[f64], driver: &CostDriver) -> Vec<f64> {
    row.iter()
        .map(|&u| map_to_dist(driver, u).unwrap_or(f64::NAN))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Distribution;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn drivers() -> Vec<CostDriver> {
        vec![
            CostDriver::new("a", "A", "c", Distribution::Uniform { min: 0.0, max: 10.0 }),
            CostDriver::new("b", "B", "c", Distribution::Normal { mean: 5.0, std_dev: 1.0 }),
            CostDriver::new("c", "C", "c", Distribution::Deterministic { mean: 7.0 }),
        ]
    }

    #[test]
    fn same_seed_reproduces_matrix_bit_for_bit() {
        let m1 = create_sample_matrix(50, 3, &mut StdRng::seed_from_u64(42));
        let m2 = create_sample_matrix(50, 3, &mut StdRng::seed_from_u64(42));
        let bits = |m: &SampleMatrix| -> Vec<u64> {
            m.rows().iter().flatten().map(|v| v.to_bits()).collect()
        };
        assert_eq!(bits(&m1), bits(&m2));
    }

    #[test]
    fn raw_values_are_clamped_into_unit_interval() {
        let m = create_sample_matrix(200, 2, &mut StdRng::seed_from_u64(1));
        assert_eq!(m.driver_count(), 2);
        assert_eq!(m.iterations(), 200);
        for v in m.rows().iter().flatten() {
            assert!(*v >= 1e-12 && *v <= 1.0 - 1e-12);
        }
    }

    #[test]
    fn consecutive_matrices_from_one_stream_differ() {
        let mut rng = StdRng::seed_from_u64(42);
        let a = create_sample_matrix(10, 2, &mut rng);
        let b = create_sample_matrix(10, 2, &mut rng);
        assert_ne!(a, b);
    }

    #[test]
    fn mapping_applies_each_rows_distribution() {
        let raw = create_sample_matrix(20, 3, &mut StdRng::seed_from_u64(3));
        let mapped = map_sample_matrix_to_distributions(&raw, &drivers());
        assert!(mapped.row(0).iter().all(|v| (0.0..=10.0).contains(v)));
        assert!(mapped.row(2).iter().all(|v| *v == 7.0));
    }

    #[test]
    fn sensitivity_matrix_varies_one_row_only() {
        let drivers = drivers();
        let raw = create_sample_matrix(15, 3, &mut StdRng::seed_from_u64(5));
        let lsa = create_sensitivity_sample_matrix(&raw, 1, &drivers);

        assert!(lsa.row(0).iter().all(|v| *v == drivers[0].mean));
        assert!(lsa.row(2).iter().all(|v| *v == 7.0));
        let varied = map_sample_matrix_to_distributions(&raw, &drivers);
        assert_eq!(lsa.row(1), varied.row(1));
    }

    #[test]
    fn sobol_c_swaps_exactly_one_row() {
        let mut rng = StdRng::seed_from_u64(9);
        let a = create_sample_matrix(5, 3, &mut rng);
        let b = create_sample_matrix(5, 3, &mut rng);
        let c = create_sobol_c(&a, &b, 2);
        assert_eq!(c.row(0), a.row(0));
        assert_eq!(c.row(1), a.row(1));
        assert_eq!(c.row(2), b.row(2));
    }

    #[test]
    fn baseline_is_one_column_of_means() {
        let m = baseline_matrix(&drivers());
        assert_eq!(m.iterations(), 1);
        assert_eq!(m.value(0, 0), Some(5.0));
        assert_eq!(m.value(2, 0), Some(7.0));
    }
}
