//! Uniform sample → driver value.

use statrs::distribution::{ContinuousCDF, Normal};
use tracing::warn;

use crate::domain::{CostDriver, Distribution};

/// Sample value meaning "use the driver's nominal mean".
pub const DETERMINISTIC_SAMPLE: f64 = -1.0;

/// Samples are clamped into `[EPS, 1 - EPS]` so inverse CDFs stay finite.
pub const SAMPLE_EPS: f64 = 1e-12;

/// Clamp a raw uniform draw into the open unit interval.
pub fn clamp_sample(u: f64) -> f64 {
    u.clamp(SAMPLE_EPS, 1.0 - SAMPLE_EPS)
}

/// Map a uniform sample `u` onto `driver`'s distribution.
///
/// `u == DETERMINISTIC_SAMPLE` yields the driver's nominal mean. Uniform uses
/// the raw `u`; every other distribution uses the clamped sample. Returns
/// `None` for distributions this version cannot evaluate.
pub fn map_to_dist(driver: &CostDriver, u: f64) -> Option<f64> {
    if u == DETERMINISTIC_SAMPLE {
        return Some(driver.mean);
    }
    let safe = clamp_sample(u);

    match driver.distribution {
        Distribution::Uniform { min, max } => Some(min + u * (max - min)),
        Distribution::Triangular { min, mode, max } => {
            let split = (mode - min) / (max - min);
            let value = if safe < split {
                min + (safe * (max - min) * (mode - min)).sqrt()
            } else {
                max - ((1.0 - safe) * (max - min) * (max - mode)).sqrt()
            };
            Some(value)
        }
        Distribution::Normal { mean, std_dev } => probit(safe).map(|z| mean + z * std_dev),
        Distribution::Lognormal { geo_mean, gsd } => probit(safe).map(|z| geo_mean * gsd.powf(z)),
        Distribution::Deterministic { mean } => Some(mean),
        Distribution::Unknown(ref name) => {
            warn!(driver = %driver.name, dist_type = %name, "unknown distribution type");
            None
        }
    }
}

/// Standard normal inverse CDF.
fn probit(p: f64) -> Option<f64> {
    Normal::new(0.0, 1.0).ok().map(|n| n.inverse_cdf(p))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn driver(distribution: Distribution) -> CostDriver {
        CostDriver::new("d", "driver", "cat", distribution)
    }

    #[test]
    fn uniform_spans_min_to_max() {
        let d = driver(Distribution::Uniform { min: 2.0, max: 6.0 });
        assert_eq!(map_to_dist(&d, 0.0), Some(2.0));
        let near_top = map_to_dist(&d, 0.999_999).unwrap();
        assert!((near_top - 6.0).abs() < 1e-4);
    }

    #[test]
    fn uniform_uses_unclamped_sample() {
        let d = driver(Distribution::Uniform { min: 0.0, max: 1.0 });
        assert_eq!(map_to_dist(&d, 0.0), Some(0.0));
        let tri = driver(Distribution::Triangular { min: 0.0, mode: 0.0, max: 1.0 });
        assert!(map_to_dist(&tri, 1.0).unwrap() < 1.0);
    }

    #[test]
    fn deterministic_ignores_sample() {
        let d = driver(Distribution::Deterministic { mean: 3.5 });
        for u in [0.0, 0.25, 0.5, 0.999] {
            assert_eq!(map_to_dist(&d, u), Some(3.5));
        }
    }

    #[test]
    fn sentinel_returns_driver_mean() {
        let d = driver(Distribution::Normal { mean: 10.0, std_dev: 2.0 }).with_mean(9.0);
        assert_eq!(map_to_dist(&d, DETERMINISTIC_SAMPLE), Some(9.0));
    }

    #[test]
    fn normal_median_is_mean() {
        let d = driver(Distribution::Normal { mean: 10.0, std_dev: 2.0 });
        let v = map_to_dist(&d, 0.5).unwrap();
        assert!((v - 10.0).abs() < 1e-9);
        let upper = map_to_dist(&d, 0.975).unwrap();
        assert!((upper - (10.0 + 1.959_964 * 2.0)).abs() < 1e-3);
    }

    #[test]
    fn normal_extremes_stay_finite() {
        let d = driver(Distribution::Normal { mean: 0.0, std_dev: 1.0 });
        assert!(map_to_dist(&d, 0.0).unwrap().is_finite());
        assert!(map_to_dist(&d, 1.0).unwrap().is_finite());
    }

    #[test]
    fn lognormal_median_is_geo_mean() {
        let d = driver(Distribution::Lognormal { geo_mean: 4.0, gsd: 1.5 });
        let v = map_to_dist(&d, 0.5).unwrap();
        assert!((v - 4.0).abs() < 1e-9);
    }

    #[test]
    fn triangular_stays_in_bounds_and_hits_mode_at_split() {
        let d = driver(Distribution::Triangular { min: 1.0, mode: 2.0, max: 5.0 });
        for i in 1..100 {
            let v = map_to_dist(&d, i as f64 / 100.0).unwrap();
            assert!((1.0..=5.0).contains(&v));
        }
        let at_split = map_to_dist(&d, 0.25).unwrap();
        assert!((at_split - 2.0).abs() < 1e-9);
    }

    #[test]
    fn unknown_distribution_maps_to_none() {
        let d = driver(Distribution::Unknown("weibull".into()));
        assert_eq!(map_to_dist(&d, 0.3), None);
    }
}
