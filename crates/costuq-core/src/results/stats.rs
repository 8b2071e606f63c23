//! Descriptive statistics and Monte Carlo convergence diagnostics.

use serde::Serialize;

use crate::domain::{Result, UqError};

/// z-score of a two-sided 95% normal interval.
pub const Z_95: f64 = 1.96;

/// Default window step of [`check_mc_convergence`].
pub const DEFAULT_CONVERGENCE_STEP: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ConfidenceInterval {
    pub lower: f64,
    pub upper: f64,
}

/// Summary of one sample.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Stats {
    pub count: usize,
    pub mean: f64,
    /// Population variance (divides by `n`).
    pub variance: f64,
    pub stdev: f64,
    pub min: f64,
    pub max: f64,
    /// `min == max`
    pub deterministic: bool,
    /// Standard error of the mean; NaN for `n <= 1`.
    pub sem: f64,
    /// 95% normal interval around the mean; absent for `n <= 1`.
    pub conf_interval: Option<ConfidenceInterval>,
}

/// Describe `values`.
pub fn stats(values: &[f64]) -> Stats {
    let n = values.len();
    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let mean = values.iter().sum::<f64>() / n as f64;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n as f64;
    let stdev = variance.sqrt();

    let (sem, conf_interval) = if n > 1 {
        let sem = stdev / (n as f64).sqrt();
        let margin = Z_95 * sem;
        (
            sem,
            Some(ConfidenceInterval {
                lower: mean - margin,
                upper: mean + margin,
            }),
        )
    } else {
        (f64::NAN, None)
    };

    Stats {
        count: n,
        mean,
        variance,
        stdev,
        min,
        max,
        deterministic: min == max,
        sem,
        conf_interval,
    }
}

/// Mean of the standard errors of several samples.
pub fn mean_of_sem<'a>(all: impl IntoIterator<Item = &'a Stats>) -> f64 {
    let (sum, count) = all
        .into_iter()
        .fold((0.0, 0usize), |(sum, count), s| (sum + s.sem, count + 1));
    sum / count as f64
}

/// Running mean and sample variance after `n` samples.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConvergencePoint {
    pub n: usize,
    pub mean: f64,
    pub variance: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConvergenceReport {
    /// Relative mean change < 1% and relative variance change < 5% across
    /// the last three windows.
    pub stable: bool,
    pub points: Vec<ConvergencePoint>,
}

/// Track the running mean and sample variance every `step` samples and
/// compare the last window with the one two steps earlier.
///
/// Needs at least `2 * step` samples. With exactly two windows the last is
/// compared with the first.
pub fn check_mc_convergence(samples: &[f64], step: usize) -> Result<ConvergenceReport> {
    let step = step.max(1);
    if samples.len() < step * 2 {
        return Err(UqError::InsufficientSamples {
            needed: step * 2,
            got: samples.len(),
        });
    }

    let points: Vec<ConvergencePoint> = (step..=samples.len())
        .step_by(step)
        .map(|n| {
            let subset = &samples[..n];
            let mean = subset.iter().sum::<f64>() / n as f64;
            let variance = subset.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1) as f64;
            ConvergencePoint { n, mean, variance }
        })
        .collect();

    let tail = &points[points.len().saturating_sub(3)..];
    let (first, last) = (&tail[0], &tail[tail.len() - 1]);
    let mean_diff = (last.mean - first.mean).abs() / first.mean.abs();
    let var_diff = (last.variance - first.variance).abs() / first.variance.abs();

    Ok(ConvergenceReport {
        stable: mean_diff < 0.01 && var_diff < 0.05,
        points,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_value_is_deterministic_without_sem() {
        let s = stats(&[4.2]);
        assert_eq!(s.count, 1);
        assert!(s.deterministic);
        assert!(s.sem.is_nan());
        assert!(s.conf_interval.is_none());
        assert_eq!(s.variance, 0.0);
    }

    #[test]
    fn constant_series_has_zero_variance() {
        let s = stats(&[3.0, 3.0, 3.0]);
        assert_eq!(s.variance, 0.0);
        assert!(s.deterministic);
        assert_eq!(s.sem, 0.0);
    }

    #[test]
    fn variance_is_population_variance() {
        let s = stats(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]);
        assert_eq!(s.mean, 5.0);
        assert_eq!(s.variance, 4.0);
        assert_eq!(s.stdev, 2.0);
        assert_eq!(s.min, 2.0);
        assert_eq!(s.max, 9.0);
        assert!(!s.deterministic);
    }

    #[test]
    fn confidence_interval_uses_fixed_z() {
        let s = stats(&[1.0, 3.0]);
        // stdev 1, sem 1/sqrt(2)
        let margin = 1.96 / 2f64.sqrt();
        let ci = s.conf_interval.unwrap();
        assert!((ci.lower - (2.0 - margin)).abs() < 1e-12);
        assert!((ci.upper - (2.0 + margin)).abs() < 1e-12);
    }

    #[test]
    fn mean_of_sem_averages() {
        let a = stats(&[1.0, 3.0]);
        let b = stats(&[5.0, 5.0]);
        assert!((mean_of_sem([&a, &b]) - a.sem / 2.0).abs() < 1e-12);
    }

    #[test]
    fn convergence_needs_two_windows() {
        let err = check_mc_convergence(&[1.0; 99], 50).unwrap_err();
        assert!(matches!(err, UqError::InsufficientSamples { needed: 100, got: 99 }));
    }

    #[test]
    fn alternating_series_converges() {
        let samples: Vec<f64> = (0..300).map(|i| if i % 2 == 0 { 9.0 } else { 11.0 }).collect();
        let report = check_mc_convergence(&samples, 50).unwrap();
        assert_eq!(report.points.len(), 6);
        assert_eq!(report.points[0].n, 50);
        assert!(report.stable);
    }

    #[test]
    fn drifting_series_does_not_converge() {
        let samples: Vec<f64> = (0..300).map(|i| i as f64).collect();
        let report = check_mc_convergence(&samples, 50).unwrap();
        assert!(!report.stable);
    }
}
