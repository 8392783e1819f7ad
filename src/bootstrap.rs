use crate::error::StatsError;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Bootstrap estimator configuration
#[derive(Debug, Clone)]
pub struct BootstrapConfig {
    /// Number of resamples drawn
    pub resamples: usize,
    /// Two-sided confidence level, e.g. 0.95
    pub confidence_level: f64,
    /// Seed for reproducible intervals; entropy-seeded when absent
    pub seed: Option<u64>,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            resamples: 100_000,
            confidence_level: 0.95,
            seed: None,
        }
    }
}

/// Percentile interval and median of the resampled means, in percent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceReport {
    pub confidence_level: f64,
    pub lower: f64,
    pub upper: f64,
    pub median: f64,
}

impl ConfidenceReport {
    pub fn width(&self) -> f64 {
        self.upper - self.lower
    }
}

impl fmt::Display for ConfidenceReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = self.confidence_level * 100.0;
        if (level - level.round()).abs() < 1e-9 {
            write!(f, "{:.0}%", level)?;
        } else {
            write!(f, "{:.1}%", level)?;
        }
        write!(
            f,
            " Bootstrap Confidence Interval: ({:.1}%, {:.1}%), Median: {:.1}%",
            self.lower, self.upper, self.median
        )
    }
}

/// Estimate a confidence interval for the mean of `data` by resampling it
/// with replacement. Values need not be 0/1; any bounded score works.
pub fn bootstrap(data: &[f64], config: &BootstrapConfig) -> Result<ConfidenceReport, StatsError> {
    if data.is_empty() {
        return Err(StatsError::EmptyInput);
    }
    let level = config.confidence_level;
    if !(level > 0.0 && level < 1.0) {
        return Err(StatsError::InvalidConfidenceLevel(level));
    }
    if config.resamples == 0 {
        return Err(StatsError::NoResamples);
    }

    let mut rng = match config.seed {
        Some(seed) => ChaCha8Rng::seed_from_u64(seed),
        None => ChaCha8Rng::from_entropy(),
    };

    let n = data.len();
    let mut means: Vec<f64> = (0..config.resamples)
        .map(|_| {
            let sum: f64 = (0..n).map(|_| data[rng.gen_range(0..n)]).sum();
            sum / n as f64
        })
        .collect();
    means.sort_by(f64::total_cmp);

    let lower_q = (1.0 - level) / 2.0;
    let upper_q = 1.0 - lower_q;

    Ok(ConfidenceReport {
        confidence_level: level,
        lower: percentile(&means, lower_q) * 100.0,
        upper: percentile(&means, upper_q) * 100.0,
        median: percentile(&means, 0.5) * 100.0,
    })
}

/// Linear interpolation between the closest ranks of a sorted sample
fn percentile(sorted: &[f64], q: f64) -> f64 {
    let rank = q * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    let frac = rank - lo as f64;
    sorted[lo] + (sorted[hi] - sorted[lo]) * frac
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded(resamples: usize) -> BootstrapConfig {
        BootstrapConfig {
            resamples,
            confidence_level: 0.95,
            seed: Some(7),
        }
    }

    #[test]
    fn test_all_correct_is_degenerate_at_100() {
        let report = bootstrap(&[1.0; 5], &seeded(10_000)).unwrap();
        assert_eq!(report.lower, 100.0);
        assert_eq!(report.upper, 100.0);
        assert_eq!(report.median, 100.0);
    }

    #[test]
    fn test_single_value() {
        let report = bootstrap(&[0.0], &seeded(1_000)).unwrap();
        assert_eq!((report.lower, report.upper, report.median), (0.0, 0.0, 0.0));
    }

    #[test]
    fn test_interval_narrows_with_more_data() {
        let small: Vec<f64> = [1.0, 0.0].repeat(10);
        let large: Vec<f64> = [1.0, 0.0].repeat(1000);

        let small_report = bootstrap(&small, &seeded(2_000)).unwrap();
        let large_report = bootstrap(&large, &seeded(2_000)).unwrap();

        assert!(large_report.width() < small_report.width());
        assert!((large_report.median - 50.0).abs() < 2.0);
    }

    #[test]
    fn test_bounds_are_ordered_and_in_range() {
        let mixtures: Vec<Vec<f64>> = vec![
            vec![1.0, 0.0, 0.0],
            vec![1.0, 1.0, 1.0, 0.0],
            vec![0.0, 1.0, 0.0, 1.0, 1.0, 0.0, 1.0],
            vec![0.5, 0.25, 1.0, 0.0],
        ];
        for data in mixtures {
            let report = bootstrap(&data, &seeded(5_000)).unwrap();
            assert!(0.0 <= report.lower, "{:?}", report);
            assert!(report.lower <= report.median, "{:?}", report);
            assert!(report.median <= report.upper, "{:?}", report);
            assert!(report.upper <= 100.0, "{:?}", report);
        }
    }

    #[test]
    fn test_partial_credit_constant() {
        let report = bootstrap(&[0.5, 0.5, 0.5], &seeded(1_000)).unwrap();
        assert_eq!(report.median, 50.0);
        assert_eq!(report.width(), 0.0);
    }

    #[test]
    fn test_seed_makes_runs_reproducible() {
        let data = [1.0, 0.0, 1.0, 1.0, 0.0, 1.0];
        assert_eq!(
            bootstrap(&data, &seeded(3_000)).unwrap(),
            bootstrap(&data, &seeded(3_000)).unwrap()
        );
    }

    #[test]
    fn test_invalid_inputs() {
        assert_eq!(bootstrap(&[], &seeded(10)), Err(StatsError::EmptyInput));
        assert_eq!(bootstrap(&[1.0], &seeded(0)), Err(StatsError::NoResamples));

        let mut config = seeded(10);
        config.confidence_level = 1.0;
        assert_eq!(
            bootstrap(&[1.0], &config),
            Err(StatsError::InvalidConfidenceLevel(1.0))
        );
    }

    #[test]
    fn test_percentile_interpolates() {
        let sorted = [0.0, 10.0, 20.0, 30.0];
        assert_eq!(percentile(&sorted, 0.0), 0.0);
        assert_eq!(percentile(&sorted, 0.5), 15.0);
        assert_eq!(percentile(&sorted, 1.0), 30.0);
        assert_eq!(percentile(&[4.0], 0.025), 4.0);
    }

    #[test]
    fn test_report_formatting() {
        let report = ConfidenceReport {
            confidence_level: 0.95,
            lower: 61.234,
            upper: 78.96,
            median: 70.0,
        };
        assert_eq!(
            report.to_string(),
            "95% Bootstrap Confidence Interval: (61.2%, 79.0%), Median: 70.0%"
        );

        let odd_level = ConfidenceReport {
            confidence_level: 0.975,
            ..report
        };
        assert!(odd_level.to_string().starts_with("97.5% Bootstrap"));
    }

    #[test]
    fn test_default_config() {
        let config = BootstrapConfig::default();
        assert_eq!(config.resamples, 100_000);
        assert_eq!(config.confidence_level, 0.95);
        assert!(config.seed.is_none());
    }
}
