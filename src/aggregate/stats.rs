//! Outlier removal and summary statistics over per-call latency samples.

use serde::{Deserialize, Serialize};

/// Summary statistics of one cleaned sample pool, in nanoseconds.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct SummaryStats {
    pub mean_ns: f64,
    pub median_ns: f64,
    pub p95_ns: f64,
    pub p99_ns: f64,
    pub stddev_ns: f64,
    pub ci95_ns: [f64; 2],
}

impl SummaryStats {
    /// Statistics of `values`; all zeros for an empty input.
    pub fn compute(values: &[f64]) -> Self {
        if values.is_empty() {
            return SummaryStats::default();
        }

        let sorted = sorted(values);
        let n = sorted.len();
        let mean = sorted.iter().sum::<f64>() / n as f64;
        let median = if n % 2 == 1 {
            sorted[n / 2]
        } else {
            (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
        };

        // population variance
        let var = sorted.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n as f64;
        let stddev = var.sqrt();
        let se = stddev / (n as f64).sqrt();

        SummaryStats {
            mean_ns: mean,
            median_ns: median,
            p95_ns: percentile_sorted(&sorted, 0.95),
            p99_ns: percentile_sorted(&sorted, 0.99),
            stddev_ns: stddev,
            ci95_ns: [mean - 1.96 * se, mean + 1.96 * se],
        }
    }
}

fn sorted(values: &[f64]) -> Vec<f64> {
    let mut s = values.to_vec();
    s.sort_by(f64::total_cmp);
    s
}

/// Value at index `floor(n * q)` clamped to `n - 1`; 0 for an empty slice.
pub fn percentile_sorted(sorted: &[f64], q: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let idx = ((sorted.len() as f64 * q) as usize).min(sorted.len() - 1);
    sorted[idx]
}

/// Drop samples outside `[Q1 - 1.5 IQR, Q3 + 1.5 IQR]`.
///
/// Fewer than 4 samples are returned unchanged. Otherwise the result is
/// sorted; if every sample would be dropped the sorted input is returned.
pub fn remove_outliers_iqr(values: &[f64]) -> Vec<f64> {
    if values.len() < 4 {
        return values.to_vec();
    }
    let s = sorted(values);
    let n = s.len();
    let q1 = s[n / 4];
    let q3 = s[(3 * n) / 4];
    let iqr = q3 - q1;
    let low = q1 - 1.5 * iqr;
    let high = q3 + 1.5 * iqr;

    let cleaned: Vec<f64> = s.iter().copied().filter(|x| low <= *x && *x <= high).collect();
    if cleaned.is_empty() { s } else { cleaned }
}

pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_iqr_is_noop_below_four_samples() {
        let input = vec![1000.0, 1.0, 5.0];
        assert_eq!(remove_outliers_iqr(&input), input);
        assert!(remove_outliers_iqr(&[]).is_empty());
    }

    #[test]
    fn test_iqr_drops_far_outlier() {
        let input = vec![10.0, 11.0, 12.0, 10.0, 11.0, 12.0, 10.0, 500.0];
        let cleaned = remove_outliers_iqr(&input);
        assert_eq!(cleaned.len(), 7);
        assert!(!cleaned.contains(&500.0));
        assert_eq!(cleaned[0], 10.0);
    }

    #[test]
    fn test_iqr_keeps_constant_samples() {
        let input = vec![7.0; 10];
        assert_eq!(remove_outliers_iqr(&input), input);
    }

    #[test]
    fn test_summary_stats() {
        let s = SummaryStats::compute(&[4.0, 1.0, 3.0, 2.0]);
        assert_eq!(s.mean_ns, 2.5);
        assert_eq!(s.median_ns, 2.5);
        // floor(4 * 0.95) = 3
        assert_eq!(s.p95_ns, 4.0);
        assert_eq!(s.p99_ns, 4.0);
        let expected_sd = (1.25f64).sqrt();
        assert!((s.stddev_ns - expected_sd).abs() < 1e-12);
        let half = 1.96 * expected_sd / 2.0;
        assert!((s.ci95_ns[0] - (2.5 - half)).abs() < 1e-12);
        assert!((s.ci95_ns[1] - (2.5 + half)).abs() < 1e-12);
    }

    #[test]
    fn test_odd_median_and_percentile_index() {
        let values: Vec<f64> = (1..=101).map(f64::from).collect();
        let s = SummaryStats::compute(&values);
        assert_eq!(s.median_ns, 51.0);
        // floor(101 * 0.95) = 95 -> 96th value
        assert_eq!(s.p95_ns, 96.0);
        assert_eq!(s.p99_ns, 100.0);
    }

    #[test]
    fn test_empty_stats_are_zero() {
        let s = SummaryStats::compute(&[]);
        assert_eq!(s, SummaryStats::default());
        assert_eq!(mean(&[]), None);
    }
}
