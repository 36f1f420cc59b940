//! Statistics kernel
//!
//! Robust location/scale estimators, Pearson and Spearman correlation with
//! two-sided p-values, and ordinary least squares slopes. All estimators
//! report insufficient or degenerate input as a `StatError` instead of
//! producing NaN.

use crate::error::StatError;
use statrs::distribution::{ContinuousCDF, StudentsT};
use std::cmp::Ordering;

/// Variance below this is treated as zero
const VARIANCE_EPSILON: f64 = 1e-12;

/// Arithmetic mean, `None` for an empty slice
pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Population standard deviation
pub fn std_dev(values: &[f64]) -> Option<f64> {
    let m = mean(values)?;
    let var = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64;
    Some(var.sqrt())
}

/// Sort a copy of the values in ascending order
pub fn sorted(values: &[f64]) -> Vec<f64> {
    let mut out = values.to_vec();
    out.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
    out
}

/// Linearly interpolated quantile of pre-sorted values, `q` in [0, 1]
pub fn quantile_sorted(sorted: &[f64], q: f64) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }
    let pos = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    let frac = pos - lo as f64;
    Some(sorted[lo] + (sorted[hi] - sorted[lo]) * frac)
}

/// Median by linear interpolation, `None` for an empty slice
pub fn median(values: &[f64]) -> Option<f64> {
    quantile_sorted(&sorted(values), 0.5)
}

/// Interquartile range
pub fn iqr(values: &[f64]) -> Option<f64> {
    let s = sorted(values);
    Some(quantile_sorted(&s, 0.75)? - quantile_sorted(&s, 0.25)?)
}

/// Mean absolute deviation around the median
pub fn mean_abs_deviation(values: &[f64]) -> Option<f64> {
    let m = median(values)?;
    mean(&values.iter().map(|v| (v - m).abs()).collect::<Vec<_>>())
}

/// Average ranks (1-based), ties share the mean of their positions
pub fn ranks(values: &[f64]) -> Vec<f64> {
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|&a, &b| values[a].partial_cmp(&values[b]).unwrap_or(Ordering::Equal));

    let mut out = vec![0.0; values.len()];
    let mut i = 0;
    while i < order.len() {
        let mut j = i;
        while j + 1 < order.len() && values[order[j + 1]] == values[order[i]] {
            j += 1;
        }
        let rank = (i + j) as f64 / 2.0 + 1.0;
        for &idx in &order[i..=j] {
            out[idx] = rank;
        }
        i = j + 1;
    }
    out
}

/// Pearson product-moment correlation.
///
/// Requires `x.len() == y.len() >= min_n` and non-zero variance on both sides.
/// The result is clamped to [-1, 1] to absorb rounding.
pub fn pearson(x: &[f64], y: &[f64], min_n: usize) -> Result<f64, StatError> {
    let n = x.len().min(y.len());
    let required = min_n.max(2);
    if n < required {
        return Err(StatError::InsufficientData {
            required,
            available: n,
        });
    }

    let x = &x[..n];
    let y = &y[..n];
    let mx = x.iter().sum::<f64>() / n as f64;
    let my = y.iter().sum::<f64>() / n as f64;

    let mut sxy = 0.0;
    let mut sxx = 0.0;
    let mut syy = 0.0;
    for (a, b) in x.iter().zip(y) {
        let dx = a - mx;
        let dy = b - my;
        sxy += dx * dy;
        sxx += dx * dx;
        syy += dy * dy;
    }

    if sxx / n as f64 <= VARIANCE_EPSILON || syy / n as f64 <= VARIANCE_EPSILON {
        return Err(StatError::DegenerateSeries);
    }

    Ok((sxy / (sxx.sqrt() * syy.sqrt())).clamp(-1.0, 1.0))
}

/// Spearman rank correlation (Pearson on average ranks)
pub fn spearman(x: &[f64], y: &[f64], min_n: usize) -> Result<f64, StatError> {
    let n = x.len().min(y.len());
    pearson(&ranks(&x[..n]), &ranks(&y[..n]), min_n)
}

/// Two-sided p-value of a correlation coefficient under the t approximation
/// with `n - 2` degrees of freedom.
pub fn correlation_p_value(r: f64, n: usize) -> Option<f64> {
    if n < 3 || !r.is_finite() {
        return None;
    }
    let df = (n - 2) as f64;
    let denom = 1.0 - r * r;
    if denom <= f64::EPSILON {
        return Some(0.0);
    }
    let t = r * (df / denom).sqrt();
    let dist = StudentsT::new(0.0, 1.0, df).ok()?;
    Some((2.0 * (1.0 - dist.cdf(t.abs()))).clamp(0.0, 1.0))
}

/// Ordinary least squares slope of y on x. `None` with fewer than two
/// distinct x values.
pub fn ols_slope(points: &[(f64, f64)]) -> Option<f64> {
    if points.len() < 2 {
        return None;
    }
    let n = points.len() as f64;
    let mx = points.iter().map(|p| p.0).sum::<f64>() / n;
    let my = points.iter().map(|p| p.1).sum::<f64>() / n;

    let sxx: f64 = points.iter().map(|p| (p.0 - mx).powi(2)).sum();
    if sxx <= VARIANCE_EPSILON {
        return None;
    }
    let sxy: f64 = points.iter().map(|p| (p.0 - mx) * (p.1 - my)).sum();
    Some(sxy / sxx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_median_and_quantiles() {
        assert_eq!(median(&[3.0, 1.0, 2.0]), Some(2.0));
        assert_eq!(median(&[4.0, 1.0, 3.0, 2.0]), Some(2.5));
        assert_eq!(median(&[]), None);

        // numpy-style linear interpolation
        let s = sorted(&[1.0, 2.0, 3.0, 4.0, 5.0]);
        assert_eq!(quantile_sorted(&s, 0.25), Some(2.0));
        assert_eq!(quantile_sorted(&s, 0.75), Some(4.0));
        assert_eq!(iqr(&[1.0, 2.0, 3.0, 4.0, 5.0]), Some(2.0));
    }

    #[test]
    fn test_mean_abs_deviation() {
        // median 3, deviations 2,1,0,1,2
        assert_eq!(mean_abs_deviation(&[1.0, 2.0, 3.0, 4.0, 5.0]), Some(1.2));
        assert_eq!(mean_abs_deviation(&[7.0, 7.0, 7.0]), Some(0.0));
    }

    #[test]
    fn test_ranks_with_ties() {
        assert_eq!(ranks(&[10.0, 20.0, 20.0, 5.0]), vec![2.0, 3.5, 3.5, 1.0]);
    }

    #[test]
    fn test_pearson_perfect_anticorrelation() {
        let x: Vec<f64> = (0..12).map(|i| i as f64).collect();
        let y: Vec<f64> = x.iter().map(|v| 100.0 - v).collect();
        let r = pearson(&x, &y, 10).unwrap();
        assert!((r + 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_pearson_insufficient_and_degenerate() {
        assert_eq!(
            pearson(&[1.0, 2.0], &[2.0, 3.0], 10),
            Err(StatError::InsufficientData {
                required: 10,
                available: 2
            })
        );
        let flat = vec![5.0; 12];
        let rising: Vec<f64> = (0..12).map(|i| i as f64).collect();
        assert_eq!(pearson(&flat, &rising, 10), Err(StatError::DegenerateSeries));
    }

    #[test]
    fn test_spearman_monotone_nonlinear() {
        let x: Vec<f64> = (1..=12).map(|i| i as f64).collect();
        let y: Vec<f64> = x.iter().map(|v| v.powi(3)).collect();
        assert!((spearman(&x, &y, 10).unwrap() - 1.0).abs() < 1e-12);
        assert!(pearson(&x, &y, 10).unwrap() < 1.0);
    }

    #[test]
    fn test_p_value() {
        assert_eq!(correlation_p_value(1.0, 12), Some(0.0));
        let p_null = correlation_p_value(0.0, 30).unwrap();
        assert!((p_null - 1.0).abs() < 1e-9);
        let p_strong = correlation_p_value(0.8, 30).unwrap();
        assert!(p_strong < 0.001);
        assert_eq!(correlation_p_value(0.5, 2), None);
    }

    #[test]
    fn test_ols_slope() {
        let pts = vec![(0.0, 130.0), (1.0, 100.0), (2.0, 70.0)];
        assert!((ols_slope(&pts).unwrap() + 30.0).abs() < 1e-12);
        assert_eq!(ols_slope(&[(1.0, 2.0)]), None);
        assert_eq!(ols_slope(&[(1.0, 2.0), (1.0, 3.0)]), None);
    }

    proptest! {
        #[test]
        fn prop_correlations_bounded(values in proptest::collection::vec((-1e3f64..1e3, -1e3f64..1e3), 10..60)) {
            let (x, y): (Vec<f64>, Vec<f64>) = values.into_iter().unzip();
            for r in [pearson(&x, &y, 10), spearman(&x, &y, 10)].into_iter().flatten() {
                prop_assert!((-1.0..=1.0).contains(&r));
            }
        }

        #[test]
        fn prop_pearson_symmetric(values in proptest::collection::vec((-1e3f64..1e3, -1e3f64..1e3), 10..40)) {
            let (x, y): (Vec<f64>, Vec<f64>) = values.into_iter().unzip();
            prop_assert_eq!(pearson(&x, &y, 10), pearson(&y, &x, 10));
            prop_assert_eq!(spearman(&x, &y, 10), spearman(&y, &x, 10));
        }
    }
}
