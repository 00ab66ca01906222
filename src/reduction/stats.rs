//! Plain and robust statistics over `f64` slices.
//!
//! All functions ignore `NaN` entries. Empty inputs give `NaN`.
use crate::constants::MAD_TO_SIGMA;

fn finite(values: &[f64]) -> Vec<f64> {
    values.iter().copied().filter(|v| !v.is_nan()).collect()
}

pub fn nanmean(values: &[f64]) -> f64 {
    let v = finite(values);
    if v.is_empty() {
        return f64::NAN;
    }
    v.iter().sum::<f64>() / v.len() as f64
}

/// Population standard deviation (`ddof = 0`).
pub fn nanstd(values: &[f64]) -> f64 {
    let v = finite(values);
    if v.is_empty() {
        return f64::NAN;
    }
    let mean = v.iter().sum::<f64>() / v.len() as f64;
    (v.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / v.len() as f64).sqrt()
}

pub fn nanmedian(values: &[f64]) -> f64 {
    let mut v = finite(values);
    if v.is_empty() {
        return f64::NAN;
    }
    v.sort_by(f64::total_cmp);
    let n = v.len();
    if n % 2 == 1 {
        v[n / 2]
    } else {
        0.5 * (v[n / 2 - 1] + v[n / 2])
    }
}

pub fn nanmin(values: &[f64]) -> f64 {
    values
        .iter()
        .copied()
        .filter(|v| !v.is_nan())
        .fold(f64::NAN, f64::min)
}

pub fn nanmax(values: &[f64]) -> f64 {
    values
        .iter()
        .copied()
        .filter(|v| !v.is_nan())
        .fold(f64::NAN, f64::max)
}

/// Consecutive differences of an (already sorted) series.
pub fn diffs(values: &[f64]) -> Vec<f64> {
    values.windows(2).map(|w| w[1] - w[0]).collect()
}

/// Iterative median/MAD sigma clipping.
///
/// Arguments
/// -----------------
/// * `values`: the sample, `NaN` entries are never kept.
/// * `sigma`: rejection threshold, in units of the MAD-based standard deviation.
/// * `max_iterations`: stop after this many passes even if the mask still changes.
///
/// Return
/// ----------
/// * A mask of the kept entries, same length as `values`.
pub fn sigma_clip_mask(values: &[f64], sigma: f64, max_iterations: usize) -> Vec<bool> {
    let mut keep: Vec<bool> = values.iter().map(|v| !v.is_nan()).collect();

    for _ in 0..max_iterations {
        let kept: Vec<f64> = values
            .iter()
            .zip(&keep)
            .filter_map(|(v, k)| k.then_some(*v))
            .collect();
        if kept.len() < 3 {
            break;
        }
        let center = nanmedian(&kept);
        let deviations: Vec<f64> = kept.iter().map(|v| (v - center).abs()).collect();
        let scale = nanmedian(&deviations) * MAD_TO_SIGMA;
        if scale <= 0.0 || scale.is_nan() {
            break;
        }

        let next: Vec<bool> = values
            .iter()
            .map(|v| !v.is_nan() && (v - center).abs() <= sigma * scale)
            .collect();
        if next == keep {
            break;
        }
        keep = next;
    }
    keep
}

/// Mean and population RMS after sigma clipping, see [`sigma_clip_mask`].
pub fn robust_mean_rms(values: &[f64], sigma: f64, max_iterations: usize) -> (f64, f64) {
    let mask = sigma_clip_mask(values, sigma, max_iterations);
    let kept: Vec<f64> = values
        .iter()
        .zip(&mask)
        .filter_map(|(v, k)| k.then_some(*v))
        .collect();
    (nanmean(&kept), nanstd(&kept))
}

/// Coefficient of variation (std / mean) of a sample.
pub fn coefficient_of_variation(values: &[f64]) -> f64 {
    let mean = nanmean(values);
    if mean == 0.0 {
        return f64::INFINITY;
    }
    nanstd(values) / mean.abs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_basic_stats() {
        let v = [1.0, f64::NAN, 3.0, 2.0, 4.0];
        assert_eq!(nanmedian(&v), 2.5);
        assert_eq!(nanmean(&v), 2.5);
        assert_relative_eq!(nanstd(&v), 1.118033988749895, epsilon = 1e-12);
        assert_eq!(nanmin(&v), 1.0);
        assert_eq!(nanmax(&v), 4.0);
        assert!(nanmedian(&[]).is_nan());
        assert_eq!(diffs(&[1.0, 2.0, 4.0]), vec![1.0, 2.0]);
    }

    #[test]
    fn test_sigma_clip_drops_outliers() {
        let mut v: Vec<f64> = (0..20).map(|i| 18.0 + 0.01 * ((i % 5) as f64 - 2.0)).collect();
        v[3] = 10.0;
        v[11] = 10.2;
        let mask = sigma_clip_mask(&v, 3.0, 10);
        assert!(!mask[3] && !mask[11]);
        assert_eq!(mask.iter().filter(|k| **k).count(), 18);

        let (mean, rms) = robust_mean_rms(&v, 3.0, 10);
        assert!((mean - 18.0).abs() < 0.01);
        assert!(rms < 0.02);
    }

    #[test]
    fn test_uniform_cv() {
        let t: Vec<f64> = (0..10).map(|i| i as f64 * 2.0).collect();
        assert!(coefficient_of_variation(&diffs(&t)) < 1e-12);
    }
}
