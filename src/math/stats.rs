//! Robust statistics: median, MAD, sigma-clipped mean, residual spread.

use std::cmp::Ordering;

use crate::domain::SpreadEstimator;

/// MAD (Median Absolute Deviation) to standard deviation conversion factor.
///
/// For a normal distribution, σ ≈ 1.4826 × MAD.
pub const MAD_TO_SIGMA: f64 = 1.482_602_218_505_602;

/// Mean absolute deviation to σ for a normal distribution (√(π/2)).
const MEAN_ABS_DEV_TO_SIGMA: f64 = 1.253_314_137_315_500_3;

/// Spreads at or below this are treated as zero.
pub const SPREAD_EPS: f64 = 1e-12;

fn cmp_f64(a: &f64, b: &f64) -> Ordering {
    a.partial_cmp(b).unwrap_or(Ordering::Equal)
}

/// Median of `data`, reordering it in place (quickselect).
///
/// Returns `None` for an empty slice.
pub fn median_mut(data: &mut [f64]) -> Option<f64> {
    let len = data.len();
    if len == 0 {
        return None;
    }
    let mid = len / 2;
    let (left, median, _) = data.select_nth_unstable_by(mid, cmp_f64);
    let upper = *median;
    if len % 2 == 1 {
        return Some(upper);
    }
    let lower = left.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    Some((lower + upper) * 0.5)
}

/// Median of a slice without touching the caller's data.
pub fn median(data: &[f64]) -> Option<f64> {
    let mut scratch = data.to_vec();
    median_mut(&mut scratch)
}

/// MAD around `center`, using `scratch` as working storage.
pub fn mad_with_scratch(values: &[f64], center: f64, scratch: &mut Vec<f64>) -> f64 {
    scratch.clear();
    scratch.extend(values.iter().map(|&v| (v - center).abs()));
    median_mut(scratch).unwrap_or(0.0)
}

pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Sample standard deviation (n - 1) around `center`.
pub fn std_dev(values: &[f64], center: f64) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let ss: f64 = values.iter().map(|v| (v - center) * (v - center)).sum();
    (ss / (values.len() - 1) as f64).sqrt()
}

/// Mean after iterative κσ clipping around the mean.
///
/// Stops when nothing is clipped, when `max_iterations` is reached, when the
/// spread collapses, or when clipping would leave fewer than three values.
/// `values` is reordered in place.
pub fn sigma_clipped_mean(values: &mut [f64], kappa: f64, max_iterations: usize) -> Option<f64> {
    let mut len = values.len();
    let mut center = mean(values)?;

    for _ in 0..max_iterations {
        if len < 3 {
            break;
        }
        let active = &values[..len];
        let sigma = std_dev(active, center);
        if sigma <= SPREAD_EPS {
            break;
        }
        let threshold = kappa * sigma;

        let mut write = 0;
        for read in 0..len {
            if (values[read] - center).abs() <= threshold {
                values[write] = values[read];
                write += 1;
            }
        }
        if write == len || write < 3 {
            break;
        }
        len = write;
        center = mean(&values[..len])?;
    }

    Some(center)
}

/// Center and σ-equivalent spread of fit residuals.
///
/// When the MAD collapses to zero (more than half the residuals identical) the
/// spread falls back to the mean absolute deviation so that a lone outlier among
/// otherwise perfect samples is still measurable.
pub fn residual_spread(residuals: &[f64], estimator: SpreadEstimator, scratch: &mut Vec<f64>) -> (f64, f64) {
    match estimator {
        SpreadEstimator::Mad => {
            scratch.clear();
            scratch.extend_from_slice(residuals);
            let center = median_mut(scratch).unwrap_or(0.0);
            let mad = mad_with_scratch(residuals, center, scratch);
            if mad > SPREAD_EPS {
                return (center, mad * MAD_TO_SIGMA);
            }
            let mean_abs = residuals.iter().map(|r| (r - center).abs()).sum::<f64>()
                / residuals.len().max(1) as f64;
            (center, mean_abs * MEAN_ABS_DEV_TO_SIGMA)
        }
        SpreadEstimator::StdDev => {
            let center = mean(residuals).unwrap_or(0.0);
            (center, std_dev(residuals, center))
        }
    }
}
