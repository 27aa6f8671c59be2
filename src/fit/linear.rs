//! Robust linear fit engine.
//!
//! Fits `reference ≈ scale·target + offset` for one channel:
//!
//! 1. least squares on every valid sample
//! 2. residual center and spread (MAD or standard deviation)
//! 3. drop samples further than `rejection_sigma × spread` from the center
//! 4. refit; repeat until nothing is dropped or `max_iterations` is reached
//!
//! If a rejection pass would leave fewer than `min_samples`, the previous fit
//! is kept. A target with (numerically) zero variance cannot determine a
//! scale: `fit_linear` reports `DegenerateFit` and `fit_channel` falls back to
//! the offset-only model with the scale pinned to 1.

use log::{debug, warn};

use crate::domain::{FitMode, LinearFit, MosaicConfig, SamplePair, SpreadEstimator};
use crate::error::{MosaicError, Stage};
use crate::math::{LineFit, LineFitFailure, SPREAD_EPS, fit_line, has_degenerate_variance, median, residual_spread};

/// Options for the robust fit (a view of `MosaicConfig`).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinearFitOptions {
    pub rejection_sigma: f64,
    pub max_iterations: usize,
    pub min_samples: usize,
    pub spread: SpreadEstimator,
}

impl From<&MosaicConfig> for LinearFitOptions {
    fn from(config: &MosaicConfig) -> Self {
        Self {
            rejection_sigma: config.rejection_sigma,
            max_iterations: config.max_rejection_iterations,
            min_samples: config.min_fit_samples,
            spread: config.spread_estimator,
        }
    }
}

/// Per-sample values of one channel plus the indices of usable samples.
struct ChannelData {
    target: Vec<f64>,
    reference: Vec<f64>,
    pool: Vec<usize>,
}

fn channel_data(samples: &[SamplePair], channel: usize) -> Result<ChannelData, MosaicError> {
    let mut target = Vec::with_capacity(samples.len());
    let mut reference = Vec::with_capacity(samples.len());
    let mut pool = Vec::with_capacity(samples.len());
    for (i, s) in samples.iter().enumerate() {
        if channel >= s.channels() {
            return Err(MosaicError::InvalidChannel {
                stage: Stage::LinearFit,
                channel,
                reason: format!("sample {i} has only {} channel(s)", s.channels()),
            });
        }
        let (t, r) = (s.target[channel], s.reference[channel]);
        target.push(t);
        reference.push(r);
        if s.valid && t.is_finite() && r.is_finite() {
            pool.push(i);
        }
    }
    Ok(ChannelData {
        target,
        reference,
        pool,
    })
}

fn line_failure(channel: usize, failure: LineFitFailure) -> MosaicError {
    let reason = match failure {
        LineFitFailure::TooFewPoints => "fewer than two samples",
        LineFitFailure::ZeroVariance => "target values have zero variance; scale is undetermined",
        LineFitFailure::Singular => "normal equations are singular",
    };
    MosaicError::DegenerateFit {
        channel,
        reason: reason.to_string(),
    }
}

/// Spreads below this fraction of the data magnitude are rounding noise.
fn spread_floor(values: &[f64], idx: &[usize]) -> f64 {
    let mean_abs = idx.iter().map(|&i| values[i].abs()).sum::<f64>() / idx.len().max(1) as f64;
    SPREAD_EPS * mean_abs.max(1.0)
}

fn rms(residuals: &[f64]) -> f64 {
    if residuals.is_empty() {
        return 0.0;
    }
    (residuals.iter().map(|r| r * r).sum::<f64>() / residuals.len() as f64).sqrt()
}

/// Fit scale and offset with iterative sigma rejection.
pub fn fit_linear(samples: &[SamplePair], channel: usize, opts: &LinearFitOptions) -> Result<LinearFit, MosaicError> {
    let data = channel_data(samples, channel)?;
    let pool = data.pool;
    if pool.is_empty() {
        return Err(MosaicError::InsufficientData {
            stage: Stage::LinearFit,
            channel,
            needed: opts.min_samples,
            found: 0,
        });
    }

    let pool_targets: Vec<f64> = pool.iter().map(|&i| data.target[i]).collect();
    if has_degenerate_variance(&pool_targets) {
        return Err(line_failure(channel, LineFitFailure::ZeroVariance));
    }
    if pool.len() < opts.min_samples {
        return Err(MosaicError::InsufficientData {
            stage: Stage::LinearFit,
            channel,
            needed: opts.min_samples,
            found: pool.len(),
        });
    }

    let mut line = fit_line(&data.target, &data.reference, &pool).map_err(|f| line_failure(channel, f))?;
    let floor = spread_floor(&data.reference, &pool);
    let mut active = pool.clone();
    let mut iterations = 0;
    let mut scratch = Vec::with_capacity(pool.len());
    let mut residuals = Vec::with_capacity(pool.len());

    for _ in 0..opts.max_iterations {
        residuals.clear();
        residuals.extend(active.iter().map(|&i| data.reference[i] - predict(&line, data.target[i])));
        let (center, spread) = residual_spread(&residuals, opts.spread, &mut scratch);
        if !(spread > floor) {
            break;
        }
        let threshold = opts.rejection_sigma * spread;
        let keep: Vec<usize> = active
            .iter()
            .zip(residuals.iter())
            .filter(|(_, r)| (*r - center).abs() <= threshold)
            .map(|(&i, _)| i)
            .collect();

        if keep.len() == active.len() {
            break;
        }
        if keep.len() < opts.min_samples {
            debug!(
                "channel {channel}: rejection would leave {} < {} samples; keeping previous fit",
                keep.len(),
                opts.min_samples
            );
            break;
        }
        match fit_line(&data.target, &data.reference, &keep) {
            Ok(next) => {
                line = next;
                active = keep;
                iterations += 1;
            }
            Err(failure) => {
                debug!("channel {channel}: refit after rejection failed ({failure:?}); keeping previous fit");
                break;
            }
        }
    }

    if !(line.slope > 0.0) {
        return Err(MosaicError::DegenerateFit {
            channel,
            reason: format!("non-positive scale {:.6}", line.slope),
        });
    }

    residuals.clear();
    residuals.extend(active.iter().map(|&i| data.reference[i] - predict(&line, data.target[i])));
    let rejected = complement(&pool, &active);

    Ok(LinearFit {
        channel,
        mode: FitMode::Linear,
        scale: line.slope,
        offset: line.intercept,
        rms: rms(&residuals),
        accepted: active,
        rejected,
        iterations,
    })
}

/// Fit `reference ≈ target + offset` with the same rejection loop, using the
/// median difference as the estimate. Needs a single sample.
pub fn fit_offset_only(
    samples: &[SamplePair],
    channel: usize,
    opts: &LinearFitOptions,
) -> Result<LinearFit, MosaicError> {
    let data = channel_data(samples, channel)?;
    let pool = data.pool;
    if pool.is_empty() {
        return Err(MosaicError::InsufficientData {
            stage: Stage::LinearFit,
            channel,
            needed: 1,
            found: 0,
        });
    }

    let diffs: Vec<f64> = (0..data.target.len())
        .map(|i| data.reference[i] - data.target[i])
        .collect();
    let floor = spread_floor(&data.reference, &pool);
    let mut active = pool.clone();
    let mut iterations = 0;
    let mut scratch = Vec::with_capacity(pool.len());
    let mut values: Vec<f64> = Vec::with_capacity(pool.len());

    for _ in 0..opts.max_iterations {
        values.clear();
        values.extend(active.iter().map(|&i| diffs[i]));
        let (center, spread) = residual_spread(&values, opts.spread, &mut scratch);
        if !(spread > floor) {
            break;
        }
        let threshold = opts.rejection_sigma * spread;
        let keep: Vec<usize> = active
            .iter()
            .copied()
            .filter(|&i| (diffs[i] - center).abs() <= threshold)
            .collect();
        if keep.len() == active.len() || keep.is_empty() {
            break;
        }
        active = keep;
        iterations += 1;
    }

    values.clear();
    values.extend(active.iter().map(|&i| diffs[i]));
    let offset = median(&values).ok_or(MosaicError::InsufficientData {
        stage: Stage::LinearFit,
        channel,
        needed: 1,
        found: 0,
    })?;
    let residuals: Vec<f64> = values.iter().map(|d| d - offset).collect();
    let rejected = complement(&pool, &active);

    Ok(LinearFit {
        channel,
        mode: FitMode::OffsetOnly,
        scale: 1.0,
        offset,
        rms: rms(&residuals),
        accepted: active,
        rejected,
        iterations,
    })
}

/// Linear fit, falling back to offset-only when the linear model is degenerate.
pub fn fit_channel(samples: &[SamplePair], channel: usize, opts: &LinearFitOptions) -> Result<LinearFit, MosaicError> {
    match fit_linear(samples, channel, opts) {
        Ok(fit) => {
            if !fit.rejected.is_empty() {
                warn!(
                    "channel {channel}: rejected {} of {} samples in {} iteration(s)",
                    fit.rejected.len(),
                    fit.rejected.len() + fit.accepted.len(),
                    fit.iterations
                );
            }
            Ok(fit)
        }
        Err(MosaicError::DegenerateFit { reason, .. }) => {
            warn!("channel {channel}: {reason}; falling back to offset-only correction");
            fit_offset_only(samples, channel, opts)
        }
        Err(other) => Err(other),
    }
}

#[inline]
fn predict(line: &LineFit, target: f64) -> f64 {
    line.slope * target + line.intercept
}

/// Sorted indices of `all` that are not in `kept` (both sorted ascending).
fn complement(all: &[usize], kept: &[usize]) -> Vec<usize> {
    let mut out = Vec::with_capacity(all.len() - kept.len().min(all.len()));
    let mut k = kept.iter().peekable();
    for &i in all {
        if k.peek() == Some(&&i) {
            k.next();
        } else {
            out.push(i);
        }
    }
    out
}
