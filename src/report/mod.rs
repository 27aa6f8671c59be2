//! Reporting utilities: per-sample residuals, text summaries, and the
//! pixel-math expression export.

pub mod expression;
pub mod format;

pub use expression::*;
pub use format::*;

use crate::compose::ChannelCorrection;
use crate::domain::SamplePair;
use crate::error::{MosaicError, Stage};

/// One sample seen through a channel's final correction.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleResidual {
    pub index: usize,
    pub x: f64,
    pub y: f64,
    pub reference: f64,
    pub target: f64,
    /// `reference − (scale·target + offset)`: what the gradient models.
    pub linear_residual: f64,
    /// `reference − (scale·target + offset + gradient)`.
    pub residual: f64,
    pub rejected: bool,
}

/// Residuals of every valid sample for one channel.
pub fn compute_residuals(
    samples: &[SamplePair],
    correction: &ChannelCorrection,
    channel: usize,
) -> Result<Vec<SampleResidual>, MosaicError> {
    let mut out = Vec::with_capacity(samples.len());
    for (index, s) in samples.iter().enumerate() {
        if channel >= s.channels() {
            return Err(MosaicError::InvalidChannel {
                stage: Stage::Gradient,
                channel,
                reason: format!("sample {index} has only {} channel(s)", s.channels()),
            });
        }
        if !s.valid {
            continue;
        }
        let (reference, target) = (s.reference[channel], s.target[channel]);
        let linear_residual = reference - correction.fit.apply(target);
        let residual = linear_residual - correction.gradient.eval(s.x, s.y);
        if !residual.is_finite() {
            return Err(MosaicError::InvalidChannel {
                stage: Stage::Gradient,
                channel,
                reason: format!("non-finite prediction at sample {index}"),
            });
        }
        out.push(SampleResidual {
            index,
            x: s.x,
            y: s.y,
            reference,
            target,
            linear_residual,
            residual,
            rejected: correction.fit.rejected.binary_search(&index).is_ok(),
        });
    }
    Ok(out)
}

/// The `top_n` samples with the largest absolute residual.
pub fn worst_residuals(residuals: &[SampleResidual], top_n: usize) -> Vec<SampleResidual> {
    let mut sorted = residuals.to_vec();
    sorted.sort_by(|a, b| b.residual.abs().total_cmp(&a.residual.abs()));
    sorted.truncate(top_n);
    sorted
}
