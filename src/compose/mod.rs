//! Mosaic compositor.
//!
//! Every target pixel is corrected with `scale·t + offset + gradient(x, y)`.
//! Outside the overlap the corrected target is emitted where the target has
//! data, the reference pixel otherwise. Inside the overlap the blend mode
//! decides:
//!
//! - reference-priority: reference pixel
//! - target-priority: corrected target pixel
//! - weighted-average: target weight rises with a smoothstep from the
//!   reference side of the overlap to the target side
//! - random-dither: each pixel is taken from the target with a fixed
//!   probability; the draw is seeded per row so runs are reproducible
//!
//! Rows are processed in parallel. Inputs are never mutated.

use log::debug;
use rand::prelude::*;
use rand::rngs::StdRng;
use rayon::prelude::*;

use crate::domain::{BlendMode, FitMode, LinearFit, MosaicConfig, OverlapMask, PixelImage};
use crate::error::{MosaicError, Stage};
use crate::fit::GradientSurface;

/// Full correction for one channel.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelCorrection {
    pub fit: LinearFit,
    pub gradient: GradientSurface,
}

impl ChannelCorrection {
    /// `scale = 1`, `offset = 0`, no gradient.
    pub fn identity(channel: usize) -> Self {
        Self {
            fit: LinearFit {
                channel,
                mode: FitMode::Linear,
                scale: 1.0,
                offset: 0.0,
                rms: 0.0,
                accepted: vec![0],
                rejected: Vec::new(),
                iterations: 0,
            },
            gradient: GradientSurface::zero(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BlendOptions {
    pub mode: BlendMode,
    pub dither_probability: f64,
    pub dither_seed: u64,
}

impl From<&MosaicConfig> for BlendOptions {
    fn from(config: &MosaicConfig) -> Self {
        Self {
            mode: config.blend_mode,
            dither_probability: config.dither_probability,
            dither_seed: config.dither_seed,
        }
    }
}

/// Seam geometry for weighted-average blending.
///
/// The seam runs across the overlap perpendicular to the line joining the
/// centroid of reference-only coverage to the centroid of target-only
/// coverage. `t` is the projection onto that line, normalized to `[0, 1]`
/// over the overlap.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SeamGeometry {
    origin: (f64, f64),
    direction: (f64, f64),
    t_min: f64,
    t_max: f64,
}

/// Span (pixels) under which the overlap has no usable seam direction.
const MIN_SEAM_SPAN: f64 = 1e-6;

impl SeamGeometry {
    /// `None` when either tile has no coverage outside the overlap or the
    /// overlap is flat along the seam direction; blending then uses 0.5.
    pub fn measure(reference: &PixelImage, target: &PixelImage, mask: &OverlapMask) -> Option<Self> {
        let mut ref_sum = (0.0, 0.0, 0usize);
        let mut tgt_sum = (0.0, 0.0, 0usize);
        for y in 0..mask.height() {
            for x in 0..mask.width() {
                if mask.contains(x, y) {
                    continue;
                }
                let (fx, fy) = (x as f64, y as f64);
                if reference.has_data(x, y) {
                    ref_sum = (ref_sum.0 + fx, ref_sum.1 + fy, ref_sum.2 + 1);
                }
                if target.has_data(x, y) {
                    tgt_sum = (tgt_sum.0 + fx, tgt_sum.1 + fy, tgt_sum.2 + 1);
                }
            }
        }
        if ref_sum.2 == 0 || tgt_sum.2 == 0 {
            return None;
        }
        let r = (ref_sum.0 / ref_sum.2 as f64, ref_sum.1 / ref_sum.2 as f64);
        let t = (tgt_sum.0 / tgt_sum.2 as f64, tgt_sum.1 / tgt_sum.2 as f64);
        let (dx, dy) = (t.0 - r.0, t.1 - r.1);
        let len = dx.hypot(dy);
        if !(len > MIN_SEAM_SPAN) {
            return None;
        }
        let direction = (dx / len, dy / len);

        let mut t_min = f64::INFINITY;
        let mut t_max = f64::NEG_INFINITY;
        for y in 0..mask.height() {
            for x in 0..mask.width() {
                if mask.contains(x, y) {
                    let p = (x as f64 - r.0) * direction.0 + (y as f64 - r.1) * direction.1;
                    t_min = t_min.min(p);
                    t_max = t_max.max(p);
                }
            }
        }
        if !(t_max - t_min > MIN_SEAM_SPAN) {
            return None;
        }
        Some(Self {
            origin: r,
            direction,
            t_min,
            t_max,
        })
    }

    /// Target weight at `(x, y)`: 0 on the reference edge of the overlap,
    /// 1 on the target edge, non-decreasing in between.
    pub fn target_weight(&self, x: f64, y: f64) -> f64 {
        let p = (x - self.origin.0) * self.direction.0 + (y - self.origin.1) * self.direction.1;
        let t = ((p - self.t_min) / (self.t_max - self.t_min)).clamp(0.0, 1.0);
        t * t * (3.0 - 2.0 * t)
    }
}

fn validate_corrections(corrections: &[ChannelCorrection], width: usize, height: usize) -> Result<(), MosaicError> {
    for (channel, c) in corrections.iter().enumerate() {
        if !c.fit.is_valid() {
            return Err(MosaicError::InvalidChannel {
                stage: Stage::Composite,
                channel,
                reason: format!(
                    "linear fit is invalid (scale {}, offset {}, {} accepted samples)",
                    c.fit.scale,
                    c.fit.offset,
                    c.fit.accepted.len()
                ),
            });
        }
        let span = c.gradient.span_over(width, height);
        if !span.is_finite() {
            return Err(MosaicError::InvalidChannel {
                stage: Stage::Composite,
                channel,
                reason: "gradient is not finite over the tile".to_string(),
            });
        }
    }
    Ok(())
}

/// Correct `target` and merge it with `reference`.
pub fn compose(
    reference: &PixelImage,
    target: &PixelImage,
    mask: &OverlapMask,
    corrections: &[ChannelCorrection],
    opts: &BlendOptions,
) -> Result<PixelImage, MosaicError> {
    reference.check_same_dims(target, "target tile")?;
    let (width, height, channels) = reference.dims();
    if (mask.width(), mask.height()) != (width, height) {
        return Err(MosaicError::DimensionMismatch {
            what: "overlap mask",
            expected: (width, height, 1),
            actual: (mask.width(), mask.height(), 1),
        });
    }
    if corrections.len() != channels {
        return Err(MosaicError::DimensionMismatch {
            what: "channel corrections",
            expected: (width, height, channels),
            actual: (width, height, corrections.len()),
        });
    }
    if !(0.0..=1.0).contains(&opts.dither_probability) {
        return Err(MosaicError::config("dither_probability", "must be within [0, 1]"));
    }
    validate_corrections(corrections, width, height)?;

    let seam = match opts.mode {
        BlendMode::WeightedAverage => SeamGeometry::measure(reference, target, mask),
        _ => None,
    };
    debug!(
        "compositing {width}x{height}x{channels} with {:?} (seam: {})",
        opts.mode,
        if seam.is_some() { "measured" } else { "none" }
    );

    // Coverage is per pixel, not per channel.
    let target_covered: Vec<bool> = (0..width * height)
        .map(|i| target.has_data(i % width, i / width))
        .collect();

    let planes: Vec<Vec<f32>> = corrections
        .iter()
        .enumerate()
        .map(|(channel, correction)| {
            let (cols, rows) = correction.gradient.profiles(width, height);
            let ref_plane = reference.plane(channel);
            let tgt_plane = target.plane(channel);
            let mut out = vec![0.0f32; width * height];
            if width == 0 {
                return out;
            }
            out.par_chunks_mut(width).enumerate().for_each(|(y, row)| {
                let mut rng = StdRng::seed_from_u64(row_seed(opts.dither_seed, y));
                for (x, px) in row.iter_mut().enumerate() {
                    let i = y * width + x;
                    let draw: f64 = rng.r#gen();
                    let r = ref_plane[i];
                    let corrected = (correction.fit.apply(tgt_plane[i] as f64) + cols[x] + rows[y]) as f32;

                    *px = if !mask.contains(x, y) {
                        if target_covered[i] { corrected } else { r }
                    } else {
                        match opts.mode {
                            BlendMode::ReferencePriority => r,
                            BlendMode::TargetPriority => corrected,
                            BlendMode::WeightedAverage => {
                                let w = seam.map_or(0.5, |s| s.target_weight(x as f64, y as f64));
                                ((1.0 - w) * r as f64 + w * corrected as f64) as f32
                            }
                            BlendMode::RandomDither => {
                                if draw < opts.dither_probability {
                                    corrected
                                } else {
                                    r
                                }
                            }
                        }
                    };
                }
            });
            out
        })
        .collect();

    PixelImage::from_planes(width, height, planes)
}

/// Per-row RNG seed; identical across channels so a dithered pixel comes from
/// one tile in every channel.
fn row_seed(seed: u64, y: usize) -> u64 {
    seed ^ (y as u64).wrapping_add(1).wrapping_mul(0x9E37_79B9_7F4A_7C15)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opts(mode: BlendMode) -> BlendOptions {
        BlendOptions {
            mode,
            dither_probability: 0.5,
            dither_seed: 7,
        }
    }

    fn ramp(width: usize, height: usize, channels: usize) -> PixelImage {
        let planes = (0..channels)
            .map(|c| {
                (0..width * height)
                    .map(|i| 0.1 + 0.001 * i as f32 + 0.05 * c as f32)
                    .collect()
            })
            .collect();
        PixelImage::from_planes(width, height, planes).unwrap()
    }

    fn identity(channels: usize) -> Vec<ChannelCorrection> {
        (0..channels).map(ChannelCorrection::identity).collect()
    }

    /// Reference covers columns `0..10`, target `6..16`, 8 rows.
    fn side_by_side() -> (PixelImage, PixelImage, OverlapMask) {
        let (w, h) = (16, 8);
        let mut reference = PixelImage::new(w, h, 1);
        let mut target = PixelImage::new(w, h, 1);
        for y in 0..h {
            for x in 0..w {
                if x < 10 {
                    reference.set(x, y, 0, 1.0);
                }
                if x >= 6 {
                    target.set(x, y, 0, 3.0);
                }
            }
        }
        let mask = OverlapMask::from_coverage(&reference, &target).unwrap();
        (reference, target, mask)
    }

    #[test]
    fn identity_target_priority_reproduces_target() {
        let target = ramp(9, 7, 3);
        let mask = OverlapMask::from_fn(9, 7, |x, _| x >= 3);
        let out = compose(&target, &target, &mask, &identity(3), &opts(BlendMode::TargetPriority)).unwrap();
        assert_eq!(out.planes(), target.planes());
    }

    #[test]
    fn reference_priority_keeps_reference_in_overlap() {
        let (reference, target, mask) = side_by_side();
        let out = compose(&reference, &target, &mask, &identity(1), &opts(BlendMode::ReferencePriority)).unwrap();
        assert_eq!(out.get(7, 3, 0), 1.0);
        assert_eq!(out.get(2, 3, 0), 1.0);
        assert_eq!(out.get(12, 3, 0), 3.0);
    }

    #[test]
    fn correction_applies_outside_overlap() {
        let (reference, target, mask) = side_by_side();
        let mut corrections = identity(1);
        corrections[0].fit.scale = 0.5;
        corrections[0].fit.offset = -0.25;
        let out = compose(&reference, &target, &mask, &corrections, &opts(BlendMode::ReferencePriority)).unwrap();
        assert_eq!(out.get(15, 0, 0), 1.25);
        assert_eq!(out.get(0, 0, 0), 1.0);
    }

    #[test]
    fn weighted_average_moves_monotonically_toward_target() {
        let (reference, target, mask) = side_by_side();
        let out = compose(&reference, &target, &mask, &identity(1), &opts(BlendMode::WeightedAverage)).unwrap();
        let row: Vec<f32> = (6..10).map(|x| out.get(x, 4, 0)).collect();
        assert_eq!(row[0], 1.0);
        assert_eq!(row[3], 3.0);
        for pair in row.windows(2) {
            assert!(pair[0] <= pair[1], "{row:?}");
        }
    }

    #[test]
    fn weighted_average_at_full_overlap_is_even() {
        let reference = PixelImage::filled(4, 4, 1, 2.0);
        let target = PixelImage::filled(4, 4, 1, 4.0);
        let mask = OverlapMask::full(4, 4);
        let out = compose(&reference, &target, &mask, &identity(1), &opts(BlendMode::WeightedAverage)).unwrap();
        assert!(out.plane(0).iter().all(|&v| v == 3.0));
    }

    #[test]
    fn dither_is_reproducible_and_near_probability() {
        let reference = PixelImage::filled(64, 64, 2, 1.0);
        let target = PixelImage::filled(64, 64, 2, 2.0);
        let mask = OverlapMask::full(64, 64);
        let o = BlendOptions {
            dither_probability: 0.25,
            ..opts(BlendMode::RandomDither)
        };
        let a = compose(&reference, &target, &mask, &identity(2), &o).unwrap();
        let b = compose(&reference, &target, &mask, &identity(2), &o).unwrap();
        assert_eq!(a.planes(), b.planes());
        // Both channels pick the same source.
        assert!(a.plane(0).iter().zip(a.plane(1)).all(|(x, y)| x == y));

        let taken = a.plane(0).iter().filter(|&&v| v == 2.0).count() as f64 / 4096.0;
        assert!((taken - 0.25).abs() < 0.05, "fraction {taken}");
    }

    #[test]
    fn invalid_fit_is_refused_with_channel() {
        let image = PixelImage::filled(4, 4, 3, 1.0);
        let mask = OverlapMask::full(4, 4);
        let mut corrections = identity(3);
        corrections[2].fit.scale = f64::NAN;
        let err = compose(&image, &image, &mask, &corrections, &opts(BlendMode::TargetPriority)).unwrap_err();
        assert!(matches!(
            err,
            MosaicError::InvalidChannel {
                stage: Stage::Composite,
                channel: 2,
                ..
            }
        ));

        corrections[2].fit.scale = 1.0;
        corrections[2].fit.mode = FitMode::OffsetOnly;
        corrections[2].fit.accepted.clear();
        assert!(compose(&image, &image, &mask, &corrections, &opts(BlendMode::TargetPriority)).is_err());
    }

    #[test]
    fn correction_count_must_match_channels() {
        let image = PixelImage::filled(2, 2, 3, 1.0);
        let mask = OverlapMask::full(2, 2);
        let err = compose(&image, &image, &mask, &identity(2), &opts(BlendMode::TargetPriority)).unwrap_err();
        assert!(matches!(err, MosaicError::DimensionMismatch { .. }));
    }
}
