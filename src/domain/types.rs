//! Shared domain types.
//!
//! Pixel data is stored planar (one `Vec<f32>` per channel, row-major) so a
//! single channel can be handed to the fit stages without copying. Numeric work
//! downstream is done in `f64`.

use std::collections::BTreeMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::OnceLock;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::MosaicError;

/// How the overlap region is merged once the target has been corrected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum BlendMode {
    /// Keep reference pixels inside the overlap.
    ReferencePriority,
    /// Keep corrected target pixels inside the overlap.
    TargetPriority,
    /// Cross-fade from reference to target across the overlap.
    WeightedAverage,
    /// Pick one source per pixel at random with a fixed probability.
    RandomDither,
}

impl BlendMode {
    pub const ALL: [BlendMode; 4] = [
        BlendMode::ReferencePriority,
        BlendMode::TargetPriority,
        BlendMode::WeightedAverage,
        BlendMode::RandomDither,
    ];

    pub fn display_name(self) -> &'static str {
        match self {
            BlendMode::ReferencePriority => "reference-priority",
            BlendMode::TargetPriority => "target-priority",
            BlendMode::WeightedAverage => "weighted-average",
            BlendMode::RandomDither => "random-dither",
        }
    }

    pub fn next(self) -> Self {
        let idx = Self::ALL.iter().position(|&m| m == self).unwrap_or(0);
        Self::ALL[(idx + 1) % Self::ALL.len()]
    }

    pub fn prev(self) -> Self {
        let idx = Self::ALL.iter().position(|&m| m == self).unwrap_or(0);
        Self::ALL[(idx + Self::ALL.len() - 1) % Self::ALL.len()]
    }
}

/// Robust per-cell reduction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum CellStatistic {
    Median,
    /// Mean after iterative sigma clipping around the mean.
    SigmaClippedMean,
}

/// Spread estimator used to reject fit residuals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum SpreadEstimator {
    /// Median absolute deviation, scaled to σ for normal data.
    Mad,
    /// Sample standard deviation.
    StdDev,
}

/// Which spatial axes the residual gradient is modeled along.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum GradientAxes {
    /// No gradient correction.
    None,
    X,
    Y,
    /// Separable: x curve plus a y curve fitted to what the x curve leaves.
    Xy,
}

impl GradientAxes {
    pub fn next(self) -> Self {
        match self {
            GradientAxes::None => GradientAxes::X,
            GradientAxes::X => GradientAxes::Y,
            GradientAxes::Y => GradientAxes::Xy,
            GradientAxes::Xy => GradientAxes::None,
        }
    }
}

/// Spatial axis of a 1-D gradient curve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Axis {
    X,
    Y,
}

impl Axis {
    pub fn pick(self, x: f64, y: f64) -> f64 {
        match self {
            Axis::X => x,
            Axis::Y => y,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Axis::X => "x",
            Axis::Y => "y",
        }
    }
}

/// Half-open pixel rectangle `[x0, x1) × [y0, y1)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PixelRect {
    pub x0: usize,
    pub y0: usize,
    pub x1: usize,
    pub y1: usize,
}

impl PixelRect {
    pub fn width(&self) -> usize {
        self.x1 - self.x0
    }

    pub fn height(&self) -> usize {
        self.y1 - self.y0
    }
}

/// A rectangular multi-channel image with planar `f32` storage.
///
/// A pixel whose channels are all exactly zero is treated as "no data".
#[derive(Debug, Clone)]
pub struct PixelImage {
    width: usize,
    height: usize,
    planes: Vec<Vec<f32>>,
    fingerprint: OnceLock<u64>,
}

impl PixelImage {
    /// A zero-filled image (no data anywhere).
    pub fn new(width: usize, height: usize, channels: usize) -> Self {
        Self::filled(width, height, channels, 0.0)
    }

    pub fn filled(width: usize, height: usize, channels: usize, value: f32) -> Self {
        Self {
            width,
            height,
            planes: vec![vec![value; width * height]; channels],
            fingerprint: OnceLock::new(),
        }
    }

    pub fn from_planes(width: usize, height: usize, planes: Vec<Vec<f32>>) -> Result<Self, MosaicError> {
        if planes.is_empty() {
            return Err(MosaicError::config("channels", "an image needs at least one channel"));
        }
        for plane in &planes {
            if plane.len() != width * height {
                return Err(MosaicError::DimensionMismatch {
                    what: "image plane",
                    expected: (width, height, 1),
                    actual: (plane.len(), 1, 1),
                });
            }
        }
        Ok(Self {
            width,
            height,
            planes,
            fingerprint: OnceLock::new(),
        })
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn channels(&self) -> usize {
        self.planes.len()
    }

    /// `(width, height, channels)`.
    pub fn dims(&self) -> (usize, usize, usize) {
        (self.width, self.height, self.planes.len())
    }

    pub fn plane(&self, channel: usize) -> &[f32] {
        &self.planes[channel]
    }

    pub fn plane_mut(&mut self, channel: usize) -> &mut [f32] {
        self.fingerprint = OnceLock::new();
        &mut self.planes[channel]
    }

    pub fn planes(&self) -> &[Vec<f32>] {
        &self.planes
    }

    pub fn into_planes(self) -> Vec<Vec<f32>> {
        self.planes
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize, channel: usize) -> f32 {
        self.planes[channel][y * self.width + x]
    }

    pub fn set(&mut self, x: usize, y: usize, channel: usize, value: f32) {
        let idx = y * self.width + x;
        self.plane_mut(channel)[idx] = value;
    }

    /// Whether any channel carries data at `(x, y)`.
    #[inline]
    pub fn has_data(&self, x: usize, y: usize) -> bool {
        let idx = y * self.width + x;
        self.planes.iter().any(|p| p[idx] != 0.0)
    }

    /// Content hash (dimensions + pixel bits), computed once and memoized.
    pub fn content_fingerprint(&self) -> u64 {
        *self.fingerprint.get_or_init(|| {
            let mut hasher = DefaultHasher::new();
            self.dims().hash(&mut hasher);
            for plane in &self.planes {
                for v in plane {
                    v.to_bits().hash(&mut hasher);
                }
            }
            hasher.finish()
        })
    }

    pub(crate) fn check_same_dims(&self, other: &PixelImage, what: &'static str) -> Result<(), MosaicError> {
        if self.dims() != other.dims() {
            return Err(MosaicError::DimensionMismatch {
                what,
                expected: self.dims(),
                actual: other.dims(),
            });
        }
        Ok(())
    }
}

/// Per-pixel membership in the overlap region.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverlapMask {
    width: usize,
    height: usize,
    bits: Vec<bool>,
}

impl OverlapMask {
    pub fn empty(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            bits: vec![false; width * height],
        }
    }

    pub fn full(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            bits: vec![true; width * height],
        }
    }

    pub fn from_fn(width: usize, height: usize, f: impl Fn(usize, usize) -> bool) -> Self {
        let mut bits = Vec::with_capacity(width * height);
        for y in 0..height {
            for x in 0..width {
                bits.push(f(x, y));
            }
        }
        Self { width, height, bits }
    }

    /// Pixels where both tiles carry data.
    pub fn from_coverage(reference: &PixelImage, target: &PixelImage) -> Result<Self, MosaicError> {
        reference.check_same_dims(target, "target tile")?;
        Ok(Self::from_fn(reference.width(), reference.height(), |x, y| {
            reference.has_data(x, y) && target.has_data(x, y)
        }))
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    #[inline]
    pub fn contains(&self, x: usize, y: usize) -> bool {
        self.bits[y * self.width + x]
    }

    pub fn set(&mut self, x: usize, y: usize, value: bool) {
        self.bits[y * self.width + x] = value;
    }

    pub fn count(&self) -> usize {
        self.bits.iter().filter(|&&b| b).count()
    }

    /// Tight bounding box of the set pixels, or `None` for an empty mask.
    pub fn bounding_box(&self) -> Option<PixelRect> {
        let mut rect: Option<PixelRect> = None;
        for y in 0..self.height {
            let row = &self.bits[y * self.width..(y + 1) * self.width];
            let Some(first) = row.iter().position(|&b| b) else {
                continue;
            };
            let last = row.iter().rposition(|&b| b).unwrap_or(first);
            rect = Some(match rect {
                None => PixelRect {
                    x0: first,
                    y0: y,
                    x1: last + 1,
                    y1: y + 1,
                },
                Some(r) => PixelRect {
                    x0: r.x0.min(first),
                    y0: r.y0,
                    x1: r.x1.max(last + 1),
                    y1: y + 1,
                },
            });
        }
        rect
    }

    pub fn content_fingerprint(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.width.hash(&mut hasher);
        self.height.hash(&mut hasher);
        self.bits.hash(&mut hasher);
        hasher.finish()
    }
}

/// One detected star: centroid (pixels) and integrated flux.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StarRecord {
    pub x: f64,
    pub y: f64,
    pub flux: f64,
}

/// One grid cell reduced to robust (reference, target) values per channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SamplePair {
    /// Cell center (pixels).
    pub x: f64,
    pub y: f64,
    pub reference: Vec<f64>,
    pub target: Vec<f64>,
    /// Pixels gathered per channel (in-mask, not rejected).
    pub pixel_count: Vec<usize>,
    pub valid: bool,
}

impl SamplePair {
    pub fn channels(&self) -> usize {
        self.reference.len()
    }
}

/// Whether a channel was fit with a free scale or with scale pinned to 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FitMode {
    Linear,
    OffsetOnly,
}

/// Per-channel photometric transform `reference ≈ scale·target + offset`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearFit {
    pub channel: usize,
    pub mode: FitMode,
    pub scale: f64,
    pub offset: f64,
    /// RMS of the residuals of the accepted samples.
    pub rms: f64,
    /// Indices (into the sample sequence) used by the final fit.
    pub accepted: Vec<usize>,
    /// Indices rejected by sigma clipping.
    pub rejected: Vec<usize>,
    pub iterations: usize,
}

impl LinearFit {
    pub fn is_valid(&self) -> bool {
        self.scale.is_finite() && self.scale > 0.0 && self.offset.is_finite() && !self.accepted.is_empty()
    }

    #[inline]
    pub fn apply(&self, target: f64) -> f64 {
        self.scale * target + self.offset
    }
}

/// Per-channel diagnostics attached to a mosaic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelDiagnostics {
    pub channel: usize,
    pub mode: FitMode,
    pub scale: f64,
    pub offset: f64,
    pub rms: f64,
    pub samples: usize,
    pub accepted: usize,
    pub rejected: usize,
    pub gradient_knots: usize,
    /// Peak-to-peak of the gradient correction over the tile.
    pub gradient_span: f64,
}

/// Final compositor output. Owned by the caller.
#[derive(Debug, Clone)]
pub struct MosaicResult {
    pub image: PixelImage,
    pub blend_mode: BlendMode,
    pub channels: Vec<ChannelDiagnostics>,
    /// Header values copied from the tiles for reporting only.
    pub tags: BTreeMap<String, String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounding_box_is_tight() {
        let mask = OverlapMask::from_fn(10, 8, |x, y| (3..7).contains(&x) && (2..5).contains(&y));
        let rect = mask.bounding_box().unwrap();
        assert_eq!(
            rect,
            PixelRect {
                x0: 3,
                y0: 2,
                x1: 7,
                y1: 5
            }
        );
        assert_eq!(rect.width(), 4);
        assert_eq!(rect.height(), 3);
        assert_eq!(mask.count(), 12);
    }

    #[test]
    fn empty_mask_has_no_bounding_box() {
        assert!(OverlapMask::empty(4, 4).bounding_box().is_none());
    }

    #[test]
    fn fingerprint_tracks_pixel_edits() {
        let mut img = PixelImage::filled(4, 4, 2, 1.0);
        let before = img.content_fingerprint();
        assert_eq!(before, img.clone().content_fingerprint());
        img.set(1, 1, 1, 2.0);
        assert_ne!(before, img.content_fingerprint());
    }

    #[test]
    fn coverage_mask_requires_both_tiles() {
        let mut reference = PixelImage::new(4, 1, 1);
        let mut target = PixelImage::new(4, 1, 1);
        for x in 0..3 {
            reference.set(x, 0, 0, 1.0);
        }
        for x in 2..4 {
            target.set(x, 0, 0, 1.0);
        }
        let mask = OverlapMask::from_coverage(&reference, &target).unwrap();
        assert!(!mask.contains(1, 0));
        assert!(mask.contains(2, 0));
        assert!(!mask.contains(3, 0));
    }

    #[test]
    fn from_planes_rejects_short_plane() {
        let err = PixelImage::from_planes(2, 2, vec![vec![0.0; 3]]).unwrap_err();
        assert!(matches!(err, MosaicError::DimensionMismatch { .. }));
    }

    #[test]
    fn blend_mode_cycles() {
        let mut mode = BlendMode::ReferencePriority;
        for _ in 0..BlendMode::ALL.len() {
            mode = mode.next();
        }
        assert_eq!(mode, BlendMode::ReferencePriority);
    }
}
