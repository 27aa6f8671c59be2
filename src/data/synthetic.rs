//! Synthetic, pixel-aligned tile pairs with a known photometric relation.
//!
//! Both tiles observe one sky (background ramp + Gaussian stars) on a shared
//! canvas. The reference covers the left columns, the target the right ones,
//! and the overlap is the band in between. Per channel the target is built so
//! that
//!
//! ```text
//! reference ≈ scale·target + offset + g(x)
//! ```
//!
//! with `g` a parabola across the canvas (the residual gradient).

use std::collections::BTreeMap;

use rand::prelude::*;
use rand::rngs::StdRng;
use rand_distr::{LogNormal, Normal};

use crate::domain::{PixelImage, StarRecord};
use crate::error::MosaicError;

/// PSF width (σ, pixels) of the rendered stars.
const STAR_SIGMA: f64 = 1.4;

/// Rendered values never go below this, so covered pixels always carry data.
const FLOOR: f64 = 1e-6;

#[derive(Debug, Clone, PartialEq)]
pub struct SceneSpec {
    pub width: usize,
    pub height: usize,
    pub channels: usize,
    /// Overlap width in columns.
    pub overlap: usize,
    pub sky_level: f64,
    /// Sky change across the canvas width.
    pub sky_ramp: f64,
    pub star_count: usize,
    pub noise_sigma: f64,
    /// Photometric scale of channel 0; later channels drift by 5% each.
    pub scale: f64,
    /// Offset of channel 0; later channels add 0.01 each.
    pub offset: f64,
    /// Peak of the residual gradient parabola.
    pub gradient_amplitude: f64,
    pub seed: u64,
}

impl Default for SceneSpec {
    fn default() -> Self {
        Self {
            width: 256,
            height: 160,
            channels: 3,
            overlap: 96,
            sky_level: 0.12,
            sky_ramp: 0.04,
            star_count: 60,
            noise_sigma: 0.002,
            scale: 1.25,
            offset: 0.02,
            gradient_amplitude: 0.015,
            seed: 42,
        }
    }
}

/// True correction applied to one channel of the target.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChannelTruth {
    pub scale: f64,
    pub offset: f64,
}

#[derive(Debug, Clone)]
pub struct SyntheticScene {
    pub reference: PixelImage,
    pub target: PixelImage,
    pub stars: Vec<StarRecord>,
    pub truth: Vec<ChannelTruth>,
    pub spec: SceneSpec,
    pub reference_header: BTreeMap<String, String>,
    pub target_header: BTreeMap<String, String>,
}

impl SyntheticScene {
    /// Columns `[start, end)` covered by both tiles.
    pub fn overlap_columns(&self) -> (usize, usize) {
        overlap_columns(&self.spec)
    }

    /// The residual gradient `g(x)` baked into the target.
    pub fn gradient_at(&self, x: f64) -> f64 {
        residual_gradient(&self.spec, x)
    }
}

fn overlap_columns(spec: &SceneSpec) -> (usize, usize) {
    let start = (spec.width - spec.overlap) / 2;
    (start, start + spec.overlap)
}

fn residual_gradient(spec: &SceneSpec, x: f64) -> f64 {
    let u = 2.0 * x / spec.width as f64 - 1.0;
    spec.gradient_amplitude * u * u
}

fn validate(spec: &SceneSpec) -> Result<(), MosaicError> {
    if spec.width == 0 || spec.height == 0 {
        return Err(MosaicError::config("scene size", "width and height must be > 0"));
    }
    if spec.channels == 0 {
        return Err(MosaicError::config("scene channels", "must be > 0"));
    }
    if spec.overlap == 0 || spec.overlap > spec.width {
        return Err(MosaicError::config("scene overlap", "must be within 1..=width"));
    }
    if !(spec.scale.is_finite() && spec.scale > 0.0) {
        return Err(MosaicError::config("scene scale", "must be finite and > 0"));
    }
    if !(spec.noise_sigma.is_finite() && spec.noise_sigma >= 0.0) {
        return Err(MosaicError::config("scene noise", "must be finite and >= 0"));
    }
    Ok(())
}

/// Render a tile pair for `spec`. Same spec, same pixels.
pub fn generate_scene(spec: &SceneSpec) -> Result<SyntheticScene, MosaicError> {
    validate(spec)?;
    let (w, h) = (spec.width, spec.height);
    let mut rng = StdRng::seed_from_u64(spec.seed);
    let noise = Normal::new(0.0, spec.noise_sigma.max(f64::MIN_POSITIVE))
        .map_err(|e| MosaicError::config("scene noise", e.to_string()))?;
    let flux_dist = LogNormal::new(3.0, 1.0).map_err(|e| MosaicError::config("scene stars", e.to_string()))?;

    let stars: Vec<StarRecord> = (0..spec.star_count)
        .map(|_| StarRecord {
            x: rng.gen_range(0.0..w as f64),
            y: rng.gen_range(0.0..h as f64),
            flux: flux_dist.sample(&mut rng),
        })
        .collect();

    // Noise-free sky, shared by every channel up to a color factor.
    let mut sky = vec![0.0f64; w * h];
    for y in 0..h {
        for x in 0..w {
            sky[y * w + x] = spec.sky_level + spec.sky_ramp * x as f64 / w as f64;
        }
    }
    let norm = 1.0 / (2.0 * std::f64::consts::PI * STAR_SIGMA * STAR_SIGMA);
    let reach = (4.0 * STAR_SIGMA).ceil() as isize;
    for s in &stars {
        let (cx, cy) = (s.x.floor() as isize, s.y.floor() as isize);
        // Flux is in units of 1e-3 of full scale.
        let amp = s.flux * 1e-3 * norm;
        for y in (cy - reach).max(0)..=(cy + reach).min(h as isize - 1) {
            for x in (cx - reach).max(0)..=(cx + reach).min(w as isize - 1) {
                let dx = x as f64 + 0.5 - s.x;
                let dy = y as f64 + 0.5 - s.y;
                let r2 = (dx * dx + dy * dy) / (STAR_SIGMA * STAR_SIGMA);
                sky[y as usize * w + x as usize] += amp * (-0.5 * r2).exp();
            }
        }
    }

    let (ov_start, ov_end) = overlap_columns(spec);
    let mut reference = PixelImage::new(w, h, spec.channels);
    let mut target = PixelImage::new(w, h, spec.channels);
    let mut truth = Vec::with_capacity(spec.channels);

    for c in 0..spec.channels {
        let color = 1.0 - 0.1 * c as f64;
        let t = ChannelTruth {
            scale: spec.scale * (1.0 + 0.05 * c as f64),
            offset: spec.offset + 0.01 * c as f64,
        };
        truth.push(t);

        let ref_plane = reference.plane_mut(c);
        for y in 0..h {
            for x in 0..ov_end {
                let v = color * sky[y * w + x] + noise.sample(&mut rng);
                ref_plane[y * w + x] = v.max(FLOOR) as f32;
            }
        }

        let tgt_plane = target.plane_mut(c);
        for y in 0..h {
            for x in ov_start..w {
                let truth_value = color * sky[y * w + x];
                let observed = (truth_value - t.offset - residual_gradient(spec, x as f64)) / t.scale;
                let v = observed + noise.sample(&mut rng) / t.scale;
                tgt_plane[y * w + x] = v.max(FLOOR) as f32;
            }
        }
    }

    let header = |exptime: &str, gain: &str| -> BTreeMap<String, String> {
        BTreeMap::from([
            ("EXPTIME".to_string(), exptime.to_string()),
            ("FILTER".to_string(), "L".to_string()),
            ("GAIN".to_string(), gain.to_string()),
            ("OBJECT".to_string(), "synthetic field".to_string()),
        ])
    };

    Ok(SyntheticScene {
        reference,
        target,
        stars,
        truth,
        spec: spec.clone(),
        reference_header: header("300", "100"),
        target_header: header(&format!("{:.0}", 300.0 / spec.scale), "100"),
    })
}
