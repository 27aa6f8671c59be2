//! Pixel rejection rules applied while gathering grid cells.
//!
//! A rejected pixel contributes to neither tile's statistic. Rules:
//!
//! - saturation: any channel of either tile at or above the level
//! - star proximity: inside a disc around a catalogued star, radius growing
//!   with log10(flux)
//! - non-finite values are always rejected by the grid builder itself

use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use crate::domain::{MosaicConfig, StarRecord};

/// Decides whether one pixel (both tiles, all channels) is excluded.
pub trait PixelRejection {
    fn is_rejected(&self, x: usize, y: usize, reference: &[f32], target: &[f32]) -> bool;
}

impl<F> PixelRejection for F
where
    F: Fn(usize, usize, &[f32], &[f32]) -> bool,
{
    fn is_rejected(&self, x: usize, y: usize, reference: &[f32], target: &[f32]) -> bool {
        self(x, y, reference, target)
    }
}

/// No pixel is rejected.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAll;

impl PixelRejection for AcceptAll {
    fn is_rejected(&self, _x: usize, _y: usize, _reference: &[f32], _target: &[f32]) -> bool {
        false
    }
}

#[derive(Debug, Clone, Copy)]
struct Zone {
    x: f64,
    y: f64,
    r2: f64,
}

/// Exclusion discs around stars, bucketed on a coarse grid so that a lookup
/// only visits stars near the queried pixel.
#[derive(Debug, Clone)]
pub struct StarExclusion {
    zones: Vec<Zone>,
    buckets: HashMap<(i64, i64), Vec<usize>>,
    bucket_size: f64,
}

impl StarExclusion {
    pub fn new(stars: &[StarRecord], radius_min: f64, radius_per_decade: f64) -> Self {
        let zones: Vec<Zone> = stars
            .iter()
            .filter(|s| s.x.is_finite() && s.y.is_finite() && s.flux.is_finite() && s.flux > 0.0)
            .map(|s| {
                let r = exclusion_radius(s.flux, radius_min, radius_per_decade);
                Zone {
                    x: s.x,
                    y: s.y,
                    r2: r * r,
                }
            })
            .filter(|z| z.r2 > 0.0)
            .collect();

        let bucket_size = zones
            .iter()
            .map(|z| z.r2.sqrt())
            .fold(1.0_f64, f64::max)
            .ceil()
            * 2.0;

        let mut buckets: HashMap<(i64, i64), Vec<usize>> = HashMap::new();
        for (idx, z) in zones.iter().enumerate() {
            let r = z.r2.sqrt();
            let bx0 = ((z.x - r) / bucket_size).floor() as i64;
            let bx1 = ((z.x + r) / bucket_size).floor() as i64;
            let by0 = ((z.y - r) / bucket_size).floor() as i64;
            let by1 = ((z.y + r) / bucket_size).floor() as i64;
            for by in by0..=by1 {
                for bx in bx0..=bx1 {
                    buckets.entry((bx, by)).or_default().push(idx);
                }
            }
        }

        Self {
            zones,
            buckets,
            bucket_size,
        }
    }

    pub fn len(&self) -> usize {
        self.zones.len()
    }

    pub fn is_empty(&self) -> bool {
        self.zones.is_empty()
    }

    pub fn contains(&self, x: f64, y: f64) -> bool {
        let key = (
            (x / self.bucket_size).floor() as i64,
            (y / self.bucket_size).floor() as i64,
        );
        let Some(candidates) = self.buckets.get(&key) else {
            return false;
        };
        candidates.iter().any(|&i| {
            let z = &self.zones[i];
            let dx = x - z.x;
            let dy = y - z.y;
            dx * dx + dy * dy <= z.r2
        })
    }
}

/// Exclusion radius (pixels) for a star of the given flux.
pub fn exclusion_radius(flux: f64, radius_min: f64, radius_per_decade: f64) -> f64 {
    radius_min + radius_per_decade * flux.max(1.0).log10()
}

/// The rule set used by the pipeline.
#[derive(Debug, Clone, Default)]
pub struct RejectionRules {
    pub saturation: Option<f32>,
    pub stars: Option<StarExclusion>,
    fingerprint: u64,
}

impl RejectionRules {
    pub fn new(config: &MosaicConfig, stars: &[StarRecord]) -> Self {
        let mut hasher = DefaultHasher::new();
        config.saturation_level.map(f32::to_bits).hash(&mut hasher);
        config.star_radius_min.to_bits().hash(&mut hasher);
        config.star_radius_per_decade.to_bits().hash(&mut hasher);
        for s in stars {
            s.x.to_bits().hash(&mut hasher);
            s.y.to_bits().hash(&mut hasher);
            s.flux.to_bits().hash(&mut hasher);
        }

        let stars = (!stars.is_empty())
            .then(|| StarExclusion::new(stars, config.star_radius_min, config.star_radius_per_decade))
            .filter(|s| !s.is_empty());

        Self {
            saturation: config.saturation_level,
            stars,
            fingerprint: hasher.finish(),
        }
    }

    /// Hash of every input that changes which pixels are rejected.
    pub fn fingerprint(&self) -> u64 {
        self.fingerprint
    }
}

impl PixelRejection for RejectionRules {
    fn is_rejected(&self, x: usize, y: usize, reference: &[f32], target: &[f32]) -> bool {
        if let Some(level) = self.saturation {
            if reference.iter().chain(target.iter()).any(|&v| v >= level) {
                return true;
            }
        }
        match &self.stars {
            Some(stars) => stars.contains(x as f64, y as f64),
            None => false,
        }
    }
}
