//! Run configuration.
//!
//! Layering is: built-in defaults → `SEAM_*` environment variables (a `.env`
//! file is honoured) → command-line flags. Every pipeline entry point calls
//! `MosaicConfig::validate()` before touching pixel data.

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::domain::{BlendMode, CellStatistic, GradientAxes, SpreadEstimator};
use crate::error::MosaicError;

/// Smallest sample count the linear fit accepts as a configuration value.
pub const MIN_FIT_SAMPLES_FLOOR: usize = 3;

/// Options recognized by the mosaic pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MosaicConfig {
    /// Grid cell edge length in pixels.
    pub cell_size: usize,
    pub cell_statistic: CellStatistic,
    /// Clip threshold (σ multiples) for `CellStatistic::SigmaClippedMean`.
    pub cell_clip_sigma: f64,
    pub cell_clip_iterations: usize,
    /// Cells with fewer gathered pixels are omitted.
    pub min_pixels_per_cell: usize,

    /// Residual rejection threshold (σ multiples) for the linear fit.
    pub rejection_sigma: f64,
    pub max_rejection_iterations: usize,
    pub min_fit_samples: usize,
    pub spread_estimator: SpreadEstimator,

    pub gradient_axes: GradientAxes,

    pub blend_mode: BlendMode,
    /// Probability of taking the target pixel under `BlendMode::RandomDither`.
    pub dither_probability: f64,
    pub dither_seed: u64,

    /// Entries kept per result cache.
    pub cache_capacity: usize,

    /// Pixels at or above this level (any channel, either tile) are rejected.
    pub saturation_level: Option<f32>,
    /// Star exclusion radius floor (pixels).
    pub star_radius_min: f64,
    /// Extra exclusion radius per decade of star flux.
    pub star_radius_per_decade: f64,
}

impl Default for MosaicConfig {
    fn default() -> Self {
        Self {
            cell_size: 32,
            cell_statistic: CellStatistic::Median,
            cell_clip_sigma: 3.0,
            cell_clip_iterations: 5,
            min_pixels_per_cell: 16,
            rejection_sigma: 3.0,
            max_rejection_iterations: 10,
            min_fit_samples: MIN_FIT_SAMPLES_FLOOR,
            spread_estimator: SpreadEstimator::Mad,
            gradient_axes: GradientAxes::X,
            blend_mode: BlendMode::WeightedAverage,
            dither_probability: 0.5,
            dither_seed: 0,
            cache_capacity: 16,
            saturation_level: None,
            star_radius_min: 3.0,
            star_radius_per_decade: 2.0,
        }
    }
}

impl MosaicConfig {
    /// Defaults overlaid with `SEAM_*` environment variables.
    pub fn from_env() -> Result<Self, MosaicError> {
        dotenvy::dotenv().ok();
        let mut config = Self::default();
        config.overlay(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Overlay values found by `lookup` (keyed by `SEAM_*` names).
    pub fn overlay(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<(), MosaicError> {
        if let Some(v) = parse_env(&lookup, "SEAM_CELL_SIZE", "cell_size")? {
            self.cell_size = v;
        }
        if let Some(v) = parse_env(&lookup, "SEAM_MIN_PIXELS_PER_CELL", "min_pixels_per_cell")? {
            self.min_pixels_per_cell = v;
        }
        if let Some(v) = parse_env(&lookup, "SEAM_REJECTION_SIGMA", "rejection_sigma")? {
            self.rejection_sigma = v;
        }
        if let Some(v) = parse_env(&lookup, "SEAM_MAX_REJECTION_ITERATIONS", "max_rejection_iterations")? {
            self.max_rejection_iterations = v;
        }
        if let Some(v) = parse_env(&lookup, "SEAM_MIN_FIT_SAMPLES", "min_fit_samples")? {
            self.min_fit_samples = v;
        }
        if let Some(v) = parse_env(&lookup, "SEAM_CACHE_CAPACITY", "cache_capacity")? {
            self.cache_capacity = v;
        }
        if let Some(v) = parse_env(&lookup, "SEAM_DITHER_PROBABILITY", "dither_probability")? {
            self.dither_probability = v;
        }
        if let Some(v) = parse_env(&lookup, "SEAM_DITHER_SEED", "dither_seed")? {
            self.dither_seed = v;
        }
        if let Some(v) = parse_env::<f32>(&lookup, "SEAM_SATURATION", "saturation_level")? {
            self.saturation_level = Some(v);
        }
        if let Some(v) = parse_env_enum(&lookup, "SEAM_BLEND_MODE", "blend_mode")? {
            self.blend_mode = v;
        }
        if let Some(v) = parse_env_enum(&lookup, "SEAM_GRADIENT_AXES", "gradient_axes")? {
            self.gradient_axes = v;
        }
        if let Some(v) = parse_env_enum(&lookup, "SEAM_CELL_STATISTIC", "cell_statistic")? {
            self.cell_statistic = v;
        }
        if let Some(v) = parse_env_enum(&lookup, "SEAM_SPREAD_ESTIMATOR", "spread_estimator")? {
            self.spread_estimator = v;
        }
        Ok(())
    }

    /// Check every option against its documented range.
    pub fn validate(&self) -> Result<(), MosaicError> {
        if self.cell_size == 0 {
            return Err(MosaicError::config("cell_size", "must be > 0"));
        }
        if !(self.cell_clip_sigma.is_finite() && self.cell_clip_sigma > 0.0) {
            return Err(MosaicError::config("cell_clip_sigma", "must be a finite value > 0"));
        }
        if self.min_pixels_per_cell == 0 {
            return Err(MosaicError::config("min_pixels_per_cell", "must be >= 1"));
        }
        if !(self.rejection_sigma.is_finite() && self.rejection_sigma > 0.0) {
            return Err(MosaicError::config("rejection_sigma", "must be a finite value > 0"));
        }
        if self.min_fit_samples < MIN_FIT_SAMPLES_FLOOR {
            return Err(MosaicError::config(
                "min_fit_samples",
                format!("must be >= {MIN_FIT_SAMPLES_FLOOR}"),
            ));
        }
        if !(0.0..=1.0).contains(&self.dither_probability) {
            return Err(MosaicError::config("dither_probability", "must be within [0, 1]"));
        }
        if self.cache_capacity == 0 {
            return Err(MosaicError::config("cache_capacity", "must be >= 1"));
        }
        if let Some(level) = self.saturation_level {
            if !(level.is_finite() && level > 0.0) {
                return Err(MosaicError::config("saturation_level", "must be a finite value > 0"));
            }
        }
        if !(self.star_radius_min.is_finite() && self.star_radius_min >= 0.0) {
            return Err(MosaicError::config("star_radius_min", "must be a finite value >= 0"));
        }
        if !(self.star_radius_per_decade.is_finite() && self.star_radius_per_decade >= 0.0) {
            return Err(MosaicError::config("star_radius_per_decade", "must be a finite value >= 0"));
        }
        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    option: &'static str,
) -> Result<Option<T>, MosaicError> {
    let Some(raw) = lookup(key) else {
        return Ok(None);
    };
    raw.trim()
        .parse::<T>()
        .map(Some)
        .map_err(|_| MosaicError::config(option, format!("cannot parse {key}='{raw}'")))
}

fn parse_env_enum<T: ValueEnum>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    option: &'static str,
) -> Result<Option<T>, MosaicError> {
    let Some(raw) = lookup(key) else {
        return Ok(None);
    };
    T::from_str(raw.trim(), true)
        .map(Some)
        .map_err(|e| MosaicError::config(option, format!("cannot parse {key}='{raw}': {e}")))
}
