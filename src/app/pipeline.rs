//! Shared mosaic pipeline used by the CLI and TUI front-ends.
//!
//! sample grid -> per-channel robust fit -> per-channel gradient -> compositor
//!
//! `MosaicSession` wraps the first three stages in result caches so the TUI can
//! rerun the whole pipeline on every key press and only recompute what the
//! changed parameter affects.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use log::{debug, info, warn};

use crate::cache::{CacheStats, Fingerprint, ResultCache};
use crate::compose::{BlendOptions, ChannelCorrection, compose};
use crate::domain::{
    ChannelDiagnostics, LinearFit, MosaicConfig, MosaicResult, OverlapMask, PixelImage, SamplePair, StarRecord,
};
use crate::error::{MosaicError, Stage};
use crate::fit::{GradientSurface, LinearFitOptions, fit_channel, fit_gradient};
use crate::sampling::{GridOptions, RejectionRules, build_sample_grid};

/// Header keys copied into the result tags.
pub const TAGGED_HEADER_KEYS: [&str; 4] = ["EXPTIME", "FILTER", "GAIN", "OBJECT"];

/// Read-only access to a tile's header.
pub trait HeaderLookup {
    fn header_value(&self, key: &str) -> Option<String>;
}

impl HeaderLookup for HashMap<String, String> {
    fn header_value(&self, key: &str) -> Option<String> {
        self.get(key).cloned()
    }
}

impl HeaderLookup for BTreeMap<String, String> {
    fn header_value(&self, key: &str) -> Option<String> {
        self.get(key).cloned()
    }
}

/// Everything one pipeline run reads. Nothing here is mutated.
#[derive(Clone, Copy)]
pub struct MosaicInputs<'a> {
    pub reference: &'a PixelImage,
    pub target: &'a PixelImage,
    pub mask: &'a OverlapMask,
    pub stars: &'a [StarRecord],
    pub reference_header: Option<&'a dyn HeaderLookup>,
    pub target_header: Option<&'a dyn HeaderLookup>,
}

impl<'a> MosaicInputs<'a> {
    pub fn new(reference: &'a PixelImage, target: &'a PixelImage, mask: &'a OverlapMask) -> Self {
        Self {
            reference,
            target,
            mask,
            stars: &[],
            reference_header: None,
            target_header: None,
        }
    }

    pub fn with_stars(mut self, stars: &'a [StarRecord]) -> Self {
        self.stars = stars;
        self
    }

    pub fn with_headers(mut self, reference: &'a dyn HeaderLookup, target: &'a dyn HeaderLookup) -> Self {
        self.reference_header = Some(reference);
        self.target_header = Some(target);
        self
    }
}

/// Fitted corrections for every channel, plus the samples they came from.
#[derive(Debug, Clone)]
pub struct Solution {
    pub samples: Arc<Vec<SamplePair>>,
    pub corrections: Vec<ChannelCorrection>,
}

/// A composited mosaic together with the solution that produced it.
#[derive(Debug, Clone)]
pub struct MosaicRun {
    pub result: MosaicResult,
    pub solution: Solution,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub samples: CacheStats,
    pub fits: CacheStats,
    pub gradients: CacheStats,
}

impl SessionStats {
    pub fn hits(&self) -> u64 {
        self.samples.hits + self.fits.hits + self.gradients.hits
    }

    pub fn misses(&self) -> u64 {
        self.samples.misses + self.fits.misses + self.gradients.misses
    }
}

/// Cached pipeline for one interactive session.
pub struct MosaicSession {
    samples: ResultCache<Arc<Vec<SamplePair>>>,
    fits: ResultCache<LinearFit>,
    gradients: ResultCache<GradientSurface>,
}

impl MosaicSession {
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: ResultCache::new("samples", capacity),
            fits: ResultCache::new("fit", capacity),
            gradients: ResultCache::new("gradient", capacity),
        }
    }

    pub fn stats(&self) -> SessionStats {
        SessionStats {
            samples: self.samples.stats(),
            fits: self.fits.stats(),
            gradients: self.gradients.stats(),
        }
    }

    pub fn clear(&self) {
        self.samples.clear();
        self.fits.clear();
        self.gradients.clear();
    }

    fn samples_key(inputs: &MosaicInputs<'_>, grid: &GridOptions, rules: &RejectionRules) -> Fingerprint {
        Fingerprint::builder("samples")
            .with(inputs.reference.content_fingerprint())
            .with(inputs.target.content_fingerprint())
            .with(inputs.mask.content_fingerprint())
            .with(grid.cell_size)
            .with(grid.statistic)
            .with_f64(grid.clip_sigma)
            .with(grid.clip_iterations)
            .with(grid.min_pixels)
            .with(rules.fingerprint())
            .finish()
    }

    fn fit_key(samples: Fingerprint, channel: usize, opts: &LinearFitOptions) -> Fingerprint {
        Fingerprint::builder("fit")
            .with(samples)
            .with(channel)
            .with_f64(opts.rejection_sigma)
            .with(opts.max_iterations)
            .with(opts.min_samples)
            .with(opts.spread)
            .finish()
    }

    fn gradient_key(fit: Fingerprint, config: &MosaicConfig) -> Fingerprint {
        Fingerprint::builder("gradient").with(fit).with(config.gradient_axes).finish()
    }

    /// Sample grid for the inputs (cached).
    pub fn samples(
        &self,
        inputs: &MosaicInputs<'_>,
        config: &MosaicConfig,
    ) -> Result<(Fingerprint, Arc<Vec<SamplePair>>), MosaicError> {
        let grid = GridOptions::from(config);
        let rules = RejectionRules::new(config, inputs.stars);
        let key = Self::samples_key(inputs, &grid, &rules);
        let samples = self.samples.get_or_compute(key, || {
            build_sample_grid(inputs.reference, inputs.target, inputs.mask, &rules, &grid).map(Arc::new)
        })?;
        Ok((key, samples))
    }

    /// Fit and gradient for every channel, checking `cancel` between channels.
    pub fn solve(
        &self,
        inputs: &MosaicInputs<'_>,
        config: &MosaicConfig,
        cancel: Option<&AtomicBool>,
    ) -> Result<Solution, MosaicError> {
        config.validate()?;
        inputs.reference.check_same_dims(inputs.target, "target tile")?;

        let (samples_key, samples) = self.samples(inputs, config)?;
        if samples.is_empty() {
            return Err(MosaicError::InsufficientData {
                stage: Stage::Sampling,
                channel: 0,
                needed: config.min_fit_samples,
                found: 0,
            });
        }

        let fit_opts = LinearFitOptions::from(config);
        let channels = inputs.reference.channels();
        let mut corrections = Vec::with_capacity(channels);
        for channel in 0..channels {
            if cancel.is_some_and(|flag| flag.load(Ordering::Relaxed)) {
                warn!("cancelled after {channel} of {channels} channel(s)");
                return Err(MosaicError::Cancelled {
                    completed_channels: channel,
                });
            }

            let fit_key = Self::fit_key(samples_key, channel, &fit_opts);
            let fit = self
                .fits
                .get_or_compute(fit_key, || fit_channel(&samples, channel, &fit_opts))?;
            let gradient = self.gradients.get_or_compute(Self::gradient_key(fit_key, config), || {
                fit_gradient(&samples, &fit, config.gradient_axes, channel)
            })?;
            debug!(
                "channel {channel}: {:?} scale={:.6} offset={:.6} rms={:.3e} accepted={} rejected={}",
                fit.mode,
                fit.scale,
                fit.offset,
                fit.rms,
                fit.accepted.len(),
                fit.rejected.len()
            );
            corrections.push(ChannelCorrection { fit, gradient });
        }

        Ok(Solution { samples, corrections })
    }

    /// Solve and composite. The returned result is owned by the caller.
    pub fn run(
        &self,
        inputs: &MosaicInputs<'_>,
        config: &MosaicConfig,
        cancel: Option<&AtomicBool>,
    ) -> Result<MosaicRun, MosaicError> {
        let (w, h, c) = inputs.reference.dims();
        info!(
            "mosaic run: {w}x{h}x{c}, overlap {} px, cell {} px, blend {:?}, gradient {:?}",
            inputs.mask.count(),
            config.cell_size,
            config.blend_mode,
            config.gradient_axes
        );

        let solution = self.solve(inputs, config, cancel)?;
        let image = compose(
            inputs.reference,
            inputs.target,
            inputs.mask,
            &solution.corrections,
            &BlendOptions::from(config),
        )?;

        let channels = solution
            .corrections
            .iter()
            .map(|corr| diagnostics(corr, solution.samples.len(), w, h))
            .collect();
        let result = MosaicResult {
            image,
            blend_mode: config.blend_mode,
            channels,
            tags: header_tags(inputs),
        };

        let stats = self.stats();
        info!("mosaic done: cache hits {}, misses {}", stats.hits(), stats.misses());
        Ok(MosaicRun { result, solution })
    }
}

/// One-shot run without keeping caches around.
pub fn run_mosaic(inputs: &MosaicInputs<'_>, config: &MosaicConfig) -> Result<MosaicRun, MosaicError> {
    MosaicSession::new(1).run(inputs, config, None)
}

fn diagnostics(corr: &ChannelCorrection, samples: usize, width: usize, height: usize) -> ChannelDiagnostics {
    ChannelDiagnostics {
        channel: corr.fit.channel,
        mode: corr.fit.mode,
        scale: corr.fit.scale,
        offset: corr.fit.offset,
        rms: corr.fit.rms,
        samples,
        accepted: corr.fit.accepted.len(),
        rejected: corr.fit.rejected.len(),
        gradient_knots: corr.gradient.knot_count(),
        gradient_span: corr.gradient.span_over(width, height),
    }
}

fn header_tags(inputs: &MosaicInputs<'_>) -> BTreeMap<String, String> {
    let mut tags = BTreeMap::new();
    for (prefix, header) in [("reference", inputs.reference_header), ("target", inputs.target_header)] {
        let Some(header) = header else { continue };
        for key in TAGGED_HEADER_KEYS {
            if let Some(value) = header.header_value(key) {
                tags.insert(format!("{prefix}.{key}"), value);
            }
        }
    }
    tags
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{SceneSpec, generate_scene};
    use crate::domain::{BlendMode, FitMode, GradientAxes};

    #[test]
    fn constant_tiles_fall_back_to_offset_only() {
        let reference = PixelImage::filled(8, 8, 1, 100.0);
        let target = PixelImage::filled(8, 8, 1, 40.0);
        let mask = OverlapMask::full(8, 8);
        let config = MosaicConfig {
            cell_size: 8,
            gradient_axes: GradientAxes::None,
            blend_mode: BlendMode::WeightedAverage,
            ..MosaicConfig::default()
        };
        let run = run_mosaic(&MosaicInputs::new(&reference, &target, &mask), &config).unwrap();

        assert_eq!(run.solution.samples.len(), 1);
        let fit = &run.solution.corrections[0].fit;
        assert_eq!(fit.mode, FitMode::OffsetOnly);
        assert!((fit.offset - 60.0).abs() < 1e-9);
        assert!(run.result.image.plane(0).iter().all(|&v| (v - 100.0).abs() < 1e-4));
        assert_eq!(run.result.channels[0].mode, FitMode::OffsetOnly);
    }

    #[test]
    fn default_gradient_needs_five_positions() {
        let reference = PixelImage::filled(8, 8, 1, 100.0);
        let target = PixelImage::filled(8, 8, 1, 40.0);
        let mask = OverlapMask::full(8, 8);
        let config = MosaicConfig {
            cell_size: 8,
            ..MosaicConfig::default()
        };
        assert_eq!(config.gradient_axes, GradientAxes::X);

        let err = run_mosaic(&MosaicInputs::new(&reference, &target, &mask), &config).unwrap_err();
        assert_eq!(
            err,
            MosaicError::InsufficientData {
                stage: Stage::Gradient,
                channel: 0,
                needed: 5,
                found: 1
            }
        );
        assert_eq!(err.exit_code(), 3);
    }

    fn scene_spec() -> SceneSpec {
        SceneSpec {
            width: 192,
            height: 128,
            channels: 2,
            overlap: 96,
            sky_ramp: 0.3,
            star_count: 30,
            gradient_amplitude: 0.0,
            ..SceneSpec::default()
        }
    }

    #[test]
    fn recovers_scale_and_offset_of_synthetic_scene() {
        let scene = generate_scene(&scene_spec()).unwrap();
        let mask = OverlapMask::from_coverage(&scene.reference, &scene.target).unwrap();
        let config = MosaicConfig {
            cell_size: 16,
            gradient_axes: GradientAxes::None,
            ..MosaicConfig::default()
        };
        let inputs = MosaicInputs::new(&scene.reference, &scene.target, &mask).with_stars(&scene.stars);
        let solution = MosaicSession::new(4).solve(&inputs, &config, None).unwrap();

        for (c, corr) in solution.corrections.iter().enumerate() {
            let truth = scene.truth[c];
            assert_eq!(corr.fit.mode, FitMode::Linear);
            assert!(
                (corr.fit.scale / truth.scale - 1.0).abs() < 0.01,
                "channel {c}: scale {} vs {}",
                corr.fit.scale,
                truth.scale
            );
            assert!(
                (corr.fit.offset - truth.offset).abs() < 0.003,
                "channel {c}: offset {} vs {}",
                corr.fit.offset,
                truth.offset
            );
        }
    }

    #[test]
    fn gradient_flattens_the_seam() {
        let spec = SceneSpec {
            gradient_amplitude: 0.015,
            ..scene_spec()
        };
        let scene = generate_scene(&spec).unwrap();
        let mask = OverlapMask::from_coverage(&scene.reference, &scene.target).unwrap();
        let config = MosaicConfig {
            cell_size: 16,
            gradient_axes: GradientAxes::X,
            ..MosaicConfig::default()
        };
        let inputs = MosaicInputs::new(&scene.reference, &scene.target, &mask);
        let solution = MosaicSession::new(4).solve(&inputs, &config, None).unwrap();

        let (start, end) = scene.overlap_columns();
        let corr = &solution.corrections[0];
        for x in start..end {
            let mean_diff = (0..spec.height)
                .map(|y| {
                    let t = scene.target.get(x, y, 0) as f64;
                    let corrected = corr.fit.apply(t) + corr.gradient.eval(x as f64, y as f64);
                    corrected - scene.reference.get(x, y, 0) as f64
                })
                .sum::<f64>()
                / spec.height as f64;
            assert!(mean_diff.abs() < 0.002, "column {x}: {mean_diff}");
        }
    }

    #[test]
    fn second_run_is_served_from_cache() {
        let scene = generate_scene(&SceneSpec {
            width: 96,
            height: 64,
            overlap: 48,
            ..scene_spec()
        })
        .unwrap();
        let mask = OverlapMask::from_coverage(&scene.reference, &scene.target).unwrap();
        let mut config = MosaicConfig {
            cell_size: 8,
            gradient_axes: GradientAxes::None,
            ..MosaicConfig::default()
        };
        let inputs = MosaicInputs::new(&scene.reference, &scene.target, &mask);
        let session = MosaicSession::new(8);

        session.run(&inputs, &config, None).unwrap();
        let first = session.stats();
        assert_eq!((first.samples.misses, first.fits.misses), (1, 2));

        // Blend mode is not part of any cached stage.
        config.blend_mode = BlendMode::TargetPriority;
        session.run(&inputs, &config, None).unwrap();
        let second = session.stats();
        assert_eq!(second.misses(), first.misses());
        assert_eq!((second.samples.hits, second.fits.hits), (1, 2));

        // Rejection sigma invalidates the fits but not the samples.
        config.rejection_sigma = 2.5;
        session.run(&inputs, &config, None).unwrap();
        let third = session.stats();
        assert_eq!(third.samples.misses, 1);
        assert_eq!(third.fits.misses, 4);
    }

    #[test]
    fn cancellation_is_checked_between_channels() {
        let reference = PixelImage::filled(8, 8, 3, 1.0);
        let mask = OverlapMask::full(8, 8);
        let config = MosaicConfig {
            cell_size: 4,
            gradient_axes: GradientAxes::None,
            ..MosaicConfig::default()
        };
        let cancel = AtomicBool::new(true);
        let err = MosaicSession::new(2)
            .solve(&MosaicInputs::new(&reference, &reference, &mask), &config, Some(&cancel))
            .unwrap_err();
        assert_eq!(err, MosaicError::Cancelled { completed_channels: 0 });
    }

    #[test]
    fn invalid_config_fails_before_work() {
        let image = PixelImage::filled(4, 4, 1, 1.0);
        let mask = OverlapMask::full(4, 4);
        let config = MosaicConfig {
            rejection_sigma: -1.0,
            ..MosaicConfig::default()
        };
        let session = MosaicSession::new(2);
        let err = session
            .solve(&MosaicInputs::new(&image, &image, &mask), &config, None)
            .unwrap_err();
        assert!(matches!(
            err,
            MosaicError::InvalidConfiguration {
                option: "rejection_sigma",
                ..
            }
        ));
        assert_eq!(session.stats().misses(), 0);
    }

    #[test]
    fn header_values_become_tags() {
        let image = PixelImage::filled(8, 8, 1, 1.0);
        let mask = OverlapMask::full(8, 8);
        let mut reference_header = HashMap::new();
        reference_header.insert("EXPTIME".to_string(), "300".to_string());
        reference_header.insert("IGNORED".to_string(), "x".to_string());
        let target_header = BTreeMap::from([("FILTER".to_string(), "Ha".to_string())]);
        let inputs = MosaicInputs::new(&image, &image, &mask).with_headers(&reference_header, &target_header);

        let tags = header_tags(&inputs);
        assert_eq!(tags.len(), 2);
        assert_eq!(tags["reference.EXPTIME"], "300");
        assert_eq!(tags["target.FILTER"], "Ha");
    }
}
