//! Command-line parsing for the `seam` tile-stitching tool.
//!
//! The goal of this module is to keep **argument parsing** separate from the
//! pipeline code. Tuning flags are all optional: an unset flag leaves the
//! value from the defaults / `SEAM_*` environment layer untouched.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::data::SceneSpec;
use crate::domain::{BlendMode, CellStatistic, GradientAxes, MosaicConfig, SpreadEstimator};

/// Top-level CLI.
#[derive(Debug, Parser)]
#[command(name = "seam", version, about = "Seamless two-tile mosaic stitching")]
pub struct Cli {
    /// Log level spec (e.g. `debug`, `tile_seam=trace`); defaults to RUST_LOG or `info`.
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Stitch a synthetic tile pair, print diagnostics, and optionally plot/export.
    Demo(DemoArgs),
    /// Plot the gradient curves of a saved parameter JSON.
    Plot(PlotArgs),
    /// Launch the interactive tuning TUI.
    ///
    /// Every parameter change reruns the same pipeline as `seam demo`, served
    /// from the session caches where possible.
    Tui(DemoArgs),
}

/// Synthetic scene options.
#[derive(Debug, Args, Clone)]
pub struct SceneArgs {
    /// Canvas width (pixels).
    #[arg(long, default_value_t = 256)]
    pub scene_width: usize,

    /// Canvas height (pixels).
    #[arg(long, default_value_t = 160)]
    pub scene_height: usize,

    /// Channels per tile.
    #[arg(long, default_value_t = 3)]
    pub channels: usize,

    /// Overlap band width (columns).
    #[arg(long, default_value_t = 96)]
    pub overlap: usize,

    /// Number of stars rendered into the scene.
    #[arg(long, default_value_t = 60)]
    pub stars: usize,

    /// Per-pixel Gaussian noise σ.
    #[arg(long, default_value_t = 0.002)]
    pub noise: f64,

    /// True photometric scale of channel 0.
    #[arg(long, default_value_t = 1.25)]
    pub true_scale: f64,

    /// True offset of channel 0.
    #[arg(long, default_value_t = 0.02)]
    pub true_offset: f64,

    /// Peak of the residual gradient baked into the target.
    #[arg(long, default_value_t = 0.015)]
    pub true_gradient: f64,

    /// Random seed for scene generation.
    #[arg(long, default_value_t = 42)]
    pub seed: u64,
}

impl SceneArgs {
    pub fn to_spec(&self) -> SceneSpec {
        SceneSpec {
            width: self.scene_width,
            height: self.scene_height,
            channels: self.channels,
            overlap: self.overlap,
            star_count: self.stars,
            noise_sigma: self.noise,
            scale: self.true_scale,
            offset: self.true_offset,
            gradient_amplitude: self.true_gradient,
            seed: self.seed,
            ..SceneSpec::default()
        }
    }
}

/// Pipeline tuning flags (override defaults and `SEAM_*` variables).
#[derive(Debug, Args, Clone, Default)]
pub struct TuningArgs {
    /// Grid cell edge (pixels).
    #[arg(long)]
    pub cell_size: Option<usize>,

    /// Per-cell statistic.
    #[arg(long, value_enum)]
    pub cell_statistic: Option<CellStatistic>,

    /// Minimum gathered pixels for a cell to be kept.
    #[arg(long)]
    pub min_pixels: Option<usize>,

    /// Residual rejection threshold (σ multiples).
    #[arg(long)]
    pub rejection_sigma: Option<f64>,

    /// Maximum rejection iterations.
    #[arg(long)]
    pub max_iterations: Option<usize>,

    /// Minimum samples for a valid linear fit.
    #[arg(long)]
    pub min_fit_samples: Option<usize>,

    /// Spread estimator for residual rejection.
    #[arg(long, value_enum)]
    pub spread: Option<SpreadEstimator>,

    /// Gradient axes (none, x, y, xy). Defaults to x; each modeled axis needs
    /// samples at 5 or more distinct positions, so use `none` for tiny overlaps.
    #[arg(long, value_enum)]
    pub gradient: Option<GradientAxes>,

    /// Blend mode inside the overlap.
    #[arg(long, value_enum)]
    pub blend: Option<BlendMode>,

    /// Probability of taking the target pixel when dithering.
    #[arg(long)]
    pub dither_probability: Option<f64>,

    /// Seed for the dither pattern.
    #[arg(long)]
    pub dither_seed: Option<u64>,

    /// Reject pixels at or above this level in any channel of either tile.
    #[arg(long)]
    pub saturation: Option<f32>,

    /// Entries kept per result cache.
    #[arg(long)]
    pub cache_capacity: Option<usize>,
}

impl TuningArgs {
    /// Apply every flag that was given.
    pub fn apply(&self, config: &mut MosaicConfig) {
        if let Some(v) = self.cell_size {
            config.cell_size = v;
        }
        if let Some(v) = self.cell_statistic {
            config.cell_statistic = v;
        }
        if let Some(v) = self.min_pixels {
            config.min_pixels_per_cell = v;
        }
        if let Some(v) = self.rejection_sigma {
            config.rejection_sigma = v;
        }
        if let Some(v) = self.max_iterations {
            config.max_rejection_iterations = v;
        }
        if let Some(v) = self.min_fit_samples {
            config.min_fit_samples = v;
        }
        if let Some(v) = self.spread {
            config.spread_estimator = v;
        }
        if let Some(v) = self.gradient {
            config.gradient_axes = v;
        }
        if let Some(v) = self.blend {
            config.blend_mode = v;
        }
        if let Some(v) = self.dither_probability {
            config.dither_probability = v;
        }
        if let Some(v) = self.dither_seed {
            config.dither_seed = v;
        }
        if let Some(v) = self.saturation {
            config.saturation_level = Some(v);
        }
        if let Some(v) = self.cache_capacity {
            config.cache_capacity = v;
        }
    }
}

/// Options for `seam demo` and `seam tui`.
#[derive(Debug, Args, Clone)]
pub struct DemoArgs {
    #[command(flatten)]
    pub scene: SceneArgs,

    #[command(flatten)]
    pub tuning: TuningArgs,

    /// Render an ASCII plot in the terminal (enabled by default).
    #[arg(long, default_value_t = true)]
    pub plot: bool,

    /// Disable the terminal plot.
    #[arg(long)]
    pub no_plot: bool,

    /// Plot width (columns).
    #[arg(long, default_value_t = 100)]
    pub width: usize,

    /// Plot height (rows).
    #[arg(long, default_value_t = 25)]
    pub height: usize,

    /// Channel shown in plots.
    #[arg(long, default_value_t = 0)]
    pub plot_channel: usize,

    /// Print the pixel-math expression of every channel.
    #[arg(long)]
    pub expression: bool,

    /// Export the sample grid to CSV.
    #[arg(long)]
    pub export_samples: Option<PathBuf>,

    /// Export correction parameters (fits, knots, config) to JSON.
    #[arg(long = "export-params")]
    pub export_params: Option<PathBuf>,

    /// Write a markdown debug bundle under `debug/`.
    #[arg(long)]
    pub debug: bool,
}

/// Options for plotting a saved parameter file.
#[derive(Debug, Parser)]
pub struct PlotArgs {
    /// Parameter JSON produced by `seam demo --export-params`.
    #[arg(long, value_name = "JSON")]
    pub params: PathBuf,

    /// Channel to plot.
    #[arg(long, default_value_t = 0)]
    pub channel: usize,

    /// Plot width (columns).
    #[arg(long, default_value_t = 100)]
    pub width: usize,

    /// Plot height (rows).
    #[arg(long, default_value_t = 25)]
    pub height: usize,
}
