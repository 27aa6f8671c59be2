//! Top-level application orchestration.
//!
//! `src/main.rs` is intentionally tiny; this module is the "real main" that:
//! - parses CLI arguments and starts logging
//! - layers the configuration (defaults, `SEAM_*` env, flags)
//! - generates a synthetic tile pair and runs the mosaic pipeline
//! - prints reports/plots
//! - writes optional exports

use clap::Parser;
use log::info;

use crate::cli::{Command, DemoArgs, PlotArgs, TuningArgs};
use crate::data::generate_scene;
use crate::domain::{MosaicConfig, OverlapMask};
use crate::error::AppError;
use crate::logging::{LogTarget, level_spec, setup_logging};

pub mod pipeline;

use pipeline::{MosaicInputs, MosaicSession};

/// Samples listed in the "largest residuals" table.
const WORST_SAMPLES: usize = 10;

/// Entry point for the `seam` binary.
pub fn run() -> Result<(), AppError> {
    // `seam` and `seam --cell-size 24` behave like `seam tui ...`.
    let argv = rewrite_args(std::env::args().collect());
    let cli = crate::cli::Cli::parse_from(argv);

    let target = match cli.command {
        Command::Tui(_) => LogTarget::Tui,
        _ => LogTarget::Cli,
    };
    let _logger = setup_logging(&level_spec(cli.log_level.as_deref()), target)?;

    match cli.command {
        Command::Demo(args) => handle_demo(args),
        Command::Plot(args) => handle_plot(args),
        Command::Tui(args) => handle_tui(args),
    }
}

/// Defaults, then `SEAM_*` variables, then flags; validated.
pub fn build_config(tuning: &TuningArgs) -> Result<MosaicConfig, AppError> {
    let mut config = MosaicConfig::from_env()?;
    tuning.apply(&mut config);
    config.validate()?;
    Ok(config)
}

fn handle_demo(args: DemoArgs) -> Result<(), AppError> {
    let config = build_config(&args.tuning)?;
    let spec = args.scene.to_spec();
    let scene = generate_scene(&spec)?;
    let mask = OverlapMask::from_coverage(&scene.reference, &scene.target)?;
    info!("demo scene: seed {} | overlap mask {} px", spec.seed, mask.count());

    let inputs = MosaicInputs::new(&scene.reference, &scene.target, &mask)
        .with_stars(&scene.stars)
        .with_headers(&scene.reference_header, &scene.target_header);
    let session = MosaicSession::new(config.cache_capacity);
    let run = session.run(&inputs, &config, None)?;

    println!("{}", crate::report::format_run_summary(&run, &config));
    println!("{}", crate::report::format_truth_comparison(&run.result.channels, &scene.truth));

    let channel = args.plot_channel;
    let Some(correction) = run.solution.corrections.get(channel) else {
        return Err(AppError::new(
            2,
            format!("--plot-channel {channel} out of range ({} channels)", run.solution.corrections.len()),
        ));
    };
    let residuals = crate::report::compute_residuals(&run.solution.samples, correction, channel)?;
    println!(
        "{}",
        crate::report::format_worst_samples(&crate::report::worst_residuals(&residuals, WORST_SAMPLES))
    );

    if args.plot && !args.no_plot {
        let (w, h, _) = run.result.image.dims();
        let mut any = false;
        for curve in correction.gradient.curves() {
            let extent = match curve.axis {
                crate::domain::Axis::X => w,
                crate::domain::Axis::Y => h,
            };
            let points = crate::plot::curve_points(&residuals, &correction.gradient, curve.axis);
            let plot = crate::plot::render_ascii_plot(
                &points,
                curve,
                0.0,
                (extent.max(2) - 1) as f64,
                args.width,
                args.height,
            );
            println!("{plot}");
            any = true;
        }
        if !any {
            println!("Channel {channel}: no gradient curve to plot.");
        }
    }

    if args.expression {
        println!("Pixel math:");
        for (ch, expr) in crate::report::pixel_math_expressions(&run.solution.corrections)
            .iter()
            .enumerate()
        {
            println!("  ch{ch}: {expr}");
        }
    }

    // Optional exports.
    if let Some(path) = &args.export_samples {
        crate::io::write_samples_csv(path, &run.solution.samples, &run.solution.corrections)?;
        info!("wrote samples CSV {}", path.display());
    }
    if let Some(path) = &args.export_params {
        let (w, h, _) = run.result.image.dims();
        let params = crate::io::ParamsFile::new(&config, w, h, &run.solution.corrections);
        crate::io::write_params_json(path, &params)?;
        info!("wrote params JSON {}", path.display());
    }
    if args.debug {
        let path = crate::debug::write_debug_bundle(&run, &config, Some(&spec))?;
        println!("Wrote debug bundle: {}", path.display());
    }

    Ok(())
}

fn handle_tui(args: DemoArgs) -> Result<(), AppError> {
    let config = build_config(&args.tuning)?;
    crate::tui::run(args.scene.to_spec(), config, args.plot_channel)
}

fn handle_plot(args: PlotArgs) -> Result<(), AppError> {
    let params = crate::io::read_params_json(&args.params)?;
    let plot = crate::plot::render_ascii_plot_from_params(&params, args.channel, args.width, args.height);
    println!("{plot}");
    if let Some(ch) = params.channels.get(args.channel) {
        println!("Pixel math: {}", ch.expression);
    }
    Ok(())
}

/// Rewrite argv so `seam` defaults to `seam tui`.
///
/// Rules:
/// - `seam`                      -> `seam tui`
/// - `seam --cell-size 24 ...`   -> `seam tui --cell-size 24 ...`
/// - `seam --help/--version/-h`  -> unchanged (show top-level help/version)
fn rewrite_args(mut argv: Vec<String>) -> Vec<String> {
    let Some(arg1) = argv.get(1).cloned() else {
        argv.push("tui".to_string());
        return argv;
    };

    let is_top_level_help_or_version = matches!(arg1.as_str(), "-h" | "--help" | "-V" | "--version" | "help");
    if is_top_level_help_or_version {
        return argv;
    }

    let is_subcommand = matches!(arg1.as_str(), "demo" | "plot" | "tui");
    if is_subcommand {
        return argv;
    }

    // If the first token is a flag, treat it as "tui flags".
    if arg1.starts_with('-') {
        argv.insert(1, "tui".to_string());
        return argv;
    }

    argv
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(args: &[&str]) -> Vec<String> {
        args.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn bare_invocation_opens_tui() {
        assert_eq!(rewrite_args(argv(&["seam"])), argv(&["seam", "tui"]));
    }

    #[test]
    fn leading_flags_go_to_tui() {
        assert_eq!(
            rewrite_args(argv(&["seam", "--cell-size", "24"])),
            argv(&["seam", "tui", "--cell-size", "24"])
        );
    }

    #[test]
    fn subcommands_and_help_are_untouched() {
        for args in [&["seam", "demo", "--no-plot"][..], &["seam", "--help"], &["seam", "plot", "--params", "p.json"]] {
            assert_eq!(rewrite_args(argv(args)), argv(args));
        }
    }

    #[test]
    fn flags_override_defaults() {
        let tuning = TuningArgs {
            cell_size: Some(24),
            ..TuningArgs::default()
        };
        let config = build_config(&tuning).unwrap();
        assert_eq!(config.cell_size, 24);
    }

    #[test]
    fn invalid_flag_value_is_rejected() {
        let tuning = TuningArgs {
            rejection_sigma: Some(-1.0),
            ..TuningArgs::default()
        };
        let err = build_config(&tuning).unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }
}
