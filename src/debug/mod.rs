//! Debug bundle writer for inspecting samples, fits, and gradient knots.

use std::fs::{File, create_dir_all};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Local;

use crate::app::pipeline::MosaicRun;
use crate::data::SceneSpec;
use crate::domain::MosaicConfig;
use crate::error::AppError;
use crate::report::{compute_residuals, format_channel_table};

pub const DEBUG_DIRECTORY: &str = "debug";

/// Write a markdown bundle under `debug/` and return its path.
pub fn write_debug_bundle(
    run: &MosaicRun,
    config: &MosaicConfig,
    scene: Option<&SceneSpec>,
) -> Result<PathBuf, AppError> {
    write_debug_bundle_in(Path::new(DEBUG_DIRECTORY), run, config, scene)
}

pub fn write_debug_bundle_in(
    dir: &Path,
    run: &MosaicRun,
    config: &MosaicConfig,
    scene: Option<&SceneSpec>,
) -> Result<PathBuf, AppError> {
    create_dir_all(dir).map_err(|e| AppError::new(4, format!("Failed to create debug dir: {e}")))?;

    let ts = Local::now().format("%Y%m%d_%H%M%S_%3f");
    let seed = scene.map(|s| s.seed).unwrap_or(0);
    let path = dir.join(format!("seam_debug_seed{seed}_{ts}.md"));

    let mut file = File::create(&path).map_err(|e| AppError::new(4, format!("Failed to create debug file: {e}")))?;
    let io_err = |e: std::io::Error| AppError::new(4, format!("Failed to write debug: {e}"));

    let (w, h, c) = run.result.image.dims();
    writeln!(file, "# seam debug bundle").map_err(io_err)?;
    writeln!(file, "- generated: {}", Local::now().to_rfc3339()).map_err(io_err)?;
    writeln!(file, "- tiles: {w}x{h}x{c}").map_err(io_err)?;
    writeln!(file, "- samples: {}", run.solution.samples.len()).map_err(io_err)?;
    writeln!(file, "- blend: {}", run.result.blend_mode.display_name()).map_err(io_err)?;
    if let Some(scene) = scene {
        writeln!(
            file,
            "- scene: seed={} overlap={} stars={} noise={} scale={} offset={} gradient={}",
            scene.seed,
            scene.overlap,
            scene.star_count,
            scene.noise_sigma,
            scene.scale,
            scene.offset,
            scene.gradient_amplitude
        )
        .map_err(io_err)?;
    }
    for (k, v) in &run.result.tags {
        writeln!(file, "- tag {k}: {v}").map_err(io_err)?;
    }

    let config_json = serde_json::to_string_pretty(config)
        .map_err(|e| AppError::new(4, format!("Failed to serialize config: {e}")))?;
    writeln!(file, "\n## Config\n```json\n{config_json}\n```").map_err(io_err)?;

    writeln!(file, "\n## Channels\n```text\n{}```", format_channel_table(&run.result.channels)).map_err(io_err)?;

    for corr in &run.solution.corrections {
        let channel = corr.fit.channel;
        writeln!(file, "\n## Channel {channel}").map_err(io_err)?;
        writeln!(
            file,
            "Fit: {:?} scale={:.6} offset={:.6} rms={:.4e} iterations={}",
            corr.fit.mode, corr.fit.scale, corr.fit.offset, corr.fit.rms, corr.fit.iterations
        )
        .map_err(io_err)?;

        for curve in corr.gradient.curves() {
            writeln!(file, "\n### Gradient knots ({})", curve.axis.label()).map_err(io_err)?;
            writeln!(file, "| {} | value |", curve.axis.label()).map_err(io_err)?;
            writeln!(file, "| - | - |").map_err(io_err)?;
            for (x, y) in curve.knots() {
                writeln!(file, "| {x:.2} | {y:.6e} |").map_err(io_err)?;
            }
        }

        let residuals = compute_residuals(&run.solution.samples, corr, channel)?;
        writeln!(file, "\n### Samples").map_err(io_err)?;
        writeln!(file, "| idx | x | y | reference | target | linear_residual | residual | status |").map_err(io_err)?;
        writeln!(file, "| - | - | - | - | - | - | - | - |").map_err(io_err)?;
        for r in &residuals {
            writeln!(
                file,
                "| {} | {:.1} | {:.1} | {:.6} | {:.6} | {:.4e} | {:.4e} | {} |",
                r.index,
                r.x,
                r.y,
                r.reference,
                r.target,
                r.linear_residual,
                r.residual,
                if r.rejected { "rejected" } else { "accepted" }
            )
            .map_err(io_err)?;
        }
    }

    Ok(path)
}
