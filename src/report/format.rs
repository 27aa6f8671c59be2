//! Formatted terminal output.
//!
//! We keep formatting code in one place so:
//! - the fitting code stays clean and testable
//! - output changes are localized (important for future snapshot tests)

use crate::app::pipeline::MosaicRun;
use crate::data::ChannelTruth;
use crate::domain::{ChannelDiagnostics, FitMode, MosaicConfig};
use crate::report::SampleResidual;

/// Format the full run summary (tiles, grid, per-channel diagnostics, tags).
pub fn format_run_summary(run: &MosaicRun, config: &MosaicConfig) -> String {
    let mut out = String::new();
    let image = &run.result.image;

    out.push_str("=== seam - two-tile mosaic ===\n");
    out.push_str(&format!(
        "Tiles: {}x{}x{} | blend: {}\n",
        image.width(),
        image.height(),
        image.channels(),
        run.result.blend_mode.display_name()
    ));
    out.push_str(&format!(
        "Grid: cell={}px statistic={:?} min_pixels={} | samples={}\n",
        config.cell_size,
        config.cell_statistic,
        config.min_pixels_per_cell,
        run.solution.samples.len()
    ));
    out.push_str(&format!(
        "Fit: rejection={:.2}σ ({:?}, max {} iter) | gradient: {:?}\n",
        config.rejection_sigma, config.spread_estimator, config.max_rejection_iterations, config.gradient_axes
    ));
    if !run.result.tags.is_empty() {
        let tags: Vec<String> = run.result.tags.iter().map(|(k, v)| format!("{k}={v}")).collect();
        out.push_str(&format!("Tags: {}\n", tags.join(" ")));
    }

    out.push_str("\nChannel diagnostics:\n");
    out.push_str(&format_channel_table(&run.result.channels));
    out
}

/// One row per channel.
pub fn format_channel_table(channels: &[ChannelDiagnostics]) -> String {
    let mut out = String::new();
    out.push_str(
        format!(
            "{:<3} {:<7} {:>10} {:>11} {:>10} {:>5} {:>5} {:>6} {:>10}\n",
            "ch", "mode", "scale", "offset", "rms", "acc", "rej", "knots", "grad_span"
        )
        .trim_end(),
    );
    out.push('\n');
    out.push_str(
        format!(
            "{:-<3} {:-<7} {:-<10} {:-<11} {:-<10} {:-<5} {:-<5} {:-<6} {:-<10}\n",
            "", "", "", "", "", "", "", "", ""
        )
        .trim_end(),
    );
    out.push('\n');

    for d in channels {
        out.push_str(
            format!(
                "{:<3} {:<7} {:>10.6} {:>11.6} {:>10.3e} {:>5} {:>5} {:>6} {:>10.3e}\n",
                d.channel,
                mode_label(d.mode),
                d.scale,
                d.offset,
                d.rms,
                d.accepted,
                d.rejected,
                d.gradient_knots,
                d.gradient_span
            )
            .trim_end(),
        );
        out.push('\n');
    }
    out
}

/// Fitted against true parameters (synthetic scenes only).
pub fn format_truth_comparison(channels: &[ChannelDiagnostics], truth: &[ChannelTruth]) -> String {
    let mut out = String::from("Recovered vs true:\n");
    for (d, t) in channels.iter().zip(truth) {
        out.push_str(&format!(
            "  ch{}: scale {:.5} (true {:.5}, {:+.3}%) | offset {:.5} (true {:.5})\n",
            d.channel,
            d.scale,
            t.scale,
            100.0 * (d.scale / t.scale - 1.0),
            d.offset,
            t.offset
        ));
    }
    out
}

/// Table of the worst-fitting samples.
pub fn format_worst_samples(rows: &[SampleResidual]) -> String {
    let mut out = String::from("Largest residuals:\n");
    out.push_str(
        format!(
            "{:>5} {:>8} {:>8} {:>11} {:>11} {:>11} {:<8}\n",
            "idx", "x", "y", "reference", "target", "residual", "status"
        )
        .trim_end(),
    );
    out.push('\n');
    for r in rows {
        out.push_str(
            format!(
                "{:>5} {:>8.1} {:>8.1} {:>11.6} {:>11.6} {:>11.3e} {:<8}\n",
                r.index,
                r.x,
                r.y,
                r.reference,
                r.target,
                r.residual,
                if r.rejected { "rejected" } else { "" }
            )
            .trim_end(),
        );
        out.push('\n');
    }
    out
}

fn mode_label(mode: FitMode) -> &'static str {
    match mode {
        FitMode::Linear => "linear",
        FitMode::OffsetOnly => "offset",
    }
}
