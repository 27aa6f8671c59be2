//! ASCII/Unicode plotting for terminal output.
//!
//! This is intentionally "dumb" (fixed-size grid), optimized for:
//! - quick visual sanity checks in a terminal
//! - deterministic output (helpful for golden tests)
//!
//! Plot elements:
//! - residual samples: `o`
//! - rejected samples: `x`
//! - gradient curve: `-` line

use crate::domain::Axis;
use crate::fit::{GradientCurve, GradientSurface};
use crate::io::ParamsFile;
use crate::report::SampleResidual;

/// One residual point along a curve's axis.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlotPoint {
    pub position: f64,
    pub value: f64,
    pub rejected: bool,
}

/// Residual points the given axis curve was fit to.
///
/// For the y curve of a separable surface, the x curve is subtracted first.
pub fn curve_points(residuals: &[SampleResidual], surface: &GradientSurface, axis: Axis) -> Vec<PlotPoint> {
    residuals
        .iter()
        .map(|r| {
            let value = match (axis, &surface.x) {
                (Axis::Y, Some(gx)) => r.linear_residual - gx.eval(r.x),
                _ => r.linear_residual,
            };
            PlotPoint {
                position: axis.pick(r.x, r.y),
                value,
                rejected: r.rejected,
            }
        })
        .collect()
}

/// Render a gradient curve over `[p_min, p_max]` with residual points.
pub fn render_ascii_plot(
    points: &[PlotPoint],
    curve: &GradientCurve,
    p_min: f64,
    p_max: f64,
    width: usize,
    height: usize,
) -> String {
    let samples = sample_curve(curve, p_min, p_max, width.max(2));
    render_plot(points, Some(&samples), curve.axis, p_min, p_max, width, height)
}

/// Render every curve of one channel of a saved parameter file (curves only).
pub fn render_ascii_plot_from_params(params: &ParamsFile, channel: usize, width: usize, height: usize) -> String {
    let Some(ch) = params.channels.get(channel) else {
        return format!("Channel {channel} not in parameter file ({} channels)\n", params.channels.len());
    };
    let mut out = String::new();
    for curve in ch.gradient.curves() {
        let extent = match curve.axis {
            Axis::X => params.width,
            Axis::Y => params.height,
        };
        let p_max = (extent.max(2) - 1) as f64;
        out.push_str(&render_ascii_plot(&[], curve, 0.0, p_max, width, height));
    }
    if out.is_empty() {
        out.push_str(&format!("Channel {channel} has no gradient curve\n"));
    }
    out
}

fn render_plot(
    points: &[PlotPoint],
    curve_points: Option<&[(f64, f64)]>,
    axis: Axis,
    p_min: f64,
    p_max: f64,
    width: usize,
    height: usize,
) -> String {
    let width = width.max(10);
    let height = height.max(5);

    // Determine value range from residual points and curve points.
    let (y_min, y_max) = y_range(points, curve_points).unwrap_or((-1.0, 1.0));
    let (y_min, y_max) = pad_range(y_min, y_max, 0.05);

    let mut grid = vec![vec![' '; width]; height];

    // Draw curve first (so points can overlay).
    if let Some(curve) = curve_points {
        draw_curve(&mut grid, curve, p_min, p_max, y_min, y_max);
    }

    for p in points {
        let x = map_x(p.position, p_min, p_max, width);
        let y = map_y(p.value, y_min, y_max, height);
        grid[y][x] = if p.rejected { 'x' } else { 'o' };
    }

    // Build final string. We include a small header with ranges.
    let mut out = String::new();
    out.push_str(&format!(
        "Plot: {}=[{p_min:.1}, {p_max:.1}] px | residual=[{y_min:.4}, {y_max:.4}]\n",
        axis.label()
    ));

    for row in grid {
        out.push_str(&row.into_iter().collect::<String>());
        out.push('\n');
    }

    out
}

fn sample_curve(curve: &GradientCurve, p_min: f64, p_max: f64, n: usize) -> Vec<(f64, f64)> {
    let n = n.max(2);
    let mut out = Vec::with_capacity(n);
    for i in 0..n {
        let u = i as f64 / (n as f64 - 1.0);
        let p = p_min + u * (p_max - p_min);
        out.push((p, curve.eval(p)));
    }
    out
}

fn y_range(points: &[PlotPoint], curve: Option<&[(f64, f64)]>) -> Option<(f64, f64)> {
    let mut min_y = f64::INFINITY;
    let mut max_y = f64::NEG_INFINITY;

    for p in points {
        min_y = min_y.min(p.value);
        max_y = max_y.max(p.value);
    }
    if let Some(curve) = curve {
        for &(_, y) in curve {
            min_y = min_y.min(y);
            max_y = max_y.max(y);
        }
    }

    if min_y.is_finite() && max_y.is_finite() && max_y > min_y {
        Some((min_y, max_y))
    } else if min_y.is_finite() && max_y.is_finite() {
        Some((min_y - 0.5, max_y + 0.5))
    } else {
        None
    }
}

fn pad_range(min: f64, max: f64, frac: f64) -> (f64, f64) {
    let span = (max - min).abs();
    let pad = (span * frac).max(1e-12);
    (min - pad, max + pad)
}

fn map_x(t: f64, t_min: f64, t_max: f64, width: usize) -> usize {
    let width = width.max(2);
    let span = t_max - t_min;
    let u = if span > 0.0 { ((t - t_min) / span).clamp(0.0, 1.0) } else { 0.0 };
    (u * (width as f64 - 1.0)).round() as usize
}

fn map_y(y: f64, y_min: f64, y_max: f64, height: usize) -> usize {
    let height = height.max(2);
    let u = ((y - y_min) / (y_max - y_min)).clamp(0.0, 1.0);
    // y=top is max -> row 0
    (height as f64 - 1.0 - (u * (height as f64 - 1.0))).round() as usize
}

fn draw_curve(grid: &mut [Vec<char>], curve: &[(f64, f64)], t_min: f64, t_max: f64, y_min: f64, y_max: f64) {
    if curve.len() < 2 {
        return;
    }
    let height = grid.len();
    let width = grid[0].len();

    let mut prev = None;
    for &(t, y) in curve {
        let x = map_x(t, t_min, t_max, width);
        let yy = map_y(y, y_min, y_max, height);
        if let Some((x0, y0)) = prev {
            draw_line(grid, x0, y0, x, yy, '-');
        } else {
            grid[yy][x] = '-';
        }
        prev = Some((x, yy));
    }
}

/// Integer line drawing (Bresenham-ish).
fn draw_line(grid: &mut [Vec<char>], x0: usize, y0: usize, x1: usize, y1: usize, ch: char) {
    let mut x0 = x0 as isize;
    let mut y0 = y0 as isize;
    let x1 = x1 as isize;
    let y1 = y1 as isize;

    let dx = (x1 - x0).abs();
    let sx = if x0 < x1 { 1 } else { -1 };
    let dy = -(y1 - y0).abs();
    let sy = if y0 < y1 { 1 } else { -1 };
    let mut err = dx + dy;

    loop {
        if y0 >= 0
            && (y0 as usize) < grid.len()
            && x0 >= 0
            && (x0 as usize) < grid[0].len()
            && grid[y0 as usize][x0 as usize] == ' '
        {
            grid[y0 as usize][x0 as usize] = ch;
        }

        if x0 == x1 && y0 == y1 {
            break;
        }
        let e2 = 2 * err;
        if e2 >= dy {
            err += dy;
            x0 += sx;
        }
        if e2 <= dx {
            err += dx;
            y0 += sy;
        }
    }
}
