//! Gradient surface modeler.
//!
//! Residuals `reference − (scale·target + offset)` of the accepted samples are
//! projected onto one axis, reduced to one value per distinct position
//! (median), and interpolated with an Akima spline. For `xy` the y curve is fit
//! to what the x curve leaves, and the surface is the sum of both.

use log::debug;
use serde::{Deserialize, Serialize};

use crate::domain::{Axis, GradientAxes, LinearFit, SamplePair};
use crate::error::{MosaicError, Stage};
use crate::math::{AkimaSpline, median_mut};

/// Relative tolerance under which two projected positions are the same knot.
const POSITION_TOL: f64 = 1e-9;

/// Correction curve along one axis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradientCurve {
    pub axis: Axis,
    pub spline: AkimaSpline,
}

impl GradientCurve {
    /// Fit a curve through scattered `(position, residual)` points.
    pub fn fit(axis: Axis, points: &[(f64, f64)]) -> Result<Self, MosaicError> {
        let (xs, ys) = reduce_by_position(points);
        let spline = AkimaSpline::new(xs, ys)?;
        Ok(Self { axis, spline })
    }

    #[inline]
    pub fn eval(&self, position: f64) -> f64 {
        self.spline.eval(position)
    }

    pub fn knot_count(&self) -> usize {
        self.spline.xs().len()
    }

    pub fn knots(&self) -> impl Iterator<Item = (f64, f64)> + '_ {
        self.spline.knots()
    }

    /// Curve sampled at every integer position in `0..len`.
    pub fn profile(&self, len: usize) -> Vec<f64> {
        (0..len).map(|i| self.eval(i as f64)).collect()
    }
}

/// Sort points by position and collapse equal positions to their median value.
fn reduce_by_position(points: &[(f64, f64)]) -> (Vec<f64>, Vec<f64>) {
    let mut sorted: Vec<(f64, f64)> = points.to_vec();
    sorted.sort_by(|a, b| a.0.total_cmp(&b.0));

    let mut xs = Vec::new();
    let mut ys = Vec::new();
    let mut group: Vec<f64> = Vec::new();
    let mut i = 0;
    while i < sorted.len() {
        let anchor = sorted[i].0;
        let tol = POSITION_TOL * anchor.abs().max(1.0);
        group.clear();
        while i < sorted.len() && sorted[i].0 - anchor <= tol {
            group.push(sorted[i].1);
            i += 1;
        }
        if let Some(m) = median_mut(&mut group) {
            xs.push(anchor);
            ys.push(m);
        }
    }
    (xs, ys)
}

/// Additive correction `gx(x) + gy(y)`; a missing axis contributes zero.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GradientSurface {
    pub x: Option<GradientCurve>,
    pub y: Option<GradientCurve>,
}

impl GradientSurface {
    pub fn zero() -> Self {
        Self::default()
    }

    pub fn is_zero(&self) -> bool {
        self.x.is_none() && self.y.is_none()
    }

    #[inline]
    pub fn eval(&self, x: f64, y: f64) -> f64 {
        self.x.as_ref().map_or(0.0, |c| c.eval(x)) + self.y.as_ref().map_or(0.0, |c| c.eval(y))
    }

    pub fn knot_count(&self) -> usize {
        self.curves().map(GradientCurve::knot_count).sum()
    }

    pub fn curves(&self) -> impl Iterator<Item = &GradientCurve> {
        self.x.iter().chain(self.y.iter())
    }

    /// Per-column and per-row correction profiles for a `width × height` tile.
    pub fn profiles(&self, width: usize, height: usize) -> (Vec<f64>, Vec<f64>) {
        let cols = self.x.as_ref().map_or_else(|| vec![0.0; width], |c| c.profile(width));
        let rows = self.y.as_ref().map_or_else(|| vec![0.0; height], |c| c.profile(height));
        (cols, rows)
    }

    /// Peak-to-peak of the correction over a `width × height` tile.
    pub fn span_over(&self, width: usize, height: usize) -> f64 {
        let (cols, rows) = self.profiles(width, height);
        peak_to_peak(&cols) + peak_to_peak(&rows)
    }
}

fn peak_to_peak(values: &[f64]) -> f64 {
    let (lo, hi) = values
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
    if lo.is_finite() && hi.is_finite() { hi - lo } else { 0.0 }
}

/// Fit the gradient surface for one channel from the fit's accepted samples.
pub fn fit_gradient(
    samples: &[SamplePair],
    fit: &LinearFit,
    axes: GradientAxes,
    channel: usize,
) -> Result<GradientSurface, MosaicError> {
    if axes == GradientAxes::None {
        return Ok(GradientSurface::zero());
    }

    let mut points: Vec<(f64, f64, f64)> = Vec::with_capacity(fit.accepted.len());
    for &i in &fit.accepted {
        let Some(s) = samples.get(i) else {
            return Err(MosaicError::InvalidChannel {
                stage: Stage::Gradient,
                channel,
                reason: format!("accepted sample {i} is out of range ({} samples)", samples.len()),
            });
        };
        if channel >= s.channels() {
            return Err(MosaicError::InvalidChannel {
                stage: Stage::Gradient,
                channel,
                reason: format!("sample {i} has only {} channel(s)", s.channels()),
            });
        }
        let residual = s.reference[channel] - fit.apply(s.target[channel]);
        if residual.is_finite() {
            points.push((s.x, s.y, residual));
        }
    }

    let project = |axis: Axis, pts: &[(f64, f64, f64)]| -> Vec<(f64, f64)> {
        pts.iter().map(|&(x, y, r)| (axis.pick(x, y), r)).collect()
    };
    let fit_axis = |axis: Axis, pts: &[(f64, f64, f64)]| {
        GradientCurve::fit(axis, &project(axis, pts)).map_err(|e| e.for_channel(channel))
    };

    let surface = match axes {
        GradientAxes::None => GradientSurface::zero(),
        GradientAxes::X => GradientSurface {
            x: Some(fit_axis(Axis::X, &points)?),
            y: None,
        },
        GradientAxes::Y => GradientSurface {
            x: None,
            y: Some(fit_axis(Axis::Y, &points)?),
        },
        GradientAxes::Xy => {
            let gx = fit_axis(Axis::X, &points)?;
            let remaining: Vec<(f64, f64, f64)> = points.iter().map(|&(x, y, r)| (x, y, r - gx.eval(x))).collect();
            let gy = fit_axis(Axis::Y, &remaining)?;
            GradientSurface {
                x: Some(gx),
                y: Some(gy),
            }
        }
    };

    debug!(
        "channel {channel}: gradient ({axes:?}) from {} residuals, {} knots",
        points.len(),
        surface.knot_count()
    );
    Ok(surface)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::FitMode;

    fn identity_fit(n: usize) -> LinearFit {
        LinearFit {
            channel: 0,
            mode: FitMode::Linear,
            scale: 1.0,
            offset: 0.0,
            rms: 0.0,
            accepted: (0..n).collect(),
            rejected: Vec::new(),
            iterations: 0,
        }
    }

    /// Samples on a `cols × rows` grid of cell centers with residual `g(x, y)`.
    fn grid(cols: usize, rows: usize, g: impl Fn(f64, f64) -> f64) -> Vec<SamplePair> {
        let mut out = Vec::new();
        for j in 0..rows {
            for i in 0..cols {
                let (x, y) = (15.5 + 32.0 * i as f64, 15.5 + 32.0 * j as f64);
                let target = 0.3;
                out.push(SamplePair {
                    x,
                    y,
                    reference: vec![target + g(x, y)],
                    target: vec![target],
                    pixel_count: vec![1024],
                    valid: true,
                });
            }
        }
        out
    }

    #[test]
    fn x_ramp_extrapolates_linearly() {
        let samples = grid(6, 3, |x, _| 1e-3 * x);
        let fit = identity_fit(samples.len());
        let surface = fit_gradient(&samples, &fit, GradientAxes::X, 0).unwrap();
        assert_eq!(surface.knot_count(), 6);
        assert!(surface.y.is_none());
        for x in [0.0, 100.0, 300.0, 500.0] {
            assert!((surface.eval(x, 7.0) - 1e-3 * x).abs() < 1e-12, "x = {x}");
        }
    }

    #[test]
    fn separable_xy_recovers_plane() {
        let samples = grid(5, 5, |x, y| 2e-3 * x - 1e-3 * y);
        let fit = identity_fit(samples.len());
        let surface = fit_gradient(&samples, &fit, GradientAxes::Xy, 0).unwrap();
        assert_eq!(surface.knot_count(), 10);
        for (x, y) in [(0.0, 0.0), (40.0, 90.0), (200.0, 10.0)] {
            let want = 2e-3 * x - 1e-3 * y;
            assert!((surface.eval(x, y) - want).abs() < 1e-12, "({x}, {y})");
        }
    }

    #[test]
    fn only_accepted_samples_contribute() {
        let mut samples = grid(6, 1, |_, _| 0.0);
        samples.push(SamplePair {
            x: 50.0,
            y: 15.5,
            reference: vec![9.0],
            target: vec![0.3],
            pixel_count: vec![1024],
            valid: true,
        });
        let fit = identity_fit(6);
        let surface = fit_gradient(&samples, &fit, GradientAxes::X, 0).unwrap();
        assert_eq!(surface.knot_count(), 6);
        assert!(surface.eval(50.0, 0.0).abs() < 1e-12);
    }

    #[test]
    fn too_few_positions_report_channel() {
        let samples: Vec<SamplePair> = grid(4, 4, |x, _| x)
            .into_iter()
            .map(|mut s| {
                s.reference.insert(0, 0.0);
                s.target.insert(0, 0.0);
                s
            })
            .collect();
        let mut fit = identity_fit(samples.len());
        fit.channel = 1;
        let err = fit_gradient(&samples, &fit, GradientAxes::X, 1).unwrap_err();
        assert_eq!(
            err,
            MosaicError::InsufficientData {
                stage: Stage::Gradient,
                channel: 1,
                needed: 5,
                found: 4
            }
        );
    }

    #[test]
    fn none_axes_is_zero_surface() {
        let surface = fit_gradient(&[], &identity_fit(0), GradientAxes::None, 0).unwrap();
        assert!(surface.is_zero());
        assert_eq!(surface.eval(10.0, 10.0), 0.0);
        assert_eq!(surface.span_over(100, 100), 0.0);
    }

    #[test]
    fn repeated_positions_collapse_to_median() {
        let points = [(1.0, 5.0), (0.0, 1.0), (1.0, 1.0), (1.0, 2.0), (2.0, 0.0)];
        let (xs, ys) = reduce_by_position(&points);
        assert_eq!(xs, vec![0.0, 1.0, 2.0]);
        assert_eq!(ys, vec![1.0, 2.0, 0.0]);
    }

    #[test]
    fn span_covers_whole_tile() {
        let samples = grid(6, 2, |x, _| 1e-3 * x);
        let surface = fit_gradient(&samples, &identity_fit(samples.len()), GradientAxes::X, 0).unwrap();
        assert!((surface.span_over(400, 10) - 0.399).abs() < 1e-12);
    }
}
