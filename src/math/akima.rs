//! Akima piecewise-cubic interpolation.
//!
//! Each knot's tangent is a weighted mean of the neighbouring chord slopes,
//! weighted by how much the *other* side's slopes disagree:
//!
//! ```text
//! t_i = (|m_{i+1} - m_i| · m_{i-1} + |m_{i-1} - m_{i-2}| · m_i)
//!       / (|m_{i+1} - m_i| + |m_{i-1} - m_{i-2}|)
//! ```
//!
//! so a sharp corner stays local instead of ringing through the whole curve.
//! Two phantom slopes are extrapolated linearly at each end. When both weights
//! vanish (locally straight data) the tangent is the plain average of the two
//! adjacent slopes.
//!
//! Outside `[x_0, x_{n-1}]` the boundary interval's cubic is evaluated as is.

use serde::{Deserialize, Serialize};

use crate::error::{MosaicError, Stage};

/// Knots required to build a spline.
pub const MIN_KNOTS: usize = 5;

/// Weight sums below this are treated as zero.
const WEIGHT_EPS: f64 = 1e-12;

/// Cubic on one interval: `a + b·u + c·u² + d·u³` with `u = x - x_i`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CubicSegment {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub d: f64,
}

impl CubicSegment {
    #[inline]
    pub fn eval(&self, u: f64) -> f64 {
        self.a + u * (self.b + u * (self.c + u * self.d))
    }
}

/// An Akima spline through strictly increasing knots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AkimaSpline {
    xs: Vec<f64>,
    ys: Vec<f64>,
    segments: Vec<CubicSegment>,
}

impl AkimaSpline {
    /// Build a spline through `(xs[i], ys[i])`.
    ///
    /// Fails with `InsufficientData` below [`MIN_KNOTS`] knots and with
    /// `DegenerateInterval` when two consecutive positions are not strictly
    /// increasing by a representable amount.
    pub fn new(xs: Vec<f64>, ys: Vec<f64>) -> Result<Self, MosaicError> {
        if xs.len() != ys.len() {
            return Err(MosaicError::DimensionMismatch {
                what: "spline knots",
                expected: (xs.len(), 1, 1),
                actual: (ys.len(), 1, 1),
            });
        }
        let n = xs.len();
        if n < MIN_KNOTS {
            return Err(MosaicError::InsufficientData {
                stage: Stage::Gradient,
                channel: 0,
                needed: MIN_KNOTS,
                found: n,
            });
        }
        if let Some(i) = xs.iter().zip(ys.iter()).position(|(x, y)| !(x.is_finite() && y.is_finite())) {
            return Err(MosaicError::DegenerateInterval {
                channel: 0,
                index: i,
                left: xs[i],
                right: xs[(i + 1).min(n - 1)],
            });
        }

        let mut slopes = Vec::with_capacity(n + 3);
        for i in 0..n - 1 {
            let h = xs[i + 1] - xs[i];
            if !is_representable_span(xs[i], xs[i + 1], h) {
                return Err(MosaicError::DegenerateInterval {
                    channel: 0,
                    index: i,
                    left: xs[i],
                    right: xs[i + 1],
                });
            }
            slopes.push((ys[i + 1] - ys[i]) / h);
        }

        // Phantom slopes: m[-2], m[-1] in front and m[n-1], m[n] at the back.
        let m0 = slopes[0];
        let m1 = slopes[1];
        let ml = slopes[n - 2];
        let ml1 = slopes[n - 3];
        let mut m = Vec::with_capacity(n + 3);
        m.push(3.0 * m0 - 2.0 * m1);
        m.push(2.0 * m0 - m1);
        m.extend_from_slice(&slopes);
        m.push(2.0 * ml - ml1);
        m.push(3.0 * ml - 2.0 * ml1);
        // m[k + 2] is the slope of interval k.

        let tangents: Vec<f64> = (0..n)
            .map(|i| {
                let w_left = (m[i + 3] - m[i + 2]).abs();
                let w_right = (m[i + 1] - m[i]).abs();
                let denom = w_left + w_right;
                if denom <= WEIGHT_EPS {
                    0.5 * (m[i + 1] + m[i + 2])
                } else {
                    (w_left * m[i + 1] + w_right * m[i + 2]) / denom
                }
            })
            .collect();

        let segments = (0..n - 1)
            .map(|i| {
                let h = xs[i + 1] - xs[i];
                let slope = slopes[i];
                let t0 = tangents[i];
                let t1 = tangents[i + 1];
                CubicSegment {
                    a: ys[i],
                    b: t0,
                    c: (3.0 * slope - 2.0 * t0 - t1) / h,
                    d: (t0 + t1 - 2.0 * slope) / (h * h),
                }
            })
            .collect();

        Ok(Self { xs, ys, segments })
    }

    pub fn knots(&self) -> impl Iterator<Item = (f64, f64)> + '_ {
        self.xs.iter().copied().zip(self.ys.iter().copied())
    }

    pub fn xs(&self) -> &[f64] {
        &self.xs
    }

    pub fn ys(&self) -> &[f64] {
        &self.ys
    }

    pub fn segments(&self) -> &[CubicSegment] {
        &self.segments
    }

    /// Index of the interval used to evaluate `x` (boundary intervals extend
    /// outward).
    pub fn segment_index(&self, x: f64) -> usize {
        let last = self.segments.len() - 1;
        // First knot strictly greater than x, minus one.
        let upper = self.xs.partition_point(|&k| k <= x);
        upper.saturating_sub(1).min(last)
    }

    /// Evaluate at any `x`, extrapolating with the boundary cubics.
    pub fn eval(&self, x: f64) -> f64 {
        let i = self.segment_index(x);
        self.segments[i].eval(x - self.xs[i])
    }
}

/// `h` is positive and not lost in the rounding of the endpoints.
fn is_representable_span(left: f64, right: f64, h: f64) -> bool {
    let scale = left.abs().max(right.abs()).max(1.0);
    h.is_finite() && h > scale * f64::EPSILON * 4.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spline(xs: &[f64], ys: &[f64]) -> AkimaSpline {
        AkimaSpline::new(xs.to_vec(), ys.to_vec()).unwrap()
    }

    #[test]
    fn colinear_points_have_no_curvature() {
        let xs = [0.0, 10.0, 25.0, 30.0, 50.0];
        let ys: Vec<f64> = xs.iter().map(|x| 0.5 * x - 3.0).collect();
        let s = spline(&xs, &ys);
        for seg in s.segments() {
            assert!(seg.c.abs() < 1e-12, "c = {}", seg.c);
            assert!(seg.d.abs() < 1e-12, "d = {}", seg.d);
            assert!((seg.b - 0.5).abs() < 1e-12);
        }
        assert!((s.eval(80.0) - (0.5 * 80.0 - 3.0)).abs() < 1e-9);
        assert!((s.eval(-20.0) - (0.5 * -20.0 - 3.0)).abs() < 1e-9);
    }

    #[test]
    fn interpolates_knots() {
        let xs = [0.0, 1.0, 2.0, 3.0, 4.0, 5.0];
        let ys = [0.0, 1.0, 0.5, 2.0, 2.0, -1.0];
        let s = spline(&xs, &ys);
        for (x, y) in xs.iter().zip(ys.iter()) {
            assert!((s.eval(*x) - y).abs() < 1e-12);
        }
    }

    #[test]
    fn extrapolation_continues_boundary_cubic() {
        let xs = [0.0, 1.0, 2.0, 4.0, 7.0];
        let ys = [1.0, 3.0, 2.0, 5.0, 4.0];
        let s = spline(&xs, &ys);

        let last = *s.segments().last().unwrap();
        for x in [7.5, 9.0, 20.0] {
            assert_eq!(s.eval(x), last.eval(x - 4.0));
        }
        let first = s.segments()[0];
        for x in [-0.5, -3.0] {
            assert_eq!(s.eval(x), first.eval(x));
        }
        // Continuity at the last knot.
        let eps = 1e-9;
        assert!((s.eval(7.0 + eps) - s.eval(7.0 - eps)).abs() < 1e-6);
    }

    #[test]
    fn corner_stays_local() {
        // Flat, then a ramp: the flat region away from the corner must stay flat.
        let xs: Vec<f64> = (0..10).map(|i| i as f64).collect();
        let ys: Vec<f64> = xs.iter().map(|&x| if x < 5.0 { 0.0 } else { x - 5.0 }).collect();
        let s = spline(&xs, &ys);
        for x in [0.5, 1.5, 2.5, 3.5] {
            assert!(s.eval(x).abs() < 1e-12, "overshoot at {x}: {}", s.eval(x));
        }
    }

    #[test]
    fn alternating_slopes_take_average_branch() {
        // Runs of equal slopes make both weights vanish.
        let xs = [0.0, 1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        let ys = [0.0, 0.0, 0.0, 0.0, 1.0, 2.0, 3.0];
        let s = spline(&xs, &ys);
        for seg in s.segments() {
            assert!(seg.a.is_finite() && seg.b.is_finite() && seg.c.is_finite() && seg.d.is_finite());
        }
        assert_eq!(s.segments()[0].b, 0.0);
    }

    #[test]
    fn four_points_are_insufficient() {
        let err = AkimaSpline::new(vec![0.0, 1.0, 2.0, 3.0], vec![0.0; 4]).unwrap_err();
        assert!(matches!(
            err,
            MosaicError::InsufficientData {
                needed: 5,
                found: 4,
                ..
            }
        ));
    }

    #[test]
    fn duplicate_knot_is_degenerate() {
        let err = AkimaSpline::new(vec![0.0, 1.0, 1.0, 2.0, 3.0], vec![0.0; 5]).unwrap_err();
        assert_eq!(
            err,
            MosaicError::DegenerateInterval {
                channel: 0,
                index: 1,
                left: 1.0,
                right: 1.0
            }
        );
    }

    #[test]
    fn underflowing_span_is_degenerate() {
        let x: f64 = 1.0e6;
        let next = f64::from_bits(x.to_bits() + 1);
        let err = AkimaSpline::new(vec![0.0, 1.0, x, next, x + 10.0], vec![0.0; 5]).unwrap_err();
        assert!(matches!(err, MosaicError::DegenerateInterval { index: 2, .. }));
    }

    #[test]
    fn non_finite_knot_is_degenerate() {
        let err = AkimaSpline::new(vec![0.0, 1.0, 2.0, 3.0, 4.0], vec![0.0, 0.0, f64::NAN, 0.0, 0.0]).unwrap_err();
        assert_eq!(err.exit_code(), 4);
        assert_eq!(
            err,
            MosaicError::DegenerateInterval {
                channel: 0,
                index: 2,
                left: 2.0,
                right: 3.0
            }
        );
    }

    #[test]
    fn decreasing_knots_are_degenerate() {
        let err = AkimaSpline::new(vec![0.0, 2.0, 1.0, 3.0, 4.0], vec![0.0; 5]).unwrap_err();
        assert!(matches!(err, MosaicError::DegenerateInterval { index: 1, .. }));
    }

    #[test]
    fn segment_lookup_uses_boundary_intervals() {
        let s = spline(&[0.0, 1.0, 2.0, 3.0, 4.0], &[0.0, 1.0, 4.0, 9.0, 16.0]);
        assert_eq!(s.segment_index(-1.0), 0);
        assert_eq!(s.segment_index(0.0), 0);
        assert_eq!(s.segment_index(1.0), 1);
        assert_eq!(s.segment_index(3.999), 3);
        assert_eq!(s.segment_index(4.0), 3);
        assert_eq!(s.segment_index(100.0), 3);
    }
}
