//! Pixel-math expression export.
//!
//! Each channel's correction is written as one expression over the target
//! image `$T` and the pixel coordinates `x()` / `y()`:
//!
//! ```text
//! scale*$T + offset + gx + gy
//! ```
//!
//! A gradient curve becomes nested `iif(cond, then, else)` calls choosing the
//! knot interval, each branch a Horner-form cubic in `(x() - x_i)`. The first
//! and last branches also cover the extrapolated range, matching the curve.

use crate::compose::ChannelCorrection;
use crate::fit::GradientCurve;
use crate::math::CubicSegment;

/// Expression for one channel.
pub fn channel_expression(correction: &ChannelCorrection) -> String {
    let fit = &correction.fit;
    let mut out = format!("{}*$T", num(fit.scale));
    out.push_str(&signed(fit.offset));
    for curve in correction.gradient.curves() {
        out.push_str(" + ");
        out.push_str(&curve_expression(curve));
    }
    out
}

/// Expressions for every channel, in channel order.
pub fn pixel_math_expressions(corrections: &[ChannelCorrection]) -> Vec<String> {
    corrections.iter().map(channel_expression).collect()
}

/// Piecewise cubic of one gradient curve.
pub fn curve_expression(curve: &GradientCurve) -> String {
    let coord = format!("{}()", curve.axis.label());
    let xs = curve.spline.xs();
    let segments = curve.spline.segments();

    let Some(last) = segments.len().checked_sub(1) else {
        return "0".to_string();
    };
    // Innermost branch is the last interval; wrap outward.
    let mut expr = segment_expression(&segments[last], &coord, xs[last]);
    for i in (0..last).rev() {
        expr = format!(
            "iif({coord} < {}, {}, {expr})",
            num(xs[i + 1]),
            segment_expression(&segments[i], &coord, xs[i])
        );
    }
    expr
}

fn segment_expression(seg: &CubicSegment, coord: &str, origin: f64) -> String {
    let u = format!("({coord}{})", signed_compact(-origin));
    format!(
        "({} + {u}*({} + {u}*({} + {u}*{})))",
        num(seg.a),
        num(seg.b),
        num(seg.c),
        num(seg.d)
    )
}

/// Shortest round-trip decimal; negatives parenthesized.
fn num(v: f64) -> String {
    if v < 0.0 { format!("({v})") } else { format!("{v}") }
}

/// ` + v` or ` - |v|`.
fn signed(v: f64) -> String {
    if v < 0.0 { format!(" - {}", -v) } else { format!(" + {v}") }
}

/// `+v` or `-|v|`, no spaces; empty for zero.
fn signed_compact(v: f64) -> String {
    if v == 0.0 {
        String::new()
    } else if v < 0.0 {
        format!("-{}", -v)
    } else {
        format!("+{v}")
    }
}
