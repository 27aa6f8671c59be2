//! Least squares for the photometric line `reference ≈ scale·target + offset`.
//!
//! The fit engine solves the same two-column problem once per rejection
//! iteration, so this module owns both the degeneracy guard and the solve:
//!
//! - the target variance is checked against a relative epsilon *before*
//!   solving, so a flat target reports "degenerate" instead of a huge slope
//! - the solve itself goes through SVD with a tolerance ladder, and any
//!   non-finite coefficient is treated as a failed solve

use nalgebra::{DMatrix, DVector};

/// Relative variance below which the target is considered constant.
pub const DEGENERATE_VARIANCE: f64 = 1e-12;

/// Result of a two-parameter line fit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LineFit {
    pub slope: f64,
    pub intercept: f64,
}

/// Why a line could not be fit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineFitFailure {
    TooFewPoints,
    /// `x` has (numerically) zero variance.
    ZeroVariance,
    /// The normal equations are singular or produced non-finite values.
    Singular,
}

/// Solve a least squares problem using SVD.
///
/// Returns `None` if the system is too ill-conditioned to solve robustly.
pub fn solve_least_squares(x: &DMatrix<f64>, y: &DVector<f64>) -> Option<DVector<f64>> {
    let svd = x.clone().svd(true, true);

    // Try progressively looser tolerances if strict solve fails.
    for &tol in &[1e-12, 1e-10, 1e-8] {
        if let Ok(beta) = svd.solve(y, tol) {
            if beta.iter().all(|v| v.is_finite()) {
                return Some(beta);
            }
        }
    }

    None
}

/// Population variance of `x` relative to its magnitude is below
/// [`DEGENERATE_VARIANCE`].
pub fn has_degenerate_variance(x: &[f64]) -> bool {
    if x.len() < 2 {
        return true;
    }
    let n = x.len() as f64;
    let mean = x.iter().sum::<f64>() / n;
    let var = x.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / n;
    var <= DEGENERATE_VARIANCE * (1.0 + mean * mean)
}

/// Fit `y ≈ slope·x + intercept` over the points selected by `idx`.
pub fn fit_line(x: &[f64], y: &[f64], idx: &[usize]) -> Result<LineFit, LineFitFailure> {
    if idx.len() < 2 {
        return Err(LineFitFailure::TooFewPoints);
    }
    let xs: Vec<f64> = idx.iter().map(|&i| x[i]).collect();
    if has_degenerate_variance(&xs) {
        return Err(LineFitFailure::ZeroVariance);
    }

    // Center x so the two columns are orthogonal; keeps the SVD well
    // conditioned for sensor-native values (~1e4) with small spreads.
    let n = xs.len();
    let x_mean = xs.iter().sum::<f64>() / n as f64;
    let mut design = DMatrix::<f64>::zeros(n, 2);
    let mut rhs = DVector::<f64>::zeros(n);
    for (row, &i) in idx.iter().enumerate() {
        design[(row, 0)] = 1.0;
        design[(row, 1)] = x[i] - x_mean;
        rhs[row] = y[i];
    }

    let beta = solve_least_squares(&design, &rhs).ok_or(LineFitFailure::Singular)?;
    let slope = beta[1];
    let intercept = beta[0] - slope * x_mean;
    if !(slope.is_finite() && intercept.is_finite()) {
        return Err(LineFitFailure::Singular);
    }
    Ok(LineFit { slope, intercept })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn least_squares_solves_simple_system() {
        // Fit y = 2 + 3x on x = [0,1,2]
        let x = DMatrix::from_row_slice(3, 2, &[1.0, 0.0, 1.0, 1.0, 1.0, 2.0]);
        let y = DVector::from_row_slice(&[2.0, 5.0, 8.0]);

        let beta = solve_least_squares(&x, &y).unwrap();
        assert!((beta[0] - 2.0).abs() < 1e-10);
        assert!((beta[1] - 3.0).abs() < 1e-10);
    }

    #[test]
    fn fit_line_recovers_exact_line() {
        let x: Vec<f64> = (0..10).map(|i| 1000.0 + i as f64 * 0.5).collect();
        let y: Vec<f64> = x.iter().map(|v| 2.0 * v + 5.0).collect();
        let idx: Vec<usize> = (0..x.len()).collect();
        let fit = fit_line(&x, &y, &idx).unwrap();
        assert!((fit.slope - 2.0).abs() < 1e-9);
        assert!((fit.intercept - 5.0).abs() < 1e-6);
    }

    #[test]
    fn constant_x_is_zero_variance() {
        let x = [40.0; 6];
        let y = [100.0; 6];
        let idx: Vec<usize> = (0..6).collect();
        assert_eq!(fit_line(&x, &y, &idx), Err(LineFitFailure::ZeroVariance));
    }

    #[test]
    fn near_constant_x_is_guarded() {
        let x = [1.0e4, 1.0e4 + 1e-9, 1.0e4, 1.0e4 - 1e-9];
        let y = [1.0, 2.0, 3.0, 4.0];
        let idx: Vec<usize> = (0..4).collect();
        assert_eq!(fit_line(&x, &y, &idx), Err(LineFitFailure::ZeroVariance));
    }

    #[test]
    fn single_point_is_too_few() {
        assert_eq!(fit_line(&[1.0], &[2.0], &[0]), Err(LineFitFailure::TooFewPoints));
    }
}
