//! Mathematical utilities: robust statistics, line least squares, Akima spline.

pub mod akima;
pub mod ols;
pub mod stats;

pub use akima::*;
pub use ols::*;
pub use stats::*;
