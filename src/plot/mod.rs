//! Terminal plots of gradient curves and their residual samples.

pub mod ascii;

pub use ascii::*;
