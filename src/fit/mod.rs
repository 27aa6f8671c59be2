//! Photometric fitting.
//!
//! - `linear`: robust `reference ≈ scale·target + offset` per channel, with the
//!   offset-only fallback
//! - `gradient`: residual gradient curves (Akima) per axis

pub mod gradient;
pub mod linear;

pub use gradient::*;
pub use linear::*;
