//! Sample extraction from the overlap region.
//!
//! - `grid`: the grid builder reducing cells to `SamplePair`s
//! - `rejection`: pixel rejection rules (saturation, star proximity)

pub mod grid;
pub mod rejection;

pub use grid::*;
pub use rejection::*;
