//! Input/output helpers.
//!
//! - sample grid export to CSV (`export`)
//! - correction parameter JSON read/write (`params`)

pub mod export;
pub mod params;

pub use export::*;
pub use params::*;
