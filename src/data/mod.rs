//! Demo data.
//!
//! - `synthetic`: seeded tile pairs with a known photometric relation

pub mod synthetic;

pub use synthetic::*;
