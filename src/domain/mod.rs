//! Domain types used throughout the pipeline.
//!
//! This module defines:
//!
//! - pixel containers (`PixelImage`, `OverlapMask`) and star photometry (`StarRecord`)
//! - stage outputs (`SamplePair`, `LinearFit`, `MosaicResult`)
//! - run configuration (`MosaicConfig`) and its option enums

pub mod config;
pub mod types;

pub use config::*;
pub use types::*;
