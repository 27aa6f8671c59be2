//! `tile-seam` library crate.
//!
//! Stitches two pixel-aligned tiles into one seamless mosaic: a robust
//! per-channel photometric match over the overlap, an Akima-spline residual
//! gradient, and a seam-aware compositor.
//!
//! The binary (`seam`) is a thin wrapper around this library so that:
//!
//! - core logic is testable without spawning processes
//! - the pipeline can be driven from other front-ends
//! - code stays easy to navigate as the project grows

pub mod app;
pub mod cache;
pub mod cli;
pub mod compose;
pub mod data;
pub mod debug;
pub mod domain;
pub mod error;
pub mod fit;
pub mod io;
pub mod logging;
pub mod math;
pub mod plot;
pub mod report;
pub mod sampling;
pub mod tui;
