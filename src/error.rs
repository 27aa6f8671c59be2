//! Error types.
//!
//! - `MosaicError` is the library error: every pipeline stage validates its own
//!   preconditions and fails with one of these instead of emitting NaN/∞.
//! - `AppError` is the binary's error: a message plus a process exit code.

use std::fmt;

use thiserror::Error;

/// Pipeline stage an error originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Sampling,
    LinearFit,
    Gradient,
    Composite,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Sampling => "sample grid",
            Stage::LinearFit => "linear fit",
            Stage::Gradient => "gradient model",
            Stage::Composite => "compositor",
        };
        f.write_str(name)
    }
}

/// Errors produced by the mosaic pipeline.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum MosaicError {
    #[error("{stage}: not enough data for channel {channel} (need {needed}, found {found})")]
    InsufficientData {
        stage: Stage,
        channel: usize,
        needed: usize,
        found: usize,
    },

    #[error("linear fit for channel {channel} is degenerate: {reason}")]
    DegenerateFit { channel: usize, reason: String },

    #[error("gradient knots {index} and {} of channel {channel} are degenerate ({left} vs {right})", .index + 1)]
    DegenerateInterval {
        channel: usize,
        index: usize,
        left: f64,
        right: f64,
    },

    #[error("invalid configuration for '{option}': {reason}")]
    InvalidConfiguration { option: &'static str, reason: String },

    #[error("dimension mismatch for {what}: expected {expected:?}, got {actual:?}")]
    DimensionMismatch {
        what: &'static str,
        expected: (usize, usize, usize),
        actual: (usize, usize, usize),
    },

    #[error("{stage}: channel {channel} is invalid: {reason}")]
    InvalidChannel {
        stage: Stage,
        channel: usize,
        reason: String,
    },

    #[error("cancelled after {completed_channels} channel(s)")]
    Cancelled { completed_channels: usize },
}

impl MosaicError {
    pub(crate) fn config(option: &'static str, reason: impl Into<String>) -> Self {
        MosaicError::InvalidConfiguration {
            option,
            reason: reason.into(),
        }
    }

    /// Channel the error refers to, when there is one.
    pub fn channel(&self) -> Option<usize> {
        match self {
            MosaicError::InsufficientData { channel, .. }
            | MosaicError::DegenerateFit { channel, .. }
            | MosaicError::DegenerateInterval { channel, .. }
            | MosaicError::InvalidChannel { channel, .. } => Some(*channel),
            _ => None,
        }
    }

    /// Re-tag a channel-agnostic error (e.g. from the spline) with its channel.
    pub(crate) fn for_channel(self, channel: usize) -> Self {
        match self {
            MosaicError::InsufficientData {
                stage,
                needed,
                found,
                ..
            } => MosaicError::InsufficientData {
                stage,
                channel,
                needed,
                found,
            },
            MosaicError::DegenerateFit { reason, .. } => MosaicError::DegenerateFit { channel, reason },
            MosaicError::DegenerateInterval {
                index, left, right, ..
            } => MosaicError::DegenerateInterval {
                channel,
                index,
                left,
                right,
            },
            MosaicError::InvalidChannel { stage, reason, .. } => MosaicError::InvalidChannel {
                stage,
                channel,
                reason,
            },
            other => other,
        }
    }

    /// Process exit code used by the `seam` binary.
    pub fn exit_code(&self) -> u8 {
        match self {
            MosaicError::InvalidConfiguration { .. } | MosaicError::DimensionMismatch { .. } => 2,
            MosaicError::InsufficientData { .. } => 3,
            MosaicError::DegenerateFit { .. }
            | MosaicError::DegenerateInterval { .. }
            | MosaicError::InvalidChannel { .. } => 4,
            MosaicError::Cancelled { .. } => 130,
        }
    }
}

#[derive(Clone)]
pub struct AppError {
    exit_code: u8,
    message: String,
}

impl AppError {
    pub fn new(exit_code: u8, message: impl Into<String>) -> Self {
        Self {
            exit_code,
            message: message.into(),
        }
    }

    pub fn exit_code(&self) -> u8 {
        self.exit_code
    }
}

impl From<MosaicError> for AppError {
    fn from(err: MosaicError) -> Self {
        AppError::new(err.exit_code(), err.to_string())
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::fmt::Debug for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppError")
            .field("exit_code", &self.exit_code)
            .field("message", &self.message)
            .finish()
    }
}

impl std::error::Error for AppError {}
