//! Export the sample grid to CSV.
//!
//! The export is meant to be easy to consume in spreadsheets or downstream scripts.

use std::fs::File;
use std::io::Write;
use std::path::Path;

use crate::compose::ChannelCorrection;
use crate::domain::SamplePair;
use crate::error::AppError;
use crate::report::compute_residuals;

/// Write one row per (sample, channel) with the final residuals.
pub fn write_samples_csv(
    path: &Path,
    samples: &[SamplePair],
    corrections: &[ChannelCorrection],
) -> Result<(), AppError> {
    let mut file = File::create(path)
        .map_err(|e| AppError::new(2, format!("Failed to create samples CSV '{}': {e}", path.display())))?;
    write_samples(&mut file, samples, corrections)
}

fn write_samples(out: &mut impl Write, samples: &[SamplePair], corrections: &[ChannelCorrection]) -> Result<(), AppError> {
    // Header
    writeln!(
        out,
        "index,channel,x,y,pixels,reference,target,linear_residual,residual,rejected"
    )
    .map_err(|e| AppError::new(2, format!("Failed to write samples CSV header: {e}")))?;

    for (channel, correction) in corrections.iter().enumerate() {
        for r in compute_residuals(samples, correction, channel)? {
            writeln!(
                out,
                "{},{},{:.2},{:.2},{},{:.8},{:.8},{:.8},{:.8},{}",
                r.index,
                channel,
                r.x,
                r.y,
                samples[r.index].pixel_count[channel],
                r.reference,
                r.target,
                r.linear_residual,
                r.residual,
                r.rejected
            )
            .map_err(|e| AppError::new(2, format!("Failed to write samples CSV row: {e}")))?;
        }
    }

    Ok(())
}
