//! Read/write correction parameter JSON files.
//!
//! The parameter file is the portable form of a solved mosaic:
//! - the configuration that produced it
//! - per-channel fit (scale, offset, mode, sample counts) and gradient knots
//! - the pixel-math expression of every channel, for the final apply step
//!
//! Splines are rebuilt from their knots on load, so a hand-edited file is
//! validated the same way as a freshly fitted curve.

use std::fs::File;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::compose::ChannelCorrection;
use crate::domain::{LinearFit, MosaicConfig};
use crate::error::{AppError, MosaicError};
use crate::fit::{GradientCurve, GradientSurface};
use crate::math::AkimaSpline;
use crate::report::channel_expression;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelParams {
    pub fit: LinearFit,
    pub gradient: GradientSurface,
    pub expression: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamsFile {
    pub tool: String,
    pub created: DateTime<Utc>,
    pub width: usize,
    pub height: usize,
    pub config: MosaicConfig,
    pub channels: Vec<ChannelParams>,
}

impl ParamsFile {
    pub fn new(config: &MosaicConfig, width: usize, height: usize, corrections: &[ChannelCorrection]) -> Self {
        Self {
            tool: "seam".to_string(),
            created: Utc::now(),
            width,
            height,
            config: config.clone(),
            channels: corrections
                .iter()
                .map(|c| ChannelParams {
                    fit: c.fit.clone(),
                    gradient: c.gradient.clone(),
                    expression: channel_expression(c),
                })
                .collect(),
        }
    }

    pub fn corrections(&self) -> Vec<ChannelCorrection> {
        self.channels
            .iter()
            .map(|c| ChannelCorrection {
                fit: c.fit.clone(),
                gradient: c.gradient.clone(),
            })
            .collect()
    }
}

/// Write a parameter JSON file.
pub fn write_params_json(path: &Path, params: &ParamsFile) -> Result<(), AppError> {
    let file = File::create(path)
        .map_err(|e| AppError::new(2, format!("Failed to create params JSON '{}': {e}", path.display())))?;
    serde_json::to_writer_pretty(file, params).map_err(|e| AppError::new(2, format!("Failed to write params JSON: {e}")))?;
    Ok(())
}

/// Read a parameter JSON file and re-validate its curves.
pub fn read_params_json(path: &Path) -> Result<ParamsFile, AppError> {
    let file = File::open(path)
        .map_err(|e| AppError::new(2, format!("Failed to open params JSON '{}': {e}", path.display())))?;
    let params: ParamsFile =
        serde_json::from_reader(file).map_err(|e| AppError::new(2, format!("Invalid params JSON: {e}")))?;
    Ok(revalidate(params)?)
}

fn revalidate(mut params: ParamsFile) -> Result<ParamsFile, MosaicError> {
    for (channel, c) in params.channels.iter_mut().enumerate() {
        for slot in [&mut c.gradient.x, &mut c.gradient.y] {
            if let Some(curve) = slot.take() {
                *slot = Some(rebuild(curve).map_err(|e| e.for_channel(channel))?);
            }
        }
    }
    Ok(params)
}

fn rebuild(curve: GradientCurve) -> Result<GradientCurve, MosaicError> {
    let spline = AkimaSpline::new(curve.spline.xs().to_vec(), curve.spline.ys().to_vec())?;
    Ok(GradientCurve {
        axis: curve.axis,
        spline,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Axis;

    fn correction() -> ChannelCorrection {
        let mut c = ChannelCorrection::identity(0);
        c.fit.scale = 1.2;
        c.fit.offset = 0.01;
        c.gradient.x = Some(GradientCurve {
            axis: Axis::X,
            spline: AkimaSpline::new(vec![0.0, 8.0, 16.0, 24.0, 32.0], vec![0.0, 0.1, 0.15, 0.1, 0.0]).unwrap(),
        });
        c
    }

    #[test]
    fn file_round_trips_through_disk() {
        let dir = std::env::temp_dir().join(format!("seam-params-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("params.json");

        let params = ParamsFile::new(&MosaicConfig::default(), 64, 32, &[correction()]);
        write_params_json(&path, &params).unwrap();
        let loaded = read_params_json(&path).unwrap();
        assert_eq!(loaded, params);
        assert_eq!(loaded.corrections()[0].gradient.knot_count(), 5);
        assert!(loaded.channels[0].expression.starts_with("1.2*$T + 0.01 + iif("));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn tampered_knots_are_rejected_on_load() {
        let params = ParamsFile::new(&MosaicConfig::default(), 64, 32, &[correction()]);
        let mut json = serde_json::to_value(&params).unwrap();
        json["channels"][0]["gradient"]["x"]["spline"]["xs"][2] = serde_json::json!(8.0);
        let tampered: ParamsFile = serde_json::from_value(json).unwrap();
        let err = revalidate(tampered).unwrap_err();
        assert!(matches!(err, MosaicError::DegenerateInterval { channel: 0, index: 1, .. }));
    }
}
