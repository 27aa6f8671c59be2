//! Sample grid builder.
//!
//! A regular grid of `cell_size` squares is laid over the bounding box of the
//! overlap mask. Each cell gathers the in-mask, non-rejected pixels of both
//! tiles and reduces them to one robust value per channel and tile. Only one
//! cell's pixels are held at a time; the scratch buffers are reused.

use log::debug;

use crate::domain::{CellStatistic, MosaicConfig, OverlapMask, PixelImage, SamplePair};
use crate::error::{MosaicError, Stage};
use crate::math::{median_mut, sigma_clipped_mean};
use crate::sampling::PixelRejection;

/// Options for the grid builder (a view of `MosaicConfig`).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridOptions {
    pub cell_size: usize,
    pub statistic: CellStatistic,
    pub clip_sigma: f64,
    pub clip_iterations: usize,
    pub min_pixels: usize,
}

impl From<&MosaicConfig> for GridOptions {
    fn from(config: &MosaicConfig) -> Self {
        Self {
            cell_size: config.cell_size,
            statistic: config.cell_statistic,
            clip_sigma: config.cell_clip_sigma,
            clip_iterations: config.cell_clip_iterations,
            min_pixels: config.min_pixels_per_cell,
        }
    }
}

impl GridOptions {
    fn reduce(&self, values: &mut [f64]) -> Option<f64> {
        match self.statistic {
            CellStatistic::Median => median_mut(values),
            CellStatistic::SigmaClippedMean => sigma_clipped_mean(values, self.clip_sigma, self.clip_iterations),
        }
    }
}

/// Reduce the overlap of `reference` and `target` to sample pairs.
///
/// Cells are visited row-major; cells with fewer than `min_pixels` gathered
/// pixels are omitted. Fails with `InsufficientData` when the mask is empty.
pub fn build_sample_grid(
    reference: &PixelImage,
    target: &PixelImage,
    mask: &OverlapMask,
    rejection: &dyn PixelRejection,
    opts: &GridOptions,
) -> Result<Vec<SamplePair>, MosaicError> {
    reference.check_same_dims(target, "target tile")?;
    if (mask.width(), mask.height()) != (reference.width(), reference.height()) {
        return Err(MosaicError::DimensionMismatch {
            what: "overlap mask",
            expected: (reference.width(), reference.height(), 1),
            actual: (mask.width(), mask.height(), 1),
        });
    }
    if opts.cell_size == 0 {
        return Err(MosaicError::config("cell_size", "must be > 0"));
    }
    if opts.min_pixels == 0 {
        return Err(MosaicError::config("min_pixels_per_cell", "must be >= 1"));
    }

    let Some(bbox) = mask.bounding_box() else {
        return Err(MosaicError::InsufficientData {
            stage: Stage::Sampling,
            channel: 0,
            needed: 1,
            found: 0,
        });
    };

    let channels = reference.channels();
    let mut ref_values: Vec<Vec<f64>> = vec![Vec::with_capacity(opts.cell_size * opts.cell_size); channels];
    let mut tgt_values: Vec<Vec<f64>> = vec![Vec::with_capacity(opts.cell_size * opts.cell_size); channels];
    let mut ref_px = vec![0.0_f32; channels];
    let mut tgt_px = vec![0.0_f32; channels];

    let mut samples = Vec::new();
    let mut sparse_cells = 0usize;

    for cy in (bbox.y0..bbox.y1).step_by(opts.cell_size) {
        let cy_end = (cy + opts.cell_size).min(bbox.y1);
        for cx in (bbox.x0..bbox.x1).step_by(opts.cell_size) {
            let cx_end = (cx + opts.cell_size).min(bbox.x1);

            for buf in ref_values.iter_mut().chain(tgt_values.iter_mut()) {
                buf.clear();
            }

            for y in cy..cy_end {
                for x in cx..cx_end {
                    if !mask.contains(x, y) {
                        continue;
                    }
                    for c in 0..channels {
                        ref_px[c] = reference.get(x, y, c);
                        tgt_px[c] = target.get(x, y, c);
                    }
                    if ref_px.iter().chain(tgt_px.iter()).any(|v| !v.is_finite()) {
                        continue;
                    }
                    if rejection.is_rejected(x, y, &ref_px, &tgt_px) {
                        continue;
                    }
                    for c in 0..channels {
                        ref_values[c].push(ref_px[c] as f64);
                        tgt_values[c].push(tgt_px[c] as f64);
                    }
                }
            }

            let gathered = ref_values.first().map_or(0, Vec::len);
            if gathered < opts.min_pixels {
                if gathered > 0 {
                    sparse_cells += 1;
                }
                continue;
            }

            let mut pair = SamplePair {
                x: (cx + cx_end - 1) as f64 * 0.5,
                y: (cy + cy_end - 1) as f64 * 0.5,
                reference: Vec::with_capacity(channels),
                target: Vec::with_capacity(channels),
                pixel_count: Vec::with_capacity(channels),
                valid: true,
            };
            for c in 0..channels {
                pair.pixel_count.push(ref_values[c].len());
                match (opts.reduce(&mut ref_values[c]), opts.reduce(&mut tgt_values[c])) {
                    (Some(r), Some(t)) => {
                        pair.reference.push(r);
                        pair.target.push(t);
                    }
                    _ => {
                        pair.valid = false;
                        break;
                    }
                }
            }
            if pair.valid {
                samples.push(pair);
            }
        }
    }

    debug!(
        "sample grid: {} cells kept, {} below {} pixels (cell={}px, bbox={}x{})",
        samples.len(),
        sparse_cells,
        opts.min_pixels,
        opts.cell_size,
        bbox.width(),
        bbox.height()
    );

    Ok(samples)
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    use super::*;
    use crate::sampling::AcceptAll;

    fn opts(cell_size: usize, min_pixels: usize) -> GridOptions {
        GridOptions {
            cell_size,
            statistic: CellStatistic::Median,
            clip_sigma: 3.0,
            clip_iterations: 5,
            min_pixels,
        }
    }

    #[test]
    fn full_overlap_single_cell() {
        let reference = PixelImage::filled(8, 8, 3, 100.0);
        let target = PixelImage::filled(8, 8, 3, 40.0);
        let mask = OverlapMask::full(8, 8);
        let samples = build_sample_grid(&reference, &target, &mask, &AcceptAll, &opts(16, 1)).unwrap();

        assert_eq!(samples.len(), 1);
        let s = &samples[0];
        assert_eq!((s.x, s.y), (3.5, 3.5));
        assert_eq!(s.reference, vec![100.0; 3]);
        // Zero-variance target cell is still a valid sample.
        assert_eq!(s.target, vec![40.0; 3]);
        assert_eq!(s.pixel_count, vec![64; 3]);
        assert!(s.valid);
    }

    #[test]
    fn grid_starts_at_mask_bounding_box() {
        let reference = PixelImage::filled(20, 10, 1, 1.0);
        let target = PixelImage::filled(20, 10, 1, 1.0);
        let mask = OverlapMask::from_fn(20, 10, |x, _| x >= 12);
        let samples = build_sample_grid(&reference, &target, &mask, &AcceptAll, &opts(4, 1)).unwrap();

        // Columns 12..16 and 16..20, rows 0..4, 4..8, 8..10.
        assert_eq!(samples.len(), 6);
        assert_eq!(samples[0].x, 13.5);
        assert_eq!(samples[1].x, 17.5);
        assert_eq!(samples[4].y, 8.5);
        assert_eq!(samples[4].pixel_count, vec![8]);
    }

    #[test]
    fn cells_outside_mask_are_omitted() {
        let reference = PixelImage::filled(16, 16, 1, 1.0);
        let target = PixelImage::filled(16, 16, 1, 1.0);
        // Two disjoint squares: the bounding box covers empty cells between them.
        let mask = OverlapMask::from_fn(16, 16, |x, y| (x < 4 && y < 4) || (x >= 12 && y >= 12));
        let samples = build_sample_grid(&reference, &target, &mask, &AcceptAll, &opts(4, 1)).unwrap();
        assert_eq!(samples.len(), 2);
    }

    #[test]
    fn median_ignores_hot_pixel() {
        let mut reference = PixelImage::filled(5, 5, 1, 10.0);
        let target = PixelImage::filled(5, 5, 1, 5.0);
        reference.set(2, 2, 0, 60000.0);
        let mask = OverlapMask::full(5, 5);
        let samples = build_sample_grid(&reference, &target, &mask, &AcceptAll, &opts(5, 1)).unwrap();
        assert_eq!(samples[0].reference, vec![10.0]);
    }

    #[test]
    fn sigma_clipped_mean_statistic() {
        let mut reference = PixelImage::filled(6, 6, 1, 10.0);
        for x in 0..6 {
            reference.set(x, 0, 0, 11.0);
        }
        reference.set(3, 3, 0, 1000.0);
        let target = PixelImage::filled(6, 6, 1, 5.0);
        let mask = OverlapMask::full(6, 6);
        let mut o = opts(6, 1);
        o.statistic = CellStatistic::SigmaClippedMean;
        let samples = build_sample_grid(&reference, &target, &mask, &AcceptAll, &o).unwrap();
        // 6 pixels at 11, 29 at 10 once the 1000 is clipped.
        let expected = (6.0 * 11.0 + 29.0 * 10.0) / 35.0;
        assert!((samples[0].reference[0] - expected).abs() < 1e-9);
    }

    #[test]
    fn rejected_and_non_finite_pixels_do_not_count() {
        let mut reference = PixelImage::filled(4, 4, 1, 1.0);
        reference.set(0, 0, 0, f32::NAN);
        let target = PixelImage::filled(4, 4, 1, 1.0);
        let mask = OverlapMask::full(4, 4);
        let reject_row = |_x: usize, y: usize, _r: &[f32], _t: &[f32]| y == 3;
        let samples = build_sample_grid(&reference, &target, &mask, &reject_row, &opts(4, 1)).unwrap();
        assert_eq!(samples[0].pixel_count, vec![11]);

        let none = build_sample_grid(&reference, &target, &mask, &reject_row, &opts(4, 12)).unwrap();
        assert!(none.is_empty());
    }

    #[test]
    fn empty_mask_is_insufficient_data() {
        let img = PixelImage::filled(4, 4, 1, 1.0);
        let err = build_sample_grid(&img, &img, &OverlapMask::empty(4, 4), &AcceptAll, &opts(2, 1)).unwrap_err();
        assert!(matches!(
            err,
            MosaicError::InsufficientData {
                stage: Stage::Sampling,
                ..
            }
        ));
    }

    #[test]
    fn mismatched_tiles_are_rejected() {
        let a = PixelImage::filled(4, 4, 1, 1.0);
        let b = PixelImage::filled(4, 5, 1, 1.0);
        let err = build_sample_grid(&a, &b, &OverlapMask::full(4, 4), &AcceptAll, &opts(2, 1)).unwrap_err();
        assert!(matches!(err, MosaicError::DimensionMismatch { .. }));
    }

    proptest! {
        #[test]
        fn emitted_pairs_meet_min_pixel_count(
            width in 4usize..40,
            height in 4usize..40,
            cell_size in 1usize..12,
            min_pixels in 1usize..24,
            density in 0.05f64..1.0,
            seed in any::<u64>(),
        ) {
            let mut rng = StdRng::seed_from_u64(seed);
            let mask = {
                let bits: Vec<bool> = (0..width * height).map(|_| rng.gen_bool(density)).collect();
                OverlapMask::from_fn(width, height, |x, y| bits[y * width + x])
            };
            let reference = PixelImage::filled(width, height, 2, 3.0);
            let target = PixelImage::filled(width, height, 2, 1.5);
            let o = opts(cell_size, min_pixels);

            match build_sample_grid(&reference, &target, &mask, &AcceptAll, &o) {
                Ok(samples) => {
                    for s in &samples {
                        prop_assert!(s.valid);
                        for &count in &s.pixel_count {
                            prop_assert!(count >= min_pixels);
                            prop_assert!(count <= cell_size * cell_size);
                        }
                    }
                }
                Err(MosaicError::InsufficientData { .. }) => prop_assert_eq!(mask.count(), 0),
                Err(other) => prop_assert!(false, "unexpected error: {other}"),
            }
        }
    }
}
