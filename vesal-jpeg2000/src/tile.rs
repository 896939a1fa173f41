//! Geometry of the single-tile layout: resolution levels, subband
//! rectangles within the deinterleaved component plane, and code-block
//! grids.
//!
//! With the tile anchored at the reference-grid origin, every subband's
//! own coordinate system starts at (0, 0), so the code-block partition
//! is aligned with the subband rectangle.

use crate::codestream::CodingStyle;
use crate::dwt::level_dim;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum SubBandType {
    LowLow,
    HighLow,
    LowHigh,
    HighHigh,
}

impl SubBandType {
    /// log2 of the subband gain (Equation E-4).
    pub(crate) fn log_gain(self) -> u8 {
        match self {
            Self::LowLow => 0,
            Self::HighLow => 1,
            Self::LowHigh => 1,
            Self::HighHigh => 2,
        }
    }
}

/// One subband of one resolution level, located within the deinterleaved
/// component plane.
#[derive(Clone, Debug)]
pub(crate) struct SubBand {
    pub(crate) band_type: SubBandType,
    /// The resolution level the subband contributes to (0 for the last
    /// LL band).
    pub(crate) resolution: u8,
    /// Horizontal position of the subband in the component plane.
    pub(crate) plane_x: usize,
    /// Vertical position of the subband in the component plane.
    pub(crate) plane_y: usize,
    /// Width of the subband. May be zero for degenerate levels.
    pub(crate) width: usize,
    /// Height of the subband.
    pub(crate) height: usize,
    /// Number of code-blocks in the x direction.
    pub(crate) blocks_wide: u32,
    /// Number of code-blocks in the y direction.
    pub(crate) blocks_high: u32,
}

/// The position of one code-block inside its subband.
#[derive(Clone, Copy, Debug)]
pub(crate) struct CodeBlockRect {
    pub(crate) x_idx: u32,
    pub(crate) y_idx: u32,
    /// Band-relative origin.
    pub(crate) x0: usize,
    pub(crate) y0: usize,
    pub(crate) width: usize,
    pub(crate) height: usize,
}

impl SubBand {
    fn new(
        band_type: SubBandType,
        resolution: u8,
        plane_x: usize,
        plane_y: usize,
        width: usize,
        height: usize,
        coding: &CodingStyle,
    ) -> Self {
        let cb_width = coding.code_block_width() as usize;
        let cb_height = coding.code_block_height() as usize;

        let blocks_wide = if width == 0 {
            0
        } else {
            width.div_ceil(cb_width) as u32
        };
        let blocks_high = if height == 0 {
            0
        } else {
            height.div_ceil(cb_height) as u32
        };

        Self {
            band_type,
            resolution,
            plane_x,
            plane_y,
            width,
            height,
            blocks_wide,
            blocks_high,
        }
    }

    /// The code-block at grid position `(x_idx, y_idx)`, clipped to the
    /// subband rectangle.
    pub(crate) fn code_block(&self, x_idx: u32, y_idx: u32, coding: &CodingStyle) -> CodeBlockRect {
        let cb_width = coding.code_block_width() as usize;
        let cb_height = coding.code_block_height() as usize;

        let x0 = x_idx as usize * cb_width;
        let y0 = y_idx as usize * cb_height;

        CodeBlockRect {
            x_idx,
            y_idx,
            x0,
            y0,
            width: cb_width.min(self.width - x0),
            height: cb_height.min(self.height - y0),
        }
    }
}

/// One resolution level: a single LL band for resolution 0, the HL/LH/HH
/// triple of one decomposition level otherwise.
#[derive(Clone, Debug)]
pub(crate) struct Resolution {
    pub(crate) bands: Vec<SubBand>,
}

/// Build the resolution/subband geometry of a `width`x`height` component
/// plane decomposed `coding.levels` times.
pub(crate) fn build_resolutions(
    width: usize,
    height: usize,
    coding: &CodingStyle,
) -> Vec<Resolution> {
    let levels = coding.levels;
    let mut resolutions = Vec::with_capacity(levels as usize + 1);

    resolutions.push(Resolution {
        bands: vec![SubBand::new(
            SubBandType::LowLow,
            0,
            0,
            0,
            level_dim(width, levels),
            level_dim(height, levels),
            coding,
        )],
    });

    for resolution in 1..=levels {
        // Resolution r is produced by decomposition level L - r + 1.
        let level = levels - resolution + 1;

        let low_w = level_dim(width, level);
        let low_h = level_dim(height, level);
        let full_w = level_dim(width, level - 1);
        let full_h = level_dim(height, level - 1);

        let bands = vec![
            SubBand::new(
                SubBandType::HighLow,
                resolution,
                low_w,
                0,
                full_w - low_w,
                low_h,
                coding,
            ),
            SubBand::new(
                SubBandType::LowHigh,
                resolution,
                0,
                low_h,
                low_w,
                full_h - low_h,
                coding,
            ),
            SubBand::new(
                SubBandType::HighHigh,
                resolution,
                low_w,
                low_h,
                full_w - low_w,
                full_h - low_h,
                coding,
            ),
        ];

        resolutions.push(Resolution { bands });
    }

    resolutions
}

#[cfg(test)]
mod tests {
    use super::{SubBandType, build_resolutions};
    use crate::codestream::{
        CodeBlockStyle, CodingStyle, ProgressionOrder, WaveletTransform,
    };

    fn coding(levels: u8) -> CodingStyle {
        CodingStyle {
            progression_order: ProgressionOrder::Lrcp,
            num_layers: 1,
            mct: false,
            uses_sop: false,
            uses_eph: false,
            levels,
            code_block_width_log2: 6,
            code_block_height_log2: 6,
            code_block_style: CodeBlockStyle::default(),
            transform: WaveletTransform::Reversible53,
            precinct_exponents: vec![(15, 15); levels as usize + 1],
        }
    }

    #[test]
    fn band_count_matches_levels() {
        for levels in 0..6 {
            let resolutions = build_resolutions(100, 80, &coding(levels));
            let bands: usize = resolutions.iter().map(|r| r.bands.len()).sum();

            assert_eq!(bands, 1 + 3 * levels as usize);
        }
    }

    #[test]
    fn subbands_tile_the_plane() {
        // Every plane position belongs to exactly one subband.
        let (width, height) = (101, 57);
        let resolutions = build_resolutions(width, height, &coding(3));
        let mut covered = vec![0u8; width * height];

        for resolution in &resolutions {
            for band in &resolution.bands {
                for y in 0..band.height {
                    for x in 0..band.width {
                        covered[(band.plane_y + y) * width + band.plane_x + x] += 1;
                    }
                }
            }
        }

        assert!(covered.iter().all(|&c| c == 1));
    }

    #[test]
    fn odd_dimensions_split_ceiling_to_low() {
        let resolutions = build_resolutions(5, 5, &coding(1));

        let hl = &resolutions[1].bands[0];
        assert_eq!(hl.band_type, SubBandType::HighLow);
        assert_eq!((hl.width, hl.height), (2, 3));

        let lh = &resolutions[1].bands[1];
        assert_eq!((lh.width, lh.height), (3, 2));
    }

    #[test]
    fn code_block_clipping() {
        let style = coding(0);
        let resolutions = build_resolutions(100, 70, &style);
        let ll = &resolutions[0].bands[0];

        assert_eq!((ll.blocks_wide, ll.blocks_high), (2, 2));

        let edge = ll.code_block(1, 1, &style);
        assert_eq!((edge.x0, edge.y0), (64, 64));
        assert_eq!((edge.width, edge.height), (36, 6));
    }
}
