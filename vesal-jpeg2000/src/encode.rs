//! The frame encoding pipeline: component extraction, forward component
//! and wavelet transforms, quantization, code-block coding and
//! codestream assembly.

use crate::bitplane::{self, BlockCoder};
use crate::codestream::{
    CodeBlockStyle, CodestreamHeader, CodingStyle, ComponentSize, QuantizationInfo,
    QuantizationStyle, SizeData, StepSize, WaveletTransform, markers, write_main_header,
};
use crate::error::EncodeError;
use crate::packet::{EncodedBlock, write_packet};
use crate::progression::packet_sequence;
use crate::tile::{Resolution, SubBand, build_resolutions};
use crate::writer::Writer;
use crate::{EncoderOptions, ImageInfo, dwt, mct};

/// Guard bits emitted in the QCD segment.
const GUARD_BITS: u8 = 2;

/// Encode one frame into a complete codestream.
pub(crate) fn encode_frame(
    pixels: &[u8],
    info: &ImageInfo,
    options: &EncoderOptions,
    lossless: bool,
) -> Result<Vec<u8>, EncodeError> {
    options.validate()?;
    info.validate().map_err(EncodeError::InvalidImage)?;

    if pixels.len() < info.frame_size() {
        return Err(EncodeError::InvalidImage(
            "pixel buffer is smaller than the frame",
        ));
    }

    let width = info.columns as usize;
    let height = info.rows as usize;

    if width > 32768 || height > 32768 {
        return Err(EncodeError::InvalidImage(
            "frame exceeds the single-precinct profile",
        ));
    }

    let transform = if lossless {
        WaveletTransform::Reversible53
    } else {
        WaveletTransform::Irreversible97
    };

    let coding = CodingStyle {
        progression_order: options.progression_order,
        num_layers: options.num_layers,
        mct: info.samples_per_pixel == 3,
        uses_sop: false,
        uses_eph: false,
        levels: options.decomposition_levels,
        code_block_width_log2: options.code_block_width.ilog2() as u8,
        code_block_height_log2: options.code_block_height.ilog2() as u8,
        code_block_style: CodeBlockStyle::default(),
        transform,
        precinct_exponents: vec![(15, 15); options.decomposition_levels as usize + 1],
    };

    // Component extraction with the DC level shift, then the forward
    // component and wavelet transforms.
    let mut planes = extract_planes(pixels, info);

    if coding.mct {
        let (first, rest) = planes.split_at_mut(1);
        let (second, third) = rest.split_at_mut(1);
        mct::apply_forward(transform, &mut first[0], &mut second[0], &mut third[0]);
    }

    for plane in &mut planes {
        dwt::forward(plane, width, height, coding.levels, transform);
    }

    let resolutions = build_resolutions(width, height, &coding);
    let quantizers = band_quantizers(&resolutions, &planes, info, options, lossless, width);

    let quantization = QuantizationInfo {
        style: if lossless {
            QuantizationStyle::None
        } else {
            QuantizationStyle::ScalarExpounded
        },
        guard_bits: GUARD_BITS,
        step_sizes: quantizers.iter().map(|q| q.step_size).collect(),
    };

    let header = CodestreamHeader {
        size: SizeData {
            grid_width: info.columns,
            grid_height: info.rows,
            image_x_offset: 0,
            image_y_offset: 0,
            tile_width: info.columns,
            tile_height: info.rows,
            tile_x_offset: 0,
            tile_y_offset: 0,
            components: vec![
                ComponentSize {
                    precision: info.bits_stored,
                    signed: info.signed,
                    horizontal_subsampling: 1,
                    vertical_subsampling: 1,
                };
                info.samples_per_pixel as usize
            ],
        },
        coding,
        quantization,
    };

    // Entropy-code every code-block of every subband and component.
    let mut coder = BlockCoder::default();
    let mut band_blocks: Vec<Vec<Vec<Vec<EncodedBlock>>>> = Vec::new();

    for plane in &planes {
        let mut per_resolution = Vec::new();
        let mut quantizer_idx = 0;

        for resolution in &resolutions {
            let mut per_band = Vec::new();

            for band in &resolution.bands {
                per_band.push(encode_band(
                    band,
                    plane,
                    width,
                    &header.coding,
                    &quantizers[quantizer_idx],
                    &mut coder,
                ));
                quantizer_idx += 1;
            }

            per_resolution.push(per_band);
        }

        band_blocks.push(per_resolution);
    }

    // Assemble the codestream: main header, one tile-part, packets in
    // progression order, EOC.
    let mut writer = Writer::new();
    write_main_header(&mut writer, &header);

    let sot_offset = writer.len();
    let mut sot = Writer::new();
    sot.write_u16(0); // Isot: tile index.
    sot.write_u32(0); // Psot: patched below.
    sot.write_byte(0); // TPsot: first tile-part.
    sot.write_byte(1); // TNsot: one tile-part.
    writer.write_segment(markers::SOT, &sot.finish());
    writer.write_marker(markers::SOD);

    let sequence = packet_sequence(
        header.coding.progression_order,
        header.coding.num_layers,
        header.coding.levels + 1,
        info.samples_per_pixel as u16,
    );

    for slot in sequence {
        if slot.layer == 0 {
            write_packet(
                &mut writer,
                &resolutions[slot.resolution as usize],
                &band_blocks[slot.component as usize][slot.resolution as usize],
            );
        } else {
            // All coding passes live in the first layer; the remaining
            // layers carry empty packets.
            writer.write_byte(0x00);
        }
    }

    let psot = (writer.len() - sot_offset) as u32;
    writer.patch_u32(sot_offset + 6, psot);

    writer.write_marker(markers::EOC);

    Ok(writer.finish())
}

/// Read the caller's samples into per-component `f32` planes, applying
/// the DC level shift to unsigned data.
fn extract_planes(pixels: &[u8], info: &ImageInfo) -> Vec<Vec<f32>> {
    let width = info.columns as usize;
    let height = info.rows as usize;
    let samples_per_pixel = info.samples_per_pixel as usize;

    let dc_offset = if info.signed {
        0
    } else {
        1i64 << (info.bits_stored - 1)
    };

    (0..samples_per_pixel)
        .map(|component| {
            let mut plane = vec![0.0f32; width * height];

            for y in 0..height {
                for x in 0..width {
                    let sample_index = if info.planar {
                        component * width * height + y * width + x
                    } else {
                        (y * width + x) * samples_per_pixel + component
                    };

                    let value = read_sample(pixels, sample_index, info);
                    plane[y * width + x] = (value as i64 - dc_offset) as f32;
                }
            }

            plane
        })
        .collect()
}

#[inline]
fn read_sample(pixels: &[u8], index: usize, info: &ImageInfo) -> i32 {
    match (info.bytes_per_sample, info.signed) {
        (1, false) => pixels[index] as i32,
        (1, true) => pixels[index] as i8 as i32,
        (2, false) => {
            u16::from_le_bytes([pixels[index * 2], pixels[index * 2 + 1]]) as i32
        }
        (2, true) => i16::from_le_bytes([pixels[index * 2], pixels[index * 2 + 1]]) as i32,
        _ => i32::from_le_bytes([
            pixels[index * 4],
            pixels[index * 4 + 1],
            pixels[index * 4 + 2],
            pixels[index * 4 + 3],
        ]),
    }
}

/// Per-subband quantization parameters, in QCD signalling order.
struct BandQuantizer {
    step_size: StepSize,
    /// The reconstructed step, `None` on the reversible path.
    delta: Option<f32>,
    /// The full bit budget Mb of the subband.
    num_bitplanes: u8,
}

/// Derive the quantizer of every subband. The reversible path signals
/// exponents wide enough for the observed coefficient range; the
/// irreversible path derives steps from the compression-ratio target,
/// wider for finer resolution levels.
fn band_quantizers(
    resolutions: &[Resolution],
    planes: &[Vec<f32>],
    info: &ImageInfo,
    options: &EncoderOptions,
    lossless: bool,
    plane_width: usize,
) -> Vec<BandQuantizer> {
    let mut quantizers = Vec::new();

    for resolution in resolutions {
        for band in &resolution.bands {
            let dynamic_range = info.bits_stored as i32 + band.band_type.log_gain() as i32;

            if lossless {
                // Two guard bits always cover the observed range.
                let mut max_magnitude = 0u32;
                for plane in planes {
                    for y in 0..band.height {
                        for x in 0..band.width {
                            let value =
                                plane[(band.plane_y + y) * plane_width + band.plane_x + x];
                            max_magnitude = max_magnitude.max(value.abs() as u32);
                        }
                    }
                }

                let bits_needed = 32 - max_magnitude.leading_zeros();
                // Capped so the bit budget Mb stays within the coder's
                // 31-plane ceiling.
                let exponent =
                    (dynamic_range.max(bits_needed as i32 - 1)).clamp(1, 30) as u8;

                quantizers.push(BandQuantizer {
                    step_size: StepSize {
                        exponent,
                        mantissa: 0,
                    },
                    delta: None,
                    num_bitplanes: GUARD_BITS + exponent - 1,
                });
            } else {
                let base = (options.compression_ratio as f32 / 8.0).max(1.0 / 256.0);
                let delta = base * 2.0f32.powi(band.resolution.saturating_sub(1) as i32);

                let e = delta.log2().floor() as i32;
                let mut exponent = dynamic_range - e;
                let mut mantissa = ((delta / 2.0f32.powi(e) - 1.0) * 2048.0).round() as i32;

                if mantissa >= 2048 {
                    mantissa = 0;
                    exponent -= 1;
                }

                let exponent = exponent.clamp(0, 31) as u8;
                let mantissa = mantissa.clamp(0, 2047) as u16;

                // Quantize with the step the decoder will reconstruct.
                let reconstructed = 2.0f32.powi(dynamic_range - exponent as i32)
                    * (1.0 + mantissa as f32 / 2048.0);

                quantizers.push(BandQuantizer {
                    step_size: StepSize { exponent, mantissa },
                    delta: Some(reconstructed),
                    num_bitplanes: (GUARD_BITS as i32 + exponent as i32 - 1).clamp(1, 31)
                        as u8,
                });
            }
        }
    }

    quantizers
}

/// Quantize and entropy-code every code-block of one subband.
fn encode_band(
    band: &SubBand,
    plane: &[f32],
    plane_width: usize,
    coding: &CodingStyle,
    quantizer: &BandQuantizer,
    coder: &mut BlockCoder,
) -> Vec<EncodedBlock> {
    let mut blocks = Vec::with_capacity((band.blocks_wide * band.blocks_high) as usize);
    let num_bitplanes = quantizer.num_bitplanes;
    let magnitude_limit = (1i64 << num_bitplanes) - 1;

    for y_idx in 0..band.blocks_high {
        for x_idx in 0..band.blocks_wide {
            let rect = band.code_block(x_idx, y_idx, coding);
            let mut coefficients = Vec::with_capacity(rect.width * rect.height);

            for y in 0..rect.height {
                for x in 0..rect.width {
                    let value = plane
                        [(band.plane_y + rect.y0 + y) * plane_width + band.plane_x + rect.x0 + x];

                    let quantized = match quantizer.delta {
                        Some(delta) => (value / delta).round() as i64,
                        None => value as i64,
                    };

                    coefficients
                        .push(quantized.clamp(-magnitude_limit, magnitude_limit) as i32);
                }
            }

            let max_magnitude = coefficients
                .iter()
                .map(|c| c.unsigned_abs())
                .max()
                .unwrap_or(0);

            if max_magnitude == 0 {
                blocks.push(EncodedBlock::default());
                continue;
            }

            let bits = 32 - max_magnitude.leading_zeros() as u8;
            let missing_bit_planes = num_bitplanes - bits;
            let num_passes = 3 * bits as u32 - 2;

            let data = bitplane::encode_block(
                &coefficients,
                rect.width as u32,
                rect.height as u32,
                band.band_type,
                num_bitplanes,
                missing_bit_planes,
                coder,
            );

            blocks.push(EncodedBlock {
                included: true,
                missing_bit_planes,
                num_passes,
                data,
            });
        }
    }

    blocks
}
