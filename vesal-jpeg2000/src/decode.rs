//! The frame decoding pipeline: main header, tile-part location, packet
//! parsing, code-block decoding, inverse wavelet and component
//! transforms, and sample output.

use crate::bitplane::{self, BlockCoder};
use crate::codestream::{
    self, CodestreamHeader, QuantizationStyle, markers, parse_main_header,
};
use crate::error::{
    DecodeError, DecodeErrorKind, DecodingError, MarkerError, Result, ValidationError, bail,
};
use crate::packet::{self, BandPackets};
use crate::progression::packet_sequence;
use crate::reader::Reader;
use crate::tile::{SubBand, build_resolutions};
use crate::{ImageInfo, dwt, mct};
use log::warn;

/// Decode one frame into the caller's buffer, laid out as described by
/// `info`.
pub(crate) fn decode_frame(
    codestream: &[u8],
    info: &ImageInfo,
    out: &mut [u8],
    frame_index: usize,
) -> core::result::Result<(), DecodeError> {
    let at = |offset: usize| {
        move |kind: DecodeErrorKind| DecodeError {
            frame_index,
            offset,
            kind,
        }
    };

    info.validate()
        .map_err(|what| at(0)(ValidationError::InvalidDescriptor(what).into()))?;

    assert!(
        out.len() >= info.frame_size(),
        "output buffer is smaller than the frame"
    );

    let mut reader = Reader::new(codestream);
    let header = parse_main_header(&mut reader).map_err(at(reader.offset()))?;

    validate_against_info(&header, info).map_err(at(reader.offset()))?;

    let (tile_data, data_start) =
        locate_tile_data(codestream, &mut reader).map_err(at(reader.offset()))?;

    let width = header.size.image_width() as usize;
    let height = header.size.image_height() as usize;
    let num_components = header.size.components.len();
    let resolutions = build_resolutions(width, height, &header.coding);

    for resolution in &resolutions {
        for band in &resolution.bands {
            let (ppx, ppy) = header.coding.precinct_exponents[band.resolution as usize];
            // For resolutions above zero the precinct partition applies
            // in resolution coordinates, halving the span in band
            // coordinates.
            let shift = if band.resolution == 0 { 0u8 } else { 1u8 };
            let max_width = 1usize << ppx.saturating_sub(shift).min(31);
            let max_height = 1usize << ppy.saturating_sub(shift).min(31);

            if band.width > max_width || band.height > max_height {
                return Err(at(data_start)(
                    ValidationError::Unsupported("multiple precincts").into(),
                ));
            }
        }
    }

    // Per component, per resolution, per subband packet state.
    let mut states: Vec<Vec<Vec<BandPackets>>> = (0..num_components)
        .map(|_| {
            resolutions
                .iter()
                .map(|resolution| {
                    resolution
                        .bands
                        .iter()
                        .map(|band| BandPackets::new(band.blocks_wide, band.blocks_high))
                        .collect()
                })
                .collect()
        })
        .collect();

    // Walk the packets in the order declared by the COD segment.
    let sequence = packet_sequence(
        header.coding.progression_order,
        header.coding.num_layers,
        header.coding.levels + 1,
        num_components as u16,
    );

    let mut pos = 0;
    for slot in sequence {
        let consumed = packet::parse_packet(
            &tile_data[pos.min(tile_data.len())..],
            &header.coding,
            &resolutions[slot.resolution as usize],
            &mut states[slot.component as usize][slot.resolution as usize],
            slot.layer,
        )
        .ok_or_else(|| at(data_start + pos)(DecodingError::InvalidPacketHeader.into()))?;

        pos += consumed;
    }

    // Entropy-decode every code-block and reassemble the planes.
    let mut planes: Vec<Vec<f32>> = vec![vec![0.0; width * height]; num_components];
    let mut coder = BlockCoder::default();

    for (component, plane) in planes.iter_mut().enumerate() {
        let precision = header.size.components[component].precision;

        for (res_idx, resolution) in resolutions.iter().enumerate() {
            for (band_idx, band) in resolution.bands.iter().enumerate() {
                decode_band(
                    band,
                    &header,
                    precision,
                    &states[component][res_idx][band_idx],
                    &mut coder,
                    plane,
                    width,
                );
            }
        }

        dwt::inverse(
            plane,
            width,
            height,
            header.coding.levels,
            header.coding.transform,
        );
    }

    if header.coding.mct && num_components >= 3 {
        let (first, rest) = planes.split_at_mut(1);
        let (second, third) = rest.split_at_mut(1);

        mct::apply_inverse(
            header.coding.transform,
            &mut first[0],
            &mut second[0],
            &mut third[0],
        );
    }

    write_samples(&planes, &header, info, out);

    Ok(())
}

fn validate_against_info(header: &CodestreamHeader, info: &ImageInfo) -> Result<()> {
    if header.size.image_width() != info.columns || header.size.image_height() != info.rows {
        bail!(ValidationError::DimensionMismatch);
    }

    if header.size.components.len() != info.samples_per_pixel as usize {
        bail!(ValidationError::ComponentCountMismatch);
    }

    Ok(())
}

/// Locate the tile data of the single tile-part: parse the SOT segment,
/// then scan marker segments until SOD.
fn locate_tile_data<'a>(
    codestream: &'a [u8],
    reader: &mut Reader<'a>,
) -> Result<(&'a [u8], usize)> {
    let sot_offset = reader.offset();

    match reader.peek_marker() {
        Some(markers::SOT) => {}
        _ => bail!(MarkerError::Missing("SOT")),
    }
    let _ = reader.read_marker();

    let parsed = (|| {
        let _length = reader.read_u16()?;
        let _tile_index = reader.read_u16()?;
        let psot = reader.read_u32()?;
        let tile_part_index = reader.read_byte()?;
        let num_tile_parts = reader.read_byte()?;

        Some((psot, tile_part_index, num_tile_parts))
    })();

    let (psot, tile_part_index, num_tile_parts) = match parsed {
        Some(parsed) => parsed,
        None => bail!(MarkerError::ParseFailure("SOT")),
    };

    if tile_part_index != 0 || num_tile_parts > 1 {
        bail!(ValidationError::Unsupported("multiple tile-parts"));
    }

    // Locate SOD by scanning the marker segments of the tile-part
    // header, never by positional shortcut.
    loop {
        match reader.peek_marker() {
            Some(markers::SOD) => {
                let _ = reader.read_marker();
                break;
            }
            Some(markers::PPT) => bail!(ValidationError::Unsupported("packed packet headers")),
            Some(markers::COD) | Some(markers::COC) | Some(markers::QCD)
            | Some(markers::QCC) => {
                bail!(ValidationError::Unsupported("tile-part coding overrides"))
            }
            Some(markers::PLT) | Some(markers::COM) => {
                let _ = reader.read_marker();
                codestream::skip_segment(reader, "tile-part")?;
            }
            Some(_) => {
                let _ = reader.read_marker();
                codestream::skip_segment(reader, "tile-part")?;
            }
            None => bail!(MarkerError::Missing("SOD")),
        }
    }

    let data_start = reader.offset();

    let tile_end = if psot == 0 {
        // Psot of zero: the tile-part extends to the EOC marker.
        if codestream.ends_with(&[0xFF, markers::EOC]) {
            codestream.len() - 2
        } else {
            codestream.len()
        }
    } else {
        sot_offset + psot as usize
    };

    if tile_end < data_start || tile_end > codestream.len() {
        bail!(DecodingError::InvalidTilePart);
    }

    Ok((&codestream[data_start..tile_end], data_start))
}

/// Decode every code-block of one subband into the component plane,
/// applying dequantization. Damage stays local to the code-block.
fn decode_band(
    band: &SubBand,
    header: &CodestreamHeader,
    precision: u8,
    state: &BandPackets,
    coder: &mut BlockCoder,
    plane: &mut [f32],
    plane_width: usize,
) {
    let quantization = &header.quantization;
    let num_bitplanes = quantization.num_bitplanes(
        band.band_type,
        band.resolution,
        header.coding.levels,
    );

    let delta = match quantization.style {
        QuantizationStyle::None => None,
        _ => {
            let (exponent, mantissa) = quantization.exponent_mantissa(
                band.band_type,
                band.resolution,
                header.coding.levels,
            );
            // Equation (E-3).
            let dynamic_range = precision as i32 + band.band_type.log_gain() as i32;
            let delta = 2.0f32.powi(dynamic_range - exponent as i32)
                * (1.0 + mantissa as f32 / 2048.0);

            Some(delta)
        }
    };

    for y_idx in 0..band.blocks_high {
        for x_idx in 0..band.blocks_wide {
            let block_idx = (y_idx * band.blocks_wide + x_idx) as usize;
            let block_state = &state.blocks[block_idx];

            if !block_state.has_been_included || block_state.num_passes == 0 {
                continue;
            }

            let rect = band.code_block(x_idx, y_idx, &header.coding);

            let decoded = bitplane::decode_block(
                &block_state.data,
                rect.width as u32,
                rect.height as u32,
                band.band_type,
                num_bitplanes,
                block_state.missing_bit_planes,
                block_state.num_passes,
                &header.coding.code_block_style,
                coder,
            );

            if decoded.is_none() {
                // Damage is localized: the block's region stays zero.
                warn!(
                    "failed to decode code-block ({x_idx}, {y_idx}) of a \
                    {:?} subband; zeroing its region",
                    band.band_type
                );

                continue;
            }

            for y in 0..rect.height {
                for x in 0..rect.width {
                    let mut value = coder.coefficient(y * rect.width + x) as f32;

                    if let Some(delta) = delta {
                        value *= delta;
                    }

                    let plane_x = band.plane_x + rect.x0 + x;
                    let plane_y = band.plane_y + rect.y0 + y;
                    plane[plane_y * plane_width + plane_x] = value;
                }
            }
        }
    }
}

/// Undo the DC level shift, clamp to the declared sample range, and
/// store the samples in the caller's layout.
fn write_samples(planes: &[Vec<f32>], header: &CodestreamHeader, info: &ImageInfo, out: &mut [u8]) {
    let width = info.columns as usize;
    let height = info.rows as usize;
    let samples_per_pixel = planes.len();

    for (component, plane) in planes.iter().enumerate() {
        let spec = header.size.components[component];

        let (min, max) = if spec.signed {
            (
                -(1i64 << (spec.precision - 1)),
                (1i64 << (spec.precision - 1)) - 1,
            )
        } else {
            (0, (1i64 << spec.precision) - 1)
        };
        let dc_offset = if spec.signed {
            0
        } else {
            1i64 << (spec.precision - 1)
        };

        for y in 0..height {
            for x in 0..width {
                let value = plane[y * width + x].round() as i64 + dc_offset;
                let value = value.clamp(min, max) as i32;

                let sample_index = if info.planar {
                    component * width * height + y * width + x
                } else {
                    (y * width + x) * samples_per_pixel + component
                };

                write_sample(out, sample_index, info.bytes_per_sample, value);
            }
        }
    }
}

#[inline]
fn write_sample(out: &mut [u8], index: usize, bytes_per_sample: u8, value: i32) {
    match bytes_per_sample {
        1 => out[index] = value as u8,
        2 => out[index * 2..index * 2 + 2].copy_from_slice(&(value as u16).to_le_bytes()),
        _ => out[index * 4..index * 4 + 4].copy_from_slice(&(value as u32).to_le_bytes()),
    }
}
