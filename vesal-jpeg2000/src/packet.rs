//! The packet header coder of Section B.10: code-block inclusion and
//! zero-bitplane tag trees, coding-pass counts (Table B.4), and Lblock
//! length signalling, in both directions.

use crate::codestream::{CodingStyle, markers};
use crate::reader::{BitReader, Reader};
use crate::tag_tree::TagTree;
use crate::tile::Resolution;
use crate::writer::{BitWriter, Writer};

/// Decoding state of one code-block, persisted across quality layers.
#[derive(Clone, Debug, Default)]
pub(crate) struct BlockPacketState {
    pub(crate) has_been_included: bool,
    pub(crate) missing_bit_planes: u8,
    /// Total coding passes accumulated over all layers.
    pub(crate) num_passes: u32,
    pub(crate) l_block: u32,
    /// Concatenated codeword segments of all layers.
    pub(crate) data: Vec<u8>,
}

/// Per-subband packet decoding state.
#[derive(Debug)]
pub(crate) struct BandPackets {
    inclusion_tree: TagTree,
    zero_bitplane_tree: TagTree,
    pub(crate) blocks: Vec<BlockPacketState>,
}

impl BandPackets {
    pub(crate) fn new(blocks_wide: u32, blocks_high: u32) -> Self {
        Self {
            inclusion_tree: TagTree::new(blocks_wide, blocks_high),
            zero_bitplane_tree: TagTree::new(blocks_wide, blocks_high),
            blocks: vec![
                BlockPacketState {
                    l_block: 3,
                    ..BlockPacketState::default()
                };
                blocks_wide as usize * blocks_high as usize
            ],
        }
    }
}

/// Parse one packet of the given resolution level, appending codeword
/// segments to the per-block states. Returns the number of bytes
/// consumed from `data`.
pub(crate) fn parse_packet(
    data: &[u8],
    coding: &CodingStyle,
    resolution: &Resolution,
    states: &mut [BandPackets],
    layer: u16,
) -> Option<usize> {
    let mut base = 0;

    // A SOP segment may precede the packet (A.8.1): marker, length,
    // and a two-byte packet index.
    if coding.uses_sop {
        let reader = Reader::new(data);
        if reader.peek_marker() == Some(markers::SOP) {
            base = 6;
        }
    }

    let header_data = data.get(base..)?;
    let mut reader = BitReader::new(header_data);

    // Per-block (band index, block index, added passes, segment length).
    let mut data_entries: Vec<(usize, usize, u32, u32)> = Vec::new();

    // B.10.3: the first bit flags a zero-length (empty) packet.
    let non_empty = reader.read_bits(1)? == 1;

    if non_empty {
        for (band_idx, band) in resolution.bands.iter().enumerate() {
            let state = &mut states[band_idx];

            for y_idx in 0..band.blocks_high {
                for x_idx in 0..band.blocks_wide {
                    let block_idx = (y_idx * band.blocks_wide + x_idx) as usize;
                    parse_block_header(
                        &mut reader,
                        state,
                        band_idx,
                        block_idx,
                        x_idx,
                        y_idx,
                        layer,
                        &mut data_entries,
                    )?;
                }
            }
        }
    }

    // Any stuffed zero belonging to a final 0xFF header byte is part of
    // the header.
    reader.consume_stuff_bit()?;
    reader.align();

    let header_len = header_data.len() - reader.tail().len();
    let mut body = Reader::new(reader.tail());

    // B.10.1: an EPH marker terminates the packet header when signalled.
    if coding.uses_eph && body.read_marker() != Some(markers::EPH) {
        return None;
    }

    for (band_idx, block_idx, added_passes, length) in data_entries {
        let segment = body.read_bytes(length as usize)?;
        let block = &mut states[band_idx].blocks[block_idx];
        block.data.extend_from_slice(segment);
        block.num_passes += added_passes;
    }

    Some(base + header_len + body.offset())
}

/// Decode the header fields of one code-block within a packet (B.10.4
/// through B.10.7).
#[allow(clippy::too_many_arguments)]
fn parse_block_header(
    reader: &mut BitReader<'_>,
    state: &mut BandPackets,
    band_idx: usize,
    block_idx: usize,
    x_idx: u32,
    y_idx: u32,
    layer: u16,
    data_entries: &mut Vec<(usize, usize, u32, u32)>,
) -> Option<()> {
    // B.10.4: inclusion is a single bit for previously included blocks,
    // a partial tag tree read otherwise.
    let is_included = if state.blocks[block_idx].has_been_included {
        reader.read_bits(1)? == 1
    } else {
        state
            .inclusion_tree
            .read(x_idx, y_idx, reader, layer as u32 + 1)?
            <= layer as u32
    };

    if !is_included {
        return Some(());
    }

    // B.10.5: the number of missing most significant bitplanes is coded
    // with a second tag tree on first inclusion.
    if !state.blocks[block_idx].has_been_included {
        let missing = state
            .zero_bitplane_tree
            .read(x_idx, y_idx, reader, u32::MAX)?;
        state.blocks[block_idx].missing_bit_planes = missing.min(255) as u8;
    }

    state.blocks[block_idx].has_been_included = true;

    // B.10.6: number of coding passes, Table B.4.
    let added_passes = read_pass_count(reader)?;

    // B.10.7.1: `k` one-bits raise Lblock, then the segment length
    // follows in Lblock + floor(log2(passes)) bits.
    let mut k = 0;
    while reader.read_bits(1)? == 1 {
        k += 1;
    }

    let block = &mut state.blocks[block_idx];
    block.l_block += k;

    let length_bits = block.l_block + added_passes.ilog2();
    if length_bits > 32 {
        return None;
    }

    let length = reader.read_bits(length_bits as u8)?;
    data_entries.push((band_idx, block_idx, added_passes, length));

    Some(())
}

/// Read a coding-pass count (Table B.4).
fn read_pass_count(reader: &mut BitReader<'_>) -> Option<u32> {
    if reader.peek_bits(9) == Some(0x1FF) {
        reader.read_bits(9)?;
        Some(reader.read_bits(7)? + 37)
    } else if reader.peek_bits(4) == Some(0x0F) {
        reader.read_bits(4)?;
        Some(reader.read_bits(5)? + 6)
    } else if reader.peek_bits(2) == Some(0b11) {
        reader.read_bits(2)?;
        Some(reader.read_bits(2)? + 3)
    } else if reader.peek_bits(2) == Some(0b10) {
        reader.read_bits(2)?;
        Some(2)
    } else {
        reader.read_bits(1)?;
        Some(1)
    }
}

/// Write a coding-pass count (Table B.4).
fn write_pass_count(writer: &mut BitWriter, passes: u32) {
    debug_assert!((1..=164).contains(&passes));

    match passes {
        1 => writer.write_bits(0b0, 1),
        2 => writer.write_bits(0b10, 2),
        3..=5 => {
            writer.write_bits(0b11, 2);
            writer.write_bits(passes - 3, 2);
        }
        6..=36 => {
            writer.write_bits(0b1111, 4);
            writer.write_bits(passes - 6, 5);
        }
        _ => {
            writer.write_bits(0x1FF, 9);
            writer.write_bits(passes - 37, 7);
        }
    }
}

/// One code-block's contribution to a packet, produced by the encoder.
#[derive(Clone, Debug, Default)]
pub(crate) struct EncodedBlock {
    /// `None` when the block has no nonzero coefficients and stays out
    /// of the packet.
    pub(crate) included: bool,
    pub(crate) missing_bit_planes: u8,
    pub(crate) num_passes: u32,
    pub(crate) data: Vec<u8>,
}

/// Emit one single-layer packet: header bits followed by the codeword
/// segments of every included code-block.
pub(crate) fn write_packet(
    writer: &mut Writer,
    resolution: &Resolution,
    band_blocks: &[Vec<EncodedBlock>],
) {
    let mut bits = BitWriter::new();

    let any_included = band_blocks
        .iter()
        .flatten()
        .any(|block| block.included);

    if !any_included {
        // Zero-length packet: a single 0 bit, padded to a byte.
        bits.write_bit(0);
        writer.write_bytes(&bits.finish());

        return;
    }

    bits.write_bit(1);

    for (band, blocks) in resolution.bands.iter().zip(band_blocks) {
        if band.blocks_wide == 0 || band.blocks_high == 0 {
            continue;
        }

        let mut inclusion_tree = TagTree::new(band.blocks_wide, band.blocks_high);
        let mut zero_bitplane_tree = TagTree::new(band.blocks_wide, band.blocks_high);

        for y_idx in 0..band.blocks_high {
            for x_idx in 0..band.blocks_wide {
                let block = &blocks[(y_idx * band.blocks_wide + x_idx) as usize];
                // Excluded blocks are "first included" in a layer that
                // never materializes.
                inclusion_tree.set_value(x_idx, y_idx, (!block.included) as u32);
                zero_bitplane_tree.set_value(x_idx, y_idx, block.missing_bit_planes as u32);
            }
        }

        inclusion_tree.finish_values();
        zero_bitplane_tree.finish_values();

        for y_idx in 0..band.blocks_high {
            for x_idx in 0..band.blocks_wide {
                let block = &blocks[(y_idx * band.blocks_wide + x_idx) as usize];

                inclusion_tree.encode(x_idx, y_idx, &mut bits, 1);

                if !block.included {
                    continue;
                }

                zero_bitplane_tree.encode(x_idx, y_idx, &mut bits, u32::MAX);
                write_pass_count(&mut bits, block.num_passes);

                // Lblock starts at three; raise it with one-bits until
                // the segment length fits.
                let mut l_block = 3u32;
                let length_bits_needed = if block.data.is_empty() {
                    0
                } else {
                    32 - (block.data.len() as u32).leading_zeros()
                };
                let extra = length_bits_needed
                    .saturating_sub(l_block + block.num_passes.ilog2());

                for _ in 0..extra {
                    bits.write_bit(1);
                }
                bits.write_bit(0);
                l_block += extra;

                bits.write_bits(
                    block.data.len() as u32,
                    (l_block + block.num_passes.ilog2()) as u8,
                );
            }
        }
    }

    writer.write_bytes(&bits.finish());

    for blocks in band_blocks {
        for block in blocks {
            if block.included {
                writer.write_bytes(&block.data);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{BandPackets, EncodedBlock, parse_packet, write_packet};
    use crate::codestream::{
        CodeBlockStyle, CodingStyle, ProgressionOrder, WaveletTransform,
    };
    use crate::reader::BitReader;
    use crate::tile::build_resolutions;
    use crate::writer::{BitWriter, Writer};

    fn coding(levels: u8) -> CodingStyle {
        CodingStyle {
            progression_order: ProgressionOrder::Lrcp,
            num_layers: 1,
            mct: false,
            uses_sop: false,
            uses_eph: false,
            levels,
            code_block_width_log2: 5,
            code_block_height_log2: 5,
            code_block_style: CodeBlockStyle::default(),
            transform: WaveletTransform::Reversible53,
            precinct_exponents: vec![(15, 15); levels as usize + 1],
        }
    }

    #[test]
    fn pass_count_round_trip() {
        for passes in 1..=164 {
            let mut writer = BitWriter::new();
            super::write_pass_count(&mut writer, passes);
            let bytes = writer.finish();

            let mut reader = BitReader::new(&bytes);
            assert_eq!(super::read_pass_count(&mut reader), Some(passes));
        }
    }

    #[test]
    fn empty_packet_is_one_byte() {
        let coding = coding(0);
        let resolutions = build_resolutions(64, 64, &coding);

        let mut writer = Writer::new();
        write_packet(
            &mut writer,
            &resolutions[0],
            &[vec![EncodedBlock::default(); 4]],
        );
        let bytes = writer.finish();

        assert_eq!(bytes, vec![0x00]);

        let mut states = vec![BandPackets::new(2, 2)];
        let consumed = parse_packet(&bytes, &coding, &resolutions[0], &mut states, 0).unwrap();

        assert_eq!(consumed, 1);
        assert!(states[0].blocks.iter().all(|b| !b.has_been_included));
    }

    #[test]
    fn packet_round_trip() {
        let coding = coding(1);
        let resolutions = build_resolutions(100, 70, &coding);

        // Resolution 1 has HL/LH/HH bands of 18x35, 50x... block grids of
        // varying sizes; fill them with synthetic segments.
        let resolution = &resolutions[1];
        let mut band_blocks = Vec::new();

        for (band_idx, band) in resolution.bands.iter().enumerate() {
            let count = (band.blocks_wide * band.blocks_high) as usize;
            let blocks: Vec<EncodedBlock> = (0..count)
                .map(|i| {
                    if (i + band_idx) % 3 == 0 {
                        EncodedBlock::default()
                    } else {
                        EncodedBlock {
                            included: true,
                            missing_bit_planes: (i % 4) as u8,
                            num_passes: 1 + (i % 7) as u32 * 3,
                            data: vec![0xAB; 5 + i * 11],
                        }
                    }
                })
                .collect();
            band_blocks.push(blocks);
        }

        let mut writer = Writer::new();
        write_packet(&mut writer, resolution, &band_blocks);
        let bytes = writer.finish();

        let mut states: Vec<BandPackets> = resolution
            .bands
            .iter()
            .map(|band| BandPackets::new(band.blocks_wide, band.blocks_high))
            .collect();

        let consumed = parse_packet(&bytes, &coding, resolution, &mut states, 0).unwrap();
        assert_eq!(consumed, bytes.len());

        for (state, blocks) in states.iter().zip(&band_blocks) {
            for (parsed, expected) in state.blocks.iter().zip(blocks) {
                assert_eq!(parsed.has_been_included, expected.included);

                if expected.included {
                    assert_eq!(parsed.missing_bit_planes, expected.missing_bit_planes);
                    assert_eq!(parsed.num_passes, expected.num_passes);
                    assert_eq!(parsed.data, expected.data);
                }
            }
        }
    }
}
