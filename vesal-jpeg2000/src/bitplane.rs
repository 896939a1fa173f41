//! EBCOT Tier-1: bitplane coding of a single code-block, described in
//! Annex D.
//!
//! The samples of a code-block are coded bitplane by bitplane, most
//! significant plane first. Every plane runs three passes in order
//! (significance propagation, magnitude refinement, cleanup; the first
//! plane is cleanup-only), each pass feeding decisions to the MQ coder
//! under one of 19 contexts chosen from the significance pattern of the
//! eight-neighbourhood. Encoding and decoding share the same state
//! tracking so that the two directions stay in lockstep.

use crate::arith::{Context, MqDecoder, MqEncoder};
use crate::codestream::CodeBlockStyle;
use crate::tile::SubBandType;

// We only allow 31 bit planes because we need one bit for the sign.
pub(crate) const MAX_BITPLANES: u8 = 31;

const SIGNIFICANCE_SHIFT: u8 = 7;
const HAS_MAGNITUDE_REFINEMENT_SHIFT: u8 = 6;
const HAS_ZERO_CODING_SHIFT: u8 = 5;
const BITPLANE_COUNT_MASK: u8 = (1 << 5) - 1;

/// Per-coefficient coding state, packed into one byte. From MSB to LSB:
/// bit 1 is the significance state, bit 2 records whether the
/// coefficient has had a magnitude refinement before, bit 3 records
/// whether the coefficient was visited by the significance propagation
/// pass of the current bitplane (reset on every new plane), and bits 4-8
/// count the magnitude bits accumulated so far (decoding side).
#[derive(Default, Copy, Clone)]
struct CoefficientState(u8);

impl CoefficientState {
    #[inline(always)]
    fn set_bit(&mut self, shift: u8, value: u8) {
        debug_assert!(value < 2);

        self.0 &= !(1u8 << shift);
        self.0 |= value << shift;
    }

    #[inline(always)]
    fn set_significant(&mut self) {
        self.set_bit(SIGNIFICANCE_SHIFT, 1);
    }

    #[inline(always)]
    fn set_zero_coded(&mut self, value: u8) {
        self.set_bit(HAS_ZERO_CODING_SHIFT, value & 1);
    }

    #[inline(always)]
    fn set_magnitude_refined(&mut self) {
        self.set_bit(HAS_MAGNITUDE_REFINEMENT_SHIFT, 1);
    }

    #[inline(always)]
    fn is_significant(&self) -> bool {
        (self.0 >> SIGNIFICANCE_SHIFT) & 1 == 1
    }

    #[inline(always)]
    fn is_magnitude_refined(&self) -> bool {
        (self.0 >> HAS_MAGNITUDE_REFINEMENT_SHIFT) & 1 == 1
    }

    #[inline(always)]
    fn is_zero_coded(&self) -> bool {
        (self.0 >> HAS_ZERO_CODING_SHIFT) & 1 == 1
    }

    #[inline(always)]
    fn num_bitplanes(&self) -> u8 {
        self.0 & BITPLANE_COUNT_MASK
    }

    #[inline(always)]
    fn set_magnitude_bits(&mut self, count: u8) {
        debug_assert!(count <= MAX_BITPLANES);
        self.0 = (self.0 & !BITPLANE_COUNT_MASK) | (count & BITPLANE_COUNT_MASK);
    }
}

#[derive(Default, Copy, Clone, Debug)]
struct Position {
    x: u32,
    y: u32,
}

impl Position {
    fn new(x: u32, y: u32) -> Self {
        Self { x, y }
    }

    fn index(&self, width: u32) -> usize {
        self.x as usize + self.y as usize * width as usize
    }
}

/// Shared coding state for one code-block. Reusable across blocks to
/// keep the allocations alive.
pub(crate) struct BlockCoder {
    /// Packed per-coefficient coding state.
    states: Vec<CoefficientState>,
    /// Coefficient magnitudes: accumulated MSB-first while decoding,
    /// preset while encoding.
    magnitudes: Vec<u32>,
    /// Coefficient signs (1 = negative): decoded on first significance,
    /// preset while encoding.
    signs: Vec<u8>,
    /// The width of the code-block we are processing.
    width: u32,
    /// The height of the code-block we are processing.
    height: u32,
    /// Whether the vertically causal context flag is enabled.
    vertically_causal: bool,
    /// The type of sub-band the code-block belongs to.
    band_type: SubBandType,
    /// The arithmetic coder contexts for each context label.
    contexts: [Context; 19],
}

impl Default for BlockCoder {
    fn default() -> Self {
        Self {
            states: vec![],
            magnitudes: vec![],
            signs: vec![],
            width: 0,
            height: 0,
            vertically_causal: false,
            band_type: SubBandType::LowLow,
            contexts: [Context::default(); 19],
        }
    }
}

impl BlockCoder {
    fn reset(
        &mut self,
        width: u32,
        height: u32,
        band_type: SubBandType,
        style: &CodeBlockStyle,
        missing_bit_planes: u8,
    ) {
        let num_coefficients = width as usize * height as usize;

        self.magnitudes.clear();
        self.magnitudes.resize(num_coefficients, 0);
        self.signs.clear();
        self.signs.resize(num_coefficients, 0);

        self.states.clear();
        self.states.resize_with(num_coefficients, || {
            let mut state = CoefficientState::default();
            state.set_magnitude_bits(missing_bit_planes);

            state
        });

        self.width = width;
        self.height = height;
        self.band_type = band_type;
        self.vertically_causal = style.vertically_causal_context;
        self.reset_contexts();
    }

    /// Reset each context to the initial state defined in Table D.7.
    fn reset_contexts(&mut self) {
        for context in &mut self.contexts {
            *context = Context::default();
        }

        self.contexts[0] = Context::new(4, 0);
        self.contexts[RUN_LENGTH_CONTEXT as usize] = Context::new(3, 0);
        self.contexts[UNIFORM_CONTEXT as usize] = Context::new(46, 0);
    }

    fn reset_for_next_bitplane(&mut self) {
        for state in &mut self.states {
            state.set_zero_coded(0);
        }
    }

    /// The signed coefficient value at the given index.
    pub(crate) fn coefficient(&self, index: usize) -> i32 {
        let magnitude = self.magnitudes[index] as i32;

        if self.signs[index] != 0 {
            -magnitude
        } else {
            magnitude
        }
    }

    fn is_significant(&self, pos: &Position) -> bool {
        self.states[pos.index(self.width)].is_significant()
    }

    fn set_significant(&mut self, pos: &Position) {
        self.states[pos.index(self.width)].set_significant();
    }

    fn is_zero_coded(&self, pos: &Position) -> bool {
        self.states[pos.index(self.width)].is_zero_coded()
    }

    fn set_zero_coded(&mut self, pos: &Position) {
        self.states[pos.index(self.width)].set_zero_coded(1);
    }

    fn is_magnitude_refined(&self, pos: &Position) -> bool {
        self.states[pos.index(self.width)].is_magnitude_refined()
    }

    fn set_magnitude_refined(&mut self, pos: &Position) {
        self.states[pos.index(self.width)].set_magnitude_refined();
    }

    fn push_magnitude_bit(&mut self, pos: &Position, bit: u8) {
        let idx = pos.index(self.width);
        let count = self.states[idx].num_bitplanes();

        debug_assert!(count < MAX_BITPLANES);

        self.magnitudes[idx] = (self.magnitudes[idx] << 1) | bit as u32;
        self.states[idx].set_magnitude_bits(count + 1);
    }

    /// The bit of the preset magnitude at the given plane (encoding side).
    fn magnitude_bit(&self, pos: &Position, plane: u8) -> u8 {
        ((self.magnitudes[pos.index(self.width)] >> plane) & 1) as u8
    }

    #[inline]
    fn sign_checked(&self, x: i64, y: i64) -> u8 {
        if x < 0 || y < 0 || x >= self.width as i64 || y >= self.height as i64 {
            0
        } else {
            self.signs[x as usize + y as usize * self.width as usize]
        }
    }

    #[inline]
    fn significance_state_checked(&self, x: i64, y: i64) -> u8 {
        if x < 0 || y < 0 || x >= self.width as i64 || y >= self.height as i64 {
            // OOB values should just return 0.
            0
        } else if self.states[x as usize + y as usize * self.width as usize].is_significant() {
            1
        } else {
            0
        }
    }

    #[inline]
    fn neighbor_in_next_stripe(&self, pos: &Position, neighbor_y: u32) -> bool {
        neighbor_y < self.height && (neighbor_y >> 2) > (pos.y >> 2)
    }

    #[inline]
    fn horizontal_significance_states(&self, pos: &Position) -> u8 {
        self.significance_state_checked(pos.x as i64 - 1, pos.y as i64)
            + self.significance_state_checked(pos.x as i64 + 1, pos.y as i64)
    }

    #[inline]
    fn vertical_significance_states(&self, pos: &Position) -> u8 {
        let suppress_lower = self.vertically_causal && self.neighbor_in_next_stripe(pos, pos.y + 1);

        self.significance_state_checked(pos.x as i64, pos.y as i64 - 1)
            + if suppress_lower {
                0
            } else {
                self.significance_state_checked(pos.x as i64, pos.y as i64 + 1)
            }
    }

    #[inline]
    fn diagonal_significance_states(&self, pos: &Position) -> u8 {
        let suppress_lower = self.vertically_causal && self.neighbor_in_next_stripe(pos, pos.y + 1);

        self.significance_state_checked(pos.x as i64 - 1, pos.y as i64 - 1)
            + self.significance_state_checked(pos.x as i64 + 1, pos.y as i64 - 1)
            + if suppress_lower {
                0
            } else {
                self.significance_state_checked(pos.x as i64 - 1, pos.y as i64 + 1)
                    + self.significance_state_checked(pos.x as i64 + 1, pos.y as i64 + 1)
            }
    }

    #[inline]
    fn neighborhood_significance_states(&self, pos: &Position) -> u8 {
        self.horizontal_significance_states(pos)
            + self.vertical_significance_states(pos)
            + self.diagonal_significance_states(pos)
    }
}

const RUN_LENGTH_CONTEXT: u8 = 17;
const UNIFORM_CONTEXT: u8 = 18;

/// Return the context label for zero coding (Table D.1).
#[inline(always)]
fn context_label_zero_coding(pos: &Position, coder: &BlockCoder) -> u8 {
    let mut horizontal = coder.horizontal_significance_states(pos);
    let mut vertical = coder.vertical_significance_states(pos);
    let diagonal = coder.diagonal_significance_states(pos);

    match coder.band_type {
        SubBandType::LowLow | SubBandType::LowHigh | SubBandType::HighLow => {
            if coder.band_type == SubBandType::HighLow {
                core::mem::swap(&mut horizontal, &mut vertical);
            }

            if horizontal == 2 {
                8
            } else if horizontal == 1 && vertical >= 1 {
                7
            } else if horizontal == 1 && vertical == 0 && diagonal >= 1 {
                6
            } else if horizontal == 1 && vertical == 0 && diagonal == 0 {
                5
            } else if horizontal == 0 && vertical == 2 {
                4
            } else if horizontal == 0 && vertical == 1 {
                3
            } else if horizontal == 0 && vertical == 0 && diagonal >= 2 {
                2
            } else if horizontal == 0 && vertical == 0 && diagonal == 1 {
                1
            } else {
                0
            }
        }
        SubBandType::HighHigh => {
            let hv = horizontal + vertical;

            if diagonal >= 3 {
                8
            } else if hv >= 1 && diagonal == 2 {
                7
            } else if hv == 0 && diagonal == 2 {
                6
            } else if hv >= 2 && diagonal == 1 {
                5
            } else if hv == 1 && diagonal == 1 {
                4
            } else if hv == 0 && diagonal == 1 {
                3
            } else if hv >= 2 && diagonal == 0 {
                2
            } else if hv == 1 && diagonal == 0 {
                1
            } else {
                0
            }
        }
    }
}

/// Return the sign-coding context label and the XOR bit (Table D.2).
#[inline(always)]
fn context_label_sign_coding(pos: &Position, coder: &BlockCoder) -> (u8, u8) {
    #[inline(always)]
    fn neighbor_contribution(coder: &BlockCoder, x: i64, y: i64) -> i32 {
        let sigma = coder.significance_state_checked(x, y);
        let multiplied = if coder.sign_checked(x, y) == 0 { 1 } else { -1 };

        multiplied * sigma as i32
    }

    let h = (neighbor_contribution(coder, pos.x as i64 - 1, pos.y as i64)
        + neighbor_contribution(coder, pos.x as i64 + 1, pos.y as i64))
    .clamp(-1, 1);
    let suppress_lower =
        coder.vertically_causal && coder.neighbor_in_next_stripe(pos, pos.y + 1);
    let v = (neighbor_contribution(coder, pos.x as i64, pos.y as i64 - 1)
        + if suppress_lower {
            0
        } else {
            neighbor_contribution(coder, pos.x as i64, pos.y as i64 + 1)
        })
    .clamp(-1, 1);

    match (h, v) {
        (1, 1) => (13, 0),
        (1, 0) => (12, 0),
        (1, -1) => (11, 0),
        (0, 1) => (10, 0),
        (0, 0) => (9, 0),
        (0, -1) => (10, 1),
        (-1, 1) => (11, 1),
        (-1, 0) => (12, 1),
        (-1, -1) => (13, 1),
        _ => unreachable!(),
    }
}

/// Return the context label for magnitude refinement coding (Table D.4).
fn context_label_magnitude_refinement(pos: &Position, coder: &BlockCoder) -> u8 {
    if coder.is_magnitude_refined(pos) {
        16
    } else if coder.neighborhood_significance_states(pos) >= 1 {
        15
    } else {
        14
    }
}

/// Scan each bit-plane in stripes of four rows, each stripe column by
/// column top to bottom (Section D.2).
fn for_each_position(width: u32, height: u32, mut action: impl FnMut(&mut Position)) {
    for base_row in (0..height).step_by(4) {
        for x in 0..width {
            let mut cur_pos = Position::new(x, base_row);
            while cur_pos.y < (base_row + 4).min(height) {
                action(&mut cur_pos);
                cur_pos.y += 1;
            }
        }
    }
}

/// Whether the run-length primitive applies at this position: the start
/// of a full four-sample column whose members all have an entirely
/// insignificant neighbourhood (D.3.4).
fn run_length_applies(coder: &BlockCoder, pos: &Position) -> bool {
    pos.y % 4 == 0
        && (coder.height - pos.y) >= 4
        && coder.neighborhood_significance_states(pos) == 0
        && coder.neighborhood_significance_states(&Position::new(pos.x, pos.y + 1)) == 0
        && coder.neighborhood_significance_states(&Position::new(pos.x, pos.y + 2)) == 0
        && coder.neighborhood_significance_states(&Position::new(pos.x, pos.y + 3)) == 0
}

// ---------------------------------------------------------------------
// Decoding
// ---------------------------------------------------------------------

/// Decode the coding passes of one code-block into the coder state.
///
/// Returns `None` if the pass data is internally inconsistent; the
/// caller is expected to localize the damage by zeroing the block.
pub(crate) fn decode_block(
    data: &[u8],
    width: u32,
    height: u32,
    band_type: SubBandType,
    num_bitplanes: u8,
    missing_bit_planes: u8,
    num_passes: u32,
    style: &CodeBlockStyle,
    coder: &mut BlockCoder,
) -> Option<()> {
    coder.reset(width, height, band_type, style, missing_bit_planes);

    if num_passes == 0 {
        return Some(());
    }

    // Validate the number of bitplanes.
    if missing_bit_planes as u32 + 1 + (num_passes - 1).div_ceil(3) > num_bitplanes as u32 {
        return None;
    }

    if num_bitplanes > MAX_BITPLANES {
        return None;
    }

    let mut decoder = MqDecoder::new(data);

    for coding_pass in 0..num_passes {
        // The first plane only has a cleanup pass; afterwards the order
        // is significance propagation, refinement, cleanup.
        match coding_pass % 3 {
            0 => {
                cleanup_pass_decode(coder, &mut decoder);

                if style.segmentation_symbols && !read_segmentation_symbol(coder, &mut decoder) {
                    return None;
                }

                coder.reset_for_next_bitplane();
            }
            1 => significance_pass_decode(coder, &mut decoder),
            2 => refinement_pass_decode(coder, &mut decoder),
            _ => unreachable!(),
        }

        if style.reset_context_probabilities {
            coder.reset_contexts();
        }
    }

    // Extend all coefficients with zero bits until we have the required
    // number of bits.
    for idx in 0..coder.magnitudes.len() {
        let count = coder.states[idx].num_bitplanes();
        coder.magnitudes[idx] <<= num_bitplanes - count;
    }

    Some(())
}

/// The 1010 symbol coded with the uniform context at the end of each
/// cleanup pass when segmentation symbols are enabled (D.5).
fn read_segmentation_symbol(coder: &mut BlockCoder, decoder: &mut MqDecoder<'_>) -> bool {
    let mut symbol = 0u8;

    for _ in 0..4 {
        symbol =
            (symbol << 1) | decoder.read_bit(&mut coder.contexts[UNIFORM_CONTEXT as usize]);
    }

    symbol == 0b1010
}

/// The significance propagation pass (D.3.1).
fn significance_pass_decode(coder: &mut BlockCoder, decoder: &mut MqDecoder<'_>) {
    for_each_position(coder.width, coder.height, |cur_pos| {
        // Only insignificant coefficients with at least one significant
        // neighbour take part.
        if !coder.is_significant(cur_pos)
            && coder.neighborhood_significance_states(cur_pos) != 0
        {
            let label = context_label_zero_coding(cur_pos, coder);
            let bit = decoder.read_bit(&mut coder.contexts[label as usize]);
            coder.push_magnitude_bit(cur_pos, bit);
            coder.set_zero_coded(cur_pos);

            if bit == 1 {
                decode_sign(cur_pos, coder, decoder);
                coder.set_significant(cur_pos);
            }
        }
    });
}

/// The magnitude refinement pass (D.3.3).
fn refinement_pass_decode(coder: &mut BlockCoder, decoder: &mut MqDecoder<'_>) {
    for_each_position(coder.width, coder.height, |cur_pos| {
        if coder.is_significant(cur_pos) && !coder.is_zero_coded(cur_pos) {
            let label = context_label_magnitude_refinement(cur_pos, coder);
            let bit = decoder.read_bit(&mut coder.contexts[label as usize]);
            coder.push_magnitude_bit(cur_pos, bit);
            coder.set_magnitude_refined(cur_pos);
        }
    });
}

/// The cleanup pass (D.3.4), including the run-length primitive.
fn cleanup_pass_decode(coder: &mut BlockCoder, decoder: &mut MqDecoder<'_>) {
    for_each_position(coder.width, coder.height, |cur_pos| {
        if coder.is_significant(cur_pos) || coder.is_zero_coded(cur_pos) {
            return;
        }

        let bit = if run_length_applies(coder, cur_pos) {
            let bit = decoder.read_bit(&mut coder.contexts[RUN_LENGTH_CONTEXT as usize]);

            if bit == 0 {
                // All four coefficients of the column stay insignificant.
                coder.push_magnitude_bit(cur_pos, 0);

                for _ in 0..3 {
                    cur_pos.y += 1;
                    coder.push_magnitude_bit(cur_pos, 0);
                }

                return;
            } else {
                // Two bits under the uniform context locate the first
                // significant coefficient of the column.
                let mut num_zeroes =
                    decoder.read_bit(&mut coder.contexts[UNIFORM_CONTEXT as usize]) as u32;
                num_zeroes = (num_zeroes << 1)
                    | decoder.read_bit(&mut coder.contexts[UNIFORM_CONTEXT as usize]) as u32;

                for _ in 0..num_zeroes {
                    coder.push_magnitude_bit(cur_pos, 0);
                    cur_pos.y += 1;
                }

                1
            }
        } else {
            let label = context_label_zero_coding(cur_pos, coder);
            decoder.read_bit(&mut coder.contexts[label as usize])
        };

        coder.push_magnitude_bit(cur_pos, bit);

        if bit == 1 {
            decode_sign(cur_pos, coder, decoder);
            coder.set_significant(cur_pos);
        }
    });
}

/// Decode a sign bit (D.3.2).
#[inline(always)]
fn decode_sign(pos: &Position, coder: &mut BlockCoder, decoder: &mut MqDecoder<'_>) {
    let (label, xor_bit) = context_label_sign_coding(pos, coder);
    let sign = decoder.read_bit(&mut coder.contexts[label as usize]) ^ xor_bit;
    coder.signs[pos.index(coder.width)] = sign;
}

// ---------------------------------------------------------------------
// Encoding
// ---------------------------------------------------------------------

/// Encode a code-block of quantized coefficients.
///
/// `num_bitplanes` is the full bit budget of the subband (Mb) and
/// `missing_bit_planes` how many of its top planes are zero for this
/// block; the remaining planes are coded with `3 * planes - 2` passes.
/// Returns the MQ codeword bytes.
pub(crate) fn encode_block(
    coefficients: &[i32],
    width: u32,
    height: u32,
    band_type: SubBandType,
    num_bitplanes: u8,
    missing_bit_planes: u8,
    coder: &mut BlockCoder,
) -> Vec<u8> {
    debug_assert_eq!(coefficients.len(), width as usize * height as usize);
    debug_assert!(num_bitplanes <= MAX_BITPLANES);
    debug_assert!(missing_bit_planes < num_bitplanes);

    coder.reset(width, height, band_type, &CodeBlockStyle::default(), 0);

    for (idx, &value) in coefficients.iter().enumerate() {
        coder.magnitudes[idx] = value.unsigned_abs();
        coder.signs[idx] = (value < 0) as u8;
    }

    let planes = num_bitplanes - missing_bit_planes;
    let num_passes = 3 * planes as u32 - 2;
    let mut encoder = MqEncoder::new();

    for coding_pass in 0..num_passes {
        // Matches the decoding side: pass p of the stream works on plane
        // `planes - 1 - (p + 2) / 3`.
        let plane = planes - 1 - ((coding_pass as u8 + 2) / 3);

        match coding_pass % 3 {
            0 => {
                cleanup_pass_encode(coder, &mut encoder, plane);
                coder.reset_for_next_bitplane();
            }
            1 => significance_pass_encode(coder, &mut encoder, plane),
            2 => refinement_pass_encode(coder, &mut encoder, plane),
            _ => unreachable!(),
        }
    }

    encoder.finish()
}

/// The encoding mirror of [`significance_pass_decode`].
fn significance_pass_encode(coder: &mut BlockCoder, encoder: &mut MqEncoder, plane: u8) {
    for_each_position(coder.width, coder.height, |cur_pos| {
        if !coder.is_significant(cur_pos)
            && coder.neighborhood_significance_states(cur_pos) != 0
        {
            let label = context_label_zero_coding(cur_pos, coder);
            let bit = coder.magnitude_bit(cur_pos, plane);
            encoder.encode(bit, &mut coder.contexts[label as usize]);
            coder.set_zero_coded(cur_pos);

            if bit == 1 {
                encode_sign(cur_pos, coder, encoder);
                coder.set_significant(cur_pos);
            }
        }
    });
}

/// The encoding mirror of [`refinement_pass_decode`].
fn refinement_pass_encode(coder: &mut BlockCoder, encoder: &mut MqEncoder, plane: u8) {
    for_each_position(coder.width, coder.height, |cur_pos| {
        if coder.is_significant(cur_pos) && !coder.is_zero_coded(cur_pos) {
            let label = context_label_magnitude_refinement(cur_pos, coder);
            let bit = coder.magnitude_bit(cur_pos, plane);
            encoder.encode(bit, &mut coder.contexts[label as usize]);
            coder.set_magnitude_refined(cur_pos);
        }
    });
}

/// The encoding mirror of [`cleanup_pass_decode`].
fn cleanup_pass_encode(coder: &mut BlockCoder, encoder: &mut MqEncoder, plane: u8) {
    for_each_position(coder.width, coder.height, |cur_pos| {
        if coder.is_significant(cur_pos) || coder.is_zero_coded(cur_pos) {
            return;
        }

        let bit = if run_length_applies(coder, cur_pos) {
            let first_significant = (0u32..4).find(|&k| {
                coder.magnitude_bit(&Position::new(cur_pos.x, cur_pos.y + k), plane) == 1
            });

            match first_significant {
                None => {
                    encoder.encode(0, &mut coder.contexts[RUN_LENGTH_CONTEXT as usize]);
                    cur_pos.y += 3;

                    return;
                }
                Some(num_zeroes) => {
                    encoder.encode(1, &mut coder.contexts[RUN_LENGTH_CONTEXT as usize]);
                    encoder.encode(
                        (num_zeroes >> 1) as u8 & 1,
                        &mut coder.contexts[UNIFORM_CONTEXT as usize],
                    );
                    encoder.encode(
                        num_zeroes as u8 & 1,
                        &mut coder.contexts[UNIFORM_CONTEXT as usize],
                    );

                    cur_pos.y += num_zeroes;

                    1
                }
            }
        } else {
            let label = context_label_zero_coding(cur_pos, coder);
            let bit = coder.magnitude_bit(cur_pos, plane);
            encoder.encode(bit, &mut coder.contexts[label as usize]);

            bit
        };

        if bit == 1 {
            encode_sign(cur_pos, coder, encoder);
            coder.set_significant(cur_pos);
        }
    });
}

/// The encoding mirror of [`decode_sign`].
#[inline(always)]
fn encode_sign(pos: &Position, coder: &mut BlockCoder, encoder: &mut MqEncoder) {
    let (label, xor_bit) = context_label_sign_coding(pos, coder);
    let sign = coder.signs[pos.index(coder.width)];
    encoder.encode(sign ^ xor_bit, &mut coder.contexts[label as usize]);
}

#[cfg(test)]
mod tests {
    use super::{BlockCoder, decode_block, encode_block};
    use crate::codestream::CodeBlockStyle;
    use crate::tile::SubBandType;

    fn decoded_coefficients(coder: &BlockCoder, len: usize) -> Vec<i32> {
        (0..len).map(|i| coder.coefficient(i)).collect()
    }

    // First packet from the example in T.800 Section J.10.4.
    #[test]
    fn known_answer_column_ll() {
        let data = [0x01, 0x8F, 0x0D, 0xC8, 0x75, 0x5D];
        let mut coder = BlockCoder::default();

        decode_block(
            &data,
            1,
            5,
            SubBandType::LowLow,
            6,
            0,
            16,
            &CodeBlockStyle::default(),
            &mut coder,
        )
        .unwrap();

        assert_eq!(
            decoded_coefficients(&coder, 5),
            vec![-26, -22, -30, -32, -19]
        );
    }

    // Second packet from the example in T.800 Section J.10.4.
    #[test]
    fn known_answer_column_lh() {
        let data = [0x0F, 0xB1, 0x76];
        let mut coder = BlockCoder::default();

        decode_block(
            &data,
            1,
            4,
            SubBandType::LowHigh,
            3,
            0,
            7,
            &CodeBlockStyle::default(),
            &mut coder,
        )
        .unwrap();

        assert_eq!(decoded_coefficients(&coder, 4), vec![1, 5, 1, 0]);
    }

    #[test]
    fn pass_count_validation() {
        let mut coder = BlockCoder::default();

        // 16 passes need six bitplanes, but only three are declared.
        let result = decode_block(
            &[0x00; 4],
            1,
            5,
            SubBandType::LowLow,
            3,
            0,
            16,
            &CodeBlockStyle::default(),
            &mut coder,
        );

        assert!(result.is_none());
    }

    fn round_trip(width: u32, height: u32, band_type: SubBandType, seed: u64, amplitude: u32) {
        let len = (width * height) as usize;
        let mut state = seed;
        let coefficients: Vec<i32> = (0..len)
            .map(|_| {
                state ^= state << 13;
                state ^= state >> 7;
                state ^= state << 17;
                // Mix in runs of zeroes so the run-length primitive is hit.
                if state % 5 < 2 {
                    0
                } else {
                    (state % (2 * amplitude as u64 + 1)) as i32 - amplitude as i32
                }
            })
            .collect();

        let max_magnitude = coefficients.iter().map(|c| c.unsigned_abs()).max().unwrap();
        if max_magnitude == 0 {
            return;
        }

        let num_bitplanes = 32 - max_magnitude.leading_zeros() as u8 + 2;
        let missing = num_bitplanes - (32 - max_magnitude.leading_zeros() as u8);
        let planes = num_bitplanes - missing;
        let num_passes = 3 * planes as u32 - 2;

        let mut coder = BlockCoder::default();
        let data = encode_block(
            &coefficients,
            width,
            height,
            band_type,
            num_bitplanes,
            missing,
            &mut coder,
        );

        decode_block(
            &data,
            width,
            height,
            band_type,
            num_bitplanes,
            missing,
            num_passes,
            &CodeBlockStyle::default(),
            &mut coder,
        )
        .unwrap();

        assert_eq!(
            decoded_coefficients(&coder, len),
            coefficients,
            "{width}x{height} {band_type:?}"
        );
    }

    #[test]
    fn encode_decode_round_trip() {
        for band_type in [
            SubBandType::LowLow,
            SubBandType::HighLow,
            SubBandType::LowHigh,
            SubBandType::HighHigh,
        ] {
            round_trip(64, 64, band_type, 0x1234_5678_9ABC_DEF0, 1 << 15);
            round_trip(16, 16, band_type, 0xFEDC_BA98_7654_3210, 255);
            round_trip(5, 7, band_type, 0x0F0F_F0F0_1234_4321, 3);
            round_trip(1, 6, band_type, 0xAAAA_5555_AAAA_5555, 1000);
            round_trip(33, 3, band_type, 0x1111_2222_3333_4444, 77);
        }
    }
}
