/*!
A memory-safe, pure-Rust JPEG 2000 Part-1 codec for DICOM pixel data.

Covers the profile used by the DICOM transfer syntaxes
`1.2.840.10008.1.2.4.90` (lossless, reversible 5/3 wavelet) and
`1.2.840.10008.1.2.4.91` (lossy, irreversible 9/7 wavelet): one tile,
one tile-part, up to three components without subsampling, full packet
headers with tag-tree coding.

Frames are decoded with [`decode_frame`] into a caller-supplied buffer
described by an [`ImageInfo`], and produced with [`encode_frame`].
[`parse_header`] exposes the main header without decoding,
[`is_jpeg2000`] sniffs the SOC marker.
*/

#![forbid(unsafe_code)]

mod arith;
mod bitplane;
mod codestream;
mod decode;
mod dwt;
mod encode;
mod error;
mod mct;
mod packet;
mod progression;
mod reader;
mod tag_tree;
mod tile;
mod writer;

pub use codestream::{
    CodeBlockStyle, CodestreamHeader, CodingStyle, ComponentSize, ProgressionOrder,
    QuantizationInfo, QuantizationStyle, SizeData, StepSize, WaveletTransform,
};
pub use error::{
    DecodeError, DecodeErrorKind, DecodingError, EncodeError, MarkerError, ValidationError,
};

use reader::Reader;

/// The caller's description of a frame buffer: geometry, sample format
/// and memory layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageInfo {
    /// Width of the frame in samples.
    pub columns: u32,
    /// Height of the frame in samples.
    pub rows: u32,
    /// Samples per pixel: 1 (grayscale) or 3 (color).
    pub samples_per_pixel: u8,
    /// Bits stored per sample, 2 through 16.
    pub bits_stored: u8,
    /// Whether samples are signed (two's complement).
    pub signed: bool,
    /// Whether the buffer is planar (`RRR...GGG...BBB`) rather than
    /// interleaved (`RGBRGB...`).
    pub planar: bool,
    /// Bytes per stored sample: 1, 2 or 4 (little endian).
    pub bytes_per_sample: u8,
}

impl ImageInfo {
    /// The size in bytes of one frame in this layout.
    pub fn frame_size(&self) -> usize {
        self.columns as usize
            * self.rows as usize
            * self.samples_per_pixel as usize
            * self.bytes_per_sample as usize
    }

    pub(crate) fn validate(&self) -> core::result::Result<(), &'static str> {
        if self.columns == 0 || self.rows == 0 {
            return Err("frame dimensions must be nonzero");
        }

        if !matches!(self.samples_per_pixel, 1 | 3) {
            return Err("samples per pixel must be 1 or 3");
        }

        if !(2..=16).contains(&self.bits_stored) {
            return Err("bits stored must be between 2 and 16");
        }

        if !matches!(self.bytes_per_sample, 1 | 2 | 4) {
            return Err("bytes per sample must be 1, 2 or 4");
        }

        if self.bits_stored as usize > self.bytes_per_sample as usize * 8 {
            return Err("bits stored exceeds the sample container");
        }

        Ok(())
    }
}

/// Encoder configuration. The defaults produce five decomposition
/// levels, 64x64 code-blocks and a single quality layer in LRCP order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncoderOptions {
    /// Number of wavelet decomposition levels, 0 through 32.
    pub decomposition_levels: u8,
    /// Code-block width: a power of two, 4 through 1024.
    pub code_block_width: u32,
    /// Code-block height: a power of two; the code-block area must not
    /// exceed 4096 samples.
    pub code_block_height: u32,
    /// Number of quality layers, at least 1.
    pub num_layers: u16,
    /// Packet progression order.
    pub progression_order: ProgressionOrder,
    /// Compression ratio target for the lossy path, at least 1.
    pub compression_ratio: u32,
}

impl Default for EncoderOptions {
    fn default() -> Self {
        Self {
            decomposition_levels: 5,
            code_block_width: 64,
            code_block_height: 64,
            num_layers: 1,
            progression_order: ProgressionOrder::Lrcp,
            compression_ratio: 10,
        }
    }
}

impl EncoderOptions {
    pub(crate) fn validate(&self) -> core::result::Result<(), EncodeError> {
        if self.decomposition_levels > 32 {
            return Err(EncodeError::InvalidOptions(
                "decomposition levels must be at most 32",
            ));
        }

        for dim in [self.code_block_width, self.code_block_height] {
            if !dim.is_power_of_two() || !(4..=1024).contains(&dim) {
                return Err(EncodeError::InvalidOptions(
                    "code-block dimensions must be powers of two between 4 and 1024",
                ));
            }
        }

        if self.code_block_width * self.code_block_height > 4096 {
            return Err(EncodeError::InvalidOptions(
                "code-block area must not exceed 4096 samples",
            ));
        }

        if self.num_layers == 0 {
            return Err(EncodeError::InvalidOptions(
                "at least one quality layer is required",
            ));
        }

        if self.compression_ratio == 0 {
            return Err(EncodeError::InvalidOptions(
                "compression ratio must be at least 1",
            ));
        }

        Ok(())
    }
}

/// Whether the buffer starts with a JPEG 2000 codestream (SOC marker).
pub fn is_jpeg2000(bytes: &[u8]) -> bool {
    bytes.starts_with(&[0xFF, 0x4F])
}

/// Parse the main header of a codestream without decoding any tile
/// data.
pub fn parse_header(codestream: &[u8]) -> Result<CodestreamHeader, DecodeError> {
    let mut reader = Reader::new(codestream);

    codestream::parse_main_header(&mut reader).map_err(|kind| DecodeError {
        frame_index: 0,
        offset: reader.offset(),
        kind,
    })
}

/// Decode one frame into `out`, whose layout is described by `info`.
///
/// `frame_index` only labels errors; each DICOM frame carries its own
/// codestream.
///
/// # Panics
///
/// Panics if `out` is smaller than `info.frame_size()`; sizing the
/// output buffer is the caller's contract.
pub fn decode_frame(
    codestream: &[u8],
    info: &ImageInfo,
    out: &mut [u8],
    frame_index: usize,
) -> Result<(), DecodeError> {
    decode::decode_frame(codestream, info, out, frame_index)
}

/// Encode one frame of raw samples into a complete codestream.
///
/// With `lossless` set the reversible 5/3 path is used and decoding
/// reproduces `pixels` bit-exactly; otherwise the irreversible 9/7 path
/// quantizes toward `options.compression_ratio`.
pub fn encode_frame(
    pixels: &[u8],
    info: &ImageInfo,
    options: &EncoderOptions,
    lossless: bool,
) -> Result<Vec<u8>, EncodeError> {
    encode::encode_frame(pixels, info, options, lossless)
}
