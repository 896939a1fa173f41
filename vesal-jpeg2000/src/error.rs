//! Error types for JPEG 2000 encoding and decoding.

use core::fmt;

/// A decode failure, locating the problem within the frame being decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodeError {
    /// The index of the frame that was being decoded.
    pub frame_index: usize,
    /// The byte offset into the codestream at which the failure surfaced.
    pub offset: usize,
    /// What went wrong.
    pub kind: DecodeErrorKind,
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "frame {}, offset {}: {}",
            self.frame_index, self.offset, self.kind
        )
    }
}

impl std::error::Error for DecodeError {}

/// The reason a decode operation failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeErrorKind {
    /// Errors related to codestream markers.
    Marker(MarkerError),
    /// Errors related to image dimensions and validation.
    Validation(ValidationError),
    /// Errors related to entropy decoding and tile processing.
    Decoding(DecodingError),
}

/// Errors related to codestream markers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkerError {
    /// Invalid marker encountered.
    Invalid,
    /// Expected a specific marker.
    Expected(&'static str),
    /// Missing a required marker.
    Missing(&'static str),
    /// Failed to read or parse a marker segment.
    ParseFailure(&'static str),
    /// A marker segment declares a length that exceeds the codestream.
    SegmentOutOfBounds(&'static str),
}

/// Errors related to image dimensions and validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationError {
    /// Invalid image dimensions.
    InvalidDimensions,
    /// Declared dimensions disagree with the caller's frame descriptor.
    DimensionMismatch,
    /// Declared component count disagrees with the caller's frame descriptor.
    ComponentCountMismatch,
    /// Invalid component metadata.
    InvalidComponentMetadata,
    /// The caller's frame descriptor is invalid.
    InvalidDescriptor(&'static str),
    /// Invalid progression order.
    InvalidProgressionOrder,
    /// Invalid transformation type.
    InvalidTransformation,
    /// Invalid quantization style.
    InvalidQuantizationStyle,
    /// A feature outside the supported profile was requested.
    Unsupported(&'static str),
}

/// Errors related to entropy decoding and tile processing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodingError {
    /// Unexpected end of data.
    UnexpectedEof,
    /// Number of bitplanes in a code-block is too large.
    TooManyBitplanes,
    /// A packet header could not be decoded.
    InvalidPacketHeader,
    /// A tile-part declares data outside the codestream.
    InvalidTilePart,
}

impl fmt::Display for DecodeErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Marker(e) => write!(f, "{e}"),
            Self::Validation(e) => write!(f, "{e}"),
            Self::Decoding(e) => write!(f, "{e}"),
        }
    }
}

impl fmt::Display for MarkerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Invalid => write!(f, "invalid marker"),
            Self::Expected(marker) => write!(f, "expected {marker} marker"),
            Self::Missing(marker) => write!(f, "missing {marker} marker"),
            Self::ParseFailure(marker) => write!(f, "failed to parse {marker} marker"),
            Self::SegmentOutOfBounds(marker) => {
                write!(f, "{marker} marker segment exceeds the codestream")
            }
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidDimensions => write!(f, "invalid image dimensions"),
            Self::DimensionMismatch => {
                write!(f, "codestream dimensions disagree with the frame descriptor")
            }
            Self::ComponentCountMismatch => {
                write!(f, "component count disagrees with the frame descriptor")
            }
            Self::InvalidComponentMetadata => write!(f, "invalid component metadata"),
            Self::InvalidDescriptor(what) => write!(f, "invalid frame descriptor: {what}"),
            Self::InvalidProgressionOrder => write!(f, "invalid progression order"),
            Self::InvalidTransformation => write!(f, "invalid transformation type"),
            Self::InvalidQuantizationStyle => write!(f, "invalid quantization style"),
            Self::Unsupported(what) => write!(f, "unsupported feature: {what}"),
        }
    }
}

impl fmt::Display for DecodingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnexpectedEof => write!(f, "unexpected end of data"),
            Self::TooManyBitplanes => write!(f, "number of bitplanes is too large"),
            Self::InvalidPacketHeader => write!(f, "failed to decode packet header"),
            Self::InvalidTilePart => write!(f, "invalid tile-part data"),
        }
    }
}

impl std::error::Error for DecodeErrorKind {}
impl std::error::Error for MarkerError {}
impl std::error::Error for ValidationError {}
impl std::error::Error for DecodingError {}

impl From<MarkerError> for DecodeErrorKind {
    fn from(e: MarkerError) -> Self {
        Self::Marker(e)
    }
}

impl From<ValidationError> for DecodeErrorKind {
    fn from(e: ValidationError) -> Self {
        Self::Validation(e)
    }
}

impl From<DecodingError> for DecodeErrorKind {
    fn from(e: DecodingError) -> Self {
        Self::Decoding(e)
    }
}

/// An invalid encode request, reported synchronously at the API boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodeError {
    /// The encoder options are out of range.
    InvalidOptions(&'static str),
    /// The frame descriptor or pixel buffer is inconsistent.
    InvalidImage(&'static str),
}

impl fmt::Display for EncodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidOptions(what) => write!(f, "invalid encoder options: {what}"),
            Self::InvalidImage(what) => write!(f, "invalid image: {what}"),
        }
    }
}

impl std::error::Error for EncodeError {}

/// Result type for decoding stages, before frame/offset context is attached.
pub(crate) type Result<T> = core::result::Result<T, DecodeErrorKind>;

macro_rules! bail {
    ($err:expr) => {
        return Err($err.into())
    };
}

macro_rules! err {
    ($err:expr) => {
        Err($err.into())
    };
}

pub(crate) use bail;
pub(crate) use err;
