//! Codestream marker segments (Annex A): parsing and emission of the
//! main header, plus the marker constants.

use crate::error::{MarkerError, Result, ValidationError, bail, err};
use crate::reader::Reader;
use crate::tile::SubBandType;
use crate::writer::Writer;
use log::debug;

/// The parsed, immutable main header of a codestream.
#[derive(Debug, Clone)]
pub struct CodestreamHeader {
    /// Image and tile geometry from the SIZ segment.
    pub size: SizeData,
    /// Coding style from the COD segment.
    pub coding: CodingStyle,
    /// Quantization parameters from the QCD segment.
    pub quantization: QuantizationInfo,
}

/// Progression order (Table A.16).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressionOrder {
    /// Layer-resolution-component-position.
    Lrcp,
    /// Resolution-layer-component-position.
    Rlcp,
    /// Resolution-position-component-layer.
    Rpcl,
    /// Position-component-resolution-layer.
    Pcrl,
    /// Component-position-resolution-layer.
    Cprl,
}

impl ProgressionOrder {
    fn from_u8(value: u8) -> Result<Self> {
        match value {
            0 => Ok(Self::Lrcp),
            1 => Ok(Self::Rlcp),
            2 => Ok(Self::Rpcl),
            3 => Ok(Self::Pcrl),
            4 => Ok(Self::Cprl),
            _ => err!(ValidationError::InvalidProgressionOrder),
        }
    }

    pub(crate) fn to_u8(self) -> u8 {
        match self {
            Self::Lrcp => 0,
            Self::Rlcp => 1,
            Self::Rpcl => 2,
            Self::Pcrl => 3,
            Self::Cprl => 4,
        }
    }
}

/// Wavelet transformation type (Table A.20).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaveletTransform {
    /// The irreversible 9/7 filter of the lossy path.
    Irreversible97,
    /// The reversible 5/3 filter of the lossless path.
    Reversible53,
}

impl WaveletTransform {
    fn from_u8(value: u8) -> Result<Self> {
        match value {
            0 => Ok(Self::Irreversible97),
            1 => Ok(Self::Reversible53),
            _ => err!(ValidationError::InvalidTransformation),
        }
    }

    pub(crate) fn to_u8(self) -> u8 {
        match self {
            Self::Irreversible97 => 0,
            Self::Reversible53 => 1,
        }
    }
}

/// Code-block style flags (Table A.19).
#[derive(Debug, Clone, Copy, Default)]
pub struct CodeBlockStyle {
    pub selective_arithmetic_coding_bypass: bool,
    pub reset_context_probabilities: bool,
    pub termination_on_each_pass: bool,
    pub vertically_causal_context: bool,
    pub predictable_termination: bool,
    pub segmentation_symbols: bool,
}

impl CodeBlockStyle {
    fn from_u8(value: u8) -> Self {
        Self {
            selective_arithmetic_coding_bypass: (value & 0x01) != 0,
            reset_context_probabilities: (value & 0x02) != 0,
            termination_on_each_pass: (value & 0x04) != 0,
            vertically_causal_context: (value & 0x08) != 0,
            predictable_termination: (value & 0x10) != 0,
            segmentation_symbols: (value & 0x20) != 0,
        }
    }
}

/// Coding style from the COD marker (A.6.1).
#[derive(Debug, Clone)]
pub struct CodingStyle {
    /// The order in which packets appear in the codestream.
    pub progression_order: ProgressionOrder,
    /// Number of quality layers.
    pub num_layers: u16,
    /// Whether the multiple-component transform is applied.
    pub mct: bool,
    /// Whether SOP marker segments may precede each packet.
    pub uses_sop: bool,
    /// Whether an EPH marker terminates each packet header.
    pub uses_eph: bool,
    /// Number of wavelet decomposition levels.
    pub levels: u8,
    /// log2 of the code-block width.
    pub code_block_width_log2: u8,
    /// log2 of the code-block height.
    pub code_block_height_log2: u8,
    /// Code-block coding style flags.
    pub code_block_style: CodeBlockStyle,
    /// The wavelet filter in use.
    pub transform: WaveletTransform,
    /// Precinct size exponents per resolution, `(15, 15)` when the
    /// maximum size is in effect.
    pub precinct_exponents: Vec<(u8, u8)>,
}

impl CodingStyle {
    pub(crate) fn code_block_width(&self) -> u32 {
        1 << self.code_block_width_log2
    }

    pub(crate) fn code_block_height(&self) -> u32 {
        1 << self.code_block_height_log2
    }
}

/// Quantization style (Table A.28).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuantizationStyle {
    /// No quantization; reversible path.
    None,
    /// One step size, derived for all subbands.
    ScalarDerived,
    /// One step size signalled per subband.
    ScalarExpounded,
}

/// An exponent/mantissa pair from the QCD marker (Equation E-3).
#[derive(Clone, Copy, Debug)]
pub struct StepSize {
    pub exponent: u8,
    pub mantissa: u16,
}

/// Quantization properties from the QCD marker (A.6.4).
#[derive(Clone, Debug)]
pub struct QuantizationInfo {
    pub style: QuantizationStyle,
    pub guard_bits: u8,
    pub step_sizes: Vec<StepSize>,
}

impl QuantizationInfo {
    /// The exponent and mantissa for the given subband (E.1).
    pub(crate) fn exponent_mantissa(
        &self,
        band_type: SubBandType,
        resolution: u8,
        levels: u8,
    ) -> (u8, u16) {
        let band_index = match band_type {
            SubBandType::LowLow => 0,
            SubBandType::HighLow => 0,
            SubBandType::LowHigh => 1,
            SubBandType::HighHigh => 2,
        };

        match self.style {
            QuantizationStyle::None | QuantizationStyle::ScalarExpounded => {
                let idx = if resolution == 0 {
                    0
                } else {
                    1 + (resolution as usize - 1) * 3 + band_index
                };

                let entry = self.step_sizes.get(idx).copied().unwrap_or(StepSize {
                    exponent: 0,
                    mantissa: 0,
                });

                (entry.exponent, entry.mantissa)
            }
            QuantizationStyle::ScalarDerived => {
                // Equation (E-5).
                let entry = self.step_sizes[0];
                let n_b = if resolution == 0 {
                    levels as i32
                } else {
                    levels as i32 + 1 - resolution as i32
                };
                let exponent = (entry.exponent as i32 - levels as i32 + n_b).clamp(0, 31);

                (exponent as u8, entry.mantissa)
            }
        }
    }

    /// The full bit budget Mb of a subband (Equation E-2).
    pub(crate) fn num_bitplanes(&self, band_type: SubBandType, resolution: u8, levels: u8) -> u8 {
        let (exponent, _) = self.exponent_mantissa(band_type, resolution, levels);

        (self.guard_bits as i32 + exponent as i32 - 1).clamp(0, 31) as u8
    }
}

/// Parse the main header. The reader is expected to sit at the start of
/// the codestream; it is left positioned on the first tile-part marker.
pub(crate) fn parse_main_header(reader: &mut Reader<'_>) -> Result<CodestreamHeader> {
    if reader.read_marker() != Some(markers::SOC) {
        bail!(MarkerError::Expected("SOC"));
    }

    if reader.peek_marker() != Some(markers::SIZ) {
        bail!(MarkerError::Expected("SIZ"));
    }
    let _ = reader.read_marker();

    let size = parse_siz(reader)?;

    let mut cod = None;
    let mut qcd = None;

    loop {
        let marker = match reader.peek_marker() {
            Some(marker) => marker,
            None => bail!(MarkerError::Invalid),
        };

        match marker {
            markers::SOT | markers::SOD | markers::EOC => break,
            markers::COD => {
                let _ = reader.read_marker();
                cod = Some(parse_cod(reader)?);
            }
            markers::QCD => {
                let _ = reader.read_marker();
                qcd = Some(parse_qcd(reader)?);
            }
            markers::COC => bail!(ValidationError::Unsupported("per-component coding style")),
            markers::QCC => bail!(ValidationError::Unsupported("per-component quantization")),
            markers::POC => bail!(ValidationError::Unsupported("progression order change")),
            markers::RGN => bail!(ValidationError::Unsupported("region of interest")),
            markers::PPM => bail!(ValidationError::Unsupported("packed packet headers")),
            other => {
                // Unknown segments are skipped by their length field.
                debug!("skipping marker segment 0x{other:02X} in main header");
                let _ = reader.read_marker();
                skip_segment(reader, "unknown")?;
            }
        }
    }

    let cod = match cod {
        Some(cod) => cod,
        None => bail!(MarkerError::Missing("COD")),
    };
    let qcd = match qcd {
        Some(qcd) => qcd,
        None => bail!(MarkerError::Missing("QCD")),
    };

    if cod.code_block_style.selective_arithmetic_coding_bypass
        || cod.code_block_style.termination_on_each_pass
    {
        bail!(ValidationError::Unsupported("code-block style"));
    }

    Ok(CodestreamHeader {
        size,
        coding: cod,
        quantization: qcd,
    })
}

/// Skip over a marker segment via its 2-byte length field.
pub(crate) fn skip_segment(reader: &mut Reader<'_>, name: &'static str) -> Result<()> {
    let length = match reader.read_u16() {
        Some(length) if length >= 2 => length,
        _ => bail!(MarkerError::ParseFailure(name)),
    };

    if reader.skip_bytes(length as usize - 2).is_none() {
        bail!(MarkerError::SegmentOutOfBounds(name));
    }

    Ok(())
}

/// Image and tile geometry from the SIZ marker (A.5.1).
#[derive(Debug, Clone)]
pub struct SizeData {
    /// Width of the reference grid (Xsiz).
    pub grid_width: u32,
    /// Height of the reference grid (Ysiz).
    pub grid_height: u32,
    /// Horizontal offset to the image area (XOsiz).
    pub image_x_offset: u32,
    /// Vertical offset to the image area (YOsiz).
    pub image_y_offset: u32,
    /// Width of one reference tile (XTsiz).
    pub tile_width: u32,
    /// Height of one reference tile (YTsiz).
    pub tile_height: u32,
    /// Horizontal offset to the first tile (XTOsiz).
    pub tile_x_offset: u32,
    /// Vertical offset to the first tile (YTOsiz).
    pub tile_y_offset: u32,
    /// Per-component precision and subsampling (Ssiz/XRsiz/YRsiz).
    pub components: Vec<ComponentSize>,
}

/// Component information from the SIZ marker (Table A.11).
#[derive(Debug, Clone, Copy)]
pub struct ComponentSize {
    /// Bit depth of the component.
    pub precision: u8,
    /// Whether samples are signed.
    pub signed: bool,
    /// Horizontal subsampling factor.
    pub horizontal_subsampling: u8,
    /// Vertical subsampling factor.
    pub vertical_subsampling: u8,
}

impl SizeData {
    /// The width of the image area.
    pub fn image_width(&self) -> u32 {
        self.grid_width - self.image_x_offset
    }

    /// The height of the image area.
    pub fn image_height(&self) -> u32 {
        self.grid_height - self.image_y_offset
    }

    /// The number of tiles in the x direction (Equation B-5).
    pub fn num_x_tiles(&self) -> u32 {
        (self.grid_width - self.tile_x_offset).div_ceil(self.tile_width)
    }

    /// The number of tiles in the y direction (Equation B-5).
    pub fn num_y_tiles(&self) -> u32 {
        (self.grid_height - self.tile_y_offset).div_ceil(self.tile_height)
    }
}

fn parse_siz(reader: &mut Reader<'_>) -> Result<SizeData> {
    let size = parse_siz_inner(reader).ok_or(MarkerError::ParseFailure("SIZ"))?;

    if size.grid_width == 0
        || size.grid_height == 0
        || size.tile_width == 0
        || size.tile_height == 0
    {
        bail!(ValidationError::InvalidDimensions);
    }

    if size.image_x_offset >= size.grid_width || size.image_y_offset >= size.grid_height {
        bail!(ValidationError::InvalidDimensions);
    }

    if size.components.is_empty() {
        bail!(ValidationError::InvalidComponentMetadata);
    }

    for component in &size.components {
        if component.precision == 0 || component.precision > 16 {
            bail!(ValidationError::Unsupported("component precision"));
        }

        if component.horizontal_subsampling != 1 || component.vertical_subsampling != 1 {
            bail!(ValidationError::Unsupported("component subsampling"));
        }
    }

    // The decode pipeline handles the single-tile layout produced for
    // the DICOM transfer syntaxes.
    if size.num_x_tiles() != 1 || size.num_y_tiles() != 1 {
        bail!(ValidationError::Unsupported("multiple tiles"));
    }

    if size.image_x_offset != 0 || size.image_y_offset != 0 {
        bail!(ValidationError::Unsupported("reference grid offsets"));
    }

    Ok(size)
}

fn parse_siz_inner(reader: &mut Reader<'_>) -> Option<SizeData> {
    // Length.
    let _ = reader.read_u16()?;
    // Decoder capabilities (Rsiz).
    let _ = reader.read_u16()?;

    let grid_width = reader.read_u32()?;
    let grid_height = reader.read_u32()?;
    let image_x_offset = reader.read_u32()?;
    let image_y_offset = reader.read_u32()?;
    let tile_width = reader.read_u32()?;
    let tile_height = reader.read_u32()?;
    let tile_x_offset = reader.read_u32()?;
    let tile_y_offset = reader.read_u32()?;
    let num_components = reader.read_u16()?;

    let mut components = Vec::with_capacity(num_components as usize);
    for _ in 0..num_components {
        let ssiz = reader.read_byte()?;
        let x_rsiz = reader.read_byte()?;
        let y_rsiz = reader.read_byte()?;

        components.push(ComponentSize {
            precision: (ssiz & 0x7F) + 1,
            signed: (ssiz & 0x80) != 0,
            horizontal_subsampling: x_rsiz,
            vertical_subsampling: y_rsiz,
        });
    }

    Some(SizeData {
        grid_width,
        grid_height,
        image_x_offset,
        image_y_offset,
        tile_width,
        tile_height,
        tile_x_offset,
        tile_y_offset,
        components,
    })
}

fn parse_cod(reader: &mut Reader<'_>) -> Result<CodingStyle> {
    parse_cod_inner(reader).ok_or_else(|| MarkerError::ParseFailure("COD").into())
}

fn parse_cod_inner(reader: &mut Reader<'_>) -> Option<CodingStyle> {
    // Length.
    let _ = reader.read_u16()?;

    let scod = reader.read_byte()?;
    let has_precincts = (scod & 0x01) != 0;
    let uses_sop = (scod & 0x02) != 0;
    let uses_eph = (scod & 0x04) != 0;

    let progression_order = ProgressionOrder::from_u8(reader.read_byte()?).ok()?;
    let num_layers = reader.read_u16()?;

    if num_layers == 0 {
        return None;
    }

    let mct = reader.read_byte()? == 1;

    let levels = reader.read_byte()?;
    if levels > 32 {
        return None;
    }

    let code_block_width_log2 = (reader.read_byte()? & 0x0F) + 2;
    let code_block_height_log2 = (reader.read_byte()? & 0x0F) + 2;

    if code_block_width_log2 > 10
        || code_block_height_log2 > 10
        || code_block_width_log2 + code_block_height_log2 > 12
    {
        return None;
    }

    let code_block_style = CodeBlockStyle::from_u8(reader.read_byte()?);
    let transform = WaveletTransform::from_u8(reader.read_byte()?).ok()?;

    let mut precinct_exponents = Vec::new();
    if has_precincts {
        for _ in 0..=levels {
            // Table A.21.
            let precinct_size = reader.read_byte()?;
            precinct_exponents.push((precinct_size & 0x0F, precinct_size >> 4));
        }
    } else {
        // "Entropy coder, precincts with PPx = 15 and PPy = 15."
        for _ in 0..=levels {
            precinct_exponents.push((15, 15));
        }
    }

    Some(CodingStyle {
        progression_order,
        num_layers,
        mct,
        uses_sop,
        uses_eph,
        levels,
        code_block_width_log2,
        code_block_height_log2,
        code_block_style,
        transform,
        precinct_exponents,
    })
}

fn parse_qcd(reader: &mut Reader<'_>) -> Result<QuantizationInfo> {
    parse_qcd_inner(reader).ok_or_else(|| MarkerError::ParseFailure("QCD").into())
}

fn parse_qcd_inner(reader: &mut Reader<'_>) -> Option<QuantizationInfo> {
    let length = reader.read_u16()?;

    let sqcd = reader.read_byte()?;
    let style = match sqcd & 0x1F {
        0 => QuantizationStyle::None,
        1 => QuantizationStyle::ScalarDerived,
        2 => QuantizationStyle::ScalarExpounded,
        _ => return None,
    };
    let guard_bits = (sqcd >> 5) & 0x07;

    let remaining = (length as usize).checked_sub(3)?;
    let mut step_sizes = Vec::new();

    match style {
        QuantizationStyle::None => {
            // One byte per subband: a 5-bit exponent, 3 reserved bits.
            for _ in 0..remaining {
                let value = reader.read_byte()?;
                step_sizes.push(StepSize {
                    exponent: value >> 3,
                    mantissa: 0,
                });
            }
        }
        QuantizationStyle::ScalarDerived => {
            let value = reader.read_u16()?;
            step_sizes.push(StepSize {
                exponent: (value >> 11) as u8,
                mantissa: value & 0x7FF,
            });
        }
        QuantizationStyle::ScalarExpounded => {
            for _ in 0..remaining / 2 {
                let value = reader.read_u16()?;
                step_sizes.push(StepSize {
                    exponent: (value >> 11) as u8,
                    mantissa: value & 0x7FF,
                });
            }
        }
    }

    Some(QuantizationInfo {
        style,
        guard_bits,
        step_sizes,
    })
}

/// Emit SOC, SIZ, COD and QCD for the given header.
pub(crate) fn write_main_header(writer: &mut Writer, header: &CodestreamHeader) {
    writer.write_marker(markers::SOC);

    // SIZ (A.5.1): fixed 38 + 3 * components bytes including the marker.
    let mut siz = Writer::new();
    siz.write_u16(0); // Rsiz: no restrictions.
    siz.write_u32(header.size.grid_width);
    siz.write_u32(header.size.grid_height);
    siz.write_u32(header.size.image_x_offset);
    siz.write_u32(header.size.image_y_offset);
    siz.write_u32(header.size.tile_width);
    siz.write_u32(header.size.tile_height);
    siz.write_u32(header.size.tile_x_offset);
    siz.write_u32(header.size.tile_y_offset);
    siz.write_u16(header.size.components.len() as u16);
    for component in &header.size.components {
        let ssiz = ((component.signed as u8) << 7) | (component.precision - 1);
        siz.write_byte(ssiz);
        siz.write_byte(component.horizontal_subsampling);
        siz.write_byte(component.vertical_subsampling);
    }
    writer.write_segment(markers::SIZ, &siz.finish());

    // COD (A.6.1).
    let coding = &header.coding;
    let mut cod = Writer::new();
    let scod = ((coding.uses_eph as u8) << 2) | ((coding.uses_sop as u8) << 1);
    cod.write_byte(scod);
    cod.write_byte(coding.progression_order.to_u8());
    cod.write_u16(coding.num_layers);
    cod.write_byte(coding.mct as u8);
    cod.write_byte(coding.levels);
    cod.write_byte(coding.code_block_width_log2 - 2);
    cod.write_byte(coding.code_block_height_log2 - 2);
    cod.write_byte(0); // Code-block style: none of the optional modes.
    cod.write_byte(coding.transform.to_u8());
    writer.write_segment(markers::COD, &cod.finish());

    // QCD (A.6.4).
    let quantization = &header.quantization;
    let mut qcd = Writer::new();
    let sqcd_style = match quantization.style {
        QuantizationStyle::None => 0,
        QuantizationStyle::ScalarDerived => 1,
        QuantizationStyle::ScalarExpounded => 2,
    };
    qcd.write_byte((quantization.guard_bits << 5) | sqcd_style);
    for step in &quantization.step_sizes {
        match quantization.style {
            QuantizationStyle::None => qcd.write_byte(step.exponent << 3),
            _ => qcd.write_u16(((step.exponent as u16) << 11) | (step.mantissa & 0x7FF)),
        }
    }
    writer.write_segment(markers::QCD, &qcd.finish());
}

/// Marker codes (Table A.2).
pub(crate) mod markers {
    /// Start of codestream - 'SOC'.
    pub(crate) const SOC: u8 = 0x4F;
    /// Start of tile-part - 'SOT'.
    pub(crate) const SOT: u8 = 0x90;
    /// Start of data - 'SOD'.
    pub(crate) const SOD: u8 = 0x93;
    /// End of codestream - 'EOC'.
    pub(crate) const EOC: u8 = 0xD9;

    /// Image and tile size - 'SIZ'.
    pub(crate) const SIZ: u8 = 0x51;

    /// Coding style default - 'COD'.
    pub(crate) const COD: u8 = 0x52;
    /// Coding style component - 'COC'.
    pub(crate) const COC: u8 = 0x53;
    /// Region-of-interest - 'RGN'.
    pub(crate) const RGN: u8 = 0x5E;
    /// Quantization default - 'QCD'.
    pub(crate) const QCD: u8 = 0x5C;
    /// Quantization component - 'QCC'.
    pub(crate) const QCC: u8 = 0x5D;
    /// Progression order change - 'POC'.
    pub(crate) const POC: u8 = 0x5F;

    /// Tile-part lengths - 'TLM'.
    pub(crate) const TLM: u8 = 0x55;
    /// Packet length, tile-part header - 'PLT'.
    pub(crate) const PLT: u8 = 0x58;
    /// Packed packet headers, main header - 'PPM'.
    pub(crate) const PPM: u8 = 0x60;
    /// Packed packet headers, tile-part header - 'PPT'.
    pub(crate) const PPT: u8 = 0x61;

    /// Start of packet - 'SOP'.
    pub(crate) const SOP: u8 = 0x91;
    /// End of packet header - 'EPH'.
    pub(crate) const EPH: u8 = 0x92;

    /// Comment - 'COM'.
    pub(crate) const COM: u8 = 0x64;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DecodeErrorKind;

    fn test_header() -> CodestreamHeader {
        CodestreamHeader {
            size: SizeData {
                grid_width: 64,
                grid_height: 48,
                image_x_offset: 0,
                image_y_offset: 0,
                tile_width: 64,
                tile_height: 48,
                tile_x_offset: 0,
                tile_y_offset: 0,
                components: vec![
                    ComponentSize {
                        precision: 8,
                        signed: false,
                        horizontal_subsampling: 1,
                        vertical_subsampling: 1,
                    };
                    3
                ],
            },
            coding: CodingStyle {
                progression_order: ProgressionOrder::Lrcp,
                num_layers: 1,
                mct: true,
                uses_sop: false,
                uses_eph: false,
                levels: 5,
                code_block_width_log2: 6,
                code_block_height_log2: 6,
                code_block_style: CodeBlockStyle::default(),
                transform: WaveletTransform::Reversible53,
                precinct_exponents: vec![(15, 15); 6],
            },
            quantization: QuantizationInfo {
                style: QuantizationStyle::None,
                guard_bits: 2,
                step_sizes: vec![
                    StepSize {
                        exponent: 8,
                        mantissa: 0
                    };
                    16
                ],
            },
        }
    }

    #[test]
    fn header_round_trip() {
        let header = test_header();
        let mut writer = Writer::new();
        write_main_header(&mut writer, &header);
        let bytes = writer.finish();

        // SIZ is 38 + 3 * components bytes including the marker bytes.
        assert_eq!(&bytes[..4], &[0xFF, 0x4F, 0xFF, 0x51]);
        assert_eq!(u16::from_be_bytes([bytes[4], bytes[5]]), 38 + 3 * 3);

        let mut reader = Reader::new(&bytes);
        let parsed = parse_main_header(&mut reader).unwrap();

        assert_eq!(parsed.size.grid_width, 64);
        assert_eq!(parsed.size.grid_height, 48);
        assert_eq!(parsed.size.components.len(), 3);
        assert_eq!(parsed.coding.levels, 5);
        assert_eq!(parsed.coding.num_layers, 1);
        assert!(parsed.coding.mct);
        assert_eq!(parsed.coding.code_block_width_log2, 6);
        assert_eq!(parsed.coding.transform, WaveletTransform::Reversible53);
        assert_eq!(parsed.quantization.guard_bits, 2);
        assert_eq!(parsed.quantization.step_sizes.len(), 16);
        assert_eq!(parsed.quantization.step_sizes[0].exponent, 8);
    }

    #[test]
    fn missing_siz_is_reported() {
        // SOC immediately followed by COD.
        let data = [0xFF, 0x4F, 0xFF, 0x52, 0x00, 0x0C];
        let mut reader = Reader::new(&data);

        let err = parse_main_header(&mut reader).unwrap_err();
        assert_eq!(
            err,
            DecodeErrorKind::Marker(MarkerError::Expected("SIZ"))
        );
        assert!(format!("{err}").contains("SIZ"));
    }

    #[test]
    fn unknown_segments_are_skipped() {
        let header = test_header();
        let mut writer = Writer::new();
        write_main_header(&mut writer, &header);
        let mut bytes = writer.finish();

        // Append a COM segment and an EOC so parsing terminates.
        bytes.extend_from_slice(&[0xFF, 0x64, 0x00, 0x06, b'h', b'i', 0x00, 0x00]);
        bytes.extend_from_slice(&[0xFF, 0xD9]);

        let mut reader = Reader::new(&bytes);
        assert!(parse_main_header(&mut reader).is_ok());
    }
}
