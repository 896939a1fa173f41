//! End-to-end encode/decode tests over the public API.

use vesal_jpeg2000::{
    EncoderOptions, ImageInfo, ProgressionOrder, WaveletTransform, decode_frame, encode_frame,
    is_jpeg2000, parse_header,
};

fn gray8(columns: u32, rows: u32) -> ImageInfo {
    ImageInfo {
        columns,
        rows,
        samples_per_pixel: 1,
        bits_stored: 8,
        signed: false,
        planar: false,
        bytes_per_sample: 1,
    }
}

fn xorshift(state: &mut u64) -> u64 {
    *state ^= *state << 13;
    *state ^= *state >> 7;
    *state ^= *state << 17;
    *state
}

fn round_trip(pixels: &[u8], info: &ImageInfo, options: &EncoderOptions) {
    let encoded = encode_frame(pixels, info, options, true).unwrap();

    assert!(is_jpeg2000(&encoded));
    assert_eq!(&encoded[..2], &[0xFF, 0x4F]);
    assert_eq!(&encoded[encoded.len() - 2..], &[0xFF, 0xD9]);

    let mut decoded = vec![0u8; info.frame_size()];
    decode_frame(&encoded, info, &mut decoded, 0).unwrap();

    assert_eq!(decoded, pixels);
}

#[test]
fn all_zero_grayscale_frame() {
    // A 16x16 8-bit frame of zeros: SOC first, EOC last, and an exact
    // round trip back to 256 zero bytes.
    let info = gray8(16, 16);
    let pixels = vec![0u8; info.frame_size()];

    round_trip(&pixels, &info, &EncoderOptions::default());
}

#[test]
fn rgb_gradient_frame() {
    let info = ImageInfo {
        columns: 64,
        rows: 64,
        samples_per_pixel: 3,
        bits_stored: 8,
        signed: false,
        planar: false,
        bytes_per_sample: 1,
    };

    let mut pixels = Vec::with_capacity(info.frame_size());
    for y in 0..64u32 {
        for x in 0..64u32 {
            pixels.push(x as u8);
            pixels.push(y as u8);
            pixels.push(((x + y) / 2) as u8);
        }
    }

    round_trip(&pixels, &info, &EncoderOptions::default());
}

#[test]
fn random_grayscale_frames() {
    let mut state = 0xDEAD_BEEF_CAFE_F00Du64;

    for (columns, rows) in [(16, 16), (37, 23), (64, 64), (1, 40), (128, 3)] {
        let info = gray8(columns, rows);
        let pixels: Vec<u8> = (0..info.frame_size())
            .map(|_| xorshift(&mut state) as u8)
            .collect();

        round_trip(&pixels, &info, &EncoderOptions::default());
    }
}

#[test]
fn sixteen_bit_samples() {
    let info = ImageInfo {
        columns: 48,
        rows: 32,
        samples_per_pixel: 1,
        bits_stored: 16,
        signed: false,
        planar: false,
        bytes_per_sample: 2,
    };

    let mut state = 0x1234_5678_9ABC_DEF0u64;
    let mut pixels = Vec::with_capacity(info.frame_size());
    for _ in 0..(48 * 32) {
        let value = (xorshift(&mut state) & 0xFFFF) as u16;
        pixels.extend_from_slice(&value.to_le_bytes());
    }

    round_trip(&pixels, &info, &EncoderOptions::default());
}

#[test]
fn signed_twelve_bit_samples() {
    let info = ImageInfo {
        columns: 33,
        rows: 41,
        samples_per_pixel: 1,
        bits_stored: 12,
        signed: true,
        planar: false,
        bytes_per_sample: 2,
    };

    let mut state = 0x0F1E_2D3C_4B5A_6978u64;
    let mut pixels = Vec::with_capacity(info.frame_size());
    for _ in 0..(33 * 41) {
        let value = ((xorshift(&mut state) % 4096) as i64 - 2048) as i16;
        pixels.extend_from_slice(&value.to_le_bytes());
    }

    round_trip(&pixels, &info, &EncoderOptions::default());
}

#[test]
fn planar_rgb_layout() {
    let info = ImageInfo {
        columns: 25,
        rows: 19,
        samples_per_pixel: 3,
        bits_stored: 8,
        signed: false,
        planar: true,
        bytes_per_sample: 1,
    };

    let mut state = 0xA5A5_5A5A_1234_4321u64;
    let pixels: Vec<u8> = (0..info.frame_size())
        .map(|_| xorshift(&mut state) as u8)
        .collect();

    round_trip(&pixels, &info, &EncoderOptions::default());
}

#[test]
fn alternate_encoder_options() {
    let info = gray8(50, 60);
    let mut state = 0x7777_8888_9999_AAAAu64;
    let pixels: Vec<u8> = (0..info.frame_size())
        .map(|_| xorshift(&mut state) as u8)
        .collect();

    for options in [
        EncoderOptions {
            decomposition_levels: 0,
            ..EncoderOptions::default()
        },
        EncoderOptions {
            decomposition_levels: 2,
            code_block_width: 32,
            code_block_height: 16,
            ..EncoderOptions::default()
        },
        EncoderOptions {
            progression_order: ProgressionOrder::Rlcp,
            ..EncoderOptions::default()
        },
        EncoderOptions {
            progression_order: ProgressionOrder::Cprl,
            ..EncoderOptions::default()
        },
        EncoderOptions {
            num_layers: 3,
            ..EncoderOptions::default()
        },
    ] {
        round_trip(&pixels, &info, &options);
    }
}

#[test]
fn lossy_path_stays_close() {
    let info = gray8(64, 64);
    let mut pixels = Vec::with_capacity(info.frame_size());
    for y in 0..64u32 {
        for x in 0..64u32 {
            pixels.push(((x * 2 + y * 2) / 2) as u8);
        }
    }

    let options = EncoderOptions {
        compression_ratio: 8,
        ..EncoderOptions::default()
    };
    let encoded = encode_frame(&pixels, &info, &options, false).unwrap();

    let header = parse_header(&encoded).unwrap();
    assert_eq!(header.coding.transform, WaveletTransform::Irreversible97);

    let mut decoded = vec![0u8; info.frame_size()];
    decode_frame(&encoded, &info, &mut decoded, 0).unwrap();

    let mae = pixels
        .iter()
        .zip(&decoded)
        .map(|(&a, &b)| (a as f64 - b as f64).abs())
        .sum::<f64>()
        / pixels.len() as f64;

    assert!(mae <= 4.0, "lossy reconstruction strayed too far: {mae}");
}

#[test]
fn missing_siz_names_the_marker() {
    // A valid SOC immediately followed by a COD segment.
    let broken = [0xFF, 0x4F, 0xFF, 0x52, 0x00, 0x0C, 0, 0, 0, 1, 0, 5, 4, 4, 0, 1];

    let err = parse_header(&broken).unwrap_err();
    assert!(format!("{err}").contains("SIZ"));

    let info = gray8(16, 16);
    let mut out = vec![0u8; info.frame_size()];
    let err = decode_frame(&broken, &info, &mut out, 7).unwrap_err();

    assert_eq!(err.frame_index, 7);
    assert!(format!("{err}").contains("SIZ"));
}

#[test]
fn marker_lengths_stay_in_bounds() {
    let info = gray8(40, 40);
    let mut state = 0x1357_9BDF_0246_8ACEu64;
    let pixels: Vec<u8> = (0..info.frame_size())
        .map(|_| xorshift(&mut state) as u8)
        .collect();

    let encoded = encode_frame(&pixels, &info, &EncoderOptions::default(), true).unwrap();

    // Walk the main-header segments: every declared length must stay
    // within the codestream.
    let mut offset = 2; // Past SOC.
    loop {
        assert_eq!(encoded[offset], 0xFF, "marker expected at {offset}");
        let marker = encoded[offset + 1];

        if marker == 0x93 {
            // SOD: entropy data follows.
            break;
        }

        let length =
            u16::from_be_bytes([encoded[offset + 2], encoded[offset + 3]]) as usize;
        assert!(offset + 2 + length <= encoded.len(), "segment out of bounds");
        offset += 2 + length;
    }
}

#[test]
fn parse_header_reports_layout() {
    let info = gray8(31, 17);
    let pixels = vec![128u8; info.frame_size()];

    let options = EncoderOptions {
        decomposition_levels: 3,
        code_block_width: 16,
        code_block_height: 32,
        ..EncoderOptions::default()
    };
    let encoded = encode_frame(&pixels, &info, &options, true).unwrap();
    let header = parse_header(&encoded).unwrap();

    assert_eq!(header.size.image_width(), 31);
    assert_eq!(header.size.image_height(), 17);
    assert_eq!(header.size.components.len(), 1);
    assert_eq!(header.size.components[0].precision, 8);
    assert_eq!(header.coding.levels, 3);
    assert_eq!(header.coding.code_block_width_log2, 4);
    assert_eq!(header.coding.code_block_height_log2, 5);
    assert_eq!(header.coding.transform, WaveletTransform::Reversible53);
    assert_eq!(header.coding.progression_order, ProgressionOrder::Lrcp);
}

#[test]
fn dimension_mismatch_is_detected() {
    let info = gray8(16, 16);
    let pixels = vec![0u8; info.frame_size()];
    let encoded = encode_frame(&pixels, &info, &EncoderOptions::default(), true).unwrap();

    let wrong = gray8(32, 32);
    let mut out = vec![0u8; wrong.frame_size()];
    let err = decode_frame(&encoded, &wrong, &mut out, 0).unwrap_err();

    assert!(format!("{err}").contains("disagree"));
}

#[test]
fn corrupted_tile_data_does_not_panic() {
    let info = gray8(32, 32);
    let mut state = 0xFEED_FACE_DEAD_BEEFu64;
    let pixels: Vec<u8> = (0..info.frame_size())
        .map(|_| xorshift(&mut state) as u8)
        .collect();

    let encoded = encode_frame(&pixels, &info, &EncoderOptions::default(), true).unwrap();

    // Flip bytes towards the end of the entropy data; whatever happens,
    // the decoder must fail gracefully or localize the damage.
    for position in [encoded.len() - 10, encoded.len() - 20, encoded.len() / 2] {
        let mut damaged = encoded.clone();
        damaged[position] ^= 0x5A;

        let mut out = vec![0u8; info.frame_size()];
        let _ = decode_frame(&damaged, &info, &mut out, 0);
    }
}

#[test]
fn not_a_codestream() {
    assert!(!is_jpeg2000(&[]));
    assert!(!is_jpeg2000(b"DICM"));
    assert!(is_jpeg2000(&[0xFF, 0x4F, 0xFF, 0x51]));
}
