//! The forward and inverse discrete wavelet transforms, as specified in
//! Annex F.
//!
//! Transforms operate in place on a component plane. Within one
//! decomposition level the samples are kept deinterleaved: after the
//! forward transform of a `sw`x`sh` region, low-pass coefficients occupy
//! the first `ceil(n/2)` positions of each axis and high-pass
//! coefficients the rest, so the next level recurses into the top-left
//! quadrant and subbands can be cut out as contiguous rectangles.
//!
//! All lifting runs on `f32` with `floor` rounding for the reversible
//! filter, which is bit-exact for the integer ranges the codec produces
//! (well below the 24-bit mantissa limit).

use crate::codestream::WaveletTransform;

/// Margin of extension samples kept on each side of a scratch signal.
const MARGIN: usize = 2;

/// Apply `levels` levels of forward decomposition to the plane.
pub(crate) fn forward(
    plane: &mut [f32],
    width: usize,
    height: usize,
    levels: u8,
    transform: WaveletTransform,
) {
    debug_assert_eq!(plane.len(), width * height);

    let mut scratch = Vec::new();

    for level in 0..levels {
        let sub_width = level_dim(width, level);
        let sub_height = level_dim(height, level);

        if sub_width <= 1 && sub_height <= 1 {
            break;
        }

        // The specification applies the vertical filter first on analysis
        // (F.4.3); synthesis mirrors this in [`inverse`].
        for x in 0..sub_width {
            gather_column(plane, width, x, sub_height, &mut scratch);
            filter_forward(&mut scratch, sub_height, transform);
            scatter_column(plane, width, x, sub_height, &scratch);
        }

        for y in 0..sub_height {
            gather_row(plane, width, y, sub_width, &mut scratch);
            filter_forward(&mut scratch, sub_width, transform);
            scatter_row(plane, width, y, sub_width, &scratch);
        }
    }
}

/// Apply `levels` levels of inverse reconstruction to the plane.
pub(crate) fn inverse(
    plane: &mut [f32],
    width: usize,
    height: usize,
    levels: u8,
    transform: WaveletTransform,
) {
    debug_assert_eq!(plane.len(), width * height);

    let mut scratch = Vec::new();

    for level in (0..levels).rev() {
        let sub_width = level_dim(width, level);
        let sub_height = level_dim(height, level);

        if sub_width <= 1 && sub_height <= 1 {
            continue;
        }

        for y in 0..sub_height {
            gather_row(plane, width, y, sub_width, &mut scratch);
            filter_inverse(&mut scratch, sub_width, transform);
            scatter_row(plane, width, y, sub_width, &scratch);
        }

        for x in 0..sub_width {
            gather_column(plane, width, x, sub_height, &mut scratch);
            filter_inverse(&mut scratch, sub_height, transform);
            scatter_column(plane, width, x, sub_height, &scratch);
        }
    }
}

/// The extent of one axis at the given decomposition level.
pub(crate) fn level_dim(dim: usize, level: u8) -> usize {
    dim.div_ceil(1 << level)
}

fn gather_row(plane: &[f32], stride: usize, y: usize, len: usize, scratch: &mut Vec<f32>) {
    scratch.clear();
    scratch.resize(len + 2 * MARGIN, 0.0);
    scratch[MARGIN..MARGIN + len].copy_from_slice(&plane[y * stride..y * stride + len]);
}

fn scatter_row(plane: &mut [f32], stride: usize, y: usize, len: usize, scratch: &[f32]) {
    plane[y * stride..y * stride + len].copy_from_slice(&scratch[MARGIN..MARGIN + len]);
}

fn gather_column(plane: &[f32], stride: usize, x: usize, len: usize, scratch: &mut Vec<f32>) {
    scratch.clear();
    scratch.resize(len + 2 * MARGIN, 0.0);

    for y in 0..len {
        scratch[MARGIN + y] = plane[y * stride + x];
    }
}

fn scatter_column(plane: &mut [f32], stride: usize, x: usize, len: usize, scratch: &[f32]) {
    for y in 0..len {
        plane[y * stride + x] = scratch[MARGIN + y];
    }
}

/// One-dimensional forward transform of the interleaved signal stored at
/// `scratch[MARGIN..MARGIN + n]`, followed by deinterleaving into low and
/// high halves.
fn filter_forward(scratch: &mut [f32], n: usize, transform: WaveletTransform) {
    if n <= 1 {
        return;
    }

    match transform {
        WaveletTransform::Reversible53 => forward_53r(scratch, n),
        WaveletTransform::Irreversible97 => forward_97i(scratch, n),
    }

    deinterleave(scratch, n);
}

/// One-dimensional inverse transform: interleave the low and high halves
/// stored at `scratch[MARGIN..MARGIN + n]`, then undo the lifting.
fn filter_inverse(scratch: &mut [f32], n: usize, transform: WaveletTransform) {
    if n <= 1 {
        return;
    }

    interleave(scratch, n);

    match transform {
        WaveletTransform::Reversible53 => inverse_53r(scratch, n),
        WaveletTransform::Irreversible97 => inverse_97i(scratch, n),
    }
}

/// The 1D forward 5-3R filter (F.4.8.1): predict the odd samples, then
/// update the even ones.
fn forward_53r(scratch: &mut [f32], n: usize) {
    extend_signal(scratch, n);
    for i in (1..n).step_by(2) {
        let base = MARGIN + i;
        scratch[base] -= ((scratch[base - 1] + scratch[base + 1]) / 2.0).floor();
    }

    extend_signal(scratch, n);
    for i in (0..n).step_by(2) {
        let base = MARGIN + i;
        scratch[base] += ((scratch[base - 1] + scratch[base + 1] + 2.0) / 4.0).floor();
    }
}

/// The inverse of [`forward_53r`], matching the 1D filter 5-3R procedure
/// from F.3.8.1.
fn inverse_53r(scratch: &mut [f32], n: usize) {
    extend_signal(scratch, n);
    for i in (0..n).step_by(2) {
        let base = MARGIN + i;
        scratch[base] -= ((scratch[base - 1] + scratch[base + 1] + 2.0) / 4.0).floor();
    }

    extend_signal(scratch, n);
    for i in (1..n).step_by(2) {
        let base = MARGIN + i;
        scratch[base] += ((scratch[base - 1] + scratch[base + 1]) / 2.0).floor();
    }
}

// Table F.4.
const ALPHA: f32 = -1.586_134_3;
const BETA: f32 = -0.052_980_117;
const GAMMA: f32 = 0.882_911_1;
const DELTA: f32 = 0.443_506_87;
const KAPPA: f32 = 1.230_174_1;

/// The 1D forward 9-7I filter (F.4.8.2): four lifting steps, then
/// scaling.
fn forward_97i(scratch: &mut [f32], n: usize) {
    lift_97(scratch, n, 1, ALPHA);
    lift_97(scratch, n, 0, BETA);
    lift_97(scratch, n, 1, GAMMA);
    lift_97(scratch, n, 0, DELTA);

    for i in 0..n {
        let base = MARGIN + i;
        if i % 2 == 0 {
            scratch[base] *= 1.0 / KAPPA;
        } else {
            scratch[base] *= KAPPA;
        }
    }
}

/// The inverse of [`forward_97i`], matching the 1D filter 9-7I procedure
/// from F.3.8.2.
fn inverse_97i(scratch: &mut [f32], n: usize) {
    for i in 0..n {
        let base = MARGIN + i;
        if i % 2 == 0 {
            scratch[base] *= KAPPA;
        } else {
            scratch[base] *= 1.0 / KAPPA;
        }
    }

    lift_97(scratch, n, 0, -DELTA);
    lift_97(scratch, n, 1, -GAMMA);
    lift_97(scratch, n, 0, -BETA);
    lift_97(scratch, n, 1, -ALPHA);
}

/// One lifting step: add `factor` times the sum of both neighbours to
/// every sample of the given parity.
fn lift_97(scratch: &mut [f32], n: usize, parity: usize, factor: f32) {
    extend_signal(scratch, n);

    for i in (parity..n).step_by(2) {
        let base = MARGIN + i;
        scratch[base] += factor * (scratch[base - 1] + scratch[base + 1]);
    }
}

/// Fill the margins with the periodic symmetric extension of the signal
/// (Equation F-4). Re-applied between lifting steps so the mirrored
/// samples always reflect the current state.
fn extend_signal(scratch: &mut [f32], n: usize) {
    for i in 1..=MARGIN {
        scratch[MARGIN - i] = scratch[MARGIN + mirror(-(i as i64), n)];
        scratch[MARGIN + n - 1 + i] = scratch[MARGIN + mirror((n - 1 + i) as i64, n)];
    }
}

/// Map an out-of-range index onto the signal via whole-sample symmetry.
fn mirror(idx: i64, n: usize) -> usize {
    if n == 1 {
        return 0;
    }

    let span = 2 * (n as i64 - 1);
    let offset = idx.rem_euclid(span);

    offset.min(span - offset) as usize
}

/// Split an interleaved signal into its low half (even samples) and high
/// half (odd samples).
fn deinterleave(scratch: &mut [f32], n: usize) {
    let half = n.div_ceil(2);
    let mut split = vec![0.0; n];

    for i in 0..n {
        if i % 2 == 0 {
            split[i / 2] = scratch[MARGIN + i];
        } else {
            split[half + i / 2] = scratch[MARGIN + i];
        }
    }

    scratch[MARGIN..MARGIN + n].copy_from_slice(&split);
}

/// The inverse of [`deinterleave`].
fn interleave(scratch: &mut [f32], n: usize) {
    let half = n.div_ceil(2);
    let mut merged = vec![0.0; n];

    for i in 0..n {
        if i % 2 == 0 {
            merged[i] = scratch[MARGIN + i / 2];
        } else {
            merged[i] = scratch[MARGIN + half + i / 2];
        }
    }

    scratch[MARGIN..MARGIN + n].copy_from_slice(&merged);
}

#[cfg(test)]
mod tests {
    use super::{forward, inverse, mirror};
    use crate::codestream::WaveletTransform;

    fn noise(len: usize, seed: u64, amplitude: i64) -> Vec<f32> {
        let mut state = seed;
        (0..len)
            .map(|_| {
                state ^= state << 13;
                state ^= state >> 7;
                state ^= state << 17;
                ((state % (2 * amplitude as u64 + 1)) as i64 - amplitude) as f32
            })
            .collect()
    }

    #[test]
    fn mirror_indices() {
        assert_eq!(mirror(-1, 6), 1);
        assert_eq!(mirror(-2, 6), 2);
        assert_eq!(mirror(6, 6), 4);
        assert_eq!(mirror(7, 6), 3);
        assert_eq!(mirror(0, 6), 0);
        assert_eq!(mirror(-1, 1), 0);
    }

    #[test]
    fn reversible_round_trip() {
        for (width, height, levels) in
            [(8, 8, 1), (16, 16, 3), (17, 13, 3), (5, 1, 2), (1, 9, 2), (64, 64, 5), (3, 3, 5)]
        {
            let original = noise(width * height, 0x9E37_79B9_7F4A_7C15, 1 << 15);
            let mut plane = original.clone();

            forward(
                &mut plane,
                width,
                height,
                levels,
                WaveletTransform::Reversible53,
            );
            inverse(
                &mut plane,
                width,
                height,
                levels,
                WaveletTransform::Reversible53,
            );

            assert_eq!(plane, original, "{width}x{height} at {levels} levels");
        }
    }

    #[test]
    fn irreversible_near_identity() {
        let (width, height) = (512, 512);
        let original = noise(width * height, 0x0123_4567_89AB_CDEF, 127);
        let mut plane = original.clone();

        forward(
            &mut plane,
            width,
            height,
            5,
            WaveletTransform::Irreversible97,
        );
        inverse(
            &mut plane,
            width,
            height,
            5,
            WaveletTransform::Irreversible97,
        );

        let mae = plane
            .iter()
            .zip(&original)
            .map(|(a, b)| (a - b).abs() as f64)
            .sum::<f64>()
            / (width * height) as f64;

        assert!(mae <= 1.0, "mean absolute error too large: {mae}");
    }

    #[test]
    fn single_level_subband_layout() {
        // A constant signal decomposes into a constant LL band and
        // (near-)zero detail bands.
        let (width, height) = (8, 6);
        let mut plane = vec![10.0f32; width * height];

        forward(
            &mut plane,
            width,
            height,
            1,
            WaveletTransform::Reversible53,
        );

        for y in 0..height {
            for x in 0..width {
                let expected = if x < 4 && y < 3 { 10.0 } else { 0.0 };
                assert_eq!(plane[y * width + x], expected, "at {x},{y}");
            }
        }
    }
}
