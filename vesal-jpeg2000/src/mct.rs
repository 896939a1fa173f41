//! The multiple-component transformations, as specified in Annex G.
//!
//! The reversible transform (RCT) pairs with the 5/3 wavelet on the
//! lossless path, the irreversible one (ICT) with the 9/7 wavelet on the
//! lossy path. Planes hold integer-valued `f32` samples on the
//! reversible path, so the `floor` arithmetic is bit-exact.

use crate::codestream::WaveletTransform;

/// Apply the forward multi-component transform in place, as specified in
/// G.2 (reversible) and G.3 (irreversible).
pub(crate) fn apply_forward(
    transform: WaveletTransform,
    s0: &mut [f32],
    s1: &mut [f32],
    s2: &mut [f32],
) {
    debug_assert!(s0.len() == s1.len() && s1.len() == s2.len());

    match transform {
        WaveletTransform::Irreversible97 => {
            for ((r, g), b) in s0.iter_mut().zip(s1.iter_mut()).zip(s2.iter_mut()) {
                let y = 0.299 * *r + 0.587 * *g + 0.114 * *b;
                let cb = -0.16875 * *r - 0.33126 * *g + 0.5 * *b;
                let cr = 0.5 * *r - 0.41869 * *g - 0.08131 * *b;

                *r = y;
                *g = cb;
                *b = cr;
            }
        }
        WaveletTransform::Reversible53 => {
            for ((r, g), b) in s0.iter_mut().zip(s1.iter_mut()).zip(s2.iter_mut()) {
                let y = ((*r + 2.0 * *g + *b) / 4.0).floor();
                let cb = *b - *g;
                let cr = *r - *g;

                *r = y;
                *g = cb;
                *b = cr;
            }
        }
    }
}

/// Apply the inverse multi-component transform in place, as specified in
/// G.2 and G.3.
pub(crate) fn apply_inverse(
    transform: WaveletTransform,
    s0: &mut [f32],
    s1: &mut [f32],
    s2: &mut [f32],
) {
    debug_assert!(s0.len() == s1.len() && s1.len() == s2.len());

    match transform {
        WaveletTransform::Irreversible97 => {
            for ((y0, y1), y2) in s0.iter_mut().zip(s1.iter_mut()).zip(s2.iter_mut()) {
                let i0 = *y0 + 1.402 * *y2;
                let i1 = *y0 - 0.34413 * *y1 - 0.71414 * *y2;
                let i2 = *y0 + 1.772 * *y1;

                *y0 = i0;
                *y1 = i1;
                *y2 = i2;
            }
        }
        WaveletTransform::Reversible53 => {
            for ((y0, y1), y2) in s0.iter_mut().zip(s1.iter_mut()).zip(s2.iter_mut()) {
                let i1 = *y0 - ((*y2 + *y1) / 4.0).floor();
                let i0 = *y2 + i1;
                let i2 = *y1 + i1;

                *y0 = i0;
                *y1 = i1;
                *y2 = i2;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{apply_forward, apply_inverse};
    use crate::codestream::WaveletTransform;

    #[test]
    fn reversible_round_trip() {
        let mut r: Vec<f32> = (0..=255).map(|v| v as f32).collect();
        let mut g: Vec<f32> = (0..=255).rev().map(|v| v as f32).collect();
        let mut b: Vec<f32> = (0..=255).map(|v| ((v * 7) % 256) as f32).collect();

        let (orig_r, orig_g, orig_b) = (r.clone(), g.clone(), b.clone());

        apply_forward(WaveletTransform::Reversible53, &mut r, &mut g, &mut b);
        apply_inverse(WaveletTransform::Reversible53, &mut r, &mut g, &mut b);

        assert_eq!(r, orig_r);
        assert_eq!(g, orig_g);
        assert_eq!(b, orig_b);
    }

    #[test]
    fn irreversible_near_identity() {
        let mut r: Vec<f32> = (0..=255).map(|v| v as f32).collect();
        let mut g: Vec<f32> = (0..=255).rev().map(|v| v as f32).collect();
        let mut b: Vec<f32> = (0..=255).map(|v| ((v * 13) % 256) as f32).collect();

        let (orig_r, orig_g, orig_b) = (r.clone(), g.clone(), b.clone());

        apply_forward(WaveletTransform::Irreversible97, &mut r, &mut g, &mut b);
        apply_inverse(WaveletTransform::Irreversible97, &mut r, &mut g, &mut b);

        for i in 0..r.len() {
            assert!((r[i] - orig_r[i]).abs() < 0.01);
            assert!((g[i] - orig_g[i]).abs() < 0.01);
            assert!((b[i] - orig_b[i]).abs() < 0.01);
        }
    }

    #[test]
    fn grey_maps_to_zero_chroma() {
        let mut r = vec![42.0f32];
        let mut g = vec![42.0f32];
        let mut b = vec![42.0f32];

        apply_forward(WaveletTransform::Reversible53, &mut r, &mut g, &mut b);

        assert_eq!(r, vec![42.0]);
        assert_eq!(g, vec![0.0]);
        assert_eq!(b, vec![0.0]);
    }
}
