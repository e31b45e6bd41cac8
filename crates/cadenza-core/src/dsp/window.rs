//! Analysis windows
//!
//! Hann, Hamming, and Blackman windows of arbitrary size. `window_into`
//! generates coefficients with a cosine-recurrence fast path (two multiplies
//! per sample, auto-vectorizable); the direct libm evaluation is kept as the
//! reference the fast path is tested against.

use crate::types::Sample;
use std::f64::consts::PI;

/// Window family
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowKind {
    /// `0.5 − 0.5·cos` — zero at the edges
    Hann,
    /// `0.54 − 0.46·cos` — small non-zero pedestal
    Hamming,
    /// `0.42 − 0.5·cos + 0.08·cos2` — wider main lobe, deeper stopband
    Blackman,
}

impl WindowKind {
    /// (a0, a1, a2) cosine-series coefficients
    fn coefficients(&self) -> (f64, f64, f64) {
        match self {
            Self::Hann => (0.5, 0.5, 0.0),
            Self::Hamming => (0.54, 0.46, 0.0),
            Self::Blackman => (0.42, 0.5, 0.08),
        }
    }
}

/// Fill `out` with window coefficients; a size-1 window is `[1.0]`
pub fn window_into(kind: WindowKind, out: &mut [Sample]) {
    let n = out.len();
    if n == 0 {
        return;
    }
    if n == 1 {
        out[0] = 1.0;
        return;
    }

    let (a0, a1, a2) = kind.coefficients();
    let theta = 2.0 * PI / (n - 1) as f64;

    // cos(kθ) and cos(2kθ) by Chebyshev recurrence:
    // cos((k+1)θ) = 2cos(θ)cos(kθ) − cos((k−1)θ)
    let two_cos = 2.0 * theta.cos();
    let (mut c_prev, mut c_cur) = ((-theta).cos(), 1.0_f64);
    let two_cos2 = 2.0 * (2.0 * theta).cos();
    let (mut d_prev, mut d_cur) = ((-2.0 * theta).cos(), 1.0_f64);

    for v in out.iter_mut() {
        *v = (a0 - a1 * c_cur + a2 * d_cur) as Sample;

        let c_next = two_cos * c_cur - c_prev;
        c_prev = c_cur;
        c_cur = c_next;

        let d_next = two_cos2 * d_cur - d_prev;
        d_prev = d_cur;
        d_cur = d_next;
    }
}

/// Allocate and fill a window of `size` coefficients
pub fn generate_window(kind: WindowKind, size: usize) -> Vec<Sample> {
    let mut out = vec![0.0; size];
    window_into(kind, &mut out);
    out
}

/// Direct libm evaluation; reference for the recurrence path
#[allow(dead_code)]
fn window_into_direct(kind: WindowKind, out: &mut [Sample]) {
    let n = out.len();
    if n == 0 {
        return;
    }
    if n == 1 {
        out[0] = 1.0;
        return;
    }

    let (a0, a1, a2) = kind.coefficients();
    for (i, v) in out.iter_mut().enumerate() {
        let theta = 2.0 * PI * i as f64 / (n - 1) as f64;
        *v = (a0 - a1 * theta.cos() + a2 * (2.0 * theta).cos()) as Sample;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_size_one() {
        assert_eq!(generate_window(WindowKind::Hann, 1), vec![1.0]);
        assert_eq!(generate_window(WindowKind::Blackman, 1), vec![1.0]);
    }

    #[test]
    fn test_hamming_edge_value() {
        // w[0] = a0 − a1 for every size ≥ 2
        for size in [2, 16, 127, 1024] {
            let w = generate_window(WindowKind::Hamming, size);
            assert!((w[0] - 0.08).abs() < 1e-6, "size {size}: w[0] = {}", w[0]);
        }
    }

    #[test]
    fn test_hann_properties() {
        let w = generate_window(WindowKind::Hann, 64);
        assert!(w[0].abs() < 1e-7);
        assert!(w[63].abs() < 1e-6);
        // Symmetric
        for i in 0..32 {
            assert!((w[i] - w[63 - i]).abs() < 1e-6);
        }
    }

    #[test]
    fn test_recurrence_matches_direct() {
        for kind in [WindowKind::Hann, WindowKind::Hamming, WindowKind::Blackman] {
            for size in [2, 3, 64, 1024, 4096] {
                let mut fast = vec![0.0; size];
                let mut reference = vec![0.0; size];
                window_into(kind, &mut fast);
                window_into_direct(kind, &mut reference);
                for (i, (a, b)) in fast.iter().zip(reference.iter()).enumerate() {
                    assert!(
                        (a - b).abs() < 1e-6,
                        "{kind:?} size {size} index {i}: {a} vs {b}"
                    );
                }
            }
        }
    }

    #[test]
    fn test_blackman_center() {
        let w = generate_window(WindowKind::Blackman, 65);
        // At the midpoint cos = −1, cos2 = 1: 0.42 + 0.5 + 0.08 = 1.0
        assert!((w[32] - 1.0).abs() < 1e-6);
    }
}
