//! Fast Fourier transform
//!
//! Iterative radix-2 Cooley-Tukey over double-precision complex values, with
//! a bit-reversal permutation and precomputed twiddle factors. The butterfly
//! stage has an SSE3 path selected at runtime on x86_64 and a scalar
//! fallback; both produce identical results to within 1e-9 per bin.

use crate::dsp::is_power_of_two;
use std::f64::consts::PI;

/// A double-precision complex number, laid out as `[re, im]`
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Complex {
    pub re: f64,
    pub im: f64,
}

impl Complex {
    #[inline]
    pub fn new(re: f64, im: f64) -> Self {
        Self { re, im }
    }

    #[inline]
    pub fn zero() -> Self {
        Self { re: 0.0, im: 0.0 }
    }

    /// Magnitude (absolute value)
    #[inline]
    pub fn abs(&self) -> f64 {
        self.re.hypot(self.im)
    }

    /// Phase angle in radians
    #[inline]
    pub fn arg(&self) -> f64 {
        self.im.atan2(self.re)
    }

    /// Complex from polar form
    #[inline]
    pub fn from_polar(magnitude: f64, phase: f64) -> Self {
        Self { re: magnitude * phase.cos(), im: magnitude * phase.sin() }
    }

    #[inline]
    fn mul(self, other: Self) -> Self {
        Self {
            re: self.re * other.re - self.im * other.im,
            im: self.re * other.im + self.im * other.re,
        }
    }

    #[inline]
    fn conj(self) -> Self {
        Self { re: self.re, im: -self.im }
    }
}

/// A transform plan for one power-of-two size
///
/// Precomputes the bit-reversal permutation and the twiddle table once;
/// `forward` and `inverse` are then allocation-free and safe to call on the
/// audio thread.
pub struct Fft {
    size: usize,
    /// Bit-reversal permutation (swap targets with index < target)
    rev: Vec<u32>,
    /// Forward twiddles: `exp(-2πik/N)` for k in 0..N/2
    twiddles: Vec<Complex>,
    /// Whether the SSE3 butterfly path is available
    simd: bool,
}

impl Fft {
    /// Build a plan for `size` points; panics unless `size` is a power of two
    pub fn new(size: usize) -> Self {
        assert!(is_power_of_two(size), "FFT size must be a power of two, got {size}");

        let bits = size.trailing_zeros();
        let rev = (0..size as u32)
            .map(|i| i.reverse_bits() >> (32 - bits.max(1)))
            .collect::<Vec<_>>();

        let twiddles = (0..size / 2)
            .map(|k| {
                let angle = -2.0 * PI * k as f64 / size as f64;
                Complex::new(angle.cos(), angle.sin())
            })
            .collect();

        Self {
            size,
            rev,
            twiddles,
            simd: detect_simd(),
        }
    }

    /// Transform size in points
    pub fn size(&self) -> usize {
        self.size
    }

    /// In-place forward transform
    pub fn forward(&self, buffer: &mut [Complex]) {
        self.transform(buffer, false);
    }

    /// In-place inverse transform (scales by 1/N)
    pub fn inverse(&self, buffer: &mut [Complex]) {
        self.transform(buffer, true);
        let scale = 1.0 / self.size as f64;
        for v in buffer.iter_mut() {
            v.re *= scale;
            v.im *= scale;
        }
    }

    fn transform(&self, buffer: &mut [Complex], inverse: bool) {
        assert_eq!(buffer.len(), self.size, "buffer length must equal FFT size");
        if self.size == 1 {
            return;
        }

        self.permute(buffer);

        #[cfg(target_arch = "x86_64")]
        if self.simd {
            // Safety: detect_simd verified SSE3 support at plan construction
            unsafe { self.butterflies_sse3(buffer, inverse) };
            return;
        }

        self.butterflies_scalar(buffer, inverse);
    }

    #[inline]
    fn permute(&self, buffer: &mut [Complex]) {
        for (i, &r) in self.rev.iter().enumerate() {
            let r = r as usize;
            if i < r {
                buffer.swap(i, r);
            }
        }
    }

    fn butterflies_scalar(&self, buffer: &mut [Complex], inverse: bool) {
        let n = self.size;
        let mut len = 2;
        while len <= n {
            let half = len / 2;
            let step = n / len;
            for start in (0..n).step_by(len) {
                for k in 0..half {
                    let mut w = self.twiddles[k * step];
                    if inverse {
                        w = w.conj();
                    }
                    let a = buffer[start + k];
                    let b = buffer[start + k + half].mul(w);
                    buffer[start + k] = Complex::new(a.re + b.re, a.im + b.im);
                    buffer[start + k + half] = Complex::new(a.re - b.re, a.im - b.im);
                }
            }
            len <<= 1;
        }
    }

    /// SSE3 butterfly kernel: one 128-bit lane holds one complex value
    #[cfg(target_arch = "x86_64")]
    #[target_feature(enable = "sse3")]
    unsafe fn butterflies_sse3(&self, buffer: &mut [Complex], inverse: bool) {
        use std::arch::x86_64::*;

        let n = self.size;
        let ptr = buffer.as_mut_ptr() as *mut f64;
        let mut len = 2;
        while len <= n {
            let half = len / 2;
            let step = n / len;
            for start in (0..n).step_by(len) {
                for k in 0..half {
                    let mut w = self.twiddles[k * step];
                    if inverse {
                        w.im = -w.im;
                    }
                    let w_re = _mm_set1_pd(w.re);
                    let w_im = _mm_set1_pd(w.im);

                    let a_ptr = ptr.add((start + k) * 2);
                    let b_ptr = ptr.add((start + k + half) * 2);
                    let a = _mm_loadu_pd(a_ptr);
                    let b = _mm_loadu_pd(b_ptr);

                    // b * w: [re*w.re - im*w.im, im*w.re + re*w.im]
                    let b_swap = _mm_shuffle_pd(b, b, 0b01);
                    let prod = _mm_addsub_pd(_mm_mul_pd(b, w_re), _mm_mul_pd(b_swap, w_im));

                    _mm_storeu_pd(a_ptr, _mm_add_pd(a, prod));
                    _mm_storeu_pd(b_ptr, _mm_sub_pd(a, prod));
                }
            }
            len <<= 1;
        }
    }
}

#[cfg(target_arch = "x86_64")]
fn detect_simd() -> bool {
    std::arch::is_x86_feature_detected!("sse3")
}

#[cfg(not(target_arch = "x86_64"))]
fn detect_simd() -> bool {
    false
}
