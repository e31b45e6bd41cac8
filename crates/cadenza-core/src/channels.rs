//! Channel-count conversion
//!
//! Channel orders follow WAVE conventions: mono `[M]`, stereo `[L R]`,
//! 5.1 `[FL FR FC LFE BL BR]`, 7.1 adds `[SL SR]`. Mixing between layouts
//! uses a fixed coefficient matrix built once up front; `apply` never
//! allocates and is safe on the audio thread.

use crate::types::Sample;

/// −3 dB, the ITU-R BS.775 fold-down coefficient for center and surround
const MINUS_3DB: f32 = std::f32::consts::FRAC_1_SQRT_2;

/// A precomputed `dst_channels × src_channels` mixing matrix
#[derive(Debug, Clone)]
pub struct ChannelMatrix {
    src_channels: usize,
    dst_channels: usize,
    /// Row-major: `coeffs[dst * src_channels + src]`
    coeffs: Vec<f32>,
}

impl ChannelMatrix {
    /// Build the matrix for a source/destination channel pair
    pub fn new(src_channels: usize, dst_channels: usize) -> Self {
        let mut coeffs = vec![0.0; src_channels * dst_channels];
        let mut set = |dst: usize, src: usize, v: f32| {
            coeffs[dst * src_channels + src] = v;
        };

        match (src_channels, dst_channels) {
            (s, d) if s == d => {
                for ch in 0..s {
                    set(ch, ch, 1.0);
                }
            }
            // Mono duplicates into the front pair
            (1, d) => {
                for ch in 0..d.min(2) {
                    set(ch, 0, 1.0);
                }
            }
            // Stereo averages into mono
            (2, 1) => {
                set(0, 0, 0.5);
                set(0, 1, 0.5);
            }
            // Stereo up to surround: front pair only
            (2, 6) | (2, 8) => {
                set(0, 0, 1.0);
                set(1, 1, 1.0);
            }
            // 5.1 down to stereo per BS.775: center and surrounds at −3 dB,
            // LFE dropped
            (6, 2) => {
                set(0, 0, 1.0);
                set(0, 2, MINUS_3DB);
                set(0, 4, MINUS_3DB);
                set(1, 1, 1.0);
                set(1, 2, MINUS_3DB);
                set(1, 5, MINUS_3DB);
            }
            // 7.1 down to stereo: side pair joins the surround fold
            (8, 2) => {
                set(0, 0, 1.0);
                set(0, 2, MINUS_3DB);
                set(0, 4, MINUS_3DB);
                set(0, 6, MINUS_3DB);
                set(1, 1, 1.0);
                set(1, 2, MINUS_3DB);
                set(1, 5, MINUS_3DB);
                set(1, 7, MINUS_3DB);
            }
            // 5.1 up to 7.1: direct copy, sides silent
            (6, 8) => {
                for ch in 0..6 {
                    set(ch, ch, 1.0);
                }
            }
            // 7.1 down to 5.1: sides fold into the back pair at −3 dB
            (8, 6) => {
                for ch in 0..6 {
                    set(ch, ch, 1.0);
                }
                set(4, 6, MINUS_3DB);
                set(5, 7, MINUS_3DB);
            }
            // Anything else: map what lines up, drop or silence the rest
            (s, d) => {
                for ch in 0..s.min(d) {
                    set(ch, ch, 1.0);
                }
            }
        }

        Self { src_channels, dst_channels, coeffs }
    }

    pub fn src_channels(&self) -> usize {
        self.src_channels
    }

    pub fn dst_channels(&self) -> usize {
        self.dst_channels
    }

    /// Mix interleaved `src` into interleaved `dst` (overwriting)
    ///
    /// Processes `min(src_frames, dst_frames)` frames; returns the frame
    /// count. Real-time safe.
    pub fn apply(&self, src: &[Sample], dst: &mut [Sample]) -> usize {
        let frames = (src.len() / self.src_channels).min(dst.len() / self.dst_channels);

        // Identity short-circuit
        if self.src_channels == self.dst_channels {
            let n = frames * self.src_channels;
            dst[..n].copy_from_slice(&src[..n]);
            return frames;
        }

        for frame in 0..frames {
            let src_frame = &src[frame * self.src_channels..(frame + 1) * self.src_channels];
            let dst_frame =
                &mut dst[frame * self.dst_channels..(frame + 1) * self.dst_channels];
            for (dst_ch, out) in dst_frame.iter_mut().enumerate() {
                let row = &self.coeffs[dst_ch * self.src_channels..(dst_ch + 1) * self.src_channels];
                let mut acc = 0.0;
                for (s, c) in src_frame.iter().zip(row.iter()) {
                    acc += s * c;
                }
                *out = acc;
            }
        }

        frames
    }

    /// Mix interleaved `src` into interleaved `dst`, accumulating
    pub fn apply_additive(&self, src: &[Sample], dst: &mut [Sample]) -> usize {
        let frames = (src.len() / self.src_channels).min(dst.len() / self.dst_channels);
        for frame in 0..frames {
            let src_frame = &src[frame * self.src_channels..(frame + 1) * self.src_channels];
            let dst_frame =
                &mut dst[frame * self.dst_channels..(frame + 1) * self.dst_channels];
            for (dst_ch, out) in dst_frame.iter_mut().enumerate() {
                let row = &self.coeffs[dst_ch * self.src_channels..(dst_ch + 1) * self.src_channels];
                for (s, c) in src_frame.iter().zip(row.iter()) {
                    *out += s * c;
                }
            }
        }
        frames
    }
}
