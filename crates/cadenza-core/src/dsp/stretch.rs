//! Phase-vocoder time stretch
//!
//! STFT analysis with a 75%-overlap Hann window, per-bin magnitude reuse
//! with phase unwrapping, and overlap-add resynthesis. Time changes, pitch
//! does not.
//!
//! The streaming shape follows the engine's pull model: push whatever input
//! is available, pop a fixed-size output block; the vocoder pads with
//! silence until its first frames are fully overlapped (one window of
//! startup latency).

use crate::dsp::fft::{Complex, Fft};
use crate::dsp::window::{generate_window, WindowKind};
use crate::dsp::principal_angle;
use crate::types::Sample;
use std::f64::consts::PI;

/// STFT frame size
const FRAME_SIZE: usize = 1024;

/// Synthesis hop: 75% overlap
const HOP: usize = FRAME_SIZE / 4;

/// Overlap-add normalization for Hann applied at analysis and synthesis:
/// the squared-window sum at 75% overlap is 3/2
const OLA_NORM: f32 = 2.0 / 3.0;

/// Streaming phase vocoder over interleaved frames
pub struct PhaseVocoder {
    channels: usize,
    /// Output duration per input duration (2.0 = twice as long)
    stretch: f64,
    fft: Fft,
    window: Vec<Sample>,
    /// Pending input, deinterleaved per channel
    input: Vec<Vec<Sample>>,
    /// Overlap-add accumulators, deinterleaved; index 0 is the next sample out
    ola: Vec<Vec<Sample>>,
    /// Analysis phase of the previous frame, bins 0..=N/2
    last_phase: Vec<Vec<f64>>,
    /// Running synthesis phase, bins 0..=N/2
    sum_phase: Vec<Vec<f64>>,
    /// FFT scratch
    spectrum: Vec<Complex>,
    /// Fractional analysis read position into `input`
    in_pos: f64,
    /// Integer start of the previous analysis frame (for the actual hop)
    prev_start: Option<usize>,
    /// Next synthesis frame offset into `ola`
    synth_pos: usize,
    /// Fully-accumulated output samples available to pop
    ready: usize,
}

impl PhaseVocoder {
    /// Create a vocoder; `stretch` is output duration over input duration
    pub fn new(channels: usize) -> Self {
        let channels = channels.max(1);
        let bins = FRAME_SIZE / 2 + 1;
        Self {
            channels,
            stretch: 1.0,
            fft: Fft::new(FRAME_SIZE),
            window: generate_window(WindowKind::Hann, FRAME_SIZE),
            input: vec![Vec::with_capacity(FRAME_SIZE * 8); channels],
            ola: vec![Vec::new(); channels],
            last_phase: vec![vec![0.0; bins]; channels],
            sum_phase: vec![vec![0.0; bins]; channels],
            spectrum: vec![Complex::zero(); FRAME_SIZE],
            in_pos: 0.0,
            prev_start: None,
            synth_pos: 0,
            ready: 0,
        }
    }

    /// Set the stretch factor, clamped to 0.25..=4.0
    pub fn set_stretch(&mut self, stretch: f64) {
        self.stretch = stretch.clamp(0.25, 4.0);
    }

    pub fn stretch(&self) -> f64 {
        self.stretch
    }

    /// Startup latency in output frames
    pub fn latency(&self) -> usize {
        FRAME_SIZE
    }

    /// Input frames the caller should feed to fill `output_frames`
    pub fn needed_input(&self, output_frames: usize) -> usize {
        let missing = output_frames.saturating_sub(self.ready);
        if missing == 0 {
            return 0;
        }
        let steps = missing.div_ceil(HOP);
        let last_start = self.in_pos + steps as f64 * HOP as f64 / self.stretch;
        let needed = last_start.ceil() as usize + FRAME_SIZE;
        needed.saturating_sub(self.input[0].len())
    }

    /// Push interleaved input, pop one interleaved output block
    ///
    /// The output is always filled completely; frames not yet synthesized
    /// come out as silence (startup, or an underfed input side).
    pub fn process(&mut self, input: &[Sample], output: &mut [Sample]) {
        debug_assert_eq!(input.len() % self.channels, 0);
        debug_assert_eq!(output.len() % self.channels, 0);

        // Deinterleave input into per-channel FIFOs
        for (ch, fifo) in self.input.iter_mut().enumerate() {
            fifo.extend(input.iter().skip(ch).step_by(self.channels));
        }

        let out_frames = output.len() / self.channels;
        while self.ready < out_frames && self.step() {}

        // Pop what's ready, silence the rest
        let popped = self.ready.min(out_frames);
        for ch in 0..self.channels {
            for (frame, sample) in output
                .iter_mut()
                .skip(ch)
                .step_by(self.channels)
                .enumerate()
            {
                *sample = if frame < popped { self.ola[ch][frame] } else { 0.0 };
            }
            self.ola[ch].drain(..popped);
        }
        self.ready -= popped;
        self.synth_pos -= popped;
    }

    /// Analyze one frame and overlap-add its resynthesis.
    /// Returns false when there is not enough buffered input.
    fn step(&mut self) -> bool {
        let start = self.in_pos.round() as usize;
        if self.input[0].len() < start + FRAME_SIZE {
            return false;
        }

        // Actual analysis hop since the previous frame
        let hop_a = match self.prev_start {
            Some(prev) => (start - prev).max(1),
            None => HOP,
        };
        let phase_scale = HOP as f64 / hop_a as f64;

        for ch in 0..self.channels {
            // Windowed frame into the FFT scratch
            for (i, bin) in self.spectrum.iter_mut().enumerate() {
                *bin = Complex::new(
                    (self.input[ch][start + i] * self.window[i]) as f64,
                    0.0,
                );
            }
            self.fft.forward(&mut self.spectrum);

            // Magnitude reuse + phase unwrapping over the real half-spectrum
            let first_frame = self.prev_start.is_none();
            for k in 0..=FRAME_SIZE / 2 {
                let magnitude = self.spectrum[k].abs();
                let phase = self.spectrum[k].arg();

                let synth_phase = if first_frame {
                    phase
                } else {
                    let omega = 2.0 * PI * k as f64 * hop_a as f64 / FRAME_SIZE as f64;
                    let delta = principal_angle(phase - self.last_phase[ch][k] - omega);
                    self.sum_phase[ch][k] + (omega + delta) * phase_scale
                };

                self.last_phase[ch][k] = phase;
                self.sum_phase[ch][k] = synth_phase;

                self.spectrum[k] = Complex::from_polar(magnitude, synth_phase);
                if k != 0 && k != FRAME_SIZE / 2 {
                    self.spectrum[FRAME_SIZE - k] = Complex::new(
                        self.spectrum[k].re,
                        -self.spectrum[k].im,
                    );
                }
            }

            self.fft.inverse(&mut self.spectrum);

            // Windowed overlap-add at the synthesis hop
            let end = self.synth_pos + FRAME_SIZE;
            if self.ola[ch].len() < end {
                self.ola[ch].resize(end, 0.0);
            }
            for i in 0..FRAME_SIZE {
                self.ola[ch][self.synth_pos + i] +=
                    self.spectrum[i].re as Sample * self.window[i] * OLA_NORM;
            }
        }

        self.prev_start = Some(start);
        self.synth_pos += HOP;
        self.ready = self.synth_pos;
        self.in_pos += HOP as f64 / self.stretch;

        // Drop input the analysis position has fully passed
        let keep_from = (self.in_pos.floor() as usize).min(start);
        if keep_from > 0 {
            for fifo in &mut self.input {
                fifo.drain(..keep_from);
            }
            self.in_pos -= keep_from as f64;
            self.prev_start = Some(start - keep_from);
        }

        true
    }

    /// Clear all buffered audio and phase state
    pub fn reset(&mut self) {
        for fifo in &mut self.input {
            fifo.clear();
        }
        for acc in &mut self.ola {
            acc.clear();
        }
        for phases in self.last_phase.iter_mut().chain(self.sum_phase.iter_mut()) {
            phases.fill(0.0);
        }
        self.in_pos = 0.0;
        self.prev_start = None;
        self.synth_pos = 0;
        self.ready = 0;
    }
}
