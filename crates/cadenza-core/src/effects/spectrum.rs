//! Spectrum analyzer
//!
//! Mixes the observed buffer to mono, accumulates one FFT frame, and
//! publishes windowed magnitude spectra as copy-on-write snapshots.

use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::Mutex;

use crate::dsp::{generate_window, Complex, Fft, WindowKind};
use crate::effects::Analyzer;
use crate::events::EventDispatcher;
use crate::types::Sample;

/// Windowed-FFT magnitude analyzer
pub struct SpectrumAnalyzer {
    fft_size: usize,
    fft: Fft,
    window: Vec<Sample>,
    /// Mono accumulation buffer; a spectrum is published when it fills
    accumulator: Mutex<Vec<Sample>>,
    /// Latest magnitudes, bins 0..=N/2
    magnitudes: ArcSwap<Vec<f32>>,
    /// Fires once per published spectrum
    events: EventDispatcher<()>,
}

impl SpectrumAnalyzer {
    /// Create an analyzer; `fft_size` must be a power of two
    pub fn new(fft_size: usize) -> Self {
        Self {
            fft_size,
            fft: Fft::new(fft_size),
            window: generate_window(WindowKind::Hann, fft_size),
            accumulator: Mutex::new(Vec::with_capacity(fft_size)),
            magnitudes: ArcSwap::from_pointee(vec![0.0; fft_size / 2 + 1]),
            events: EventDispatcher::new(),
        }
    }

    /// Latest magnitude snapshot (bins 0..=N/2, linear amplitude)
    pub fn magnitudes(&self) -> Arc<Vec<f32>> {
        self.magnitudes.load_full()
    }

    /// Bin width in Hz at the given sample rate
    pub fn bin_hz(&self, sample_rate: u32) -> f32 {
        sample_rate as f32 / self.fft_size as f32
    }

    /// Fires after each published spectrum
    pub fn events(&self) -> &EventDispatcher<()> {
        &self.events
    }

    fn publish(&self, frame: &[Sample]) {
        let mut spectrum: Vec<Complex> = frame
            .iter()
            .zip(self.window.iter())
            .map(|(&s, &w)| Complex::new((s * w) as f64, 0.0))
            .collect();
        self.fft.forward(&mut spectrum);

        let scale = 2.0 / self.fft_size as f64;
        let magnitudes: Vec<f32> = spectrum[..=self.fft_size / 2]
            .iter()
            .map(|bin| (bin.abs() * scale) as f32)
            .collect();
        self.magnitudes.store(Arc::new(magnitudes));
        self.events.emit(&());
    }
}

impl Analyzer for SpectrumAnalyzer {
    fn name(&self) -> &str {
        "Spectrum"
    }

    fn observe(&self, buffer: &[Sample], channels: usize, _sample_rate: u32) {
        let mut acc = self.accumulator.lock();
        for frame in buffer.chunks_exact(channels) {
            let mono = frame.iter().sum::<f32>() / channels as f32;
            acc.push(mono);
            if acc.len() == self.fft_size {
                self.publish(&acc);
                acc.clear();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    #[test]
    fn test_sine_peak_bin() {
        let analyzer = SpectrumAnalyzer::new(1024);
        let sr = 48000u32;
        // Pick a frequency that lands exactly on bin 64
        let freq = 64.0 * analyzer.bin_hz(sr) as f64;
        let signal: Vec<f32> = (0..2048)
            .map(|i| (2.0 * PI * freq * i as f64 / sr as f64).sin() as f32)
            .collect();

        analyzer.observe(&signal, 1, sr);

        let mags = analyzer.magnitudes();
        let peak_bin = mags
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap())
            .map(|(i, _)| i)
            .unwrap();
        assert_eq!(peak_bin, 64);
    }

    #[test]
    fn test_accumulates_across_blocks() {
        let analyzer = SpectrumAnalyzer::new(512);
        let mut published = 0;
        // 3 observes of 256 mono frames: one spectrum after the second
        for _ in 0..3 {
            analyzer.observe(&vec![0.1; 256], 1, 48000);
            if analyzer.magnitudes()[0] > 0.0 {
                published += 1;
            }
        }
        assert!(published >= 1);
    }
}
