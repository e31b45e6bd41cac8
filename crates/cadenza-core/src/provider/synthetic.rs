//! Synthetic providers: silence, sine, constant
//!
//! Unbounded generators used as test tones and utility sources.

use std::f64::consts::PI;

use crate::error::{EngineError, EngineResult};
use crate::events::EventDispatcher;
use crate::format::AudioFormat;
use crate::provider::{ProviderEvent, SoundDataProvider};
use crate::types::Sample;

/// Infinite silence
pub struct SilenceProvider {
    format: AudioFormat,
    position: u64,
    events: EventDispatcher<ProviderEvent>,
}

impl SilenceProvider {
    pub fn new(format: AudioFormat) -> Self {
        Self { format, position: 0, events: EventDispatcher::new() }
    }
}

impl SoundDataProvider for SilenceProvider {
    fn format(&self) -> AudioFormat {
        self.format
    }

    fn position(&self) -> u64 {
        self.position
    }

    fn len_frames(&self) -> Option<u64> {
        None
    }

    fn can_seek(&self) -> bool {
        true
    }

    fn read(&mut self, dst: &mut [Sample]) -> EngineResult<usize> {
        dst.fill(0.0);
        let frames = dst.len() / self.format.channels;
        self.position += frames as u64;
        Ok(frames)
    }

    fn seek(&mut self, frame: u64) -> EngineResult<()> {
        self.position = frame;
        self.events.emit(&ProviderEvent::PositionChanged(frame));
        Ok(())
    }

    fn end_reached(&self) -> bool {
        false
    }

    fn events(&self) -> &EventDispatcher<ProviderEvent> {
        &self.events
    }
}

/// Infinite sine tone, identical in every channel
pub struct SineProvider {
    format: AudioFormat,
    frequency: f64,
    amplitude: f32,
    position: u64,
    events: EventDispatcher<ProviderEvent>,
}

impl SineProvider {
    pub fn new(format: AudioFormat, frequency: f64, amplitude: f32) -> Self {
        Self {
            format,
            frequency,
            amplitude,
            position: 0,
            events: EventDispatcher::new(),
        }
    }
}

impl SoundDataProvider for SineProvider {
    fn format(&self) -> AudioFormat {
        self.format
    }

    fn position(&self) -> u64 {
        self.position
    }

    fn len_frames(&self) -> Option<u64> {
        None
    }

    fn can_seek(&self) -> bool {
        true
    }

    fn read(&mut self, dst: &mut [Sample]) -> EngineResult<usize> {
        let channels = self.format.channels;
        let frames = dst.len() / channels;
        let step = 2.0 * PI * self.frequency / self.format.sample_rate as f64;
        for (i, frame) in dst.chunks_exact_mut(channels).enumerate() {
            let value = ((self.position + i as u64) as f64 * step).sin() as f32 * self.amplitude;
            frame.fill(value);
        }
        self.position += frames as u64;
        Ok(frames)
    }

    fn seek(&mut self, frame: u64) -> EngineResult<()> {
        self.position = frame;
        self.events.emit(&ProviderEvent::PositionChanged(frame));
        Ok(())
    }

    fn end_reached(&self) -> bool {
        false
    }

    fn events(&self) -> &EventDispatcher<ProviderEvent> {
        &self.events
    }
}

/// A finite DC source with a fixed value; handy for summing tests
pub struct ConstantProvider {
    format: AudioFormat,
    value: f32,
    total_frames: u64,
    position: u64,
    ended: bool,
    events: EventDispatcher<ProviderEvent>,
}

impl ConstantProvider {
    pub fn new(format: AudioFormat, value: f32, total_frames: u64) -> Self {
        Self {
            format,
            value,
            total_frames,
            position: 0,
            ended: false,
            events: EventDispatcher::new(),
        }
    }
}

impl SoundDataProvider for ConstantProvider {
    fn format(&self) -> AudioFormat {
        self.format
    }

    fn position(&self) -> u64 {
        self.position
    }

    fn len_frames(&self) -> Option<u64> {
        Some(self.total_frames)
    }

    fn can_seek(&self) -> bool {
        true
    }

    fn read(&mut self, dst: &mut [Sample]) -> EngineResult<usize> {
        let channels = self.format.channels;
        let want = dst.len() / channels;
        let remaining = (self.total_frames - self.position) as usize;
        let frames = want.min(remaining);
        dst[..frames * channels].fill(self.value);
        self.position += frames as u64;
        if self.position >= self.total_frames && !self.ended {
            self.ended = true;
            self.events.emit(&ProviderEvent::EndReached);
        }
        Ok(frames)
    }

    fn seek(&mut self, frame: u64) -> EngineResult<()> {
        if frame > self.total_frames {
            return Err(EngineError::InvalidArgument(format!(
                "seek target {frame} beyond length {}",
                self.total_frames
            )));
        }
        self.position = frame;
        self.ended = self.position >= self.total_frames;
        self.events.emit(&ProviderEvent::PositionChanged(frame));
        Ok(())
    }

    fn end_reached(&self) -> bool {
        self.ended
    }

    fn events(&self) -> &EventDispatcher<ProviderEvent> {
        &self.events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::SampleEncoding;
    use crate::types::rms;

    #[test]
    fn test_sine_rms() {
        let format = AudioFormat::new(48000, 1, SampleEncoding::F32).unwrap();
        let mut p = SineProvider::new(format, 1000.0, 1.0);
        let mut dst = vec![0.0; 48000];
        p.read(&mut dst).unwrap();
        // Full-scale sine RMS is 1/√2
        assert!((rms(&dst) - std::f32::consts::FRAC_1_SQRT_2).abs() < 1e-3);
    }

    #[test]
    fn test_sine_phase_continuity_across_reads() {
        let format = AudioFormat::new(48000, 1, SampleEncoding::F32).unwrap();
        let mut p = SineProvider::new(format, 1000.0, 1.0);
        let mut a = vec![0.0; 64];
        let mut b = vec![0.0; 64];
        p.read(&mut a).unwrap();
        p.read(&mut b).unwrap();

        let mut q = SineProvider::new(format, 1000.0, 1.0);
        let mut whole = vec![0.0; 128];
        q.read(&mut whole).unwrap();
        assert_eq!(&whole[64..], &b[..]);
    }

    #[test]
    fn test_constant_finite() {
        let format = AudioFormat::new(48000, 2, SampleEncoding::F32).unwrap();
        let mut p = ConstantProvider::new(format, 0.5, 10);
        let mut dst = vec![0.0; 64];
        assert_eq!(p.read(&mut dst).unwrap(), 10);
        assert_eq!(p.read(&mut dst).unwrap(), 0);
        assert!(p.end_reached());
    }

    #[test]
    fn test_silence_is_infinite() {
        let format = AudioFormat::new(48000, 2, SampleEncoding::F32).unwrap();
        let mut p = SilenceProvider::new(format);
        let mut dst = vec![1.0; 32];
        assert_eq!(p.read(&mut dst).unwrap(), 16);
        assert!(dst.iter().all(|&s| s == 0.0));
        assert!(!p.end_reached());
    }
}
