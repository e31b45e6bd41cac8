//! Raw PCM provider
//!
//! Wraps a memory-mapped or fully loaded already-PCM file and decodes frames
//! through the format conversion tables on each read. Seekable.

use crate::error::EngineResult;
use crate::events::EventDispatcher;
use crate::format::{decode_samples, AudioFormat};
use crate::provider::{ProviderEvent, SoundDataProvider};
use crate::types::Sample;

/// Already-PCM bytes in the file's native encoding
pub struct RawPcmProvider {
    bytes: Vec<u8>,
    format: AudioFormat,
    position: u64,
    ended: bool,
    events: EventDispatcher<ProviderEvent>,
}

impl RawPcmProvider {
    /// Wrap interleaved PCM bytes at the given format; trailing partial
    /// frames are ignored
    pub fn new(bytes: Vec<u8>, format: AudioFormat) -> Self {
        Self {
            bytes,
            format,
            position: 0,
            ended: false,
            events: EventDispatcher::new(),
        }
    }

    fn total_frames(&self) -> u64 {
        (self.bytes.len() / self.format.bytes_per_frame()) as u64
    }
}

impl SoundDataProvider for RawPcmProvider {
    fn format(&self) -> AudioFormat {
        self.format
    }

    fn position(&self) -> u64 {
        self.position
    }

    fn len_frames(&self) -> Option<u64> {
        Some(self.total_frames())
    }

    fn can_seek(&self) -> bool {
        true
    }

    fn read(&mut self, dst: &mut [Sample]) -> EngineResult<usize> {
        let channels = self.format.channels;
        let bytes_per_frame = self.format.bytes_per_frame();
        let want = dst.len() / channels;
        let remaining = (self.total_frames() - self.position) as usize;
        let frames = want.min(remaining);

        let start = self.position as usize * bytes_per_frame;
        decode_samples(
            &self.bytes[start..start + frames * bytes_per_frame],
            self.format.encoding,
            &mut dst[..frames * channels],
        );

        self.position += frames as u64;
        if frames > 0 {
            self.events.emit(&ProviderEvent::PositionChanged(self.position));
        }
        if self.position >= self.total_frames() && !self.ended {
            self.ended = true;
            self.events.emit(&ProviderEvent::EndReached);
        }
        Ok(frames)
    }

    fn seek(&mut self, frame: u64) -> EngineResult<()> {
        self.position = frame.min(self.total_frames());
        self.ended = self.position >= self.total_frames();
        self.events.emit(&ProviderEvent::PositionChanged(self.position));
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

    #[test]
    fn test_s16_decode_on_read() {
        let format = AudioFormat::new(44100, 1, SampleEncoding::S16).unwrap();
        let mut bytes = Vec::new();
        for v in [0i16, 16384, -16384, 32767] {
            bytes.extend_from_slice(&v.to_le_bytes());
        }
        let mut p = RawPcmProvider::new(bytes, format);

        let mut dst = vec![0.0; 4];
        assert_eq!(p.read(&mut dst).unwrap(), 4);
        assert_eq!(dst[0], 0.0);
        assert_eq!(dst[1], 0.5);
        assert_eq!(dst[2], -0.5);
    }

    #[test]
    fn test_seek_frames_not_bytes() {
        let format = AudioFormat::new(44100, 2, SampleEncoding::S16).unwrap();
        let bytes = vec![0u8; 400]; // 100 stereo S16 frames
        let mut p = RawPcmProvider::new(bytes, format);
        assert_eq!(p.len_frames(), Some(100));
        p.seek(99).unwrap();
        let mut dst = vec![0.0; 8];
        assert_eq!(p.read(&mut dst).unwrap(), 1);
        assert!(p.end_reached());
    }
}
