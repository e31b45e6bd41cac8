//! In-memory provider for fully decoded PCM

use crate::error::EngineResult;
use crate::events::EventDispatcher;
use crate::format::AudioFormat;
use crate::provider::{ProviderEvent, SoundDataProvider};
use crate::types::Sample;

/// PCM already decoded into a memory block; seekable
pub struct MemoryProvider {
    samples: Vec<Sample>,
    format: AudioFormat,
    position: u64,
    ended: bool,
    events: EventDispatcher<ProviderEvent>,
}

impl MemoryProvider {
    /// Wrap interleaved samples at the given format
    pub fn new(samples: Vec<Sample>, format: AudioFormat) -> Self {
        debug_assert_eq!(samples.len() % format.channels, 0);
        Self {
            samples,
            format,
            position: 0,
            ended: false,
            events: EventDispatcher::new(),
        }
    }

    fn total_frames(&self) -> u64 {
        (self.samples.len() / self.format.channels) as u64
    }
}

impl SoundDataProvider for MemoryProvider {
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
        let want = dst.len() / channels;
        let remaining = (self.total_frames() - self.position) as usize;
        let frames = want.min(remaining);

        let start = self.position as usize * channels;
        dst[..frames * channels].copy_from_slice(&self.samples[start..start + frames * channels]);

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
