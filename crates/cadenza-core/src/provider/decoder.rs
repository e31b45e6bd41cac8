//! Chunked-decoder provider
//!
//! Wraps the external codec collaborator: frames are decoded on demand, one
//! read at a time, rather than up front. The codec's own buffering and
//! container parsing stay behind the `Decoder` trait.

use crate::error::{EngineError, EngineResult};
use crate::events::EventDispatcher;
use crate::format::AudioFormat;
use crate::provider::{ProviderEvent, SoundDataProvider};
use crate::types::Sample;

/// The codec collaborator: decodes compressed bytes into PCM frames
pub trait Decoder: Send {
    /// Output format of the decoded stream
    fn format(&self) -> AudioFormat;

    /// Total frames, when the container declares it
    fn total_frames(&self) -> Option<u64>;

    /// Decode up to `dst.len() / channels` frames; `Ok(0)` at end of stream
    fn decode(&mut self, dst: &mut [Sample]) -> EngineResult<usize>;

    /// Whether the codec supports repositioning
    fn can_seek(&self) -> bool {
        false
    }

    /// Reposition the decode cursor
    fn seek(&mut self, _frame: u64) -> EngineResult<()> {
        Err(EngineError::NotSeekable)
    }
}

/// Provider that pulls frames from a `Decoder` on demand
pub struct DecoderProvider {
    decoder: Box<dyn Decoder>,
    position: u64,
    ended: bool,
    events: EventDispatcher<ProviderEvent>,
}

impl DecoderProvider {
    pub fn new(decoder: Box<dyn Decoder>) -> Self {
        Self {
            decoder,
            position: 0,
            ended: false,
            events: EventDispatcher::new(),
        }
    }
}

impl SoundDataProvider for DecoderProvider {
    fn format(&self) -> AudioFormat {
        self.decoder.format()
    }

    fn position(&self) -> u64 {
        self.position
    }

    fn len_frames(&self) -> Option<u64> {
        self.decoder.total_frames()
    }

    fn can_seek(&self) -> bool {
        self.decoder.can_seek()
    }

    fn read(&mut self, dst: &mut [Sample]) -> EngineResult<usize> {
        let frames = self.decoder.decode(dst)?;
        self.position += frames as u64;
        if frames > 0 {
            self.events.emit(&ProviderEvent::PositionChanged(self.position));
        } else if !self.ended {
            self.ended = true;
            self.events.emit(&ProviderEvent::EndReached);
        }
        Ok(frames)
    }

    fn seek(&mut self, frame: u64) -> EngineResult<()> {
        if !self.decoder.can_seek() {
            return Err(EngineError::NotSeekable);
        }
        self.decoder.seek(frame)?;
        self.position = frame;
        self.ended = false;
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

    /// Decoder stub yielding a fixed number of constant frames
    struct StubDecoder {
        remaining: u64,
        format: AudioFormat,
    }

    impl Decoder for StubDecoder {
        fn format(&self) -> AudioFormat {
            self.format
        }

        fn total_frames(&self) -> Option<u64> {
            None
        }

        fn decode(&mut self, dst: &mut [Sample]) -> EngineResult<usize> {
            let want = (dst.len() / self.format.channels).min(self.remaining as usize);
            dst[..want * self.format.channels].fill(0.25);
            self.remaining -= want as u64;
            Ok(want)
        }
    }

    #[test]
    fn test_decode_until_eos() {
        let format = AudioFormat::new(48000, 2, SampleEncoding::F32).unwrap();
        let mut p = DecoderProvider::new(Box::new(StubDecoder { remaining: 30, format }));

        let mut dst = vec![0.0; 40];
        assert_eq!(p.read(&mut dst).unwrap(), 20);
        assert_eq!(p.read(&mut dst).unwrap(), 10);
        assert!(!p.end_reached());
        assert_eq!(p.read(&mut dst).unwrap(), 0);
        assert!(p.end_reached());
    }

    #[test]
    fn test_forward_only_seek_fails() {
        let format = AudioFormat::new(48000, 1, SampleEncoding::F32).unwrap();
        let mut p = DecoderProvider::new(Box::new(StubDecoder { remaining: 10, format }));
        assert!(matches!(p.seek(5), Err(EngineError::NotSeekable)));
    }
}
