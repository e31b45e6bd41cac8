//! Microphone capture provider
//!
//! Capture blocks arrive from the engine's capture fan-out on the device
//! callback; the provider hands them to whoever reads it (a recorder, a
//! monitoring player). The queue is bounded: on overflow the oldest audio is
//! dropped and a warning is logged.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::EngineResult;
use crate::events::EventDispatcher;
use crate::format::AudioFormat;
use crate::provider::{ProviderEvent, SoundDataProvider};
use crate::types::Sample;

struct Shared {
    queue: Mutex<VecDeque<Sample>>,
    capacity_samples: usize,
    dropped_frames: AtomicU64,
    closed: AtomicBool,
}

/// Producer half: register `write` as a capture subscriber
#[derive(Clone)]
pub struct MicrophoneWriter {
    shared: Arc<Shared>,
    channels: usize,
}

impl MicrophoneWriter {
    /// Push one capture block; drops the oldest queued audio on overflow
    pub fn write(&self, block: &[Sample]) {
        let mut queue = self.shared.queue.lock();
        let overflow =
            (queue.len() + block.len()).saturating_sub(self.shared.capacity_samples);
        if overflow > 0 {
            let drop_samples = overflow.min(queue.len());
            queue.drain(..drop_samples);
            let frames = (drop_samples / self.channels) as u64;
            let total = self
                .shared
                .dropped_frames
                .fetch_add(frames, Ordering::Relaxed)
                + frames;
            log::warn!(
                "Microphone queue overflow: dropped {} frames ({} total)",
                frames,
                total
            );
        }
        queue.extend(block.iter().copied());
    }

    /// Mark the capture stream finished; readers see end of stream once the
    /// queue drains
    pub fn close(&self) {
        self.shared.closed.store(true, Ordering::Release);
    }
}

/// Consumer half: a forward-only provider over the capture queue
pub struct MicrophoneProvider {
    shared: Arc<Shared>,
    format: AudioFormat,
    position: u64,
    ended: bool,
    events: EventDispatcher<ProviderEvent>,
}

impl MicrophoneProvider {
    /// Create the provider/writer pair with `capacity_frames` of buffering
    pub fn new(format: AudioFormat, capacity_frames: usize) -> (Self, MicrophoneWriter) {
        let shared = Arc::new(Shared {
            queue: Mutex::new(VecDeque::with_capacity(capacity_frames * format.channels)),
            capacity_samples: capacity_frames.max(1) * format.channels,
            dropped_frames: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        });
        let writer = MicrophoneWriter { shared: shared.clone(), channels: format.channels };
        let provider = Self {
            shared,
            format,
            position: 0,
            ended: false,
            events: EventDispatcher::new(),
        };
        (provider, writer)
    }

    /// Frames lost to overflow so far
    pub fn dropped_frames(&self) -> u64 {
        self.shared.dropped_frames.load(Ordering::Relaxed)
    }
}

impl SoundDataProvider for MicrophoneProvider {
    fn format(&self) -> AudioFormat {
        self.format
    }

    fn position(&self) -> u64 {
        self.position
    }

    fn len_frames(&self) -> Option<u64> {
        None
    }

    fn read(&mut self, dst: &mut [Sample]) -> EngineResult<usize> {
        let channels = self.format.channels;
        let mut queue = self.shared.queue.lock();
        let frames = (queue.len() / channels).min(dst.len() / channels);
        for sample in &mut dst[..frames * channels] {
            *sample = queue.pop_front().unwrap_or(0.0);
        }
        drop(queue);

        self.position += frames as u64;
        if frames > 0 {
            self.events.emit(&ProviderEvent::PositionChanged(self.position));
        } else if self.shared.closed.load(Ordering::Acquire) && !self.ended {
            self.ended = true;
            self.events.emit(&ProviderEvent::EndReached);
        }
        Ok(frames)
    }

    fn seek(&mut self, _frame: u64) -> EngineResult<()> {
        Err(crate::error::EngineError::NotSeekable)
    }

    fn end_reached(&self) -> bool {
        self.ended
    }

    fn events(&self) -> &EventDispatcher<ProviderEvent> {
        &self.events
    }
}
