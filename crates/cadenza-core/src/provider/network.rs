//! Network stream provider
//!
//! A background worker drains the codec (which wraps the network byte
//! stream) into a lock-free ring with backpressure: the worker parks when
//! the ring is full, and `read` waits up to a timeout for data before
//! returning short. Forward-only.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::error::{EngineError, EngineResult};
use crate::events::EventDispatcher;
use crate::format::AudioFormat;
use crate::provider::{Decoder, ProviderEvent, SoundDataProvider};
use crate::types::Sample;

/// Worker park interval while the ring is full
const BACKPRESSURE_WAIT: Duration = Duration::from_millis(5);

/// Poll interval while `read` waits for the ring to fill
const READ_POLL: Duration = Duration::from_millis(1);

/// Streaming provider fed by a prefetch thread
pub struct NetworkProvider {
    format: AudioFormat,
    consumer: rtrb::Consumer<Sample>,
    /// Worker sets this after the decoder reports end of stream
    source_done: Arc<AtomicBool>,
    /// Provider shutdown flag, observed by the worker
    stop: Arc<AtomicBool>,
    read_timeout: Duration,
    position: u64,
    ended: bool,
    events: EventDispatcher<ProviderEvent>,
    worker: Option<thread::JoinHandle<()>>,
}

impl NetworkProvider {
    /// Spawn the prefetch worker over `decoder` with `capacity_frames` of
    /// ring buffering; `read` waits up to `read_timeout` before going short
    pub fn new(
        mut decoder: Box<dyn Decoder>,
        capacity_frames: usize,
        read_timeout: Duration,
    ) -> EngineResult<Self> {
        let format = decoder.format();
        let channels = format.channels;
        let (mut producer, consumer) =
            rtrb::RingBuffer::new(capacity_frames.max(1024) * channels);

        let source_done = Arc::new(AtomicBool::new(false));
        let stop = Arc::new(AtomicBool::new(false));

        let done = source_done.clone();
        let stop_flag = stop.clone();
        let worker = thread::Builder::new()
            .name("cadenza-net-prefetch".to_string())
            .spawn(move || {
                let mut chunk = vec![0.0f32; 1024 * channels];
                loop {
                    if stop_flag.load(Ordering::Acquire) {
                        break;
                    }
                    if producer.slots() < chunk.len() {
                        // Ring is full: backpressure
                        thread::sleep(BACKPRESSURE_WAIT);
                        continue;
                    }
                    match decoder.decode(&mut chunk) {
                        Ok(0) => break,
                        Ok(frames) => {
                            for &sample in &chunk[..frames * channels] {
                                // Capacity was checked above
                                let _ = producer.push(sample);
                            }
                        }
                        Err(e) => {
                            log::warn!("Network prefetch: decoder failed: {}", e);
                            break;
                        }
                    }
                }
                done.store(true, Ordering::Release);
            })
            .map_err(|e| EngineError::Device(format!("failed to spawn prefetch thread: {e}")))?;

        Ok(Self {
            format,
            consumer,
            source_done,
            stop,
            read_timeout,
            position: 0,
            ended: false,
            events: EventDispatcher::new(),
            worker: Some(worker),
        })
    }
}

impl SoundDataProvider for NetworkProvider {
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
        let want = dst.len() / channels;
        let deadline = Instant::now() + self.read_timeout;
        let mut frames = 0;

        while frames < want {
            let available = self.consumer.slots() / channels;
            if available > 0 {
                let take = available.min(want - frames);
                for sample in &mut dst[frames * channels..(frames + take) * channels] {
                    *sample = self.consumer.pop().unwrap_or(0.0);
                }
                frames += take;
                continue;
            }

            if self.source_done.load(Ordering::Acquire) {
                break;
            }
            if Instant::now() >= deadline {
                // Underrun: return what we have rather than stall the caller
                break;
            }
            thread::sleep(READ_POLL);
        }

        self.position += frames as u64;
        if frames > 0 {
            self.events.emit(&ProviderEvent::PositionChanged(self.position));
        }
        if frames == 0 && self.source_done.load(Ordering::Acquire) && !self.ended {
            self.ended = true;
            self.events.emit(&ProviderEvent::EndReached);
        }
        Ok(frames)
    }

    fn seek(&mut self, _frame: u64) -> EngineResult<()> {
        Err(EngineError::NotSeekable)
    }

    fn end_reached(&self) -> bool {
        self.ended
    }

    fn events(&self) -> &EventDispatcher<ProviderEvent> {
        &self.events
    }
}

impl Drop for NetworkProvider {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}
