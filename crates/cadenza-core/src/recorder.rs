//! Recorder
//!
//! Captures input blocks from the engine's capture fan-out into an encoder
//! (the codec collaborator: WAV, FLAC, MP3). The capture tap pushes into a
//! lock-free ring; a writer thread drains it into the encoder so encoding
//! never happens on the device callback. An encode failure stops the
//! recording and publishes `Failed`.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;

use crate::engine::CaptureTap;
use crate::error::EngineResult;
use crate::events::EventDispatcher;
use crate::format::AudioFormat;
use crate::types::Sample;

/// The codec collaborator: consumes interleaved f32, writes the target file
pub trait Encoder: Send {
    /// Append one interleaved block
    fn write(&mut self, samples: &[Sample]) -> EngineResult<()>;

    /// Flush and finalize the container
    fn finish(&mut self) -> EngineResult<()>;
}

/// Recorder lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecorderState {
    Idle,
    Recording,
    Paused,
    Stopped,
}

impl RecorderState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::Recording,
            2 => Self::Paused,
            3 => Self::Stopped,
            _ => Self::Idle,
        }
    }
}

/// Recorder events published from the writer thread
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecorderEvent {
    /// Encoding failed; recording has stopped
    Failed(String),
    /// The encoder was finalized
    Finished,
}

/// Writer-thread poll interval while the ring is empty
const DRAIN_POLL: Duration = Duration::from_millis(2);

/// Captures engine input into an encoder
pub struct Recorder {
    state: Arc<AtomicU8>,
    producer: Arc<Mutex<rtrb::Producer<Sample>>>,
    events: Arc<EventDispatcher<RecorderEvent>>,
    worker: Option<thread::JoinHandle<()>>,
}

impl Recorder {
    /// Create a recorder over `encoder` with `capacity_frames · channels`
    /// samples of ring buffering
    pub fn new(
        format: AudioFormat,
        mut encoder: Box<dyn Encoder>,
        capacity_frames: usize,
    ) -> EngineResult<Self> {
        let (producer, mut consumer) =
            rtrb::RingBuffer::new(capacity_frames.max(4096) * format.channels);

        let state = Arc::new(AtomicU8::new(0));
        let events = Arc::new(EventDispatcher::new());

        let worker_state = state.clone();
        let worker_events = events.clone();
        let worker = thread::Builder::new()
            .name("cadenza-recorder".to_string())
            .spawn(move || {
                let mut chunk = vec![0.0f32; 4096];
                loop {
                    let current = RecorderState::from_u8(worker_state.load(Ordering::Acquire));
                    let available = consumer.slots();

                    if available == 0 {
                        if current == RecorderState::Stopped {
                            break;
                        }
                        thread::sleep(DRAIN_POLL);
                        continue;
                    }

                    let take = available.min(chunk.len());
                    for sample in &mut chunk[..take] {
                        *sample = consumer.pop().unwrap_or(0.0);
                    }
                    if let Err(e) = encoder.write(&chunk[..take]) {
                        log::warn!("Recording failed: {}", e);
                        worker_state.store(RecorderState::Stopped as u8, Ordering::Release);
                        worker_events.emit(&RecorderEvent::Failed(e.to_string()));
                        return;
                    }
                }

                match encoder.finish() {
                    Ok(()) => worker_events.emit(&RecorderEvent::Finished),
                    Err(e) => worker_events.emit(&RecorderEvent::Failed(e.to_string())),
                }
            })
            .map_err(|e| {
                crate::error::EngineError::Device(format!("failed to spawn recorder thread: {e}"))
            })?;

        Ok(Self {
            state,
            producer: Arc::new(Mutex::new(producer)),
            events,
            worker: Some(worker),
        })
    }

    /// The tap to register with `AudioEngine::add_capture_subscriber`
    pub fn capture_tap(&self) -> CaptureTap {
        let state = self.state.clone();
        let producer = self.producer.clone();
        Arc::new(move |block: &[Sample], _channels: usize| {
            if RecorderState::from_u8(state.load(Ordering::Acquire)) != RecorderState::Recording {
                return;
            }
            let mut producer = producer.lock();
            for &sample in block {
                if producer.push(sample).is_err() {
                    // Ring full: the writer thread is behind; drop the rest
                    log::warn!("Recorder ring full, dropping capture block tail");
                    break;
                }
            }
        })
    }

    pub fn state(&self) -> RecorderState {
        RecorderState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Recorder events (`Failed`, `Finished`)
    pub fn events(&self) -> &EventDispatcher<RecorderEvent> {
        &self.events
    }

    pub fn start(&self) {
        self.state.store(RecorderState::Recording as u8, Ordering::Release);
    }

    pub fn pause(&self) {
        let _ = self.state.compare_exchange(
            RecorderState::Recording as u8,
            RecorderState::Paused as u8,
            Ordering::AcqRel,
            Ordering::Relaxed,
        );
    }

    pub fn resume(&self) {
        let _ = self.state.compare_exchange(
            RecorderState::Paused as u8,
            RecorderState::Recording as u8,
            Ordering::AcqRel,
            Ordering::Relaxed,
        );
    }

    /// Stop recording; the writer drains the ring and finalizes the encoder
    pub fn stop(&mut self) {
        self.state.store(RecorderState::Stopped as u8, Ordering::Release);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

impl Drop for Recorder {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;
    use crate::format::SampleEncoding;
    use std::sync::atomic::AtomicUsize;

    struct MemoryEncoder {
        written: Arc<Mutex<Vec<Sample>>>,
        finished: Arc<AtomicU8>,
    }

    impl Encoder for MemoryEncoder {
        fn write(&mut self, samples: &[Sample]) -> EngineResult<()> {
            self.written.lock().extend_from_slice(samples);
            Ok(())
        }

        fn finish(&mut self) -> EngineResult<()> {
            self.finished.store(1, Ordering::Release);
            Ok(())
        }
    }

    struct FailingEncoder;

    impl Encoder for FailingEncoder {
        fn write(&mut self, _samples: &[Sample]) -> EngineResult<()> {
            Err(EngineError::Encoder("disk full".into()))
        }

        fn finish(&mut self) -> EngineResult<()> {
            Ok(())
        }
    }

    #[test]
    fn test_record_pause_stop() {
        let format = AudioFormat::new(48000, 2, SampleEncoding::F32).unwrap();
        let written = Arc::new(Mutex::new(Vec::new()));
        let finished = Arc::new(AtomicU8::new(0));
        let encoder = Box::new(MemoryEncoder { written: written.clone(), finished: finished.clone() });

        let mut recorder = Recorder::new(format, encoder, 8192).unwrap();
        let tap = recorder.capture_tap();

        // Idle: blocks ignored
        tap(&[0.5; 96], 2);
        recorder.start();
        tap(&[0.25; 96], 2);
        recorder.pause();
        tap(&[0.75; 96], 2);
        recorder.resume();
        tap(&[0.125; 96], 2);
        recorder.stop();

        assert_eq!(recorder.state(), RecorderState::Stopped);
        assert_eq!(finished.load(Ordering::Acquire), 1);
        let written = written.lock();
        assert_eq!(written.len(), 192);
        assert!(written[..96].iter().all(|&s| s == 0.25));
        assert!(written[96..].iter().all(|&s| s == 0.125));
    }

    #[test]
    fn test_encode_failure_stops_and_publishes() {
        let format = AudioFormat::new(48000, 1, SampleEncoding::F32).unwrap();
        let mut recorder = Recorder::new(format, Box::new(FailingEncoder), 4096).unwrap();

        let failures = Arc::new(AtomicUsize::new(0));
        let f = failures.clone();
        recorder.events().subscribe(move |event| {
            if matches!(event, RecorderEvent::Failed(_)) {
                f.fetch_add(1, Ordering::Relaxed);
            }
        });

        recorder.start();
        let tap = recorder.capture_tap();
        tap(&[0.5; 64], 1);

        // The writer thread notices on its next drain
        for _ in 0..100 {
            if recorder.state() == RecorderState::Stopped {
                break;
            }
            thread::sleep(Duration::from_millis(2));
        }
        assert_eq!(recorder.state(), RecorderState::Stopped);
        assert_eq!(failures.load(Ordering::Relaxed), 1);
    }
}
