//! Device-driven audio engine
//!
//! Owns the backend devices, the master mixer, the capture fan-out, and the
//! master clock. On each device callback the engine renders the master mixer
//! into the output block and/or fans the input block to capture subscribers,
//! then broadcasts the block on the `audio-processed` tap tagged with the
//! device capability.
//!
//! Control operations (open, switch, dispose) take an explicit timeout and
//! fail with `Timeout` when the backend does not come back in time. A failed
//! switch rolls back to the old device.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use parking_lot::RwLock;

use crate::engine::backend::{
    AudioBackend, DataCallback, DeviceCapability, DeviceConfig, DeviceHandle, DeviceId,
    DeviceInfo, DeviceState,
};
use crate::error::{EngineError, EngineResult};
use crate::format::AudioFormat;
use crate::graph::{Component, Mixer};
use crate::types::Sample;

/// Handle to a device opened through the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EngineDeviceId(u64);

/// Block observer on the `audio-processed` broadcast
pub type AudioTap = Arc<dyn Fn(&[Sample], usize, DeviceCapability) + Send + Sync>;

/// Capture-block subscriber
pub type CaptureTap = Arc<dyn Fn(&[Sample], usize) + Send + Sync>;

/// Copy-on-write subscriber list; wait-free snapshot reads on the callback
struct TapList<F: ?Sized> {
    entries: ArcSwap<Vec<(u64, Arc<F>)>>,
    next_id: AtomicU64,
}

impl<F: ?Sized> TapList<F> {
    fn new() -> Self {
        Self {
            entries: ArcSwap::from_pointee(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    fn subscribe(&self, tap: Arc<F>) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.entries.rcu(|old| {
            let mut next = Vec::with_capacity(old.len() + 1);
            next.extend(old.iter().cloned());
            next.push((id, tap.clone()));
            next
        });
        id
    }

    fn unsubscribe(&self, id: u64) {
        self.entries.rcu(|old| {
            old.iter()
                .filter(|(e, _)| *e != id)
                .cloned()
                .collect::<Vec<_>>()
        });
    }

    fn snapshot(&self) -> arc_swap::Guard<Arc<Vec<(u64, Arc<F>)>>> {
        self.entries.load()
    }

    fn len(&self) -> usize {
        self.entries.load().len()
    }
}

/// How an engine device was opened (for re-opening on switch)
#[derive(Clone)]
enum OpenKind {
    Playback(Option<DeviceId>),
    Capture(Option<DeviceId>),
    Duplex(Option<DeviceId>, Option<DeviceId>),
    Loopback,
}

struct DeviceEntry {
    handle: Box<dyn DeviceHandle>,
    format: AudioFormat,
    config: DeviceConfig,
    kind: OpenKind,
}

/// The audio engine
pub struct AudioEngine {
    backend: Arc<dyn AudioBackend>,
    master: Arc<Mixer>,
    devices: RwLock<HashMap<u64, DeviceEntry>>,
    next_device: AtomicU64,
    /// Master clock: total output frames rendered
    clock_frames: Arc<AtomicU64>,
    audio_taps: Arc<TapList<dyn Fn(&[Sample], usize, DeviceCapability) + Send + Sync>>,
    capture_taps: Arc<TapList<dyn Fn(&[Sample], usize) + Send + Sync>>,
    disposed: AtomicBool,
}

impl AudioEngine {
    /// Create an engine over the given backend
    pub fn new(backend: Arc<dyn AudioBackend>) -> Self {
        log::info!("Engine created over {} backend", backend.name());
        Self {
            backend,
            master: Mixer::new("master"),
            devices: RwLock::new(HashMap::new()),
            next_device: AtomicU64::new(1),
            clock_frames: Arc::new(AtomicU64::new(0)),
            audio_taps: Arc::new(TapList::new()),
            capture_taps: Arc::new(TapList::new()),
            disposed: AtomicBool::new(false),
        }
    }

    /// Create an engine over the platform default backend
    #[cfg(feature = "cpal-backend")]
    pub fn with_default_backend() -> Self {
        Self::new(Arc::new(crate::engine::cpal_backend::CpalBackend::new()))
    }

    fn ensure_live(&self) -> EngineResult<()> {
        if self.disposed.load(Ordering::Acquire) {
            Err(EngineError::Disposed("engine".into()))
        } else {
            Ok(())
        }
    }

    /// The master mixer; destroyed (emptied) on engine dispose
    pub fn master(&self) -> &Arc<Mixer> {
        &self.master
    }

    /// Attach a component to the master mixer
    pub fn add_component(&self, component: Arc<dyn Component>) {
        self.master.add_component(component);
    }

    /// Detach a component from the master mixer
    pub fn remove_component(&self, component: &Arc<dyn Component>) {
        self.master.remove_component(component);
    }

    /// Total output frames rendered since engine creation
    pub fn clock_frames(&self) -> u64 {
        self.clock_frames.load(Ordering::Relaxed)
    }

    pub fn list_playback_devices(&self) -> EngineResult<Vec<DeviceInfo>> {
        self.ensure_live()?;
        self.backend.list_playback_devices()
    }

    pub fn list_capture_devices(&self) -> EngineResult<Vec<DeviceInfo>> {
        self.ensure_live()?;
        self.backend.list_capture_devices()
    }

    /// Subscribe to the post-render `audio-processed` broadcast
    ///
    /// Subscribers run inline on the device callback: keep them short and
    /// non-blocking; push long work through a queue.
    pub fn subscribe_audio_processed(&self, tap: AudioTap) -> u64 {
        self.audio_taps.subscribe(tap)
    }

    pub fn unsubscribe_audio_processed(&self, id: u64) {
        self.audio_taps.unsubscribe(id);
    }

    /// Register a capture subscriber; it receives every input block
    pub fn add_capture_subscriber(&self, tap: CaptureTap) -> u64 {
        self.capture_taps.subscribe(tap)
    }

    pub fn remove_capture_subscriber(&self, id: u64) {
        self.capture_taps.unsubscribe(id);
    }

    pub fn capture_subscriber_count(&self) -> usize {
        self.capture_taps.len()
    }

    /// The playback/duplex render callback
    fn playback_callback(&self, format: AudioFormat) -> DataCallback {
        let master = self.master.clone();
        let clock = self.clock_frames.clone();
        let audio_taps = self.audio_taps.clone();
        let capture_taps = self.capture_taps.clone();
        let channels = format.channels;
        let sample_rate = format.sample_rate;

        Box::new(move |output, input| {
            if let Some(out) = output {
                master.render(out, channels, sample_rate);
                // The root has no parent to run its chain, so it runs here
                let state = master.state();
                state.modifiers().process(out, channels, sample_rate);
                state.analyzers().observe(out, channels, sample_rate);
                crate::types::scale(out, state.volume());

                clock.fetch_add((out.len() / channels) as u64, Ordering::Relaxed);
                for (_, tap) in audio_taps.snapshot().iter() {
                    tap(out, channels, DeviceCapability::Playback);
                }
            }
            if let Some(input) = input {
                for (_, tap) in capture_taps.snapshot().iter() {
                    tap(input, channels);
                }
                for (_, tap) in audio_taps.snapshot().iter() {
                    tap(input, channels, DeviceCapability::Capture);
                }
            }
        })
    }

    fn register(&self, entry: DeviceEntry) -> EngineDeviceId {
        let id = self.next_device.fetch_add(1, Ordering::Relaxed);
        self.devices.write().insert(id, entry);
        EngineDeviceId(id)
    }

    fn open_entry(
        &self,
        kind: OpenKind,
        format: AudioFormat,
        config: DeviceConfig,
    ) -> EngineResult<DeviceEntry> {
        let callback = self.playback_callback(format);
        let handle = match &kind {
            OpenKind::Playback(device) => {
                self.backend
                    .open_playback(device.as_ref(), format, &config, callback)?
            }
            OpenKind::Capture(device) => {
                self.backend
                    .open_capture(device.as_ref(), format, &config, callback)?
            }
            OpenKind::Duplex(playback, capture) => self.backend.open_duplex(
                playback.as_ref(),
                capture.as_ref(),
                format,
                &config,
                callback,
            )?,
            OpenKind::Loopback => self.backend.open_loopback(format, &config, callback)?,
        };
        Ok(DeviceEntry { handle, format, config, kind })
    }

    /// Open and start a playback device
    pub fn open_playback(
        &self,
        device: Option<&DeviceId>,
        format: AudioFormat,
        config: DeviceConfig,
        timeout: Duration,
    ) -> EngineResult<EngineDeviceId> {
        self.ensure_live()?;
        let entry = self.open_entry(OpenKind::Playback(device.cloned()), format, config)?;
        entry.handle.start(Instant::now() + timeout)?;
        log::info!(
            "Playback device opened: {} Hz, {} ch",
            format.sample_rate,
            format.channels
        );
        Ok(self.register(entry))
    }

    /// Open and start a capture device
    pub fn open_capture(
        &self,
        device: Option<&DeviceId>,
        format: AudioFormat,
        config: DeviceConfig,
        timeout: Duration,
    ) -> EngineResult<EngineDeviceId> {
        self.ensure_live()?;
        let entry = self.open_entry(OpenKind::Capture(device.cloned()), format, config)?;
        entry.handle.start(Instant::now() + timeout)?;
        log::info!(
            "Capture device opened: {} Hz, {} ch",
            format.sample_rate,
            format.channels
        );
        Ok(self.register(entry))
    }

    /// Open and start a full-duplex device
    pub fn open_full_duplex(
        &self,
        playback: Option<&DeviceId>,
        capture: Option<&DeviceId>,
        format: AudioFormat,
        config: DeviceConfig,
        timeout: Duration,
    ) -> EngineResult<EngineDeviceId> {
        self.ensure_live()?;
        let entry = self.open_entry(
            OpenKind::Duplex(playback.cloned(), capture.cloned()),
            format,
            config,
        )?;
        entry.handle.start(Instant::now() + timeout)?;
        Ok(self.register(entry))
    }

    /// Open loopback capture; `NotSupported` where the host lacks it
    pub fn open_loopback(
        &self,
        format: AudioFormat,
        config: DeviceConfig,
        timeout: Duration,
    ) -> EngineResult<EngineDeviceId> {
        self.ensure_live()?;
        let entry = self.open_entry(OpenKind::Loopback, format, config)?;
        entry.handle.start(Instant::now() + timeout)?;
        Ok(self.register(entry))
    }

    pub fn device_state(&self, id: EngineDeviceId) -> Option<DeviceState> {
        self.devices.read().get(&id.0).map(|e| e.handle.state())
    }

    pub fn device_format(&self, id: EngineDeviceId) -> Option<AudioFormat> {
        self.devices.read().get(&id.0).map(|e| e.format)
    }

    /// Switch a device to a new endpoint, preserving the attached component
    /// subtree, the capture subscribers, and the running state
    ///
    /// Stop-old, open-new-with-same-format-and-config, start-if-was-running.
    /// On failure the old device restarts and stays registered.
    pub fn switch_device(
        &self,
        old: EngineDeviceId,
        new_device: Option<&DeviceId>,
        timeout: Duration,
    ) -> EngineResult<EngineDeviceId> {
        self.ensure_live()?;
        let deadline = Instant::now() + timeout;

        let old_entry = self
            .devices
            .write()
            .remove(&old.0)
            .ok_or_else(|| EngineError::InvalidArgument(format!("unknown device {:?}", old)))?;
        let was_running = old_entry.handle.state() == DeviceState::Running;
        if let Err(e) = old_entry.handle.stop(deadline) {
            self.devices.write().insert(old.0, old_entry);
            return Err(e);
        }

        let kind = match &old_entry.kind {
            OpenKind::Playback(_) => OpenKind::Playback(new_device.cloned()),
            OpenKind::Capture(_) => OpenKind::Capture(new_device.cloned()),
            OpenKind::Duplex(_, capture) => {
                OpenKind::Duplex(new_device.cloned(), capture.clone())
            }
            OpenKind::Loopback => OpenKind::Loopback,
        };

        let result = self
            .open_entry(kind, old_entry.format, old_entry.config)
            .and_then(|entry| {
                if was_running {
                    entry.handle.start(deadline)?;
                }
                Ok(entry)
            });

        match result {
            Ok(entry) => {
                log::info!("Device switched");
                Ok(self.register(entry))
            }
            Err(e) => {
                // Roll back to the old device
                log::warn!("Device switch failed, rolling back: {}", e);
                if was_running {
                    let _ = old_entry.handle.start(deadline);
                }
                self.devices.write().insert(old.0, old_entry);
                Err(e)
            }
        }
    }

    /// Stop and release a single device
    pub fn close_device(&self, id: EngineDeviceId, timeout: Duration) -> EngineResult<()> {
        let entry = self
            .devices
            .write()
            .remove(&id.0)
            .ok_or_else(|| EngineError::InvalidArgument(format!("unknown device {:?}", id)))?;
        entry.handle.stop(Instant::now() + timeout)
    }

    /// Stop every device, release all handles, and empty the master mixer.
    /// The engine refuses further work afterwards.
    pub fn dispose(&self, timeout: Duration) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        let deadline = Instant::now() + timeout;
        let mut devices = self.devices.write();
        for (_, entry) in devices.drain() {
            if let Err(e) = entry.handle.stop(deadline) {
                log::warn!("Device stop during dispose failed: {}", e);
            }
        }
        drop(devices);
        self.master.take_children();
        log::info!("Engine disposed");
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }
}

impl Drop for AudioEngine {
    fn drop(&mut self) {
        if !self.is_disposed() {
            self.dispose(Duration::from_secs(2));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::backend::NullBackend;
    use crate::format::SampleEncoding;

    fn engine() -> (AudioEngine, Arc<NullBackend>) {
        let backend = Arc::new(NullBackend::new());
        (AudioEngine::new(backend.clone()), backend)
    }

    fn fmt() -> AudioFormat {
        AudioFormat::new(48000, 2, SampleEncoding::F32).unwrap()
    }

    #[test]
    fn test_empty_master_renders_silence() {
        let (engine, backend) = engine();
        engine
            .open_playback(None, fmt(), DeviceConfig::default(), Duration::from_secs(1))
            .unwrap();
        let pump = backend.take_pump().unwrap();

        let block = pump.pump_output(480);
        assert_eq!(block.len(), 960);
        assert!(block.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_clock_advances() {
        let (engine, backend) = engine();
        engine
            .open_playback(None, fmt(), DeviceConfig::default(), Duration::from_secs(1))
            .unwrap();
        let pump = backend.take_pump().unwrap();

        pump.pump_output(480);
        pump.pump_output(480);
        assert_eq!(engine.clock_frames(), 960);
    }

    #[test]
    fn test_audio_processed_broadcast() {
        use std::sync::atomic::AtomicUsize;

        let (engine, backend) = engine();
        let blocks = Arc::new(AtomicUsize::new(0));
        let b = blocks.clone();
        engine.subscribe_audio_processed(Arc::new(move |_, _, capability| {
            assert_eq!(capability, DeviceCapability::Playback);
            b.fetch_add(1, Ordering::Relaxed);
        }));

        engine
            .open_playback(None, fmt(), DeviceConfig::default(), Duration::from_secs(1))
            .unwrap();
        let pump = backend.take_pump().unwrap();
        pump.pump_output(480);
        assert_eq!(blocks.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_capture_fan_out() {
        use std::sync::atomic::AtomicUsize;

        let (engine, backend) = engine();
        let frames = Arc::new(AtomicUsize::new(0));
        let f = frames.clone();
        engine.add_capture_subscriber(Arc::new(move |block, channels| {
            f.fetch_add(block.len() / channels, Ordering::Relaxed);
        }));

        engine
            .open_capture(None, fmt(), DeviceConfig::default(), Duration::from_secs(1))
            .unwrap();
        let pump = backend.take_pump().unwrap();
        pump.pump_input(&vec![0.1; 960]);
        assert_eq!(frames.load(Ordering::Relaxed), 480);
    }

    #[test]
    fn test_switch_preserves_components() {
        let (engine, backend) = engine();
        let id = engine
            .open_playback(None, fmt(), DeviceConfig::default(), Duration::from_secs(1))
            .unwrap();
        let _old_pump = backend.take_pump().unwrap();

        let synth = Arc::new(crate::synth::Synthesizer::new("s"));
        synth.state().set_volume(0.75);
        engine.add_component(synth.clone());
        assert_eq!(engine.master().child_count(), 1);

        let new_id = engine
            .switch_device(id, None, Duration::from_secs(1))
            .unwrap();
        assert_ne!(new_id, id);
        assert_eq!(engine.master().child_count(), 1);
        assert_eq!(engine.master().children()[0].state().volume(), 0.75);
        assert_eq!(engine.device_state(new_id), Some(DeviceState::Running));
        assert!(engine.device_state(id).is_none());
    }

    #[test]
    fn test_dispose_refuses_further_work() {
        let (engine, _backend) = engine();
        engine.add_component(Arc::new(crate::synth::Synthesizer::new("s")));
        engine.dispose(Duration::from_secs(1));

        assert!(engine.is_disposed());
        assert_eq!(engine.master().child_count(), 0);
        assert!(matches!(
            engine.open_playback(None, fmt(), DeviceConfig::default(), Duration::from_secs(1)),
            Err(EngineError::Disposed(_))
        ));
    }
}
