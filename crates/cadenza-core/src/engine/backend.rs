//! Device backend boundary
//!
//! The native driver is an external collaborator: it opens and closes
//! devices and delivers PCM callbacks. Everything the engine needs from it
//! sits behind `AudioBackend` and `DeviceHandle`. A `NullBackend` with
//! manually pumped callbacks backs the engine's tests and headless use.

use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};
use crate::format::AudioFormat;
use crate::types::Sample;

/// Maximum device-name length in the wire descriptor
pub const DEVICE_NAME_CAPACITY: usize = 256;

/// Opaque backend device identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceId(pub String);

/// What a device endpoint does
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceCapability {
    Playback,
    Capture,
}

/// Device lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeviceState {
    #[default]
    Uninitialized,
    Stopped,
    Running,
}

/// A device descriptor from enumeration
///
/// The name travels as a UTF-8 byte array; `name()` scans for the NUL
/// terminator. The legacy fixed-string layout stays with the backend.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub id: DeviceId,
    name_utf8: [u8; DEVICE_NAME_CAPACITY],
    pub is_default: bool,
    pub max_channels: usize,
}

impl DeviceInfo {
    pub fn new(id: DeviceId, name: &str, is_default: bool, max_channels: usize) -> Self {
        let mut name_utf8 = [0u8; DEVICE_NAME_CAPACITY];
        let bytes = name.as_bytes();
        let len = bytes.len().min(DEVICE_NAME_CAPACITY - 1);
        name_utf8[..len].copy_from_slice(&bytes[..len]);
        Self { id, name_utf8, is_default, max_channels }
    }

    /// Decode the UTF-8 name up to the NUL terminator
    pub fn name(&self) -> &str {
        let end = self
            .name_utf8
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(DEVICE_NAME_CAPACITY);
        std::str::from_utf8(&self.name_utf8[..end]).unwrap_or("")
    }
}

/// Per-device open options
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Requested callback block size in frames; `None` lets the driver pick
    pub buffer_frames: Option<u32>,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self { buffer_frames: Some(480) }
    }
}

/// The PCM callback the engine installs on a device
///
/// `output` is present on playback/duplex callbacks, `input` on
/// capture/duplex/loopback callbacks. Both are interleaved at the device
/// format.
pub type DataCallback = Box<dyn FnMut(Option<&mut [Sample]>, Option<&[Sample]>) + Send>;

/// A live device endpoint
pub trait DeviceHandle: Send + Sync {
    fn state(&self) -> DeviceState;

    fn format(&self) -> AudioFormat;

    /// Begin delivering callbacks; fails with `Timeout` past the deadline
    fn start(&self, deadline: Instant) -> EngineResult<()>;

    /// Stop delivering callbacks; fails with `Timeout` past the deadline
    fn stop(&self, deadline: Instant) -> EngineResult<()>;
}

/// The native driver boundary
pub trait AudioBackend: Send + Sync {
    fn name(&self) -> &str;

    fn list_playback_devices(&self) -> EngineResult<Vec<DeviceInfo>>;

    fn list_capture_devices(&self) -> EngineResult<Vec<DeviceInfo>>;

    /// Open a playback endpoint; `device` of `None` means the default
    fn open_playback(
        &self,
        device: Option<&DeviceId>,
        format: AudioFormat,
        config: &DeviceConfig,
        callback: DataCallback,
    ) -> EngineResult<Box<dyn DeviceHandle>>;

    /// Open a capture endpoint
    fn open_capture(
        &self,
        device: Option<&DeviceId>,
        format: AudioFormat,
        config: &DeviceConfig,
        callback: DataCallback,
    ) -> EngineResult<Box<dyn DeviceHandle>>;

    /// Open a full-duplex endpoint (output and input in one callback)
    fn open_duplex(
        &self,
        playback: Option<&DeviceId>,
        capture: Option<&DeviceId>,
        format: AudioFormat,
        config: &DeviceConfig,
        callback: DataCallback,
    ) -> EngineResult<Box<dyn DeviceHandle>>;

    /// Capture what the system is playing; most hosts cannot
    fn open_loopback(
        &self,
        _format: AudioFormat,
        _config: &DeviceConfig,
        _callback: DataCallback,
    ) -> EngineResult<Box<dyn DeviceHandle>> {
        Err(EngineError::NotSupported(format!(
            "{} backend has no loopback capture",
            self.name()
        )))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Null backend
// ─────────────────────────────────────────────────────────────────────────────

struct NullDeviceShared {
    callback: Mutex<DataCallback>,
    state: Mutex<DeviceState>,
    format: AudioFormat,
}

/// Handle for a null device; the paired `NullDevicePump` drives callbacks
pub struct NullDeviceHandle {
    shared: Arc<NullDeviceShared>,
}

/// Drives a null device's callback by hand (tests, offline hosts)
pub struct NullDevicePump {
    shared: Arc<NullDeviceShared>,
}

impl NullDevicePump {
    /// Invoke the callback for `frames` frames of output, as the device
    /// thread would; returns the rendered block. No-op while stopped.
    pub fn pump_output(&self, frames: usize) -> Vec<Sample> {
        let mut block = vec![0.0; frames * self.shared.format.channels];
        if *self.shared.state.lock() == DeviceState::Running {
            (self.shared.callback.lock())(Some(&mut block), None);
        }
        block
    }

    /// Invoke the callback with an input block, as a capture device would
    pub fn pump_input(&self, input: &[Sample]) {
        if *self.shared.state.lock() == DeviceState::Running {
            (self.shared.callback.lock())(None, Some(input));
        }
    }

    pub fn is_running(&self) -> bool {
        *self.shared.state.lock() == DeviceState::Running
    }
}

impl DeviceHandle for NullDeviceHandle {
    fn state(&self) -> DeviceState {
        *self.shared.state.lock()
    }

    fn format(&self) -> AudioFormat {
        self.shared.format
    }

    fn start(&self, _deadline: Instant) -> EngineResult<()> {
        *self.shared.state.lock() = DeviceState::Running;
        Ok(())
    }

    fn stop(&self, _deadline: Instant) -> EngineResult<()> {
        *self.shared.state.lock() = DeviceState::Stopped;
        Ok(())
    }
}

/// A backend with no hardware: devices are pumped manually
pub struct NullBackend {
    pumps: Mutex<Vec<NullDevicePump>>,
}

impl NullBackend {
    pub fn new() -> Self {
        Self { pumps: Mutex::new(Vec::new()) }
    }

    /// Take the pump for the most recently opened device
    pub fn take_pump(&self) -> Option<NullDevicePump> {
        self.pumps.lock().pop()
    }

    fn open(
        &self,
        format: AudioFormat,
        callback: DataCallback,
    ) -> EngineResult<Box<dyn DeviceHandle>> {
        let shared = Arc::new(NullDeviceShared {
            callback: Mutex::new(callback),
            state: Mutex::new(DeviceState::Stopped),
            format,
        });
        self.pumps.lock().push(NullDevicePump { shared: shared.clone() });
        Ok(Box::new(NullDeviceHandle { shared }))
    }
}

impl Default for NullBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioBackend for NullBackend {
    fn name(&self) -> &str {
        "null"
    }

    fn list_playback_devices(&self) -> EngineResult<Vec<DeviceInfo>> {
        Ok(vec![DeviceInfo::new(
            DeviceId("null-out".into()),
            "Null Output",
            true,
            8,
        )])
    }

    fn list_capture_devices(&self) -> EngineResult<Vec<DeviceInfo>> {
        Ok(vec![DeviceInfo::new(
            DeviceId("null-in".into()),
            "Null Input",
            true,
            2,
        )])
    }

    fn open_playback(
        &self,
        _device: Option<&DeviceId>,
        format: AudioFormat,
        _config: &DeviceConfig,
        callback: DataCallback,
    ) -> EngineResult<Box<dyn DeviceHandle>> {
        self.open(format, callback)
    }

    fn open_capture(
        &self,
        _device: Option<&DeviceId>,
        format: AudioFormat,
        _config: &DeviceConfig,
        callback: DataCallback,
    ) -> EngineResult<Box<dyn DeviceHandle>> {
        self.open(format, callback)
    }

    fn open_duplex(
        &self,
        _playback: Option<&DeviceId>,
        _capture: Option<&DeviceId>,
        format: AudioFormat,
        _config: &DeviceConfig,
        callback: DataCallback,
    ) -> EngineResult<Box<dyn DeviceHandle>> {
        self.open(format, callback)
    }
}
