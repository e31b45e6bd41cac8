//! Device lifecycle and the engine
//!
//! The backend trait is the boundary to the native driver; the engine owns
//! opened devices, the master mixer, capture fan-out, the master clock, and
//! the `audio-processed` broadcast.

mod backend;
mod engine;

#[cfg(feature = "cpal-backend")]
mod cpal_backend;

pub use backend::{
    AudioBackend, DataCallback, DeviceCapability, DeviceConfig, DeviceHandle, DeviceId,
    DeviceInfo, DeviceState, NullBackend, NullDeviceHandle, NullDevicePump,
    DEVICE_NAME_CAPACITY,
};
pub use engine::{AudioEngine, AudioTap, CaptureTap, EngineDeviceId};

#[cfg(feature = "cpal-backend")]
pub use cpal_backend::{CpalBackend, CpalDeviceHandle};
