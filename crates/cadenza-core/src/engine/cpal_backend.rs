//! CPAL device backend
//!
//! Implements the backend boundary over cpal (WASAPI on Windows, CoreAudio
//! on macOS, ALSA/JACK on Linux). cpal streams are not `Send`, so each
//! stream lives on its own host thread; the handle talks to it through a
//! command channel, and control deadlines map onto channel waits.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BufferSize, SampleRate, StreamConfig};
use parking_lot::Mutex;

use crate::engine::backend::{
    AudioBackend, DataCallback, DeviceConfig, DeviceHandle, DeviceId, DeviceInfo, DeviceState,
};
use crate::error::{EngineError, EngineResult};
use crate::format::AudioFormat;

enum StreamCommand {
    Start(flume::Sender<EngineResult<()>>),
    Stop(flume::Sender<EngineResult<()>>),
    Shutdown,
}

/// Which direction(s) the host thread should open
enum StreamRole {
    Output,
    Input,
    Duplex { capture: Option<DeviceId> },
}

/// Handle to a stream hosted on its own thread
pub struct CpalDeviceHandle {
    commands: flume::Sender<StreamCommand>,
    state: Arc<AtomicU8>,
    format: AudioFormat,
}

impl CpalDeviceHandle {
    fn send_and_wait(
        &self,
        make: impl FnOnce(flume::Sender<EngineResult<()>>) -> StreamCommand,
        deadline: Instant,
        verb: &str,
    ) -> EngineResult<()> {
        let (tx, rx) = flume::bounded(1);
        self.commands
            .send(make(tx))
            .map_err(|_| EngineError::Device("stream host thread is gone".into()))?;
        match rx.recv_deadline(deadline) {
            Ok(result) => result,
            Err(_) => Err(EngineError::Timeout(format!("device {verb}"))),
        }
    }
}

impl DeviceHandle for CpalDeviceHandle {
    fn state(&self) -> DeviceState {
        match self.state.load(Ordering::Acquire) {
            1 => DeviceState::Stopped,
            2 => DeviceState::Running,
            _ => DeviceState::Uninitialized,
        }
    }

    fn format(&self) -> AudioFormat {
        self.format
    }

    fn start(&self, deadline: Instant) -> EngineResult<()> {
        self.send_and_wait(StreamCommand::Start, deadline, "start")?;
        self.state.store(2, Ordering::Release);
        Ok(())
    }

    fn stop(&self, deadline: Instant) -> EngineResult<()> {
        self.send_and_wait(StreamCommand::Stop, deadline, "stop")?;
        self.state.store(1, Ordering::Release);
        Ok(())
    }
}

impl Drop for CpalDeviceHandle {
    fn drop(&mut self) {
        let _ = self.commands.send(StreamCommand::Shutdown);
    }
}

/// The cpal backend
pub struct CpalBackend;

impl CpalBackend {
    pub fn new() -> Self {
        Self
    }

    fn enumerate(capture: bool) -> EngineResult<Vec<DeviceInfo>> {
        let host = cpal::default_host();
        let default_name = if capture {
            host.default_input_device().and_then(|d| d.name().ok())
        } else {
            host.default_output_device().and_then(|d| d.name().ok())
        };

        let devices = if capture {
            host.input_devices()
        } else {
            host.output_devices()
        }
        .map_err(|e| EngineError::Device(e.to_string()))?;

        let mut infos = Vec::new();
        for device in devices {
            let Ok(name) = device.name() else { continue };
            let max_channels = if capture {
                device
                    .supported_input_configs()
                    .ok()
                    .and_then(|mut c| c.next())
                    .map(|c| c.channels() as usize)
            } else {
                device
                    .supported_output_configs()
                    .ok()
                    .and_then(|mut c| c.next())
                    .map(|c| c.channels() as usize)
            }
            .unwrap_or(2);

            let is_default = default_name.as_ref() == Some(&name);
            infos.push(DeviceInfo::new(
                DeviceId(name.clone()),
                &name,
                is_default,
                max_channels,
            ));
        }

        if infos.is_empty() {
            return Err(EngineError::Device("no audio devices found".into()));
        }
        infos.sort_by(|a, b| b.is_default.cmp(&a.is_default));
        Ok(infos)
    }

    fn find_device(id: Option<&DeviceId>, capture: bool) -> EngineResult<cpal::Device> {
        let host = cpal::default_host();
        match id {
            None => {
                let device = if capture {
                    host.default_input_device()
                } else {
                    host.default_output_device()
                };
                device.ok_or_else(|| EngineError::Device("no default device".into()))
            }
            Some(id) => {
                let mut devices = if capture {
                    host.input_devices()
                } else {
                    host.output_devices()
                }
                .map_err(|e| EngineError::Device(e.to_string()))?;
                devices
                    .find(|d| d.name().ok().as_deref() == Some(id.0.as_str()))
                    .ok_or_else(|| EngineError::Device(format!("device not found: {}", id.0)))
            }
        }
    }

    fn stream_config(format: AudioFormat, config: &DeviceConfig) -> StreamConfig {
        StreamConfig {
            channels: format.channels as u16,
            sample_rate: SampleRate(format.sample_rate),
            buffer_size: config
                .buffer_frames
                .map(BufferSize::Fixed)
                .unwrap_or(BufferSize::Default),
        }
    }

    /// Spawn the host thread that owns the stream(s) and processes commands
    fn spawn_host(
        role: StreamRole,
        device_id: Option<DeviceId>,
        format: AudioFormat,
        config: DeviceConfig,
        callback: DataCallback,
    ) -> EngineResult<Box<dyn DeviceHandle>> {
        let (command_tx, command_rx) = flume::unbounded::<StreamCommand>();
        let (ready_tx, ready_rx) = flume::bounded::<EngineResult<()>>(1);
        let state = Arc::new(AtomicU8::new(1));

        thread::Builder::new()
            .name("cadenza-stream-host".to_string())
            .spawn(move || {
                let stream_config = Self::stream_config(format, &config);
                let callback = Arc::new(Mutex::new(callback));

                let build = || -> EngineResult<Vec<cpal::Stream>> {
                    let mut streams = Vec::new();
                    match &role {
                        StreamRole::Output | StreamRole::Duplex { .. } => {
                            let device = Self::find_device(device_id.as_ref(), false)?;
                            let cb = callback.clone();
                            let stream = device
                                .build_output_stream(
                                    &stream_config,
                                    move |data: &mut [f32], _| {
                                        (cb.lock())(Some(data), None);
                                    },
                                    |e| log::error!("Output stream error: {}", e),
                                    None,
                                )
                                .map_err(|e| EngineError::Device(e.to_string()))?;
                            streams.push(stream);
                        }
                        StreamRole::Input => {}
                    }
                    match &role {
                        StreamRole::Input => {
                            let device = Self::find_device(device_id.as_ref(), true)?;
                            let cb = callback.clone();
                            let stream = device
                                .build_input_stream(
                                    &stream_config,
                                    move |data: &[f32], _| {
                                        (cb.lock())(None, Some(data));
                                    },
                                    |e| log::error!("Input stream error: {}", e),
                                    None,
                                )
                                .map_err(|e| EngineError::Device(e.to_string()))?;
                            streams.push(stream);
                        }
                        StreamRole::Duplex { capture } => {
                            let device = Self::find_device(capture.as_ref(), true)?;
                            let cb = callback.clone();
                            let stream = device
                                .build_input_stream(
                                    &stream_config,
                                    move |data: &[f32], _| {
                                        (cb.lock())(None, Some(data));
                                    },
                                    |e| log::error!("Input stream error: {}", e),
                                    None,
                                )
                                .map_err(|e| EngineError::Device(e.to_string()))?;
                            streams.push(stream);
                        }
                        StreamRole::Output => {}
                    }
                    Ok(streams)
                };

                let streams = match build() {
                    Ok(streams) => {
                        let _ = ready_tx.send(Ok(()));
                        streams
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                // Streams start paused; commands drive them from here on
                for stream in &streams {
                    let _ = stream.pause();
                }

                while let Ok(command) = command_rx.recv() {
                    match command {
                        StreamCommand::Start(reply) => {
                            let result = streams
                                .iter()
                                .try_for_each(|s| s.play())
                                .map_err(|e| EngineError::Device(e.to_string()));
                            let _ = reply.send(result);
                        }
                        StreamCommand::Stop(reply) => {
                            let result = streams
                                .iter()
                                .try_for_each(|s| s.pause())
                                .map_err(|e| EngineError::Device(e.to_string()));
                            let _ = reply.send(result);
                        }
                        StreamCommand::Shutdown => break,
                    }
                }
            })
            .map_err(|e| EngineError::Device(format!("failed to spawn stream host: {e}")))?;

        ready_rx
            .recv()
            .map_err(|_| EngineError::Device("stream host thread died".into()))??;

        Ok(Box::new(CpalDeviceHandle {
            commands: command_tx,
            state,
            format,
        }))
    }
}

impl Default for CpalBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioBackend for CpalBackend {
    fn name(&self) -> &str {
        "cpal"
    }

    fn list_playback_devices(&self) -> EngineResult<Vec<DeviceInfo>> {
        Self::enumerate(false)
    }

    fn list_capture_devices(&self) -> EngineResult<Vec<DeviceInfo>> {
        Self::enumerate(true)
    }

    fn open_playback(
        &self,
        device: Option<&DeviceId>,
        format: AudioFormat,
        config: &DeviceConfig,
        callback: DataCallback,
    ) -> EngineResult<Box<dyn DeviceHandle>> {
        Self::spawn_host(StreamRole::Output, device.cloned(), format, *config, callback)
    }

    fn open_capture(
        &self,
        device: Option<&DeviceId>,
        format: AudioFormat,
        config: &DeviceConfig,
        callback: DataCallback,
    ) -> EngineResult<Box<dyn DeviceHandle>> {
        Self::spawn_host(StreamRole::Input, device.cloned(), format, *config, callback)
    }

    fn open_duplex(
        &self,
        playback: Option<&DeviceId>,
        capture: Option<&DeviceId>,
        format: AudioFormat,
        config: &DeviceConfig,
        callback: DataCallback,
    ) -> EngineResult<Box<dyn DeviceHandle>> {
        Self::spawn_host(
            StreamRole::Duplex { capture: capture.cloned() },
            playback.cloned(),
            format,
            *config,
            callback,
        )
    }

    // open_loopback: default NotSupported — cpal exposes no loopback capture
}
