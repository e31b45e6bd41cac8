//! MIDI hardware I/O
//!
//! Uses midir for cross-platform MIDI ports (ALSA on Linux, CoreMIDI on
//! macOS, WinMM on Windows). A `HardwareSource` bridges an input port into a
//! router `MidiSource`; a `HardwareDestination` wraps an output port as a
//! physical route destination.

use midir::{MidiInput, MidiInputConnection, MidiOutput, MidiOutputConnection};
use parking_lot::Mutex;
use std::sync::Arc;

use crate::error::{MidiError, MidiResult};
use crate::message::MidiMessage;
use crate::router::{MidiDestination, MidiSource};

/// List available input port names
pub fn list_input_ports() -> MidiResult<Vec<String>> {
    let midi_in = MidiInput::new("cadenza-midi-enum").map_err(|e| MidiError::InitError {
        direction: "input",
        reason: e.to_string(),
    })?;
    Ok(midi_in
        .ports()
        .iter()
        .filter_map(|p| midi_in.port_name(p).ok())
        .collect())
}

/// List available output port names
pub fn list_output_ports() -> MidiResult<Vec<String>> {
    let midi_out = MidiOutput::new("cadenza-midi-enum").map_err(|e| MidiError::InitError {
        direction: "output",
        reason: e.to_string(),
    })?;
    Ok(midi_out
        .ports()
        .iter()
        .filter_map(|p| midi_out.port_name(p).ok())
        .collect())
}

/// A hardware input port feeding a router source
///
/// The midir callback parses raw bytes into `MidiMessage`s and emits them
/// into the wrapped `MidiSource`. SysEx payloads (0xF0-framed) are forwarded
/// through `emit_sysex`. The callback runs on the MIDI driver thread and
/// must stay fast; route delivery is snapshot-based and never blocks on
/// control-thread edits.
pub struct HardwareSource {
    /// The midir connection (kept alive for the duration)
    _connection: MidiInputConnection<Arc<MidiSource>>,
    source: Arc<MidiSource>,
    port_name: String,
}

impl HardwareSource {
    /// Find an input port whose name contains `port_match`
    /// (case-insensitive) and connect it to a new source
    pub fn connect(port_match: &str) -> MidiResult<Self> {
        let midi_in = MidiInput::new("cadenza-midi-in").map_err(|e| MidiError::InitError {
            direction: "input",
            reason: e.to_string(),
        })?;

        let ports = midi_in.ports();
        if ports.is_empty() {
            return Err(MidiError::NoPorts("input"));
        }

        let pattern = port_match.to_lowercase();
        let port = ports
            .iter()
            .find(|p| {
                midi_in
                    .port_name(p)
                    .map(|name| name.to_lowercase().contains(&pattern))
                    .unwrap_or(false)
            })
            .ok_or_else(|| MidiError::PortNotFound(port_match.to_string()))?;

        let port_name = midi_in
            .port_name(port)
            .map_err(|e| MidiError::ConnectionError(e.to_string()))?;

        let source = MidiSource::new(port_name.clone());

        let connection = midi_in
            .connect(port, "cadenza-midi-input", Self::midi_callback, source.clone())
            .map_err(|e| MidiError::ConnectionError(e.to_string()))?;

        log::info!("MIDI: input connected: {}", port_name);

        Ok(Self {
            _connection: connection,
            source,
            port_name,
        })
    }

    /// The router source fed by this port
    pub fn source(&self) -> &Arc<MidiSource> {
        &self.source
    }

    /// Connected port name
    pub fn port_name(&self) -> &str {
        &self.port_name
    }

    /// The midir callback; runs on the driver thread
    fn midi_callback(timestamp: u64, data: &[u8], source: &mut Arc<MidiSource>) {
        if data.first() == Some(&0xF0) {
            log::trace!("[MIDI IN] sysex, {} bytes", data.len());
            source.emit_sysex(data);
            return;
        }
        if let Some(message) = MidiMessage::parse(data, timestamp) {
            log::trace!("[MIDI IN] {:?}", message);
            source.emit_message(message);
        }
    }
}

/// A hardware output port as a physical route destination
pub struct HardwareDestination {
    name: String,
    connection: Mutex<MidiOutputConnection>,
}

impl HardwareDestination {
    /// Find an output port whose name contains `port_match`
    /// (case-insensitive) and connect to it
    pub fn connect(port_match: &str) -> MidiResult<Arc<Self>> {
        let midi_out = MidiOutput::new("cadenza-midi-out").map_err(|e| MidiError::InitError {
            direction: "output",
            reason: e.to_string(),
        })?;

        let ports = midi_out.ports();
        if ports.is_empty() {
            return Err(MidiError::NoPorts("output"));
        }

        let pattern = port_match.to_lowercase();
        let port = ports
            .iter()
            .find(|p| {
                midi_out
                    .port_name(p)
                    .map(|name| name.to_lowercase().contains(&pattern))
                    .unwrap_or(false)
            })
            .ok_or_else(|| MidiError::PortNotFound(port_match.to_string()))?;

        let name = midi_out
            .port_name(port)
            .map_err(|e| MidiError::ConnectionError(e.to_string()))?;

        let connection = midi_out
            .connect(port, "cadenza-midi-output")
            .map_err(|e| MidiError::ConnectionError(e.to_string()))?;

        log::info!("MIDI: output connected: {}", name);

        Ok(Arc::new(Self {
            name,
            connection: Mutex::new(connection),
        }))
    }
}

impl MidiDestination for HardwareDestination {
    fn name(&self) -> &str {
        &self.name
    }

    fn receive(&self, message: &MidiMessage) -> MidiResult<()> {
        let (bytes, len) = message.to_bytes();
        self.connection
            .lock()
            .send(&bytes[..len])
            .map_err(|e| MidiError::SendError(e.to_string()))
    }

    fn receive_sysex(&self, bytes: &[u8]) -> MidiResult<()> {
        self.connection
            .lock()
            .send(bytes)
            .map_err(|e| MidiError::SendError(e.to_string()))
    }

    fn is_physical(&self) -> bool {
        true
    }
}
