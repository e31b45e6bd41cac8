//! MIDI error types

use thiserror::Error;

/// Errors that can occur during MIDI operations
#[derive(Error, Debug)]
pub enum MidiError {
    /// Failed to initialize a MIDI input or output
    #[error("Failed to initialize MIDI {direction}: {reason}")]
    InitError { direction: &'static str, reason: String },

    /// No MIDI ports available
    #[error("No MIDI {0} ports available")]
    NoPorts(&'static str),

    /// No port matched the requested pattern
    #[error("No MIDI port found matching pattern: {0}")]
    PortNotFound(String),

    /// Failed to connect to a port
    #[error("Failed to connect to MIDI port: {0}")]
    ConnectionError(String),

    /// Failed to send bytes to a physical output
    #[error("Failed to send MIDI message: {0}")]
    SendError(String),

    /// An in-process destination refused the message
    #[error("MIDI destination rejected message: {0}")]
    DestinationRejected(String),

    /// The route has faulted and drops all traffic
    #[error("MIDI route is faulted")]
    RouteFaulted,
}

/// Result type for MIDI operations
pub type MidiResult<T> = Result<T, MidiError>;
