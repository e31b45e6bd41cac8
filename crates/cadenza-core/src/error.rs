//! Engine error types
//!
//! Errors are values with a kind and a message; nothing unwinds across the
//! audio boundary. End-of-stream is deliberately not here — providers report
//! it with `Ok(0)` from `read` and the `EndReached` event.

use thiserror::Error;

/// Errors that can occur during engine operations
#[derive(Error, Debug)]
pub enum EngineError {
    /// The native backend refused an operation (init, start, switch)
    #[error("Audio device error: {0}")]
    Device(String),

    /// Sample rate / channel count / encoding not representable
    #[error("Unsupported format: {0}")]
    FormatUnsupported(String),

    /// The provider does not support seeking
    #[error("Provider is not seekable")]
    NotSeekable,

    /// A control-thread wait exceeded its deadline
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Capability missing on the current platform
    #[error("Not supported on this platform: {0}")]
    NotSupported(String),

    /// Operation on an already-disposed resource
    #[error("Resource has been disposed: {0}")]
    Disposed(String),

    /// Bad range, bad channel count, null required input
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The MIDI route's destination repeatedly failed; the route is dead
    #[error("MIDI route faulted: {0}")]
    RouteFaulted(String),

    /// Surfaced opaquely from the codec collaborator
    #[error("Decoder error: {0}")]
    Decoder(String),

    /// Surfaced opaquely from the codec collaborator
    #[error("Encoder error: {0}")]
    Encoder(String),
}

/// Result type for engine operations
pub type EngineResult<T> = Result<T, EngineError>;
