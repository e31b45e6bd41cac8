//! Sound data providers
//!
//! A provider is a lazy, forward-read, optionally seekable PCM source. The
//! graph always reads interleaved f32 at the provider's own format; players
//! handle rate and channel conversion.
//!
//! `read` returns the number of frames delivered and `Ok(0)` at end of
//! stream — end of stream is not an error.

mod decoder;
mod memory;
mod microphone;
mod network;
mod raw;
mod synthetic;

pub use decoder::{Decoder, DecoderProvider};
pub use memory::MemoryProvider;
pub use microphone::{MicrophoneProvider, MicrophoneWriter};
pub use network::NetworkProvider;
pub use raw::RawPcmProvider;
pub use synthetic::{ConstantProvider, SilenceProvider, SineProvider};

use crate::error::EngineResult;
use crate::events::EventDispatcher;
use crate::format::AudioFormat;
use crate::types::Sample;

/// Events published by providers
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ProviderEvent {
    /// The provider delivered its final frame
    EndReached,
    /// The read position moved to the given frame (seek or read)
    PositionChanged(u64),
}

/// A lazy PCM source
///
/// Created externally, owned by the player that reads it, released when the
/// player is disposed.
pub trait SoundDataProvider: Send {
    /// The source's native format
    fn format(&self) -> AudioFormat;

    /// Current read position in frames
    fn position(&self) -> u64;

    /// Total length in frames, or `None` when unknown (streams) or
    /// unbounded (synthetic sources)
    fn len_frames(&self) -> Option<u64>;

    /// Whether `seek` is supported
    fn can_seek(&self) -> bool {
        false
    }

    /// Fill `dst` (interleaved, at the provider's format) and return the
    /// number of frames delivered; `Ok(0)` signals end of stream
    fn read(&mut self, dst: &mut [Sample]) -> EngineResult<usize>;

    /// Reposition to `frame`; fails with `NotSeekable` on forward-only
    /// providers
    fn seek(&mut self, frame: u64) -> EngineResult<()>;

    /// Whether the end of the stream has been reached
    fn end_reached(&self) -> bool;

    /// Provider event stream (`EndReached`, `PositionChanged`)
    fn events(&self) -> &EventDispatcher<ProviderEvent>;
}
