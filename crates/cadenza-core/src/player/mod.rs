//! Playback nodes
//!
//! `SoundPlayer` drives a data provider through speed and channel fitting
//! into the graph; `SurroundPlayer` adds positional panning over a speaker
//! layout.

mod sound_player;
mod surround;

pub use sound_player::{LoopRegion, PlaybackMode, PlaybackState, SoundPlayer};
pub use surround::{PanningMethod, PlanePosition, SurroundPlayer};
