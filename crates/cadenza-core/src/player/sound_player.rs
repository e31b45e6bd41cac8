//! Sound player
//!
//! Pulls PCM from a `SoundDataProvider`, applies variable speed (resampled
//! pitch-shifting or phase-vocoder pitch-preservation), fits the channel
//! count to the graph, and participates in the pull graph as a component.
//!
//! State machine: `Stopped → Playing ⇄ Paused → Stopped`; `seek` is legal in
//! every state. Playback-mode changes latch at the next render block and
//! reset both the resampler accumulator and the vocoder phase state.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::channels::ChannelMatrix;
use crate::dsp::{LinearResampler, PhaseVocoder};
use crate::error::{EngineError, EngineResult};
use crate::events::EventDispatcher;
use crate::graph::{Component, ComponentState};
use crate::provider::SoundDataProvider;
use crate::types::{AtomicF32, Sample};

/// Playback state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlaybackState {
    #[default]
    Stopped,
    Playing,
    Paused,
}

impl PlaybackState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::Playing,
            2 => Self::Paused,
            _ => Self::Stopped,
        }
    }
}

/// How speed changes affect pitch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PlaybackMode {
    /// Resampler: speed changes shift pitch (tape-style)
    #[default]
    PitchShift,
    /// Phase vocoder: speed changes preserve pitch
    PitchPreserve,
}

impl PlaybackMode {
    fn from_u8(v: u8) -> Self {
        if v == 1 { Self::PitchPreserve } else { Self::PitchShift }
    }
}

/// Loop points in source frames; `end = -1` loops the whole source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoopRegion {
    pub start: u64,
    pub end: i64,
}

struct PlayerInner {
    provider: Box<dyn SoundDataProvider>,
    resampler: LinearResampler,
    vocoder: PhaseVocoder,
    matrix: Option<ChannelMatrix>,
    /// Source-format frames read from the provider
    read_buf: Vec<Sample>,
    /// Vocoder output, still at the source channel count
    voc_buf: Vec<Sample>,
    /// Device-rate frames at the source channel count
    conv_buf: Vec<Sample>,
    applied_mode: PlaybackMode,
}

impl PlayerInner {
    /// Read `frames` source frames honoring the loop region; returns the
    /// frame count delivered (short only at a non-looping end of stream)
    fn read_source(
        &mut self,
        frames: usize,
        loop_region: Option<LoopRegion>,
    ) -> EngineResult<usize> {
        let channels = self.provider.format().channels;
        self.read_buf.resize(frames * channels, 0.0);

        let loop_end = loop_region.map(|lp| {
            if lp.end < 0 {
                self.provider.len_frames()
            } else {
                Some(lp.end as u64)
            }
        });

        let mut filled = 0;
        let mut empty_wraps = 0;
        while filled < frames {
            let mut want = frames - filled;

            // Clip the read at the loop end for a sample-accurate wrap
            if let Some(Some(end)) = loop_end {
                let start = loop_region.unwrap().start;
                if start >= end {
                    break; // degenerate region, refuse to spin
                }
                if self.provider.position() >= end {
                    self.provider.seek(start)?;
                }
                want = want.min((end - self.provider.position()) as usize);
            }

            let dst = &mut self.read_buf[filled * channels..(filled + want) * channels];
            let got = self.provider.read(dst)?;
            filled += got;

            if got == 0 {
                // A wrap that yields nothing twice running cannot progress
                empty_wraps += 1;
                match loop_region {
                    Some(lp) if self.provider.can_seek() && empty_wraps < 2 => {
                        self.provider.seek(lp.start)?;
                    }
                    _ => break,
                }
            } else {
                empty_wraps = 0;
            }
        }
        Ok(filled)
    }
}

/// File/stream playback node
pub struct SoundPlayer {
    state: ComponentState,
    playback: AtomicU8,
    mode: AtomicU8,
    speed: AtomicF32,
    loop_region: Mutex<Option<LoopRegion>>,
    ended_emitted: AtomicBool,
    ended: EventDispatcher<()>,
    inner: Mutex<PlayerInner>,
}

impl SoundPlayer {
    /// Wrap a provider in a new, stopped player
    pub fn new(name: impl Into<String>, provider: Box<dyn SoundDataProvider>) -> Self {
        let src_channels = provider.format().channels;
        Self {
            state: ComponentState::new(name),
            playback: AtomicU8::new(0),
            mode: AtomicU8::new(0),
            speed: AtomicF32::new(1.0),
            loop_region: Mutex::new(None),
            ended_emitted: AtomicBool::new(false),
            ended: EventDispatcher::new(),
            inner: Mutex::new(PlayerInner {
                provider,
                resampler: LinearResampler::new(src_channels, 1.0),
                vocoder: PhaseVocoder::new(src_channels),
                matrix: None,
                read_buf: Vec::new(),
                voc_buf: Vec::new(),
                conv_buf: Vec::new(),
                applied_mode: PlaybackMode::PitchShift,
            }),
        }
    }

    /// Current playback state
    pub fn playback_state(&self) -> PlaybackState {
        PlaybackState::from_u8(self.playback.load(Ordering::Acquire))
    }

    /// Start or resume playback
    pub fn play(&self) {
        self.ended_emitted.store(false, Ordering::Relaxed);
        self.playback.store(PlaybackState::Playing as u8, Ordering::Release);
    }

    /// Pause; only meaningful while playing
    pub fn pause(&self) {
        let _ = self.playback.compare_exchange(
            PlaybackState::Playing as u8,
            PlaybackState::Paused as u8,
            Ordering::AcqRel,
            Ordering::Relaxed,
        );
    }

    /// Stop and rewind to the start when the provider allows it
    pub fn stop(&self) {
        self.playback.store(PlaybackState::Stopped as u8, Ordering::Release);
        let mut inner = self.inner.lock();
        if inner.provider.can_seek() {
            let _ = inner.provider.seek(0);
        }
        inner.resampler.reset();
        inner.vocoder.reset();
        self.ended_emitted.store(false, Ordering::Relaxed);
    }

    /// Reposition to `seconds`; legal in any state
    pub fn seek(&self, seconds: f64) -> EngineResult<()> {
        if seconds < 0.0 || !seconds.is_finite() {
            return Err(EngineError::InvalidArgument(format!("seek to {seconds}")));
        }
        let mut inner = self.inner.lock();
        let frame = inner.provider.format().seconds_to_frames(seconds);
        inner.provider.seek(frame)?;
        inner.resampler.reset();
        inner.vocoder.reset();
        self.ended_emitted.store(false, Ordering::Relaxed);
        Ok(())
    }

    /// Current position in seconds (source clock)
    pub fn position_seconds(&self) -> f64 {
        let inner = self.inner.lock();
        let format = inner.provider.format();
        format.frames_to_seconds(inner.provider.position())
    }

    /// Set playback speed; clamped to 0.25..=4.0
    pub fn set_speed(&self, speed: f32) {
        self.speed.store(speed.clamp(0.25, 4.0));
    }

    pub fn speed(&self) -> f32 {
        self.speed.load()
    }

    /// Choose pitch-shifting or pitch-preserving speed; applies at the next
    /// render block boundary with the stretch state reset
    pub fn set_playback_mode(&self, mode: PlaybackMode) {
        self.mode.store(mode as u8, Ordering::Release);
    }

    pub fn playback_mode(&self) -> PlaybackMode {
        PlaybackMode::from_u8(self.mode.load(Ordering::Acquire))
    }

    /// Set loop points in source frames; `end = -1` loops the whole source
    pub fn set_loop(&self, start: u64, end: i64) {
        *self.loop_region.lock() = Some(LoopRegion { start, end });
    }

    /// Disable looping
    pub fn clear_loop(&self) {
        *self.loop_region.lock() = None;
    }

    pub fn loop_region(&self) -> Option<LoopRegion> {
        *self.loop_region.lock()
    }

    /// Fires once when the provider ends and looping does not restart
    pub fn playback_ended(&self) -> &EventDispatcher<()> {
        &self.ended
    }

    /// Volume passthrough to the node state
    pub fn set_volume(&self, volume: f32) {
        self.state.set_volume(volume);
    }

    /// Pan passthrough to the node state
    pub fn set_pan(&self, pan: f32) {
        self.state.set_pan(pan);
    }
}

impl Component for SoundPlayer {
    fn state(&self) -> &ComponentState {
        &self.state
    }

    fn render(&self, buffer: &mut [Sample], channels: usize, sample_rate: u32) {
        buffer.fill(0.0);
        if self.playback_state() != PlaybackState::Playing {
            return;
        }

        let loop_region = *self.loop_region.lock();
        let mut inner = self.inner.lock();

        // Latch a pending mode change at the block boundary; both stretch
        // stages reset so the handover cannot click
        let mode = PlaybackMode::from_u8(self.mode.load(Ordering::Acquire));
        if mode != inner.applied_mode {
            inner.resampler.reset();
            inner.vocoder.reset();
            inner.applied_mode = mode;
        }

        let src_format = inner.provider.format();
        let src_channels = src_format.channels;
        let rate_ratio = src_format.sample_rate as f64 / sample_rate as f64;
        let speed = self.speed.load() as f64;
        let out_frames = buffer.len() / channels;

        let read_result: EngineResult<(usize, usize)> = (|| {
            match mode {
                PlaybackMode::PitchShift => {
                    inner.resampler.set_ratio(speed * rate_ratio);
                    let need = inner.resampler.needed_input(out_frames);
                    let got = inner.read_source(need, loop_region)?;

                    let PlayerInner { resampler, read_buf, conv_buf, .. } = &mut *inner;
                    conv_buf.resize(out_frames * src_channels, 0.0);
                    conv_buf.fill(0.0);
                    Ok((resampler.process(&read_buf[..got * src_channels], conv_buf), got))
                }
                PlaybackMode::PitchPreserve => {
                    inner.resampler.set_ratio(rate_ratio);
                    inner.vocoder.set_stretch(1.0 / speed);
                    let rs_need = inner.resampler.needed_input(out_frames);
                    let voc_need = inner.vocoder.needed_input(rs_need);
                    let got = inner.read_source(voc_need, loop_region)?;

                    let PlayerInner { resampler, vocoder, read_buf, voc_buf, conv_buf, .. } =
                        &mut *inner;
                    voc_buf.resize(rs_need * src_channels, 0.0);
                    vocoder.process(&read_buf[..got * src_channels], voc_buf);
                    conv_buf.resize(out_frames * src_channels, 0.0);
                    conv_buf.fill(0.0);
                    Ok((resampler.process(voc_buf, conv_buf), got))
                }
            }
        })();

        let (produced, source_frames_read) = match read_result {
            Ok(result) => result,
            Err(e) => {
                // Never raise out of the callback: silence + sticky error
                self.state.set_error(e);
                return;
            }
        };

        // Fit the source channel count to the graph
        let rebuild = match &inner.matrix {
            Some(m) => m.src_channels() != src_channels || m.dst_channels() != channels,
            None => true,
        };
        if rebuild {
            inner.matrix = Some(ChannelMatrix::new(src_channels, channels));
        }
        if let Some(matrix) = &inner.matrix {
            matrix.apply(
                &inner.conv_buf[..produced * src_channels],
                &mut buffer[..produced * channels],
            );
        }

        // End of stream with no loop restart pending; the vocoder path pads
        // its startup latency with silence, so a short source read is the
        // signal there
        let starved = match mode {
            PlaybackMode::PitchShift => produced < out_frames,
            PlaybackMode::PitchPreserve => source_frames_read == 0,
        };
        let finished = starved && inner.provider.end_reached() && loop_region.is_none();
        drop(inner);

        if finished && !self.ended_emitted.swap(true, Ordering::AcqRel) {
            self.playback.store(PlaybackState::Stopped as u8, Ordering::Release);
            self.ended.emit(&());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::{AudioFormat, SampleEncoding};
    use crate::provider::{MemoryProvider, SineProvider};
    use crate::types::rms;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    fn ramp_provider(seconds: u64) -> Box<MemoryProvider> {
        let format = AudioFormat::new(48000, 1, SampleEncoding::F32).unwrap();
        let samples: Vec<f32> = (0..48000 * seconds).map(|i| i as f32).collect();
        Box::new(MemoryProvider::new(samples, format))
    }

    #[test]
    fn test_state_machine() {
        let player = SoundPlayer::new("p", ramp_provider(1));
        assert_eq!(player.playback_state(), PlaybackState::Stopped);

        player.play();
        assert_eq!(player.playback_state(), PlaybackState::Playing);

        player.pause();
        assert_eq!(player.playback_state(), PlaybackState::Paused);

        // Pause while not playing is a no-op
        player.pause();
        assert_eq!(player.playback_state(), PlaybackState::Paused);

        player.play();
        assert_eq!(player.playback_state(), PlaybackState::Playing);

        player.stop();
        assert_eq!(player.playback_state(), PlaybackState::Stopped);
    }

    #[test]
    fn test_stopped_renders_silence() {
        let player = SoundPlayer::new("p", ramp_provider(1));
        let mut buffer = vec![1.0f32; 128];
        player.render(&mut buffer, 2, 48000);
        assert!(buffer.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_seek_then_render_reads_from_target() {
        let player = SoundPlayer::new("p", ramp_provider(10));
        player.seek(5.0).unwrap();
        player.play();

        let mut buffer = vec![0.0f32; 32];
        player.render(&mut buffer, 1, 48000);
        // Mono source into mono graph: first sample is frame 5·48000
        assert_eq!(buffer[0], 5.0 * 48000.0);
    }

    #[test]
    fn test_sine_rms_with_volume_and_pan() {
        // Scenario: sine at volume 0.5, center pan ⇒ per-channel RMS ≈ 0.25
        let format = AudioFormat::new(48000, 2, SampleEncoding::F32).unwrap();
        let provider = Box::new(SineProvider::new(format, 1000.0, 1.0));
        let player = Arc::new(SoundPlayer::new("sine", provider));
        player.set_volume(0.5);
        player.set_pan(0.5);
        player.play();

        let mixer = crate::graph::Mixer::new("master");
        mixer.add_component(player);

        let mut output = Vec::new();
        let mut block = vec![0.0f32; 480 * 2];
        for _ in 0..100 {
            mixer.render(&mut block, 2, 48000);
            output.extend_from_slice(&block);
        }

        let left: Vec<f32> = output.iter().step_by(2).copied().collect();
        let expected = 0.5 * std::f32::consts::FRAC_1_SQRT_2 * std::f32::consts::FRAC_1_SQRT_2;
        assert!((rms(&left) - expected).abs() < 1e-3, "rms {}", rms(&left));
    }

    #[test]
    fn test_playback_ended_fires_once_and_stops() {
        let format = AudioFormat::new(48000, 1, SampleEncoding::F32).unwrap();
        let provider = Box::new(MemoryProvider::new(vec![0.5; 100], format));
        let player = SoundPlayer::new("p", provider);
        let ends = Arc::new(AtomicUsize::new(0));
        let e = ends.clone();
        player.playback_ended().subscribe(move |_| {
            e.fetch_add(1, Ordering::Relaxed);
        });

        player.play();
        let mut buffer = vec![0.0f32; 256];
        player.render(&mut buffer, 1, 48000);
        player.render(&mut buffer, 1, 48000);

        assert_eq!(ends.load(Ordering::Relaxed), 1);
        assert_eq!(player.playback_state(), PlaybackState::Stopped);
    }

    #[test]
    fn test_whole_source_loop_restarts() {
        let format = AudioFormat::new(48000, 1, SampleEncoding::F32).unwrap();
        let samples: Vec<f32> = (0..100).map(|i| i as f32).collect();
        let provider = Box::new(MemoryProvider::new(samples, format));
        let player = SoundPlayer::new("p", provider);
        player.set_loop(0, -1);
        player.play();

        let mut buffer = vec![0.0f32; 250];
        player.render(&mut buffer, 1, 48000);
        // Wraps sample-accurately at frame 100
        assert_eq!(buffer[99], 99.0);
        assert_eq!(buffer[100], 0.0);
        assert_eq!(buffer[205], 5.0);
        assert_eq!(player.playback_state(), PlaybackState::Playing);
    }

    #[test]
    fn test_loop_points_wrap() {
        let format = AudioFormat::new(48000, 1, SampleEncoding::F32).unwrap();
        let samples: Vec<f32> = (0..100).map(|i| i as f32).collect();
        let provider = Box::new(MemoryProvider::new(samples, format));
        let player = SoundPlayer::new("p", provider);
        player.set_loop(10, 20);
        player.play();

        let mut buffer = vec![0.0f32; 40];
        player.render(&mut buffer, 1, 48000);
        // 0..20 plays, then wraps to 10
        assert_eq!(buffer[19], 19.0);
        assert_eq!(buffer[20], 10.0);
        assert_eq!(buffer[30], 10.0);
    }

    #[test]
    fn test_double_speed_consumes_twice() {
        let player = SoundPlayer::new("p", ramp_provider(2));
        player.set_speed(2.0);
        player.play();

        let mut buffer = vec![0.0f32; 480];
        player.render(&mut buffer, 1, 48000);
        // Ramp read at 2x: successive outputs step by 2
        assert_eq!(buffer[0], 0.0);
        assert!((buffer[1] - 2.0).abs() < 1e-3);
        assert!((buffer[100] - 200.0).abs() < 1e-3);
    }

    #[test]
    fn test_speed_clamps() {
        let player = SoundPlayer::new("p", ramp_provider(1));
        player.set_speed(100.0);
        assert_eq!(player.speed(), 4.0);
        player.set_speed(0.0);
        assert_eq!(player.speed(), 0.25);
    }

    #[test]
    fn test_mode_change_latches_and_resets() {
        let format = AudioFormat::new(48000, 2, SampleEncoding::F32).unwrap();
        let provider = Box::new(SineProvider::new(format, 440.0, 0.5));
        let player = SoundPlayer::new("p", provider);
        player.play();

        let mut buffer = vec![0.0f32; 512 * 2];
        player.render(&mut buffer, 2, 48000);

        player.set_playback_mode(PlaybackMode::PitchPreserve);
        assert_eq!(player.playback_mode(), PlaybackMode::PitchPreserve);
        // Next block renders through the vocoder without panicking
        player.render(&mut buffer, 2, 48000);
    }
}
