//! Timeline segments
//!
//! An audio segment places a window of a sound source on the timeline with
//! its own volume, pan, fades, loop, and time-stretch. `source_duration`
//! denotes the timeline duration the segment occupies — with stretch ≠ 1 the
//! source is consumed at `1/stretch` rate, so the timeline span and the
//! source span differ.

use std::sync::atomic::Ordering;
use std::sync::Weak;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use cadenza_midi::MidiMessage;

use crate::channels::ChannelMatrix;
use crate::composition::CompositionShared;
use crate::dsp::{floor_mod, LinearResampler, PhaseVocoder};
use crate::effects::ModifierChain;
use crate::error::EngineResult;
use crate::graph::{apply_volume_pan, ScratchBuffer};
use crate::player::LoopRegion;
use crate::provider::SoundDataProvider;
use crate::types::{AtomicF64, Sample};

/// Fade gain shapes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FadeCurve {
    #[default]
    Linear,
    Logarithmic,
    SCurve,
    EqualPower,
}

/// Gain for a fade progress `t` in [0, 1] (0 = silent end of the fade)
#[inline]
pub fn fade_gain(curve: FadeCurve, t: f32) -> f32 {
    let t = t.clamp(0.0, 1.0);
    match curve {
        FadeCurve::Linear => t,
        FadeCurve::Logarithmic => t * t,
        FadeCurve::SCurve => t * t * (3.0 - 2.0 * t),
        FadeCurve::EqualPower => (t * std::f32::consts::FRAC_PI_2).sin(),
    }
}

/// Per-segment playback settings
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SegmentSettings {
    pub volume: f32,
    /// Equal-power pan in [0, 1]
    pub pan: f32,
    /// Fade-in length in timeline seconds
    pub fade_in: f64,
    /// Fade-out length in timeline seconds
    pub fade_out: f64,
    pub fade_in_curve: FadeCurve,
    pub fade_out_curve: FadeCurve,
    /// Loop points in source frames; `end = -1` loops the whole source
    pub loop_region: Option<LoopRegion>,
    /// Timeline seconds per source second (2.0 = twice as long)
    pub stretch: f64,
    /// Stretch through the phase vocoder instead of the resampler
    pub pitch_preserve: bool,
}

impl Default for SegmentSettings {
    fn default() -> Self {
        Self {
            volume: 1.0,
            pan: 0.5,
            fade_in: 0.0,
            fade_out: 0.0,
            fade_in_curve: FadeCurve::Linear,
            fade_out_curve: FadeCurve::Linear,
            loop_region: None,
            stretch: 1.0,
            pitch_preserve: false,
        }
    }
}

struct SegmentSource {
    provider: Box<dyn SoundDataProvider>,
    vocoder: PhaseVocoder,
    rate: LinearResampler,
    /// Expected next window start, for streaming continuity in the
    /// pitch-preserving path
    next_t0: f64,
    read_buf: Vec<Sample>,
    voc_buf: Vec<Sample>,
}

impl SegmentSource {
    /// Wrap an unwrapped source frame position into the loop region
    fn wrap_frame(&self, frame: f64, loop_region: Option<LoopRegion>) -> f64 {
        let Some(lp) = loop_region else { return frame };
        let end = if lp.end < 0 {
            match self.provider.len_frames() {
                Some(len) => len as f64,
                None => return frame,
            }
        } else {
            lp.end as f64
        };
        let start = lp.start as f64;
        if frame < end || end <= start {
            frame
        } else {
            start + floor_mod(frame - start, end - start)
        }
    }

    /// Loop-aware contiguous stream read of `frames` source frames
    fn stream_read(
        &mut self,
        frames: usize,
        loop_region: Option<LoopRegion>,
    ) -> EngineResult<usize> {
        let channels = self.provider.format().channels;
        self.read_buf.resize(frames * channels, 0.0);
        self.read_buf.fill(0.0);

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
            if let Some(Some(end)) = loop_end {
                let start = loop_region.unwrap().start;
                if start >= end {
                    break;
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

/// An audio clip on a track's timeline
pub struct AudioSegment {
    /// Offset into the source where playback starts (source seconds)
    source_start: f64,
    /// Timeline duration occupied by the segment (seconds)
    duration: f64,
    /// Timeline position of the segment start (seconds)
    timeline_start: AtomicF64,
    settings: Mutex<SegmentSettings>,
    modifiers: ModifierChain,
    source: Mutex<SegmentSource>,
    pub(crate) shared: Mutex<Weak<CompositionShared>>,
}

impl AudioSegment {
    /// Place `provider` on the timeline
    ///
    /// `source_start ≥ 0` and `duration > 0` are required.
    pub fn new(
        provider: Box<dyn SoundDataProvider>,
        source_start: f64,
        duration: f64,
        timeline_start: f64,
    ) -> EngineResult<Self> {
        if source_start < 0.0 || !source_start.is_finite() {
            return Err(crate::error::EngineError::InvalidArgument(
                "segment source start must be ≥ 0".into(),
            ));
        }
        if duration <= 0.0 || !duration.is_finite() {
            return Err(crate::error::EngineError::InvalidArgument(
                "segment duration must be > 0".into(),
            ));
        }

        let channels = provider.format().channels;
        Ok(Self {
            source_start,
            duration,
            timeline_start: AtomicF64::new(timeline_start),
            settings: Mutex::new(SegmentSettings::default()),
            modifiers: ModifierChain::new(),
            source: Mutex::new(SegmentSource {
                provider,
                vocoder: PhaseVocoder::new(channels),
                rate: LinearResampler::new(channels, 1.0),
                next_t0: f64::NEG_INFINITY,
                read_buf: Vec::new(),
                voc_buf: Vec::new(),
            }),
            shared: Mutex::new(Weak::new()),
        })
    }

    pub fn source_start(&self) -> f64 {
        self.source_start
    }

    /// Timeline duration occupied by the segment
    pub fn duration(&self) -> f64 {
        self.duration
    }

    pub fn timeline_start(&self) -> f64 {
        self.timeline_start.load()
    }

    /// Move the segment; the owning track re-sorts on the next edit pass
    pub fn set_timeline_start(&self, seconds: f64) {
        self.timeline_start.store(seconds.max(0.0));
        self.mark_dirty();
    }

    pub fn timeline_end(&self) -> f64 {
        self.timeline_start() + self.duration
    }

    pub fn settings(&self) -> SegmentSettings {
        *self.settings.lock()
    }

    pub fn update_settings(&self, settings: SegmentSettings) {
        *self.settings.lock() = settings;
        self.mark_dirty();
    }

    pub fn modifiers(&self) -> &ModifierChain {
        &self.modifiers
    }

    fn mark_dirty(&self) {
        if let Some(shared) = self.shared.lock().upgrade() {
            shared.dirty.store(true, Ordering::Release);
        }
    }

    /// Render the segment's contribution to the window starting at `t0`
    /// (covering `out.len() / channels` frames) and accumulate into `out`
    pub fn render_window(&self, t0: f64, out: &mut [Sample], channels: usize, sample_rate: u32) {
        let out_frames = out.len() / channels;
        let sr = sample_rate as f64;
        let t1 = t0 + out_frames as f64 / sr;

        let tl_start = self.timeline_start();
        let tl_end = tl_start + self.duration;
        let o0 = t0.max(tl_start);
        let o1 = t1.min(tl_end);
        if o0 >= o1 {
            return;
        }

        let offset_frames = ((o0 - t0) * sr).round() as usize;
        let frames = (((o1 - o0) * sr).round() as usize).min(out_frames - offset_frames);
        if frames == 0 {
            return;
        }

        let settings = self.settings();
        let mut source = self.source.lock();
        let src_format = source.provider.format();
        let src_rate = src_format.sample_rate as f64;
        let src_channels = src_format.channels;
        let stretch = settings.stretch.clamp(0.25, 4.0);

        // Source position corresponding to o0 (source is consumed at
        // 1/stretch of timeline rate)
        let s0_seconds = self.source_start + (o0 - tl_start) / stretch;

        let mut seg_buf = ScratchBuffer::rent(frames * src_channels);
        let produced = if settings.pitch_preserve {
            self.render_stretched(&mut source, &settings, o0, o1, s0_seconds, &mut seg_buf, sr)
        } else {
            self.render_resampled(&mut source, &settings, s0_seconds, frames, &mut seg_buf, sr)
        };
        let produced = match produced {
            Ok(produced) => produced,
            Err(e) => {
                log::warn!("Segment render failed: {}", e);
                return;
            }
        };
        if produced == 0 {
            return;
        }

        // Segment modifier chain at the source channel count
        self.modifiers.process(&mut seg_buf[..produced * src_channels], src_channels, sample_rate);

        // Fades over the first/last seconds of the segment's timeline span
        if settings.fade_in > 0.0 || settings.fade_out > 0.0 {
            for (i, frame) in seg_buf[..produced * src_channels]
                .chunks_exact_mut(src_channels)
                .enumerate()
            {
                let u = (o0 - tl_start) + i as f64 / sr;
                let mut gain = 1.0f32;
                if settings.fade_in > 0.0 && u < settings.fade_in {
                    gain *= fade_gain(settings.fade_in_curve, (u / settings.fade_in) as f32);
                }
                let remaining = self.duration - u;
                if settings.fade_out > 0.0 && remaining < settings.fade_out {
                    gain *= fade_gain(
                        settings.fade_out_curve,
                        (remaining / settings.fade_out) as f32,
                    );
                }
                if gain != 1.0 {
                    for sample in frame.iter_mut() {
                        *sample *= gain;
                    }
                }
            }
        }

        // Channel fit, then volume/pan, then accumulate into the window
        let matrix = ChannelMatrix::new(src_channels, channels);
        let mut conv = ScratchBuffer::rent(produced * channels);
        matrix.apply(&seg_buf[..produced * src_channels], &mut conv);
        apply_volume_pan(&mut conv, channels, settings.volume, settings.pan);

        let region = &mut out[offset_frames * channels..(offset_frames + produced) * channels];
        crate::types::mix_into(region, &conv);
    }

    /// Pitch-shifting path: stateless linear interpolation over the
    /// loop-unwrapped source position, so any window renders identically
    fn render_resampled(
        &self,
        source: &mut SegmentSource,
        settings: &SegmentSettings,
        s0_seconds: f64,
        frames: usize,
        seg_buf: &mut [Sample],
        sr: f64,
    ) -> EngineResult<usize> {
        let src_format = source.provider.format();
        let src_rate = src_format.sample_rate as f64;
        let src_channels = src_format.channels;

        // Source frames per output frame
        let step = src_rate / (sr * settings.stretch.clamp(0.25, 4.0));
        let q0 = s0_seconds * src_rate;
        let span = ((frames - 1) as f64 * step).ceil() as usize + 2;

        let start = source.wrap_frame(q0.floor(), settings.loop_region);
        source.provider.seek(start as u64)?;
        let got = source.stream_read(span, settings.loop_region)?;
        if got == 0 {
            return Ok(0);
        }

        let frac0 = q0 - q0.floor();
        let mut produced = 0;
        for (i, frame) in seg_buf.chunks_exact_mut(src_channels).enumerate().take(frames) {
            let local = frac0 + i as f64 * step;
            let k = local.floor() as usize;
            if k + 1 >= got {
                break;
            }
            let t = (local - k as f64) as f32;
            let a = &source.read_buf[k * src_channels..(k + 1) * src_channels];
            let b = &source.read_buf[(k + 1) * src_channels..(k + 2) * src_channels];
            for (ch, sample) in frame.iter_mut().enumerate() {
                *sample = a[ch] + (b[ch] - a[ch]) * t;
            }
            produced += 1;
        }
        Ok(produced)
    }

    /// Pitch-preserving path: streaming phase vocoder plus rate conversion;
    /// contiguous windows keep the stretch state, discontinuities reset it
    fn render_stretched(
        &self,
        source: &mut SegmentSource,
        settings: &SegmentSettings,
        o0: f64,
        o1: f64,
        s0_seconds: f64,
        seg_buf: &mut [Sample],
        sr: f64,
    ) -> EngineResult<usize> {
        let src_format = source.provider.format();
        let src_rate = src_format.sample_rate as f64;
        let src_channels = src_format.channels;
        let frames = seg_buf.len() / src_channels;
        let stretch = settings.stretch.clamp(0.25, 4.0);

        if (o0 - source.next_t0).abs() > 0.5 / sr {
            // Discontinuity: reset the stretch pipeline and reposition
            source.vocoder.reset();
            source.rate.reset();
            let start = source.wrap_frame((s0_seconds * src_rate).floor(), settings.loop_region);
            source.provider.seek(start as u64)?;
        }
        source.next_t0 = o1;

        source.vocoder.set_stretch(stretch);
        source.rate.set_ratio(src_rate / sr);

        let rs_need = source.rate.needed_input(frames);
        let voc_need = source.vocoder.needed_input(rs_need);
        let got = source.stream_read(voc_need, settings.loop_region)?;

        let SegmentSource { vocoder, rate, read_buf, voc_buf, .. } = source;
        voc_buf.resize(rs_need * src_channels, 0.0);
        vocoder.process(&read_buf[..got * src_channels], voc_buf);
        Ok(rate.process(voc_buf, seg_buf))
    }
}

/// Scheduled MIDI events behind a tick-range query
pub trait MidiEventSource: Send + Sync {
    /// Events with segment-relative ticks in `[start_tick, end_tick)`,
    /// in non-decreasing tick order
    fn events_in_tick_range(&self, start_tick: u64, end_tick: u64) -> Vec<(u64, MidiMessage)>;
}

/// A plain sorted event list as an event source
pub struct MidiEventList {
    events: Vec<(u64, MidiMessage)>,
}

impl MidiEventList {
    pub fn new(mut events: Vec<(u64, MidiMessage)>) -> Self {
        events.sort_by_key(|(tick, _)| *tick);
        Self { events }
    }
}

impl MidiEventSource for MidiEventList {
    fn events_in_tick_range(&self, start_tick: u64, end_tick: u64) -> Vec<(u64, MidiMessage)> {
        let from = self.events.partition_point(|(t, _)| *t < start_tick);
        let to = self.events.partition_point(|(t, _)| *t < end_tick);
        self.events[from..to].to_vec()
    }
}

/// A MIDI clip on a track's timeline
pub struct MidiSegment {
    source: Box<dyn MidiEventSource>,
    timeline_start: AtomicF64,
    /// Timeline duration occupied by the segment (seconds)
    duration: f64,
    pub(crate) shared: Mutex<Weak<CompositionShared>>,
}

impl MidiSegment {
    pub fn new(source: Box<dyn MidiEventSource>, timeline_start: f64, duration: f64) -> Self {
        Self {
            source,
            timeline_start: AtomicF64::new(timeline_start),
            duration,
            shared: Mutex::new(Weak::new()),
        }
    }

    pub fn timeline_start(&self) -> f64 {
        self.timeline_start.load()
    }

    pub fn duration(&self) -> f64 {
        self.duration
    }

    pub fn timeline_end(&self) -> f64 {
        self.timeline_start() + self.duration
    }

    pub fn source(&self) -> &dyn MidiEventSource {
        self.source.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::{AudioFormat, SampleEncoding};
    use crate::provider::ConstantProvider;

    fn dc_segment(timeline_start: f64, duration: f64) -> AudioSegment {
        let format = AudioFormat::new(48000, 1, SampleEncoding::F32).unwrap();
        let provider = Box::new(ConstantProvider::new(format, 0.5, 48000 * 10));
        AudioSegment::new(provider, 0.0, duration, timeline_start).unwrap()
    }

    #[test]
    fn test_invariants() {
        let format = AudioFormat::new(48000, 1, SampleEncoding::F32).unwrap();
        let provider = Box::new(ConstantProvider::new(format, 0.5, 100));
        assert!(AudioSegment::new(provider, -1.0, 1.0, 0.0).is_err());
        let provider = Box::new(ConstantProvider::new(format, 0.5, 100));
        assert!(AudioSegment::new(provider, 0.0, 0.0, 0.0).is_err());
    }

    #[test]
    fn test_window_clipping() {
        let segment = dc_segment(0.5, 1.0);
        let sr = 48000u32;
        // Window [0, 1): segment contributes only its second half
        let mut out = vec![0.0f32; sr as usize];
        segment.render_window(0.0, &mut out, 1, sr);

        assert_eq!(out[0], 0.0);
        assert_eq!(out[23999], 0.0);
        assert!((out[24000] - 0.5).abs() < 1e-6);
        assert!((out[47999] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_outside_window_is_untouched() {
        let segment = dc_segment(10.0, 1.0);
        let mut out = vec![0.0f32; 4800];
        segment.render_window(0.0, &mut out, 1, 48000);
        assert!(out.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_fade_in_ramps() {
        let segment = dc_segment(0.0, 1.0);
        segment.update_settings(SegmentSettings {
            fade_in: 0.5,
            fade_in_curve: FadeCurve::Linear,
            ..SegmentSettings::default()
        });

        let sr = 48000u32;
        let mut out = vec![0.0f32; sr as usize];
        segment.render_window(0.0, &mut out, 1, sr);

        assert!(out[0].abs() < 1e-4);
        // Halfway through the fade: gain 0.5
        assert!((out[12000] - 0.25).abs() < 1e-3);
        // Past the fade: full level
        assert!((out[30000] - 0.5).abs() < 1e-4);
    }

    #[test]
    fn test_stretch_slows_source() {
        let format = AudioFormat::new(48000, 1, SampleEncoding::F32).unwrap();
        let samples: Vec<f32> = (0..48000).map(|i| i as f32).collect();
        let provider = Box::new(crate::provider::MemoryProvider::new(samples, format));
        let segment = AudioSegment::new(provider, 0.0, 2.0, 0.0).unwrap();
        segment.update_settings(SegmentSettings { stretch: 2.0, ..SegmentSettings::default() });

        let mut out = vec![0.0f32; 4800];
        segment.render_window(0.0, &mut out, 1, 48000);
        // At stretch 2 the ramp advances half a source frame per output frame
        assert!((out[100] - 50.0).abs() < 1.0);
    }

    #[test]
    fn test_loop_region_wraps_in_window() {
        let format = AudioFormat::new(48000, 1, SampleEncoding::F32).unwrap();
        let samples: Vec<f32> = (0..48000).map(|i| i as f32).collect();
        let provider = Box::new(crate::provider::MemoryProvider::new(samples, format));
        let segment = AudioSegment::new(provider, 0.0, 4.0, 0.0).unwrap();
        segment.update_settings(SegmentSettings {
            loop_region: Some(LoopRegion { start: 0, end: 100 }),
            ..SegmentSettings::default()
        });

        let mut out = vec![0.0f32; 250];
        segment.render_window(0.0, &mut out, 1, 48000);
        assert!((out[99] - 99.0).abs() < 1e-3);
        assert!((out[100] - 0.0).abs() < 1e-3);
        assert!((out[205] - 5.0).abs() < 1e-3);
    }

    #[test]
    fn test_midi_event_list_range() {
        let events = vec![
            (0, MidiMessage::note_on(1, 60, 100)),
            (480, MidiMessage::note_off(1, 60)),
            (960, MidiMessage::note_on(1, 64, 100)),
        ];
        let list = MidiEventList::new(events);
        let window = list.events_in_tick_range(0, 960);
        assert_eq!(window.len(), 2);
        // Half-open: tick 960 is excluded
        let window = list.events_in_tick_range(480, 961);
        assert_eq!(window.len(), 2);
    }
}
