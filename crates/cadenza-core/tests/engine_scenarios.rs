//! End-to-end engine scenarios over the null backend
//!
//! Each test drives the full path a host would: open a device, attach
//! components, pump device callbacks, observe the output.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use cadenza_core::composition::{AudioSegment, Composition, CompositionPlayer};
use cadenza_core::engine::{AudioEngine, DeviceConfig, NullBackend};
use cadenza_core::format::{AudioFormat, SampleEncoding};
use cadenza_core::graph::Component;
use cadenza_core::midi::{MidiMessage, MidiRouter, MidiSource, Transpose};
use cadenza_core::player::SoundPlayer;
use cadenza_core::provider::{ConstantProvider, MemoryProvider, SineProvider};
use cadenza_core::synth::Synthesizer;
use cadenza_core::types::rms;
use parking_lot::Mutex;

const TIMEOUT: Duration = Duration::from_secs(1);

fn stereo_48k() -> AudioFormat {
    AudioFormat::new(48_000, 2, SampleEncoding::F32).unwrap()
}

fn open_engine() -> (AudioEngine, cadenza_core::engine::NullDevicePump) {
    let backend = Arc::new(NullBackend::new());
    let engine = AudioEngine::new(backend.clone());
    engine
        .open_playback(None, stereo_48k(), DeviceConfig::default(), TIMEOUT)
        .unwrap();
    let pump = backend.take_pump().unwrap();
    (engine, pump)
}

#[test]
fn silence_passthrough() {
    let (_engine, pump) = open_engine();
    let block = pump.pump_output(480);
    assert_eq!(block.len(), 960);
    assert!(block.iter().all(|&s| s == 0.0));
}

#[test]
fn sine_playback_rms() {
    let (engine, pump) = open_engine();

    let provider = Box::new(SineProvider::new(stereo_48k(), 1000.0, 1.0));
    let player = Arc::new(SoundPlayer::new("sine", provider));
    player.set_volume(0.5);
    player.set_pan(0.5);
    player.play();
    engine.add_component(player);

    // One second of callbacks
    let mut left = Vec::with_capacity(48_000);
    for _ in 0..100 {
        let block = pump.pump_output(480);
        left.extend(block.iter().step_by(2));
    }

    // 0.5 volume · cos(π/4) pan · 1/√2 sine RMS ≈ 0.25
    assert!((rms(&left) - 0.25).abs() < 1e-3, "rms {}", rms(&left));
}

#[test]
fn seek_mid_stream() {
    let (engine, pump) = open_engine();

    // A 10-second mono ramp so positions are recognizable
    let format = AudioFormat::new(48_000, 1, SampleEncoding::F32).unwrap();
    let samples: Vec<f32> = (0..48_000 * 10).map(|i| (i % 997) as f32 / 997.0).collect();
    let player = Arc::new(SoundPlayer::new(
        "pcm",
        Box::new(MemoryProvider::new(samples.clone(), format)),
    ));
    player.seek(5.0).unwrap();
    player.play();
    engine.add_component(player);

    let block = pump.pump_output(480);
    // Mono source fans to both channels; pan contributes cos(π/4)
    let expected = samples[5 * 48_000] * std::f32::consts::FRAC_1_SQRT_2;
    assert!((block[0] - expected).abs() < 1e-4, "got {} want {}", block[0], expected);
}

#[test]
fn midi_note_roundtrip() {
    let (engine, pump) = open_engine();

    let synth = Arc::new(Synthesizer::new("synth"));
    engine.add_component(synth.clone());

    synth.process_midi_message(&MidiMessage::note_on(1, 69, 100));

    // 100 ms of output is non-silent
    let mut output = Vec::new();
    for _ in 0..10 {
        output.extend(pump.pump_output(480));
    }
    assert!(rms(&output) > 0.001);
    assert_eq!(synth.active_voices(), 1);

    synth.process_midi_message(&MidiMessage::note_off(1, 69));
    // Past attack + decay + release (default envelope) plus one block
    for _ in 0..40 {
        pump.pump_output(480);
    }
    assert_eq!(synth.active_voices(), 0);
}

struct CaptureDestination {
    received: Mutex<Vec<MidiMessage>>,
}

impl cadenza_core::midi::MidiDestination for CaptureDestination {
    fn name(&self) -> &str {
        "capture"
    }

    fn receive(&self, message: &MidiMessage) -> cadenza_core::midi::MidiResult<()> {
        self.received.lock().push(*message);
        Ok(())
    }
}

#[test]
fn route_transpose() {
    let router = MidiRouter::new();
    let source = MidiSource::new("keys");
    let destination = Arc::new(CaptureDestination { received: Mutex::new(Vec::new()) });
    let route = router.connect(&source, destination.clone());
    route.add_processor(Arc::new(Transpose::new(12)));

    source.emit_message(MidiMessage::note_on(1, 60, 100));

    let received = destination.received.lock();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].note(), 72);
}

#[test]
fn composition_two_segment_render() {
    let (engine, pump) = open_engine();

    let mut composition = Composition::new(48_000, 480);
    let track = composition.add_track("dc");
    let format = AudioFormat::new(48_000, 1, SampleEncoding::F32).unwrap();
    for start in [0.0, 0.5] {
        let provider = Box::new(ConstantProvider::new(format, 0.5, 48_000 * 2));
        track.add_segment(Arc::new(
            AudioSegment::new(provider, 0.0, 1.0, start).unwrap(),
        ));
    }

    let player = Arc::new(CompositionPlayer::new(
        "timeline",
        Arc::new(Mutex::new(composition)),
    ));
    player.play();
    engine.add_component(player);

    // Render 1.5 s through the device callback
    let mut left: Vec<cadenza_core::types::Sample> = Vec::new();
    for _ in 0..150 {
        let block = pump.pump_output(480);
        left.extend(block.iter().step_by(2));
    }

    // Center pan applies 1/√2 at the segment, the track, and the component
    let pan = std::f32::consts::FRAC_1_SQRT_2;
    let base = 0.5 * pan * pan * pan;
    let at = |seconds: f64| left[(seconds * 48_000.0) as usize];
    assert!((at(0.25) - base).abs() < 1e-4, "t=0.25: {}", at(0.25));
    assert!((at(0.75) - 2.0 * base).abs() < 1e-4, "t=0.75: {}", at(0.75));
    assert!((at(1.25) - base).abs() < 1e-4, "t=1.25: {}", at(1.25));
}

#[test]
fn device_switch_preserves_graph() {
    let backend = Arc::new(NullBackend::new());
    let engine = AudioEngine::new(backend.clone());
    let id = engine
        .open_playback(None, stereo_48k(), DeviceConfig::default(), TIMEOUT)
        .unwrap();
    let _old_pump = backend.take_pump().unwrap();

    let players: Vec<Arc<SoundPlayer>> = (0..3)
        .map(|i| {
            let provider = Box::new(SineProvider::new(stereo_48k(), 440.0 * (i + 1) as f64, 0.5));
            let player = Arc::new(SoundPlayer::new(format!("p{i}"), provider));
            player.set_volume(0.1 * (i + 1) as f32);
            player.set_pan(0.25 * (i + 1) as f32);
            player.play();
            engine.add_component(player.clone());
            player
        })
        .collect();

    let new_id = engine.switch_device(id, None, TIMEOUT).unwrap();
    assert_ne!(new_id, id);

    // All three survived with volume/pan intact
    assert_eq!(engine.master().child_count(), 3);
    for (i, child) in engine.master().children().iter().enumerate() {
        let expected_volume = 0.1 * (i + 1) as f32;
        let expected_pan = 0.25 * (i + 1) as f32;
        assert_eq!(child.state().volume(), expected_volume);
        assert_eq!(child.state().pan(), expected_pan);
    }
    drop(players);

    // The new device keeps rendering the same, still-playing graph
    let pump = backend.take_pump().unwrap();
    let block = pump.pump_output(480);
    assert!(rms(&block) > 0.001);
}

#[test]
fn capture_reaches_subscribers() {
    let backend = Arc::new(NullBackend::new());
    let engine = AudioEngine::new(backend.clone());

    let frames = Arc::new(AtomicUsize::new(0));
    let f = frames.clone();
    engine.add_capture_subscriber(Arc::new(move |block, channels| {
        f.fetch_add(block.len() / channels, Ordering::Relaxed);
    }));

    engine
        .open_capture(None, stereo_48k(), DeviceConfig::default(), TIMEOUT)
        .unwrap();
    let pump = backend.take_pump().unwrap();
    pump.pump_input(&vec![0.25; 960]);
    pump.pump_input(&vec![0.25; 960]);

    assert_eq!(frames.load(Ordering::Relaxed), 960);
}
