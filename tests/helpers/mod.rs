//! Test helpers and fixtures for hostrack integration tests
//!
//! The engine never talks to an audio device here: tests hold the
//! [`EngineProcessor`] themselves and drive blocks by hand, which makes the
//! block boundary (and so every rendezvous) deterministic.
//!
//! ## Tolerance Levels
//!
//! Use the appropriate tolerance from [`tolerances`] module:
//! - `FLOAT_EPSILON` (1e-6): Exact operations (passthrough, unity gain)
//! - `DSP_EPSILON` (1e-4): DSP processing (oscillators)
//! - `SILENCE_THRESHOLD` (0.0001): Silence detection (-80dB)

#![allow(dead_code)]

pub mod tolerances;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use hostrack::core::ProcessError;
use hostrack::prelude::*;
use hostrack::PluginInfo;

/// Default test sample rate
pub const TEST_SAMPLE_RATE: f64 = 48000.0;

/// Small block so tests stay fast
pub const TEST_BUFFER_SIZE: u32 = 64;

/// Route engine logs to the test output. Safe to call from every test.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

/// Rack engine with the built-in plugins and host channels 1/2 auto-connected.
pub fn rack_engine() -> Engine {
    engine_with(EngineConfig {
        buffer_size: TEST_BUFFER_SIZE,
        sample_rate: TEST_SAMPLE_RATE,
        ..Default::default()
    })
}

/// Rack engine with an empty routing table.
pub fn rack_engine_unconnected() -> Engine {
    engine_with(EngineConfig {
        buffer_size: TEST_BUFFER_SIZE,
        sample_rate: TEST_SAMPLE_RATE,
        auto_connect: false,
        ..Default::default()
    })
}

pub fn patchbay_engine() -> Engine {
    engine_with(EngineConfig {
        buffer_size: TEST_BUFFER_SIZE,
        sample_rate: TEST_SAMPLE_RATE,
        process_mode: ProcessMode::Patchbay,
        plugin_limit: PluginLimit::Patchbay255,
        ..Default::default()
    })
}

pub fn engine_with(config: EngineConfig) -> Engine {
    Engine::with_factory(config, Arc::new(PluginRegistry::with_builtins()))
        .expect("Failed to create test engine")
}

/// Host-side stereo buffers for driving one processor.
pub struct StereoIo {
    pub in_l: Vec<f32>,
    pub in_r: Vec<f32>,
    pub out_l: Vec<f32>,
    pub out_r: Vec<f32>,
}

impl StereoIo {
    pub fn silent(frames: usize) -> Self {
        Self::dc(0.0, frames)
    }

    pub fn dc(value: f32, frames: usize) -> Self {
        Self {
            in_l: vec![value; frames],
            in_r: vec![value; frames],
            out_l: vec![0.0; frames],
            out_r: vec![0.0; frames],
        }
    }

    /// One block through `process_rack`.
    pub fn run(&mut self, processor: &mut EngineProcessor, nframes: u32) {
        processor.process_rack(
            [self.in_l.as_slice(), self.in_r.as_slice()],
            [self.out_l.as_mut_slice(), self.out_r.as_mut_slice()],
            nframes,
            false,
        );
    }

    /// One block through the N-channel entry point.
    pub fn run_full(&mut self, processor: &mut EngineProcessor, nframes: u32) {
        let inputs = [self.in_l.as_slice(), self.in_r.as_slice()];
        let mut outputs = [self.out_l.as_mut_slice(), self.out_r.as_mut_slice()];
        processor.process(&inputs, &mut outputs, nframes, false);
    }
}

/// Process blocks until `done` holds or two seconds pass. Returns whether
/// `done` held.
pub fn run_until(
    processor: &mut EngineProcessor,
    io: &mut StereoIo,
    mut done: impl FnMut() -> bool,
) -> bool {
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        io.run(processor, TEST_BUFFER_SIZE);
        if done() {
            return true;
        }
        thread::sleep(Duration::from_micros(200));
    }
    false
}

/// Poll `done` without processing until it holds or two seconds pass.
pub fn wait_for(mut done: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        if done() {
            return true;
        }
        thread::sleep(Duration::from_micros(200));
    }
    false
}

/// Stereo effect that counts its `process` calls and passes audio through.
pub struct CountingPlugin {
    calls: Arc<AtomicUsize>,
}

impl CountingPlugin {
    pub fn new() -> (Self, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        (
            Self {
                calls: Arc::clone(&calls),
            },
            calls,
        )
    }
}

impl Plugin for CountingPlugin {
    fn info(&self) -> PluginInfo {
        PluginInfo {
            name: "Counting".to_string(),
            label: "counting".to_string(),
            ..Default::default()
        }
    }

    fn port_count(&self, kind: PortKind) -> u32 {
        match kind {
            PortKind::AudioIn | PortKind::AudioOut => 2,
            PortKind::CvIn | PortKind::CvOut => 0,
        }
    }

    fn process(&mut self, ctx: &mut ProcessContext<'_>) -> std::result::Result<(), ProcessError> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        for ch in 0..ctx.audio_in.channels().min(ctx.audio_out.channels()) {
            let input = ctx.audio_in.channel(ch);
            ctx.audio_out.channel_mut(ch).copy_from_slice(input);
        }
        Ok(())
    }
}

/// Stereo effect that fails every block after writing garbage.
pub struct FaultyPlugin;

impl Plugin for FaultyPlugin {
    fn info(&self) -> PluginInfo {
        PluginInfo {
            name: "Faulty".to_string(),
            label: "faulty".to_string(),
            ..Default::default()
        }
    }

    fn port_count(&self, kind: PortKind) -> u32 {
        match kind {
            PortKind::AudioIn | PortKind::AudioOut => 2,
            PortKind::CvIn | PortKind::CvOut => 0,
        }
    }

    fn process(&mut self, ctx: &mut ProcessContext<'_>) -> std::result::Result<(), ProcessError> {
        ctx.audio_out.fill(0.9);
        Err(ProcessError::Failed("always"))
    }
}

/// Stereo effect that reports success while writing NaN.
pub struct NonFinitePlugin;

impl Plugin for NonFinitePlugin {
    fn info(&self) -> PluginInfo {
        PluginInfo {
            name: "NonFinite".to_string(),
            label: "non_finite".to_string(),
            ..Default::default()
        }
    }

    fn port_count(&self, kind: PortKind) -> u32 {
        match kind {
            PortKind::AudioIn | PortKind::AudioOut => 2,
            PortKind::CvIn | PortKind::CvOut => 0,
        }
    }

    fn process(&mut self, ctx: &mut ProcessContext<'_>) -> std::result::Result<(), ProcessError> {
        ctx.audio_out.fill(f32::NAN);
        Ok(())
    }
}

/// Generate a sine wave at `frequency` for `num_samples`.
pub fn generate_sine(frequency: f64, sample_rate: f64, num_samples: usize) -> Vec<f32> {
    (0..num_samples)
        .map(|i| {
            let t = i as f64 / sample_rate;
            (2.0 * std::f64::consts::PI * frequency * t).sin() as f32
        })
        .collect()
}

/// Calculate peak amplitude of a signal.
pub fn peak(samples: &[f32]) -> f32 {
    samples
        .iter()
        .map(|s| s.abs())
        .fold(0.0_f32, |a, b| a.max(b))
}

/// Calculate RMS of a signal.
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_sq: f32 = samples.iter().map(|s| s * s).sum();
    (sum_sq / samples.len() as f32).sqrt()
}

/// Check if two signals are approximately equal within tolerance.
pub fn signals_approx_equal(a: &[f32], b: &[f32], tolerance: f32) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b.iter()).all(|(x, y)| (x - y).abs() <= tolerance)
}

/// Assert that a signal is approximately silent (all values near zero).
pub fn assert_silence(samples: &[f32], tolerance: f32) {
    let max = peak(samples);
    assert!(
        max <= tolerance,
        "Expected silence, but peak amplitude was {}",
        max
    );
}

/// Assert that a signal has content (not silent).
pub fn assert_has_audio(samples: &[f32], min_rms: f32) {
    let r = rms(samples);
    assert!(
        r >= min_rms,
        "Expected audio content with RMS >= {}, but RMS was {}",
        min_rms,
        r
    );
}
