//! Built-in plugins.
//!
//! Small processors that need no external library: useful as rack fillers,
//! test signals and event processors. Each saves its parameters as bincode.

use std::f64::consts::TAU;

use hostrack_core::{
    ControlEventKind, EngineEvent, EngineEventKind, Plugin, PluginInfo, PortKind, ProcessContext,
    ProcessError,
};
use serde::{Deserialize, Serialize};

const MAKER: &str = "hostrack";

fn stereo(kind: PortKind, ins: u32, outs: u32) -> u32 {
    match kind {
        PortKind::AudioIn => ins,
        PortKind::AudioOut => outs,
        PortKind::CvIn | PortKind::CvOut => 0,
    }
}

fn save<T: Serialize>(state: &T) -> Vec<u8> {
    bincode::serialize(state).unwrap_or_default()
}

fn restore<T: for<'de> Deserialize<'de>>(data: &[u8]) -> Result<T, ProcessError> {
    bincode::deserialize(data).map_err(|_| ProcessError::InvalidState("malformed plugin state"))
}

// =============================================================================
// Gain
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
struct GainState {
    gain: f32,
}

/// Stereo gain. Parameter 0 is the linear gain, applied from the frame of
/// the event that sets it.
#[derive(Debug)]
pub struct GainPlugin {
    state: GainState,
}

impl GainPlugin {
    pub const LABEL: &'static str = "gain";
    pub const PARAM_GAIN: u16 = 0;

    pub fn new(gain: f32) -> Self {
        Self {
            state: GainState { gain },
        }
    }

    pub fn gain(&self) -> f32 {
        self.state.gain
    }

    pub fn set_gain(&mut self, gain: f32) {
        self.state.gain = gain;
    }
}

impl Default for GainPlugin {
    fn default() -> Self {
        Self::new(1.0)
    }
}

impl Plugin for GainPlugin {
    fn info(&self) -> PluginInfo {
        PluginInfo {
            name: "Gain".to_string(),
            label: Self::LABEL.to_string(),
            maker: MAKER.to_string(),
            unique_id: 0x6761_696e,
        }
    }

    fn port_count(&self, kind: PortKind) -> u32 {
        stereo(kind, 2, 2)
    }

    fn has_event_input(&self) -> bool {
        true
    }

    fn process(&mut self, ctx: &mut ProcessContext<'_>) -> Result<(), ProcessError> {
        let channels = ctx.audio_in.channels().min(ctx.audio_out.channels());
        let mut start = 0;
        for event in ctx.events_in {
            let EngineEventKind::Control(control) = event.kind else {
                continue;
            };
            if control.kind != ControlEventKind::Parameter || control.param != Self::PARAM_GAIN {
                continue;
            }
            let at = (event.time as usize).clamp(start, ctx.frames);
            apply_gain(ctx, channels, start..at, self.state.gain);
            self.state.gain = control.value;
            start = at;
        }
        apply_gain(ctx, channels, start..ctx.frames, self.state.gain);
        Ok(())
    }

    fn save_state(&self) -> Vec<u8> {
        save(&self.state)
    }

    fn restore_state(&mut self, data: &[u8]) -> Result<(), ProcessError> {
        self.state = restore(data)?;
        Ok(())
    }
}

fn apply_gain(ctx: &mut ProcessContext<'_>, channels: usize, range: std::ops::Range<usize>, gain: f32) {
    for ch in 0..channels {
        let input = ctx.audio_in.channel(ch);
        let output = ctx.audio_out.channel_mut(ch);
        for (o, i) in output[range.clone()].iter_mut().zip(&input[range.clone()]) {
            *o = *i * gain;
        }
    }
}

// =============================================================================
// Sine
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
struct SineState {
    frequency: f64,
    amplitude: f32,
}

/// Sine generator: no inputs, the same signal on both outputs.
#[derive(Debug)]
pub struct SinePlugin {
    state: SineState,
    sample_rate: f64,
    phase: f64,
}

impl SinePlugin {
    pub const LABEL: &'static str = "sine";
    pub const PARAM_FREQUENCY: u16 = 0;
    pub const PARAM_AMPLITUDE: u16 = 1;

    pub fn new(frequency: f64, amplitude: f32) -> Self {
        Self {
            state: SineState {
                frequency,
                amplitude,
            },
            sample_rate: 48_000.0,
            phase: 0.0,
        }
    }

    pub fn frequency(&self) -> f64 {
        self.state.frequency
    }

    pub fn amplitude(&self) -> f32 {
        self.state.amplitude
    }

    pub fn set_frequency(&mut self, frequency: f64) {
        self.state.frequency = frequency;
    }

    pub fn set_amplitude(&mut self, amplitude: f32) {
        self.state.amplitude = amplitude;
    }
}

impl Default for SinePlugin {
    fn default() -> Self {
        Self::new(440.0, 0.5)
    }
}

impl Plugin for SinePlugin {
    fn info(&self) -> PluginInfo {
        PluginInfo {
            name: "Sine".to_string(),
            label: Self::LABEL.to_string(),
            maker: MAKER.to_string(),
            unique_id: 0x7369_6e65,
        }
    }

    fn port_count(&self, kind: PortKind) -> u32 {
        stereo(kind, 0, 2)
    }

    fn has_event_input(&self) -> bool {
        true
    }

    fn activate(&mut self) {
        self.phase = 0.0;
    }

    fn set_sample_rate(&mut self, rate: f64) {
        self.sample_rate = rate;
    }

    fn process(&mut self, ctx: &mut ProcessContext<'_>) -> Result<(), ProcessError> {
        for event in ctx.events_in {
            if let EngineEventKind::Control(control) = event.kind {
                match (control.kind, control.param) {
                    (ControlEventKind::Parameter, Self::PARAM_FREQUENCY) => {
                        self.state.frequency = f64::from(control.value);
                    }
                    (ControlEventKind::Parameter, Self::PARAM_AMPLITUDE) => {
                        self.state.amplitude = control.value;
                    }
                    _ => {}
                }
            }
        }

        if ctx.audio_out.channels() == 0 {
            return Ok(());
        }
        let step = self.state.frequency / self.sample_rate;
        let amplitude = self.state.amplitude;
        let mut phase = self.phase;
        for sample in ctx.audio_out.channel_mut(0).iter_mut() {
            *sample = (phase * TAU).sin() as f32 * amplitude;
            phase = (phase + step).fract();
        }
        self.phase = phase;
        for ch in 1..ctx.audio_out.channels() {
            for i in 0..ctx.frames {
                let value = ctx.audio_out.channel(0)[i];
                ctx.audio_out.channel_mut(ch)[i] = value;
            }
        }
        Ok(())
    }

    fn save_state(&self) -> Vec<u8> {
        save(&self.state)
    }

    fn restore_state(&mut self, data: &[u8]) -> Result<(), ProcessError> {
        self.state = restore(data)?;
        Ok(())
    }
}

// =============================================================================
// Transpose
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
struct TransposeState {
    semitones: i8,
}

/// Shifts note numbers by a fixed offset and passes audio through. Notes
/// that would leave the MIDI range are dropped; other events pass unchanged.
#[derive(Debug)]
pub struct TransposePlugin {
    state: TransposeState,
}

impl TransposePlugin {
    pub const LABEL: &'static str = "transpose";

    pub fn new(semitones: i8) -> Self {
        Self {
            state: TransposeState { semitones },
        }
    }

    pub fn semitones(&self) -> i8 {
        self.state.semitones
    }

    pub fn set_semitones(&mut self, semitones: i8) {
        self.state.semitones = semitones;
    }

    fn transpose(&self, mut event: EngineEvent) -> Option<EngineEvent> {
        let EngineEventKind::Midi(ref mut midi) = event.kind else {
            return Some(event);
        };
        // note off, note on, polyphonic aftertouch
        if !matches!(midi.status(), 0x80 | 0x90 | 0xA0) || midi.size < 2 {
            return Some(event);
        }
        let note = i16::from(midi.data[1]) + i16::from(self.state.semitones);
        midi.data[1] = u8::try_from(note).ok().filter(|n| *n <= 127)?;
        Some(event)
    }
}

impl Default for TransposePlugin {
    fn default() -> Self {
        Self::new(0)
    }
}

impl Plugin for TransposePlugin {
    fn info(&self) -> PluginInfo {
        PluginInfo {
            name: "Transpose".to_string(),
            label: Self::LABEL.to_string(),
            maker: MAKER.to_string(),
            unique_id: 0x7472_6e73,
        }
    }

    fn port_count(&self, kind: PortKind) -> u32 {
        stereo(kind, 2, 2)
    }

    fn has_event_input(&self) -> bool {
        true
    }

    fn has_event_output(&self) -> bool {
        true
    }

    fn process(&mut self, ctx: &mut ProcessContext<'_>) -> Result<(), ProcessError> {
        for ch in 0..ctx.audio_in.channels().min(ctx.audio_out.channels()) {
            let input = ctx.audio_in.channel(ch);
            ctx.audio_out.channel_mut(ch).copy_from_slice(input);
        }
        for event in ctx.events_in {
            if let Some(shifted) = self.transpose(*event) {
                // a full buffer counts the drop itself
                let _ = ctx.events_out.push(shifted);
            }
        }
        Ok(())
    }

    fn save_state(&self) -> Vec<u8> {
        save(&self.state)
    }

    fn restore_state(&mut self, data: &[u8]) -> Result<(), ProcessError> {
        self.state = restore(data)?;
        Ok(())
    }
}

// =============================================================================
// Silence
// =============================================================================

/// Stereo plugin that outputs silence.
#[derive(Debug, Default)]
pub struct SilencePlugin;

impl SilencePlugin {
    pub const LABEL: &'static str = "silence";
}

impl Plugin for SilencePlugin {
    fn info(&self) -> PluginInfo {
        PluginInfo {
            name: "Silence".to_string(),
            label: Self::LABEL.to_string(),
            maker: MAKER.to_string(),
            unique_id: 0x736c_6e74,
        }
    }

    fn port_count(&self, kind: PortKind) -> u32 {
        stereo(kind, 2, 2)
    }

    fn process(&mut self, ctx: &mut ProcessContext<'_>) -> Result<(), ProcessError> {
        ctx.audio_out.fill(0.0);
        Ok(())
    }
}
