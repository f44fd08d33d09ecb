//! Plugin capability interface.
//!
//! Every plugin format (built-in, bridged, or a native format adapter)
//! implements [`Plugin`]. The audio thread only calls `process` and the
//! read-only port metadata; everything else runs on control-plane threads.

use serde::{Deserialize, Serialize};

use crate::error::ProcessError;
use crate::event::EventBuffer;
use crate::time::TimeInfo;
use crate::Result;

/// Slot index of a plugin in the engine.
pub type PluginId = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PortKind {
    AudioIn,
    AudioOut,
    CvIn,
    CvOut,
}

impl PortKind {
    pub fn is_input(self) -> bool {
        matches!(self, Self::AudioIn | Self::CvIn)
    }

    fn prefix(self) -> &'static str {
        match self {
            Self::AudioIn => "in",
            Self::AudioOut => "out",
            Self::CvIn => "cv_in",
            Self::CvOut => "cv_out",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PluginInfo {
    pub name: String,
    pub label: String,
    pub maker: String,
    pub unique_id: i64,
}

/// Plugin format of a descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum PluginFormat {
    #[default]
    Internal,
    /// Hosted behind the bridge protocol on its own thread.
    Bridged,
}

/// What to instantiate, as passed to [`PluginFactory::create`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginDescriptor {
    pub format: PluginFormat,
    pub label: String,
    /// Display name override.
    pub name: Option<String>,
}

impl PluginDescriptor {
    pub fn internal(label: impl Into<String>) -> Self {
        Self {
            format: PluginFormat::Internal,
            label: label.into(),
            name: None,
        }
    }

    pub fn bridged(label: impl Into<String>) -> Self {
        Self {
            format: PluginFormat::Bridged,
            label: label.into(),
            name: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// Creates plugin instances from descriptors. Called off the audio thread.
pub trait PluginFactory: Send + Sync {
    fn create(
        &self,
        descriptor: &PluginDescriptor,
        sample_rate: f64,
        buffer_size: u32,
    ) -> Result<Box<dyn Plugin>>;
}

/// Read-only view over input channel buffers for one block.
#[derive(Clone, Copy)]
pub struct AudioIn<'a> {
    channels: &'a [Vec<f32>],
    frames: usize,
}

impl<'a> AudioIn<'a> {
    pub fn new(channels: &'a [Vec<f32>], frames: usize) -> Self {
        Self { channels, frames }
    }

    pub fn empty() -> Self {
        Self {
            channels: &[],
            frames: 0,
        }
    }

    pub fn channels(&self) -> usize {
        self.channels.len()
    }

    #[inline]
    pub fn channel(&self, index: usize) -> &'a [f32] {
        &self.channels[index][..self.frames]
    }

    pub fn iter(&self) -> impl Iterator<Item = &'a [f32]> + '_ {
        let frames = self.frames;
        self.channels.iter().map(move |ch| &ch[..frames])
    }
}

/// Writable view over output channel buffers for one block.
pub struct AudioOut<'a> {
    channels: &'a mut [Vec<f32>],
    frames: usize,
}

impl<'a> AudioOut<'a> {
    pub fn new(channels: &'a mut [Vec<f32>], frames: usize) -> Self {
        Self { channels, frames }
    }

    pub fn empty() -> Self {
        Self {
            channels: &mut [],
            frames: 0,
        }
    }

    pub fn channels(&self) -> usize {
        self.channels.len()
    }

    #[inline]
    pub fn channel(&self, index: usize) -> &[f32] {
        &self.channels[index][..self.frames]
    }

    #[inline]
    pub fn channel_mut(&mut self, index: usize) -> &mut [f32] {
        &mut self.channels[index][..self.frames]
    }

    pub fn fill(&mut self, value: f32) {
        let frames = self.frames;
        for ch in self.channels.iter_mut() {
            ch[..frames].fill(value);
        }
    }
}

/// Everything a plugin sees during one `process` call.
///
/// In rack mode `audio_in`/`audio_out` always carry the two rack channels,
/// whatever the plugin declares; plugins use as many as they need.
pub struct ProcessContext<'a> {
    pub audio_in: AudioIn<'a>,
    pub audio_out: AudioOut<'a>,
    pub cv_in: AudioIn<'a>,
    pub cv_out: AudioOut<'a>,
    pub events_in: &'a EventBuffer,
    pub events_out: &'a mut EventBuffer,
    pub frames: usize,
    pub time: TimeInfo,
    /// Rendering faster or slower than real time.
    pub offline: bool,
}

/// A loaded plugin instance.
pub trait Plugin: Send {
    fn info(&self) -> PluginInfo;

    fn port_count(&self, kind: PortKind) -> u32;

    fn port_name(&self, kind: PortKind, index: u32) -> Option<String> {
        (index < self.port_count(kind)).then(|| format!("{}_{}", kind.prefix(), index + 1))
    }

    fn has_event_input(&self) -> bool {
        false
    }

    /// Plugins without event output let inbound events through in rack mode.
    fn has_event_output(&self) -> bool {
        false
    }

    fn activate(&mut self) {}

    fn deactivate(&mut self) {}

    fn set_buffer_size(&mut self, _frames: u32) {}

    fn set_sample_rate(&mut self, _rate: f64) {}

    /// Render one block. An error mutes the slot for this block only.
    fn process(&mut self, ctx: &mut ProcessContext<'_>) -> std::result::Result<(), ProcessError>;

    fn save_state(&self) -> Vec<u8> {
        Vec::new()
    }

    fn restore_state(&mut self, _data: &[u8]) -> std::result::Result<(), ProcessError> {
        Ok(())
    }
}
