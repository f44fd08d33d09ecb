//! Engine configuration.

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Maximum host channel count accepted on either side.
pub const MAX_HOST_CHANNELS: u16 = 64;

/// Routing topology, fixed for the engine's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ProcessMode {
    /// Linear 2-in/2-out plugin chain.
    #[default]
    Rack,
    /// Arbitrary port-to-port graph.
    Patchbay,
}

/// Size of the plugin slot table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum PluginLimit {
    /// 16 slots, the rack profile.
    #[default]
    Rack16,
    /// 99 slots.
    Standard99,
    /// 255 slots, the patchbay profile.
    Patchbay255,
}

impl PluginLimit {
    pub fn slots(self) -> u32 {
        match self {
            Self::Rack16 => 16,
            Self::Standard99 => 99,
            Self::Patchbay255 => 255,
        }
    }
}

/// Configuration for an engine instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub name: String,
    pub sample_rate: f64,
    pub buffer_size: u32,
    pub process_mode: ProcessMode,
    pub plugin_limit: PluginLimit,
    pub audio_inputs: u16,
    pub audio_outputs: u16,
    /// Connect host channels 1/2 to the rack at construction (rack mode only).
    pub auto_connect: bool,
    /// Capacity of the connection table. Fixed so the audio path never grows it.
    pub max_connections: usize,
    /// Capacity of the notification channel.
    pub notification_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            name: "hostrack".to_string(),
            sample_rate: 48000.0,
            buffer_size: 512,
            process_mode: ProcessMode::Rack,
            plugin_limit: PluginLimit::Rack16,
            audio_inputs: 2,
            audio_outputs: 2,
            auto_connect: true,
            max_connections: 256,
            notification_capacity: 1024,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::InvalidConfig("engine name is empty".to_string()));
        }
        if !self.sample_rate.is_finite() || self.sample_rate <= 0.0 {
            return Err(Error::InvalidConfig(format!(
                "sample_rate {} must be a positive number",
                self.sample_rate
            )));
        }
        if self.buffer_size == 0 {
            return Err(Error::InvalidConfig("buffer_size must be > 0".to_string()));
        }
        if self.audio_inputs > MAX_HOST_CHANNELS || self.audio_outputs > MAX_HOST_CHANNELS {
            return Err(Error::InvalidConfig(format!(
                "channel count {}x{} out of range (0-{MAX_HOST_CHANNELS})",
                self.audio_inputs, self.audio_outputs
            )));
        }
        if self.process_mode == ProcessMode::Rack && self.plugin_limit == PluginLimit::Patchbay255
        {
            return Err(Error::InvalidConfig(
                "rack mode supports at most 99 plugins".to_string(),
            ));
        }
        if self.max_connections == 0 {
            return Err(Error::InvalidConfig(
                "max_connections must be > 0".to_string(),
            ));
        }
        Ok(())
    }

    pub fn max_plugins(&self) -> u32 {
        self.plugin_limit.slots()
    }

    pub fn is_patchbay(&self) -> bool {
        self.process_mode == ProcessMode::Patchbay
    }

    /// Load a persisted profile. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
