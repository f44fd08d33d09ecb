//! Builder for configuring and constructing a `Host`.

use std::sync::Arc;

use hostrack_core::{Engine, EngineConfig, PluginLimit, ProcessMode, Worker};
use hostrack_plugin::PluginRegistry;
use tracing::info;

use crate::{Host, Result};

/// Every setter maps onto one [`EngineConfig`] field; `build` validates the
/// result.
///
/// # Example
///
/// ```ignore
/// use hostrack::prelude::*;
///
/// let host = Host::builder()
///     .patchbay()
///     .plugin_limit(PluginLimit::Patchbay255)
///     .buffer_size(256)
///     .build()?;
///
/// let sine = host.add_plugin("sine")?;
/// ```
#[derive(Debug, Default)]
pub struct HostBuilder {
    config: EngineConfig,
    registry: Option<PluginRegistry>,
}

impl HostBuilder {
    /// Start from a complete configuration, e.g. one loaded with
    /// [`EngineConfig::from_json`].
    pub fn from_config(config: EngineConfig) -> Self {
        Self {
            config,
            registry: None,
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.config.name = name.into();
        self
    }

    /// Default: 48000
    pub fn sample_rate(mut self, sample_rate: f64) -> Self {
        self.config.sample_rate = sample_rate;
        self
    }

    /// Default: 512
    pub fn buffer_size(mut self, buffer_size: u32) -> Self {
        self.config.buffer_size = buffer_size;
        self
    }

    /// Linear stereo plugin chain (the default).
    pub fn rack(mut self) -> Self {
        self.config.process_mode = ProcessMode::Rack;
        self
    }

    /// Free port-to-port routing.
    pub fn patchbay(mut self) -> Self {
        self.config.process_mode = ProcessMode::Patchbay;
        self
    }

    /// Default: [`PluginLimit::Rack16`]
    pub fn plugin_limit(mut self, limit: PluginLimit) -> Self {
        self.config.plugin_limit = limit;
        self
    }

    /// Default: 2
    pub fn inputs(mut self, count: u16) -> Self {
        self.config.audio_inputs = count;
        self
    }

    /// Default: 2
    pub fn outputs(mut self, count: u16) -> Self {
        self.config.audio_outputs = count;
        self
    }

    /// Rack mode only. Default: true
    pub fn auto_connect(mut self, enabled: bool) -> Self {
        self.config.auto_connect = enabled;
        self
    }

    /// Use `registry` instead of one with the built-in plugins.
    pub fn registry(mut self, registry: PluginRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn build(self) -> Result<Host> {
        let registry = self.registry.unwrap_or_else(PluginRegistry::with_builtins);
        let engine = Engine::with_factory(self.config.clone(), Arc::new(registry.clone()))?;
        let worker = Worker::spawn(format!("{}-worker", self.config.name))?;
        info!(
            name = %self.config.name,
            mode = ?self.config.process_mode,
            plugins = ?registry.labels(),
            "Host built"
        );
        Ok(Host::from_parts(engine, registry, worker))
    }
}
