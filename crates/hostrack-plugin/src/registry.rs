//! Plugin registry
//!
//! Maps plugin labels to constructors so plugins can be created from a
//! [`PluginDescriptor`]. The registry is the engine's [`PluginFactory`].

use std::sync::Arc;

use dashmap::DashMap;
use hostrack_core::{Error, Plugin, PluginDescriptor, PluginFactory, PluginFormat, Result};
use tracing::debug;

use crate::bridge::BridgedPlugin;
use crate::builtin::{GainPlugin, SilencePlugin, SinePlugin, TransposePlugin};

/// Function that constructs a fresh plugin instance.
pub type PluginConstructor = Arc<dyn Fn() -> Box<dyn Plugin> + Send + Sync>;

/// Label → constructor map. Cloning is cheap; clones share the map.
#[derive(Clone, Default)]
pub struct PluginRegistry {
    constructors: Arc<DashMap<String, PluginConstructor>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with every built-in plugin.
    pub fn with_builtins() -> Self {
        let registry = Self::new();
        registry.register(GainPlugin::LABEL, || Box::new(GainPlugin::default()));
        registry.register(SinePlugin::LABEL, || Box::new(SinePlugin::default()));
        registry.register(TransposePlugin::LABEL, || {
            Box::new(TransposePlugin::default())
        });
        registry.register(SilencePlugin::LABEL, || Box::new(SilencePlugin));
        registry
    }

    /// Register `constructor` under `label`, replacing any previous entry.
    pub fn register<F>(&self, label: impl Into<String>, constructor: F)
    where
        F: Fn() -> Box<dyn Plugin> + Send + Sync + 'static,
    {
        let label = label.into();
        debug!(label = %label, "Plugin registered");
        self.constructors.insert(label, Arc::new(constructor));
    }

    pub fn unregister(&self, label: &str) -> bool {
        self.constructors.remove(label).is_some()
    }

    pub fn contains(&self, label: &str) -> bool {
        self.constructors.contains_key(label)
    }

    /// Registered labels, sorted.
    pub fn labels(&self) -> Vec<String> {
        let mut labels: Vec<String> = self
            .constructors
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        labels.sort();
        labels
    }

    /// Construct the plugin `descriptor` names. Bridged descriptors get the
    /// plugin wrapped in a [`BridgedPlugin`] on its own thread.
    pub fn instantiate(&self, descriptor: &PluginDescriptor) -> Result<Box<dyn Plugin>> {
        // clone out so the shard lock is not held while constructing
        let constructor = self
            .constructors
            .get(&descriptor.label)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| Error::UnknownPluginLabel(descriptor.label.clone()))?;
        let plugin = constructor();
        match descriptor.format {
            PluginFormat::Internal => Ok(plugin),
            PluginFormat::Bridged => Ok(Box::new(BridgedPlugin::spawn(plugin)?)),
        }
    }
}

impl PluginFactory for PluginRegistry {
    fn create(
        &self,
        descriptor: &PluginDescriptor,
        sample_rate: f64,
        buffer_size: u32,
    ) -> Result<Box<dyn Plugin>> {
        let mut plugin = self.instantiate(descriptor)?;
        plugin.set_sample_rate(sample_rate);
        plugin.set_buffer_size(buffer_size);
        Ok(plugin)
    }
}

impl std::fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginRegistry")
            .field("labels", &self.labels())
            .finish()
    }
}
