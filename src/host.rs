//! Host: engine, plugin registry and background worker in one handle.

use hostrack_core::{Engine, EngineProcessor, PluginDescriptor, PluginId, Worker};
use hostrack_plugin::PluginRegistry;
use tracing::{info, warn};

use crate::{HostBuilder, Result};

/// Owns the engine, the registry it creates plugins from, and a worker for
/// slow jobs such as instantiating bridged plugins.
///
/// Cheap accessors hand out the subsystems; the convenience methods cover
/// the common paths.
pub struct Host {
    // dropped first: the job running is joined, queued jobs are skipped,
    // and no job outlives the engine handle
    worker: Worker,
    engine: Engine,
    registry: PluginRegistry,
}

impl Host {
    pub fn builder() -> HostBuilder {
        HostBuilder::default()
    }

    pub(crate) fn from_parts(engine: Engine, registry: PluginRegistry, worker: Worker) -> Self {
        Self {
            worker,
            engine,
            registry,
        }
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn registry(&self) -> &PluginRegistry {
        &self.registry
    }

    pub fn worker(&self) -> &Worker {
        &self.worker
    }

    /// Instantiate the registered plugin `label` in-process and add it.
    pub fn add_plugin(&self, label: &str) -> Result<PluginId> {
        Ok(self.engine.add_plugin(&PluginDescriptor::internal(label))?)
    }

    /// Instantiate `label` on its own bridge thread and add it.
    pub fn add_bridged_plugin(&self, label: &str) -> Result<PluginId> {
        Ok(self.engine.add_plugin(&PluginDescriptor::bridged(label))?)
    }

    /// Instantiate and add a plugin on the worker thread. `on_done` runs on
    /// the worker with the outcome.
    pub fn load_plugin_async<C>(&self, descriptor: PluginDescriptor, on_done: C) -> Result<()>
    where
        C: FnOnce(hostrack_core::Result<PluginId>) + Send + 'static,
    {
        let engine = self.engine.clone();
        self.worker.submit(
            "load-plugin",
            move || {
                let result = engine.add_plugin(&descriptor);
                if let Err(e) = &result {
                    warn!(label = %descriptor.label, error = %e, "Async plugin load failed");
                }
                result
            },
            on_done,
        )?;
        Ok(())
    }

    /// Hand the audio processor to the audio callback.
    pub fn activate(&self) -> Result<EngineProcessor> {
        Ok(self.engine.activate()?)
    }

    pub fn deactivate(&self, processor: EngineProcessor) {
        self.engine.deactivate(processor);
    }

    /// Remove every plugin and refuse further mutations.
    pub fn close(&self) -> Result<()> {
        self.engine.close()?;
        info!(name = %self.engine.name(), "Host closed");
        Ok(())
    }
}

impl std::fmt::Debug for Host {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Host")
            .field("name", &self.engine.name())
            .field("plugins", &self.engine.plugin_count())
            .field("worker", &self.worker)
            .finish()
    }
}
