//! Engine control handle.
//!
//! [`Engine`] is the control-plane side: it validates requests against a
//! mirror of the slot table and routing, ships them to the audio thread
//! through the action rendezvous, and publishes a lock-free snapshot for
//! introspection. While the processor is parked (engine not running) the
//! same actions are applied directly.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use crossbeam_channel::Receiver;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::action::{ActionOutcome, NextAction, PostAction, PostActionKind, ScopedActionLock};
use crate::config::{EngineConfig, ProcessMode};
use crate::error::LastError;
use crate::notify::{EngineNotification, Notifier};
use crate::plugin::{Plugin, PluginDescriptor, PluginFactory, PluginId};
use crate::processor::EngineProcessor;
use crate::routing::{
    connection_names, AudioBuffer, Connection, ConnectionId, Endpoint, RoutingBuffer, Topology,
};
use crate::slots::{PeakSnapshot, PluginSlot, SlotInfo, SlotMeters, SlotTable};
use crate::time::{self, TimeInfo, Transport};
use crate::{Error, Result};

/// State shared by the control handle and the audio thread.
#[derive(Debug)]
pub(crate) struct EngineShared {
    pub next_action: NextAction,
    pub meters: Box<[SlotMeters]>,
    pub notifier: Notifier,
    events_dropped: AtomicU64,
    running: AtomicBool,
    about_to_close: AtomicBool,
}

impl EngineShared {
    pub fn reset_meter(&self, id: PluginId) {
        if let Some(meters) = self.meters.get(id as usize) {
            meters.reset();
        }
    }

    /// Reset every position from `from` to the end of the table.
    pub fn reset_meters(&self, from: PluginId) {
        for meters in self.meters.iter().skip(from as usize) {
            meters.reset();
        }
    }

    pub fn record_dropped_events(&self, count: u64) {
        self.events_dropped.fetch_add(count, Ordering::Relaxed);
    }
}

/// Read-only copy of the engine layout, replaced after every mutation.
#[derive(Debug, Clone, Default, Serialize)]
pub struct EngineSnapshot {
    /// Live plugins in slot order; the index is the plugin id.
    pub plugins: Vec<SlotInfo>,
    pub connections: Vec<Connection>,
    pub buffer_size: u32,
    pub sample_rate: f64,
}

/// Control-side mirror of the audio thread's layout. Only mutated by the
/// holder of the action gate, in step with the audio side.
struct Mirror {
    slots: SlotTable<SlotInfo>,
    routing: AudioBuffer,
    buffer_size: u32,
    sample_rate: f64,
}

struct EngineInner {
    name: String,
    mode: ProcessMode,
    host_inputs: u16,
    host_outputs: u16,
    shared: Arc<EngineShared>,
    mirror: Mutex<Mirror>,
    snapshot: ArcSwap<EngineSnapshot>,
    parked: Mutex<Option<EngineProcessor>>,
    transport: Transport,
    factory: Option<Arc<dyn PluginFactory>>,
    last_error: LastError,
    next_instance_id: AtomicU64,
    next_connection_id: AtomicU32,
}

/// Cloneable control handle for one engine instance.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Result<Self> {
        Self::build(config, None)
    }

    /// Create an engine that can instantiate plugins from descriptors.
    pub fn with_factory(config: EngineConfig, factory: Arc<dyn PluginFactory>) -> Result<Self> {
        Self::build(config, Some(factory))
    }

    fn build(config: EngineConfig, factory: Option<Arc<dyn PluginFactory>>) -> Result<Self> {
        config.validate()?;

        let max_plugins = config.max_plugins();
        let shared = Arc::new(EngineShared {
            next_action: NextAction::new(),
            meters: (0..max_plugins).map(|_| SlotMeters::default()).collect(),
            notifier: Notifier::new(config.notification_capacity),
            events_dropped: AtomicU64::new(0),
            running: AtomicBool::new(false),
            about_to_close: AtomicBool::new(false),
        });
        let last_error = LastError::default();
        let (transport, clock) = time::transport(last_error.clone());
        let processor = EngineProcessor::new(Arc::clone(&shared), &config, clock)?;

        let mirror = Mirror {
            slots: SlotTable::new(max_plugins),
            routing: AudioBuffer::new(config.process_mode, config.max_connections),
            buffer_size: config.buffer_size,
            sample_rate: config.sample_rate,
        };
        let snapshot = EngineSnapshot {
            buffer_size: config.buffer_size,
            sample_rate: config.sample_rate,
            ..Default::default()
        };

        let engine = Self {
            inner: Arc::new(EngineInner {
                name: config.name.clone(),
                mode: config.process_mode,
                host_inputs: config.audio_inputs,
                host_outputs: config.audio_outputs,
                shared,
                mirror: Mutex::new(mirror),
                snapshot: ArcSwap::from_pointee(snapshot),
                parked: Mutex::new(Some(processor)),
                transport,
                factory,
                last_error,
                next_instance_id: AtomicU64::new(1),
                next_connection_id: AtomicU32::new(0),
            }),
        };

        if config.process_mode == ProcessMode::Rack && config.auto_connect {
            engine.auto_connect_rack()?;
        }

        info!(
            name = %config.name,
            mode = ?config.process_mode,
            max_plugins,
            buffer_size = config.buffer_size,
            sample_rate = config.sample_rate,
            "Engine created"
        );
        Ok(engine)
    }

    /// Stereo host channels to the rack and back; a mono channel feeds or
    /// receives both rack ports.
    fn auto_connect_rack(&self) -> Result<()> {
        let ins = u32::from(self.inner.host_inputs);
        let outs = u32::from(self.inner.host_outputs);
        for port in 0..2 {
            if ins > 0 {
                self.connect(Endpoint::audio_in(port.min(ins - 1)), Endpoint::rack(port))?;
            }
            if outs > 0 {
                self.connect(Endpoint::rack(port), Endpoint::audio_out(port.min(outs - 1)))?;
            }
        }
        Ok(())
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Hand the audio processor to the host's audio callback.
    pub fn activate(&self) -> Result<EngineProcessor> {
        self.ensure_open()?;
        let processor = self
            .inner
            .parked
            .lock()
            .take()
            .ok_or(Error::EngineRunning)
            .or_else(|e| self.fail(e))?;
        self.inner.shared.running.store(true, Ordering::Release);
        self.inner
            .shared
            .notifier
            .notify(EngineNotification::EngineStarted);
        info!(name = %self.inner.name, "Engine activated");
        Ok(processor)
    }

    /// Take the processor back from the audio callback. A request that is
    /// in flight is finished first, so no requester is left waiting.
    pub fn deactivate(&self, mut processor: EngineProcessor) {
        let mut parked = self.inner.parked.lock();
        processor.drain_pending();
        debug_assert!(parked.is_none(), "two processors for one engine");
        *parked = Some(processor);
        self.inner.shared.running.store(false, Ordering::Release);
        drop(parked);
        self.inner
            .shared
            .notifier
            .notify(EngineNotification::EngineStopped);
        info!(name = %self.inner.name, "Engine deactivated");
    }

    pub fn is_running(&self) -> bool {
        self.inner.shared.running.load(Ordering::Acquire)
    }

    pub fn is_about_to_close(&self) -> bool {
        self.inner.shared.about_to_close.load(Ordering::Acquire)
    }

    /// Reallocate all block buffers. Only while deactivated.
    pub fn set_buffer_size(&self, buffer_size: u32) -> Result<()> {
        if buffer_size == 0 {
            return self.fail(Error::InvalidConfig("buffer_size must be > 0".to_string()));
        }
        let _lock = ScopedActionLock::acquire(&self.inner.shared.next_action);
        let mut parked = self.inner.parked.lock();
        let Some(processor) = parked.as_mut() else {
            return self.fail(Error::EngineRunning);
        };
        processor.set_buffer_size(buffer_size);
        let mut mirror = self.inner.mirror.lock();
        mirror.buffer_size = buffer_size;
        self.publish(&mirror);
        self.inner
            .shared
            .notifier
            .notify(EngineNotification::BufferSizeChanged(buffer_size));
        info!(buffer_size, "Buffer size changed");
        Ok(())
    }

    /// Only while deactivated.
    pub fn set_sample_rate(&self, sample_rate: f64) -> Result<()> {
        if !sample_rate.is_finite() || sample_rate <= 0.0 {
            return self.fail(Error::InvalidConfig(format!(
                "sample_rate {sample_rate} must be a positive number"
            )));
        }
        let _lock = ScopedActionLock::acquire(&self.inner.shared.next_action);
        let mut parked = self.inner.parked.lock();
        let Some(processor) = parked.as_mut() else {
            return self.fail(Error::EngineRunning);
        };
        processor.set_sample_rate(sample_rate);
        let mut mirror = self.inner.mirror.lock();
        mirror.sample_rate = sample_rate;
        self.publish(&mirror);
        self.inner
            .shared
            .notifier
            .notify(EngineNotification::SampleRateChanged(sample_rate));
        info!(sample_rate, "Sample rate changed");
        Ok(())
    }

    /// Remove every plugin and refuse further mutations.
    pub fn close(&self) -> Result<()> {
        if self.is_about_to_close() {
            return Ok(());
        }
        self.remove_all_plugins()?;
        self.inner.shared.about_to_close.store(true, Ordering::Release);
        info!(name = %self.inner.name, "Engine closed");
        Ok(())
    }

    // =========================================================================
    // Mutation API
    // =========================================================================

    /// Instantiate a plugin through the factory and add it.
    pub fn add_plugin(&self, descriptor: &PluginDescriptor) -> Result<PluginId> {
        self.ensure_open()?;
        let Some(factory) = self.inner.factory.as_ref() else {
            return self.fail(Error::PluginCreation(format!(
                "no plugin factory for '{}'",
                descriptor.label
            )));
        };
        let snapshot = self.snapshot();
        let plugin = factory
            .create(descriptor, snapshot.sample_rate, snapshot.buffer_size)
            .or_else(|e| self.fail(e))?;
        self.add_plugin_named(plugin, descriptor.name.clone())
    }

    pub fn add_plugin_instance(&self, plugin: Box<dyn Plugin>) -> Result<PluginId> {
        self.add_plugin_named(plugin, None)
    }

    /// Prepare the plugin here, then place it at the next free slot at a
    /// block boundary.
    pub fn add_plugin_named(
        &self,
        mut plugin: Box<dyn Plugin>,
        name: Option<String>,
    ) -> Result<PluginId> {
        self.ensure_open()?;
        let lock = ScopedActionLock::acquire(&self.inner.shared.next_action);
        let mut mirror = self.inner.mirror.lock();
        if mirror.slots.is_full() {
            return self.fail(Error::SlotTableFull(mirror.slots.max_plugins()));
        }

        plugin.set_sample_rate(mirror.sample_rate);
        plugin.set_buffer_size(mirror.buffer_size);
        plugin.activate();

        let instance_id = self.inner.next_instance_id.fetch_add(1, Ordering::Relaxed);
        let info = SlotInfo::from_plugin(plugin.as_ref(), instance_id, name);
        let slot = PluginSlot::new(
            plugin,
            instance_id,
            self.inner.mode == ProcessMode::Patchbay,
            mirror.buffer_size,
        );

        match self.dispatch(&lock, PostAction::AddPlugin(slot)) {
            ActionOutcome::Added { id, displaced } => {
                let name = info.name.clone();
                let placed = mirror.slots.place(info).map(|(id, _)| id);
                debug_assert_eq!(placed.ok(), Some(id), "mirror out of step");
                if let Some(stale) = displaced {
                    stale.into_plugin().deactivate();
                }
                self.publish(&mirror);
                self.inner
                    .shared
                    .notifier
                    .notify(EngineNotification::PluginAdded {
                        id,
                        name: name.clone(),
                    });
                info!(id, name = %name, "Plugin added");
                Ok(id)
            }
            other => self.unexpected(other),
        }
    }

    /// Remove the plugin at `id` and shift the following slots down. The
    /// plugin is handed back once the audio thread no longer sees it.
    pub fn request_remove_plugin(&self, id: PluginId) -> Result<Box<dyn Plugin>> {
        self.ensure_open()?;
        let lock = ScopedActionLock::acquire(&self.inner.shared.next_action);
        let mut mirror = self.inner.mirror.lock();
        let count = mirror.slots.count();
        if id >= count {
            return self.fail(Error::InvalidPluginId { id, count });
        }

        match self.dispatch(&lock, PostAction::RemovePlugin(id)) {
            ActionOutcome::Removed(slot) => {
                mirror.slots.remove_shift(id);
                mirror.routing.plugin_removed(id);
                self.publish(&mirror);
                drop(mirror);
                drop(lock);

                let mut plugin = slot.into_plugin();
                plugin.deactivate();
                self.inner
                    .shared
                    .notifier
                    .notify(EngineNotification::PluginRemoved { id });
                info!(id, "Plugin removed");
                Ok(plugin)
            }
            other => self.unexpected(other),
        }
    }

    /// Remove and drop the plugin at `id`.
    pub fn remove_plugin(&self, id: PluginId) -> Result<()> {
        self.request_remove_plugin(id).map(drop)
    }

    /// Swap the plugins at `a` and `b`. Meters stay with the positions.
    pub fn request_switch_plugins(&self, a: PluginId, b: PluginId) -> Result<()> {
        self.ensure_open()?;
        let lock = ScopedActionLock::acquire(&self.inner.shared.next_action);
        let mut mirror = self.inner.mirror.lock();
        let count = mirror.slots.count();
        for id in [a, b] {
            if id >= count {
                return self.fail(Error::InvalidPluginId { id, count });
            }
        }
        if a == b {
            return Ok(());
        }

        match self.dispatch(&lock, PostAction::SwitchPlugins(a, b)) {
            ActionOutcome::Done => {
                mirror.slots.switch(a, b);
                mirror.routing.plugins_switched(a, b);
                self.publish(&mirror);
                self.inner
                    .shared
                    .notifier
                    .notify(EngineNotification::PluginsSwitched { a, b });
                debug!(a, b, "Plugins switched");
                Ok(())
            }
            other => self.unexpected(other),
        }
    }

    /// Set the plugin count to zero in one step. The audio thread stops
    /// visiting every slot; the handles stay in place until displaced or
    /// reclaimed by [`remove_all_plugins`](Self::remove_all_plugins).
    pub fn request_zero_plugin_count(&self) -> Result<()> {
        self.ensure_open()?;
        let lock = ScopedActionLock::acquire(&self.inner.shared.next_action);
        let mut mirror = self.inner.mirror.lock();
        self.zero_locked(&lock, &mut mirror)
    }

    fn zero_locked(&self, lock: &ScopedActionLock<'_>, mirror: &mut Mirror) -> Result<()> {
        match self.dispatch(lock, PostAction::ZeroPluginCount) {
            ActionOutcome::Done => {
                mirror.slots.zero();
                mirror.routing.plugins_zeroed();
                self.publish(mirror);
                self.inner
                    .shared
                    .notifier
                    .notify(EngineNotification::AllPluginsRemoved);
                debug!("Plugin count zeroed");
                Ok(())
            }
            other => self.unexpected(other),
        }
    }

    /// Zero the plugin count and take every handle back, under one gate
    /// acquisition.
    pub fn remove_all_plugins(&self) -> Result<Vec<Box<dyn Plugin>>> {
        self.ensure_open()?;
        let lock = ScopedActionLock::acquire(&self.inner.shared.next_action);
        let mut mirror = self.inner.mirror.lock();
        self.zero_locked(&lock, &mut mirror)?;

        let reclaim = Vec::with_capacity(mirror.slots.max_plugins() as usize);
        match self.dispatch(&lock, PostAction::Reclaim(reclaim)) {
            ActionOutcome::Reclaimed(slots) => {
                drop(mirror);
                drop(lock);
                let plugins: Vec<Box<dyn Plugin>> = slots
                    .into_iter()
                    .map(|slot| {
                        let mut plugin = slot.into_plugin();
                        plugin.deactivate();
                        plugin
                    })
                    .collect();
                info!(count = plugins.len(), "All plugins removed");
                Ok(plugins)
            }
            other => self.unexpected(other),
        }
    }

    /// Route `source` into `dest`. Connecting an existing edge returns its id.
    pub fn connect(&self, source: Endpoint, dest: Endpoint) -> Result<ConnectionId> {
        self.ensure_open()?;
        let lock = ScopedActionLock::acquire(&self.inner.shared.next_action);
        let mut mirror = self.inner.mirror.lock();

        let topology = Topology {
            host_inputs: self.inner.host_inputs,
            host_outputs: self.inner.host_outputs,
            slots: &mirror.slots,
        };
        if let Err(e) = mirror.routing.validate(source, dest, &topology) {
            return self.fail(e);
        }
        if let Some(id) = mirror.routing.find(source, dest) {
            return Ok(id);
        }
        let capacity = mirror.routing.capacity();
        if mirror.routing.connections().len() >= capacity {
            return self.fail(Error::ConnectionTableFull(capacity));
        }

        let connection = Connection {
            id: self.inner.next_connection_id.fetch_add(1, Ordering::Relaxed),
            source,
            dest,
        };
        match self.dispatch(&lock, PostAction::Connect(connection)) {
            ActionOutcome::Done => {
                mirror.routing.connect(connection)?;
                self.publish(&mirror);
                self.inner
                    .shared
                    .notifier
                    .notify(EngineNotification::ConnectionAdded { id: connection.id });
                debug!(id = connection.id, ?source, ?dest, "Connected");
                Ok(connection.id)
            }
            ActionOutcome::Failed(e) => self.fail(e),
            other => self.unexpected(other),
        }
    }

    pub fn disconnect(&self, id: ConnectionId) -> Result<()> {
        self.ensure_open()?;
        let lock = ScopedActionLock::acquire(&self.inner.shared.next_action);
        let mut mirror = self.inner.mirror.lock();
        if !mirror.routing.connections().iter().any(|c| c.id == id) {
            return self.fail(Error::UnknownConnection(id));
        }

        match self.dispatch(&lock, PostAction::Disconnect(id)) {
            ActionOutcome::Done => {
                mirror.routing.disconnect(id)?;
                self.publish(&mirror);
                self.inner
                    .shared
                    .notifier
                    .notify(EngineNotification::ConnectionRemoved { id });
                debug!(id, "Disconnected");
                Ok(())
            }
            ActionOutcome::Failed(e) => self.fail(e),
            other => self.unexpected(other),
        }
    }

    // =========================================================================
    // Introspection
    // =========================================================================

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn process_mode(&self) -> ProcessMode {
        self.inner.mode
    }

    pub fn snapshot(&self) -> Arc<EngineSnapshot> {
        self.inner.snapshot.load_full()
    }

    pub fn plugin_count(&self) -> u32 {
        self.inner.snapshot.load().plugins.len() as u32
    }

    pub fn max_plugins(&self) -> u32 {
        self.inner.shared.meters.len() as u32
    }

    /// Next free slot index, or `max_plugins()` when the table is full.
    pub fn next_plugin_id(&self) -> PluginId {
        self.plugin_count().min(self.max_plugins())
    }

    pub fn slot_info(&self, id: PluginId) -> Option<SlotInfo> {
        self.inner.snapshot.load().plugins.get(id as usize).cloned()
    }

    /// Meters of the slot at `id`, as last written by the audio thread.
    pub fn peaks(&self, id: PluginId) -> Option<PeakSnapshot> {
        if id >= self.plugin_count() {
            return None;
        }
        self.inner
            .shared
            .meters
            .get(id as usize)
            .map(SlotMeters::snapshot)
    }

    pub fn connections(&self) -> Vec<Connection> {
        self.inner.snapshot.load().connections.clone()
    }

    /// Flat listing of the edge set, alternating source and target names.
    pub fn connection_names(&self) -> Vec<String> {
        let snapshot = self.inner.snapshot.load();
        connection_names(&snapshot.connections, &snapshot.plugins)
    }

    pub fn buffer_size(&self) -> u32 {
        self.inner.snapshot.load().buffer_size
    }

    pub fn sample_rate(&self) -> f64 {
        self.inner.snapshot.load().sample_rate
    }

    pub fn transport(&self) -> &Transport {
        &self.inner.transport
    }

    pub fn time_info(&self) -> TimeInfo {
        self.inner.transport.time_info()
    }

    pub fn last_error(&self) -> String {
        self.inner.last_error.get()
    }

    /// Opcode of the request currently waiting for the audio thread.
    pub fn pending_action(&self) -> PostActionKind {
        self.inner.shared.next_action.pending()
    }

    pub fn notifications(&self) -> Receiver<EngineNotification> {
        self.inner.shared.notifier.receiver()
    }

    /// Events dropped on full buffers since the engine started.
    pub fn events_dropped(&self) -> u64 {
        self.inner.shared.events_dropped.load(Ordering::Relaxed)
    }

    // =========================================================================
    // Internals
    // =========================================================================

    /// Run `action` at the next block boundary, or right away when the
    /// processor is parked.
    fn dispatch(&self, lock: &ScopedActionLock<'_>, action: PostAction) -> ActionOutcome {
        let mut parked = self.inner.parked.lock();
        if let Some(processor) = parked.as_mut() {
            return processor.apply_action(action);
        }
        lock.post(action);
        drop(parked);
        lock.wait()
    }

    fn publish(&self, mirror: &Mirror) {
        self.inner.snapshot.store(Arc::new(EngineSnapshot {
            plugins: mirror.slots.live().cloned().collect(),
            connections: mirror.routing.connections().to_vec(),
            buffer_size: mirror.buffer_size,
            sample_rate: mirror.sample_rate,
        }));
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_about_to_close() {
            return self.fail(Error::AboutToClose);
        }
        Ok(())
    }

    /// Record `error` as the last error and return it.
    fn fail<T>(&self, error: Error) -> Result<T> {
        warn!(error = %error, "Engine request rejected");
        self.inner.last_error.record(&error);
        Err(error)
    }

    fn unexpected<T>(&self, outcome: ActionOutcome) -> Result<T> {
        match outcome {
            ActionOutcome::Failed(error) => self.fail(error),
            ActionOutcome::Rejected { error, slot } => {
                if let Some(slot) = slot {
                    slot.into_plugin().deactivate();
                }
                self.fail(error)
            }
            other => {
                debug_assert!(false, "unexpected action outcome {other:?}");
                self.fail(Error::Invariant("unexpected action outcome"))
            }
        }
    }
}

impl Drop for EngineInner {
    fn drop(&mut self) {
        debug_assert!(
            self.shared.next_action.is_idle(),
            "engine dropped with a pending action"
        );
        match self.parked.get_mut().as_mut() {
            Some(processor) => processor.release(),
            None => warn!(name = %self.name, "Engine dropped while its processor is still active"),
        }
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("name", &self.inner.name)
            .field("mode", &self.inner.mode)
            .field("plugins", &self.plugin_count())
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}
