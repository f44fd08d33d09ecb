//! Plugin host engine runtime: slot table, action rendezvous, rack and
//! patchbay routing.
//!
//! # Primary API
//!
//! - [`Engine`]: Control handle (add/remove/switch plugins, connect, snapshot)
//! - [`EngineProcessor`]: Audio-thread side, moved into the host's callback
//! - [`EngineConfig`]: Process mode, plugin limit, block size, host channels
//! - [`Plugin`] / [`PluginFactory`]: What the engine hosts and how it gets one
//! - [`Transport`]: Play/stop/locate, read back as [`TimeInfo`]
//! - [`Worker`]: Background thread for slow control-plane jobs
//!
//! # Threading
//!
//! Structural changes are requested on the control side and applied by the
//! audio thread between two blocks, one request at a time. The requester
//! blocks until the change is visible; the audio thread never blocks on it.
//!
//! # Example
//!
//! ```ignore
//! use hostrack_core::{Engine, EngineConfig};
//!
//! let engine = Engine::new(EngineConfig::default())?;
//! let mut processor = engine.activate()?;
//!
//! // audio callback
//! processor.process(&inputs, &mut outputs, nframes, false);
//!
//! // control thread
//! engine.request_switch_plugins(0, 1)?;
//! ```

pub mod error;
pub use error::{Error, EventOverflow, ProcessError, Result};

pub mod config;
pub use config::{EngineConfig, PluginLimit, ProcessMode, MAX_HOST_CHANNELS};

pub mod event;
pub use event::{
    ControlEvent, ControlEventKind, EngineEvent, EngineEventKind, EngineEvents, EventBuffer,
    MidiData, MAX_EVENTS,
};

pub mod time;
pub use time::{TimeInfo, Transport, TransportCommand};

pub mod plugin;
pub use plugin::{
    AudioIn, AudioOut, Plugin, PluginDescriptor, PluginFactory, PluginFormat, PluginId,
    PluginInfo, PortKind, ProcessContext,
};

pub mod slots;
pub use slots::{PeakSnapshot, PluginSlot, PortInfo, SlotInfo, SlotMeters, SlotTable};

pub mod routing;
pub use routing::{
    AudioBuffer, Connection, ConnectionId, Endpoint, GroupId, PatchbayBuffer, RackBuffer,
    RouteTable, RoutingBuffer, RACK_CHANNELS,
};

pub mod action;
pub use action::{ActionOutcome, NextAction, PostAction, PostActionKind, ScopedActionLock};

pub mod notify;
pub use notify::{EngineNotification, PluginFaultKind};

mod processor;
pub use processor::EngineProcessor;

mod engine;
pub use engine::{Engine, EngineSnapshot};

pub mod worker;
pub use worker::Worker;
