//! # Hostrack - Plugin Host Engine
//!
//! Real-time plugin host core built from two subsystems.
//!
//! ## Architecture
//!
//! Hostrack is an umbrella crate that coordinates:
//! - **hostrack-core** - Engine core (slot table, rack and patchbay routing,
//!   event buffers, time info, action rendezvous, worker)
//! - **hostrack-plugin** - Built-in plugins, plugin registry and the
//!   bridge that runs a plugin on its own thread
//!
//! ## Quick Start
//!
//! ```ignore
//! use hostrack::prelude::*;
//!
//! let host = Host::builder()
//!     .sample_rate(48_000.0)
//!     .buffer_size(256)
//!     .build()?;
//!
//! host.add_plugin("sine")?;
//! host.add_plugin("gain")?;
//!
//! // Hand the processor to the audio callback
//! let mut processor = host.activate()?;
//! processor.process_rack([&in_l, &in_r], [&mut out_l, &mut out_r], 256, false);
//!
//! // Mutations from any other thread rendezvous with the callback
//! host.engine().request_switch_plugins(0, 1)?;
//! ```

/// Re-export of hostrack-core for direct access
pub use hostrack_core as core;

/// Re-export of hostrack-plugin for direct access
pub use hostrack_plugin as plugin;

// Engine core
pub use hostrack_core::{
    // Rendezvous
    ActionOutcome,
    // Routing
    AudioBuffer,
    Connection,
    ConnectionId,
    ControlEvent,
    ControlEventKind,
    Endpoint,
    // Engine
    Engine,
    EngineConfig,
    // Events
    EngineEvent,
    EngineEventKind,
    EngineNotification,
    EngineProcessor,
    EngineSnapshot,
    EventBuffer,
    GroupId,
    MidiData,
    // Plugin API
    Plugin,
    PluginDescriptor,
    PluginFactory,
    PluginFormat,
    PluginId,
    PluginInfo,
    PluginLimit,
    PortKind,
    PostActionKind,
    ProcessContext,
    ProcessError,
    ProcessMode,
    // Metering
    PeakSnapshot,
    SlotInfo,
    // Time
    TimeInfo,
    Transport,
    TransportCommand,
    Worker,
    MAX_EVENTS,
};

// Plugins
pub use hostrack_plugin::{
    BridgeError, BridgedPlugin, GainPlugin, PluginRegistry, SilencePlugin, SinePlugin,
    TransposePlugin,
};

mod error;
pub use error::{Error, Result};

mod builder;
mod host;

pub use builder::HostBuilder;
pub use host::Host;

/// Convenience prelude for common imports
pub mod prelude {
    // Main host
    pub use crate::{Error, Host, HostBuilder, Result};

    // Engine and configuration
    pub use crate::core::{Engine, EngineConfig, EngineProcessor, PluginLimit, ProcessMode};

    // Plugins
    pub use crate::core::{Plugin, PluginDescriptor, PluginId, PortKind, ProcessContext};
    pub use crate::plugin::PluginRegistry;

    // Routing
    pub use crate::core::{Endpoint, GroupId};

    // Events and time
    pub use crate::core::{EngineEvent, EventBuffer, TimeInfo};
}
