//! Plugins for the hostrack engine
//!
//! This crate provides the built-in plugins, the [`PluginRegistry`] the
//! engine instantiates plugins through, and the bridge protocol that hosts a
//! plugin on its own thread behind encoded messages.
//!
//! ## Usage
//!
//! ```ignore
//! use std::sync::Arc;
//! use hostrack_core::{Engine, EngineConfig, PluginDescriptor};
//! use hostrack_plugin::PluginRegistry;
//!
//! let registry = Arc::new(PluginRegistry::with_builtins());
//! let engine = Engine::with_factory(EngineConfig::default(), registry)?;
//!
//! engine.add_plugin(&PluginDescriptor::internal("gain"))?;
//! // Same plugin, isolated on a bridge thread
//! engine.add_plugin(&PluginDescriptor::bridged("sine"))?;
//! ```

pub mod error;
pub use error::{BridgeError, Result};

pub mod builtin;
pub use builtin::{GainPlugin, SilencePlugin, SinePlugin, TransposePlugin};

mod registry;
pub use registry::{PluginConstructor, PluginRegistry};

#[doc(hidden)]
pub mod protocol;
pub use protocol::{BridgeMessage, HostMessage, PluginInfoWire, ProcessBlock, WireEventVec};

mod server;
pub use server::BridgeServer;

mod bridge;
pub use bridge::BridgedPlugin;
