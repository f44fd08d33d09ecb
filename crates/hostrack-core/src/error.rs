//! Error types for hostrack-core.

use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;

use crate::plugin::PluginId;
use crate::routing::ConnectionId;

/// Error type for hostrack-core operations.
///
/// Control-plane calls return these directly and also record the message as
/// the engine's last error. The audio thread never returns them; it skips
/// and flags instead.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    #[error("Invalid plugin id {id} (plugin count is {count})")]
    InvalidPluginId { id: PluginId, count: u32 },

    #[error("Maximum number of plugins reached ({0})")]
    SlotTableFull(u32),

    #[error("Invalid group: {0}")]
    InvalidGroup(String),

    #[error("Invalid port {port} for group {group}")]
    InvalidPort { group: String, port: u32 },

    #[error("Unknown connection id {0}")]
    UnknownConnection(ConnectionId),

    #[error("Connection table full ({0} connections)")]
    ConnectionTableFull(usize),

    #[error("Unknown plugin label: {0}")]
    UnknownPluginLabel(String),

    #[error("Plugin creation failed: {0}")]
    PluginCreation(String),

    #[error("Operation not allowed while the engine is running")]
    EngineRunning,

    #[error("Engine is not running")]
    EngineNotRunning,

    #[error("Audio buffer is already allocated")]
    BufferAlreadyAllocated,

    #[error("Engine is about to close")]
    AboutToClose,

    #[error("Transport command queue is full")]
    TransportQueueFull,

    #[error("Failed to spawn worker thread: {0}")]
    WorkerSpawn(#[source] std::io::Error),

    #[error("Worker has stopped")]
    WorkerStopped,

    #[error("Invalid config file: {0}")]
    ConfigFormat(#[from] serde_json::Error),

    #[error("Invariant violated: {0}")]
    Invariant(&'static str),
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Message of the most recent control-plane failure, shared by every
/// control handle of one engine.
#[derive(Debug, Clone, Default)]
pub(crate) struct LastError(Arc<Mutex<String>>);

impl LastError {
    pub fn record(&self, error: &Error) {
        *self.0.lock() = error.to_string();
    }

    pub fn get(&self) -> String {
        self.0.lock().clone()
    }
}

/// Failure reported by a plugin's `process` call.
///
/// Returning one of these mutes the slot for the current block and raises a
/// fault notification. The slot stays in the table.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessError {
    #[error("plugin processing failed: {0}")]
    Failed(&'static str),

    #[error("plugin is not ready")]
    NotReady,

    #[error("invalid plugin state: {0}")]
    InvalidState(&'static str),
}

/// Event buffer overflow: the event was dropped.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("event buffer full ({capacity} events), event dropped")]
pub struct EventOverflow {
    pub capacity: usize,
}
