//! Audio routing surfaces.
//!
//! The engine owns exactly one [`AudioBuffer`], either a [`RackBuffer`] or a
//! [`PatchbayBuffer`], chosen at construction. Both keep their connections in
//! a fixed-capacity [`RouteTable`] and expose the same [`RoutingBuffer`]
//! operations. Validation of new edges happens on the control side, against
//! the slot mirror, before the edge is shipped to the audio thread.

mod patchbay;
mod rack;

pub use patchbay::PatchbayBuffer;
pub use rack::{RackBuffer, RACK_CHANNELS};

use serde::{Deserialize, Serialize};

use crate::config::ProcessMode;
use crate::plugin::PluginId;
use crate::slots::{SlotInfo, SlotTable};
use crate::{Error, Result};

/// Stable connection identifier. Never reused within an engine.
pub type ConnectionId = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GroupId {
    /// Host capture channels.
    AudioIn,
    /// Host playback channels.
    AudioOut,
    /// The 2-in/2-out plugin chain (rack mode only).
    Rack,
    /// A plugin slot (patchbay mode only).
    Plugin(PluginId),
}

/// One side of a connection.
///
/// On the source side a plugin port indexes its audio outputs followed by its
/// CV outputs; on the destination side its audio inputs followed by its CV
/// inputs. `Rack` ports are the chain outputs as a source and the chain
/// inputs as a destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    pub group: GroupId,
    pub port: u32,
}

impl Endpoint {
    pub fn audio_in(channel: u32) -> Self {
        Self {
            group: GroupId::AudioIn,
            port: channel,
        }
    }

    pub fn audio_out(channel: u32) -> Self {
        Self {
            group: GroupId::AudioOut,
            port: channel,
        }
    }

    pub fn rack(port: u32) -> Self {
        Self {
            group: GroupId::Rack,
            port,
        }
    }

    pub fn plugin(id: PluginId, port: u32) -> Self {
        Self {
            group: GroupId::Plugin(id),
            port,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connection {
    pub id: ConnectionId,
    pub source: Endpoint,
    pub dest: Endpoint,
}

/// What a new edge is validated against.
pub struct Topology<'a> {
    pub host_inputs: u16,
    pub host_outputs: u16,
    pub slots: &'a SlotTable<SlotInfo>,
}

/// Fixed-capacity connection list. Never grows past its capacity, so the
/// audio thread can insert and remove without allocating.
#[derive(Debug, Clone)]
pub struct RouteTable {
    connections: Vec<Connection>,
}

impl RouteTable {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            connections: Vec::with_capacity(capacity),
        }
    }

    pub fn capacity(&self) -> usize {
        self.connections.capacity()
    }

    pub fn is_full(&self) -> bool {
        self.connections.len() >= self.connections.capacity()
    }

    pub fn insert(&mut self, connection: Connection) -> Result<()> {
        if self.is_full() {
            return Err(Error::ConnectionTableFull(self.capacity()));
        }
        self.connections.push(connection);
        Ok(())
    }

    pub fn remove(&mut self, id: ConnectionId) -> Result<Connection> {
        let index = self
            .connections
            .iter()
            .position(|c| c.id == id)
            .ok_or(Error::UnknownConnection(id))?;
        Ok(self.connections.remove(index))
    }

    pub fn find(&self, source: Endpoint, dest: Endpoint) -> Option<ConnectionId> {
        self.connections
            .iter()
            .find(|c| c.source == source && c.dest == dest)
            .map(|c| c.id)
    }

    #[inline]
    pub fn as_slice(&self) -> &[Connection] {
        &self.connections
    }

    pub fn clear(&mut self) {
        self.connections.clear();
    }

    pub(crate) fn retain(&mut self, keep: impl FnMut(&Connection) -> bool) {
        self.connections.retain(keep);
    }

    pub(crate) fn map_plugins(&mut self, mut f: impl FnMut(PluginId) -> PluginId) {
        for connection in self.connections.iter_mut() {
            for endpoint in [&mut connection.source, &mut connection.dest] {
                if let GroupId::Plugin(id) = endpoint.group {
                    endpoint.group = GroupId::Plugin(f(id));
                }
            }
        }
    }
}

/// Operations shared by both routing topologies.
pub trait RoutingBuffer {
    /// Allocate per-block scratch. Fails if already allocated.
    fn create(&mut self, buffer_size: u32) -> Result<()>;

    fn is_allocated(&self) -> bool;

    /// Reallocate scratch. Only while the audio thread is not processing.
    fn resize(&mut self, buffer_size: u32);

    /// Drop all routing state and scratch.
    fn clear(&mut self);

    /// Record an already validated edge.
    fn connect(&mut self, connection: Connection) -> Result<()>;

    fn disconnect(&mut self, id: ConnectionId) -> Result<Connection>;

    fn connections(&self) -> &[Connection];

    /// Reject edges this topology cannot carry.
    fn validate(&self, source: Endpoint, dest: Endpoint, topology: &Topology<'_>) -> Result<()>;

    fn find(&self, source: Endpoint, dest: Endpoint) -> Option<ConnectionId> {
        self.connections()
            .iter()
            .find(|c| c.source == source && c.dest == dest)
            .map(|c| c.id)
    }
}

/// The engine's routing surface, one variant for its whole lifetime.
#[derive(Debug)]
pub enum AudioBuffer {
    Rack(RackBuffer),
    Patchbay(PatchbayBuffer),
}

impl AudioBuffer {
    pub fn new(mode: ProcessMode, max_connections: usize) -> Self {
        match mode {
            ProcessMode::Rack => Self::Rack(RackBuffer::new(max_connections)),
            ProcessMode::Patchbay => Self::Patchbay(PatchbayBuffer::new(max_connections)),
        }
    }

    pub fn is_patchbay(&self) -> bool {
        matches!(self, Self::Patchbay(_))
    }

    /// Maximum number of connections.
    pub fn capacity(&self) -> usize {
        match self {
            Self::Rack(rack) => rack.routes().capacity(),
            Self::Patchbay(patchbay) => patchbay.routes().capacity(),
        }
    }

    fn inner(&self) -> &dyn RoutingBuffer {
        match self {
            Self::Rack(rack) => rack,
            Self::Patchbay(patchbay) => patchbay,
        }
    }

    fn inner_mut(&mut self) -> &mut dyn RoutingBuffer {
        match self {
            Self::Rack(rack) => rack,
            Self::Patchbay(patchbay) => patchbay,
        }
    }

    /// Keep plugin edges in step with a removal: edges touching `id` go away
    /// and higher slots shift down.
    pub(crate) fn plugin_removed(&mut self, id: PluginId) {
        if let Self::Patchbay(patchbay) = self {
            patchbay.plugin_removed(id);
        }
    }

    pub(crate) fn plugins_switched(&mut self, a: PluginId, b: PluginId) {
        if let Self::Patchbay(patchbay) = self {
            patchbay.plugins_switched(a, b);
        }
    }

    pub(crate) fn plugins_zeroed(&mut self) {
        if let Self::Patchbay(patchbay) = self {
            patchbay.plugins_zeroed();
        }
    }
}

impl RoutingBuffer for AudioBuffer {
    fn create(&mut self, buffer_size: u32) -> Result<()> {
        self.inner_mut().create(buffer_size)
    }

    fn is_allocated(&self) -> bool {
        self.inner().is_allocated()
    }

    fn resize(&mut self, buffer_size: u32) {
        self.inner_mut().resize(buffer_size)
    }

    fn clear(&mut self) {
        self.inner_mut().clear()
    }

    fn connect(&mut self, connection: Connection) -> Result<()> {
        self.inner_mut().connect(connection)
    }

    fn disconnect(&mut self, id: ConnectionId) -> Result<Connection> {
        self.inner_mut().disconnect(id)
    }

    fn connections(&self) -> &[Connection] {
        self.inner().connections()
    }

    fn validate(&self, source: Endpoint, dest: Endpoint, topology: &Topology<'_>) -> Result<()> {
        self.inner().validate(source, dest, topology)
    }
}

/// Display name of an endpoint, `"group:port"`. `plugins` are the live
/// slots in order.
pub fn endpoint_name(endpoint: Endpoint, is_source: bool, plugins: &[SlotInfo]) -> String {
    let port = endpoint.port;
    match endpoint.group {
        GroupId::AudioIn => format!("AudioIn:capture_{}", port + 1),
        GroupId::AudioOut => format!("AudioOut:playback_{}", port + 1),
        GroupId::Rack if is_source => format!("Rack:out_{}", port + 1),
        GroupId::Rack => format!("Rack:in_{}", port + 1),
        GroupId::Plugin(id) => match plugins.get(id as usize) {
            Some(info) => {
                let port_name = if is_source {
                    info.source_name(port)
                } else {
                    info.dest_name(port)
                };
                format!("{}:{}", info.name, port_name.unwrap_or("?"))
            }
            None => format!("plugin_{id}:{port}"),
        },
    }
}

/// Flat listing of the edge set: source name, target name, source name, ...
pub fn connection_names(connections: &[Connection], plugins: &[SlotInfo]) -> Vec<String> {
    let mut names = Vec::with_capacity(connections.len() * 2);
    for connection in connections {
        names.push(endpoint_name(connection.source, true, plugins));
        names.push(endpoint_name(connection.dest, false, plugins));
    }
    names
}

pub(crate) fn invalid_port(group: GroupId, port: u32) -> Error {
    Error::InvalidPort {
        group: format!("{group:?}"),
        port,
    }
}
