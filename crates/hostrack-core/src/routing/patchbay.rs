//! Patchbay routing: arbitrary edges between host channels and plugin ports.
//!
//! Plugins run in ascending slot order. An input is gathered right before
//! its plugin runs, so an edge from a lower slot carries this block's signal
//! while an edge from the same or a higher slot carries the previous block's.

use super::{invalid_port, Connection, ConnectionId, Endpoint, GroupId, RouteTable, RoutingBuffer, Topology};
use crate::plugin::PluginId;
use crate::slots::PluginSlot;
use crate::{Error, Result};

#[derive(Debug)]
pub struct PatchbayBuffer {
    routes: RouteTable,
    buffer_size: u32,
    allocated: bool,
}

impl PatchbayBuffer {
    pub fn new(max_connections: usize) -> Self {
        Self {
            routes: RouteTable::with_capacity(max_connections),
            buffer_size: 0,
            allocated: false,
        }
    }

    pub fn buffer_size(&self) -> u32 {
        self.buffer_size
    }

    pub(crate) fn routes(&self) -> &RouteTable {
        &self.routes
    }

    pub(crate) fn plugin_removed(&mut self, removed: PluginId) {
        self.routes.retain(|c| {
            c.source.group != GroupId::Plugin(removed) && c.dest.group != GroupId::Plugin(removed)
        });
        self.routes
            .map_plugins(|id| if id > removed { id - 1 } else { id });
    }

    pub(crate) fn plugins_switched(&mut self, a: PluginId, b: PluginId) {
        self.routes.map_plugins(|id| {
            if id == a {
                b
            } else if id == b {
                a
            } else {
                id
            }
        });
    }

    pub(crate) fn plugins_zeroed(&mut self) {
        self.routes.retain(|c| {
            !matches!(c.source.group, GroupId::Plugin(_))
                && !matches!(c.dest.group, GroupId::Plugin(_))
        });
    }

    /// Fill the input buffers of the slot at `dest` from its incoming edges.
    pub(crate) fn gather_plugin_inputs(
        &self,
        slots: &mut [Option<PluginSlot>],
        dest: PluginId,
        host: &[&[f32]],
        frames: usize,
    ) {
        let Some(mut inputs) = slots
            .get_mut(dest as usize)
            .and_then(Option::as_mut)
            .map(|slot| std::mem::take(&mut slot.inputs))
        else {
            return;
        };
        for buf in inputs.iter_mut() {
            buf[..frames].fill(0.0);
        }
        for connection in self.routes.as_slice() {
            if connection.dest.group != GroupId::Plugin(dest) {
                continue;
            }
            let Some(dst) = inputs.get_mut(connection.dest.port as usize) else {
                continue;
            };
            if let Some(src) = source_signal(connection.source, slots, host) {
                mix_into(&mut dst[..frames], src);
            }
        }
        if let Some(slot) = slots.get_mut(dest as usize).and_then(Option::as_mut) {
            slot.inputs = inputs;
        }
    }

    /// Sum every edge that ends at a host channel. Unconnected channels get
    /// silence.
    pub(crate) fn scatter_host_outputs(
        &self,
        slots: &[Option<PluginSlot>],
        host_in: &[&[f32]],
        host_out: &mut [&mut [f32]],
        frames: usize,
    ) {
        for ch in host_out.iter_mut() {
            let n = frames.min(ch.len());
            ch[..n].fill(0.0);
        }
        for connection in self.routes.as_slice() {
            if connection.dest.group != GroupId::AudioOut {
                continue;
            }
            let Some(dst) = host_out.get_mut(connection.dest.port as usize) else {
                continue;
            };
            if let Some(src) = source_signal(connection.source, slots, host_in) {
                let n = frames.min(dst.len());
                mix_into(&mut dst[..n], src);
            }
        }
    }
}

fn source_signal<'a>(
    source: Endpoint,
    slots: &'a [Option<PluginSlot>],
    host: &'a [&'a [f32]],
) -> Option<&'a [f32]> {
    match source.group {
        GroupId::AudioIn => host.get(source.port as usize).copied(),
        GroupId::Plugin(id) => slots
            .get(id as usize)?
            .as_ref()?
            .outputs
            .get(source.port as usize)
            .map(Vec::as_slice),
        GroupId::AudioOut | GroupId::Rack => None,
    }
}

#[inline]
fn mix_into(dst: &mut [f32], src: &[f32]) {
    for (d, s) in dst.iter_mut().zip(src) {
        *d += *s;
    }
}

impl RoutingBuffer for PatchbayBuffer {
    fn create(&mut self, buffer_size: u32) -> Result<()> {
        debug_assert!(!self.allocated, "patchbay buffer already allocated");
        if self.allocated {
            return Err(Error::BufferAlreadyAllocated);
        }
        self.buffer_size = buffer_size;
        self.allocated = true;
        Ok(())
    }

    fn is_allocated(&self) -> bool {
        self.allocated
    }

    /// Port buffers live in the slots; the processor resizes those.
    fn resize(&mut self, buffer_size: u32) {
        self.buffer_size = buffer_size;
    }

    fn clear(&mut self) {
        self.routes.clear();
        self.buffer_size = 0;
        self.allocated = false;
    }

    fn connect(&mut self, connection: Connection) -> Result<()> {
        if self.routes.find(connection.source, connection.dest).is_some() {
            return Ok(());
        }
        self.routes.insert(connection)
    }

    fn disconnect(&mut self, id: ConnectionId) -> Result<Connection> {
        self.routes.remove(id)
    }

    fn connections(&self) -> &[Connection] {
        self.routes.as_slice()
    }

    fn validate(&self, source: Endpoint, dest: Endpoint, topology: &Topology<'_>) -> Result<()> {
        match source.group {
            GroupId::AudioIn => {
                if source.port >= u32::from(topology.host_inputs) {
                    return Err(invalid_port(source.group, source.port));
                }
            }
            GroupId::Plugin(id) => {
                let info = topology.slots.get(id).ok_or(Error::InvalidPluginId {
                    id,
                    count: topology.slots.count(),
                })?;
                if source.port >= info.source_count() {
                    return Err(invalid_port(source.group, source.port));
                }
            }
            group => {
                return Err(Error::InvalidGroup(format!(
                    "{group:?} is not a patchbay source"
                )))
            }
        }
        match dest.group {
            GroupId::AudioOut => {
                if dest.port >= u32::from(topology.host_outputs) {
                    return Err(invalid_port(dest.group, dest.port));
                }
            }
            GroupId::Plugin(id) => {
                let info = topology.slots.get(id).ok_or(Error::InvalidPluginId {
                    id,
                    count: topology.slots.count(),
                })?;
                if dest.port >= info.dest_count() {
                    return Err(invalid_port(dest.group, dest.port));
                }
            }
            group => {
                return Err(Error::InvalidGroup(format!(
                    "{group:?} is not a patchbay destination"
                )))
            }
        }
        Ok(())
    }
}
