//! Rack routing: host channels into a stereo plugin chain and back out.

use super::{invalid_port, Connection, ConnectionId, Endpoint, GroupId, RouteTable, RoutingBuffer, Topology};
use crate::{Error, Result};

/// Channels of the rack chain.
pub const RACK_CHANNELS: usize = 2;

/// Rack-mode buffer: the chain's input and output accumulators plus the
/// host-channel mapping used by `process_rack_full`.
#[derive(Debug)]
pub struct RackBuffer {
    routes: RouteTable,
    pub(crate) in_buf: Vec<Vec<f32>>,
    pub(crate) out_buf: Vec<Vec<f32>>,
    buffer_size: u32,
}

impl RackBuffer {
    pub fn new(max_connections: usize) -> Self {
        Self {
            routes: RouteTable::with_capacity(max_connections),
            in_buf: Vec::new(),
            out_buf: Vec::new(),
            buffer_size: 0,
        }
    }

    pub fn buffer_size(&self) -> u32 {
        self.buffer_size
    }

    pub(crate) fn routes(&self) -> &RouteTable {
        &self.routes
    }

    /// Sum mapped host channels into the chain inputs. Unconnected rack
    /// inputs stay silent.
    pub(crate) fn gather_host_inputs(&mut self, host: &[&[f32]], frames: usize) {
        for buf in self.in_buf.iter_mut() {
            buf[..frames].fill(0.0);
        }
        for connection in self.routes.as_slice() {
            if let (GroupId::AudioIn, GroupId::Rack) = (connection.source.group, connection.dest.group) {
                let (Some(src), Some(dst)) = (
                    host.get(connection.source.port as usize),
                    self.in_buf.get_mut(connection.dest.port as usize),
                ) else {
                    continue;
                };
                for (d, s) in dst[..frames].iter_mut().zip(src.iter()) {
                    *d += *s;
                }
            }
        }
    }

    /// Sum the chain outputs into their mapped host channels. Every host
    /// channel is written, unconnected ones with silence.
    pub(crate) fn scatter_host_outputs(&self, host: &mut [&mut [f32]], frames: usize) {
        for ch in host.iter_mut() {
            let n = frames.min(ch.len());
            ch[..n].fill(0.0);
        }
        for connection in self.routes.as_slice() {
            if let (GroupId::Rack, GroupId::AudioOut) = (connection.source.group, connection.dest.group) {
                let (Some(src), Some(dst)) = (
                    self.out_buf.get(connection.source.port as usize),
                    host.get_mut(connection.dest.port as usize),
                ) else {
                    continue;
                };
                for (d, s) in dst.iter_mut().zip(src[..frames].iter()) {
                    *d += *s;
                }
            }
        }
    }
}

impl RoutingBuffer for RackBuffer {
    fn create(&mut self, buffer_size: u32) -> Result<()> {
        debug_assert!(!self.is_allocated(), "rack buffer already allocated");
        if self.is_allocated() {
            return Err(Error::BufferAlreadyAllocated);
        }
        self.in_buf = vec![vec![0.0; buffer_size as usize]; RACK_CHANNELS];
        self.out_buf = vec![vec![0.0; buffer_size as usize]; RACK_CHANNELS];
        self.buffer_size = buffer_size;
        Ok(())
    }

    fn is_allocated(&self) -> bool {
        !self.in_buf.is_empty()
    }

    fn resize(&mut self, buffer_size: u32) {
        for buf in self.in_buf.iter_mut().chain(self.out_buf.iter_mut()) {
            buf.clear();
            buf.resize(buffer_size as usize, 0.0);
        }
        self.buffer_size = buffer_size;
    }

    fn clear(&mut self) {
        self.routes.clear();
        self.in_buf = Vec::new();
        self.out_buf = Vec::new();
        self.buffer_size = 0;
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
        match (source.group, dest.group) {
            (GroupId::AudioIn, GroupId::Rack) => {
                if source.port >= u32::from(topology.host_inputs) {
                    return Err(invalid_port(source.group, source.port));
                }
                if dest.port as usize >= RACK_CHANNELS {
                    return Err(invalid_port(dest.group, dest.port));
                }
                Ok(())
            }
            (GroupId::Rack, GroupId::AudioOut) => {
                if source.port as usize >= RACK_CHANNELS {
                    return Err(invalid_port(source.group, source.port));
                }
                if dest.port >= u32::from(topology.host_outputs) {
                    return Err(invalid_port(dest.group, dest.port));
                }
                Ok(())
            }
            (src, dst) => Err(Error::InvalidGroup(format!(
                "rack mode cannot route {src:?} to {dst:?}"
            ))),
        }
    }
}
