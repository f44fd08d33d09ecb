//! Message protocol between a bridged plugin and its bridge server.

use hostrack_core::{EngineEvent, Plugin, PluginInfo, PortInfo, PortKind, TimeInfo};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::error::{BridgeError, Result};

const EVENT_STACK_CAPACITY: usize = 64;

/// Events of one block on the wire. Typical blocks stay on the stack.
pub type WireEventVec = SmallVec<[EngineEvent; EVENT_STACK_CAPACITY]>;

/// Plugin metadata sent once the server is up.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginInfoWire {
    pub info: PluginInfo,
    pub ports: Vec<PortInfo>,
    pub has_event_input: bool,
    pub has_event_output: bool,
}

impl PluginInfoWire {
    pub fn describe(plugin: &dyn Plugin) -> Self {
        let mut ports = Vec::new();
        for kind in [
            PortKind::AudioIn,
            PortKind::AudioOut,
            PortKind::CvIn,
            PortKind::CvOut,
        ] {
            for index in 0..plugin.port_count(kind) {
                let name = plugin
                    .port_name(kind, index)
                    .unwrap_or_else(|| format!("port_{}", index + 1));
                ports.push(PortInfo { kind, name });
            }
        }
        Self {
            info: plugin.info(),
            ports,
            has_event_input: plugin.has_event_input(),
            has_event_output: plugin.has_event_output(),
        }
    }

    pub fn port_count(&self, kind: PortKind) -> u32 {
        self.ports.iter().filter(|p| p.kind == kind).count() as u32
    }

    pub fn port_name(&self, kind: PortKind, index: u32) -> Option<&str> {
        self.ports
            .iter()
            .filter(|p| p.kind == kind)
            .nth(index as usize)
            .map(|p| p.name.as_str())
    }
}

/// One block of audio, CV and events, in either direction.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProcessBlock {
    pub frames: u32,
    pub audio: Vec<Vec<f32>>,
    pub cv: Vec<Vec<f32>>,
    pub events: WireEventVec,
    pub time: TimeInfo,
}

impl ProcessBlock {
    /// Copy `channels` into `dst`, reusing its allocations.
    pub(crate) fn load_channels<'a>(
        dst: &mut Vec<Vec<f32>>,
        channels: impl IntoIterator<Item = &'a [f32]>,
    ) {
        let mut count = 0;
        for ch in channels {
            if count == dst.len() {
                dst.push(Vec::with_capacity(ch.len()));
            }
            dst[count].clear();
            dst[count].extend_from_slice(ch);
            count += 1;
        }
        dst.truncate(count);
    }
}

/// Host to bridge message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum HostMessage {
    Activate,
    Deactivate,
    SetBufferSize(u32),
    SetSampleRate(f64),
    Process(ProcessBlock),
    SaveState,
    LoadState(Vec<u8>),
    Shutdown,
}

/// Bridge to host message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum BridgeMessage {
    Ready(PluginInfoWire),
    Processed(ProcessBlock),
    State(Vec<u8>),
    Ack,
    Error(String),
}

pub fn encode<T: Serialize>(message: &T) -> Result<Vec<u8>> {
    bincode::serialize(message).map_err(BridgeError::Encode)
}

pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    bincode::deserialize(bytes).map_err(BridgeError::Decode)
}
