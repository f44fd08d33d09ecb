//! Bridge server: owns a plugin and answers host messages.

use hostrack_core::{AudioIn, AudioOut, EventBuffer, Plugin, PortKind, ProcessContext};
use tracing::{debug, warn};

use crate::error::Result;
use crate::protocol::{self, BridgeMessage, HostMessage, PluginInfoWire, ProcessBlock};

/// Plugin side of the bridge. Runs wherever the bridge thread puts it and
/// only ever sees decoded messages.
pub struct BridgeServer {
    plugin: Box<dyn Plugin>,
    describe: PluginInfoWire,
    audio_out: Vec<Vec<f32>>,
    cv_out: Vec<Vec<f32>>,
    events_in: EventBuffer,
    events_out: EventBuffer,
    buffer_size: u32,
    active: bool,
}

impl BridgeServer {
    pub fn new(plugin: Box<dyn Plugin>) -> Self {
        let describe = PluginInfoWire::describe(plugin.as_ref());
        let audio_outs = describe.port_count(PortKind::AudioOut) as usize;
        let cv_outs = describe.port_count(PortKind::CvOut) as usize;
        Self {
            plugin,
            describe,
            audio_out: vec![Vec::new(); audio_outs],
            cv_out: vec![Vec::new(); cv_outs],
            events_in: EventBuffer::new(),
            events_out: EventBuffer::new(),
            buffer_size: 0,
            active: false,
        }
    }

    /// The first message a host receives.
    pub fn ready(&self) -> BridgeMessage {
        BridgeMessage::Ready(self.describe.clone())
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Last block size the host announced, 0 before the first.
    pub fn buffer_size(&self) -> u32 {
        self.buffer_size
    }

    /// Answer one message. `Shutdown` gets no reply.
    pub fn handle(&mut self, message: HostMessage) -> Option<BridgeMessage> {
        let reply = match message {
            HostMessage::Activate => {
                if !self.active {
                    self.plugin.activate();
                    self.active = true;
                }
                BridgeMessage::Ack
            }
            HostMessage::Deactivate => {
                if self.active {
                    self.plugin.deactivate();
                    self.active = false;
                }
                BridgeMessage::Ack
            }
            HostMessage::SetBufferSize(frames) => {
                self.buffer_size = frames;
                self.plugin.set_buffer_size(frames);
                BridgeMessage::Ack
            }
            HostMessage::SetSampleRate(rate) => {
                self.plugin.set_sample_rate(rate);
                BridgeMessage::Ack
            }
            HostMessage::Process(block) => self.process(block),
            HostMessage::SaveState => BridgeMessage::State(self.plugin.save_state()),
            HostMessage::LoadState(data) => match self.plugin.restore_state(&data) {
                Ok(()) => BridgeMessage::Ack,
                Err(e) => BridgeMessage::Error(e.to_string()),
            },
            HostMessage::Shutdown => {
                if self.active {
                    self.plugin.deactivate();
                    self.active = false;
                }
                debug!(plugin = %self.describe.info.name, "Bridge server shut down");
                return None;
            }
        };
        Some(reply)
    }

    /// Decode, answer, encode.
    pub fn handle_bytes(&mut self, bytes: &[u8]) -> Result<Option<Vec<u8>>> {
        let message: HostMessage = protocol::decode(bytes)?;
        self.handle(message)
            .map(|reply| protocol::encode(&reply))
            .transpose()
    }

    /// Run one block. The reply reuses the request's channel buffers.
    fn process(&mut self, mut block: ProcessBlock) -> BridgeMessage {
        let frames = block.frames as usize;
        if block.audio.iter().chain(&block.cv).any(|ch| ch.len() < frames) {
            return BridgeMessage::Error("short channel in process block".to_string());
        }
        // in rack mode the host may hand over more channels than declared
        let audio_outs = self.audio_out.len().max(block.audio.len());
        let cv_outs = self.cv_out.len();
        ensure_channels(&mut self.audio_out, audio_outs, frames);
        ensure_channels(&mut self.cv_out, cv_outs, frames);

        self.events_in.clear();
        for event in block.events.drain(..) {
            if self.events_in.push(event).is_err() {
                warn!(plugin = %self.describe.info.name, "Bridged events dropped");
                break;
            }
        }
        self.events_out.clear();

        let mut ctx = ProcessContext {
            audio_in: AudioIn::new(&block.audio, frames),
            audio_out: AudioOut::new(&mut self.audio_out, frames),
            cv_in: AudioIn::new(&block.cv, frames),
            cv_out: AudioOut::new(&mut self.cv_out, frames),
            events_in: &self.events_in,
            events_out: &mut self.events_out,
            frames,
            time: block.time,
            offline: false,
        };
        if let Err(e) = self.plugin.process(&mut ctx) {
            return BridgeMessage::Error(e.to_string());
        }

        ProcessBlock::load_channels(
            &mut block.audio,
            self.audio_out.iter().map(|ch| &ch[..frames]),
        );
        ProcessBlock::load_channels(&mut block.cv, self.cv_out.iter().map(|ch| &ch[..frames]));
        block.events.extend(self.events_out.iter().copied());
        BridgeMessage::Processed(block)
    }
}

fn ensure_channels(channels: &mut Vec<Vec<f32>>, count: usize, frames: usize) {
    channels.resize_with(count, Vec::new);
    for ch in channels.iter_mut() {
        if ch.len() < frames {
            ch.resize(frames, 0.0);
        }
        ch[..frames].fill(0.0);
    }
}

impl std::fmt::Debug for BridgeServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BridgeServer")
            .field("plugin", &self.describe.info.name)
            .field("buffer_size", &self.buffer_size)
            .field("active", &self.active)
            .finish()
    }
}
