//! Bridged plugin adapter.
//!
//! Audio thread → lock-free queues → bridge thread → encoded messages →
//! [`BridgeServer`]. The audio thread only pushes and pops; the bridge thread
//! does all encoding and runs the plugin. Results come back one block late.
//!
//! Block storage is a fixed pool created up front. Slots circulate between
//! the free, request and result queues and are never created, resized or
//! dropped on the audio thread.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam::queue::ArrayQueue;
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender, TryRecvError};
use hostrack_core::{Plugin, PluginInfo, PortKind, ProcessContext, ProcessError, MAX_EVENTS};
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::error::{BridgeError, Result};
use crate::protocol::{self, BridgeMessage, HostMessage, PluginInfoWire, ProcessBlock};
use crate::server::BridgeServer;

/// Slots in flight per bridged plugin. Every queue holds the whole pool.
const POOL_SIZE: usize = 4;
const DEFAULT_BLOCK_FRAMES: usize = 512;
const REPLY_TIMEOUT: Duration = Duration::from_secs(2);
const IDLE_WAIT: Duration = Duration::from_micros(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlockStatus {
    Pending,
    Processed,
    Failed,
}

/// Pooled storage for one block. The audio thread writes `request` and
/// reads `reply`; the bridge thread does every resize.
#[derive(Debug)]
struct BlockSlot {
    request: ProcessBlock,
    audio_channels: usize,
    cv_channels: usize,
    reply: ProcessBlock,
    status: BlockStatus,
}

impl BlockSlot {
    fn new(audio_channels: usize, cv_channels: usize, frames: usize) -> Self {
        let mut slot = Self {
            request: ProcessBlock::default(),
            audio_channels,
            cv_channels,
            reply: ProcessBlock::default(),
            status: BlockStatus::Pending,
        };
        slot.reserve(frames);
        slot
    }

    /// Grow the request storage to the channel counts last used and `frames`
    /// per channel. Never called on the audio thread.
    fn reserve(&mut self, frames: usize) {
        reserve_channels(&mut self.request.audio, self.audio_channels, frames);
        reserve_channels(&mut self.request.cv, self.cv_channels, frames);
        self.request.events.clear();
        self.request.events.reserve(MAX_EVENTS);
    }

    /// Whether a block of this shape can be written without allocating.
    fn fits(&self, audio: usize, cv: usize, frames: usize) -> bool {
        self.request.audio.len() >= audio
            && self.request.cv.len() >= cv
            && self
                .request
                .audio
                .iter()
                .chain(&self.request.cv)
                .all(|ch| ch.capacity() >= frames)
    }
}

fn reserve_channels(channels: &mut Vec<Vec<f32>>, count: usize, frames: usize) {
    channels.resize_with(count, Vec::new);
    for ch in channels.iter_mut() {
        ch.clear();
        ch.reserve(frames);
    }
}

/// Copy `src` into the first channels of `dst` within their capacity.
fn copy_channels<'a>(dst: &mut [Vec<f32>], src: impl Iterator<Item = &'a [f32]>) -> usize {
    let mut count = 0;
    for (dst, src) in dst.iter_mut().zip(src) {
        dst.clear();
        dst.extend_from_slice(src);
        count += 1;
    }
    count
}

struct BridgeQueues {
    free: ArrayQueue<BlockSlot>,
    requests: ArrayQueue<BlockSlot>,
    results: ArrayQueue<BlockSlot>,
    running: AtomicBool,
}

impl BridgeQueues {
    /// Return a slot to the free list. Each queue holds the whole pool, so
    /// this only fails if a slot was created outside it.
    fn recycle(&self, slot: BlockSlot) {
        if let Err(slot) = self.free.push(slot) {
            debug_assert!(false, "bridge block pool over capacity");
            std::mem::forget(slot);
        }
    }
}

/// Request/reply link for everything except audio blocks.
struct ControlLink {
    tx: Sender<Vec<u8>>,
    rx: Receiver<Vec<u8>>,
}

/// A plugin hosted on its own bridge thread, driven through the bridge
/// protocol.
pub struct BridgedPlugin {
    describe: PluginInfoWire,
    queues: Arc<BridgeQueues>,
    control: Mutex<ControlLink>,
    thread: Option<thread::JoinHandle<()>>,
}

impl BridgedPlugin {
    /// Move `plugin` onto a new bridge thread and wait for its description.
    pub fn spawn(plugin: Box<dyn Plugin>) -> Result<Self> {
        let server = BridgeServer::new(plugin);
        let queues = Arc::new(BridgeQueues {
            free: ArrayQueue::new(POOL_SIZE),
            requests: ArrayQueue::new(POOL_SIZE),
            results: ArrayQueue::new(POOL_SIZE),
            running: AtomicBool::new(true),
        });
        let (control_tx, control_rx) = unbounded();
        let (reply_tx, reply_rx) = unbounded();

        let thread_queues = Arc::clone(&queues);
        let thread = thread::Builder::new()
            .name("plugin-bridge".to_string())
            .spawn(move || bridge_thread_main(server, thread_queues, control_rx, reply_tx))
            .map_err(BridgeError::ThreadSpawn)?;

        let ready = reply_rx
            .recv_timeout(REPLY_TIMEOUT)
            .map_err(|_| BridgeError::Disconnected("no ready message"))?;
        let describe = match protocol::decode::<BridgeMessage>(&ready)? {
            BridgeMessage::Ready(describe) => describe,
            other => {
                return Err(BridgeError::Plugin(format!(
                    "expected ready message, got {other:?}"
                )))
            }
        };
        debug!(plugin = %describe.info.name, "Bridge thread started");

        // rack mode hands every plugin two channels
        let audio_channels = (describe.port_count(PortKind::AudioIn) as usize).max(2);
        let cv_channels = describe.port_count(PortKind::CvIn) as usize;
        for _ in 0..POOL_SIZE {
            queues.recycle(BlockSlot::new(
                audio_channels,
                cv_channels,
                DEFAULT_BLOCK_FRAMES,
            ));
        }

        Ok(Self {
            describe,
            queues,
            control: Mutex::new(ControlLink {
                tx: control_tx,
                rx: reply_rx,
            }),
            thread: Some(thread),
        })
    }

    /// Send a control message and wait for its reply. Never called from the
    /// audio thread.
    pub fn request(&self, message: HostMessage) -> Result<BridgeMessage> {
        let bytes = protocol::encode(&message)?;
        let link = self.control.lock();
        link.tx
            .send(bytes)
            .map_err(|_| BridgeError::Disconnected("bridge thread gone"))?;
        let reply = link
            .rx
            .recv_timeout(REPLY_TIMEOUT)
            .map_err(|_| BridgeError::Disconnected("reply timed out"))?;
        protocol::decode(&reply)
    }

    fn command(&self, message: HostMessage) {
        match self.request(message) {
            Ok(BridgeMessage::Ack) => {}
            Ok(BridgeMessage::Error(e)) => {
                warn!(plugin = %self.describe.info.name, error = %e, "Bridged plugin refused command")
            }
            Ok(other) => warn!(plugin = %self.describe.info.name, reply = ?other, "Unexpected bridge reply"),
            Err(e) => warn!(plugin = %self.describe.info.name, error = %e, "Bridge command failed"),
        }
    }

    /// Regrow idle slots for a new block size. Pending results belong to the
    /// old size and are discarded. Slots in flight are regrown by the bridge
    /// thread.
    fn reserve_pool(&self, frames: usize) {
        let mut idle = Vec::with_capacity(POOL_SIZE);
        while let Some(slot) = self.queues.results.pop() {
            idle.push(slot);
        }
        while let Some(slot) = self.queues.free.pop() {
            idle.push(slot);
        }
        for mut slot in idle {
            slot.reserve(frames);
            slot.status = BlockStatus::Pending;
            self.queues.recycle(slot);
        }
    }

    /// Deactivate the plugin and join the bridge thread.
    pub fn shutdown(&mut self) {
        if let Ok(bytes) = protocol::encode(&HostMessage::Shutdown) {
            let _ = self.control.lock().tx.send(bytes);
        }
        self.queues.running.store(false, Ordering::Release);
        if let Some(handle) = self.thread.take() {
            if handle.join().is_err() {
                warn!(plugin = %self.describe.info.name, "Bridge thread panicked");
            }
        }
    }
}

impl Plugin for BridgedPlugin {
    fn info(&self) -> PluginInfo {
        self.describe.info.clone()
    }

    fn port_count(&self, kind: PortKind) -> u32 {
        self.describe.port_count(kind)
    }

    fn port_name(&self, kind: PortKind, index: u32) -> Option<String> {
        self.describe.port_name(kind, index).map(String::from)
    }

    fn has_event_input(&self) -> bool {
        self.describe.has_event_input
    }

    fn has_event_output(&self) -> bool {
        self.describe.has_event_output
    }

    fn activate(&mut self) {
        self.command(HostMessage::Activate);
    }

    fn deactivate(&mut self) {
        self.command(HostMessage::Deactivate);
    }

    fn set_buffer_size(&mut self, frames: u32) {
        self.command(HostMessage::SetBufferSize(frames));
        self.reserve_pool(frames as usize);
    }

    fn set_sample_rate(&mut self, rate: f64) {
        self.command(HostMessage::SetSampleRate(rate));
    }

    /// Emit the previous block's result, then queue this block into the
    /// same slot. Nothing here waits on the bridge thread or touches the
    /// allocator.
    fn process(&mut self, ctx: &mut ProcessContext<'_>) -> std::result::Result<(), ProcessError> {
        ctx.audio_out.fill(0.0);
        ctx.cv_out.fill(0.0);

        let mut failed = false;
        let slot = match self.queues.results.pop() {
            Some(done) => {
                match done.status {
                    BlockStatus::Processed => {
                        let reply = &done.reply;
                        let frames = (reply.frames as usize).min(ctx.frames);
                        for (ch, data) in reply.audio.iter().enumerate().take(ctx.audio_out.channels()) {
                            ctx.audio_out.channel_mut(ch)[..frames].copy_from_slice(&data[..frames]);
                        }
                        for (ch, data) in reply.cv.iter().enumerate().take(ctx.cv_out.channels()) {
                            ctx.cv_out.channel_mut(ch)[..frames].copy_from_slice(&data[..frames]);
                        }
                        for event in reply.events.iter() {
                            let _ = ctx.events_out.push(*event);
                        }
                    }
                    BlockStatus::Failed => failed = true,
                    BlockStatus::Pending => {}
                }
                Some(done)
            }
            None => self.queues.free.pop(),
        };

        // with every slot in flight the bridge is behind; this block is skipped
        if let Some(mut slot) = slot {
            slot.status = BlockStatus::Pending;
            let audio = ctx.audio_in.channels();
            let cv = ctx.cv_in.channels();
            if slot.fits(audio, cv, ctx.frames) {
                let request = &mut slot.request;
                request.frames = ctx.frames as u32;
                slot.audio_channels = copy_channels(&mut request.audio, ctx.audio_in.iter());
                slot.cv_channels = copy_channels(&mut request.cv, ctx.cv_in.iter());
                request.events.clear();
                let room = request.events.capacity();
                request.events.extend(ctx.events_in.iter().take(room).copied());
                request.time = ctx.time;
                if let Err(slot) = self.queues.requests.push(slot) {
                    self.queues.recycle(slot);
                }
            } else {
                // the bridge thread regrows it on the next round trip
                slot.audio_channels = audio;
                slot.cv_channels = cv;
                slot.reply.frames = 0;
                slot.request.frames = 0;
                if let Err(slot) = self.queues.requests.push(slot) {
                    self.queues.recycle(slot);
                }
            }
        }

        if failed {
            Err(ProcessError::Failed("bridged plugin failed"))
        } else {
            Ok(())
        }
    }

    fn save_state(&self) -> Vec<u8> {
        match self.request(HostMessage::SaveState) {
            Ok(BridgeMessage::State(data)) => data,
            Ok(other) => {
                warn!(plugin = %self.describe.info.name, reply = ?other, "Unexpected bridge reply");
                Vec::new()
            }
            Err(e) => {
                warn!(plugin = %self.describe.info.name, error = %e, "Bridged state save failed");
                Vec::new()
            }
        }
    }

    fn restore_state(&mut self, data: &[u8]) -> std::result::Result<(), ProcessError> {
        match self.request(HostMessage::LoadState(data.to_vec())) {
            Ok(BridgeMessage::Ack) => Ok(()),
            Ok(_) => Err(ProcessError::InvalidState("bridged plugin rejected state")),
            Err(_) => Err(ProcessError::NotReady),
        }
    }
}

impl Drop for BridgedPlugin {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for BridgedPlugin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BridgedPlugin")
            .field("plugin", &self.describe.info.name)
            .field("running", &self.queues.running.load(Ordering::Relaxed))
            .finish()
    }
}

fn bridge_thread_main(
    mut server: BridgeServer,
    queues: Arc<BridgeQueues>,
    control_rx: Receiver<Vec<u8>>,
    reply_tx: Sender<Vec<u8>>,
) {
    match protocol::encode(&server.ready()) {
        Ok(bytes) => {
            if reply_tx.send(bytes).is_err() {
                return;
            }
        }
        Err(e) => {
            warn!(error = %e, "Failed to encode ready message");
            return;
        }
    }

    loop {
        match control_rx.try_recv() {
            Ok(bytes) => {
                if !answer(&mut server, &bytes, &reply_tx) {
                    break;
                }
                continue;
            }
            Err(TryRecvError::Disconnected) => break,
            Err(TryRecvError::Empty) => {}
        }

        if let Some(mut slot) = queues.requests.pop() {
            round_trip(&mut server, &mut slot);
            if let Err(slot) = queues.results.push(slot) {
                queues.recycle(slot);
            }
            continue;
        }

        if !queues.running.load(Ordering::Acquire) {
            while let Ok(bytes) = control_rx.try_recv() {
                if !answer(&mut server, &bytes, &reply_tx) {
                    break;
                }
            }
            break;
        }
        match control_rx.recv_timeout(IDLE_WAIT) {
            Ok(bytes) => {
                if !answer(&mut server, &bytes, &reply_tx) {
                    break;
                }
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
}

/// Answer a control message. Returns false once the server has shut down.
fn answer(server: &mut BridgeServer, bytes: &[u8], reply_tx: &Sender<Vec<u8>>) -> bool {
    let reply = match server.handle_bytes(bytes) {
        Ok(Some(reply)) => reply,
        Ok(None) => return false,
        Err(e) => match protocol::encode(&BridgeMessage::Error(e.to_string())) {
            Ok(reply) => reply,
            Err(_) => return true,
        },
    };
    let _ = reply_tx.send(reply);
    true
}

/// Run one pooled block through the server, store the reply in the slot and
/// regrow the request storage for the next block.
fn round_trip(server: &mut BridgeServer, slot: &mut BlockSlot) {
    let frames = (server.buffer_size() as usize).max(slot.request.frames as usize);
    if slot.request.frames == 0 {
        // a slot too small to carry the last block
        slot.status = BlockStatus::Pending;
        slot.reserve(frames.max(DEFAULT_BLOCK_FRAMES));
        return;
    }

    let mut request = std::mem::take(&mut slot.request);
    request.audio.truncate(slot.audio_channels);
    request.cv.truncate(slot.cv_channels);
    let message = HostMessage::Process(request);
    let reply = protocol::encode(&message)
        .and_then(|bytes| server.handle_bytes(&bytes))
        .and_then(|reply| {
            reply
                .ok_or(BridgeError::Disconnected("no process reply"))
                .and_then(|bytes| protocol::decode::<BridgeMessage>(&bytes))
        });
    if let HostMessage::Process(request) = message {
        slot.request = request;
    }

    slot.status = match reply {
        Ok(BridgeMessage::Processed(block)) => {
            slot.reply = block;
            BlockStatus::Processed
        }
        Ok(BridgeMessage::Error(e)) => {
            debug!(error = %e, "Bridged block failed");
            BlockStatus::Failed
        }
        Ok(_) => BlockStatus::Failed,
        Err(e) => {
            warn!(error = %e, "Bridge round trip failed");
            BlockStatus::Failed
        }
    };
    slot.reserve(frames);
}
