//! Audio-thread side of the engine.
//!
//! [`EngineProcessor`] owns the slot table, routing buffer, event buffers and
//! transport clock. The host moves it into its audio callback after
//! [`Engine::activate`](crate::Engine::activate) and hands it back with
//! [`Engine::deactivate`](crate::Engine::deactivate). Every block starts with
//! the rendezvous check; nothing here allocates, blocks, or logs.

use std::sync::Arc;

use crate::action::{ActionOutcome, PostAction};
use crate::config::EngineConfig;
use crate::engine::EngineShared;
use crate::event::{EngineEvents, EventBuffer};
use crate::notify::{EngineNotification, PluginFaultKind};
use crate::plugin::{AudioIn, AudioOut, PluginId, ProcessContext};
use crate::routing::{AudioBuffer, RoutingBuffer};
use crate::slots::{stereo_peak, PluginSlot, SlotTable};
use crate::time::{TimeInfo, TransportClock};
use crate::{Error, Result};

pub struct EngineProcessor {
    shared: Arc<EngineShared>,
    slots: SlotTable<PluginSlot>,
    buffer: AudioBuffer,
    events: EngineEvents,
    /// Rack event chain: what the next plugin reads, and what the current one writes.
    chain_in: EventBuffer,
    chain_out: EventBuffer,
    clock: TransportClock,
    buffer_size: u32,
    /// Outcome that could not be posted last block.
    stashed: Option<ActionOutcome>,
}

impl EngineProcessor {
    pub(crate) fn new(
        shared: Arc<EngineShared>,
        config: &EngineConfig,
        clock: TransportClock,
    ) -> Result<Self> {
        let mut buffer = AudioBuffer::new(config.process_mode, config.max_connections);
        buffer.create(config.buffer_size)?;
        Ok(Self {
            shared,
            slots: SlotTable::new(config.max_plugins()),
            buffer,
            events: EngineEvents::new(),
            chain_in: EventBuffer::new(),
            chain_out: EventBuffer::new(),
            clock,
            buffer_size: config.buffer_size,
            stashed: None,
        })
    }

    pub fn buffer_size(&self) -> u32 {
        self.buffer_size
    }

    pub fn plugin_count(&self) -> u32 {
        self.slots.count()
    }

    pub fn is_patchbay(&self) -> bool {
        self.buffer.is_patchbay()
    }

    /// Inbound events for the next block. Cleared after each block.
    pub fn events_in_mut(&mut self) -> &mut EventBuffer {
        &mut self.events.input
    }

    /// Outbound events of the last block.
    pub fn events_out(&self) -> &EventBuffer {
        &self.events.output
    }

    pub fn time_info(&self) -> TimeInfo {
        self.clock.current()
    }

    /// Process one block of host audio. Rack mode maps the host channels
    /// through the rack connections; patchbay mode through the graph.
    pub fn process(
        &mut self,
        inputs: &[&[f32]],
        outputs: &mut [&mut [f32]],
        nframes: u32,
        offline: bool,
    ) {
        self.process_rack_full(inputs, outputs, nframes, offline);
    }

    /// Run the stereo rack chain directly on two host channels. In patchbay
    /// mode the two channels are host channels 1 and 2 of the graph.
    pub fn process_rack(
        &mut self,
        inputs: [&[f32]; 2],
        outputs: [&mut [f32]; 2],
        nframes: u32,
        offline: bool,
    ) {
        if self.buffer.is_patchbay() {
            let [left, right] = outputs;
            self.process_patchbay(&inputs, &mut [left, right], nframes, offline);
            return;
        }
        let Some(frames) = self.begin_block(nframes, offline) else {
            return;
        };
        if let AudioBuffer::Rack(rack) = &mut self.buffer {
            for (buf, input) in rack.in_buf.iter_mut().zip(inputs) {
                let n = frames.min(input.len());
                buf[..n].copy_from_slice(&input[..n]);
                buf[n..frames].fill(0.0);
            }
        }
        self.run_rack_chain(frames, offline);
        if let AudioBuffer::Rack(rack) = &self.buffer {
            for (output, buf) in outputs.into_iter().zip(rack.out_buf.iter()) {
                let n = frames.min(output.len());
                output[..n].copy_from_slice(&buf[..n]);
                output[n..].fill(0.0);
            }
        }
        self.end_block(frames);
    }

    /// Run the rack chain for an N-channel host, fanning host channels into
    /// the two rack inputs and the rack outputs back out. Patchbay engines
    /// process the graph instead.
    pub fn process_rack_full(
        &mut self,
        inputs: &[&[f32]],
        outputs: &mut [&mut [f32]],
        nframes: u32,
        offline: bool,
    ) {
        if self.buffer.is_patchbay() {
            self.process_patchbay(inputs, outputs, nframes, offline);
            return;
        }
        let Some(frames) = self.begin_block(nframes, offline) else {
            return;
        };
        if let AudioBuffer::Rack(rack) = &mut self.buffer {
            rack.gather_host_inputs(inputs, frames);
        }
        self.run_rack_chain(frames, offline);
        if let AudioBuffer::Rack(rack) = &self.buffer {
            rack.scatter_host_outputs(outputs, frames);
        }
        zero_tail(outputs, frames);
        self.end_block(frames);
    }

    fn process_patchbay(
        &mut self,
        inputs: &[&[f32]],
        outputs: &mut [&mut [f32]],
        nframes: u32,
        offline: bool,
    ) {
        let Some(frames) = self.begin_block(nframes, offline) else {
            return;
        };
        let time = self.clock.current();
        let Self {
            shared,
            slots,
            buffer,
            events,
            chain_out,
            ..
        } = &mut *self;
        let AudioBuffer::Patchbay(patchbay) = buffer else {
            return;
        };

        events.output.clear();
        let count = slots.count();
        for id in 0..count {
            let live = slots.live_slice_mut();
            patchbay.gather_plugin_inputs(live, id, inputs, frames);
            let Some(slot) = live[id as usize].as_mut() else {
                debug_assert!(false, "empty slot inside the live range");
                continue;
            };

            for out in slot.outputs.iter_mut() {
                out[..frames].fill(0.0);
            }
            chain_out.clear();
            let audio_ins = (slot.audio_ins as usize).min(slot.inputs.len());
            let audio_outs = (slot.audio_outs as usize).min(slot.outputs.len());
            let (audio_in, cv_in) = slot.inputs.split_at(audio_ins);
            let (audio_out, cv_out) = slot.outputs.split_at_mut(audio_outs);
            let mut ctx = ProcessContext {
                audio_in: AudioIn::new(audio_in, frames),
                audio_out: AudioOut::new(audio_out, frames),
                cv_in: AudioIn::new(cv_in, frames),
                cv_out: AudioOut::new(cv_out, frames),
                events_in: &events.input,
                events_out: &mut *chain_out,
                frames,
                time,
                offline,
            };
            let fault = fault_kind(slot.plugin.process(&mut ctx), &slot.outputs, frames);
            if fault.is_some() {
                for out in slot.outputs.iter_mut() {
                    out[..frames].fill(0.0);
                }
            } else {
                events.output.merge_from(chain_out);
            }

            let ins = stereo_peak(&slot.inputs, slot.audio_ins, frames);
            let outs = stereo_peak(&slot.outputs, slot.audio_outs, frames);
            report(shared, id, ins, outs, fault);
        }

        patchbay.scatter_host_outputs(slots.live_slice_mut(), inputs, outputs, frames);
        zero_tail(outputs, frames);
        self.end_block(frames);
    }

    /// Plugins run in series: each one's output is the next one's input. A
    /// plugin without audio inputs has the incoming signal mixed into its
    /// output; one without event output lets its inbound events through.
    /// With no plugin processed the input passes straight through.
    fn run_rack_chain(&mut self, frames: usize, offline: bool) {
        let time = self.clock.current();
        let Self {
            shared,
            slots,
            buffer,
            events,
            chain_in,
            chain_out,
            ..
        } = &mut *self;
        let AudioBuffer::Rack(rack) = buffer else {
            return;
        };

        chain_in.clear();
        chain_in.extend_from(&events.input);
        for out in rack.out_buf.iter_mut() {
            out[..frames].fill(0.0);
        }

        let mut processed = false;
        for (id, entry) in slots.live_slice_mut().iter_mut().enumerate() {
            let Some(slot) = entry.as_mut() else {
                debug_assert!(false, "empty slot inside the live range");
                continue;
            };

            if processed {
                for (input, output) in rack.in_buf.iter_mut().zip(rack.out_buf.iter_mut()) {
                    input[..frames].copy_from_slice(&output[..frames]);
                    output[..frames].fill(0.0);
                }
                std::mem::swap(chain_in, chain_out);
            }
            chain_out.clear();

            let ins = stereo_peak(&rack.in_buf, slot.audio_ins, frames);
            let mut ctx = ProcessContext {
                audio_in: AudioIn::new(&rack.in_buf, frames),
                audio_out: AudioOut::new(&mut rack.out_buf, frames),
                cv_in: AudioIn::empty(),
                cv_out: AudioOut::empty(),
                events_in: &*chain_in,
                events_out: &mut *chain_out,
                frames,
                time,
                offline,
            };
            let fault = fault_kind(slot.plugin.process(&mut ctx), &rack.out_buf, frames);
            if fault.is_some() {
                for out in rack.out_buf.iter_mut() {
                    out[..frames].fill(0.0);
                }
                chain_out.clear();
            }

            if slot.audio_ins == 0 {
                for (output, input) in rack.out_buf.iter_mut().zip(rack.in_buf.iter()) {
                    for (o, i) in output[..frames].iter_mut().zip(&input[..frames]) {
                        *o += *i;
                    }
                }
            }
            if !slot.has_event_output {
                chain_out.extend_from(chain_in);
            }

            let outs = stereo_peak(&rack.out_buf, slot.audio_outs, frames);
            report(shared, id as PluginId, ins, outs, fault);
            processed = true;
        }

        events.output.clear();
        if processed {
            events.output.extend_from(chain_out);
        } else {
            for (output, input) in rack.out_buf.iter_mut().zip(rack.in_buf.iter()) {
                output[..frames].copy_from_slice(&input[..frames]);
            }
            events.output.extend_from(chain_in);
        }
    }

    /// Service the rendezvous and the transport. Returns the frame count to
    /// process, clamped to the buffer size.
    fn begin_block(&mut self, nframes: u32, offline: bool) -> Option<usize> {
        self.service_rendezvous(offline);
        self.clock.process_commands();
        if nframes == 0 {
            return None;
        }
        debug_assert!(
            nframes <= self.buffer_size,
            "block of {nframes} frames exceeds buffer size {}",
            self.buffer_size
        );
        Some(nframes.min(self.buffer_size) as usize)
    }

    fn end_block(&mut self, frames: usize) {
        self.clock.advance(frames as u32);
        let dropped = self.events.input.take_dropped()
            + self.events.output.take_dropped()
            + self.chain_in.take_dropped()
            + self.chain_out.take_dropped();
        if dropped > 0 {
            self.shared.record_dropped_events(dropped);
        }
        self.events.input.clear();
    }

    fn service_rendezvous(&mut self, offline: bool) {
        if let Some(outcome) = self.stashed.take() {
            if !self.post_outcome(outcome) {
                return;
            }
        }
        if let Some(action) = self.shared.next_action.take(offline) {
            let outcome = self.apply_action(action);
            self.post_outcome(outcome);
        }
    }

    /// Hand the outcome to the requester, or keep it for the next block when
    /// the record is contended. Returns whether it was delivered.
    fn post_outcome(&mut self, outcome: ActionOutcome) -> bool {
        match self.shared.next_action.try_complete(outcome) {
            Ok(()) => true,
            Err(outcome) => {
                self.stashed = Some(outcome);
                false
            }
        }
    }

    /// Finish any in-flight request from a non-real-time context, before the
    /// processor is parked.
    pub(crate) fn drain_pending(&mut self) {
        if let Some(outcome) = self.stashed.take() {
            self.shared.next_action.complete(outcome);
        }
        if let Some(action) = self.shared.next_action.take(true) {
            let outcome = self.apply_action(action);
            self.shared.next_action.complete(outcome);
        }
    }

    /// Apply a structural mutation. Runs between blocks, either on the audio
    /// thread or directly by a requester while the processor is parked.
    pub(crate) fn apply_action(&mut self, action: PostAction) -> ActionOutcome {
        match action {
            PostAction::ZeroPluginCount => {
                self.slots.zero();
                self.buffer.plugins_zeroed();
                self.shared.reset_meters(0);
                ActionOutcome::Done
            }
            PostAction::RemovePlugin(id) => {
                let count = self.slots.count();
                match self.slots.remove_shift(id) {
                    Some(slot) => {
                        self.buffer.plugin_removed(id);
                        self.shared.reset_meters(id);
                        ActionOutcome::Removed(slot)
                    }
                    None => invariant_failure(
                        "remove of a slot outside the live range",
                        Error::InvalidPluginId { id, count },
                    ),
                }
            }
            PostAction::SwitchPlugins(a, b) => {
                let count = self.slots.count();
                if self.slots.switch(a, b) {
                    self.buffer.plugins_switched(a, b);
                    self.shared.reset_meter(a);
                    self.shared.reset_meter(b);
                    ActionOutcome::Done
                } else {
                    invariant_failure(
                        "switch of a slot outside the live range",
                        Error::InvalidPluginId {
                            id: a.max(b),
                            count,
                        },
                    )
                }
            }
            PostAction::AddPlugin(slot) => match self.slots.place(slot) {
                Ok((id, displaced)) => {
                    self.shared.reset_meter(id);
                    ActionOutcome::Added { id, displaced }
                }
                Err(slot) => {
                    debug_assert!(false, "add into a full slot table");
                    ActionOutcome::Rejected {
                        error: Error::SlotTableFull(self.slots.max_plugins()),
                        slot: Some(slot),
                    }
                }
            },
            PostAction::Connect(connection) => match self.buffer.connect(connection) {
                Ok(()) => ActionOutcome::Done,
                Err(error) => ActionOutcome::Failed(error),
            },
            PostAction::Disconnect(id) => match self.buffer.disconnect(id) {
                Ok(_) => ActionOutcome::Done,
                Err(error) => ActionOutcome::Failed(error),
            },
            PostAction::Reclaim(mut out) => {
                let remaining = self.slots.take_stale(&mut out);
                debug_assert_eq!(remaining, 0, "reclaim vector too small");
                ActionOutcome::Reclaimed(out)
            }
        }
    }

    /// Resize every buffer. Only called while parked.
    pub(crate) fn set_buffer_size(&mut self, buffer_size: u32) {
        self.buffer.resize(buffer_size);
        for entry in self.slots.live_slice_mut().iter_mut().flatten() {
            entry.resize(buffer_size);
            entry.plugin.set_buffer_size(buffer_size);
        }
        self.events = EngineEvents::new();
        self.buffer_size = buffer_size;
    }

    /// Only called while parked.
    pub(crate) fn set_sample_rate(&mut self, sample_rate: f64) {
        for entry in self.slots.live_slice_mut().iter_mut().flatten() {
            entry.plugin.set_sample_rate(sample_rate);
        }
    }

    /// Release routing state and scratch at teardown.
    pub(crate) fn release(&mut self) {
        self.buffer.clear();
        debug_assert!(!self.buffer.is_allocated());
    }
}

impl std::fmt::Debug for EngineProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineProcessor")
            .field("plugins", &self.slots.count())
            .field("buffer_size", &self.buffer_size)
            .field("patchbay", &self.buffer.is_patchbay())
            .finish_non_exhaustive()
    }
}

/// Invariant violations assert in debug builds and come back as a failed
/// outcome in release builds.
fn invariant_failure(message: &'static str, error: Error) -> ActionOutcome {
    debug_assert!(false, "{message}");
    ActionOutcome::Failed(error)
}

#[inline]
fn fault_kind(
    result: std::result::Result<(), crate::error::ProcessError>,
    outputs: &[Vec<f32>],
    frames: usize,
) -> Option<PluginFaultKind> {
    if result.is_err() {
        return Some(PluginFaultKind::ProcessFailed);
    }
    let non_finite = outputs
        .iter()
        .any(|ch| ch[..frames].iter().any(|s| !s.is_finite()));
    non_finite.then_some(PluginFaultKind::NonFinite)
}

#[inline]
fn report(
    shared: &EngineShared,
    id: PluginId,
    ins: [f32; 2],
    outs: [f32; 2],
    fault: Option<PluginFaultKind>,
) {
    let newly_faulted = shared
        .meters
        .get(id as usize)
        .is_some_and(|meters| meters.store(ins, outs, fault.is_some()));
    // the meter counts repeats; only the edge is announced
    if let (true, Some(kind)) = (newly_faulted, fault) {
        shared
            .notifier
            .notify(EngineNotification::PluginFault { id, kind });
    }
}

fn zero_tail(outputs: &mut [&mut [f32]], frames: usize) {
    for output in outputs.iter_mut() {
        if output.len() > frames {
            output[frames..].fill(0.0);
        }
    }
}
