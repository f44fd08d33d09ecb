//! Plugin slot table and per-slot peak meters.
//!
//! The table is a fixed-length array of optional entries plus a live count.
//! Indices `[0, count)` are always occupied; entries at `count` and above are
//! stale and never visited. The audio side stores [`PluginSlot`]s, the
//! control side a [`SlotInfo`] mirror, and both go through the same
//! transforms inside the rendezvous window.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use atomic_float::AtomicF32;
use serde::{Deserialize, Serialize};

use crate::plugin::{Plugin, PluginId, PluginInfo, PortKind};

/// Fixed-capacity ordered slots.
#[derive(Debug)]
pub struct SlotTable<T> {
    slots: Box<[Option<T>]>,
    count: u32,
}

impl<T> SlotTable<T> {
    pub fn new(max_plugins: u32) -> Self {
        Self {
            slots: (0..max_plugins).map(|_| None).collect(),
            count: 0,
        }
    }

    #[inline]
    pub fn max_plugins(&self) -> u32 {
        self.slots.len() as u32
    }

    #[inline]
    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn is_full(&self) -> bool {
        self.count >= self.max_plugins()
    }

    /// Next free index, or `max_plugins()` when full.
    pub fn next_plugin_id(&self) -> PluginId {
        self.count.min(self.max_plugins())
    }

    pub fn get(&self, id: PluginId) -> Option<&T> {
        if id < self.count {
            self.slots[id as usize].as_ref()
        } else {
            None
        }
    }

    pub fn get_mut(&mut self, id: PluginId) -> Option<&mut T> {
        if id < self.count {
            self.slots[id as usize].as_mut()
        } else {
            None
        }
    }

    /// Occupied entries in slot order.
    pub fn live(&self) -> impl Iterator<Item = &T> {
        self.slots[..self.count as usize].iter().flatten()
    }

    /// Raw live range, for callers that need split borrows.
    pub(crate) fn live_slice_mut(&mut self) -> &mut [Option<T>] {
        &mut self.slots[..self.count as usize]
    }

    /// Store `item` at the next free index. Returns the index and any stale
    /// entry that was sitting there, or gives `item` back when full.
    pub fn place(&mut self, item: T) -> Result<(PluginId, Option<T>), T> {
        if self.is_full() {
            return Err(item);
        }
        let id = self.count;
        let displaced = self.slots[id as usize].replace(item);
        self.count += 1;
        Ok((id, displaced))
    }

    /// Remove the entry at `id` and shift the tail down by one.
    pub fn remove_shift(&mut self, id: PluginId) -> Option<T> {
        if id >= self.count {
            return None;
        }
        let count = self.count as usize;
        self.slots[id as usize..count].rotate_left(1);
        self.count -= 1;
        self.slots[count - 1].take()
    }

    /// Swap two live entries in place.
    pub fn switch(&mut self, a: PluginId, b: PluginId) -> bool {
        if a >= self.count || b >= self.count {
            return false;
        }
        self.slots.swap(a as usize, b as usize);
        true
    }

    /// Set the live count to zero. Entries stay where they are as stale
    /// handles until they are displaced or reclaimed.
    pub fn zero(&mut self) {
        self.count = 0;
    }

    /// Move stale entries into `out` without growing it. Returns how many
    /// stale entries remain because `out` ran out of capacity.
    pub fn take_stale(&mut self, out: &mut Vec<T>) -> usize {
        let mut remaining = 0;
        for slot in self.slots[self.count as usize..].iter_mut() {
            if slot.is_none() {
                continue;
            }
            if out.len() < out.capacity() {
                if let Some(item) = slot.take() {
                    out.push(item);
                }
            } else {
                remaining += 1;
            }
        }
        remaining
    }

    /// Number of stale entries beyond the live range.
    pub fn stale_count(&self) -> usize {
        self.slots[self.count as usize..]
            .iter()
            .filter(|slot| slot.is_some())
            .count()
    }
}

/// Audio-thread entry: the plugin plus its patchbay port buffers.
pub struct PluginSlot {
    pub(crate) plugin: Box<dyn Plugin>,
    pub(crate) instance_id: u64,
    pub(crate) audio_ins: u32,
    pub(crate) audio_outs: u32,
    pub(crate) has_event_output: bool,
    /// Audio inputs then CV inputs. Empty in rack mode.
    pub(crate) inputs: Vec<Vec<f32>>,
    /// Audio outputs then CV outputs. Empty in rack mode.
    pub(crate) outputs: Vec<Vec<f32>>,
}

impl PluginSlot {
    /// Wrap a prepared plugin. Port buffers are only allocated for patchbay
    /// processing.
    pub fn new(plugin: Box<dyn Plugin>, instance_id: u64, patchbay: bool, buffer_size: u32) -> Self {
        let audio_ins = plugin.port_count(PortKind::AudioIn);
        let audio_outs = plugin.port_count(PortKind::AudioOut);
        let has_event_output = plugin.has_event_output();
        let (inputs, outputs) = if patchbay {
            let ins = audio_ins + plugin.port_count(PortKind::CvIn);
            let outs = audio_outs + plugin.port_count(PortKind::CvOut);
            (
                port_buffers(ins, buffer_size),
                port_buffers(outs, buffer_size),
            )
        } else {
            (Vec::new(), Vec::new())
        };
        Self {
            plugin,
            instance_id,
            audio_ins,
            audio_outs,
            has_event_output,
            inputs,
            outputs,
        }
    }

    pub fn instance_id(&self) -> u64 {
        self.instance_id
    }

    pub fn plugin(&self) -> &dyn Plugin {
        self.plugin.as_ref()
    }

    /// Hand the plugin back to its owner.
    pub fn into_plugin(self) -> Box<dyn Plugin> {
        self.plugin
    }

    /// Reallocate port buffers. Only while the engine is deactivated.
    pub(crate) fn resize(&mut self, buffer_size: u32) {
        for buf in self.inputs.iter_mut().chain(self.outputs.iter_mut()) {
            buf.clear();
            buf.resize(buffer_size as usize, 0.0);
        }
    }
}

impl std::fmt::Debug for PluginSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginSlot")
            .field("instance_id", &self.instance_id)
            .field("audio_ins", &self.audio_ins)
            .field("audio_outs", &self.audio_outs)
            .finish_non_exhaustive()
    }
}

fn port_buffers(count: u32, buffer_size: u32) -> Vec<Vec<f32>> {
    (0..count).map(|_| vec![0.0; buffer_size as usize]).collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortInfo {
    pub kind: PortKind,
    pub name: String,
}

/// Control-side description of a loaded plugin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SlotInfo {
    pub instance_id: u64,
    pub name: String,
    pub info: PluginInfo,
    pub ports: Vec<PortInfo>,
    pub has_event_input: bool,
    pub has_event_output: bool,
}

impl SlotInfo {
    pub fn from_plugin(plugin: &dyn Plugin, instance_id: u64, name: Option<String>) -> Self {
        let info = plugin.info();
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
            instance_id,
            name: name.unwrap_or_else(|| info.name.clone()),
            info,
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

    /// Routable sources: audio outputs then CV outputs.
    pub fn source_count(&self) -> u32 {
        self.port_count(PortKind::AudioOut) + self.port_count(PortKind::CvOut)
    }

    /// Routable destinations: audio inputs then CV inputs.
    pub fn dest_count(&self) -> u32 {
        self.port_count(PortKind::AudioIn) + self.port_count(PortKind::CvIn)
    }

    pub fn source_name(&self, port: u32) -> Option<&str> {
        let audio = self.port_count(PortKind::AudioOut);
        if port < audio {
            self.port_name(PortKind::AudioOut, port)
        } else {
            self.port_name(PortKind::CvOut, port - audio)
        }
    }

    pub fn dest_name(&self, port: u32) -> Option<&str> {
        let audio = self.port_count(PortKind::AudioIn);
        if port < audio {
            self.port_name(PortKind::AudioIn, port)
        } else {
            self.port_name(PortKind::CvIn, port - audio)
        }
    }
}

/// Advisory per-position meters. Written only by the audio thread.
#[derive(Debug, Default)]
pub struct SlotMeters {
    ins_peak: [AtomicF32; 2],
    outs_peak: [AtomicF32; 2],
    faulted: AtomicBool,
    faults: AtomicU32,
}

/// Torn-read copy of a slot's meters.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct PeakSnapshot {
    pub ins: [f32; 2],
    pub outs: [f32; 2],
    /// The last processed block faulted.
    pub faulted: bool,
    pub fault_count: u32,
}

impl SlotMeters {
    /// Publish one block. Returns true when the slot goes from healthy to
    /// faulted.
    #[inline]
    pub(crate) fn store(&self, ins: [f32; 2], outs: [f32; 2], faulted: bool) -> bool {
        for (meter, value) in self.ins_peak.iter().zip(ins) {
            meter.store(value, Ordering::Relaxed);
        }
        for (meter, value) in self.outs_peak.iter().zip(outs) {
            meter.store(value, Ordering::Relaxed);
        }
        let was_faulted = self.faulted.swap(faulted, Ordering::AcqRel);
        if faulted {
            self.faults.fetch_add(1, Ordering::AcqRel);
        }
        faulted && !was_faulted
    }

    pub(crate) fn reset(&self) {
        let _ = self.store([0.0; 2], [0.0; 2], false);
        self.faults.store(0, Ordering::Release);
    }

    pub fn snapshot(&self) -> PeakSnapshot {
        PeakSnapshot {
            ins: [
                self.ins_peak[0].load(Ordering::Relaxed),
                self.ins_peak[1].load(Ordering::Relaxed),
            ],
            outs: [
                self.outs_peak[0].load(Ordering::Relaxed),
                self.outs_peak[1].load(Ordering::Relaxed),
            ],
            faulted: self.faulted.load(Ordering::Acquire),
            fault_count: self.faults.load(Ordering::Acquire),
        }
    }
}

/// Peak of one block: `max(abs(sample))`.
#[inline]
pub fn block_peak(samples: &[f32]) -> f32 {
    samples.iter().fold(0.0f32, |peak, s| peak.max(s.abs()))
}

/// Stereo peak over the first two channels of a block.
#[inline]
pub(crate) fn stereo_peak(channels: &[Vec<f32>], count: u32, frames: usize) -> [f32; 2] {
    let mut peak = [0.0; 2];
    for (i, ch) in channels.iter().take(count.min(2) as usize).enumerate() {
        peak[i] = block_peak(&ch[..frames]);
    }
    peak
}
