//! Fixed-capacity event buffers.
//!
//! Events carry MIDI and parameter changes through the graph each block. The
//! storage is allocated once per buffer size and cleared, never freed, every
//! block. A full buffer drops further events and counts them.

use serde::{Deserialize, Serialize};

use crate::error::EventOverflow;

/// Events per buffer per block.
pub const MAX_EVENTS: usize = 512;

/// Kind of a control event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ControlEventKind {
    Parameter,
    MidiBank,
    MidiProgram,
    AllSoundOff,
    AllNotesOff,
}

/// Parameter change or MIDI control message in normalized form.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ControlEvent {
    pub kind: ControlEventKind,
    pub param: u16,
    pub value: f32,
}

/// Raw short MIDI message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MidiData {
    pub port: u8,
    pub size: u8,
    pub data: [u8; 4],
}

impl MidiData {
    pub fn bytes(&self) -> &[u8] {
        &self.data[..(self.size as usize).min(4)]
    }

    pub fn status(&self) -> u8 {
        self.data[0] & 0xF0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub enum EngineEventKind {
    #[default]
    Null,
    Control(ControlEvent),
    Midi(MidiData),
}

/// A timestamped event. `time` is the frame offset within the block.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct EngineEvent {
    pub time: u32,
    pub channel: u8,
    pub kind: EngineEventKind,
}

impl EngineEvent {
    pub fn note_on(time: u32, channel: u8, note: u8, velocity: u8) -> Self {
        Self::midi(time, channel, [0x90 | (channel & 0x0F), note, velocity])
    }

    pub fn note_off(time: u32, channel: u8, note: u8) -> Self {
        Self::midi(time, channel, [0x80 | (channel & 0x0F), note, 0])
    }

    pub fn parameter(time: u32, param: u16, value: f32) -> Self {
        Self {
            time,
            channel: 0,
            kind: EngineEventKind::Control(ControlEvent {
                kind: ControlEventKind::Parameter,
                param,
                value,
            }),
        }
    }

    fn midi(time: u32, channel: u8, bytes: [u8; 3]) -> Self {
        Self {
            time,
            channel,
            kind: EngineEventKind::Midi(MidiData {
                port: 0,
                size: 3,
                data: [bytes[0], bytes[1], bytes[2], 0],
            }),
        }
    }
}

/// Pre-allocated event array plus count.
#[derive(Debug, Clone)]
pub struct EventBuffer {
    events: Box<[EngineEvent]>,
    len: usize,
    dropped: u64,
}

impl EventBuffer {
    pub fn new() -> Self {
        Self::with_capacity(MAX_EVENTS)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            events: vec![EngineEvent::default(); capacity].into_boxed_slice(),
            len: 0,
            dropped: 0,
        }
    }

    /// Reset the count. Storage is kept.
    #[inline]
    pub fn clear(&mut self) {
        self.len = 0;
    }

    /// Append an event. Producers push in non-decreasing `time` order; the
    /// buffer does not sort.
    #[inline]
    pub fn push(&mut self, event: EngineEvent) -> Result<(), EventOverflow> {
        match self.events.get_mut(self.len) {
            Some(slot) => {
                *slot = event;
                self.len += 1;
                Ok(())
            }
            None => {
                self.dropped += 1;
                Err(EventOverflow {
                    capacity: self.events.len(),
                })
            }
        }
    }

    /// Copy every event of `other`, dropping what does not fit.
    pub fn extend_from(&mut self, other: &EventBuffer) {
        for (i, event) in other.iter().enumerate() {
            if self.push(*event).is_err() {
                self.dropped += (other.len() - i - 1) as u64;
                break;
            }
        }
    }

    /// Merge the time-ordered events of `other` into this time-ordered
    /// buffer. Stable: on equal times existing events come first. When the
    /// result does not fit, the latest events are dropped and counted.
    pub fn merge_from(&mut self, other: &EventBuffer) {
        let capacity = self.events.len();
        let mut mine = self.len;
        let mut theirs = other.len();
        let mut write = mine + theirs;
        self.len = write.min(capacity);

        // fill from the back so unread events are never overwritten
        while theirs > 0 {
            write -= 1;
            let take_theirs =
                mine == 0 || other.events[theirs - 1].time >= self.events[mine - 1].time;
            let event = if take_theirs {
                theirs -= 1;
                other.events[theirs]
            } else {
                mine -= 1;
                self.events[mine]
            };
            match self.events.get_mut(write) {
                Some(slot) => *slot = event,
                None => self.dropped += 1,
            }
        }
    }

    #[inline]
    pub fn iter(&self) -> std::slice::Iter<'_, EngineEvent> {
        self.events[..self.len].iter()
    }

    #[inline]
    pub fn as_slice(&self) -> &[EngineEvent] {
        &self.events[..self.len]
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity(&self) -> usize {
        self.events.len()
    }

    /// Total events dropped since creation.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Dropped count since the last call.
    pub fn take_dropped(&mut self) -> u64 {
        std::mem::take(&mut self.dropped)
    }
}

impl Default for EventBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a> IntoIterator for &'a EventBuffer {
    type Item = &'a EngineEvent;
    type IntoIter = std::slice::Iter<'a, EngineEvent>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Inbound (host to plugins) and outbound (plugins to host) buffers.
#[derive(Debug, Clone, Default)]
pub struct EngineEvents {
    pub input: EventBuffer,
    pub output: EventBuffer,
}

impl EngineEvents {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.input.clear();
        self.output.clear();
    }
}
