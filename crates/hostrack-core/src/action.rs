//! Action rendezvous between control-plane callers and the audio thread.
//!
//! A single pending-action record guarded by a gate. A requester acquires the
//! gate with [`ScopedActionLock`], installs one [`PostAction`], and blocks on
//! a condition variable until the audio thread has applied it at a block
//! boundary and posted an [`ActionOutcome`]. A second requester waits for the
//! gate before it can install anything, so at most one action is in flight.
//!
//! The audio thread never blocks here: it reads an atomic opcode (one
//! comparison when idle) and only ever `try_lock`s the record, retrying on
//! the next block if a requester happens to hold it.

use std::sync::atomic::{AtomicU8, Ordering};

use parking_lot::{Condvar, Mutex};

use crate::plugin::PluginId;
use crate::routing::{Connection, ConnectionId};
use crate::slots::PluginSlot;
use crate::Error;

/// Opcode of the pending action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PostActionKind {
    None = 0,
    ZeroPluginCount = 1,
    RemovePlugin = 2,
    SwitchPlugins = 3,
    AddPlugin = 4,
    Connect = 5,
    Disconnect = 6,
    Reclaim = 7,
}

impl PostActionKind {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::ZeroPluginCount,
            2 => Self::RemovePlugin,
            3 => Self::SwitchPlugins,
            4 => Self::AddPlugin,
            5 => Self::Connect,
            6 => Self::Disconnect,
            7 => Self::Reclaim,
            _ => Self::None,
        }
    }
}

/// A structural mutation applied by the audio thread between blocks.
///
/// Payloads are moved, never boxed, so applying an action on the audio
/// thread neither allocates nor frees.
#[derive(Debug)]
#[allow(clippy::large_enum_variant)]
pub enum PostAction {
    /// Set the live count to zero; handles stay as stale entries.
    ZeroPluginCount,
    /// Remove a slot and shift the tail down.
    RemovePlugin(PluginId),
    /// Swap two slots in place.
    SwitchPlugins(PluginId, PluginId),
    /// Place a prepared slot at the next free index.
    AddPlugin(PluginSlot),
    Connect(Connection),
    Disconnect(ConnectionId),
    /// Move stale handles into the given vector (capacity is pre-reserved).
    Reclaim(Vec<PluginSlot>),
}

impl PostAction {
    pub fn kind(&self) -> PostActionKind {
        match self {
            Self::ZeroPluginCount => PostActionKind::ZeroPluginCount,
            Self::RemovePlugin(_) => PostActionKind::RemovePlugin,
            Self::SwitchPlugins(..) => PostActionKind::SwitchPlugins,
            Self::AddPlugin(_) => PostActionKind::AddPlugin,
            Self::Connect(_) => PostActionKind::Connect,
            Self::Disconnect(_) => PostActionKind::Disconnect,
            Self::Reclaim(_) => PostActionKind::Reclaim,
        }
    }
}

/// Result handed back to the requester once the gate opens.
#[derive(Debug)]
#[allow(clippy::large_enum_variant)]
pub enum ActionOutcome {
    Done,
    /// Ownership of the removed slot returns to the requester.
    Removed(PluginSlot),
    Added {
        id: PluginId,
        /// Stale handle that occupied the index, to be dropped off the audio thread.
        displaced: Option<PluginSlot>,
    },
    Reclaimed(Vec<PluginSlot>),
    Failed(Error),
    /// The action could not be applied; its payload comes back for disposal.
    Rejected {
        error: Error,
        slot: Option<PluginSlot>,
    },
}

#[derive(Debug, Default)]
pub(crate) struct ActionRecord {
    /// A requester owns the record (gate closed).
    busy: bool,
    request: Option<PostAction>,
    outcome: Option<ActionOutcome>,
}

/// The pending-action record plus its gate.
#[derive(Debug, Default)]
pub struct NextAction {
    opcode: AtomicU8,
    record: Mutex<ActionRecord>,
    gate: Condvar,
}

impl NextAction {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opcode currently installed, `None` when idle.
    #[inline]
    pub fn pending(&self) -> PostActionKind {
        PostActionKind::from_u8(self.opcode.load(Ordering::Acquire))
    }

    /// No requester holds the gate and nothing is installed.
    pub fn is_idle(&self) -> bool {
        let record = self.record.lock();
        !record.busy && record.request.is_none() && record.outcome.is_none()
    }

    /// Take the pending action (audio thread, block start). Returns `None`
    /// without blocking when nothing is pending or the record is contended;
    /// `offline` allows a blocking lock.
    #[inline]
    pub(crate) fn take(&self, offline: bool) -> Option<PostAction> {
        if self.opcode.load(Ordering::Acquire) == PostActionKind::None as u8 {
            return None;
        }
        let mut record = if offline {
            self.record.lock()
        } else {
            self.record.try_lock()?
        };
        let action = record.request.take();
        self.opcode
            .store(PostActionKind::None as u8, Ordering::Release);
        action
    }

    /// Post the outcome and open the gate. Gives the outcome back if the
    /// record is contended so the caller can retry next block.
    pub(crate) fn try_complete(&self, outcome: ActionOutcome) -> Result<(), ActionOutcome> {
        let Some(mut record) = self.record.try_lock() else {
            return Err(outcome);
        };
        record.outcome = Some(outcome);
        drop(record);
        self.gate.notify_all();
        Ok(())
    }

    /// Blocking variant, for contexts that are not real-time.
    pub(crate) fn complete(&self, outcome: ActionOutcome) {
        self.record.lock().outcome = Some(outcome);
        self.gate.notify_all();
    }

    /// Hold the record the way a requester does between post and wait.
    #[cfg(test)]
    pub(crate) fn lock_record(&self) -> parking_lot::MutexGuard<'_, ActionRecord> {
        self.record.lock()
    }
}

/// Exclusive ownership of the pending-action record for one request.
///
/// Acquiring waits (blocking, not spinning) while another request is in
/// flight. Dropping the lock reopens the gate for the next requester.
pub struct ScopedActionLock<'a> {
    next: &'a NextAction,
}

impl<'a> ScopedActionLock<'a> {
    pub fn acquire(next: &'a NextAction) -> Self {
        let mut record = next.record.lock();
        while record.busy {
            next.gate.wait(&mut record);
        }
        debug_assert!(
            record.request.is_none() && record.outcome.is_none(),
            "pending action survived into the next request"
        );
        record.request = None;
        record.outcome = None;
        record.busy = true;
        Self { next }
    }

    /// Install the request for the audio thread.
    pub fn post(&self, action: PostAction) {
        let kind = action.kind();
        let mut record = self.next.record.lock();
        record.request = Some(action);
        self.next.opcode.store(kind as u8, Ordering::Release);
    }

    /// Block until the audio thread posts the outcome. No timeout: a stalled
    /// audio callback stalls the requester.
    pub fn wait(&self) -> ActionOutcome {
        let mut record = self.next.record.lock();
        loop {
            if let Some(outcome) = record.outcome.take() {
                return outcome;
            }
            self.next.gate.wait(&mut record);
        }
    }
}

impl Drop for ScopedActionLock<'_> {
    fn drop(&mut self) {
        let mut record = self.next.record.lock();
        debug_assert!(record.request.is_none(), "request left unconsumed");
        record.busy = false;
        record.request = None;
        record.outcome = None;
        drop(record);
        self.next.gate.notify_all();
    }
}
