//! Transport position and play state.
//!
//! The audio thread owns the clock. Control-plane callers send commands
//! through a bounded channel that is drained at the start of every block, and
//! read the published position through atomics.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::LastError;
use crate::{Error, Result};

const TRANSPORT_QUEUE_CAPACITY: usize = 64;

/// Transport snapshot handed to plugins each block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TimeInfo {
    pub playing: bool,
    /// Position in frames. Non-decreasing while playing.
    pub frame: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportCommand {
    Play,
    Stop,
    /// Seek to an absolute frame.
    Locate(u64),
}

#[derive(Debug, Default)]
struct PublishedTime {
    playing: AtomicBool,
    frame: AtomicU64,
}

/// Control handle for the transport. Cheap to clone.
#[derive(Debug, Clone)]
pub struct Transport {
    command_tx: Sender<TransportCommand>,
    published: Arc<PublishedTime>,
    last_error: LastError,
}

impl Transport {
    pub fn play(&self) -> Result<()> {
        self.send(TransportCommand::Play)
    }

    pub fn stop(&self) -> Result<()> {
        self.send(TransportCommand::Stop)
    }

    pub fn locate(&self, frame: u64) -> Result<()> {
        self.send(TransportCommand::Locate(frame))
    }

    /// Last position published by the audio thread. Fields may be torn
    /// across a block boundary.
    pub fn time_info(&self) -> TimeInfo {
        TimeInfo {
            playing: self.published.playing.load(Ordering::Acquire),
            frame: self.published.frame.load(Ordering::Acquire),
        }
    }

    pub fn is_playing(&self) -> bool {
        self.published.playing.load(Ordering::Acquire)
    }

    fn send(&self, command: TransportCommand) -> Result<()> {
        let error = match self.command_tx.try_send(command) {
            Ok(()) => return Ok(()),
            Err(TrySendError::Full(_)) => Error::TransportQueueFull,
            Err(TrySendError::Disconnected(_)) => Error::AboutToClose,
        };
        warn!(command = ?command, error = %error, "Transport command rejected");
        self.last_error.record(&error);
        Err(error)
    }
}

/// Audio-thread side of the transport.
#[derive(Debug)]
pub(crate) struct TransportClock {
    command_rx: Receiver<TransportCommand>,
    published: Arc<PublishedTime>,
    info: TimeInfo,
}

impl TransportClock {
    /// Apply pending commands (call from audio thread, at block start).
    pub fn process_commands(&mut self) {
        let mut changed = false;
        while let Ok(command) = self.command_rx.try_recv() {
            match command {
                TransportCommand::Play => self.info.playing = true,
                TransportCommand::Stop => self.info.playing = false,
                TransportCommand::Locate(frame) => self.info.frame = frame,
            }
            changed = true;
        }
        if changed {
            self.publish();
        }
    }

    #[inline]
    pub fn current(&self) -> TimeInfo {
        self.info
    }

    /// Move the clock past a processed block.
    pub fn advance(&mut self, frames: u32) {
        if self.info.playing {
            self.info.frame = self.info.frame.saturating_add(u64::from(frames));
            self.publish();
        }
    }

    fn publish(&self) {
        self.published
            .playing
            .store(self.info.playing, Ordering::Release);
        self.published.frame.store(self.info.frame, Ordering::Release);
    }
}

pub(crate) fn transport(last_error: LastError) -> (Transport, TransportClock) {
    let (command_tx, command_rx) = bounded(TRANSPORT_QUEUE_CAPACITY);
    let published = Arc::new(PublishedTime::default());
    (
        Transport {
            command_tx,
            published: Arc::clone(&published),
            last_error,
        },
        TransportClock {
            command_rx,
            published,
            info: TimeInfo::default(),
        },
    )
}
