//! Engine notifications for the control plane.
//!
//! Sent with `try_send` on a bounded channel from both the audio thread and
//! control-plane callers; if the receiver lags, notifications are dropped.

use crossbeam_channel::{bounded, Receiver, Sender};

use crate::plugin::PluginId;
use crate::routing::ConnectionId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PluginFaultKind {
    /// `process` returned an error.
    ProcessFailed,
    /// The plugin wrote NaN or infinity.
    NonFinite,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EngineNotification {
    EngineStarted,
    EngineStopped,
    BufferSizeChanged(u32),
    SampleRateChanged(f64),
    PluginAdded { id: PluginId, name: String },
    PluginRemoved { id: PluginId },
    PluginsSwitched { a: PluginId, b: PluginId },
    AllPluginsRemoved,
    PluginFault { id: PluginId, kind: PluginFaultKind },
    ConnectionAdded { id: ConnectionId },
    ConnectionRemoved { id: ConnectionId },
}

#[derive(Debug, Clone)]
pub(crate) struct Notifier {
    tx: Sender<EngineNotification>,
    rx: Receiver<EngineNotification>,
}

impl Notifier {
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = bounded(capacity.max(1));
        Self { tx, rx }
    }

    #[inline]
    pub fn notify(&self, notification: EngineNotification) {
        let _ = self.tx.try_send(notification);
    }

    pub fn receiver(&self) -> Receiver<EngineNotification> {
        self.rx.clone()
    }
}
