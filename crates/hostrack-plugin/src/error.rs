//! Error types for the plugin bridge

use thiserror::Error;

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Failed to encode bridge message: {0}")]
    Encode(#[source] bincode::Error),

    #[error("Failed to decode bridge message: {0}")]
    Decode(#[source] bincode::Error),

    #[error("Bridge disconnected: {0}")]
    Disconnected(&'static str),

    #[error("Bridged plugin error: {0}")]
    Plugin(String),

    #[error("Failed to spawn bridge thread: {0}")]
    ThreadSpawn(#[source] std::io::Error),
}

pub type Result<T> = std::result::Result<T, BridgeError>;

impl From<BridgeError> for hostrack_core::Error {
    fn from(e: BridgeError) -> Self {
        hostrack_core::Error::PluginCreation(e.to_string())
    }
}
