//! Centralized error type for the hostrack umbrella crate.
//!
//! Wraps the subsystem errors so `?` propagates naturally across crate boundaries.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Core(#[from] hostrack_core::Error),

    #[error("Plugin: {0}")]
    Plugin(#[from] hostrack_plugin::BridgeError),
}

pub type Result<T> = std::result::Result<T, Error>;
