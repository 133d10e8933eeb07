//! Command entry points
//!
//! Each command has a generic half that works on any [`BusSession`] and a
//! thin wrapper that connects, runs it and tears the connection down.

mod kill;
mod list;
mod run;
mod wait;

pub use kill::{kill, parse_signal, signal_unit};
pub use list::{list, list_units, DEFAULT_LIST_PATTERN};
pub use run::{run, start_transient_service, RunOutcome};
pub use wait::{wait, wait_for_unit};

use crate::config::ConfigError;
use crate::dbus::{BusError, BusSession};
use crate::monitor::{DecodeError, MonitorError};
use crate::pty::PtyError;
use crate::request::EncodeError;
use crate::units::NameError;

#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Failed to pick a unit name: {0}")]
    UnitName(#[from] NameError),

    #[error("Failed to build transient unit: {0}")]
    Encode(#[from] EncodeError),

    #[error("Failed to start transient service unit: {0}")]
    Start(#[source] BusError),

    #[error(transparent)]
    Bus(#[from] BusError),

    #[error(transparent)]
    Monitor(#[from] MonitorError),

    #[error("Failed to decode unit properties: {0}")]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Pty(#[from] PtyError),

    #[error("Invalid signal: {0}")]
    InvalidSignal(String),
}

/// Close the session, logging instead of masking the command's own result
async fn teardown<B: BusSession>(bus: B) {
    if let Err(e) = bus.close().await {
        log::warn!("Failed to close bus connection: {}", e);
    }
}
