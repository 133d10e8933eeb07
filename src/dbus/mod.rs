//! D-Bus client side of the service manager
//!
//! Everything the run and wait commands need from the bus goes through
//! [`BusSession`]. The production implementation is [`ZbusSession`]; tests
//! drive the monitor with a scripted session instead.
//!
//! ```text
//!   commands ──► BusSession ──► ZbusSession ──► org.freedesktop.systemd1
//!                    │
//!                    ├─ start_transient_unit   (Manager)
//!                    ├─ get_all_properties     (Properties.GetAll)
//!                    ├─ subscribe_properties   (PropertiesChanged match)
//!                    └─ poll_state / wait / drain_pending
//! ```

mod manager;
pub mod poll;
mod session;

pub use manager::{ListedUnit, SystemdManagerProxy, PROPERTIES_INTERFACE, SYSTEMD_SERVICE};
pub use poll::{PollState, WaitBound};
pub use session::ZbusSession;

use std::collections::HashMap;
use std::time::Duration;

use zbus::zvariant::{OwnedObjectPath, OwnedValue};

use crate::request::TransientUnitCall;

pub const UNIT_PATH_PREFIX: &str = "/org/freedesktop/systemd1/unit/";

/// Errors from the bus transport or from the remote side
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    /// The service manager answered with a D-Bus error reply
    #[error("{name}: {message}")]
    Remote { name: String, message: String },

    #[error("D-Bus transport error: {0}")]
    Transport(zbus::Error),

    #[error("Bus connection closed")]
    Disconnected,
}

impl From<zbus::Error> for BusError {
    fn from(err: zbus::Error) -> Self {
        use zbus::DBusError;

        match err {
            zbus::Error::MethodError(name, message, _) => BusError::Remote {
                name: name.to_string(),
                message: message.unwrap_or_default(),
            },
            zbus::Error::FDO(fdo) => BusError::Remote {
                name: fdo.name().to_string(),
                message: fdo.description().unwrap_or_default().to_string(),
            },
            zbus::Error::InputOutput(io)
                if matches!(
                    io.kind(),
                    std::io::ErrorKind::BrokenPipe
                        | std::io::ErrorKind::ConnectionReset
                        | std::io::ErrorKind::UnexpectedEof
                ) =>
            {
                BusError::Disconnected
            }
            other => BusError::Transport(other),
        }
    }
}

/// Handle for one registered signal match
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

/// A decoded org.freedesktop.DBus.Properties.PropertiesChanged signal
#[derive(Debug)]
pub struct PropertiesChanged {
    pub subscription: SubscriptionId,
    pub path: String,
    pub interface: String,
    pub changed: HashMap<String, OwnedValue>,
    pub invalidated: Vec<String>,
}

/// Operations the commands perform against the service manager.
///
/// Calls are made one at a time from a single task; implementations do not
/// need to be shareable.
#[allow(async_fn_in_trait)]
pub trait BusSession {
    /// Our unique connection name, e.g. `:1.42`
    fn unique_name(&self) -> Option<String>;

    /// Manager.StartTransientUnit; returns the job path
    async fn start_transient_unit(
        &mut self,
        call: &TransientUnitCall,
    ) -> Result<OwnedObjectPath, BusError>;

    /// Properties.GetAll with an empty interface name
    async fn get_all_properties(
        &mut self,
        path: &str,
    ) -> Result<HashMap<String, OwnedValue>, BusError>;

    /// Register a PropertiesChanged match scoped to `path`.
    ///
    /// The match stays active until the session is closed.
    async fn subscribe_properties(&mut self, path: &str) -> Result<SubscriptionId, BusError>;

    /// Manager.Subscribe, needed to get signals for units we did not start
    async fn subscribe_manager(&mut self) -> Result<(), BusError>;

    /// What the transport is currently waiting for
    fn poll_state(&self) -> PollState;

    /// Block until a message may be available or `timeout` passes.
    ///
    /// Returns false on timeout. A true return does not promise that a
    /// matched signal is queued.
    async fn wait(&mut self, timeout: Duration) -> Result<bool, BusError>;

    /// Move every already-received matched signal into `out` without
    /// blocking. Returns how many were moved.
    async fn drain_pending(&mut self, out: &mut Vec<PropertiesChanged>) -> Result<usize, BusError>;

    async fn kill_unit(&mut self, unit: &str, whom: &str, signal: i32) -> Result<(), BusError>;

    async fn list_units(
        &mut self,
        states: &[&str],
        patterns: &[&str],
    ) -> Result<Vec<ListedUnit>, BusError>;

    /// Drop all matches and release the connection
    async fn close(self) -> Result<(), BusError>
    where
        Self: Sized;
}

/// Convert a unit name to its D-Bus object path.
///
/// Every byte outside `[A-Za-z0-9]` becomes `_xx` in lowercase hex, so
/// `docker.service` maps to `.../unit/docker_2eservice`. An empty name
/// maps to `_`.
pub fn unit_object_path(unit: &str) -> String {
    let mut path = String::from(UNIT_PATH_PREFIX);
    if unit.is_empty() {
        path.push('_');
        return path;
    }
    for byte in unit.bytes() {
        if byte.is_ascii_alphanumeric() {
            path.push(byte as char);
        } else {
            path.push_str(&format!("_{:02x}", byte));
        }
    }
    path
}

/// A job path of "/" together with id 0 means no job is queued
pub fn is_no_job(id: u32, path: &str) -> bool {
    id == 0 && path == "/"
}
