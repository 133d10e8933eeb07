//! org.freedesktop.systemd1.Manager client side
//!
//! The subset of manager methods this crate calls:
//! - StartTransientUnit: create and start the unit
//! - Subscribe: ask for unit change signals on units we did not create
//! - KillUnit: signal a unit's processes
//! - ListUnitsByPatterns: enumerate units

use serde::Deserialize;
use zbus::proxy;
use zbus::zvariant::{OwnedObjectPath, OwnedValue, Type};

pub const SYSTEMD_SERVICE: &str = "org.freedesktop.systemd1";
pub const PROPERTIES_INTERFACE: &str = "org.freedesktop.DBus.Properties";

#[proxy(
    interface = "org.freedesktop.systemd1.Manager",
    default_service = "org.freedesktop.systemd1",
    default_path = "/org/freedesktop/systemd1"
)]
pub trait SystemdManager {
    /// Returns the job object path
    fn start_transient_unit(
        &self,
        name: &str,
        mode: &str,
        properties: &[(String, OwnedValue)],
        aux: &[(String, Vec<(String, OwnedValue)>)],
    ) -> zbus::Result<OwnedObjectPath>;

    fn subscribe(&self) -> zbus::Result<()>;

    /// whom: "main", "control" or "all"
    fn kill_unit(&self, name: &str, whom: &str, signal: i32) -> zbus::Result<()>;

    fn list_units_by_patterns(
        &self,
        states: &[&str],
        patterns: &[&str],
    ) -> zbus::Result<Vec<ListedUnit>>;
}

/// One row of ListUnitsByPatterns, `(ssssssouso)`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Type)]
pub struct ListedUnit {
    pub name: String,
    pub description: String,
    pub load_state: String,
    pub active_state: String,
    pub sub_state: String,
    /// Unit this one follows in state, empty if none
    pub following: String,
    pub path: OwnedObjectPath,
    pub job_id: u32,
    pub job_type: String,
    pub job_path: OwnedObjectPath,
}

impl ListedUnit {
    pub fn has_job(&self) -> bool {
        self.job_id != 0
    }
}
