//! List units by name pattern

use super::{teardown, RunError};
use crate::config::BusScope;
use crate::dbus::{BusSession, ListedUnit, ZbusSession};

/// Units created by the run command without an explicit name
pub const DEFAULT_LIST_PATTERN: &str = "run-*";

pub async fn list_units<B: BusSession>(
    bus: &mut B,
    patterns: &[String],
) -> Result<Vec<ListedUnit>, RunError> {
    let patterns: Vec<&str> = if patterns.is_empty() {
        vec![DEFAULT_LIST_PATTERN]
    } else {
        patterns.iter().map(String::as_str).collect()
    };
    let mut units = bus.list_units(&[], &patterns).await?;
    units.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(units)
}

pub async fn list(patterns: &[String], scope: BusScope) -> Result<Vec<ListedUnit>, RunError> {
    let mut bus = ZbusSession::connect(scope).await?;
    let result = list_units(&mut bus, patterns).await;
    teardown(bus).await;
    result
}
