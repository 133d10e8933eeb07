//! Signal the processes of a running unit

use std::str::FromStr;

use nix::sys::signal::Signal;

use super::{teardown, RunError};
use crate::config::BusScope;
use crate::dbus::{unit_object_path, BusSession, ZbusSession};
use crate::monitor::{ActiveState, CompletionPolicy, UnitSnapshot};

/// Accepts `TERM`, `SIGTERM` or `15`
pub fn parse_signal(s: &str) -> Result<Signal, RunError> {
    let invalid = || RunError::InvalidSignal(s.to_string());
    if let Ok(n) = s.parse::<i32>() {
        return Signal::try_from(n).map_err(|_| invalid());
    }
    let upper = s.to_ascii_uppercase();
    let name = if upper.starts_with("SIG") {
        upper
    } else {
        format!("SIG{}", upper)
    };
    Signal::from_str(&name).map_err(|_| invalid())
}

/// Send `signal` to every process of `unit` if it is active.
/// Returns whether anything was signalled.
pub async fn signal_unit<B: BusSession>(
    bus: &mut B,
    unit: &str,
    signal: Signal,
) -> Result<bool, RunError> {
    let mut snapshot = UnitSnapshot::new(CompletionPolicy::existing_unit());
    snapshot.apply_map(&bus.get_all_properties(&unit_object_path(unit)).await?)?;

    if snapshot.active() != Some(ActiveState::Active) {
        log::info!(
            "Unit {} is {}, not signalling",
            unit,
            snapshot.active_state().unwrap_or("unknown")
        );
        return Ok(false);
    }

    bus.kill_unit(unit, "all", signal as i32).await?;
    log::info!("Sent {} to {}", signal.as_str(), unit);
    Ok(true)
}

pub async fn kill(unit: &str, signal: Signal, scope: BusScope) -> Result<bool, RunError> {
    let mut bus = ZbusSession::connect(scope).await?;
    let result = signal_unit(&mut bus, unit, signal).await;
    teardown(bus).await;
    result
}
