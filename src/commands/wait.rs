//! Wait for a unit someone else started

use super::{teardown, RunError};
use crate::config::WaitConfig;
use crate::dbus::{unit_object_path, BusSession, ZbusSession};
use crate::monitor::{exit_code, CompletionMonitor, CompletionPolicy, UnitSnapshot, EXIT_SUCCESS};

/// Block until `unit` stops or its main process exits, then map its
/// result like a unit we started ourselves. A unit that isn't loaded
/// counts as success.
pub async fn wait_for_unit<B: BusSession>(bus: &mut B, unit: &str) -> Result<i32, RunError> {
    let policy = CompletionPolicy::existing_unit();

    let mut current = UnitSnapshot::new(policy);
    current.apply_map(&bus.get_all_properties(&unit_object_path(unit)).await?)?;
    if current.is_missing() {
        log::info!("Unit {} not running", unit);
        return Ok(EXIT_SUCCESS);
    }

    // the manager only emits unit signals to subscribed clients
    bus.subscribe_manager().await?;

    let snapshot = CompletionMonitor::new(bus, unit, policy).wait().await?;
    log::info!(
        "Unit {} finished with result: {}",
        unit,
        snapshot.result().unwrap_or("unknown")
    );
    Ok(exit_code(&snapshot))
}

pub async fn wait(config: &WaitConfig) -> Result<i32, RunError> {
    let mut bus = ZbusSession::connect(config.bus).await?;
    let result = wait_for_unit(&mut bus, &config.unit).await;
    teardown(bus).await;
    result
}
