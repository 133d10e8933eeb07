//! Start a transient service and optionally wait for it

use super::{teardown, RunError};
use crate::config::{RunConfig, StdioMode};
use crate::dbus::{BusSession, ZbusSession};
use crate::monitor::{
    exec_code_name, exit_code, CompletionMonitor, CompletionPolicy, UnitSnapshot, EXIT_SUCCESS,
};
use crate::pty::{OutputDrain, PtyForward};
use crate::request::encode_transient_service;
use crate::units::generate_unit_name;

/// What happened to the unit we started
#[derive(Debug)]
pub struct RunOutcome {
    pub unit: String,
    pub job: String,
    pub exit_code: i32,
    /// Final state, only when the unit was watched
    pub snapshot: Option<UnitSnapshot>,
}

/// Create the unit described by `config` and, if it asks for it, watch it
/// until it finishes.
pub async fn start_transient_service<B: BusSession>(
    bus: &mut B,
    config: &RunConfig,
    output: Option<&mut dyn OutputDrain>,
) -> Result<RunOutcome, RunError> {
    let unit = match &config.unit {
        Some(name) => name.clone(),
        None => generate_unit_name(bus.unique_name().as_deref())?,
    };

    let tty_path = output.as_ref().map(|o| o.tty_path().to_string());
    let call = encode_transient_service(config, &unit, tty_path.as_deref())?;

    let job = bus
        .start_transient_unit(&call)
        .await
        .map_err(RunError::Start)?;
    log::debug!("Queued job {} for {}", job.as_str(), unit);
    if !config.quiet {
        log::info!("Running as unit: {}", unit);
    }

    if !config.needs_monitor() {
        return Ok(RunOutcome {
            unit,
            job: job.to_string(),
            exit_code: EXIT_SUCCESS,
            snapshot: None,
        });
    }

    let policy = CompletionPolicy::transient(config.remain_after_exit);
    let mut monitor = CompletionMonitor::new(bus, &unit, policy);
    if let Some(output) = output {
        monitor = monitor.with_output(output);
    }
    let snapshot = monitor.wait().await?;

    let code = exit_code(&snapshot);
    if !config.quiet {
        log::info!(
            "Finished with result: {}",
            snapshot.result().unwrap_or("unknown")
        );
        if snapshot.exec_main_code() > 0 {
            log::info!(
                "Main processes terminated with: code={}, status={}",
                exec_code_name(snapshot.exec_main_code()),
                snapshot.exec_main_status()
            );
        }
    }

    Ok(RunOutcome {
        unit,
        job: job.to_string(),
        exit_code: code,
        snapshot: Some(snapshot),
    })
}

/// Connect, run, tear down. Returns the exit status for the process.
pub async fn run(config: &RunConfig) -> Result<i32, RunError> {
    let mut pty = match config.stdio {
        StdioMode::Pty => Some(PtyForward::open()?),
        _ => None,
    };

    let mut bus = ZbusSession::connect(config.bus).await?;
    let result = start_transient_service(
        &mut bus,
        config,
        pty.as_mut().map(|p| p as &mut dyn OutputDrain),
    )
    .await;
    teardown(bus).await;

    if let Some(pty) = pty {
        pty.finish(config.quiet);
    }

    Ok(result?.exit_code)
}
