//! Completion monitor
//!
//! Watches one unit until its state says it is finished:
//!
//! ```text
//!   arm:   subscribe(path) ──► GetAll(path) ──► seed snapshot ──► mark subscribed
//!
//!   loop while !done:
//!       poll_state ──► wait(bound) ──► drain_pending until 0 ──► apply deltas
//!                         │                                         │
//!                         └─ timeout: nothing to drain              ▼
//!                                                             output gate
//! ```
//!
//! The match is registered before the fetch so a transition between the
//! two can't be lost. Deltas that repeat what GetAll returned are simply
//! applied again.

pub mod outcome;
pub mod state;

pub use outcome::{
    exec_code_name, exit_code, exit_code_for, EXIT_EXCEPTION, EXIT_FAILURE, EXIT_SUCCESS,
};
pub use state::{ActiveState, CompletionPolicy, DecodeError, UnitSnapshot};

use std::time::Duration;

use crate::dbus::{unit_object_path, BusError, BusSession, PropertiesChanged, SubscriptionId, WaitBound};
use crate::pty::OutputDrain;

/// How often to re-check the output forwarder once the unit has finished.
/// Flushing isn't signalled over the bus.
const OUTPUT_POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, thiserror::Error)]
pub enum MonitorError {
    #[error(transparent)]
    Bus(#[from] BusError),

    #[error("Failed to decode unit properties: {0}")]
    Decode(#[from] DecodeError),
}

/// Owns the bus session for the duration of one wait
pub struct CompletionMonitor<'b, 'o, B: BusSession> {
    bus: &'b mut B,
    unit: String,
    path: String,
    snapshot: UnitSnapshot,
    output: Option<&'o mut dyn OutputDrain>,
    subscription: Option<SubscriptionId>,
    pending: Vec<PropertiesChanged>,
}

impl<'b, 'o, B: BusSession> CompletionMonitor<'b, 'o, B> {
    pub fn new(bus: &'b mut B, unit: &str, policy: CompletionPolicy) -> Self {
        Self {
            bus,
            unit: unit.to_string(),
            path: unit_object_path(unit),
            snapshot: UnitSnapshot::new(policy),
            output: None,
            subscription: None,
            pending: Vec::new(),
        }
    }

    /// Hold completion until `output` has forwarded everything
    pub fn with_output(mut self, output: &'o mut dyn OutputDrain) -> Self {
        self.snapshot.attach_output();
        self.output = Some(output);
        self
    }

    pub fn snapshot(&self) -> &UnitSnapshot {
        &self.snapshot
    }

    /// Subscribe to changes and seed the snapshot with a full fetch
    pub async fn arm(&mut self) -> Result<(), MonitorError> {
        let id = self.bus.subscribe_properties(&self.path).await?;
        self.subscription = Some(id);

        let properties = self.bus.get_all_properties(&self.path).await?;
        self.snapshot.apply_map(&properties)?;
        self.snapshot.mark_subscribed();
        log::debug!(
            "Watching {} (ActiveState={}, job pending: {})",
            self.unit,
            self.snapshot.active_state().unwrap_or("unknown"),
            self.snapshot.has_job()
        );
        Ok(())
    }

    /// Arm and run until the unit is done
    pub async fn wait(mut self) -> Result<UnitSnapshot, MonitorError> {
        self.arm().await?;
        while !self.snapshot.is_done() {
            self.step().await?;
        }
        log::debug!("{}", outcome::describe(&self.unit, &self.snapshot));
        Ok(self.snapshot)
    }

    /// One block-then-drain iteration
    pub async fn step(&mut self) -> Result<(), MonitorError> {
        let mut bound = self.bus.poll_state().wait_bound();
        if self.output.is_some() && self.snapshot.unit_finished() {
            bound = bound.min(WaitBound::Millis(OUTPUT_POLL_INTERVAL.as_millis() as u32));
        }

        let ready = match bound {
            WaitBound::Now => true,
            WaitBound::Millis(_) => self.bus.wait(bound.as_duration()).await?,
        };

        if ready {
            self.drain().await?;
        } else {
            log::trace!("Bus wait timed out after {:?}", bound.as_duration());
        }

        if let Some(output) = self.output.as_deref_mut() {
            self.snapshot.gate_output(|| output.drain());
        }
        Ok(())
    }

    async fn drain(&mut self) -> Result<(), MonitorError> {
        while self.bus.drain_pending(&mut self.pending).await? > 0 {}

        for signal in self.pending.drain(..) {
            if Some(signal.subscription) != self.subscription || signal.path != self.path {
                continue;
            }
            log::trace!(
                "PropertiesChanged on {} ({}): {} changed",
                signal.path,
                signal.interface,
                signal.changed.len()
            );
            self.snapshot.apply_map(&signal.changed)?;
        }
        Ok(())
    }
}
