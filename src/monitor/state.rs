//! Client-side view of a unit's state
//!
//! ```text
//!   GetAll ─────────┐
//!                   ▼
//!   PropertiesChanged ──► apply() ──► stage ──► commit ──► recompute done
//!                                       │
//!                                       └─ type mismatch: nothing committed
//! ```
//!
//! `done` is derived, never set directly, and once true stays true.

use std::collections::HashMap;

use zbus::zvariant::{OwnedValue, Value};

use crate::dbus::is_no_job;

/// High-level unit state (systemd's ActiveState)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActiveState {
    Inactive,
    Activating,
    Active,
    Reloading,
    Deactivating,
    Failed,
}

impl ActiveState {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "inactive" => Some(Self::Inactive),
            "activating" => Some(Self::Activating),
            "active" => Some(Self::Active),
            "reloading" => Some(Self::Reloading),
            "deactivating" => Some(Self::Deactivating),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Inactive => "inactive",
            Self::Activating => "activating",
            Self::Active => "active",
            Self::Reloading => "reloading",
            Self::Deactivating => "deactivating",
            Self::Failed => "failed",
        }
    }

    /// Nothing left running; the unit may still have a job queued
    pub fn is_settled(&self) -> bool {
        matches!(self, Self::Inactive | Self::Failed)
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Property {field} has type {found}, expected {expected}")]
    TypeMismatch {
        field: String,
        expected: &'static str,
        found: String,
    },
}

/// When a unit counts as finished
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompletionPolicy {
    /// A queued job keeps the unit from being done
    pub track_jobs: bool,
    /// A non-zero main-process exit timestamp is enough on its own
    pub exit_timestamp_done: bool,
}

impl CompletionPolicy {
    /// Units we created ourselves
    pub fn transient(remain_after_exit: bool) -> Self {
        Self {
            track_jobs: true,
            exit_timestamp_done: remain_after_exit,
        }
    }

    /// Units started by someone else
    pub fn existing_unit() -> Self {
        Self {
            track_jobs: false,
            exit_timestamp_done: true,
        }
    }
}

impl Default for CompletionPolicy {
    fn default() -> Self {
        Self::transient(false)
    }
}

/// A decoded property value, staged until the whole batch decodes
#[derive(Debug, Clone, PartialEq)]
enum FieldUpdate {
    ActiveState(String),
    LoadState(String),
    Result(String),
    ExecMainCode(i32),
    ExecMainStatus(i32),
    ExecMainExitTimestamp(u64),
    Job { id: u32, path: String },
}

fn mismatch(field: &str, expected: &'static str, found: &Value<'_>) -> DecodeError {
    DecodeError::TypeMismatch {
        field: field.to_string(),
        expected,
        found: found.value_signature().to_string(),
    }
}

fn expect_str(field: &str, value: &Value<'_>) -> Result<String, DecodeError> {
    match value {
        Value::Str(s) => Ok(s.as_str().to_string()),
        other => Err(mismatch(field, "s", other)),
    }
}

fn expect_i32(field: &str, value: &Value<'_>) -> Result<i32, DecodeError> {
    match value {
        Value::I32(v) => Ok(*v),
        other => Err(mismatch(field, "i", other)),
    }
}

/// Decode one property. Returns `None` for names we don't track.
fn decode_field(field: &str, value: &Value<'_>) -> Result<Option<FieldUpdate>, DecodeError> {
    let update = match field {
        "ActiveState" => FieldUpdate::ActiveState(expect_str(field, value)?),
        "LoadState" => FieldUpdate::LoadState(expect_str(field, value)?),
        "Result" => FieldUpdate::Result(expect_str(field, value)?),
        "ExecMainCode" => FieldUpdate::ExecMainCode(expect_i32(field, value)?),
        "ExecMainStatus" => FieldUpdate::ExecMainStatus(expect_i32(field, value)?),
        "ExecMainExitTimestamp" => match value {
            Value::U64(ts) => FieldUpdate::ExecMainExitTimestamp(*ts),
            other => return Err(mismatch(field, "t", other)),
        },
        "Job" => match value {
            Value::Structure(s) => match s.fields() {
                [Value::U32(id), Value::ObjectPath(path)] => FieldUpdate::Job {
                    id: *id,
                    path: path.as_str().to_string(),
                },
                _ => return Err(mismatch(field, "(uo)", value)),
            },
            other => return Err(mismatch(field, "(uo)", other)),
        },
        _ => return Ok(None),
    };
    Ok(Some(update))
}

/// What we know about the watched unit
#[derive(Debug, Clone, PartialEq)]
pub struct UnitSnapshot {
    policy: CompletionPolicy,
    active_state: Option<String>,
    load_state: Option<String>,
    result: Option<String>,
    exec_main_code: i32,
    exec_main_status: i32,
    exec_main_exit_timestamp: u64,
    has_job: bool,
    subscribed: bool,
    output_flushed: bool,
    done: bool,
}

impl Default for UnitSnapshot {
    fn default() -> Self {
        Self::new(CompletionPolicy::default())
    }
}

impl UnitSnapshot {
    pub fn new(policy: CompletionPolicy) -> Self {
        Self {
            policy,
            active_state: None,
            load_state: None,
            result: None,
            exec_main_code: 0,
            exec_main_status: 0,
            exec_main_exit_timestamp: 0,
            has_job: false,
            subscribed: false,
            output_flushed: true,
            done: false,
        }
    }

    pub fn active_state(&self) -> Option<&str> {
        self.active_state.as_deref()
    }

    pub fn active(&self) -> Option<ActiveState> {
        self.active_state.as_deref().and_then(ActiveState::parse)
    }

    pub fn load_state(&self) -> Option<&str> {
        self.load_state.as_deref()
    }

    pub fn result(&self) -> Option<&str> {
        self.result.as_deref()
    }

    pub fn exec_main_code(&self) -> i32 {
        self.exec_main_code
    }

    pub fn exec_main_status(&self) -> i32 {
        self.exec_main_status
    }

    pub fn exec_main_exit_timestamp(&self) -> u64 {
        self.exec_main_exit_timestamp
    }

    pub fn has_job(&self) -> bool {
        self.has_job
    }

    pub fn is_subscribed(&self) -> bool {
        self.subscribed
    }

    /// Before a subscription is armed nothing can tell us about later
    /// changes, so the unit reads as finished without latching it.
    pub fn is_done(&self) -> bool {
        self.done || (!self.subscribed && self.output_flushed)
    }

    /// The unit was loaded from nowhere and isn't running
    pub fn is_missing(&self) -> bool {
        self.load_state() == Some("not-found") && self.active() == Some(ActiveState::Inactive)
    }

    /// Record that a change subscription is armed
    pub fn mark_subscribed(&mut self) {
        self.subscribed = true;
        self.recompute();
    }

    /// An output forwarder must be drained before we can be done
    pub fn attach_output(&mut self) {
        self.output_flushed = false;
        self.recompute();
    }

    /// Apply a batch of changed properties.
    ///
    /// Unknown names are ignored. If any tracked value has the wrong type
    /// the snapshot is left untouched.
    pub fn apply<'a, 'v: 'a, I>(&mut self, changes: I) -> Result<(), DecodeError>
    where
        I: IntoIterator<Item = (&'a str, &'a Value<'v>)>,
    {
        let mut staged = Vec::new();
        for (name, value) in changes {
            if let Some(update) = decode_field(name, value)? {
                staged.push(update);
            }
        }
        for update in staged {
            self.commit(update);
        }
        self.recompute();
        Ok(())
    }

    /// [`apply`](Self::apply) for a GetAll reply or a signal body
    pub fn apply_map(&mut self, changes: &HashMap<String, OwnedValue>) -> Result<(), DecodeError> {
        self.apply(changes.iter().map(|(k, v)| (k.as_str(), &**v)))
    }

    fn commit(&mut self, update: FieldUpdate) {
        match update {
            FieldUpdate::ActiveState(state) => {
                if self.active_state.as_deref() != Some(state.as_str()) {
                    log::debug!("ActiveState = {}", state);
                }
                self.active_state = Some(state);
            }
            FieldUpdate::LoadState(state) => self.load_state = Some(state),
            FieldUpdate::Result(result) => {
                if self.result.as_deref() != Some(result.as_str()) {
                    log::debug!("Result = {}", result);
                }
                self.result = Some(result);
            }
            FieldUpdate::ExecMainCode(code) => self.exec_main_code = code,
            FieldUpdate::ExecMainStatus(status) => self.exec_main_status = status,
            FieldUpdate::ExecMainExitTimestamp(ts) => self.exec_main_exit_timestamp = ts,
            FieldUpdate::Job { id, path } => {
                let has_job = !is_no_job(id, &path);
                if has_job != self.has_job {
                    log::debug!("Job = {} {}", id, path);
                }
                self.has_job = has_job;
            }
        }
    }

    /// Whether the unit itself has finished, ignoring output
    pub fn unit_finished(&self) -> bool {
        if !self.subscribed {
            return true;
        }
        let settled = self.active().is_some_and(|s| s.is_settled())
            && !(self.policy.track_jobs && self.has_job);
        let exited = self.policy.exit_timestamp_done && self.exec_main_exit_timestamp != 0;
        settled || exited
    }

    /// Consult the output forwarder, but only once the unit has finished
    pub fn gate_output(&mut self, drained: impl FnOnce() -> bool) {
        if !self.output_flushed && self.unit_finished() {
            self.output_flushed = drained();
        }
        self.recompute();
    }

    pub fn is_output_flushed(&self) -> bool {
        self.output_flushed
    }

    fn recompute(&mut self) {
        if self.done || !self.subscribed {
            return;
        }
        self.done = self.unit_finished() && self.output_flushed;
    }
}
