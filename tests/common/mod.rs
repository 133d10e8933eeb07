//! Scripted bus session shared by the integration tests

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use sysrun::dbus::{
    BusError, BusSession, ListedUnit, PollState, PropertiesChanged, SubscriptionId,
};
use sysrun::request::TransientUnitCall;
use zbus::zvariant::{ObjectPath, OwnedObjectPath, OwnedValue, Value};

pub const UNIT_INTERFACE: &str = "org.freedesktop.systemd1.Unit";

/// What the next `wait` call does
pub enum Wake {
    /// Bounded wait expired
    Timeout,
    /// Readiness with nothing matched behind it
    Spurious,
    /// Deliver one PropertiesChanged per map to every subscription
    Signals(Vec<HashMap<String, OwnedValue>>),
}

#[derive(Default)]
pub struct ScriptedBus {
    pub unique_name: Option<String>,
    /// Every bus operation in order, e.g. "GetAll /org/...", "Wait"
    pub calls: Vec<String>,
    pub started: Vec<(String, String, Vec<String>)>,
    pub start_error: Option<BusError>,
    /// Replies for successive GetAll calls
    pub fetches: VecDeque<Result<HashMap<String, OwnedValue>, BusError>>,
    /// Signals already queued when the match is registered
    pub queued_on_subscribe: Vec<HashMap<String, OwnedValue>>,
    pub wakes: VecDeque<Wake>,
    pub killed: Vec<(String, String, i32)>,
    pub units: Vec<ListedUnit>,
    pub listed_patterns: Vec<Vec<String>>,
    subscriptions: Vec<(SubscriptionId, String)>,
    inbox: VecDeque<PropertiesChanged>,
}

impl ScriptedBus {
    pub fn new() -> Self {
        Self {
            unique_name: Some(":1.42".into()),
            ..Default::default()
        }
    }

    pub fn fetch(mut self, properties: HashMap<String, OwnedValue>) -> Self {
        self.fetches.push_back(Ok(properties));
        self
    }

    pub fn wake(mut self, wake: Wake) -> Self {
        self.wakes.push_back(wake);
        self
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.calls.iter().filter(|c| c.starts_with(prefix)).count()
    }

    fn queue(&mut self, changed: HashMap<String, OwnedValue>) {
        for (id, path) in &self.subscriptions {
            self.inbox.push_back(PropertiesChanged {
                subscription: *id,
                path: path.clone(),
                interface: UNIT_INTERFACE.into(),
                changed: changed
                    .iter()
                    .map(|(k, v)| (k.clone(), v.try_to_owned().unwrap()))
                    .collect(),
                invalidated: Vec::new(),
            });
        }
    }
}

impl BusSession for ScriptedBus {
    fn unique_name(&self) -> Option<String> {
        self.unique_name.clone()
    }

    async fn start_transient_unit(
        &mut self,
        call: &TransientUnitCall,
    ) -> Result<OwnedObjectPath, BusError> {
        self.calls.push(format!("StartTransientUnit {}", call.name));
        if let Some(err) = self.start_error.take() {
            return Err(err);
        }
        self.started.push((
            call.name.clone(),
            call.mode.clone(),
            call.keys().map(str::to_string).collect(),
        ));
        Ok(ObjectPath::try_from("/org/freedesktop/systemd1/job/1")
            .unwrap()
            .into())
    }

    async fn get_all_properties(
        &mut self,
        path: &str,
    ) -> Result<HashMap<String, OwnedValue>, BusError> {
        self.calls.push(format!("GetAll {}", path));
        self.fetches.pop_front().unwrap_or(Err(BusError::Disconnected))
    }

    async fn subscribe_properties(&mut self, path: &str) -> Result<SubscriptionId, BusError> {
        self.calls.push(format!("Subscribe {}", path));
        let id = SubscriptionId(self.subscriptions.len() as u64 + 1);
        self.subscriptions.push((id, path.to_string()));
        for changed in std::mem::take(&mut self.queued_on_subscribe) {
            self.queue(changed);
        }
        Ok(id)
    }

    async fn subscribe_manager(&mut self) -> Result<(), BusError> {
        self.calls.push("ManagerSubscribe".into());
        Ok(())
    }

    fn poll_state(&self) -> PollState {
        if self.inbox.is_empty() {
            PollState::idle(None)
        } else {
            PollState::ready(None)
        }
    }

    async fn wait(&mut self, _timeout: Duration) -> Result<bool, BusError> {
        self.calls.push("Wait".into());
        match self.wakes.pop_front() {
            None => Err(BusError::Disconnected),
            Some(Wake::Timeout) => Ok(false),
            Some(Wake::Spurious) => Ok(true),
            Some(Wake::Signals(batch)) => {
                for changed in batch {
                    self.queue(changed);
                }
                Ok(true)
            }
        }
    }

    async fn drain_pending(&mut self, out: &mut Vec<PropertiesChanged>) -> Result<usize, BusError> {
        self.calls.push("Drain".into());
        let moved = self.inbox.len();
        out.extend(self.inbox.drain(..));
        Ok(moved)
    }

    async fn kill_unit(&mut self, unit: &str, whom: &str, signal: i32) -> Result<(), BusError> {
        self.calls.push(format!("KillUnit {}", unit));
        self.killed.push((unit.to_string(), whom.to_string(), signal));
        Ok(())
    }

    async fn list_units(
        &mut self,
        _states: &[&str],
        patterns: &[&str],
    ) -> Result<Vec<ListedUnit>, BusError> {
        self.calls.push("ListUnitsByPatterns".into());
        self.listed_patterns
            .push(patterns.iter().map(|p| p.to_string()).collect());
        Ok(self.units.clone())
    }

    async fn close(self) -> Result<(), BusError> {
        Ok(())
    }
}

pub fn props(entries: &[(&str, Value<'_>)]) -> HashMap<String, OwnedValue> {
    entries
        .iter()
        .map(|(k, v)| (k.to_string(), v.try_to_owned().unwrap()))
        .collect()
}

pub fn job(id: u32, path: &str) -> Value<'static> {
    Value::from((id, ObjectPath::try_from(path.to_string()).unwrap()))
}

pub fn no_job() -> Value<'static> {
    job(0, "/")
}

pub fn listed(name: &str, active: &str) -> ListedUnit {
    ListedUnit {
        name: name.into(),
        description: format!("/bin/sleep for {}", name),
        load_state: "loaded".into(),
        active_state: active.into(),
        sub_state: "running".into(),
        following: String::new(),
        path: ObjectPath::try_from(sysrun::dbus::unit_object_path(name))
            .unwrap()
            .into(),
        job_id: 0,
        job_type: String::new(),
        job_path: ObjectPath::try_from("/").unwrap().into(),
    }
}
