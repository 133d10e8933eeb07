//! zbus-backed [`BusSession`]
//!
//! zbus reads the socket on its own executor task, so there is no fd to
//! hand out. Readiness is modelled with a local inbox: `wait` parks until
//! one of the PropertiesChanged streams yields and queues that message,
//! `drain_pending` empties the inbox and then polls every stream once.

use std::collections::{HashMap, VecDeque};
use std::task::Poll;
use std::time::Duration;

use futures_lite::{future, StreamExt};
use zbus::fdo::{PropertiesChangedStream, PropertiesProxy};
use zbus::proxy::CacheProperties;
use zbus::zvariant::{OwnedObjectPath, OwnedValue};
use zbus::Connection;

use super::manager::{ListedUnit, SystemdManagerProxy, SYSTEMD_SERVICE};
use super::poll::PollState;
use super::{BusError, BusSession, PropertiesChanged, SubscriptionId};
use crate::config::BusScope;
use crate::request::TransientUnitCall;

struct Subscription {
    id: SubscriptionId,
    path: String,
    // keeps the match rule registered for as long as the stream lives
    _proxy: PropertiesProxy<'static>,
    stream: PropertiesChangedStream,
}

pub struct ZbusSession {
    connection: Connection,
    manager: SystemdManagerProxy<'static>,
    subscriptions: Vec<Subscription>,
    inbox: VecDeque<PropertiesChanged>,
    next_id: u64,
}

impl ZbusSession {
    /// Connect to the system or user bus
    pub async fn connect(scope: BusScope) -> Result<Self, BusError> {
        let connection = match scope {
            BusScope::System => Connection::system().await?,
            BusScope::User => Connection::session().await?,
        };
        log::debug!(
            "Connected to {:?} bus as {}",
            scope,
            connection
                .unique_name()
                .map(|n| n.to_string())
                .unwrap_or_else(|| "<anonymous>".into())
        );
        Self::with_connection(connection).await
    }

    pub async fn with_connection(connection: Connection) -> Result<Self, BusError> {
        let manager = SystemdManagerProxy::builder(&connection)
            .cache_properties(CacheProperties::No)
            .build()
            .await?;
        Ok(Self {
            connection,
            manager,
            subscriptions: Vec::new(),
            inbox: VecDeque::new(),
            next_id: 1,
        })
    }

    fn decode(
        id: SubscriptionId,
        path: &str,
        signal: zbus::fdo::PropertiesChanged,
    ) -> Result<PropertiesChanged, BusError> {
        let args = signal.args()?;
        let mut changed = HashMap::with_capacity(args.changed_properties.len());
        for (name, value) in args.changed_properties.iter() {
            let owned: OwnedValue = value.try_to_owned().map_err(zbus::Error::from)?;
            changed.insert(name.to_string(), owned);
        }
        Ok(PropertiesChanged {
            subscription: id,
            path: path.to_string(),
            interface: args.interface_name.to_string(),
            changed,
            invalidated: args
                .invalidated_properties
                .iter()
                .map(|p| p.to_string())
                .collect(),
        })
    }
}

impl BusSession for ZbusSession {
    fn unique_name(&self) -> Option<String> {
        self.connection.unique_name().map(|n| n.to_string())
    }

    async fn start_transient_unit(
        &mut self,
        call: &TransientUnitCall,
    ) -> Result<OwnedObjectPath, BusError> {
        log::debug!(
            "StartTransientUnit {} mode={} ({} properties)",
            call.name,
            call.mode,
            call.properties.len()
        );
        let job = self
            .manager
            .start_transient_unit(&call.name, &call.mode, &call.properties, &call.aux)
            .await?;
        Ok(job)
    }

    async fn get_all_properties(
        &mut self,
        path: &str,
    ) -> Result<HashMap<String, OwnedValue>, BusError> {
        let reply = self
            .connection
            .call_method(
                Some(SYSTEMD_SERVICE),
                path,
                Some(super::PROPERTIES_INTERFACE),
                "GetAll",
                &("",),
            )
            .await?;
        let properties = reply.body().deserialize::<HashMap<String, OwnedValue>>()?;
        Ok(properties)
    }

    async fn subscribe_properties(&mut self, path: &str) -> Result<SubscriptionId, BusError> {
        let proxy = PropertiesProxy::builder(&self.connection)
            .destination(SYSTEMD_SERVICE)?
            .path(path.to_string())?
            .build()
            .await?;
        let stream = proxy.receive_properties_changed().await?;

        let id = SubscriptionId(self.next_id);
        self.next_id += 1;
        log::debug!("Subscribed to PropertiesChanged on {} ({:?})", path, id);
        self.subscriptions.push(Subscription {
            id,
            path: path.to_string(),
            _proxy: proxy,
            stream,
        });
        Ok(id)
    }

    async fn subscribe_manager(&mut self) -> Result<(), BusError> {
        match self.manager.subscribe().await {
            Ok(()) => Ok(()),
            // already subscribed on this connection
            Err(zbus::Error::MethodError(name, _, _))
                if name.as_str() == "org.freedesktop.systemd1.AlreadySubscribed" =>
            {
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    fn poll_state(&self) -> PollState {
        if self.inbox.is_empty() {
            PollState::idle(None)
        } else {
            PollState::ready(None)
        }
    }

    async fn wait(&mut self, timeout: Duration) -> Result<bool, BusError> {
        if !self.inbox.is_empty() {
            return Ok(true);
        }
        if self.subscriptions.is_empty() {
            return Ok(false);
        }

        let subscriptions = &mut self.subscriptions;
        let next = future::poll_fn(|cx| {
            for sub in subscriptions.iter_mut() {
                if let Poll::Ready(item) = sub.stream.poll_next(cx) {
                    return Poll::Ready((sub.id, sub.path.clone(), item));
                }
            }
            Poll::Pending
        });

        match tokio::time::timeout(timeout, next).await {
            Err(_) => Ok(false),
            Ok((id, path, Some(signal))) => {
                let decoded = Self::decode(id, &path, signal)?;
                self.inbox.push_back(decoded);
                Ok(true)
            }
            Ok((_, _, None)) => Err(BusError::Disconnected),
        }
    }

    async fn drain_pending(&mut self, out: &mut Vec<PropertiesChanged>) -> Result<usize, BusError> {
        let mut moved = self.inbox.len();
        out.extend(self.inbox.drain(..));

        for sub in self.subscriptions.iter_mut() {
            loop {
                match future::poll_once(sub.stream.next()).await {
                    Some(Some(signal)) => {
                        out.push(Self::decode(sub.id, &sub.path, signal)?);
                        moved += 1;
                    }
                    Some(None) => return Err(BusError::Disconnected),
                    None => break,
                }
            }
        }
        Ok(moved)
    }

    async fn kill_unit(&mut self, unit: &str, whom: &str, signal: i32) -> Result<(), BusError> {
        self.manager.kill_unit(unit, whom, signal).await?;
        Ok(())
    }

    async fn list_units(
        &mut self,
        states: &[&str],
        patterns: &[&str],
    ) -> Result<Vec<ListedUnit>, BusError> {
        let units = self.manager.list_units_by_patterns(states, patterns).await?;
        Ok(units)
    }

    async fn close(mut self) -> Result<(), BusError> {
        // dropping the streams removes their match rules
        self.subscriptions.clear();
        self.inbox.clear();
        let ZbusSession {
            connection, manager, ..
        } = self;
        drop(manager);
        connection.close().await?;
        Ok(())
    }
}
