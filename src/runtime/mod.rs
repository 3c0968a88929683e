//! Runtime core: connection lifecycle state machine plus the status/event bus.
//!
//! [`Runtime`] is a cheap handle onto a single actor task. All state changes
//! happen on that task one message at a time, so no two mutations of the
//! status or the config ever race.

mod engine;
mod listeners;
mod reconnect;
mod status;

#[cfg(test)]
mod tests;

pub use listeners::Subscription;
pub use reconnect::is_offline_reason;
pub use status::{ConnectorState, RuntimeStatus};

use crate::connector::{ConnectorDefinition, ConnectorRegistry, RegistryError};
use crate::event::StreamingEvent;
use anyhow::{anyhow, Result};
use engine::{Command, Engine};
use listeners::ListenerSet;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

/// Handle to a running state machine.
///
/// Must be created inside a tokio runtime. Dropping the handle aborts the
/// actor, which tears down the transport; call [`Runtime::stop`] first for
/// an orderly connector disconnect.
pub struct Runtime {
    commands: mpsc::UnboundedSender<Command>,
    status: watch::Receiver<RuntimeStatus>,
    status_listeners: Arc<ListenerSet<RuntimeStatus>>,
    event_listeners: Arc<ListenerSet<StreamingEvent>>,
    task: JoinHandle<()>,
}

impl Runtime {
    pub fn new(registry: ConnectorRegistry) -> Self {
        let (commands, rx) = mpsc::unbounded_channel();
        let (status_tx, status) = watch::channel(RuntimeStatus::default());
        let status_listeners = Arc::new(ListenerSet::new("status"));
        let event_listeners = Arc::new(ListenerSet::new("event"));

        let engine = Engine::new(
            registry,
            commands.clone(),
            status_tx,
            status_listeners.clone(),
            event_listeners.clone(),
        );
        let task = tokio::spawn(engine.run(rx));

        Self {
            commands,
            status,
            status_listeners,
            event_listeners,
            task,
        }
    }

    /// Runtime over the built-in connectors plus `extra`.
    pub fn with_connectors<I>(extra: I) -> std::result::Result<Self, RegistryError>
    where
        I: IntoIterator<Item = ConnectorDefinition>,
    {
        Ok(Self::new(ConnectorRegistry::with_builtins(extra)?))
    }

    /// Applies `config` and connects if it asks for it.
    ///
    /// Fails only when `connect` is true and that first attempt fails. On an
    /// already started runtime this behaves as [`Runtime::update`].
    pub async fn start(&self, config: Value) -> Result<RuntimeStatus> {
        self.request(|reply| Command::Start { config, reply })
            .await?
    }

    /// Merges `patch` into the current config and reconciles.
    ///
    /// Fails only when the patch itself sets `connect` to true and the
    /// resulting attempt fails.
    pub async fn update(&self, patch: Value) -> Result<RuntimeStatus> {
        self.request(|reply| Command::Update { patch, reply })
            .await?
    }

    /// Disconnects, stops the transport and returns the final snapshot.
    /// Idempotent.
    pub async fn stop(&self) -> RuntimeStatus {
        match self.request(|reply| Command::Stop { reply }).await {
            Ok(status) => status,
            Err(_) => self.status(),
        }
    }

    /// Copy of the current status.
    pub fn status(&self) -> RuntimeStatus {
        self.status.borrow().clone()
    }

    /// Receiver that observes every published status.
    pub fn watch_status(&self) -> watch::Receiver<RuntimeStatus> {
        self.status.clone()
    }

    /// Registers an event listener. Callbacks run on their own task.
    pub fn on_event<F>(&self, listener: F) -> Subscription
    where
        F: Fn(StreamingEvent) + Send + Sync + 'static,
    {
        self.event_listeners.subscribe(listener, || None)
    }

    /// Registers a status listener. The current snapshot is delivered first.
    pub fn on_status<F>(&self, listener: F) -> Subscription
    where
        F: Fn(RuntimeStatus) + Send + Sync + 'static,
    {
        let status = self.status.clone();
        self.status_listeners
            .subscribe(listener, move || Some(status.borrow().clone()))
    }

    async fn request<T, F>(&self, build: F) -> Result<T>
    where
        F: FnOnce(oneshot::Sender<T>) -> Command,
    {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(build(reply))
            .map_err(|_| anyhow!("runtime task is not running"))?;
        rx.await
            .map_err(|_| anyhow!("runtime task stopped before replying"))
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        self.task.abort();
    }
}
