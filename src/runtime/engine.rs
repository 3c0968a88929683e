//! The runtime actor: one task owning config, status, the connector instance,
//! the transport and the reconnect timer.
//!
//! Connect calls run on their own tasks and report back through the command
//! channel. Every message from a connector carries the attempt number and
//! instance id it was created with; anything that no longer matches the
//! current pair is discarded.

use super::listeners::ListenerSet;
use super::reconnect::is_offline_reason;
use super::status::{ConnectorState, RuntimeStatus};
use crate::config::{coerce_bool, RuntimeConfig, WsProtocol};
use crate::connector::{Connector, ConnectorRegistry, EventEmitter};
use crate::event::{
    ChatBroadcast, ErrorThrottle, LifecycleState, StreamingEvent, DEFAULT_PLATFORM,
};
use crate::transport::{create_transport, Transport, TransportOptions, TransportStatus};
use anyhow::{anyhow, Error, Result};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub(crate) type Reply<T> = oneshot::Sender<T>;

pub(crate) enum Command {
    Start {
        config: Value,
        reply: Reply<Result<RuntimeStatus>>,
    },
    Update {
        patch: Value,
        reply: Reply<Result<RuntimeStatus>>,
    },
    Stop {
        reply: Reply<RuntimeStatus>,
    },
    Connector {
        attempt: u64,
        instance: u64,
        event: StreamingEvent,
    },
    ConnectSettled {
        attempt: u64,
        instance: u64,
        connector: Arc<dyn Connector>,
        result: std::result::Result<(), String>,
    },
    ReconnectDue {
        generation: u64,
    },
    TransportStatus {
        generation: u64,
        status: TransportStatus,
    },
}

/// Outcome of a reconcile step for the caller waiting on start/update.
enum Reconcile {
    Settled,
    Failed(Error),
    /// A connect attempt is in flight; answer once it settles.
    Awaiting(u64),
}

struct PendingReply {
    attempt: u64,
    throw_on_error: bool,
    reply: Reply<Result<RuntimeStatus>>,
}

struct ActiveConnector {
    id: u64,
    connector: Arc<dyn Connector>,
}

pub(crate) struct Engine {
    registry: ConnectorRegistry,
    commands: mpsc::UnboundedSender<Command>,
    config: RuntimeConfig,
    status: RuntimeStatus,
    started: bool,
    active: Option<ActiveConnector>,
    attempt: u64,
    next_instance: u64,
    /// Attempt during which the connector reported a fatal error
    fatal_attempt: Option<u64>,
    transport: Option<Arc<dyn Transport>>,
    transport_generation: u64,
    reconnect_timer: Option<JoinHandle<()>>,
    timer_generation: u64,
    errors: ErrorThrottle,
    pending: Vec<PendingReply>,
    status_tx: watch::Sender<RuntimeStatus>,
    status_listeners: Arc<ListenerSet<RuntimeStatus>>,
    event_listeners: Arc<ListenerSet<StreamingEvent>>,
}

impl Engine {
    pub fn new(
        registry: ConnectorRegistry,
        commands: mpsc::UnboundedSender<Command>,
        status_tx: watch::Sender<RuntimeStatus>,
        status_listeners: Arc<ListenerSet<RuntimeStatus>>,
        event_listeners: Arc<ListenerSet<StreamingEvent>>,
    ) -> Self {
        Self {
            registry,
            commands,
            config: RuntimeConfig::default(),
            status: RuntimeStatus::default(),
            started: false,
            active: None,
            attempt: 0,
            next_instance: 0,
            fatal_attempt: None,
            transport: None,
            transport_generation: 0,
            reconnect_timer: None,
            timer_generation: 0,
            errors: ErrorThrottle::default(),
            pending: Vec::new(),
            status_tx,
            status_listeners,
            event_listeners,
        }
    }

    pub async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        while let Some(command) = commands.recv().await {
            self.handle(command).await;
        }
    }

    async fn handle(&mut self, command: Command) {
        match command {
            Command::Start { config, reply } => self.start(config, reply).await,
            Command::Update { patch, reply } => self.update(patch, reply).await,
            Command::Stop { reply } => {
                let snapshot = self.stop().await;
                let _ = reply.send(snapshot);
            }
            Command::Connector {
                attempt,
                instance,
                event,
            } => {
                if self.is_current(attempt, instance) {
                    self.handle_event(event);
                } else {
                    debug!(attempt, instance, kind = event.kind(), "Discarding stale connector event");
                }
            }
            Command::ConnectSettled {
                attempt,
                instance,
                connector,
                result,
            } => self.connect_settled(attempt, instance, connector, result),
            Command::ReconnectDue { generation } => self.reconnect_due(generation),
            Command::TransportStatus { generation, status } => {
                if generation == self.transport_generation && self.transport.is_some() {
                    self.sync_transport_status(status);
                }
            }
        }
    }

    // ── Operations ──────────────────────────────────────────────────────────

    async fn start(&mut self, config: Value, reply: Reply<Result<RuntimeStatus>>) {
        if self.started {
            return self.update(config, reply).await;
        }

        self.config = RuntimeConfig::sanitize(&config);
        self.status.connector_id = self.config.connector_id.clone();
        self.started = true;
        info!(
            connector_id = %self.config.connector_id,
            connect = self.config.connect,
            ws_enabled = self.config.ws.enabled,
            "Runtime started"
        );

        self.apply_ws_config().await;
        let throw_on_error = self.config.connect;
        let outcome = self.reconcile(throw_on_error).await;
        self.answer(outcome, throw_on_error, reply);
    }

    async fn update(&mut self, patch: Value, reply: Reply<Result<RuntimeStatus>>) {
        self.config = self.config.merged(&patch);
        self.status.connector_id = self.config.connector_id.clone();
        self.started = true;

        self.apply_ws_config().await;
        let throw_on_error = coerce_bool(patch.get("connect")).unwrap_or(false);
        let outcome = self.reconcile(throw_on_error).await;
        self.answer(outcome, throw_on_error, reply);
    }

    async fn stop(&mut self) -> RuntimeStatus {
        self.started = false;
        self.clear_reconnect_timer();
        self.config = self
            .config
            .merged(&json!({"connect": false, "ws": {"enabled": false}}));

        self.disconnect_connector(true).await;
        self.stop_transport().await;

        self.status.ws_running = false;
        self.status.ws_client_count = 0;
        self.status.ws_last_error.clear();
        self.publish_status();
        info!("Runtime stopped");

        self.status.clone()
    }

    fn answer(&mut self, outcome: Reconcile, throw_on_error: bool, reply: Reply<Result<RuntimeStatus>>) {
        match outcome {
            Reconcile::Settled => {
                let _ = reply.send(Ok(self.status.clone()));
            }
            Reconcile::Failed(e) => {
                let _ = reply.send(Err(e));
            }
            Reconcile::Awaiting(attempt) => self.pending.push(PendingReply {
                attempt,
                throw_on_error,
                reply,
            }),
        }
    }

    /// Answers callers whose attempt was superseded by a newer one.
    fn supersede_pending(&mut self) {
        let current = self.attempt;
        let (stale, waiting): (Vec<_>, Vec<_>) = std::mem::take(&mut self.pending)
            .into_iter()
            .partition(|pending| pending.attempt < current);
        self.pending = waiting;
        for pending in stale {
            let _ = pending.reply.send(Ok(self.status.clone()));
        }
    }

    fn resolve_pending(&mut self, attempt: u64, error: Option<&str>) {
        let (matched, waiting): (Vec<_>, Vec<_>) = std::mem::take(&mut self.pending)
            .into_iter()
            .partition(|pending| pending.attempt == attempt);
        self.pending = waiting;
        for pending in matched {
            let result = match error {
                Some(message) if pending.throw_on_error => Err(anyhow!(message.to_string())),
                _ => Ok(self.status.clone()),
            };
            let _ = pending.reply.send(result);
        }
    }

    // ── Connection state machine ────────────────────────────────────────────

    async fn reconcile(&mut self, throw_on_error: bool) -> Reconcile {
        if !self.started {
            return Reconcile::Settled;
        }

        if !self.config.connect {
            self.disconnect_connector(true).await;
            return Reconcile::Settled;
        }

        if self.status.connector_state.is_pending() {
            return Reconcile::Settled;
        }

        if self.status.connector_state == ConnectorState::Connected && self.active.is_some() {
            return Reconcile::Settled;
        }

        self.connect_connector(throw_on_error)
    }

    fn connect_connector(&mut self, throw_on_error: bool) -> Reconcile {
        self.clear_reconnect_timer();

        let Some(definition) = self.registry.get(&self.config.connector_id).cloned() else {
            let message = format!("Connector '{}' was not found.", self.config.connector_id);
            warn!(connector_id = %self.config.connector_id, "Connector not registered");
            self.status.last_error = message.clone();
            self.publish_status();
            return if throw_on_error {
                Reconcile::Failed(anyhow!(message))
            } else {
                Reconcile::Settled
            };
        };

        if self.active.is_some() && self.status.connector_state == ConnectorState::Connected {
            return Reconcile::Settled;
        }

        self.attempt += 1;
        self.supersede_pending();
        self.next_instance += 1;
        let attempt = self.attempt;
        let instance = self.next_instance;

        let connector = definition.create();
        let previous = self.active.replace(ActiveConnector {
            id: instance,
            connector: connector.clone(),
        });
        if let Some(previous) = previous {
            spawn_disconnect(previous.connector);
        }

        self.status.connector_id = self.config.connector_id.clone();
        self.status.connector_state = match self.status.connector_state {
            ConnectorState::Reconnecting => ConnectorState::Reconnecting,
            _ => ConnectorState::Connecting,
        };
        self.status.last_error.clear();
        self.publish_status();
        info!(connector_id = %definition.id, attempt, "Connecting");

        let events = self.commands.clone();
        let emit = EventEmitter::new(move |event| {
            let _ = events.send(Command::Connector {
                attempt,
                instance,
                event,
            });
        });

        let settled = self.commands.clone();
        let connector_config = self.config.connector_config.clone();
        tokio::spawn(async move {
            let result = connector
                .connect(&connector_config, emit)
                .await
                .map_err(|e| e.to_string());
            let _ = settled.send(Command::ConnectSettled {
                attempt,
                instance,
                connector,
                result,
            });
        });

        Reconcile::Awaiting(attempt)
    }

    fn connect_settled(
        &mut self,
        attempt: u64,
        instance: u64,
        connector: Arc<dyn Connector>,
        result: std::result::Result<(), String>,
    ) {
        match result {
            Ok(()) => {
                if !self.is_current(attempt, instance) {
                    debug!(attempt, "Superseded connect settled; disconnecting it");
                    spawn_disconnect(connector);
                    return;
                }

                // A disconnect reported before settling already scheduled a retry
                let retry_pending = self.reconnect_timer.is_some();
                if self.status.connector_state.is_pending() && !retry_pending {
                    self.status.connector_state = ConnectorState::Connected;
                    self.status.last_error.clear();
                    self.publish_status();
                    info!(attempt, room_id = ?self.status.room_id, "Connector connected");

                    let event = StreamingEvent::connected(self.status.room_id.clone());
                    self.emit_event(&event);
                    self.broadcast_json_event(&event);
                }
                self.resolve_pending(attempt, None);
            }
            Err(message) => {
                if attempt != self.attempt {
                    return;
                }

                if self.active.as_ref().map(|a| a.id) == Some(instance) {
                    self.active = None;
                }

                let message = match message.trim() {
                    "" => "Failed to connect the connector.".to_string(),
                    trimmed => trimmed.to_string(),
                };
                warn!(attempt, error = %message, "Connect attempt failed");

                self.status.connector_state = ConnectorState::Idle;
                self.status.room_id = None;
                self.status.last_error = message.clone();
                self.publish_status();

                let event = StreamingEvent::error(&message, false);
                if self.errors.admit(&message) {
                    self.emit_event(&event);
                    self.broadcast_json_event(&event);
                }

                if self.config.connect && self.started && self.config.reconnect_on_disconnect {
                    self.schedule_reconnect(&message);
                }

                self.resolve_pending(attempt, Some(&message));
            }
        }
    }

    async fn disconnect_connector(&mut self, manual: bool) {
        self.clear_reconnect_timer();
        self.attempt += 1;
        self.supersede_pending();

        if let Some(active) = self.active.take() {
            if let Err(e) = active.connector.disconnect().await {
                debug!(error = %e, "Connector disconnect failed");
            }
            info!("Connector disconnected");
        }

        self.status.connector_state = ConnectorState::Idle;
        self.status.room_id = None;
        if manual {
            self.status.last_error.clear();
        }
        self.publish_status();
    }

    fn schedule_reconnect(&mut self, reason: &str) {
        let fatal = self.fatal_attempt == Some(self.attempt);
        if !self.started || !self.config.connect || !self.config.reconnect_on_disconnect || fatal {
            self.status.connector_state = ConnectorState::Idle;
            self.publish_status();
            return;
        }

        self.clear_reconnect_timer();

        self.status.connector_state = ConnectorState::Reconnecting;
        if !reason.is_empty() {
            self.status.last_error = reason.to_string();
        }
        self.publish_status();

        let delay_ms = if is_offline_reason(reason) {
            self.config.reconnect_delay_offline_ms
        } else {
            self.config.reconnect_delay_ms
        };
        info!(delay_ms, reason, "Scheduling reconnect");

        let generation = self.timer_generation;
        let commands = self.commands.clone();
        self.reconnect_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            let _ = commands.send(Command::ReconnectDue { generation });
        }));
    }

    fn clear_reconnect_timer(&mut self) {
        if let Some(timer) = self.reconnect_timer.take() {
            timer.abort();
        }
        // Invalidates a firing that was already queued
        self.timer_generation += 1;
    }

    fn reconnect_due(&mut self, generation: u64) {
        if generation != self.timer_generation {
            return;
        }
        self.reconnect_timer = None;

        if !self.started || !self.config.connect {
            return;
        }
        debug!("Reconnect timer fired");
        let _ = self.connect_connector(false);
    }

    fn is_current(&self, attempt: u64, instance: u64) -> bool {
        attempt == self.attempt && self.active.as_ref().map(|a| a.id) == Some(instance)
    }

    // ── Connector events ────────────────────────────────────────────────────

    fn handle_event(&mut self, event: StreamingEvent) {
        match &event {
            StreamingEvent::Chat(chat) => {
                let message = chat.message.trim();
                if message.is_empty() {
                    return;
                }
                self.status.total_chat_count += 1;

                if self.config.ws.enabled {
                    if let Some(transport) = &self.transport {
                        transport.broadcast_chat(&ChatBroadcast {
                            platform: platform_or_default(&chat.platform),
                            author: chat.author.resolve_name(),
                            message: message.to_string(),
                        });
                    }
                }

                self.emit_event(&event);
                self.publish_status();
            }
            StreamingEvent::Gift(gift) => {
                self.status.total_gift_count += 1;
                self.broadcast_json_event(&event);

                let text = gift.rendered_text.trim();
                if self.config.ws.enabled && self.config.gift_to_synthetic_chat && !text.is_empty() {
                    if let Some(transport) = &self.transport {
                        transport.broadcast_chat(&ChatBroadcast {
                            platform: platform_or_default(&gift.platform),
                            author: gift.author.resolve_name(),
                            message: text.to_string(),
                        });
                    }
                }

                self.emit_event(&event);
                self.publish_status();
            }
            StreamingEvent::Lifecycle(lifecycle) => {
                match lifecycle.state {
                    LifecycleState::Connecting => {
                        self.status.connector_state = ConnectorState::Connecting;
                    }
                    LifecycleState::Connected => {
                        self.status.connector_state = ConnectorState::Connected;
                        self.status.room_id =
                            lifecycle.room_id.clone().filter(|room| !room.is_empty());
                        self.status.last_error.clear();
                    }
                    LifecycleState::Reconnecting => {
                        self.status.connector_state = ConnectorState::Reconnecting;
                    }
                    LifecycleState::Disconnected => {
                        self.status.room_id = None;
                        let reason = lifecycle.reason.as_deref().unwrap_or("").trim().to_string();
                        if !reason.is_empty() {
                            self.status.last_error = reason.clone();
                        }

                        if !self.config.connect {
                            self.status.connector_state = ConnectorState::Idle;
                        } else {
                            let reason = if reason.is_empty() {
                                self.status.last_error.clone()
                            } else {
                                reason
                            };
                            self.schedule_reconnect(&reason);
                        }
                    }
                }

                self.emit_event(&event);
                self.broadcast_json_event(&event);
                self.publish_status();
            }
            StreamingEvent::Error(error) => {
                let message = match error.message.trim() {
                    "" => "Unknown connector error.".to_string(),
                    trimmed => trimmed.to_string(),
                };
                if error.fatal {
                    warn!(error = %message, "Connector reported a fatal error");
                    self.fatal_attempt = Some(self.attempt);
                }
                self.status.last_error = message.clone();

                if self.errors.admit(&message) {
                    self.emit_event(&event);
                    self.broadcast_json_event(&event);
                } else {
                    debug!(error = %message, "Suppressed repeated connector error");
                }
                self.publish_status();
            }
        }
    }

    // ── Transport ───────────────────────────────────────────────────────────

    async fn apply_ws_config(&mut self) {
        if !self.config.ws.enabled {
            self.stop_transport().await;
            self.reset_ws_status("");
            return;
        }

        if self.config.ws.token.is_empty() {
            self.stop_transport().await;
            self.reset_ws_status("A WebSocket token is required.");
            return;
        }

        let protocol = self.config.ws.protocol;
        let reuse = matches!(&self.transport, Some(t) if t.protocol() == protocol);
        if !reuse {
            self.stop_transport().await;
            self.transport = Some(create_transport(protocol));
            self.transport_generation += 1;
        }
        let Some(transport) = self.transport.clone() else {
            return;
        };

        let generation = self.transport_generation;
        let commands = self.commands.clone();
        let options = TransportOptions::new(
            self.config.ws.host.clone(),
            self.config.ws.port,
            self.config.ws.token.clone(),
        )
        .on_status(move |status| {
            let _ = commands.send(Command::TransportStatus { generation, status });
        });

        match transport.restart(options).await {
            Ok(()) => self.sync_transport_status(transport.status()),
            Err(e) => {
                let message = match e.to_string().trim() {
                    "" => "Failed to start the WebSocket server.".to_string(),
                    trimmed => trimmed.to_string(),
                };
                warn!(error = %message, "WebSocket transport unavailable");
                self.reset_ws_status(&message);
            }
        }
    }

    async fn stop_transport(&mut self) {
        if let Some(transport) = self.transport.take() {
            transport.stop().await;
        }
        self.transport_generation += 1;
    }

    fn reset_ws_status(&mut self, last_error: &str) {
        self.status.ws_running = false;
        self.status.ws_client_count = 0;
        self.status.ws_last_error = last_error.to_string();
        self.publish_status();
    }

    fn sync_transport_status(&mut self, status: TransportStatus) {
        self.status.ws_running = status.running;
        self.status.ws_client_count = status.client_count;
        self.status.ws_last_error = status.last_error.trim().to_string();
        self.publish_status();
    }

    fn broadcast_json_event(&self, event: &StreamingEvent) {
        if !self.config.ws.enabled || self.config.ws.protocol != WsProtocol::Json {
            return;
        }
        if let Some(transport) = &self.transport {
            transport.broadcast_event(event);
        }
    }

    // ── Listeners ───────────────────────────────────────────────────────────

    fn emit_event(&self, event: &StreamingEvent) {
        self.event_listeners.publish(event);
    }

    fn publish_status(&self) {
        let snapshot = self.status.clone();
        self.status_tx.send_replace(snapshot.clone());
        self.status_listeners.publish(&snapshot);
    }
}

fn platform_or_default(platform: &str) -> String {
    match platform.trim() {
        "" => DEFAULT_PLATFORM.to_string(),
        trimmed => trimmed.to_string(),
    }
}

fn spawn_disconnect(connector: Arc<dyn Connector>) {
    tokio::spawn(async move {
        if let Err(e) = connector.disconnect().await {
            debug!(error = %e, "Stale connector disconnect failed");
        }
    });
}
