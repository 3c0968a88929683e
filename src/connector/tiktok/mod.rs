//! Built-in TikTok Live connector.
//!
//! The upstream protocol client is not part of this crate. Hosts supply it
//! through [`LiveClientFactory`], either globally with
//! [`install_client_factory`] or per definition with [`definition_with`].
//! This module turns the client's raw payloads into [`StreamingEvent`]s.

mod transform;


pub use transform::{
    author_identity, extract_error_text, format_connect_error, gift_text, normalize_unique_id,
    AuthorMode,
};

use super::{Connector, ConnectorDefinition, EventEmitter};
use crate::config::coerce_bool;
use crate::event::{ErrorThrottle, LifecycleState, StreamingEvent};
use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

pub const CONNECTOR_ID: &str = "tiktok-live";
pub const PLATFORM: &str = "tiktok";

/// Raw notification from the upstream live client.
#[derive(Clone, Debug)]
pub enum UpstreamEvent {
    Connected { room_id: Option<String> },
    Disconnected { reason: String },
    Error(Value),
    Chat(Value),
    Gift(Value),
}

/// Options handed to the upstream client for one session.
#[derive(Clone, Debug, PartialEq)]
pub struct LiveOptions {
    /// Normalized handle, without `@`
    pub unique_id: String,
    pub process_initial_data: bool,
}

/// One upstream TikTok Live session.
#[async_trait]
pub trait LiveClient: Send + Sync {
    /// Joins the live room. Resolves with the room id once joined; upstream
    /// events flow into `events` until the session ends.
    async fn connect(
        &self,
        events: mpsc::UnboundedSender<UpstreamEvent>,
    ) -> std::result::Result<Option<String>, Value>;

    async fn disconnect(&self);
}

pub trait LiveClientFactory: Send + Sync {
    fn create(&self, options: &LiveOptions) -> Arc<dyn LiveClient>;
}

static CLIENT_FACTORY: OnceLock<Arc<dyn LiveClientFactory>> = OnceLock::new();

/// Installs the process-wide upstream client used by [`definition`].
///
/// Returns `false` if a factory was already installed.
pub fn install_client_factory(factory: Arc<dyn LiveClientFactory>) -> bool {
    CLIENT_FACTORY.set(factory).is_ok()
}

/// Definition backed by the globally installed client factory, resolved at
/// connect time.
pub fn definition() -> ConnectorDefinition {
    ConnectorDefinition::new(CONNECTOR_ID, PLATFORM, || {
        TikTokLiveConnector::new(CLIENT_FACTORY.get().cloned())
    })
    .with_config_hook(prepare_config)
}

/// Definition bound to a specific client factory.
pub fn definition_with(factory: Arc<dyn LiveClientFactory>) -> ConnectorDefinition {
    ConnectorDefinition::new(CONNECTOR_ID, PLATFORM, move || {
        TikTokLiveConnector::new(Some(factory.clone()))
    })
    .with_config_hook(prepare_config)
}

/// Normalizes `uniqueId` in place and reports it missing when a connection
/// is wanted.
pub fn prepare_config(config: &mut Map<String, Value>, connect: bool) -> Vec<String> {
    let unique_id = normalize_unique_id(config.get("uniqueId"));
    config.insert("uniqueId".to_string(), Value::String(unique_id.clone()));

    if connect && unique_id.is_empty() {
        vec!["uniqueId is required for TikTok when connect=true.".to_string()]
    } else {
        Vec::new()
    }
}

struct Session {
    client: Arc<dyn LiveClient>,
    pump: JoinHandle<()>,
}

pub struct TikTokLiveConnector {
    factory: Option<Arc<dyn LiveClientFactory>>,
    session: Mutex<Option<Session>>,
    /// Id of the session allowed to emit; 0 when none
    active: Arc<AtomicU64>,
    next_session: AtomicU64,
}

impl TikTokLiveConnector {
    pub fn new(factory: Option<Arc<dyn LiveClientFactory>>) -> Self {
        Self {
            factory,
            session: Mutex::new(None),
            active: Arc::new(AtomicU64::new(0)),
            next_session: AtomicU64::new(0),
        }
    }

    fn take_session(&self) -> Option<Session> {
        self.active.store(0, Ordering::SeqCst);
        self.session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    fn is_current(&self, id: u64) -> bool {
        self.active.load(Ordering::SeqCst) == id
    }
}

#[async_trait]
impl Connector for TikTokLiveConnector {
    async fn connect(&self, config: &Map<String, Value>, emit: EventEmitter) -> Result<()> {
        self.disconnect().await?;

        let factory = self
            .factory
            .as_ref()
            .ok_or_else(|| anyhow!("TikTok live client is not available."))?;

        let unique_id = normalize_unique_id(config.get("uniqueId"));
        if unique_id.is_empty() {
            bail!("Set the TikTok @username of the live to connect.");
        }

        let options = LiveOptions {
            unique_id,
            process_initial_data: coerce_bool(config.get("processInitialData")).unwrap_or(false),
        };
        let mode = AuthorMode::parse(config.get("authorMode"));
        let throttle = Arc::new(Mutex::new(ErrorThrottle::default()));

        emit.emit(StreamingEvent::lifecycle(LifecycleState::Connecting));

        let client = factory.create(&options);
        let id = self.next_session.fetch_add(1, Ordering::SeqCst) + 1;
        let (tx, rx) = mpsc::unbounded_channel();
        let pump = tokio::spawn(pump_events(
            id,
            self.active.clone(),
            rx,
            emit.clone(),
            mode,
            throttle.clone(),
        ));

        self.active.store(id, Ordering::SeqCst);
        *self.session.lock().unwrap_or_else(PoisonError::into_inner) = Some(Session {
            client: client.clone(),
            pump,
        });

        debug!(unique_id = %options.unique_id, session = id, "Connecting to TikTok live");

        match client.connect(tx).await {
            Ok(room_id) => {
                if self.is_current(id) {
                    emit.emit(StreamingEvent::connected(
                        room_id.filter(|room| !room.is_empty()),
                    ));
                } else {
                    client.disconnect().await;
                }
                Ok(())
            }
            Err(payload) => {
                if self.is_current(id) {
                    if let Some(session) = self.take_session() {
                        session.pump.abort();
                    }
                }

                let message = format_connect_error(&payload);
                emit_error(&emit, &throttle, &message, payload);
                emit.emit(StreamingEvent::disconnected(&message));
                bail!(message)
            }
        }
    }

    async fn disconnect(&self) -> Result<()> {
        if let Some(session) = self.take_session() {
            session.pump.abort();
            session.client.disconnect().await;
        }
        Ok(())
    }
}

fn emit_error(emit: &EventEmitter, throttle: &Mutex<ErrorThrottle>, message: &str, raw: Value) {
    let admitted = throttle
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .admit(message);
    if admitted {
        emit.emit(StreamingEvent::error(message, false).with_raw(raw));
    }
}

async fn pump_events(
    id: u64,
    active: Arc<AtomicU64>,
    mut rx: mpsc::UnboundedReceiver<UpstreamEvent>,
    emit: EventEmitter,
    mode: AuthorMode,
    throttle: Arc<Mutex<ErrorThrottle>>,
) {
    while let Some(event) = rx.recv().await {
        if active.load(Ordering::SeqCst) != id {
            break;
        }

        match event {
            UpstreamEvent::Connected { room_id } => {
                emit.emit(StreamingEvent::connected(
                    room_id.filter(|room| !room.is_empty()),
                ));
            }
            UpstreamEvent::Disconnected { reason } => {
                let _ = active.compare_exchange(id, 0, Ordering::SeqCst, Ordering::SeqCst);
                emit.emit(StreamingEvent::disconnected(&reason));
                break;
            }
            UpstreamEvent::Error(payload) => {
                let message = format_connect_error(&payload);
                emit_error(&emit, &throttle, &message, payload);
            }
            UpstreamEvent::Chat(data) => {
                if let Some(event) = transform::chat_to_event(&data, mode) {
                    emit.emit(event);
                }
            }
            UpstreamEvent::Gift(data) => {
                emit.emit(transform::gift_to_event(&data, mode));
            }
        }
    }
}
