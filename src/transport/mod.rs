//! Downstream WebSocket transport.
//!
//! One server implementation ([`WsServer`]) is parameterized by a
//! [`WireProtocol`] that decides what is sent on open, how client frames are
//! answered and how chat and raw events are rendered.

mod clients;
pub mod json;
mod server;
pub mod xmpp;


pub use clients::{ClientHandle, ClientId, ClientRegistry, Outbound, CLIENT_QUEUE_SIZE};
pub use json::JsonProtocol;
pub use server::WsServer;
pub use xmpp::XmppProtocol;

use crate::config::WsProtocol;
use crate::event::{ChatBroadcast, StreamingEvent};
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Close code for a missing or wrong token.
pub const CLOSE_INVALID_TOKEN: u16 = 1008;
/// Close code sent to clients when the server stops.
pub const CLOSE_GOING_AWAY: u16 = 1001;

/// Reported on every listening, connection, close and error transition.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportStatus {
    pub running: bool,
    pub client_count: usize,
    pub last_error: String,
}

pub type StatusCallback = Arc<dyn Fn(TransportStatus) + Send + Sync>;

#[derive(Clone)]
pub struct TransportOptions {
    pub host: String,
    pub port: u16,
    pub token: String,
    pub on_status: Option<StatusCallback>,
}

impl TransportOptions {
    pub fn new(host: impl Into<String>, port: u16, token: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            token: token.into(),
            on_status: None,
        }
    }

    pub fn on_status<F>(mut self, callback: F) -> Self
    where
        F: Fn(TransportStatus) + Send + Sync + 'static,
    {
        self.on_status = Some(Arc::new(callback));
        self
    }

    /// Same listening address and token.
    pub fn same_endpoint(&self, other: &TransportOptions) -> bool {
        self.host == other.host && self.port == other.port && self.token == other.token
    }
}

impl fmt::Debug for TransportOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportOptions")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("token", &"<redacted>")
            .field("on_status", &self.on_status.is_some())
            .finish()
    }
}

/// Lifecycle contract shared by every downstream server.
#[async_trait]
pub trait Transport: Send + Sync {
    fn protocol(&self) -> WsProtocol;

    /// Stops any running server and listens with `options`.
    async fn start(&self, options: TransportOptions) -> Result<()>;

    /// Like `start`, but only swaps the status callback when host, port and
    /// token are unchanged and the server is running.
    async fn restart(&self, options: TransportOptions) -> Result<()>;

    /// Closes every client with 1001 and stops listening. Idempotent.
    async fn stop(&self);

    fn status(&self) -> TransportStatus;

    fn broadcast_chat(&self, chat: &ChatBroadcast);

    fn broadcast_event(&self, event: &StreamingEvent);
}

/// Wire format plugged into [`WsServer`].
pub trait WireProtocol: Send + Sync + 'static {
    fn kind(&self) -> WsProtocol;

    /// WebSocket subprotocols the server is willing to select.
    fn subprotocols(&self) -> &'static [&'static str] {
        &[]
    }

    /// Accept upgrades on any path, not only `/ws`.
    fn serves_any_path(&self) -> bool {
        false
    }

    /// Clients must complete a handshake before receiving broadcasts.
    fn requires_handshake(&self) -> bool {
        false
    }

    /// Frames sent right after a client is accepted.
    fn on_open(&self, _client: &ClientHandle) -> Vec<String> {
        Vec::new()
    }

    /// Replies to one inbound text frame.
    fn on_frame(&self, client: &ClientHandle, frame: &str) -> Vec<String>;

    fn render_chat(&self, chat: &ChatBroadcast) -> Option<String>;

    fn render_event(&self, event: &StreamingEvent) -> Option<String>;
}

/// Creates an idle transport speaking `protocol`.
pub fn create_transport(protocol: WsProtocol) -> Arc<dyn Transport> {
    match protocol {
        WsProtocol::Json => Arc::new(WsServer::new(JsonProtocol)),
        WsProtocol::XmppEmulation => Arc::new(WsServer::new(XmppProtocol)),
    }
}
