use dashmap::DashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::warn;
use uuid::Uuid;

/// Per-client send queue depth; frames beyond it are dropped.
pub const CLIENT_QUEUE_SIZE: usize = 256;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ClientId(pub Uuid);

impl ClientId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for ClientId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "client_{}", self.0)
    }
}

/// Frame queued for a client's writer task.
#[derive(Clone, Debug, PartialEq)]
pub enum Outbound {
    Text(String),
    Close { code: u16, reason: &'static str },
}

/// One accepted WebSocket connection.
#[derive(Debug)]
pub struct ClientHandle {
    pub id: ClientId,
    tx: mpsc::Sender<Outbound>,
    authenticated: AtomicBool,
}

impl ClientHandle {
    pub fn is_authenticated(&self) -> bool {
        self.authenticated.load(Ordering::SeqCst)
    }

    pub fn mark_authenticated(&self) {
        self.authenticated.store(true, Ordering::SeqCst);
    }

    /// Queues a frame without waiting. Returns `false` if it was dropped.
    pub fn send(&self, frame: Outbound) -> bool {
        match self.tx.try_send(frame) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(client_id = %self.id, "Send queue full, dropping frame");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }
}

/// Live set of accepted clients, shared between connection tasks and
/// broadcasts.
#[derive(Debug, Default)]
pub struct ClientRegistry {
    clients: DashMap<ClientId, Arc<ClientHandle>>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, authenticated: bool) -> (Arc<ClientHandle>, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(CLIENT_QUEUE_SIZE);
        let client = Arc::new(ClientHandle {
            id: ClientId::new(),
            tx,
            authenticated: AtomicBool::new(authenticated),
        });
        self.clients.insert(client.id, client.clone());
        (client, rx)
    }

    pub fn unregister(&self, id: &ClientId) -> bool {
        self.clients.remove(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Sends `frame` to every authenticated client. Returns how many
    /// accepted it.
    pub fn broadcast(&self, frame: &str) -> usize {
        // Snapshot first so connection tasks can unregister mid-broadcast
        let targets: Vec<Arc<ClientHandle>> = self
            .clients
            .iter()
            .filter(|entry| entry.value().is_authenticated())
            .map(|entry| entry.value().clone())
            .collect();

        targets
            .iter()
            .filter(|client| client.send(Outbound::Text(frame.to_string())))
            .count()
    }

    /// Asks every client to close and forgets them.
    pub fn close_all(&self, code: u16, reason: &'static str) {
        let clients: Vec<Arc<ClientHandle>> =
            self.clients.iter().map(|entry| entry.value().clone()).collect();
        self.clients.clear();
        for client in clients {
            client.send(Outbound::Close { code, reason });
        }
    }
}
