use super::clients::{ClientHandle, ClientRegistry, Outbound};
use super::{
    StatusCallback, Transport, TransportOptions, TransportStatus, WireProtocol, CLOSE_GOING_AWAY,
    CLOSE_INVALID_TOKEN,
};
use crate::config::WsProtocol;
use crate::event::{ChatBroadcast, StreamingEvent};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::Response,
    routing::get,
    Router,
};
use futures::{SinkExt, StreamExt};
use std::borrow::Cow;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

#[derive(Debug, Default)]
struct ServerState {
    running: bool,
    last_error: String,
}

/// State shared by the accept loop, connection tasks and broadcasts.
struct Shared<P> {
    protocol: P,
    clients: ClientRegistry,
    token: RwLock<String>,
    state: Mutex<ServerState>,
    on_status: RwLock<Option<StatusCallback>>,
}

impl<P: WireProtocol> Shared<P> {
    fn token(&self) -> String {
        self.token
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_state(&self, running: bool, last_error: &str) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.running = running;
        state.last_error = last_error.trim().to_string();
    }

    fn status(&self) -> TransportStatus {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        TransportStatus {
            running: state.running,
            client_count: self.clients.len(),
            last_error: state.last_error.clone(),
        }
    }

    fn publish(&self) {
        let status = self.status();
        let callback = self
            .on_status
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(callback) = callback {
            callback(status);
        }
    }
}

struct Listening {
    options: TransportOptions,
    local_addr: SocketAddr,
    task: JoinHandle<()>,
}

/// WebSocket server speaking the wire protocol `P`.
pub struct WsServer<P: WireProtocol> {
    shared: Arc<Shared<P>>,
    listening: tokio::sync::Mutex<Option<Listening>>,
}

impl<P: WireProtocol> WsServer<P> {
    pub fn new(protocol: P) -> Self {
        Self {
            shared: Arc::new(Shared {
                protocol,
                clients: ClientRegistry::new(),
                token: RwLock::new(String::new()),
                state: Mutex::new(ServerState::default()),
                on_status: RwLock::new(None),
            }),
            listening: tokio::sync::Mutex::new(None),
        }
    }

    /// Router serving the upgrade endpoint with the current token.
    pub fn router(&self) -> Router {
        router(self.shared.clone())
    }

    /// Address actually bound, useful when listening on port 0.
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        self.listening.lock().await.as_ref().map(|l| l.local_addr)
    }

    fn set_callback(&self, options: &TransportOptions) {
        *self
            .shared
            .on_status
            .write()
            .unwrap_or_else(PoisonError::into_inner) = options.on_status.clone();
    }

    async fn launch(&self, slot: &mut Option<Listening>, options: TransportOptions) -> Result<()> {
        *self
            .shared
            .token
            .write()
            .unwrap_or_else(PoisonError::into_inner) = options.token.clone();

        let addr = format!("{}:{}", options.host, options.port);
        let bound = TcpListener::bind(&addr)
            .await
            .and_then(|listener| listener.local_addr().map(|local| (listener, local)));
        let (listener, local_addr) = match bound {
            Ok(bound) => bound,
            Err(e) => {
                let message = format!("Failed to listen on {}: {}", addr, e);
                warn!(%addr, error = %e, "WebSocket server failed to start");
                self.shared.set_state(false, &message);
                self.shared.publish();
                return Err(anyhow!(message));
            }
        };

        let app = self.router();
        let shared = self.shared.clone();
        let task = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                error!(error = %e, "WebSocket server stopped unexpectedly");
                shared.set_state(false, &e.to_string());
                shared.publish();
            }
        });

        self.shared.set_state(true, "");
        *slot = Some(Listening {
            options,
            local_addr,
            task,
        });

        info!(
            %local_addr,
            protocol = self.shared.protocol.kind().as_str(),
            "WebSocket server listening"
        );
        self.shared.publish();
        Ok(())
    }

    async fn shutdown(&self, slot: &mut Option<Listening>) {
        if let Some(listening) = slot.take() {
            self.shared.clients.close_all(CLOSE_GOING_AWAY, "server closing");
            listening.task.abort();
            // Wait for the listener to be dropped so the port can be rebound
            let _ = listening.task.await;
            info!(local_addr = %listening.local_addr, "WebSocket server stopped");
        }
        self.shared.set_state(false, "");
    }
}

#[async_trait]
impl<P: WireProtocol> Transport for WsServer<P> {
    fn protocol(&self) -> WsProtocol {
        self.shared.protocol.kind()
    }

    async fn start(&self, options: TransportOptions) -> Result<()> {
        let mut slot = self.listening.lock().await;
        self.set_callback(&options);
        self.shutdown(&mut slot).await;
        self.launch(&mut slot, options).await
    }

    async fn restart(&self, options: TransportOptions) -> Result<()> {
        let mut slot = self.listening.lock().await;
        self.set_callback(&options);

        if let Some(listening) = slot.as_ref() {
            if listening.options.same_endpoint(&options) && !listening.task.is_finished() {
                self.shared.publish();
                return Ok(());
            }
        }

        self.shutdown(&mut slot).await;
        self.launch(&mut slot, options).await
    }

    async fn stop(&self) {
        let mut slot = self.listening.lock().await;
        self.shutdown(&mut slot).await;
        self.shared.publish();
    }

    fn status(&self) -> TransportStatus {
        self.shared.status()
    }

    fn broadcast_chat(&self, chat: &ChatBroadcast) {
        if let Some(frame) = self.shared.protocol.render_chat(chat) {
            let delivered = self.shared.clients.broadcast(&frame);
            debug!(delivered, "Broadcast chat");
        }
    }

    fn broadcast_event(&self, event: &StreamingEvent) {
        if let Some(frame) = self.shared.protocol.render_event(event) {
            self.shared.clients.broadcast(&frame);
        }
    }
}

impl<P: WireProtocol> Drop for WsServer<P> {
    fn drop(&mut self) {
        if let Some(listening) = self.listening.get_mut().take() {
            self.shared.clients.close_all(CLOSE_GOING_AWAY, "server closing");
            listening.task.abort();
        }
    }
}

fn router<P: WireProtocol>(shared: Arc<Shared<P>>) -> Router {
    let router = Router::new().route("/ws", get(ws_handler::<P>));
    let router = if shared.protocol.serves_any_path() {
        router.fallback(ws_handler::<P>)
    } else {
        router
    };
    router.with_state(shared)
}

async fn ws_handler<P: WireProtocol>(
    ws: WebSocketUpgrade,
    Query(query): Query<Vec<(String, String)>>,
    State(shared): State<Arc<Shared<P>>>,
) -> Response {
    let token = token_from_query(&query);
    ws.protocols(shared.protocol.subprotocols().iter().copied())
        .on_upgrade(move |socket| handle_socket(socket, shared, token))
}

/// The single `token` query value. Missing or repeated tokens yield an
/// empty string, which never matches.
pub(super) fn token_from_query(pairs: &[(String, String)]) -> String {
    let mut tokens = pairs.iter().filter(|(key, _)| key == "token");
    match (tokens.next(), tokens.next()) {
        (Some((_, token)), None) => token.clone(),
        _ => String::new(),
    }
}

async fn handle_socket<P: WireProtocol>(mut socket: WebSocket, shared: Arc<Shared<P>>, token: String) {
    let expected = shared.token();
    if expected.is_empty() || token != expected {
        debug!("Rejecting WebSocket client: invalid token");
        let _ = socket
            .send(Message::Close(Some(CloseFrame {
                code: CLOSE_INVALID_TOKEN,
                reason: Cow::Borrowed("invalid token"),
            })))
            .await;
        return;
    }

    let (client, mut outbound) = shared.clients.register(!shared.protocol.requires_handshake());
    info!(client_id = %client.id, "WebSocket client connected");
    shared.publish();

    for frame in shared.protocol.on_open(&client) {
        client.send(Outbound::Text(frame));
    }

    let (mut sender, mut receiver) = socket.split();

    let writer = async {
        while let Some(frame) = outbound.recv().await {
            match frame {
                Outbound::Text(text) => {
                    if sender.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                Outbound::Close { code, reason } => {
                    let _ = sender
                        .send(Message::Close(Some(CloseFrame {
                            code,
                            reason: Cow::Borrowed(reason),
                        })))
                        .await;
                    break;
                }
            }
        }
    };

    let reader = async {
        while let Some(message) = receiver.next().await {
            match message {
                Ok(Message::Text(text)) => reply(&shared.protocol, &client, &text),
                Ok(Message::Close(_)) => break,
                Ok(_) => {}
                Err(e) => {
                    debug!(client_id = %client.id, error = %e, "WebSocket receive error");
                    break;
                }
            }
        }
    };

    tokio::select! {
        _ = writer => {}
        _ = reader => {}
    }

    if shared.clients.unregister(&client.id) {
        shared.publish();
    }
    info!(client_id = %client.id, "WebSocket client disconnected");
}

fn reply<P: WireProtocol>(protocol: &P, client: &ClientHandle, frame: &str) {
    for response in protocol.on_frame(client, frame) {
        client.send(Outbound::Text(response));
    }
}
