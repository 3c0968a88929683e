#![allow(dead_code)]

use anyhow::{bail, Result};
use async_trait::async_trait;
use chatrelay::connector::{Connector, ConnectorDefinition, EventEmitter};
use chatrelay::event::StreamingEvent;
use chatrelay::runtime::{Runtime, RuntimeStatus};
use serde_json::{json, Map, Value};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use futures::StreamExt;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout, Instant};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

pub const MOCK_ID: &str = "mock-connector";
pub const MOCK_PLATFORM: &str = "mock";

/// Behavior of every connector created by a [`MockHarness`].
#[derive(Clone, Debug, Default)]
pub struct MockOptions {
    /// Delay inside `connect` before it settles
    pub connect_delay: Option<Duration>,
    /// Emit `disconnected("mock disconnect")` this long after connecting
    pub auto_disconnect: Option<Duration>,
    /// Number of upcoming connects that fail with `failure_message`
    pub failures: usize,
    pub failure_message: String,
    /// Emit `disconnected(reason)` instead of `connected`, then still resolve Ok
    pub drop_before_settle: Option<String>,
}

struct Instance {
    emit: EventEmitter,
    disconnected: Arc<AtomicBool>,
}

#[derive(Default)]
struct HarnessState {
    instances: Mutex<Vec<Instance>>,
    connects: AtomicUsize,
    failures_left: AtomicUsize,
}

/// Scriptable connector: records every instance so tests can emit through
/// current or superseded ones.
#[derive(Clone)]
pub struct MockHarness {
    options: MockOptions,
    state: Arc<HarnessState>,
}

impl MockHarness {
    pub fn new(options: MockOptions) -> Self {
        let state = HarnessState {
            failures_left: AtomicUsize::new(options.failures),
            ..Default::default()
        };
        Self {
            options,
            state: Arc::new(state),
        }
    }

    pub fn definition(&self) -> ConnectorDefinition {
        let harness = self.clone();
        ConnectorDefinition::new(MOCK_ID, MOCK_PLATFORM, move || MockConnector {
            harness: harness.clone(),
            disconnected: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn runtime(&self) -> Runtime {
        Runtime::with_connectors(vec![self.definition()]).unwrap()
    }

    pub fn connect_count(&self) -> usize {
        self.state.connects.load(Ordering::SeqCst)
    }

    /// Emits through the most recent connector instance.
    pub fn emit(&self, event: StreamingEvent) {
        let instances = self.state.instances.lock().unwrap();
        if let Some(instance) = instances.last() {
            instance.emit.emit(event);
        }
    }

    /// Emits through the `index`-th instance ever connected.
    pub fn emit_from(&self, index: usize, event: StreamingEvent) {
        let instances = self.state.instances.lock().unwrap();
        instances[index].emit.emit(event);
    }

    pub fn was_disconnected(&self, index: usize) -> bool {
        let instances = self.state.instances.lock().unwrap();
        instances[index].disconnected.load(Ordering::SeqCst)
    }
}

struct MockConnector {
    harness: MockHarness,
    disconnected: Arc<AtomicBool>,
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, _config: &Map<String, Value>, emit: EventEmitter) -> Result<()> {
        let state = &self.harness.state;
        let options = &self.harness.options;
        state.connects.fetch_add(1, Ordering::SeqCst);
        state.instances.lock().unwrap().push(Instance {
            emit: emit.clone(),
            disconnected: self.disconnected.clone(),
        });

        if let Some(delay) = options.connect_delay {
            sleep(delay).await;
        }

        let fail = state
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if fail {
            bail!("{}", options.failure_message);
        }

        if let Some(reason) = &options.drop_before_settle {
            emit.emit(StreamingEvent::disconnected(reason));
            return Ok(());
        }

        emit.emit(StreamingEvent::connected(Some("room-1".to_string())));

        if let Some(after) = options.auto_disconnect {
            let disconnected = self.disconnected.clone();
            tokio::spawn(async move {
                sleep(after).await;
                if !disconnected.load(Ordering::SeqCst) {
                    emit.emit(StreamingEvent::disconnected("mock disconnect"));
                }
            });
        }
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.disconnected.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// A port that was free a moment ago.
pub fn free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

pub async fn wait_for_status<F>(runtime: &Runtime, within: Duration, predicate: F) -> RuntimeStatus
where
    F: Fn(&RuntimeStatus) -> bool,
{
    let mut rx = runtime.watch_status();
    let deadline = Instant::now() + within;
    loop {
        {
            let status = rx.borrow_and_update();
            if predicate(&status) {
                return status.clone();
            }
        }
        let remaining = deadline.saturating_duration_since(Instant::now());
        match timeout(remaining, rx.changed()).await {
            Ok(Ok(())) => continue,
            _ => panic!("status condition not met; last status: {:?}", runtime.status()),
        }
    }
}

pub async fn wait_until<F>(within: Duration, condition: F)
where
    F: Fn() -> bool,
{
    let deadline = Instant::now() + within;
    while !condition() {
        assert!(Instant::now() < deadline, "condition not met in {:?}", within);
        sleep(Duration::from_millis(10)).await;
    }
}

/// Collects events from `on_event` into a channel.
pub fn collect_events(runtime: &Runtime) -> mpsc::UnboundedReceiver<StreamingEvent> {
    let (tx, rx) = mpsc::unbounded_channel();
    // Dropping the handle leaves the listener registered
    drop(runtime.on_event(move |event| {
        let _ = tx.send(event);
    }));
    rx
}

pub async fn next_event(rx: &mut mpsc::UnboundedReceiver<StreamingEvent>) -> StreamingEvent {
    timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event channel closed")
}

// ── WebSocket clients ────────────────────────────────────────────────────────

pub type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub const TOKEN: &str = "secret";

/// Runtime config with the mock connector connected and the WebSocket
/// server enabled on a loopback port.
pub fn ws_config(protocol: &str, port: u16) -> Value {
    json!({
        "connectorId": MOCK_ID,
        "connect": true,
        "ws": {
            "enabled": true,
            "protocol": protocol,
            "host": "127.0.0.1",
            "port": port,
            "token": TOKEN
        }
    })
}

pub async fn ws_connect(port: u16, token: Option<&str>, subprotocol: Option<&str>) -> WsClient {
    let url = match token {
        Some(token) => format!("ws://127.0.0.1:{}/ws?token={}", port, token),
        None => format!("ws://127.0.0.1:{}/ws", port),
    };
    let mut request = url.into_client_request().unwrap();
    if let Some(subprotocol) = subprotocol {
        request
            .headers_mut()
            .insert("sec-websocket-protocol", subprotocol.parse().unwrap());
    }
    let (client, _) = connect_async(request).await.unwrap();
    client
}

pub async fn next_text(client: &mut WsClient) -> String {
    loop {
        let message = timeout(Duration::from_secs(2), client.next())
            .await
            .expect("timed out waiting for frame")
            .expect("stream ended")
            .unwrap();
        match message {
            Message::Text(text) => return text,
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("Expected text frame, got {:?}", other),
        }
    }
}

pub async fn next_json(client: &mut WsClient) -> Value {
    serde_json::from_str(&next_text(client).await).unwrap()
}

pub async fn expect_close(client: &mut WsClient, code: u16) {
    loop {
        let message = timeout(Duration::from_secs(2), client.next())
            .await
            .expect("timed out waiting for close");
        match message {
            Some(Ok(Message::Close(Some(frame)))) => {
                assert_eq!(u16::from(frame.code), code);
                return;
            }
            Some(Ok(Message::Close(None))) => panic!("Close frame without a code"),
            Some(Ok(_)) => continue,
            other => panic!("Expected close frame, got {:?}", other),
        }
    }
}
