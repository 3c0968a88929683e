// End-to-end tests for the XMPP emulation protocol used by Moblin-style
// chat clients.

mod common;

use chatrelay::event::{Author, StreamingEvent};
use chatrelay::runtime::Runtime;
use chatrelay::transport::xmpp::{FEATURES_STANZA, SUCCESS_STANZA};
use common::{
    expect_close, free_port, next_text, wait_for_status, ws_config, ws_connect, MockHarness,
    MockOptions, WsClient, TOKEN,
};
use futures::SinkExt;
use std::time::Duration;
use tokio_tungstenite::tungstenite::Message;

async fn start(harness: &MockHarness, port: u16) -> Runtime {
    let runtime = harness.runtime();
    let status = runtime.start(ws_config("xmpp-emulation", port)).await.unwrap();
    assert!(status.ws_running, "{}", status.ws_last_error);
    runtime
}

async fn send(client: &mut WsClient, text: &str) {
    client.send(Message::Text(text.to_string())).await.unwrap();
}

/// Connects and completes the auth handshake.
async fn authenticated_client(runtime: &Runtime, port: u16) -> WsClient {
    let mut client = ws_connect(port, Some(TOKEN), Some("xmpp")).await;
    assert_eq!(next_text(&mut client).await, FEATURES_STANZA);
    wait_for_status(runtime, Duration::from_secs(2), |s| s.ws_client_count == 1).await;

    send(&mut client, "<auth xmlns='urn:ietf:params:xml:ns:xmpp-sasl' mechanism='PLAIN'/>").await;
    assert_eq!(next_text(&mut client).await, SUCCESS_STANZA);
    next_text(&mut client).await;
    client
}

#[tokio::test]
async fn test_handshake_sequence() {
    let harness = MockHarness::new(MockOptions::default());
    let port = free_port();
    let runtime = start(&harness, port).await;

    let mut client = ws_connect(port, Some(TOKEN), Some("xmpp")).await;
    let features = next_text(&mut client).await;
    assert!(features.contains("<mechanism>PLAIN</mechanism>"));
    wait_for_status(&runtime, Duration::from_secs(2), |s| s.ws_client_count == 1).await;

    send(&mut client, "<auth mechanism='PLAIN'>AHN0cmVhbQA=</auth>").await;
    assert_eq!(next_text(&mut client).await, SUCCESS_STANZA);
    assert_eq!(next_text(&mut client).await, features);

    send(&mut client, "<iq type='set' id='bind_1'><bind xmlns='urn:ietf:params:xml:ns:xmpp-bind'/></iq>").await;
    let bind = next_text(&mut client).await;
    assert!(bind.contains("<jid>stream@internal/moblin</jid>"));
}

#[tokio::test]
async fn test_chat_becomes_escaped_message_stanza() {
    let harness = MockHarness::new(MockOptions::default());
    let port = free_port();
    let runtime = start(&harness, port).await;
    let mut client = authenticated_client(&runtime, port).await;

    let author = Author::new(None, Some("al<ice".to_string()), None);
    harness.emit(StreamingEvent::chat("mock", author, "a & b <3"));

    assert_eq!(
        next_text(&mut client).await,
        "<message from=\"mock/al&lt;ice\"><body>a &amp; b &lt;3</body></message>"
    );
}

#[tokio::test]
async fn test_gift_arrives_only_as_synthetic_chat() {
    let harness = MockHarness::new(MockOptions::default());
    let port = free_port();
    let runtime = start(&harness, port).await;
    let mut client = authenticated_client(&runtime, port).await;

    harness.emit(StreamingEvent::error("ignored by xmpp", false));
    harness.emit(StreamingEvent::gift("mock", Author::named("bob"), "[GIFT] Rose x1"));

    assert_eq!(
        next_text(&mut client).await,
        "<message from=\"mock/bob\"><body>[GIFT] Rose x1</body></message>"
    );
}

#[tokio::test]
async fn test_unauthenticated_client_receives_no_chat() {
    let harness = MockHarness::new(MockOptions::default());
    let port = free_port();
    let runtime = start(&harness, port).await;

    let mut client = ws_connect(port, Some(TOKEN), Some("xmpp")).await;
    assert_eq!(next_text(&mut client).await, FEATURES_STANZA);
    wait_for_status(&runtime, Duration::from_secs(2), |s| s.ws_client_count == 1).await;

    harness.emit(StreamingEvent::chat("mock", Author::named("alice"), "too early"));
    wait_for_status(&runtime, Duration::from_secs(1), |s| s.total_chat_count == 1).await;

    send(&mut client, "<auth/>").await;
    assert_eq!(next_text(&mut client).await, SUCCESS_STANZA);
}

#[tokio::test]
async fn test_invalid_token_is_rejected() {
    let harness = MockHarness::new(MockOptions::default());
    let port = free_port();
    let runtime = start(&harness, port).await;

    let mut client = ws_connect(port, Some("wrong"), Some("xmpp")).await;
    expect_close(&mut client, 1008).await;
    assert_eq!(runtime.status().ws_client_count, 0);
}
