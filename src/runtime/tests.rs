use super::*;
use serde_json::json;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::timeout;

async fn recv<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> T {
    timeout(Duration::from_secs(1), rx.recv())
        .await
        .expect("timed out waiting for listener")
        .expect("listener channel closed")
}

#[test]
fn test_status_serializes_camel_case() {
    let status = RuntimeStatus {
        connector_id: "tiktok-live".to_string(),
        connector_state: ConnectorState::Reconnecting,
        ws_client_count: 2,
        ..Default::default()
    };
    let value = serde_json::to_value(&status).unwrap();
    assert_eq!(value["connectorId"], "tiktok-live");
    assert_eq!(value["connectorState"], "reconnecting");
    assert_eq!(value["roomId"], serde_json::Value::Null);
    assert_eq!(value["wsClientCount"], 2);
    assert_eq!(value["totalChatCount"], 0);
    assert_eq!(value["lastError"], "");
}

#[tokio::test]
async fn test_listener_receives_initial_value_first() {
    let set = ListenerSet::<u32>::new("test");
    let (tx, mut rx) = mpsc::unbounded_channel();

    let _subscription = set.subscribe(move |value| {
        let _ = tx.send(value);
    }, || Some(1));
    set.publish(&2);
    set.publish(&3);

    assert_eq!(recv(&mut rx).await, 1);
    assert_eq!(recv(&mut rx).await, 2);
    assert_eq!(recv(&mut rx).await, 3);
}

#[tokio::test]
async fn test_unsubscribe_removes_only_that_listener() {
    let set = ListenerSet::<&'static str>::new("test");
    let (first_tx, mut first_rx) = mpsc::unbounded_channel();
    let (second_tx, mut second_rx) = mpsc::unbounded_channel();

    let first = set.subscribe(move |v| {
        let _ = first_tx.send(v);
    }, || None);
    let _second = set.subscribe(move |v| {
        let _ = second_tx.send(v);
    }, || None);
    assert_eq!(set.len(), 2);

    first.unsubscribe();
    assert_eq!(set.len(), 1);

    set.publish(&"after");
    assert_eq!(recv(&mut second_rx).await, "after");
    assert!(timeout(Duration::from_millis(50), first_rx.recv())
        .await
        .map(|v| v.is_none())
        .unwrap_or(true));
}

#[tokio::test]
async fn test_panicking_listener_is_isolated() {
    let set = ListenerSet::<u32>::new("test");
    let (tx, mut rx) = mpsc::unbounded_channel();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let seen_by_panicker = seen.clone();

    let _panicker = set.subscribe(move |value| {
        seen_by_panicker.lock().unwrap().push(value);
        if value == 1 {
            panic!("listener failure");
        }
    }, || None);
    let _healthy = set.subscribe(move |value| {
        let _ = tx.send(value);
    }, || None);

    set.publish(&1);
    set.publish(&2);

    assert_eq!(recv(&mut rx).await, 1);
    assert_eq!(recv(&mut rx).await, 2);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(*seen.lock().unwrap(), vec![1, 2]);
}

#[tokio::test]
async fn test_new_runtime_is_idle() {
    let runtime = Runtime::new(ConnectorRegistry::default());
    let status = runtime.status();
    assert_eq!(status.connector_state, ConnectorState::Idle);
    assert!(!status.ws_running);
    assert_eq!(status, RuntimeStatus::default());
}

#[tokio::test]
async fn test_start_without_connect_stays_idle() {
    let runtime = Runtime::new(ConnectorRegistry::default());
    let status = runtime
        .start(json!({"connectorId": "missing", "connect": false}))
        .await
        .unwrap();
    assert_eq!(status.connector_id, "missing");
    assert_eq!(status.connector_state, ConnectorState::Idle);
}

#[tokio::test]
async fn test_start_with_unknown_connector_fails() {
    let runtime = Runtime::new(ConnectorRegistry::default());
    let err = runtime
        .start(json!({"connectorId": "missing", "connect": true}))
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "Connector 'missing' was not found.");
    assert_eq!(runtime.status().last_error, "Connector 'missing' was not found.");
}

#[tokio::test]
async fn test_ws_enabled_without_token_records_error() {
    let runtime = Runtime::new(ConnectorRegistry::default());
    let status = runtime
        .start(json!({"ws": {"enabled": true, "token": "  "}}))
        .await
        .unwrap();
    assert!(!status.ws_running);
    assert_eq!(status.ws_last_error, "A WebSocket token is required.");
}

#[tokio::test]
async fn test_on_status_delivers_snapshot_immediately() {
    let runtime = Runtime::new(ConnectorRegistry::default());
    let (tx, mut rx) = mpsc::unbounded_channel();
    let subscription = runtime.on_status(move |status| {
        let _ = tx.send(status);
    });

    assert_eq!(recv(&mut rx).await.connector_state, ConnectorState::Idle);
    subscription.unsubscribe();
}

#[tokio::test]
async fn test_stop_is_idempotent() {
    let runtime = Runtime::new(ConnectorRegistry::default());
    let first = runtime.stop().await;
    let second = runtime.stop().await;
    assert_eq!(first, second);
    assert_eq!(second.connector_state, ConnectorState::Idle);
}
