use super::{
    RuntimeConfig, WsConfig, WsProtocol, RECONNECT_DELAY_MAX_MS, RECONNECT_DELAY_MIN_MS,
    RECONNECT_DELAY_OFFLINE_MAX_MS, WS_PORT_MAX, WS_PORT_MIN,
};
use serde_json::{Map, Value};

/// Builds a sanitized config from untrusted JSON.
///
/// Every field is coerced independently; anything unusable falls back to
/// the default for that field, and numeric fields are floored then clamped.
pub fn sanitize_config(raw: &Value) -> RuntimeConfig {
    let defaults = RuntimeConfig::default();
    let empty = Map::new();
    let row = raw.as_object().unwrap_or(&empty);
    let ws = row.get("ws").and_then(Value::as_object).unwrap_or(&empty);

    let connector_id = coerce_string(row.get("connectorId"))
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or(defaults.connector_id);

    let connector_config = row
        .get("connectorConfig")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();

    RuntimeConfig {
        connector_id,
        connector_config,
        connect: coerce_bool(row.get("connect")).unwrap_or(defaults.connect),
        reconnect_on_disconnect: coerce_bool(row.get("reconnectOnDisconnect"))
            .unwrap_or(defaults.reconnect_on_disconnect),
        reconnect_delay_ms: clamp_number(
            row.get("reconnectDelayMs"),
            defaults.reconnect_delay_ms,
            RECONNECT_DELAY_MIN_MS,
            RECONNECT_DELAY_MAX_MS,
        ),
        reconnect_delay_offline_ms: clamp_number(
            row.get("reconnectDelayOfflineMs"),
            defaults.reconnect_delay_offline_ms,
            RECONNECT_DELAY_MIN_MS,
            RECONNECT_DELAY_OFFLINE_MAX_MS,
        ),
        ws: sanitize_ws(ws, defaults.ws),
        gift_to_synthetic_chat: coerce_bool(row.get("giftToSyntheticChat"))
            .unwrap_or(defaults.gift_to_synthetic_chat),
    }
}

fn sanitize_ws(ws: &Map<String, Value>, defaults: WsConfig) -> WsConfig {
    let protocol = match coerce_string(ws.get("protocol")).as_deref().map(str::trim) {
        Some("json") => WsProtocol::Json,
        _ => WsProtocol::XmppEmulation,
    };

    let host = coerce_string(ws.get("host"))
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or(defaults.host);

    let port = clamp_number(
        ws.get("port"),
        u64::from(defaults.port),
        u64::from(WS_PORT_MIN),
        u64::from(WS_PORT_MAX),
    );

    WsConfig {
        enabled: coerce_bool(ws.get("enabled")).unwrap_or(defaults.enabled),
        protocol,
        host,
        port: u16::try_from(port).unwrap_or(defaults.port),
        token: coerce_string(ws.get("token"))
            .map(|s| s.trim().to_string())
            .unwrap_or(defaults.token),
    }
}

/// Accepts JSON booleans and the strings "true"/"false" in any case.
pub fn coerce_bool(value: Option<&Value>) -> Option<bool> {
    match value? {
        Value::Bool(b) => Some(*b),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" => Some(true),
            "false" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

fn coerce_string(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn coerce_number(value: Option<&Value>) -> Option<f64> {
    // null, false and blank strings count as zero; true as one
    let number = match value? {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) if s.trim().is_empty() => 0.0,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        Value::Null => 0.0,
        Value::Bool(flag) => f64::from(u8::from(*flag)),
        _ => return None,
    };
    number.is_finite().then_some(number)
}

fn clamp_number(value: Option<&Value>, fallback: u64, min: u64, max: u64) -> u64 {
    match coerce_number(value) {
        Some(n) => n.floor().clamp(min as f64, max as f64) as u64,
        None => fallback.clamp(min, max),
    }
}
