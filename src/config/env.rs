use serde_json::{Map, Value};
use std::ffi::OsString;

/// Environment variable prefix for config overrides.
pub const ENV_PREFIX: &str = "CHATRELAY_";

/// Keeps the variables whose name and value are valid UTF-8.
pub fn utf8_vars<I>(vars: I) -> Vec<(String, String)>
where
    I: IntoIterator<Item = (OsString, OsString)>,
{
    vars.into_iter()
        .filter_map(|(key, value)| Some((key.into_string().ok()?, value.into_string().ok()?)))
        .collect()
}

/// Turns `CHATRELAY_*` variables into a config patch.
///
/// Values stay strings; sanitization coerces them. Unknown variables are
/// ignored.
pub fn env_patch<I>(vars: I) -> Value
where
    I: IntoIterator<Item = (String, String)>,
{
    let mut root = Map::new();
    let mut ws = Map::new();

    for (name, value) in vars {
        let Some(key) = name.strip_prefix(ENV_PREFIX) else {
            continue;
        };
        let value = Value::String(value);
        match key {
            "CONNECTOR_ID" => {
                root.insert("connectorId".to_string(), value);
            }
            "CONNECT" => {
                root.insert("connect".to_string(), value);
            }
            "RECONNECT_ON_DISCONNECT" => {
                root.insert("reconnectOnDisconnect".to_string(), value);
            }
            "RECONNECT_DELAY_MS" => {
                root.insert("reconnectDelayMs".to_string(), value);
            }
            "RECONNECT_DELAY_OFFLINE_MS" => {
                root.insert("reconnectDelayOfflineMs".to_string(), value);
            }
            "GIFT_TO_SYNTHETIC_CHAT" => {
                root.insert("giftToSyntheticChat".to_string(), value);
            }
            "WS_ENABLED" => {
                ws.insert("enabled".to_string(), value);
            }
            "WS_PROTOCOL" => {
                ws.insert("protocol".to_string(), value);
            }
            "WS_HOST" => {
                ws.insert("host".to_string(), value);
            }
            "WS_PORT" => {
                ws.insert("port".to_string(), value);
            }
            "WS_TOKEN" => {
                ws.insert("token".to_string(), value);
            }
            _ => {}
        }
    }

    if !ws.is_empty() {
        root.insert("ws".to_string(), Value::Object(ws));
    }
    Value::Object(root)
}
