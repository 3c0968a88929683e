pub mod env;
mod sanitize;


pub use env::{env_patch, utf8_vars};
pub use sanitize::{coerce_bool, sanitize_config};

use crate::connector::ConnectorRegistry;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const RECONNECT_DELAY_MIN_MS: u64 = 1_000;
pub const RECONNECT_DELAY_MAX_MS: u64 = 60_000;
pub const RECONNECT_DELAY_OFFLINE_MAX_MS: u64 = 600_000;
pub const WS_PORT_MIN: u16 = 1024;
pub const WS_PORT_MAX: u16 = 65535;

/// Wire protocol spoken by the downstream WebSocket server.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum WsProtocol {
    #[serde(rename = "json")]
    Json,
    #[serde(rename = "xmpp-emulation", alias = "moblin-xmpp")]
    XmppEmulation,
}

impl WsProtocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            WsProtocol::Json => "json",
            WsProtocol::XmppEmulation => "xmpp-emulation",
        }
    }
}

/// Downstream WebSocket server settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WsConfig {
    pub enabled: bool,
    pub protocol: WsProtocol,
    pub host: String,
    pub port: u16,
    /// Shared secret clients pass as `?token=`
    pub token: String,
}

impl Default for WsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            protocol: WsProtocol::XmppEmulation,
            host: "0.0.0.0".to_string(),
            port: 5443,
            token: String::new(),
        }
    }
}

/// Runtime configuration. Always held in sanitized form: build it with
/// [`RuntimeConfig::sanitize`] or [`RuntimeConfig::merged`] rather than by
/// hand when the input comes from outside.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeConfig {
    pub connector_id: String,
    /// Connector-specific settings, passed through untouched
    pub connector_config: Map<String, Value>,
    /// Desired connection state
    pub connect: bool,
    pub reconnect_on_disconnect: bool,
    pub reconnect_delay_ms: u64,
    /// Delay used when the source reported it is not live
    pub reconnect_delay_offline_ms: u64,
    pub ws: WsConfig,
    pub gift_to_synthetic_chat: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            connector_id: String::new(),
            connector_config: Map::new(),
            connect: false,
            reconnect_on_disconnect: true,
            reconnect_delay_ms: 5_000,
            reconnect_delay_offline_ms: 30_000,
            ws: WsConfig::default(),
            gift_to_synthetic_chat: true,
        }
    }
}

impl RuntimeConfig {
    /// Coerces arbitrary JSON into a valid config, falling back to defaults
    /// field by field.
    pub fn sanitize(raw: &Value) -> Self {
        sanitize_config(raw)
    }

    /// Applies a partial update. Top-level keys replace their previous value,
    /// except `connectorConfig` and `ws`, which are merged key by key.
    pub fn merged(&self, patch: &Value) -> Self {
        let mut base = self.to_value();
        if let (Value::Object(base_map), Value::Object(patch_map)) = (&mut base, patch) {
            for (key, value) in patch_map {
                match key.as_str() {
                    "connectorConfig" | "ws" => {
                        if let (Some(Value::Object(target)), Value::Object(source)) =
                            (base_map.get_mut(key), value)
                        {
                            for (k, v) in source {
                                target.insert(k.clone(), v.clone());
                            }
                        }
                    }
                    _ => {
                        base_map.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        sanitize_config(&base)
    }

    /// Overlays `CHATRELAY_*` environment variables on top of this config.
    pub fn with_env_overrides(&self) -> Self {
        self.merged(&env_patch(utf8_vars(std::env::vars_os())))
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or_else(|_| Value::Object(Map::new()))
    }
}

/// Outcome of [`validate_config`]. Errors are human-readable and never raised.
#[derive(Clone, Debug, PartialEq)]
pub struct ConfigValidation {
    pub ok: bool,
    pub errors: Vec<String>,
    /// Sanitized config, including connector-side normalization
    pub config: RuntimeConfig,
}

/// Checks a raw config before any connection attempt.
pub fn validate_config(raw: &Value, registry: &ConnectorRegistry) -> ConfigValidation {
    let mut config = sanitize_config(raw);
    let mut errors = Vec::new();

    if config.connect && config.connector_id.is_empty() {
        errors.push("connectorId is required when connect=true.".to_string());
    }

    if !config.connector_id.is_empty() {
        match registry.get(&config.connector_id) {
            Some(definition) => {
                errors.extend(definition.prepare_config(&mut config.connector_config, config.connect));
            }
            None => errors.push(format!(
                "Connector '{}' was not found.",
                config.connector_id
            )),
        }
    }

    if config.ws.enabled && config.ws.token.is_empty() {
        errors.push("A WebSocket token is required when the WebSocket server is enabled.".to_string());
    }

    ConfigValidation {
        ok: errors.is_empty(),
        errors,
        config,
    }
}

/// Load configuration from TOML file
pub fn load_config(path: &str) -> Result<RuntimeConfig> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file '{}'", path))?;
    let raw: Value = toml::from_str(&contents)
        .with_context(|| format!("Failed to parse config file '{}'", path))?;
    Ok(sanitize_config(&raw))
}
