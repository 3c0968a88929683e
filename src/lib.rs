// Normalized streaming events
pub mod event;

// Runtime configuration: sanitize, merge, validate, load
pub mod config;

// Connector contract, registry and built-in connectors
pub mod connector;

// Connection lifecycle state machine and status/event bus
pub mod runtime;

// Downstream WebSocket server and wire protocols
pub mod transport;

pub use config::{validate_config, ConfigValidation, RuntimeConfig, WsProtocol};
pub use connector::{Connector, ConnectorDefinition, ConnectorRegistry, EventEmitter};
pub use event::StreamingEvent;
pub use runtime::{ConnectorState, Runtime, RuntimeStatus, Subscription};
