//! Connector contract - the bridge between one upstream live source and the
//! runtime.
//!
//! A connector is created fresh for every connect attempt from its
//! [`ConnectorDefinition`]. The runtime hands it the connector-specific part of
//! the config plus an [`EventEmitter`], and later calls `disconnect`.
//!
//! ```text
//! Upstream live source (TikTok, ...)
//!          ↓
//! ┌─────────────────────────────────────────┐
//! │     Connector (implements trait)         │
//! │  - Talk to the upstream source           │
//! │  - Normalize into StreamingEvents        │
//! └─────────────────────────────────────────┘
//!          ↓ EventEmitter
//! ┌─────────────────────────────────────────┐
//! │     Runtime                              │
//! │  - Fence stale attempts                  │
//! │  - Track status, reconnect               │
//! │  - Relay to listeners and transport      │
//! └─────────────────────────────────────────┘
//! ```

mod registry;
pub mod tiktok;

pub use registry::{builtin_connectors, ConnectorRegistry, RegistryError};

use crate::event::StreamingEvent;
use anyhow::Result;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;

/// Upstream connector interface.
///
/// # Contract
/// - `connect` resolves once the initial connection has settled; that is not
///   the end of the stream. Events may be emitted before and after it resolves.
/// - An error from `connect` means the instance is dead.
/// - `disconnect` must be safe to call at any time, including before
///   `connect` or more than once.
///
/// # Example
/// ```no_run
/// use anyhow::Result;
/// use async_trait::async_trait;
/// use chatrelay::connector::{Connector, EventEmitter};
/// use chatrelay::event::{Author, StreamingEvent};
/// use serde_json::{Map, Value};
///
/// struct EchoConnector;
///
/// #[async_trait]
/// impl Connector for EchoConnector {
///     async fn connect(&self, _config: &Map<String, Value>, emit: EventEmitter) -> Result<()> {
///         emit.emit(StreamingEvent::connected(None));
///         emit.emit(StreamingEvent::chat("echo", Author::named("bot"), "hello"));
///         Ok(())
///     }
///
///     async fn disconnect(&self) -> Result<()> {
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait Connector: Send + Sync {
    /// Opens the upstream connection and starts pushing events to `emit`.
    async fn connect(&self, config: &Map<String, Value>, emit: EventEmitter) -> Result<()>;

    /// Closes the upstream connection. Idempotent.
    async fn disconnect(&self) -> Result<()>;
}

/// Non-blocking event sink handed to a connector.
#[derive(Clone)]
pub struct EventEmitter {
    sink: Arc<dyn Fn(StreamingEvent) + Send + Sync>,
}

impl EventEmitter {
    pub fn new<F>(sink: F) -> Self
    where
        F: Fn(StreamingEvent) + Send + Sync + 'static,
    {
        Self {
            sink: Arc::new(sink),
        }
    }

    pub fn emit(&self, event: StreamingEvent) {
        (self.sink)(event)
    }
}

impl fmt::Debug for EventEmitter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventEmitter").finish_non_exhaustive()
    }
}

type ConnectorFactory = Arc<dyn Fn() -> Arc<dyn Connector> + Send + Sync>;
type ConfigHook = Arc<dyn Fn(&mut Map<String, Value>, bool) -> Vec<String> + Send + Sync>;

/// Registered connector: identity plus a factory for fresh instances.
#[derive(Clone)]
pub struct ConnectorDefinition {
    pub id: String,
    /// Platform tag stamped on events (e.g. "tiktok")
    pub platform: String,
    factory: ConnectorFactory,
    config_hook: Option<ConfigHook>,
}

impl ConnectorDefinition {
    pub fn new<F, C>(id: impl Into<String>, platform: impl Into<String>, factory: F) -> Self
    where
        F: Fn() -> C + Send + Sync + 'static,
        C: Connector + 'static,
    {
        Self {
            id: id.into(),
            platform: platform.into(),
            factory: Arc::new(move || Arc::new(factory()) as Arc<dyn Connector>),
            config_hook: None,
        }
    }

    /// Adds a hook that normalizes this connector's config in place and
    /// returns validation errors. The flag is the desired `connect` state.
    pub fn with_config_hook<H>(mut self, hook: H) -> Self
    where
        H: Fn(&mut Map<String, Value>, bool) -> Vec<String> + Send + Sync + 'static,
    {
        self.config_hook = Some(Arc::new(hook));
        self
    }

    /// Creates a new, unconnected instance.
    pub fn create(&self) -> Arc<dyn Connector> {
        (self.factory)()
    }

    pub fn prepare_config(&self, config: &mut Map<String, Value>, connect: bool) -> Vec<String> {
        match &self.config_hook {
            Some(hook) => hook(config, connect),
            None => Vec::new(),
        }
    }
}

impl fmt::Debug for ConnectorDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectorDefinition")
            .field("id", &self.id)
            .field("platform", &self.platform)
            .finish_non_exhaustive()
    }
}
