use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

mod throttle;


pub use throttle::{ErrorThrottle, ERROR_DEDUP_WINDOW};

/// Fallback used when an author has no usable name at all.
pub const UNKNOWN_AUTHOR: &str = "unknown";

/// Fallback platform tag for chat frames whose source did not name one.
pub const DEFAULT_PLATFORM: &str = "stream";

/// Normalized event emitted by a connector and relayed by the runtime.
///
/// Serialized with a `type` tag (`chat`, `gift`, `lifecycle`, `error`) and
/// camelCase fields; this is the exact frame shape of the JSON protocol.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StreamingEvent {
    Chat(ChatEvent),
    Gift(GiftEvent),
    Lifecycle(LifecycleEvent),
    Error(ErrorEvent),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatEvent {
    pub platform: String,
    /// Unix epoch milliseconds
    pub at: i64,
    pub author: Author,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw: Option<Value>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GiftEvent {
    pub platform: String,
    pub at: i64,
    pub author: Author,
    /// Human-readable gift line, also used for synthetic chat
    pub rendered_text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw: Option<Value>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LifecycleEvent {
    pub at: i64,
    pub state: LifecycleState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorEvent {
    pub at: i64,
    pub message: String,
    #[serde(default)]
    pub fatal: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw: Option<Value>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleState {
    Connecting,
    Connected,
    Reconnecting,
    Disconnected,
}

/// Author identity attached to chat and gift events.
///
/// `effective_name` is always populated; see [`Author::new`] for the fallback
/// chain.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Author {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default)]
    pub effective_name: String,
}

impl Author {
    /// Builds an author whose effective name is the first non-blank of
    /// display name, username, id, or [`UNKNOWN_AUTHOR`].
    pub fn new(
        id: Option<String>,
        username: Option<String>,
        display_name: Option<String>,
    ) -> Self {
        let mut author = Self {
            id: non_blank(id),
            username: non_blank(username),
            display_name: non_blank(display_name),
            effective_name: String::new(),
        };
        author.effective_name = author.resolve_name();
        author
    }

    /// Author known only by the name to display.
    pub fn named(name: &str) -> Self {
        let name = name.trim();
        Self {
            id: None,
            username: None,
            display_name: None,
            effective_name: if name.is_empty() {
                UNKNOWN_AUTHOR.to_string()
            } else {
                name.to_string()
            },
        }
    }

    /// Name to show downstream. Tolerates authors deserialized from
    /// connectors that left `effective_name` blank.
    pub fn resolve_name(&self) -> String {
        [
            Some(self.effective_name.as_str()),
            self.display_name.as_deref(),
            self.username.as_deref(),
            self.id.as_deref(),
        ]
        .into_iter()
        .flatten()
        .map(str::trim)
        .find(|candidate| !candidate.is_empty())
        .unwrap_or(UNKNOWN_AUTHOR)
        .to_string()
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Minimal chat payload handed to a transport for broadcast.
#[derive(Clone, Debug, PartialEq)]
pub struct ChatBroadcast {
    pub platform: String,
    pub author: String,
    pub message: String,
}

/// Current time as Unix epoch milliseconds.
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

impl StreamingEvent {
    pub fn chat(platform: &str, author: Author, message: &str) -> Self {
        StreamingEvent::Chat(ChatEvent {
            platform: platform.to_string(),
            at: now_millis(),
            author,
            message: message.to_string(),
            raw: None,
        })
    }

    pub fn gift(platform: &str, author: Author, rendered_text: &str) -> Self {
        StreamingEvent::Gift(GiftEvent {
            platform: platform.to_string(),
            at: now_millis(),
            author,
            rendered_text: rendered_text.to_string(),
            raw: None,
        })
    }

    pub fn lifecycle(state: LifecycleState) -> Self {
        StreamingEvent::Lifecycle(LifecycleEvent {
            at: now_millis(),
            state,
            room_id: None,
            reason: None,
        })
    }

    pub fn connected(room_id: Option<String>) -> Self {
        StreamingEvent::Lifecycle(LifecycleEvent {
            at: now_millis(),
            state: LifecycleState::Connected,
            room_id,
            reason: None,
        })
    }

    pub fn disconnected(reason: &str) -> Self {
        StreamingEvent::Lifecycle(LifecycleEvent {
            at: now_millis(),
            state: LifecycleState::Disconnected,
            room_id: None,
            reason: Some(reason.to_string()).filter(|r| !r.is_empty()),
        })
    }

    pub fn error(message: &str, fatal: bool) -> Self {
        StreamingEvent::Error(ErrorEvent {
            at: now_millis(),
            message: message.to_string(),
            fatal,
            raw: None,
        })
    }

    /// Attaches the upstream payload the event was derived from.
    pub fn with_raw(mut self, value: Value) -> Self {
        match &mut self {
            StreamingEvent::Chat(e) => e.raw = Some(value),
            StreamingEvent::Gift(e) => e.raw = Some(value),
            StreamingEvent::Error(e) => e.raw = Some(value),
            StreamingEvent::Lifecycle(_) => {}
        }
        self
    }

    /// Wire tag of the event (`chat`, `gift`, `lifecycle`, `error`).
    pub fn kind(&self) -> &'static str {
        match self {
            StreamingEvent::Chat(_) => "chat",
            StreamingEvent::Gift(_) => "gift",
            StreamingEvent::Lifecycle(_) => "lifecycle",
            StreamingEvent::Error(_) => "error",
        }
    }
}
