use serde::{Deserialize, Serialize};

/// Connection state as seen by consumers.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectorState {
    #[default]
    Idle,
    Connecting,
    Connected,
    Reconnecting,
}

impl ConnectorState {
    /// An attempt is in flight or scheduled.
    pub fn is_pending(&self) -> bool {
        matches!(self, ConnectorState::Connecting | ConnectorState::Reconnecting)
    }
}

/// Snapshot of the runtime. Consumers only ever receive copies.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeStatus {
    pub connector_id: String,
    pub connector_state: ConnectorState,
    pub room_id: Option<String>,
    /// Empty when there is no error
    pub last_error: String,
    pub total_chat_count: u64,
    pub total_gift_count: u64,
    pub ws_running: bool,
    pub ws_client_count: usize,
    pub ws_last_error: String,
}
