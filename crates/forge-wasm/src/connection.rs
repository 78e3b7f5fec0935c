use serde::Serialize;

/// Phase of the reconnect automaton
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkState {
    #[default]
    Idle,
    Connecting,
    Connected,
    Reconnecting,
    /// Retries exhausted; only a manual connect leaves this state
    Failed,
}

/// Snapshot of the client connection handed to the UI
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionState {
    pub connected: bool,
    pub connecting: bool,
    pub session_id: Option<String>,
    pub session_name: Option<String>,
    pub error: Option<String>,
    pub reconnect_attempts: u32,
    /// Milliseconds since the epoch of the last frame sent or received
    pub last_activity: Option<u64>,
    pub status: LinkState,
}
