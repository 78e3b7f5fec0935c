//! Wire protocol for the forge terminal bridge
//!
//! Both the gateway and the browser client speak these messages over the
//! `/terminal` WebSocket. Every frame is a JSON object tagged by `type`.

use serde::{Deserialize, Serialize};

// ============================================================================
// Constants
// ============================================================================

/// WebSocket endpoint path
pub const TERMINAL_ENDPOINT: &str = "/terminal";

/// Query parameter naming the target runspace
pub const RUNSPACE_PARAM: &str = "runspace";

/// Query parameter naming the session to reattach
pub const SESSION_ID_PARAM: &str = "sessionId";

// ============================================================================
// Client -> Server
// ============================================================================

/// Messages sent from client to server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientMessage {
    /// Raw keystrokes for the shell
    Input { data: String },
    /// Terminal dimensions changed
    Resize { cols: u16, rows: u16 },
    /// Run a whole command line (a carriage return is appended server-side)
    Execute { command: String },
    /// The client's message handler is mounted; release any held replay
    Ready,
}

impl ClientMessage {
    /// Parse a single text frame
    pub fn parse(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }
}

// ============================================================================
// Server -> Client
// ============================================================================

/// Messages sent from server to client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerMessage {
    /// Sent once, immediately after the socket is attached to a session
    Session {
        #[serde(rename = "sessionId")]
        session_id: String,
        restored: bool,
    },
    /// Raw terminal output (or a replay of the scrollback)
    Output { data: String },
    /// Reasoning / file activity / token context picked out of the output
    Context { data: ContextUpdate },
    /// A diff header seen in the output
    Diff { data: DiffPayload },
    /// Token usage marker seen in the output
    Cost { tokens: u64, cost: f64 },
    /// Human readable error; usually followed by the server closing the socket
    Error { data: String },
}

impl ServerMessage {
    pub fn output(data: impl Into<String>) -> Self {
        Self::Output { data: data.into() }
    }

    pub fn error(data: impl Into<String>) -> Self {
        Self::Error { data: data.into() }
    }

    /// Serialize to a text frame
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Context sideband payload
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_thought: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub files: Option<Vec<FileActivity>>,
    pub total_tokens: u64,
    pub max_tokens: u64,
}

/// A file the shell program announced it touched
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileActivity {
    pub path: String,
    pub action: FileAction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileAction {
    Read,
    Write,
    Edit,
    Create,
    Update,
    Delete,
}

impl FileAction {
    /// Match an announcement verb, case-insensitively
    pub fn from_verb(verb: &str) -> Option<Self> {
        match verb.to_ascii_lowercase().as_str() {
            "read" => Some(Self::Read),
            "write" => Some(Self::Write),
            "edit" => Some(Self::Edit),
            "create" => Some(Self::Create),
            "update" => Some(Self::Update),
            "delete" => Some(Self::Delete),
            _ => None,
        }
    }
}

/// Diff sideband payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiffPayload {
    pub file_path: String,
    pub language: String,
    pub old_content: String,
    pub new_content: String,
    pub changes: DiffStats,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffStats {
    pub additions: u32,
    pub deletions: u32,
}

/// Text placed in the final `output` frame when the shell process ends
pub fn exit_notice(code: Option<i32>) -> String {
    match code {
        Some(code) => format!("\r\n[Process exited with code {}]\r\n", code),
        None => "\r\n[Process exited with code unknown]\r\n".to_string(),
    }
}
