/// Backend abstraction for PTY and tmux shells
use anyhow::Result;
use async_trait::async_trait;
use std::path::PathBuf;
use tokio::sync::mpsc;

use super::{DEFAULT_COLS, DEFAULT_ROWS};

/// Terminal dimensions in character cells
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TerminalSize {
    pub cols: u16,
    pub rows: u16,
}

impl Default for TerminalSize {
    fn default() -> Self {
        Self {
            cols: DEFAULT_COLS,
            rows: DEFAULT_ROWS,
        }
    }
}

/// Something the shell process did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessEvent {
    /// A chunk of output, decoded as UTF-8
    Output(String),
    /// The process ended; no further events follow
    Exit(Option<i32>),
}

/// Handle to a running shell process
///
/// Output and exit notifications are not part of the handle: they arrive on the
/// event receiver returned next to it in [`SpawnedProcess`].
pub trait TerminalProcess: Send {
    /// Write raw input to the process
    fn write(&mut self, data: &str) -> Result<()>;

    /// Resize the pseudo-terminal
    fn resize(&mut self, size: TerminalSize) -> Result<()>;

    /// Terminate the process
    fn kill(&mut self) -> Result<()>;

    /// OS process id, if known
    fn pid(&self) -> Option<u32>;
}

/// A freshly spawned process: the handle plus its single event stream
pub struct SpawnedProcess {
    pub process: Box<dyn TerminalProcess>,
    pub events: mpsc::UnboundedReceiver<ProcessEvent>,
}

impl std::fmt::Debug for SpawnedProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpawnedProcess")
            .field("pid", &self.process.pid())
            .finish()
    }
}

/// Everything a backend needs to start a shell
#[derive(Debug, Clone)]
pub struct SpawnRequest {
    /// Runspace the shell is scoped to (`None` for the unscoped default shell)
    pub runspace_id: Option<String>,
    pub program: String,
    pub args: Vec<String>,
    pub working_dir: PathBuf,
    pub env: Vec<(String, String)>,
    pub size: TerminalSize,
}

/// Shell backend trait - every backend yields the same process interface
#[async_trait]
pub trait ShellBackend: Send + Sync {
    /// Start a shell described by `request`
    async fn spawn(&self, request: SpawnRequest) -> Result<SpawnedProcess>;

    /// Release anything held for `runspace_id`
    /// Must be safe to call repeatedly and when nothing is held
    async fn release(&self, runspace_id: &str) -> Result<()>;

    /// Get backend name for debugging
    fn backend_name(&self) -> &str;
}

/// Configuration for which backend isolated runspaces use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TerminalBackendType {
    /// Plain local PTY
    #[default]
    Pty,
    /// Dedicated tmux server per runspace
    Tmux,
}

impl std::str::FromStr for TerminalBackendType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "pty" | "local" => Ok(Self::Pty),
            "tmux" => Ok(Self::Tmux),
            _ => Err(anyhow::anyhow!(
                "Invalid terminal backend: '{}'. Valid options: 'pty', 'tmux'",
                s
            )),
        }
    }
}

impl std::fmt::Display for TerminalBackendType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pty => write!(f, "pty"),
            Self::Tmux => write!(f, "tmux"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_type_parsing() {
        assert_eq!("pty".parse::<TerminalBackendType>().unwrap(), TerminalBackendType::Pty);
        assert_eq!("LOCAL".parse::<TerminalBackendType>().unwrap(), TerminalBackendType::Pty);
        assert_eq!("tmux".parse::<TerminalBackendType>().unwrap(), TerminalBackendType::Tmux);
        assert!("screen".parse::<TerminalBackendType>().is_err());
        assert_eq!(TerminalBackendType::Tmux.to_string(), "tmux");
    }
}
