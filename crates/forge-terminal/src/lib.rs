// Terminal process management for the forge terminal bridge
//
// This crate owns everything that touches a shell process: spawning it through a
// pluggable backend (plain PTY or an isolated tmux server per runspace), the bounded
// scrollback used for replay, and the sideband scanner run over every output chunk.

mod error;
mod pty_handler;
mod pty_backend;
mod tmux_backend;
mod manager;
pub mod backend;
pub mod interceptor;
pub mod runspace;
pub mod scrollback;
pub mod shell;

// Re-export public API
pub use backend::{
    ProcessEvent, ShellBackend, SpawnRequest, SpawnedProcess, TerminalBackendType, TerminalProcess,
    TerminalSize,
};
pub use error::TerminalError;
pub use interceptor::{ContextTracker, Signal};
pub use manager::TerminalManager;
pub use pty_backend::PtyBackend;
pub use runspace::{Isolation, Runspace, RunspaceProvider, StaticRunspaces};
pub use scrollback::Scrollback;
pub use shell::ShellConfig;
pub use tmux_backend::TmuxBackend;

// Constants
pub const DEFAULT_COLS: u16 = 80;
pub const DEFAULT_ROWS: u16 = 24;
pub const DEFAULT_SCROLLBACK_BYTES: usize = 100_000;
pub const DEFAULT_MAX_TOKENS: u64 = 200_000;
