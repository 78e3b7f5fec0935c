use anyhow::{Context, Result};
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use forge_terminal::{
    ShellConfig, StaticRunspaces, TerminalBackendType, TerminalSize, DEFAULT_COLS,
    DEFAULT_MAX_TOKENS, DEFAULT_ROWS, DEFAULT_SCROLLBACK_BYTES,
};

/// Seconds an orphaned session survives before it is reaped
pub const DEFAULT_KEEPALIVE_SECS: u64 = 300;

/// Messages queued for one socket before it counts as stalled
pub const DEFAULT_OUTBOUND_CAPACITY: usize = 1024;

/// CLI arguments for the forge terminal bridge
#[derive(Parser, Debug, Clone)]
#[command(name = "forge-server")]
#[command(about = "Persistent browser terminal sessions for the forge platform")]
#[command(version)]
pub struct Cli {
    /// Address to bind the HTTP/WebSocket server to
    #[arg(long, env = "FORGE_BIND", default_value = "127.0.0.1")]
    pub bind: String,

    /// Port to listen on
    #[arg(short, long, env = "FORGE_PORT", default_value_t = 8003)]
    pub port: u16,

    /// Seconds a disconnected session's shell is kept alive for reattachment
    #[arg(long, env = "FORGE_KEEPALIVE_SECS", default_value_t = DEFAULT_KEEPALIVE_SECS)]
    pub keepalive_secs: u64,

    /// Bytes of output retained per session for replay
    #[arg(long, env = "FORGE_SCROLLBACK_BYTES", default_value_t = DEFAULT_SCROLLBACK_BYTES)]
    pub scrollback_bytes: usize,

    /// Messages queued per socket before a stalled client is detached
    #[arg(long, env = "FORGE_OUTBOUND_CAPACITY", default_value_t = DEFAULT_OUTBOUND_CAPACITY)]
    pub outbound_capacity: usize,

    /// Context window size reported in context messages
    #[arg(long, env = "FORGE_MAX_TOKENS", default_value_t = DEFAULT_MAX_TOKENS)]
    pub max_tokens: u64,

    /// Shell program (default: $SHELL, else /bin/bash)
    #[arg(long, env = "FORGE_SHELL", value_name = "PROGRAM")]
    pub shell: Option<String>,

    /// Initial terminal width
    #[arg(long, env = "FORGE_COLS", default_value_t = DEFAULT_COLS)]
    pub cols: u16,

    /// Initial terminal height
    #[arg(long, env = "FORGE_ROWS", default_value_t = DEFAULT_ROWS)]
    pub rows: u16,

    /// Working directory for shells not scoped to a runspace
    #[arg(long, env = "FORGE_WORK_DIR", value_name = "DIR")]
    pub work_dir: Option<PathBuf>,

    /// TOML file describing the available runspaces
    #[arg(long, env = "FORGE_RUNSPACES", value_name = "PATH")]
    pub runspaces: Option<PathBuf>,

    /// Backend for unscoped shells (pty, tmux)
    #[arg(long, env = "FORGE_TERMINAL_BACKEND", default_value = "pty", value_name = "BACKEND")]
    pub terminal_backend: String,

    /// Directory with the browser client bundle to serve
    #[arg(long, env = "FORGE_WEB_DIR", value_name = "DIR")]
    pub web_dir: Option<PathBuf>,

    /// Log filter used when RUST_LOG is not set
    #[arg(long, env = "FORGE_LOG", default_value = "info")]
    pub log_level: String,
}

/// Tuning values for the session registry
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub keepalive: Duration,
    pub scrollback_bytes: usize,
    pub max_tokens: u64,
    pub outbound_capacity: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            keepalive: Duration::from_secs(DEFAULT_KEEPALIVE_SECS),
            scrollback_bytes: DEFAULT_SCROLLBACK_BYTES,
            max_tokens: DEFAULT_MAX_TOKENS,
            outbound_capacity: DEFAULT_OUTBOUND_CAPACITY,
        }
    }
}

impl Cli {
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.bind, self.port)
            .parse()
            .with_context(|| format!("invalid bind address {}:{}", self.bind, self.port))
    }

    pub fn gateway_config(&self) -> GatewayConfig {
        GatewayConfig {
            keepalive: Duration::from_secs(self.keepalive_secs),
            scrollback_bytes: self.scrollback_bytes,
            max_tokens: self.max_tokens,
            outbound_capacity: self.outbound_capacity,
        }
    }

    pub fn terminal_backend(&self) -> Result<TerminalBackendType> {
        self.terminal_backend
            .parse()
            .context("failed to parse --terminal-backend")
    }

    pub fn shell_config(&self) -> Result<ShellConfig> {
        if self.cols == 0 || self.rows == 0 {
            anyhow::bail!("terminal size must be non-zero, got {}x{}", self.cols, self.rows);
        }

        let mut shell = ShellConfig::default();
        if let Some(program) = &self.shell {
            shell.program = program.clone();
        }
        if let Some(dir) = &self.work_dir {
            if !dir.is_dir() {
                anyhow::bail!("working directory {} does not exist", dir.display());
            }
            shell.default_dir = dir.clone();
        }
        shell.size = TerminalSize {
            cols: self.cols,
            rows: self.rows,
        };
        Ok(shell)
    }

    /// Runspaces from `--runspaces`, or none
    pub fn load_runspaces(&self) -> Result<StaticRunspaces> {
        match &self.runspaces {
            Some(path) => Ok(StaticRunspaces::load(path)?),
            None => Ok(StaticRunspaces::empty()),
        }
    }
}
