/// Tmux-based shell backend (isolated per runspace)
use super::backend::{ShellBackend, SpawnRequest, SpawnedProcess, TerminalProcess, TerminalSize};
use super::pty_handler::PtyHandler;
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use portable_pty::CommandBuilder;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::process::Command;
use tokio::sync::Mutex;

/// Socket used for shells that are not scoped to a runspace
const DEFAULT_SOCKET: &str = "forge-default";

/// Tmux backend: every runspace runs behind its own tmux server
///
/// The tmux server (selected with `-L <socket>`) is the execution boundary. Each
/// spawn creates a separate tmux session inside it and attaches a tmux client to
/// that session from a local PTY, so the gateway sees an ordinary PTY process.
pub struct TmuxBackend {
    /// Sockets with a server started by this backend
    sockets: Mutex<HashSet<String>>,
    /// Process ID for session naming
    pid: u32,
    next_session: AtomicU64,
}

impl TmuxBackend {
    /// Create a new tmux backend
    pub fn new() -> Result<Self> {
        // Verify tmux is available
        let output = std::process::Command::new("tmux").arg("-V").output()?;
        if !output.status.success() {
            bail!("tmux command failed - ensure tmux is installed and working");
        }

        Ok(Self {
            sockets: Mutex::new(HashSet::new()),
            pid: std::process::id(),
            next_session: AtomicU64::new(1),
        })
    }

    /// Tmux server socket name for a runspace
    /// Format: forge-{runspace_id}, restricted to characters tmux accepts
    pub fn socket_name(runspace_id: Option<&str>) -> String {
        match runspace_id {
            None => DEFAULT_SOCKET.to_string(),
            Some(id) => {
                let safe: String = id
                    .chars()
                    .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
                    .collect();
                format!("forge-{}", safe)
            }
        }
    }

    /// Generate a tmux session name
    /// Format: forge-{pid}-{n}
    fn tmux_session_name(&self) -> String {
        let n = self.next_session.fetch_add(1, Ordering::Relaxed);
        format!("forge-{}-{}", self.pid, n)
    }
}

/// Run a tmux command against `socket` and return stdout
async fn run_tmux_command(socket: &str, args: &[&str]) -> Result<String> {
    let output = Command::new("tmux")
        .arg("-L")
        .arg(socket)
        .args(args)
        .kill_on_drop(true)
        .output()
        .await?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!("tmux command failed: {}", stderr.trim());
    }

    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}

/// Build the tmux client command that creates and attaches a fresh session
fn new_session_command(socket: &str, session_name: &str, request: &SpawnRequest) -> CommandBuilder {
    let mut cmd = CommandBuilder::new("tmux");
    cmd.args(["-L", socket, "new-session", "-s", session_name]);
    cmd.arg("-c");
    cmd.arg(&request.working_dir);
    cmd.arg("-x");
    cmd.arg(request.size.cols.to_string());
    cmd.arg("-y");
    cmd.arg(request.size.rows.to_string());
    for (key, value) in &request.env {
        cmd.arg("-e");
        cmd.arg(format!("{}={}", key, value));
    }

    // tmux hands a single shell-command to `sh -c`
    let shell: Vec<String> = std::iter::once(&request.program)
        .chain(&request.args)
        .map(|arg| shell_quote(arg))
        .collect();
    cmd.arg(shell.join(" "));

    cmd.cwd(&request.working_dir);
    // The client itself needs a sane terminal type to attach
    for (key, value) in &request.env {
        if key == "TERM" {
            cmd.env(key, value);
        }
    }
    cmd
}

/// Quote `arg` for `sh` unless it is made only of safe characters
fn shell_quote(arg: &str) -> String {
    let safe = !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "/._-=:,+@%".contains(c));
    if safe {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', r"'\''"))
    }
}

#[async_trait]
impl ShellBackend for TmuxBackend {
    async fn spawn(&self, request: SpawnRequest) -> Result<SpawnedProcess> {
        if !request.working_dir.is_dir() {
            bail!(
                "Working directory {} does not exist",
                request.working_dir.display()
            );
        }

        let socket = Self::socket_name(request.runspace_id.as_deref());
        let session_name = self.tmux_session_name();
        let cmd = new_session_command(&socket, &session_name, &request);

        let (client, events) = PtyHandler::spawn(cmd, request.size)
            .with_context(|| format!("Failed to attach tmux session {}", session_name))?;

        self.sockets.lock().await.insert(socket.clone());
        tracing::debug!(
            socket = %socket,
            session = %session_name,
            pid = ?client.pid(),
            "spawned tmux shell"
        );

        Ok(SpawnedProcess {
            process: Box::new(TmuxProcess {
                client,
                socket,
                session_name,
            }),
            events,
        })
    }

    async fn release(&self, runspace_id: &str) -> Result<()> {
        let socket = Self::socket_name(Some(runspace_id));
        if !self.sockets.lock().await.remove(&socket) {
            return Ok(());
        }

        // The server may already be gone if its last session exited
        if let Err(e) = run_tmux_command(&socket, &["kill-server"]).await {
            tracing::debug!(socket = %socket, error = %e, "tmux server already stopped");
        }
        Ok(())
    }

    fn backend_name(&self) -> &str {
        "tmux"
    }
}

/// A tmux client attached to its own session
struct TmuxProcess {
    client: PtyHandler,
    socket: String,
    session_name: String,
}

impl TerminalProcess for TmuxProcess {
    fn write(&mut self, data: &str) -> Result<()> {
        self.client.write(data)
    }

    fn resize(&mut self, size: TerminalSize) -> Result<()> {
        // The attached client propagates its PTY size to the session window
        self.client.resize(size)
    }

    fn kill(&mut self) -> Result<()> {
        // Killing only the client would leave the session running in the server
        let socket = self.socket.clone();
        let session = self.session_name.clone();
        let kill_session = async move {
            if let Err(e) = run_tmux_command(&socket, &["kill-session", "-t", &session]).await {
                tracing::debug!(session = %session, error = %e, "tmux session already gone");
            }
        };
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(kill_session);
            }
            Err(_) => {
                let status = std::process::Command::new("tmux")
                    .args(["-L", &self.socket, "kill-session", "-t", &self.session_name])
                    .output();
                if let Err(e) = status {
                    tracing::debug!(session = %self.session_name, error = %e, "failed to run tmux");
                }
            }
        }
        self.client.kill()
    }

    fn pid(&self) -> Option<u32> {
        self.client.pid()
    }
}
