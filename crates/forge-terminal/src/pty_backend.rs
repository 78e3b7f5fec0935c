/// PTY-based shell backend (plain local shell)
use super::backend::{ShellBackend, SpawnRequest, SpawnedProcess, TerminalProcess};
use super::pty_handler::PtyHandler;
use anyhow::{bail, Result};
use async_trait::async_trait;
use portable_pty::CommandBuilder;

/// Spawns the shell directly in a local pseudo-terminal
#[derive(Debug, Default)]
pub struct PtyBackend;

impl PtyBackend {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ShellBackend for PtyBackend {
    async fn spawn(&self, request: SpawnRequest) -> Result<SpawnedProcess> {
        if !request.working_dir.is_dir() {
            bail!(
                "Working directory {} does not exist",
                request.working_dir.display()
            );
        }

        let mut cmd = CommandBuilder::new(&request.program);
        cmd.args(&request.args);
        cmd.cwd(&request.working_dir);
        for (key, value) in &request.env {
            cmd.env(key, value);
        }

        let (handler, events) = PtyHandler::spawn(cmd, request.size)?;
        tracing::debug!(
            pid = ?handler.pid(),
            program = %request.program,
            cwd = %request.working_dir.display(),
            "spawned local shell"
        );

        Ok(SpawnedProcess {
            process: Box::new(handler),
            events,
        })
    }

    async fn release(&self, _runspace_id: &str) -> Result<()> {
        // Each process is owned by its session; nothing is pooled per runspace.
        Ok(())
    }

    fn backend_name(&self) -> &str {
        "pty"
    }
}
