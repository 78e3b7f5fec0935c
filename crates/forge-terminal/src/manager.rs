use std::sync::Arc;

use super::backend::{ShellBackend, SpawnRequest, SpawnedProcess, TerminalBackendType};
use super::error::TerminalError;
use super::pty_backend::PtyBackend;
use super::runspace::Runspace;
use super::shell::ShellConfig;
use super::tmux_backend::TmuxBackend;

/// Spawns shells for the gateway using pluggable backends
pub struct TerminalManager {
    pty: Arc<dyn ShellBackend>,
    tmux: Arc<dyn ShellBackend>,
    default_backend: TerminalBackendType,
    shell: ShellConfig,
}

impl std::fmt::Debug for TerminalManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TerminalManager")
            .field("pty", &self.pty.backend_name())
            .field("tmux", &self.tmux.backend_name())
            .field("default_backend", &self.default_backend)
            .finish()
    }
}

impl TerminalManager {
    /// Create a terminal manager with the real PTY and tmux backends
    ///
    /// When tmux is not installed, tmux-isolated runspaces fall back to plain PTYs.
    pub fn new(shell: ShellConfig, default_backend: TerminalBackendType) -> Self {
        let pty: Arc<dyn ShellBackend> = Arc::new(PtyBackend::new());
        let tmux: Arc<dyn ShellBackend> = match TmuxBackend::new() {
            Ok(backend) => Arc::new(backend),
            Err(e) => {
                tracing::warn!(error = %e, "failed to initialize tmux backend, falling back to pty");
                Arc::clone(&pty)
            }
        };

        tracing::info!(
            default_backend = %default_backend,
            isolated_backend = tmux.backend_name(),
            shell = %shell.program,
            "terminal backends ready"
        );

        Self::with_backends(shell, default_backend, pty, tmux)
    }

    /// Create a terminal manager around explicit backends
    pub fn with_backends(
        shell: ShellConfig,
        default_backend: TerminalBackendType,
        pty: Arc<dyn ShellBackend>,
        tmux: Arc<dyn ShellBackend>,
    ) -> Self {
        Self {
            pty,
            tmux,
            default_backend,
            shell,
        }
    }

    pub fn shell(&self) -> &ShellConfig {
        &self.shell
    }

    fn backend(&self, backend_type: TerminalBackendType) -> &Arc<dyn ShellBackend> {
        match backend_type {
            TerminalBackendType::Pty => &self.pty,
            TerminalBackendType::Tmux => &self.tmux,
        }
    }

    /// Spawn the unscoped default shell
    pub async fn create_default_pty(&self) -> Result<SpawnedProcess, TerminalError> {
        let request = SpawnRequest {
            runspace_id: None,
            program: self.shell.program.clone(),
            args: self.shell.args.clone(),
            working_dir: self.shell.default_dir.clone(),
            env: self.shell.environment(None),
            size: self.shell.size,
        };
        self.spawn_with(self.default_backend, request).await
    }

    /// Spawn a shell scoped to `runspace`
    pub async fn attach_pty(&self, runspace: &Runspace) -> Result<SpawnedProcess, TerminalError> {
        if !runspace.root.is_dir() {
            return Err(TerminalError::RunspaceRoot {
                id: runspace.id.clone(),
                root: runspace.root.clone(),
            });
        }

        let request = SpawnRequest {
            runspace_id: Some(runspace.id.clone()),
            program: self.shell.program.clone(),
            args: self.shell.args.clone(),
            working_dir: runspace.root.clone(),
            env: self.shell.environment(Some(runspace)),
            size: self.shell.size,
        };
        self.spawn_with(runspace.isolation.backend_type(), request).await
    }

    /// Release backend resources held for a runspace
    /// Safe to call when nothing is held
    pub async fn remove_session(&self, runspace_id: &str) -> Result<(), TerminalError> {
        let mut backends = vec![&self.pty];
        if !Arc::ptr_eq(&self.pty, &self.tmux) {
            backends.push(&self.tmux);
        }

        for backend in backends {
            backend
                .release(runspace_id)
                .await
                .map_err(|e| TerminalError::Release {
                    backend: backend.backend_name().to_string(),
                    runspace_id: runspace_id.to_string(),
                    message: format!("{:#}", e),
                })?;
        }
        Ok(())
    }

    async fn spawn_with(
        &self,
        backend_type: TerminalBackendType,
        request: SpawnRequest,
    ) -> Result<SpawnedProcess, TerminalError> {
        let backend = self.backend(backend_type);
        backend
            .spawn(request)
            .await
            .map_err(|e| TerminalError::Spawn {
                backend: backend.backend_name().to_string(),
                message: format!("{:#}", e),
            })
    }
}
