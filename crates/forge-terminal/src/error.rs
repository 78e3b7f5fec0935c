use std::path::PathBuf;
use thiserror::Error;

/// Errors surfaced by the backend abstraction
#[derive(Debug, Error)]
pub enum TerminalError {
    #[error("runspace '{id}' root {} is not a directory", root.display())]
    RunspaceRoot { id: String, root: PathBuf },

    #[error("{backend} backend failed to spawn shell: {message}")]
    Spawn { backend: String, message: String },

    #[error("{backend} backend failed to release runspace '{runspace_id}': {message}")]
    Release {
        backend: String,
        runspace_id: String,
        message: String,
    },

    #[error("invalid runspace file {}: {message}", path.display())]
    RunspaceFile { path: PathBuf, message: String },
}
