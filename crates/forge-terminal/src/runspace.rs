//! Runspaces: isolated workspace contexts a terminal can be scoped to
//!
//! Runspaces are owned by an external manager; the terminal bridge only looks
//! them up through [`RunspaceProvider`].

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use super::backend::TerminalBackendType;
use super::error::TerminalError;

/// An isolated project/workspace context
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Runspace {
    pub id: String,
    pub name: String,
    /// Working directory shells start in
    pub root: PathBuf,
    #[serde(default)]
    pub isolation: Isolation,
}

/// Execution boundary used for a runspace's shells
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Isolation {
    /// Plain local shell rooted at the runspace directory
    #[default]
    Local,
    /// Shell inside the runspace's dedicated tmux server
    Tmux,
}

impl Isolation {
    pub fn backend_type(self) -> TerminalBackendType {
        match self {
            Isolation::Local => TerminalBackendType::Pty,
            Isolation::Tmux => TerminalBackendType::Tmux,
        }
    }
}

/// Lookup interface of the external runspace manager
pub trait RunspaceProvider: Send + Sync {
    fn get_runspace(&self, id: &str) -> Option<Runspace>;

    /// The runspace currently selected in the platform, if any
    fn active_runspace(&self) -> Option<Runspace>;
}

/// Fixed set of runspaces, typically loaded from a TOML file
///
/// ```toml
/// active = "api"
///
/// [[runspace]]
/// id = "api"
/// name = "API server"
/// root = "/srv/api"
/// isolation = "tmux"
/// ```
#[derive(Debug, Clone, Default)]
pub struct StaticRunspaces {
    runspaces: Vec<Runspace>,
    active: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RunspaceFile {
    #[serde(default)]
    active: Option<String>,
    #[serde(default, rename = "runspace")]
    runspaces: Vec<Runspace>,
}

impl StaticRunspaces {
    pub fn new(runspaces: Vec<Runspace>, active: Option<String>) -> Self {
        Self { runspaces, active }
    }

    /// No runspaces: every connection gets the unscoped default shell
    pub fn empty() -> Self {
        Self::default()
    }

    /// Load and validate a runspace file
    pub fn load(path: &Path) -> Result<Self, TerminalError> {
        let content = std::fs::read_to_string(path).map_err(|e| TerminalError::RunspaceFile {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        Self::from_toml_str(&content).map_err(|message| TerminalError::RunspaceFile {
            path: path.to_path_buf(),
            message,
        })
    }

    fn from_toml_str(content: &str) -> Result<Self, String> {
        let file: RunspaceFile = toml::from_str(content).map_err(|e| e.to_string())?;

        let mut seen = HashSet::new();
        for runspace in &file.runspaces {
            if runspace.id.is_empty() {
                return Err("runspace id must not be empty".to_string());
            }
            if !seen.insert(runspace.id.as_str()) {
                return Err(format!("duplicate runspace id '{}'", runspace.id));
            }
        }
        if let Some(active) = &file.active {
            if !seen.contains(active.as_str()) {
                return Err(format!("active runspace '{}' is not defined", active));
            }
        }

        Ok(Self::new(file.runspaces, file.active))
    }

    pub fn len(&self) -> usize {
        self.runspaces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.runspaces.is_empty()
    }
}

impl RunspaceProvider for StaticRunspaces {
    fn get_runspace(&self, id: &str) -> Option<Runspace> {
        self.runspaces.iter().find(|r| r.id == id).cloned()
    }

    fn active_runspace(&self) -> Option<Runspace> {
        self.active.as_deref().and_then(|id| self.get_runspace(id))
    }
}
