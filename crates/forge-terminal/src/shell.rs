//! Shell command and curated environment for spawned terminals

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use super::backend::TerminalSize;
use super::runspace::Runspace;

/// How to start a shell and what it sees
#[derive(Debug, Clone)]
pub struct ShellConfig {
    pub program: String,
    pub args: Vec<String>,
    pub size: TerminalSize,
    /// Working directory for unscoped shells
    pub default_dir: PathBuf,
    /// Directories put in front of the inherited PATH
    pub extra_path: Vec<PathBuf>,
}

impl Default for ShellConfig {
    fn default() -> Self {
        let home = home_dir();
        let default_dir = std::env::current_dir()
            .ok()
            .or_else(|| home.clone())
            .unwrap_or_else(|| PathBuf::from("/"));

        let mut extra_path = Vec::new();
        if let Some(home) = &home {
            extra_path.push(home.join(".local").join("bin"));
            extra_path.push(home.join(".cargo").join("bin"));
        }
        extra_path.push(PathBuf::from("/usr/local/bin"));

        Self {
            program: default_shell(),
            args: Vec::new(),
            size: TerminalSize::default(),
            default_dir,
            extra_path,
        }
    }
}

impl ShellConfig {
    /// Environment overrides for a shell, optionally scoped to a runspace
    pub fn environment(&self, runspace: Option<&Runspace>) -> Vec<(String, String)> {
        let mut env = vec![
            ("TERM".to_string(), "xterm-256color".to_string()),
            ("COLORTERM".to_string(), "truecolor".to_string()),
            (
                "PATH".to_string(),
                augmented_path(&self.extra_path, std::env::var("PATH").ok().as_deref()),
            ),
        ];

        if let Some(runspace) = runspace {
            env.push(("FORGE_RUNSPACE_ID".to_string(), runspace.id.clone()));
            env.push(("FORGE_RUNSPACE_NAME".to_string(), runspace.name.clone()));
        }

        env
    }
}

/// `$SHELL`, falling back to bash (cmd.exe on Windows)
fn default_shell() -> String {
    if cfg!(windows) {
        "cmd.exe".to_string()
    } else {
        std::env::var("SHELL").unwrap_or_else(|_| "/bin/bash".to_string())
    }
}

fn home_dir() -> Option<PathBuf> {
    std::env::var_os("HOME")
        .or_else(|| std::env::var_os("USERPROFILE"))
        .map(PathBuf::from)
}

/// Prefix `inherited` with the extra directories it does not already contain
fn augmented_path(extra: &[PathBuf], inherited: Option<&str>) -> String {
    let separator = if cfg!(windows) { ';' } else { ':' };
    let inherited: Vec<&str> = inherited
        .map(|p| p.split(separator).filter(|s| !s.is_empty()).collect())
        .unwrap_or_default();
    let present: HashSet<&Path> = inherited.iter().map(Path::new).collect();

    let mut parts: Vec<String> = extra
        .iter()
        .filter(|dir| !present.contains(dir.as_path()))
        .map(|dir| dir.display().to_string())
        .collect();
    parts.extend(inherited.iter().map(|s| s.to_string()));
    parts.join(&separator.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runspace::Isolation;

    #[test]
    fn test_augmented_path_skips_present_entries() {
        let extra = vec![PathBuf::from("/opt/tools"), PathBuf::from("/usr/local/bin")];
        let path = augmented_path(&extra, Some("/usr/local/bin:/usr/bin"));
        if cfg!(windows) {
            return;
        }
        assert_eq!(path, "/opt/tools:/usr/local/bin:/usr/bin");
    }

    #[test]
    fn test_augmented_path_without_inherited_path() {
        if cfg!(windows) {
            return;
        }
        let extra = vec![PathBuf::from("/opt/tools")];
        assert_eq!(augmented_path(&extra, None), "/opt/tools");
    }

    #[test]
    fn test_runspace_environment() {
        let config = ShellConfig::default();
        let runspace = Runspace {
            id: "api".to_string(),
            name: "API".to_string(),
            root: PathBuf::from("/srv/api"),
            isolation: Isolation::Local,
        };

        let env = config.environment(Some(&runspace));
        let get = |key: &str| env.iter().find(|(k, _)| k == key).map(|(_, v)| v.clone());
        assert_eq!(get("TERM").as_deref(), Some("xterm-256color"));
        assert_eq!(get("FORGE_RUNSPACE_ID").as_deref(), Some("api"));
        assert!(get("PATH").is_some());

        let unscoped = config.environment(None);
        assert!(unscoped.iter().all(|(k, _)| k != "FORGE_RUNSPACE_ID"));
    }
}
