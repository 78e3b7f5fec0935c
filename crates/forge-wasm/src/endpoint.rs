use forge_types::{RUNSPACE_PARAM, SESSION_ID_PARAM, TERMINAL_ENDPOINT};

/// Where the terminal socket lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TerminalEndpoint {
    /// `ws://host[:port]` or `wss://host[:port]`
    base: String,
    runspace: Option<String>,
}

impl TerminalEndpoint {
    pub fn new(base: impl Into<String>) -> Self {
        let base = base.into();
        Self {
            base: base.trim_end_matches('/').to_string(),
            runspace: None,
        }
    }

    /// Endpoint on the host that served the page (`https:` pages get `wss:`)
    pub fn from_page(protocol: &str, host: &str) -> Self {
        let scheme = if protocol == "https:" { "wss" } else { "ws" };
        Self::new(format!("{}://{}", scheme, host))
    }

    pub fn with_runspace(mut self, runspace: Option<String>) -> Self {
        self.runspace = runspace.filter(|r| !r.is_empty());
        self
    }

    pub fn runspace(&self) -> Option<&str> {
        self.runspace.as_deref()
    }

    /// Socket URL, reattaching to `session_id` when given
    pub fn url(&self, session_id: Option<&str>) -> String {
        let mut params = Vec::new();
        if let Some(runspace) = &self.runspace {
            params.push(format!("{}={}", RUNSPACE_PARAM, urlencoding::encode(runspace)));
        }
        if let Some(id) = session_id.filter(|id| !id.is_empty()) {
            params.push(format!("{}={}", SESSION_ID_PARAM, urlencoding::encode(id)));
        }

        if params.is_empty() {
            format!("{}{}", self.base, TERMINAL_ENDPOINT)
        } else {
            format!("{}{}?{}", self.base, TERMINAL_ENDPOINT, params.join("&"))
        }
    }
}
