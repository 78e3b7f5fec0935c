//! Tracing subscriber setup for the server binary

use anyhow::{Context, Result};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// `RUST_LOG` when set, otherwise `default_directives`
pub fn env_filter(default_directives: &str) -> Result<EnvFilter> {
    build_filter(std::env::var("RUST_LOG").ok().as_deref(), default_directives)
}

/// An empty or unparsable override falls back to the defaults
fn build_filter(override_directives: Option<&str>, default_directives: &str) -> Result<EnvFilter> {
    if let Some(filter) = override_directives
        .filter(|d| !d.trim().is_empty())
        .and_then(|d| EnvFilter::try_new(d).ok())
    {
        return Ok(filter);
    }
    EnvFilter::try_new(default_directives)
        .with_context(|| format!("invalid log filter '{}'", default_directives))
}

/// Install the global subscriber
pub fn init(default_directives: &str) -> Result<()> {
    tracing_subscriber::registry()
        .with(env_filter(default_directives)?)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .try_init()
        .context("failed to install tracing subscriber")
}
