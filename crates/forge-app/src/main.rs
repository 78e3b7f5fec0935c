use anyhow::Result;
use clap::Parser;
use colored::Colorize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use forge::{Cli, SessionRegistry, WebServer, WebServerConfig};
use forge_terminal::TerminalManager;

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file if it exists
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    forge::logging::init(&cli.log_level)?;

    let addr = cli.bind_addr()?;
    let shell = cli.shell_config()?;
    let runspaces = cli.load_runspaces()?;
    let terminals = TerminalManager::new(shell, cli.terminal_backend()?);
    let registry = Arc::new(SessionRegistry::new(
        terminals,
        Arc::new(runspaces),
        cli.gateway_config(),
    ));

    println!("{}", "🔨 Forge terminal gateway".bold().cyan());
    println!("   Address:   http://{}", addr);
    println!("   Terminal:  ws://{}{}", addr, forge_types::TERMINAL_ENDPOINT);
    println!("   Sessions:  http://{}/api/terminal/sessions", addr);
    println!(
        "   Keepalive: {}",
        format!("{}s", cli.keepalive_secs).yellow()
    );

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!("shutdown requested");
                signal.cancel();
            }
            Err(e) => tracing::error!(error = %e, "failed to listen for ctrl-c"),
        }
    });

    let server = WebServer::new(
        WebServerConfig {
            bind_addr: addr,
            web_dir: cli.web_dir.clone(),
        },
        registry,
    );
    server.start(shutdown).await
}
