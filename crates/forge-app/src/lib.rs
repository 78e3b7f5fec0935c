// Forge terminal gateway library
//
// Persistent browser terminal sessions: an axum WebSocket gateway over a
// registry that keeps shells alive across disconnects and replays their
// scrollback on reattach.

pub mod config;
pub mod logging;
pub mod web;

pub use config::{Cli, GatewayConfig};
pub use web::{SessionRegistry, WebServer, WebServerConfig};
