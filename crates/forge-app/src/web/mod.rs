// Web gateway module
pub mod registry;
pub mod routes;
pub mod server;

pub use registry::{
    Attached, ConnectError, ConnectionId, Outbound, ReplayState, ScheduledTask, Session,
    SessionId, SessionRegistry, SessionSummary,
};
pub use server::{WebServer, WebServerConfig};
