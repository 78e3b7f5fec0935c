//! Browser client for the forge terminal gateway
//!
//! Everything except the browser glue is plain Rust and runs under `cargo test` on
//! the host; the browser glue is only compiled for `wasm32`.

pub mod automaton;
pub mod connection;
pub mod endpoint;
pub mod naming;
pub mod session_store;

#[cfg(target_arch = "wasm32")]
mod browser;

pub use automaton::{Effect, Event, ReconnectMachine, ReconnectPolicy, TimerId, TimerKind};
pub use connection::{ConnectionState, LinkState};
pub use endpoint::TerminalEndpoint;
pub use naming::session_name_for;
pub use session_store::{
    MemoryStorage, SessionPicker, SessionStore, Storage, StoreError, StoredSessionRecord,
};

#[cfg(target_arch = "wasm32")]
pub use browser::TerminalClient;
