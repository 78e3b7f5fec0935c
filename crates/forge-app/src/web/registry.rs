//! Session registry: decouples shell lifetime from socket lifetime
//!
//! Every [`Session`] owns one shell process and a single slot for the socket
//! currently attached to it. The process is wired exactly once, by a pump task
//! that reads through that slot at delivery time, so a reattached socket keeps
//! streaming without re-registering anything. Closing the current socket arms a
//! keepalive timer; reattaching cancels it, firing reaps the shell.
//!
//! Each socket's outbound queue is bounded. A socket that stops draining it is
//! evicted exactly like a closed one; everything it missed stays in scrollback.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use uuid::Uuid;

use forge_terminal::interceptor;
use forge_terminal::{
    ContextTracker, ProcessEvent, RunspaceProvider, Scrollback, SpawnedProcess, TerminalError,
    TerminalManager, TerminalProcess, TerminalSize,
};
use forge_types::{exit_notice, ClientMessage, ServerMessage};

use crate::config::GatewayConfig;

pub type SessionId = String;

/// Identity of one accepted socket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// What the socket writer task should do next
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Message(ServerMessage),
    /// Close the socket; nothing follows
    Close,
}

/// Whether an attachment receives live output yet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayState {
    /// Waiting for `ready`; output only goes to scrollback
    Held,
    Live,
}

/// Single-shot task that is aborted when dropped
pub struct ScheduledTask {
    handle: Option<JoinHandle<()>>,
}

impl ScheduledTask {
    pub fn after<F>(delay: Duration, task: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            task.await;
        });
        Self {
            handle: Some(handle),
        }
    }

    /// Let the task run to completion without aborting it
    pub fn disarm(mut self) {
        self.handle.take();
    }
}

impl Drop for ScheduledTask {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

struct Attachment {
    connection: ConnectionId,
    outbound: mpsc::Sender<Outbound>,
    replay: ReplayState,
}

impl Attachment {
    /// Queue a message; `false` once the socket has fallen too far behind
    fn send(&self, message: ServerMessage) -> bool {
        match self.outbound.try_send(Outbound::Message(message)) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => false,
            // The socket is already gone; its close event follows
            Err(mpsc::error::TrySendError::Closed(_)) => true,
        }
    }

    // Dropping the attachment closes the queue, so a full queue still ends the writer
    fn close(&self) {
        let _ = self.outbound.try_send(Outbound::Close);
    }
}

struct SessionState {
    process: Box<dyn TerminalProcess>,
    attachment: Option<Attachment>,
    scrollback: Scrollback,
    command_buffer: String,
    cleanup: Option<ScheduledTask>,
    context: ContextTracker,
    /// Set once the shell is gone; a closed session is never reattached
    closed: bool,
}

impl SessionState {
    fn is_current(&self, connection: ConnectionId) -> bool {
        self.attachment
            .as_ref()
            .is_some_and(|a| a.connection == connection)
    }

    /// Flush held scrollback to the attachment, once
    fn release_replay(&mut self) {
        let Some(attachment) = self.attachment.as_mut() else {
            return;
        };
        if attachment.replay != ReplayState::Held {
            return;
        }

        let payload = self.scrollback.replay_payload();
        if !payload.is_empty() {
            attachment.send(ServerMessage::output(payload));
        }
        attachment.replay = ReplayState::Live;
    }

    fn record_input(&mut self, session_id: &str, data: &str) {
        for ch in data.chars() {
            match ch {
                '\r' => {
                    let line = std::mem::take(&mut self.command_buffer);
                    if !line.trim().is_empty() {
                        tracing::debug!(session_id, command = %line, "command submitted");
                    }
                }
                '\u{7f}' | '\u{8}' => {
                    self.command_buffer.pop();
                }
                _ => self.command_buffer.push(ch),
            }
        }
    }
}

/// A live shell plus the socket currently attached to it
pub struct Session {
    id: SessionId,
    runspace_id: Option<String>,
    created_at: DateTime<Utc>,
    pid: Option<u32>,
    state: Mutex<SessionState>,
}

/// Session listing entry
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub id: SessionId,
    pub runspace_id: Option<String>,
    pub attached: bool,
    pub scrollback_bytes: usize,
    pub created_at: DateTime<Utc>,
    pub pid: Option<u32>,
}

impl Session {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn runspace_id(&self) -> Option<&str> {
        self.runspace_id.as_deref()
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub async fn is_attached(&self) -> bool {
        self.state.lock().await.attachment.is_some()
    }

    pub async fn scrollback_bytes(&self) -> usize {
        self.state.lock().await.scrollback.len_bytes()
    }

    pub async fn summary(&self) -> SessionSummary {
        let state = self.state.lock().await;
        SessionSummary {
            id: self.id.clone(),
            runspace_id: self.runspace_id.clone(),
            attached: state.attachment.is_some(),
            scrollback_bytes: state.scrollback.len_bytes(),
            created_at: self.created_at,
            pid: self.pid,
        }
    }

    /// Record a chunk and stream it; returns the connection that could not keep up
    async fn deliver_output(&self, chunk: String) -> Option<ConnectionId> {
        let signals = interceptor::scan(&chunk);

        let mut state = self.state.lock().await;
        if state.closed {
            return None;
        }
        state.scrollback.append(chunk.as_str());
        let sideband: Vec<ServerMessage> = signals
            .into_iter()
            .map(|signal| state.context.message_for(signal))
            .collect();

        let attachment = state
            .attachment
            .as_ref()
            .filter(|a| a.replay == ReplayState::Live)?;
        let delivered = attachment.send(ServerMessage::output(chunk))
            && sideband.into_iter().all(|message| attachment.send(message));
        (!delivered).then_some(attachment.connection)
    }
}

/// A socket freshly attached to a session
pub struct Attached {
    pub session: Arc<Session>,
    pub connection: ConnectionId,
    /// Messages for this socket, starting with the `session` announcement
    pub outbound: mpsc::Receiver<Outbound>,
    pub restored: bool,
}

#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("Runspace '{0}' not found")]
    UnknownRunspace(String),

    #[error(transparent)]
    Terminal(#[from] TerminalError),
}

/// Owns every live session; constructed once and shared through an `Arc`
pub struct SessionRegistry {
    sessions: RwLock<HashMap<SessionId, Arc<Session>>>,
    /// Serializes connects against each other and against purges
    admission: Mutex<()>,
    terminals: TerminalManager,
    runspaces: Arc<dyn RunspaceProvider>,
    config: GatewayConfig,
    next_connection: AtomicU64,
}

impl SessionRegistry {
    pub fn new(
        terminals: TerminalManager,
        runspaces: Arc<dyn RunspaceProvider>,
        config: GatewayConfig,
    ) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            admission: Mutex::new(()),
            terminals,
            runspaces,
            config,
            next_connection: AtomicU64::new(1),
        }
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    fn outbound_channel(&self) -> (mpsc::Sender<Outbound>, mpsc::Receiver<Outbound>) {
        mpsc::channel(self.config.outbound_capacity.max(1))
    }

    pub async fn get(&self, session_id: &str) -> Option<Arc<Session>> {
        self.sessions.read().await.get(session_id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    /// All sessions, oldest first
    pub async fn list(&self) -> Vec<SessionSummary> {
        let sessions: Vec<Arc<Session>> = self.sessions.read().await.values().cloned().collect();
        let mut summaries = Vec::with_capacity(sessions.len());
        for session in sessions {
            summaries.push(session.summary().await);
        }
        summaries.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        summaries
    }

    /// Attach a new socket, reattaching to `session_id` when it is still alive
    pub async fn connect(
        self: &Arc<Self>,
        runspace_id: Option<&str>,
        session_id: Option<&str>,
    ) -> Result<Attached, ConnectError> {
        let _admission = self.admission.lock().await;
        let connection = ConnectionId(self.next_connection.fetch_add(1, Ordering::Relaxed));

        if let Some(id) = session_id {
            if let Some(session) = self.get(id).await {
                if let Some(attached) = self.reattach(session, connection).await {
                    return Ok(attached);
                }
            }
            tracing::debug!(session_id = id, "requested session not found, creating it");
        }

        self.create(runspace_id, session_id, connection).await
    }

    async fn reattach(&self, session: Arc<Session>, connection: ConnectionId) -> Option<Attached> {
        let (tx, rx) = self.outbound_channel();

        let mut state = session.state.lock().await;
        if state.closed {
            return None;
        }
        state.cleanup = None;
        if let Some(retired) = state.attachment.take() {
            tracing::debug!(
                session_id = %session.id,
                retired = %retired.connection,
                "retiring superseded socket"
            );
            retired.close();
        }

        let attachment = Attachment {
            connection,
            outbound: tx,
            replay: ReplayState::Held,
        };
        attachment.send(ServerMessage::Session {
            session_id: session.id.clone(),
            restored: true,
        });
        state.attachment = Some(attachment);
        drop(state);

        tracing::info!(session_id = %session.id, connection = %connection, "session reattached");
        Some(Attached {
            session,
            connection,
            outbound: rx,
            restored: true,
        })
    }

    async fn create(
        self: &Arc<Self>,
        runspace_id: Option<&str>,
        requested_id: Option<&str>,
        connection: ConnectionId,
    ) -> Result<Attached, ConnectError> {
        let runspace = match runspace_id {
            Some(id) => Some(
                self.runspaces
                    .get_runspace(id)
                    .ok_or_else(|| ConnectError::UnknownRunspace(id.to_string()))?,
            ),
            None => self.runspaces.active_runspace(),
        };

        let SpawnedProcess { process, events } = match &runspace {
            Some(runspace) => self.terminals.attach_pty(runspace).await?,
            None => self.terminals.create_default_pty().await?,
        };

        let id = requested_id
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let (tx, rx) = self.outbound_channel();
        let attachment = Attachment {
            connection,
            outbound: tx,
            replay: ReplayState::Live,
        };
        attachment.send(ServerMessage::Session {
            session_id: id.clone(),
            restored: false,
        });

        let session = Arc::new(Session {
            id: id.clone(),
            runspace_id: runspace.map(|r| r.id),
            created_at: Utc::now(),
            pid: process.pid(),
            state: Mutex::new(SessionState {
                process,
                attachment: Some(attachment),
                scrollback: Scrollback::with_capacity(self.config.scrollback_bytes),
                command_buffer: String::new(),
                cleanup: None,
                context: ContextTracker::new(self.config.max_tokens),
                closed: false,
            }),
        });

        self.sessions
            .write()
            .await
            .insert(id.clone(), Arc::clone(&session));
        tokio::spawn(Arc::clone(self).pump(Arc::clone(&session), events));

        tracing::info!(
            session_id = %id,
            runspace_id = ?session.runspace_id,
            pid = ?session.pid,
            connection = %connection,
            "session created"
        );
        Ok(Attached {
            session,
            connection,
            outbound: rx,
            restored: false,
        })
    }

    /// Route one parsed frame from `connection`
    pub async fn handle_client_message(
        &self,
        session: &Session,
        connection: ConnectionId,
        message: ClientMessage,
    ) {
        let mut state = session.state.lock().await;
        if state.closed || !state.is_current(connection) {
            tracing::debug!(session_id = %session.id, connection = %connection, "dropping frame from retired socket");
            return;
        }

        match message {
            ClientMessage::Input { data } => {
                if let Err(e) = state.process.write(&data) {
                    tracing::warn!(session_id = %session.id, error = %e, "failed to write input");
                }
                state.record_input(&session.id, &data);
            }
            ClientMessage::Resize { cols, rows } => {
                if cols == 0 || rows == 0 {
                    tracing::warn!(session_id = %session.id, cols, rows, "ignoring empty resize");
                    return;
                }
                if let Err(e) = state.process.resize(TerminalSize { cols, rows }) {
                    tracing::warn!(session_id = %session.id, error = %e, "failed to resize terminal");
                }
            }
            ClientMessage::Execute { command } => {
                if let Err(e) = state.process.write(&format!("{}\r", command)) {
                    tracing::warn!(session_id = %session.id, error = %e, "failed to execute command");
                }
                tracing::debug!(session_id = %session.id, command = %command, "command executed");
                state.command_buffer.clear();
            }
            ClientMessage::Ready => state.release_replay(),
        }
    }

    /// Handle the close of `connection`; arms the keepalive if it was current
    pub async fn detach(self: &Arc<Self>, session: &Arc<Session>, connection: ConnectionId) {
        let mut state = session.state.lock().await;
        if !state.is_current(connection) {
            tracing::debug!(session_id = %session.id, connection = %connection, "ignoring close from retired socket");
            return;
        }
        state.attachment = None;
        if state.closed {
            return;
        }

        let registry = Arc::downgrade(self);
        let target = Arc::downgrade(session);
        state.cleanup = Some(ScheduledTask::after(self.config.keepalive, async move {
            reap_if_alive(registry, target).await;
        }));

        tracing::info!(
            session_id = %session.id,
            keepalive_secs = self.config.keepalive.as_secs(),
            "socket closed, session orphaned"
        );
    }

    /// Kill every shell and drop every session
    pub async fn shutdown(&self) {
        let _admission = self.admission.lock().await;
        let sessions: Vec<Arc<Session>> = self.sessions.write().await.drain().map(|(_, s)| s).collect();

        let mut runspaces = HashSet::new();
        for session in &sessions {
            let mut state = session.state.lock().await;
            state.closed = true;
            state.cleanup = None;
            if let Some(attachment) = state.attachment.take() {
                attachment.close();
            }
            if let Err(e) = state.process.kill() {
                tracing::warn!(session_id = %session.id, error = %e, "failed to kill shell");
            }
            if let Some(runspace_id) = &session.runspace_id {
                runspaces.insert(runspace_id.clone());
            }
        }

        for runspace_id in runspaces {
            if let Err(e) = self.terminals.remove_session(&runspace_id).await {
                tracing::warn!(error = %e, "failed to release runspace");
            }
        }
        tracing::info!(sessions = sessions.len(), "all sessions closed");
    }

    async fn pump(
        self: Arc<Self>,
        session: Arc<Session>,
        mut events: mpsc::UnboundedReceiver<ProcessEvent>,
    ) {
        let mut exit_code = None;
        while let Some(event) = events.recv().await {
            match event {
                ProcessEvent::Output(chunk) => {
                    if let Some(connection) = session.deliver_output(chunk).await {
                        tracing::warn!(
                            session_id = %session.id,
                            connection = %connection,
                            capacity = self.config.outbound_capacity,
                            "socket not draining output, detaching it"
                        );
                        self.detach(&session, connection).await;
                    }
                }
                ProcessEvent::Exit(code) => {
                    exit_code = code;
                    break;
                }
            }
        }
        self.handle_exit(&session, exit_code).await;
    }

    async fn handle_exit(&self, session: &Arc<Session>, code: Option<i32>) {
        {
            let mut state = session.state.lock().await;
            if state.closed {
                return;
            }
            state.closed = true;
            state.cleanup = None;
            state.release_replay();
            if let Some(attachment) = state.attachment.take() {
                attachment.send(ServerMessage::output(exit_notice(code)));
                attachment.close();
            }
        }

        tracing::info!(session_id = %session.id, exit_code = ?code, "shell exited");
        self.purge(session).await;
    }

    async fn reap(&self, session: &Arc<Session>) {
        {
            let mut state = session.state.lock().await;
            if state.closed || state.attachment.is_some() {
                return;
            }
            // Running inside the cleanup task itself
            if let Some(task) = state.cleanup.take() {
                task.disarm();
            }
            state.closed = true;
            if let Err(e) = state.process.kill() {
                tracing::warn!(session_id = %session.id, error = %e, "failed to kill shell");
            }
        }

        tracing::info!(session_id = %session.id, "keepalive expired, session reaped");
        self.purge(session).await;
    }

    /// Remove `session` from the map and release its runspace if unused
    async fn purge(&self, session: &Arc<Session>) {
        let _admission = self.admission.lock().await;

        let release = {
            let mut sessions = self.sessions.write().await;
            // The id may already belong to a newer session
            if sessions
                .get(&session.id)
                .is_some_and(|current| Arc::ptr_eq(current, session))
            {
                sessions.remove(&session.id);
            }

            match &session.runspace_id {
                Some(runspace_id)
                    if !sessions
                        .values()
                        .any(|s| s.runspace_id.as_deref() == Some(runspace_id.as_str())) =>
                {
                    Some(runspace_id.clone())
                }
                _ => None,
            }
        };

        if let Some(runspace_id) = release {
            if let Err(e) = self.terminals.remove_session(&runspace_id).await {
                tracing::warn!(error = %e, "failed to release runspace");
            }
        }
    }
}

async fn reap_if_alive(registry: Weak<SessionRegistry>, session: Weak<Session>) {
    if let (Some(registry), Some(session)) = (registry.upgrade(), session.upgrade()) {
        registry.reap(&session).await;
    }
}
