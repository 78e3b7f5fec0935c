#![allow(dead_code)]

use anyhow::Result;
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use forge::{GatewayConfig, SessionRegistry, WebServer, WebServerConfig};
use forge_terminal::{
    Isolation, ProcessEvent, Runspace, ShellBackend, ShellConfig, SpawnRequest, SpawnedProcess,
    StaticRunspaces, TerminalBackendType, TerminalManager, TerminalProcess, TerminalSize,
};
use forge_types::{ClientMessage, ServerMessage};

pub type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

const WAIT: Duration = Duration::from_secs(5);

/// Test-side view of one fake shell
#[derive(Clone)]
pub struct FakeShell {
    pub pid: u32,
    pub request: SpawnRequest,
    events: mpsc::UnboundedSender<ProcessEvent>,
    pub writes: Arc<Mutex<Vec<String>>>,
    pub resizes: Arc<Mutex<Vec<TerminalSize>>>,
    pub killed: Arc<AtomicBool>,
}

impl FakeShell {
    pub fn emit(&self, output: &str) {
        let _ = self.events.send(ProcessEvent::Output(output.to_string()));
    }

    pub fn exit(&self, code: i32) {
        let _ = self.events.send(ProcessEvent::Exit(Some(code)));
    }

    pub fn written(&self) -> String {
        self.writes.lock().unwrap().concat()
    }

    pub fn is_killed(&self) -> bool {
        self.killed.load(Ordering::SeqCst)
    }
}

struct FakeProcess {
    shell: FakeShell,
}

impl TerminalProcess for FakeProcess {
    fn write(&mut self, data: &str) -> Result<()> {
        self.shell.writes.lock().unwrap().push(data.to_string());
        Ok(())
    }

    fn resize(&mut self, size: TerminalSize) -> Result<()> {
        self.shell.resizes.lock().unwrap().push(size);
        Ok(())
    }

    // A killed PTY reports its exit like any other
    fn kill(&mut self) -> Result<()> {
        self.shell.killed.store(true, Ordering::SeqCst);
        let _ = self.shell.events.send(ProcessEvent::Exit(None));
        Ok(())
    }

    fn pid(&self) -> Option<u32> {
        Some(self.shell.pid)
    }
}

/// In-memory shell backend
#[derive(Default)]
pub struct FakeBackend {
    next_pid: AtomicU32,
    shells: Mutex<Vec<FakeShell>>,
    released: Mutex<Vec<String>>,
}

impl FakeBackend {
    pub fn spawn_count(&self) -> usize {
        self.shells.lock().unwrap().len()
    }

    pub fn shell(&self, index: usize) -> FakeShell {
        self.shells.lock().unwrap()[index].clone()
    }

    pub fn last_shell(&self) -> FakeShell {
        self.shells
            .lock()
            .unwrap()
            .last()
            .cloned()
            .expect("no shell spawned")
    }

    pub fn released(&self) -> Vec<String> {
        self.released.lock().unwrap().clone()
    }
}

#[async_trait]
impl ShellBackend for FakeBackend {
    async fn spawn(&self, request: SpawnRequest) -> Result<SpawnedProcess> {
        let (tx, events) = mpsc::unbounded_channel();
        let shell = FakeShell {
            pid: 1000 + self.next_pid.fetch_add(1, Ordering::SeqCst),
            request,
            events: tx,
            writes: Arc::default(),
            resizes: Arc::default(),
            killed: Arc::default(),
        };
        self.shells.lock().unwrap().push(shell.clone());
        Ok(SpawnedProcess {
            process: Box::new(FakeProcess { shell }),
            events,
        })
    }

    async fn release(&self, runspace_id: &str) -> Result<()> {
        self.released.lock().unwrap().push(runspace_id.to_string());
        Ok(())
    }

    fn backend_name(&self) -> &str {
        "fake"
    }
}

pub struct TestServer {
    pub addr: SocketAddr,
    pub registry: Arc<SessionRegistry>,
    pub backend: Arc<FakeBackend>,
    pub dir: TempDir,
    shutdown: CancellationToken,
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

pub fn runspace(id: &str, root: &Path) -> Runspace {
    Runspace {
        id: id.to_string(),
        name: format!("{} runspace", id),
        root: root.to_path_buf(),
        isolation: Isolation::Local,
    }
}

pub fn build_registry(
    keepalive: Duration,
    runspaces: StaticRunspaces,
    dir: &Path,
) -> (Arc<SessionRegistry>, Arc<FakeBackend>) {
    let config = GatewayConfig {
        keepalive,
        ..GatewayConfig::default()
    };
    build_registry_with(config, runspaces, dir)
}

pub fn build_registry_with(
    config: GatewayConfig,
    runspaces: StaticRunspaces,
    dir: &Path,
) -> (Arc<SessionRegistry>, Arc<FakeBackend>) {
    let backend = Arc::new(FakeBackend::default());
    let shell = ShellConfig {
        program: "/bin/sh".to_string(),
        args: vec![],
        size: TerminalSize::default(),
        default_dir: dir.to_path_buf(),
        extra_path: vec![],
    };
    let terminals = TerminalManager::with_backends(
        shell,
        TerminalBackendType::Pty,
        backend.clone(),
        backend.clone(),
    );
    let registry = Arc::new(SessionRegistry::new(terminals, Arc::new(runspaces), config));
    (registry, backend)
}

/// Start a gateway on an ephemeral port; runspaces get roots inside a temp dir
pub async fn start_server(
    keepalive: Duration,
    runspace_ids: &[&str],
    active: Option<&str>,
) -> TestServer {
    let dir = TempDir::new().unwrap();
    let runspaces = StaticRunspaces::new(
        runspace_ids
            .iter()
            .map(|id| runspace(id, dir.path()))
            .collect(),
        active.map(String::from),
    );
    let (registry, backend) = build_registry(keepalive, runspaces, dir.path());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = CancellationToken::new();
    let server = WebServer::new(
        WebServerConfig {
            bind_addr: addr,
            web_dir: None,
        },
        registry.clone(),
    );
    let token = shutdown.clone();
    tokio::spawn(async move {
        let _ = server.serve(listener, token).await;
    });

    TestServer {
        addr,
        registry,
        backend,
        dir,
        shutdown,
    }
}

impl TestServer {
    pub async fn connect(&self, query: &str) -> WsClient {
        let url = if query.is_empty() {
            format!("ws://{}/terminal", self.addr)
        } else {
            format!("ws://{}/terminal?{}", self.addr, query)
        };
        let (ws, _) = connect_async(url).await.expect("websocket handshake");
        ws
    }

    pub async fn wait_for_sessions(&self, count: usize) {
        let registry = self.registry.clone();
        eventually(|| {
            let registry = registry.clone();
            async move { registry.len().await == count }
        })
        .await;
    }

    pub async fn wait_for_scrollback(&self, session_id: &str, bytes: usize) {
        eventually(|| {
            let registry = self.registry.clone();
            let id = session_id.to_string();
            async move {
                match registry.get(&id).await {
                    Some(session) => session.scrollback_bytes().await >= bytes,
                    None => false,
                }
            }
        })
        .await;
    }
}

/// Poll `check` until it holds, panicking after a few seconds
pub async fn eventually<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + WAIT;
    while !check().await {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached in time"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

pub async fn send(ws: &mut WsClient, message: &ClientMessage) {
    let json = serde_json::to_string(message).unwrap();
    ws.send(Message::Text(json)).await.unwrap();
}

pub async fn send_raw(ws: &mut WsClient, text: &str) {
    ws.send(Message::Text(text.to_string())).await.unwrap();
}

/// Next server message; panics on close or timeout
pub async fn next_message(ws: &mut WsClient) -> ServerMessage {
    loop {
        let frame = tokio::time::timeout(WAIT, ws.next())
            .await
            .expect("timed out waiting for a message")
            .expect("socket ended")
            .expect("socket error");
        match frame {
            Message::Text(text) => return serde_json::from_str(&text).unwrap(),
            Message::Close(frame) => panic!("socket closed: {:?}", frame),
            _ => continue,
        }
    }
}

/// Read until the server closes the socket, returning messages seen on the way
pub async fn read_until_close(ws: &mut WsClient) -> Vec<ServerMessage> {
    let mut messages = Vec::new();
    loop {
        let frame = tokio::time::timeout(WAIT, ws.next())
            .await
            .expect("timed out waiting for close");
        match frame {
            Some(Ok(Message::Text(text))) => messages.push(serde_json::from_str(&text).unwrap()),
            Some(Ok(Message::Close(_))) | None | Some(Err(_)) => return messages,
            Some(Ok(_)) => {}
        }
    }
}

/// Assert nothing arrives for a short while
pub async fn expect_silence(ws: &mut WsClient) {
    if let Ok(Some(Ok(Message::Text(text)))) =
        tokio::time::timeout(Duration::from_millis(150), ws.next()).await
    {
        panic!("unexpected message: {}", text);
    }
}

pub async fn session_id_of(ws: &mut WsClient) -> (String, bool) {
    match next_message(ws).await {
        ServerMessage::Session {
            session_id,
            restored,
        } => (session_id, restored),
        other => panic!("expected session message, got {:?}", other),
    }
}
