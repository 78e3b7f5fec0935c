mod common;

use pretty_assertions::assert_eq;
use std::time::Duration;

use common::*;
use forge_terminal::TerminalSize;
use forge_types::{ClientMessage, ServerMessage};

const LONG: Duration = Duration::from_secs(60);

#[tokio::test]
async fn test_new_connection_gets_default_shell() {
    let server = start_server(LONG, &[], None).await;
    let mut ws = server.connect("").await;

    let (session_id, restored) = session_id_of(&mut ws).await;
    assert!(!restored);
    assert!(!session_id.is_empty());
    assert_eq!(server.backend.spawn_count(), 1);

    let shell = server.backend.last_shell();
    assert_eq!(shell.request.runspace_id, None);
    assert_eq!(shell.request.working_dir, server.dir.path());

    shell.emit("$ ");
    assert_eq!(next_message(&mut ws).await, ServerMessage::output("$ "));
}

#[tokio::test]
async fn test_input_resize_and_execute_reach_the_shell() {
    let server = start_server(LONG, &[], None).await;
    let mut ws = server.connect("").await;
    session_id_of(&mut ws).await;
    let shell = server.backend.last_shell();

    send(&mut ws, &ClientMessage::Input { data: "ec".into() }).await;
    send(&mut ws, &ClientMessage::Input { data: "ho\r".into() }).await;
    send(&mut ws, &ClientMessage::Resize { cols: 132, rows: 43 }).await;
    send(&mut ws, &ClientMessage::Execute { command: "ls -la".into() }).await;

    eventually(|| {
        let shell = shell.clone();
        async move { shell.written() == "echo\rls -la\r" }
    })
    .await;
    assert_eq!(
        *shell.resizes.lock().unwrap(),
        vec![TerminalSize { cols: 132, rows: 43 }]
    );
}

#[tokio::test]
async fn test_malformed_messages_are_dropped() {
    let server = start_server(LONG, &[], None).await;
    let mut ws = server.connect("").await;
    session_id_of(&mut ws).await;
    let shell = server.backend.last_shell();

    send_raw(&mut ws, "not json").await;
    send_raw(&mut ws, r#"{"type":"dance"}"#).await;
    send_raw(&mut ws, r#"{"type":"resize","cols":"wide"}"#).await;
    send(&mut ws, &ClientMessage::Input { data: "still here".into() }).await;

    eventually(|| {
        let shell = shell.clone();
        async move { shell.written() == "still here" }
    })
    .await;
    assert_eq!(server.registry.len().await, 1);
}

#[tokio::test]
async fn test_reattach_replays_scrollback_after_ready() {
    let server = start_server(LONG, &[], None).await;
    let mut first = server.connect("").await;
    let (session_id, _) = session_id_of(&mut first).await;
    let shell = server.backend.last_shell();

    shell.emit("line one\r\n");
    shell.emit("line two\r\n");
    next_message(&mut first).await;
    next_message(&mut first).await;
    drop(first);

    let mut second = server.connect(&format!("sessionId={}", session_id)).await;
    assert_eq!(
        next_message(&mut second).await,
        ServerMessage::Session {
            session_id: session_id.clone(),
            restored: true,
        }
    );

    // Held until ready; output arriving now joins the replay
    shell.emit("line three\r\n");
    server.wait_for_scrollback(&session_id, 32).await;
    expect_silence(&mut second).await;

    send(&mut second, &ClientMessage::Ready).await;
    assert_eq!(
        next_message(&mut second).await,
        ServerMessage::output("line one\r\nline two\r\nline three\r\n")
    );

    // Replay is released once, then output is live
    send(&mut second, &ClientMessage::Ready).await;
    shell.emit("live");
    assert_eq!(next_message(&mut second).await, ServerMessage::output("live"));

    assert_eq!(server.backend.spawn_count(), 1);
    let session = server.registry.get(&session_id).await.unwrap();
    assert_eq!(session.pid(), Some(shell.pid));
}

#[tokio::test]
async fn test_reattach_retires_the_previous_socket() {
    let server = start_server(Duration::from_millis(100), &[], None).await;
    let mut first = server.connect("").await;
    let (session_id, _) = session_id_of(&mut first).await;

    let mut second = server.connect(&format!("sessionId={}", session_id)).await;
    let (_, restored) = session_id_of(&mut second).await;
    assert!(restored);

    // The retired socket is closed by the server
    assert!(read_until_close(&mut first).await.is_empty());
    drop(first);

    // Its late close must not orphan the session
    tokio::time::sleep(Duration::from_millis(300)).await;
    let session = server.registry.get(&session_id).await.unwrap();
    assert!(session.is_attached().await);
    assert!(!server.backend.last_shell().is_killed());

    send(&mut second, &ClientMessage::Input { data: "pwd\r".into() }).await;
    let shell = server.backend.last_shell();
    eventually(|| {
        let shell = shell.clone();
        async move { shell.written() == "pwd\r" }
    })
    .await;
}

#[tokio::test]
async fn test_expired_session_id_is_reused() {
    let server = start_server(Duration::from_millis(100), &[], None).await;
    let mut first = server.connect("").await;
    let (session_id, _) = session_id_of(&mut first).await;
    let original = server.backend.last_shell();
    drop(first);

    server.wait_for_sessions(0).await;
    assert!(original.is_killed());

    let mut second = server.connect(&format!("sessionId={}", session_id)).await;
    assert_eq!(
        next_message(&mut second).await,
        ServerMessage::Session {
            session_id: session_id.clone(),
            restored: false,
        }
    );
    assert_eq!(server.backend.spawn_count(), 2);
}

#[tokio::test]
async fn test_unknown_session_id_creates_session_with_that_id() {
    let server = start_server(LONG, &[], None).await;
    let mut ws = server.connect("sessionId=my-terminal").await;
    assert_eq!(
        next_message(&mut ws).await,
        ServerMessage::Session {
            session_id: "my-terminal".to_string(),
            restored: false,
        }
    );
    assert!(server.registry.get("my-terminal").await.is_some());
}

#[tokio::test]
async fn test_process_exit_notifies_then_closes() {
    let server = start_server(LONG, &[], None).await;
    let mut ws = server.connect("").await;
    session_id_of(&mut ws).await;

    server.backend.last_shell().exit(7);

    let messages = read_until_close(&mut ws).await;
    assert_eq!(
        messages,
        vec![ServerMessage::output("\r\n[Process exited with code 7]\r\n")]
    );
    server.wait_for_sessions(0).await;
}

#[tokio::test]
async fn test_exit_while_held_flushes_replay_first() {
    let server = start_server(LONG, &[], None).await;
    let mut first = server.connect("").await;
    let (session_id, _) = session_id_of(&mut first).await;
    let shell = server.backend.last_shell();
    shell.emit("build ok\r\n");
    next_message(&mut first).await;
    drop(first);

    let mut second = server.connect(&format!("sessionId={}", session_id)).await;
    session_id_of(&mut second).await;
    shell.exit(0);

    let messages = read_until_close(&mut second).await;
    assert_eq!(
        messages,
        vec![
            ServerMessage::output("build ok\r\n"),
            ServerMessage::output("\r\n[Process exited with code 0]\r\n"),
        ]
    );
}

#[tokio::test]
async fn test_unknown_runspace_is_rejected() {
    let server = start_server(LONG, &["api"], None).await;
    let mut ws = server.connect("runspace=ghost").await;

    let messages = read_until_close(&mut ws).await;
    assert_eq!(messages.len(), 1);
    match &messages[0] {
        ServerMessage::Error { data } => assert!(data.contains("ghost")),
        other => panic!("expected error, got {:?}", other),
    }
    assert_eq!(server.backend.spawn_count(), 0);
    assert!(server.registry.is_empty().await);
}

#[tokio::test]
async fn test_runspace_scoping_and_release() {
    let server = start_server(LONG, &["api", "web"], Some("web")).await;

    let mut explicit = server.connect("runspace=api").await;
    session_id_of(&mut explicit).await;
    assert_eq!(
        server.backend.shell(0).request.runspace_id.as_deref(),
        Some("api")
    );

    // No runspace given: the active one is used
    let mut active = server.connect("").await;
    session_id_of(&mut active).await;
    assert_eq!(
        server.backend.shell(1).request.runspace_id.as_deref(),
        Some("web")
    );

    server.backend.shell(0).exit(0);
    read_until_close(&mut explicit).await;
    server.wait_for_sessions(1).await;
    assert_eq!(server.backend.released(), vec!["api".to_string()]);
}

#[tokio::test]
async fn test_shared_runspace_is_released_with_last_session() {
    let server = start_server(LONG, &["api"], None).await;
    let mut a = server.connect("runspace=api").await;
    session_id_of(&mut a).await;
    let mut b = server.connect("runspace=api").await;
    session_id_of(&mut b).await;

    server.backend.shell(0).exit(0);
    read_until_close(&mut a).await;
    server.wait_for_sessions(1).await;
    assert!(server.backend.released().is_empty());

    server.backend.shell(1).exit(0);
    read_until_close(&mut b).await;
    server.wait_for_sessions(0).await;
    assert_eq!(server.backend.released(), vec!["api".to_string()]);
}

#[tokio::test]
async fn test_sideband_messages_follow_output() {
    let server = start_server(LONG, &[], None).await;
    let mut ws = server.connect("").await;
    session_id_of(&mut ws).await;

    let chunk = "● Read(src/main.rs)\r\n";
    server.backend.last_shell().emit(chunk);

    assert_eq!(next_message(&mut ws).await, ServerMessage::output(chunk));
    match next_message(&mut ws).await {
        ServerMessage::Context { data } => {
            let files = data.files.expect("file activity");
            assert_eq!(files[0].path, "src/main.rs");
            assert_eq!(data.max_tokens, 200_000);
        }
        other => panic!("expected context, got {:?}", other),
    }
}
