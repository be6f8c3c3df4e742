//! Interactive session tests against the in-memory engine.

use cjbox_core::{
    AdmissionGate, ClientFrame, CloseReason, CoreError, Playground, SessionConfig, SessionSummary,
    StaticProbe, CLOSE_INTERNAL_ERROR, LSP_NAME_PREFIX,
};
use cjbox_engine::{FailAt, LifecycleManager, MockEngine, MockProcess, SandboxPolicy};
use futures::channel::mpsc;
use futures::StreamExt;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::task::JoinHandle;

type ClientTx = mpsc::UnboundedSender<Result<ClientFrame, String>>;
type ClientRx = mpsc::UnboundedReceiver<ClientFrame>;

fn playground(engine: &MockEngine) -> Playground {
    let lifecycle = LifecycleManager::new(Arc::new(engine.clone()), SandboxPolicy::default());
    let gate = AdmissionGate::new(Arc::new(StaticProbe::new(u64::MAX)), 0);
    Playground::new(lifecycle, gate, SessionConfig::default())
}

/// Language server double: checks the handoff, then echoes every line.
async fn echo_agent(process: MockProcess) -> i64 {
    let (stdin, output) = process.split();
    let mut lines = BufReader::new(stdin).lines();
    match lines.next_line().await {
        Ok(Some(handoff)) if handoff == r#"{"kind":"lsp"}"# => {}
        _ => return 3,
    }
    while let Ok(Some(line)) = lines.next_line().await {
        output.stderr(format!("echo {}\n", line.len()));
        output.stdout(format!("{line}\n"));
    }
    0
}

fn connect(playground: &Playground) -> (ClientTx, ClientRx, JoinHandle<Result<SessionSummary, CoreError>>) {
    let (client_tx, stream) = mpsc::unbounded();
    let (sink, client_rx) = mpsc::unbounded();
    let playground = playground.clone();
    let handle = tokio::spawn(async move { playground.serve_lsp(stream, sink).await });
    (client_tx, client_rx, handle)
}

fn request(id: u64) -> ClientFrame {
    let message = json!({
        "jsonrpc": "2.0",
        "id": id,
        "method": "textDocument/hover",
        "params": { "position": { "line": id, "character": 0 } }
    });
    ClientFrame::Text(message.to_string())
}

async fn next_text(rx: &mut ClientRx) -> Value {
    loop {
        match tokio::time::timeout(Duration::from_secs(5), rx.next()).await {
            Ok(Some(ClientFrame::Text(text))) => return serde_json::from_str(&text).unwrap(),
            Ok(Some(ClientFrame::Ping(_))) => continue,
            other => panic!("unexpected frame: {other:?}"),
        }
    }
}

#[tokio::test]
async fn test_messages_keep_their_order() {
    let engine = MockEngine::new(echo_agent);
    let playground = playground(&engine);
    let (client_tx, mut client_rx, handle) = connect(&playground);

    for id in 0..20 {
        client_tx.unbounded_send(Ok(request(id))).unwrap();
    }
    for id in 0..20u64 {
        let message = next_text(&mut client_rx).await;
        assert_eq!(message["id"], json!(id));
        assert_eq!(message["method"], "textDocument/hover");
    }

    drop(client_tx);
    let summary = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(summary.messages_in, 20);
    assert_eq!(summary.messages_out, 20);

    assert_eq!(engine.container_count(), 0);
    assert_eq!(engine.removals(), 1);
    let specs = engine.created_specs();
    assert!(!specs[0].auto_remove);
    assert!(specs[0]
        .name
        .as_deref()
        .is_some_and(|name| name.starts_with(LSP_NAME_PREFIX)));
    assert_eq!(playground.stats().snapshot().active_sessions, 0);
}

#[tokio::test]
async fn test_binary_frames_are_forwarded() {
    let engine = MockEngine::new(echo_agent);
    let playground = playground(&engine);
    let (client_tx, mut client_rx, handle) = connect(&playground);

    let notification = json!({ "jsonrpc": "2.0", "method": "initialized", "params": {} });
    client_tx
        .unbounded_send(Ok(ClientFrame::Binary(notification.to_string().into())))
        .unwrap();
    let echoed = next_text(&mut client_rx).await;
    assert_eq!(echoed["method"], "initialized");

    client_tx.unbounded_send(Ok(ClientFrame::Close(None))).unwrap();
    let summary = handle.await.unwrap().unwrap();
    assert_eq!(summary.messages_in, 1);
    assert_eq!(engine.container_count(), 0);
}

#[tokio::test]
async fn test_invalid_client_message_ends_session() {
    let engine = MockEngine::new(echo_agent);
    let playground = playground(&engine);
    let (client_tx, _client_rx, handle) = connect(&playground);

    client_tx
        .unbounded_send(Ok(ClientFrame::Text(r#"{"jsonrpc":"1.0","id":1}"#.into())))
        .unwrap();
    let summary = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(summary.messages_in, 0);
    assert_eq!(engine.container_count(), 0);
}

#[tokio::test]
async fn test_agent_exit_ends_session() {
    // last words before exiting must still reach the client, in order
    let engine = MockEngine::new(|p: MockProcess| async move {
        p.stdout("{\"jsonrpc\":\"2.0\",\"method\":\"window/logMessage\",\"params\":{}}\n");
        p.stdout("{\"jsonrpc\":\"2.0\",\"id\":9,\"result\":null}\n");
        1
    });
    let playground = playground(&engine);
    let (_client_tx, mut client_rx, handle) = connect(&playground);

    let summary = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(summary.messages_out, 2);
    assert_eq!(engine.container_count(), 0);
    assert_eq!(engine.removals(), 1);

    let log = next_text(&mut client_rx).await;
    assert_eq!(log["method"], "window/logMessage");
    let reply = next_text(&mut client_rx).await;
    assert_eq!(reply["id"], 9);

    // writer closes the client side on the way out
    let mut rest = Vec::new();
    while let Some(frame) = client_rx.next().await {
        rest.push(frame);
    }
    assert_eq!(rest.last(), Some(&ClientFrame::Close(None)));
}

#[tokio::test]
async fn test_invalid_sandbox_output_ends_session() {
    let engine = MockEngine::new(|p: MockProcess| async move {
        let (stdin, output) = p.split();
        output.stdout("this is not json\n");
        // stay alive until torn down
        let mut lines = BufReader::new(stdin).lines();
        while let Ok(Some(_)) = lines.next_line().await {}
        0
    });
    let playground = playground(&engine);
    let (_client_tx, mut client_rx, handle) = connect(&playground);

    let summary = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(summary.messages_out, 0);
    assert_eq!(engine.container_count(), 0);
    assert_eq!(engine.removals(), 1);

    let mut frames = Vec::new();
    while let Some(frame) = client_rx.next().await {
        frames.push(frame);
    }
    assert_eq!(frames, vec![ClientFrame::Close(None)]);
}

#[tokio::test]
async fn test_closed_client_sink_ends_session() {
    let engine = MockEngine::new(echo_agent);
    let playground = playground(&engine);
    let (client_tx, client_rx, handle) = connect(&playground);

    // the client stops reading; the echo has nowhere to go
    drop(client_rx);
    client_tx.unbounded_send(Ok(request(1))).unwrap();

    let summary = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(summary.messages_in, 1);
    assert_eq!(engine.container_count(), 0);
    assert_eq!(engine.removals(), 1);
    assert_eq!(playground.stats().snapshot().active_sessions, 0);
}

#[tokio::test(start_paused = true)]
async fn test_silent_client_times_out() {
    let engine = MockEngine::new(echo_agent);
    let playground = playground(&engine);
    let (_client_tx, mut client_rx, handle) = connect(&playground);

    let started = tokio::time::Instant::now();
    handle.await.unwrap().unwrap();
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_secs(10), "{elapsed:?}");
    assert!(elapsed < Duration::from_secs(11), "{elapsed:?}");

    let mut frames = Vec::new();
    while let Some(frame) = client_rx.next().await {
        frames.push(frame);
    }
    assert_eq!(
        frames,
        vec![ClientFrame::Ping(Default::default()), ClientFrame::Close(None)]
    );
    assert_eq!(engine.container_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_pongs_keep_session_alive() {
    let engine = MockEngine::new(echo_agent);
    let playground = playground(&engine);
    let (client_tx, mut client_rx, handle) = connect(&playground);

    // answer three pings, then hang up
    let responder = tokio::spawn(async move {
        let mut pongs = 0;
        while let Some(frame) = client_rx.next().await {
            if let ClientFrame::Ping(payload) = frame {
                client_tx
                    .unbounded_send(Ok(ClientFrame::Pong(payload)))
                    .unwrap();
                pongs += 1;
                if pongs == 3 {
                    break;
                }
            }
        }
    });

    let started = tokio::time::Instant::now();
    handle.await.unwrap().unwrap();
    assert!(started.elapsed() >= Duration::from_secs(24));
    responder.await.unwrap();
    assert_eq!(engine.container_count(), 0);
}

#[tokio::test]
async fn test_shutdown_cancels_open_sessions() {
    let engine = MockEngine::new(echo_agent);
    let playground = playground(&engine);
    let (client_tx, mut client_rx, handle) = connect(&playground);

    client_tx.unbounded_send(Ok(request(1))).unwrap();
    next_text(&mut client_rx).await;
    assert_eq!(playground.stats().snapshot().active_sessions, 1);

    playground.shutdown();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(engine.container_count(), 0);
    assert_eq!(engine.removals(), 1);
    assert_eq!(playground.stats().snapshot().active_sessions, 0);
}

#[tokio::test]
async fn test_open_failures_tear_down() {
    for step in [FailAt::Create, FailAt::Start, FailAt::Attach] {
        let engine = MockEngine::new(echo_agent).failing_at(step);
        let playground = playground(&engine);
        let (_client_tx, mut client_rx, handle) = connect(&playground);

        let result = handle.await.unwrap();
        assert!(
            matches!(result, Err(CoreError::Engine(_))),
            "{step:?}: {result:?}"
        );
        assert_eq!(engine.container_count(), 0, "{step:?}");

        // the client hears why before the transport goes away
        let frame = client_rx.next().await;
        assert_eq!(
            frame,
            Some(ClientFrame::Close(Some(CloseReason {
                code: CLOSE_INTERNAL_ERROR,
                reason: "sandbox unavailable".into(),
            }))),
            "{step:?}"
        );
        assert_eq!(client_rx.next().await, None, "{step:?}");
    }
}
