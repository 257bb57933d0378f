use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use futures::{SinkExt, StreamExt};
use rtloop::agent::{
    dangling_tool_uses, MemorySink, NoopNotifier, RecoveryOutcome, TurnOrchestrator, TurnStatus,
};
use rtloop::config::RtloopConfig;
use rtloop::error::RtloopError;
use rtloop::realtime::{RealtimeProvider, WebSocketConnector};
use rtloop::tools::{ToolExecutor, ToolRegistry, INTERRUPTED_OUTPUT};
use rtloop::types::{Content, Role};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio::time::{timeout, Duration};
use tokio_tungstenite::{
    accept_hdr_async,
    tungstenite::{
        handshake::server::{Request, Response},
        http::StatusCode,
        Message,
    },
};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Default)]
struct ConnectionLog {
    auth_header: String,
    beta_header: String,
    query: String,
    frames: Vec<Value>,
}

impl ConnectionLog {
    fn kinds(&self) -> Vec<String> {
        self.frames
            .iter()
            .map(|frame| match frame["type"].as_str() {
                Some("conversation.item.create") => {
                    format!("item:{}", frame["item"]["role"].as_str().unwrap_or("?"))
                }
                Some(other) => other.to_string(),
                None => "?".to_string(),
            })
            .collect()
    }

    fn item_text(&self, index: usize) -> &str {
        self.frames[index]["item"]["content"][0]["text"]
            .as_str()
            .unwrap_or_default()
    }
}

/// Accepts one connection per entry of `connections`. Each entry lists the
/// event batches sent back, one batch per `response.create` received.
fn spawn_server(
    listener: TcpListener,
    connections: Vec<Vec<Vec<Value>>>,
) -> JoinHandle<Vec<ConnectionLog>> {
    tokio::spawn(async move {
        let mut logs = Vec::new();
        for responses in connections {
            let (stream, _) = listener.accept().await.expect("server should accept");
            let captured = Arc::new(Mutex::new(ConnectionLog::default()));
            let captured_inner = Arc::clone(&captured);
            let mut ws = accept_hdr_async(stream, move |req: &Request, response: Response| {
                let header = |name: &str| {
                    req.headers()
                        .get(name)
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or_default()
                        .to_string()
                };
                let mut log = captured_inner.lock().expect("log lock should not poison");
                log.auth_header = header("authorization");
                log.beta_header = header("openai-beta");
                log.query = req.uri().query().unwrap_or_default().to_string();
                Ok(response)
            })
            .await
            .expect("handshake should succeed");

            let mut responses = VecDeque::from(responses);
            let mut frames = Vec::new();
            while let Ok(Some(Ok(message))) = timeout(Duration::from_secs(5), ws.next()).await {
                let text = match message {
                    Message::Text(text) => text.to_string(),
                    Message::Close(_) => break,
                    _ => continue,
                };
                let frame: Value =
                    serde_json::from_str(&text).expect("client frame should be JSON");
                let is_create = frame["type"] == "response.create";
                frames.push(frame);
                if !is_create {
                    continue;
                }
                for event in responses.pop_front().unwrap_or_default() {
                    ws.send(Message::Text(event.to_string().into()))
                        .await
                        .expect("server event should send");
                }
            }

            let mut log = std::mem::take(&mut *captured.lock().expect("log lock should not poison"));
            log.frames = frames;
            logs.push(log);
        }
        logs
    })
}

async fn bind() -> (TcpListener, String) {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("listener should bind");
    let address = listener
        .local_addr()
        .expect("local addr should be available");
    (listener, format!("ws://{address}/v1/realtime"))
}

fn orchestrator(base_url: &str, sink: Arc<MemorySink>) -> TurnOrchestrator {
    let config = RtloopConfig::builder()
        .receive_timeout(Duration::from_millis(300))
        .max_tool_calls(10)
        .build();
    let connector =
        WebSocketConnector::new(base_url, "test-model", "test-key").expect("url should build");
    let executor = Arc::new(ToolExecutor::new(ToolRegistry::with_shell(Duration::from_secs(10))));
    let provider = RealtimeProvider::new(Arc::new(connector), executor.clone(), &config)
        .with_notifier(Arc::new(NoopNotifier));
    TurnOrchestrator::new(Box::new(provider), executor, sink)
        .with_instructions("Be brief.")
        .with_notifier(Arc::new(NoopNotifier))
        .with_max_tool_calls(config.max_tool_calls)
}

fn text_delta(delta: &str) -> Value {
    json!({"type": "response.text.delta", "delta": delta})
}

fn shell_call(id: &str, command: &str) -> Vec<Value> {
    let arguments = json!({ "command": command }).to_string();
    vec![call_delta(id, &arguments), call_done(id)]
}

fn call_delta(id: &str, arguments: &str) -> Value {
    json!({
        "type": "response.function_call_arguments.delta",
        "tool_call_id": id,
        "function_name": "shell",
        "delta": arguments
    })
}

fn call_done(id: &str) -> Value {
    json!({"type": "response.function_call_arguments.done", "tool_call_id": id})
}

fn done() -> Value {
    json!({"type": "response.done"})
}

#[tokio::test]
async fn text_turn_streams_reply_and_authenticates() {
    let (listener, url) = bind().await;
    let server = spawn_server(listener, vec![vec![vec![text_delta("hel"), text_delta("lo"), done()]]]);

    let sink = Arc::new(MemorySink::new());
    let mut orchestrator = orchestrator(&url, sink.clone());
    let outcome = orchestrator
        .run_turn("hi", &CancellationToken::new())
        .await
        .expect("turn should complete");
    orchestrator.shutdown().await;

    assert_eq!(outcome.status, TurnStatus::Completed);
    let reply = outcome.reply.expect("reply should be present");
    assert_eq!(reply.text(), "hello");
    assert!(reply.tool_uses().is_empty());
    assert_eq!(sink.messages().len(), 2);

    let logs = server.await.expect("server task should complete");
    let log = &logs[0];
    assert_eq!(log.auth_header, "Bearer test-key");
    assert_eq!(log.beta_header, "realtime=v1");
    assert_eq!(log.query, "model=test-model");
    assert_eq!(log.kinds(), vec!["item:user", "response.create"]);
    assert_eq!(log.item_text(0), "hi");
    assert_eq!(log.frames[1]["response"]["instructions"], "Be brief.");
    assert_eq!(log.frames[1]["response"]["tools"][0]["name"], "shell");
}

#[tokio::test]
async fn tool_round_executes_locally_and_returns_output() {
    let (listener, url) = bind().await;
    let server = spawn_server(
        listener,
        vec![vec![vec![
            call_delta("call_1", "{\"command\":"),
            call_delta("call_1", "\"echo listed\"}"),
            call_done("call_1"),
            text_delta("done"),
            done(),
        ]]],
    );

    let mut orchestrator = orchestrator(&url, Arc::new(MemorySink::new()));
    let outcome = orchestrator
        .run_turn("list files", &CancellationToken::new())
        .await
        .expect("turn should complete");
    assert_eq!(orchestrator.provider().tool_call_count(), 1);

    let reply = outcome.reply.expect("reply should be present");
    let tool_uses = reply.tool_uses();
    assert_eq!(tool_uses.len(), 1);
    assert_eq!(tool_uses[0].name, "shell");
    assert!(!tool_uses[0].is_error);
    assert_eq!(reply.content.last(), Some(&Content::text("done")));

    let roles: Vec<Role> = orchestrator.conversation().iter().map(|m| m.role).collect();
    assert_eq!(roles, vec![Role::User, Role::Assistant, Role::Tool, Role::Assistant]);
    orchestrator.shutdown().await;

    let logs = server.await.expect("server task should complete");
    assert_eq!(logs[0].kinds(), vec!["item:user", "response.create", "item:tool"]);
    assert_eq!(logs[0].item_text(2), "listed\n");
}

#[tokio::test]
async fn eleventh_tool_call_exceeds_the_turn_limit() {
    let mut events = Vec::new();
    for n in 0..11 {
        let id = format!("call_{n}");
        events.push(call_delta(&id, "{\"command\":\"true\"}"));
        events.push(call_done(&id));
    }
    events.push(done());

    let (listener, url) = bind().await;
    let server = spawn_server(listener, vec![vec![events]]);

    let sink = Arc::new(MemorySink::new());
    let mut orchestrator = orchestrator(&url, sink.clone());
    let error = orchestrator
        .run_turn("loop forever", &CancellationToken::new())
        .await
        .expect_err("turn should hit the limit");
    assert!(matches!(error, RtloopError::LimitExceeded { limit: 10 }));
    assert_eq!(orchestrator.provider().tool_call_count(), 0);

    let conversation = orchestrator.conversation();
    let roles: Vec<Role> = conversation.iter().map(|m| m.role).collect();
    assert_eq!(roles, vec![Role::User, Role::Assistant, Role::Tool, Role::Assistant]);
    assert_eq!(conversation[1].tool_uses().len(), 10);
    let results = conversation[2].results();
    assert_eq!(results.len(), 10);
    assert!(results.iter().all(|r| !r.is_error));
    assert!(conversation[3].text().contains("Tool call limit of 10"));
    assert!(dangling_tool_uses(conversation).is_empty());
    assert_eq!(sink.messages(), conversation.to_vec());

    let logs = server.await.expect("server task should complete");
    let tool_items = logs[0].kinds().iter().filter(|k| *k == "item:tool").count();
    assert_eq!(tool_items, 10);
}

#[tokio::test]
async fn cancelling_during_an_inline_tool_records_the_call() {
    let dir = tempfile::tempdir().expect("temp dir should be created");
    let marker = dir.path().join("ran");
    let command = format!("touch {}; sleep 5", marker.display());

    let (listener, url) = bind().await;
    let server = spawn_server(listener, vec![vec![shell_call("call_1", &command)]]);

    let sink = Arc::new(MemorySink::new());
    let mut orchestrator = orchestrator(&url, sink.clone());
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(300)).await;
        trigger.cancel();
    });

    let outcome = timeout(Duration::from_secs(4), orchestrator.run_turn("touch it", &cancel))
        .await
        .expect("cancel should stop the tool")
        .expect("interrupt should not be an error");
    assert_eq!(outcome.status, TurnStatus::Interrupted);
    assert_eq!(outcome.recovery, Some(RecoveryOutcome::AcknowledgedToolResults));
    assert!(marker.exists());

    let conversation = orchestrator.conversation();
    let roles: Vec<Role> = conversation.iter().map(|m| m.role).collect();
    assert_eq!(roles, vec![Role::User, Role::Assistant, Role::Tool, Role::Assistant]);
    let tool_uses = conversation[1].tool_uses();
    assert_eq!(tool_uses[0].id, "call_1");
    assert_eq!(tool_uses[0].arguments["command"], command.as_str());
    let result = conversation[2].results()[0].clone();
    assert!(result.is_error);
    assert_eq!(result.output, INTERRUPTED_OUTPUT);
    assert_eq!(outcome.committed, conversation.to_vec());
    assert_eq!(sink.messages(), conversation.to_vec());

    let logs = server.await.expect("server task should complete");
    assert_eq!(logs[0].kinds(), vec!["item:user", "response.create", "item:tool"]);
}

#[tokio::test]
async fn history_is_replayed_once_after_reconnect() {
    let (listener, url) = bind().await;
    let server = spawn_server(
        listener,
        vec![
            vec![vec![text_delta("one"), done()], vec![]],
            vec![vec![text_delta("three"), done()]],
        ],
    );

    let mut orchestrator = orchestrator(&url, Arc::new(MemorySink::new()));
    let cancel = CancellationToken::new();
    orchestrator
        .run_turn("first", &cancel)
        .await
        .expect("first turn should complete");
    let error = orchestrator
        .run_turn("second", &cancel)
        .await
        .expect_err("second turn should time out");
    assert!(matches!(error, RtloopError::Timeout { partial: None, .. }));
    assert_eq!(orchestrator.conversation().len(), 2);

    let third = orchestrator
        .run_turn("third", &cancel)
        .await
        .expect("third turn should complete");
    assert_eq!(third.reply.map(|m| m.text()), Some("three".to_string()));
    orchestrator.shutdown().await;

    let logs = server.await.expect("server task should complete");
    assert_eq!(
        logs[0].kinds(),
        vec!["item:user", "response.create", "item:user", "response.create"]
    );
    assert_eq!(
        logs[1].kinds(),
        vec!["item:user", "item:assistant", "item:user", "response.create"]
    );
    assert_eq!(logs[1].item_text(0), "first");
    assert_eq!(logs[1].item_text(1), "one");
    assert_eq!(logs[1].item_text(2), "third");
}

#[tokio::test]
async fn remote_error_event_fails_the_turn() {
    let (listener, url) = bind().await;
    let server = spawn_server(
        listener,
        vec![vec![vec![
            text_delta("partial"),
            json!({"type": "error", "error": {"message": "bad request"}}),
        ]]],
    );

    let sink = Arc::new(MemorySink::new());
    let mut orchestrator = orchestrator(&url, sink.clone());
    let error = orchestrator
        .run_turn("hi", &CancellationToken::new())
        .await
        .expect_err("turn should fail");
    assert!(matches!(&error, RtloopError::Protocol(m) if m.contains("bad request")));
    assert!(orchestrator.conversation().is_empty());
    assert_eq!(sink.batches(), 0);

    server.await.expect("server task should complete");
}

#[tokio::test]
async fn rejected_handshake_is_an_authentication_error() {
    let (listener, url) = bind().await;
    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.expect("server should accept");
        let result = accept_hdr_async(stream, |_req: &Request, _response: Response| {
            let response = tokio_tungstenite::tungstenite::http::Response::builder()
                .status(StatusCode::UNAUTHORIZED)
                .body(Some("unauthorized".to_string()))
                .expect("auth failure response should build");
            Err(response)
        })
        .await;
        assert!(result.is_err());
    });

    let mut orchestrator = orchestrator(&url, Arc::new(MemorySink::new()));
    let error = orchestrator
        .run_turn("hi", &CancellationToken::new())
        .await
        .expect_err("connect should fail");
    assert!(matches!(error, RtloopError::Authentication(_)));
    assert!(orchestrator.conversation().is_empty());

    server.await.expect("server task should complete");
}
