use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::json;
use tally_core::storage::AccountRecord;
use tally_core::{ServerConfig, SqliteStore, Store};
use tally_protocol::{error_codes, Message, Request};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite;

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

// ── Helpers ──────────────────────────────────────────────────────────

struct TestServer {
    addr: SocketAddr,
    store: Arc<SqliteStore>,
    vault: Arc<tally_core::SecretVault>,
    _tmp: tempfile::TempDir,
}

async fn start_server(config: ServerConfig) -> TestServer {
    let tmp = tempfile::tempdir().unwrap();
    let store = Arc::new(SqliteStore::open_memory().unwrap());
    let vault = Arc::new(
        tally_core::SecretVault::open(&tmp.path().join("secrets.vault"), "test-pass").unwrap(),
    );
    let app = tally_core::build_router(
        config,
        store.clone(),
        vault.clone(),
        Arc::new(tally_core::UnconfiguredProvider),
    );
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });

    TestServer {
        addr,
        store,
        vault,
        _tmp: tmp,
    }
}

async fn connect_ws(addr: SocketAddr) -> WsStream {
    let url = format!("ws://{addr}/ws");
    let (stream, _) = tokio_tungstenite::connect_async(&url).await.unwrap();
    stream
}

fn text_msg(s: String) -> tungstenite::Message {
    tungstenite::Message::Text(s.into())
}

/// Read the next text message from the WS stream, automatically
/// replying to Ping frames and skipping Pong frames.
async fn next_text(ws: &mut WsStream) -> String {
    loop {
        match ws.next().await {
            Some(Ok(tungstenite::Message::Text(t))) => return t.to_string(),
            Some(Ok(tungstenite::Message::Ping(data))) => {
                let _ = ws.send(tungstenite::Message::Pong(data)).await;
            }
            Some(Ok(tungstenite::Message::Pong(_))) => continue,
            Some(Ok(other)) => panic!("unexpected message: {other:?}"),
            Some(Err(e)) => panic!("ws error: {e}"),
            None => panic!("ws stream ended unexpectedly"),
        }
    }
}

async fn next_message(ws: &mut WsStream) -> Message {
    let text = next_text(ws).await;
    serde_json::from_str(&text).unwrap()
}

/// Read from the WS stream until a Close frame, EOF, or error.
/// Replies to pings along the way. Returns true if closed.
async fn expect_close(ws: &mut WsStream, timeout: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        tokio::select! {
            msg = ws.next() => {
                match msg {
                    Some(Ok(tungstenite::Message::Close(_))) | None | Some(Err(_)) => return true,
                    // Don't reply to pings — we want the server to see us as idle.
                    Some(Ok(tungstenite::Message::Ping(_))) => continue,
                    Some(Ok(tungstenite::Message::Pong(_))) => continue,
                    Some(Ok(_)) => continue,
                }
            }
            _ = tokio::time::sleep_until(deadline) => {
                return false;
            }
        }
    }
}

async fn send_request(ws: &mut WsStream, method: &str, params: Option<serde_json::Value>) {
    let req = Message::Request(Request::new(method, params));
    let json = tally_protocol::encode_message(&req).unwrap();
    ws.send(text_msg(json)).await.unwrap();
}

async fn rpc(ws: &mut WsStream, method: &str, params: Option<serde_json::Value>) -> tally_protocol::Response {
    send_request(ws, method, params).await;
    match next_message(ws).await {
        Message::Response(r) => r,
        other => panic!("expected response, got {other:?}"),
    }
}

fn seed_account(store: &SqliteStore, account_id: &str) {
    store
        .upsert_account(&AccountRecord {
            account_id: account_id.into(),
            name: account_id.into(),
            institution: "test bank".into(),
            secret_ref: format!("sr-{account_id}"),
            enabled: true,
            balance_cents: None,
            account_number: None,
            created_at: 1,
        })
        .unwrap();
}

// ── Tests ────────────────────────────────────────────────────────────

#[tokio::test]
async fn health_endpoint() {
    let server = start_server(ServerConfig::default()).await;

    let mut stream = tokio::net::TcpStream::connect(server.addr).await.unwrap();
    let req = format!("GET /health HTTP/1.1\r\nHost: {}\r\n\r\n", server.addr);
    stream.write_all(req.as_bytes()).await.unwrap();

    let mut buf = vec![0u8; 4096];
    let n = stream.read(&mut buf).await.unwrap();
    let response = String::from_utf8_lossy(&buf[..n]);
    assert!(response.contains("200"));
    assert!(response.contains("ok"));
}

#[tokio::test]
async fn unknown_method_is_rejected() {
    let server = start_server(ServerConfig::default()).await;
    let mut ws = connect_ws(server.addr).await;

    let resp = rpc(&mut ws, "nope.anything", None).await;
    assert_eq!(resp.error.unwrap().code, error_codes::METHOD_NOT_FOUND);
}

#[tokio::test]
async fn subscription_lifecycle_and_param_validation() {
    let server = start_server(ServerConfig::default()).await;
    let mut ws = connect_ws(server.addr).await;

    let resp = rpc(&mut ws, "events.subscribe", Some(json!({}))).await;
    assert_eq!(resp.error.unwrap().code, error_codes::INVALID_PARAMS);

    let resp = rpc(&mut ws, "events.subscribe", Some(json!({ "topic": "session.*" }))).await;
    let sub_id = resp.result.unwrap()["subscription_id"]
        .as_str()
        .unwrap()
        .to_string();

    let resp = rpc(
        &mut ws,
        "events.unsubscribe",
        Some(json!({ "subscription_id": sub_id })),
    )
    .await;
    assert_eq!(resp.result.unwrap()["ok"], true);

    let resp = rpc(
        &mut ws,
        "events.unsubscribe",
        Some(json!({ "subscription_id": sub_id })),
    )
    .await;
    assert_eq!(resp.error.unwrap().code, error_codes::INVALID_PARAMS);
}

#[tokio::test]
async fn subscribed_client_sees_session_events() {
    let server = start_server(ServerConfig::default()).await;
    seed_account(&server.store, "acct-1");
    let mut fields = std::collections::HashMap::new();
    fields.insert("username".to_string(), "user".to_string());
    server
        .vault
        .set("sr-acct-1", tally_core::SecretBundle(fields))
        .unwrap();
    let mut ws = connect_ws(server.addr).await;

    let resp = rpc(&mut ws, "events.subscribe", Some(json!({ "topic": "session.*" }))).await;
    assert!(resp.result.is_some());

    // The default provider fails every fetch, so the session runs the full
    // lifecycle with one account error.
    send_request(
        &mut ws,
        "session.start",
        Some(json!({ "trigger": "manual", "account_ids": ["acct-1"] })),
    )
    .await;

    let mut session_id = None;
    let mut topics = Vec::new();
    loop {
        match tokio::time::timeout(Duration::from_secs(5), next_message(&mut ws))
            .await
            .expect("ws stalled")
        {
            Message::Response(resp) => {
                let result = resp.result.expect("session.start failed");
                session_id = Some(result["session"]["session_id"].as_str().unwrap().to_string());
            }
            Message::Event(evt) => {
                let done = evt.topic == "session.completed";
                topics.push(evt.topic);
                if done {
                    break;
                }
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }
    assert_eq!(
        topics,
        vec![
            "session.started",
            "session.account.started",
            "session.account.error",
            "session.completed",
        ]
    );

    let session_id = session_id.unwrap();
    let resp = rpc(&mut ws, "session.logs", Some(json!({ "session_id": session_id }))).await;
    let result = resp.result.unwrap();
    let logs = result["logs"].as_array().unwrap();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0]["error_kind"], "provider");

    let resp = rpc(&mut ws, "session.list", None).await;
    let result = resp.result.unwrap();
    assert!(result["active"].as_array().unwrap().is_empty());
    assert_eq!(result["past"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn otp_submit_without_waiter_over_ws() {
    let server = start_server(ServerConfig::default()).await;
    let mut ws = connect_ws(server.addr).await;

    let resp = rpc(
        &mut ws,
        "auth.otp.submit",
        Some(json!({ "account_id": "acct-1", "code": "123456" })),
    )
    .await;
    assert_eq!(resp.error.unwrap().code, error_codes::NO_PENDING_REQUEST);
}

#[tokio::test]
async fn idle_connection_is_closed() {
    let config = ServerConfig {
        heartbeat_interval: Duration::from_millis(200),
        idle_timeout: Duration::from_millis(500),
        ..ServerConfig::default()
    };
    let server = start_server(config).await;
    let mut ws = connect_ws(server.addr).await;

    // Never send anything and never answer pings; the server should close.
    assert!(expect_close(&mut ws, Duration::from_secs(5)).await);
}
