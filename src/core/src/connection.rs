use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use serde_json::json;
use tokio::sync::broadcast;
use uuid::Uuid;

use tally_protocol::{
    decode_message, encode_message, error_codes, Event, Message as ProtoMessage, Response,
};

use crate::events::{BusEvent, EventBus};
use crate::interaction::{AuthService, InteractionHub};
use crate::router::{MessageRouter, SubscriptionManager};
use crate::session::{AccountService, SessionManager, SessionService};
use crate::storage::Store;

/// Everything a connection needs from the server.
#[derive(Clone)]
pub struct ConnectionParams {
    pub heartbeat_interval: Duration,
    pub idle_timeout: Duration,
    pub store: Arc<dyn Store>,
    pub events: EventBus,
    pub interact: InteractionHub,
    pub manager: SessionManager,
}

/// Run the message loop for one WS connection: requests in, responses and
/// subscribed events out, with heartbeat pings and an idle timeout.
pub async fn run_connection(socket: WebSocket, params: ConnectionParams) {
    let conn_id = Uuid::new_v4();
    tracing::info!(conn_id = %conn_id, "connection open");

    let (mut sink, mut stream) = socket.split();

    let mut idle_deadline = tokio::time::Instant::now() + params.idle_timeout;
    let mut heartbeat = tokio::time::interval(params.heartbeat_interval);
    heartbeat.tick().await; // consume immediate first tick

    let mut router = MessageRouter::new();
    router.register(Box::new(SessionService::new(
        params.manager.clone(),
        params.store.clone(),
    )));
    router.register(Box::new(AccountService::new(params.store.clone())));
    router.register(Box::new(AuthService::new(params.interact.clone())));

    // Per-connection subscription state; events flow from the shared bus.
    let mut subscriptions = SubscriptionManager::new();
    let mut event_rx = params.events.subscribe();

    loop {
        tokio::select! {
            msg = stream.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        idle_deadline = tokio::time::Instant::now() + params.idle_timeout;
                        handle_text_message(&mut sink, &text, &mut router, &mut subscriptions)
                            .await;
                    }
                    Some(Ok(Message::Binary(_))) => {
                        idle_deadline = tokio::time::Instant::now() + params.idle_timeout;
                        tracing::debug!("binary frame ignored");
                    }
                    Some(Ok(Message::Ping(data))) => {
                        idle_deadline = tokio::time::Instant::now() + params.idle_timeout;
                        let _ = sink.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Pong(_))) => {
                        idle_deadline = tokio::time::Instant::now() + params.idle_timeout;
                    }
                    Some(Ok(Message::Close(frame))) => {
                        if let Some(frame) = frame {
                            tracing::info!(code = %frame.code, reason = %frame.reason, "ws close");
                        } else {
                            tracing::info!("ws close");
                        }
                        break;
                    }
                    None => {
                        tracing::info!("ws stream ended");
                        break;
                    }
                    Some(Err(e)) => {
                        tracing::warn!("ws error: {e}");
                        break;
                    }
                }
            }
            // Heartbeat ping.
            _ = heartbeat.tick() => {
                if sink.send(Message::Ping(vec![].into())).await.is_err() {
                    break;
                }
            }
            // Idle timeout.
            _ = tokio::time::sleep_until(idle_deadline) => {
                tracing::info!("idle timeout");
                let _ = sink
                    .send(Message::Close(Some(axum::extract::ws::CloseFrame {
                        code: 4000,
                        reason: "idle timeout".into(),
                    })))
                    .await;
                break;
            }
            // Broadcast events (filtered by subscriptions).
            evt = event_rx.recv() => {
                match evt {
                    Ok(event) => {
                        forward_event(&mut sink, &subscriptions, event).await;
                    }
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        tracing::warn!(missed, "event receiver lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        break;
                    }
                }
            }
        }
    }

    tracing::info!(conn_id = %conn_id, "connection closed");
}

async fn handle_text_message(
    sink: &mut SplitSink<WebSocket, Message>,
    text: &str,
    router: &mut MessageRouter,
    subscriptions: &mut SubscriptionManager,
) {
    match decode_message(text) {
        Ok(ProtoMessage::Request(req)) => {
            tracing::debug!(method = %req.method, id = %req.id, "request");
            let resp = match req.method.as_str() {
                "events.subscribe" => handle_subscribe(req.id, req.params, subscriptions),
                "events.unsubscribe" => handle_unsubscribe(req.id, req.params, subscriptions),
                _ => router.route_request(req.id, &req.method, req.params).await,
            };
            let msg = ProtoMessage::Response(resp);
            if let Ok(json) = encode_message(&msg) {
                let _ = sink.send(Message::Text(json.into())).await;
            }
        }
        Ok(other) => {
            tracing::debug!(?other, "non-request message from client (ignored)");
        }
        Err(e) => {
            tracing::warn!("failed to decode message: {e}");
        }
    }
}

async fn forward_event(
    sink: &mut SplitSink<WebSocket, Message>,
    subscriptions: &SubscriptionManager,
    event: BusEvent,
) {
    if !subscriptions.matches(&event.topic) {
        return;
    }
    let msg = ProtoMessage::Event(Event {
        topic: event.topic,
        params: event.params,
    });
    if let Ok(json) = encode_message(&msg) {
        let _ = sink.send(Message::Text(json.into())).await;
    }
}

/// Handle `events.subscribe` — add a topic subscription.
///
/// Params: `{ "topic": "session.*" }` or `{ "topic": "*" }`
/// Returns: `{ "subscription_id": "<uuid>" }`
fn handle_subscribe(
    req_id: Uuid,
    params: Option<serde_json::Value>,
    subs: &mut SubscriptionManager,
) -> Response {
    let topic = params
        .as_ref()
        .and_then(|p| p.get("topic"))
        .and_then(|v| v.as_str());

    match topic {
        Some(pattern) => {
            let sub_id = subs.subscribe(pattern);
            tracing::debug!(%sub_id, pattern, "subscribed");
            Response::success(req_id, json!({ "subscription_id": sub_id }))
        }
        None => Response::error(
            req_id,
            error_codes::INVALID_PARAMS,
            "missing 'topic' parameter",
        ),
    }
}

/// Handle `events.unsubscribe` — remove a topic subscription.
///
/// Params: `{ "subscription_id": "<uuid>" }`
/// Returns: `{ "ok": true }` or error if not found.
fn handle_unsubscribe(
    req_id: Uuid,
    params: Option<serde_json::Value>,
    subs: &mut SubscriptionManager,
) -> Response {
    let sub_id = params
        .as_ref()
        .and_then(|p| p.get("subscription_id"))
        .and_then(|v| v.as_str())
        .and_then(|s| s.parse::<Uuid>().ok());

    match sub_id {
        Some(id) => {
            if subs.unsubscribe(id) {
                tracing::debug!(%id, "unsubscribed");
                Response::success(req_id, json!({ "ok": true }))
            } else {
                Response::error(
                    req_id,
                    error_codes::INVALID_PARAMS,
                    "subscription not found",
                )
            }
        }
        None => Response::error(
            req_id,
            error_codes::INVALID_PARAMS,
            "missing or invalid 'subscription_id'",
        ),
    }
}
