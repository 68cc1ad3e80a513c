use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::config::ServerConfig;
use crate::connection::{run_connection, ConnectionParams};
use crate::events::EventBus;
use crate::interaction::InteractionHub;
use crate::provider::FetchProvider;
use crate::session::SessionManager;
use crate::storage::Store;
use crate::vault::SecretVault;

/// Shared state accessible by handlers.
#[derive(Clone)]
pub(crate) struct AppState {
    pub config: ServerConfig,
    pub store: Arc<dyn Store>,
    pub events: EventBus,
    pub interact: InteractionHub,
    pub manager: SessionManager,
}

/// Build the axum router for the WS server.
///
/// The router exposes `/ws` (WebSocket upgrade) and `/health`.
/// Callers should use `into_make_service_with_connect_info::<SocketAddr>()`
/// when binding to get remote address extraction.
///
/// On startup, sessions left `running` by a previous process are closed out
/// as errors so the single-flight check starts from a clean slate.
pub fn build_router(
    config: ServerConfig,
    store: Arc<dyn Store>,
    vault: Arc<SecretVault>,
    provider: Arc<dyn FetchProvider>,
) -> Router {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    match store.mark_stale_running_sessions(now) {
        Ok(0) => {}
        Ok(n) => tracing::warn!(sessions = n, "closed stale running sessions from previous run"),
        Err(e) => tracing::warn!("failed to close stale sessions on startup: {e}"),
    }

    let events = EventBus::new(config.event_capacity);
    let interact = InteractionHub::new(
        events.clone(),
        config.otp_timeout,
        config.manual_confirm_timeout,
    );
    let manager = SessionManager::new(
        store.clone(),
        vault,
        provider,
        interact.clone(),
        events.clone(),
    );

    let state = AppState {
        config,
        store,
        events,
        interact,
        manager,
    };

    Router::new()
        .route("/ws", get(ws_upgrade))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}

async fn ws_upgrade(State(state): State<AppState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    let params = ConnectionParams {
        heartbeat_interval: state.config.heartbeat_interval,
        idle_timeout: state.config.idle_timeout,
        store: state.store.clone(),
        events: state.events.clone(),
        interact: state.interact.clone(),
        manager: state.manager.clone(),
    };
    ws.on_upgrade(move |socket| run_connection(socket, params))
}
