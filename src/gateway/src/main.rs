use std::env;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tally_core::{
    build_router, ServerConfig, SecretVault, SqliteStore, TallyConfig, UnconfiguredProvider,
};
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_filter())
        .init();

    let file_config = match TallyConfig::load() {
        Ok(config) => config,
        Err(err) => {
            let path = TallyConfig::config_path()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|_| "~/.tally/config.toml".to_string());
            tracing::warn!(%path, error = %err, "failed to load config; using defaults");
            TallyConfig::default()
        }
    };

    let defaults = ServerConfig::default();
    let config = ServerConfig {
        bind: parse_socket(
            "TALLY_BIND",
            file_config
                .server
                .bind
                .as_deref()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.bind),
        ),
        heartbeat_interval: parse_duration(
            "TALLY_HEARTBEAT_SECS",
            file_config
                .server
                .heartbeat_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.heartbeat_interval),
        ),
        idle_timeout: parse_duration(
            "TALLY_IDLE_SECS",
            file_config
                .server
                .idle_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.idle_timeout),
        ),
        otp_timeout: parse_duration(
            "TALLY_OTP_TIMEOUT_SECS",
            file_config
                .auth
                .otp_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.otp_timeout),
        ),
        manual_confirm_timeout: parse_duration(
            "TALLY_MANUAL_TIMEOUT_SECS",
            file_config
                .auth
                .manual_confirm_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.manual_confirm_timeout),
        ),
        event_capacity: defaults.event_capacity,
    };

    let db_path = match env::var("TALLY_DB_PATH") {
        Ok(path) => path.into(),
        Err(_) => file_config.db_path()?,
    };
    let store = Arc::new(SqliteStore::open(&db_path)?);
    tracing::info!(path = %db_path.display(), "store opened");

    let vault_path = match env::var("TALLY_VAULT_PATH") {
        Ok(path) => path.into(),
        Err(_) => file_config.vault_path()?,
    };
    // A vault that cannot be decrypted here means a wrong passphrase or a
    // damaged container; refusing to start beats running without credentials.
    let passphrase = env::var("TALLY_VAULT_KEY")
        .map_err(|_| "TALLY_VAULT_KEY must be set to the vault passphrase")?;
    let vault = Arc::new(SecretVault::open(&vault_path, &passphrase)?);
    tracing::info!(path = %vault_path.display(), "vault opened");

    let app = build_router(config.clone(), store, vault, Arc::new(UnconfiguredProvider));

    let listener = TcpListener::bind(config.bind).await?;
    tracing::info!(addr = %config.bind, "listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}

fn parse_socket(key: &str, default: SocketAddr) -> SocketAddr {
    match env::var(key) {
        Ok(v) => v.parse().unwrap_or(default),
        Err(_) => default,
    }
}

fn parse_duration(key: &str, default: Duration) -> Duration {
    match env::var(key) {
        Ok(v) => v.parse::<u64>().map(Duration::from_secs).unwrap_or(default),
        Err(_) => default,
    }
}

fn tracing_filter() -> tracing_subscriber::EnvFilter {
    let explicit = env::var("TALLY_LOG").or_else(|_| env::var("RUST_LOG")).ok();
    if let Some(filter) = explicit {
        return tracing_subscriber::EnvFilter::new(filter);
    }
    if matches!(
        env::var("TALLY_DEBUG").as_deref(),
        Ok("1" | "true" | "TRUE" | "yes" | "YES")
    ) {
        return tracing_subscriber::EnvFilter::new("debug");
    }
    tracing_subscriber::EnvFilter::new("info")
}
