use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: 127.0.0.1:9810).
    pub bind: SocketAddr,
    /// Interval between server→client pings.
    pub heartbeat_interval: Duration,
    /// Close the connection after this duration without any message.
    pub idle_timeout: Duration,
    /// How long a fetch may wait for a one-time code.
    pub otp_timeout: Duration,
    /// How long a fetch may wait for a manual-login confirmation.
    pub manual_confirm_timeout: Duration,
    /// Broadcast buffer size for the event bus.
    pub event_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 9810),
            heartbeat_interval: Duration::from_secs(15),
            idle_timeout: Duration::from_secs(120),
            otp_timeout: Duration::from_secs(180),
            manual_confirm_timeout: Duration::from_secs(600),
            event_capacity: 256,
        }
    }
}
