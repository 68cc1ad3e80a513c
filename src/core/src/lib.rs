pub mod config;
pub mod connection;
pub mod error;
pub mod events;
pub mod ingest;
pub mod interaction;
pub mod paths;
pub mod pending;
pub mod provider;
pub mod router;
pub mod server;
pub mod session;
pub mod storage;
pub mod tally_config;
pub mod vault;

pub use config::ServerConfig;
pub use error::{FetchError, SessionError, VaultError, WaitError};
pub use events::{BusEvent, EventBus};
pub use interaction::InteractionHub;
pub use pending::PendingBridge;
pub use provider::{FetchProvider, UnconfiguredProvider};
pub use server::build_router;
pub use session::SessionManager;
pub use storage::{SqliteStore, Store};
pub use tally_config::TallyConfig;
pub use vault::{SecretBundle, SecretVault};
