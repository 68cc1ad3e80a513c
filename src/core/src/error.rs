use thiserror::Error;

/// Ways a suspended wait on the pending-response bridge can fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum WaitError {
    #[error("timed out waiting for a response")]
    Timeout,
    #[error("superseded by a newer request for the same key")]
    Superseded,
    #[error("wait was cancelled")]
    Cancelled,
}

/// Failure of a single account fetch attempt.
///
/// A fetch failure never aborts the surrounding session; it is recorded on
/// the fetch log and the loop moves on to the next account.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error("no credentials stored for account {0}")]
    MissingCredentials(String),
    #[error("provider failure ({kind}): {message}")]
    Provider { kind: String, message: String },
    #[error("timed out waiting for user input")]
    Timeout,
    #[error("input request superseded by a newer one")]
    Superseded,
    #[error("fetch was cancelled")]
    Cancelled,
    #[error("secret store unavailable: {0}")]
    StoreUnavailable(String),
}

impl FetchError {
    /// Stable classification label persisted on fetch log rows.
    pub fn kind_label(&self) -> &'static str {
        match self {
            Self::MissingCredentials(_) => "missing_credentials",
            Self::Provider { .. } => "provider",
            Self::Timeout => "timeout",
            Self::Superseded => "superseded",
            Self::Cancelled => "cancelled",
            Self::StoreUnavailable(_) => "store_unavailable",
        }
    }

    pub fn provider(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Provider {
            kind: kind.into(),
            message: message.into(),
        }
    }
}

impl From<WaitError> for FetchError {
    fn from(err: WaitError) -> Self {
        match err {
            WaitError::Timeout => Self::Timeout,
            WaitError::Superseded => Self::Superseded,
            WaitError::Cancelled => Self::Cancelled,
        }
    }
}

/// Errors returned synchronously from session manager operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("a scrape session is already running")]
    AlreadyRunning,
    #[error("not found: {0}")]
    NotFound(String),
    #[error("storage error: {0}")]
    Storage(String),
}

/// Errors from the encrypted secret vault.
#[derive(Debug, Error)]
pub enum VaultError {
    #[error("vault io: {0}")]
    Io(#[from] std::io::Error),
    #[error("vault decryption failed (wrong key or corrupted container)")]
    Crypto,
    #[error("malformed vault container: {0}")]
    Malformed(String),
}
