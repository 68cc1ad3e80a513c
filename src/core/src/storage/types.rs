use serde::{Deserialize, Serialize};

/// What started a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionTrigger {
    /// Operator clicked "sync now".
    Manual,
    /// An external scheduler invoked `session.start`.
    Scheduled,
    /// One-off fetch of a single account.
    Single,
}

impl SessionTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Scheduled => "scheduled",
            Self::Single => "single",
        }
    }

    pub fn from_label(label: &str) -> Self {
        match label {
            "scheduled" => Self::Scheduled,
            "single" => Self::Single,
            _ => Self::Manual,
        }
    }
}

/// Session lifecycle state. `Running` is the only non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Running,
    Completed,
    Cancelled,
    Error,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Error => "error",
        }
    }

    pub fn from_label(label: &str) -> Self {
        match label {
            "completed" => Self::Completed,
            "cancelled" => Self::Cancelled,
            "error" => Self::Error,
            _ => Self::Running,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }
}

/// Outcome of one account fetch attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FetchStatus {
    Ok,
    Error,
}

impl FetchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Error => "error",
        }
    }

    pub fn from_label(label: &str) -> Self {
        match label {
            "ok" => Self::Ok,
            _ => Self::Error,
        }
    }
}

/// One orchestrated batch of account fetches. Rows are an audit trail and
/// are never deleted; terminal rows are never mutated again.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub session_id: String,
    pub trigger: SessionTrigger,
    pub status: SessionStatus,
    /// Resolved targets, fixed at creation, in fetch order.
    pub account_ids: Vec<String>,
    pub started_at: u64,
    pub completed_at: Option<u64>,
}

/// One fetch attempt for one account, written when the attempt finishes and
/// immutable afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchLogRecord {
    pub log_id: String,
    pub account_id: String,
    /// Absent for attempts made outside a session.
    pub session_id: Option<String>,
    pub status: FetchStatus,
    pub error_kind: Option<String>,
    pub error_message: Option<String>,
    pub records_seen: u64,
    pub records_new: u64,
    pub ingest_errors: u64,
    pub started_at: u64,
    pub completed_at: u64,
    pub duration_ms: u64,
}

/// A linked institution account. `secret_ref` points into the vault; the
/// plaintext bundle never appears outside it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountRecord {
    pub account_id: String,
    pub name: String,
    pub institution: String,
    pub secret_ref: String,
    pub enabled: bool,
    pub balance_cents: Option<i64>,
    pub account_number: Option<String>,
    pub created_at: u64,
}

/// A stored transaction, unique by content digest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub account_id: String,
    /// ISO date (YYYY-MM-DD).
    pub posted_at: String,
    pub amount_cents: i64,
    pub description: String,
    pub digest: String,
}
