mod sqlite;
mod types;

pub use sqlite::SqliteStore;
pub use types::{
    AccountRecord, FetchLogRecord, FetchStatus, SessionRecord, SessionStatus, SessionTrigger,
    TransactionRecord,
};

/// Persistence boundary for accounts, sessions, fetch logs and transactions.
///
/// Implementations must be safe to share across tasks; `SqliteStore` wraps a
/// single connection in a mutex.
pub trait Store: Send + Sync {
    fn upsert_account(&self, rec: &AccountRecord) -> Result<(), String>;
    fn get_account(&self, account_id: &str) -> Result<Option<AccountRecord>, String>;
    fn list_accounts(&self) -> Result<Vec<AccountRecord>, String>;
    /// Apply balance / account-number updates reported by a fetch.
    fn update_account_sync(
        &self,
        account_id: &str,
        balance_cents: Option<i64>,
        account_number: Option<&str>,
    ) -> Result<(), String>;

    fn upsert_session(&self, rec: &SessionRecord) -> Result<(), String>;
    /// Close out sessions left `running` by a previous process, e.g. after a
    /// crash. Returns how many rows were updated.
    fn mark_stale_running_sessions(&self, completed_at: u64) -> Result<usize, String>;
    fn get_session(&self, session_id: &str) -> Result<Option<SessionRecord>, String>;
    /// Sessions that have reached a terminal state, newest first.
    fn list_finished_sessions(
        &self,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<SessionRecord>, String>;

    fn append_fetch_log(&self, rec: &FetchLogRecord) -> Result<(), String>;
    fn list_fetch_logs(&self, session_id: &str) -> Result<Vec<FetchLogRecord>, String>;

    /// Insert a transaction unless one with the same digest already exists.
    /// Returns whether a new row was created (the row-count signal).
    fn insert_transaction_if_absent(&self, rec: &TransactionRecord) -> Result<bool, String>;
    fn list_transactions(&self, account_id: &str) -> Result<Vec<TransactionRecord>, String>;
}
