use std::path::Path;
use std::sync::Mutex;

use rusqlite::{params, Connection, OptionalExtension};

use super::types::{
    AccountRecord, FetchLogRecord, FetchStatus, SessionRecord, SessionStatus, SessionTrigger,
    TransactionRecord,
};
use super::Store;

/// SQLite-backed store for accounts, sessions, fetch logs and transactions.
///
/// Uses a `Mutex<Connection>` for thread-safe interior mutability.
/// The database is created/migrated on `open()`.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) a sqlite database at the given path.
    pub fn open(path: &Path) -> Result<Self, String> {
        let conn = Connection::open(path).map_err(|e| format!("sqlite open: {e}"))?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.migrate()?;
        Ok(store)
    }

    /// Open an in-memory database (useful for tests).
    pub fn open_memory() -> Result<Self, String> {
        let conn = Connection::open_in_memory().map_err(|e| format!("sqlite open: {e}"))?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.migrate()?;
        Ok(store)
    }

    fn migrate(&self) -> Result<(), String> {
        let conn = self.conn.lock().map_err(|e| format!("lock: {e}"))?;

        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS accounts (
                account_id     TEXT PRIMARY KEY,
                name           TEXT NOT NULL,
                institution    TEXT NOT NULL,
                secret_ref     TEXT NOT NULL,
                enabled        INTEGER NOT NULL DEFAULT 1,
                balance_cents  INTEGER,
                account_number TEXT,
                created_at     INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS sessions (
                session_id    TEXT PRIMARY KEY,
                trigger_kind  TEXT NOT NULL,
                status        TEXT NOT NULL DEFAULT 'running',
                account_ids   TEXT NOT NULL,
                started_at    INTEGER NOT NULL,
                completed_at  INTEGER
            );

            CREATE TABLE IF NOT EXISTS fetch_logs (
                log_id        TEXT PRIMARY KEY,
                account_id    TEXT NOT NULL,
                session_id    TEXT,
                status        TEXT NOT NULL,
                error_kind    TEXT,
                error_message TEXT,
                records_seen  INTEGER NOT NULL DEFAULT 0,
                records_new   INTEGER NOT NULL DEFAULT 0,
                ingest_errors INTEGER NOT NULL DEFAULT 0,
                started_at    INTEGER NOT NULL,
                completed_at  INTEGER NOT NULL,
                duration_ms   INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS transactions (
                digest       TEXT PRIMARY KEY,
                account_id   TEXT NOT NULL,
                posted_at    TEXT NOT NULL,
                amount_cents INTEGER NOT NULL,
                description  TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_fetch_logs_session
                ON fetch_logs (session_id, started_at);
            CREATE INDEX IF NOT EXISTS idx_transactions_account
                ON transactions (account_id, posted_at);
            CREATE INDEX IF NOT EXISTS idx_sessions_started
                ON sessions (started_at DESC);
            ",
        )
        .map_err(|e| format!("migrate: {e}"))?;

        Ok(())
    }
}

impl Store for SqliteStore {
    fn upsert_account(&self, rec: &AccountRecord) -> Result<(), String> {
        let conn = self.conn.lock().map_err(|e| format!("lock: {e}"))?;
        conn.execute(
            "INSERT INTO accounts (account_id, name, institution, secret_ref, enabled,
                                   balance_cents, account_number, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(account_id) DO UPDATE SET
                name = excluded.name,
                institution = excluded.institution,
                secret_ref = excluded.secret_ref,
                enabled = excluded.enabled,
                balance_cents = excluded.balance_cents,
                account_number = excluded.account_number",
            params![
                rec.account_id,
                rec.name,
                rec.institution,
                rec.secret_ref,
                rec.enabled,
                rec.balance_cents,
                rec.account_number,
                rec.created_at as i64,
            ],
        )
        .map_err(|e| format!("upsert_account: {e}"))?;
        Ok(())
    }

    fn get_account(&self, account_id: &str) -> Result<Option<AccountRecord>, String> {
        let conn = self.conn.lock().map_err(|e| format!("lock: {e}"))?;
        conn.query_row(
            "SELECT account_id, name, institution, secret_ref, enabled,
                    balance_cents, account_number, created_at
             FROM accounts WHERE account_id = ?1",
            params![account_id],
            account_from_row,
        )
        .optional()
        .map_err(|e| format!("get_account: {e}"))
    }

    fn list_accounts(&self) -> Result<Vec<AccountRecord>, String> {
        let conn = self.conn.lock().map_err(|e| format!("lock: {e}"))?;
        let mut stmt = conn
            .prepare(
                "SELECT account_id, name, institution, secret_ref, enabled,
                        balance_cents, account_number, created_at
                 FROM accounts ORDER BY created_at, account_id",
            )
            .map_err(|e| format!("list_accounts prepare: {e}"))?;
        let rows = stmt
            .query_map([], account_from_row)
            .map_err(|e| format!("list_accounts query: {e}"))?;
        rows.collect::<Result<Vec<_>, _>>()
            .map_err(|e| format!("list_accounts collect: {e}"))
    }

    fn update_account_sync(
        &self,
        account_id: &str,
        balance_cents: Option<i64>,
        account_number: Option<&str>,
    ) -> Result<(), String> {
        let conn = self.conn.lock().map_err(|e| format!("lock: {e}"))?;
        conn.execute(
            "UPDATE accounts SET
                balance_cents = COALESCE(?1, balance_cents),
                account_number = COALESCE(?2, account_number)
             WHERE account_id = ?3",
            params![balance_cents, account_number, account_id],
        )
        .map_err(|e| format!("update_account_sync: {e}"))?;
        Ok(())
    }

    fn upsert_session(&self, rec: &SessionRecord) -> Result<(), String> {
        let conn = self.conn.lock().map_err(|e| format!("lock: {e}"))?;
        let account_ids = serde_json::to_string(&rec.account_ids)
            .map_err(|e| format!("serialize account_ids: {e}"))?;
        conn.execute(
            "INSERT INTO sessions (session_id, trigger_kind, status, account_ids,
                                   started_at, completed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(session_id) DO UPDATE SET
                status = excluded.status,
                completed_at = excluded.completed_at",
            params![
                rec.session_id,
                rec.trigger.as_str(),
                rec.status.as_str(),
                account_ids,
                rec.started_at as i64,
                rec.completed_at.map(|v| v as i64),
            ],
        )
        .map_err(|e| format!("upsert_session: {e}"))?;
        Ok(())
    }

    fn mark_stale_running_sessions(&self, completed_at: u64) -> Result<usize, String> {
        let conn = self.conn.lock().map_err(|e| format!("lock: {e}"))?;
        conn.execute(
            "UPDATE sessions SET status = 'error', completed_at = ?1
             WHERE status = 'running'",
            params![completed_at as i64],
        )
        .map_err(|e| format!("mark_stale_running_sessions: {e}"))
    }

    fn get_session(&self, session_id: &str) -> Result<Option<SessionRecord>, String> {
        let conn = self.conn.lock().map_err(|e| format!("lock: {e}"))?;
        conn.query_row(
            "SELECT session_id, trigger_kind, status, account_ids, started_at, completed_at
             FROM sessions WHERE session_id = ?1",
            params![session_id],
            session_from_row,
        )
        .optional()
        .map_err(|e| format!("get_session: {e}"))
    }

    fn list_finished_sessions(
        &self,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<SessionRecord>, String> {
        let conn = self.conn.lock().map_err(|e| format!("lock: {e}"))?;
        let mut stmt = conn
            .prepare(
                "SELECT session_id, trigger_kind, status, account_ids, started_at, completed_at
                 FROM sessions WHERE status != 'running'
                 ORDER BY started_at DESC
                 LIMIT ?1 OFFSET ?2",
            )
            .map_err(|e| format!("list_finished_sessions prepare: {e}"))?;
        let rows = stmt
            .query_map(params![limit as i64, offset as i64], session_from_row)
            .map_err(|e| format!("list_finished_sessions query: {e}"))?;
        rows.collect::<Result<Vec<_>, _>>()
            .map_err(|e| format!("list_finished_sessions collect: {e}"))
    }

    fn append_fetch_log(&self, rec: &FetchLogRecord) -> Result<(), String> {
        let conn = self.conn.lock().map_err(|e| format!("lock: {e}"))?;
        conn.execute(
            "INSERT INTO fetch_logs (log_id, account_id, session_id, status, error_kind,
                                     error_message, records_seen, records_new, ingest_errors,
                                     started_at, completed_at, duration_ms)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                rec.log_id,
                rec.account_id,
                rec.session_id,
                rec.status.as_str(),
                rec.error_kind,
                rec.error_message,
                rec.records_seen as i64,
                rec.records_new as i64,
                rec.ingest_errors as i64,
                rec.started_at as i64,
                rec.completed_at as i64,
                rec.duration_ms as i64,
            ],
        )
        .map_err(|e| format!("append_fetch_log: {e}"))?;
        Ok(())
    }

    fn list_fetch_logs(&self, session_id: &str) -> Result<Vec<FetchLogRecord>, String> {
        let conn = self.conn.lock().map_err(|e| format!("lock: {e}"))?;
        let mut stmt = conn
            .prepare(
                "SELECT log_id, account_id, session_id, status, error_kind, error_message,
                        records_seen, records_new, ingest_errors, started_at, completed_at,
                        duration_ms
                 FROM fetch_logs WHERE session_id = ?1
                 ORDER BY started_at, log_id",
            )
            .map_err(|e| format!("list_fetch_logs prepare: {e}"))?;
        let rows = stmt
            .query_map(params![session_id], fetch_log_from_row)
            .map_err(|e| format!("list_fetch_logs query: {e}"))?;
        rows.collect::<Result<Vec<_>, _>>()
            .map_err(|e| format!("list_fetch_logs collect: {e}"))
    }

    fn insert_transaction_if_absent(&self, rec: &TransactionRecord) -> Result<bool, String> {
        let conn = self.conn.lock().map_err(|e| format!("lock: {e}"))?;
        let changed = conn
            .execute(
                "INSERT OR IGNORE INTO transactions
                    (digest, account_id, posted_at, amount_cents, description)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    rec.digest,
                    rec.account_id,
                    rec.posted_at,
                    rec.amount_cents,
                    rec.description,
                ],
            )
            .map_err(|e| format!("insert_transaction_if_absent: {e}"))?;
        Ok(changed > 0)
    }

    fn list_transactions(&self, account_id: &str) -> Result<Vec<TransactionRecord>, String> {
        let conn = self.conn.lock().map_err(|e| format!("lock: {e}"))?;
        let mut stmt = conn
            .prepare(
                "SELECT digest, account_id, posted_at, amount_cents, description
                 FROM transactions WHERE account_id = ?1
                 ORDER BY posted_at, digest",
            )
            .map_err(|e| format!("list_transactions prepare: {e}"))?;
        let rows = stmt
            .query_map(params![account_id], |row| {
                Ok(TransactionRecord {
                    digest: row.get(0)?,
                    account_id: row.get(1)?,
                    posted_at: row.get(2)?,
                    amount_cents: row.get(3)?,
                    description: row.get(4)?,
                })
            })
            .map_err(|e| format!("list_transactions query: {e}"))?;
        rows.collect::<Result<Vec<_>, _>>()
            .map_err(|e| format!("list_transactions collect: {e}"))
    }
}

fn account_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<AccountRecord> {
    Ok(AccountRecord {
        account_id: row.get(0)?,
        name: row.get(1)?,
        institution: row.get(2)?,
        secret_ref: row.get(3)?,
        enabled: row.get(4)?,
        balance_cents: row.get(5)?,
        account_number: row.get(6)?,
        created_at: row.get::<_, i64>(7)? as u64,
    })
}

fn session_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<SessionRecord> {
    let account_ids: String = row.get(3)?;
    Ok(SessionRecord {
        session_id: row.get(0)?,
        trigger: SessionTrigger::from_label(&row.get::<_, String>(1)?),
        status: SessionStatus::from_label(&row.get::<_, String>(2)?),
        account_ids: serde_json::from_str(&account_ids).unwrap_or_default(),
        started_at: row.get::<_, i64>(4)? as u64,
        completed_at: row.get::<_, Option<i64>>(5)?.map(|v| v as u64),
    })
}

fn fetch_log_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<FetchLogRecord> {
    Ok(FetchLogRecord {
        log_id: row.get(0)?,
        account_id: row.get(1)?,
        session_id: row.get(2)?,
        status: FetchStatus::from_label(&row.get::<_, String>(3)?),
        error_kind: row.get(4)?,
        error_message: row.get(5)?,
        records_seen: row.get::<_, i64>(6)? as u64,
        records_new: row.get::<_, i64>(7)? as u64,
        ingest_errors: row.get::<_, i64>(8)? as u64,
        started_at: row.get::<_, i64>(9)? as u64,
        completed_at: row.get::<_, i64>(10)? as u64,
        duration_ms: row.get::<_, i64>(11)? as u64,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account(id: &str, secret_ref: &str, enabled: bool) -> AccountRecord {
        AccountRecord {
            account_id: id.into(),
            name: format!("{id} checking"),
            institution: "first-national".into(),
            secret_ref: secret_ref.into(),
            enabled,
            balance_cents: None,
            account_number: None,
            created_at: 1_700_000_000,
        }
    }

    #[test]
    fn account_roundtrip_and_sync_update() {
        let store = SqliteStore::open_memory().unwrap();
        store.upsert_account(&account("acct-1", "ref-1", true)).unwrap();

        store
            .update_account_sync("acct-1", Some(12_345), Some("****9876"))
            .unwrap();
        let got = store.get_account("acct-1").unwrap().unwrap();
        assert_eq!(got.balance_cents, Some(12_345));
        assert_eq!(got.account_number.as_deref(), Some("****9876"));

        // COALESCE keeps existing values when a fetch reports nothing new.
        store.update_account_sync("acct-1", None, None).unwrap();
        let got = store.get_account("acct-1").unwrap().unwrap();
        assert_eq!(got.balance_cents, Some(12_345));
    }

    #[test]
    fn session_roundtrip_and_terminal_listing() {
        let store = SqliteStore::open_memory().unwrap();
        let mut rec = SessionRecord {
            session_id: "sess-1".into(),
            trigger: SessionTrigger::Manual,
            status: SessionStatus::Running,
            account_ids: vec!["acct-1".into(), "acct-2".into()],
            started_at: 1_700_000_000,
            completed_at: None,
        };
        store.upsert_session(&rec).unwrap();

        // A running session is not part of the finished listing.
        assert!(store.list_finished_sessions(10, 0).unwrap().is_empty());

        rec.status = SessionStatus::Completed;
        rec.completed_at = Some(1_700_000_060);
        store.upsert_session(&rec).unwrap();

        let got = store.get_session("sess-1").unwrap().unwrap();
        assert_eq!(got, rec);
        assert_eq!(store.list_finished_sessions(10, 0).unwrap().len(), 1);
        assert!(store.list_finished_sessions(10, 1).unwrap().is_empty());
    }

    #[test]
    fn stale_running_sessions_are_closed_as_errors() {
        let store = SqliteStore::open_memory().unwrap();
        store
            .upsert_session(&SessionRecord {
                session_id: "sess-stale".into(),
                trigger: SessionTrigger::Scheduled,
                status: SessionStatus::Running,
                account_ids: vec!["acct-1".into()],
                started_at: 1_700_000_000,
                completed_at: None,
            })
            .unwrap();
        store
            .upsert_session(&SessionRecord {
                session_id: "sess-done".into(),
                trigger: SessionTrigger::Manual,
                status: SessionStatus::Completed,
                account_ids: vec![],
                started_at: 1_700_000_100,
                completed_at: Some(1_700_000_200),
            })
            .unwrap();

        assert_eq!(store.mark_stale_running_sessions(1_700_000_300).unwrap(), 1);
        let stale = store.get_session("sess-stale").unwrap().unwrap();
        assert_eq!(stale.status, SessionStatus::Error);
        assert_eq!(stale.completed_at, Some(1_700_000_300));
        let done = store.get_session("sess-done").unwrap().unwrap();
        assert_eq!(done.status, SessionStatus::Completed);
    }

    #[test]
    fn fetch_logs_are_scoped_to_session() {
        let store = SqliteStore::open_memory().unwrap();
        let log = FetchLogRecord {
            log_id: "log-1".into(),
            account_id: "acct-1".into(),
            session_id: Some("sess-1".into()),
            status: FetchStatus::Ok,
            error_kind: None,
            error_message: None,
            records_seen: 10,
            records_new: 3,
            ingest_errors: 0,
            started_at: 1_700_000_000,
            completed_at: 1_700_000_030,
            duration_ms: 30_000,
        };
        store.append_fetch_log(&log).unwrap();
        store
            .append_fetch_log(&FetchLogRecord {
                log_id: "log-2".into(),
                session_id: Some("sess-2".into()),
                ..log.clone()
            })
            .unwrap();

        let logs = store.list_fetch_logs("sess-1").unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0], log);
    }

    #[test]
    fn duplicate_digest_insert_is_ignored() {
        let store = SqliteStore::open_memory().unwrap();
        let rec = TransactionRecord {
            account_id: "acct-1".into(),
            posted_at: "2026-08-01".into(),
            amount_cents: -4_599,
            description: "COFFEE SHOP".into(),
            digest: "abc123".into(),
        };
        assert!(store.insert_transaction_if_absent(&rec).unwrap());
        assert!(!store.insert_transaction_if_absent(&rec).unwrap());
        assert_eq!(store.list_transactions("acct-1").unwrap().len(), 1);
    }
}
