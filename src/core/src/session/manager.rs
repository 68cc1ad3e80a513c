use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Instant, SystemTime};

use serde_json::json;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::{FetchError, SessionError};
use crate::events::{topics, EventBus};
use crate::ingest::{ingest_records, IngestCounts};
use crate::interaction::InteractionHub;
use crate::provider::{FetchContext, FetchProvider, FetchRequest};
use crate::storage::{
    FetchLogRecord, FetchStatus, SessionRecord, SessionStatus, SessionTrigger, Store,
};
use crate::vault::SecretVault;

struct ActiveSession {
    record: SessionRecord,
    cancel: CancellationToken,
}

/// Orchestrates scrape sessions: at most one running batch process-wide,
/// accounts fetched sequentially within it.
///
/// The active registry entry is removed the instant a session reaches a
/// terminal state. Explicit cancel and natural finalization can race for
/// that removal; whoever removes the entry first owns finalization and the
/// loser does nothing.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<ManagerInner>,
}

struct ManagerInner {
    store: Arc<dyn Store>,
    vault: Arc<SecretVault>,
    provider: Arc<dyn FetchProvider>,
    interact: InteractionHub,
    events: EventBus,
    active: Mutex<HashMap<String, ActiveSession>>,
}

impl SessionManager {
    pub fn new(
        store: Arc<dyn Store>,
        vault: Arc<SecretVault>,
        provider: Arc<dyn FetchProvider>,
        interact: InteractionHub,
        events: EventBus,
    ) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                store,
                vault,
                provider,
                interact,
                events,
                active: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Create and launch a session. Returns the persisted record immediately;
    /// the fetch loop runs on a spawned task.
    ///
    /// `account_ids: None` targets every enabled account, collapsed to one
    /// representative per `secret_ref` so a shared login is not hammered
    /// twice in one batch. An explicit list is validated against the account
    /// table and used verbatim, in the given order.
    pub fn start_session(
        &self,
        trigger: SessionTrigger,
        account_ids: Option<Vec<String>>,
    ) -> Result<SessionRecord, SessionError> {
        // Held across target resolution (sync store calls only) so two
        // concurrent starts cannot both pass the single-flight check.
        let mut active = lock_active(&self.inner.active);
        if !active.is_empty() {
            return Err(SessionError::AlreadyRunning);
        }

        let targets = self.resolve_targets(account_ids)?;
        let record = SessionRecord {
            session_id: Uuid::new_v4().to_string(),
            trigger,
            status: SessionStatus::Running,
            account_ids: targets,
            started_at: now_unix(),
            completed_at: None,
        };
        self.inner
            .store
            .upsert_session(&record)
            .map_err(SessionError::Storage)?;

        let cancel = CancellationToken::new();
        active.insert(
            record.session_id.clone(),
            ActiveSession {
                record: record.clone(),
                cancel: cancel.clone(),
            },
        );
        drop(active);

        tracing::info!(
            session_id = %record.session_id,
            trigger = trigger.as_str(),
            accounts = record.account_ids.len(),
            "session started"
        );
        self.inner.events.publish(
            topics::SESSION_STARTED,
            json!({
                "session_id": record.session_id,
                "trigger": trigger.as_str(),
                "account_ids": record.account_ids,
            }),
        );

        let inner = self.inner.clone();
        let task_record = record.clone();
        tokio::spawn(async move {
            run_session(inner, task_record, cancel).await;
        });

        Ok(record)
    }

    fn resolve_targets(
        &self,
        account_ids: Option<Vec<String>>,
    ) -> Result<Vec<String>, SessionError> {
        match account_ids {
            Some(ids) => {
                let mut seen = HashSet::new();
                let mut out = Vec::new();
                for id in ids {
                    if !seen.insert(id.clone()) {
                        continue;
                    }
                    let known = self
                        .inner
                        .store
                        .get_account(&id)
                        .map_err(SessionError::Storage)?
                        .is_some();
                    if !known {
                        return Err(SessionError::NotFound(id));
                    }
                    out.push(id);
                }
                Ok(out)
            }
            None => {
                let mut seen_refs = HashSet::new();
                Ok(self
                    .inner
                    .store
                    .list_accounts()
                    .map_err(SessionError::Storage)?
                    .into_iter()
                    .filter(|a| a.enabled)
                    .filter(|a| seen_refs.insert(a.secret_ref.clone()))
                    .map(|a| a.account_id)
                    .collect())
            }
        }
    }

    /// Stop an active session. Returns false when the id is not active
    /// (unknown, already finished, or already cancelled).
    ///
    /// Accounts not yet started are skipped; the in-flight fetch is asked to
    /// stop via its token, and any OTP/manual waits for the session's
    /// accounts fail with `Cancelled`.
    pub fn cancel_session(&self, session_id: &str) -> bool {
        let entry = lock_active(&self.inner.active).remove(session_id);
        let Some(entry) = entry else {
            return false;
        };

        entry.cancel.cancel();
        for account_id in &entry.record.account_ids {
            self.inner.interact.cancel_all_for(account_id);
        }

        let mut record = entry.record;
        record.status = SessionStatus::Cancelled;
        record.completed_at = Some(now_unix());
        if let Err(err) = self.inner.store.upsert_session(&record) {
            tracing::warn!(session_id, error = %err, "failed to persist cancelled session");
        }

        tracing::info!(session_id, "session cancelled");
        self.inner.events.publish(
            topics::SESSION_COMPLETED,
            json!({ "session_id": session_id, "status": SessionStatus::Cancelled.as_str() }),
        );
        true
    }

    pub fn has_active_session(&self) -> bool {
        !lock_active(&self.inner.active).is_empty()
    }

    pub fn list_active_sessions(&self) -> Vec<SessionRecord> {
        lock_active(&self.inner.active)
            .values()
            .map(|a| a.record.clone())
            .collect()
    }
}

async fn run_session(inner: Arc<ManagerInner>, record: SessionRecord, cancel: CancellationToken) {
    let session_id = record.session_id.clone();
    let mut any_error = false;

    for account_id in &record.account_ids {
        if cancel.is_cancelled() {
            break;
        }
        inner.events.publish(
            topics::ACCOUNT_STARTED,
            json!({ "session_id": session_id, "account_id": account_id }),
        );

        match fetch_account(&inner, &session_id, account_id, &cancel).await {
            Ok(counts) => {
                inner.events.publish(
                    topics::ACCOUNT_DONE,
                    json!({
                        "session_id": session_id,
                        "account_id": account_id,
                        "records_seen": counts.seen,
                        "records_new": counts.new,
                    }),
                );
            }
            Err(err) => {
                any_error = true;
                tracing::warn!(
                    session_id = %session_id,
                    account_id,
                    kind = err.kind_label(),
                    error = %err,
                    "account fetch failed"
                );
                inner.events.publish(
                    topics::ACCOUNT_ERROR,
                    json!({
                        "session_id": session_id,
                        "account_id": account_id,
                        "kind": err.kind_label(),
                        "message": err.to_string(),
                    }),
                );
            }
        }
    }

    finalize_session(&inner, &session_id, &cancel, any_error);
}

/// One account attempt: credentials, provider fetch, ingestion, account
/// sync, fetch log. Always appends exactly one log row for the attempt.
async fn fetch_account(
    inner: &Arc<ManagerInner>,
    session_id: &str,
    account_id: &str,
    cancel: &CancellationToken,
) -> Result<IngestCounts, FetchError> {
    let started_at = now_unix();
    let clock = Instant::now();

    let outcome = fetch_once(inner, account_id, cancel).await;

    let (status, error_kind, error_message, counts) = match &outcome {
        Ok(counts) => (FetchStatus::Ok, None, None, *counts),
        Err(err) => (
            FetchStatus::Error,
            Some(err.kind_label().to_string()),
            Some(err.to_string()),
            IngestCounts::default(),
        ),
    };
    let log = FetchLogRecord {
        log_id: Uuid::new_v4().to_string(),
        account_id: account_id.to_string(),
        session_id: Some(session_id.to_string()),
        status,
        error_kind,
        error_message,
        records_seen: counts.seen,
        records_new: counts.new,
        ingest_errors: counts.errors,
        started_at,
        completed_at: now_unix(),
        duration_ms: clock.elapsed().as_millis() as u64,
    };
    if let Err(err) = inner.store.append_fetch_log(&log) {
        tracing::warn!(account_id, error = %err, "failed to append fetch log");
    }

    outcome
}

async fn fetch_once(
    inner: &Arc<ManagerInner>,
    account_id: &str,
    cancel: &CancellationToken,
) -> Result<IngestCounts, FetchError> {
    let account = inner
        .store
        .get_account(account_id)
        .map_err(FetchError::StoreUnavailable)?
        .ok_or_else(|| FetchError::StoreUnavailable(format!("account {account_id} missing")))?;

    let secrets = inner
        .vault
        .get(&account.secret_ref)
        .map_err(|e| FetchError::StoreUnavailable(e.to_string()))?
        .ok_or_else(|| FetchError::MissingCredentials(account.secret_ref.clone()))?;

    let ctx = FetchContext {
        cancel: cancel.clone(),
        interact: inner.interact.clone(),
    };
    let output = inner
        .provider
        .fetch(FetchRequest { account, secrets }, ctx)
        .await?;

    let counts = ingest_records(inner.store.as_ref(), account_id, &output.records);
    if output.balance_cents.is_some() || output.account_number.is_some() {
        if let Err(err) = inner.store.update_account_sync(
            account_id,
            output.balance_cents,
            output.account_number.as_deref(),
        ) {
            tracing::warn!(account_id, error = %err, "failed to sync account fields");
        }
    }
    Ok(counts)
}

fn finalize_session(
    inner: &Arc<ManagerInner>,
    session_id: &str,
    cancel: &CancellationToken,
    any_error: bool,
) {
    // An explicit cancel that got here first already persisted and announced
    // the terminal state.
    let Some(entry) = lock_active(&inner.active).remove(session_id) else {
        return;
    };

    let status = if cancel.is_cancelled() {
        SessionStatus::Cancelled
    } else if any_error {
        SessionStatus::Error
    } else {
        SessionStatus::Completed
    };

    let mut record = entry.record;
    record.status = status;
    record.completed_at = Some(now_unix());
    if let Err(err) = inner.store.upsert_session(&record) {
        tracing::warn!(session_id, error = %err, "failed to persist finished session");
    }

    tracing::info!(session_id, status = status.as_str(), "session finished");
    inner.events.publish(
        topics::SESSION_COMPLETED,
        json!({ "session_id": session_id, "status": status.as_str() }),
    );
}

fn lock_active<'a>(
    active: &'a Mutex<HashMap<String, ActiveSession>>,
) -> MutexGuard<'a, HashMap<String, ActiveSession>> {
    active.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
