use chrono::NaiveDate;

use crate::provider::FetchedRecord;
use crate::storage::{Store, TransactionRecord};

/// Aggregated result of persisting one fetch's records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestCounts {
    /// Records the provider returned.
    pub seen: u64,
    /// Records newly persisted (digest not seen before).
    pub new: u64,
    /// Records dropped because the store rejected them.
    pub errors: u64,
}

/// Stable fingerprint of a record's identity fields.
///
/// Two fetches of overlapping date ranges produce identical digests for the
/// same underlying transaction, which is what makes re-fetching idempotent.
/// Fields are separated by a 0x1f byte so adjacent values cannot collide.
pub fn record_digest(
    account_id: &str,
    posted_at: &str,
    amount_cents: i64,
    description: &str,
) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(account_id.as_bytes());
    hasher.update(&[0x1f]);
    hasher.update(posted_at.as_bytes());
    hasher.update(&[0x1f]);
    hasher.update(amount_cents.to_le_bytes().as_slice());
    hasher.update(&[0x1f]);
    hasher.update(description.as_bytes());
    hasher.finalize().to_hex().to_string()
}

/// Normalize a provider-supplied date to ISO (YYYY-MM-DD) so the digest is
/// stable across providers that format dates differently. Unparseable input
/// passes through untouched.
pub fn normalize_date(raw: &str) -> String {
    let raw = raw.trim();
    for fmt in ["%Y-%m-%d", "%m/%d/%Y", "%d.%m.%Y"] {
        if let Ok(date) = NaiveDate::parse_from_str(raw, fmt) {
            return date.format("%Y-%m-%d").to_string();
        }
    }
    raw.to_string()
}

/// Persist fetched records, deduplicated by content digest.
///
/// A digest collision with an existing row is a silent no-op, counted as
/// seen-but-not-new. Store errors are counted and logged, never fatal.
pub fn ingest_records(
    store: &dyn Store,
    account_id: &str,
    records: &[FetchedRecord],
) -> IngestCounts {
    let mut counts = IngestCounts::default();
    for record in records {
        counts.seen += 1;
        let posted_at = normalize_date(&record.posted_at);
        let digest = record_digest(account_id, &posted_at, record.amount_cents, &record.description);
        let row = TransactionRecord {
            account_id: account_id.to_string(),
            posted_at,
            amount_cents: record.amount_cents,
            description: record.description.clone(),
            digest,
        };
        match store.insert_transaction_if_absent(&row) {
            Ok(true) => counts.new += 1,
            Ok(false) => {}
            Err(err) => {
                counts.errors += 1;
                tracing::warn!(account_id, error = %err, "transaction insert failed");
            }
        }
    }
    counts
}
