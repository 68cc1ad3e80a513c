use std::future::Future;
use std::pin::Pin;

use tokio_util::sync::CancellationToken;

use crate::error::FetchError;
use crate::interaction::InteractionHub;
use crate::storage::AccountRecord;
use crate::vault::SecretBundle;

/// One raw transaction as extracted from an institution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedRecord {
    pub posted_at: String,
    pub amount_cents: i64,
    pub description: String,
}

/// Everything the provider needs to fetch one account.
pub struct FetchRequest {
    pub account: AccountRecord,
    pub secrets: SecretBundle,
}

/// Capabilities handed into the provider for the duration of one fetch:
/// the cooperative cancellation token and the human-input hub. Providers
/// are expected to check the token during their own long internal waits.
#[derive(Clone)]
pub struct FetchContext {
    pub cancel: CancellationToken,
    pub interact: InteractionHub,
}

/// What a successful fetch hands back for ingestion.
#[derive(Debug, Clone, Default)]
pub struct FetchOutput {
    pub records: Vec<FetchedRecord>,
    /// Current balance as reported by the institution, if visible.
    pub balance_cents: Option<i64>,
    /// Institution-side account number, if it changed or was learned.
    pub account_number: Option<String>,
}

/// External collaborator performing the actual extraction for one account.
///
/// The orchestrator never looks inside a fetch: it passes credentials and
/// context in, and records whatever comes out. Implementations live outside
/// this crate (browser automation, OFX, institution APIs).
pub trait FetchProvider: Send + Sync {
    fn fetch(
        &self,
        request: FetchRequest,
        ctx: FetchContext,
    ) -> Pin<Box<dyn Future<Output = Result<FetchOutput, FetchError>> + Send + '_>>;
}

/// Default provider wired in when no real extractor is configured; fails
/// every fetch with a provider-classified error so the surrounding session
/// machinery still runs end to end.
pub struct UnconfiguredProvider;

impl FetchProvider for UnconfiguredProvider {
    fn fetch(
        &self,
        request: FetchRequest,
        _ctx: FetchContext,
    ) -> Pin<Box<dyn Future<Output = Result<FetchOutput, FetchError>> + Send + '_>> {
        let institution = request.account.institution;
        Box::pin(async move {
            Err(FetchError::provider(
                "unconfigured",
                format!("no fetch provider configured for {institution}"),
            ))
        })
    }
}
