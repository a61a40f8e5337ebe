use crate::{
    balance::Ledger,
    cancel::CancelSignal,
    persistent::{SyncOutcome, SyncRequest},
    remote::{Remote, RemoteError},
    session::TransferRecord,
    LedgerError, Ledgers,
};
use bonkarena_client::{retry, RetryPolicy};
use bonkarena_types::{AuthToken, PushReceipt, UserTotals};
use std::sync::Arc;
use tracing::{info, warn};

/// Moves session BONK into the account balance and keeps that balance in
/// step with the server.
pub struct ReconciliationService<R: Remote> {
    ledgers: Ledgers,
    remote: Arc<R>,
    policy: RetryPolicy,
}

impl<R: Remote> Clone for ReconciliationService<R> {
    fn clone(&self) -> Self {
        Self {
            ledgers: self.ledgers.clone(),
            remote: self.remote.clone(),
            policy: self.policy,
        }
    }
}

impl<R: Remote> ReconciliationService<R> {
    pub fn new(ledgers: Ledgers, remote: Arc<R>, policy: RetryPolicy) -> Self {
        Self {
            ledgers,
            remote,
            policy,
        }
    }

    /// Move the whole arena balance into the global balance.
    pub fn transfer(&self) -> Result<TransferRecord, LedgerError> {
        self.ledgers
            .arena
            .transfer_all_to(self.ledgers.global.as_ref())
    }

    pub async fn sync_global(
        &self,
        auth: &AuthToken,
        request: SyncRequest,
        cancel: &CancelSignal,
    ) -> SyncOutcome {
        self.ledgers
            .global
            .sync_with_server(self.remote.as_ref(), &self.policy, auth, request, cancel)
            .await
    }

    /// Adopt the server's totals as the local cache.
    ///
    /// On failure the cache is kept as is and the error is returned.
    pub async fn refresh(&self, auth: &AuthToken) -> Result<UserTotals, RemoteError> {
        let remote = self.remote.as_ref();
        let totals = retry(&self.policy, true, RemoteError::is_retryable, move || {
            remote.fetch_user_totals(auth)
        })
        .await
        .inspect_err(|err| warn!(%err, "could not refresh totals, keeping cached balances"))?;

        let global: &dyn Ledger = self.ledgers.global.as_ref();
        let credits: &dyn Ledger = self.ledgers.credits.as_ref();
        for (ledger, total) in [
            (global, totals.global_token_total),
            (credits, totals.credits_total),
        ] {
            if let Err(err) = ledger.replace(total) {
                warn!(ledger = %ledger.kind(), %err, "could not cache server total");
            }
        }
        info!(
            global = %totals.global_token_total,
            credits = %totals.credits_total,
            "refreshed totals from server"
        );
        Ok(totals)
    }

    /// Publish the local credits balance as the server's credits total.
    pub async fn push_credits(&self, auth: &AuthToken) -> Result<PushReceipt, RemoteError> {
        let remote = self.remote.as_ref();
        let total = self.ledgers.credits.get();
        retry(&self.policy, true, RemoteError::is_retryable, move || {
            remote.push_credits_total(auth, total)
        })
        .await
    }
}
