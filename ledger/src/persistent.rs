use crate::{
    balance::{BalanceCell, Field, Ledger},
    cancel::CancelSignal,
    events::EventBus,
    profile::Profile,
    remote::{Remote, RemoteError},
    storage::StorageError,
};
use bonkarena_client::{retry, RetryPolicy};
use bonkarena_types::{AuthToken, Cents, LedgerKind, PushMode};
use serde::Serialize;
use std::{future::Future, sync::Arc};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// What a sync should reconcile against the server.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SyncRequest {
    /// Portion of the local balance the server has not seen yet.
    pub local_balance: Cents,
    /// Amount just moved into the ledger and not yet pushed.
    pub local_delta: Cents,
    /// Fetch the server total and build on it instead of pushing local values alone.
    pub add_to_existing: bool,
}

impl SyncRequest {
    /// Reconcile a freshly transferred `delta` on top of the server total.
    pub fn merge_delta(delta: Cents) -> Self {
        Self {
            local_balance: Cents::ZERO,
            local_delta: delta,
            add_to_existing: true,
        }
    }

    /// Push `balance` as the new absolute total.
    pub fn publish(balance: Cents) -> Self {
        Self {
            local_balance: balance,
            local_delta: Cents::ZERO,
            add_to_existing: false,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SyncOutcome {
    /// Absolute total accepted by the server. `applied` is false when the
    /// sequence was cancelled before the local cache could be updated.
    Synced {
        total: Cents,
        receipt: Uuid,
        applied: bool,
    },
    /// The server total could not be fetched, so only the delta was added.
    Degraded { delta: Cents, receipt: Uuid },
    /// The server was unreachable; the local cache stands until the next sync.
    Provisional { local: Cents, reason: String },
    /// Cancelled before anything was pushed.
    Skipped,
}

impl SyncOutcome {
    pub fn is_synced(&self) -> bool {
        matches!(self, SyncOutcome::Synced { .. })
    }
}

/// Persisted BONK balance and local cache of the server's token total.
pub struct PersistentLedger {
    cell: BalanceCell,
}

impl PersistentLedger {
    /// Load the balance from `profile`, defaulting to zero.
    pub fn load(profile: Arc<Profile>, events: EventBus) -> Self {
        Self {
            cell: BalanceCell::durable(LedgerKind::Global, profile, Field::TokenTotal, events),
        }
    }

    /// Balance currently on durable storage.
    pub fn persisted(&self) -> Result<Cents, StorageError> {
        Ok(self.cell.persisted()?.unwrap_or_default())
    }

    /// Reconcile with the server's token total.
    ///
    /// Prefers fetch-then-replace, which cannot double count. Falls back to
    /// an additive push of the delta when the fetch fails, and to keeping the
    /// local value when the push fails. Never returns an error: the outcome
    /// says what happened.
    pub async fn sync_with_server<R: Remote>(
        &self,
        remote: &R,
        policy: &RetryPolicy,
        auth: &AuthToken,
        request: SyncRequest,
        cancel: &CancelSignal,
    ) -> SyncOutcome {
        if cancel.is_cancelled() {
            debug!("sync cancelled before start");
            return SyncOutcome::Skipped;
        }

        let mut existing = Cents::ZERO;
        if request.add_to_existing {
            let fetched = retry(policy, true, RemoteError::is_retryable, move || {
                unless_cancelled(cancel, remote.fetch_user_totals(auth))
            })
            .await;
            match fetched {
                Ok(totals) => existing = totals.global_token_total,
                Err(RemoteError::Cancelled) => {
                    debug!("sync cancelled while fetching server total");
                    return SyncOutcome::Skipped;
                }
                Err(err) => {
                    return self
                        .push_delta(remote, policy, auth, request, err, cancel)
                        .await
                }
            }
        }

        let Some(combined) = existing
            .checked_add(request.local_balance)
            .and_then(|total| total.checked_add(request.local_delta))
        else {
            error!(%existing, ?request, "combined token total overflows");
            return SyncOutcome::Provisional {
                local: self.get(),
                reason: "combined total overflows".to_string(),
            };
        };

        let pushed = retry(policy, true, RemoteError::is_retryable, move || {
            unless_cancelled(cancel, remote.push_token_total(auth, combined, PushMode::Replace))
        })
        .await;
        match pushed {
            Ok(receipt) => {
                // A cancelled sequence has stopped listening and must not see
                // its ledgers move underneath it
                let applied = !cancel.is_cancelled();
                if applied {
                    if let Err(err) = self.replace(receipt.total) {
                        error!(%err, total = %receipt.total, "failed to cache synced total");
                    }
                }
                info!(%existing, total = %receipt.total, receipt = %receipt.receipt, applied, "synced token total");
                SyncOutcome::Synced {
                    total: receipt.total,
                    receipt: receipt.receipt,
                    applied,
                }
            }
            Err(RemoteError::Cancelled) => {
                debug!(%combined, "sync cancelled before pushing");
                SyncOutcome::Skipped
            }
            Err(err) => {
                let local = self.get();
                warn!(%err, %local, "token push failed, keeping local total as provisional");
                SyncOutcome::Provisional {
                    local,
                    reason: err.to_string(),
                }
            }
        }
    }

    async fn push_delta<R: Remote>(
        &self,
        remote: &R,
        policy: &RetryPolicy,
        auth: &AuthToken,
        request: SyncRequest,
        fetch_error: RemoteError,
        cancel: &CancelSignal,
    ) -> SyncOutcome {
        let local = self.get();
        let Some(delta) = request.local_balance.checked_add(request.local_delta) else {
            return SyncOutcome::Provisional {
                local,
                reason: fetch_error.to_string(),
            };
        };
        if delta.is_zero() || !fetch_error.is_retryable() {
            warn!(%fetch_error, %local, "could not fetch server total, keeping local total");
            return SyncOutcome::Provisional {
                local,
                reason: fetch_error.to_string(),
            };
        }

        warn!(%fetch_error, %delta, "could not fetch server total, falling back to additive push");
        let pushed = retry(policy, false, RemoteError::is_retryable, move || {
            unless_cancelled(cancel, remote.push_token_total(auth, delta, PushMode::Add))
        })
        .await;
        match pushed {
            Ok(receipt) => SyncOutcome::Degraded {
                delta,
                receipt: receipt.receipt,
            },
            Err(RemoteError::Cancelled) => {
                debug!(%delta, "sync cancelled before additive push");
                SyncOutcome::Skipped
            }
            Err(err) => {
                warn!(%err, %local, "additive push failed, keeping local total as provisional");
                SyncOutcome::Provisional {
                    local,
                    reason: err.to_string(),
                }
            }
        }
    }
}

/// Send `request` only if `cancel` has not fired. Checked before every
/// attempt, so a cancel during a backoff stops the retries.
async fn unless_cancelled<T>(
    cancel: &CancelSignal,
    request: impl Future<Output = Result<T, RemoteError>>,
) -> Result<T, RemoteError> {
    if cancel.is_cancelled() {
        return Err(RemoteError::Cancelled);
    }
    request.await
}

impl Ledger for PersistentLedger {
    fn cell(&self) -> &BalanceCell {
        &self.cell
    }
}
