//! Exclusive, verified withdrawal of the session balance.

use crate::{
    balance::Ledger,
    cancel::CancelSignal,
    credits::settle,
    events::EventBus,
    invariant::{InvariantChecker, Report},
    persistent::{SyncOutcome, SyncRequest},
    reconcile::ReconciliationService,
    remote::Remote,
    session::TransferRecord,
    Error, Ledgers,
};
use bonkarena_types::{AuthToken, Cents, LedgerKind, Payout};
use serde::Serialize;
#[cfg(test)]
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, error, info, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WithdrawalState {
    Idle,
    Locked,
    Committed,
    Syncing,
    Verified,
    RolledBack,
    Cancelled,
}

/// Result of a withdrawal request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Withdrawal {
    /// Another withdrawal holds the lock. Nothing was touched.
    Busy,
    /// The transfer was rejected. Nothing moved.
    Failed { reason: String },
    /// The transfer did not verify and both balances were restored.
    RolledBack {
        expected_global: Cents,
        actual_global: Cents,
    },
    /// Stopped by [`WithdrawalCoordinator::cancel`]. Any transfer that
    /// already happened stands.
    Cancelled {
        record: Option<TransferRecord>,
        report: Report,
    },
    Completed {
        record: TransferRecord,
        payout: Option<Payout>,
        sync: SyncOutcome,
        report: Report,
    },
}

/// Holds the withdrawal lock for one sequence and returns the coordinator
/// to idle when dropped, whichever way the sequence ends.
struct Sequence<'a> {
    _permit: tokio::sync::MutexGuard<'a, ()>,
    state: &'a Mutex<WithdrawalState>,
}

impl Drop for Sequence<'_> {
    fn drop(&mut self) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = WithdrawalState::Idle;
        debug!("withdrawal lock released");
    }
}

/// Runs withdrawals one at a time.
///
/// A withdrawal moves the whole arena balance into the global balance,
/// pays arena credits out at the tier earned in the minigame, reconciles
/// the global balance with the server, and finally checks that every
/// balance, its displayed value, and its persisted value agree.
pub struct WithdrawalCoordinator<R: Remote> {
    ledgers: Ledgers,
    reconcile: ReconciliationService<R>,
    events: EventBus,
    lock: tokio::sync::Mutex<()>,
    state: Mutex<WithdrawalState>,
    cancel: Mutex<CancelSignal>,
    #[cfg(test)]
    force_verification_failure: AtomicBool,
}

impl<R: Remote> WithdrawalCoordinator<R> {
    pub fn new(ledgers: Ledgers, reconcile: ReconciliationService<R>, events: EventBus) -> Self {
        Self {
            ledgers,
            reconcile,
            events,
            lock: tokio::sync::Mutex::new(()),
            state: Mutex::new(WithdrawalState::Idle),
            cancel: Mutex::new(CancelSignal::new()),
            #[cfg(test)]
            force_verification_failure: AtomicBool::new(false),
        }
    }

    pub fn state(&self) -> WithdrawalState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_busy(&self) -> bool {
        self.lock.try_lock().is_err()
    }

    fn transition(&self, next: WithdrawalState) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        debug!(from = ?*state, to = ?next, "withdrawal state");
        *state = next;
    }

    fn cancel_slot(&self) -> MutexGuard<'_, CancelSignal> {
        self.cancel.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Cancel the withdrawal in flight. Returns false if there is none.
    pub fn cancel(&self) -> bool {
        if self.state() == WithdrawalState::Idle {
            return false;
        }
        info!("cancelling withdrawal");
        self.cancel_slot().cancel();
        true
    }

    #[cfg(test)]
    fn forced_failure(&self) -> bool {
        self.force_verification_failure.load(Ordering::SeqCst)
    }

    #[cfg(not(test))]
    fn forced_failure(&self) -> bool {
        false
    }

    /// Withdraw the session balance.
    ///
    /// Only a failed rollback is returned as an error. Everything else,
    /// including sync failures, is reported in the [`Withdrawal`].
    pub async fn execute_withdrawal(
        &self,
        success_ratio: f64,
        auth: &AuthToken,
    ) -> Result<Withdrawal, Error> {
        let Ok(permit) = self.lock.try_lock() else {
            info!("withdrawal already in progress");
            return Ok(Withdrawal::Busy);
        };
        let _sequence = Sequence {
            _permit: permit,
            state: &self.state,
        };
        let cancel = CancelSignal::new();
        *self.cancel_slot() = cancel.clone();
        self.transition(WithdrawalState::Locked);

        if cancel.is_cancelled() {
            return Ok(self.finish_cancelled(None));
        }

        let pre_arena = self.ledgers.arena.get();
        let pre_global = self.ledgers.global.get();
        let record = match self.reconcile.transfer() {
            Ok(record) => record,
            Err(err) => {
                warn!(%err, "withdrawal transfer rejected");
                return Ok(Withdrawal::Failed {
                    reason: err.to_string(),
                });
            }
        };
        self.transition(WithdrawalState::Committed);

        let expected_global = pre_global.checked_add(record.amount);
        let actual_global = self.ledgers.global.get();
        if expected_global != Some(actual_global)
            || !self.ledgers.arena.get().is_zero()
            || self.forced_failure()
        {
            error!(
                %pre_global,
                amount = %record.amount,
                %actual_global,
                "transfer did not verify, rolling back"
            );
            self.rollback(pre_arena, pre_global)?;
            self.transition(WithdrawalState::RolledBack);
            return Ok(Withdrawal::RolledBack {
                expected_global: expected_global.unwrap_or(Cents::MAX),
                actual_global,
            });
        }

        if cancel.is_cancelled() {
            return Ok(self.finish_cancelled(Some(record)));
        }
        let payout = self.pay_credits(success_ratio);

        if cancel.is_cancelled() {
            return Ok(self.finish_cancelled(Some(record)));
        }
        self.transition(WithdrawalState::Syncing);
        let mut sync_task = Box::pin({
            let reconcile = self.reconcile.clone();
            let auth = auth.clone();
            let cancel = cancel.clone();
            async move {
                reconcile
                    .sync_global(&auth, SyncRequest::merge_delta(record.amount), &cancel)
                    .await
            }
        });
        let finished = tokio::select! {
            outcome = &mut sync_task => Some(outcome),
            _ = cancel.cancelled() => None,
        };
        let Some(sync) = finished else {
            // The request may still land; the outcome sees the cancellation
            // and leaves the ledgers alone
            tokio::spawn(async move {
                let outcome = sync_task.await;
                debug!(?outcome, "abandoned sync finished");
            });
            return Ok(self.finish_cancelled(Some(record)));
        };
        if !sync.is_synced() {
            warn!(?sync, "withdrawal sync incomplete");
        }
        if cancel.is_cancelled() {
            return Ok(self.finish_cancelled(Some(record)));
        }

        self.transition(WithdrawalState::Verified);
        let report = self.verify(true);
        info!(
            amount = %record.amount,
            global = %self.ledgers.global.get(),
            ?payout,
            clean = report.is_clean(),
            "withdrawal complete"
        );
        Ok(Withdrawal::Completed {
            record,
            payout,
            sync,
            report,
        })
    }

    fn pay_credits(&self, success_ratio: f64) -> Option<Payout> {
        let amount = self.ledgers.arena_credits.get();
        if amount.is_zero() {
            return None;
        }
        match settle(
            self.ledgers.arena_credits.as_ref(),
            self.ledgers.credits.as_ref(),
            amount,
            success_ratio,
        ) {
            Ok(payout) => Some(payout),
            Err(err) => {
                warn!(%err, %amount, "credits payout failed");
                None
            }
        }
    }

    fn rollback(&self, arena: Cents, global: Cents) -> Result<(), Error> {
        self.ledgers
            .global
            .replace(global)
            .map_err(Error::RollbackFailed)?;
        self.ledgers
            .arena
            .replace(arena)
            .map_err(Error::RollbackFailed)?;
        warn!(%arena, %global, "rolled back withdrawal transfer");
        Ok(())
    }

    fn finish_cancelled(&self, record: Option<TransferRecord>) -> Withdrawal {
        self.transition(WithdrawalState::Cancelled);
        let report = self.verify(false);
        info!(?record, "withdrawal cancelled");
        Withdrawal::Cancelled { record, report }
    }

    /// Check and correct drift between balances, what the UI was last told,
    /// and what is on disk. `full` adds the checks that only hold after a
    /// completed sequence.
    ///
    /// The arena keeps earning while the sync is awaited, so a non-zero arena
    /// here is reported but never drained. The drained arena that matters is
    /// checked right after the transfer.
    fn verify(&self, full: bool) -> Report {
        let ledgers = &self.ledgers;
        let events = &self.events;
        let mut checker = InvariantChecker::new();
        if full {
            checker = checker
                .check("withdrawal lock held", || self.is_busy())
                .check("arena drained", || ledgers.arena.get().is_zero());
        }

        for kind in LedgerKind::ALL {
            let ledger = ledgers.get(kind);
            checker = checker.check_or_fix(
                displayed_name(kind),
                move || events.displayed(kind) == Some(ledger.get()),
                move || ledger.republish(),
            );
        }

        let global: &dyn Ledger = ledgers.global.as_ref();
        let credits: &dyn Ledger = ledgers.credits.as_ref();
        for (name, ledger) in [("global persisted", global), ("credits persisted", credits)] {
            checker = checker.check_or_fix(
                name,
                move || matches!(ledger.cell().persisted(), Ok(Some(stored)) if stored == ledger.get()),
                move || {
                    if let Err(err) = ledger.cell().flush() {
                        error!(ledger = %ledger.kind(), %err, "failed to flush balance");
                    }
                },
            );
        }
        checker.run()
    }
}

fn displayed_name(kind: LedgerKind) -> &'static str {
    match kind {
        LedgerKind::Arena => "arena displayed",
        LedgerKind::Global => "global displayed",
        LedgerKind::ArenaCredits => "arena credits displayed",
        LedgerKind::Credits => "credits displayed",
    }
}
