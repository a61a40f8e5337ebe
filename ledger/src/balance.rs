//! Shared storage and mutation contract of every ledger.

use crate::{events::EventBus, profile::Profile, storage::StorageError, LedgerError};
use bonkarena_types::{Cents, LedgerKind, PlayerSnapshot};
use serde::Serialize;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, warn};

/// Balance before and after a single mutation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct Movement {
    pub before: Cents,
    pub after: Cents,
}

/// Snapshot field backing a persisted balance.
#[derive(Clone, Copy, Debug)]
pub(crate) enum Field {
    TokenTotal,
    CreditsTotal,
}

impl Field {
    fn get(self, snapshot: &PlayerSnapshot) -> Cents {
        match self {
            Field::TokenTotal => snapshot.global_token_total,
            Field::CreditsTotal => snapshot.credits_total,
        }
    }

    fn get_mut(self, snapshot: &mut PlayerSnapshot) -> &mut Cents {
        match self {
            Field::TokenTotal => &mut snapshot.global_token_total,
            Field::CreditsTotal => &mut snapshot.credits_total,
        }
    }
}

enum Store {
    Volatile(Mutex<Cents>),
    Persisted { profile: Arc<Profile>, field: Field },
}

/// A non-negative balance plus the bus it reports to.
///
/// All mutations go through [`BalanceCell::commit`], which holds the lock
/// for the whole read-modify-write, persists before applying, and publishes
/// before releasing.
pub struct BalanceCell {
    kind: LedgerKind,
    store: Store,
    events: EventBus,
}

impl BalanceCell {
    pub(crate) fn volatile(kind: LedgerKind, events: EventBus) -> Self {
        let cell = Self {
            kind,
            store: Store::Volatile(Mutex::new(Cents::ZERO)),
            events,
        };
        cell.republish();
        cell
    }

    pub(crate) fn durable(
        kind: LedgerKind,
        profile: Arc<Profile>,
        field: Field,
        events: EventBus,
    ) -> Self {
        let cell = Self {
            kind,
            store: Store::Persisted { profile, field },
            events,
        };
        cell.republish();
        cell
    }

    pub fn kind(&self) -> LedgerKind {
        self.kind
    }

    pub fn get(&self) -> Cents {
        match &self.store {
            Store::Volatile(balance) => *balance.lock().unwrap_or_else(PoisonError::into_inner),
            Store::Persisted { profile, field } => field.get(&profile.lock()),
        }
    }

    /// Value on durable storage, `None` for volatile balances.
    pub fn persisted(&self) -> Result<Option<Cents>, StorageError> {
        match &self.store {
            Store::Volatile(_) => Ok(None),
            Store::Persisted { profile, field } => Ok(Some(
                profile
                    .stored()?
                    .map(|snapshot| field.get(&snapshot))
                    .unwrap_or_default(),
            )),
        }
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Re-emit the current value.
    pub fn republish(&self) {
        match &self.store {
            Store::Volatile(balance) => {
                let balance = balance.lock().unwrap_or_else(PoisonError::into_inner);
                self.events.publish(self.kind, *balance);
            }
            Store::Persisted { profile, field } => {
                let snapshot = profile.lock();
                self.events.publish(self.kind, field.get(&snapshot));
            }
        }
    }

    /// Rewrite the profile from memory. No-op for volatile balances.
    pub fn flush(&self) -> Result<(), StorageError> {
        match &self.store {
            Store::Volatile(_) => Ok(()),
            Store::Persisted { profile, .. } => profile.flush(),
        }
    }

    /// Compute the next balance from the current one and apply it.
    ///
    /// `f` runs under the lock. If it errors, or persisting the result fails,
    /// nothing changes and nothing is published.
    pub(crate) fn commit<T>(
        &self,
        f: impl FnOnce(Cents) -> Result<(Cents, T), LedgerError>,
    ) -> Result<T, LedgerError> {
        match &self.store {
            Store::Volatile(balance) => {
                let mut balance = balance.lock().unwrap_or_else(PoisonError::into_inner);
                let before = *balance;
                let (next, out) = f(before)?;
                debug!(ledger = %self.kind, %before, after = %next, "balance changed");
                *balance = next;
                self.events.publish(self.kind, next);
                Ok(out)
            }
            Store::Persisted { profile, field } => {
                let mut snapshot = profile.lock();
                let current = field.get(&snapshot);
                let (next, out) = f(current)?;
                let mut staged = snapshot.clone();
                *field.get_mut(&mut staged) = next;
                profile.persist(&staged)?;
                debug!(ledger = %self.kind, before = %current, after = %next, "balance changed");
                *snapshot = staged;
                self.events.publish(self.kind, next);
                Ok(out)
            }
        }
    }
}

fn parse(kind: LedgerKind, value: f64) -> Result<Cents, LedgerError> {
    Cents::from_f64(value).ok_or_else(|| {
        warn!(ledger = %kind, value, "rejected non-finite amount");
        LedgerError::Validation {
            ledger: kind,
            value: value.to_string(),
        }
    })
}

/// Mutation contract shared by every ledger.
///
/// Balances never go below zero: real-number input clamps, exact-cent
/// withdrawals fail instead.
pub trait Ledger: Send + Sync {
    #[doc(hidden)]
    fn cell(&self) -> &BalanceCell;

    fn kind(&self) -> LedgerKind {
        self.cell().kind()
    }

    fn get(&self) -> Cents {
        self.cell().get()
    }

    /// Replace the balance with `amount`, floored to the cent.
    fn set(&self, amount: f64) -> Result<Cents, LedgerError> {
        let value = parse(self.kind(), amount)?;
        self.cell().commit(|_| Ok((value, value)))
    }

    /// Apply a signed delta, clamping at zero.
    fn add(&self, delta: f64) -> Result<Cents, LedgerError> {
        let magnitude = parse(self.kind(), delta.abs())?;
        self.cell().commit(|current| {
            let next = if delta >= 0.0 {
                current.saturating_add(magnitude)
            } else {
                // Round the debit up so the result floors like get() + delta
                let debit = Cents::from_f64_ceil(-delta).unwrap_or(magnitude);
                current.saturating_sub(debit)
            };
            Ok((next, next))
        })
    }

    fn reset(&self) -> Result<Cents, LedgerError> {
        self.cell().commit(|_| Ok((Cents::ZERO, Cents::ZERO)))
    }

    /// Restore an exact value. Returns the previous balance.
    fn replace(&self, value: Cents) -> Result<Cents, LedgerError> {
        self.cell().commit(|previous| Ok((value, previous)))
    }

    fn deposit(&self, amount: Cents) -> Result<Movement, LedgerError> {
        let ledger = self.kind();
        self.cell().commit(|before| {
            let after = before
                .checked_add(amount)
                .ok_or(LedgerError::Overflow { ledger })?;
            Ok((after, Movement { before, after }))
        })
    }

    fn withdraw(&self, amount: Cents) -> Result<Movement, LedgerError> {
        let ledger = self.kind();
        self.cell().commit(|before| {
            let after = before
                .checked_sub(amount)
                .ok_or(LedgerError::InsufficientFunds {
                    ledger,
                    available: before,
                    requested: amount,
                })?;
            Ok((after, Movement { before, after }))
        })
    }

    /// Re-emit the current balance to the bus.
    fn republish(&self) {
        self.cell().republish()
    }
}
