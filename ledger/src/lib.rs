//! Dual-ledger accounting for the arena: session BONK, the persisted
//! account balance mirrored to the totals server, and dollar credits.

use bonkarena_types::{Cents, LedgerKind};
use std::sync::Arc;
use thiserror::Error;

pub mod balance;
pub mod cancel;
pub mod config;
pub mod coordinator;
pub mod credits;
pub mod engine;
pub mod events;
pub mod invariant;
pub mod persistent;
pub mod profile;
pub mod reconcile;
pub mod remote;
pub mod session;
pub mod storage;

#[cfg(any(test, feature = "mocks"))]
pub mod mocks;

pub use balance::{Ledger, Movement};
pub use cancel::CancelSignal;
pub use config::Config;
pub use coordinator::{Withdrawal, WithdrawalCoordinator, WithdrawalState};
pub use credits::CreditsLedger;
pub use engine::Engine;
pub use events::EventBus;
pub use invariant::{InvariantChecker, Report, Violation};
pub use persistent::{PersistentLedger, SyncOutcome, SyncRequest};
pub use profile::Profile;
pub use reconcile::ReconciliationService;
pub use remote::{Remote, RemoteError};
pub use session::{SessionLedger, TransferRecord};
pub use storage::{FileStorage, MemoryStorage, Storage, StorageError};


/// Failure of a single ledger mutation. The ledger is unchanged whenever one
/// of these is returned.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("invalid amount for {ledger}: {value}")]
    Validation { ledger: LedgerKind, value: String },
    #[error("insufficient funds in {ledger}: available {available}, requested {requested}")]
    InsufficientFunds {
        ledger: LedgerKind,
        available: Cents,
        requested: Cents,
    },
    #[error("balance overflow in {ledger}")]
    Overflow { ledger: LedgerKind },
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("source and destination are the same ledger")]
    SameLedger,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("rollback failed: {0}")]
    RollbackFailed(#[source] LedgerError),
    #[error("config error: {0}")]
    Config(String),
}

/// The four ledgers of one player.
#[derive(Clone)]
pub struct Ledgers {
    pub arena: Arc<SessionLedger>,
    pub global: Arc<PersistentLedger>,
    pub arena_credits: Arc<SessionLedger>,
    pub credits: Arc<CreditsLedger>,
}

impl Ledgers {
    /// Build all four ledgers on top of one profile.
    pub fn new(profile: Arc<Profile>, events: EventBus) -> Self {
        Self {
            arena: Arc::new(SessionLedger::new(LedgerKind::Arena, events.clone())),
            global: Arc::new(PersistentLedger::load(profile.clone(), events.clone())),
            arena_credits: Arc::new(SessionLedger::new(
                LedgerKind::ArenaCredits,
                events.clone(),
            )),
            credits: Arc::new(CreditsLedger::load(profile, events)),
        }
    }

    pub fn get(&self, kind: LedgerKind) -> &dyn Ledger {
        match kind {
            LedgerKind::Arena => self.arena.as_ref(),
            LedgerKind::Global => self.global.as_ref(),
            LedgerKind::ArenaCredits => self.arena_credits.as_ref(),
            LedgerKind::Credits => self.credits.as_ref(),
        }
    }
}
