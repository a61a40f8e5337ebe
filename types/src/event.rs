use crate::amount::Cents;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Which ledger a balance belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerKind {
    /// Session-scoped BONK.
    Arena,
    /// Persisted BONK, mirrored to the server.
    Global,
    /// Session-scoped credits.
    ArenaCredits,
    /// Persisted credits.
    Credits,
}

impl LedgerKind {
    pub const ALL: [LedgerKind; 4] = [
        LedgerKind::Arena,
        LedgerKind::Global,
        LedgerKind::ArenaCredits,
        LedgerKind::Credits,
    ];

    pub const fn index(self) -> usize {
        match self {
            LedgerKind::Arena => 0,
            LedgerKind::Global => 1,
            LedgerKind::ArenaCredits => 2,
            LedgerKind::Credits => 3,
        }
    }
}

impl fmt::Display for LedgerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LedgerKind::Arena => "arena",
            LedgerKind::Global => "global",
            LedgerKind::ArenaCredits => "arena_credits",
            LedgerKind::Credits => "credits",
        };
        f.write_str(name)
    }
}

/// Notification sent to the UI whenever a balance changes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LedgerEvent {
    /// Carries the new absolute balance, never a delta.
    BalanceChanged { ledger: LedgerKind, balance: Cents },
}
