use crate::{
    balance::{BalanceCell, Ledger},
    events::EventBus,
    LedgerError,
};
use bonkarena_types::{Cents, LedgerKind};
use serde::Serialize;
use tracing::info;

/// Outcome of moving a whole session balance into another ledger.
///
/// `dest_after == dest_before + amount` and `source_after` is always zero.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct TransferRecord {
    pub source_before: Cents,
    pub source_after: Cents,
    pub dest_before: Cents,
    pub dest_after: Cents,
    pub amount: Cents,
}

/// Volatile balance that lives for one session. Starts at zero.
pub struct SessionLedger {
    cell: BalanceCell,
}

impl SessionLedger {
    pub fn new(kind: LedgerKind, events: EventBus) -> Self {
        Self {
            cell: BalanceCell::volatile(kind, events),
        }
    }

    /// Move the entire balance into `dest` and zero this ledger.
    ///
    /// The balance stays locked for the duration, so nothing can be earned
    /// or spent between the read and the zeroing. If `dest` rejects the
    /// deposit this ledger is untouched.
    pub fn transfer_all_to(&self, dest: &dyn Ledger) -> Result<TransferRecord, LedgerError> {
        if std::ptr::eq(&self.cell, dest.cell()) {
            return Err(LedgerError::SameLedger);
        }
        self.cell.commit(|source_before| {
            let movement = dest.deposit(source_before)?;
            Ok((
                Cents::ZERO,
                TransferRecord {
                    source_before,
                    source_after: Cents::ZERO,
                    dest_before: movement.before,
                    dest_after: movement.after,
                    amount: source_before,
                },
            ))
        })
        .inspect(|record| {
            info!(
                from = %self.cell.kind(),
                to = %dest.kind(),
                amount = %record.amount,
                dest_after = %record.dest_after,
                "transferred session balance"
            );
        })
    }
}

impl Ledger for SessionLedger {
    fn cell(&self) -> &BalanceCell {
        &self.cell
    }
}
