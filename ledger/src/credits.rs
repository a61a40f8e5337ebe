use crate::{
    balance::{BalanceCell, Field, Ledger, Movement},
    events::EventBus,
    profile::Profile,
    storage::StorageError,
    LedgerError,
};
use bonkarena_types::{Cents, LedgerKind, Payout, WithdrawalTier};
use std::sync::Arc;
use tracing::{error, info};

/// Persisted dollar credits. Independent of BONK and never pushed to the
/// server as part of a withdrawal.
pub struct CreditsLedger {
    cell: BalanceCell,
}

impl CreditsLedger {
    pub fn load(profile: Arc<Profile>, events: EventBus) -> Self {
        Self {
            cell: BalanceCell::durable(
                LedgerKind::Credits,
                profile,
                Field::CreditsTotal,
                events,
            ),
        }
    }

    pub fn persisted(&self) -> Result<Cents, StorageError> {
        Ok(self.cell.persisted()?.unwrap_or_default())
    }

    /// Move exactly `amount` from `source` into this ledger.
    pub fn deposit_from(&self, source: &dyn Ledger, amount: Cents) -> Result<Movement, LedgerError> {
        source.withdraw(amount)?;
        self.deposit(amount).or_else(|err| {
            restore(source, amount)?;
            Err(err)
        })
    }

    /// Pay `amount` out of this ledger into `dest` at the tier chosen by
    /// `success_ratio`.
    pub fn withdraw_to(
        &self,
        dest: &dyn Ledger,
        amount: Cents,
        success_ratio: f64,
    ) -> Result<Payout, LedgerError> {
        settle(self, dest, amount, success_ratio)
    }
}

impl Ledger for CreditsLedger {
    fn cell(&self) -> &BalanceCell {
        &self.cell
    }
}

/// Apply the withdrawal tier to `amount` leaving `source` for `target`.
///
/// `amount - retained` is debited from `source` and `paid_out` is credited
/// to `target`, so the retained part stays behind. A perfect run pays out
/// more than it debits. If `target` rejects the credit the debit is undone.
pub fn settle(
    source: &dyn Ledger,
    target: &dyn Ledger,
    amount: Cents,
    success_ratio: f64,
) -> Result<Payout, LedgerError> {
    let tier = WithdrawalTier::from_ratio(success_ratio);
    let payout = tier.split(amount);
    let debit = amount.saturating_sub(payout.retained);

    source.withdraw(debit)?;
    if let Err(err) = target.deposit(payout.paid_out) {
        restore(source, debit)?;
        return Err(err);
    }
    info!(
        ?tier,
        from = %source.kind(),
        to = %target.kind(),
        %amount,
        paid_out = %payout.paid_out,
        retained = %payout.retained,
        "settled withdrawal tier"
    );
    Ok(payout)
}

fn restore(source: &dyn Ledger, amount: Cents) -> Result<(), LedgerError> {
    source.deposit(amount).map(|_| ()).inspect_err(|err| {
        error!(ledger = %source.kind(), %amount, %err, "failed to restore debited amount");
    })
}
