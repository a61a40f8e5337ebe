pub mod amount;
pub mod api;
mod event;
mod player;
mod tier;

pub use amount::Cents;
pub use api::{AuthToken, PushCreditsTotal, PushMode, PushReceipt, PushTokenTotal, UserTotals};
pub use event::{LedgerEvent, LedgerKind};
pub use player::{backup_key, snapshot_key, PlayerSnapshot, Settings};
pub use tier::{Payout, WithdrawalTier, PARTIAL_THRESHOLD};
