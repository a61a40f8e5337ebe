use crate::amount::Cents;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// UI preferences stored alongside the balances. Opaque to the ledger.
pub type Settings = BTreeMap<String, serde_json::Value>;

/// Persisted per-player aggregate.
///
/// Always written whole; a reader either sees the previous snapshot or the
/// new one.
#[derive(Clone, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerSnapshot {
    pub address: String,
    pub global_token_total: Cents,
    pub credits_total: Cents,
    pub high_score: u64,
    pub settings: Settings,
}

impl PlayerSnapshot {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            ..Self::default()
        }
    }

    /// Raise the high score if `score` beats it. Returns whether it changed.
    pub fn record_score(&mut self, score: u64) -> bool {
        if score <= self.high_score {
            return false;
        }
        self.high_score = score;
        true
    }
}

/// Storage key of the primary snapshot blob
pub fn snapshot_key(address: &str) -> String {
    format!("player/{address}")
}

/// Storage key of the disaster-recovery copy of the token total
pub fn backup_key(address: &str) -> String {
    format!("backup/{address}/global_token_total")
}
