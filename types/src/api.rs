//! Wire types of the totals API.
//!
//! All amounts travel as integer cents.

use crate::amount::Cents;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Bearer token identifying the player to the totals API.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AuthToken(String);

impl AuthToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

// Tokens never end up in logs.
impl fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AuthToken(..)")
    }
}

/// Server-side totals for one player.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct UserTotals {
    pub global_token_total: Cents,
    pub credits_total: Cents,
}

/// How the server applies a pushed token total.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PushMode {
    /// Overwrite the stored total. Idempotent.
    Replace,
    /// Add to the stored total. Not idempotent.
    Add,
}

impl PushMode {
    pub fn is_idempotent(self) -> bool {
        matches!(self, PushMode::Replace)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushTokenTotal {
    pub total: Cents,
    pub mode: PushMode,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushCreditsTotal {
    pub total: Cents,
}

/// Server acknowledgement of a push.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushReceipt {
    pub success: bool,
    /// Stored total after the push was applied.
    pub total: Cents,
    pub receipt: Uuid,
}
