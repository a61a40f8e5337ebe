use serde::{Deserialize, Serialize};
use std::fmt;

/// Number of cents in one whole unit (token or dollar).
pub const SCALE: u64 = 100;

/// Basis-point denominator used by fractional payouts.
pub const BPS: u64 = 10_000;

// Absorbs binary representation error when scaling (0.29 * 100 = 28.999...).
const FLOOR_TOLERANCE: f64 = 1e-6;

/// Fixed-point money amount with 2 decimal places of precision.
///
/// Balances are unsigned, so a value below zero cannot be represented.
/// Conversions from real-number input floor to the cent and clamp
/// negatives to zero.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Cents(u64);

impl Cents {
    pub const ZERO: Cents = Cents(0);
    pub const MAX: Cents = Cents(u64::MAX);

    /// Create from a raw cent count
    pub const fn new(cents: u64) -> Self {
        Cents(cents)
    }

    /// Create from whole units
    pub fn from_units(units: u64) -> Option<Self> {
        units.checked_mul(SCALE).map(Cents)
    }

    /// Convert a real-number amount, flooring to the cent.
    ///
    /// Returns `None` for NaN and infinities. Negative values clamp to zero
    /// and values past the representable range saturate.
    pub fn from_f64(value: f64) -> Option<Self> {
        if !value.is_finite() {
            return None;
        }
        if value <= 0.0 {
            return Some(Cents::ZERO);
        }
        let scaled = (value * SCALE as f64 + FLOOR_TOLERANCE).floor();
        if scaled >= u64::MAX as f64 {
            return Some(Cents::MAX);
        }
        Some(Cents(scaled as u64))
    }

    /// Like [`Cents::from_f64`] but rounds partial cents up.
    pub fn from_f64_ceil(value: f64) -> Option<Self> {
        if !value.is_finite() {
            return None;
        }
        if value <= 0.0 {
            return Some(Cents::ZERO);
        }
        let scaled = (value * SCALE as f64 - FLOOR_TOLERANCE).ceil().max(0.0);
        if scaled >= u64::MAX as f64 {
            return Some(Cents::MAX);
        }
        Some(Cents(scaled as u64))
    }

    /// Get the raw cent count
    pub const fn as_cents(self) -> u64 {
        self.0
    }

    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    pub fn checked_add(self, other: Cents) -> Option<Cents> {
        self.0.checked_add(other.0).map(Cents)
    }

    pub fn checked_sub(self, other: Cents) -> Option<Cents> {
        self.0.checked_sub(other.0).map(Cents)
    }

    pub fn saturating_add(self, other: Cents) -> Cents {
        Cents(self.0.saturating_add(other.0))
    }

    pub fn saturating_sub(self, other: Cents) -> Cents {
        Cents(self.0.saturating_sub(other.0))
    }

    /// Multiply by `bps / 10_000`, flooring to the cent
    pub fn mul_bps(self, bps: u64) -> Cents {
        let scaled = (self.0 as u128) * (bps as u128) / (BPS as u128);
        Cents(scaled.min(u64::MAX as u128) as u64)
    }
}

impl fmt::Display for Cents {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.0 / SCALE, self.0 % SCALE)
    }
}

impl From<u64> for Cents {
    fn from(cents: u64) -> Self {
        Cents(cents)
    }
}
