use crate::amount::Cents;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Minimum success ratio for the partial tier.
pub const PARTIAL_THRESHOLD: f64 = 0.5;

/// Payout tier selected by the minigame success ratio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WithdrawalTier {
    /// Ratio of exactly 1.0: everything out plus a 10% bonus.
    Perfect,
    /// Ratio in [0.5, 1.0): half out, half stays behind.
    Partial,
    /// Ratio below 0.5: three quarters out, one quarter stays behind.
    Failed,
}

/// Result of applying a tier to an amount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Payout {
    pub paid_out: Cents,
    pub retained: Cents,
}

impl WithdrawalTier {
    /// Select the tier for a ratio. Out-of-range ratios clamp into [0, 1] and
    /// NaN counts as 0.
    pub fn from_ratio(ratio: f64) -> Self {
        let ratio = if ratio.is_nan() {
            warn!("success ratio is NaN, treating as 0");
            0.0
        } else {
            ratio.clamp(0.0, 1.0)
        };
        if ratio >= 1.0 {
            WithdrawalTier::Perfect
        } else if ratio >= PARTIAL_THRESHOLD {
            WithdrawalTier::Partial
        } else {
            WithdrawalTier::Failed
        }
    }

    /// Paid-out fraction in basis points
    pub const fn payout_bps(self) -> u64 {
        match self {
            WithdrawalTier::Perfect => 11_000,
            WithdrawalTier::Partial => 5_000,
            WithdrawalTier::Failed => 7_500,
        }
    }

    /// Retained fraction in basis points
    pub const fn retained_bps(self) -> u64 {
        match self {
            WithdrawalTier::Perfect => 0,
            WithdrawalTier::Partial => 5_000,
            WithdrawalTier::Failed => 2_500,
        }
    }

    /// Split `amount` into the paid-out and retained parts.
    ///
    /// Each part is floored on its own, so for odd cent counts the parts can
    /// sum to one cent less than the tier total. That gap is logged and kept.
    pub fn split(self, amount: Cents) -> Payout {
        let payout = Payout {
            paid_out: amount.mul_bps(self.payout_bps()),
            retained: amount.mul_bps(self.retained_bps()),
        };
        let expected = amount.mul_bps(self.payout_bps() + self.retained_bps());
        let actual = payout.paid_out.saturating_add(payout.retained);
        if actual != expected {
            warn!(
                tier = ?self,
                %amount,
                %expected,
                %actual,
                "withdrawal split does not add up to the tier total"
            );
        }
        payout
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hundred() -> Cents {
        Cents::from_units(100).unwrap()
    }

    #[test]
    fn test_tier_selection() {
        assert_eq!(WithdrawalTier::from_ratio(1.0), WithdrawalTier::Perfect);
        assert_eq!(WithdrawalTier::from_ratio(0.999), WithdrawalTier::Partial);
        assert_eq!(WithdrawalTier::from_ratio(0.5), WithdrawalTier::Partial);
        assert_eq!(WithdrawalTier::from_ratio(0.4999), WithdrawalTier::Failed);
        assert_eq!(WithdrawalTier::from_ratio(0.0), WithdrawalTier::Failed);
    }

    #[test]
    fn test_tier_selection_clamps() {
        assert_eq!(WithdrawalTier::from_ratio(1.7), WithdrawalTier::Perfect);
        assert_eq!(WithdrawalTier::from_ratio(-3.0), WithdrawalTier::Failed);
        assert_eq!(WithdrawalTier::from_ratio(f64::NAN), WithdrawalTier::Failed);
    }

    #[test]
    fn test_split_perfect() {
        let payout = WithdrawalTier::from_ratio(1.0).split(hundred());
        assert_eq!(payout.paid_out, Cents::new(11_000));
        assert_eq!(payout.retained, Cents::ZERO);
    }

    #[test]
    fn test_split_partial() {
        let payout = WithdrawalTier::from_ratio(0.6).split(hundred());
        assert_eq!(payout.paid_out, Cents::new(5_000));
        assert_eq!(payout.retained, Cents::new(5_000));
    }

    #[test]
    fn test_split_failed() {
        let payout = WithdrawalTier::from_ratio(0.3).split(hundred());
        assert_eq!(payout.paid_out, Cents::new(7_500));
        assert_eq!(payout.retained, Cents::new(2_500));
    }

    #[test]
    fn test_split_odd_cents_keeps_floor_gap() {
        // 1.01 at 50/50: each half floors to 0.50, total 1.00 vs expected 1.01
        let payout = WithdrawalTier::Partial.split(Cents::new(101));
        assert_eq!(payout.paid_out, Cents::new(50));
        assert_eq!(payout.retained, Cents::new(50));

        // 0.03 at 75/25: 0.02 + 0.00
        let payout = WithdrawalTier::Failed.split(Cents::new(3));
        assert_eq!(payout.paid_out, Cents::new(2));
        assert_eq!(payout.retained, Cents::ZERO);
    }

    #[test]
    fn test_split_zero() {
        for tier in [
            WithdrawalTier::Perfect,
            WithdrawalTier::Partial,
            WithdrawalTier::Failed,
        ] {
            assert_eq!(tier.split(Cents::ZERO), Payout::default());
        }
    }
}
