use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use crate::{address::WalletAddress, error::ReferralError, tier::MembershipTier};

/// Commission records only ever carry level 1 or 2.
pub const MAX_COMMISSION_LEVELS: usize = 2;

/// Payout amounts are truncated to the token's precision.
pub const TOKEN_DECIMALS: u32 = 8;

const BPS_DENOMINATOR: u32 = 10_000;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum CommissionKind {
    /// Paid when a downline wallet buys a node.
    ReferralCommission,
    /// Paid when a downline wallet's node accrues earnings.
    EarningsShare,
}

impl CommissionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            CommissionKind::ReferralCommission => "referral_commission",
            CommissionKind::EarningsShare => "earnings_share",
        }
    }
}

impl std::fmt::Display for CommissionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for CommissionKind {
    type Err = ReferralError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "referral_commission" => Ok(CommissionKind::ReferralCommission),
            "earnings_share" => Ok(CommissionKind::EarningsShare),
            other => Err(ReferralError::UnknownCommissionKind(other.to_string())),
        }
    }
}

impl TryFrom<String> for CommissionKind {
    type Error = ReferralError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CommissionPlan {
    purchase_bps: Vec<u32>,
    earnings_bps: Vec<u32>,
    minimum_payout: Decimal,
}

impl CommissionPlan {
    pub fn new(
        purchase_bps: Vec<u32>,
        earnings_bps: Vec<u32>,
        minimum_payout: Decimal,
    ) -> Result<Self, ReferralError> {
        for levels in [&purchase_bps, &earnings_bps] {
            if levels.len() > MAX_COMMISSION_LEVELS {
                return Err(ReferralError::InvalidPlan("at most two commission levels"));
            }
            if levels.iter().any(|bps| *bps > BPS_DENOMINATOR) {
                return Err(ReferralError::InvalidPlan("rate above 10000 bps"));
            }
        }
        if minimum_payout.is_sign_negative() {
            return Err(ReferralError::InvalidPlan("negative minimum payout"));
        }
        Ok(Self {
            purchase_bps,
            earnings_bps,
            minimum_payout,
        })
    }

    pub fn rates(&self, kind: CommissionKind) -> &[u32] {
        match kind {
            CommissionKind::ReferralCommission => &self.purchase_bps,
            CommissionKind::EarningsShare => &self.earnings_bps,
        }
    }

    pub fn minimum_payout(&self) -> Decimal {
        self.minimum_payout
    }

    /// Splits `amount` over the upline. `uplines` is nearest first, as
    /// returned by [`crate::ReferralForest::ancestry`] or a store walk.
    pub fn payouts(&self, kind: CommissionKind, amount: Decimal, uplines: &[Upline]) -> Vec<Payout> {
        if amount <= Decimal::ZERO {
            return vec![];
        }
        let rates = self.rates(kind);
        let mut payouts = Vec::new();
        for (idx, upline) in uplines.iter().enumerate().take(rates.len()) {
            let level = (idx + 1) as u8;
            let bps = rates[idx];
            if bps == 0 || upline.tier.commission_depth() < level {
                continue;
            }
            let share = (amount * Decimal::from(bps) / Decimal::from(BPS_DENOMINATOR))
                .round_dp_with_strategy(TOKEN_DECIMALS, RoundingStrategy::ToZero);
            if share.is_zero() || share < self.minimum_payout {
                continue;
            }
            payouts.push(Payout {
                recipient: upline.address.clone(),
                amount: share,
                level,
                kind,
            });
        }
        payouts
    }
}

impl Default for CommissionPlan {
    fn default() -> Self {
        Self {
            purchase_bps: vec![1_000, 500],
            earnings_bps: vec![500, 200],
            minimum_payout: Decimal::ZERO,
        }
    }
}

/// An ancestor eligible for commission, with the tier it currently holds.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Upline {
    pub address: WalletAddress,
    pub tier: MembershipTier,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Payout {
    pub recipient: WalletAddress,
    pub amount: Decimal,
    pub level: u8,
    pub kind: CommissionKind,
}
