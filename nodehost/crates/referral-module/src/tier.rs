use std::fmt;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::ReferralError;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum MembershipTier {
    Base,
    Mid,
    Top,
}

impl MembershipTier {
    pub fn as_str(self) -> &'static str {
        match self {
            MembershipTier::Base => "base",
            MembershipTier::Mid => "mid",
            MembershipTier::Top => "top",
        }
    }

    /// How many upline levels this tier may earn commission from.
    pub fn commission_depth(self) -> u8 {
        match self {
            MembershipTier::Base => 1,
            MembershipTier::Mid | MembershipTier::Top => 2,
        }
    }
}

impl Default for MembershipTier {
    fn default() -> Self {
        MembershipTier::Base
    }
}

impl fmt::Display for MembershipTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for MembershipTier {
    type Err = ReferralError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "base" => Ok(MembershipTier::Base),
            "mid" => Ok(MembershipTier::Mid),
            "top" => Ok(MembershipTier::Top),
            _ => Err(ReferralError::UnknownTier(s.to_string())),
        }
    }
}

impl TryFrom<String> for MembershipTier {
    type Error = ReferralError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// USD thresholds for the mid and top tiers.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TierThresholds {
    mid_usd: Decimal,
    top_usd: Decimal,
}

impl TierThresholds {
    pub fn new(mid_usd: Decimal, top_usd: Decimal) -> Result<Self, ReferralError> {
        if mid_usd.is_sign_negative() || mid_usd >= top_usd {
            return Err(ReferralError::InvalidThresholds {
                mid: mid_usd.to_string(),
                top: top_usd.to_string(),
            });
        }
        Ok(Self { mid_usd, top_usd })
    }

    pub fn mid_usd(&self) -> Decimal {
        self.mid_usd
    }

    pub fn top_usd(&self) -> Decimal {
        self.top_usd
    }

    pub fn tier_for_usd(&self, usd_value: Decimal) -> MembershipTier {
        if usd_value >= self.top_usd {
            MembershipTier::Top
        } else if usd_value >= self.mid_usd {
            MembershipTier::Mid
        } else {
            MembershipTier::Base
        }
    }
}

impl Default for TierThresholds {
    fn default() -> Self {
        Self {
            mid_usd: Decimal::new(3_000, 0),
            top_usd: Decimal::new(10_000, 0),
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TierAssessment {
    pub usd_value: Decimal,
    pub tier: MembershipTier,
}

/// Token holdings valued in USD. Saturates instead of overflowing.
pub fn usd_value(balance: Decimal, price: Decimal) -> Decimal {
    balance.checked_mul(price).unwrap_or_else(|| {
        if balance.is_sign_negative() != price.is_sign_negative() {
            Decimal::MIN
        } else {
            Decimal::MAX
        }
    })
}

pub fn derive_tier(balance: Decimal, price: Decimal, thresholds: &TierThresholds) -> TierAssessment {
    let usd_value = usd_value(balance, price);
    TierAssessment {
        usd_value,
        tier: thresholds.tier_for_usd(usd_value),
    }
}
