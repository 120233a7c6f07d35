use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use crate::commission::CommissionKind;

/// The slice of a commission record the rollup needs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CommissionCredit {
    pub level: u8,
    pub kind: CommissionKind,
    pub amount: Decimal,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct EarningsBreakdown {
    /// Every commission amount credited to the wallet.
    pub team_rewards: Decimal,
    /// Earnings of the nodes the wallet owns.
    pub node_income: Decimal,
    /// The part of `team_rewards` paid on downline node purchases.
    pub commission_income: Decimal,
    pub level_one: Decimal,
    pub level_two: Decimal,
    pub total: Decimal,
    pub team_percent: Decimal,
    pub node_percent: Decimal,
}

/// `part / total * 100`, two decimals, 0 when total is 0.
pub fn percent_of(part: Decimal, total: Decimal) -> Decimal {
    if total.is_zero() {
        return Decimal::ZERO;
    }
    (part * Decimal::ONE_HUNDRED / total)
        .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

pub fn rollup<C, N>(credits: C, node_income: N) -> EarningsBreakdown
where
    C: IntoIterator<Item = CommissionCredit>,
    N: IntoIterator<Item = Decimal>,
{
    let mut out = EarningsBreakdown::default();
    for credit in credits {
        out.team_rewards += credit.amount;
        if credit.kind == CommissionKind::ReferralCommission {
            out.commission_income += credit.amount;
        }
        match credit.level {
            1 => out.level_one += credit.amount,
            2 => out.level_two += credit.amount,
            _ => {}
        }
    }
    out.node_income = node_income.into_iter().sum();
    out.total = out.team_rewards + out.node_income;
    out.team_percent = percent_of(out.team_rewards, out.total);
    out.node_percent = percent_of(out.node_income, out.total);
    out
}
