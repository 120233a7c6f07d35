//! Records kept by the platform and the state changes they allow.
//!
//! Stores persist these types as-is; every rule about which change is legal
//! lives here so the in-memory and Postgres stores cannot disagree.

use chrono::{DateTime, Utc};
use referral_module::{commission::CommissionKind, MembershipTier};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type Amount = Decimal;

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("amount must be greater than zero")]
    NonPositiveAmount,
    #[error("insufficient funds in wallet {wallet}: available {available}, requested {requested}")]
    InsufficientFunds {
        wallet: String,
        available: Amount,
        requested: Amount,
    },
    #[error("node {node} cannot move from {from} to {to}")]
    InvalidNodeTransition {
        node: Uuid,
        from: NodeStatus,
        to: NodeStatus,
    },
    #[error("node {node} is {status} and does not accrue earnings")]
    NodeNotEarning { node: Uuid, status: NodeStatus },
    #[error("listing {listing} is already {status}")]
    ListingClosed { listing: Uuid, status: ListingStatus },
    #[error("withdrawal {withdrawal} was already {status}")]
    WithdrawalProcessed {
        withdrawal: Uuid,
        status: WithdrawalStatus,
    },
    #[error("wallet {0} cannot refer itself")]
    SelfReferral(String),
    #[error("making {parent} the parent of {wallet} would create a referral cycle")]
    ReferralCycle { wallet: String, parent: String },
    #[error("unknown {kind} {value:?}")]
    UnknownLabel { kind: &'static str, value: String },
}

/// Implements `as_str`, `Display`, `FromStr` and `TryFrom<String>` for a
/// fieldless enum stored as a text column.
macro_rules! text_enum {
    ($name:ident, $kind:literal, { $($variant:ident => $label:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(self) -> &'static str {
                match self {
                    $($name::$variant => $label,)+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = LedgerError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($label => Ok($name::$variant),)+
                    other => Err(LedgerError::UnknownLabel {
                        kind: $kind,
                        value: other.to_string(),
                    }),
                }
            }
        }

        impl TryFrom<String> for $name {
            type Error = LedgerError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                value.parse()
            }
        }
    };
}

fn ensure_positive(amount: Amount) -> Result<(), LedgerError> {
    if amount <= Decimal::ZERO {
        return Err(LedgerError::NonPositiveAmount);
    }
    Ok(())
}

// ---------------------------------------------------------------- wallets

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Wallet {
    pub address: String,
    pub balance: Amount,
    #[sqlx(try_from = "String")]
    pub tier: MembershipTier,
    pub parent_wallet: Option<String>,
    pub team_size: i64,
    pub total_earnings: Amount,
    pub distributable_commission: Amount,
    pub distributed_commission: Amount,
    pub withdrawn_total: Amount,
    pub created_at: DateTime<Utc>,
}

impl Wallet {
    pub fn new(address: impl Into<String>, parent_wallet: Option<String>, now: DateTime<Utc>) -> Self {
        Self {
            address: address.into(),
            balance: Decimal::ZERO,
            tier: MembershipTier::Base,
            parent_wallet,
            team_size: 0,
            total_earnings: Decimal::ZERO,
            distributable_commission: Decimal::ZERO,
            distributed_commission: Decimal::ZERO,
            withdrawn_total: Decimal::ZERO,
            created_at: now,
        }
    }

    pub fn credit_commission(&mut self, amount: Amount) {
        self.total_earnings += amount;
        self.distributable_commission += amount;
    }

    pub fn credit_node_income(&mut self, amount: Amount) {
        self.total_earnings += amount;
    }

    /// Earnings not yet withdrawn nor reserved by pending requests.
    pub fn available(&self, pending: Amount) -> Amount {
        self.total_earnings - self.withdrawn_total - pending
    }

    pub fn ensure_can_withdraw(&self, amount: Amount, pending: Amount) -> Result<(), LedgerError> {
        ensure_positive(amount)?;
        let available = self.available(pending);
        if amount > available {
            return Err(LedgerError::InsufficientFunds {
                wallet: self.address.clone(),
                available,
                requested: amount,
            });
        }
        Ok(())
    }

    /// Books an approved withdrawal; commission is paid out before other income.
    pub fn record_payout(&mut self, amount: Amount) {
        self.withdrawn_total += amount;
        let from_commission = amount.min(self.distributable_commission);
        self.distributable_commission -= from_commission;
        self.distributed_commission += from_commission;
    }
}

// ------------------------------------------------------------ commissions

/// Append-only ledger entry.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct CommissionRecord {
    pub id: Uuid,
    pub beneficiary: String,
    pub source_wallet: String,
    pub amount: Amount,
    pub level: i16,
    #[sqlx(try_from = "String")]
    pub transaction_type: CommissionKind,
    pub source_node_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

// ------------------------------------------------------------------ nodes

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    Cloud,
    Image,
}

text_enum!(NodeType, "node type", { Cloud => "cloud", Image => "image" });

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Pending,
    Deploying,
    Active,
    Running,
    Inactive,
}

text_enum!(NodeStatus, "node status", {
    Pending => "pending",
    Deploying => "deploying",
    Active => "active",
    Running => "running",
    Inactive => "inactive",
});

impl NodeStatus {
    pub fn can_transition_to(self, next: NodeStatus) -> bool {
        use NodeStatus::*;
        matches!(
            (self, next),
            (Pending, Deploying)
                | (Pending, Inactive)
                | (Deploying, Active)
                | (Deploying, Running)
                | (Deploying, Inactive)
                | (Active, Running)
                | (Running, Active)
                | (Active, Inactive)
                | (Running, Inactive)
        )
    }

    pub fn is_earning(self) -> bool {
        matches!(self, NodeStatus::Active | NodeStatus::Running)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    pub id: Uuid,
    pub owner: String,
    #[sqlx(try_from = "String")]
    pub node_type: NodeType,
    #[sqlx(try_from = "String")]
    pub status: NodeStatus,
    pub purchase_price: Amount,
    pub tx_hash: Option<String>,
    pub earnings: Amount,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Node {
    pub fn purchased(
        owner: impl Into<String>,
        node_type: NodeType,
        purchase_price: Amount,
        tx_hash: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            owner: owner.into(),
            node_type,
            status: NodeStatus::Pending,
            purchase_price,
            tx_hash,
            earnings: Decimal::ZERO,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn transition(&mut self, next: NodeStatus, now: DateTime<Utc>) -> Result<(), LedgerError> {
        if !self.status.can_transition_to(next) {
            return Err(LedgerError::InvalidNodeTransition {
                node: self.id,
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        self.updated_at = now;
        Ok(())
    }

    pub fn accrue(&mut self, amount: Amount, now: DateTime<Utc>) -> Result<(), LedgerError> {
        ensure_positive(amount)?;
        if !self.status.is_earning() {
            return Err(LedgerError::NodeNotEarning {
                node: self.id,
                status: self.status,
            });
        }
        self.earnings += amount;
        self.updated_at = now;
        Ok(())
    }

    pub fn transfer_to(&mut self, owner: impl Into<String>, now: DateTime<Utc>) {
        self.owner = owner.into();
        self.updated_at = now;
    }
}

// ------------------------------------------------------------ marketplace

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ListingStatus {
    Open,
    Sold,
    Cancelled,
}

text_enum!(ListingStatus, "listing status", {
    Open => "open",
    Sold => "sold",
    Cancelled => "cancelled",
});

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Listing {
    pub id: Uuid,
    pub node_id: Uuid,
    pub seller: String,
    pub price: Amount,
    #[sqlx(try_from = "String")]
    pub status: ListingStatus,
    pub buyer: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Listing {
    pub fn open(node_id: Uuid, seller: impl Into<String>, price: Amount, now: DateTime<Utc>) -> Result<Self, LedgerError> {
        ensure_positive(price)?;
        Ok(Self {
            id: Uuid::new_v4(),
            node_id,
            seller: seller.into(),
            price,
            status: ListingStatus::Open,
            buyer: None,
            created_at: now,
            updated_at: now,
        })
    }

    fn ensure_open(&self) -> Result<(), LedgerError> {
        if self.status != ListingStatus::Open {
            return Err(LedgerError::ListingClosed {
                listing: self.id,
                status: self.status,
            });
        }
        Ok(())
    }

    pub fn sell_to(&mut self, buyer: impl Into<String>, now: DateTime<Utc>) -> Result<(), LedgerError> {
        self.ensure_open()?;
        self.status = ListingStatus::Sold;
        self.buyer = Some(buyer.into());
        self.updated_at = now;
        Ok(())
    }

    pub fn cancel(&mut self, now: DateTime<Utc>) -> Result<(), LedgerError> {
        self.ensure_open()?;
        self.status = ListingStatus::Cancelled;
        self.updated_at = now;
        Ok(())
    }
}

// ------------------------------------------------------------ withdrawals

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum WithdrawalStatus {
    Pending,
    Approved,
    Rejected,
}

text_enum!(WithdrawalStatus, "withdrawal status", {
    Pending => "pending",
    Approved => "approved",
    Rejected => "rejected",
});

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Withdrawal {
    pub id: Uuid,
    pub wallet: String,
    pub amount: Amount,
    #[sqlx(try_from = "String")]
    pub status: WithdrawalStatus,
    pub note: Option<String>,
    pub requested_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

impl Withdrawal {
    pub fn request(wallet: impl Into<String>, amount: Amount, now: DateTime<Utc>) -> Result<Self, LedgerError> {
        ensure_positive(amount)?;
        Ok(Self {
            id: Uuid::new_v4(),
            wallet: wallet.into(),
            amount,
            status: WithdrawalStatus::Pending,
            note: None,
            requested_at: now,
            processed_at: None,
        })
    }

    /// Approves or rejects. Processed withdrawals never change again.
    pub fn process(
        &mut self,
        outcome: WithdrawalStatus,
        note: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<(), LedgerError> {
        if self.status != WithdrawalStatus::Pending || outcome == WithdrawalStatus::Pending {
            return Err(LedgerError::WithdrawalProcessed {
                withdrawal: self.id,
                status: self.status,
            });
        }
        self.status = outcome;
        self.note = note;
        self.processed_at = Some(now);
        Ok(())
    }
}
