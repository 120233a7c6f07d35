//! Data access behind a trait so services never touch a global handle.
//!
//! [`memory::MemoryStore`] backs tests and database-less runs,
//! [`postgres::PgStore`] backs production.
//!
//! Wallet addresses match case-insensitively everywhere. Wallet counters
//! are only changed through the targeted operations below, never by
//! writing back a whole row.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use referral_module::{
    forest::{HierarchyEdge, ParentLink},
    MembershipTier,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::ledger::{
    Amount, CommissionRecord, Listing, ListingStatus, Node, Wallet, Withdrawal, WithdrawalStatus,
};

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("{entity} {key} already exists")]
    Duplicate { entity: &'static str, key: String },
    #[error("corrupt {entity} row: {reason}")]
    Corrupt { entity: &'static str, reason: String },
    #[error("write rejected for {0}")]
    Rejected(String),
}

/// Half-open `[from, to)` filter on record timestamps.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct TimeWindow {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

impl TimeWindow {
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.from.map_or(true, |from| at >= from) && self.to.map_or(true, |to| at < to)
    }
}

#[async_trait]
pub trait Store: Send + Sync {
    async fn get_wallet(&self, address: &str) -> Result<Option<Wallet>, StoreError>;

    /// Fails with [`StoreError::Duplicate`] when the address exists.
    async fn insert_wallet(&self, wallet: &Wallet) -> Result<(), StoreError>;

    async fn list_wallets(&self) -> Result<Vec<Wallet>, StoreError>;

    async fn parent_links(&self) -> Result<Vec<ParentLink>, StoreError>;

    /// The `set_*` and `credit_*` operations return false when no wallet
    /// has that address.
    async fn set_team_size(&self, address: &str, size: i64) -> Result<bool, StoreError>;

    async fn set_parent(&self, address: &str, parent: Option<&str>) -> Result<bool, StoreError>;

    async fn set_tier(&self, address: &str, tier: MembershipTier) -> Result<bool, StoreError>;

    async fn set_balance(
        &self,
        address: &str,
        balance: Amount,
        tier: MembershipTier,
    ) -> Result<bool, StoreError>;

    /// Adds to cumulative earnings and distributable commission.
    async fn credit_commission(&self, address: &str, amount: Amount) -> Result<bool, StoreError>;

    async fn credit_node_income(&self, address: &str, amount: Amount) -> Result<bool, StoreError>;

    async fn direct_referrals(&self, address: &str) -> Result<Vec<Wallet>, StoreError>;

    async fn replace_hierarchy_edges(&self, edges: &[HierarchyEdge]) -> Result<(), StoreError>;

    async fn hierarchy_edges(&self) -> Result<Vec<HierarchyEdge>, StoreError>;

    async fn append_commission(&self, record: &CommissionRecord) -> Result<(), StoreError>;

    async fn commissions_for(
        &self,
        beneficiary: &str,
        window: TimeWindow,
    ) -> Result<Vec<CommissionRecord>, StoreError>;

    async fn get_node(&self, id: Uuid) -> Result<Option<Node>, StoreError>;

    async fn save_node(&self, node: &Node) -> Result<(), StoreError>;

    async fn list_nodes(&self, owner: Option<&str>) -> Result<Vec<Node>, StoreError>;

    async fn get_listing(&self, id: Uuid) -> Result<Option<Listing>, StoreError>;

    async fn save_listing(&self, listing: &Listing) -> Result<(), StoreError>;

    async fn list_listings(&self, status: Option<ListingStatus>) -> Result<Vec<Listing>, StoreError>;

    async fn get_withdrawal(&self, id: Uuid) -> Result<Option<Withdrawal>, StoreError>;

    async fn save_withdrawal(&self, withdrawal: &Withdrawal) -> Result<(), StoreError>;

    /// Stores a processed withdrawal and, when approved, books the payout
    /// on its wallet, as one atomic step. Returns false, changing nothing,
    /// when the stored withdrawal is no longer pending.
    async fn settle_withdrawal(&self, withdrawal: &Withdrawal) -> Result<bool, StoreError>;

    async fn list_withdrawals(
        &self,
        wallet: Option<&str>,
        status: Option<WithdrawalStatus>,
    ) -> Result<Vec<Withdrawal>, StoreError>;
}
