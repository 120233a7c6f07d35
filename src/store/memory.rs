#[cfg(test)]
use std::collections::HashSet;
use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use parking_lot::RwLock;
use referral_module::{
    forest::{HierarchyEdge, ParentLink},
    MembershipTier,
};
use uuid::Uuid;

use super::{Store, StoreError, TimeWindow};
use crate::ledger::{
    Amount, CommissionRecord, Listing, ListingStatus, Node, Wallet, Withdrawal, WithdrawalStatus,
};

fn key(address: &str) -> String {
    address.trim().to_ascii_lowercase()
}

fn same(stored: &str, address: &str) -> bool {
    stored.trim().eq_ignore_ascii_case(address.trim())
}

#[derive(Default)]
struct Tables {
    wallets: BTreeMap<String, Wallet>,
    edges: Vec<HierarchyEdge>,
    commissions: Vec<CommissionRecord>,
    nodes: HashMap<Uuid, Node>,
    listings: HashMap<Uuid, Listing>,
    withdrawals: HashMap<Uuid, Withdrawal>,
    #[cfg(test)]
    failing_team_writes: HashSet<String>,
    #[cfg(test)]
    failing_settlements: bool,
}

impl Tables {
    fn wallet_mut(&mut self, address: &str) -> Option<&mut Wallet> {
        self.wallets.get_mut(&key(address))
    }
}

/// Process-local store. Wallets are keyed by their trimmed, lowercased
/// address; rows keep the address as inserted.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every later `set_team_size` for `address` fail.
    #[cfg(test)]
    pub fn fail_team_size_writes(&self, address: &str) {
        self.tables.write().failing_team_writes.insert(key(address));
    }

    /// Makes every later `settle_withdrawal` fail before writing.
    #[cfg(test)]
    pub fn fail_settlements(&self, fail: bool) {
        self.tables.write().failing_settlements = fail;
    }

    fn update_wallet(&self, address: &str, apply: impl FnOnce(&mut Wallet)) -> bool {
        match self.tables.write().wallet_mut(address) {
            Some(wallet) => {
                apply(wallet);
                true
            }
            None => false,
        }
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get_wallet(&self, address: &str) -> Result<Option<Wallet>, StoreError> {
        Ok(self.tables.read().wallets.get(&key(address)).cloned())
    }

    async fn insert_wallet(&self, wallet: &Wallet) -> Result<(), StoreError> {
        let mut tables = self.tables.write();
        let key = key(&wallet.address);
        if tables.wallets.contains_key(&key) {
            return Err(StoreError::Duplicate {
                entity: "wallet",
                key: wallet.address.clone(),
            });
        }
        tables.wallets.insert(key, wallet.clone());
        Ok(())
    }

    async fn list_wallets(&self) -> Result<Vec<Wallet>, StoreError> {
        Ok(self.tables.read().wallets.values().cloned().collect())
    }

    async fn parent_links(&self) -> Result<Vec<ParentLink>, StoreError> {
        Ok(self
            .tables
            .read()
            .wallets
            .values()
            .map(|w| ParentLink::new(w.address.clone(), w.parent_wallet.as_deref()))
            .collect())
    }

    async fn set_team_size(&self, address: &str, size: i64) -> Result<bool, StoreError> {
        #[cfg(test)]
        if self.tables.read().failing_team_writes.contains(&key(address)) {
            return Err(StoreError::Rejected(address.to_string()));
        }
        Ok(self.update_wallet(address, |wallet| wallet.team_size = size))
    }

    async fn set_parent(&self, address: &str, parent: Option<&str>) -> Result<bool, StoreError> {
        Ok(self.update_wallet(address, |wallet| {
            wallet.parent_wallet = parent.map(str::to_string)
        }))
    }

    async fn set_tier(&self, address: &str, tier: MembershipTier) -> Result<bool, StoreError> {
        Ok(self.update_wallet(address, |wallet| wallet.tier = tier))
    }

    async fn set_balance(
        &self,
        address: &str,
        balance: Amount,
        tier: MembershipTier,
    ) -> Result<bool, StoreError> {
        Ok(self.update_wallet(address, |wallet| {
            wallet.balance = balance;
            wallet.tier = tier;
        }))
    }

    async fn credit_commission(&self, address: &str, amount: Amount) -> Result<bool, StoreError> {
        Ok(self.update_wallet(address, |wallet| wallet.credit_commission(amount)))
    }

    async fn credit_node_income(&self, address: &str, amount: Amount) -> Result<bool, StoreError> {
        Ok(self.update_wallet(address, |wallet| wallet.credit_node_income(amount)))
    }

    async fn direct_referrals(&self, address: &str) -> Result<Vec<Wallet>, StoreError> {
        Ok(self
            .tables
            .read()
            .wallets
            .values()
            .filter(|w| w.parent_wallet.as_deref().is_some_and(|p| same(p, address)))
            .cloned()
            .collect())
    }

    async fn replace_hierarchy_edges(&self, edges: &[HierarchyEdge]) -> Result<(), StoreError> {
        self.tables.write().edges = edges.to_vec();
        Ok(())
    }

    async fn hierarchy_edges(&self) -> Result<Vec<HierarchyEdge>, StoreError> {
        Ok(self.tables.read().edges.clone())
    }

    async fn append_commission(&self, record: &CommissionRecord) -> Result<(), StoreError> {
        let mut tables = self.tables.write();
        if tables.commissions.iter().any(|c| c.id == record.id) {
            return Err(StoreError::Duplicate {
                entity: "commission",
                key: record.id.to_string(),
            });
        }
        tables.commissions.push(record.clone());
        Ok(())
    }

    async fn commissions_for(
        &self,
        beneficiary: &str,
        window: TimeWindow,
    ) -> Result<Vec<CommissionRecord>, StoreError> {
        Ok(self
            .tables
            .read()
            .commissions
            .iter()
            .filter(|c| same(&c.beneficiary, beneficiary) && window.contains(c.created_at))
            .cloned()
            .collect())
    }

    async fn get_node(&self, id: Uuid) -> Result<Option<Node>, StoreError> {
        Ok(self.tables.read().nodes.get(&id).cloned())
    }

    async fn save_node(&self, node: &Node) -> Result<(), StoreError> {
        self.tables.write().nodes.insert(node.id, node.clone());
        Ok(())
    }

    async fn list_nodes(&self, owner: Option<&str>) -> Result<Vec<Node>, StoreError> {
        let mut nodes: Vec<Node> = self
            .tables
            .read()
            .nodes
            .values()
            .filter(|n| owner.map_or(true, |o| same(&n.owner, o)))
            .cloned()
            .collect();
        nodes.sort_by(|a, b| (a.created_at, a.id).cmp(&(b.created_at, b.id)));
        Ok(nodes)
    }

    async fn get_listing(&self, id: Uuid) -> Result<Option<Listing>, StoreError> {
        Ok(self.tables.read().listings.get(&id).cloned())
    }

    async fn save_listing(&self, listing: &Listing) -> Result<(), StoreError> {
        self.tables
            .write()
            .listings
            .insert(listing.id, listing.clone());
        Ok(())
    }

    async fn list_listings(&self, status: Option<ListingStatus>) -> Result<Vec<Listing>, StoreError> {
        let mut listings: Vec<Listing> = self
            .tables
            .read()
            .listings
            .values()
            .filter(|l| status.map_or(true, |s| l.status == s))
            .cloned()
            .collect();
        listings.sort_by(|a, b| (a.created_at, a.id).cmp(&(b.created_at, b.id)));
        Ok(listings)
    }

    async fn get_withdrawal(&self, id: Uuid) -> Result<Option<Withdrawal>, StoreError> {
        Ok(self.tables.read().withdrawals.get(&id).cloned())
    }

    async fn save_withdrawal(&self, withdrawal: &Withdrawal) -> Result<(), StoreError> {
        self.tables
            .write()
            .withdrawals
            .insert(withdrawal.id, withdrawal.clone());
        Ok(())
    }

    async fn settle_withdrawal(&self, withdrawal: &Withdrawal) -> Result<bool, StoreError> {
        let mut tables = self.tables.write();
        #[cfg(test)]
        if tables.failing_settlements {
            return Err(StoreError::Rejected(withdrawal.id.to_string()));
        }
        let still_pending = tables
            .withdrawals
            .get(&withdrawal.id)
            .is_some_and(|stored| stored.status == WithdrawalStatus::Pending);
        if !still_pending {
            return Ok(false);
        }
        if withdrawal.status == WithdrawalStatus::Approved {
            if let Some(wallet) = tables.wallet_mut(&withdrawal.wallet) {
                wallet.record_payout(withdrawal.amount);
            }
        }
        tables.withdrawals.insert(withdrawal.id, withdrawal.clone());
        Ok(true)
    }

    async fn list_withdrawals(
        &self,
        wallet: Option<&str>,
        status: Option<WithdrawalStatus>,
    ) -> Result<Vec<Withdrawal>, StoreError> {
        let mut withdrawals: Vec<Withdrawal> = self
            .tables
            .read()
            .withdrawals
            .values()
            .filter(|w| wallet.map_or(true, |a| same(&w.wallet, a)))
            .filter(|w| status.map_or(true, |s| w.status == s))
            .cloned()
            .collect();
        withdrawals.sort_by(|a, b| (a.requested_at, a.id).cmp(&(b.requested_at, b.id)));
        Ok(withdrawals)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use referral_module::commission::CommissionKind;
    use rust_decimal::Decimal;

    fn commission(beneficiary: &str, at: chrono::DateTime<Utc>) -> CommissionRecord {
        CommissionRecord {
            id: Uuid::new_v4(),
            beneficiary: beneficiary.into(),
            source_wallet: "0xsrc".into(),
            amount: Decimal::ONE,
            level: 1,
            transaction_type: CommissionKind::ReferralCommission,
            source_node_id: None,
            created_at: at,
        }
    }

    #[tokio::test]
    async fn wallet_insert_rejects_duplicates() {
        let store = MemoryStore::new();
        let wallet = Wallet::new("0xa", None, Utc::now());
        store.insert_wallet(&wallet).await.unwrap();
        assert!(matches!(
            store.insert_wallet(&wallet).await,
            Err(StoreError::Duplicate { .. })
        ));
        assert_eq!(store.list_wallets().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn team_size_writes_can_fail_independently() {
        let store = MemoryStore::new();
        store.insert_wallet(&Wallet::new("0xa", None, Utc::now())).await.unwrap();
        store.insert_wallet(&Wallet::new("0xb", None, Utc::now())).await.unwrap();
        store.fail_team_size_writes("0xb");
        assert!(store.set_team_size("0xa", 4).await.unwrap());
        assert!(store.set_team_size("0xb", 4).await.is_err());
        assert!(!store.set_team_size("0xmissing", 4).await.unwrap());
        assert_eq!(store.get_wallet("0xa").await.unwrap().unwrap().team_size, 4);
    }

    #[tokio::test]
    async fn commission_window_is_half_open() {
        let store = MemoryStore::new();
        let t0 = Utc::now();
        store.append_commission(&commission("0xa", t0)).await.unwrap();
        store
            .append_commission(&commission("0xa", t0 + Duration::hours(1)))
            .await
            .unwrap();
        store.append_commission(&commission("0xb", t0)).await.unwrap();

        let all = store.commissions_for("0xa", TimeWindow::default()).await.unwrap();
        assert_eq!(all.len(), 2);
        let window = TimeWindow {
            from: Some(t0),
            to: Some(t0 + Duration::hours(1)),
        };
        assert_eq!(store.commissions_for("0xa", window).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn addresses_match_regardless_of_case() {
        let store = MemoryStore::new();
        let now = Utc::now();
        store.insert_wallet(&Wallet::new("0xAAA", None, now)).await.unwrap();
        store
            .insert_wallet(&Wallet::new("0xBBB", Some("0xAAA".into()), now))
            .await
            .unwrap();
        assert!(matches!(
            store.insert_wallet(&Wallet::new("0xaaa", None, now)).await,
            Err(StoreError::Duplicate { .. })
        ));

        let stored = store.get_wallet("0xaaa").await.unwrap().unwrap();
        assert_eq!(stored.address, "0xAAA");
        assert_eq!(store.direct_referrals("0xaaa").await.unwrap().len(), 1);
        assert!(store.set_team_size("0xaaa", 1).await.unwrap());
        assert!(store.credit_commission("0xbbb", Decimal::TEN).await.unwrap());
        let bbb = store.get_wallet("0xBbB").await.unwrap().unwrap();
        assert_eq!(bbb.distributable_commission, Decimal::TEN);
        assert_eq!(store.get_wallet("0xAAA").await.unwrap().unwrap().team_size, 1);

        store.append_commission(&commission("0xBBB", now)).await.unwrap();
        let found = store.commissions_for("0xbbb", TimeWindow::default()).await.unwrap();
        assert_eq!(found.len(), 1);
    }

    #[tokio::test]
    async fn counter_updates_accumulate() {
        let store = MemoryStore::new();
        store.insert_wallet(&Wallet::new("0xa", None, Utc::now())).await.unwrap();
        store.credit_commission("0xa", Decimal::from(30)).await.unwrap();
        store.credit_commission("0xa", Decimal::from(20)).await.unwrap();
        store.credit_node_income("0xa", Decimal::from(5)).await.unwrap();
        store
            .set_balance("0xa", Decimal::from(7), MembershipTier::Mid)
            .await
            .unwrap();
        let wallet = store.get_wallet("0xa").await.unwrap().unwrap();
        assert_eq!(wallet.distributable_commission, Decimal::from(50));
        assert_eq!(wallet.total_earnings, Decimal::from(55));
        assert_eq!(wallet.balance, Decimal::from(7));
        assert_eq!(wallet.tier, MembershipTier::Mid);
        assert!(!store.credit_commission("0xnobody", Decimal::ONE).await.unwrap());
    }

    #[tokio::test]
    async fn settlement_only_applies_to_pending_withdrawals() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let mut wallet = Wallet::new("0xa", None, now);
        wallet.credit_commission(Decimal::from(100));
        store.insert_wallet(&wallet).await.unwrap();
        let pending = Withdrawal::request("0xA", Decimal::from(40), now).unwrap();
        store.save_withdrawal(&pending).await.unwrap();

        let mut approved = pending.clone();
        approved.process(WithdrawalStatus::Approved, None, now).unwrap();
        assert!(store.settle_withdrawal(&approved).await.unwrap());
        assert!(!store.settle_withdrawal(&approved).await.unwrap());

        let wallet = store.get_wallet("0xa").await.unwrap().unwrap();
        assert_eq!(wallet.withdrawn_total, Decimal::from(40));
        assert_eq!(wallet.distributable_commission, Decimal::from(60));
        let stored = store.get_withdrawal(pending.id).await.unwrap().unwrap();
        assert_eq!(stored.status, WithdrawalStatus::Approved);
    }

    #[tokio::test]
    async fn direct_referrals_match_parent() {
        let store = MemoryStore::new();
        let now = Utc::now();
        store.insert_wallet(&Wallet::new("0xa", None, now)).await.unwrap();
        store
            .insert_wallet(&Wallet::new("0xb", Some("0xa".into()), now))
            .await
            .unwrap();
        store
            .insert_wallet(&Wallet::new("0xc", Some("0xb".into()), now))
            .await
            .unwrap();
        let direct = store.direct_referrals("0xa").await.unwrap();
        assert_eq!(direct.len(), 1);
        assert_eq!(direct[0].address, "0xb");
        assert_eq!(store.parent_links().await.unwrap().len(), 3);
    }
}
