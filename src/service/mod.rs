//! Operations behind the HTTP routes and CLI batch jobs.
//!
//! Every function takes the store as `&dyn Store`. Request-scoped
//! operations return [`ApiError`]; the batch jobs in [`teams`] return
//! [`crate::store::StoreError`] since only their read step can fail.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use referral_module::{
    address::parent_reference,
    commission::{CommissionKind, CommissionPlan, Upline},
    WalletAddress,
};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::{
    error::ApiError,
    ledger::{CommissionRecord, Wallet},
    store::Store,
};

pub mod marketplace;
pub mod members;
pub mod nodes;
pub mod teams;
pub mod withdrawals;

pub fn parse_address(raw: &str) -> Result<WalletAddress, ApiError> {
    Ok(WalletAddress::parse(raw)?)
}

pub async fn require_wallet(store: &dyn Store, address: &WalletAddress) -> Result<Wallet, ApiError> {
    store
        .get_wallet(address.as_str())
        .await?
        .ok_or_else(|| ApiError::not_found("wallet", address))
}

/// Walks stored parent pointers upwards, nearest first, stopping at
/// `levels`, a missing parent row or a loop.
pub async fn upline(store: &dyn Store, from: &Wallet, levels: usize) -> Result<Vec<Upline>, ApiError> {
    let mut chain = Vec::with_capacity(levels);
    let mut seen = HashSet::from([from.address.to_ascii_lowercase()]);
    let mut parent = parent_reference(from.parent_wallet.as_deref());
    while chain.len() < levels {
        let Some(address) = parent else { break };
        if !seen.insert(address.as_str().to_string()) {
            tracing::warn!(wallet = %from.address, at = %address, "referral loop in upline walk");
            break;
        }
        let Some(wallet) = store.get_wallet(address.as_str()).await? else {
            break;
        };
        parent = parent_reference(wallet.parent_wallet.as_deref());
        chain.push(Upline {
            address,
            tier: wallet.tier,
        });
    }
    Ok(chain)
}

/// Pays the upline of `source` its share of `amount`: one appended
/// commission record and one wallet credit per payout.
pub async fn distribute(
    store: &dyn Store,
    plan: &CommissionPlan,
    kind: CommissionKind,
    amount: Decimal,
    source: &Wallet,
    node_id: Uuid,
    now: DateTime<Utc>,
) -> Result<Vec<CommissionRecord>, ApiError> {
    let uplines = upline(store, source, plan.rates(kind).len()).await?;
    let mut records = Vec::new();
    for payout in plan.payouts(kind, amount, &uplines) {
        let Some(beneficiary) = store.get_wallet(payout.recipient.as_str()).await? else {
            continue;
        };
        let record = CommissionRecord {
            id: Uuid::new_v4(),
            beneficiary: beneficiary.address.clone(),
            source_wallet: source.address.clone(),
            amount: payout.amount,
            level: i16::from(payout.level),
            transaction_type: kind,
            source_node_id: Some(node_id),
            created_at: now,
        };
        store.append_commission(&record).await?;
        store.credit_commission(&beneficiary.address, payout.amount).await?;
        tracing::info!(
            beneficiary = %record.beneficiary,
            source = %record.source_wallet,
            level = record.level,
            kind = %kind,
            amount = %record.amount,
            "commission credited"
        );
        records.push(record);
    }
    Ok(records)
}

#[cfg(test)]
pub(crate) mod testing {
    use chrono::Utc;
    use referral_module::MembershipTier;
    use rust_decimal::Decimal;

    use crate::{
        ledger::Wallet,
        store::{MemoryStore, Store},
    };

    /// Inserts a wallet with the given parent, balance and tier.
    pub async fn seed(
        store: &MemoryStore,
        address: &str,
        parent: Option<&str>,
        balance: i64,
        tier: MembershipTier,
    ) -> Wallet {
        let mut wallet = Wallet::new(address, parent.map(str::to_string), Utc::now());
        wallet.balance = Decimal::from(balance);
        wallet.tier = tier;
        store.insert_wallet(&wallet).await.unwrap();
        wallet
    }
}
