use chrono::Utc;
use rust_decimal::Decimal;
use uuid::Uuid;

use super::{parse_address, require_wallet};
use crate::{
    error::ApiError,
    ledger::{Amount, LedgerError, Withdrawal, WithdrawalStatus},
    store::Store,
};

async fn pending_total(store: &dyn Store, address: &str) -> Result<Amount, ApiError> {
    Ok(store
        .list_withdrawals(Some(address), Some(WithdrawalStatus::Pending))
        .await?
        .iter()
        .map(|w| w.amount)
        .sum())
}

async fn require_withdrawal(store: &dyn Store, id: Uuid) -> Result<Withdrawal, ApiError> {
    store
        .get_withdrawal(id)
        .await?
        .ok_or_else(|| ApiError::not_found("withdrawal", id))
}

/// Requests a payout of at most the wallet's unreserved earnings.
pub async fn request(store: &dyn Store, address: &str, amount: Decimal) -> Result<Withdrawal, ApiError> {
    let address = parse_address(address)?;
    let wallet = require_wallet(store, &address).await?;
    let pending = pending_total(store, address.as_str()).await?;
    wallet.ensure_can_withdraw(amount, pending)?;
    let withdrawal = Withdrawal::request(address.as_str(), amount, Utc::now())?;
    store.save_withdrawal(&withdrawal).await?;
    tracing::info!(withdrawal = %withdrawal.id, wallet = %address, %amount, "withdrawal requested");
    Ok(withdrawal)
}

/// Persists a processed withdrawal, failing if another admin settled it
/// first.
async fn settle(store: &dyn Store, withdrawal: &Withdrawal) -> Result<(), ApiError> {
    if store.settle_withdrawal(withdrawal).await? {
        return Ok(());
    }
    let current = require_withdrawal(store, withdrawal.id).await?;
    Err(LedgerError::WithdrawalProcessed {
        withdrawal: current.id,
        status: current.status,
    }
    .into())
}

pub async fn approve(store: &dyn Store, id: Uuid, note: Option<String>) -> Result<Withdrawal, ApiError> {
    let mut withdrawal = require_withdrawal(store, id).await?;
    let wallet = require_wallet(store, &parse_address(&withdrawal.wallet)?).await?;
    if withdrawal.status == WithdrawalStatus::Pending {
        // other pending requests do not compete with this one
        wallet.ensure_can_withdraw(withdrawal.amount, Decimal::ZERO)?;
    }
    withdrawal.process(WithdrawalStatus::Approved, note, Utc::now())?;
    settle(store, &withdrawal).await?;
    tracing::info!(withdrawal = %id, wallet = %wallet.address, amount = %withdrawal.amount, "withdrawal approved");
    Ok(withdrawal)
}

pub async fn reject(store: &dyn Store, id: Uuid, note: Option<String>) -> Result<Withdrawal, ApiError> {
    let mut withdrawal = require_withdrawal(store, id).await?;
    withdrawal.process(WithdrawalStatus::Rejected, note, Utc::now())?;
    settle(store, &withdrawal).await?;
    tracing::info!(withdrawal = %id, wallet = %withdrawal.wallet, "withdrawal rejected");
    Ok(withdrawal)
}

pub async fn list(
    store: &dyn Store,
    address: Option<&str>,
    status: Option<WithdrawalStatus>,
) -> Result<Vec<Withdrawal>, ApiError> {
    let address = address.map(parse_address).transpose()?;
    Ok(store
        .list_withdrawals(address.as_ref().map(|a| a.as_str()), status)
        .await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{service::testing::seed, store::MemoryStore};
    use referral_module::MembershipTier;

    async fn funded(earnings: i64) -> MemoryStore {
        let store = MemoryStore::new();
        seed(&store, "0xa", None, 0, MembershipTier::Base).await;
        store
            .credit_commission("0xa", Decimal::from(earnings))
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn requests_cannot_exceed_available() {
        let store = funded(100).await;
        request(&store, "0xa", Decimal::from(60)).await.unwrap();
        assert!(matches!(
            request(&store, "0xa", Decimal::from(50)).await,
            Err(ApiError::BadRequest(_))
        ));
        request(&store, "0xA", Decimal::from(40)).await.unwrap();
        assert!(request(&store, "0xa", Decimal::ZERO).await.is_err());
        assert!(matches!(
            request(&store, "0xnobody", Decimal::ONE).await,
            Err(ApiError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn approval_books_payout_once() {
        let store = funded(100).await;
        let w = request(&store, "0xa", Decimal::from(70)).await.unwrap();
        let approved = approve(&store, w.id, Some("sent".into())).await.unwrap();
        assert_eq!(approved.status, WithdrawalStatus::Approved);
        let wallet = store.get_wallet("0xa").await.unwrap().unwrap();
        assert_eq!(wallet.withdrawn_total, Decimal::from(70));
        assert_eq!(wallet.distributed_commission, Decimal::from(70));
        assert_eq!(wallet.distributable_commission, Decimal::from(30));

        assert!(approve(&store, w.id, None).await.is_err());
        assert!(reject(&store, w.id, None).await.is_err());
        let again = store.get_wallet("0xa").await.unwrap().unwrap();
        assert_eq!(again.withdrawn_total, Decimal::from(70));
    }

    #[tokio::test]
    async fn failed_settlement_books_nothing() {
        let store = funded(100).await;
        let w = request(&store, "0xa", Decimal::from(70)).await.unwrap();

        store.fail_settlements(true);
        assert!(matches!(
            approve(&store, w.id, None).await,
            Err(ApiError::Internal(_))
        ));
        let stored = store.get_withdrawal(w.id).await.unwrap().unwrap();
        assert_eq!(stored.status, WithdrawalStatus::Pending);
        let wallet = store.get_wallet("0xa").await.unwrap().unwrap();
        assert_eq!(wallet.withdrawn_total, Decimal::ZERO);
        assert_eq!(wallet.distributable_commission, Decimal::from(100));

        store.fail_settlements(false);
        approve(&store, w.id, None).await.unwrap();
        assert!(approve(&store, w.id, None).await.is_err());
        let wallet = store.get_wallet("0xa").await.unwrap().unwrap();
        assert_eq!(wallet.withdrawn_total, Decimal::from(70));
    }

    #[tokio::test]
    async fn stale_copy_cannot_settle_twice() {
        let store = funded(100).await;
        let w = request(&store, "0xa", Decimal::from(50)).await.unwrap();
        approve(&store, w.id, None).await.unwrap();

        // a concurrent admin still holding the pending copy
        let mut stale = w.clone();
        stale.process(WithdrawalStatus::Approved, None, Utc::now()).unwrap();
        assert!(matches!(
            settle(&store, &stale).await,
            Err(ApiError::BadRequest(_))
        ));
        let wallet = store.get_wallet("0xa").await.unwrap().unwrap();
        assert_eq!(wallet.withdrawn_total, Decimal::from(50));
    }

    #[tokio::test]
    async fn rejection_releases_reservation() {
        let store = funded(100).await;
        let w = request(&store, "0xa", Decimal::from(100)).await.unwrap();
        assert!(request(&store, "0xa", Decimal::ONE).await.is_err());
        reject(&store, w.id, Some("kyc".into())).await.unwrap();
        request(&store, "0xa", Decimal::from(100)).await.unwrap();

        let pending = list(&store, Some("0xa"), Some(WithdrawalStatus::Pending)).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(list(&store, None, None).await.unwrap().len(), 2);
    }
}
