use chrono::{DateTime, Utc};
use referral_module::{
    earnings::{rollup, CommissionCredit, EarningsBreakdown},
    tier::derive_tier,
    MembershipTier, ReferralForest, TierThresholds, WalletAddress,
};
use rust_decimal::Decimal;
use serde::Serialize;

use super::{parse_address, require_wallet};
use crate::{
    error::ApiError,
    ledger::{LedgerError, Wallet},
    oracle::{PriceOracle, PriceSource},
    store::{Store, StoreError, TimeWindow},
};

/// Parses an optional referrer. Blank and sentinel values mean "no parent";
/// anything else must be a well-formed address.
fn referrer_address(raw: Option<&str>) -> Result<Option<WalletAddress>, ApiError> {
    match raw.map(str::trim).filter(|r| !r.is_empty()) {
        None => Ok(None),
        Some(raw) => {
            let address = parse_address(raw)?;
            Ok((!address.is_sentinel()).then_some(address))
        }
    }
}

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Connected {
    pub wallet: Wallet,
    pub created: bool,
}

/// Registers the wallet on first connect. Reconnecting returns the stored
/// wallet untouched, whatever referrer is supplied.
pub async fn connect_wallet(
    store: &dyn Store,
    address: &str,
    referrer: Option<&str>,
) -> Result<Connected, ApiError> {
    let address = parse_address(address)?;
    if let Some(wallet) = store.get_wallet(address.as_str()).await? {
        return Ok(Connected {
            wallet,
            created: false,
        });
    }

    let parent = match referrer_address(referrer)? {
        Some(parent) if parent == address => {
            return Err(LedgerError::SelfReferral(address.to_string()).into());
        }
        Some(parent) => {
            require_wallet(store, &parent).await?;
            Some(parent.to_string())
        }
        None => None,
    };

    let wallet = Wallet::new(address.as_str(), parent, Utc::now());
    match store.insert_wallet(&wallet).await {
        Ok(()) => {
            tracing::info!(wallet = %wallet.address, parent = ?wallet.parent_wallet, "wallet registered");
            Ok(Connected {
                wallet,
                created: true,
            })
        }
        Err(StoreError::Duplicate { .. }) => Ok(Connected {
            wallet: require_wallet(store, &address).await?,
            created: false,
        }),
        Err(err) => Err(err.into()),
    }
}

pub async fn get_wallet(store: &dyn Store, address: &str) -> Result<Wallet, ApiError> {
    require_wallet(store, &parse_address(address)?).await
}

/// Admin re-parenting. `parent = None` (or a sentinel) detaches the wallet.
pub async fn set_parent(store: &dyn Store, address: &str, parent: Option<&str>) -> Result<Wallet, ApiError> {
    let address = parse_address(address)?;
    let mut wallet = require_wallet(store, &address).await?;
    let parent = referrer_address(parent)?;

    if let Some(parent) = &parent {
        if *parent == address {
            return Err(LedgerError::SelfReferral(address.to_string()).into());
        }
        require_wallet(store, parent).await?;
        let forest = ReferralForest::from_links(store.parent_links().await?);
        if forest.creates_cycle(&address, parent) {
            return Err(LedgerError::ReferralCycle {
                wallet: address.to_string(),
                parent: parent.to_string(),
            }
            .into());
        }
    }

    let previous = wallet.parent_wallet.take();
    wallet.parent_wallet = parent.map(String::from);
    store
        .set_parent(&wallet.address, wallet.parent_wallet.as_deref())
        .await?;
    tracing::info!(
        wallet = %wallet.address,
        from = ?previous,
        to = ?wallet.parent_wallet,
        "wallet re-parented"
    );
    Ok(wallet)
}

pub async fn direct_referrals(store: &dyn Store, address: &str) -> Result<Vec<Wallet>, ApiError> {
    let address = parse_address(address)?;
    require_wallet(store, &address).await?;
    Ok(store.direct_referrals(address.as_str()).await?)
}

pub async fn list_wallets(store: &dyn Store) -> Result<Vec<Wallet>, ApiError> {
    Ok(store.list_wallets().await?)
}

async fn breakdown(store: &dyn Store, address: &str, window: TimeWindow) -> Result<EarningsBreakdown, StoreError> {
    let records = store.commissions_for(address, window).await?;
    let nodes = store.list_nodes(Some(address)).await?;
    let credits = records.iter().map(|record| CommissionCredit {
        level: u8::try_from(record.level).unwrap_or(0),
        kind: record.transaction_type,
        amount: record.amount,
    });
    Ok(rollup(credits, nodes.iter().map(|node| node.earnings)))
}

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct EarningsSummary {
    pub address: String,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub breakdown: EarningsBreakdown,
}

/// Commission records are filtered by `window`; node income is cumulative.
pub async fn earnings_summary(store: &dyn Store, address: &str, window: TimeWindow) -> Result<EarningsSummary, ApiError> {
    let address = parse_address(address)?;
    require_wallet(store, &address).await?;
    if let (Some(from), Some(to)) = (window.from, window.to) {
        if from > to {
            return Err(ApiError::BadRequest("`from` must not be after `to`".into()));
        }
    }
    Ok(EarningsSummary {
        address: address.to_string(),
        from: window.from,
        to: window.to,
        breakdown: breakdown(store, address.as_str(), window).await?,
    })
}

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MemberProfile {
    pub address: String,
    pub parent_wallet: Option<String>,
    pub balance: Decimal,
    pub price: Decimal,
    pub price_source: PriceSource,
    pub usd_value: Decimal,
    pub tier: MembershipTier,
    pub commission_depth: u8,
    pub direct_referrals: usize,
    pub total_referrals: i64,
    pub earnings: EarningsBreakdown,
    pub created_at: DateTime<Utc>,
}

/// Re-derives the tier from the current price and stores it if it moved.
async fn refresh_tier(
    store: &dyn Store,
    wallet: &mut Wallet,
    price: Decimal,
    thresholds: &TierThresholds,
) -> Result<Decimal, StoreError> {
    let assessment = derive_tier(wallet.balance, price, thresholds);
    if assessment.tier != wallet.tier {
        tracing::info!(wallet = %wallet.address, from = %wallet.tier, to = %assessment.tier, "tier changed");
        wallet.tier = assessment.tier;
        store.set_tier(&wallet.address, wallet.tier).await?;
    }
    Ok(assessment.usd_value)
}

pub async fn member_profile(
    store: &dyn Store,
    oracle: &dyn PriceOracle,
    thresholds: &TierThresholds,
    address: &str,
) -> Result<MemberProfile, ApiError> {
    let address = parse_address(address)?;
    let mut wallet = require_wallet(store, &address).await?;
    let quote = oracle.spot_price().await;
    let usd_value = refresh_tier(store, &mut wallet, quote.price, thresholds).await?;
    let direct = store.direct_referrals(address.as_str()).await?;
    let earnings = breakdown(store, address.as_str(), TimeWindow::default()).await?;

    Ok(MemberProfile {
        address: wallet.address,
        parent_wallet: wallet.parent_wallet,
        balance: wallet.balance,
        price: quote.price,
        price_source: quote.source,
        usd_value,
        tier: wallet.tier,
        commission_depth: wallet.tier.commission_depth(),
        direct_referrals: direct.len(),
        total_referrals: wallet.team_size,
        earnings,
        created_at: wallet.created_at,
    })
}

/// Admin balance sync from the chain; the tier follows the new balance.
pub async fn set_balance(
    store: &dyn Store,
    oracle: &dyn PriceOracle,
    thresholds: &TierThresholds,
    address: &str,
    balance: Decimal,
) -> Result<Wallet, ApiError> {
    if balance.is_sign_negative() {
        return Err(ApiError::BadRequest("balance must not be negative".into()));
    }
    let address = parse_address(address)?;
    require_wallet(store, &address).await?;
    let quote = oracle.spot_price().await;
    let assessment = derive_tier(balance, quote.price, thresholds);
    store
        .set_balance(address.as_str(), balance, assessment.tier)
        .await?;
    let wallet = require_wallet(store, &address).await?;
    tracing::info!(wallet = %wallet.address, %balance, tier = %wallet.tier, "balance synced");
    Ok(wallet)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        ledger::{CommissionRecord, Node, NodeStatus, NodeType},
        oracle::FixedPrice,
        service::testing::seed,
        store::MemoryStore,
    };
    use chrono::Duration;
    use referral_module::{address::NULL_ADDRESS, commission::CommissionKind};
    use uuid::Uuid;

    #[tokio::test]
    async fn connect_registers_once() {
        let store = MemoryStore::new();
        seed(&store, "0xref", None, 0, MembershipTier::Base).await;
        let first = connect_wallet(&store, " 0xNEW ", Some("0xREF")).await.unwrap();
        assert!(first.created);
        assert_eq!(first.wallet.address, "0xnew");
        assert_eq!(first.wallet.parent_wallet.as_deref(), Some("0xref"));

        let again = connect_wallet(&store, "0xnew", None).await.unwrap();
        assert!(!again.created);
        assert_eq!(again.wallet.parent_wallet.as_deref(), Some("0xref"));
    }

    #[tokio::test]
    async fn connect_validates_referrer() {
        let store = MemoryStore::new();
        assert!(matches!(
            connect_wallet(&store, "0xa", Some("0xmissing")).await,
            Err(ApiError::NotFound(_))
        ));
        assert!(matches!(
            connect_wallet(&store, "0xa", Some("0xA")).await,
            Err(ApiError::BadRequest(_))
        ));
        assert!(matches!(
            connect_wallet(&store, "not valid", None).await,
            Err(ApiError::BadRequest(_))
        ));
        let root = connect_wallet(&store, "0xa", Some(NULL_ADDRESS)).await.unwrap();
        assert_eq!(root.wallet.parent_wallet, None);
    }

    #[tokio::test]
    async fn set_parent_rejects_cycles() {
        let store = MemoryStore::new();
        seed(&store, "0xa", None, 0, MembershipTier::Base).await;
        seed(&store, "0xb", Some("0xa"), 0, MembershipTier::Base).await;
        seed(&store, "0xc", Some("0xb"), 0, MembershipTier::Base).await;

        assert!(matches!(
            set_parent(&store, "0xa", Some("0xc")).await,
            Err(ApiError::BadRequest(_))
        ));
        assert!(matches!(
            set_parent(&store, "0xa", Some("0xa")).await,
            Err(ApiError::BadRequest(_))
        ));
        let moved = set_parent(&store, "0xc", Some("0xa")).await.unwrap();
        assert_eq!(moved.parent_wallet.as_deref(), Some("0xa"));
        let detached = set_parent(&store, "0xc", None).await.unwrap();
        assert_eq!(detached.parent_wallet, None);
    }

    #[tokio::test]
    async fn earnings_split_team_and_node_income() {
        let store = MemoryStore::new();
        seed(&store, "0xa", None, 0, MembershipTier::Base).await;
        let t0 = Utc::now();
        for (amount, level, kind, at) in [
            (100, 1, CommissionKind::ReferralCommission, t0),
            (50, 2, CommissionKind::EarningsShare, t0 + Duration::hours(2)),
        ] {
            store
                .append_commission(&CommissionRecord {
                    id: Uuid::new_v4(),
                    beneficiary: "0xa".into(),
                    source_wallet: "0xb".into(),
                    amount: Decimal::from(amount),
                    level,
                    transaction_type: kind,
                    source_node_id: None,
                    created_at: at,
                })
                .await
                .unwrap();
        }
        let mut node = Node::purchased("0xa", NodeType::Cloud, Decimal::from(10), None, t0);
        node.status = NodeStatus::Running;
        node.earnings = Decimal::from(50);
        store.save_node(&node).await.unwrap();

        let all = earnings_summary(&store, "0xa", TimeWindow::default()).await.unwrap();
        assert_eq!(all.breakdown.total, Decimal::from(200));
        assert_eq!(all.breakdown.team_percent, Decimal::new(7500, 2));
        assert_eq!(all.breakdown.node_percent, Decimal::new(2500, 2));
        assert_eq!(all.breakdown.commission_income, Decimal::from(100));
        assert_eq!(all.breakdown.level_two, Decimal::from(50));

        let window = TimeWindow {
            from: Some(t0 + Duration::hours(1)),
            to: None,
        };
        let recent = earnings_summary(&store, "0xa", window).await.unwrap();
        assert_eq!(recent.breakdown.team_rewards, Decimal::from(50));
        assert_eq!(recent.breakdown.node_income, Decimal::from(50));

        let backwards = TimeWindow {
            from: Some(t0),
            to: Some(t0 - Duration::hours(1)),
        };
        assert!(earnings_summary(&store, "0xa", backwards).await.is_err());
    }

    #[tokio::test]
    async fn profile_refreshes_tier() {
        let store = MemoryStore::new();
        seed(&store, "0xa", None, 1_000_000, MembershipTier::Base).await;
        seed(&store, "0xb", Some("0xa"), 0, MembershipTier::Base).await;
        let thresholds = TierThresholds::default();

        let cheap = FixedPrice(crate::oracle::PriceQuote::fallback(Decimal::new(1, 5)));
        let profile = member_profile(&store, &cheap, &thresholds, "0xa").await.unwrap();
        assert_eq!(profile.usd_value, Decimal::from(10));
        assert_eq!(profile.tier, MembershipTier::Base);
        assert_eq!(profile.price_source, PriceSource::Fallback);
        assert_eq!(profile.direct_referrals, 1);

        let dear = FixedPrice::live(Decimal::new(1, 2));
        let profile = member_profile(&store, &dear, &thresholds, "0xa").await.unwrap();
        assert_eq!(profile.usd_value, Decimal::from(10_000));
        assert_eq!(profile.tier, MembershipTier::Top);
        assert_eq!(profile.commission_depth, 2);
        let stored = store.get_wallet("0xa").await.unwrap().unwrap();
        assert_eq!(stored.tier, MembershipTier::Top);
    }

    #[tokio::test]
    async fn balance_sync_moves_tier() {
        let store = MemoryStore::new();
        seed(&store, "0xa", None, 0, MembershipTier::Base).await;
        let oracle = FixedPrice::live(Decimal::new(1, 2));
        let thresholds = TierThresholds::default();
        let wallet = set_balance(&store, &oracle, &thresholds, "0xa", Decimal::from(300_000))
            .await
            .unwrap();
        assert_eq!(wallet.tier, MembershipTier::Mid);
        assert!(set_balance(&store, &oracle, &thresholds, "0xa", Decimal::from(-1))
            .await
            .is_err());
    }
}
