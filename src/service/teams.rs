//! Batch jobs over the whole referral forest, and per-member team statistics.

use std::collections::HashMap;

use referral_module::{tier::usd_value, ReferralForest};
use rust_decimal::Decimal;
use serde::Serialize;

use super::{parse_address, require_wallet};
use crate::{
    error::ApiError,
    oracle::{PriceOracle, PriceSource},
    store::{Store, StoreError},
};

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TeamSizeUpdate {
    pub address: String,
    pub size: u64,
}

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RecomputeReport {
    pub message: String,
    pub total_wallets: usize,
    pub wallets_with_team: usize,
    /// Wallets with a non-empty team, largest first.
    pub updates: Vec<TeamSizeUpdate>,
    pub failed: usize,
}

/// Recomputes and writes `team_size` for every wallet.
///
/// Writes are independent: a failed write is logged and counted, the rest
/// still land. Rows whose address does not parse count as failed. Only
/// reading the parent links can fail the job.
pub async fn recompute_team_sizes(store: &dyn Store) -> Result<RecomputeReport, StoreError> {
    let links = store.parent_links().await?;
    let forest = ReferralForest::from_links(links);
    for address in forest.rejected() {
        tracing::warn!(%address, "skipping wallet with malformed address");
    }
    for address in forest.self_references() {
        tracing::warn!(%address, "ignoring self-referencing parent");
    }

    let sizes = forest.team_sizes();
    let mut failed = forest.rejected().len();
    let mut updates = Vec::new();
    for entry in &sizes {
        let size = i64::try_from(entry.size).unwrap_or(i64::MAX);
        match store.set_team_size(entry.address.as_str(), size).await {
            Ok(true) => {}
            Ok(false) => {
                failed += 1;
                tracing::warn!(address = %entry.address, "team size not written: no matching row");
                continue;
            }
            Err(err) => {
                failed += 1;
                tracing::warn!(address = %entry.address, error = %err, "team size write failed");
                continue;
            }
        }
        if entry.size > 0 {
            updates.push(TeamSizeUpdate {
                address: entry.address.to_string(),
                size: entry.size,
            });
        }
    }
    updates.sort_by(|a, b| b.size.cmp(&a.size).then_with(|| a.address.cmp(&b.address)));

    let total_wallets = sizes.len() + forest.rejected().len();
    let written = total_wallets - failed;
    tracing::info!(total = total_wallets, written, failed, "team sizes recomputed");
    Ok(RecomputeReport {
        message: format!("Updated team sizes for {written} wallets"),
        total_wallets,
        wallets_with_team: sizes.iter().filter(|s| s.size > 0).count(),
        updates,
        failed,
    })
}

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct HierarchyReport {
    pub message: String,
    pub edges: usize,
    pub max_depth: u32,
}

/// Replaces the materialized hierarchy edges with a fresh derivation.
pub async fn rebuild_hierarchy(store: &dyn Store) -> Result<HierarchyReport, StoreError> {
    let forest = ReferralForest::from_links(store.parent_links().await?);
    let edges = forest.hierarchy_edges();
    store.replace_hierarchy_edges(&edges).await?;
    let max_depth = edges.iter().map(|e| e.depth).max().unwrap_or(0);
    tracing::info!(edges = edges.len(), max_depth, "hierarchy rebuilt");
    Ok(HierarchyReport {
        message: format!("Rebuilt {} hierarchy edges", edges.len()),
        edges: edges.len(),
        max_depth,
    })
}

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TeamLevel {
    pub depth: u32,
    pub members: u64,
    pub balance: Decimal,
    pub usd_value: Decimal,
}

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TeamStats {
    pub address: String,
    pub max_depth: u32,
    pub price: Decimal,
    pub price_source: PriceSource,
    pub total_members: u64,
    pub levels: Vec<TeamLevel>,
}

/// Downline of `address` grouped by depth. `requested_depth` is clamped to
/// `1..=depth_cap`; `None` means `depth_cap`.
pub async fn team_stats(
    store: &dyn Store,
    oracle: &dyn PriceOracle,
    address: &str,
    requested_depth: Option<u32>,
    depth_cap: u32,
) -> Result<TeamStats, ApiError> {
    let address = parse_address(address)?;
    require_wallet(store, &address).await?;
    let max_depth = requested_depth.unwrap_or(depth_cap).clamp(1, depth_cap.max(1));

    let wallets = store.list_wallets().await?;
    let balances: HashMap<String, Decimal> = wallets
        .iter()
        .map(|w| (w.address.to_ascii_lowercase(), w.balance))
        .collect();
    let forest = ReferralForest::from_links(store.parent_links().await?);
    let quote = oracle.spot_price().await;

    let levels: Vec<TeamLevel> = forest
        .team_levels(address.as_str(), max_depth, |member| {
            balances.get(member.as_str()).copied().unwrap_or_default()
        })
        .into_iter()
        .map(|level| TeamLevel {
            depth: level.depth,
            members: level.members,
            usd_value: usd_value(level.balance, quote.price),
            balance: level.balance,
        })
        .collect();

    Ok(TeamStats {
        address: address.to_string(),
        max_depth,
        price: quote.price,
        price_source: quote.source,
        total_members: levels.iter().map(|l| l.members).sum(),
        levels,
    })
}
