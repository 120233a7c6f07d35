use chrono::Utc;
use referral_module::commission::{CommissionKind, CommissionPlan};
use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

use super::{distribute, parse_address, require_wallet};
use crate::{
    error::ApiError,
    ledger::{CommissionRecord, LedgerError, Node, NodeStatus, NodeType},
    store::Store,
};

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NodeWithCommissions {
    pub node: Node,
    pub commissions: Vec<CommissionRecord>,
}

pub async fn require_node(store: &dyn Store, id: Uuid) -> Result<Node, ApiError> {
    store
        .get_node(id)
        .await?
        .ok_or_else(|| ApiError::not_found("node", id))
}

/// Records a paid purchase as a pending node and pays the buyer's upline.
/// The payment itself (`tx_hash`) is trusted as verified upstream.
pub async fn purchase_node(
    store: &dyn Store,
    plan: &CommissionPlan,
    owner: &str,
    node_type: NodeType,
    price: Decimal,
    tx_hash: Option<String>,
) -> Result<NodeWithCommissions, ApiError> {
    if price <= Decimal::ZERO {
        return Err(LedgerError::NonPositiveAmount.into());
    }
    let owner = require_wallet(store, &parse_address(owner)?).await?;
    let now = Utc::now();
    let tx_hash = tx_hash.map(|h| h.trim().to_string()).filter(|h| !h.is_empty());
    let node = Node::purchased(owner.address.as_str(), node_type, price, tx_hash, now);
    store.save_node(&node).await?;
    tracing::info!(node = %node.id, owner = %node.owner, node_type = %node_type, %price, "node purchased");

    let commissions = distribute(
        store,
        plan,
        CommissionKind::ReferralCommission,
        price,
        &owner,
        node.id,
        now,
    )
    .await?;
    Ok(NodeWithCommissions { node, commissions })
}

pub async fn get_node(store: &dyn Store, id: Uuid) -> Result<Node, ApiError> {
    require_node(store, id).await
}

pub async fn list_nodes(store: &dyn Store, owner: Option<&str>) -> Result<Vec<Node>, ApiError> {
    let owner = owner.map(parse_address).transpose()?;
    Ok(store.list_nodes(owner.as_ref().map(|o| o.as_str())).await?)
}

pub async fn update_status(store: &dyn Store, id: Uuid, status: NodeStatus) -> Result<Node, ApiError> {
    let mut node = require_node(store, id).await?;
    let from = node.status;
    node.transition(status, Utc::now())?;
    store.save_node(&node).await?;
    tracing::info!(node = %id, %from, to = %status, "node status changed");
    Ok(node)
}

/// Books earnings for a running node: the node and its owner are credited,
/// the owner's upline receives its earnings share.
pub async fn accrue_earnings(
    store: &dyn Store,
    plan: &CommissionPlan,
    id: Uuid,
    amount: Decimal,
) -> Result<NodeWithCommissions, ApiError> {
    let mut node = require_node(store, id).await?;
    let now = Utc::now();
    node.accrue(amount, now)?;
    let owner = require_wallet(store, &parse_address(&node.owner)?).await?;

    store.save_node(&node).await?;
    store.credit_node_income(&owner.address, amount).await?;
    tracing::info!(node = %id, owner = %owner.address, %amount, "node earnings accrued");

    let commissions = distribute(
        store,
        plan,
        CommissionKind::EarningsShare,
        amount,
        &owner,
        node.id,
        now,
    )
    .await?;
    Ok(NodeWithCommissions { node, commissions })
}
