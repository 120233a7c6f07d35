use chrono::Utc;
use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

use super::{nodes::require_node, parse_address, require_wallet};
use crate::{
    error::ApiError,
    ledger::{Listing, ListingStatus, Node, NodeStatus},
    store::Store,
};

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Sale {
    pub listing: Listing,
    pub node: Node,
}

async fn require_listing(store: &dyn Store, id: Uuid) -> Result<Listing, ApiError> {
    store
        .get_listing(id)
        .await?
        .ok_or_else(|| ApiError::not_found("listing", id))
}

pub async fn list_listings(store: &dyn Store, status: Option<ListingStatus>) -> Result<Vec<Listing>, ApiError> {
    Ok(store.list_listings(status).await?)
}

pub async fn create_listing(store: &dyn Store, node_id: Uuid, seller: &str, price: Decimal) -> Result<Listing, ApiError> {
    let seller = parse_address(seller)?;
    let node = require_node(store, node_id).await?;
    if !node.owner.eq_ignore_ascii_case(seller.as_str()) {
        return Err(ApiError::BadRequest(format!("{seller} does not own node {node_id}")));
    }
    if node.status == NodeStatus::Inactive {
        return Err(ApiError::BadRequest(format!("node {node_id} is inactive")));
    }
    let open = store.list_listings(Some(ListingStatus::Open)).await?;
    if let Some(existing) = open.iter().find(|l| l.node_id == node_id) {
        return Err(ApiError::BadRequest(format!(
            "node {node_id} is already listed as {}",
            existing.id
        )));
    }
    let listing = Listing::open(node_id, seller.as_str(), price, Utc::now())?;
    store.save_listing(&listing).await?;
    tracing::info!(listing = %listing.id, node = %node_id, seller = %seller, %price, "listing opened");
    Ok(listing)
}

/// Transfers the node to `buyer`. Settlement happens off-platform.
pub async fn buy_listing(store: &dyn Store, id: Uuid, buyer: &str) -> Result<Sale, ApiError> {
    let buyer = parse_address(buyer)?;
    let mut listing = require_listing(store, id).await?;
    require_wallet(store, &buyer).await?;
    if listing.seller.eq_ignore_ascii_case(buyer.as_str()) {
        return Err(ApiError::BadRequest("seller cannot buy their own listing".into()));
    }
    let mut node = require_node(store, listing.node_id).await?;
    if !node.owner.eq_ignore_ascii_case(&listing.seller) {
        return Err(ApiError::BadRequest(format!(
            "seller no longer owns node {}",
            node.id
        )));
    }

    let now = Utc::now();
    listing.sell_to(buyer.as_str(), now)?;
    node.transfer_to(buyer.as_str(), now);
    store.save_listing(&listing).await?;
    store.save_node(&node).await?;
    tracing::info!(listing = %id, node = %node.id, seller = %listing.seller, buyer = %buyer, "listing sold");
    Ok(Sale { listing, node })
}

pub async fn cancel_listing(store: &dyn Store, id: Uuid, seller: &str) -> Result<Listing, ApiError> {
    let seller = parse_address(seller)?;
    let mut listing = require_listing(store, id).await?;
    if !listing.seller.eq_ignore_ascii_case(seller.as_str()) {
        return Err(ApiError::BadRequest("only the seller can cancel a listing".into()));
    }
    listing.cancel(Utc::now())?;
    store.save_listing(&listing).await?;
    tracing::info!(listing = %id, "listing cancelled");
    Ok(listing)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        ledger::NodeType,
        service::{nodes::purchase_node, testing::seed},
        store::MemoryStore,
    };
    use referral_module::{commission::CommissionPlan, MembershipTier};

    async fn setup() -> (MemoryStore, Node) {
        let store = MemoryStore::new();
        seed(&store, "0xseller", None, 0, MembershipTier::Base).await;
        seed(&store, "0xbuyer", None, 0, MembershipTier::Base).await;
        let node = purchase_node(
            &store,
            &CommissionPlan::default(),
            "0xseller",
            NodeType::Cloud,
            Decimal::from(500),
            None,
        )
        .await
        .unwrap()
        .node;
        (store, node)
    }

    #[tokio::test]
    async fn buying_transfers_ownership() {
        let (store, node) = setup().await;
        let listing = create_listing(&store, node.id, "0xseller", Decimal::from(600)).await.unwrap();
        assert!(matches!(
            buy_listing(&store, listing.id, "0xseller").await,
            Err(ApiError::BadRequest(_))
        ));
        let sale = buy_listing(&store, listing.id, "0xBUYER").await.unwrap();
        assert_eq!(sale.node.owner, "0xbuyer");
        assert_eq!(sale.listing.status, ListingStatus::Sold);
        assert_eq!(store.get_node(node.id).await.unwrap().unwrap().owner, "0xbuyer");
        assert!(buy_listing(&store, listing.id, "0xbuyer").await.is_err());
    }

    #[tokio::test]
    async fn one_open_listing_per_node() {
        let (store, node) = setup().await;
        create_listing(&store, node.id, "0xseller", Decimal::ONE).await.unwrap();
        assert!(create_listing(&store, node.id, "0xseller", Decimal::ONE).await.is_err());
        assert!(matches!(
            create_listing(&store, node.id, "0xbuyer", Decimal::ONE).await,
            Err(ApiError::BadRequest(_))
        ));
    }

    #[tokio::test]
    async fn cancel_is_seller_only_and_final() {
        let (store, node) = setup().await;
        let listing = create_listing(&store, node.id, "0xseller", Decimal::ONE).await.unwrap();
        assert!(cancel_listing(&store, listing.id, "0xbuyer").await.is_err());
        let cancelled = cancel_listing(&store, listing.id, "0xseller").await.unwrap();
        assert_eq!(cancelled.status, ListingStatus::Cancelled);
        assert!(cancel_listing(&store, listing.id, "0xseller").await.is_err());
        assert!(buy_listing(&store, listing.id, "0xbuyer").await.is_err());
        assert_eq!(
            list_listings(&store, Some(ListingStatus::Open)).await.unwrap().len(),
            0
        );
        // relisting after a cancel is allowed
        create_listing(&store, node.id, "0xseller", Decimal::ONE).await.unwrap();
    }

    #[tokio::test]
    async fn stale_listing_cannot_be_bought() {
        let (store, node) = setup().await;
        let listing = create_listing(&store, node.id, "0xseller", Decimal::ONE).await.unwrap();
        let mut moved = store.get_node(node.id).await.unwrap().unwrap();
        moved.transfer_to("0xsomeoneelse", Utc::now());
        store.save_node(&moved).await.unwrap();
        assert!(matches!(
            buy_listing(&store, listing.id, "0xbuyer").await,
            Err(ApiError::BadRequest(_))
        ));
    }
}
