//! Route handlers. Each one parses its inputs, calls one service and wraps
//! the result in a `success: true` envelope.

use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Path, Query, RawQuery, State,
    },
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use referral_module::forest::HierarchyEdge;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use super::{ok, ApiResponse, AppState};
use crate::{
    auth::AuthError,
    error::ApiError,
    ledger::{Listing, ListingStatus, Node, NodeStatus, NodeType, Wallet, Withdrawal, WithdrawalStatus},
    service::{
        marketplace,
        members::{self, Connected, EarningsSummary, MemberProfile},
        nodes::{self, NodeWithCommissions},
        teams::{self, HierarchyReport, RecomputeReport, TeamStats},
        withdrawals,
    },
    store::TimeWindow,
};

type Reply<T> = Result<Json<ApiResponse<T>>, ApiError>;

fn parse_id(raw: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(raw.trim()).map_err(|_| ApiError::BadRequest(format!("invalid id {raw:?}")))
}

// ------------------------------------------------------------ envelopes

#[derive(Serialize)]
pub struct WalletBody {
    pub wallet: Wallet,
}

#[derive(Serialize)]
pub struct WalletsBody {
    pub count: usize,
    pub wallets: Vec<Wallet>,
}

#[derive(Serialize)]
pub struct ReferralsBody {
    pub address: String,
    pub count: usize,
    pub referrals: Vec<Wallet>,
}

#[derive(Serialize)]
pub struct NodeBody {
    pub node: Node,
}

#[derive(Serialize)]
pub struct NodesBody {
    pub nodes: Vec<Node>,
}

#[derive(Serialize)]
pub struct ListingBody {
    pub listing: Listing,
}

#[derive(Serialize)]
pub struct ListingsBody {
    pub listings: Vec<Listing>,
}

#[derive(Serialize)]
pub struct WithdrawalBody {
    pub withdrawal: Withdrawal,
}

#[derive(Serialize)]
pub struct WithdrawalsBody {
    pub withdrawals: Vec<Withdrawal>,
}

#[derive(Serialize)]
pub struct EdgesBody {
    pub count: usize,
    pub edges: Vec<HierarchyEdge>,
}

// ------------------------------------------------------------- requests

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectRequest {
    pub address: String,
    #[serde(default, alias = "referralCode", alias = "parentWallet")]
    pub referrer: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamQuery {
    pub max_depth: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseRequest {
    pub owner: String,
    pub node_type: NodeType,
    pub price: Decimal,
    #[serde(default)]
    pub tx_hash: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct OwnerQuery {
    pub owner: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListingQuery {
    pub status: Option<ListingStatus>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateListingRequest {
    pub node_id: Uuid,
    pub seller: String,
    pub price: Decimal,
}

#[derive(Debug, Deserialize)]
pub struct BuyRequest {
    pub buyer: String,
}

#[derive(Debug, Deserialize)]
pub struct CancelRequest {
    pub seller: String,
}

#[derive(Debug, Deserialize)]
pub struct WithdrawalRequest {
    pub address: String,
    pub amount: Decimal,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParentRequest {
    #[serde(default)]
    pub parent: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct BalanceRequest {
    pub balance: Decimal,
}

#[derive(Debug, Deserialize)]
pub struct StatusRequest {
    pub status: NodeStatus,
}

#[derive(Debug, Deserialize)]
pub struct AmountRequest {
    pub amount: Decimal,
}

#[derive(Debug, Default, Deserialize)]
pub struct WithdrawalQuery {
    pub status: Option<WithdrawalStatus>,
    pub wallet: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct NoteRequest {
    #[serde(default)]
    pub note: Option<String>,
}

// ---------------------------------------------------------------- public

pub async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "success": true,
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "devicesConfigured": state.devices.is_configured(),
    }))
}

pub async fn login(
    State(state): State<AppState>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Reply<crate::auth::Session> {
    let Json(req) = payload?;
    let session = state.auth.login(&req.username, &req.password, Utc::now())?;
    Ok(ok(session))
}

pub async fn logout(State(state): State<AppState>, headers: HeaderMap) -> Result<Json<Value>, ApiError> {
    let token = headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().strip_prefix("Bearer "))
        .ok_or_else(|| ApiError::from(AuthError::MissingCredentials))?;
    let ended = state.auth.logout(token.trim());
    Ok(Json(json!({ "success": true, "loggedOut": ended })))
}

pub async fn connect_wallet(
    State(state): State<AppState>,
    payload: Result<Json<ConnectRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(req) = payload?;
    let connected: Connected =
        members::connect_wallet(state.store.as_ref(), &req.address, req.referrer.as_deref()).await?;
    let status = if connected.created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, ok(connected)).into_response())
}

pub async fn get_wallet(State(state): State<AppState>, Path(address): Path<String>) -> Reply<WalletBody> {
    let wallet = members::get_wallet(state.store.as_ref(), &address).await?;
    Ok(ok(WalletBody { wallet }))
}

pub async fn member_profile(
    State(state): State<AppState>,
    Path(address): Path<String>,
) -> Reply<MemberProfile> {
    let profile = members::member_profile(
        state.store.as_ref(),
        state.oracle.as_ref(),
        &state.config.thresholds,
        &address,
    )
    .await?;
    Ok(ok(profile))
}

pub async fn member_earnings(
    State(state): State<AppState>,
    Path(address): Path<String>,
    window: Result<Query<TimeWindow>, QueryRejection>,
) -> Reply<EarningsSummary> {
    let Query(window) = window?;
    Ok(ok(members::earnings_summary(state.store.as_ref(), &address, window).await?))
}

pub async fn member_team(
    State(state): State<AppState>,
    Path(address): Path<String>,
    query: Result<Query<TeamQuery>, QueryRejection>,
) -> Reply<TeamStats> {
    let Query(query) = query?;
    let stats = teams::team_stats(
        state.store.as_ref(),
        state.oracle.as_ref(),
        &address,
        query.max_depth,
        state.config.team_max_depth,
    )
    .await?;
    Ok(ok(stats))
}

pub async fn member_referrals(
    State(state): State<AppState>,
    Path(address): Path<String>,
) -> Reply<ReferralsBody> {
    let referrals = members::direct_referrals(state.store.as_ref(), &address).await?;
    Ok(ok(ReferralsBody {
        address: address.trim().to_ascii_lowercase(),
        count: referrals.len(),
        referrals,
    }))
}

pub async fn purchase_node(
    State(state): State<AppState>,
    payload: Result<Json<PurchaseRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(req) = payload?;
    let purchase = nodes::purchase_node(
        state.store.as_ref(),
        &state.config.plan,
        &req.owner,
        req.node_type,
        req.price,
        req.tx_hash,
    )
    .await?;
    Ok((StatusCode::CREATED, ok(purchase)).into_response())
}

pub async fn list_nodes(
    State(state): State<AppState>,
    query: Result<Query<OwnerQuery>, QueryRejection>,
) -> Reply<NodesBody> {
    let Query(query) = query?;
    let nodes = nodes::list_nodes(state.store.as_ref(), query.owner.as_deref()).await?;
    Ok(ok(NodesBody { nodes }))
}

pub async fn get_node(State(state): State<AppState>, Path(id): Path<String>) -> Reply<NodeBody> {
    let node = nodes::get_node(state.store.as_ref(), parse_id(&id)?).await?;
    Ok(ok(NodeBody { node }))
}

pub async fn list_listings(
    State(state): State<AppState>,
    query: Result<Query<ListingQuery>, QueryRejection>,
) -> Reply<ListingsBody> {
    let Query(query) = query?;
    let listings = marketplace::list_listings(state.store.as_ref(), query.status).await?;
    Ok(ok(ListingsBody { listings }))
}

pub async fn create_listing(
    State(state): State<AppState>,
    payload: Result<Json<CreateListingRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(req) = payload?;
    let listing =
        marketplace::create_listing(state.store.as_ref(), req.node_id, &req.seller, req.price).await?;
    Ok((StatusCode::CREATED, ok(ListingBody { listing })).into_response())
}

pub async fn buy_listing(
    State(state): State<AppState>,
    Path(id): Path<String>,
    payload: Result<Json<BuyRequest>, JsonRejection>,
) -> Reply<marketplace::Sale> {
    let Json(req) = payload?;
    Ok(ok(marketplace::buy_listing(state.store.as_ref(), parse_id(&id)?, &req.buyer).await?))
}

pub async fn cancel_listing(
    State(state): State<AppState>,
    Path(id): Path<String>,
    payload: Result<Json<CancelRequest>, JsonRejection>,
) -> Reply<ListingBody> {
    let Json(req) = payload?;
    let listing = marketplace::cancel_listing(state.store.as_ref(), parse_id(&id)?, &req.seller).await?;
    Ok(ok(ListingBody { listing }))
}

pub async fn request_withdrawal(
    State(state): State<AppState>,
    payload: Result<Json<WithdrawalRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(req) = payload?;
    let withdrawal = withdrawals::request(state.store.as_ref(), &req.address, req.amount).await?;
    Ok((StatusCode::CREATED, ok(WithdrawalBody { withdrawal })).into_response())
}

pub async fn wallet_withdrawals(
    State(state): State<AppState>,
    Path(address): Path<String>,
) -> Reply<WithdrawalsBody> {
    let withdrawals = withdrawals::list(state.store.as_ref(), Some(&address), None).await?;
    Ok(ok(WithdrawalsBody { withdrawals }))
}

/// Relays `GET /api/devices/<path>?<query>` to the device API.
pub async fn device_passthrough(
    State(state): State<AppState>,
    Path(path): Path<String>,
    RawQuery(query): RawQuery,
) -> Result<Response, ApiError> {
    let upstream = state.devices.get(&path, query.as_deref()).await?;
    let body = json!({
        "success": upstream.status.is_success(),
        "data": upstream.body,
    });
    Ok((upstream.status, Json(body)).into_response())
}

// ----------------------------------------------------------------- admin

pub async fn recompute_team_sizes(State(state): State<AppState>) -> Reply<RecomputeReport> {
    Ok(ok(teams::recompute_team_sizes(state.store.as_ref()).await?))
}

pub async fn rebuild_hierarchy(State(state): State<AppState>) -> Reply<HierarchyReport> {
    Ok(ok(teams::rebuild_hierarchy(state.store.as_ref()).await?))
}

pub async fn hierarchy_edges(State(state): State<AppState>) -> Reply<EdgesBody> {
    let edges = state.store.hierarchy_edges().await?;
    Ok(ok(EdgesBody {
        count: edges.len(),
        edges,
    }))
}

pub async fn list_wallets(State(state): State<AppState>) -> Reply<WalletsBody> {
    let wallets = members::list_wallets(state.store.as_ref()).await?;
    Ok(ok(WalletsBody {
        count: wallets.len(),
        wallets,
    }))
}

pub async fn set_parent(
    State(state): State<AppState>,
    Path(address): Path<String>,
    payload: Result<Json<ParentRequest>, JsonRejection>,
) -> Reply<WalletBody> {
    let Json(req) = payload?;
    let wallet = members::set_parent(state.store.as_ref(), &address, req.parent.as_deref()).await?;
    Ok(ok(WalletBody { wallet }))
}

pub async fn set_balance(
    State(state): State<AppState>,
    Path(address): Path<String>,
    payload: Result<Json<BalanceRequest>, JsonRejection>,
) -> Reply<WalletBody> {
    let Json(req) = payload?;
    let wallet = members::set_balance(
        state.store.as_ref(),
        state.oracle.as_ref(),
        &state.config.thresholds,
        &address,
        req.balance,
    )
    .await?;
    Ok(ok(WalletBody { wallet }))
}

pub async fn update_node_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
    payload: Result<Json<StatusRequest>, JsonRejection>,
) -> Reply<NodeBody> {
    let Json(req) = payload?;
    let node = nodes::update_status(state.store.as_ref(), parse_id(&id)?, req.status).await?;
    Ok(ok(NodeBody { node }))
}

pub async fn accrue_node_earnings(
    State(state): State<AppState>,
    Path(id): Path<String>,
    payload: Result<Json<AmountRequest>, JsonRejection>,
) -> Reply<NodeWithCommissions> {
    let Json(req) = payload?;
    let accrual =
        nodes::accrue_earnings(state.store.as_ref(), &state.config.plan, parse_id(&id)?, req.amount).await?;
    Ok(ok(accrual))
}

pub async fn admin_withdrawals(
    State(state): State<AppState>,
    query: Result<Query<WithdrawalQuery>, QueryRejection>,
) -> Reply<WithdrawalsBody> {
    let Query(query) = query?;
    let withdrawals =
        withdrawals::list(state.store.as_ref(), query.wallet.as_deref(), query.status).await?;
    Ok(ok(WithdrawalsBody { withdrawals }))
}

pub async fn approve_withdrawal(
    State(state): State<AppState>,
    Path(id): Path<String>,
    payload: Option<Json<NoteRequest>>,
) -> Reply<WithdrawalBody> {
    let note = payload.and_then(|Json(req)| req.note);
    let withdrawal = withdrawals::approve(state.store.as_ref(), parse_id(&id)?, note).await?;
    Ok(ok(WithdrawalBody { withdrawal }))
}

pub async fn reject_withdrawal(
    State(state): State<AppState>,
    Path(id): Path<String>,
    payload: Option<Json<NoteRequest>>,
) -> Reply<WithdrawalBody> {
    let note = payload.and_then(|Json(req)| req.note);
    let withdrawal = withdrawals::reject(state.store.as_ref(), parse_id(&id)?, note).await?;
    Ok(ok(WithdrawalBody { withdrawal }))
}
