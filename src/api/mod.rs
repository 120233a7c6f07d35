//! HTTP surface: shared state, routing and the admin guard.

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::{self, Next},
    response::Response,
    routing::{get, post, put},
    Json, Router,
};
use chrono::Utc;
use serde::Serialize;

use crate::{
    auth::AdminAuth, config::AppConfig, devices::DeviceApiClient, error::ApiError,
    oracle::PriceOracle, store::Store,
};

pub mod handlers;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub oracle: Arc<dyn PriceOracle>,
    pub devices: Arc<DeviceApiClient>,
    pub auth: Arc<AdminAuth>,
    pub config: Arc<AppConfig>,
}

/// Success envelope: `{"success": true, ...body}`.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(flatten)]
    pub body: T,
}

pub fn ok<T: Serialize>(body: T) -> Json<ApiResponse<T>> {
    Json(ApiResponse {
        success: true,
        body,
    })
}

async fn require_admin(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let header = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok());
    if let Err(err) = state.auth.authorize(header, Utc::now()) {
        tracing::warn!(path = %request.uri().path(), error = %err, "admin request refused");
        return Err(err.into());
    }
    Ok(next.run(request).await)
}

pub fn router(state: AppState) -> Router {
    use handlers::*;

    let admin = Router::new()
        .route("/team-sizes/recompute", post(recompute_team_sizes))
        .route("/hierarchy/rebuild", post(rebuild_hierarchy))
        .route("/hierarchy", get(hierarchy_edges))
        .route("/wallets", get(list_wallets))
        .route("/wallets/:address/parent", put(set_parent))
        .route("/wallets/:address/balance", put(set_balance))
        .route("/nodes/:id/status", post(update_node_status))
        .route("/nodes/:id/earnings", post(accrue_node_earnings))
        .route("/withdrawals", get(admin_withdrawals))
        .route("/withdrawals/:id/approve", post(approve_withdrawal))
        .route("/withdrawals/:id/reject", post(reject_withdrawal))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_admin));

    Router::new()
        .route("/health", get(health))
        .route("/api/auth/login", post(login))
        .route("/api/auth/logout", post(logout))
        .route("/api/wallets/connect", post(connect_wallet))
        .route("/api/wallets/:address", get(get_wallet))
        .route("/api/members/:address/profile", get(member_profile))
        .route("/api/members/:address/earnings", get(member_earnings))
        .route("/api/members/:address/team", get(member_team))
        .route("/api/members/:address/referrals", get(member_referrals))
        .route("/api/nodes/purchase", post(purchase_node))
        .route("/api/nodes", get(list_nodes))
        .route("/api/nodes/:id", get(get_node))
        .route("/api/marketplace/listings", get(list_listings).post(create_listing))
        .route("/api/marketplace/listings/:id/buy", post(buy_listing))
        .route("/api/marketplace/listings/:id/cancel", post(cancel_listing))
        .route("/api/withdrawals", post(request_withdrawal))
        .route("/api/withdrawals/:address", get(wallet_withdrawals))
        .route("/api/devices/*path", get(device_passthrough))
        .nest("/api/admin", admin)
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        auth::hash_password,
        oracle::FixedPrice,
        store::MemoryStore,
    };
    use axum::{
        body::{to_bytes, Body},
        http::{Method, StatusCode},
    };
    use base64::{engine::general_purpose, Engine as _};
    use rust_decimal::Decimal;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    fn state() -> AppState {
        AppState {
            store: Arc::new(MemoryStore::new()),
            oracle: Arc::new(FixedPrice::live(Decimal::new(1, 2))),
            devices: Arc::new(DeviceApiClient::disabled()),
            auth: Arc::new(AdminAuth::new(
                "admin",
                hash_password("secret"),
                chrono::Duration::hours(1),
            )),
            config: Arc::new(AppConfig::default()),
        }
    }

    fn basic() -> String {
        format!("Basic {}", general_purpose::STANDARD.encode("admin:secret"))
    }

    async fn call(app: &Router, method: Method, uri: &str, body: Option<Value>, auth: Option<&str>) -> (StatusCode, Value) {
        let mut builder = axum::http::Request::builder().method(method).uri(uri);
        if let Some(auth) = auth {
            builder = builder.header(AUTHORIZATION, auth);
        }
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    async fn connect(app: &Router, address: &str, referrer: Option<&str>) -> (StatusCode, Value) {
        call(
            app,
            Method::POST,
            "/api/wallets/connect",
            Some(json!({ "address": address, "referrer": referrer })),
            None,
        )
        .await
    }

    #[tokio::test]
    async fn health_is_public() {
        let app = router(state());
        let (status, body) = call(&app, Method::GET, "/health", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["devicesConfigured"], false);
    }

    #[tokio::test]
    async fn admin_routes_require_credentials() {
        let app = router(state());
        let (status, body) = call(&app, Method::POST, "/api/admin/team-sizes/recompute", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["success"], false);

        let (status, body) = call(
            &app,
            Method::POST,
            "/api/auth/login",
            Some(json!({"username": "admin", "password": "secret"})),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let bearer = format!("Bearer {}", body["token"].as_str().unwrap());
        let (status, _) = call(&app, Method::GET, "/api/admin/wallets", None, Some(&bearer)).await;
        assert_eq!(status, StatusCode::OK);

        let (_, body) = call(&app, Method::POST, "/api/auth/logout", None, Some(&bearer)).await;
        assert_eq!(body["loggedOut"], true);
        let (status, _) = call(&app, Method::GET, "/api/admin/wallets", None, Some(&bearer)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _) = call(
            &app,
            Method::POST,
            "/api/auth/login",
            Some(json!({"username": "admin", "password": "nope"})),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn recompute_reports_team_sizes() {
        let app = router(state());
        assert_eq!(connect(&app, "0xA", None).await.0, StatusCode::CREATED);
        connect(&app, "0xB", Some("0xa")).await;
        connect(&app, "0xC", Some("0xa")).await;
        connect(&app, "0xD", Some("0xb")).await;
        assert_eq!(connect(&app, "0xd", None).await.0, StatusCode::OK);

        let auth = basic();
        let (status, report) =
            call(&app, Method::POST, "/api/admin/team-sizes/recompute", None, Some(&auth)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(report["success"], true);
        assert_eq!(report["totalWallets"], 4);
        assert_eq!(report["walletsWithTeam"], 2);
        assert_eq!(
            report["updates"],
            json!([{"address": "0xa", "size": 3}, {"address": "0xb", "size": 1}])
        );

        let (_, profile) = call(&app, Method::GET, "/api/members/0xa/profile", None, None).await;
        assert_eq!(profile["totalReferrals"], 3);
        assert_eq!(profile["directReferrals"], 2);
        assert_eq!(profile["priceSource"], "live");
    }

    #[tokio::test]
    async fn malformed_input_is_a_bad_request() {
        let app = router(state());
        let (status, body) = call(
            &app,
            Method::POST,
            "/api/wallets/connect",
            Some(json!({"wallet": "0xa"})),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);

        let (status, _) = call(&app, Method::GET, "/api/nodes/not-a-uuid", None, None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let (status, _) = call(&app, Method::GET, "/api/wallets/0xnobody", None, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = call(&app, Method::GET, "/api/devices/list", None, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn purchase_commission_and_withdrawal_flow() {
        let app = router(state());
        connect(&app, "0xsponsor", None).await;
        connect(&app, "0xbuyer", Some("0xsponsor")).await;

        let (status, purchase) = call(
            &app,
            Method::POST,
            "/api/nodes/purchase",
            Some(json!({"owner": "0xbuyer", "nodeType": "cloud", "price": 500})),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(purchase["node"]["status"], "pending");
        assert_eq!(purchase["commissions"][0]["beneficiary"], "0xsponsor");
        let node_id = purchase["node"]["id"].as_str().unwrap().to_string();

        let auth = basic();
        for status in ["deploying", "running"] {
            let (code, _) = call(
                &app,
                Method::POST,
                &format!("/api/admin/nodes/{node_id}/status"),
                Some(json!({"status": status})),
                Some(&auth),
            )
            .await;
            assert_eq!(code, StatusCode::OK);
        }
        let (code, _) = call(
            &app,
            Method::POST,
            &format!("/api/admin/nodes/{node_id}/earnings"),
            Some(json!({"amount": 100})),
            Some(&auth),
        )
        .await;
        assert_eq!(code, StatusCode::OK);

        let (_, earnings) = call(&app, Method::GET, "/api/members/0xsponsor/earnings", None, None).await;
        assert_eq!(earnings["teamRewards"], 55.0);
        assert_eq!(earnings["teamPercent"], 100.0);

        let (code, body) = call(
            &app,
            Method::POST,
            "/api/withdrawals",
            Some(json!({"address": "0xsponsor", "amount": 60})),
            None,
        )
        .await;
        assert_eq!(code, StatusCode::BAD_REQUEST, "{body}");
        let (code, body) = call(
            &app,
            Method::POST,
            "/api/withdrawals",
            Some(json!({"address": "0xsponsor", "amount": 55})),
            None,
        )
        .await;
        assert_eq!(code, StatusCode::CREATED);
        let withdrawal_id = body["withdrawal"]["id"].as_str().unwrap().to_string();

        let (code, body) = call(
            &app,
            Method::POST,
            &format!("/api/admin/withdrawals/{withdrawal_id}/approve"),
            None,
            Some(&auth),
        )
        .await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(body["withdrawal"]["status"], "approved");

        let (_, listed) = call(&app, Method::GET, "/api/withdrawals/0xsponsor", None, None).await;
        assert_eq!(listed["withdrawals"].as_array().unwrap().len(), 1);
    }
}
