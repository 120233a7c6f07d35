use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use nodehost_admin::{
    auth::{hash_password, AdminAuth},
    config::{Cli, Command},
    devices::DeviceApiClient,
    oracle::{FixedPrice, HttpPriceOracle, PriceOracle, PriceQuote},
    router,
    service::teams,
    store::{MemoryStore, PgStore, Store},
    AppConfig, AppState,
};
use referral_module::tier::derive_tier;

async fn open_store(config: &AppConfig) -> Result<Arc<dyn Store>> {
    match &config.database_url {
        Some(url) => {
            let store = PgStore::connect(url, config.db_max_connections)
                .await
                .context("connecting to PostgreSQL")?;
            info!(max_connections = config.db_max_connections, "using PostgreSQL store");
            Ok(Arc::new(store))
        }
        None => {
            warn!("DATABASE_URL not set, using in-memory store; data is lost on exit");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}

fn price_oracle(config: &AppConfig) -> Result<Arc<dyn PriceOracle>> {
    match &config.price_url {
        Some(url) => Ok(Arc::new(
            HttpPriceOracle::new(url.clone(), config.fallback_price, config.http_timeout)
                .context("building price oracle client")?,
        )),
        None => {
            warn!(price = %config.fallback_price, "no price oracle configured, using fallback price");
            Ok(Arc::new(FixedPrice(PriceQuote::fallback(config.fallback_price))))
        }
    }
}

async fn serve(config: AppConfig) -> Result<()> {
    let store = open_store(&config).await?;
    let oracle = price_oracle(&config)?;
    let devices = DeviceApiClient::new(
        config.device_api_url.clone(),
        config.device_api_key.clone(),
        config.http_timeout,
    )
    .context("building device API client")?;
    if !devices.is_configured() {
        info!("NODEHOST_DEVICE_API_URL not set, device passthrough disabled");
    }
    if config.admin_password_sha256.is_none() {
        warn!("NODEHOST_ADMIN_PASSWORD_SHA256 not set, admin routes will refuse every request");
    }
    let auth = AdminAuth::new(
        config.admin_username.clone(),
        config.admin_password_sha256.clone().unwrap_or_default(),
        config.session_ttl,
    );

    let listen = config.listen;
    let state = AppState {
        store,
        oracle,
        devices: Arc::new(devices),
        auth: Arc::new(auth),
        config: Arc::new(config),
    };
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(listen)
        .await
        .with_context(|| format!("binding {listen}"))?;
    info!(%listen, "nodehost-admin listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = %err, "failed to listen for ctrl-c");
                std::future::pending::<()>().await;
            }
            info!("shutdown signal received");
        })
        .await
        .context("HTTP server failed")?;
    info!("nodehost-admin stopped");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&cli.settings.log_level))
        .context("invalid log filter")?;
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command.clone().unwrap_or(Command::Serve) {
        Command::HashPassword { password } => {
            if password.is_empty() {
                bail!("password must not be empty");
            }
            println!("{}", hash_password(&password));
            Ok(())
        }
        Command::Tier { balance, price } => {
            let config = AppConfig::try_from(cli.settings)?;
            let assessment = derive_tier(balance, price, &config.thresholds);
            println!("{}", serde_json::to_string_pretty(&assessment)?);
            Ok(())
        }
        Command::RecomputeTeams => {
            let config = AppConfig::try_from(cli.settings)?;
            let store = open_store(&config).await?;
            let report = teams::recompute_team_sizes(store.as_ref()).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Command::Serve => serve(AppConfig::try_from(cli.settings)?).await,
    }
}
