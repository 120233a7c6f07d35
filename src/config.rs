use std::{net::SocketAddr, time::Duration};

use clap::{Args, Parser, Subcommand};
use referral_module::{commission::CommissionPlan, ReferralError, TierThresholds};
use rust_decimal::Decimal;

#[derive(Parser, Debug)]
#[command(name = "nodehost-admin")]
#[command(version, about = "Membership, referral and node-hosting admin API", long_about = None)]
pub struct Cli {
    #[command(flatten)]
    pub settings: Settings,
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Run the HTTP API (default)
    Serve,
    /// Recompute every wallet's team size once and print the report
    RecomputeTeams,
    /// Print the SHA-256 hex digest to use as NODEHOST_ADMIN_PASSWORD_SHA256
    HashPassword { password: String },
    /// Derive a membership tier offline
    Tier {
        /// Token balance
        #[arg(long)]
        balance: Decimal,
        /// Token price in USD
        #[arg(long)]
        price: Decimal,
    },
}

#[derive(Args, Debug, Clone)]
pub struct Settings {
    /// HTTP listen address
    #[arg(long, env = "NODEHOST_LISTEN", default_value = "127.0.0.1:8088")]
    pub listen: SocketAddr,
    /// PostgreSQL URL; without it an in-memory store is used
    #[arg(long, env = "DATABASE_URL")]
    pub database_url: Option<String>,
    #[arg(long, env = "NODEHOST_DB_MAX_CONNECTIONS", default_value_t = 10)]
    pub db_max_connections: u32,
    /// Spot price endpoint returning `{"price": ...}`
    #[arg(long, env = "NODEHOST_PRICE_URL")]
    pub price_url: Option<String>,
    /// Price used when the oracle is unreachable
    #[arg(long, env = "NODEHOST_FALLBACK_PRICE", default_value = "0.00001")]
    pub fallback_price: Decimal,
    #[arg(long, env = "NODEHOST_TIER_MID_USD", default_value = "3000")]
    pub tier_mid_usd: Decimal,
    #[arg(long, env = "NODEHOST_TIER_TOP_USD", default_value = "10000")]
    pub tier_top_usd: Decimal,
    /// Purchase commission per level, basis points, comma separated
    #[arg(long, env = "NODEHOST_PURCHASE_BPS", default_value = "1000,500")]
    pub purchase_bps: String,
    /// Earnings share per level, basis points, comma separated
    #[arg(long, env = "NODEHOST_EARNINGS_BPS", default_value = "500,200")]
    pub earnings_bps: String,
    #[arg(long, env = "NODEHOST_MINIMUM_PAYOUT", default_value = "0")]
    pub minimum_payout: Decimal,
    /// Deepest level reported by the team statistics endpoint
    #[arg(long, env = "NODEHOST_TEAM_MAX_DEPTH", default_value_t = 10)]
    pub team_max_depth: u32,
    #[arg(long, env = "NODEHOST_ADMIN_USERNAME", default_value = "admin")]
    pub admin_username: String,
    #[arg(long, env = "NODEHOST_ADMIN_PASSWORD_SHA256")]
    pub admin_password_sha256: Option<String>,
    /// Admin session lifetime in seconds
    #[arg(long, env = "NODEHOST_SESSION_TTL_SECS", default_value_t = 43_200)]
    pub session_ttl_secs: u64,
    #[arg(long, env = "NODEHOST_DEVICE_API_URL")]
    pub device_api_url: Option<String>,
    #[arg(long, env = "NODEHOST_DEVICE_API_KEY")]
    pub device_api_key: Option<String>,
    /// Timeout for outbound HTTP calls, seconds
    #[arg(long, env = "NODEHOST_HTTP_TIMEOUT_SECS", default_value_t = 10)]
    pub http_timeout_secs: u64,
    /// Default log filter when RUST_LOG is unset
    #[arg(long, env = "NODEHOST_LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid basis points list {value:?} for {name}")]
    Rates { name: &'static str, value: String },
    #[error("fallback price must be positive, got {0}")]
    FallbackPrice(Decimal),
    #[error("admin password digest must be 64 hex characters")]
    PasswordDigest,
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
    #[error(transparent)]
    Referral(#[from] ReferralError),
}

/// Validated runtime configuration shared by the services.
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub listen: SocketAddr,
    pub database_url: Option<String>,
    pub db_max_connections: u32,
    pub price_url: Option<String>,
    pub fallback_price: Decimal,
    pub thresholds: TierThresholds,
    pub plan: CommissionPlan,
    pub team_max_depth: u32,
    pub admin_username: String,
    pub admin_password_sha256: Option<String>,
    pub session_ttl: chrono::Duration,
    pub device_api_url: Option<String>,
    pub device_api_key: Option<String>,
    pub http_timeout: Duration,
}

fn parse_bps(name: &'static str, value: &str) -> Result<Vec<u32>, ConfigError> {
    if value.trim().is_empty() {
        return Ok(Vec::new());
    }
    value
        .split(',')
        .map(|part| part.trim().parse::<u32>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|_| ConfigError::Rates {
            name,
            value: value.to_string(),
        })
}

impl TryFrom<Settings> for AppConfig {
    type Error = ConfigError;

    fn try_from(s: Settings) -> Result<Self, Self::Error> {
        if s.fallback_price <= Decimal::ZERO {
            return Err(ConfigError::FallbackPrice(s.fallback_price));
        }
        if s.team_max_depth == 0 {
            return Err(ConfigError::Zero("team max depth"));
        }
        if s.session_ttl_secs == 0 {
            return Err(ConfigError::Zero("session TTL"));
        }
        if s.http_timeout_secs == 0 {
            return Err(ConfigError::Zero("HTTP timeout"));
        }
        if let Some(digest) = &s.admin_password_sha256 {
            if digest.len() != 64 || hex::decode(digest).is_err() {
                return Err(ConfigError::PasswordDigest);
            }
        }
        let plan = CommissionPlan::new(
            parse_bps("purchase", &s.purchase_bps)?,
            parse_bps("earnings", &s.earnings_bps)?,
            s.minimum_payout,
        )?;
        let ttl_secs = i64::try_from(s.session_ttl_secs).unwrap_or(i64::MAX / 1_000);
        Ok(Self {
            listen: s.listen,
            database_url: s.database_url.filter(|url| !url.trim().is_empty()),
            db_max_connections: s.db_max_connections.max(1),
            price_url: s.price_url.filter(|url| !url.trim().is_empty()),
            fallback_price: s.fallback_price,
            thresholds: TierThresholds::new(s.tier_mid_usd, s.tier_top_usd)?,
            plan,
            team_max_depth: s.team_max_depth,
            admin_username: s.admin_username,
            admin_password_sha256: s.admin_password_sha256,
            session_ttl: chrono::Duration::seconds(ttl_secs),
            device_api_url: s.device_api_url.filter(|url| !url.trim().is_empty()),
            device_api_key: s.device_api_key,
            http_timeout: Duration::from_secs(s.http_timeout_secs),
        })
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([127, 0, 0, 1], 8088)),
            database_url: None,
            db_max_connections: 10,
            price_url: None,
            fallback_price: Decimal::new(1, 5),
            thresholds: TierThresholds::default(),
            plan: CommissionPlan::default(),
            team_max_depth: 10,
            admin_username: "admin".into(),
            admin_password_sha256: None,
            session_ttl: chrono::Duration::hours(12),
            device_api_url: None,
            device_api_key: None,
            http_timeout: Duration::from_secs(10),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(extra: &[&str]) -> Settings {
        let mut argv = vec!["nodehost-admin"];
        argv.extend_from_slice(extra);
        Cli::try_parse_from(argv).unwrap().settings
    }

    #[test]
    fn defaults_validate() {
        let config = AppConfig::try_from(settings(&[])).unwrap();
        assert_eq!(config.fallback_price, Decimal::new(1, 5));
        assert_eq!(config.thresholds, TierThresholds::default());
        assert_eq!(config.plan, CommissionPlan::default());
        assert_eq!(config.team_max_depth, 10);
        assert_eq!(config.session_ttl, chrono::Duration::seconds(43_200));
    }

    #[test]
    fn rates_are_parsed_and_bounded() {
        let config = AppConfig::try_from(settings(&["--purchase-bps", "800", "--earnings-bps", ""])).unwrap();
        assert_eq!(config.plan.rates(referral_module::commission::CommissionKind::ReferralCommission), &[800]);
        assert!(AppConfig::try_from(settings(&["--purchase-bps", "1,2,3"])).is_err());
        assert!(AppConfig::try_from(settings(&["--purchase-bps", "ten"])).is_err());
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(AppConfig::try_from(settings(&["--tier-mid-usd", "10000"])).is_err());
        assert!(AppConfig::try_from(settings(&["--fallback-price", "0"])).is_err());
        assert!(AppConfig::try_from(settings(&["--admin-password-sha256", "abc"])).is_err());
    }

    #[test]
    fn subcommands_parse() {
        let cli = Cli::try_parse_from(["nodehost-admin", "tier", "--balance", "1000000", "--price", "0.01"]).unwrap();
        assert!(matches!(cli.command, Some(Command::Tier { .. })));
        let cli = Cli::try_parse_from(["nodehost-admin"]).unwrap();
        assert!(cli.command.is_none());
    }
}
