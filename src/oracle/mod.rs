//! Token spot price lookup with a configured fallback.

use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PriceSource {
    Live,
    Fallback,
}

#[derive(Clone, Copy, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PriceQuote {
    pub price: Decimal,
    pub source: PriceSource,
}

impl PriceQuote {
    pub fn fallback(price: Decimal) -> Self {
        Self {
            price,
            source: PriceSource::Fallback,
        }
    }
}

#[async_trait]
pub trait PriceOracle: Send + Sync {
    /// Never fails; an unreachable oracle yields the fallback quote.
    async fn spot_price(&self) -> PriceQuote;
}

#[derive(Debug, thiserror::Error)]
enum FetchError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("response has no usable price field")]
    MissingPrice,
}

/// Queries an HTTP endpoint whose JSON body carries `price` as a number or
/// a string.
pub struct HttpPriceOracle {
    http: reqwest::Client,
    url: String,
    fallback: Decimal,
}

impl HttpPriceOracle {
    pub fn new(url: impl Into<String>, fallback: Decimal, timeout: Duration) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            url: url.into(),
            fallback,
        })
    }

    async fn fetch(&self) -> Result<Decimal, FetchError> {
        let body: Value = self
            .http
            .get(&self.url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        parse_price(&body).ok_or(FetchError::MissingPrice)
    }
}

fn parse_price(body: &Value) -> Option<Decimal> {
    let price = match body.get("price")? {
        Value::String(s) => s.trim().parse::<Decimal>().ok()?,
        Value::Number(n) => n.to_string().parse::<Decimal>().ok().or_else(|| {
            n.as_f64().and_then(|f| Decimal::try_from(f).ok())
        })?,
        _ => return None,
    };
    (price > Decimal::ZERO).then_some(price)
}

#[async_trait]
impl PriceOracle for HttpPriceOracle {
    async fn spot_price(&self) -> PriceQuote {
        match self.fetch().await {
            Ok(price) => PriceQuote {
                price,
                source: PriceSource::Live,
            },
            Err(err) => {
                tracing::warn!(url = %self.url, error = %err, fallback = %self.fallback, "price oracle unavailable");
                PriceQuote::fallback(self.fallback)
            }
        }
    }
}

/// Constant price, used when no oracle URL is configured and in tests.
pub struct FixedPrice(pub PriceQuote);

impl FixedPrice {
    pub fn live(price: Decimal) -> Self {
        Self(PriceQuote {
            price,
            source: PriceSource::Live,
        })
    }
}

#[async_trait]
impl PriceOracle for FixedPrice {
    async fn spot_price(&self) -> PriceQuote {
        self.0
    }
}
