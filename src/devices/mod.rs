//! Read-only passthrough to the device-telemetry API.

use std::time::Duration;

use reqwest::StatusCode;
use serde_json::Value;

pub const API_KEY_HEADER: &str = "x-api-key";

#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error("device API is not configured")]
    NotConfigured,
    #[error("invalid device path {0:?}")]
    InvalidPath(String),
    #[error("device API request failed: {0}")]
    Http(#[from] reqwest::Error),
}

/// Upstream answer, relayed as-is.
#[derive(Debug)]
pub struct DeviceResponse {
    pub status: StatusCode,
    pub body: Value,
}

pub struct DeviceApiClient {
    http: reqwest::Client,
    base_url: Option<String>,
    api_key: Option<String>,
}

impl DeviceApiClient {
    pub fn new(
        base_url: Option<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.map(|url| url.trim_end_matches('/').to_string()),
            api_key,
        })
    }

    pub fn disabled() -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: None,
            api_key: None,
        }
    }

    pub fn is_configured(&self) -> bool {
        self.base_url.is_some()
    }

    fn target(&self, path: &str, query: Option<&str>) -> Result<String, DeviceError> {
        let base = self.base_url.as_deref().ok_or(DeviceError::NotConfigured)?;
        let path = path.trim_start_matches('/');
        if path.split('/').any(|segment| segment == "..") {
            return Err(DeviceError::InvalidPath(path.to_string()));
        }
        let mut url = format!("{base}/{path}");
        if let Some(query) = query.filter(|q| !q.is_empty()) {
            url.push('?');
            url.push_str(query);
        }
        Ok(url)
    }

    pub async fn get(&self, path: &str, query: Option<&str>) -> Result<DeviceResponse, DeviceError> {
        let url = self.target(path, query)?;
        let mut request = self.http.get(&url);
        if let Some(key) = &self.api_key {
            request = request.header(API_KEY_HEADER, key);
        }
        let response = request.send().await?;
        let status = response.status();
        let bytes = response.bytes().await?;
        let body = serde_json::from_slice(&bytes)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()));
        tracing::debug!(%url, %status, "device API response");
        Ok(DeviceResponse { status, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> DeviceApiClient {
        DeviceApiClient::new(
            Some("https://devices.example/v1/".into()),
            None,
            Duration::from_secs(1),
        )
        .unwrap()
    }

    #[test]
    fn target_joins_path_and_query() {
        let url = client().target("/devices/42/metrics", Some("window=1h")).unwrap();
        assert_eq!(url, "https://devices.example/v1/devices/42/metrics?window=1h");
        assert_eq!(
            client().target("devices", Some("")).unwrap(),
            "https://devices.example/v1/devices"
        );
    }

    #[test]
    fn parent_segments_are_refused() {
        assert!(matches!(
            client().target("devices/../admin", None),
            Err(DeviceError::InvalidPath(_))
        ));
    }

    #[tokio::test]
    async fn disabled_client_reports_not_configured() {
        let client = DeviceApiClient::disabled();
        assert!(!client.is_configured());
        assert!(matches!(
            client.get("devices", None).await,
            Err(DeviceError::NotConfigured)
        ));
    }
}
