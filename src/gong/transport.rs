//! HTTP transport for the call-recording provider.
//!
//! `GongTransport` is the seam between request pacing/pagination (the
//! client) and the wire. The reqwest implementation authenticates with the
//! access key pair as basic auth and enforces a per-request timeout; a
//! timeout surfaces as the same `Transport` error as any other failure.
//! `UnconfiguredTransport` stands in when the key pair is missing so the
//! rest of the daemon keeps running.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use url::Url;

use crate::config::GongConfig;
use crate::error::SignalError;

#[async_trait]
pub trait GongTransport: Send + Sync {
    async fn get(&self, path: &str, query: &[(String, String)]) -> Result<Value, SignalError>;
    async fn post(&self, path: &str, body: &Value) -> Result<Value, SignalError>;
}

pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
    access_key: String,
    access_key_secret: String,
}

impl HttpTransport {
    pub fn new(config: &GongConfig) -> Result<Self, SignalError> {
        let (access_key, secret) = config.credentials().ok_or_else(|| {
            SignalError::Configuration("Gong access key and secret are not configured".into())
        })?;

        Url::parse(&config.base_url).map_err(|e| {
            SignalError::Configuration(format!(
                "Invalid Gong base URL '{}': {}",
                config.base_url, e
            ))
        })?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs.max(1)))
            .build()
            .map_err(|e| {
                SignalError::Configuration(format!("Failed to build HTTP client: {}", e))
            })?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            access_key: access_key.to_string(),
            access_key_secret: secret.to_string(),
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, SignalError> {
        let joined = format!("{}/{}", self.base_url, path.trim_start_matches('/'));
        Url::parse(&joined).map_err(|e| {
            SignalError::Configuration(format!("Invalid endpoint '{}': {}", joined, e))
        })
    }

    async fn read_json(resp: reqwest::Response) -> Result<Value, SignalError> {
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(SignalError::transport(Some(status.as_u16()), text));
        }
        Ok(resp.json().await?)
    }
}

#[async_trait]
impl GongTransport for HttpTransport {
    async fn get(&self, path: &str, query: &[(String, String)]) -> Result<Value, SignalError> {
        let resp = self
            .client
            .get(self.endpoint(path)?)
            .basic_auth(&self.access_key, Some(&self.access_key_secret))
            .query(query)
            .send()
            .await?;
        Self::read_json(resp).await
    }

    async fn post(&self, path: &str, body: &Value) -> Result<Value, SignalError> {
        let resp = self
            .client
            .post(self.endpoint(path)?)
            .basic_auth(&self.access_key, Some(&self.access_key_secret))
            .json(body)
            .send()
            .await?;
        Self::read_json(resp).await
    }
}

/// Fails every request with the reason the HTTP transport could not be built.
pub struct UnconfiguredTransport {
    reason: String,
}

impl UnconfiguredTransport {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl GongTransport for UnconfiguredTransport {
    async fn get(&self, _path: &str, _query: &[(String, String)]) -> Result<Value, SignalError> {
        Err(SignalError::Configuration(self.reason.clone()))
    }

    async fn post(&self, _path: &str, _body: &Value) -> Result<Value, SignalError> {
        Err(SignalError::Configuration(self.reason.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn configured(base_url: &str) -> GongConfig {
        GongConfig {
            access_key: Some("ak".into()),
            access_key_secret: Some("secret".into()),
            base_url: base_url.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_missing_credentials_is_configuration_error() {
        let result = HttpTransport::new(&GongConfig::default());
        assert!(matches!(result, Err(SignalError::Configuration(_))));
    }

    #[test]
    fn test_invalid_base_url_rejected() {
        let result = HttpTransport::new(&configured("not a url"));
        assert!(matches!(result, Err(SignalError::Configuration(_))));
    }

    #[tokio::test]
    async fn test_unconfigured_transport_fails_every_request() {
        let transport = UnconfiguredTransport::new("no keys");
        let get = transport.get("/calls", &[]).await;
        let post = transport.post("/calls/extensive", &Value::Null).await;
        assert!(matches!(get, Err(SignalError::Configuration(ref r)) if r == "no keys"));
        assert!(matches!(post, Err(SignalError::Configuration(_))));
    }

    #[test]
    fn test_endpoint_joins_paths() {
        let transport = HttpTransport::new(&configured("https://api.gong.io/v2/")).unwrap();
        assert_eq!(
            transport.endpoint("/calls/extensive").unwrap().as_str(),
            "https://api.gong.io/v2/calls/extensive"
        );
        assert_eq!(
            transport.endpoint("engage/emails").unwrap().as_str(),
            "https://api.gong.io/v2/engage/emails"
        );
    }
}
