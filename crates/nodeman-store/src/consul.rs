//! Consul KV client.
//!
//! Speaks the Consul HTTP KV API directly: `GET /v1/kv/<key>?raw` (404 maps
//! to an absent key), `PUT /v1/kv/<key>` with the raw value as the request
//! body, `DELETE /v1/kv/<key>`. An ACL token, when configured, is sent as
//! `X-Consul-Token` on every request.

use crate::{KvStore, StoreError};

/// Env var holding the Consul base URL (scheme + host + port).
pub const ENV_HTTP_ADDR: &str = "CONSUL_HTTP_ADDR";
/// Env var holding the Consul ACL token.
pub const ENV_HTTP_TOKEN: &str = "CONSUL_HTTP_TOKEN";

const DEFAULT_ADDR: &str = "http://127.0.0.1:8500";

/// Consul-backed [`KvStore`].
#[derive(Debug, Clone)]
pub struct ConsulKv {
    http: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl ConsulKv {
    /// Build a client from `CONSUL_HTTP_ADDR` / `CONSUL_HTTP_TOKEN`,
    /// defaulting to the local agent.
    ///
    /// # Errors
    /// Construction failure (bad address, client build failure) is the one
    /// fatal error in the system — callers abort before any state-machine
    /// logic runs.
    pub fn from_env() -> Result<Self, StoreError> {
        let addr = std::env::var(ENV_HTTP_ADDR).unwrap_or_else(|_| DEFAULT_ADDR.to_string());
        let token = std::env::var(ENV_HTTP_TOKEN).ok().filter(|t| !t.is_empty());
        Self::new_with_base_url(addr, token)
    }

    /// Explicit-address constructor; also the test seam.
    pub fn new_with_base_url(
        base_url: impl Into<String>,
        token: Option<String>,
    ) -> Result<Self, StoreError> {
        let base_url = base_url.into();
        reqwest::Url::parse(&base_url)
            .map_err(|e| StoreError::Config(format!("invalid consul address {base_url:?}: {e}")))?;

        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| StoreError::Config(format!("http client build failed: {e}")))?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        })
    }

    fn kv_url(&self, key: &str) -> String {
        format!("{}/v1/kv/{}", self.base_url, key)
    }

    fn request(&self, method: reqwest::Method, key: &str) -> reqwest::RequestBuilder {
        let mut req = self.http.request(method, self.kv_url(key));
        if let Some(token) = &self.token {
            req = req.header("X-Consul-Token", token);
        }
        req
    }
}

#[async_trait::async_trait]
impl KvStore for ConsulKv {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let resp = self
            .request(reqwest::Method::GET, key)
            // ?raw returns the value verbatim instead of the base64 envelope.
            .query(&[("raw", "true")])
            .send()
            .await
            .map_err(|e| StoreError::Transport(e.to_string()))?;

        let status = resp.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(StoreError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let body = resp
            .bytes()
            .await
            .map_err(|e| StoreError::Decode(e.to_string()))?;
        Ok(Some(body.to_vec()))
    }

    async fn put(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        let resp = self
            .request(reqwest::Method::PUT, key)
            .body(value.to_vec())
            .send()
            .await
            .map_err(|e| StoreError::Transport(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(StoreError::Api {
                status: status.as_u16(),
                message,
            });
        }

        // Consul answers a bare JSON bool; false means the write was refused.
        let accepted: bool = resp
            .json()
            .await
            .map_err(|e| StoreError::Decode(e.to_string()))?;
        if !accepted {
            return Err(StoreError::Api {
                status: status.as_u16(),
                message: format!("consul refused write to {key:?}"),
            });
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let resp = self
            .request(reqwest::Method::DELETE, key)
            .send()
            .await
            .map_err(|e| StoreError::Transport(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(StoreError::Api {
                status: status.as_u16(),
                message,
            });
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests (mock HTTP, no real Consul)
// ---------------------------------------------------------------------------
