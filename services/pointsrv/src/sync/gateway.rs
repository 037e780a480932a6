//! Cross-domain gateway API client

use async_trait::async_trait;
use errors::{PointError, PointResult};
use reqwest::{Client as HttpClient, Method};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

/// Default base URL of the gateway
pub const DEFAULT_GATEWAY_URL: &str = "http://0.0.0.0:1616";

#[derive(Debug, Clone, PartialEq)]
pub struct GatewayResponse {
    pub status: u16,
    pub body: Option<Value>,
}

impl GatewayResponse {
    pub fn is_success(&self) -> bool {
        self.status < 400
    }

    /// `Err` for any status >= 400
    pub fn error_for_status(self, path: &str) -> PointResult<Self> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(PointError::Gateway {
                path: path.to_string(),
                status: self.status,
            })
        }
    }
}

/// Request/response access to the other point domains
#[async_trait]
pub trait GatewayApi: Send + Sync {
    /// `api_path` is relative to the gateway root, e.g. `/ps/api/...`
    async fn request(
        &self,
        api_path: &str,
        method: Method,
        body: Option<Value>,
    ) -> PointResult<GatewayResponse>;
}

/// [`GatewayApi`] over HTTP
pub struct HttpGateway {
    base_url: String,
    client: HttpClient,
}

impl HttpGateway {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> PointResult<Self> {
        let client = HttpClient::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    pub fn url(&self, api_path: &str) -> String {
        format!("{}/{}", self.base_url, api_path.trim_start_matches('/'))
    }
}

#[async_trait]
impl GatewayApi for HttpGateway {
    async fn request(
        &self,
        api_path: &str,
        method: Method,
        body: Option<Value>,
    ) -> PointResult<GatewayResponse> {
        let url = self.url(api_path);
        debug!("{} {}", method, url);

        let mut request = self.client.request(method, &url);
        if let Some(body) = body {
            request = request.json(&body);
        }
        let response = request.send().await?;
        let status = response.status().as_u16();
        // Some endpoints answer with an empty body
        let body = response.json::<Value>().await.ok();
        Ok(GatewayResponse { status, body })
    }
}
