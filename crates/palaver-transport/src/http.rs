//! HTTP request transport implementation.
//!
//! Methods are invoked as `GET <base><method>` with the parameter bag in the
//! query string, the way the service's web API expects. String parameters go
//! through as-is; structured values (attachment lists etc.) are serialized
//! to JSON first. The caller's credential rides along as the `token`
//! parameter.

use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use palaver_core::{ApiError, ApiResult, RequestTransport};

/// [`RequestTransport`] backed by a shared [`reqwest::Client`].
#[derive(Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
}

impl HttpTransport {
    /// Creates a transport rooted at `base_url` (trailing slash expected).
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl RequestTransport for HttpTransport {
    async fn call(
        &self,
        method: &str,
        params: &Map<String, Value>,
        token: &str,
    ) -> ApiResult<Value> {
        let url = format!("{}{}", self.base_url, method);

        let mut query: Vec<(String, String)> = params
            .iter()
            .map(|(key, value)| (key.clone(), query_value(value)))
            .collect();
        if !token.is_empty() {
            query.push(("token".to_string(), token.to_string()));
        }

        debug!(method = %method, "Calling web API");

        let response = self
            .client
            .get(&url)
            .header("Accept", "application/json")
            .query(&query)
            .send()
            .await
            .map_err(|e| ApiError::Serialization(format!("HTTP request failed: {e}")))?;

        let status = response.status();
        let body: Value = response
            .json()
            .await
            .map_err(|e| ApiError::Serialization(format!("invalid response body: {e}")))?;

        if status.is_success() {
            Ok(body)
        } else {
            // The body is surfaced as-is; no retry, no rewriting.
            warn!(method = %method, status = %status, "Web API call failed");
            Err(ApiError::Rejected(body))
        }
    }
}

/// Renders one parameter for the query string.
fn query_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
