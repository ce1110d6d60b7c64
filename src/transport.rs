// src/transport.rs
//! Transport seam between the engine and the actual HTTP stack.
//!
//! The engine treats the transport as an opaque capability: issue a request,
//! get back a status and JSON body, or a classified failure. Timeouts and
//! cancellation are enforced by the queue processor around the `issue` call,
//! so implementations only need to report what the wire did.

use crate::error::OptimizerError;
use async_trait::async_trait;
use log::debug;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
        }
    }
}

impl Default for HttpMethod {
    fn default() -> Self {
        HttpMethod::Get
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything the transport needs to build a request, minus the URL.
#[derive(Debug, Clone, Default)]
pub struct RequestSpec {
    pub method: HttpMethod,
    pub headers: HashMap<String, String>,
    pub body: Option<Value>,
}

/// Successful wire response as seen by the engine.
#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: u16,
    pub body: Value,
    pub retry_after: Option<Duration>,
}

/// Opaque request capability: `issue(url, spec) -> response | failure`.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn issue(&self, url: &str, spec: &RequestSpec) -> Result<TransportResponse, OptimizerError>;
}

/// Production transport backed by a shared `reqwest` client.
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new() -> Result<Self, OptimizerError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| OptimizerError::Internal(format!("failed to build http client: {}", e)))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn issue(&self, url: &str, spec: &RequestSpec) -> Result<TransportResponse, OptimizerError> {
        let parsed = Url::parse(url)
            .map_err(|e| OptimizerError::InvalidRequest(format!("invalid url '{}': {}", url, e)))?;

        let method = match spec.method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Put => reqwest::Method::PUT,
            HttpMethod::Patch => reqwest::Method::PATCH,
            HttpMethod::Delete => reqwest::Method::DELETE,
        };

        let mut builder = self.client.request(method, parsed);
        for (name, value) in &spec.headers {
            builder = builder.header(name, value);
        }
        if let Some(body) = &spec.body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                OptimizerError::Timeout(e.to_string())
            } else {
                OptimizerError::NetworkError(e.to_string())
            }
        })?;

        let status = response.status();
        let retry_after = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<u64>().ok())
            .map(Duration::from_secs);

        if status.as_u16() == 429 {
            debug!("{} {} answered 429, retry-after {:?}", spec.method, url, retry_after);
            return Err(OptimizerError::RateLimited {
                retry_after_ms: retry_after.map(|d| d.as_millis() as u64),
            });
        }

        let text = response
            .text()
            .await
            .map_err(|e| OptimizerError::NetworkError(format!("failed to read body: {}", e)))?;

        if !status.is_success() {
            return Err(OptimizerError::HttpStatus {
                status: status.as_u16(),
                message: truncate(&text, 200),
            });
        }

        let body = if text.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).unwrap_or(Value::String(text))
        };

        Ok(TransportResponse {
            status: status.as_u16(),
            body,
            retry_after,
        })
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        text.chars().take(max_chars).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn method_round_trips_as_str() {
        assert_eq!(HttpMethod::Get.as_str(), "GET");
        assert_eq!(HttpMethod::Patch.to_string(), "PATCH");
        assert_eq!(HttpMethod::default(), HttpMethod::Get);
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("short", 200), "short");
        assert_eq!(truncate("héllo wörld", 5), "héllo");
    }
}
