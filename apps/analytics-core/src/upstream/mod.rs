//! Upstream HTTP client
//! Every request goes through the resilient caller bound to the upstream's label

mod error;

pub use error::UpstreamError;

use reqwest::{RequestBuilder, StatusCode};
use serde_json::Value;
use std::sync::Arc;

use crate::resilience::{ResilienceError, ResilientCaller};

pub type UpstreamResult<T> = Result<T, ResilienceError<UpstreamError>>;

pub struct UpstreamClient {
    http: reqwest::Client,
    base_url: String,
    caller: Arc<ResilientCaller>,
}

impl UpstreamClient {
    pub fn new(base_url: impl Into<String>, caller: Arc<ResilientCaller>) -> Result<Self, UpstreamError> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("analytics-core/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self::with_http_client(http, base_url, caller))
    }

    pub fn with_http_client(
        http: reqwest::Client,
        base_url: impl Into<String>,
        caller: Arc<ResilientCaller>,
    ) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            caller,
        }
    }

    pub fn caller(&self) -> &Arc<ResilientCaller> {
        &self.caller
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    pub async fn get_json(&self, path: &str) -> UpstreamResult<Value> {
        let url = self.url(path);
        self.caller.execute(|| send(self.http.get(&url))).await
    }

    pub async fn post_json(&self, path: &str, body: &Value) -> UpstreamResult<Value> {
        let url = self.url(path);
        self.caller.execute(|| send(self.http.post(&url).json(body))).await
    }
}

async fn send(request: RequestBuilder) -> Result<Value, UpstreamError> {
    let response = request.send().await?;
    let status = response.status();

    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(UpstreamError::Status {
            status: status.as_u16(),
            body,
        });
    }
    if status == StatusCode::NO_CONTENT {
        return Ok(Value::Null);
    }

    // body read failures are transport errors; only the JSON parse is permanent
    let body = response.bytes().await?;
    serde_json::from_slice(&body).map_err(|e| UpstreamError::Decode(e.to_string()))
}
