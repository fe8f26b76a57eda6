//! Outbound HTTP fetch.
//!
//! The relay core only describes requests ([`OutboundRequest`]); executing
//! them is delegated to an [`Upstream`] implementation. [`HttpUpstream`] is
//! the production one, built on a pooled reqwest client.

use crate::error::Result;
use crate::relay::request::OutboundRequest;
use async_trait::async_trait;
use axum::body::Bytes;
use axum::http::{HeaderMap, StatusCode};
use reqwest::{Client, redirect};
use std::time::Duration;
use tracing::{debug, warn};

/// Default per-request timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Outcome of an upstream fetch, consumed once to build the relay response.
#[derive(Clone, Debug)]
pub struct UpstreamResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

#[async_trait]
pub trait Upstream: Send + Sync {
    /// Execute the request once. Non-success statuses are a normal result;
    /// only transport failures are errors.
    async fn fetch(&self, request: OutboundRequest) -> Result<UpstreamResponse>;
}

/// reqwest-backed upstream.
///
/// Redirects are not followed so the relay can route them back through
/// itself.
#[derive(Clone, Debug)]
pub struct HttpUpstream {
    client: Client,
}

impl HttpUpstream {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(10)
            .timeout(timeout)
            .redirect(redirect::Policy::none())
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Upstream for HttpUpstream {
    async fn fetch(&self, request: OutboundRequest) -> Result<UpstreamResponse> {
        debug!("Fetching {} {}", request.method, request.url);

        let mut builder = self
            .client
            .request(request.method.clone(), request.url.clone())
            .headers(request.headers);
        if let Some(json) = &request.json {
            builder = builder.json(json);
        }

        let response = builder.send().await.map_err(|e| {
            warn!("Upstream fetch failed for {} {}: {}", request.method, request.url, e);
            e
        })?;

        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await?;

        if !status.is_success() {
            debug!("Upstream returned {} for {}", status, request.url);
        }

        Ok(UpstreamResponse {
            status,
            headers,
            body,
        })
    }
}
