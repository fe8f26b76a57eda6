//! Outbound request construction.

use super::cookie::LAST_REQUESTED_COOKIE;
use super::query::RelayQuery;
use super::target::TargetDescriptor;
use crate::error::{RelayError, Result};
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, header};
use serde_json::Value;
use url::Url;

/// Caller headers that describe the caller's hop to the relay, not the
/// relay's hop to the upstream.
const NOT_FORWARDED: &[&str] = &[
    "host",
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
    "content-length",
    "content-type",
    "origin",
    "referer",
    "cookie",
    "accept-encoding",
];

fn is_forwarded(name: &HeaderName) -> bool {
    !NOT_FORWARDED.contains(&name.as_str())
}

/// Fully resolved description of the call the upstream collaborator makes.
#[derive(Clone, Debug)]
pub struct OutboundRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub json: Option<Value>,
}

impl OutboundRequest {
    /// Build the outbound request from the decoded relay query.
    ///
    /// `default_method` is the method the caller used on the relay route;
    /// an explicit `method` query value overrides it.
    ///
    /// # Errors
    /// [`RelayError::InvalidParam`] for an invalid method or header override.
    pub fn build(
        query: &RelayQuery,
        target: &TargetDescriptor,
        caller_headers: &HeaderMap,
        default_method: Method,
    ) -> Result<Self> {
        let method = match query.method.as_deref() {
            Some(raw) => Method::from_bytes(raw.trim().to_ascii_uppercase().as_bytes()).map_err(
                |_| RelayError::InvalidParam {
                    name: "method",
                    reason: format!("'{}' is not an HTTP method", raw),
                },
            )?,
            None => default_method,
        };

        let mut url = target.url().clone();
        if !query.params.is_empty() {
            url.query_pairs_mut().extend_pairs(&query.params);
        }

        let headers = apply_overrides(forwarded_headers(caller_headers), &query.headers)?;

        Ok(Self {
            method,
            url,
            headers,
            json: query.json.clone(),
        })
    }
}

/// Caller headers that travel upstream, with cookies mirrored and compressed
/// transfer disabled.
pub fn forwarded_headers(caller_headers: &HeaderMap) -> HeaderMap {
    let mut headers = HeaderMap::new();
    for (name, value) in caller_headers.iter() {
        if is_forwarded(name) {
            headers.append(name.clone(), value.clone());
        }
    }

    if let Some(cookie) = forwarded_cookies(caller_headers) {
        headers.insert(header::COOKIE, cookie);
    }

    // Bodies are re-emitted as received, so never ask for a compressed one
    headers.insert(header::ACCEPT_ENCODING, HeaderValue::from_static("identity"));
    headers
}

/// Caller cookies minus the relay's own bookkeeping cookie.
fn forwarded_cookies(caller_headers: &HeaderMap) -> Option<HeaderValue> {
    let cookies: Vec<&str> = caller_headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .map(str::trim)
        .filter(|pair| !pair.is_empty())
        .filter(|pair| {
            pair.split_once('=')
                .map(|(name, _)| name.trim() != LAST_REQUESTED_COOKIE)
                .unwrap_or(true)
        })
        .collect();

    if cookies.is_empty() {
        return None;
    }
    HeaderValue::from_str(&cookies.join("; ")).ok()
}

/// Apply caller-supplied header overrides on top of `headers`.
pub fn apply_overrides(mut headers: HeaderMap, overrides: &[(String, String)]) -> Result<HeaderMap> {
    for (name, value) in overrides {
        let invalid = |reason: String| RelayError::InvalidParam {
            name: "headers",
            reason,
        };
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| invalid(format!("invalid header name '{}'", name)))?;
        let value = HeaderValue::from_str(value)
            .map_err(|_| invalid(format!("invalid value for header '{}'", name)))?;
        headers.insert(name, value);
    }
    Ok(headers)
}
