//! Client-held record of the most recently relayed host.
//!
//! Only the fallback redirect reads it. It is never an input to origin or
//! target checks.

use axum::http::{HeaderMap, HeaderValue, header};
use url::Url;

pub const LAST_REQUESTED_COOKIE: &str = "_last_requested";

/// Build the `Set-Cookie` value recording `origin` (`scheme://host[:port]`).
pub fn last_requested_set_cookie(origin: &str, max_age_secs: u64) -> Option<HeaderValue> {
    HeaderValue::from_str(&format!(
        "{}={}; Max-Age={}; Path=/; HttpOnly; SameSite=Lax",
        LAST_REQUESTED_COOKIE, origin, max_age_secs
    ))
    .ok()
}

/// Read the last relayed origin from the caller's cookies.
///
/// Values that are not an absolute `http(s)` origin are ignored.
pub fn last_requested_origin(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| name.trim() == LAST_REQUESTED_COOKIE)
        .map(|(_, value)| value.trim().trim_matches('"').trim_end_matches('/').to_string())
        .filter(|value| {
            Url::parse(value)
                .map(|u| matches!(u.scheme(), "http" | "https") && u.host_str().is_some())
                .unwrap_or(false)
        })
}
