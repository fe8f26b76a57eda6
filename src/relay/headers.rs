//! Response header sanitizing and redirect rewriting.
//!
//! Each step takes a header map and returns a new one so the pipeline can be
//! checked stage by stage.

use super::origin::AllowedOrigin;
use super::target::{RelayBase, TargetDescriptor};
use axum::http::{HeaderMap, HeaderName, HeaderValue, header};
use tracing::{debug, warn};

/// Upstream framing headers that no longer hold once the body is re-emitted.
pub const STRIPPED_HEADERS: &[HeaderName] = &[
    header::VARY,
    header::CONTENT_ENCODING,
    header::TRANSFER_ENCODING,
    header::CONTENT_LENGTH,
];

/// Copy upstream headers minus [`STRIPPED_HEADERS`] and set
/// `Access-Control-Allow-Origin`.
pub fn sanitize(upstream: &HeaderMap, origin: &AllowedOrigin) -> HeaderMap {
    let mut headers = HeaderMap::with_capacity(upstream.len() + 1);
    for (name, value) in upstream.iter() {
        if !STRIPPED_HEADERS.contains(name) {
            headers.append(name.clone(), value.clone());
        }
    }

    let allow_origin = HeaderValue::from_str(origin.header_value())
        .unwrap_or_else(|_| HeaderValue::from_static("*"));
    headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, allow_origin);
    headers
}

/// Route a redirect `Location` back through the relay.
///
/// Relative locations are resolved against the target first. The resolved
/// value is escaped only where it would otherwise leak out of the `url`
/// parameter, so its query reaches the upstream unchanged on the next request.
pub fn rewrite_location(
    mut headers: HeaderMap,
    target: &TargetDescriptor,
    relay: &RelayBase,
) -> HeaderMap {
    let Some(location) = headers.get(header::LOCATION).and_then(|v| v.to_str().ok()) else {
        return headers;
    };

    let absolute = match target.resolve(location) {
        Some(url) => url.to_string(),
        None => {
            warn!("Unresolvable Location header '{}' left as-is", location);
            return headers;
        }
    };

    let routed = relay.route_readable(&absolute);
    debug!("Rewriting Location {} -> {}", location, routed);

    match HeaderValue::from_str(&routed) {
        Ok(value) => {
            headers.insert(header::LOCATION, value);
        }
        Err(e) => warn!("Rewritten Location is not a valid header value: {}", e),
    }
    headers
}
