use crate::{
    error::{RelayError, Result},
    metrics,
    relay::{cookie::last_requested_origin, target::escape_query_value},
    server::state::AppState,
};
use axum::{
    extract::State,
    http::{HeaderMap, Method, StatusCode, Uri},
    response::{IntoResponse, Redirect, Response},
};
use tracing::info;

/// Router fallback for every path other than the relay endpoint.
///
/// Players that resolve a relative reference against the relay's own URL end
/// up here. When enabled, the `_last_requested` cookie supplies the host the
/// path belongs to and the caller is redirected back into the relay.
pub async fn redirect_to_relay(
    State(state): State<AppState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
) -> Result<Response> {
    if !state.config.fallback_enabled || !matches!(method, Method::GET | Method::POST) {
        return Ok(StatusCode::NOT_FOUND.into_response());
    }

    let host = last_requested_origin(&headers).ok_or(RelayError::NoFallbackTarget)?;
    let location = fallback_location(&state.config.relay_path, &host, &uri);

    info!("Fallback redirect {} -> {}", uri, location);
    metrics::record_request("fallback", StatusCode::TEMPORARY_REDIRECT.as_u16());

    // 307 keeps the method, so POSTs stay POSTs
    Ok(Redirect::temporary(&location).into_response())
}

/// `<relay-path>?url=<host>/<path>[?<query>]` with the target escaped as one
/// query value.
pub fn fallback_location(relay_path: &str, host: &str, uri: &Uri) -> String {
    let path = uri.path().trim_start_matches('/');
    let mut target = format!("{}/{}", host, path);
    if let Some(query) = uri.query().filter(|q| !q.is_empty()) {
        target.push('?');
        target.push_str(query);
    }
    format!("{}?url={}", relay_path, escape_query_value(&target))
}
